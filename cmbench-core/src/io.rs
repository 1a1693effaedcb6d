//! File boundary for fields
//!
//! [`FieldStore`] is the only way fields enter or leave the core. The shipped
//! [`JsonFieldStore`] keeps one JSON document per file holding any number of named
//! variables. Masked entries are written as `null`, so a round trip reproduces values,
//! mask and time axis exactly. With the `netcdf` feature, `NetcdfFieldStore` reads and
//! writes CF NetCDF files.

use crate::calendar::{Calendar, TimeUnits};
use crate::errors::{FieldError, FieldResult};
use crate::field::{Companions, Field, WeightingType};
use crate::time_axis::TimeAxis;
use log::{debug, info};
use ndarray::{Array1, Array2, Array3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[cfg(feature = "netcdf")]
mod netcdf_store;
#[cfg(feature = "netcdf")]
pub use netcdf_store::{NetcdfFieldStore, FILL_VALUE};

/// Load and store fields by path and variable name.
pub trait FieldStore {
    fn load(&self, path: &Path, variable: &str) -> FieldResult<Field>;
    fn save(&self, field: &Field, path: &Path, variable: &str) -> FieldResult<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArrayRecord {
    shape: Vec<usize>,
    data: Vec<Option<f64>>,
}

impl ArrayRecord {
    fn from_values<'a>(shape: &[usize], values: impl Iterator<Item = &'a f64>) -> Self {
        Self {
            shape: shape.to_vec(),
            data: values
                .map(|v| if v.is_finite() { Some(*v) } else { None })
                .collect(),
        }
    }

    fn from_array2(array: &Array2<f64>) -> Self {
        Self::from_values(array.shape(), array.iter())
    }

    fn from_array3(array: &Array3<f64>) -> Self {
        Self::from_values(array.shape(), array.iter())
    }

    fn into_array2(self) -> FieldResult<Array2<f64>> {
        match self.shape[..] {
            [ny, nx] => Array2::from_shape_vec((ny, nx), fill_nan(self.data))
                .map_err(|e| FieldError::Serialization(e.to_string())),
            _ => Err(FieldError::Serialization(format!(
                "expected a 2-D array, got shape {:?}",
                self.shape
            ))),
        }
    }

    fn into_array3(self) -> FieldResult<Array3<f64>> {
        match self.shape[..] {
            [nt, ny, nx] => Array3::from_shape_vec((nt, ny, nx), fill_nan(self.data))
                .map_err(|e| FieldError::Serialization(e.to_string())),
            _ => Err(FieldError::Serialization(format!(
                "expected a 3-D array, got shape {:?}",
                self.shape
            ))),
        }
    }
}

fn fill_nan(data: Vec<Option<f64>>) -> Vec<f64> {
    data.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TimeRecord {
    values: Vec<f64>,
    units: String,
    calendar: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FieldRecord {
    values: ArrayRecord,
    time: Option<TimeRecord>,
    #[serde(default)]
    time_cycle: Option<usize>,
    #[serde(default)]
    lat: Option<ArrayRecord>,
    #[serde(default)]
    lon: Option<ArrayRecord>,
    #[serde(default)]
    cell_area: Option<ArrayRecord>,
    #[serde(default)]
    unit: String,
    #[serde(default)]
    label: String,
    #[serde(default)]
    weighting_type: WeightingType,
    #[serde(default)]
    std: Option<ArrayRecord>,
    #[serde(default)]
    count: Option<ArrayRecord>,
}

impl FieldRecord {
    fn from_field(field: &Field) -> Self {
        let values = field.filled(f64::NAN);
        Self {
            values: ArrayRecord::from_array3(&values),
            time: field.time().map(|t| TimeRecord {
                values: t.values().to_vec(),
                units: t.units().to_string(),
                calendar: t.calendar().to_string(),
            }),
            time_cycle: field.time_cycle(),
            lat: field.lat().map(ArrayRecord::from_array2),
            lon: field.lon().map(ArrayRecord::from_array2),
            cell_area: field.cell_area().map(ArrayRecord::from_array2),
            unit: field.unit().to_string(),
            label: field.label().to_string(),
            weighting_type: field.weighting_type(),
            std: field.companions().std().map(ArrayRecord::from_array3),
            count: field.companions().count().map(ArrayRecord::from_array3),
        }
    }

    fn into_field(self) -> FieldResult<Field> {
        let values = self.values.into_array3()?;
        let mut field = match self.time {
            Some(time) => {
                let calendar = Calendar::parse(&time.calendar)?;
                let units = TimeUnits::parse(&time.units, calendar)?;
                Field::new(values, TimeAxis::new(Array1::from(time.values), units))?
            }
            None => {
                let (_, ny, nx) = values.dim();
                let values = values
                    .into_shape_with_order((ny, nx))
                    .map_err(|e| FieldError::Serialization(e.to_string()))?;
                Field::spatial(values, None)?
            }
        };
        if let (Some(lat), Some(lon)) = (self.lat, self.lon) {
            field = field.with_coordinates(lat.into_array2()?, lon.into_array2()?)?;
        }
        if let Some(area) = self.cell_area {
            field = field.with_cell_area(area.into_array2()?)?;
        }
        if let Some(cycle) = self.time_cycle {
            field = field.with_time_cycle(cycle);
        }
        let std = self.std.map(ArrayRecord::into_array3).transpose()?;
        let count = self.count.map(ArrayRecord::into_array3).transpose()?;
        Ok(field
            .with_unit(&self.unit)
            .with_label(&self.label)
            .with_weighting(self.weighting_type)
            .with_companions(Companions::new(std, count))?)
    }
}

/// JSON document store, one `{variable: record}` map per file.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFieldStore;

impl JsonFieldStore {
    fn read_document(path: &Path) -> FieldResult<BTreeMap<String, FieldRecord>> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| FieldError::Serialization(e.to_string()))
    }
}

impl FieldStore for JsonFieldStore {
    fn load(&self, path: &Path, variable: &str) -> FieldResult<Field> {
        debug!("Loading '{}' from {}", variable, path.display());
        let mut document = Self::read_document(path)?;
        let record = document.remove(variable).ok_or_else(|| {
            FieldError::Configuration(format!(
                "variable '{}' not found in {}",
                variable,
                path.display()
            ))
        })?;
        record.into_field()
    }

    /// Store `field` under `variable`, keeping the other variables of an existing file.
    fn save(&self, field: &Field, path: &Path, variable: &str) -> FieldResult<()> {
        let mut document = if path.exists() {
            Self::read_document(path)?
        } else {
            BTreeMap::new()
        };
        document.insert(variable.to_string(), FieldRecord::from_field(field));
        let content = serde_json::to_string(&document)
            .map_err(|e| FieldError::Serialization(e.to_string()))?;
        fs::write(path, content)?;
        info!("Saved '{}' to {}", variable, path.display());
        Ok(())
    }
}
