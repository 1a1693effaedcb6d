//! NetCDF files in CF layout.
//!
//! One data variable per file with dimensions `(time, lat, lon)`, or `(lat, lon)` for
//! spatial fields. Rectilinear grids get 1-D `lat`/`lon` coordinate variables, other
//! grids 2-D `lat(y, x)`/`lon(y, x)` variables. Masked entries are written as the fill
//! value, and on reading every entry equal to `_FillValue` or `missing_value` (or not
//! finite) is masked. Companion statistics travel as `<variable>_std` and
//! `<variable>_count`.

use super::FieldStore;
use crate::calendar::{Calendar, TimeUnits};
use crate::errors::{FieldError, FieldResult};
use crate::field::{Companions, Field};
use crate::time_axis::TimeAxis;
use log::{debug, info};
use ndarray::{Array1, Array2, Array3};
use netcdf::AttributeValue;
use std::path::Path;

/// Value written for masked entries.
pub const FILL_VALUE: f64 = 1.0e20;

const TIME: &str = "time";

impl From<netcdf::Error> for FieldError {
    fn from(e: netcdf::Error) -> Self {
        FieldError::Netcdf(e.to_string())
    }
}

/// [`FieldStore`] reading and writing NetCDF files.
///
/// Saving replaces the file, so every file holds exactly one field.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetcdfFieldStore;

fn string_attribute(var: &netcdf::Variable, name: &str) -> FieldResult<Option<String>> {
    match var.attribute_value(name) {
        None => Ok(None),
        Some(value) => match value? {
            AttributeValue::Str(s) => Ok(Some(s)),
            other => Err(FieldError::Serialization(format!(
                "attribute '{}' is not a string: {:?}",
                name, other
            ))),
        },
    }
}

fn number_attribute(var: &netcdf::Variable, name: &str) -> FieldResult<Option<f64>> {
    let value = match var.attribute_value(name) {
        None => return Ok(None),
        Some(value) => value?,
    };
    let number = match value {
        AttributeValue::Double(v) => v,
        AttributeValue::Float(v) => v as f64,
        AttributeValue::Int(v) => v as f64,
        AttributeValue::Short(v) => v as f64,
        AttributeValue::Doubles(v) if !v.is_empty() => v[0],
        AttributeValue::Floats(v) if !v.is_empty() => v[0] as f64,
        other => {
            return Err(FieldError::Serialization(format!(
                "attribute '{}' is not a number: {:?}",
                name, other
            )))
        }
    };
    Ok(Some(number))
}

/// Values of a variable as `(nt, ny, nx)` with missing entries as NaN.
///
/// Degenerate dimensions between time and the grid (a single level) are dropped.
fn read_values(var: &netcdf::Variable, has_time: bool) -> FieldResult<Array3<f64>> {
    let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
    let mut raw: Vec<f64> = var.get_values::<f64, _>(..)?;

    let scale = number_attribute(var, "scale_factor")?.unwrap_or(1.0);
    let offset = number_attribute(var, "add_offset")?.unwrap_or(0.0);
    let fills: Vec<f64> = [
        number_attribute(var, "_FillValue")?,
        number_attribute(var, "missing_value")?,
    ]
    .into_iter()
    .flatten()
    .collect();
    for v in raw.iter_mut() {
        *v = if !v.is_finite() || fills.contains(v) {
            f64::NAN
        } else {
            *v * scale + offset
        };
    }

    let dim = match (has_time, shape.as_slice()) {
        (true, [nt]) => (*nt, 1, 1),
        (true, [nt, rest @ .., ny, nx]) if rest.iter().all(|&n| n == 1) => (*nt, *ny, *nx),
        (false, [rest @ .., ny, nx]) if rest.iter().all(|&n| n == 1) => (1, *ny, *nx),
        _ => {
            return Err(FieldError::Serialization(format!(
                "cannot interpret dimensions {:?} of '{}'",
                shape,
                var.name()
            )))
        }
    };
    Array3::from_shape_vec(dim, raw).map_err(|e| FieldError::Serialization(e.to_string()))
}

fn read_time(file: &netcdf::File) -> FieldResult<Option<TimeAxis>> {
    let Some(var) = file.variable(TIME) else {
        return Ok(None);
    };
    let units = string_attribute(&var, "units")?
        .ok_or_else(|| FieldError::InvalidTime("time variable has no units".to_string()))?;
    let calendar = match string_attribute(&var, "calendar")? {
        Some(name) => Calendar::parse(&name)?,
        None => Calendar::Gregorian,
    };
    let values: Vec<f64> = var.get_values::<f64, _>(..)?;
    Ok(Some(TimeAxis::new(
        Array1::from(values),
        TimeUnits::parse(&units, calendar)?,
    )))
}

/// Attach coordinates found under `lat`/`lon` as vectors or as 2-D arrays.
fn read_coordinates(file: &netcdf::File, field: Field) -> FieldResult<Field> {
    let (Some(lat), Some(lon)) = (file.variable("lat"), file.variable("lon")) else {
        return Ok(field);
    };
    let lat_values: Vec<f64> = lat.get_values::<f64, _>(..)?;
    let lon_values: Vec<f64> = lon.get_values::<f64, _>(..)?;
    let (ny, nx) = (field.ny(), field.nx());
    match (lat.dimensions().len(), lon.dimensions().len()) {
        (1, 1) => field.with_coordinate_vectors(Array1::from(lat_values), Array1::from(lon_values)),
        (2, 2) => {
            let to_grid = |v: Vec<f64>| {
                Array2::from_shape_vec((ny, nx), v)
                    .map_err(|e| FieldError::Serialization(e.to_string()))
            };
            field.with_coordinates(to_grid(lat_values)?, to_grid(lon_values)?)
        }
        dims => Err(FieldError::Serialization(format!(
            "unsupported coordinate dimensions {:?}",
            dims
        ))),
    }
}

fn read_grid(
    file: &netcdf::File,
    name: &str,
    ny: usize,
    nx: usize,
) -> FieldResult<Option<Array2<f64>>> {
    let Some(var) = file.variable(name) else {
        return Ok(None);
    };
    let values = read_values(&var, false)?;
    let values = values
        .into_shape_with_order((ny, nx))
        .map_err(|e| FieldError::Serialization(e.to_string()))?;
    Ok(Some(values))
}

impl FieldStore for NetcdfFieldStore {
    fn load(&self, path: &Path, variable: &str) -> FieldResult<Field> {
        debug!("Loading '{}' from {}", variable, path.display());
        let file = netcdf::open(path)?;
        let var = file.variable(variable).ok_or_else(|| {
            FieldError::Configuration(format!(
                "variable '{}' not found in {}",
                variable,
                path.display()
            ))
        })?;
        let time = read_time(&file)?;
        let values = read_values(&var, time.is_some())?;
        let (_, ny, nx) = values.dim();

        let mut field = match time {
            Some(time) => Field::new(values, time)?,
            None => {
                let values = values
                    .into_shape_with_order((ny, nx))
                    .map_err(|e| FieldError::Serialization(e.to_string()))?;
                Field::spatial(values, None)?
            }
        };
        field = read_coordinates(&file, field)?;
        if let Some(area) = read_grid(&file, "cell_area", ny, nx)? {
            field = field.with_cell_area(area.mapv(|a| if a.is_finite() { a } else { 0.0 }))?;
        }

        let unit = string_attribute(&var, "units")?.unwrap_or_default();
        let label = string_attribute(&var, "long_name")?.unwrap_or_else(|| variable.to_string());
        let companion = |suffix: &str| -> FieldResult<Option<Array3<f64>>> {
            match file.variable(&format!("{}_{}", variable, suffix)) {
                Some(v) => Ok(Some(read_values(&v, field.is_temporal())?)),
                None => Ok(None),
            }
        };
        let companions = Companions::new(companion("std")?, companion("count")?);
        Ok(field
            .with_unit(&unit)
            .with_label(&label)
            .with_companions(companions)?)
    }

    fn save(&self, field: &Field, path: &Path, variable: &str) -> FieldResult<()> {
        let mut file = netcdf::create(path)?;
        file.add_attribute("Conventions", "CF-1.6")?;
        let (nt, ny, nx) = field.raw_dim();

        let rectilinear = field.equal_lat() && field.equal_lon();
        let (ydim, xdim) = if rectilinear { ("lat", "lon") } else { ("y", "x") };
        file.add_dimension(ydim, ny)?;
        file.add_dimension(xdim, nx)?;

        let dims: Vec<&str> = match field.time() {
            Some(time) => {
                file.add_dimension(TIME, nt)?;
                let mut var = file.add_variable::<f64>(TIME, &[TIME])?;
                var.put_attribute("units", time.units().to_string())?;
                var.put_attribute("calendar", time.calendar().to_string())?;
                var.put_values(&time.values().to_vec(), ..)?;
                vec![TIME, ydim, xdim]
            }
            None => vec![ydim, xdim],
        };

        if let (Some(lat), Some(lon)) = (field.lat(), field.lon()) {
            let coordinates = if rectilinear {
                [
                    ("lat", field.unique_lat()?.to_vec(), vec!["lat"]),
                    ("lon", field.unique_lon()?.to_vec(), vec!["lon"]),
                ]
            } else {
                [
                    ("lat", lat.iter().copied().collect(), vec![ydim, xdim]),
                    ("lon", lon.iter().copied().collect(), vec![ydim, xdim]),
                ]
            };
            let units = ["degrees_north", "degrees_east"];
            for ((name, values, var_dims), units) in coordinates.into_iter().zip(units) {
                let mut var = file.add_variable::<f64>(name, &var_dims)?;
                var.put_attribute("units", units)?;
                var.put_values(&values, ..)?;
            }
        }
        if let Some(area) = field.cell_area() {
            let mut var = file.add_variable::<f64>("cell_area", &[ydim, xdim])?;
            var.put_attribute("units", "m2")?;
            var.put_values(&area.iter().copied().collect::<Vec<_>>(), ..)?;
        }

        let mut data = vec![(variable.to_string(), field.filled(FILL_VALUE))];
        if let Some(std) = field.companions().std() {
            data.push((format!("{}_std", variable), std.mapv(fill_non_finite)));
        }
        if let Some(count) = field.companions().count() {
            data.push((format!("{}_count", variable), count.mapv(fill_non_finite)));
        }
        for (name, values) in data {
            let mut var = file.add_variable::<f64>(&name, &dims)?;
            var.put_attribute("_FillValue", FILL_VALUE)?;
            var.put_attribute("missing_value", FILL_VALUE)?;
            if !field.unit().is_empty() && name == variable {
                var.put_attribute("units", field.unit())?;
            }
            if !field.label().is_empty() && name == variable {
                var.put_attribute("long_name", field.label())?;
            }
            var.put_values(&values.iter().copied().collect::<Vec<_>>(), ..)?;
        }
        info!("Saved '{}' to {}", variable, path.display());
        Ok(())
    }
}

fn fill_non_finite(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        FILL_VALUE
    }
}
