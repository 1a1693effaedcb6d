//! Masked geophysical fields
//!
//! A [`Field`] holds a 3-D array of values `(time, y, x)` together with a validity mask of
//! the same shape, an optional [`TimeAxis`], optional coordinates and cell areas.
//! Fields without a time axis are purely spatial and have a logical shape `(ny, nx)`;
//! 1-D series are stored as `(n, 1, 1)`.
//!
//! Missing data is tracked by the mask only. A masked payload is never read by any
//! operation, and non-finite payloads are masked on construction.
//!
//! The operations on a field are split over several engines, each in its own module:
//!
//! - arithmetic and masking ([`arithmetic`], [`masking`])
//! - the time axis engine ([`temporal`], [`reductions`])
//! - the spatial aggregation engine ([`spatial`])
//! - the cross-field statistics engine ([`statistics`])
//!
//! Every operation that changes the shape or content of a field returns a new `Field`.
//! Methods suffixed with `_inplace` and the masking helpers mutate the receiver.
//!
//! # Examples
//!
//! ```rust
//! use cmbench_core::field::Field;
//! use cmbench_core::time_axis::TimeAxis;
//! use cmbench_core::calendar::TimeUnits;
//! use ndarray::{array, Array1};
//!
//! let time = TimeAxis::new(Array1::range(0.0, 3.0, 1.0), TimeUnits::days_since(2000, 1, 1).unwrap());
//! let field = Field::series(array![1.0, f64::NAN, 3.0], time).unwrap();
//!
//! assert_eq!(field.shape(), vec![3]);
//! assert_eq!(field.value(0, 0, 0), Some(1.0));
//! assert_eq!(field.value(1, 0, 0), None);
//! ```

pub mod arithmetic;
pub mod masking;
pub mod reductions;
pub mod spatial;
pub mod statistics;
pub mod temporal;

use crate::errors::{FieldError, FieldResult};
use crate::time_axis::TimeAxis;
use chrono::NaiveDateTime;
use ndarray::{s, Array1, Array2, Array3, Axis, Slice, Zip};
use serde::{Deserialize, Serialize};

pub use masking::BoundingBox;
pub use statistics::{
    ConditionalStatistics, CorrelationMethod, CorrelationOptions, DiffOptions, DiffResult,
    SingleCorrelation, TrendResult,
};
pub use temporal::TemporalMaskKind;

/// Policy used to normalise area weights in spatial aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum WeightingType {
    /// Normalise by the area of cells valid at the given timestep.
    #[default]
    Valid,
    /// Normalise by the area of all cells.
    All,
}

/// Secondary statistics travelling with a field.
///
/// Aggregated observations carry the standard deviation and the number of samples that
/// went into each value. Both arrays have the shape of the owning field's values and
/// follow it through every reordering, subsetting and cropping operation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Companions {
    std: Option<Array3<f64>>,
    count: Option<Array3<f64>>,
}

impl Companions {
    pub fn new(std: Option<Array3<f64>>, count: Option<Array3<f64>>) -> Self {
        Self { std, count }
    }

    pub fn std(&self) -> Option<&Array3<f64>> {
        self.std.as_ref()
    }

    pub fn count(&self) -> Option<&Array3<f64>> {
        self.count.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.std.is_none() && self.count.is_none()
    }

    fn map(&self, f: impl Fn(&Array3<f64>) -> Array3<f64>) -> Self {
        Self {
            std: self.std.as_ref().map(&f),
            count: self.count.as_ref().map(&f),
        }
    }

    fn check_shape(&self, shape: &[usize]) -> FieldResult<()> {
        for array in self.std.iter().chain(self.count.iter()) {
            if array.shape() != shape {
                return Err(FieldError::shape_mismatch(
                    "companions",
                    shape,
                    array.shape(),
                ));
            }
        }
        Ok(())
    }

    pub(crate) fn select_time(&self, indices: &[usize]) -> Self {
        self.map(|a| a.select(Axis(0), indices))
    }
}

/// A masked 3-D geophysical field.
#[derive(Debug, Clone)]
pub struct Field {
    values: Array3<f64>,
    valid: Array3<bool>,
    time: Option<TimeAxis>,
    time_cycle: Option<usize>,
    lat: Option<Array2<f64>>,
    lon: Option<Array2<f64>>,
    cell_area: Option<Array2<f64>>,
    unit: String,
    label: String,
    weighting_type: WeightingType,
    companions: Companions,
}

fn finite_mask(values: &Array3<f64>) -> Array3<bool> {
    values.mapv(f64::is_finite)
}

impl Field {
    /// Create a temporal field; non-finite values are masked.
    pub fn new(values: Array3<f64>, time: TimeAxis) -> FieldResult<Self> {
        let valid = finite_mask(&values);
        Self::with_mask(values, valid, time)
    }

    /// Create a temporal field with an explicit validity mask (`true` = valid).
    ///
    /// Non-finite values are masked in addition to `valid`.
    pub fn with_mask(values: Array3<f64>, valid: Array3<bool>, time: TimeAxis) -> FieldResult<Self> {
        if values.len_of(Axis(0)) != time.len() {
            return Err(FieldError::shape_mismatch(
                "time axis",
                values.shape(),
                &[time.len()],
            ));
        }
        Self::from_parts(values, valid, Some(time))
    }

    /// Create a purely spatial field with logical shape `(ny, nx)`.
    pub fn spatial(values: Array2<f64>, valid: Option<Array2<bool>>) -> FieldResult<Self> {
        let valid = valid.unwrap_or_else(|| Array2::from_elem(values.raw_dim(), true));
        Self::from_parts(
            values.insert_axis(Axis(0)),
            valid.insert_axis(Axis(0)),
            None,
        )
    }

    /// Create a 1-D series, stored as `(n, 1, 1)`.
    pub fn series(values: Array1<f64>, time: TimeAxis) -> FieldResult<Self> {
        let n = values.len();
        let values = values
            .into_shape_with_order((n, 1, 1))
            .map_err(|e| FieldError::Compute(e.to_string()))?;
        Self::new(values, time)
    }

    fn from_parts(
        values: Array3<f64>,
        valid: Array3<bool>,
        time: Option<TimeAxis>,
    ) -> FieldResult<Self> {
        if values.shape() != valid.shape() {
            return Err(FieldError::shape_mismatch(
                "mask",
                values.shape(),
                valid.shape(),
            ));
        }
        let valid = valid & finite_mask(&values);
        Ok(Self {
            values,
            valid,
            time,
            time_cycle: None,
            lat: None,
            lon: None,
            cell_area: None,
            unit: String::new(),
            label: String::new(),
            weighting_type: WeightingType::default(),
            companions: Companions::default(),
        })
    }

    /// New field sharing this field's grid and metadata.
    ///
    /// The time cycle and companions are not carried over.
    pub(crate) fn derive(
        &self,
        values: Array3<f64>,
        valid: Array3<bool>,
        time: Option<TimeAxis>,
    ) -> Field {
        let valid = valid & finite_mask(&values);
        Field {
            values,
            valid,
            time,
            time_cycle: None,
            lat: self.lat.clone(),
            lon: self.lon.clone(),
            cell_area: self.cell_area.clone(),
            unit: self.unit.clone(),
            label: self.label.clone(),
            weighting_type: self.weighting_type,
            companions: Companions::default(),
        }
    }

    /// New spatial field on this field's grid.
    pub(crate) fn derive_spatial(&self, values: Array2<f64>, valid: Array2<bool>) -> Field {
        self.derive(
            values.insert_axis(Axis(0)),
            valid.insert_axis(Axis(0)),
            None,
        )
    }

    /// Attach cell areas. Areas must be finite, non-negative and match `(ny, nx)`.
    pub fn with_cell_area(mut self, cell_area: Array2<f64>) -> FieldResult<Self> {
        self.check_grid_shape("cell_area", &cell_area)?;
        if cell_area.iter().any(|a| !a.is_finite() || *a < 0.0) {
            return Err(FieldError::Configuration(
                "cell areas must be finite and non-negative".to_string(),
            ));
        }
        self.cell_area = Some(cell_area);
        Ok(self)
    }

    /// Attach 2-D latitude and longitude arrays.
    pub fn with_coordinates(mut self, lat: Array2<f64>, lon: Array2<f64>) -> FieldResult<Self> {
        self.check_grid_shape("lat", &lat)?;
        self.check_grid_shape("lon", &lon)?;
        self.lat = Some(lat);
        self.lon = Some(lon);
        Ok(self)
    }

    /// Attach coordinate vectors, broadcast to 2-D (`lat` along y, `lon` along x).
    pub fn with_coordinate_vectors(self, lat: Array1<f64>, lon: Array1<f64>) -> FieldResult<Self> {
        let (ny, nx) = (lat.len(), lon.len());
        let lat2 = Array2::from_shape_fn((ny, nx), |(i, _)| lat[i]);
        let lon2 = Array2::from_shape_fn((ny, nx), |(_, j)| lon[j]);
        self.with_coordinates(lat2, lon2)
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = unit.to_string();
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    pub fn with_weighting(mut self, weighting_type: WeightingType) -> Self {
        self.weighting_type = weighting_type;
        self
    }

    pub fn with_time_cycle(mut self, time_cycle: usize) -> Self {
        self.time_cycle = Some(time_cycle);
        self
    }

    /// Attach companion statistics with exactly the shape of the values.
    pub fn with_companions(mut self, companions: Companions) -> FieldResult<Self> {
        self.set_companions(companions)?;
        Ok(self)
    }

    fn check_grid_shape(&self, name: &str, array: &Array2<f64>) -> FieldResult<()> {
        let (ny, nx) = (self.ny(), self.nx());
        if array.dim() != (ny, nx) {
            return Err(FieldError::shape_mismatch(name, &[ny, nx], array.shape()));
        }
        Ok(())
    }

    pub fn values(&self) -> &Array3<f64> {
        &self.values
    }

    /// Validity mask, `true` where the value is valid.
    pub fn valid(&self) -> &Array3<bool> {
        &self.valid
    }

    /// Values with every masked entry replaced by `fill`.
    pub fn filled(&self, fill: f64) -> Array3<f64> {
        let mut out = self.values.clone();
        Zip::from(&mut out).and(&self.valid).for_each(|v, &ok| {
            if !ok {
                *v = fill;
            }
        });
        out
    }

    pub fn time(&self) -> Option<&TimeAxis> {
        self.time.as_ref()
    }

    pub(crate) fn require_time(&self) -> FieldResult<&TimeAxis> {
        self.time
            .as_ref()
            .ok_or_else(|| FieldError::Configuration("field has no time axis".to_string()))
    }

    pub fn time_cycle(&self) -> Option<usize> {
        self.time_cycle
    }

    pub fn lat(&self) -> Option<&Array2<f64>> {
        self.lat.as_ref()
    }

    pub fn lon(&self) -> Option<&Array2<f64>> {
        self.lon.as_ref()
    }

    pub fn cell_area(&self) -> Option<&Array2<f64>> {
        self.cell_area.as_ref()
    }

    /// Cell areas, or uniform unit areas when none are attached.
    pub fn area(&self) -> Array2<f64> {
        match &self.cell_area {
            Some(area) => area.clone(),
            None => Array2::ones((self.ny(), self.nx())),
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn set_unit(&mut self, unit: &str) {
        self.unit = unit.to_string();
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_label(&mut self, label: &str) {
        self.label = label.to_string();
    }

    pub fn weighting_type(&self) -> WeightingType {
        self.weighting_type
    }

    pub fn set_weighting_type(&mut self, weighting_type: WeightingType) {
        self.weighting_type = weighting_type;
    }

    pub fn companions(&self) -> &Companions {
        &self.companions
    }

    pub fn set_companions(&mut self, companions: Companions) -> FieldResult<()> {
        companions.check_shape(self.values.shape())?;
        self.companions = companions;
        Ok(())
    }

    /// Number of timesteps (1 for spatial fields).
    pub fn nt(&self) -> usize {
        self.values.len_of(Axis(0))
    }

    pub fn ny(&self) -> usize {
        self.values.len_of(Axis(1))
    }

    pub fn nx(&self) -> usize {
        self.values.len_of(Axis(2))
    }

    pub fn is_temporal(&self) -> bool {
        self.time.is_some()
    }

    /// Shape of the stored array, `(nt, ny, nx)`.
    pub fn raw_dim(&self) -> (usize, usize, usize) {
        self.values.dim()
    }

    /// Logical shape: `[ny, nx]` for spatial fields, `[n]` for series stored as
    /// `(n, 1, 1)`, otherwise `[nt, ny, nx]`.
    pub fn shape(&self) -> Vec<usize> {
        let (nt, ny, nx) = self.raw_dim();
        if !self.is_temporal() {
            vec![ny, nx]
        } else if ny == 1 && nx == 1 {
            vec![nt]
        } else {
            vec![nt, ny, nx]
        }
    }

    /// Value at `(t, i, j)`, or `None` when masked.
    pub fn value(&self, t: usize, i: usize, j: usize) -> Option<f64> {
        match self.valid.get([t, i, j]) {
            Some(true) => self.values.get([t, i, j]).copied(),
            _ => None,
        }
    }

    /// Valid samples of cell `(i, j)` as `(timestep, value)` pairs.
    pub(crate) fn cell_samples(&self, i: usize, j: usize) -> Vec<(usize, f64)> {
        self.values
            .slice(s![.., i, j])
            .iter()
            .zip(self.valid.slice(s![.., i, j]))
            .enumerate()
            .filter_map(|(t, (&v, &ok))| ok.then_some((t, v)))
            .collect()
    }

    /// Values of the first timestep as a 2-D array with masked entries as NaN.
    pub fn spatial_values(&self) -> Array2<f64> {
        self.filled(f64::NAN).index_axis_move(Axis(0), 0)
    }

    /// Number of valid entries.
    pub fn count_valid(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    pub fn dates(&self) -> FieldResult<Vec<NaiveDateTime>> {
        self.require_time()?.dates()
    }

    pub(crate) fn values_mut(&mut self) -> &mut Array3<f64> {
        &mut self.values
    }

    pub(crate) fn valid_mut(&mut self) -> &mut Array3<bool> {
        &mut self.valid
    }

    pub(crate) fn time_mut(&mut self) -> Option<&mut TimeAxis> {
        self.time.as_mut()
    }

    pub(crate) fn set_time_cycle_value(&mut self, time_cycle: Option<usize>) {
        self.time_cycle = time_cycle;
    }

    /// Reorder or subset the timesteps, co-permuting mask and companions.
    pub(crate) fn select_time(&self, indices: &[usize]) -> Field {
        let mut out = self.derive(
            self.values.select(Axis(0), indices),
            self.valid.select(Axis(0), indices),
            self.time.as_ref().map(|t| t.select(indices)),
        );
        out.companions = self.companions.select_time(indices);
        out
    }

    /// Crop to the half-open index ranges `rows` × `cols`.
    pub fn crop(
        &self,
        rows: std::ops::Range<usize>,
        cols: std::ops::Range<usize>,
    ) -> FieldResult<Field> {
        if rows.start > rows.end || rows.end > self.ny() || cols.start > cols.end || cols.end > self.nx()
        {
            return Err(FieldError::Configuration(format!(
                "crop {}..{} x {}..{} outside grid {} x {}",
                rows.start,
                rows.end,
                cols.start,
                cols.end,
                self.ny(),
                self.nx()
            )));
        }
        Ok(self.slice_grid(Slice::from(rows), Slice::from(cols)))
    }

    /// Keep every `step`-th row and column, starting with the first.
    ///
    /// A `(ny, nx)` grid becomes `(ceil(ny / step), ceil(nx / step))`.
    pub fn sub_sample(&self, step: usize) -> FieldResult<Field> {
        if step == 0 {
            return Err(FieldError::Configuration(
                "sub-sampling step must be positive".to_string(),
            ));
        }
        let every = Slice::new(0, None, step as isize);
        Ok(self.slice_grid(every, every))
    }

    fn slice_grid(&self, rows: Slice, cols: Slice) -> Field {
        let slice3 = |a: &Array3<f64>| a.slice(s![.., rows, cols]).to_owned();
        let slice2 = |a: &Array2<f64>| a.slice(s![rows, cols]).to_owned();
        Field {
            values: slice3(&self.values),
            valid: self.valid.slice(s![.., rows, cols]).to_owned(),
            time: self.time.clone(),
            time_cycle: self.time_cycle,
            lat: self.lat.as_ref().map(slice2),
            lon: self.lon.as_ref().map(slice2),
            cell_area: self.cell_area.as_ref().map(slice2),
            unit: self.unit.clone(),
            label: self.label.clone(),
            weighting_type: self.weighting_type,
            companions: self.companions.map(slice3),
        }
    }

    /// True if every row of the longitudes is identical, i.e. the grid is rectilinear in x.
    ///
    /// Fields without coordinates are never rectilinear.
    pub fn equal_lon(&self) -> bool {
        self.lon
            .as_ref()
            .is_some_and(|lon| lon.rows().into_iter().all(|row| row == lon.row(0)))
    }

    /// True if every column of the latitudes is identical.
    pub fn equal_lat(&self) -> bool {
        self.lat
            .as_ref()
            .is_some_and(|lat| lat.columns().into_iter().all(|col| col == lat.column(0)))
    }

    /// Longitude vector of a grid that is rectilinear in x.
    pub fn unique_lon(&self) -> FieldResult<Array1<f64>> {
        match &self.lon {
            Some(lon) if self.equal_lon() => Ok(lon.row(0).to_owned()),
            Some(_) => Err(FieldError::Configuration(
                "longitudes differ between rows".to_string(),
            )),
            None => Err(FieldError::Configuration("field has no longitudes".to_string())),
        }
    }

    /// Latitude vector of a grid that is rectilinear in y.
    pub fn unique_lat(&self) -> FieldResult<Array1<f64>> {
        match &self.lat {
            Some(lat) if self.equal_lat() => Ok(lat.column(0).to_owned()),
            Some(_) => Err(FieldError::Configuration(
                "latitudes differ between columns".to_string(),
            )),
            None => Err(FieldError::Configuration("field has no latitudes".to_string())),
        }
    }
}
