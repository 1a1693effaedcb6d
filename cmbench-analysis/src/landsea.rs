//! Land-sea masks
//!
//! Observations and model output are compared over a selected area only: the whole
//! globe, land or ocean. The mask is derived from a land-fraction field on the target
//! grid; a cell counts as land when its land fraction is positive.
//!
//! Land analyses usually exclude Antarctica (everything south of 60°S), where
//! observational coverage is poor.

use crate::errors::{AnalysisError, AnalysisResult};
use cmbench_core::Field;
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Southern latitude limit used when excluding Antarctica.
pub const ANTARCTICA_LATITUDE: f64 = -60.0;

/// Area over which fields are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Area {
    #[default]
    Global,
    Land,
    Ocean,
}

/// An [`Area`] plus the optional Antarctica exclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaSelection {
    pub area: Area,
    pub mask_antarctica: bool,
}

impl AreaSelection {
    /// Selection with the usual Antarctica handling: excluded for land only.
    pub fn new(area: Area) -> Self {
        Self {
            area,
            mask_antarctica: area == Area::Land,
        }
    }

    pub fn with_antarctica_mask(mut self, mask_antarctica: bool) -> Self {
        self.mask_antarctica = mask_antarctica;
        self
    }
}

/// Build a 2-D validity mask (`true` = included) from a land-fraction field.
///
/// Only the first timestep of `land_fraction` is used. Masked land-fraction cells are
/// excluded unless the selection is [`Area::Global`]. Excluding Antarctica requires
/// latitudes on the field.
pub fn land_sea_mask(land_fraction: &Field, selection: AreaSelection) -> AnalysisResult<Array2<bool>> {
    let fraction = land_fraction.spatial_values();
    let mut mask = fraction.mapv(|f| match selection.area {
        Area::Global => true,
        Area::Land => f > 0.0,
        Area::Ocean => f == 0.0,
    });

    if selection.mask_antarctica {
        let lat = land_fraction.lat().ok_or_else(|| {
            AnalysisError::Options("excluding Antarctica requires latitudes".to_string())
        })?;
        Zip::from(&mut mask)
            .and(lat)
            .for_each(|m, &lat| *m &= lat >= ANTARCTICA_LATITUDE);
    }
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn land_fraction() -> Field {
        Field::spatial(
            array![[0.0, 0.5, 1.0], [0.0, f64::NAN, 0.2], [1.0, 0.0, 0.7]],
            None,
        )
        .unwrap()
        .with_coordinate_vectors(array![-80.0, 0.0, 60.0], array![0.0, 120.0, 240.0])
        .unwrap()
    }

    #[test]
    fn land_excludes_antarctica_by_default() {
        let mask = land_sea_mask(&land_fraction(), AreaSelection::new(Area::Land)).unwrap();
        assert_eq!(
            mask,
            array![[false, false, false], [false, false, true], [true, false, true]]
        );
    }

    #[test]
    fn land_with_antarctica() {
        let selection = AreaSelection::new(Area::Land).with_antarctica_mask(false);
        let mask = land_sea_mask(&land_fraction(), selection).unwrap();
        assert_eq!(mask.row(0).to_vec(), vec![false, true, true]);
    }

    #[test]
    fn ocean_and_global() {
        let ocean = land_sea_mask(&land_fraction(), AreaSelection::new(Area::Ocean)).unwrap();
        assert_eq!(
            ocean,
            array![[true, false, false], [true, false, false], [false, true, false]]
        );
        let global = land_sea_mask(&land_fraction(), AreaSelection::new(Area::Global)).unwrap();
        assert!(global.iter().all(|&m| m));
    }

    #[test]
    fn antarctica_requires_latitudes() {
        let field = Field::spatial(array![[1.0]], None).unwrap();
        assert!(land_sea_mask(&field, AreaSelection::new(Area::Land)).is_err());
    }
}
