//! Mask manipulation and valid-region queries.
//!
//! Masks are only ever combined with AND: once an entry is invalid no operation in this
//! module makes it valid again.

use super::Field;
use crate::errors::{FieldError, FieldResult};
use log::debug;
use ndarray::{Array2, Array3, Axis, Zip};
use serde::{Deserialize, Serialize};

/// Half-open index bounds `[row_start, row_end) × [col_start, col_end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub row_start: usize,
    pub row_end: usize,
    pub col_start: usize,
    pub col_end: usize,
}

impl Field {
    /// AND a 2-D validity mask into every timestep.
    pub fn apply_mask(&mut self, mask: &Array2<bool>) -> FieldResult<()> {
        let (ny, nx) = (self.ny(), self.nx());
        if mask.dim() != (ny, nx) {
            return Err(FieldError::shape_mismatch(
                "apply_mask",
                &[ny, nx],
                mask.shape(),
            ));
        }
        for mut step in self.valid_mut().axis_iter_mut(Axis(0)) {
            Zip::from(&mut step).and(mask).for_each(|ok, &m| *ok &= m);
        }
        Ok(())
    }

    /// AND a full-shape validity mask into the field.
    pub fn apply_mask_3d(&mut self, mask: &Array3<bool>) -> FieldResult<()> {
        if mask.shape() != self.values().shape() {
            return Err(FieldError::shape_mismatch(
                "apply_mask_3d",
                self.values().shape(),
                mask.shape(),
            ));
        }
        Zip::from(self.valid_mut())
            .and(mask)
            .for_each(|ok, &m| *ok &= m);
        Ok(())
    }

    /// Mask every value outside the inclusive range `[lo, hi]`.
    pub fn set_valid_range(&mut self, lo: f64, hi: f64) {
        let in_range = self.values().mapv(|v| v >= lo && v <= hi);
        Zip::from(self.valid_mut())
            .and(&in_range)
            .for_each(|ok, &m| *ok &= m);
    }

    /// Invalidate every timestep whose entry in `keep` is `false`.
    pub fn apply_temporal_mask(&mut self, keep: &[bool]) -> FieldResult<()> {
        if keep.len() != self.nt() {
            return Err(FieldError::shape_mismatch(
                "apply_temporal_mask",
                &[self.nt()],
                &[keep.len()],
            ));
        }
        for (mut step, &k) in self.valid_mut().axis_iter_mut(Axis(0)).zip(keep) {
            if !k {
                step.fill(false);
            }
        }
        Ok(())
    }

    /// Number of valid timesteps per cell.
    pub fn count_valid_time(&self) -> Array2<usize> {
        self.valid()
            .map(|&ok| ok as usize)
            .sum_axis(Axis(0))
    }

    /// Cells valid in at least `frac` of all timesteps (inclusive).
    pub fn get_valid_mask(&self, frac: f64) -> Array2<bool> {
        let nt = self.nt() as f64;
        self.count_valid_time()
            .mapv(|count| nt > 0.0 && count as f64 / nt >= frac)
    }

    /// Smallest rectangle containing every cell valid at least once.
    ///
    /// Returns `None` when the field has no valid entry.
    pub fn get_bounding_box(&self) -> Option<BoundingBox> {
        let any_valid = self.valid().map_axis(Axis(0), |cell| cell.iter().any(|&v| v));
        let rows: Vec<usize> = any_valid
            .axis_iter(Axis(0))
            .enumerate()
            .filter(|(_, row)| row.iter().any(|&v| v))
            .map(|(i, _)| i)
            .collect();
        let cols: Vec<usize> = any_valid
            .axis_iter(Axis(1))
            .enumerate()
            .filter(|(_, col)| col.iter().any(|&v| v))
            .map(|(j, _)| j)
            .collect();

        match (rows.first(), rows.last(), cols.first(), cols.last()) {
            (Some(&r0), Some(&r1), Some(&c0), Some(&c1)) => Some(BoundingBox {
                row_start: r0,
                row_end: r1 + 1,
                col_start: c0,
                col_end: c1 + 1,
            }),
            _ => None,
        }
    }

    /// Crop the field to its [bounding box](Field::get_bounding_box).
    pub fn cut_bounding_box(&self) -> Option<Field> {
        let bbox = self.get_bounding_box()?;
        debug!(
            "Cropping field '{}' to rows {}..{} cols {}..{}",
            self.label(),
            bbox.row_start,
            bbox.row_end,
            bbox.col_start,
            bbox.col_end
        );
        self.crop(bbox.row_start..bbox.row_end, bbox.col_start..bbox.col_end)
            .ok()
    }
}
