//! Element-wise arithmetic between fields and with constants.
//!
//! A result value is valid only where both operands are valid (the mask is the OR of
//! invalidity). Results that are not finite are masked.

use super::Field;
use crate::errors::{FieldError, FieldResult};
use ndarray::{Array3, Zip};

impl Field {
    fn check_same_shape(&self, other: &Field, operation: &str) -> FieldResult<()> {
        if self.values().shape() != other.values().shape()
            || self.is_temporal() != other.is_temporal()
        {
            return Err(FieldError::shape_mismatch(
                operation,
                &self.shape(),
                &other.shape(),
            ));
        }
        Ok(())
    }

    fn binary_op(
        &self,
        other: &Field,
        operation: &str,
        op: impl Fn(f64, f64) -> f64,
    ) -> FieldResult<Field> {
        self.check_same_shape(other, operation)?;
        let valid = self.valid() & other.valid();
        let mut values = Array3::from_elem(self.values().raw_dim(), f64::NAN);
        Zip::from(&mut values)
            .and(self.values())
            .and(other.values())
            .and(&valid)
            .for_each(|out, &a, &b, &ok| {
                if ok {
                    *out = op(a, b);
                }
            });
        Ok(self.derive(values, valid, self.time().cloned()))
    }

    pub fn add(&self, other: &Field) -> FieldResult<Field> {
        self.binary_op(other, "add", |a, b| a + b)
    }

    pub fn sub(&self, other: &Field) -> FieldResult<Field> {
        self.binary_op(other, "sub", |a, b| a - b)
    }

    pub fn mul(&self, other: &Field) -> FieldResult<Field> {
        self.binary_op(other, "mul", |a, b| a * b)
    }

    /// Element-wise division.
    ///
    /// A zero divisor at a cell valid in both operands is an error.
    pub fn div(&self, other: &Field) -> FieldResult<Field> {
        self.check_same_shape(other, "div")?;
        let zero_divisor = Zip::from(self.valid())
            .and(other.valid())
            .and(other.values())
            .fold(false, |acc, &a, &b, &d| acc || (a && b && d == 0.0));
        if zero_divisor {
            return Err(FieldError::Compute("division by zero".to_string()));
        }
        self.binary_op(other, "div", |a, b| a / b)
    }

    fn constant_op(&self, op: impl Fn(f64) -> f64) -> Field {
        let values = self.values().mapv(op);
        let mut out = self.derive(values, self.valid().clone(), self.time().cloned());
        out.set_time_cycle_value(self.time_cycle());
        out
    }

    pub fn addc(&self, c: f64) -> Field {
        self.constant_op(|v| v + c)
    }

    pub fn subc(&self, c: f64) -> Field {
        self.constant_op(|v| v - c)
    }

    pub fn mulc(&self, c: f64) -> Field {
        self.constant_op(|v| v * c)
    }

    pub fn divc(&self, c: f64) -> FieldResult<Field> {
        if c == 0.0 {
            return Err(FieldError::Compute("division by zero".to_string()));
        }
        Ok(self.constant_op(|v| v / c))
    }

    /// 1 where the value is valid and above `threshold`, 0 everywhere else.
    ///
    /// The result is valid everywhere; apply a mask afterwards to restrict it.
    pub fn threshold_indicator(&self, threshold: f64) -> Field {
        let values = Zip::from(self.values())
            .and(self.valid())
            .map_collect(|&v, &ok| if ok && v > threshold { 1.0 } else { 0.0 });
        let valid = Array3::from_elem(values.raw_dim(), true);
        let mut out = self.derive(values, valid, self.time().cloned());
        out.set_time_cycle_value(self.time_cycle());
        out
    }

    fn constant_op_inplace(&mut self, op: impl Fn(f64) -> f64) {
        self.values_mut().mapv_inplace(op);
        let finite = self.values().mapv(f64::is_finite);
        Zip::from(self.valid_mut())
            .and(&finite)
            .for_each(|ok, &f| *ok &= f);
    }

    pub fn addc_inplace(&mut self, c: f64) {
        self.constant_op_inplace(|v| v + c)
    }

    pub fn subc_inplace(&mut self, c: f64) {
        self.constant_op_inplace(|v| v - c)
    }

    pub fn mulc_inplace(&mut self, c: f64) {
        self.constant_op_inplace(|v| v * c)
    }

    pub fn divc_inplace(&mut self, c: f64) -> FieldResult<()> {
        if c == 0.0 {
            return Err(FieldError::Compute("division by zero".to_string()));
        }
        self.constant_op_inplace(|v| v / c);
        Ok(())
    }
}
