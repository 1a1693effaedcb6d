pub mod calendar;
pub mod field;
pub mod io;
pub mod stats;
pub mod time_axis;

pub mod errors;

pub use errors::{FieldError, FieldResult};
pub use field::{Companions, Field, WeightingType};
