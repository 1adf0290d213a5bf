//! Helpers shared by the CPU and GPU backends.

pub mod error_scope;
pub mod math;
pub mod typedefs;
