//! Shared status, result and identifier types for etcdfs.

#[allow(non_snake_case)]
pub mod status_code;

pub mod status;
pub mod result;

#[macro_use]
pub mod strong_type;

pub mod ids;

pub use ids::*;
pub use result::{make_error_msg, Result};
pub use status::Status;
pub use status_code::*;
