//! Types shared across dbflow crates.

pub mod errors;

pub use errors::{DbflowError, DbflowResult, ErrorCode, ResultExt};
