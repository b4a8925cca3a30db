//! ms-core: shared foundation for the multiple-shooting workspace.
//!
//! Contains:
//! - numeric (Real + tolerances + weighted norms)
//! - ids (compact ids for symbolic variables)
//! - error (shared error types)
//! - timing (opt-in wall-clock timers reported through `tracing`)

pub mod error;
pub mod ids;
pub mod numeric;
pub mod timing;

pub use error::{MsError, MsResult};
pub use ids::*;
pub use numeric::*;
