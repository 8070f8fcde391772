//! imgmake: turn a generic, read-only OS image into a device-specific,
//! ready-to-write image without random-access rewrites of the original
//! bytes. Configuration writes are recorded in an in-memory ledger, merged
//! into the sequential byte stream on the way out, and optionally filtered
//! down to a sparse stream of only the blocks worth transmitting.

pub mod cli;
pub mod configure;
pub mod dest;
pub mod error;
pub mod ledger;
pub mod pipeline;
pub mod source;
pub mod stream;

pub use error::{ImageError, Result};
