//! Buffer Drain Operator: drains the persistent buffers of scaled-down workers
//!
//! A BufferPool runs log buffering workers as a StatefulSet, each with its
//! own buffer volume. When the pool scales down, this operator drains the
//! volumes left behind with one-shot jobs, keeping the ordinal reserved
//! until the buffered data has been forwarded.

pub mod controller;
pub mod crd;
pub mod error;
pub mod telemetry;

#[cfg(feature = "rest-api")]
pub mod rest_api;

pub use crate::error::{Error, Result};
