//! Custom Resource Definitions for the buffer drain operator

mod buffer_pool;
pub mod types;

#[cfg(test)]
mod tests;

pub use buffer_pool::{BufferPool, BufferPoolSpec, BufferPoolStatus, SpecValidationError};
pub use types::*;
