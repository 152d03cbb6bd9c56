//! REST API module
//!
//! Serves health, Prometheus metrics and a read-only view of BufferPools.

mod dto;
mod handlers;
mod server;

pub use dto::{HealthResponse, PoolListResponse, PoolSummary};
pub use server::{router, run_server};
