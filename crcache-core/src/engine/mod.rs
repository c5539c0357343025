//! Engine module - Pool accounting and orchestration
//!
//! This module contains the resource pool itself and the registry that
//! builds one pool per configured name.

pub mod pool;
pub mod registry;

pub use pool::{PoolStatus, ResourcePool};
pub use registry::PoolRegistry;
