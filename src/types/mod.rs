//! Core types for the object-execution runtime.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (ObjectId, ClassId)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for scheduler, destroy, and memory

mod config;
mod errors;
mod ids;

pub use config::{CoreConfig, DestroyConfig, MemoryConfig, SchedulerConfig};
pub use errors::{Error, Result};
pub use ids::{ClassId, ObjectId};
