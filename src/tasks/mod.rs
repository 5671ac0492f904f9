//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Expiry sweep: purges expired entries from every registered store

mod cleanup;

pub use cleanup::spawn_cleanup_task;
