//! # Spindle Core - Object-Execution Runtime
//!
//! Rust implementation of a storage-controller object-execution core
//! providing:
//! - A slot-table scheduler with countdown timers and coalescing run requests
//! - A base object envelope owning one memory chunk and two packet queues
//! - A lifecycle state machine driven by per-state condition rotaries
//! - Control-packet dispatch with parent-edge forwarding across the topology
//! - Destroy with a bounded de-registration retry against in-flight monitors
//!
//! ## Architecture
//!
//! The scheduler owns the slot table; objects hold their slot index and the
//! scheduler holds only weak handles back, so the topology table is the sole
//! strong owner of every object:
//! ```text
//!                  ┌───────────────────────────────────┐
//!   control pkts → │             Topology              │
//!                  │  ┌──────────┐   ┌──────────────┐  │
//!                  │  │ classes  │   │ object table │  │
//!                  │  └──────────┘   └──────┬───────┘  │
//!                  └─────────────────────── │ ─────────┘
//!                                    Arc<BaseObject>
//!                                           │ monitor pkts
//!                  ┌─────────────────────── │ ─────────┐
//!                  │  Scheduler      Weak ──┘          │
//!                  │  ┌────────────┐  ┌─────────────┐  │
//!                  │  │ slot table │  │ tick loop   │  │
//!                  │  └────────────┘  └─────────────┘  │
//!                  └───────────────────────────────────┘
//! ```
//!
//! A monitor invocation is the only place lifecycle transitions happen:
//! control packets arm conditions and request a run; the next invocation
//! walks the state's rotary and applies the first firing condition's
//! transition.

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod lifecycle;
pub mod memory;
pub mod notification;
pub mod object;
pub mod runtime;
pub mod scheduler;
pub mod topology;
pub mod transport;
pub mod types;

// Internal utilities
pub mod observability;

pub use runtime::Runtime;
pub use types::{CoreConfig, Error, Result};
