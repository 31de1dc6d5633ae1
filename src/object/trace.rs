//! Per-object trace controls layered over the process-wide subscriber.
//!
//! Each object carries a trace level and a flag word settable at runtime via
//! control packets. Object traces route through `tracing` at the matching
//! severity; the per-object level gates emission before the subscriber's
//! filter ever sees the event.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Management attributes carried by each object.
pub mod mgmt_attr {
    /// Object is still in its startup window; startup-gated traces emit.
    pub const STARTUP: u32 = 1 << 0;
    /// Destroy has been requested for the object.
    pub const DESTROY_PENDING: u32 = 1 << 1;
}

/// Per-object trace severity, ordered most to least severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TraceLevel {
    Critical = 1,
    Error = 2,
    Warning = 3,
    Info = 4,
    Debug = 5,
}

impl TraceLevel {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(TraceLevel::Critical),
            2 => Some(TraceLevel::Error),
            3 => Some(TraceLevel::Warning),
            4 => Some(TraceLevel::Info),
            5 => Some(TraceLevel::Debug),
            _ => None,
        }
    }

    pub fn raw(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for TraceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TraceLevel::Critical => "critical",
            TraceLevel::Error => "error",
            TraceLevel::Warning => "warning",
            TraceLevel::Info => "info",
            TraceLevel::Debug => "debug",
        };
        f.write_str(name)
    }
}

/// Emit one object trace if `level` clears the object's configured level.
pub(crate) fn emit(
    configured: TraceLevel,
    level: TraceLevel,
    object: crate::types::ObjectId,
    message: &str,
) {
    if level > configured {
        return;
    }
    match level {
        TraceLevel::Critical | TraceLevel::Error => {
            tracing::error!(object_id = %object, "{message}");
        }
        TraceLevel::Warning => tracing::warn!(object_id = %object, "{message}"),
        TraceLevel::Info => tracing::info!(object_id = %object, "{message}"),
        TraceLevel::Debug => tracing::debug!(object_id = %object, "{message}"),
    }
}
