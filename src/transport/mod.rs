//! Packet model - the opaque request/response unit flowing through the core.
//!
//! A packet carries a control code, an optional JSON buffer, a status with
//! qualifier, attribute flags, a stack level for hierarchical forwarding, and
//! a one-shot completion function. Ownership transfers to the completion
//! callback on `complete`; every packet receives an explicit status before
//! completion and no packet is ever silently dropped.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic packet id, unique per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PacketId(u64);

impl PacketId {
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pkt-{}", self.0)
    }
}

static NEXT_PACKET_ID: AtomicU64 = AtomicU64::new(1);

/// Control codes understood by the base object envelope.
///
/// `Class(n)` is the escape hatch for class-specific codes; the base envelope
/// either hands them to the class, forwards them (traverse attribute), or
/// rejects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCode {
    /// Scheduler-issued monitor invocation.
    MonitorRun,
    GetClassId,
    GetLifecycleState,
    LogLifecycleTrace,
    SetActivateCond,
    SetHibernateCond,
    SetOfflineCond,
    SetFailCond,
    SetDestroyCond,
    GetTraceLevel,
    SetTraceLevel,
    GetTraceFlags,
    SetTraceFlags,
    SetDebugHook,
    ClearDebugHook,
    /// Class-specific control code, opaque to the base envelope.
    Class(u16),
}

/// Packet completion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketStatus {
    /// Not yet completed.
    Pending,
    Ok,
    /// Generic failure.
    Failed,
    /// Object cannot service the request in its current state.
    Busy,
    /// Object is gone (destroy-pending or destroyed).
    Gone,
    Canceled,
}

/// Packet attribute flags.
pub mod attrs {
    /// Forward unknown control codes up the object stack instead of rejecting.
    pub const TRAVERSE: u32 = 1 << 0;
    /// Advisory cancellation mark; observed on the next monitor invocation.
    pub const CANCELED: u32 = 1 << 1;
}

type CompletionFn = Box<dyn FnOnce(Packet) + Send>;

/// Request/response unit. Owned momentarily by whichever queue it sits on;
/// ownership transfers to the completion callback on `complete`.
pub struct Packet {
    id: PacketId,
    control_code: ControlCode,
    buffer: Option<Value>,
    status: PacketStatus,
    status_qualifier: u32,
    attributes: u32,
    stack_level: u8,
    completion: Option<CompletionFn>,
}

impl Packet {
    /// Allocate a control packet.
    pub fn control(control_code: ControlCode) -> Self {
        Self {
            id: PacketId(NEXT_PACKET_ID.fetch_add(1, Ordering::Relaxed)),
            control_code,
            buffer: None,
            status: PacketStatus::Pending,
            status_qualifier: 0,
            attributes: 0,
            stack_level: 0,
            completion: None,
        }
    }

    /// Allocate a monitor invocation packet with the scheduler's completion.
    pub fn monitor_run(completion: impl FnOnce(Packet) + Send + 'static) -> Self {
        Self::control(ControlCode::MonitorRun).with_completion(completion)
    }

    pub fn with_buffer(mut self, buffer: Value) -> Self {
        self.buffer = Some(buffer);
        self
    }

    pub fn with_completion(mut self, completion: impl FnOnce(Packet) + Send + 'static) -> Self {
        self.completion = Some(Box::new(completion));
        self
    }

    pub fn with_attributes(mut self, attributes: u32) -> Self {
        self.attributes |= attributes;
        self
    }

    pub fn with_stack_level(mut self, stack_level: u8) -> Self {
        self.stack_level = stack_level;
        self
    }

    pub fn id(&self) -> PacketId {
        self.id
    }

    pub fn control_code(&self) -> ControlCode {
        self.control_code
    }

    pub fn buffer(&self) -> Option<&Value> {
        self.buffer.as_ref()
    }

    pub fn set_buffer(&mut self, buffer: Value) {
        self.buffer = Some(buffer);
    }

    pub fn take_buffer(&mut self) -> Option<Value> {
        self.buffer.take()
    }

    pub fn status(&self) -> PacketStatus {
        self.status
    }

    pub fn status_qualifier(&self) -> u32 {
        self.status_qualifier
    }

    pub fn set_status(&mut self, status: PacketStatus, qualifier: u32) {
        self.status = status;
        self.status_qualifier = qualifier;
    }

    pub fn has_attribute(&self, attribute: u32) -> bool {
        self.attributes & attribute != 0
    }

    pub fn set_attribute(&mut self, attribute: u32) {
        self.attributes |= attribute;
    }

    pub fn stack_level(&self) -> u8 {
        self.stack_level
    }

    /// Decrement the traversal stack level; saturates at zero.
    pub fn decrement_stack_level(&mut self) -> u8 {
        self.stack_level = self.stack_level.saturating_sub(1);
        self.stack_level
    }

    /// Set the final status and hand the packet to its completion callback.
    ///
    /// The status-set happens-before the callback runs; a packet without a
    /// completion simply ends here.
    pub fn complete(mut self, status: PacketStatus) {
        self.status = status;
        if let Some(completion) = self.completion.take() {
            completion(self);
        }
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("id", &self.id)
            .field("control_code", &self.control_code)
            .field("status", &self.status)
            .field("status_qualifier", &self.status_qualifier)
            .field("attributes", &self.attributes)
            .field("stack_level", &self.stack_level)
            .field("has_completion", &self.completion.is_some())
            .finish()
    }
}
