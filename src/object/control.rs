//! Control-packet entry point for the base object envelope.
//!
//! Base control codes are serviced here; class codes are offered to the class
//! first. An unrecognized code with the traverse attribute and remaining
//! stack levels is handed back for forwarding up the object stack, otherwise
//! it completes with a failure.

use super::{BaseObject, ClassControlVerdict, TraceLevel};
use crate::lifecycle::ConditionId;
use crate::transport::{attrs, ControlCode, Packet, PacketStatus};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

/// What became of a control packet handed to `control_entry`.
#[derive(Debug)]
pub enum ControlDisposition {
    /// The packet was consumed and completed (or will be, by the class).
    Completed,
    /// Forward to the parent object; the stack level is already decremented.
    Forward(Packet),
}

/// Monitor debug hook, installed via control packet. A zero field is a
/// wildcard; the action applies when both fields match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugHook {
    /// Lifecycle state ordinal to match, 0 for any.
    #[serde(default)]
    pub monitor_state: u32,
    /// Condition ordinal to match, 0 for any.
    #[serde(default)]
    pub monitor_substate: u32,
    pub action: HookAction,
}

impl DebugHook {
    pub fn matches(&self, state: u32, substate: u32) -> bool {
        (self.monitor_state == 0 || self.monitor_state == state)
            && (self.monitor_substate == 0 || self.monitor_substate == substate)
    }
}

/// What a matched hook does to the monitor walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookAction {
    /// Log the hit and keep walking.
    Continue,
    /// The hook owns the invocation; the rotary walk stops here.
    Done,
    /// Log at error severity and keep walking.
    Error,
}

#[derive(Deserialize)]
struct LevelBuffer {
    level: u32,
}

#[derive(Deserialize)]
struct FlagsBuffer {
    flags: u32,
}

impl BaseObject {
    /// Service one control packet.
    pub fn control_entry(&self, mut packet: Packet) -> ControlDisposition {
        if !self.is_alive() {
            packet.complete(PacketStatus::Gone);
            return ControlDisposition::Completed;
        }

        match packet.control_code() {
            ControlCode::MonitorRun => {
                self.monitor_invocation(packet);
                ControlDisposition::Completed
            }

            ControlCode::GetClassId => {
                packet.set_buffer(json!({"class_id": self.class_id().raw()}));
                packet.complete(PacketStatus::Ok);
                ControlDisposition::Completed
            }

            ControlCode::GetLifecycleState => {
                packet.set_buffer(json!({"state": self.lifecycle_state().to_string()}));
                packet.complete(PacketStatus::Ok);
                ControlDisposition::Completed
            }

            ControlCode::LogLifecycleTrace => {
                let message = format!(
                    "lifecycle: state={} runs={} usurpers={} terminators={}",
                    self.lifecycle_state(),
                    self.run_count(),
                    self.usurper_counter(),
                    self.terminator_queue_len(),
                );
                self.object_trace(TraceLevel::Info, &message);
                packet.complete(PacketStatus::Ok);
                ControlDisposition::Completed
            }

            ControlCode::SetActivateCond => self.arm_and_run(ConditionId::ActivateRequest, packet),
            ControlCode::SetHibernateCond => {
                self.arm_and_run(ConditionId::HibernateRequest, packet)
            }
            ControlCode::SetOfflineCond => self.arm_and_run(ConditionId::OfflineRequest, packet),
            ControlCode::SetFailCond => self.arm_and_run(ConditionId::FailRequest, packet),
            ControlCode::SetDestroyCond => self.arm_and_run(ConditionId::DestroyRequest, packet),

            ControlCode::GetTraceLevel => {
                packet.set_buffer(json!({"level": self.trace_level().raw()}));
                packet.complete(PacketStatus::Ok);
                ControlDisposition::Completed
            }

            ControlCode::SetTraceLevel => {
                match Self::parse_buffer::<LevelBuffer>(&mut packet)
                    .and_then(|b| TraceLevel::from_raw(b.level))
                {
                    Some(level) => {
                        self.set_trace_level(level);
                        packet.complete(PacketStatus::Ok);
                    }
                    None => packet.complete(PacketStatus::Failed),
                }
                ControlDisposition::Completed
            }

            ControlCode::GetTraceFlags => {
                packet.set_buffer(json!({"flags": self.trace_flags()}));
                packet.complete(PacketStatus::Ok);
                ControlDisposition::Completed
            }

            ControlCode::SetTraceFlags => {
                match Self::parse_buffer::<FlagsBuffer>(&mut packet) {
                    Some(buffer) => {
                        self.set_trace_flags(buffer.flags);
                        packet.complete(PacketStatus::Ok);
                    }
                    None => packet.complete(PacketStatus::Failed),
                }
                ControlDisposition::Completed
            }

            ControlCode::SetDebugHook => {
                match Self::parse_buffer::<DebugHook>(&mut packet) {
                    Some(hook) => {
                        self.install_debug_hook(hook);
                        packet.complete(PacketStatus::Ok);
                    }
                    None => packet.complete(PacketStatus::Failed),
                }
                ControlDisposition::Completed
            }

            ControlCode::ClearDebugHook => {
                let removed = self.clear_debug_hook();
                packet.set_buffer(json!({"removed": removed}));
                packet.complete(PacketStatus::Ok);
                ControlDisposition::Completed
            }

            ControlCode::Class(_) => self.offer_to_class(packet),
        }
    }

    fn arm_and_run(&self, condition: ConditionId, packet: Packet) -> ControlDisposition {
        self.arm(condition);
        if let Err(err) = self.request_run() {
            warn!(object_id = %self.object_id(), %err, "run request after arming failed");
        }
        packet.complete(PacketStatus::Ok);
        ControlDisposition::Completed
    }

    fn offer_to_class(&self, packet: Packet) -> ControlDisposition {
        match self.class().class_control(self, packet) {
            ClassControlVerdict::Handled => ControlDisposition::Completed,
            ClassControlVerdict::Unhandled(mut packet) => {
                if packet.has_attribute(attrs::TRAVERSE) && packet.stack_level() > 0 {
                    packet.decrement_stack_level();
                    return ControlDisposition::Forward(packet);
                }
                warn!(
                    object_id = %self.object_id(),
                    code = ?packet.control_code(),
                    "unsupported control code"
                );
                packet.complete(PacketStatus::Failed);
                ControlDisposition::Completed
            }
        }
    }

    fn parse_buffer<T: serde::de::DeserializeOwned>(packet: &mut Packet) -> Option<T> {
        let value = packet.take_buffer()?;
        serde_json::from_value(value).ok()
    }
}
