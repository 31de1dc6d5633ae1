//! Condition rotaries - the ordered per-state work lists.
//!
//! A condition is a (name, handler, current-state→next-state table) unit. A
//! request condition is pre-armed by an external event (a control packet); a
//! completion condition is evaluated live through the owning class. The first
//! armed-and-unfinished condition in a rotary owns the monitor invocation.

use super::state::LifecycleState;
use std::fmt;

/// Closed set of condition identifiers. Class-specific conditions use the
/// `Class(n)` escape hatch and are always evaluated through the class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionId {
    /// Class signals specialization finished; SPECIALIZE → ACTIVATE.
    SpecializeComplete,
    /// Class signals activation finished; ACTIVATE → READY.
    ActivateComplete,
    ActivateRequest,
    ReadyRequest,
    HibernateRequest,
    OfflineRequest,
    FailRequest,
    DestroyRequest,
    /// Advisory cancellation observed on the next monitor invocation.
    PacketCanceled,
    Class(u16),
}

impl ConditionId {
    /// Externally armed request conditions (vs. live-evaluated ones).
    pub fn is_request(self) -> bool {
        matches!(
            self,
            ConditionId::ActivateRequest
                | ConditionId::ReadyRequest
                | ConditionId::HibernateRequest
                | ConditionId::OfflineRequest
                | ConditionId::FailRequest
                | ConditionId::DestroyRequest
        )
    }

    /// Stable numeric form used for debug-hook matching.
    pub fn ordinal(self) -> u32 {
        match self {
            ConditionId::SpecializeComplete => 1,
            ConditionId::ActivateComplete => 2,
            ConditionId::ActivateRequest => 3,
            ConditionId::ReadyRequest => 4,
            ConditionId::HibernateRequest => 5,
            ConditionId::OfflineRequest => 6,
            ConditionId::FailRequest => 7,
            ConditionId::DestroyRequest => 8,
            ConditionId::PacketCanceled => 9,
            ConditionId::Class(n) => 0x100 + u32::from(n),
        }
    }
}

impl fmt::Display for ConditionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionId::SpecializeComplete => f.write_str("specialize_complete"),
            ConditionId::ActivateComplete => f.write_str("activate_complete"),
            ConditionId::ActivateRequest => f.write_str("activate_request"),
            ConditionId::ReadyRequest => f.write_str("ready_request"),
            ConditionId::HibernateRequest => f.write_str("hibernate_request"),
            ConditionId::OfflineRequest => f.write_str("offline_request"),
            ConditionId::FailRequest => f.write_str("fail_request"),
            ConditionId::DestroyRequest => f.write_str("destroy_request"),
            ConditionId::PacketCanceled => f.write_str("packet_canceled"),
            ConditionId::Class(n) => write!(f, "class_condition_{n}"),
        }
    }
}

/// Outcome of evaluating one condition during a monitor invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionVerdict {
    /// Not armed / nothing to do; continue down the rotary.
    Pass,
    /// Armed but not finished; the condition owns this invocation and the
    /// rest of the rotary is skipped.
    Own,
    /// Fired fully; disarm, look up the transition, and apply it.
    Fire,
}

/// One rotary slot: a condition plus its current-state-keyed transition table.
/// An empty table means the condition fires without changing state.
#[derive(Debug, Clone)]
pub struct RotaryEntry {
    condition: ConditionId,
    transitions: Vec<(LifecycleState, LifecycleState)>,
}

impl RotaryEntry {
    pub fn new(
        condition: ConditionId,
        transitions: Vec<(LifecycleState, LifecycleState)>,
    ) -> Self {
        Self {
            condition,
            transitions,
        }
    }

    pub fn condition(&self) -> ConditionId {
        self.condition
    }

    /// Destination for a fire while in `current`, if the table has one.
    pub fn next_for(&self, current: LifecycleState) -> Option<LifecycleState> {
        self.transitions
            .iter()
            .find(|(from, _)| *from == current)
            .map(|(_, to)| *to)
    }
}

/// Ordered list of conditions a state evaluates during a monitor invocation.
#[derive(Debug, Clone)]
pub struct Rotary {
    state: LifecycleState,
    entries: Vec<RotaryEntry>,
}

impl Rotary {
    pub fn new(state: LifecycleState) -> Self {
        Self {
            state,
            entries: Vec::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn entries(&self) -> &[RotaryEntry] {
        &self.entries
    }

    /// Append an entry; order is evaluation order, base entries first.
    pub fn push(&mut self, entry: RotaryEntry) {
        self.entries.push(entry);
    }

    pub fn contains(&self, condition: ConditionId) -> bool {
        self.entries.iter().any(|e| e.condition() == condition)
    }
}
