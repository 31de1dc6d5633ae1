//! Lifecycle engine - static, per-class description of legal states, their
//! reschedule policy, and the ordered condition rotaries.
//!
//! Stand-alone; consumed by the base object envelope. Classes start from
//! `ClassDescriptor::base` and extend rotaries with their own conditions; the
//! base state/edge topology is always preserved.

mod rotary;
mod state;

pub use rotary::{ConditionId, ConditionVerdict, Rotary, RotaryEntry};
pub use state::{LifecycleState, StateKind, ALL_STATES};

use crate::types::{ClassId, Error, Result};
use std::collections::HashMap;
use std::time::Duration;

use LifecycleState::*;

/// Per-class lifecycle data: states with reschedule intervals and rotaries.
#[derive(Debug, Clone)]
pub struct ClassDescriptor {
    class_id: ClassId,
    class_name: String,
    default_reschedule: Duration,
    reschedule: HashMap<LifecycleState, Duration>,
    rotaries: HashMap<LifecycleState, Rotary>,
}

impl ClassDescriptor {
    /// Build the base descriptor every class starts from.
    ///
    /// Request conditions appear in every rotary that can service them, ahead
    /// of the state's completion condition so that an armed destroy or fail
    /// always preempts forward progress.
    pub fn base(
        class_id: ClassId,
        class_name: impl Into<String>,
        default_reschedule: Duration,
    ) -> Self {
        let mut descriptor = Self {
            class_id,
            class_name: class_name.into(),
            default_reschedule,
            reschedule: HashMap::new(),
            rotaries: HashMap::new(),
        };

        let destroy_request = |states: &[LifecycleState]| {
            RotaryEntry::new(
                ConditionId::DestroyRequest,
                states.iter().map(|s| (*s, PendingDestroy)).collect(),
            )
        };
        let fail_request = |states: &[LifecycleState]| {
            RotaryEntry::new(
                ConditionId::FailRequest,
                states.iter().map(|s| (*s, PendingFail)).collect(),
            )
        };

        let mut specialize = Rotary::new(Specialize);
        specialize.push(destroy_request(&[Specialize]));
        specialize.push(fail_request(&[Specialize]));
        specialize.push(RotaryEntry::new(
            ConditionId::SpecializeComplete,
            vec![(Specialize, Activate)],
        ));
        descriptor.rotaries.insert(Specialize, specialize);

        let mut activate = Rotary::new(Activate);
        activate.push(destroy_request(&[Activate]));
        activate.push(fail_request(&[Activate]));
        activate.push(RotaryEntry::new(
            ConditionId::ActivateComplete,
            vec![(Activate, Ready)],
        ));
        descriptor.rotaries.insert(Activate, activate);

        let mut ready = Rotary::new(Ready);
        ready.push(destroy_request(&[Ready]));
        ready.push(fail_request(&[Ready]));
        ready.push(RotaryEntry::new(
            ConditionId::OfflineRequest,
            vec![(Ready, PendingOffline)],
        ));
        ready.push(RotaryEntry::new(
            ConditionId::HibernateRequest,
            vec![(Ready, PendingHibernate)],
        ));
        ready.push(RotaryEntry::new(
            ConditionId::ActivateRequest,
            vec![(Ready, PendingActivate)],
        ));
        ready.push(RotaryEntry::new(ConditionId::PacketCanceled, vec![]));
        descriptor.rotaries.insert(Ready, ready);

        let mut hibernate = Rotary::new(Hibernate);
        hibernate.push(destroy_request(&[Hibernate]));
        hibernate.push(fail_request(&[Hibernate]));
        hibernate.push(RotaryEntry::new(
            ConditionId::OfflineRequest,
            vec![(Hibernate, PendingOffline)],
        ));
        hibernate.push(RotaryEntry::new(
            ConditionId::ReadyRequest,
            vec![(Hibernate, PendingReady)],
        ));
        hibernate.push(RotaryEntry::new(
            ConditionId::ActivateRequest,
            vec![(Hibernate, PendingActivate)],
        ));
        hibernate.push(RotaryEntry::new(ConditionId::PacketCanceled, vec![]));
        descriptor.rotaries.insert(Hibernate, hibernate);

        let mut offline = Rotary::new(Offline);
        offline.push(destroy_request(&[Offline]));
        offline.push(fail_request(&[Offline]));
        offline.push(RotaryEntry::new(
            ConditionId::ReadyRequest,
            vec![(Offline, PendingReady)],
        ));
        offline.push(RotaryEntry::new(
            ConditionId::ActivateRequest,
            vec![(Offline, PendingActivate)],
        ));
        offline.push(RotaryEntry::new(ConditionId::PacketCanceled, vec![]));
        descriptor.rotaries.insert(Offline, offline);

        let mut fail = Rotary::new(Fail);
        fail.push(destroy_request(&[Fail]));
        fail.push(RotaryEntry::new(
            ConditionId::ActivateRequest,
            vec![(Fail, PendingActivate)],
        ));
        fail.push(RotaryEntry::new(
            ConditionId::OfflineRequest,
            vec![(Fail, PendingOffline)],
        ));
        descriptor.rotaries.insert(Fail, fail);

        descriptor
    }

    pub fn class_id(&self) -> ClassId {
        self.class_id
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Rotary for a state; DESTROY and the pending companions have none.
    pub fn rotary(&self, state: LifecycleState) -> Option<&Rotary> {
        self.rotaries.get(&state)
    }

    /// Append a class condition to a state's rotary. Base entries stay in
    /// place; extension entries evaluate after them.
    pub fn extend_rotary(&mut self, state: LifecycleState, entry: RotaryEntry) -> Result<()> {
        if state.is_pending() || state.is_terminal() {
            return Err(Error::validation(format!(
                "state {state} has no rotary to extend"
            )));
        }
        let rotary = self.rotaries.entry(state).or_insert_with(|| Rotary::new(state));
        if rotary.contains(entry.condition()) {
            return Err(Error::validation(format!(
                "condition {} already present in {state} rotary",
                entry.condition()
            )));
        }
        rotary.push(entry);
        Ok(())
    }

    /// Override the reschedule interval for one state.
    pub fn set_reschedule(&mut self, state: LifecycleState, interval: Duration) {
        self.reschedule.insert(state, interval);
    }

    /// Reschedule interval for a state, falling back to the class default.
    /// Pending states poll fast so drain completion is observed promptly.
    pub fn reschedule_interval(&self, state: LifecycleState) -> Duration {
        if let Some(interval) = self.reschedule.get(&state) {
            return *interval;
        }
        if state.is_pending() {
            return Duration::from_millis(100);
        }
        self.default_reschedule
    }
}
