//! Lifecycle states and the legal-transition graph.
//!
//! State topology:
//! ```text
//! SPECIALIZE → ACTIVATE → READY ⇄ HIBERNATE ⇄ OFFLINE ⇄ FAIL → DESTROY
//! ```
//! Every persistent and transitional state (except SPECIALIZE as a target)
//! has a pending companion entered when an external request targets it but
//! preconditions are unmet; a pending state's only legal exits are its target
//! state or DESTROY.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Specialize,
    Activate,
    Ready,
    Hibernate,
    Offline,
    Fail,
    Destroy,
    PendingReady,
    PendingActivate,
    PendingHibernate,
    PendingOffline,
    PendingFail,
    PendingDestroy,
}

/// Coarse state classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    /// Passed through on the way somewhere else (SPECIALIZE, ACTIVATE).
    Transitional,
    /// The object can sit here indefinitely.
    Persistent,
    /// Companion state holding a requested target until preconditions clear.
    Pending,
}

use LifecycleState::*;

impl LifecycleState {
    pub fn kind(self) -> StateKind {
        match self {
            Specialize | Activate => StateKind::Transitional,
            Ready | Hibernate | Offline | Fail | Destroy => StateKind::Persistent,
            PendingReady | PendingActivate | PendingHibernate | PendingOffline | PendingFail
            | PendingDestroy => StateKind::Pending,
        }
    }

    pub fn is_pending(self) -> bool {
        self.kind() == StateKind::Pending
    }

    /// DESTROY is the single terminal state.
    pub fn is_terminal(self) -> bool {
        self == Destroy
    }

    /// The state a pending companion resolves to once preconditions clear.
    pub fn pending_target(self) -> Option<LifecycleState> {
        match self {
            PendingReady => Some(Ready),
            PendingActivate => Some(Activate),
            PendingHibernate => Some(Hibernate),
            PendingOffline => Some(Offline),
            PendingFail => Some(Fail),
            PendingDestroy => Some(Destroy),
            _ => None,
        }
    }

    /// Legal destination states from this state. A transition request whose
    /// destination is absent from this list is rejected.
    pub fn legal_next(self) -> &'static [LifecycleState] {
        match self {
            Specialize => &[Activate, PendingActivate, PendingFail, PendingDestroy],
            Activate => &[
                Ready,
                PendingReady,
                PendingOffline,
                PendingFail,
                PendingDestroy,
            ],
            Ready => &[
                PendingActivate,
                PendingHibernate,
                PendingOffline,
                PendingFail,
                PendingDestroy,
            ],
            Hibernate => &[
                PendingActivate,
                PendingReady,
                PendingOffline,
                PendingFail,
                PendingDestroy,
            ],
            Offline => &[
                PendingActivate,
                PendingReady,
                PendingHibernate,
                PendingFail,
                PendingDestroy,
            ],
            Fail => &[PendingActivate, PendingOffline, PendingDestroy],
            Destroy => &[],
            // Pending companions exit to their target state or to DESTROY.
            PendingReady => &[Ready, Destroy],
            PendingActivate => &[Activate, Destroy],
            PendingHibernate => &[Hibernate, Destroy],
            PendingOffline => &[Offline, Destroy],
            PendingFail => &[Fail, Destroy],
            PendingDestroy => &[Destroy],
        }
    }

    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        self.legal_next().contains(&next)
    }

    /// Stable numeric form used for debug-hook matching and traces.
    pub fn ordinal(self) -> u32 {
        match self {
            Specialize => 1,
            Activate => 2,
            Ready => 3,
            Hibernate => 4,
            Offline => 5,
            Fail => 6,
            Destroy => 7,
            PendingReady => 0x103,
            PendingActivate => 0x102,
            PendingHibernate => 0x104,
            PendingOffline => 0x105,
            PendingFail => 0x106,
            PendingDestroy => 0x107,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Specialize => "specialize",
            Activate => "activate",
            Ready => "ready",
            Hibernate => "hibernate",
            Offline => "offline",
            Fail => "fail",
            Destroy => "destroy",
            PendingReady => "pending_ready",
            PendingActivate => "pending_activate",
            PendingHibernate => "pending_hibernate",
            PendingOffline => "pending_offline",
            PendingFail => "pending_fail",
            PendingDestroy => "pending_destroy",
        };
        f.write_str(name)
    }
}

/// Every state, for exhaustive iteration in checks and tests.
pub const ALL_STATES: [LifecycleState; 13] = [
    Specialize,
    Activate,
    Ready,
    Hibernate,
    Offline,
    Fail,
    Destroy,
    PendingReady,
    PendingActivate,
    PendingHibernate,
    PendingOffline,
    PendingFail,
    PendingDestroy,
];
