//! Notification collaborator - event registration/dispatch keyed by object id.
//!
//! The core emits an OBJECT_DESTROYED event when destroy completes and a
//! LIFECYCLE_STATE_CHANGED event on every transition. Delivery failure is a
//! degraded condition, never a blocking one; callers log and continue.

use crate::types::{ClassId, ObjectId, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Event kinds the core emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ObjectDestroyed,
    LifecycleStateChanged,
}

/// One delivered event.
#[derive(Debug, Clone)]
pub struct Notification {
    pub object_id: ObjectId,
    pub class_id: ClassId,
    pub kind: EventKind,
    pub detail: Option<Value>,
    pub at: DateTime<Utc>,
}

impl Notification {
    pub fn new(object_id: ObjectId, class_id: ClassId, kind: EventKind) -> Self {
        Self {
            object_id,
            class_id,
            kind,
            detail: None,
            at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Registration handle returned by `register`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(u64);

pub type NotificationCallback = Box<dyn Fn(&Notification) + Send + Sync>;

/// Notification collaborator contract.
pub trait NotificationService: Send + Sync + fmt::Debug {
    /// Register a callback for an event kind, optionally filtered to one
    /// object id.
    fn register(
        &self,
        object_filter: Option<ObjectId>,
        kind: EventKind,
        callback: NotificationCallback,
    ) -> RegistrationId;

    /// Remove a registration; returns false if it was not present.
    fn unregister(&self, id: RegistrationId) -> bool;

    /// Deliver an event to all matching registrations.
    fn send(&self, notification: Notification) -> Result<()>;
}

struct Registration {
    id: RegistrationId,
    object_filter: Option<ObjectId>,
    kind: EventKind,
    callback: NotificationCallback,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("object_filter", &self.object_filter)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Process-scoped registry implementation of the notification contract.
#[derive(Debug)]
pub struct NotificationRegistry {
    registrations: Mutex<Vec<Registration>>,
    next_id: AtomicU64,
}

impl NotificationRegistry {
    pub fn new() -> Self {
        Self {
            registrations: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for NotificationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationService for NotificationRegistry {
    fn register(
        &self,
        object_filter: Option<ObjectId>,
        kind: EventKind,
        callback: NotificationCallback,
    ) -> RegistrationId {
        let id = RegistrationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut registrations = self
            .registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        registrations.push(Registration {
            id,
            object_filter,
            kind,
            callback,
        });
        id
    }

    fn unregister(&self, id: RegistrationId) -> bool {
        let mut registrations = self
            .registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        registrations.len() != before
    }

    fn send(&self, notification: Notification) -> Result<()> {
        let registrations = self
            .registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for registration in registrations.iter() {
            if registration.kind != notification.kind {
                continue;
            }
            if let Some(filter) = registration.object_filter {
                if filter != notification.object_id {
                    continue;
                }
            }
            (registration.callback)(&notification);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn counted(counter: &Arc<AtomicUsize>) -> NotificationCallback {
        let counter = counter.clone();
        Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn delivers_by_kind() {
        let registry = NotificationRegistry::new();
        let destroyed = Arc::new(AtomicUsize::new(0));
        let changed = Arc::new(AtomicUsize::new(0));
        registry.register(None, EventKind::ObjectDestroyed, counted(&destroyed));
        registry.register(None, EventKind::LifecycleStateChanged, counted(&changed));

        registry
            .send(Notification::new(
                ObjectId::new(1),
                ClassId::new(1),
                EventKind::ObjectDestroyed,
            ))
            .unwrap();

        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(changed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn object_filter_applies() {
        let registry = NotificationRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        registry.register(
            Some(ObjectId::new(7)),
            EventKind::ObjectDestroyed,
            counted(&counter),
        );

        registry
            .send(Notification::new(
                ObjectId::new(8),
                ClassId::new(1),
                EventKind::ObjectDestroyed,
            ))
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        registry
            .send(Notification::new(
                ObjectId::new(7),
                ClassId::new(1),
                EventKind::ObjectDestroyed,
            ))
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregister_stops_delivery() {
        let registry = NotificationRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = registry.register(None, EventKind::ObjectDestroyed, counted(&counter));

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));

        registry
            .send(Notification::new(
                ObjectId::new(1),
                ClassId::new(1),
                EventKind::ObjectDestroyed,
            ))
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
