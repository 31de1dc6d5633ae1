//! Object topology - the class registry, the live object table, and control
//! routing across parent edges.
//!
//! Objects form a forest via optional parent edges. A control packet that an
//! object declines with the traverse attribute climbs one edge per remaining
//! stack level; running out of parents fails the packet rather than dropping
//! it.

use crate::memory::MemoryService;
use crate::notification::NotificationService;
use crate::object::{BaseObject, ControlDisposition, ObjectClass};
use crate::scheduler::Scheduler;
use crate::transport::{Packet, PacketStatus};
use crate::types::{ClassId, DestroyConfig, Error, ObjectId, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Management state of a table entry, tracked outside the object's own
/// lifecycle state so destroy intent survives a busy object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MgmtState {
    Normal,
    DestroyPending,
}

struct ObjectEntry {
    object: Arc<BaseObject>,
    mgmt_state: MgmtState,
    parent: Option<ObjectId>,
}

/// The live object table plus the registry of installable classes.
pub struct Topology {
    classes: Mutex<HashMap<ClassId, Arc<dyn ObjectClass>>>,
    objects: Mutex<HashMap<ObjectId, ObjectEntry>>,
    memory: Arc<dyn MemoryService>,
    notifier: Arc<dyn NotificationService>,
    scheduler: Arc<Scheduler>,
    destroy_config: DestroyConfig,
    next_object_id: AtomicU32,
}

impl Topology {
    pub fn new(
        memory: Arc<dyn MemoryService>,
        notifier: Arc<dyn NotificationService>,
        scheduler: Arc<Scheduler>,
        destroy_config: DestroyConfig,
    ) -> Self {
        Self {
            classes: Mutex::new(HashMap::new()),
            objects: Mutex::new(HashMap::new()),
            memory,
            notifier,
            scheduler,
            destroy_config,
            next_object_id: AtomicU32::new(0),
        }
    }

    // ---- classes ----------------------------------------------------------

    pub fn register_class(&self, class: Arc<dyn ObjectClass>) -> Result<()> {
        let mut classes = self.classes.lock().unwrap_or_else(PoisonError::into_inner);
        let class_id = class.class_id();
        if classes.contains_key(&class_id) {
            return Err(Error::validation(format!(
                "class {class_id} already registered"
            )));
        }
        debug!(%class_id, name = class.class_name(), "class registered");
        classes.insert(class_id, class);
        Ok(())
    }

    pub fn class(&self, class_id: ClassId) -> Result<Arc<dyn ObjectClass>> {
        let classes = self.classes.lock().unwrap_or_else(PoisonError::into_inner);
        classes
            .get(&class_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("unknown class {class_id}")))
    }

    // ---- objects ----------------------------------------------------------

    /// Create an object of a registered class, assigning the next free id.
    pub fn create_object(&self, class_id: ClassId) -> Result<Arc<BaseObject>> {
        loop {
            let candidate = ObjectId::new(self.next_object_id.fetch_add(1, Ordering::Relaxed));
            if !candidate.is_valid() {
                return Err(Error::internal("object id space exhausted"));
            }
            match self.create_object_at(class_id, candidate) {
                Err(Error::Validation(_)) => continue, // id taken by an explicit create
                other => return other,
            }
        }
    }

    /// Create an object with a caller-chosen id.
    pub fn create_object_at(
        &self,
        class_id: ClassId,
        object_id: ObjectId,
    ) -> Result<Arc<BaseObject>> {
        if !object_id.is_valid() {
            return Err(Error::validation("invalid object id"));
        }
        let class = self.class(class_id)?;

        // The table lock is held across creation so a concurrent creator
        // cannot claim the same id mid-flight.
        let mut objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        if objects.contains_key(&object_id) {
            return Err(Error::validation(format!(
                "object {object_id} already exists"
            )));
        }

        let object = BaseObject::create(
            class,
            object_id,
            Arc::clone(&self.memory),
            Arc::clone(&self.notifier),
            Arc::clone(&self.scheduler),
            self.destroy_config.clone(),
        )?;

        objects.insert(
            object_id,
            ObjectEntry {
                object: Arc::clone(&object),
                mgmt_state: MgmtState::Normal,
                parent: None,
            },
        );
        Ok(object)
    }

    pub fn object(&self, object_id: ObjectId) -> Result<Arc<BaseObject>> {
        let objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        objects
            .get(&object_id)
            .map(|entry| Arc::clone(&entry.object))
            .ok_or_else(|| Error::not_found(format!("unknown object {object_id}")))
    }

    pub fn mgmt_state(&self, object_id: ObjectId) -> Result<MgmtState> {
        let objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        objects
            .get(&object_id)
            .map(|entry| entry.mgmt_state)
            .ok_or_else(|| Error::not_found(format!("unknown object {object_id}")))
    }

    pub fn set_mgmt_state(&self, object_id: ObjectId, state: MgmtState) -> Result<()> {
        let mut objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = objects
            .get_mut(&object_id)
            .ok_or_else(|| Error::not_found(format!("unknown object {object_id}")))?;
        entry.mgmt_state = state;
        Ok(())
    }

    pub fn object_count(&self) -> usize {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Link `child` under `parent` for control forwarding.
    pub fn set_parent(&self, child: ObjectId, parent: ObjectId) -> Result<()> {
        if child == parent {
            return Err(Error::validation("object cannot be its own parent"));
        }
        let mut objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        if !objects.contains_key(&parent) {
            return Err(Error::not_found(format!("unknown parent {parent}")));
        }
        let entry = objects
            .get_mut(&child)
            .ok_or_else(|| Error::not_found(format!("unknown object {child}")))?;
        entry.parent = Some(parent);
        Ok(())
    }

    /// Destroy an object and drop it from the table. The entry survives,
    /// marked destroy-pending, if the object stays busy past the retry
    /// budget; the caller escalates.
    pub async fn destroy_object(&self, object_id: ObjectId) -> Result<()> {
        let object = {
            let mut objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = objects
                .get_mut(&object_id)
                .ok_or_else(|| Error::not_found(format!("unknown object {object_id}")))?;
            entry.mgmt_state = MgmtState::DestroyPending;
            Arc::clone(&entry.object)
        };

        object.destroy().await?;

        let mut objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        objects.remove(&object_id);
        Ok(())
    }

    /// Route a control packet to an object, following parent edges while the
    /// packet keeps asking to be forwarded.
    pub fn send_control(&self, object_id: ObjectId, packet: Packet) -> Result<()> {
        let mut current = object_id;
        let mut packet = packet;
        loop {
            let object = match self.object(current) {
                Ok(object) => object,
                Err(err) => {
                    packet.complete(PacketStatus::Failed);
                    return Err(err);
                }
            };
            match object.control_entry(packet) {
                ControlDisposition::Completed => return Ok(()),
                ControlDisposition::Forward(forwarded) => {
                    let parent = {
                        let objects =
                            self.objects.lock().unwrap_or_else(PoisonError::into_inner);
                        objects.get(&current).and_then(|entry| entry.parent)
                    };
                    match parent {
                        Some(parent) => {
                            current = parent;
                            packet = forwarded;
                        }
                        None => {
                            warn!(
                                object_id = %current,
                                code = ?forwarded.control_code(),
                                "traverse reached the topology root"
                            );
                            forwarded.complete(PacketStatus::Failed);
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

impl fmt::Debug for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let classes = self
            .classes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("Topology")
            .field("classes", &classes)
            .field("objects", &self.object_count())
            .finish()
    }
}
