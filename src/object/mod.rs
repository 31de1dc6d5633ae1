//! Base object envelope - the common execution shell every class runs in.
//!
//! A base object owns one memory chunk, one scheduler slot, a lifecycle state
//! with armed conditions, and two packet queues: the usurper queue for queued
//! control requests and the terminator queue for in-flight I/O the object must
//! quiesce before leaving a pending state. The monitor invocation is the only
//! place lifecycle transitions happen; everything else just arms conditions
//! and requests a run.

mod control;
mod trace;

pub use control::{ControlDisposition, DebugHook, HookAction};
pub use trace::{mgmt_attr, TraceLevel};

use crate::lifecycle::{
    ClassDescriptor, ConditionId, ConditionVerdict, LifecycleState,
};
use crate::memory::{Chunk, MemoryService};
use crate::notification::{EventKind, Notification, NotificationService};
use crate::scheduler::{ElementId, MonitorTarget, Scheduler};
use crate::transport::{attrs, Packet, PacketId, PacketStatus};
use crate::types::{ClassId, DestroyConfig, Error, ObjectId, Result};
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use tracing::{debug, error, warn};

/// Fixed size of the single chunk backing each object.
pub const OBJECT_CHUNK_SIZE: usize = 4096;

/// Liveness tag; zeroed on destroy so stale handles are detectable.
const MAGIC: u32 = 0x4f42_4a45;

const _: () = assert!(std::mem::size_of::<BaseObject>() <= OBJECT_CHUNK_SIZE);

/// Outcome of handing a class-specific control packet to the class.
#[derive(Debug)]
pub enum ClassControlVerdict {
    /// The class consumed (and will complete) the packet.
    Handled,
    /// The class does not recognize the code; the envelope decides.
    Unhandled(Packet),
}

/// Class plug-in contract. A class supplies its descriptor and the live
/// evaluation of its conditions; the envelope supplies everything else.
pub trait ObjectClass: Send + Sync + fmt::Debug {
    fn descriptor(&self) -> &ClassDescriptor;

    fn class_id(&self) -> ClassId {
        self.descriptor().class_id()
    }

    fn class_name(&self) -> &str {
        self.descriptor().class_name()
    }

    /// Evaluate a live (non-request) condition. The default drives the
    /// happy path: specialization and activation complete immediately.
    fn evaluate(&self, _object: &BaseObject, condition: ConditionId) -> ConditionVerdict {
        match condition {
            ConditionId::SpecializeComplete | ConditionId::ActivateComplete => {
                ConditionVerdict::Fire
            }
            _ => ConditionVerdict::Pass,
        }
    }

    /// Handle a class-specific control packet.
    fn class_control(&self, _object: &BaseObject, packet: Packet) -> ClassControlVerdict {
        ClassControlVerdict::Unhandled(packet)
    }
}

struct ObjectState {
    lifecycle_state: LifecycleState,
    armed: HashSet<ConditionId>,
    trace_level: TraceLevel,
    trace_flags: u32,
    mgmt_attributes: u32,
    debug_hook: Option<DebugHook>,
    hook_hits: u64,
}

/// The envelope itself. Created via [`BaseObject::create`], driven by the
/// scheduler, torn down via [`BaseObject::destroy`].
pub struct BaseObject {
    class: Arc<dyn ObjectClass>,
    object_id: ObjectId,
    chunk: Mutex<Option<Chunk>>,
    state: Mutex<ObjectState>,
    usurper_queue: Mutex<VecDeque<Packet>>,
    terminator_queue: Mutex<VecDeque<Packet>>,
    usurper_count: AtomicU32,
    element: OnceLock<ElementId>,
    run_count: AtomicU64,
    magic: AtomicU32,
    memory: Arc<dyn MemoryService>,
    notifier: Arc<dyn NotificationService>,
    scheduler: Arc<Scheduler>,
    destroy_config: DestroyConfig,
}

impl BaseObject {
    /// Allocate the object's chunk, build the envelope in SPECIALIZE, register
    /// it with the scheduler, and request the first monitor run.
    pub fn create(
        class: Arc<dyn ObjectClass>,
        object_id: ObjectId,
        memory: Arc<dyn MemoryService>,
        notifier: Arc<dyn NotificationService>,
        scheduler: Arc<Scheduler>,
        destroy_config: DestroyConfig,
    ) -> Result<Arc<Self>> {
        let chunk = memory.allocate_chunk()?;
        let interval = class
            .descriptor()
            .reschedule_interval(LifecycleState::Specialize);
        let object = Arc::new(Self {
            class,
            object_id,
            chunk: Mutex::new(Some(chunk)),
            state: Mutex::new(ObjectState {
                lifecycle_state: LifecycleState::Specialize,
                armed: HashSet::new(),
                trace_level: TraceLevel::Info,
                trace_flags: 0,
                mgmt_attributes: mgmt_attr::STARTUP,
                debug_hook: None,
                hook_hits: 0,
            }),
            usurper_queue: Mutex::new(VecDeque::new()),
            terminator_queue: Mutex::new(VecDeque::new()),
            usurper_count: AtomicU32::new(0),
            element: OnceLock::new(),
            run_count: AtomicU64::new(0),
            magic: AtomicU32::new(MAGIC),
            memory,
            notifier,
            scheduler,
            destroy_config,
        });

        let weak = Arc::downgrade(&object) as Weak<dyn MonitorTarget>;
        let element = match object.scheduler.register(object_id, weak, interval) {
            Ok(element) => element,
            Err(error) => {
                if let Some(chunk) = object.take_chunk() {
                    object.memory.release_chunk(chunk);
                }
                return Err(error);
            }
        };
        let _ = object.element.set(element);
        // Kick the first run so specialization starts without waiting a full
        // timer period.
        object.request_run()?;
        debug!(%object_id, class = object.class.class_name(), "object created");
        Ok(object)
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    pub fn class_id(&self) -> ClassId {
        self.class.class_id()
    }

    pub fn class(&self) -> &Arc<dyn ObjectClass> {
        &self.class
    }

    pub fn element(&self) -> ElementId {
        self.element.get().copied().unwrap_or(ElementId::INVALID)
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lock_state().lifecycle_state
    }

    /// Completed monitor invocations since creation.
    pub fn run_count(&self) -> u64 {
        self.run_count.load(Ordering::Relaxed)
    }

    /// False once destroy has torn the object down.
    pub fn is_alive(&self) -> bool {
        self.magic.load(Ordering::Acquire) == MAGIC
    }

    pub fn trace_level(&self) -> TraceLevel {
        self.lock_state().trace_level
    }

    pub fn set_trace_level(&self, level: TraceLevel) {
        self.lock_state().trace_level = level;
    }

    pub fn trace_flags(&self) -> u32 {
        self.lock_state().trace_flags
    }

    pub fn set_trace_flags(&self, flags: u32) {
        self.lock_state().trace_flags = flags;
    }

    pub fn has_mgmt_attribute(&self, attribute: u32) -> bool {
        self.lock_state().mgmt_attributes & attribute != 0
    }

    pub fn set_mgmt_attribute(&self, attribute: u32) {
        self.lock_state().mgmt_attributes |= attribute;
    }

    pub fn clear_mgmt_attribute(&self, attribute: u32) {
        self.lock_state().mgmt_attributes &= !attribute;
    }

    /// Object trace routed through the process subscriber, gated by the
    /// object's own trace level.
    pub fn object_trace(&self, level: TraceLevel, message: &str) {
        trace::emit(self.trace_level(), level, self.object_id, message);
    }

    /// Startup-gated trace; emits only while the startup attribute is set.
    pub fn trace_at_startup(&self, level: TraceLevel, message: &str) {
        if self.has_mgmt_attribute(mgmt_attr::STARTUP) {
            self.object_trace(level, message);
        }
    }

    /// Flag-gated trace for class-customizable verbosity.
    pub fn customizable_trace(&self, flag: u32, level: TraceLevel, message: &str) {
        if self.trace_flags() & flag != 0 {
            self.object_trace(level, message);
        }
    }

    // ---- conditions -------------------------------------------------------

    pub fn arm(&self, condition: ConditionId) {
        self.lock_state().armed.insert(condition);
    }

    pub fn disarm(&self, condition: ConditionId) {
        self.lock_state().armed.remove(&condition);
    }

    pub fn is_armed(&self, condition: ConditionId) -> bool {
        self.lock_state().armed.contains(&condition)
    }

    /// Ask the scheduler for a prompt monitor run. Coalesces with any run
    /// already requested.
    pub fn request_run(&self) -> Result<()> {
        self.scheduler.run_request(self.element())
    }

    // ---- usurper queue ----------------------------------------------------

    pub fn add_to_usurper_queue(&self, packet: Packet) {
        self.lock_usurpers().push_back(packet);
        self.increment_usurper_counter();
    }

    pub fn remove_from_usurper_queue(&self, id: PacketId) -> Option<Packet> {
        let mut queue = self.lock_usurpers();
        let index = queue.iter().position(|p| p.id() == id)?;
        let packet = queue.remove(index);
        drop(queue);
        if packet.is_some() {
            self.decrement_usurper_counter();
        }
        packet
    }

    /// First queued packet matching the predicate.
    pub fn find_from_usurper_queue(
        &self,
        predicate: impl Fn(&Packet) -> bool,
    ) -> Option<PacketId> {
        self.lock_usurpers()
            .iter()
            .find(|p| predicate(p))
            .map(Packet::id)
    }

    pub fn find_control_op_from_usurper_queue(
        &self,
        code: crate::transport::ControlCode,
    ) -> Option<PacketId> {
        self.find_from_usurper_queue(|p| p.control_code() == code)
    }

    pub fn usurper_queue_len(&self) -> usize {
        self.lock_usurpers().len()
    }

    pub fn increment_usurper_counter(&self) -> u32 {
        self.usurper_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn decrement_usurper_counter(&self) -> u32 {
        let previous = self
            .usurper_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            });
        match previous {
            Ok(count) => count - 1,
            Err(_) => {
                // Accounting underflow; leave at zero and complain.
                warn!(
                    object_id = %self.object_id,
                    "usurper counter decrement without matching increment"
                );
                0
            }
        }
    }

    pub fn usurper_counter(&self) -> u32 {
        self.usurper_count.load(Ordering::Acquire)
    }

    /// Dispose of every queued usurper per the pending state's disposition:
    /// ready and offline complete busy, fail completes failed, destroy
    /// completes gone. Activation and hibernation preserve their queues.
    pub fn usurper_queue_drain_io(&self, state: LifecycleState) -> usize {
        match Self::drain_status_for(state) {
            Some(status) => self.drain_usurpers_with(status),
            None => 0,
        }
    }

    fn drain_status_for(state: LifecycleState) -> Option<PacketStatus> {
        use LifecycleState::*;
        match state {
            PendingReady | PendingOffline => Some(PacketStatus::Busy),
            PendingFail => Some(PacketStatus::Failed),
            PendingDestroy => Some(PacketStatus::Gone),
            _ => None,
        }
    }

    /// Complete every queued usurper with `status`. Packets are swapped out
    /// under the lock and completed outside it.
    fn drain_usurpers_with(&self, status: PacketStatus) -> usize {
        let drained: Vec<Packet> = {
            let mut queue = self.lock_usurpers();
            queue.drain(..).collect()
        };
        let count = drained.len();
        for packet in drained {
            self.decrement_usurper_counter();
            packet.complete(status);
        }
        count
    }

    // ---- terminator queue -------------------------------------------------

    pub fn add_to_terminator_queue(&self, packet: Packet) {
        self.lock_terminators().push_back(packet);
    }

    pub fn remove_from_terminator_queue(&self, id: PacketId) -> Option<Packet> {
        let mut queue = self.lock_terminators();
        let index = queue.iter().position(|p| p.id() == id)?;
        queue.remove(index)
    }

    pub fn terminator_queue_len(&self) -> usize {
        self.lock_terminators().len()
    }

    // ---- lifecycle --------------------------------------------------------

    /// Transition to `next`, rejecting edges outside the legal graph, and
    /// publish the change.
    pub fn set_lifecycle_state(&self, next: LifecycleState) -> Result<()> {
        let previous = {
            let mut state = self.lock_state();
            let current = state.lifecycle_state;
            if !current.can_transition_to(next) {
                return Err(Error::state_transition(format!(
                    "{current} -> {next} is not a legal transition"
                )));
            }
            state.lifecycle_state = next;
            // The startup window ends on first entry to READY.
            if next == LifecycleState::Ready {
                state.mgmt_attributes &= !mgmt_attr::STARTUP;
            }
            current
        };
        debug!(object_id = %self.object_id, from = %previous, to = %next, "lifecycle transition");
        self.publish_state_change(previous, next);
        Ok(())
    }

    fn publish_state_change(&self, from: LifecycleState, to: LifecycleState) {
        let notification =
            Notification::new(self.object_id, self.class_id(), EventKind::LifecycleStateChanged)
                .with_detail(json!({"from": from.to_string(), "to": to.to_string()}));
        if let Err(err) = self.notifier.send(notification) {
            warn!(object_id = %self.object_id, %err, "state-change notification failed");
        }
    }

    /// One monitor invocation. Pending states drain and wait; other states
    /// walk their rotary. Always completes the packet and reschedules.
    pub(crate) fn monitor_invocation(&self, packet: Packet) {
        self.run_count.fetch_add(1, Ordering::Relaxed);
        let current = self.lifecycle_state();

        if current.is_terminal() {
            packet.complete(PacketStatus::Gone);
            return;
        }

        let next = if current.is_pending() {
            self.service_pending(current)
        } else {
            self.walk_rotary(current)
        };

        if let Some(next) = next {
            if let Err(err) = self.set_lifecycle_state(next) {
                error!(object_id = %self.object_id, %err, "monitor transition rejected");
            }
        }

        let after = self.lifecycle_state();
        if !after.is_terminal() {
            let interval = self.class.descriptor().reschedule_interval(after);
            if let Err(err) = self.scheduler.set_time_counter(self.element(), interval) {
                warn!(object_id = %self.object_id, %err, "reschedule failed");
            }
        }
        packet.complete(PacketStatus::Ok);
    }

    /// Pending-state servicing. Queued usurpers are disposed per the pending
    /// state; the object exits to its target once the queues quiesce.
    fn service_pending(&self, current: LifecycleState) -> Option<LifecycleState> {
        if !current.is_pending() {
            return None;
        }

        // Activation and hibernation drain nothing; they service their
        // queued requests after the transition.
        let drain_status = Self::drain_status_for(current);
        if drain_status.is_some() {
            let drained = self.usurper_queue_drain_io(current);
            if drained > 0 {
                debug!(
                    object_id = %self.object_id,
                    state = %current,
                    drained,
                    "drained usurper queue"
                );
            }
        }

        let io_quiesced = self.terminator_queue_len() == 0;
        let usurpers_clear = drain_status.is_none() || self.usurper_counter() == 0;
        if io_quiesced && usurpers_clear {
            current.pending_target()
        } else {
            None
        }
    }

    /// Walk the state's rotary in order. The first condition that owns the
    /// invocation or fires a transition ends the walk.
    fn walk_rotary(&self, current: LifecycleState) -> Option<LifecycleState> {
        let descriptor = self.class.descriptor();
        let rotary = descriptor.rotary(current)?;

        for entry in rotary.entries() {
            let condition = entry.condition();

            match self.consult_hook(current, condition) {
                Some(HookAction::Done) => {
                    debug!(
                        object_id = %self.object_id,
                        state = %current,
                        %condition,
                        "debug hook owns invocation"
                    );
                    return None;
                }
                Some(HookAction::Error) => {
                    error!(
                        object_id = %self.object_id,
                        state = %current,
                        %condition,
                        "debug hook error action hit"
                    );
                }
                _ => {}
            }

            if condition == ConditionId::PacketCanceled {
                self.reap_canceled_terminators();
                continue;
            }

            let verdict = if condition.is_request() {
                if self.is_armed(condition) {
                    ConditionVerdict::Fire
                } else {
                    ConditionVerdict::Pass
                }
            } else {
                self.class.evaluate(self, condition)
            };

            match verdict {
                ConditionVerdict::Pass => continue,
                ConditionVerdict::Own => return None,
                ConditionVerdict::Fire => {
                    self.disarm(condition);
                    return entry.next_for(current);
                }
            }
        }
        None
    }

    /// Complete and remove in-flight terminator packets carrying the
    /// advisory cancel mark.
    fn reap_canceled_terminators(&self) {
        let canceled: Vec<Packet> = {
            let mut queue = self.lock_terminators();
            let mut kept = VecDeque::with_capacity(queue.len());
            let mut canceled = Vec::new();
            while let Some(packet) = queue.pop_front() {
                if packet.has_attribute(attrs::CANCELED) {
                    canceled.push(packet);
                } else {
                    kept.push_back(packet);
                }
            }
            *queue = kept;
            canceled
        };
        for packet in canceled {
            packet.complete(PacketStatus::Canceled);
        }
    }

    // ---- destroy ----------------------------------------------------------

    /// Tear the object down: de-register from the scheduler (retrying while a
    /// monitor invocation is in flight), dispose of the queues, publish the
    /// destroyed event, and release the chunk.
    pub async fn destroy(&self) -> Result<()> {
        self.set_mgmt_attribute(mgmt_attr::DESTROY_PENDING);
        let element = self.element();
        let attempts = self.destroy_config.retry_attempts.max(1);

        for attempt in 1..=attempts {
            match self.scheduler.unregister(element) {
                Ok(()) => {
                    self.teardown();
                    return Ok(());
                }
                Err(Error::Busy(_)) => {
                    debug!(
                        object_id = %self.object_id,
                        attempt,
                        "monitor in flight, waiting before de-registration retry"
                    );
                    let finished = self.scheduler.invocation_finished(element)?;
                    let _ = tokio::time::timeout(
                        self.destroy_config.retry_delay,
                        finished.notified(),
                    )
                    .await;
                }
                Err(other) => return Err(other),
            }
        }

        self.object_trace(
            TraceLevel::Critical,
            "destroy retry budget exhausted with monitor still in flight",
        );
        Err(Error::retry_exhausted(format!(
            "object {} still busy after {attempts} de-registration attempts",
            self.object_id
        )))
    }

    fn teardown(&self) {
        {
            let mut state = self.lock_state();
            state.lifecycle_state = LifecycleState::Destroy;
            state.armed.clear();
            state.debug_hook = None;
        }

        let drained = self.drain_usurpers_with(PacketStatus::Gone);
        if drained > 0 {
            debug!(object_id = %self.object_id, drained, "destroyed with queued usurpers");
        }

        let leftover: Vec<Packet> = {
            let mut queue = self.lock_terminators();
            queue.drain(..).collect()
        };
        if !leftover.is_empty() {
            warn!(
                object_id = %self.object_id,
                count = leftover.len(),
                "destroyed with in-flight terminator packets"
            );
            for packet in leftover {
                packet.complete(PacketStatus::Canceled);
            }
        }

        self.magic.store(0, Ordering::Release);

        let notification =
            Notification::new(self.object_id, self.class_id(), EventKind::ObjectDestroyed);
        if let Err(err) = self.notifier.send(notification) {
            warn!(object_id = %self.object_id, %err, "destroyed notification failed");
        }

        if let Some(chunk) = self.take_chunk() {
            self.memory.release_chunk(chunk);
        }
        debug!(object_id = %self.object_id, "object destroyed");
    }

    // ---- debug hook -------------------------------------------------------

    pub(crate) fn install_debug_hook(&self, hook: DebugHook) {
        self.lock_state().debug_hook = Some(hook);
        if let Err(err) = self.scheduler.hook_installed(self.element()) {
            warn!(object_id = %self.object_id, %err, "hook accounting failed");
        }
    }

    pub(crate) fn clear_debug_hook(&self) -> bool {
        let removed = self.lock_state().debug_hook.take().is_some();
        if removed {
            if let Err(err) = self.scheduler.hook_cleared(self.element()) {
                warn!(object_id = %self.object_id, %err, "hook accounting failed");
            }
        }
        removed
    }

    pub fn hook_hits(&self) -> u64 {
        self.lock_state().hook_hits
    }

    fn consult_hook(&self, state: LifecycleState, condition: ConditionId) -> Option<HookAction> {
        let mut guard = self.lock_state();
        let hook = guard.debug_hook.as_ref()?;
        if !hook.matches(state.ordinal(), condition.ordinal()) {
            return None;
        }
        let action = hook.action;
        guard.hook_hits += 1;
        Some(action)
    }

    // ---- plumbing ---------------------------------------------------------

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ObjectState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_usurpers(&self) -> std::sync::MutexGuard<'_, VecDeque<Packet>> {
        self.usurper_queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_terminators(&self) -> std::sync::MutexGuard<'_, VecDeque<Packet>> {
        self.terminator_queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn take_chunk(&self) -> Option<Chunk> {
        self.chunk
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl MonitorTarget for BaseObject {
    fn object_id(&self) -> ObjectId {
        self.object_id
    }

    fn monitor(self: Arc<Self>, packet: Packet) {
        self.monitor_invocation(packet);
    }
}

impl fmt::Debug for BaseObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseObject")
            .field("object_id", &self.object_id)
            .field("class", &self.class.class_name())
            .field("lifecycle_state", &self.lifecycle_state())
            .field("element", &self.element())
            .field("run_count", &self.run_count())
            .field("alive", &self.is_alive())
            .finish()
    }
}
