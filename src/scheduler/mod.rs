//! Object scheduler - slot table, countdown timers, and monitor dispatch.
//!
//! Every registered object occupies one slot holding a weak handle, a
//! run-request flag, and a countdown timer. `tick` advances the timers and
//! dispatches a monitor packet to each due slot; run requests coalesce while
//! an invocation is in flight. De-registration is refused with a busy error
//! while an invocation is mid-flight so an object is never torn down under a
//! running monitor.

use crate::transport::Packet;
use crate::types::{Error, ObjectId, Result};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Anything the scheduler can drive. The single entry point is the monitor
/// invocation; the target owns the packet and must eventually complete it.
pub trait MonitorTarget: Send + Sync {
    fn object_id(&self) -> ObjectId;

    /// Service one monitor packet. Completing the packet tells the scheduler
    /// the invocation finished; withholding completion keeps the slot busy.
    fn monitor(self: Arc<Self>, packet: Packet);
}

/// Index of a slot in the scheduler's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(usize);

impl ElementId {
    pub const INVALID: ElementId = ElementId(usize::MAX);

    pub const fn raw(self) -> usize {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != usize::MAX
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "elem-{}", self.0)
    }
}

struct Slot {
    object_id: ObjectId,
    target: Weak<dyn MonitorTarget>,
    run_request: bool,
    remaining_ms: u64,
    default_interval_ms: u64,
    in_flight: bool,
    dispatch_count: u64,
    hooks_installed: u32,
    finished: Arc<Notify>,
}

#[derive(Default)]
struct SlotTable {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
}

impl SlotTable {
    fn insert(&mut self, slot: Slot) -> ElementId {
        if let Some(index) = self.free.pop() {
            self.slots[index] = Some(slot);
            ElementId(index)
        } else {
            self.slots.push(Some(slot));
            ElementId(self.slots.len() - 1)
        }
    }

    fn get_mut(&mut self, element: ElementId) -> Option<&mut Slot> {
        self.slots.get_mut(element.0).and_then(Option::as_mut)
    }

    fn get(&self, element: ElementId) -> Option<&Slot> {
        self.slots.get(element.0).and_then(Option::as_ref)
    }

    fn remove(&mut self, element: ElementId) -> Option<Slot> {
        let slot = self.slots.get_mut(element.0).and_then(Option::take);
        if slot.is_some() {
            self.free.push(element.0);
        }
        slot
    }
}

struct LoopHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// The scheduler. Timer bookkeeping is millisecond-granular and driven either
/// by the background loop or by direct `tick` calls in tests.
pub struct Scheduler {
    table: Arc<Mutex<SlotTable>>,
    tick_interval: Duration,
    total_dispatches: AtomicU64,
    running: Mutex<Option<LoopHandle>>,
}

impl Scheduler {
    pub fn new(tick_interval: Duration) -> Self {
        Self {
            table: Arc::new(Mutex::new(SlotTable::default())),
            tick_interval,
            total_dispatches: AtomicU64::new(0),
            running: Mutex::new(None),
        }
    }

    /// Register a target. The slot starts with a full countdown; the first
    /// dispatch comes from an explicit run request or timer expiry.
    pub fn register(
        &self,
        object_id: ObjectId,
        target: Weak<dyn MonitorTarget>,
        default_interval: Duration,
    ) -> Result<ElementId> {
        let interval_ms = (default_interval.as_millis() as u64).max(1);
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let element = table.insert(Slot {
            object_id,
            target,
            run_request: false,
            remaining_ms: interval_ms,
            default_interval_ms: interval_ms,
            in_flight: false,
            dispatch_count: 0,
            hooks_installed: 0,
            finished: Arc::new(Notify::new()),
        });
        debug!(%object_id, %element, interval_ms, "registered with scheduler");
        Ok(element)
    }

    /// Remove a slot. Refused while a monitor invocation is in flight; the
    /// caller waits on `invocation_finished` and retries.
    pub fn unregister(&self, element: ElementId) -> Result<()> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = table
            .get(element)
            .ok_or_else(|| Error::not_found(format!("no scheduler slot at {element}")))?;
        if slot.in_flight {
            return Err(Error::busy(format!(
                "monitor invocation in flight for {element}"
            )));
        }
        let removed = table.remove(element);
        if let Some(slot) = removed {
            debug!(object_id = %slot.object_id, %element, "unregistered from scheduler");
        }
        Ok(())
    }

    /// Flag the slot for dispatch on the next tick. Idempotent; repeated
    /// requests before the dispatch coalesce into one invocation.
    pub fn run_request(&self, element: ElementId) -> Result<()> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = table
            .get_mut(element)
            .ok_or_else(|| Error::not_found(format!("no scheduler slot at {element}")))?;
        slot.run_request = true;
        Ok(())
    }

    /// Reset the slot's countdown, typically at the end of a monitor
    /// invocation with the interval of the state just serviced.
    pub fn set_time_counter(&self, element: ElementId, interval: Duration) -> Result<()> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = table
            .get_mut(element)
            .ok_or_else(|| Error::not_found(format!("no scheduler slot at {element}")))?;
        slot.remaining_ms = (interval.as_millis() as u64).max(1);
        Ok(())
    }

    /// Signal that fires each time a monitor invocation for this slot
    /// completes. Used by destroy to await a busy slot without polling.
    pub fn invocation_finished(&self, element: ElementId) -> Result<Arc<Notify>> {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = table
            .get(element)
            .ok_or_else(|| Error::not_found(format!("no scheduler slot at {element}")))?;
        Ok(Arc::clone(&slot.finished))
    }

    pub fn dispatch_count(&self, element: ElementId) -> Result<u64> {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = table
            .get(element)
            .ok_or_else(|| Error::not_found(format!("no scheduler slot at {element}")))?;
        Ok(slot.dispatch_count)
    }

    pub fn total_dispatches(&self) -> u64 {
        self.total_dispatches.load(Ordering::Relaxed)
    }

    /// Debug-hook accounting; mirrored here so an operator can see which
    /// slots carry hooks without walking every object.
    pub fn hook_installed(&self, element: ElementId) -> Result<()> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = table
            .get_mut(element)
            .ok_or_else(|| Error::not_found(format!("no scheduler slot at {element}")))?;
        slot.hooks_installed = slot.hooks_installed.saturating_add(1);
        Ok(())
    }

    pub fn hook_cleared(&self, element: ElementId) -> Result<()> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = table
            .get_mut(element)
            .ok_or_else(|| Error::not_found(format!("no scheduler slot at {element}")))?;
        slot.hooks_installed = slot.hooks_installed.saturating_sub(1);
        Ok(())
    }

    pub fn hooks_installed(&self, element: ElementId) -> Result<u32> {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = table
            .get(element)
            .ok_or_else(|| Error::not_found(format!("no scheduler slot at {element}")))?;
        Ok(slot.hooks_installed)
    }

    /// Advance all timers by `elapsed` and dispatch a monitor packet to every
    /// due slot. Returns the number of dispatches issued.
    ///
    /// Due slots are collected under the lock; dispatch happens outside it so
    /// a monitor invocation can call back into the scheduler.
    pub fn tick(&self, elapsed: Duration) -> usize {
        let elapsed_ms = elapsed.as_millis() as u64;
        let mut due: Vec<(ElementId, Arc<dyn MonitorTarget>)> = Vec::new();
        let mut retired: Vec<ElementId> = Vec::new();

        {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            for index in 0..table.slots.len() {
                let element = ElementId(index);
                let Some(slot) = table.slots[index].as_mut() else {
                    continue;
                };
                if slot.in_flight {
                    continue;
                }
                slot.remaining_ms = slot.remaining_ms.saturating_sub(elapsed_ms);
                if !slot.run_request && slot.remaining_ms > 0 {
                    continue;
                }
                match slot.target.upgrade() {
                    Some(target) => {
                        slot.run_request = false;
                        slot.remaining_ms = slot.default_interval_ms;
                        slot.in_flight = true;
                        slot.dispatch_count += 1;
                        due.push((element, target));
                    }
                    None => retired.push(element),
                }
            }
            for element in retired {
                if let Some(slot) = table.remove(element) {
                    warn!(
                        object_id = %slot.object_id,
                        %element,
                        "scheduler target dropped without unregistering, retiring slot"
                    );
                }
            }
        }

        let dispatched = due.len();
        self.total_dispatches
            .fetch_add(dispatched as u64, Ordering::Relaxed);

        for (element, target) in due {
            let table = Arc::clone(&self.table);
            let packet = Packet::monitor_run(move |_completed| {
                let mut table = table.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(slot) = table.get_mut(element) {
                    slot.in_flight = false;
                    slot.finished.notify_waiters();
                }
            });
            target.monitor(packet);
        }
        dispatched
    }

    /// Start the background dispatch loop. Subsequent calls are no-ops while
    /// a loop is running.
    pub fn start(self: &Arc<Self>) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            return;
        }
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let scheduler = Arc::clone(self);
        let tick_interval = self.tick_interval;
        let task = tokio::spawn(async move {
            info!(tick_ms = tick_interval.as_millis() as u64, "scheduler loop started");
            let mut interval = tokio::time::interval(tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        scheduler.tick(tick_interval);
                    }
                    _ = &mut shutdown_rx => {
                        info!("scheduler loop stopping");
                        break;
                    }
                }
            }
        });
        *running = Some(LoopHandle {
            shutdown: shutdown_tx,
            task,
        });
    }

    /// Stop the background loop and wait for it to exit.
    pub async fn stop(&self) {
        let handle = {
            let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            running.take()
        };
        if let Some(handle) = handle {
            let _ = handle.shutdown.send(());
            if let Err(error) = handle.task.await {
                warn!(%error, "scheduler loop did not shut down cleanly");
            }
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let occupied = table.slots.iter().filter(|s| s.is_some()).count();
        f.debug_struct("Scheduler")
            .field("slots", &occupied)
            .field("tick_interval", &self.tick_interval)
            .field("total_dispatches", &self.total_dispatches)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PacketStatus;
    use std::sync::atomic::AtomicUsize;

    /// Target that records invocations; completes immediately unless told to
    /// hold the packet.
    struct Probe {
        object_id: ObjectId,
        invocations: AtomicUsize,
        hold: bool,
        held: Mutex<Vec<Packet>>,
    }

    impl Probe {
        fn new(id: u32) -> Self {
            Self {
                object_id: ObjectId::new(id),
                invocations: AtomicUsize::new(0),
                hold: false,
                held: Mutex::new(Vec::new()),
            }
        }

        fn holding(id: u32) -> Self {
            Self {
                hold: true,
                ..Self::new(id)
            }
        }

        fn invocations(&self) -> usize {
            self.invocations.load(Ordering::SeqCst)
        }

        fn release(&self) {
            for packet in self.held.lock().unwrap().drain(..) {
                packet.complete(PacketStatus::Ok);
            }
        }
    }

    impl MonitorTarget for Probe {
        fn object_id(&self) -> ObjectId {
            self.object_id
        }

        fn monitor(self: Arc<Self>, packet: Packet) {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            if self.hold {
                self.held.lock().unwrap().push(packet);
            } else {
                packet.complete(PacketStatus::Ok);
            }
        }
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(Duration::from_millis(100))
    }

    fn register(sched: &Scheduler, probe: &Arc<Probe>) -> ElementId {
        let weak: Weak<dyn MonitorTarget> = Arc::downgrade(probe) as Weak<dyn MonitorTarget>;
        sched
            .register(probe.object_id, weak, Duration::from_secs(3))
            .unwrap()
    }

    #[test]
    fn run_request_dispatches_on_next_tick() {
        let sched = scheduler();
        let probe = Arc::new(Probe::new(1));
        let element = register(&sched, &probe);

        assert_eq!(sched.tick(Duration::from_millis(100)), 0);

        sched.run_request(element).unwrap();
        assert_eq!(sched.tick(Duration::from_millis(100)), 1);
        assert_eq!(probe.invocations(), 1);
        assert_eq!(sched.dispatch_count(element).unwrap(), 1);
    }

    #[test]
    fn run_requests_coalesce() {
        let sched = scheduler();
        let probe = Arc::new(Probe::new(2));
        let element = register(&sched, &probe);

        for _ in 0..5 {
            sched.run_request(element).unwrap();
        }
        assert_eq!(sched.tick(Duration::from_millis(100)), 1);
        assert_eq!(probe.invocations(), 1);
    }

    #[test]
    fn timer_expiry_dispatches_without_a_request() {
        let sched = scheduler();
        let probe = Arc::new(Probe::new(3));
        let _element = register(&sched, &probe);

        for _ in 0..29 {
            sched.tick(Duration::from_millis(100));
        }
        assert_eq!(probe.invocations(), 0);
        sched.tick(Duration::from_millis(100));
        assert_eq!(probe.invocations(), 1);
    }

    #[test]
    fn set_time_counter_overrides_countdown() {
        let sched = scheduler();
        let probe = Arc::new(Probe::new(4));
        let element = register(&sched, &probe);

        sched
            .set_time_counter(element, Duration::from_millis(200))
            .unwrap();
        sched.tick(Duration::from_millis(100));
        assert_eq!(probe.invocations(), 0);
        sched.tick(Duration::from_millis(100));
        assert_eq!(probe.invocations(), 1);
    }

    #[test]
    fn unregister_refused_while_in_flight() {
        let sched = scheduler();
        let probe = Arc::new(Probe::holding(5));
        let element = register(&sched, &probe);

        sched.run_request(element).unwrap();
        sched.tick(Duration::from_millis(100));
        assert_eq!(probe.invocations(), 1);

        let err = sched.unregister(element).unwrap_err();
        assert!(matches!(err, Error::Busy(_)));

        probe.release();
        sched.unregister(element).unwrap();
        assert!(matches!(
            sched.run_request(element).unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[test]
    fn in_flight_slot_skips_further_dispatch() {
        let sched = scheduler();
        let probe = Arc::new(Probe::holding(6));
        let element = register(&sched, &probe);

        sched.run_request(element).unwrap();
        sched.tick(Duration::from_millis(100));
        sched.run_request(element).unwrap();
        sched.tick(Duration::from_millis(100));
        assert_eq!(probe.invocations(), 1);

        probe.release();
        sched.tick(Duration::from_millis(100));
        assert_eq!(probe.invocations(), 2);
    }

    #[test]
    fn dropped_target_retires_slot() {
        let sched = scheduler();
        let probe = Arc::new(Probe::new(7));
        let element = register(&sched, &probe);
        drop(probe);

        sched.run_request(element).unwrap();
        assert_eq!(sched.tick(Duration::from_millis(100)), 0);
        assert!(matches!(
            sched.run_request(element).unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[test]
    fn slot_indexes_are_reused() {
        let sched = scheduler();
        let first = Arc::new(Probe::new(8));
        let element = register(&sched, &first);
        sched.unregister(element).unwrap();

        let second = Arc::new(Probe::new(9));
        let again = register(&sched, &second);
        assert_eq!(element, again);
    }

    #[tokio::test]
    async fn invocation_finished_signals_completion() {
        let sched = scheduler();
        let probe = Arc::new(Probe::holding(10));
        let element = register(&sched, &probe);

        sched.run_request(element).unwrap();
        sched.tick(Duration::from_millis(100));
        let finished = sched.invocation_finished(element).unwrap();

        let waiter = {
            let finished = Arc::clone(&finished);
            tokio::spawn(async move {
                finished.notified().await;
            })
        };
        tokio::task::yield_now().await;
        probe.release();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("completion signal not delivered")
            .unwrap();
        sched.unregister(element).unwrap();
    }

    /// Writer handing captured log lines to a shared buffer; installed as a
    /// thread-scoped subscriber so tests never touch the global dispatcher.
    #[derive(Clone)]
    struct LogCapture(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn background_loop_starts_and_stops() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer({
                let captured = Arc::clone(&captured);
                move || LogCapture(Arc::clone(&captured))
            })
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            tokio_test::block_on(async {
                let sched = Arc::new(Scheduler::new(Duration::from_millis(10)));
                let probe = Arc::new(Probe::new(11));
                let element = register(&sched, &probe);

                sched.start();
                sched.start(); // second start is a no-op
                sched.run_request(element).unwrap();

                tokio::time::timeout(Duration::from_secs(1), async {
                    while probe.invocations() == 0 {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                })
                .await
                .expect("background loop never dispatched");

                sched.stop().await;
            });
        });

        let logs = String::from_utf8_lossy(&captured.lock().unwrap()).into_owned();
        assert!(logs.contains("scheduler loop started"));
        assert!(logs.contains("scheduler loop stopping"));
    }
}
