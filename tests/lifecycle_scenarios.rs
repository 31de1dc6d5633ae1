//! End-to-end lifecycle scenarios driven through the runtime facade.
//!
//! The scheduler is ticked directly so every scenario is deterministic; the
//! background loop is exercised separately in the scheduler's own tests.

use spindle_core::lifecycle::{
    ClassDescriptor, ConditionId, ConditionVerdict, LifecycleState, RotaryEntry,
};
use spindle_core::memory::MemoryService;
use spindle_core::notification::{EventKind, NotificationService};
use spindle_core::object::{BaseObject, ObjectClass};
use spindle_core::transport::{ControlCode, Packet, PacketStatus};
use spindle_core::types::{ClassId, CoreConfig, Error, ObjectId};
use pretty_assertions::assert_eq;
use spindle_core::Runtime;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TICK: Duration = Duration::from_millis(100);

/// Class whose ready-state workload owns the monitor and keeps requesting
/// runs until the configured number of work runs, then fires once.
#[derive(Debug)]
struct WorkClass {
    descriptor: ClassDescriptor,
    target: u64,
    work_runs: AtomicU64,
    fired: AtomicBool,
}

impl WorkClass {
    fn new(class_id: u32, target: u64) -> Arc<Self> {
        let mut descriptor =
            ClassDescriptor::base(ClassId::new(class_id), "work", Duration::from_secs(3));
        descriptor
            .extend_rotary(
                LifecycleState::Ready,
                RotaryEntry::new(ConditionId::Class(1), vec![]),
            )
            .expect("ready rotary accepts the workload condition");
        Arc::new(Self {
            descriptor,
            target,
            work_runs: AtomicU64::new(0),
            fired: AtomicBool::new(false),
        })
    }

    fn work_runs(&self) -> u64 {
        self.work_runs.load(Ordering::SeqCst)
    }

    fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl ObjectClass for WorkClass {
    fn descriptor(&self) -> &ClassDescriptor {
        &self.descriptor
    }

    fn evaluate(&self, object: &BaseObject, condition: ConditionId) -> ConditionVerdict {
        match condition {
            ConditionId::SpecializeComplete | ConditionId::ActivateComplete => {
                ConditionVerdict::Fire
            }
            ConditionId::Class(1) => {
                let runs = self.work_runs.fetch_add(1, Ordering::SeqCst) + 1;
                if runs >= self.target {
                    self.fired.store(true, Ordering::SeqCst);
                    ConditionVerdict::Fire
                } else {
                    let _ = object.request_run();
                    ConditionVerdict::Own
                }
            }
            _ => ConditionVerdict::Pass,
        }
    }
}

/// Class with only the base behavior.
#[derive(Debug)]
struct PlainClass {
    descriptor: ClassDescriptor,
}

impl PlainClass {
    fn new(class_id: u32) -> Arc<Self> {
        Arc::new(Self {
            descriptor: ClassDescriptor::base(
                ClassId::new(class_id),
                "plain",
                Duration::from_secs(3),
            ),
        })
    }
}

impl ObjectClass for PlainClass {
    fn descriptor(&self) -> &ClassDescriptor {
        &self.descriptor
    }
}

fn runtime() -> Runtime {
    spindle_core::observability::init_tracing();
    Runtime::new(CoreConfig::default())
}

fn tick(rt: &Runtime) {
    rt.scheduler().tick(TICK);
}

/// Drive a freshly created plain-class object to READY: the creation run
/// covers specialize, one requested run covers activate.
fn drive_to_ready(rt: &Runtime, object: &Arc<BaseObject>) {
    tick(rt);
    assert_eq!(object.lifecycle_state(), LifecycleState::Activate);
    object.request_run().unwrap();
    tick(rt);
    assert_eq!(object.lifecycle_state(), LifecycleState::Ready);
}

fn status_sink() -> (Arc<Mutex<Vec<PacketStatus>>>, impl Fn(Packet)) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let seen = Arc::clone(&seen);
        move |p: Packet| seen.lock().unwrap().push(p.status())
    };
    (seen, sink)
}

#[tokio::test]
async fn minimum_ids_create_run_destroy() {
    let rt = runtime();
    rt.topology().register_class(PlainClass::new(0)).unwrap();
    let object = rt
        .topology()
        .create_object_at(ClassId::new(0), ObjectId::new(0))
        .unwrap();

    tick(&rt);
    assert_eq!(object.run_count(), 1);
    assert_eq!(
        rt.scheduler().dispatch_count(object.element()).unwrap(),
        object.run_count()
    );

    rt.topology().destroy_object(ObjectId::new(0)).await.unwrap();
    assert!(!object.is_alive());
    assert_eq!(rt.memory().chunks_in_use(), 0);
}

#[tokio::test]
async fn min_and_max_ids_are_independent() {
    let rt = runtime();
    rt.topology().register_class(PlainClass::new(0)).unwrap();
    rt.topology()
        .register_class(PlainClass::new(u32::MAX - 1))
        .unwrap();

    let low = rt
        .topology()
        .create_object_at(ClassId::new(0), ObjectId::new(0))
        .unwrap();
    let high = rt
        .topology()
        .create_object_at(ClassId::new(u32::MAX - 1), ObjectId::new(u32::MAX - 1))
        .unwrap();

    drive_to_ready(&rt, &low);
    // `high` only took the creation run; it needs its own second request.
    assert_eq!(high.lifecycle_state(), LifecycleState::Activate);
    high.request_run().unwrap();
    tick(&rt);
    assert_eq!(high.lifecycle_state(), LifecycleState::Ready);

    rt.topology().destroy_object(low.object_id()).await.unwrap();
    assert!(!low.is_alive());
    assert!(high.is_alive());
    assert_eq!(high.lifecycle_state(), LifecycleState::Ready);
    assert_eq!(rt.topology().object_count(), 1);

    rt.topology().destroy_object(high.object_id()).await.unwrap();
    assert_eq!(rt.memory().chunks_in_use(), 0);
}

#[test]
fn run_requests_coalesce_into_one_dispatch() {
    let rt = runtime();
    rt.topology().register_class(PlainClass::new(1)).unwrap();
    let object = rt.topology().create_object(ClassId::new(1)).unwrap();
    drive_to_ready(&rt, &object);

    let before = rt.scheduler().dispatch_count(object.element()).unwrap();
    for _ in 0..25 {
        object.request_run().unwrap();
    }
    tick(&rt);
    let after = rt.scheduler().dispatch_count(object.element()).unwrap();
    assert_eq!(after - before, 1);
    // Every dispatch ran the monitor exactly once.
    assert_eq!(object.run_count(), after);
    assert_eq!(object.lifecycle_state(), LifecycleState::Ready);
}

#[test]
fn workload_fires_exactly_on_the_target_run() {
    let rt = runtime();
    let class = WorkClass::new(1, 5);
    rt.topology().register_class(class.clone()).unwrap();
    let object = rt.topology().create_object(ClassId::new(1)).unwrap();
    drive_to_ready(&rt, &object);

    // Each owned run self-requests the next; the fifth fires.
    object.request_run().unwrap();
    for expected in 1..=4u64 {
        tick(&rt);
        assert_eq!(class.work_runs(), expected);
        assert!(!class.fired());
    }
    tick(&rt);
    assert_eq!(class.work_runs(), 5);
    assert!(class.fired());
    assert_eq!(object.lifecycle_state(), LifecycleState::Ready);

    // No self-request after the fire; the next tick is idle.
    let before = rt.scheduler().dispatch_count(object.element()).unwrap();
    tick(&rt);
    assert_eq!(
        rt.scheduler().dispatch_count(object.element()).unwrap(),
        before
    );
}

#[test]
fn default_timer_drives_a_run_without_requests() {
    let rt = runtime();
    rt.topology().register_class(PlainClass::new(1)).unwrap();
    let object = rt.topology().create_object(ClassId::new(1)).unwrap();
    drive_to_ready(&rt, &object);

    let before = object.run_count();
    // 3s default reschedule at 100ms resolution.
    for _ in 0..29 {
        tick(&rt);
    }
    assert_eq!(object.run_count(), before);
    tick(&rt);
    assert_eq!(object.run_count(), before + 1);
}

#[test]
fn pending_activate_preserves_queued_usurpers() {
    let rt = runtime();
    rt.topology().register_class(PlainClass::new(1)).unwrap();
    let object = rt.topology().create_object(ClassId::new(1)).unwrap();
    drive_to_ready(&rt, &object);

    object.add_to_usurper_queue(Packet::control(ControlCode::Class(30)));
    object.add_to_usurper_queue(Packet::control(ControlCode::Class(31)));

    rt.topology()
        .send_control(
            object.object_id(),
            Packet::control(ControlCode::SetActivateCond),
        )
        .unwrap();
    tick(&rt);
    assert_eq!(object.lifecycle_state(), LifecycleState::PendingActivate);
    assert_eq!(object.usurper_queue_len(), 2);

    object.request_run().unwrap();
    tick(&rt);
    assert_eq!(object.lifecycle_state(), LifecycleState::Activate);
    assert_eq!(object.usurper_queue_len(), 2);
}

#[test]
fn pending_destroy_drains_usurpers_as_gone() {
    let rt = runtime();
    rt.topology().register_class(PlainClass::new(1)).unwrap();
    let object = rt.topology().create_object(ClassId::new(1)).unwrap();
    drive_to_ready(&rt, &object);

    let (seen, sink) = status_sink();
    object.add_to_usurper_queue(
        Packet::control(ControlCode::Class(30)).with_completion(sink),
    );

    rt.topology()
        .send_control(
            object.object_id(),
            Packet::control(ControlCode::SetDestroyCond),
        )
        .unwrap();
    tick(&rt);
    assert_eq!(object.lifecycle_state(), LifecycleState::PendingDestroy);

    object.request_run().unwrap();
    tick(&rt);
    assert_eq!(object.lifecycle_state(), LifecycleState::Destroy);
    assert_eq!(*seen.lock().unwrap(), vec![PacketStatus::Gone]);
    assert_eq!(object.usurper_counter(), 0);
}

#[test]
fn pending_fail_drains_usurpers_as_failed() {
    let rt = runtime();
    rt.topology().register_class(PlainClass::new(1)).unwrap();
    let object = rt.topology().create_object(ClassId::new(1)).unwrap();
    drive_to_ready(&rt, &object);

    let (seen, sink) = status_sink();
    object.add_to_usurper_queue(
        Packet::control(ControlCode::Class(40)).with_completion(sink),
    );

    rt.topology()
        .send_control(object.object_id(), Packet::control(ControlCode::SetFailCond))
        .unwrap();
    tick(&rt);
    assert_eq!(object.lifecycle_state(), LifecycleState::PendingFail);

    object.request_run().unwrap();
    tick(&rt);
    assert_eq!(object.lifecycle_state(), LifecycleState::Fail);
    assert_eq!(*seen.lock().unwrap(), vec![PacketStatus::Failed]);
    assert_eq!(object.usurper_counter(), 0);
}

#[test]
fn pending_offline_drains_usurpers_as_busy() {
    let rt = runtime();
    rt.topology().register_class(PlainClass::new(1)).unwrap();
    let object = rt.topology().create_object(ClassId::new(1)).unwrap();
    drive_to_ready(&rt, &object);

    let (seen, sink) = status_sink();
    object.add_to_usurper_queue(
        Packet::control(ControlCode::Class(41)).with_completion(sink),
    );

    rt.topology()
        .send_control(
            object.object_id(),
            Packet::control(ControlCode::SetOfflineCond),
        )
        .unwrap();
    tick(&rt);
    assert_eq!(object.lifecycle_state(), LifecycleState::PendingOffline);

    object.request_run().unwrap();
    tick(&rt);
    assert_eq!(object.lifecycle_state(), LifecycleState::Offline);
    assert_eq!(*seen.lock().unwrap(), vec![PacketStatus::Busy]);
    assert_eq!(object.usurper_counter(), 0);
}

#[tokio::test]
async fn destroyed_notification_fires_once_and_handle_dies() {
    let rt = runtime();
    rt.topology().register_class(PlainClass::new(1)).unwrap();
    let object = rt.topology().create_object(ClassId::new(1)).unwrap();
    let id = object.object_id();

    let deliveries = Arc::new(AtomicU64::new(0));
    {
        let deliveries = Arc::clone(&deliveries);
        rt.notifier().register(
            Some(id),
            EventKind::ObjectDestroyed,
            Box::new(move |notification| {
                assert_eq!(notification.object_id, id);
                deliveries.fetch_add(1, Ordering::SeqCst);
            }),
        );
    }

    rt.topology().destroy_object(id).await.unwrap();
    assert_eq!(deliveries.load(Ordering::SeqCst), 1);
    assert!(matches!(rt.topology().object(id), Err(Error::NotFound(_))));
    assert!(!object.is_alive());

    // A second destroy of the same id is a lookup failure, not a re-delivery.
    assert!(rt.topology().destroy_object(id).await.is_err());
    assert_eq!(deliveries.load(Ordering::SeqCst), 1);
}

#[test]
fn state_change_notifications_track_the_walk() {
    let rt = runtime();
    rt.topology().register_class(PlainClass::new(1)).unwrap();

    let transitions = Arc::new(Mutex::new(Vec::new()));
    {
        let transitions = Arc::clone(&transitions);
        rt.notifier().register(
            None,
            EventKind::LifecycleStateChanged,
            Box::new(move |notification| {
                let detail = notification.detail.clone().unwrap();
                transitions.lock().unwrap().push((
                    detail["from"].as_str().unwrap().to_string(),
                    detail["to"].as_str().unwrap().to_string(),
                ));
            }),
        );
    }

    let object = rt.topology().create_object(ClassId::new(1)).unwrap();
    drive_to_ready(&rt, &object);

    let transitions = transitions.lock().unwrap();
    assert_eq!(
        *transitions,
        vec![
            ("specialize".to_string(), "activate".to_string()),
            ("activate".to_string(), "ready".to_string()),
        ]
    );
}
