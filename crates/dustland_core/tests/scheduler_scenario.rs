//! End-to-end scheduling scenarios: a pool ticking mock entities while the
//! control thread freezes and releases it.

use dustland_core::{
    DeferredRelease, DispatchTable, Job, JobKind, JobOutcome, JobQueue, LogicPool, PoolConfig,
    WorkerContext,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const ENTITIES: u64 = 100;
const JOBS_PER_ENTITY: u64 = 10;

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Mock entity: a tick counter behind its own lock.
struct MockEntity {
    ticks: Mutex<u64>,
}

#[test]
fn test_four_workers_hundred_entities() {
    let entities: Arc<Vec<MockEntity>> =
        Arc::new((0..ENTITIES).map(|_| MockEntity { ticks: Mutex::new(0) }).collect());
    let total = Arc::new(AtomicU64::new(0));

    let handler_entities = Arc::clone(&entities);
    let handler_total = Arc::clone(&total);
    let table = DispatchTable::new()
        .with(JobKind::Critter, move |job: &Job, _: &WorkerContext<'_>| {
            let Some(entity) = usize::try_from(job.target)
                .ok()
                .and_then(|i| handler_entities.get(i))
            else {
                return JobOutcome::Missing;
            };
            *entity.ticks.lock() += 1;
            handler_total.fetch_add(1, Ordering::Relaxed);
            JobOutcome::Done
        })
        .unwrap();

    let queue = Arc::new(JobQueue::new());
    let (pool, mut controller) =
        LogicPool::start(&PoolConfig::with_workers(4), Arc::clone(&queue), table).unwrap();

    for _ in 0..JOBS_PER_ENTITY {
        for id in 0..ENTITIES {
            queue.push_back(Job::recurring(JobKind::Critter, id));
        }
    }
    assert!(wait_until(Duration::from_secs(10), || total.load(Ordering::Relaxed) > 5_000));

    let before: Vec<u64>;
    {
        let guard = controller.synchronize();
        assert_eq!(guard.parked_count(), 4);
        assert_eq!(pool.barrier().arrived_count(), 4);
        assert_eq!(pool.barrier().target_count(), 4);

        let frozen = total.load(Ordering::Relaxed);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(total.load(Ordering::Relaxed), frozen, "a job ran while frozen");
        before = entities.iter().map(|e| *e.ticks.lock()).collect();
    }

    // Ticking resumes and every entity advances.
    let resumed_from: u64 = before.iter().sum();
    assert!(wait_until(Duration::from_secs(10), || {
        total.load(Ordering::Relaxed) > resumed_from + 2 * ENTITIES * JOBS_PER_ENTITY
    }));
    for (id, entity) in entities.iter().enumerate() {
        assert!(*entity.ticks.lock() > before[id], "entity {id} was skipped");
    }

    let mut last = total.load(Ordering::Relaxed);
    for _ in 0..5 {
        thread::sleep(Duration::from_millis(5));
        let now = total.load(Ordering::Relaxed);
        assert!(now >= last);
        last = now;
    }

    pool.shutdown(controller).unwrap();
    assert_eq!(queue.count_of_kind(JobKind::Critter) as u64, ENTITIES * JOBS_PER_ENTITY);
}

#[test]
fn test_barrier_exclusivity_under_load() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let violations = Arc::new(AtomicUsize::new(0));

    let handler_in_flight = Arc::clone(&in_flight);
    let table = DispatchTable::new()
        .with(JobKind::Map, move |job: &Job, _: &WorkerContext<'_>| {
            handler_in_flight.fetch_add(1, Ordering::SeqCst);
            // Uneven job lengths shuffle the interleavings.
            thread::sleep(Duration::from_micros(50 + (job.target % 7) * 40));
            handler_in_flight.fetch_sub(1, Ordering::SeqCst);
            JobOutcome::Done
        })
        .unwrap();

    let queue = Arc::new(JobQueue::new());
    let (pool, mut controller) =
        LogicPool::start(&PoolConfig::with_workers(6), Arc::clone(&queue), table).unwrap();
    for id in 0..200 {
        queue.push_back(Job::recurring(JobKind::Map, id));
    }

    for round in 0..50 {
        let guard = controller.synchronize();
        for _ in 0..3 {
            if in_flight.load(Ordering::SeqCst) != 0 {
                violations.fetch_add(1, Ordering::SeqCst);
            }
            thread::sleep(Duration::from_micros(100));
        }
        drop(guard);
        thread::sleep(Duration::from_micros(200 + round * 10));
    }

    assert_eq!(violations.load(Ordering::SeqCst), 0);
    assert_eq!(pool.barrier().generation(), 50);
    pool.shutdown(controller).unwrap();
}

#[test]
fn test_retired_handle_outlives_running_job() {
    struct Map {
        id: u64,
    }

    let registry: Arc<RwLock<HashMap<u64, Arc<Map>>>> = Arc::new(RwLock::new(HashMap::new()));
    registry.write().insert(1, Arc::new(Map { id: 1 }));

    let entered = Arc::new(AtomicBool::new(false));
    let release = Arc::new(AtomicBool::new(false));

    let handler_registry = Arc::clone(&registry);
    let handler_entered = Arc::clone(&entered);
    let handler_release = Arc::clone(&release);
    let table = DispatchTable::new()
        .with(JobKind::Map, move |job: &Job, _: &WorkerContext<'_>| {
            let Some(map) = handler_registry.read().get(&job.target).cloned() else {
                return JobOutcome::Missing;
            };
            handler_entered.store(true, Ordering::SeqCst);
            while !handler_release.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }
            assert_eq!(map.id, job.target);
            JobOutcome::Done
        })
        .unwrap();

    let queue = Arc::new(JobQueue::new());
    let (pool, controller) =
        LogicPool::start(&PoolConfig::with_workers(2), Arc::clone(&queue), table).unwrap();
    let deferred = DeferredRelease::new(Arc::clone(pool.cycles()));

    queue.push_back(Job::once(JobKind::Map, 1));
    assert!(wait_until(Duration::from_secs(5), || entered.load(Ordering::SeqCst)));

    let removed = registry.write().remove(&1).unwrap();
    let watch = Arc::downgrade(&removed);
    deferred.retire(removed);
    assert_eq!(deferred.reclaim_eligible(), 0);
    assert_eq!(deferred.pending(), 1);

    release.store(true, Ordering::SeqCst);
    assert!(wait_until(Duration::from_secs(5), || deferred.reclaim_eligible() == 1));
    assert!(wait_until(Duration::from_secs(1), || watch.upgrade().is_none()));
    pool.shutdown(controller).unwrap();
}
