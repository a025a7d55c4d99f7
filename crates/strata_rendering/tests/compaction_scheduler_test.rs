//! # Compaction Scheduler Integration Test
//!
//! Frame deadlines bound how many clusters get compacted per frame; work
//! that misses the deadline waits for the next frame instead of vanishing.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use strata_core::{Clock, ManualClock};
use strata_rendering::{
    ClusterConfig, ClusterEvent, ClusterKey, ClusteredDrawableStorage, ClusteredVertexStorage,
    HostBackend, RealmKind, RegionOrigin, TransferBuffer,
};

/// Clock that advances a fixed step every time it is read.
struct TickingClock {
    now: Cell<u64>,
    step: u64,
}

impl Clock for TickingClock {
    fn now_nanos(&self) -> u64 {
        let now = self.now.get();
        self.now.set(now + self.step);
        now
    }
}

fn session() -> ClusteredVertexStorage<HostBackend> {
    let config = ClusterConfig {
        slab_bytes_increment: 1024,
        bytes_per_vertex: 4,
        cluster_shift: 4,
        ..ClusterConfig::default()
    };
    ClusteredVertexStorage::headless(config).unwrap()
}

/// Fills `clusters` clusters so each spills into a second slab.
fn fragment_clusters(storage: &mut ClusteredVertexStorage<HostBackend>, clusters: i32) {
    for c in 0..clusters {
        for _ in 0..2 {
            let record = ClusteredDrawableStorage::new(
                RealmKind::Solid,
                RegionOrigin::new(c * 16, 0, 0),
                TransferBuffer::new(vec![c as u8; 1000]),
            );
            storage.allocate(record).unwrap().unwrap();
        }
    }
}

fn multi_slab_clusters(storage: &ClusteredVertexStorage<HostBackend>) -> usize {
    storage
        .realm(RealmKind::Solid)
        .clusters()
        .filter(|c| c.slabs().len() > 1)
        .count()
}

/// Test: an expired deadline leaves the remaining tasks queued.
#[test]
fn test_deadline_defers_remaining_clusters() {
    let mut storage = session();
    fragment_clusters(&mut storage, 6);
    assert_eq!(storage.pending_tasks(), 6);

    // Reads at 0, 10, 20, 30 pass a deadline of 35; the read at 40 stops.
    let clock = TickingClock {
        now: Cell::new(0),
        step: 10,
    };
    let summary = storage.run_tasks_with_clock(&clock, 35);

    assert_eq!(summary.completed, 4);
    assert_eq!(summary.remaining, 2);
    assert_eq!(storage.pending_tasks(), 2);
    assert_eq!(multi_slab_clusters(&storage), 2);
    assert!(storage
        .realm(RealmKind::Solid)
        .clusters()
        .filter(|c| c.slabs().len() > 1)
        .all(|c| c.is_scheduled()));

    // Next frame picks up the rest.
    let summary = storage.run_tasks_with_clock(&ManualClock::new(0), 100);
    assert_eq!(summary.completed, 2);
    assert_eq!(storage.pending_tasks(), 0);
    assert_eq!(multi_slab_clusters(&storage), 0);
}

/// Test: flawless frames compact everything regardless of the deadline.
#[test]
fn test_flawless_frames_ignore_deadline() {
    let mut storage = session();
    fragment_clusters(&mut storage, 5);
    storage.set_flawless_frames(true);

    let summary = storage.run_tasks_with_clock(&ManualClock::new(1_000), 0);

    assert_eq!(summary.completed, 5);
    assert_eq!(multi_slab_clusters(&storage), 0);
}

/// Test: a zero budget on the wall clock defers all work.
#[test]
fn test_zero_budget_runs_nothing() {
    let mut storage = session();
    fragment_clusters(&mut storage, 3);

    let summary = storage.run_tasks(std::time::Duration::ZERO);

    assert_eq!(summary.completed, 0);
    assert_eq!(storage.pending_tasks(), 3);
}

/// Test: listeners hear about compactions and closures.
#[test]
fn test_listeners_receive_cluster_events() {
    let mut storage = session();
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    storage.add_listener(RealmKind::Solid, move |realm: RealmKind, event: &ClusterEvent| {
        sink.borrow_mut().push((realm, *event));
    });

    fragment_clusters(&mut storage, 1);
    storage.run_tasks_with_clock(&ManualClock::new(0), 100);
    storage.clear();

    let key = ClusterKey::default();
    assert_eq!(
        *events.borrow(),
        vec![
            (RealmKind::Solid, ClusterEvent::Compacted { key, moved: 1 }),
            (RealmKind::Solid, ClusterEvent::Closed(key)),
        ]
    );
}

/// Test: a cluster emptied before its task runs is simply skipped.
#[test]
fn test_task_for_closed_cluster_is_skipped() {
    let mut storage = session();
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let record = ClusteredDrawableStorage::new(
                RealmKind::Solid,
                RegionOrigin::default(),
                TransferBuffer::new(vec![0; 1000]),
            );
            storage.allocate(record).unwrap().unwrap()
        })
        .collect();
    for handle in handles {
        storage.release(handle).unwrap();
    }

    let summary = storage.run_tasks_with_clock(&ManualClock::new(0), 100);
    assert_eq!(summary.completed, 1);
    assert_eq!(storage.realm(RealmKind::Solid).cluster_count(), 0);
}
