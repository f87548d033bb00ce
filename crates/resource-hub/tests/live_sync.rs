//! Change-feed subscriptions: refresh on events, owner lifecycle, and reconnect behavior.

mod common {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::watch;

    use resource_hub::store::{
        Application, ApplicationDraft, ChangeEvent, ChangeKind, MemoryBackend, ScopedStore,
    };
    use resource_hub::sync::{ChangeHandler, RetryPolicy, SyncState};
    use resource_hub::tenant::{TenantKey, TenantScope};

    pub(super) fn scope(key: &str) -> TenantScope {
        TenantScope::Tenant(TenantKey::new(key).expect("valid tenant key"))
    }

    pub(super) fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff_ms: 10,
            max_backoff_ms: 40,
            backoff_multiplier: 2.0,
        }
    }

    pub(super) async fn seed_application(memory: &MemoryBackend, tenant: &str, applicant: &str) {
        let store = ScopedStore::<Application>::new(Arc::new(memory.clone()), scope(tenant))
            .expect("tenant scope");
        store
            .insert(ApplicationDraft::new(applicant, "rental_assistance"))
            .await
            .expect("seed insert");
    }

    pub(super) async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    pub(super) async fn wait_for_state(
        state: &watch::Receiver<SyncState>,
        expected: impl Fn(&SyncState) -> bool,
    ) {
        wait_until(|| expected(&state.borrow())).await;
    }

    /// Records every event it is handed, optionally taking a while per event.
    #[derive(Default)]
    pub(super) struct Recorder {
        events: Mutex<Vec<ChangeEvent>>,
        delay: Duration,
    }

    impl Recorder {
        pub(super) fn slow(delay: Duration) -> Self {
            Self {
                events: Mutex::new(Vec::new()),
                delay,
            }
        }

        pub(super) fn count(&self) -> usize {
            self.events.lock().expect("events").len()
        }

        pub(super) fn resyncs(&self) -> usize {
            self.events
                .lock()
                .expect("events")
                .iter()
                .filter(|event| event.change == ChangeKind::Resync)
                .count()
        }
    }

    #[async_trait]
    impl ChangeHandler for Recorder {
        async fn on_change(&self, event: &ChangeEvent) {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.events.lock().expect("events").push(event.clone());
        }
    }
}

use std::sync::Arc;
use std::time::Duration;

use common::*;
use resource_hub::store::{Application, EntityKind, MemoryBackend, ScopedStore};
use resource_hub::sync::{LiveSync, SyncError, SyncState};

#[tokio::test]
async fn matching_events_refresh_the_bound_store() {
    let memory = MemoryBackend::new();
    let store = Arc::new(
        ScopedStore::<Application>::new(Arc::new(memory.clone()), scope("east"))
            .expect("tenant scope"),
    );
    let sync = LiveSync::new(Arc::new(memory.clone()), fast_retry(3));
    let state = sync.bind(store.clone()).expect("subscribe");
    wait_for_state(&state, |state| *state == SyncState::Live).await;

    seed_application(&memory, "east", "Ana Ruiz").await;
    wait_until(|| store.snapshot().len() == 1).await;
    assert_eq!(store.snapshot().items[0].applicant_name, "Ana Ruiz");

    sync.unmount().await;
}

#[tokio::test]
async fn events_from_other_tenants_are_filtered_out() {
    let memory = MemoryBackend::new();
    let recorder = Arc::new(Recorder::default());
    let sync = LiveSync::new(Arc::new(memory.clone()), fast_retry(3));
    let state = sync
        .subscribe(EntityKind::Applications, scope("east"), recorder.clone())
        .expect("subscribe");
    wait_for_state(&state, |state| *state == SyncState::Live).await;

    seed_application(&memory, "west", "Cara Diaz").await;
    seed_application(&memory, "east", "Ana Ruiz").await;
    wait_until(|| recorder.count() >= 1).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(recorder.count(), 1);
    sync.unmount().await;
}

#[tokio::test]
async fn one_subscription_per_entity_and_scope() {
    let memory = MemoryBackend::new();
    let sync = LiveSync::new(Arc::new(memory), fast_retry(3));
    let first = Arc::new(Recorder::default());
    let second = Arc::new(Recorder::default());

    sync.subscribe(EntityKind::Alerts, scope("east"), first)
        .expect("first subscribe");
    let duplicate = sync.subscribe(EntityKind::Alerts, scope("east"), second.clone());
    assert!(matches!(
        duplicate,
        Err(SyncError::DuplicateSubscription {
            kind: EntityKind::Alerts,
            ..
        })
    ));

    sync.subscribe(EntityKind::Alerts, scope("west"), second)
        .expect("other scope is independent");
    assert_eq!(sync.active(), 2);

    sync.unsubscribe(EntityKind::Alerts, &scope("east"))
        .await
        .expect("unsubscribe");
    assert!(!sync.is_subscribed(EntityKind::Alerts, &scope("east")));
    assert!(matches!(
        sync.unsubscribe(EntityKind::Alerts, &scope("east")).await,
        Err(SyncError::NotSubscribed { .. })
    ));
    sync.unmount().await;
}

#[tokio::test]
async fn unsubscribe_closes_the_feed_gracefully() {
    let memory = MemoryBackend::new();
    let recorder = Arc::new(Recorder::default());
    let sync = LiveSync::new(Arc::new(memory.clone()), fast_retry(3));
    let state = sync
        .subscribe(EntityKind::Applications, scope("east"), recorder)
        .expect("subscribe");
    wait_for_state(&state, |state| *state == SyncState::Live).await;
    assert_eq!(memory.active_feeds(), 1);

    sync.unsubscribe(EntityKind::Applications, &scope("east"))
        .await
        .expect("unsubscribe");
    assert_eq!(*state.borrow(), SyncState::Closed);
    wait_until(|| memory.active_feeds() == 0).await;
}

#[tokio::test]
async fn nothing_reaches_the_store_after_unmount() {
    let memory = MemoryBackend::new();
    let store = Arc::new(
        ScopedStore::<Application>::new(Arc::new(memory.clone()), scope("east"))
            .expect("tenant scope"),
    );
    let sync = LiveSync::new(Arc::new(memory.clone()), fast_retry(3));
    let state = sync.bind(store.clone()).expect("subscribe");
    wait_for_state(&state, |state| *state == SyncState::Live).await;

    sync.unmount().await;
    assert!(store.is_detached());
    assert_eq!(sync.active(), 0);

    let generation = store.snapshot().generation;
    seed_application(&memory, "east", "Ana Ruiz").await;
    seed_application(&memory, "east", "Ben Cho").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snapshot = store.snapshot();
    assert!(snapshot.is_empty());
    assert_eq!(snapshot.generation, generation);
    wait_until(|| memory.active_feeds() == 0).await;

    let again = sync.bind(store);
    assert!(matches!(again, Err(SyncError::Unmounted)));
}

#[tokio::test]
async fn dropping_the_owner_closes_its_feeds() {
    let memory = MemoryBackend::new();
    let store = Arc::new(
        ScopedStore::<Application>::new(Arc::new(memory.clone()), scope("east"))
            .expect("tenant scope"),
    );
    let sync = LiveSync::new(Arc::new(memory.clone()), fast_retry(3));
    let state = sync.bind(store.clone()).expect("subscribe");
    wait_for_state(&state, |state| *state == SyncState::Live).await;

    drop(sync);
    assert!(store.is_detached());
    wait_until(|| memory.active_feeds() == 0).await;
}

#[tokio::test]
async fn reconnects_after_a_drop_and_forces_a_resync() {
    let memory = MemoryBackend::new();
    let recorder = Arc::new(Recorder::default());
    let sync = LiveSync::new(Arc::new(memory.clone()), fast_retry(3));
    let state = sync
        .subscribe(EntityKind::Applications, scope("east"), recorder.clone())
        .expect("subscribe");
    wait_for_state(&state, |state| *state == SyncState::Live).await;

    memory.sever_feeds();
    wait_until(|| recorder.resyncs() == 1).await;
    assert_eq!(*state.borrow(), SyncState::Live);

    seed_application(&memory, "east", "Ana Ruiz").await;
    wait_until(|| recorder.count() == 2).await;
    sync.unmount().await;
}

#[tokio::test]
async fn each_reconnect_starts_a_fresh_retry_budget() {
    let memory = MemoryBackend::new();
    let recorder = Arc::new(Recorder::default());
    let sync = LiveSync::new(Arc::new(memory.clone()), fast_retry(1));
    let state = sync
        .subscribe(EntityKind::Applications, scope("east"), recorder.clone())
        .expect("subscribe");
    wait_for_state(&state, |state| *state == SyncState::Live).await;

    for drops in 1..=3 {
        memory.sever_feeds();
        wait_until(|| recorder.resyncs() == drops).await;
        wait_for_state(&state, |state| *state == SyncState::Live).await;
    }
    sync.unmount().await;
}

#[tokio::test]
async fn exhausted_retries_surface_a_lost_state() {
    let memory = MemoryBackend::new();
    let recorder = Arc::new(Recorder::default());
    let sync = LiveSync::new(Arc::new(memory.clone()), fast_retry(2));
    let state = sync
        .subscribe(EntityKind::Documents, scope("east"), recorder.clone())
        .expect("subscribe");
    wait_for_state(&state, |state| *state == SyncState::Live).await;

    memory.set_available(false);
    memory.sever_feeds();
    wait_for_state(&state, |state| matches!(state, SyncState::Lost { .. })).await;

    assert_eq!(recorder.count(), 0);
    assert!(sync.is_subscribed(EntityKind::Documents, &scope("east")));
    sync.unmount().await;
}

#[tokio::test]
async fn bursts_collapse_into_fewer_refetches() {
    let memory = MemoryBackend::new();
    let recorder = Arc::new(Recorder::slow(Duration::from_millis(60)));
    let sync = LiveSync::new(Arc::new(memory.clone()), fast_retry(3));
    let state = sync
        .subscribe(EntityKind::Applications, scope("east"), recorder.clone())
        .expect("subscribe");
    wait_for_state(&state, |state| *state == SyncState::Live).await;

    for name in ["Ana Ruiz", "Ben Cho", "Cara Diaz", "Dev Patel", "Eli Moss"] {
        seed_application(&memory, "east", name).await;
    }
    wait_until(|| recorder.count() >= 1).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let handled = recorder.count();
    assert!(handled >= 1);
    assert!(handled < 5, "expected coalescing, saw {handled} refetches");
    sync.unmount().await;
}
