#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use adgate_contracts::common::{MS_PER_HOUR, MS_PER_SECOND};
use adgate_contracts::interrupt::{NotificationLevel, SessionEffect};
use adgate_contracts::policy::{AdSource, GatingPolicy, VipSettings};
use adgate_contracts::profile::{GatingMode, ProfilePatch, ViewerAdProfile};
use adgate_contracts::viewer::{Viewer, ViewerId};
use adgate_contracts::UnixTimeMs;
use adgate_engines::gate::GateConfig;
use adgate_os::{
    EntitlementAccessor, GatingError, ManualClock, PlaybackSession, SharedCheckpoints, SharedRepo,
};
use adgate_storage::{
    AdProfileRepo, AdProfileStore, InMemoryCheckpointStore, JsonFileCheckpointStore, StorageError,
};

const T0: UnixTimeMs = UnixTimeMs(1_700_000_000_000);

fn viewer() -> Viewer {
    Viewer::v1(
        ViewerId::new("wiring_viewer").unwrap(),
        Some("wiring@example.com".into()),
    )
    .unwrap()
}

fn seeded_store(policy: GatingPolicy, sources: usize) -> AdProfileStore {
    let mut store = AdProfileStore::new_in_memory();
    store.policy_replace(policy).unwrap();
    for i in 0..sources {
        store
            .ad_source_insert(
                AdSource::v1(format!("ad_{i}"), format!("https://ads.example/{i}"), true).unwrap(),
            )
            .unwrap();
    }
    store
}

fn wire(store: AdProfileStore) -> (Arc<EntitlementAccessor>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(T0));
    let repo: SharedRepo = Arc::new(Mutex::new(store));
    (Arc::new(EntitlementAccessor::new(repo, clock.clone())), clock)
}

fn in_memory_checkpoints() -> SharedCheckpoints {
    Arc::new(Mutex::new(InMemoryCheckpointStore::new()))
}

fn open(accessor: &Arc<EntitlementAccessor>, checkpoints: &SharedCheckpoints) -> PlaybackSession {
    PlaybackSession::open(
        Some(viewer()),
        accessor.clone(),
        checkpoints.clone(),
        GateConfig::mvp_v1(),
    )
}

#[test]
fn at_session_wiring_01_batch_of_two_grants_a_day_and_resets_counter() {
    let (accessor, _clock) = wire(seeded_store(GatingPolicy::v1(40, 2, 24, None).unwrap(), 2));
    let v = viewer();
    accessor.set_mode(Some(&v), GatingMode::BatchUpFront).unwrap();
    let checkpoints = in_memory_checkpoints();
    let mut session = open(&accessor, &checkpoints);
    session.start_playback();

    let first = session.record_batch_ad().unwrap();
    assert_eq!(
        first[0],
        SessionEffect::OpenAd {
            url: "https://ads.example/0".into()
        }
    );
    let second = session.record_batch_ad().unwrap();
    assert_eq!(
        second[0],
        SessionEffect::OpenAd {
            url: "https://ads.example/1".into()
        }
    );

    let profile = accessor.get_profile(Some(&v)).unwrap().profile;
    assert_eq!(profile.ad_free_until, Some(T0.plus_ms(24 * MS_PER_HOUR)));
    assert_eq!(profile.ads_watched_count, 0);
    assert!(accessor.is_ad_free(&profile));
}

#[test]
fn at_session_wiring_02_default_batch_clears_after_five_records() {
    let (accessor, _clock) = wire(seeded_store(GatingPolicy::mvp_default(), 3));
    let v = viewer();
    accessor.set_mode(Some(&v), GatingMode::BatchUpFront).unwrap();
    let checkpoints = in_memory_checkpoints();
    let mut session = open(&accessor, &checkpoints);
    session.start_playback();

    for expected_remaining in [4, 3, 2, 1] {
        session.record_batch_ad().unwrap();
        let view = session.view();
        assert!(view.needs_completion);
        assert_eq!(
            view.incomplete_batch.as_ref().map(|b| b.remaining),
            Some(expected_remaining)
        );
    }
    session.record_batch_ad().unwrap();
    let view = session.view();
    assert!(!view.needs_completion);
    assert!(view.incomplete_batch.is_none());
    assert!(view.in_player);
}

#[test]
fn at_session_wiring_03_mode_round_trip_resets_only_on_change() {
    let (accessor, _clock) = wire(seeded_store(GatingPolicy::mvp_default(), 1));
    let v = viewer();
    accessor.set_mode(Some(&v), GatingMode::BatchUpFront).unwrap();
    accessor.increment_ads_watched(Some(&v)).unwrap();

    let kept = accessor.set_mode(Some(&v), GatingMode::BatchUpFront).unwrap();
    assert_eq!(kept.ads_watched_count, 1);
    accessor.set_mode(Some(&v), GatingMode::TimedInterval).unwrap();
    let back = accessor.set_mode(Some(&v), GatingMode::BatchUpFront).unwrap();
    assert_eq!(back.ads_watched_count, 0);
    assert_eq!(back.email.as_deref(), Some("wiring@example.com"));
}

/// Profile store whose counter writes always fail.
struct CounterDownRepo {
    inner: AdProfileStore,
}

impl AdProfileRepo for CounterDownRepo {
    fn profile_row(&self, id: &ViewerId) -> Result<Option<ViewerAdProfile>, StorageError> {
        self.inner.profile_row(id)
    }
    fn upsert_profile_patch(
        &mut self,
        id: &ViewerId,
        patch: &ProfilePatch,
        now: UnixTimeMs,
    ) -> Result<ViewerAdProfile, StorageError> {
        self.inner.upsert_profile_patch(id, patch, now)
    }
    fn increment_ads_watched(&mut self, _: &ViewerId, _: UnixTimeMs) -> Result<u32, StorageError> {
        Err(StorageError::Unavailable {
            reason: "write timeout".into(),
        })
    }
    fn policy_row(&self) -> Result<Option<GatingPolicy>, StorageError> {
        self.inner.policy_row()
    }
    fn replace_policy_row(&mut self, policy: GatingPolicy) -> Result<(), StorageError> {
        self.inner.replace_policy_row(policy)
    }
    fn ad_source_rows(&self) -> Result<Vec<AdSource>, StorageError> {
        self.inner.ad_source_rows()
    }
    fn insert_ad_source_row(&mut self, source: AdSource) -> Result<(), StorageError> {
        self.inner.insert_ad_source_row(source)
    }
    fn set_ad_source_active(&mut self, id: &str, is_active: bool) -> Result<(), StorageError> {
        self.inner.set_ad_source_active(id, is_active)
    }
    fn vip_settings_row(&self) -> Result<Option<VipSettings>, StorageError> {
        self.inner.vip_settings_row()
    }
    fn replace_vip_settings_row(&mut self, settings: VipSettings) -> Result<(), StorageError> {
        self.inner.replace_vip_settings_row(settings)
    }
}

#[test]
fn at_session_wiring_04_store_failure_surfaces_a_notification() {
    let clock = Arc::new(ManualClock::new(T0));
    let repo: SharedRepo = Arc::new(Mutex::new(CounterDownRepo {
        inner: seeded_store(GatingPolicy::mvp_default(), 1),
    }));
    let accessor = Arc::new(EntitlementAccessor::new(repo, clock));
    let v = viewer();
    accessor.set_mode(Some(&v), GatingMode::BatchUpFront).unwrap();
    assert!(matches!(
        accessor.increment_ads_watched(Some(&v)),
        Err(GatingError::Store(StorageError::Unavailable { .. }))
    ));

    let checkpoints = in_memory_checkpoints();
    let mut session = open(&accessor, &checkpoints);
    session.start_playback();
    let effects = session.record_batch_ad().unwrap();
    assert!(effects.iter().any(|e| matches!(
        e,
        SessionEffect::Notify(n) if n.level == NotificationLevel::Error
    )));
    assert!(session.view().needs_completion);
}

#[test]
fn at_session_wiring_05_file_checkpoint_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("checkpoints.json");
    let (accessor, clock) = wire(seeded_store(GatingPolicy::mvp_default(), 1));

    let checkpoints: SharedCheckpoints =
        Arc::new(Mutex::new(JsonFileCheckpointStore::open(&path).unwrap()));
    let mut session = open(&accessor, &checkpoints);
    session.start_playback();
    for _ in 0..12 {
        clock.advance_ms(MS_PER_SECOND);
        session.tick();
    }
    drop(session);

    // Page died without a pause: only the 10 s checkpoint made it to disk.
    clock.advance_ms(3_600 * MS_PER_SECOND);
    let reloaded: SharedCheckpoints =
        Arc::new(Mutex::new(JsonFileCheckpointStore::open(&path).unwrap()));
    let reopened = open(&accessor, &reloaded);
    assert_eq!(reopened.view().elapsed_ms, 11 * MS_PER_SECOND);
}

#[test]
fn at_session_wiring_06_expired_vip_notice_is_queued_once() {
    let mut store = seeded_store(GatingPolicy::mvp_default(), 1);
    store
        .vip_settings_replace(VipSettings::v1(true, 1).unwrap())
        .unwrap();
    let (accessor, clock) = wire(store);
    let v = viewer();
    accessor.activate_vip(Some(&v)).unwrap();
    clock.advance_ms(48 * MS_PER_HOUR);

    let checkpoints = in_memory_checkpoints();
    let mut session = open(&accessor, &checkpoints);
    let effects = session.take_effects();
    assert_eq!(effects.len(), 1);
    assert!(matches!(
        &effects[0],
        SessionEffect::Notify(n) if n.title == "VIP plan expired"
    ));
    assert!(!session.view().is_ad_free);
    session.tick();
    assert!(session.take_effects().is_empty());
}

/// Profile store whose free-time grants fail while `grant_down` is set.
struct GrantDownRepo {
    inner: AdProfileStore,
    grant_down: Arc<AtomicBool>,
}

impl AdProfileRepo for GrantDownRepo {
    fn profile_row(&self, id: &ViewerId) -> Result<Option<ViewerAdProfile>, StorageError> {
        self.inner.profile_row(id)
    }
    fn upsert_profile_patch(
        &mut self,
        id: &ViewerId,
        patch: &ProfilePatch,
        now: UnixTimeMs,
    ) -> Result<ViewerAdProfile, StorageError> {
        if patch.ad_free_until.is_some() && self.grant_down.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable {
                reason: "write timeout".into(),
            });
        }
        self.inner.upsert_profile_patch(id, patch, now)
    }
    fn increment_ads_watched(&mut self, id: &ViewerId, now: UnixTimeMs) -> Result<u32, StorageError> {
        self.inner.increment_ads_watched(id, now)
    }
    fn policy_row(&self) -> Result<Option<GatingPolicy>, StorageError> {
        self.inner.policy_row()
    }
    fn replace_policy_row(&mut self, policy: GatingPolicy) -> Result<(), StorageError> {
        self.inner.replace_policy_row(policy)
    }
    fn ad_source_rows(&self) -> Result<Vec<AdSource>, StorageError> {
        self.inner.ad_source_rows()
    }
    fn insert_ad_source_row(&mut self, source: AdSource) -> Result<(), StorageError> {
        self.inner.insert_ad_source_row(source)
    }
    fn set_ad_source_active(&mut self, id: &str, is_active: bool) -> Result<(), StorageError> {
        self.inner.set_ad_source_active(id, is_active)
    }
    fn vip_settings_row(&self) -> Result<Option<VipSettings>, StorageError> {
        self.inner.vip_settings_row()
    }
    fn replace_vip_settings_row(&mut self, settings: VipSettings) -> Result<(), StorageError> {
        self.inner.replace_vip_settings_row(settings)
    }
}

#[test]
fn at_session_wiring_07_failed_grant_keeps_player_closed_until_retry_lands() {
    let clock = Arc::new(ManualClock::new(T0));
    let grant_down = Arc::new(AtomicBool::new(true));
    let repo: SharedRepo = Arc::new(Mutex::new(GrantDownRepo {
        inner: seeded_store(GatingPolicy::v1(40, 2, 24, None).unwrap(), 2),
        grant_down: grant_down.clone(),
    }));
    let accessor = Arc::new(EntitlementAccessor::new(repo, clock.clone()));
    let v = viewer();
    accessor.set_mode(Some(&v), GatingMode::BatchUpFront).unwrap();

    let checkpoints = in_memory_checkpoints();
    let mut session = open(&accessor, &checkpoints);
    session.start_playback();
    session.record_batch_ad().unwrap();
    let effects = session.record_batch_ad().unwrap();
    assert!(effects.iter().any(|e| matches!(
        e,
        SessionEffect::Notify(n) if n.level == NotificationLevel::Error
    )));
    assert!(!effects.contains(&SessionEffect::EnterPlayer));
    assert!(!effects.contains(&SessionEffect::CloseIncompleteBatch));
    let view = session.view();
    assert!(view.needs_completion);
    assert!(!view.in_player);
    assert!(!view.is_ad_free);
    assert_eq!(
        view.incomplete_batch.as_ref().map(|b| (b.remaining, b.can_enter_player)),
        Some((0, false))
    );

    // A fresh page load much later is still blocked.
    clock.advance_ms(10_000 * MS_PER_HOUR);
    let mut reopened = open(&accessor, &checkpoints);
    let effects = reopened.start_playback();
    assert!(!effects.contains(&SessionEffect::EnterPlayer));
    assert!(effects
        .iter()
        .any(|e| matches!(e, SessionEffect::ShowIncompleteBatch(_))));
    assert!(!reopened.view().in_player);

    // Once the store recovers, the next record finishes the batch without
    // opening another ad.
    grant_down.store(false, Ordering::SeqCst);
    let effects = reopened.record_batch_ad().unwrap();
    assert!(!effects
        .iter()
        .any(|e| matches!(e, SessionEffect::OpenAd { .. })));
    assert!(effects.contains(&SessionEffect::CloseIncompleteBatch));
    assert!(effects.contains(&SessionEffect::EnterPlayer));
    let view = reopened.view();
    assert!(view.is_ad_free);
    assert!(view.in_player);
    assert_eq!(view.ads_watched_count, 0);
}

#[test]
fn at_session_wiring_08_lowered_requirement_grants_on_next_start() {
    let (accessor, _clock) = wire(seeded_store(GatingPolicy::v1(40, 5, 24, None).unwrap(), 1));
    let v = viewer();
    accessor.set_mode(Some(&v), GatingMode::BatchUpFront).unwrap();
    for _ in 0..3 {
        accessor.increment_ads_watched(Some(&v)).unwrap();
    }
    accessor
        .update_policy(GatingPolicy::v1(40, 2, 12, None).unwrap())
        .unwrap();

    let checkpoints = in_memory_checkpoints();
    let mut session = open(&accessor, &checkpoints);
    let effects = session.start_playback();
    assert!(effects.contains(&SessionEffect::EnterPlayer));
    assert!(effects.iter().any(|e| matches!(
        e,
        SessionEffect::Notify(n) if n.body == "You earned 12 hours without ads!"
    )));
    let profile = accessor.get_profile(Some(&v)).unwrap().profile;
    assert_eq!(profile.ad_free_until, Some(T0.plus_ms(12 * MS_PER_HOUR)));
    assert_eq!(profile.ads_watched_count, 0);
}
