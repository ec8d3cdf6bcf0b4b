#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use adgate_contracts::interrupt::SessionEffect;
use adgate_contracts::policy::{AdSource, GatingPolicy, VipSettings};
use adgate_contracts::profile::GatingMode;
use adgate_contracts::viewer::{Viewer, ViewerId};
use adgate_contracts::UnixTimeMs;
use adgate_engines::gate::GateConfig;
use adgate_os::{
    spawn_gate_loop, Clock, EntitlementAccessor, GateLoopExit, PlaybackController,
    PlaybackSession, SharedCheckpoints, SharedRepo,
};
use adgate_storage::{AdProfileStore, InMemoryCheckpointStore};
use tokio::time::{sleep, Instant};

/// Wall clock that follows tokio's (pausable) time.
struct TokioClock {
    origin: Instant,
    base: UnixTimeMs,
}

impl Clock for TokioClock {
    fn now(&self) -> UnixTimeMs {
        self.base.plus_ms(self.origin.elapsed().as_millis() as u64)
    }
}

struct Fixture {
    accessor: Arc<EntitlementAccessor>,
    checkpoints: SharedCheckpoints,
}

impl Fixture {
    fn new(policy: GatingPolicy) -> Self {
        let mut store = AdProfileStore::new_in_memory();
        store.policy_replace(policy).unwrap();
        store
            .ad_source_insert(AdSource::v1("ad_1".into(), "https://ads.example/1".into(), true).unwrap())
            .unwrap();
        store
            .vip_settings_replace(VipSettings::v1(true, 30).unwrap())
            .unwrap();
        let repo: SharedRepo = Arc::new(Mutex::new(store));
        let clock = Arc::new(TokioClock {
            origin: Instant::now(),
            base: UnixTimeMs(1_700_000_000_000),
        });
        Self {
            accessor: Arc::new(EntitlementAccessor::new(repo, clock)),
            checkpoints: Arc::new(Mutex::new(InMemoryCheckpointStore::new())),
        }
    }

    fn session(&self, viewer: &Viewer) -> PlaybackSession {
        PlaybackSession::open(
            Some(viewer.clone()),
            self.accessor.clone(),
            self.checkpoints.clone(),
            GateConfig::mvp_v1(),
        )
    }
}

fn viewer() -> Viewer {
    Viewer::v1(ViewerId::new("loop_viewer").unwrap(), None).unwrap()
}

fn one_minute_policy() -> GatingPolicy {
    GatingPolicy::v1(1, 5, 24, None).unwrap()
}

fn shows_timed_interrupt(effects: &[SessionEffect]) -> bool {
    effects
        .iter()
        .any(|e| matches!(e, SessionEffect::ShowTimedInterrupt(_)))
}

#[tokio::test(start_paused = true)]
async fn at_gate_loop_01_interval_fires_once_between_59_and_61_seconds() {
    let f = Fixture::new(one_minute_policy());
    let mut controller = PlaybackController::new(f.session(&viewer()));
    controller.start_playback().unwrap();
    assert!(controller.gate_loop_active());

    sleep(Duration::from_millis(59_500)).await;
    assert_eq!(controller.view().unwrap().interrupts_fired, 0);
    assert!(!shows_timed_interrupt(&controller.poll_effects().unwrap()));

    sleep(Duration::from_millis(1_500)).await;
    assert_eq!(controller.view().unwrap().interrupts_fired, 1);
    let effects = controller.poll_effects().unwrap();
    assert!(shows_timed_interrupt(&effects));
    assert!(matches!(effects[0], SessionEffect::PostPlayerMessage(_)));
    assert!(!controller.gate_loop_active());

    sleep(Duration::from_secs(300)).await;
    assert_eq!(controller.view().unwrap().interrupts_fired, 1);
}

#[tokio::test(start_paused = true)]
async fn at_gate_loop_02_ad_watched_restarts_the_loop() {
    let f = Fixture::new(one_minute_policy());
    let mut controller = PlaybackController::new(f.session(&viewer()));
    controller.start_playback().unwrap();
    sleep(Duration::from_secs(61)).await;
    assert!(shows_timed_interrupt(&controller.poll_effects().unwrap()));

    let effects = controller.handle_ad_watched().unwrap();
    assert!(effects.contains(&SessionEffect::CloseTimedInterrupt));
    assert!(controller.gate_loop_active());

    sleep(Duration::from_secs(30)).await;
    assert_eq!(controller.view().unwrap().interrupts_fired, 1);
    sleep(Duration::from_secs(31)).await;
    assert_eq!(controller.view().unwrap().interrupts_fired, 2);
}

#[tokio::test(start_paused = true)]
async fn at_gate_loop_03_teardown_leaves_no_ticking_timer() {
    let f = Fixture::new(one_minute_policy());
    let mut controller = PlaybackController::new(f.session(&viewer()));
    controller.start_playback().unwrap();
    sleep(Duration::from_secs(30)).await;
    controller.teardown().unwrap();
    assert!(!controller.gate_loop_active());

    let frozen = controller.view().unwrap().elapsed_ms;
    assert_eq!(frozen, 30_000);
    sleep(Duration::from_secs(600)).await;
    let view = controller.view().unwrap();
    assert_eq!(view.elapsed_ms, frozen);
    assert_eq!(view.interrupts_fired, 0);
}

#[tokio::test(start_paused = true)]
async fn at_gate_loop_04_vip_viewer_is_never_interrupted() {
    let f = Fixture::new(one_minute_policy());
    let v = viewer();
    f.accessor.activate_vip(Some(&v)).unwrap();
    let mut controller = PlaybackController::new(f.session(&v));
    controller.start_playback().unwrap();
    assert!(!controller.gate_loop_active());

    sleep(Duration::from_secs(3 * 3600)).await;
    assert_eq!(controller.view().unwrap().interrupts_fired, 0);
    assert!(!shows_timed_interrupt(&controller.poll_effects().unwrap()));
}

#[tokio::test(start_paused = true)]
async fn at_gate_loop_05_mode_change_cancels_the_loop() {
    let f = Fixture::new(one_minute_policy());
    let v = viewer();
    let mut controller = PlaybackController::new(f.session(&v));
    controller.start_playback().unwrap();
    sleep(Duration::from_secs(20)).await;

    f.accessor.set_mode(Some(&v), GatingMode::BatchUpFront).unwrap();
    controller.profile_changed().unwrap();
    assert!(!controller.gate_loop_active());

    sleep(Duration::from_secs(120)).await;
    assert_eq!(controller.view().unwrap().interrupts_fired, 0);
}

#[tokio::test(start_paused = true)]
async fn at_gate_loop_06_grant_in_another_tab_stops_the_loop() {
    let f = Fixture::new(one_minute_policy());
    let v = viewer();
    let mut controller = PlaybackController::new(f.session(&v));
    controller.start_playback().unwrap();
    sleep(Duration::from_secs(20)).await;

    f.accessor.grant_free_time(Some(&v), 24).unwrap();
    sleep(Duration::from_secs(120)).await;
    assert_eq!(controller.view().unwrap().interrupts_fired, 0);
    controller.poll_effects().unwrap();
    assert!(!controller.gate_loop_active());
}

#[tokio::test(start_paused = true)]
async fn at_gate_loop_07_cancelled_handle_exits_cancelled() {
    let f = Fixture::new(one_minute_policy());
    let mut session = f.session(&viewer());
    session.start_playback();
    let session = Arc::new(Mutex::new(session));
    let handle = spawn_gate_loop(session.clone(), Duration::from_secs(1));

    sleep(Duration::from_secs(5)).await;
    handle.cancel();
    assert_eq!(handle.join().await, Some(GateLoopExit::Cancelled));
    assert_eq!(session.lock().unwrap().view().interrupts_fired, 0);
}
