#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use adgate_contracts::interrupt::SessionEffect;
use tracing::debug;

use crate::error::GatingError;
use crate::gate_loop::{spawn_gate_loop, GateLoopHandle};
use crate::interrupt::DismissRequest;
use crate::session::{PlaybackSession, SessionView};

/// Drives one `PlaybackSession` and keeps its gate loop in step with it:
/// the loop runs exactly while the session is gate-eligible.
///
/// Must be used from inside a tokio runtime.
pub struct PlaybackController {
    session: Arc<Mutex<PlaybackSession>>,
    gate_loop: Option<GateLoopHandle>,
    tick: Duration,
}

impl PlaybackController {
    pub fn new(session: PlaybackSession) -> Self {
        let tick = Duration::from_millis(session.gate_config().tick_ms);
        Self {
            session: Arc::new(Mutex::new(session)),
            gate_loop: None,
            tick,
        }
    }

    fn with_session<T>(&self, f: impl FnOnce(&mut PlaybackSession) -> T) -> Result<T, GatingError> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| GatingError::LockPoisoned("playback session"))?;
        Ok(f(&mut session))
    }

    fn stop_gate_loop(&mut self) {
        if let Some(handle) = self.gate_loop.take() {
            handle.cancel();
            debug!("gate loop stopped");
        }
    }

    fn sync_gate_loop(&mut self) -> Result<(), GatingError> {
        if self.gate_loop.as_ref().is_some_and(GateLoopHandle::is_finished) {
            self.gate_loop = None;
        }
        let eligible = self.with_session(|s| s.gate_eligible())?;
        match (eligible, self.gate_loop.is_some()) {
            (true, false) => {
                self.gate_loop = Some(spawn_gate_loop(Arc::clone(&self.session), self.tick));
                debug!(tick_ms = self.tick.as_millis() as u64, "gate loop started");
            }
            (false, true) => self.stop_gate_loop(),
            _ => {}
        }
        Ok(())
    }

    /// Resyncs the loop and appends whatever the session queued.
    fn finish(&mut self, mut effects: Vec<SessionEffect>) -> Result<Vec<SessionEffect>, GatingError> {
        self.sync_gate_loop()?;
        effects.extend(self.with_session(PlaybackSession::take_effects)?);
        Ok(effects)
    }

    pub fn gate_loop_active(&self) -> bool {
        self.gate_loop.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn view(&self) -> Result<SessionView, GatingError> {
        self.with_session(|s| s.view())
    }

    pub fn start_playback(&mut self) -> Result<Vec<SessionEffect>, GatingError> {
        let effects = self.with_session(PlaybackSession::start_playback)?;
        self.finish(effects)
    }

    pub fn pause_playback(&mut self) -> Result<Vec<SessionEffect>, GatingError> {
        self.stop_gate_loop();
        self.with_session(PlaybackSession::pause_playback)?;
        self.finish(Vec::new())
    }

    pub fn reset_playback(&mut self) -> Result<Vec<SessionEffect>, GatingError> {
        self.stop_gate_loop();
        self.with_session(PlaybackSession::reset_playback)?;
        self.finish(Vec::new())
    }

    pub fn handle_ad_watched(&mut self) -> Result<Vec<SessionEffect>, GatingError> {
        let effects = self.with_session(PlaybackSession::handle_ad_watched)?;
        self.finish(effects)
    }

    pub fn record_batch_ad(&mut self) -> Result<Vec<SessionEffect>, GatingError> {
        let effects = self.with_session(PlaybackSession::record_batch_ad)??;
        self.finish(effects)
    }

    pub fn switch_mode_from_batch(&mut self) -> Result<Vec<SessionEffect>, GatingError> {
        let effects = self.with_session(PlaybackSession::switch_mode_from_batch)?;
        self.finish(effects)
    }

    pub fn dismiss_interrupt(
        &mut self,
        request: DismissRequest,
    ) -> Result<Vec<SessionEffect>, GatingError> {
        let effects = self.with_session(|s| s.dismiss_interrupt(request))?;
        self.finish(effects)
    }

    /// Mode changes and grants made elsewhere cancel the running loop; it is
    /// restarted only if the session is still gate-eligible. Resulting
    /// effects are queued for the next `poll_effects`.
    pub fn profile_changed(&mut self) -> Result<(), GatingError> {
        self.stop_gate_loop();
        self.with_session(PlaybackSession::profile_changed)?;
        self.sync_gate_loop()
    }

    /// Effects queued by the loop since the last call.
    pub fn poll_effects(&mut self) -> Result<Vec<SessionEffect>, GatingError> {
        self.finish(Vec::new())
    }

    pub fn teardown(&mut self) -> Result<(), GatingError> {
        self.stop_gate_loop();
        self.with_session(PlaybackSession::close)
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.stop_gate_loop();
    }
}
