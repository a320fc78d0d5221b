//! Choreography engine: timed keyframe recording and discrete playback.
//!
//! Playback is pure triggering, not interpolation: a fixed-period scheduler
//! compares scaled elapsed time against keyframe timestamps and issues one
//! absolute move per due keyframe, each exactly once, in time order.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bridge::{BridgeHandle, PositionStore};
use shared::domain::{Choreography, ChoreographyFile, Keyframe, CHOREOGRAPHY_FORMAT_VERSION};
use shared::wire::Command;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ChoreoError {
    #[error("no keyframe at index {0}")]
    NoSuchKeyframe(usize),
    #[error("playback speed must be a positive finite number, got {0}")]
    InvalidSpeed(f64),
    #[error("keyframe time must be a non-negative finite number, got {0}")]
    InvalidTime(f64),
    #[error("choreography persistence failed: {0}")]
    Persist(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    Started,
    /// `play` while playing acts as `stop`.
    Stopped,
    /// Nothing to play; no scheduler was started.
    Empty,
}

struct EngineState {
    choreography: Choreography,
    /// Set by the first `record` after empty; cleared by `clear` and `load`.
    clock_start: Option<Instant>,
    speed: f64,
    playback: Option<JoinHandle<()>>,
    /// Bumped on every play/stop. `abort()` only lands at an await point, so
    /// a tick that already passed its await re-checks this under the lock and
    /// bails out when it belongs to a superseded run.
    generation: u64,
}

struct EngineInner {
    state: Mutex<EngineState>,
    bridge: BridgeHandle,
    store: Arc<PositionStore>,
    tick_period: Duration,
}

#[derive(Clone)]
pub struct ChoreoEngine {
    inner: Arc<EngineInner>,
}

impl ChoreoEngine {
    pub fn new(bridge: BridgeHandle, tick_period: Duration) -> Self {
        let store = bridge.store();
        Self {
            inner: Arc::new(EngineInner {
                state: Mutex::new(EngineState {
                    choreography: Choreography::new(),
                    clock_start: None,
                    speed: 1.0,
                    playback: None,
                    generation: 0,
                }),
                bridge,
                store,
                tick_period,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshots the current position store as a new keyframe. The first
    /// keyframe of a sequence starts the clock and lands at time 0.
    pub fn record(&self) -> Keyframe {
        let mut state = self.lock();
        let now = Instant::now();
        let time = if state.choreography.is_empty() {
            state.clock_start = Some(now);
            0.0
        } else {
            match state.clock_start {
                Some(start) => (now - start).as_secs_f64(),
                None => {
                    state.clock_start = Some(now);
                    0.0
                }
            }
        };
        let keyframe = Keyframe {
            time,
            positions: self.inner.store.get(),
        };
        state.choreography.push(keyframe);
        info!(time, positions = ?keyframe.positions, "keyframe recorded");
        keyframe
    }

    pub fn delete_at(&self, index: usize) -> Result<Keyframe, ChoreoError> {
        let mut state = self.lock();
        state
            .choreography
            .remove(index)
            .ok_or(ChoreoError::NoSuchKeyframe(index))
    }

    /// Empties the sequence; the next `record` restarts the clock from 0.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.choreography.clear();
        state.clock_start = None;
        info!("choreography cleared");
    }

    /// Authoritative jump to one keyframe: issues the absolute move and sets
    /// the store to match, with no timed transition.
    pub fn seek(&self, index: usize) -> Result<Keyframe, ChoreoError> {
        let keyframe = {
            let state = self.lock();
            *state
                .choreography
                .get(index)
                .ok_or(ChoreoError::NoSuchKeyframe(index))?
        };
        self.inner
            .bridge
            .submit_nowait(Command::AbsoluteMove(keyframe.positions).encode());
        self.inner.store.set_all(keyframe.positions);
        info!(index, time = keyframe.time, "seek to keyframe");
        Ok(keyframe)
    }

    /// Starts playback, or stops it when already playing (toggle).
    pub fn play(&self) -> PlayOutcome {
        let mut state = self.lock();
        if let Some(task) = state.playback.take() {
            state.generation += 1;
            task.abort();
            info!("playback stopped");
            return PlayOutcome::Stopped;
        }
        if state.choreography.is_empty() {
            warn!("no keyframes to play");
            return PlayOutcome::Empty;
        }

        info!(
            keyframes = state.choreography.len(),
            speed = state.speed,
            "playback started"
        );
        state.generation += 1;
        let generation = state.generation;
        let engine = self.clone();
        let started = Instant::now();
        state.playback = Some(tokio::spawn(async move {
            engine.run_playback(started, generation).await;
        }));
        PlayOutcome::Started
    }

    /// Cancels the scheduler. Safe to call repeatedly and before first play.
    pub fn stop(&self) {
        let mut state = self.lock();
        if let Some(task) = state.playback.take() {
            state.generation += 1;
            task.abort();
            info!("playback stopped");
        }
    }

    /// Applies on the next tick; already-triggered keyframes are not
    /// recomputed.
    pub fn set_speed(&self, factor: f64) -> Result<(), ChoreoError> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(ChoreoError::InvalidSpeed(factor));
        }
        self.lock().speed = factor;
        info!(speed = factor, "playback speed changed");
        Ok(())
    }

    pub fn is_playing(&self) -> bool {
        self.lock().playback.is_some()
    }

    pub fn speed(&self) -> f64 {
        self.lock().speed
    }

    pub fn keyframes(&self) -> Vec<Keyframe> {
        self.lock().choreography.keyframes().to_vec()
    }

    pub fn save(&self) -> Result<Vec<u8>, ChoreoError> {
        let state = self.lock();
        let file = ChoreographyFile {
            version: CHOREOGRAPHY_FORMAT_VERSION.to_string(),
            keyframes: state.choreography.keyframes().to_vec(),
            reverse_flags: Some(self.inner.store.reverse_flags()),
        };
        Ok(serde_json::to_vec_pretty(&file)?)
    }

    /// Replaces the current choreography with a persisted one. Reverse flags
    /// apply to the store only when the container carries them.
    pub fn load(&self, bytes: &[u8]) -> Result<usize, ChoreoError> {
        let file: ChoreographyFile = serde_json::from_slice(bytes)?;
        if let Some(bad) = file
            .keyframes
            .iter()
            .find(|kf| !kf.time.is_finite() || kf.time < 0.0)
        {
            return Err(ChoreoError::InvalidTime(bad.time));
        }
        self.stop();
        if let Some(flags) = file.reverse_flags {
            self.inner.store.set_reverse_flags(flags);
        }
        let mut state = self.lock();
        state.choreography = Choreography::from_keyframes(file.keyframes);
        state.clock_start = None;
        let count = state.choreography.len();
        info!(keyframes = count, version = %file.version, "choreography loaded");
        Ok(count)
    }

    async fn run_playback(self, started: Instant, generation: u64) {
        let mut ticker = tokio::time::interval(self.inner.tick_period);
        let mut cursor = 0usize;
        loop {
            ticker.tick().await;
            let mut state = self.lock();
            if state.generation != generation {
                return;
            }
            let elapsed = (Instant::now() - started).as_secs_f64() * state.speed;

            // Catch-up: a tick triggers every keyframe that became due since
            // the last one, in ascending time order, each at most once.
            while let Some(keyframe) = state.choreography.get(cursor) {
                if keyframe.time > elapsed {
                    break;
                }
                let keyframe = *keyframe;
                self.inner
                    .bridge
                    .submit_nowait(Command::AbsoluteMove(keyframe.positions).encode());
                self.inner.store.set_all(keyframe.positions);
                cursor += 1;
            }

            if cursor >= state.choreography.len() {
                state.playback = None;
                drop(state);
                info!("playback complete");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests;
