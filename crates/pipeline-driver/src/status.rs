use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::Sender;
use serde::Serialize;

use crate::format::AudioFormat;
use crate::host::EndpointHandles;

/// Coarse animator state, reported to observers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    #[default]
    Stopped,
    /// Stream configured, priming buffers.
    Buffering,
    Playing,
    Halted,
}

/// Notifications published by the animator thread.
#[derive(Clone, Debug, PartialEq)]
pub enum DriverEvent {
    StreamStarted(AudioFormat),
    Track { uri: String },
    MetaText(String),
    StateChanged(DriverState),
    /// Whole seconds into the current track, sent when the second changes.
    Time { seconds: u64 },
    Flushed,
    Quit,
}

/// Status shared between the animator thread and the owning application.
#[derive(Debug, Default)]
pub(crate) struct DriverStatus {
    pub(crate) state: DriverState,
    pub(crate) mode: Option<String>,
    pub(crate) track: Option<String>,
    pub(crate) format: Option<AudioFormat>,
    pub(crate) delay_jiffies: Option<u32>,
    pub(crate) messages: u64,
    pub(crate) buffers_enqueued: u64,
    pub(crate) bytes_written: u64,
    pub(crate) streams: u64,
    pub(crate) halts: u64,
    pub(crate) flushes: u64,
}

/// Point-in-time copy of [`DriverStatus`].
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub state: DriverState,
    pub playing: bool,
    pub mode: Option<String>,
    pub track: Option<String>,
    pub format: Option<AudioFormat>,
    pub delay_jiffies: Option<u32>,
    pub messages: u64,
    pub buffers_enqueued: u64,
    pub bytes_written: u64,
    pub streams: u64,
    pub halts: u64,
    pub flushes: u64,
    pub volume: f32,
    pub underruns: u64,
    pub played_bytes: u64,
}

/// Cross-thread driver state: `playing` and `quit` flags plus the status block.
#[derive(Debug, Default)]
pub(crate) struct DriverShared {
    pub(crate) playing: AtomicBool,
    pub(crate) quit: AtomicBool,
    pub(crate) status: Mutex<DriverStatus>,
    pub(crate) observer: Mutex<Option<Sender<DriverEvent>>>,
}

impl DriverShared {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut DriverStatus)) {
        let mut st = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut st);
    }

    pub(crate) fn set_state(&self, state: DriverState) {
        self.playing.store(
            matches!(state, DriverState::Buffering | DriverState::Playing),
            Ordering::Release,
        );
        let mut changed = false;
        self.update(|st| {
            changed = st.state != state;
            st.state = state;
        });
        if changed {
            tracing::debug!(?state, "driver state");
            self.notify(DriverEvent::StateChanged(state));
        }
    }

    /// Deliver an event to the observer, dropping it if the observer has gone away.
    pub(crate) fn notify(&self, event: DriverEvent) {
        let mut guard = self.observer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = guard.as_ref() {
            if tx.send(event).is_err() {
                *guard = None;
            }
        }
    }

    pub(crate) fn snapshot(&self, handles: &EndpointHandles) -> StatusSnapshot {
        let st = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        StatusSnapshot {
            state: st.state,
            playing: self.playing.load(Ordering::Acquire),
            mode: st.mode.clone(),
            track: st.track.clone(),
            format: st.format,
            delay_jiffies: st.delay_jiffies,
            messages: st.messages,
            buffers_enqueued: st.buffers_enqueued,
            bytes_written: st.bytes_written,
            streams: st.streams,
            halts: st.halts,
            flushes: st.flushes,
            volume: handles.volume.get(),
            underruns: handles.counters.underruns(),
            played_bytes: handles.counters.played_bytes(),
        }
    }
}
