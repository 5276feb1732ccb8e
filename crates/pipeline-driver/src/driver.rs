//! Lifecycle handle for a running animator thread.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::animator::Animator;
use crate::config::{DriverConfig, FatalAction};
use crate::delay::{DriverDelay, PipelineAnimator};
use crate::error::{DriverError, Result};
use crate::host::{EndpointHandles, HostEndpoint};
use crate::msg::Pipeline;
use crate::status::{DriverEvent, DriverShared, StatusSnapshot};

/// A pipeline driver bound to one pipeline and one host endpoint.
///
/// Dropping the handle performs [`stop`](Self::stop).
pub struct Driver {
    shared: Arc<DriverShared>,
    handles: EndpointHandles,
    delay: DriverDelay,
    join: Option<JoinHandle<()>>,
}

impl Driver {
    /// Spawn the animator thread.
    ///
    /// `make_endpoint` runs on the animator thread, so the endpoint need not be `Send`.
    /// Returns once the endpoint exists; a construction error is returned here.
    pub fn start<P, E, F>(config: DriverConfig, pipeline: P, make_endpoint: F) -> Result<Self>
    where
        P: Pipeline + Send + 'static,
        E: HostEndpoint + 'static,
        F: FnOnce() -> Result<E> + Send + 'static,
    {
        Self::start_observed(config, pipeline, make_endpoint, None)
    }

    /// Like [`start`](Self::start), delivering [`DriverEvent`]s to `observer` from the first
    /// message on.
    pub fn start_observed<P, E, F>(
        config: DriverConfig,
        pipeline: P,
        make_endpoint: F,
        observer: Option<Sender<DriverEvent>>,
    ) -> Result<Self>
    where
        P: Pipeline + Send + 'static,
        E: HostEndpoint + 'static,
        F: FnOnce() -> Result<E> + Send + 'static,
    {
        let shared = DriverShared::new();
        *shared
            .observer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = observer;

        let delay = DriverDelay::new(config.buffering_frames);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<EndpointHandles>>(1);
        let thread_shared = shared.clone();
        let join = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || {
                let endpoint = match make_endpoint() {
                    Ok(ep) => ep,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(endpoint.handles()));
                let fatal = config.fatal;
                let mut animator = Animator::with_shared(config, pipeline, endpoint, thread_shared);
                if let Err(e) = animator.run() {
                    animator.shutdown();
                    fail(fatal, &e);
                }
            })
            .map_err(|e| DriverError::EndpointUnavailable(format!("spawn animator: {e}")))?;

        let handles = match ready_rx.recv() {
            Ok(Ok(handles)) => handles,
            Ok(Err(e)) => {
                let _ = join.join();
                return Err(e);
            }
            Err(_) => {
                let _ = join.join();
                return Err(DriverError::AnimatorPanicked);
            }
        };
        tracing::info!(
            buffers = handles.pool.total(),
            bytes = handles.pool.capacity(),
            "pipeline driver started"
        );

        Ok(Self {
            shared,
            handles,
            delay,
            join: Some(join),
        })
    }

    /// Request a clean stop and wait for the animator to exit.
    ///
    /// Wakes a `request_buffer` wait immediately. An animator blocked inside
    /// `Pipeline::pull` exits after that pull returns.
    pub fn stop(&mut self) -> Result<()> {
        self.shared.quit.store(true, Ordering::Release);
        self.handles.pool.interrupt();
        self.join()
    }

    /// Wait for the animator to exit on its own (after `Quit`).
    pub fn join(&mut self) -> Result<()> {
        if let Some(join) = self.join.take() {
            join.join().map_err(|_| DriverError::AnimatorPanicked)?;
            tracing::info!("pipeline driver stopped");
        }
        Ok(())
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire)
    }

    /// Whether the animator has observed `Quit` or a stop request.
    pub fn is_quit(&self) -> bool {
        self.shared.quit.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map(|j| j.is_finished()).unwrap_or(true)
    }

    /// Set the linear output level; clamped to `[0.0, 1.0]`.
    pub fn set_volume(&self, level: f32) {
        self.handles.volume.set(level);
    }

    pub fn volume(&self) -> f32 {
        self.handles.volume.get()
    }

    pub fn status(&self) -> StatusSnapshot {
        self.shared.snapshot(&self.handles)
    }

    pub fn delay(&self) -> DriverDelay {
        self.delay
    }

    /// Replace the current observer with a fresh channel.
    pub fn subscribe(&self) -> Receiver<DriverEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        *self
            .shared
            .observer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(tx);
        rx
    }
}

impl PipelineAnimator for Driver {
    fn pipeline_driver_delay_jiffies(&self, from_rate: u32, to_rate: u32) -> u32 {
        self.delay.pipeline_driver_delay_jiffies(from_rate, to_rate)
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        if self.join.is_some() {
            if let Err(e) = self.stop() {
                tracing::warn!("driver stop on drop: {e}");
            }
        }
    }
}

fn fail(action: FatalAction, err: &DriverError) -> ! {
    tracing::error!("animator fatal error: {err}");
    match action {
        FatalAction::Abort => std::process::abort(),
        FatalAction::Panic => panic!("animator fatal error: {err}"),
    }
}
