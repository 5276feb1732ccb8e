/// What the animator thread does when it hits a fatal error.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FatalAction {
    /// Log and abort the process.
    #[default]
    Abort,
    /// Panic the animator thread; the panic surfaces from `Driver::stop`/`Driver::join`.
    Panic,
}

/// Animator tuning parameters.
#[derive(Clone, Debug)]
pub struct DriverConfig {
    /// Buffers filled before the endpoint clock starts. Clamped to `1..=buffer_count`.
    pub prime_buffers: usize,
    /// Output frames of buffering reported as delay when source and output rates differ.
    pub buffering_frames: u32,
    pub fatal: FatalAction,
    pub thread_name: String,
}

impl Default for DriverConfig {
    /// Three primed buffers of 1024 frames, matching the default endpoint ring.
    fn default() -> Self {
        Self {
            prime_buffers: 3,
            buffering_frames: 3 * 1024,
            fatal: FatalAction::Abort,
            thread_name: "PipelineAnimator".into(),
        }
    }
}
