pub mod animator;
pub mod config;
pub mod delay;
pub mod device;
pub mod driver;
pub mod error;
pub mod format;
pub mod host;
pub mod jiffies;
pub mod msg;
pub mod pcm;
pub mod status;
pub mod volume;

pub use animator::Animator;
pub use config::{DriverConfig, FatalAction};
pub use delay::{DriverDelay, PipelineAnimator};
pub use driver::Driver;
pub use error::{DriverError, Result};
pub use format::AudioFormat;
pub use host::{EndpointConfig, EndpointHandles, HostEndpoint, HwBuffer, PlaybackCounters};
pub use msg::{DecodedStreamInfo, Msg, MsgKind, PcmChunk, Pipeline};
pub use status::{DriverEvent, DriverState, StatusSnapshot};
