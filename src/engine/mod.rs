// Batch transcoding engine - independent of the CLI

pub mod batch;
pub mod core;
pub mod error;
pub mod probe;
pub mod supervisor;
pub mod worker;

pub use batch::{BatchEngine, BatchSession};
pub use self::core::*;
pub use error::{EngineError, JobError, ProbeError};
pub use probe::{FfprobeProber, MediaProber, parse_ffprobe_output};
pub use supervisor::{ProcessHandle, ProcessOutcome, RunningProcess, TERMINATE_GRACE};
pub use worker::{BatchEvent, BatchObserver, ChannelObserver, NoopObserver};
