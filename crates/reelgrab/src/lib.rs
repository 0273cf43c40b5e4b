//! HLS acquisition engine: resolve a master playlist to its best variant,
//! download the segments in order, remux them with ffmpeg and report progress,
//! one job at a time.

pub mod backoff;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod manifest;
pub mod pipeline;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod test_support;

pub use backoff::ReloadBackoff;
pub use config::{EngineConfig, FetchConfig, GrabberConfig, SchedulerConfig};
pub use engine::{EngineState, FfmpegEngine, TranscodeAdapter, TranscodeEngine};
pub use error::{DownloadError, ErrorKind};
pub use events::{JobEvents, JobId, MediaArtifact, ProgressEvent, ProgressReporter};
pub use fetcher::{HttpClient, HttpSource, SegmentFetcher};
pub use scheduler::{DownloadRequest, QueueSnapshot, Scheduler, SchedulerHandle};
