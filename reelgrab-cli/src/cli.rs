use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use reelgrab_engine::{EngineConfig, FetchConfig, GrabberConfig, SchedulerConfig};

use crate::error::Result;
use crate::input::parse_headers;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Master or media playlist URLs, downloaded one after another
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Output file name without extension (single URL only; numbered otherwise)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Directory the finished files are written to
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Path to the ffmpeg binary
    #[arg(long, env = "FFMPEG_PATH")]
    pub ffmpeg: Option<String>,

    /// Output container
    #[arg(long, default_value = "mp4")]
    pub container: String,

    /// Keep the moov atom at the end of mp4 outputs
    #[arg(long)]
    pub no_faststart: bool,

    /// Attempts per download before giving up
    #[arg(long, default_value_t = 3)]
    pub retries: u32,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,

    /// Custom User-Agent header
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Extra request header, `Name: value` (repeatable)
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Print progress as JSON lines instead of progress bars
    #[arg(long)]
    pub json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Only log errors and hide progress bars
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Args {
    pub fn to_config(&self) -> Result<GrabberConfig> {
        let mut fetch = FetchConfig {
            timeout: Duration::from_secs(self.timeout.max(1)),
            ..FetchConfig::default()
        };
        if let Some(user_agent) = &self.user_agent {
            fetch.user_agent = user_agent.clone();
        }
        let fetch = fetch.with_headers(parse_headers(&self.headers)?);

        let mut engine = EngineConfig {
            container: self.container.clone(),
            faststart: !self.no_faststart,
            ..EngineConfig::default()
        };
        if let Some(ffmpeg) = &self.ffmpeg {
            engine.ffmpeg_path = ffmpeg.clone();
        }

        Ok(GrabberConfig {
            fetch,
            engine,
            scheduler: SchedulerConfig {
                max_retries: self.retries.max(1),
            },
        })
    }
}
