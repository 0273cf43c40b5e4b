use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::backoff::ReloadBackoff;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Attempts a job may consume before it fails permanently.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// HTTP settings for manifest and segment requests.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Overall timeout for a single request, body included
    pub timeout: Duration,

    /// Time allowed to establish a connection
    pub connect_timeout: Duration,

    /// User agent string
    pub user_agent: String,

    /// Headers sent with every request; merged over the defaults
    pub headers: HeaderMap,

    /// Whether to follow redirects
    pub follow_redirects: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: Self::get_default_headers(),
            follow_redirects: true,
        }
    }
}

impl FetchConfig {
    /// Returns a copy with `extra` layered over the current headers.
    pub fn with_headers(mut self, extra: HeaderMap) -> Self {
        for (name, value) in extra.iter() {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("*/*"),
        );

        default_headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.5"),
        );

        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );
        default_headers
    }
}

/// Settings for the external remux engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// ffmpeg binary; `FFMPEG_PATH` or `ffmpeg` from `PATH` by default.
    pub ffmpeg_path: String,

    /// Output container extension, e.g. `mp4` or `mkv`.
    pub container: String,

    /// Move the moov atom to the front for mp4-family outputs.
    pub faststart: bool,

    /// Parent directory for the engine's scratch space; system temp dir when unset.
    pub scratch_root: Option<PathBuf>,

    /// Pacing of engine reloads between jobs.
    pub reload_backoff: ReloadBackoff,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            container: "mp4".to_string(),
            faststart: true,
            scratch_root: None,
            reload_backoff: ReloadBackoff::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Attempts per job, the first one included.
    pub max_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Everything needed to stand up a scheduler with the real network and engine.
#[derive(Debug, Clone, Default)]
pub struct GrabberConfig {
    pub fetch: FetchConfig,
    pub engine: EngineConfig,
    pub scheduler: SchedulerConfig,
}
