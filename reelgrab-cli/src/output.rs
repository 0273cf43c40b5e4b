use std::path::{Path, PathBuf};
use std::time::Duration;

use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressStyle};
use reelgrab_engine::{DownloadError, ErrorKind, JobId, MediaArtifact, ProgressEvent};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;

/// Writes a finished artifact into `dir`, creating the directory if needed.
pub async fn write_artifact(dir: &Path, artifact: &MediaArtifact) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(&artifact.file_name);
    tokio::fs::write(&path, &artifact.data).await?;
    info!(
        path = %path.display(),
        size = %HumanBytes(artifact.data.len() as u64),
        "Saved file"
    );
    Ok(path)
}

/// How per-job progress is shown.
#[derive(Clone)]
pub enum Renderer {
    Bars(MultiProgress),
    Json,
    Hidden,
}

impl Renderer {
    pub fn new(json: bool, quiet: bool) -> Self {
        if json {
            Self::Json
        } else if quiet {
            Self::Hidden
        } else {
            Self::Bars(MultiProgress::new())
        }
    }

    pub fn track(&self, label: &str) -> JobView {
        let bar = match self {
            Self::Bars(multi) => {
                let bar = multi.add(ProgressBar::new(100));
                bar.set_style(bar_style());
                bar.set_prefix(label.to_string());
                bar.enable_steady_tick(Duration::from_millis(120));
                Some(bar)
            }
            Self::Json | Self::Hidden => None,
        };
        JobView {
            label: label.to_string(),
            bar,
            json: matches!(self, Self::Json),
        }
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.blue} {prefix:.bold} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// One JSON line per event in `--json` mode.
#[derive(Debug, Serialize)]
struct EventLine<'a> {
    job_id: JobId,
    name: &'a str,
    attempt: u32,
    percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<String>,
}

/// Progress display for one job.
pub struct JobView {
    label: String,
    bar: Option<ProgressBar>,
    json: bool,
}

impl JobView {
    pub fn update(&self, event: &ProgressEvent) {
        if let Some(bar) = &self.bar {
            if event.attempt > 1 {
                bar.set_message(format!("attempt {}", event.attempt));
            }
            bar.set_position(u64::from(event.percent));
        }
        if self.json && !event.is_terminal() {
            self.emit(event, None);
        }
    }

    pub fn saved(&self, event: &ProgressEvent, path: &Path) {
        if let Some(bar) = &self.bar {
            bar.finish_with_message(format!("saved {}", path.display()));
        }
        if self.json {
            self.emit(event, Some(path));
        }
    }

    pub fn failed(&self, event: &ProgressEvent, error: &DownloadError) {
        if let Some(bar) = &self.bar {
            bar.abandon_with_message(format!("{} error: {error}", error.kind()));
        }
        if self.json {
            self.emit(event, None);
        }
    }

    /// The submission was a duplicate of a job already in flight.
    pub fn skipped(&self) {
        debug!(name = %self.label, "Duplicate URL, nothing to do");
        if let Some(bar) = &self.bar {
            bar.finish_with_message("duplicate, skipped");
        }
    }

    fn emit(&self, event: &ProgressEvent, file: Option<&Path>) {
        let line = EventLine {
            job_id: event.job_id,
            name: &self.label,
            attempt: event.attempt,
            percent: event.percent,
            kind: event.error.as_ref().map(DownloadError::kind),
            error: event.error.as_ref().map(ToString::to_string),
            file: file.map(|p| p.display().to_string()),
        };
        if let Ok(json) = serde_json::to_string(&line) {
            println!("{json}");
        }
    }
}
