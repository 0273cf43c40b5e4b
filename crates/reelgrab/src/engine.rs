// Transcode adapter: owns the remux engine and its load/busy/reload lifecycle.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};

use crate::backoff::ReloadBackoff;
use crate::config::EngineConfig;
use crate::error::DownloadError;
use crate::events::ProgressReporter;
use crate::pipeline::REMUX_STARTED;

/// Name of the concatenated transport stream inside the engine's workspace.
pub const INPUT_NAME: &str = "input.ts";

const STDERR_TAIL_LINES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Unloaded,
    Loaded,
    Busy,
}

/// A remux engine with its own scratch filesystem.
///
/// Calls only happen through [`TranscodeAdapter`], one at a time.
#[async_trait]
pub trait TranscodeEngine: Send {
    /// Brings the engine up. Loading an already loaded engine starts it afresh.
    async fn load(&mut self) -> Result<(), DownloadError>;

    /// Tears the engine down and drops its scratch files.
    async fn unload(&mut self) -> Result<(), DownloadError>;

    fn is_loaded(&self) -> bool;

    async fn write_input(&mut self, name: &str, data: &[u8]) -> Result<(), DownloadError>;

    /// Runs one invocation with `args`, relative paths resolving inside the scratch space.
    async fn run(&mut self, args: &[String]) -> Result<(), DownloadError>;

    async fn read_output(&mut self, name: &str) -> Result<Bytes, DownloadError>;
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
fn ffmpeg_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    #[allow(unused_mut)]
    let mut cmd = tokio::process::Command::new(program);
    #[cfg(windows)]
    {
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    cmd
}

/// [`TranscodeEngine`] driving an `ffmpeg` binary inside a private temp directory.
#[derive(Debug)]
pub struct FfmpegEngine {
    ffmpeg_path: String,
    scratch_root: Option<PathBuf>,
    scratch: Option<TempDir>,
}

impl FfmpegEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            scratch_root: config.scratch_root.clone(),
            scratch: None,
        }
    }

    fn workspace(&self) -> Result<&Path, DownloadError> {
        self.scratch
            .as_ref()
            .map(TempDir::path)
            .ok_or_else(|| DownloadError::engine_load("engine is not loaded"))
    }

    fn create_scratch(&self) -> std::io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("reelgrab-");
        match &self.scratch_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
    }
}

#[async_trait]
impl TranscodeEngine for FfmpegEngine {
    async fn load(&mut self) -> Result<(), DownloadError> {
        let output = ffmpeg_command(&self.ffmpeg_path)
            .arg("-version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                DownloadError::engine_load(format!("cannot run {}: {e}", self.ffmpeg_path))
            })?;
        if !output.status.success() {
            return Err(DownloadError::engine_load(format!(
                "{} -version exited with {}",
                self.ffmpeg_path, output.status
            )));
        }

        let banner = String::from_utf8_lossy(&output.stdout);
        let version = banner.lines().next().unwrap_or_default();
        debug!(path = %self.ffmpeg_path, version, "Probed ffmpeg");

        // replacing the old TempDir drops it, which deletes the previous workspace
        let scratch = self.create_scratch().map_err(|e| {
            DownloadError::engine_load(format!("cannot create engine workspace: {e}"))
        })?;
        debug!(workspace = %scratch.path().display(), "Engine workspace ready");
        self.scratch = Some(scratch);
        Ok(())
    }

    async fn unload(&mut self) -> Result<(), DownloadError> {
        if let Some(scratch) = self.scratch.take() {
            let path = scratch.path().to_path_buf();
            scratch.close().map_err(|e| {
                DownloadError::engine_load(format!(
                    "failed to remove engine workspace {}: {e}",
                    path.display()
                ))
            })?;
        }
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.scratch.is_some()
    }

    async fn write_input(&mut self, name: &str, data: &[u8]) -> Result<(), DownloadError> {
        let path = self.workspace()?.join(name);
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| DownloadError::transcode(format!("failed to stage {name}: {e}")))
    }

    async fn run(&mut self, args: &[String]) -> Result<(), DownloadError> {
        let workspace = self.workspace()?.to_path_buf();
        debug!(command = %format!("{} {}", self.ffmpeg_path, args.join(" ")), "Running ffmpeg");

        let output = ffmpeg_command(&self.ffmpeg_path)
            .args(args)
            .current_dir(&workspace)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DownloadError::transcode(format!("failed to spawn ffmpeg: {e}")))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
        let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
        warn!(status = %output.status, stderr = %tail, "ffmpeg failed");
        Err(DownloadError::transcode(format!(
            "ffmpeg exited with {}: {tail}",
            output.status
        )))
    }

    async fn read_output(&mut self, name: &str) -> Result<Bytes, DownloadError> {
        let path = self.workspace()?.join(name);
        tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| DownloadError::transcode(format!("missing engine output {name}: {e}")))
    }
}

/// Lowercases a container name and strips a leading dot.
pub fn normalize_container(container: &str) -> String {
    let trimmed = container.trim().trim_start_matches('.').to_ascii_lowercase();
    if trimmed.is_empty() {
        "mp4".to_string()
    } else {
        trimmed
    }
}

/// Stream-copy arguments: every stream of `input` goes into `output` untouched.
pub fn remux_args(input: &str, output: &str, container: &str, faststart: bool) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-hide_banner".into(),
        "-nostdin".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        input.into(),
        "-map".into(),
        "0".into(),
        "-c".into(),
        "copy".into(),
    ];

    if faststart && matches!(container, "mp4" | "mov" | "m4v") {
        args.push("-movflags".into());
        args.push("+faststart".into());
    }

    args.push(output.into());
    args
}

/// Serializes access to a [`TranscodeEngine`] and tracks its lifecycle.
pub struct TranscodeAdapter {
    engine: Box<dyn TranscodeEngine>,
    state: EngineState,
    container: String,
    faststart: bool,
    reload_backoff: ReloadBackoff,
}

impl TranscodeAdapter {
    pub fn new(engine: Box<dyn TranscodeEngine>, config: &EngineConfig) -> Self {
        Self {
            engine,
            state: EngineState::Unloaded,
            container: normalize_container(&config.container),
            faststart: config.faststart,
            reload_backoff: config.reload_backoff.clone(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Loads the engine unless it already is. Idempotent.
    pub async fn ensure_loaded(&mut self) -> Result<(), DownloadError> {
        match self.state {
            EngineState::Loaded => Ok(()),
            EngineState::Busy => Err(DownloadError::engine_load(
                "engine is still busy with a previous remux",
            )),
            EngineState::Unloaded => {
                self.engine.load().await.map_err(into_engine_load)?;
                self.state = EngineState::Loaded;
                info!("Transcoding engine loaded");
                Ok(())
            }
        }
    }

    /// Remuxes a concatenated transport stream into the configured container.
    #[instrument(skip_all, fields(input_size = input.len(), container = %self.container))]
    pub async fn remux(
        &mut self,
        input: &[u8],
        reporter: &ProgressReporter,
    ) -> Result<Bytes, DownloadError> {
        self.ensure_loaded().await?;
        reporter.report(REMUX_STARTED);

        self.state = EngineState::Busy;
        let result = self.run_remux(input).await;
        self.state = EngineState::Loaded;

        let output = result?;
        debug!(output_size = output.len(), "Remux finished");
        Ok(output)
    }

    async fn run_remux(&mut self, input: &[u8]) -> Result<Bytes, DownloadError> {
        let output_name = format!("output.{}", self.container);
        let args = remux_args(INPUT_NAME, &output_name, &self.container, self.faststart);

        self.engine.write_input(INPUT_NAME, input).await?;
        self.engine.run(&args).await?;
        let output = self.engine.read_output(&output_name).await?;
        if output.is_empty() {
            return Err(DownloadError::transcode("engine produced an empty output"));
        }
        Ok(output)
    }

    /// Tears the engine down and brings it back up with a clean workspace.
    ///
    /// Reloading is retried with backoff. When every try fails the adapter stays
    /// `Unloaded` and the next job's `ensure_loaded` tries again.
    pub async fn restart(&mut self) -> Result<(), DownloadError> {
        if let Err(e) = self.engine.unload().await {
            warn!(error = %e, "Engine unload failed, reloading anyway");
        }
        self.state = EngineState::Unloaded;

        let mut pauses = self.reload_backoff.pauses();
        let mut tries = 1;
        while let Err(err) = self.engine.load().await {
            let Some(pause) = pauses.next() else {
                return Err(into_engine_load(err));
            };
            warn!(
                tries,
                pause_ms = pause.as_millis() as u64,
                error = %err,
                "Engine reload failed, pausing before the next try"
            );
            tokio::time::sleep(pause).await;
            tries += 1;
        }

        self.state = EngineState::Loaded;
        debug!("Transcoding engine recycled");
        Ok(())
    }

    /// Unloads the engine for good.
    pub async fn shutdown(&mut self) {
        if self.state == EngineState::Unloaded {
            return;
        }
        if let Err(e) = self.engine.unload().await {
            warn!(error = %e, "Engine unload failed during shutdown");
        }
        self.state = EngineState::Unloaded;
    }
}

fn into_engine_load(err: DownloadError) -> DownloadError {
    match err {
        DownloadError::EngineLoad { .. } => err,
        other => DownloadError::engine_load(other.to_string()),
    }
}
