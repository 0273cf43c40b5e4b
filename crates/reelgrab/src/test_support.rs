//! In-memory doubles for the network and the transcoding engine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use tokio::sync::Semaphore;
use url::Url;

use crate::engine::TranscodeEngine;
use crate::error::DownloadError;
use crate::fetcher::HttpSource;

/// Initialize tracing for tests with appropriate settings
#[inline]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Serves fixed bodies by URL and records every request in order.
///
/// Unknown URLs answer 404. With a gate installed, every request takes one
/// permit before it is answered, which lets a test hold a job mid-flight.
#[derive(Default)]
pub struct MemorySource {
    routes: Mutex<HashMap<String, Bytes>>,
    failures: Mutex<HashMap<String, u32>>,
    requests: Mutex<Vec<String>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MemorySource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_route(self: Arc<Self>, url: &str, body: &[u8]) -> Arc<Self> {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Bytes::copy_from_slice(body));
        self
    }

    /// Fails the next `times` requests for `url` with a transport error.
    pub fn with_failures(self: Arc<Self>, url: &str, times: u32) -> Arc<Self> {
        self.failures.lock().unwrap().insert(url.to_string(), times);
        self
    }

    pub fn with_gate(self: Arc<Self>, gate: Arc<Semaphore>) -> Arc<Self> {
        *self.gate.lock().unwrap() = Some(gate);
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpSource for MemorySource {
    async fn get(&self, url: &Url) -> Result<Bytes, DownloadError> {
        self.requests.lock().unwrap().push(url.to_string());

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire()
                .await
                .map_err(|_| {
                    DownloadError::http_status(StatusCode::SERVICE_UNAVAILABLE, url.as_str(), "GET")
                })?
                .forget();
        }

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(url.as_str()).filter(|n| **n > 0) {
                *remaining -= 1;
                return Err(DownloadError::network(url.as_str(), transport_error()));
            }
        }

        self.routes
            .lock()
            .unwrap()
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| DownloadError::http_status(StatusCode::NOT_FOUND, url.as_str(), "GET"))
    }
}

/// A genuine `reqwest` error, built without touching the network.
pub fn transport_error() -> reqwest::Error {
    reqwest::Client::new()
        .get("connection reset")
        .build()
        .unwrap_err()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCall {
    Load,
    Unload,
    Run,
}

#[derive(Default)]
struct Script {
    calls: Vec<EngineCall>,
    runs: Vec<Vec<String>>,
    failing_loads: u32,
    failing_runs: u32,
    loaded: bool,
    files: HashMap<String, Bytes>,
    last_input: Option<Vec<u8>>,
}

/// Engine that "remuxes" by prefixing the input with the output extension.
///
/// Clones share one script, so a test keeps a clone to inspect the calls.
#[derive(Clone, Default)]
pub struct ScriptedEngine {
    script: Arc<Mutex<Script>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_loads(self, times: u32) -> Self {
        self.script.lock().unwrap().failing_loads = times;
        self
    }

    pub fn failing_runs(self, times: u32) -> Self {
        self.script.lock().unwrap().failing_runs = times;
        self
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn count(&self, call: EngineCall) -> usize {
        self.calls().into_iter().filter(|c| *c == call).count()
    }

    pub fn runs(&self) -> Vec<Vec<String>> {
        self.script.lock().unwrap().runs.clone()
    }

    pub fn last_input(&self) -> Option<Vec<u8>> {
        self.script.lock().unwrap().last_input.clone()
    }
}

#[async_trait]
impl TranscodeEngine for ScriptedEngine {
    async fn load(&mut self) -> Result<(), DownloadError> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(EngineCall::Load);
        if script.failing_loads > 0 {
            script.failing_loads -= 1;
            return Err(DownloadError::engine_load("scripted load failure"));
        }
        script.files.clear();
        script.loaded = true;
        Ok(())
    }

    async fn unload(&mut self) -> Result<(), DownloadError> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(EngineCall::Unload);
        script.files.clear();
        script.loaded = false;
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.script.lock().unwrap().loaded
    }

    async fn write_input(&mut self, name: &str, data: &[u8]) -> Result<(), DownloadError> {
        let mut script = self.script.lock().unwrap();
        if !script.loaded {
            return Err(DownloadError::engine_load("engine is not loaded"));
        }
        script.files.insert(name.to_string(), Bytes::copy_from_slice(data));
        script.last_input = Some(data.to_vec());
        Ok(())
    }

    async fn run(&mut self, args: &[String]) -> Result<(), DownloadError> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(EngineCall::Run);
        script.runs.push(args.to_vec());
        if !script.loaded {
            return Err(DownloadError::engine_load("engine is not loaded"));
        }
        if script.failing_runs > 0 {
            script.failing_runs -= 1;
            return Err(DownloadError::transcode("scripted remux failure"));
        }

        let input_index = args.iter().position(|a| a == "-i").map(|i| i + 1);
        let input = input_index
            .and_then(|i| args.get(i))
            .and_then(|name| script.files.get(name).cloned())
            .ok_or_else(|| DownloadError::transcode("input not staged"))?;
        let output = args.last().cloned().unwrap_or_default();
        let extension = output.rsplit('.').next().unwrap_or_default().to_string();

        let mut data = format!("{extension}:").into_bytes();
        data.extend_from_slice(&input);
        script.files.insert(output, Bytes::from(data));
        Ok(())
    }

    async fn read_output(&mut self, name: &str) -> Result<Bytes, DownloadError> {
        self.script
            .lock()
            .unwrap()
            .files
            .get(name)
            .cloned()
            .ok_or_else(|| DownloadError::transcode(format!("missing engine output {name}")))
    }
}
