// Job queue and single-flight scheduler.
//
// One actor task owns the queue, the set of in-flight URLs and the transcode
// adapter. While an attempt runs, the adapter lives inside that attempt's task
// and comes back with its outcome, so two jobs can never share the engine.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use url::Url;

use crate::config::GrabberConfig;
use crate::engine::{TranscodeAdapter, TranscodeEngine};
use crate::error::DownloadError;
use crate::events::{JobEvents, JobId, MediaArtifact, ProgressEvent, ProgressReporter};
use crate::fetcher::{HttpSource, SegmentFetcher};
use crate::pipeline;

/// What a caller asks for: a manifest URL and the artifact's base name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: Url,
    /// File name without extension; the container decides the extension.
    pub output_name: String,
}

impl DownloadRequest {
    pub fn new(url: Url, output_name: impl Into<String>) -> Self {
        Self {
            url,
            output_name: output_name.into(),
        }
    }

    /// Parses `url`, accepting only `http` and `https`.
    pub fn parse(url: &str, output_name: impl Into<String>) -> Result<Self, DownloadError> {
        let parsed =
            Url::parse(url.trim()).map_err(|e| DownloadError::invalid_url(url, e.to_string()))?;
        match parsed.scheme() {
            "http" | "https" => Ok(Self::new(parsed, output_name)),
            other => Err(DownloadError::invalid_url(
                url,
                format!("unsupported scheme `{other}`"),
            )),
        }
    }
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub active: Option<JobId>,
    /// Waiting jobs in the order they will run.
    pub queued: Vec<JobId>,
}

impl QueueSnapshot {
    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.queued.is_empty()
    }
}

enum Command {
    Submit(Submission),
    Cancel(JobId),
    Snapshot(oneshot::Sender<QueueSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

struct Submission {
    id: JobId,
    request: DownloadRequest,
    events: mpsc::UnboundedSender<ProgressEvent>,
}

struct DownloadJob {
    id: JobId,
    request: DownloadRequest,
    events: mpsc::UnboundedSender<ProgressEvent>,
    token: CancellationToken,
    /// Failed attempts so far.
    attempt_count: u32,
}

impl DownloadJob {
    fn reporter(&self) -> ProgressReporter {
        ProgressReporter::new(self.id, self.attempt_count + 1, self.events.clone())
    }
}

struct ActiveJob {
    id: JobId,
    token: CancellationToken,
    reporter: ProgressReporter,
}

struct AttemptOutcome {
    job: DownloadJob,
    adapter: TranscodeAdapter,
    result: Result<MediaArtifact, DownloadError>,
}

/// Cheap, cloneable front door to a running [`Scheduler`].
///
/// The scheduler keeps working through its queue after the last handle is
/// dropped and exits once the queue is empty.
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl SchedulerHandle {
    /// Queues a download and returns its event stream.
    ///
    /// A URL that is already queued or running is dropped silently: the
    /// returned stream ends without yielding anything.
    pub fn submit(&self, request: DownloadRequest) -> JobEvents {
        let id = JobId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let submission = Submission {
            id,
            request,
            events: tx,
        };

        if let Err(mpsc::error::SendError(Command::Submit(rejected))) =
            self.commands.send(Command::Submit(submission))
        {
            warn!(job_id = %id, "Scheduler has stopped, rejecting submission");
            ProgressReporter::new(id, 1, rejected.events).fail(DownloadError::Cancelled);
        }
        JobEvents::new(id, rx)
    }

    /// Cancels a queued or running job. Unknown ids are ignored.
    pub fn cancel(&self, job_id: JobId) {
        let _ = self.commands.send(Command::Cancel(job_id));
    }

    /// Returns `None` once the scheduler has stopped.
    pub async fn snapshot(&self) -> Option<QueueSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Snapshot(tx)).ok()?;
        rx.await.ok()
    }

    /// Cancels every job, waits for the running attempt to wind down and
    /// unloads the engine.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

pub struct Scheduler {
    max_retries: u32,
    fetcher: SegmentFetcher,
    /// `None` while an attempt owns it.
    adapter: Option<TranscodeAdapter>,
    queue: VecDeque<DownloadJob>,
    /// URLs of every queued or running job.
    in_flight: HashSet<Url>,
    active: Option<ActiveJob>,
    commands: mpsc::UnboundedReceiver<Command>,
    token: CancellationToken,
    accepting: bool,
    shutdown_acks: Vec<oneshot::Sender<()>>,
}

impl Scheduler {
    /// Starts the scheduler on the current tokio runtime.
    pub fn spawn(
        config: &GrabberConfig,
        source: Arc<dyn HttpSource>,
        engine: Box<dyn TranscodeEngine>,
    ) -> SchedulerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            max_retries: config.scheduler.max_retries.max(1),
            fetcher: SegmentFetcher::new(source),
            adapter: Some(TranscodeAdapter::new(engine, &config.engine)),
            queue: VecDeque::new(),
            in_flight: HashSet::new(),
            active: None,
            commands: rx,
            token: CancellationToken::new(),
            accepting: true,
            shutdown_acks: Vec::new(),
        };
        tokio::spawn(scheduler.run().instrument(info_span!("scheduler")));
        SchedulerHandle { commands: tx }
    }

    async fn run(mut self) {
        let mut running: Option<JoinHandle<AttemptOutcome>> = None;

        loop {
            if running.is_none() {
                running = self.start_next();
                if running.is_none() && !self.accepting {
                    break;
                }
            }

            tokio::select! {
                joined = join_running(&mut running) => {
                    running = None;
                    match joined {
                        Ok(outcome) => self.finish(outcome),
                        Err(e) => {
                            self.abandon(e);
                            break;
                        }
                    }
                }
                command = self.commands.recv(), if self.accepting => match command {
                    Some(command) => self.handle(command),
                    None => {
                        debug!(queued = self.queue.len(), "All handles dropped, draining queue");
                        self.accepting = false;
                    }
                },
            }
        }

        if let Some(adapter) = self.adapter.as_mut() {
            adapter.shutdown().await;
        }

        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Submit(submission) => {
                    ProgressReporter::new(submission.id, 1, submission.events)
                        .fail(DownloadError::Cancelled);
                }
                Command::Shutdown(ack) => self.shutdown_acks.push(ack),
                Command::Snapshot(_) | Command::Cancel(_) => {}
            }
        }
        for ack in self.shutdown_acks.drain(..) {
            let _ = ack.send(());
        }
        info!("Scheduler stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Submit(submission) => self.enqueue(submission),
            Command::Cancel(job_id) => self.cancel(job_id),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown(ack) => {
                self.shutdown_acks.push(ack);
                self.begin_shutdown();
            }
        }
    }

    fn enqueue(&mut self, submission: Submission) {
        let Submission {
            id,
            request,
            events,
        } = submission;

        if !self.in_flight.insert(request.url.clone()) {
            debug!(url = %request.url, "Dropping duplicate submission");
            return;
        }

        info!(
            job_id = %id,
            url = %request.url,
            output = %request.output_name,
            ahead = self.queue.len() + usize::from(self.active.is_some()),
            "Job queued"
        );
        self.queue.push_back(DownloadJob {
            id,
            request,
            events,
            token: self.token.child_token(),
            attempt_count: 0,
        });
    }

    fn cancel(&mut self, job_id: JobId) {
        if let Some(index) = self.queue.iter().position(|job| job.id == job_id) {
            if let Some(job) = self.queue.remove(index) {
                info!(job_id = %job_id, "Cancelled queued job");
                job.token.cancel();
                job.reporter().fail(DownloadError::Cancelled);
                self.retire(&job);
            }
            return;
        }

        match &self.active {
            Some(active) if active.id == job_id => {
                info!(job_id = %job_id, "Cancelling running job");
                active.token.cancel();
            }
            _ => debug!(job_id = %job_id, "Cancel for unknown job ignored"),
        }
    }

    fn begin_shutdown(&mut self) {
        if !self.accepting {
            return;
        }
        info!(
            queued = self.queue.len(),
            running = self.active.is_some(),
            "Scheduler shutting down"
        );
        self.accepting = false;
        self.token.cancel();
        while let Some(job) = self.queue.pop_front() {
            job.reporter().fail(DownloadError::Cancelled);
            self.retire(&job);
        }
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            active: self.active.as_ref().map(|active| active.id),
            queued: self.queue.iter().map(|job| job.id).collect(),
        }
    }

    fn start_next(&mut self) -> Option<JoinHandle<AttemptOutcome>> {
        let mut adapter = self.adapter.take()?;
        let Some(job) = self.queue.pop_front() else {
            self.adapter = Some(adapter);
            return None;
        };

        let reporter = job.reporter();
        info!(
            job_id = %job.id,
            url = %job.request.url,
            attempt = reporter.attempt(),
            max_attempts = self.max_retries,
            "Starting download"
        );
        self.active = Some(ActiveJob {
            id: job.id,
            token: job.token.clone(),
            reporter: reporter.clone(),
        });

        let fetcher = self.fetcher.clone();
        let span = info_span!("job", job_id = %job.id);
        let task = async move {
            let result =
                pipeline::run_attempt(&fetcher, &mut adapter, &job.request, &reporter, &job.token)
                    .await;
            if let Err(e) = adapter.restart().await {
                warn!(error = %e, "Engine recycle failed, the next attempt will load it again");
            }
            AttemptOutcome {
                job,
                adapter,
                result,
            }
        };
        Some(tokio::spawn(task.instrument(span)))
    }

    fn finish(&mut self, outcome: AttemptOutcome) {
        let AttemptOutcome {
            mut job,
            adapter,
            result,
        } = outcome;
        self.adapter = Some(adapter);
        self.active = None;
        let reporter = job.reporter();

        match result {
            Ok(artifact) => {
                info!(
                    job_id = %job.id,
                    file = %artifact.file_name,
                    size = artifact.data.len(),
                    attempt = reporter.attempt(),
                    "Download complete"
                );
                reporter.complete(artifact);
                self.retire(&job);
            }
            Err(e) if !e.is_retryable() || job.token.is_cancelled() => {
                info!(job_id = %job.id, "Download cancelled");
                reporter.fail(DownloadError::Cancelled);
                self.retire(&job);
            }
            Err(e) => {
                job.attempt_count += 1;
                if job.attempt_count < self.max_retries {
                    warn!(
                        job_id = %job.id,
                        attempt = job.attempt_count,
                        max_attempts = self.max_retries,
                        kind = %e.kind(),
                        error = %e,
                        "Download attempt failed, requeueing at the tail"
                    );
                    self.queue.push_back(job);
                } else {
                    error!(
                        job_id = %job.id,
                        attempts = job.attempt_count,
                        kind = %e.kind(),
                        error = %e,
                        "Download failed permanently"
                    );
                    reporter.fail(e);
                    self.retire(&job);
                }
            }
        }
    }

    /// The attempt task died and took the engine with it; nothing more can run.
    fn abandon(&mut self, cause: JoinError) {
        error!(error = %cause, "Download task aborted, transcoding engine lost");
        let lost = DownloadError::engine_load("transcoding engine lost with an aborted task");
        if let Some(active) = self.active.take() {
            active.reporter.fail(lost.clone());
        }
        while let Some(job) = self.queue.pop_front() {
            job.reporter().fail(lost.clone());
        }
        self.in_flight.clear();
        self.accepting = false;
    }

    fn retire(&mut self, job: &DownloadJob) {
        self.in_flight.remove(&job.request.url);
    }
}

async fn join_running(
    running: &mut Option<JoinHandle<AttemptOutcome>>,
) -> Result<AttemptOutcome, JoinError> {
    match running {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}
