use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::DownloadError;

/// Correlates a submission with the events it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// The finished container, ready to be written as `file_name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaArtifact {
    pub file_name: String,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub job_id: JobId,
    /// 1-based attempt that produced this event.
    pub attempt: u32,
    /// Percentage in `0..=100`; restarts at 0 with every attempt.
    pub percent: u8,
    /// Set only on a terminal failure.
    pub error: Option<DownloadError>,
    /// Set only on terminal success.
    pub payload: Option<MediaArtifact>,
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        self.error.is_some() || self.payload.is_some()
    }
}

/// Sends the events of one job attempt to the job's subscriber.
///
/// Delivery is fire-and-forget: a subscriber that went away is not an error.
#[derive(Clone)]
pub struct ProgressReporter {
    job_id: JobId,
    attempt: u32,
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressReporter {
    pub fn new(job_id: JobId, attempt: u32, tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self {
            job_id,
            attempt,
            tx,
        }
    }

    pub fn noop(job_id: JobId) -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self::new(job_id, 1, tx)
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn report(&self, percent: u8) {
        self.send(percent.min(100), None, None);
    }

    pub fn complete(&self, artifact: MediaArtifact) {
        self.send(100, None, Some(artifact));
    }

    pub fn fail(&self, error: DownloadError) {
        self.send(0, Some(error), None);
    }

    fn send(&self, percent: u8, error: Option<DownloadError>, payload: Option<MediaArtifact>) {
        let _ = self.tx.send(ProgressEvent {
            job_id: self.job_id,
            attempt: self.attempt,
            percent,
            error,
            payload,
        });
    }
}

/// The event stream of a single submission.
///
/// Finite and not restartable: it ends after the terminal event, or right away
/// when the submission was dropped as a duplicate.
pub struct JobEvents {
    job_id: JobId,
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl JobEvents {
    pub(crate) fn new(job_id: JobId, rx: mpsc::UnboundedReceiver<ProgressEvent>) -> Self {
        Self { job_id, rx }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    /// Drains the stream and returns its terminal event, if one arrives.
    pub async fn wait(mut self) -> Option<ProgressEvent> {
        while let Some(event) = self.rx.recv().await {
            if event.is_terminal() {
                return Some(event);
            }
        }
        None
    }
}

impl Stream for JobEvents {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn reporter_events_reach_the_stream_in_order() {
        let job_id = JobId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let reporter = ProgressReporter::new(job_id, 2, tx);

        reporter.report(0);
        reporter.report(15);
        reporter.complete(MediaArtifact {
            file_name: "clip.mp4".to_string(),
            data: Bytes::from_static(b"moov"),
        });
        drop(reporter);

        let events: Vec<_> = JobEvents::new(job_id, rx).collect().await;
        let percents: Vec<_> = events.iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![0, 15, 100]);
        assert!(events.iter().all(|e| e.job_id == job_id && e.attempt == 2));
        assert!(events[2].is_terminal());
        assert!(!events[1].is_terminal());
    }

    #[tokio::test]
    async fn wait_returns_the_terminal_failure() {
        let job_id = JobId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let reporter = ProgressReporter::new(job_id, 3, tx);
        reporter.report(40);
        reporter.fail(DownloadError::transcode("exit status 1"));
        drop(reporter);

        let terminal = JobEvents::new(job_id, rx).wait().await.unwrap();
        assert_eq!(terminal.percent, 0);
        assert!(terminal.payload.is_none());
        assert!(matches!(terminal.error, Some(DownloadError::Transcode { .. })));
    }

    #[tokio::test]
    async fn dropped_sender_ends_the_stream_empty() {
        let (tx, rx) = mpsc::unbounded_channel::<ProgressEvent>();
        drop(tx);
        assert!(JobEvents::new(JobId::new(), rx).wait().await.is_none());
    }

    #[test]
    fn reporting_to_a_gone_subscriber_is_silent() {
        let reporter = ProgressReporter::noop(JobId::new());
        reporter.report(250);
        reporter.fail(DownloadError::Cancelled);
    }
}
