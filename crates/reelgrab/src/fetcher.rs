// Network side of the pipeline: the fetch primitive and the sequential segment fetcher.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};
use url::Url;

use crate::config::FetchConfig;
use crate::error::DownloadError;
use crate::events::ProgressReporter;
use crate::pipeline::{MANIFEST_RESOLVED, SEGMENT_BAND};

/// `GET url -> bytes`. Implementations must not retry; the job queue owns retries.
#[async_trait]
pub trait HttpSource: Send + Sync {
    async fn get(&self, url: &Url) -> Result<Bytes, DownloadError>;
}

pub fn create_client(config: &FetchConfig) -> Result<Client, reqwest::Error> {
    let redirect = if config.follow_redirects {
        reqwest::redirect::Policy::limited(10)
    } else {
        reqwest::redirect::Policy::none()
    };

    Client::builder()
        .user_agent(config.user_agent.as_str())
        .default_headers(config.headers.clone())
        .timeout(config.timeout)
        .connect_timeout(config.connect_timeout)
        .redirect(redirect)
        .build()
}

/// [`HttpSource`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(config: &FetchConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: create_client(config)?,
        })
    }
}

#[async_trait]
impl HttpSource for HttpClient {
    async fn get(&self, url: &Url) -> Result<Bytes, DownloadError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| DownloadError::network(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(status, url.as_str(), "GET"));
        }

        trace!(url = %url, http_version = ?response.version(), "Response received");
        response
            .bytes()
            .await
            .map_err(|e| DownloadError::network(url.as_str(), e))
    }
}

/// Fetches manifests and segments through an [`HttpSource`], honoring cancellation.
#[derive(Clone)]
pub struct SegmentFetcher {
    source: Arc<dyn HttpSource>,
}

impl SegmentFetcher {
    pub fn new(source: Arc<dyn HttpSource>) -> Self {
        Self { source }
    }

    /// Fetches a playlist document as UTF-8 text.
    pub async fn fetch_text(
        &self,
        url: &Url,
        token: &CancellationToken,
    ) -> Result<String, DownloadError> {
        let body = self.get(url, token).await?;
        String::from_utf8(body.to_vec()).map_err(|e| {
            DownloadError::manifest(format!("playlist {url} is not valid UTF-8: {e}"))
        })
    }

    /// Downloads `urls` one after another and concatenates them in list order.
    ///
    /// Any failed segment aborts the whole batch. Progress moves through the
    /// segment band after each completed segment.
    #[instrument(skip_all, fields(segments = urls.len()))]
    pub async fn fetch_all(
        &self,
        urls: &[Url],
        reporter: &ProgressReporter,
        token: &CancellationToken,
    ) -> Result<Bytes, DownloadError> {
        let mut buffer = BytesMut::new();

        for (index, url) in urls.iter().enumerate() {
            let chunk = self.get(url, token).await?;
            debug!(index, size = chunk.len(), url = %url, "Downloaded segment");
            buffer.extend_from_slice(&chunk);
            reporter.report(segment_progress(index, urls.len()));
        }

        Ok(buffer.freeze())
    }

    async fn get(&self, url: &Url, token: &CancellationToken) -> Result<Bytes, DownloadError> {
        if token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(DownloadError::Cancelled),
            result = self.source.get(url) => result,
        }
    }
}

/// Overall percentage after segment `index` (0-based) of `total` has completed.
pub fn segment_progress(index: usize, total: usize) -> u8 {
    if total == 0 {
        return MANIFEST_RESOLVED + SEGMENT_BAND;
    }
    let done = (index + 1).min(total);
    let band = SEGMENT_BAND as usize;
    // round half up
    let step = (2 * band * done + total) / (2 * total);
    MANIFEST_RESOLVED + step as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::events::JobId;
    use crate::test_support::MemorySource;
    use tokio::sync::mpsc;

    fn urls(names: &[&str]) -> Vec<Url> {
        names
            .iter()
            .map(|n| Url::parse(&format!("https://cdn.example.com/v/{n}")).unwrap())
            .collect()
    }

    #[test]
    fn progress_spans_the_segment_band() {
        assert_eq!(segment_progress(0, 1), 50);
        assert_eq!(segment_progress(0, 2), 33);
        assert_eq!(segment_progress(1, 2), 50);
        assert_eq!(segment_progress(0, 7), 20);
        assert_eq!(segment_progress(6, 7), 50);
    }

    #[test]
    fn progress_never_leaves_the_band() {
        for total in 1..40 {
            let mut last = MANIFEST_RESOLVED;
            for index in 0..total {
                let p = segment_progress(index, total);
                assert!(p >= last, "regressed at {index}/{total}");
                assert!(p <= MANIFEST_RESOLVED + SEGMENT_BAND);
                last = p;
            }
            assert_eq!(last, MANIFEST_RESOLVED + SEGMENT_BAND);
        }
    }

    #[tokio::test]
    async fn concatenates_in_playlist_order() {
        let source = MemorySource::new()
            .with_route("https://cdn.example.com/v/s1.ts", b"first-")
            .with_route("https://cdn.example.com/v/s2.ts", b"second-")
            .with_route("https://cdn.example.com/v/s3.ts", b"third");
        let fetcher = SegmentFetcher::new(source.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = ProgressReporter::new(JobId::new(), 1, tx);

        let data = fetcher
            .fetch_all(&urls(&["s1.ts", "s2.ts", "s3.ts"]), &reporter, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(&data[..], b"first-second-third");
        assert_eq!(
            source.requests(),
            vec![
                "https://cdn.example.com/v/s1.ts",
                "https://cdn.example.com/v/s2.ts",
                "https://cdn.example.com/v/s3.ts",
            ]
        );

        drop(reporter);
        let mut percents = Vec::new();
        while let Some(event) = rx.recv().await {
            percents.push(event.percent);
        }
        assert_eq!(percents, vec![27, 38, 50]);
    }

    #[tokio::test]
    async fn one_failed_segment_aborts_the_batch() {
        let source = MemorySource::new()
            .with_route("https://cdn.example.com/v/s1.ts", b"ok")
            .with_route("https://cdn.example.com/v/s3.ts", b"never");
        let fetcher = SegmentFetcher::new(source.clone());

        let err = fetcher
            .fetch_all(
                &urls(&["s1.ts", "s2.ts", "s3.ts"]),
                &ProgressReporter::noop(JobId::new()),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Fetch);
        assert_eq!(source.requests().len(), 2, "s3 must not be requested");
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_the_next_request() {
        let source = MemorySource::new().with_route("https://cdn.example.com/v/s1.ts", b"ok");
        let fetcher = SegmentFetcher::new(source.clone());
        let token = CancellationToken::new();
        token.cancel();

        let err = fetcher
            .fetch_all(&urls(&["s1.ts"]), &ProgressReporter::noop(JobId::new()), &token)
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Cancelled));
        assert!(source.requests().is_empty());
    }

    #[tokio::test]
    async fn non_utf8_playlist_is_a_manifest_error() {
        let source = MemorySource::new().with_route("https://cdn.example.com/v/p.m3u8", &[0xff, 0xfe, 0x00]);
        let fetcher = SegmentFetcher::new(source);
        let err = fetcher
            .fetch_text(&urls(&["p.m3u8"])[0], &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Manifest);
    }
}
