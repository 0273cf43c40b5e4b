// One attempt of one job: resolve, fetch, remux.

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use url::Url;

use crate::engine::TranscodeAdapter;
use crate::error::DownloadError;
use crate::events::{MediaArtifact, ProgressReporter};
use crate::fetcher::SegmentFetcher;
use crate::manifest::{self, Playlist};
use crate::scheduler::DownloadRequest;

pub const ATTEMPT_STARTED: u8 = 0;
pub const MANIFEST_RESOLVED: u8 = 15;
/// Width of the progress band covered by segment downloads.
pub const SEGMENT_BAND: u8 = 35;
pub const REMUX_STARTED: u8 = 70;
pub const COMPLETE: u8 = 100;

/// Runs a single attempt and returns the finished artifact.
///
/// Emits every intermediate milestone; the terminal event is the caller's job.
#[instrument(skip_all, fields(url = %request.url, attempt = reporter.attempt()))]
pub async fn run_attempt(
    fetcher: &SegmentFetcher,
    adapter: &mut TranscodeAdapter,
    request: &DownloadRequest,
    reporter: &ProgressReporter,
    token: &CancellationToken,
) -> Result<MediaArtifact, DownloadError> {
    reporter.report(ATTEMPT_STARTED);

    let segments = resolve_segments(fetcher, &request.url, token).await?;
    info!(segments = segments.len(), "Manifest resolved");
    reporter.report(MANIFEST_RESOLVED);

    let stream = fetcher.fetch_all(&segments, reporter, token).await?;
    debug!(size = stream.len(), "All segments downloaded");

    let data = remux(adapter, &stream, reporter, token).await?;
    Ok(MediaArtifact {
        file_name: format!("{}.{}", request.output_name, adapter.container()),
        data,
    })
}

async fn remux(
    adapter: &mut TranscodeAdapter,
    stream: &Bytes,
    reporter: &ProgressReporter,
    token: &CancellationToken,
) -> Result<Bytes, DownloadError> {
    if token.is_cancelled() {
        return Err(DownloadError::Cancelled);
    }
    // dropping the remux future kills the engine process; the engine is
    // recycled after every attempt anyway
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(DownloadError::Cancelled),
        result = adapter.remux(stream, reporter) => result,
    }
}

/// Turns the submitted URL into the ordered segment list.
///
/// A master playlist goes through variant selection and one more fetch; a URL
/// that already points at a media playlist is used as is.
pub async fn resolve_segments(
    fetcher: &SegmentFetcher,
    url: &Url,
    token: &CancellationToken,
) -> Result<Vec<Url>, DownloadError> {
    let text = fetcher.fetch_text(url, token).await?;
    match manifest::parse(&text)? {
        Playlist::Master(master) => {
            let media_url = manifest::select_variant(&master, url)?;
            let media_text = fetcher.fetch_text(&media_url, token).await?;
            manifest::list_segments(&media_text, &media_url)
        }
        Playlist::Media(media) => {
            debug!("URL points at a media playlist, skipping variant selection");
            manifest::segment_urls(&media, url)
        }
    }
}
