// Manifest resolution: master playlist -> best variant -> ordered segment URLs.
//
// Everything here is pure; fetching the playlist text is the caller's business.

use std::borrow::Cow;

use m3u8_rs::{MasterPlaylist, MediaPlaylist};
use tracing::debug;
use url::Url;

use crate::error::DownloadError;

const HEADER: &str = "#EXTM3U";

/// A parsed playlist of either level.
#[derive(Debug, Clone)]
pub enum Playlist {
    Master(MasterPlaylist),
    Media(MediaPlaylist),
}

/// Parses playlist text, detecting whether it is a master or a media playlist.
pub fn parse(text: &str) -> Result<Playlist, DownloadError> {
    let text = with_header(text);
    match m3u8_rs::parse_playlist_res(text.as_bytes()) {
        Ok(m3u8_rs::Playlist::MasterPlaylist(pl)) => Ok(Playlist::Master(pl)),
        Ok(m3u8_rs::Playlist::MediaPlaylist(pl)) => Ok(Playlist::Media(pl)),
        Err(e) => Err(DownloadError::manifest(format!(
            "failed to parse playlist: {e}"
        ))),
    }
}

/// Returns the media playlist URL of the highest-bandwidth variant in `master_text`.
pub fn resolve_variant(master_text: &str, base_url: &Url) -> Result<Url, DownloadError> {
    let master_text = with_header(master_text);
    let master = m3u8_rs::parse_master_playlist_res(master_text.as_bytes()).map_err(|e| {
        DownloadError::manifest(format!("failed to parse master playlist: {e}"))
    })?;
    select_variant(&master, base_url)
}

/// Picks the variant with the greatest declared bandwidth.
///
/// I-frame-only variants are not playable streams and never qualify. On equal
/// bandwidth the variant declared first wins.
pub fn select_variant(master: &MasterPlaylist, base_url: &Url) -> Result<Url, DownloadError> {
    let mut best: Option<&m3u8_rs::VariantStream> = None;
    for variant in master.variants.iter().filter(|v| !v.is_i_frame) {
        if best.is_none_or(|b| variant.bandwidth > b.bandwidth) {
            best = Some(variant);
        }
    }

    let variant = best.ok_or_else(|| {
        DownloadError::manifest("master playlist declares no stream variants")
    })?;
    debug!(
        bandwidth = variant.bandwidth,
        uri = %variant.uri,
        "Selected highest-bandwidth variant"
    );
    resolve_uri(base_url, &variant.uri)
}

/// Returns the segment URLs of `media_text`, in playback order.
pub fn list_segments(media_text: &str, base_url: &Url) -> Result<Vec<Url>, DownloadError> {
    let media_text = with_header(media_text);
    let media = m3u8_rs::parse_media_playlist_res(media_text.as_bytes()).map_err(|e| {
        DownloadError::manifest(format!("failed to parse media playlist: {e}"))
    })?;
    segment_urls(&media, base_url)
}

/// Resolves every segment of a parsed media playlist against `base_url`.
pub fn segment_urls(media: &MediaPlaylist, base_url: &Url) -> Result<Vec<Url>, DownloadError> {
    let urls = media
        .segments
        .iter()
        .filter(|segment| !segment.uri.trim().is_empty())
        .map(|segment| resolve_uri(base_url, &segment.uri))
        .collect::<Result<Vec<_>, _>>()?;
    if urls.is_empty() {
        return Err(DownloadError::manifest("media playlist lists no segments"));
    }
    Ok(urls)
}

/// Playlist text with the `#EXTM3U` first line the parser insists on.
///
/// Plenty of servers omit it; the rest of the text is still a valid playlist.
fn with_header(text: &str) -> Cow<'_, str> {
    let text = text.trim_start_matches('\u{feff}').trim_start();
    if text.starts_with(HEADER) {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(format!("{HEADER}\n{text}"))
    }
}

fn resolve_uri(base_url: &Url, uri: &str) -> Result<Url, DownloadError> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(DownloadError::manifest("playlist entry has an empty URI"));
    }
    base_url
        .join(uri)
        .map_err(|e| DownloadError::manifest(format!("cannot resolve `{uri}` against {base_url}: {e}")))
}
