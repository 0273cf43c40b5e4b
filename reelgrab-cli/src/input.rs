use std::collections::HashMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;
use url::Url;

use crate::error::{AppError, Result};

const DEFAULT_NAME: &str = "video";

/// Path stems that say nothing about the stream; the parent directory is used instead.
const GENERIC_STEMS: &[&str] = &["master", "index", "playlist", "prog_index", "chunklist"];

/// Parses `Name: value` header arguments.
pub fn parse_headers(headers: &[String]) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for header in headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| AppError::InvalidInput(format!("Invalid header format: {header}")))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| AppError::InvalidInput(format!("Invalid header name in `{header}`: {e}")))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| AppError::InvalidInput(format!("Invalid header value in `{header}`: {e}")))?;
        debug!(header = %name, "Added custom header");
        map.insert(name, value);
    }
    Ok(map)
}

/// Replaces characters that are invalid in file names and trims dots and spaces.
pub fn sanitize_filename(input: &str) -> String {
    const INVALID: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

    let replaced: String = input
        .chars()
        .map(|c| if INVALID.contains(&c) || c.is_control() { '_' } else { c })
        .collect();
    let trimmed = replaced.trim_matches(|c| c == '.' || c == ' ');

    if trimmed.is_empty() {
        DEFAULT_NAME.to_string()
    } else {
        trimmed.chars().take(200).collect()
    }
}

/// Guesses a file name from the playlist URL.
fn name_from_url(url: &Url) -> String {
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    let mut candidates = segments.iter().rev().copied().map(|seg| match seg.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => seg,
    });
    let stem = match candidates.next() {
        Some(stem) if GENERIC_STEMS.contains(&stem.to_ascii_lowercase().as_str()) => {
            candidates.next().unwrap_or(stem)
        }
        Some(stem) => stem,
        None => url.host_str().unwrap_or(DEFAULT_NAME),
    };
    sanitize_filename(stem)
}

/// Picks one output name per URL, numbering names that would collide.
pub fn output_names(urls: &[Url], name: Option<&str>) -> Vec<String> {
    let bases: Vec<String> = match name {
        Some(name) => vec![sanitize_filename(name); urls.len()],
        None => urls.iter().map(name_from_url).collect(),
    };

    let mut totals: HashMap<&str, usize> = HashMap::new();
    for base in &bases {
        *totals.entry(base.as_str()).or_default() += 1;
    }

    let mut seen: HashMap<&str, usize> = HashMap::new();
    bases
        .iter()
        .map(|base| {
            if totals[base.as_str()] == 1 {
                return base.clone();
            }
            let n = seen.entry(base.as_str()).or_default();
            *n += 1;
            format!("{base}-{n}")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(list: &[&str]) -> Vec<Url> {
        list.iter().map(|u| Url::parse(u).unwrap()).collect()
    }

    #[test]
    fn sanitize_replaces_reserved_characters() {
        assert_eq!(sanitize_filename("a/b:c?.mp4"), "a_b_c_.mp4");
        assert_eq!(sanitize_filename(" ..clip.. "), "clip");
        assert_eq!(sanitize_filename("..."), "video");
        assert_eq!(sanitize_filename(&"x".repeat(300)).len(), 200);
    }

    #[test]
    fn names_come_from_the_url_path() {
        let names = output_names(
            &urls(&[
                "https://cdn.example.com/shows/episode-4.m3u8",
                "https://cdn.example.com/vod/trailer/master.m3u8?sig=1",
            ]),
            None,
        );
        assert_eq!(names, vec!["episode-4", "trailer"]);
    }

    #[test]
    fn colliding_names_are_numbered() {
        let names = output_names(
            &urls(&[
                "https://a.example.com/clip/index.m3u8",
                "https://b.example.com/clip/index.m3u8",
                "https://c.example.com/other.m3u8",
            ]),
            None,
        );
        assert_eq!(names, vec!["clip-1", "clip-2", "other"]);
    }

    #[test]
    fn explicit_name_wins() {
        let single = output_names(&urls(&["https://a.example.com/x.m3u8"]), Some("My Video"));
        assert_eq!(single, vec!["My Video"]);

        let several = output_names(
            &urls(&["https://a.example.com/x.m3u8", "https://a.example.com/y.m3u8"]),
            Some("part"),
        );
        assert_eq!(several, vec!["part-1", "part-2"]);
    }

    #[test]
    fn bare_host_falls_back_to_the_host_name() {
        assert_eq!(
            output_names(&urls(&["https://live.example.com/"]), None),
            vec!["live.example.com"]
        );
    }

    #[test]
    fn headers_parse_name_and_value() {
        let map = parse_headers(&["Referer: https://example.com/".to_string()]).unwrap();
        assert_eq!(map.get("referer").unwrap(), "https://example.com/");
        assert!(parse_headers(&["bad header".to_string()]).is_err());
    }
}
