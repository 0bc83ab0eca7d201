use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;

use crate::error::GenerationError;
use crate::transcode::{MediaType, SourceImage};

const FALLBACK_FILE_NAME: &str = "image.jpg";

pub fn from_path(path: &Path) -> Result<SourceImage> {
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or(FALLBACK_FILE_NAME)
        .to_string();
    Ok(SourceImage::new(bytes, file_name))
}

pub fn from_url(http: &HttpClient, raw_url: &str) -> Result<SourceImage, GenerationError> {
    let url = Url::parse(raw_url.trim())
        .map_err(|err| GenerationError::InvalidSourceUrl(format!("{raw_url}: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(GenerationError::InvalidSourceUrl(format!(
            "{raw_url}: unsupported scheme '{}'",
            url.scheme()
        )));
    }

    let response = http
        .get(url.clone())
        .send()
        .map_err(|err| GenerationError::FetchFailed(format!("could not reach {url}: {err}")))?;
    let status = response.status();
    if !status.is_success() {
        return Err(GenerationError::FetchFailed(format!(
            "status {}",
            status.as_u16()
        )));
    }
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if !content_type.starts_with("image/") {
        return Err(GenerationError::FetchFailed(format!(
            "URL does not point to an image (content type '{content_type}')"
        )));
    }
    let bytes = response
        .bytes()
        .map_err(|err| GenerationError::FetchFailed(format!("body read failed: {err}")))?;

    Ok(SourceImage::new(
        bytes.to_vec(),
        file_name_for_url(&url, &content_type),
    ))
}

/// Last path segment, with the content type's extension appended when the
/// segment carries no recognised one.
fn file_name_for_url(url: &Url, content_type: &str) -> String {
    let segment = url
        .path_segments()
        .and_then(|segments| segments.filter(|segment| !segment.is_empty()).last())
        .map(str::to_string);
    let Some(segment) = segment else {
        return MediaType::from_mime(content_type)
            .map(|media_type| format!("image.{}", media_type.extension()))
            .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string());
    };
    if MediaType::from_file_name(&segment).is_some() {
        return segment;
    }
    match MediaType::from_mime(content_type) {
        Some(media_type) => format!("{segment}.{}", media_type.extension()),
        None => segment,
    }
}
