use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use megapost_contracts::categories::{download_file_name, tile_file_name, Category};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Parses `data:<mime>;base64,<payload>`.
pub fn decode_data_uri(uri: &str) -> Result<DecodedImage> {
    let Some(rest) = uri.trim().strip_prefix("data:") else {
        bail!("not a data URI");
    };
    let Some((header, payload)) = rest.split_once(',') else {
        bail!("data URI has no payload separator");
    };
    let Some(mime_type) = header.strip_suffix(";base64") else {
        bail!("data URI is not base64 encoded");
    };
    let bytes = BASE64
        .decode(payload.trim().as_bytes())
        .context("data URI base64 decode failed")?;
    Ok(DecodedImage {
        mime_type: if mime_type.is_empty() {
            "image/png".to_string()
        } else {
            mime_type.to_string()
        },
        bytes,
    })
}

/// "Download all": one `megapost_<Title>.png` per generated image.
pub fn download_all(dir: &Path, images: &[(Category, String)]) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    images
        .iter()
        .map(|(category, uri)| write_image(&dir.join(download_file_name(*category)), uri))
        .collect()
}

pub fn download_one(dir: &Path, category: Category, uri: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    write_image(&dir.join(tile_file_name(category)), uri)
}

fn write_image(path: &Path, uri: &str) -> Result<PathBuf> {
    let decoded = decode_data_uri(uri)
        .with_context(|| format!("invalid image data for {}", path.display()))?;
    fs::write(path, decoded.bytes).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path.to_path_buf())
}
