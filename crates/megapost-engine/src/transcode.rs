use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use megapost_contracts::categories::{prompt_for_category, Category};
use sha2::{Digest, Sha256};

use crate::error::GenerationError;

pub const GIF_FRAME_HINT: &str = "The input image is an animated GIF; please select the clearest, most representative frame of the product to use as the base for the new image.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Png,
    Jpeg,
    Webp,
    Gif,
}

impl MediaType {
    pub fn mime(self) -> &'static str {
        match self {
            MediaType::Png => "image/png",
            MediaType::Jpeg => "image/jpeg",
            MediaType::Webp => "image/webp",
            MediaType::Gif => "image/gif",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            MediaType::Png => "png",
            MediaType::Jpeg => "jpg",
            MediaType::Webp => "webp",
            MediaType::Gif => "gif",
        }
    }

    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let ext = Path::new(file_name)
            .extension()
            .and_then(|value| value.to_str())
            .map(|value| value.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "png" => Some(MediaType::Png),
            "jpg" | "jpeg" => Some(MediaType::Jpeg),
            "webp" => Some(MediaType::Webp),
            "gif" => Some(MediaType::Gif),
            _ => None,
        }
    }

    /// Accepts values like `image/webp; charset=binary`.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "image/png" => Some(MediaType::Png),
            "image/jpeg" | "image/jpg" => Some(MediaType::Jpeg),
            "image/webp" => Some(MediaType::Webp),
            "image/gif" => Some(MediaType::Gif),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    bytes: Vec<u8>,
    file_name: String,
    media_type: Option<MediaType>,
    sha256: String,
}

impl SourceImage {
    pub fn new(bytes: Vec<u8>, file_name: impl Into<String>) -> Self {
        let file_name = file_name.into();
        let media_type = MediaType::from_file_name(&file_name);
        let sha256 = hex::encode(Sha256::digest(&bytes));
        Self {
            bytes,
            file_name,
            media_type,
            sha256,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// `None` when the file name carries no supported extension.
    pub fn media_type(&self) -> Option<MediaType> {
        self.media_type
    }

    pub fn sha256(&self) -> &str {
        &self.sha256
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: String,
}

impl InlineImage {
    pub fn media_type(&self) -> Option<MediaType> {
        MediaType::from_mime(&self.mime_type)
    }

    pub fn decode(&self) -> anyhow::Result<Vec<u8>> {
        Ok(BASE64.decode(self.data.as_bytes())?)
    }
}

pub fn transcode(source: &SourceImage) -> Result<InlineImage, GenerationError> {
    let media_type = source
        .media_type()
        .ok_or_else(|| GenerationError::UnsupportedMediaType(source.file_name().to_string()))?;
    Ok(InlineImage {
        mime_type: media_type.mime().to_string(),
        data: BASE64.encode(source.bytes()),
    })
}

pub fn generation_prompt(category: Category, media_type: MediaType) -> String {
    let prompt = prompt_for_category(category);
    if media_type == MediaType::Gif {
        format!("{GIF_FRAME_HINT} {prompt}")
    } else {
        prompt
    }
}

#[cfg(test)]
mod tests {
    use megapost_contracts::categories::{prompt_for_category, Category};

    use super::{generation_prompt, transcode, MediaType, SourceImage, GIF_FRAME_HINT};
    use crate::error::GenerationError;

    #[test]
    fn media_type_follows_file_extension() -> anyhow::Result<()> {
        let png = transcode(&SourceImage::new(vec![1, 2, 3], "photo.png"))?;
        assert_eq!(png.mime_type, "image/png");
        let gif = transcode(&SourceImage::new(vec![1, 2, 3], "clip.gif"))?;
        assert_eq!(gif.mime_type, "image/gif");
        let jpeg = transcode(&SourceImage::new(vec![1], "SHOT.JPEG"))?;
        assert_eq!(jpeg.mime_type, "image/jpeg");
        assert_eq!(MediaType::from_file_name("a.webp"), Some(MediaType::Webp));
        Ok(())
    }

    #[test]
    fn unsupported_extension_fails_with_file_name() {
        let err = transcode(&SourceImage::new(b"hello".to_vec(), "doc.txt")).unwrap_err();
        assert_eq!(err, GenerationError::UnsupportedMediaType("doc.txt".to_string()));
        let err = transcode(&SourceImage::new(Vec::new(), "noext")).unwrap_err();
        assert!(matches!(err, GenerationError::UnsupportedMediaType(_)));
    }

    #[test]
    fn encoding_is_lossless() -> anyhow::Result<()> {
        let bytes: Vec<u8> = (0..=255).collect();
        let inline = transcode(&SourceImage::new(bytes.clone(), "all.webp"))?;
        assert_eq!(inline.decode()?, bytes);
        assert_eq!(inline.media_type(), Some(MediaType::Webp));
        Ok(())
    }

    #[test]
    fn gif_inputs_get_frame_hint_prepended() {
        let prompt = generation_prompt(Category::Model, MediaType::Gif);
        assert!(prompt.starts_with(GIF_FRAME_HINT));
        assert!(prompt.ends_with(&prompt_for_category(Category::Model)));
        assert_eq!(
            generation_prompt(Category::Model, MediaType::Png),
            prompt_for_category(Category::Model)
        );
    }

    #[test]
    fn mime_parsing_ignores_parameters() {
        assert_eq!(
            MediaType::from_mime("image/webp; charset=binary"),
            Some(MediaType::Webp)
        );
        assert_eq!(MediaType::from_mime("IMAGE/JPG"), Some(MediaType::Jpeg));
        assert_eq!(MediaType::from_mime("image/svg+xml"), None);
    }

    #[test]
    fn source_fingerprint_is_sha256_hex() {
        let source = SourceImage::new(b"abc".to_vec(), "a.png");
        assert_eq!(
            source.sha256(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
