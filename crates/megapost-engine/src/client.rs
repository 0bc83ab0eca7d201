use std::env;
use std::io::Cursor;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, Rgb, RgbImage};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::error::GenerationError;
use crate::transcode::InlineImage;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const PROVIDER_NAMES: [&str; 2] = ["dryrun", "gemini"];

/// One image-to-image call per category. Returns a `data:` URI.
pub trait GenerationClient: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, image: &InlineImage, prompt: &str) -> Result<String, GenerationError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub request_timeout: Option<Duration>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_IMAGE_MODEL.to_string(),
            request_timeout: None,
        }
    }
}

impl GeminiConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: non_empty_env("GEMINI_API_KEY")
                .or_else(|| non_empty_env("GOOGLE_API_KEY"))
                .or_else(|| non_empty_env("API_KEY")),
            api_base: non_empty_env("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            model: non_empty_env("MEGAPOST_IMAGE_MODEL")
                .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string()),
            request_timeout: non_empty_env("MEGAPOST_REQUEST_TIMEOUT_SECS")
                .and_then(|value| value.parse::<f64>().ok())
                .filter(|secs| secs.is_finite() && *secs > 0.0)
                .map(Duration::from_secs_f64),
        }
    }

    /// Blocking notice shown before any generation when the key is absent.
    pub fn credential_notice(&self) -> Option<String> {
        if self.api_key.is_some() {
            return None;
        }
        Some(
            "Gemini API key missing.\n\
             Set GEMINI_API_KEY (or GOOGLE_API_KEY / API_KEY) in the environment and restart.\n\
             Image generation is disabled until a key is configured."
                .to_string(),
        )
    }
}

pub struct GeminiClient {
    config: GeminiConfig,
    http: HttpClient,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build Gemini HTTP client")?;
        Ok(Self { config, http })
    }

    fn endpoint(&self) -> String {
        let trimmed = self.config.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.config.api_base, model_path)
    }

    fn request_payload(image: &InlineImage, prompt: &str) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {
                        "inlineData": {
                            "mimeType": image.mime_type,
                            "data": image.data,
                        }
                    },
                    { "text": prompt },
                ],
            }],
            "generationConfig": {
                "candidateCount": 1,
                "responseModalities": ["IMAGE"],
            },
        })
    }

    fn post(&self, api_key: &str, payload: &Value) -> Result<Value> {
        let endpoint = self.endpoint();
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .json(payload)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        response_json_or_error("Gemini", response)
    }
}

impl GenerationClient for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, image: &InlineImage, prompt: &str) -> Result<String, GenerationError> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Err(GenerationError::MissingCredential);
        };
        let payload = Self::request_payload(image, prompt);
        let response = self
            .post(api_key, &payload)
            .map_err(|err| GenerationError::UpstreamFailure(error_chain_text(&err, 512)))?;
        first_image_data_uri(&response).ok_or(GenerationError::NoImageInResponse)
    }
}

/// Offline client: a solid PNG whose colour is derived from the prompt.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryrunClient;

impl DryrunClient {
    fn render(prompt: &str) -> Result<Vec<u8>> {
        let (width, height) = if prompt.contains("9:16") {
            (36, 64)
        } else {
            (64, 64)
        };
        let (r, g, b) = color_from_prompt(prompt);
        let mut image = RgbImage::new(width, height);
        for pixel in image.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        let mut out = Cursor::new(Vec::new());
        image
            .write_to(&mut out, ImageFormat::Png)
            .context("dryrun PNG encode failed")?;
        Ok(out.into_inner())
    }
}

impl GenerationClient for DryrunClient {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, _image: &InlineImage, prompt: &str) -> Result<String, GenerationError> {
        let bytes = Self::render(prompt)
            .map_err(|err| GenerationError::UpstreamFailure(error_chain_text(&err, 512)))?;
        Ok(format!("data:image/png;base64,{}", BASE64.encode(bytes)))
    }
}

pub fn client_for_provider(name: &str, config: &GeminiConfig) -> Result<Box<dyn GenerationClient>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "dryrun" => Ok(Box::new(DryrunClient)),
        "gemini" => Ok(Box::new(GeminiClient::new(config.clone())?)),
        other => bail!(
            "unknown provider '{other}'. Available: {}",
            PROVIDER_NAMES.join(", ")
        ),
    }
}

/// First non-empty inline image as a data URI. Requests ask for one candidate,
/// but every candidate is scanned so a text-only leading one cannot hide an image.
pub fn first_image_data_uri(response: &Value) -> Option<String> {
    let candidates = response.get("candidates").and_then(Value::as_array)?;
    candidates
        .iter()
        .filter_map(|candidate| {
            candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
        })
        .flatten()
        .find_map(|part| {
            let inline = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)?;
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .filter(|data| !data.is_empty())?;
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .filter(|mime| !mime.trim().is_empty())
                .unwrap_or("image/png");
            Some(format!("data:{mime_type};base64,{data}"))
        })
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!("{provider} request failed ({code}): {}", upstream_message(&body));
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

/// Provider `error.message` when the body is a JSON error envelope, else the truncated body.
fn upstream_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("error")
                .and_then(|error| error.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| truncate_text(body, 512))
}

pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().map(|existing| existing == trimmed).unwrap_or(false) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let digest = Sha256::digest(prompt.as_bytes());
    (digest[0], digest[1], digest[2])
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;
    use serde_json::json;

    use super::BASE64;
    use super::{
        client_for_provider, error_chain_text, first_image_data_uri, upstream_message,
        DryrunClient, GeminiClient, GeminiConfig, GenerationClient,
    };
    use crate::error::GenerationError;
    use crate::test_http::serve_once;
    use crate::transcode::InlineImage;

    fn inline_png() -> InlineImage {
        InlineImage {
            mime_type: "image/png".to_string(),
            data: BASE64.encode([0x89, b'P', b'N', b'G']),
        }
    }

    #[test]
    fn missing_credential_is_reported_before_any_request() -> anyhow::Result<()> {
        // Unroutable base: a network attempt would surface as UpstreamFailure instead.
        let client = GeminiClient::new(GeminiConfig {
            api_base: "http://127.0.0.1:9".to_string(),
            ..GeminiConfig::default()
        })?;
        let err = client.generate(&inline_png(), "prompt").unwrap_err();
        assert_eq!(err, GenerationError::MissingCredential);
        Ok(())
    }

    #[test]
    fn credential_notice_only_when_key_absent() {
        assert!(GeminiConfig::default().credential_notice().is_some());
        let configured = GeminiConfig {
            api_key: Some("k".to_string()),
            ..GeminiConfig::default()
        };
        assert!(configured.credential_notice().is_none());
    }

    #[test]
    fn request_payload_puts_image_before_prompt_and_asks_for_image_output() {
        let payload = GeminiClient::request_payload(&inline_png(), "make it pop");
        let parts = &payload["contents"][0]["parts"];
        assert_eq!(parts[0]["inlineData"]["mimeType"], json!("image/png"));
        assert_eq!(parts[1]["text"], json!("make it pop"));
        assert_eq!(
            payload["generationConfig"]["responseModalities"],
            json!(["IMAGE"])
        );
    }

    #[test]
    fn endpoint_prefixes_models_path_once() -> anyhow::Result<()> {
        let client = GeminiClient::new(GeminiConfig::default())?;
        assert_eq!(
            client.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash-image:generateContent"
        );
        let prefixed = GeminiClient::new(GeminiConfig {
            model: "models/custom".to_string(),
            ..GeminiConfig::default()
        })?;
        assert!(prefixed.endpoint().ends_with("/models/custom:generateContent"));
        Ok(())
    }

    #[test]
    fn first_image_part_wins_and_text_parts_are_skipped() {
        let response = json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "here you go" },
                        { "inlineData": { "mimeType": "image/jpeg", "data": "AAAA" } },
                        { "inlineData": { "mimeType": "image/png", "data": "BBBB" } }
                    ]
                }
            }]
        });
        assert_eq!(
            first_image_data_uri(&response).as_deref(),
            Some("data:image/jpeg;base64,AAAA")
        );
    }

    #[test]
    fn snake_case_inline_data_and_missing_mime_are_accepted() {
        let response = json!({
            "candidates": [{ "content": { "parts": [ { "inline_data": { "data": "CCCC" } } ] } }]
        });
        assert_eq!(
            first_image_data_uri(&response).as_deref(),
            Some("data:image/png;base64,CCCC")
        );
    }

    #[test]
    fn text_only_response_has_no_image() {
        let response = json!({
            "candidates": [{ "content": { "parts": [ { "text": "sorry" } ] } }]
        });
        assert_eq!(first_image_data_uri(&response), None);
        assert_eq!(first_image_data_uri(&json!({})), None);
        let empty = json!({
            "candidates": [{ "content": { "parts": [ { "inlineData": { "data": "" } } ] } }]
        });
        assert_eq!(first_image_data_uri(&empty), None);
    }

    #[test]
    fn image_in_later_candidate_is_found() {
        let response = json!({
            "candidates": [
                { "content": { "parts": [ { "text": "here you go" } ] } },
                { "content": { "parts": [
                    { "inlineData": { "mimeType": "image/webp", "data": "UklG" } }
                ] } }
            ]
        });
        assert_eq!(
            first_image_data_uri(&response).as_deref(),
            Some("data:image/webp;base64,UklG")
        );
    }

    #[test]
    fn upstream_message_prefers_provider_error_envelope() {
        let body = r#"{"error":{"code":400,"message":"API key not valid.","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(upstream_message(body), "API key not valid.");
        assert_eq!(upstream_message("Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn error_chain_text_joins_distinct_causes() {
        let err = anyhow::anyhow!("connection refused").context("Gemini request failed (x)");
        assert_eq!(
            error_chain_text(&err, 512),
            "Gemini request failed (x) | caused by: connection refused"
        );
        let long = anyhow::anyhow!("{}", "x".repeat(20));
        assert_eq!(error_chain_text(&long, 5), "xxxxx…");
    }

    fn keyed_client(api_base: String) -> anyhow::Result<GeminiClient> {
        GeminiClient::new(GeminiConfig {
            api_key: Some("test-key".to_string()),
            api_base,
            ..GeminiConfig::default()
        })
    }

    #[test]
    fn provider_error_envelope_surfaces_as_upstream_failure() -> anyhow::Result<()> {
        let (base, server) = serve_once(
            "400 Bad Request",
            "application/json",
            r#"{"error":{"code":400,"message":"API key not valid.","status":"INVALID_ARGUMENT"}}"#,
        )?;
        let err = keyed_client(base)?
            .generate(&inline_png(), "prompt")
            .unwrap_err();
        let request = server
            .join()
            .map_err(|_| anyhow::anyhow!("server thread panicked"))?;

        match err {
            GenerationError::UpstreamFailure(message) => {
                assert!(message.contains("(400)"), "unexpected message: {message}");
                assert!(
                    message.contains("API key not valid."),
                    "unexpected message: {message}"
                );
            }
            other => panic!("expected UpstreamFailure, got {other:?}"),
        }
        assert!(request
            .starts_with("POST /models/gemini-2.5-flash-image:generateContent?key=test-key "));
        assert!(request.contains("\"responseModalities\":[\"IMAGE\"]"));
        Ok(())
    }

    #[test]
    fn text_only_reply_is_no_image_in_response() -> anyhow::Result<()> {
        let (base, server) = serve_once(
            "200 OK",
            "application/json",
            r#"{"candidates":[{"content":{"parts":[{"text":"I cannot edit this image."}]}}]}"#,
        )?;
        let result = keyed_client(base)?.generate(&inline_png(), "prompt");
        server
            .join()
            .map_err(|_| anyhow::anyhow!("server thread panicked"))?;
        assert_eq!(result, Err(GenerationError::NoImageInResponse));
        Ok(())
    }

    #[test]
    fn image_reply_becomes_data_uri() -> anyhow::Result<()> {
        let (base, server) = serve_once(
            "200 OK",
            "application/json",
            r#"{"candidates":[{"content":{"parts":[
                {"inlineData":{"mimeType":"image/png","data":"AQID"}}
            ]}}]}"#,
        )?;
        let uri = keyed_client(base)?.generate(&inline_png(), "prompt")?;
        server
            .join()
            .map_err(|_| anyhow::anyhow!("server thread panicked"))?;
        assert_eq!(uri, "data:image/png;base64,AQID");
        Ok(())
    }

    #[test]
    fn dryrun_client_returns_decodable_png_data_uri() -> anyhow::Result<()> {
        let uri = DryrunClient.generate(&inline_png(), "vertical 9:16 story")?;
        let payload = uri
            .strip_prefix("data:image/png;base64,")
            .ok_or_else(|| anyhow::anyhow!("unexpected uri prefix: {uri}"))?;
        let bytes = BASE64.decode(payload)?;
        let decoded = image::load_from_memory(&bytes)?;
        assert_eq!((decoded.width(), decoded.height()), (36, 64));
        Ok(())
    }

    #[test]
    fn provider_lookup_rejects_unknown_names() -> anyhow::Result<()> {
        let config = GeminiConfig::default();
        assert_eq!(client_for_provider("dryrun", &config)?.name(), "dryrun");
        assert_eq!(client_for_provider("Gemini", &config)?.name(), "gemini");
        let err = client_for_provider("stability", &config).err().map(|err| err.to_string());
        assert_eq!(
            err.as_deref(),
            Some("unknown provider 'stability'. Available: dryrun, gemini")
        );
        Ok(())
    }
}
