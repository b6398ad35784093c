//! Same-origin proxy for remote images.
//!
//! The declared `Content-Type` of remote images is often wrong
//! (`application/octet-stream`, `text/plain`), so the direct policy trusts
//! the payload's magic bytes first, then the header, then the URL extension.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::time::Duration;

use bytes::Bytes;
use image::{ImageFormat, ImageOutputFormat};
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use url::Url;

use crate::error::ProxyError;

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

pub const CACHE_CONTROL_VALUE: &str = "public, max-age=31536000";

const MIB: u64 = 1024 * 1024;

const EXTENSION_TYPES: [(&str, &str); 6] = [
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("bmp", "image/bmp"),
];

/// Limits applied to one proxy route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyPolicy {
    pub max_bytes: u64,
    pub timeout: Duration,
    /// Detect the type from the bytes. When off, the upstream header must
    /// already say `image/*`.
    pub sniff: bool,
    /// Thumbnail sniffed images larger than this on either side.
    pub max_dimension: Option<u32>,
}

impl ProxyPolicy {
    pub fn direct(max_dimension: Option<u32>) -> Self {
        Self {
            max_bytes: 10 * MIB,
            timeout: Duration::from_secs(15),
            sniff: true,
            max_dimension,
        }
    }

    pub fn strict() -> Self {
        Self {
            max_bytes: 4 * MIB,
            timeout: Duration::from_secs(30),
            sniff: false,
            max_dimension: None,
        }
    }

    fn too_large(&self) -> ProxyError {
        ProxyError::TooLarge {
            limit_bytes: self.max_bytes,
        }
    }
}

/// Where the served `Content-Type` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeSource {
    Sniffed,
    Header,
    Extension,
}

#[derive(Debug, Clone)]
pub struct ProxiedImage {
    pub bytes: Bytes,
    pub content_type: String,
    pub format: Option<ImageFormat>,
    pub source: TypeSource,
}

/// Result of reading an image header from raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sniffed {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

/// Diagnostic description of a remote URL, for `/api/test/image`.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ProbeReport {
    Fetched {
        url: String,
        status_code: u16,
        headers: BTreeMap<String, String>,
        content_type: String,
        content_length: String,
        image_detected: bool,
        image_format: String,
        error_message: Option<String>,
    },
    Failed {
        error: String,
        url: String,
    },
}

/// Strip the stray `@` some clients prepend and require http(s).
pub fn clean_url(raw: &str) -> Result<Url, ProxyError> {
    let trimmed = raw.trim();
    let url = trimmed.strip_prefix('@').unwrap_or(trimmed);
    let lower = url.to_ascii_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return Err(ProxyError::InvalidScheme);
    }
    Url::parse(url).map_err(|e| ProxyError::InvalidUrl(e.to_string()))
}

#[derive(Clone)]
pub struct ImageProxy {
    client: reqwest::Client,
}

impl ImageProxy {
    /// `client` should carry the browser user agent; redirects are followed
    /// by reqwest's default policy.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub async fn fetch(&self, raw_url: &str, policy: &ProxyPolicy) -> Result<ProxiedImage, ProxyError> {
        let url = clean_url(raw_url)?;
        tracing::info!(url = %url, sniff = policy.sniff, "Proxying image");

        let response = self
            .client
            .get(url.clone())
            .timeout(policy.timeout)
            .send()
            .await
            .map_err(fetch_error)?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(url = %url, status = status.as_u16(), "Image upstream returned error status");
            return Err(ProxyError::UpstreamStatus(status.as_u16()));
        }

        let declared = declared_type(&response);
        if !policy.sniff {
            let content_type = declared
                .filter(|ct| is_image_type(ct))
                .ok_or(ProxyError::NotAnImage)?;
            let bytes = read_limited(response, policy).await?;
            return Ok(ProxiedImage {
                bytes,
                content_type,
                format: None,
                source: TypeSource::Header,
            });
        }

        let bytes = read_limited(response, policy).await?;
        let sniffed = sniff(&bytes).ok();
        let (content_type, source) = resolve_content_type(sniffed, declared.as_deref(), &url)?;
        tracing::debug!(
            url = %url,
            content_type = %content_type,
            source = ?source,
            declared = declared.as_deref().unwrap_or(""),
            "Resolved image type"
        );

        let bytes = match (sniffed, policy.max_dimension) {
            (Some(info), Some(max)) if info.width > max || info.height > max => {
                shrink(bytes, info, max).await
            }
            _ => bytes,
        };

        Ok(ProxiedImage {
            bytes,
            content_type,
            format: sniffed.map(|s| s.format),
            source,
        })
    }

    /// Fetch `raw_url` and describe what came back. Never fails.
    pub async fn probe(&self, raw_url: &str, policy: &ProxyPolicy) -> ProbeReport {
        let shown = raw_url.trim().strip_prefix('@').unwrap_or(raw_url.trim()).to_string();

        let url = match clean_url(raw_url) {
            Ok(url) => url,
            Err(err) => {
                return ProbeReport::Failed {
                    error: err.to_string(),
                    url: shown,
                };
            }
        };
        let response = match self.client.get(url).timeout(policy.timeout).send().await {
            Ok(response) => response,
            Err(err) => {
                return ProbeReport::Failed {
                    error: err.to_string(),
                    url: shown,
                };
            }
        };

        let status_code = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let content_type = headers
            .get("content-type")
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());
        let content_length = headers
            .get("content-length")
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());

        let detection = match read_limited(response, policy).await {
            Ok(bytes) => sniff(&bytes),
            Err(err) => Err(err.to_string()),
        };
        let (image_detected, image_format, error_message) = match detection {
            Ok(info) => (true, format_name(info.format), None),
            Err(message) => (false, "unknown".to_string(), Some(message)),
        };

        ProbeReport::Fetched {
            url: shown,
            status_code,
            headers,
            content_type,
            content_length,
            image_detected,
            image_format,
            error_message,
        }
    }
}

fn fetch_error(err: reqwest::Error) -> ProxyError {
    if err.is_timeout() {
        ProxyError::Timeout
    } else if let Some(status) = err.status() {
        ProxyError::UpstreamStatus(status.as_u16())
    } else {
        ProxyError::Fetch(err.to_string())
    }
}

fn declared_type(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
}

fn is_image_type(content_type: &str) -> bool {
    content_type.starts_with("image/")
}

/// Read the body, refusing anything over the policy ceiling. The declared
/// length is checked first; the running total covers bodies without one.
async fn read_limited(mut response: reqwest::Response, policy: &ProxyPolicy) -> Result<Bytes, ProxyError> {
    if response
        .content_length()
        .is_some_and(|len| len > policy.max_bytes)
    {
        return Err(policy.too_large());
    }

    let mut buf = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(fetch_error)? {
        if (buf.len() + chunk.len()) as u64 > policy.max_bytes {
            return Err(policy.too_large());
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buf))
}

/// Guess the format from magic bytes and make sure the header decodes.
pub fn sniff(bytes: &[u8]) -> Result<Sniffed, String> {
    let reader = image::io::Reader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| e.to_string())?;
    let format = reader
        .format()
        .ok_or_else(|| "cannot identify image format".to_string())?;
    let (width, height) = reader.into_dimensions().map_err(|e| e.to_string())?;
    Ok(Sniffed {
        format,
        width,
        height,
    })
}

/// Sniffed format, then an `image/*` header, then the URL path extension.
pub fn resolve_content_type(
    sniffed: Option<Sniffed>,
    declared: Option<&str>,
    url: &Url,
) -> Result<(String, TypeSource), ProxyError> {
    if let Some(info) = sniffed {
        return Ok((mime_for(info.format), TypeSource::Sniffed));
    }
    if let Some(declared) = declared.filter(|ct| is_image_type(ct)) {
        return Ok((declared.to_string(), TypeSource::Header));
    }
    let path = url.path().to_ascii_lowercase();
    if let Some((_, ext)) = path.rsplit_once('.') {
        if let Some((_, mime)) = EXTENSION_TYPES.iter().find(|(e, _)| *e == ext) {
            return Ok((mime.to_string(), TypeSource::Extension));
        }
    }
    Err(ProxyError::NotAnImage)
}

pub fn mime_for(format: ImageFormat) -> String {
    let mime = match format {
        ImageFormat::Png => "image/png",
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Gif => "image/gif",
        ImageFormat::WebP => "image/webp",
        ImageFormat::Bmp => "image/bmp",
        ImageFormat::Tiff => "image/tiff",
        ImageFormat::Ico => "image/x-icon",
        ImageFormat::Avif => "image/avif",
        other => {
            let ext = other.extensions_str().first().copied().unwrap_or("octet-stream");
            return format!("image/{ext}");
        }
    };
    mime.to_string()
}

fn format_name(format: ImageFormat) -> String {
    format!("{format:?}").to_ascii_uppercase()
}

fn output_format(format: ImageFormat) -> Option<ImageOutputFormat> {
    match format {
        ImageFormat::Png => Some(ImageOutputFormat::Png),
        ImageFormat::Jpeg => Some(ImageOutputFormat::Jpeg(85)),
        ImageFormat::Bmp => Some(ImageOutputFormat::Bmp),
        _ => None,
    }
}

/// Thumbnail to fit `max` x `max` in the original format. Returns `None`
/// when the format can't be re-encoded or the result isn't smaller.
pub fn downscale(bytes: &[u8], format: ImageFormat, max: u32) -> Option<Vec<u8>> {
    let output = output_format(format)?;
    let img = image::load_from_memory_with_format(bytes, format).ok()?;
    if img.width() <= max && img.height() <= max {
        return None;
    }
    let mut out = Vec::new();
    img.thumbnail(max, max)
        .write_to(&mut Cursor::new(&mut out), output)
        .ok()?;
    (out.len() < bytes.len()).then_some(out)
}

async fn shrink(bytes: Bytes, info: Sniffed, max: u32) -> Bytes {
    let original = bytes.clone();
    let resized = tokio::task::spawn_blocking(move || downscale(&bytes, info.format, max)).await;
    match resized {
        Ok(Some(smaller)) => {
            tracing::debug!(
                from = original.len(),
                to = smaller.len(),
                width = info.width,
                height = info.height,
                max,
                "Downscaled proxied image"
            );
            Bytes::from(smaller)
        }
        Ok(None) => original,
        Err(err) => {
            tracing::warn!(error = %err, "Downscale task failed, serving original bytes");
            original
        }
    }
}
