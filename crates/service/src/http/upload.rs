//! Multipart upload parsing for `/compress-mp4`.

use crate::http::error::ApiError;
use axum::body::Bytes;
use axum::extract::Multipart;

/// Accepted upload MIME types and the extension the input is staged with
const ALLOWED_VIDEO_TYPES: &[(&str, &str)] = &[
    ("video/mp4", "mp4"),
    ("video/quicktime", "mov"),
    ("video/x-msvideo", "avi"),
    ("video/x-matroska", "mkv"),
    ("video/webm", "webm"),
    ("video/mpeg", "mpg"),
    ("video/3gpp", "3gp"),
    ("video/x-m4v", "m4v"),
];

/// A fully read compression request
#[derive(Debug)]
pub struct UploadForm {
    pub content: Bytes,
    pub extension: &'static str,
    pub file_name: Option<String>,
    pub target_size_mb: f64,
    pub maintain_aspect_ratio: bool,
}

/// Staging extension for an allowed MIME type, ignoring case and parameters
pub fn extension_for_mime(content_type: &str) -> Option<&'static str> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    ALLOWED_VIDEO_TYPES
        .iter()
        .find(|(mime, _)| *mime == essence)
        .map(|(_, ext)| *ext)
}

/// Parse an HTML-form style boolean
pub fn parse_form_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "1" | "yes" => Some(true),
        "false" | "off" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Parse `target_size_mb`; an empty value means "use the default"
pub fn parse_target_size(raw: &str, default: f64) -> Result<f64, ApiError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(default);
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => Ok(v),
        _ => Err(ApiError::BadRequest(format!(
            "target_size_mb must be a positive number, got {:?}",
            trimmed
        ))),
    }
}

/// `compressed_<stem>.mp4`, with the stem reduced to header-safe characters
pub fn download_name(file_name: Option<&str>) -> String {
    let base = file_name
        .and_then(|name| name.rsplit(['/', '\\']).next())
        .unwrap_or_default();
    let stem = match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => base,
    };
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('.');
    let stem = if cleaned.is_empty() { "video" } else { cleaned };
    format!("compressed_{}.mp4", stem)
}

impl UploadForm {
    /// Read every field of the request
    ///
    /// The `video` part is rejected on its declared content type before its
    /// body is read. Repeated scalar fields keep the last value, which lets an
    /// HTML form pair a hidden `false` with a checkbox.
    pub async fn read(mut multipart: Multipart, default_target_size_mb: f64) -> Result<Self, ApiError> {
        let mut video: Option<(Bytes, &'static str, Option<String>)> = None;
        let mut target_size_mb = default_target_size_mb;
        let mut maintain_aspect_ratio = true;

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().map(str::to_owned);
            match name.as_deref() {
                Some("video") => {
                    let content_type = field.content_type().unwrap_or("").to_string();
                    let extension = extension_for_mime(&content_type).ok_or_else(|| {
                        ApiError::UnsupportedMediaType(if content_type.is_empty() {
                            "missing content type".to_string()
                        } else {
                            content_type.clone()
                        })
                    })?;
                    let file_name = field.file_name().map(str::to_owned);
                    let content = field.bytes().await?;
                    tracing::debug!(
                        file_name = ?file_name,
                        content_type = %content_type,
                        bytes = content.len(),
                        "Received upload"
                    );
                    video = Some((content, extension, file_name));
                }
                Some("target_size_mb") => {
                    target_size_mb = parse_target_size(&field.text().await?, default_target_size_mb)?;
                }
                Some("maintain_aspect_ratio") => {
                    let raw = field.text().await?;
                    maintain_aspect_ratio = parse_form_bool(&raw).ok_or_else(|| {
                        ApiError::BadRequest(format!(
                            "maintain_aspect_ratio must be a boolean, got {:?}",
                            raw.trim()
                        ))
                    })?;
                }
                other => {
                    tracing::debug!(field = ?other, "Ignoring unknown form field");
                }
            }
        }

        let (content, extension, file_name) = video
            .ok_or_else(|| ApiError::BadRequest("missing required field 'video'".to_string()))?;

        Ok(Self {
            content,
            extension,
            file_name,
            target_size_mb,
            maintain_aspect_ratio,
        })
    }
}
