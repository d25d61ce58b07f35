//! Attachment codec
//!
//! Turns picked files into transport-ready base64 payloads tagged with a MIME
//! type, and back. An [`Attachment`] is immutable once built and belongs to
//! the draft request that carries it.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

const FALLBACK_MIME: &str = "application/octet-stream";

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum AttachmentError {
    #[error("attachment {0} is empty")]
    Empty(String),
    #[error("attachment {name} is {size} bytes, limit is {limit}")]
    TooLarge {
        name: String,
        size: usize,
        limit: usize,
    },
    #[error("attachment {0} has a malformed data URI")]
    InvalidDataUri(String),
    #[error("attachment {name} is not valid base64: {reason}")]
    InvalidBase64 { name: String, reason: String },
}

/// Coarse media class, used to decide how the draft directive is phrased.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
    Image,
    Text,
    Document,
    Other,
}

impl MediaKind {
    pub fn from_mime(mime: &str) -> Self {
        let mime = mime.trim().to_ascii_lowercase();
        let top = mime.split('/').next().unwrap_or_default();
        match top {
            "audio" => MediaKind::Audio,
            "video" => MediaKind::Video,
            "image" => MediaKind::Image,
            "text" => MediaKind::Text,
            _ if mime == "application/pdf" => MediaKind::Document,
            _ => MediaKind::Other,
        }
    }

    /// Spoken-content media: the backend should treat it as primary source material.
    pub fn is_spoken(self) -> bool {
        matches!(self, MediaKind::Audio | MediaKind::Video)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    name: String,
    mime_type: String,
    payload: String,
}

impl Attachment {
    /// Encode raw file bytes. An empty `mime_type` is guessed from the name.
    pub fn from_bytes(
        name: impl Into<String>,
        mime_type: &str,
        bytes: &[u8],
        max_bytes: usize,
    ) -> Result<Self, AttachmentError> {
        let name = name.into();
        check_size(&name, bytes.len(), max_bytes)?;
        let mime_type = resolve_mime(&name, mime_type);
        Ok(Self {
            payload: STANDARD.encode(bytes),
            name,
            mime_type,
        })
    }

    /// Accept either a `data:<mime>;base64,<payload>` URI or bare base64.
    ///
    /// A MIME type embedded in the URI wins over `declared_mime`.
    pub fn from_upload(
        name: impl Into<String>,
        declared_mime: Option<&str>,
        data: &str,
        max_bytes: usize,
    ) -> Result<Self, AttachmentError> {
        let name = name.into();
        let data = data.trim();
        let (uri_mime, encoded) = if data.starts_with("data:") {
            let (mime, payload) = parse_data_uri(data)
                .ok_or_else(|| AttachmentError::InvalidDataUri(name.clone()))?;
            (Some(mime), payload)
        } else {
            (None, data)
        };

        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| AttachmentError::InvalidBase64 {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        let mime = uri_mime
            .filter(|m| !m.is_empty())
            .or(declared_mime)
            .unwrap_or_default();
        Self::from_bytes(name, mime, &bytes, max_bytes)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Base64 payload as sent on the wire.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn media_kind(&self) -> MediaKind {
        MediaKind::from_mime(&self.mime_type)
    }
}

fn check_size(name: &str, size: usize, limit: usize) -> Result<(), AttachmentError> {
    if size == 0 {
        return Err(AttachmentError::Empty(name.to_string()));
    }
    if size > limit {
        return Err(AttachmentError::TooLarge {
            name: name.to_string(),
            size,
            limit,
        });
    }
    Ok(())
}

/// Split `data:<mime>[;params];base64,<payload>`. Only base64 URIs are accepted.
fn parse_data_uri(uri: &str) -> Option<(&str, &str)> {
    let rest = uri.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mut params = header.split(';');
    let mime = params.next().unwrap_or_default().trim();
    if !params.any(|p| p.trim().eq_ignore_ascii_case("base64")) {
        return None;
    }
    Some((mime, payload))
}

fn resolve_mime(name: &str, declared: &str) -> String {
    let declared = declared.trim();
    if !declared.is_empty() && declared != FALLBACK_MIME {
        return declared.to_ascii_lowercase();
    }
    mime_from_extension(name).to_string()
}

/// Get MIME type based on file extension
fn mime_from_extension(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "md" | "markdown" => "text/markdown",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        _ => FALLBACK_MIME,
    }
}
