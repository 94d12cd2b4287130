//! Artifact normalization.
//!
//! Converts raw UI input (image bytes or markup text) into a canonical
//! [`Artifact`]: images are decoded, bounded in size and re-encoded as
//! RGBA PNG; markup is stripped of scripts, styles and comments and its
//! whitespace collapsed. Normalization is a pure function of its input.

use std::fmt;
use std::io::Cursor;
use std::sync::OnceLock;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageOutputFormat};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{EvalError, Result};

/// Default bound on the longest image side after normalization.
pub const DEFAULT_MAX_IMAGE_DIMENSION: u32 = 1568;

/// Default bound on raw markup size.
pub const DEFAULT_MAX_MARKUP_BYTES: usize = 256 * 1024;

/// Broad category of a UI artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Image,
    Markup,
}

impl ArtifactKind {
    /// Parse a caller-declared kind. Unknown kinds are unsupported.
    pub fn parse(declared: &str) -> Result<Self> {
        match declared.trim().to_ascii_lowercase().as_str() {
            "image" | "png" | "jpeg" | "jpg" | "gif" | "webp" | "screenshot" => Ok(Self::Image),
            "markup" | "html" | "xml" | "text" | "description" => Ok(Self::Markup),
            other => Err(EvalError::unsupported(
                other,
                "expected an image or markup artifact",
            )),
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Markup => write!(f, "markup"),
        }
    }
}

/// Input as received from the caller, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawArtifact {
    pub declared_kind: String,
    pub bytes: Vec<u8>,
}

impl RawArtifact {
    pub fn new(declared_kind: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            declared_kind: declared_kind.into(),
            bytes: bytes.into(),
        }
    }

    pub fn markup(text: &str) -> Self {
        Self::new("markup", text.as_bytes())
    }
}

/// Canonical artifact content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactContent {
    /// PNG-encoded RGBA image.
    Image(Vec<u8>),
    /// Cleaned markup text.
    Markup(String),
}

impl ArtifactContent {
    fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Image(bytes) => bytes,
            Self::Markup(text) => text.as_bytes(),
        }
    }
}

/// Descriptive metadata captured during normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub mime_type: String,
    /// Format the caller supplied (e.g. `jpeg`), images only.
    pub source_format: Option<String>,
    /// (width, height) before downscaling, images only.
    pub original_dimensions: Option<(u32, u32)>,
    /// (width, height) of the canonical image.
    pub dimensions: Option<(u32, u32)>,
    /// Size of the canonical content in bytes.
    pub byte_len: usize,
}

/// Stable reference to an artifact, carried by reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub kind: ArtifactKind,
    /// SHA-256 hex digest of the canonical content.
    pub digest: String,
}

impl ArtifactRef {
    pub fn short(&self) -> &str {
        &self.digest[..12.min(self.digest.len())]
    }
}

/// A normalized UI artifact. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    kind: ArtifactKind,
    content: ArtifactContent,
    metadata: ArtifactMetadata,
    digest: String,
}

impl Artifact {
    fn new(content: ArtifactContent, metadata: ArtifactMetadata) -> Self {
        let kind = match &content {
            ArtifactContent::Image(_) => ArtifactKind::Image,
            ArtifactContent::Markup(_) => ArtifactKind::Markup,
        };
        let digest = hex::encode(Sha256::digest(content.as_bytes()));
        Self {
            kind,
            content,
            metadata,
            digest,
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn content(&self) -> &ArtifactContent {
        &self.content
    }

    pub fn metadata(&self) -> &ArtifactMetadata {
        &self.metadata
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn artifact_ref(&self) -> ArtifactRef {
        ArtifactRef {
            kind: self.kind,
            digest: self.digest.clone(),
        }
    }

    /// Markup text, if this is a markup artifact.
    pub fn markup(&self) -> Option<&str> {
        match &self.content {
            ArtifactContent::Markup(text) => Some(text),
            ArtifactContent::Image(_) => None,
        }
    }

    /// PNG bytes, if this is an image artifact.
    pub fn image_png(&self) -> Option<&[u8]> {
        match &self.content {
            ArtifactContent::Image(bytes) => Some(bytes),
            ArtifactContent::Markup(_) => None,
        }
    }
}

/// Converts [`RawArtifact`]s into canonical [`Artifact`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactNormalizer {
    pub max_image_dimension: u32,
    pub max_markup_bytes: usize,
}

impl Default for ArtifactNormalizer {
    fn default() -> Self {
        Self {
            max_image_dimension: DEFAULT_MAX_IMAGE_DIMENSION,
            max_markup_bytes: DEFAULT_MAX_MARKUP_BYTES,
        }
    }
}

impl ArtifactNormalizer {
    pub fn new(max_image_dimension: u32, max_markup_bytes: usize) -> Self {
        Self {
            max_image_dimension,
            max_markup_bytes,
        }
    }

    pub fn normalize(&self, raw: &RawArtifact) -> Result<Artifact> {
        let kind = ArtifactKind::parse(&raw.declared_kind)?;
        if raw.bytes.is_empty() {
            return Err(EvalError::unsupported(kind.to_string(), "artifact is empty"));
        }
        let artifact = match kind {
            ArtifactKind::Image => self.normalize_image(&raw.bytes)?,
            ArtifactKind::Markup => self.normalize_markup(&raw.bytes)?,
        };
        debug!(
            kind = %artifact.kind(),
            digest = %artifact.artifact_ref().short(),
            bytes = artifact.metadata().byte_len,
            "artifact normalized"
        );
        Ok(artifact)
    }

    fn normalize_image(&self, bytes: &[u8]) -> Result<Artifact> {
        let format = image::guess_format(bytes)
            .map_err(|_| EvalError::unsupported("image", "unrecognized image encoding"))?;
        let source_format = match format {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Gif => "gif",
            ImageFormat::WebP => "webp",
            other => {
                return Err(EvalError::unsupported(
                    "image",
                    format!("image format {other:?} is not supported"),
                ))
            }
        };

        let decoded = image::load_from_memory_with_format(bytes, format)
            .map_err(|e| EvalError::unsupported("image", format!("decode failed: {e}")))?;
        let original = decoded.dimensions();

        let bound = self.max_image_dimension.max(1);
        let resized = if original.0 > bound || original.1 > bound {
            decoded.resize(bound, bound, FilterType::Triangle)
        } else {
            decoded
        };
        let canonical = DynamicImage::ImageRgba8(resized.to_rgba8());
        let dimensions = canonical.dimensions();

        let mut png = Vec::new();
        canonical
            .write_to(&mut Cursor::new(&mut png), ImageOutputFormat::Png)
            .map_err(|e| EvalError::unsupported("image", format!("re-encode failed: {e}")))?;

        let metadata = ArtifactMetadata {
            mime_type: "image/png".to_string(),
            source_format: Some(source_format.to_string()),
            original_dimensions: Some(original),
            dimensions: Some(dimensions),
            byte_len: png.len(),
        };
        Ok(Artifact::new(ArtifactContent::Image(png), metadata))
    }

    fn normalize_markup(&self, bytes: &[u8]) -> Result<Artifact> {
        if bytes.len() > self.max_markup_bytes {
            return Err(EvalError::unsupported(
                "markup",
                format!(
                    "markup is {} bytes, limit is {}",
                    bytes.len(),
                    self.max_markup_bytes
                ),
            ));
        }
        let text = std::str::from_utf8(bytes)
            .map_err(|_| EvalError::unsupported("markup", "markup is not valid UTF-8"))?;
        let cleaned = clean_markup(text);
        if cleaned.is_empty() {
            return Err(EvalError::unsupported(
                "markup",
                "markup has no content after cleaning",
            ));
        }
        let metadata = ArtifactMetadata {
            mime_type: "text/html".to_string(),
            source_format: None,
            original_dimensions: None,
            dimensions: None,
            byte_len: cleaned.len(),
        };
        Ok(Artifact::new(ArtifactContent::Markup(cleaned), metadata))
    }
}

fn markup_noise() -> &'static Regex {
    static NOISE: OnceLock<Regex> = OnceLock::new();
    NOISE.get_or_init(|| {
        Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<!--.*?-->")
            .expect("static markup pattern")
    })
}

fn inline_space() -> &'static Regex {
    static SPACE: OnceLock<Regex> = OnceLock::new();
    SPACE.get_or_init(|| Regex::new(r"[ \t\x0B\x0C]+").expect("static whitespace pattern"))
}

/// Strip scripts, styles and comments; collapse whitespace; drop blank lines.
pub fn clean_markup(text: &str) -> String {
    let stripped = markup_noise().replace_all(text, "");
    let unified = stripped.replace("\r\n", "\n").replace('\r', "\n");
    unified
        .lines()
        .map(|line| inline_space().replace_all(line.trim(), " ").into_owned())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
        });
        let mut out = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut out), ImageOutputFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn test_video_kind_is_unsupported() {
        let err = ArtifactNormalizer::default()
            .normalize(&RawArtifact::new("video", b"\x00\x00\x00\x18ftypmp42".to_vec()))
            .unwrap_err();
        match err {
            EvalError::UnsupportedArtifact { kind, .. } => assert_eq!(kind, "video"),
            other => panic!("expected unsupported artifact, got {other:?}"),
        }
    }

    #[test]
    fn test_markup_is_cleaned() {
        let raw = RawArtifact::markup(
            "<html>\r\n<head><style>body { color: red }</style>\n<script>alert(1)</script></head>\n\
             <!-- hidden -->\n<body>   <button>   </button>\t\t<p>Hi</p>\n\n\n</body></html>",
        );
        let artifact = ArtifactNormalizer::default().normalize(&raw).unwrap();
        let text = artifact.markup().unwrap();
        assert!(!text.contains("alert"));
        assert!(!text.contains("color: red"));
        assert!(!text.contains("hidden"));
        assert!(text.contains("<button> </button> <p>Hi</p>"));
        assert!(!text.contains("\n\n"));
        assert_eq!(artifact.kind(), ArtifactKind::Markup);
    }

    #[test]
    fn test_identical_input_gives_identical_artifact() {
        let normalizer = ArtifactNormalizer::default();
        let raw = RawArtifact::new("png", png_bytes(40, 30));
        let a = normalizer.normalize(&raw).unwrap();
        let b = normalizer.normalize(&raw).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_large_image_is_downscaled_preserving_aspect() {
        let normalizer = ArtifactNormalizer::new(100, DEFAULT_MAX_MARKUP_BYTES);
        let artifact = normalizer
            .normalize(&RawArtifact::new("image", png_bytes(400, 200)))
            .unwrap();
        let meta = artifact.metadata();
        assert_eq!(meta.original_dimensions, Some((400, 200)));
        assert_eq!(meta.dimensions, Some((100, 50)));
        assert_eq!(meta.mime_type, "image/png");
        assert_eq!(meta.source_format.as_deref(), Some("png"));
        assert!(artifact.image_png().unwrap().starts_with(b"\x89PNG"));
    }

    #[test]
    fn test_garbage_image_bytes_are_unsupported() {
        let err = ArtifactNormalizer::default()
            .normalize(&RawArtifact::new("image", b"definitely not an image".to_vec()))
            .unwrap_err();
        assert!(matches!(err, EvalError::UnsupportedArtifact { .. }));
    }

    #[test]
    fn test_markup_limits() {
        let normalizer = ArtifactNormalizer::new(DEFAULT_MAX_IMAGE_DIMENSION, 8);
        assert!(normalizer
            .normalize(&RawArtifact::markup("<div>too long</div>"))
            .is_err());
        assert!(ArtifactNormalizer::default()
            .normalize(&RawArtifact::new("html", vec![0xff, 0xfe, 0xfd]))
            .is_err());
        assert!(ArtifactNormalizer::default()
            .normalize(&RawArtifact::markup("<!-- only a comment -->"))
            .is_err());
    }

    #[test]
    fn test_kind_aliases() {
        assert_eq!(ArtifactKind::parse("HTML").unwrap(), ArtifactKind::Markup);
        assert_eq!(ArtifactKind::parse("jpg").unwrap(), ArtifactKind::Image);
        assert!(ArtifactKind::parse("pdf").is_err());
    }
}
