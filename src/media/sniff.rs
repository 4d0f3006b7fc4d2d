use image::{ImageFormat, ImageReader, Limits};
use std::io::Cursor;

/// Largest width or height a decoded upload may declare.
pub const MAX_IMAGE_DIMENSION: u32 = 8192;

/// Ceiling on memory the decoder may allocate for one upload.
const MAX_DECODE_ALLOC: u64 = 256 * 1024 * 1024;

/// Raster formats accepted for post images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
    WebP,
}

impl ImageKind {
    fn from_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Jpeg => Some(Self::Jpeg),
            ImageFormat::Png => Some(Self::Png),
            ImageFormat::Gif => Some(Self::Gif),
            ImageFormat::WebP => Some(Self::WebP),
            _ => None,
        }
    }

    /// Extensions that name this format; the first is canonical.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Jpeg => &["jpg", "jpeg"],
            Self::Png => &["png"],
            Self::Gif => &["gif"],
            Self::WebP => &["webp"],
        }
    }

    /// The client's extension if it names this format, else the canonical one.
    pub fn extension_for(self, original_name: &str) -> &'static str {
        let supplied = std::path::Path::new(original_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        let exts = self.extensions();
        supplied
            .and_then(|s| exts.iter().find(|e| **e == s).copied())
            .unwrap_or(exts[0])
    }
}

/// Identify `bytes` by content and prove they decode. The declared content
/// type and file name play no part. Decoding runs under fixed dimension and
/// allocation limits, so a small file declaring a huge canvas is refused.
pub fn sniff_image(bytes: &[u8]) -> Option<ImageKind> {
    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?;
    let kind = ImageKind::from_format(reader.format()?)?;

    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_IMAGE_DIMENSION);
    limits.max_image_height = Some(MAX_IMAGE_DIMENSION);
    limits.max_alloc = Some(MAX_DECODE_ALLOC);
    reader.limits(limits);

    match reader.decode() {
        Ok(_) => Some(kind),
        Err(e) => {
            tracing::debug!("Rejected upload that failed to decode as {:?}: {}", kind, e);
            None
        }
    }
}
