use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine as _;
use image::AnimationDecoder as _;

use crate::error::{SoireeError, SoireeResult};

/// Prepared raster image in premultiplied RGBA8 form.
#[derive(Clone, Debug)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    /// Pixel bytes in row-major premultiplied RGBA8.
    pub rgba8_premul: Arc<Vec<u8>>,
}

impl DecodedImage {
    pub fn from_rgba8_premul(width: u32, height: u32, rgba8_premul: Vec<u8>) -> SoireeResult<Self> {
        if rgba8_premul.len() != width as usize * height as usize * 4 {
            return Err(SoireeError::validation(
                "decoded image byte length mismatch",
            ));
        }
        Ok(Self {
            width,
            height,
            rgba8_premul: Arc::new(rgba8_premul),
        })
    }
}

/// One decoded frame of an animated source. Frames may change dimensions
/// mid-stream; consumers resize their offscreen buffers to follow.
#[derive(Clone, Debug)]
pub struct AnimationFrame {
    pub width: u32,
    pub height: u32,
    pub rgba8_premul: Vec<u8>,
    pub delay_ms: u32,
}

fn premultiply_in_place(rgba8: &mut [u8]) {
    for px in rgba8.chunks_exact_mut(4) {
        let af = u16::from(px[3]) + 1;
        for c in px.iter_mut().take(3) {
            *c = ((u16::from(*c) * af) >> 8) as u8;
        }
    }
}

/// Decode a static raster source (PNG/JPEG/WebP/BMP, or the first frame of a
/// GIF) into premultiplied RGBA8.
pub fn decode_image(bytes: &[u8]) -> SoireeResult<DecodedImage> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| SoireeError::load(format!("undecodable image: {e}")))?;
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut pixels = rgba.into_raw();
    premultiply_in_place(&mut pixels);
    DecodedImage::from_rgba8_premul(width, height, pixels)
}

/// Decode every frame of an animated GIF source.
pub fn decode_animation(bytes: &[u8]) -> SoireeResult<Vec<AnimationFrame>> {
    let decoder = image::codecs::gif::GifDecoder::new(Cursor::new(bytes))
        .map_err(|e| SoireeError::load(format!("undecodable animation: {e}")))?;
    let frames = decoder
        .into_frames()
        .collect_frames()
        .map_err(|e| SoireeError::load(format!("animation frame decode failed: {e}")))?;
    if frames.is_empty() {
        return Err(SoireeError::load("animation source has no frames"));
    }

    let mut out = Vec::with_capacity(frames.len());
    for frame in frames {
        let (delay_num, delay_den) = frame.delay().numer_denom_ms();
        let delay_ms = if delay_den == 0 {
            0
        } else {
            delay_num / delay_den
        };
        let buffer = frame.into_buffer();
        let (width, height) = buffer.dimensions();
        let mut pixels = buffer.into_raw();
        premultiply_in_place(&mut pixels);
        out.push(AnimationFrame {
            width,
            height,
            rgba8_premul: pixels,
            delay_ms,
        });
    }
    Ok(out)
}

/// Guess a MIME type from magic bytes, for inline-data fallbacks.
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xff, 0xd8, 0xff, ..] => "image/jpeg",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        _ => "application/octet-stream",
    }
}

pub fn is_data_url(source: &str) -> bool {
    source.starts_with("data:")
}

/// Embed bytes as a `data:` URL so editing can continue without a store.
pub fn inline_data_url(bytes: &[u8], mime: &str) -> String {
    format!(
        "data:{mime};base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// Extract the payload of a `data:…;base64,…` URL.
pub fn decode_data_url(source: &str) -> SoireeResult<Vec<u8>> {
    let payload = source
        .find(";base64,")
        .map(|pos| &source[pos + 8..])
        .ok_or_else(|| SoireeError::load("data URL is not base64-encoded"))?;
    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| SoireeError::load(format!("invalid base64 payload: {e}")))
}

/// Fetches raw bytes for a source reference (asset path or data URL).
///
/// Hosts with network access provide their own resolver; the engine itself
/// never blocks on I/O beyond what the resolver does.
pub trait SourceResolver {
    fn fetch(&mut self, source: &str) -> SoireeResult<Vec<u8>>;
}

/// Resolver for offline use: `data:` URLs and files under an optional root.
/// Remote URLs are refused so the caller can route them through a real host.
#[derive(Clone, Debug, Default)]
pub struct LocalSources {
    pub root: Option<PathBuf>,
}

impl LocalSources {
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }
}

impl SourceResolver for LocalSources {
    fn fetch(&mut self, source: &str) -> SoireeResult<Vec<u8>> {
        if is_data_url(source) {
            return decode_data_url(source);
        }
        if source.starts_with("http://") || source.starts_with("https://") {
            return Err(SoireeError::load(format!(
                "remote source '{source}' requires a host resolver"
            )));
        }
        let path = match &self.root {
            Some(root) => root.join(source),
            None => PathBuf::from(source),
        };
        std::fs::read(&path)
            .map_err(|e| SoireeError::load(format!("read '{}': {e}", path.display())))
    }
}

/// External asset storage. Uploads yield a URL the document can reference;
/// failures are typed so the engine can fall back to an inline copy.
pub trait AssetStore {
    fn upload(&mut self, bytes: &[u8], mime: &str) -> SoireeResult<String>;
}

/// Store used when no storage collaborator is configured: every upload fails
/// as transient, which routes the engine onto the inline-data fallback.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullAssetStore;

impl AssetStore for NullAssetStore {
    fn upload(&mut self, _bytes: &[u8], _mime: &str) -> SoireeResult<String> {
        Err(SoireeError::upload("no asset store configured"))
    }
}
