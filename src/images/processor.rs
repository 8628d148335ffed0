//! Pure CPU image transformations: fixed-resolution character variants and
//! bounded-size compression for general/profile uploads.
//!
//! All functions here are synchronous and CPU-bound; callers run them through
//! `tokio::task::spawn_blocking` to keep the async runtime free.

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::webp::{WebPEncoder, WebPQuality};
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, GenericImageView, ImageOutputFormat};
use thiserror::Error;
use tracing::debug;

/// Target long-edge sizes with their storage-key suffixes, largest first.
pub const CHARACTER_TARGETS: [(u32, &str); 4] =
    [(2000, ""), (1000, "-lg"), (500, "-md"), (200, "-sm")];

const CHARACTER_QUALITY: u8 = 85;

pub const GENERAL_MAX_BYTES: usize = 300 * 1024;
pub const GENERAL_MAX_DIM: u32 = 1920;
pub const PROFILE_MAX_BYTES: usize = 50 * 1024;
pub const PROFILE_DIM: u32 = 400;

const WEBP_START_QUALITY: u8 = 85;
const JPEG_START_QUALITY: u8 = 80;
const QUALITY_STEP: u8 = 10;
const QUALITY_FLOOR: u8 = 20;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("failed to encode image: {0}")]
    Encode(#[source] image::ImageError),
}

/// One processed rendition. Dimensions are read back from the processed
/// pixels and `data.len()` is the authoritative byte size; neither is derived
/// from the resize parameters.
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub content_type: String,
    pub ext: String,
}

#[derive(Debug, Clone)]
pub struct CharacterVariant {
    pub suffix: &'static str,
    pub target_size: u32,
    pub undersized: bool,
    pub image: ProcessedImage,
}

#[derive(Debug)]
pub struct CharacterSet {
    pub variants: Vec<CharacterVariant>,
    /// Set when the source cannot fill the largest target resolution.
    pub quality_warning: bool,
}

/// Generate the four fixed-resolution character variants as lossy WebP with
/// alpha preserved. Variants are fit-inside resized and never upscaled: a
/// source smaller than a target keeps its native resolution and is flagged
/// `undersized`.
pub fn character_set(data: &[u8]) -> Result<CharacterSet, ImageError> {
    let img = image::load_from_memory(data).map_err(ImageError::Decode)?;
    let (src_w, src_h) = img.dimensions();
    let long_edge = src_w.max(src_h);
    let quality_warning = long_edge < CHARACTER_TARGETS[0].0;

    let mut variants = Vec::with_capacity(CHARACTER_TARGETS.len());
    for (target, suffix) in CHARACTER_TARGETS {
        let undersized = long_edge < target;
        let resized = if undersized {
            img.clone()
        } else {
            img.resize(target, target, FilterType::Lanczos3)
        };
        let (w, h) = resized.dimensions();
        let encoded = encode_webp(&resized, CHARACTER_QUALITY)?;
        debug!(target, w, h, size = encoded.len(), "character variant encoded");
        variants.push(CharacterVariant {
            suffix,
            target_size: target,
            undersized,
            image: ProcessedImage {
                data: Bytes::from(encoded),
                width: w,
                height: h,
                content_type: "image/webp".into(),
                ext: "webp".into(),
            },
        });
    }

    Ok(CharacterSet {
        variants,
        quality_warning,
    })
}

/// Compress an arbitrary upload to fit 300 KB and 1920 px on both axes.
///
/// An input already inside both bounds is returned byte-identical with its
/// declared content type; a conforming file is never re-encoded. Otherwise
/// the image is downscaled (never enlarged) and re-encoded through the WebP
/// quality ladder, falling back to JPEG when WebP cannot reach the byte
/// target. The JPEG floor result is accepted as-is: the byte bound is
/// best-effort, not guaranteed.
pub fn compress_general(data: &[u8], declared_mime: &str) -> Result<ProcessedImage, ImageError> {
    let img = image::load_from_memory(data).map_err(ImageError::Decode)?;
    let (w, h) = img.dimensions();

    if data.len() <= GENERAL_MAX_BYTES && w <= GENERAL_MAX_DIM && h <= GENERAL_MAX_DIM {
        return Ok(ProcessedImage {
            data: Bytes::copy_from_slice(data),
            width: w,
            height: h,
            content_type: declared_mime.to_string(),
            ext: ext_for_mime(declared_mime).to_string(),
        });
    }

    let resized = if w > GENERAL_MAX_DIM || h > GENERAL_MAX_DIM {
        img.resize(GENERAL_MAX_DIM, GENERAL_MAX_DIM, FilterType::Lanczos3)
    } else {
        img
    };

    encode_bounded(&resized, GENERAL_MAX_BYTES)
}

/// Profile pictures are center-cropped to a square and cover-resized to
/// exactly 400x400 (enlarging small sources), then pushed through the same
/// quality ladder against the stricter 50 KB bound.
pub fn compress_profile(data: &[u8]) -> Result<ProcessedImage, ImageError> {
    let img = image::load_from_memory(data).map_err(ImageError::Decode)?;
    let (w, h) = img.dimensions();
    let edge = w.min(h);
    let cropped = img.crop_imm((w - edge) / 2, (h - edge) / 2, edge, edge);
    let resized = cropped.resize_exact(PROFILE_DIM, PROFILE_DIM, FilterType::Lanczos3);

    encode_bounded(&resized, PROFILE_MAX_BYTES)
}

fn encode_bounded(img: &DynamicImage, max_bytes: usize) -> Result<ProcessedImage, ImageError> {
    let (w, h) = img.dimensions();

    let (webp, webp_q) = encode_until_fits(img, WEBP_START_QUALITY, max_bytes, encode_webp)?;
    if webp.len() <= max_bytes {
        debug!(w, h, quality = webp_q, size = webp.len(), "webp fit");
        return Ok(ProcessedImage {
            data: Bytes::from(webp),
            width: w,
            height: h,
            content_type: "image/webp".into(),
            ext: "webp".into(),
        });
    }

    let (jpeg, jpeg_q) = encode_until_fits(img, JPEG_START_QUALITY, max_bytes, encode_jpeg)?;
    debug!(w, h, quality = jpeg_q, size = jpeg.len(), "jpeg fallback");
    Ok(ProcessedImage {
        data: Bytes::from(jpeg),
        width: w,
        height: h,
        content_type: "image/jpeg".into(),
        ext: "jpg".into(),
    })
}

/// Re-encode at descending quality until the output fits `max_bytes` or the
/// next step would cross the quality floor. The floor-quality result is
/// returned even when it is still oversized.
fn encode_until_fits(
    img: &DynamicImage,
    start_quality: u8,
    max_bytes: usize,
    encode: fn(&DynamicImage, u8) -> Result<Vec<u8>, ImageError>,
) -> Result<(Vec<u8>, u8), ImageError> {
    let mut quality = start_quality;
    let mut out = encode(img, quality)?;
    while out.len() > max_bytes && quality >= QUALITY_FLOOR + QUALITY_STEP {
        quality -= QUALITY_STEP;
        out = encode(img, quality)?;
    }
    Ok((out, quality))
}

fn encode_webp(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let rgba = img.to_rgba8();
    let mut buf = Vec::new();
    let encoder = WebPEncoder::new_with_quality(&mut buf, WebPQuality::lossy(quality));
    encoder
        .encode(rgba.as_raw(), rgba.width(), rgba.height(), ColorType::Rgba8)
        .map_err(ImageError::Encode)?;
    Ok(buf)
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    // JPEG has no alpha channel; flatten first.
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Jpeg(quality))
        .map_err(ImageError::Encode)?;
    Ok(buf)
}

pub(crate) fn ext_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
}

#[cfg(test)]
mod processor_tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([120, 30, 200, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .expect("encode test png");
        buf
    }

    #[test]
    fn character_set_produces_four_variants_with_suffixes() {
        let set = character_set(&png_bytes(2400, 1200)).expect("process");
        assert_eq!(set.variants.len(), 4);
        let suffixes: Vec<&str> = set.variants.iter().map(|v| v.suffix).collect();
        assert_eq!(suffixes, vec!["", "-lg", "-md", "-sm"]);
        assert!(!set.quality_warning);
        for v in &set.variants {
            assert!(!v.undersized);
            assert!(v.image.width.max(v.image.height) <= v.target_size);
            assert_eq!(v.image.content_type, "image/webp");
            assert!(!v.image.data.is_empty());
        }
        // Aspect ratio preserved on the largest variant.
        assert_eq!(set.variants[0].image.width, 2000);
        assert_eq!(set.variants[0].image.height, 1000);
    }

    #[test]
    fn character_set_never_upscales_small_sources() {
        let set = character_set(&png_bytes(1000, 500)).expect("process");
        assert!(set.quality_warning);

        let largest = &set.variants[0];
        assert!(largest.undersized);
        assert_eq!(largest.image.width, 1000);
        assert_eq!(largest.image.height, 500);

        // The 1000px target is exactly filled, not undersized.
        let lg = &set.variants[1];
        assert!(!lg.undersized);
        assert_eq!(lg.image.width, 1000);

        let sm = &set.variants[3];
        assert!(!sm.undersized);
        assert_eq!(sm.image.width, 200);
        assert_eq!(sm.image.height, 100);
    }

    #[test]
    fn quality_warning_tracks_largest_target() {
        assert!(character_set(&png_bytes(1999, 50)).unwrap().quality_warning);
        assert!(!character_set(&png_bytes(2000, 50)).unwrap().quality_warning);
    }

    #[test]
    fn conforming_input_passes_through_byte_identical() {
        let input = png_bytes(800, 600);
        assert!(input.len() <= GENERAL_MAX_BYTES);
        let out = compress_general(&input, "image/png").expect("process");
        assert_eq!(out.data.as_ref(), input.as_slice());
        assert_eq!(out.content_type, "image/png");
        assert_eq!(out.ext, "png");
        assert_eq!((out.width, out.height), (800, 600));
    }

    #[test]
    fn oversized_dimensions_are_clamped_and_reencoded() {
        let input = png_bytes(2500, 1000);
        let out = compress_general(&input, "image/png").expect("process");
        assert_eq!(out.width, GENERAL_MAX_DIM);
        assert_eq!(out.height, 768);
        assert!(out.data.len() <= GENERAL_MAX_BYTES);
        assert_eq!(out.content_type, "image/webp");
    }

    #[test]
    fn profile_is_square_cover_cropped() {
        let out = compress_profile(&png_bytes(800, 600)).expect("process");
        assert_eq!((out.width, out.height), (PROFILE_DIM, PROFILE_DIM));
        assert!(out.data.len() <= PROFILE_MAX_BYTES);
        assert_eq!(out.content_type, "image/webp");
    }

    #[test]
    fn profile_enlarges_small_sources_to_fixed_dimension() {
        let out = compress_profile(&png_bytes(120, 90)).expect("process");
        assert_eq!((out.width, out.height), (PROFILE_DIM, PROFILE_DIM));
    }

    #[test]
    fn garbage_input_is_a_decode_error() {
        let err = compress_general(b"not an image", "image/png").unwrap_err();
        assert!(matches!(err, ImageError::Decode(_)));
        assert!(matches!(
            compress_profile(b"not an image").unwrap_err(),
            ImageError::Decode(_)
        ));
    }

    // Quality-ladder behavior is pinned with a fake encoder whose output
    // size is proportional to the requested quality.
    fn fake_encode(_img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImageError> {
        Ok(vec![0u8; quality as usize * 1000])
    }

    #[test]
    fn ladder_stops_at_first_fitting_quality() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255])));
        let (out, q) = encode_until_fits(&img, 85, 60_000, fake_encode).unwrap();
        assert_eq!(q, 55);
        assert_eq!(out.len(), 55_000);
    }

    #[test]
    fn webp_ladder_never_crosses_the_floor() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255])));
        // An unreachable target exhausts the ladder: 85 descends to 25 and
        // stops because the next step would be <= 20.
        let (out, q) = encode_until_fits(&img, 85, 10, fake_encode).unwrap();
        assert_eq!(q, 25);
        assert!(out.len() > 10);
    }

    #[test]
    fn jpeg_ladder_bottoms_out_exactly_at_floor() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255])));
        let (_, q) = encode_until_fits(&img, 80, 10, fake_encode).unwrap();
        assert_eq!(q, QUALITY_FLOOR);
    }

    #[test]
    fn ext_for_mime_covers_accepted_types() {
        assert_eq!(ext_for_mime("image/jpeg"), "jpg");
        assert_eq!(ext_for_mime("image/png"), "png");
        assert_eq!(ext_for_mime("image/gif"), "gif");
        assert_eq!(ext_for_mime("image/webp"), "webp");
        assert_eq!(ext_for_mime("application/octet-stream"), "bin");
    }
}
