use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::{imageops::FilterType, DynamicImage, Rgb, RgbImage};
use xcap::Monitor;

use crate::cache::TtlCache;
use crate::codec::{CaptureOptions, Region};
use crate::errors::{PilotError, PilotResult};

/// Pixels above this luma become white in black-and-white mode.
const BW_THRESHOLD: u8 = 200;
/// Two-tone frames compress well; quality can drop without losing text.
const BW_QUALITY: u8 = 50;
const MAX_CACHED_FRAMES: usize = 8;
const ERROR_IMAGE_SIZE: (u32, u32) = (320, 240);

/// Identity of a capture for dedup purposes. The time bucket quantizes the
/// clock so captures within one TTL interval share an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CaptureKey {
    region: Option<Region>,
    grayscale: bool,
    bw_mode: bool,
    monitor_index: usize,
    time_bucket: u64,
}

/// Grabs frames from one monitor and shapes them for transmission: crop,
/// downscale to the model's display size, optional grayscale or two-tone,
/// JPEG, base64. Recent frames are cached by capture identity.
pub struct ScreenCapturer {
    monitor_index: usize,
    quality: u8,
    cache_ttl_secs: u64,
    model_width: u32,
    model_height: u32,
    cache: TtlCache<CaptureKey, String>,
}

impl ScreenCapturer {
    pub fn new(
        monitor_index: usize,
        quality: u8,
        cache_ttl_secs: u64,
        model_width: u32,
        model_height: u32,
    ) -> Self {
        Self {
            monitor_index,
            quality,
            cache_ttl_secs,
            model_width,
            model_height,
            cache: TtlCache::new(Duration::from_secs(cache_ttl_secs.max(1))),
        }
    }

    /// Base64 JPEG of the current screen under the given options. Cached
    /// frames short-circuit the OS grab entirely.
    pub fn capture(&mut self, options: &CaptureOptions) -> PilotResult<String> {
        let key = CaptureKey {
            region: options.region,
            grayscale: options.grayscale,
            bw_mode: options.bw_mode,
            monitor_index: self.monitor_index,
            time_bucket: time_bucket(unix_now_secs(), self.cache_ttl_secs),
        };
        if let Some(frame) = self.cache.get(&key) {
            tracing::debug!("screenshot served from cache");
            return Ok(frame);
        }

        let monitor = self.monitor()?;
        let rgba = monitor
            .capture_image()
            .map_err(|e| PilotError::Capture(format!("screen grab failed: {e}")))?;
        let frame = process_frame(
            DynamicImage::ImageRgba8(rgba),
            options,
            self.model_width,
            self.model_height,
            self.quality,
        )?;

        self.cache.purge_expired();
        self.cache.insert(key, frame.clone());
        self.cache.evict_to(MAX_CACHED_FRAMES);
        Ok(frame)
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    fn monitor(&self) -> PilotResult<Monitor> {
        let monitors = Monitor::all()
            .map_err(|e| PilotError::Capture(format!("monitor enumeration failed: {e}")))?;
        if monitors.is_empty() {
            return Err(PilotError::Capture("no monitors detected".into()));
        }
        let position = monitors
            .iter()
            .position(|m| m.is_primary())
            .unwrap_or(0);
        let index = if self.monitor_index < monitors.len() {
            self.monitor_index
        } else {
            tracing::warn!(
                requested = self.monitor_index,
                available = monitors.len(),
                "monitor index out of range, using primary"
            );
            position
        };
        monitors
            .into_iter()
            .nth(index)
            .ok_or_else(|| PilotError::Capture(format!("monitor {index} disappeared")))
    }
}

/// Pure image pipeline, separated from the OS grab so it can be exercised on
/// synthetic frames.
pub fn process_frame(
    image: DynamicImage,
    options: &CaptureOptions,
    model_width: u32,
    model_height: u32,
    quality: u8,
) -> PilotResult<String> {
    let image = match options.region {
        Some(region) => image.crop_imm(region.x, region.y, region.width, region.height),
        None => image,
    };
    let image = image.resize_exact(model_width, model_height, FilterType::Triangle);

    let mut buffer = Vec::new();
    if options.bw_mode {
        let mut gray = image.to_luma8();
        for pixel in gray.pixels_mut() {
            pixel.0[0] = if pixel.0[0] > BW_THRESHOLD { 255 } else { 0 };
        }
        encode_jpeg(&mut buffer, BW_QUALITY, |mut enc| enc.encode_image(&gray))?;
    } else if options.grayscale {
        let gray = image.to_luma8();
        encode_jpeg(&mut buffer, quality, |mut enc| enc.encode_image(&gray))?;
    } else {
        let rgb = image.to_rgb8();
        encode_jpeg(&mut buffer, quality, |mut enc| enc.encode_image(&rgb))?;
    }
    Ok(BASE64.encode(buffer))
}

fn encode_jpeg(
    buffer: &mut Vec<u8>,
    quality: u8,
    encode: impl FnOnce(JpegEncoder<&mut Vec<u8>>) -> image::ImageResult<()>,
) -> PilotResult<()> {
    encode(JpegEncoder::new_with_quality(buffer, quality))
        .map_err(|e| PilotError::Capture(format!("jpeg encoding failed: {e}")))
}

/// Solid red placeholder sent instead of a frame when capture fails, so the
/// model sees an unambiguous signal rather than a stale screen.
pub fn error_image() -> String {
    let (width, height) = ERROR_IMAGE_SIZE;
    let red = RgbImage::from_pixel(width, height, Rgb([255, 0, 0]));
    let mut buffer = Vec::new();
    // Encoding a fixed in-memory image cannot fail in practice; fall back to
    // an empty payload rather than propagate from the error path.
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, BW_QUALITY);
    if let Err(err) = encoder.encode_image(&red) {
        tracing::error!(error = %err, "error placeholder encoding failed");
        return String::new();
    }
    BASE64.encode(buffer)
}

pub fn time_bucket(now_secs: u64, ttl_secs: u64) -> u64 {
    now_secs / ttl_secs.max(1)
}

fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    fn checkerboard(width: u32, height: u32) -> DynamicImage {
        let img = RgbImage::from_fn(width, height, |x, y| {
            if (x / 8 + y / 8) % 2 == 0 {
                Rgb([250, 250, 250])
            } else {
                Rgb([20, 20, 20])
            }
        });
        DynamicImage::ImageRgb8(img)
    }

    fn decode(b64: &str) -> DynamicImage {
        let bytes = BASE64.decode(b64).unwrap();
        image::load_from_memory(&bytes).unwrap()
    }

    #[test]
    fn frames_are_resized_to_model_dimensions() {
        let frame = process_frame(
            checkerboard(1920, 1080),
            &CaptureOptions::default(),
            1024,
            640,
            70,
        )
        .unwrap();
        assert_eq!(decode(&frame).dimensions(), (1024, 640));
    }

    #[test]
    fn region_crop_applies_before_resize() {
        let options = CaptureOptions {
            region: Some(Region {
                x: 0,
                y: 0,
                width: 100,
                height: 50,
            }),
            ..CaptureOptions::default()
        };
        let frame = process_frame(checkerboard(1920, 1080), &options, 1024, 640, 70).unwrap();
        // Output is still model-sized; the crop changes content, not shape.
        assert_eq!(decode(&frame).dimensions(), (1024, 640));
    }

    #[test]
    fn bw_mode_produces_two_tone_output() {
        let options = CaptureOptions {
            bw_mode: true,
            ..CaptureOptions::default()
        };
        let frame = process_frame(checkerboard(640, 400), &options, 320, 200, 70).unwrap();
        let gray = decode(&frame).to_luma8();
        // JPEG softens edges; every pixel must still sit near an extreme.
        assert!(gray
            .pixels()
            .all(|p| p.0[0] < 100 || p.0[0] > 155));
    }

    #[test]
    fn error_image_is_red_and_small() {
        let img = decode(&error_image());
        assert_eq!(img.dimensions(), ERROR_IMAGE_SIZE);
        let rgb = img.to_rgb8();
        let center = rgb.get_pixel(160, 120);
        assert!(center.0[0] > 200 && center.0[1] < 60 && center.0[2] < 60);
    }

    #[test]
    fn time_bucket_quantizes_by_ttl() {
        assert_eq!(time_bucket(0, 5), 0);
        assert_eq!(time_bucket(4, 5), 0);
        assert_eq!(time_bucket(5, 5), 1);
        assert_eq!(time_bucket(100, 0), 100);
    }
}
