//! Frame-differencing motion detector.
//!
//! Each frame is decoded to luma and compared with the previous one. A frame
//! counts as motion when more than `changed_pixel_floor` pixels differ by more
//! than `threshold`. After a trigger the detector keeps reporting motion for
//! `cooldown_frames` further frames without re-evaluating.

use camwatch_stream::Frame;
use image::GrayImage;
use thiserror::Error;

/// Minimum changed-pixel count for motion, a 50x50 region
pub const CHANGED_PIXEL_FLOOR: u64 = 50 * 50;

/// Default intensity difference a pixel must exceed to count as changed
pub const DEFAULT_THRESHOLD: u8 = 100;

/// Default number of frames reported active after a trigger
pub const DEFAULT_COOLDOWN_FRAMES: u32 = 100;

/// Frame payload could not be decoded
#[derive(Debug, Error)]
#[error("failed to decode frame ({len} bytes): {source}")]
pub struct DecodeError {
    pub len: usize,
    #[source]
    pub source: image::ImageError,
}

/// Detector tuning
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MotionConfig {
    pub threshold: u8,
    pub changed_pixel_floor: u64,
    pub cooldown_frames: u32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            changed_pixel_floor: CHANGED_PIXEL_FLOOR,
            cooldown_frames: DEFAULT_COOLDOWN_FRAMES,
        }
    }
}

/// Detector state between frames
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionPhase {
    /// No cooldown pending, the next frame is evaluated
    Stable,
    /// The next `remaining` frames report motion unconditionally
    Active { remaining: u32 },
}

/// Motion detector with cooldown hysteresis
pub struct MotionDetector {
    config: MotionConfig,
    remaining_cooldown: u32,
    last_image: Option<GrayImage>,
}

impl MotionDetector {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            remaining_cooldown: 0,
            last_image: None,
        }
    }

    /// Feed one encoded frame; returns whether activity is reported.
    pub fn update(&mut self, frame: &Frame) -> Result<bool, DecodeError> {
        let gray = decode_luma(frame)?;
        Ok(self.update_decoded(gray))
    }

    /// Feed one already decoded frame.
    ///
    /// History always advances to `gray`, whatever the phase.
    pub fn update_decoded(&mut self, gray: GrayImage) -> bool {
        if self.remaining_cooldown > 0 {
            self.remaining_cooldown -= 1;
            self.last_image = Some(gray);
            return true;
        }

        let moved = match &self.last_image {
            Some(last) => changed_pixels(last, &gray, self.config.threshold)
                .is_some_and(|count| count > self.config.changed_pixel_floor),
            // Bootstrap frame
            None => false,
        };
        self.last_image = Some(gray);

        if moved {
            self.remaining_cooldown = self.config.cooldown_frames;
        }
        moved
    }

    pub fn phase(&self) -> MotionPhase {
        match self.remaining_cooldown {
            0 => MotionPhase::Stable,
            remaining => MotionPhase::Active { remaining },
        }
    }

    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    /// Forget history and cooldown
    pub fn reset(&mut self) {
        self.remaining_cooldown = 0;
        self.last_image = None;
    }
}

impl Default for MotionDetector {
    fn default() -> Self {
        Self::new(MotionConfig::default())
    }
}

/// Decode an encoded frame to an 8-bit luma image at native resolution
pub fn decode_luma(frame: &Frame) -> Result<GrayImage, DecodeError> {
    image::load_from_memory(frame.as_bytes())
        .map(|img| img.into_luma8())
        .map_err(|source| DecodeError {
            len: frame.len(),
            source,
        })
}

/// Count pixels whose absolute difference exceeds `threshold`.
/// `None` when the images differ in size.
pub fn changed_pixels(previous: &GrayImage, current: &GrayImage, threshold: u8) -> Option<u64> {
    if previous.dimensions() != current.dimensions() {
        return None;
    }

    let count = previous
        .as_raw()
        .iter()
        .zip(current.as_raw())
        .filter(|(a, b)| a.abs_diff(**b) > threshold)
        .count();
    Some(count as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Luma};
    use proptest::prelude::*;
    use std::io::Cursor;

    fn uniform(width: u32, height: u32, value: u8) -> GrayImage {
        GrayImage::from_pixel(width, height, Luma([value]))
    }

    fn with_region(mut img: GrayImage, size: u32, value: u8) -> GrayImage {
        for y in 0..size {
            for x in 0..size {
                img.put_pixel(x, y, Luma([value]));
            }
        }
        img
    }

    fn encode(img: &GrayImage, format: ImageFormat) -> Frame {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(img.clone())
            .write_to(&mut buf, format)
            .unwrap();
        Frame::from(buf.into_inner())
    }

    fn detector(cooldown_frames: u32) -> MotionDetector {
        MotionDetector::new(MotionConfig {
            threshold: 100,
            changed_pixel_floor: CHANGED_PIXEL_FLOOR,
            cooldown_frames,
        })
    }

    #[test]
    fn test_changed_pixels_threshold_is_strict() {
        let a = uniform(10, 10, 0);
        let b = with_region(uniform(10, 10, 0), 5, 100);
        assert_eq!(changed_pixels(&a, &b, 100), Some(0));
        let c = with_region(uniform(10, 10, 0), 5, 101);
        assert_eq!(changed_pixels(&a, &c, 100), Some(25));
        assert_eq!(changed_pixels(&c, &a, 100), Some(25));
    }

    #[test]
    fn test_changed_pixels_size_mismatch() {
        assert_eq!(changed_pixels(&uniform(4, 4, 0), &uniform(4, 5, 0), 10), None);
    }

    #[test]
    fn test_floor_is_strict() {
        // Exactly 2500 changed pixels is not motion, 2501 is
        let mut det = detector(0);
        det.update_decoded(uniform(100, 100, 0));
        assert!(!det.update_decoded(with_region(uniform(100, 100, 0), 50, 255)));

        let mut det = detector(0);
        det.update_decoded(uniform(100, 100, 0));
        let mut img = with_region(uniform(100, 100, 0), 50, 255);
        img.put_pixel(99, 99, Luma([255]));
        assert!(det.update_decoded(img));
    }

    #[test]
    fn test_cooldown_scenario() {
        let mut det = detector(20);
        let a = uniform(600, 600, 50);
        let b = with_region(a.clone(), 500, 200);

        assert!(!det.update_decoded(a));
        assert!(det.update_decoded(b.clone()));
        assert_eq!(det.phase(), MotionPhase::Active { remaining: 20 });

        for _ in 0..20 {
            assert!(det.update_decoded(b.clone()));
        }
        assert_eq!(det.phase(), MotionPhase::Stable);
        assert!(!det.update_decoded(b));
    }

    #[test]
    fn test_history_advances_during_cooldown() {
        let mut det = detector(1);
        let dark = uniform(100, 100, 0);
        let bright = uniform(100, 100, 255);

        assert!(!det.update_decoded(dark.clone()));
        assert!(det.update_decoded(bright.clone()));
        // Cooldown frame; history becomes `dark` again
        assert!(det.update_decoded(dark.clone()));
        // Compared against `dark`, not `bright`
        assert!(!det.update_decoded(dark));
    }

    #[test]
    fn test_zero_cooldown_reports_trigger_only() {
        let mut det = detector(0);
        det.update_decoded(uniform(100, 100, 0));
        assert!(det.update_decoded(uniform(100, 100, 255)));
        assert!(!det.update_decoded(uniform(100, 100, 255)));
    }

    #[test]
    fn test_resolution_change_rebootstraps() {
        let mut det = detector(5);
        det.update_decoded(uniform(100, 100, 0));
        assert!(!det.update_decoded(uniform(120, 100, 255)));
        assert!(det.update_decoded(uniform(120, 100, 0)));
    }

    #[test]
    fn test_update_decodes_png_and_jpeg() {
        let a = uniform(200, 200, 30);
        let b = with_region(a.clone(), 100, 230);

        let mut det = detector(3);
        assert!(!det.update(&encode(&a, ImageFormat::Png)).unwrap());
        assert!(det.update(&encode(&b, ImageFormat::Png)).unwrap());

        let mut det = detector(3);
        assert!(!det.update(&encode(&a, ImageFormat::Jpeg)).unwrap());
        assert!(det.update(&encode(&b, ImageFormat::Jpeg)).unwrap());
    }

    #[test]
    fn test_malformed_frame_is_decode_error() {
        let mut det = detector(3);
        let err = det.update(&Frame::from(vec![0xFF, 0xD8, 0x00, 0x13])).unwrap_err();
        assert_eq!(err.len, 4);
        // A failed decode leaves the detector untouched
        assert_eq!(det.phase(), MotionPhase::Stable);
        assert!(!det.update(&encode(&uniform(8, 8, 0), ImageFormat::Png)).unwrap());
    }

    #[test]
    fn test_reset_forgets_history() {
        let mut det = detector(10);
        det.update_decoded(uniform(100, 100, 0));
        det.update_decoded(uniform(100, 100, 255));
        det.reset();
        assert_eq!(det.phase(), MotionPhase::Stable);
        assert!(!det.update_decoded(uniform(100, 100, 0)));
    }

    fn small_image() -> impl Strategy<Value = GrayImage> {
        (1u32..24, 1u32..24).prop_flat_map(|(w, h)| {
            prop::collection::vec(any::<u8>(), (w * h) as usize)
                .prop_map(move |pixels| GrayImage::from_raw(w, h, pixels).unwrap())
        })
    }

    proptest! {
        #[test]
        fn prop_first_update_never_reports_motion(
            img in small_image(),
            threshold in any::<u8>(),
            cooldown in 0u32..50,
        ) {
            let mut det = MotionDetector::new(MotionConfig {
                threshold,
                changed_pixel_floor: 0,
                cooldown_frames: cooldown,
            });
            prop_assert!(!det.update_decoded(img));
        }

        #[test]
        fn prop_repeated_frame_is_still(img in small_image(), threshold in any::<u8>()) {
            let mut det = MotionDetector::new(MotionConfig {
                threshold,
                changed_pixel_floor: 0,
                cooldown_frames: 7,
            });
            det.update_decoded(img.clone());
            prop_assert!(!det.update_decoded(img));
        }

        #[test]
        fn prop_cooldown_masks_exactly_n_frames(n in 1u32..40) {
            let mut det = detector(n);
            let still = uniform(60, 60, 0);
            let moved = uniform(60, 60, 255);

            prop_assert!(!det.update_decoded(still));
            prop_assert!(det.update_decoded(moved.clone()));
            for _ in 0..n {
                prop_assert!(det.update_decoded(moved.clone()));
            }
            prop_assert!(!det.update_decoded(moved));
        }
    }
}
