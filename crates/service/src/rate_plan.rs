//! Rate planning module
//!
//! Turns a desired output size and a probed duration into the bitrate
//! constraints handed to the encoder. Pure, no I/O.

use crate::probe::MediaProfile;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bytes per megabyte. Sizes use binary mega (MiB).
pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Error type for rate planning
#[derive(Debug, Error, PartialEq)]
pub enum RatePlanError {
    /// Target size is zero, negative, or not a number
    #[error("Invalid target size: {0} MB (must be greater than zero)")]
    InvalidTargetSize(f64),

    /// Probed duration cannot be divided by
    #[error("Invalid duration: {0} seconds (must be greater than zero)")]
    InvalidDuration(f64),

    /// The target is too small for the duration to yield even 1 bps
    #[error("Target of {target_size_mb} MB over {duration_seconds} seconds yields a zero bitrate")]
    ZeroBitrate {
        target_size_mb: f64,
        duration_seconds: f64,
    },
}

/// Encoder constraints derived from a target size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodePlan {
    /// Average video bitrate to aim for
    pub target_bitrate_bps: u64,
    /// Peak rate the encoder may burst to (1.5x target)
    pub max_bitrate_bps: u64,
    /// Rate-control buffer (2x target)
    pub buffer_size_bits: u64,
    /// Round output dimensions down to even numbers
    pub preserve_aspect_ratio: bool,
}

impl EncodePlan {
    /// Frame size the final pass will emit for `profile`.
    pub fn output_dimensions(&self, profile: &MediaProfile) -> (u32, u32) {
        if self.preserve_aspect_ratio {
            even_dimensions(profile.video.width, profile.video.height)
        } else {
            (profile.video.width, profile.video.height)
        }
    }
}

/// Plan an encode that lands near `target_size_mb` for the given profile.
///
/// `target_bitrate_bps = trunc(target_size_mb * 8 * 1048576 / duration_seconds)`,
/// `max_bitrate_bps = trunc(1.5 * target)`, `buffer_size_bits = 2 * target`.
pub fn plan(
    profile: &MediaProfile,
    target_size_mb: f64,
    preserve_aspect_ratio: bool,
) -> Result<EncodePlan, RatePlanError> {
    if !target_size_mb.is_finite() || target_size_mb <= 0.0 {
        return Err(RatePlanError::InvalidTargetSize(target_size_mb));
    }

    let duration_seconds = profile.duration_seconds;
    if !duration_seconds.is_finite() || duration_seconds <= 0.0 {
        return Err(RatePlanError::InvalidDuration(duration_seconds));
    }

    let target_bits = target_size_mb * 8.0 * BYTES_PER_MB;
    // float -> int `as` saturates, so absurd targets clamp instead of wrapping
    let target_bitrate_bps = (target_bits / duration_seconds).trunc() as u64;
    if target_bitrate_bps == 0 {
        return Err(RatePlanError::ZeroBitrate {
            target_size_mb,
            duration_seconds,
        });
    }

    Ok(EncodePlan {
        target_bitrate_bps,
        max_bitrate_bps: target_bitrate_bps.saturating_mul(3) / 2,
        buffer_size_bits: target_bitrate_bps.saturating_mul(2),
        preserve_aspect_ratio,
    })
}

/// Round both dimensions down to the nearest even integer.
pub fn even_dimensions(width: u32, height: u32) -> (u32, u32) {
    (width & !1, height & !1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::VideoStreamInfo;
    use proptest::prelude::*;

    fn profile(duration_seconds: f64, width: u32, height: u32) -> MediaProfile {
        MediaProfile {
            duration_seconds,
            bit_rate_bps: None,
            video: VideoStreamInfo {
                codec: "h264".to_string(),
                width,
                height,
                frame_rate: Some(30.0),
            },
            has_audio: true,
        }
    }

    #[test]
    fn test_sixty_seconds_eight_megabytes() {
        let plan = plan(&profile(60.0, 1920, 1080), 8.0, true).unwrap();

        assert_eq!(plan.target_bitrate_bps, 1_118_481);
        assert_eq!(plan.max_bitrate_bps, 1_677_721);
        assert_eq!(plan.buffer_size_bits, 2_236_962);
        assert!(plan.preserve_aspect_ratio);
    }

    #[test]
    fn test_zero_duration_rejected() {
        assert_eq!(
            plan(&profile(0.0, 640, 480), 8.0, false),
            Err(RatePlanError::InvalidDuration(0.0))
        );
    }

    #[test]
    fn test_non_positive_target_rejected() {
        let p = profile(10.0, 640, 480);
        assert_eq!(plan(&p, 0.0, false), Err(RatePlanError::InvalidTargetSize(0.0)));
        assert_eq!(plan(&p, -1.5, false), Err(RatePlanError::InvalidTargetSize(-1.5)));
        assert!(matches!(
            plan(&p, f64::NAN, false),
            Err(RatePlanError::InvalidTargetSize(_))
        ));
        assert!(matches!(
            plan(&p, f64::INFINITY, false),
            Err(RatePlanError::InvalidTargetSize(_))
        ));
    }

    #[test]
    fn test_bitrate_truncating_to_zero_rejected() {
        // 1 byte spread over a day is well under 1 bps
        let tiny = 1.0 / BYTES_PER_MB;
        assert!(matches!(
            plan(&profile(86_400.0, 640, 480), tiny, false),
            Err(RatePlanError::ZeroBitrate { .. })
        ));
    }

    #[test]
    fn test_odd_dimensions_rounded_down_when_preserving() {
        let p = profile(30.0, 1281, 721);
        let preserved = plan(&p, 8.0, true).unwrap();
        assert_eq!(preserved.output_dimensions(&p), (1280, 720));

        let untouched = plan(&p, 8.0, false).unwrap();
        assert_eq!(untouched.output_dimensions(&p), (1281, 721));
    }

    #[test]
    fn test_even_dimensions() {
        assert_eq!(even_dimensions(1920, 1080), (1920, 1080));
        assert_eq!(even_dimensions(1, 3), (0, 2));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_target_bitrate_formula(
            duration in 0.1f64..36_000.0,
            target_mb in 0.1f64..4096.0,
        ) {
            let plan = plan(&profile(duration, 1280, 720), target_mb, true).unwrap();
            let expected = (target_mb * 8.0 * 1024.0 * 1024.0 / duration).floor() as u64;

            prop_assert_eq!(plan.target_bitrate_bps, expected);
            prop_assert!(plan.target_bitrate_bps > 0);
        }

        #[test]
        fn prop_derived_multiples_exact(
            duration in 0.1f64..36_000.0,
            target_mb in 0.1f64..4096.0,
        ) {
            let plan = plan(&profile(duration, 1280, 720), target_mb, false).unwrap();
            let target = plan.target_bitrate_bps;

            prop_assert_eq!(plan.max_bitrate_bps, target * 3 / 2);
            prop_assert_eq!(plan.buffer_size_bits, target * 2);
            prop_assert!(plan.max_bitrate_bps >= target);
        }

        #[test]
        fn prop_non_positive_inputs_always_rejected(
            duration in -1000.0f64..=0.0,
            target_mb in -1000.0f64..=0.0,
            good_duration in 0.1f64..1000.0,
            good_target in 0.1f64..1000.0,
        ) {
            prop_assert!(matches!(
                plan(&profile(duration, 640, 480), good_target, true),
                Err(RatePlanError::InvalidDuration(_))
            ));
            prop_assert!(matches!(
                plan(&profile(good_duration, 640, 480), target_mb, true),
                Err(RatePlanError::InvalidTargetSize(_))
            ));
        }

        #[test]
        fn prop_even_dimensions_never_grow(w in 0u32..10_000, h in 0u32..10_000) {
            let (ew, eh) = even_dimensions(w, h);
            prop_assert_eq!(ew % 2, 0);
            prop_assert_eq!(eh % 2, 0);
            prop_assert!(w - ew <= 1 && h - eh <= 1);
        }
    }
}
