//! The parameter validator (C11): mutates a caller-supplied encoder
//! parameter set to repair defaults, and rejects combinations outside the
//! accelerator's contract (§4.9).
//!
//! This is the one place in the workspace that encodes cross-field rules
//! like "HRD implies RC-enable" — rules a caller should not have to
//! rediscover by trial and error against the hardware.

use crate::error::XcoderError;

/// Minimum encoder picture width in pixels.
pub const XCODER_MIN_ENC_PIC_WIDTH: u32 = 144;
/// Maximum encoder picture width in pixels.
pub const XCODER_MAX_ENC_PIC_WIDTH: u32 = 8192;
/// Minimum encoder picture height in pixels.
pub const XCODER_MIN_ENC_PIC_HEIGHT: u32 = 144;
/// Maximum encoder picture height in pixels.
pub const XCODER_MAX_ENC_PIC_HEIGHT: u32 = 8192;
/// Maximum frame rate, in frames per second, the accelerator accepts.
pub const MAX_FRAMERATE: u32 = 960;
/// Minimum configured bitrate in bits per second.
pub const MIN_BITRATE: u32 = 1000;
/// Maximum configured bitrate in bits per second.
pub const MAX_BITRATE: u32 = 700_000_000;
/// Low-delay GOP presets; 2-pass encoding is incompatible with all of
/// these (§4.9).
pub const LOW_DELAY_GOP_PRESETS: [u8; 4] = [1, 3, 7, 9];

/// The closed set of error codes the validator can emit (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamErrorCode {
    /// Catch-all for a malformed combination not covered by a more
    /// specific code.
    InvalidParam,
    /// Picture width outside `[XCODER_MIN_ENC_PIC_WIDTH,
    /// XCODER_MAX_ENC_PIC_WIDTH]`.
    ErrorPicWidth,
    /// Picture height outside the allowed range.
    ErrorPicHeight,
    /// Frame rate outside `[1, MAX_FRAMERATE]`.
    ErrorFrate,
    /// Bitrate outside `[MIN_BITRATE, MAX_BITRATE]`.
    ErrorBrate,
    /// GOP preset incompatible with another requested feature.
    ErrorGopPreset,
    /// Custom GOP structure incompatible with the selected profile.
    ErrorCustomGop,
    /// `lookAheadDepth` incompatible with another requested feature.
    ErrorLookAheadDepth,
    /// VBV buffer size missing or zero when required.
    ErrorVbvBufferSize,
    /// `intraPeriod` incompatible with `gdrDuration`.
    ErrorIntraPeriod,
    /// RC-enable missing when required by another feature.
    ErrorRcEnable,
}

/// Which codec family the encoder session targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// H.264/AVC.
    H264,
    /// H.265/HEVC.
    H265,
    /// AV1.
    Av1,
}

/// Frame rate as given by the caller, before normalization to `(num, den)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRateInput {
    /// An integer frames-per-second value (denominator defaults to 1).
    Integer(u32),
    /// An explicit fraction.
    Fraction {
        /// Numerator.
        num: u32,
        /// Denominator.
        den: u32,
    },
}

/// A custom (explicitly enumerated) GOP structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomGop {
    /// Whether any picture in the structure is a B-frame.
    pub has_b_frames: bool,
}

/// Caller-supplied encoder parameters, repaired in place by
/// [`validate_and_repair`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderParams {
    /// Target codec.
    pub codec: Codec,
    /// Picture width in pixels.
    pub width: u32,
    /// Picture height in pixels.
    pub height: u32,
    /// Requested frame rate, normalized to `(num, den)` by the validator.
    pub frame_rate: FrameRateInput,
    /// Target bitrate in bits per second.
    pub bitrate: u32,
    /// Encoder profile. Repaired from bit depth when left at `0`.
    pub profile: u8,
    /// Bit depth of the source (8 or 10), used to pick a default profile.
    pub bit_depth: u8,
    /// AV1 level, `0` meaning auto.
    pub level: u8,
    /// GOP preset id.
    pub gop_preset: u8,
    /// Explicit GOP structure, if not using a preset.
    pub custom_gop: Option<CustomGop>,
    /// Intra-refresh duration in frames, `0` disables it.
    pub gdr_duration: u32,
    /// Distance between forced intra frames.
    pub intra_period: u32,
    /// 2-pass look-ahead depth in frames, `0` disables it.
    pub look_ahead_depth: u32,
    /// Whether long-term reference frames are enabled.
    pub long_term_reference: bool,
    /// Whether HRD conformance is requested.
    pub hrd: bool,
    /// Whether filler data is requested.
    pub filler: bool,
    /// Whether rate control is enabled.
    pub rc_enable: bool,
    /// VBV buffer size in bits, required when `hrd || filler`.
    pub vbv_buffer_size: u32,
    /// Whether low-delay mode is requested.
    pub low_delay_mode: bool,
    /// Maximum size of any single frame, in bytes.
    pub max_frame_size: Option<u32>,
    /// H.264 entropy coding mode: `true` selects CABAC, `false` CAVLC.
    /// Forced to `false` under baseline profile.
    pub entropy_coding_cabac: bool,
    /// H.264 8x8 transform, forced off under baseline profile.
    pub transform_8x8_enabled: bool,
    /// AV1 conformance window (left, top, right, bottom), must be all-zero.
    pub conformance_window: (u32, u32, u32, u32),
}

const H264_PROFILE_BASELINE: u8 = 1;
const AV1_PROFILE_MAIN: u8 = 1;

fn err(code: ParamErrorCode, message: impl Into<String>) -> XcoderError {
    XcoderError::ParamError { code, message: message.into() }
}

/// Validate `params` against the accelerator's contract, repairing
/// defaults in place (§4.9).
///
/// On success returns a (possibly empty) list of `WARN`-level messages
/// describing repairs that were applied. On failure returns
/// [`XcoderError::ParamError`] carrying one of the closed set of
/// [`ParamErrorCode`] values.
///
/// # Errors
///
/// See variants of [`ParamErrorCode`].
pub fn validate_and_repair(params: &mut EncoderParams) -> Result<Vec<String>, XcoderError> {
    let mut warnings = Vec::new();

    if !(XCODER_MIN_ENC_PIC_WIDTH..=XCODER_MAX_ENC_PIC_WIDTH).contains(&params.width) {
        return Err(err(
            ParamErrorCode::ErrorPicWidth,
            format!(
                "width {} out of range [{XCODER_MIN_ENC_PIC_WIDTH}, {XCODER_MAX_ENC_PIC_WIDTH}]",
                params.width
            ),
        ));
    }
    if !(XCODER_MIN_ENC_PIC_HEIGHT..=XCODER_MAX_ENC_PIC_HEIGHT).contains(&params.height) {
        return Err(err(
            ParamErrorCode::ErrorPicHeight,
            format!(
                "height {} out of range [{XCODER_MIN_ENC_PIC_HEIGHT}, {XCODER_MAX_ENC_PIC_HEIGHT}]",
                params.height
            ),
        ));
    }

    params.frame_rate = match params.frame_rate {
        FrameRateInput::Integer(fps) => FrameRateInput::Fraction { num: fps, den: 1 },
        frac => frac,
    };
    let fps = match params.frame_rate {
        FrameRateInput::Fraction { num, den } if den > 0 => num / den,
        _ => {
            return Err(err(ParamErrorCode::ErrorFrate, "frame rate denominator must be nonzero"));
        },
    };
    if fps == 0 || fps > MAX_FRAMERATE {
        return Err(err(ParamErrorCode::ErrorFrate, format!("frame rate {fps} out of range")));
    }

    if !(MIN_BITRATE..=MAX_BITRATE).contains(&params.bitrate) {
        return Err(err(ParamErrorCode::ErrorBrate, format!("bitrate {} out of range", params.bitrate)));
    }

    if params.profile == 0 {
        params.profile = match (params.codec, params.bit_depth) {
            (Codec::Av1, _) => AV1_PROFILE_MAIN,
            (_, depth) if depth > 8 => 2,
            _ => H264_PROFILE_BASELINE,
        };
        warnings.push(format!("profile repaired to {} from bit depth {}", params.profile, params.bit_depth));
    }

    if params.codec == Codec::H264 && params.profile == H264_PROFILE_BASELINE {
        if let Some(gop) = &params.custom_gop {
            if gop.has_b_frames {
                return Err(err(
                    ParamErrorCode::ErrorCustomGop,
                    "H.264 baseline profile forbids B-frames in the custom GOP",
                ));
            }
        }
        if params.entropy_coding_cabac {
            params.entropy_coding_cabac = false;
            warnings.push("entropy coding forced to CAVLC under baseline profile".to_string());
        }
        if params.transform_8x8_enabled {
            params.transform_8x8_enabled = false;
            warnings.push("8x8 transform disabled under baseline profile".to_string());
        }
    }

    if params.codec == Codec::Av1 {
        if params.profile != AV1_PROFILE_MAIN {
            return Err(err(ParamErrorCode::InvalidParam, "AV1 requires profile = 1"));
        }
        if params.level != 0 {
            params.level = params.level.clamp(20, 51);
        }
        if params.conformance_window != (0, 0, 0, 0) {
            return Err(err(ParamErrorCode::InvalidParam, "AV1 conformance windows must be zero"));
        }
    }

    if params.gdr_duration > 0 {
        if let Some(gop) = &params.custom_gop {
            if gop.has_b_frames {
                return Err(err(
                    ParamErrorCode::ErrorGopPreset,
                    "gdrDuration (intra-refresh) forbids B-frames",
                ));
            }
        }
        if params.intra_period < params.gdr_duration {
            params.intra_period = params.gdr_duration;
            warnings.push("intraPeriod coerced up to gdrDuration".to_string());
        }
        if params.look_ahead_depth > 0 {
            params.look_ahead_depth = 0;
            warnings.push("lookAheadDepth disabled: incompatible with gdrDuration".to_string());
        }
    }

    if params.intra_period > 0 && params.gdr_duration > params.intra_period {
        return Err(err(
            ParamErrorCode::ErrorIntraPeriod,
            "gdrDuration must not exceed intraPeriod",
        ));
    }

    if params.look_ahead_depth > 0 {
        if LOW_DELAY_GOP_PRESETS.contains(&params.gop_preset) {
            return Err(err(
                ParamErrorCode::ErrorLookAheadDepth,
                "2-pass (lookAheadDepth > 0) forbids low-delay GOP presets",
            ));
        }
        if params.long_term_reference {
            return Err(err(
                ParamErrorCode::ErrorLookAheadDepth,
                "long-term-reference and lookahead are mutually exclusive",
            ));
        }
    }

    if params.max_frame_size.is_some() && !params.low_delay_mode {
        return Err(err(ParamErrorCode::InvalidParam, "maxFrameSize is valid only with low-delay mode"));
    }
    if params.max_frame_size.is_none() && params.low_delay_mode {
        let uncompressed = u64::from(params.width) * u64::from(params.height) * 3 / 2;
        let default_max = (uncompressed / 2000).max(1) as u32;
        let min_from_bitrate = (u64::from(params.bitrate) / u64::from(fps) / 8 / 2000).max(1) as u32;
        params.max_frame_size = Some(default_max.max(min_from_bitrate));
        warnings.push("maxFrameSize defaulted for low-delay mode".to_string());
    }

    if (params.hrd || params.filler) && !params.rc_enable {
        params.rc_enable = true;
        warnings.push("rc_enable forced on: requested by HRD or filler".to_string());
    }
    if (params.hrd || params.filler) && params.vbv_buffer_size == 0 {
        return Err(err(
            ParamErrorCode::ErrorVbvBufferSize,
            "HRD or filler requires a nonzero VBV buffer size",
        ));
    }
    if !params.rc_enable && params.vbv_buffer_size > 0 && !params.hrd && !params.filler {
        return Err(err(ParamErrorCode::ErrorRcEnable, "VBV buffer size set without rate control enabled"));
    }

    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baseline_params() -> EncoderParams {
        EncoderParams {
            codec: Codec::H264,
            width: 1920,
            height: 1080,
            frame_rate: FrameRateInput::Integer(30),
            bitrate: 4_000_000,
            profile: 0,
            bit_depth: 8,
            level: 0,
            gop_preset: 2,
            custom_gop: None,
            gdr_duration: 0,
            intra_period: 30,
            look_ahead_depth: 0,
            long_term_reference: false,
            hrd: false,
            filler: false,
            rc_enable: true,
            vbv_buffer_size: 0,
            low_delay_mode: false,
            max_frame_size: None,
            entropy_coding_cabac: true,
            transform_8x8_enabled: true,
            conformance_window: (0, 0, 0, 0),
        }
    }

    #[test]
    fn repairs_profile_from_bit_depth() {
        let mut params = baseline_params();
        let warnings = validate_and_repair(&mut params).unwrap();
        assert_eq!(params.profile, H264_PROFILE_BASELINE);
        assert!(!warnings.is_empty());
    }

    #[test]
    fn rejects_width_out_of_range() {
        let mut params = baseline_params();
        params.width = 1;
        assert!(matches!(
            validate_and_repair(&mut params),
            Err(XcoderError::ParamError { code: ParamErrorCode::ErrorPicWidth, .. })
        ));
    }

    #[test]
    fn baseline_profile_disables_cabac_and_8x8_transform() {
        let mut params = baseline_params();
        params.profile = H264_PROFILE_BASELINE;
        validate_and_repair(&mut params).unwrap();
        assert!(!params.entropy_coding_cabac);
        assert!(!params.transform_8x8_enabled);
    }

    #[test]
    fn baseline_profile_rejects_b_frames_in_custom_gop() {
        let mut params = baseline_params();
        params.profile = H264_PROFILE_BASELINE;
        params.custom_gop = Some(CustomGop { has_b_frames: true });
        assert!(matches!(
            validate_and_repair(&mut params),
            Err(XcoderError::ParamError { code: ParamErrorCode::ErrorCustomGop, .. })
        ));
    }

    #[test]
    fn gdr_duration_coerces_intra_period() {
        let mut params = baseline_params();
        params.gdr_duration = 60;
        params.intra_period = 30;
        validate_and_repair(&mut params).unwrap();
        assert_eq!(params.intra_period, 60);
    }

    #[test]
    fn two_pass_forbids_low_delay_presets() {
        let mut params = baseline_params();
        params.look_ahead_depth = 4;
        params.gop_preset = 1;
        assert!(matches!(
            validate_and_repair(&mut params),
            Err(XcoderError::ParamError { code: ParamErrorCode::ErrorLookAheadDepth, .. })
        ));
    }

    #[test]
    fn lookahead_and_long_term_reference_are_mutually_exclusive() {
        let mut params = baseline_params();
        params.look_ahead_depth = 4;
        params.gop_preset = 2;
        params.long_term_reference = true;
        assert!(matches!(
            validate_and_repair(&mut params),
            Err(XcoderError::ParamError { code: ParamErrorCode::ErrorLookAheadDepth, .. })
        ));
    }

    #[test]
    fn hrd_forces_rc_enable_and_requires_vbv_buffer() {
        let mut params = baseline_params();
        params.rc_enable = false;
        params.hrd = true;
        params.vbv_buffer_size = 0;
        assert!(matches!(
            validate_and_repair(&mut params),
            Err(XcoderError::ParamError { code: ParamErrorCode::ErrorVbvBufferSize, .. })
        ));

        params.vbv_buffer_size = 1_000_000;
        let warnings = validate_and_repair(&mut params).unwrap();
        assert!(params.rc_enable);
        assert!(warnings.iter().any(|w| w.contains("rc_enable")));
    }

    #[test]
    fn av1_requires_profile_one() {
        let mut params = baseline_params();
        params.codec = Codec::Av1;
        params.profile = 2;
        assert!(matches!(
            validate_and_repair(&mut params),
            Err(XcoderError::ParamError { code: ParamErrorCode::InvalidParam, .. })
        ));
    }

    #[test]
    fn av1_level_is_clamped_into_range() {
        let mut params = baseline_params();
        params.codec = Codec::Av1;
        params.profile = AV1_PROFILE_MAIN;
        params.level = 200;
        validate_and_repair(&mut params).unwrap();
        assert_eq!(params.level, 51);
    }

    #[test]
    fn low_delay_mode_defaults_max_frame_size() {
        let mut params = baseline_params();
        params.low_delay_mode = true;
        validate_and_repair(&mut params).unwrap();
        assert!(params.max_frame_size.unwrap() > 0);
    }

    #[test]
    fn max_frame_size_outside_low_delay_mode_is_rejected() {
        let mut params = baseline_params();
        params.max_frame_size = Some(1000);
        assert!(matches!(
            validate_and_repair(&mut params),
            Err(XcoderError::ParamError { code: ParamErrorCode::InvalidParam, .. })
        ));
    }
}
