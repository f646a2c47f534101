//! RAW decoding settings.
//!
//! [`DecodeSettings`] is a plain value object: every job gets its own copy and
//! nothing mutates it while a decode is running. Backends read the fields
//! they understand and ignore the rest.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Demosaicing quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DecodingQuality {
    #[default]
    Bilinear,
    Vng,
    Ppg,
    Ahd,
    Dcb,
    PlAhd,
    Afd,
    Vcd,
    VcdAhd,
    Lmmse,
    Amaze,
}

/// White balance source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WhiteBalance {
    /// No correction (D65 daylight, unity multipliers).
    Daylight,
    /// Multipliers recorded by the camera.
    #[default]
    Camera,
    /// Gray-world estimate from the image.
    Auto,
    /// Temperature / green tint from the settings.
    Custom,
}

/// Highlight handling. Mirrors the classic integer option:
/// 0 clip, 1 unclip, 2 blend, 3+ rebuild with level `n - 3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HighlightMode {
    #[default]
    Clip,
    Unclip,
    Blend,
    /// Reconstruct highlights, level 0 to 6.
    Rebuild(u8),
}

impl HighlightMode {
    pub const MAX_REBUILD_LEVEL: u8 = 6;

    /// Integer code used by dcraw-style decoders.
    pub fn code(self) -> u8 {
        match self {
            HighlightMode::Clip => 0,
            HighlightMode::Unclip => 1,
            HighlightMode::Blend => 2,
            HighlightMode::Rebuild(level) => 3 + level.min(Self::MAX_REBUILD_LEVEL),
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0 => HighlightMode::Clip,
            1 => HighlightMode::Unclip,
            2 => HighlightMode::Blend,
            n => HighlightMode::Rebuild((n - 3).min(Self::MAX_REBUILD_LEVEL)),
        }
    }
}

/// Noise reduction algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NoiseReduction {
    #[default]
    None,
    Wavelets,
    Fbdd,
    LineDenoise,
    Impulse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InputColorSpace {
    #[default]
    None,
    Embedded,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputColorSpace {
    /// Camera space, linear, no profile.
    Raw,
    #[default]
    Srgb,
    AdobeRgb,
    WideGamut,
    ProPhoto,
    Custom,
}

/// Channel layout of packaged pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChannelOrder {
    #[default]
    Rgb,
    /// Blue first, as expected by many toolkit image types.
    Bgr,
}

/// Exposure correction applied before demosaicing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExposureCorrection {
    /// Shift in EV (-2.0 to 3.0)
    pub shift_ev: f32,
    /// Highlight preservation (0.0 to 1.0)
    pub highlight: f32,
}

impl ExposureCorrection {
    /// Linear gain corresponding to the EV shift.
    pub fn gain(&self) -> f32 {
        2f32.powf(self.shift_ev)
    }

    /// Shift as the linear `exp_shift` parameter of dcraw-derived decoders
    /// (0.25 at -2 EV, 8.0 at +3 EV).
    pub fn linear_shift(&self) -> f32 {
        1.55 * self.shift_ev + 3.35
    }

    /// Inverse of [`linear_shift`](Self::linear_shift).
    pub fn from_linear_shift(linear: f32, highlight: f32) -> Self {
        Self {
            shift_ev: (linear - 3.35) / 1.55,
            highlight,
        }
    }
}

/// Settings for one RAW decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeSettings {
    /// Produce 16 bits per channel instead of 8
    pub sixteen_bits: bool,
    /// Decode at half resolution (2x2 superpixels, no interpolation)
    pub half_size: bool,
    pub quality: DecodingQuality,
    pub white_balance: WhiteBalance,
    /// Custom white balance temperature in Kelvin (2000 to 12000)
    pub custom_temperature: u32,
    /// Custom white balance green level (0.2 to 2.5)
    pub custom_green: f32,
    /// Interpolate RGB as four colors
    pub four_color_rgb: bool,
    pub auto_brightness: bool,
    pub fix_colors_highlights: bool,
    pub dont_stretch_pixels: bool,
    pub highlights: HighlightMode,
    /// Brightness multiplier (0.0 to 10.0)
    pub brightness: f32,
    /// Manual black point (0 to 1000)
    pub black_point: Option<u32>,
    /// Manual white point (0 to 20000)
    pub white_point: Option<u32>,
    /// Median filter passes after interpolation (0 to 10)
    pub median_filter_passes: u32,
    /// DCB correction passes (0 to 10)
    pub dcb_iterations: u32,
    pub dcb_enhance: bool,
    pub noise_reduction: NoiseReduction,
    /// Noise reduction threshold, or luminance amount for impulse denoise (100 to 1000)
    pub nr_threshold: u32,
    /// Chrominance amount for impulse denoise (100 to 1000)
    pub nr_chroma_threshold: u32,
    /// Chromatic aberration red/blue multipliers (-4.0 to 4.0)
    pub ca_correction: Option<[f32; 2]>,
    pub exposure: Option<ExposureCorrection>,
    pub input_color_space: InputColorSpace,
    pub output_color_space: OutputColorSpace,
    pub input_profile: Option<PathBuf>,
    pub output_profile: Option<PathBuf>,
    pub channel_order: ChannelOrder,
}

impl Default for DecodeSettings {
    fn default() -> Self {
        Self {
            sixteen_bits: false,
            half_size: false,
            quality: DecodingQuality::Bilinear,
            white_balance: WhiteBalance::Camera,
            custom_temperature: 6500,
            custom_green: 1.0,
            four_color_rgb: false,
            auto_brightness: true,
            fix_colors_highlights: false,
            dont_stretch_pixels: false,
            highlights: HighlightMode::Clip,
            brightness: 1.0,
            black_point: None,
            white_point: None,
            median_filter_passes: 0,
            dcb_iterations: 0,
            dcb_enhance: false,
            noise_reduction: NoiseReduction::None,
            nr_threshold: 100,
            nr_chroma_threshold: 100,
            ca_correction: None,
            exposure: None,
            input_color_space: InputColorSpace::None,
            output_color_space: OutputColorSpace::Srgb,
            input_profile: None,
            output_profile: None,
            channel_order: ChannelOrder::Rgb,
        }
    }
}

impl DecodeSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Largest value a packaged channel can hold.
    pub fn max_value(&self) -> u16 {
        if self.sixteen_bits {
            u16::MAX
        } else {
            u8::MAX as u16
        }
    }

    /// Copy with every numeric field clamped to its valid range and
    /// dependent fields made consistent.
    pub fn sanitized(&self) -> Self {
        let mut s = self.clone();

        s.custom_temperature = s.custom_temperature.clamp(2000, 12000);
        s.custom_green = clamp_f32(s.custom_green, 0.2, 2.5, 1.0);
        s.brightness = clamp_f32(s.brightness, 0.0, 10.0, 1.0);
        s.black_point = s.black_point.map(|v| v.min(1000));
        s.white_point = s.white_point.map(|v| v.min(20000));
        s.median_filter_passes = s.median_filter_passes.min(10);
        s.dcb_iterations = s.dcb_iterations.min(10);
        if let HighlightMode::Rebuild(level) = s.highlights {
            s.highlights = HighlightMode::Rebuild(level.min(HighlightMode::MAX_REBUILD_LEVEL));
        }

        match s.noise_reduction {
            NoiseReduction::None => {
                s.nr_threshold = 0;
                s.nr_chroma_threshold = 0;
            }
            NoiseReduction::Impulse => {
                s.nr_threshold = s.nr_threshold.clamp(100, 1000);
                s.nr_chroma_threshold = s.nr_chroma_threshold.clamp(100, 1000);
            }
            _ => {
                s.nr_threshold = s.nr_threshold.clamp(100, 1000);
                s.nr_chroma_threshold = 0;
            }
        }

        s.ca_correction = s
            .ca_correction
            .map(|[red, blue]| [clamp_f32(red, -4.0, 4.0, 0.0), clamp_f32(blue, -4.0, 4.0, 0.0)]);
        s.exposure = s.exposure.map(|e| ExposureCorrection {
            shift_ev: clamp_f32(e.shift_ev, -2.0, 3.0, 0.0),
            highlight: clamp_f32(e.highlight, 0.0, 1.0, 0.0),
        });

        if s.input_color_space != InputColorSpace::Custom {
            s.input_profile = None;
        }
        if s.output_color_space != OutputColorSpace::Custom {
            s.output_profile = None;
        }

        s
    }
}

/// Clamp, mapping NaN to `fallback`.
fn clamp_f32(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(min, max)
    }
}


// ============================================================================
// Property-Based Tests
// ============================================================================
