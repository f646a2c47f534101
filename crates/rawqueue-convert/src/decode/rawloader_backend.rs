//! RAW backend built on `rawloader` for unpacking and `image` for buffers.
//!
//! # Stages
//!
//! - **open**: read the file (or share the caller's buffer)
//! - **unpack**: `rawloader::decode`, crop to the active sensor area
//! - **adjust**: resolve black/white levels, white balance multipliers and
//!   gain from the settings
//! - **process**: bilinear demosaic over each 3x3 neighbourhood, or 2x2
//!   superpixels for half-size output
//! - **materialize**: quantize into an `image` buffer, sRGB-encoded unless
//!   the output space is `Raw`
//! - **package**: copy out, optionally in BGR order
//!
//! Only bilinear interpolation is implemented; other qualities fall back to
//! it in the pipeline.

use std::fs;
use std::io::Cursor;
use std::ops::ControlFlow;
use std::sync::Arc;

use image::{ImageBuffer, Rgb, RgbImage};
use rawloader::RawImageData;

use super::backend::{BackendError, RawBackend};
use super::types::{DecodedImage, PixelData, Source};
use crate::settings::{
    ChannelOrder, DecodeSettings, DecodingQuality, HighlightMode, OutputColorSpace, WhiteBalance,
};

/// Extensions of the formats `rawloader` decodes.
pub const RAW_EXTENSIONS: &[&str] = &[
    "3fr", "ari", "arw", "cr2", "crw", "dcr", "dcs", "dng", "erf", "iiq", "kdc", "mef", "mos",
    "mrw", "nef", "nrw", "orf", "pef", "raf", "rw2", "sr2", "srf", "srw",
];

/// Rows demosaiced between two progress callbacks.
const ROWS_PER_CALLBACK: usize = 16;

/// Upper bound on samples inspected for auto white balance and brightness.
const STATISTICS_SAMPLES: usize = 1 << 16;

type Rgb16Image = ImageBuffer<Rgb<u16>, Vec<u16>>;

/// Pure-Rust RAW backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawloaderBackend;

impl RawloaderBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Per-decode state. Each stage consumes what the previous one left.
#[derive(Default)]
pub struct RawloaderSession {
    bytes: Option<Arc<[u8]>>,
    sensor: Option<SensorData>,
    levels: Option<Levels>,
    linear: Option<LinearImage>,
}

/// Materialized output buffer.
pub enum RawloaderImage {
    Rgb8(RgbImage),
    Rgb16(Rgb16Image),
}

impl RawloaderImage {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            RawloaderImage::Rgb8(img) => img.dimensions(),
            RawloaderImage::Rgb16(img) => img.dimensions(),
        }
    }
}

/// Color filter layout, sampled over one 6x6 tile.
///
/// Channel indices are 0 red, 1 green, 2 blue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CfaPattern {
    colors: [[u8; 6]; 6],
}

impl CfaPattern {
    fn from_fn(color_at: impl Fn(usize, usize) -> usize) -> Self {
        let mut colors = [[1u8; 6]; 6];
        for (row, line) in colors.iter_mut().enumerate() {
            for (col, color) in line.iter_mut().enumerate() {
                // rawloader reports the second green (or emerald) as 3.
                *color = match color_at(row, col) {
                    0 => 0,
                    2 => 2,
                    _ => 1,
                };
            }
        }
        Self { colors }
    }

    #[inline]
    fn color(&self, row: usize, col: usize) -> usize {
        self.colors[row % 6][col % 6] as usize
    }
}

/// Cropped sensor samples.
struct SensorData {
    width: usize,
    height: usize,
    /// Components per pixel: 1 for a mosaic, 3 for linear RGB.
    cpp: usize,
    data: Vec<u16>,
    cfa: CfaPattern,
    black: f32,
    white: f32,
    wb_coeffs: [f32; 4],
}

impl SensorData {
    fn from_raw(raw: rawloader::RawImage) -> Result<Self, BackendError> {
        let samples = match raw.data {
            RawImageData::Integer(samples) => samples,
            RawImageData::Float(_) => {
                return Err(BackendError::failed(
                    "floating point sensor data is not supported",
                ))
            }
        };
        if raw.cpp != 1 && raw.cpp != 3 {
            return Err(BackendError::failed(format!(
                "unsupported component count {}",
                raw.cpp
            )));
        }
        if samples.len() < raw.width * raw.height * raw.cpp {
            return Err(BackendError::failed("sensor data is truncated"));
        }

        let [top, right, bottom, left] = raw.crops;
        let mut area = CropArea {
            top,
            left,
            width: raw.width.saturating_sub(left + right),
            height: raw.height.saturating_sub(top + bottom),
        };
        if area.width == 0 || area.height == 0 {
            area = CropArea {
                top: 0,
                left: 0,
                width: raw.width,
                height: raw.height,
            };
        }
        if area.width == 0 || area.height == 0 {
            return Err(BackendError::failed("image has no pixels"));
        }

        let cfa = if raw.cpp == 1 && raw.cfa.is_valid() {
            CfaPattern::from_fn(|row, col| raw.cfa.color_at(row + area.top, col + area.left))
        } else {
            CfaPattern::from_fn(|_, _| 1)
        };

        let black = raw.blacklevels.iter().map(|&v| f32::from(v)).sum::<f32>() / 4.0;
        let white = raw.whitelevels.iter().copied().max().map_or(0.0, f32::from);

        Ok(Self {
            width: area.width,
            height: area.height,
            cpp: raw.cpp,
            data: crop(&samples, raw.width, raw.cpp, &area),
            cfa,
            black,
            white,
            wb_coeffs: raw.wb_coeffs,
        })
    }

    #[inline]
    fn sample(&self, row: usize, col: usize) -> u16 {
        self.data[row * self.width + col]
    }
}

#[derive(Debug, Clone, Copy)]
struct CropArea {
    top: usize,
    left: usize,
    width: usize,
    height: usize,
}

/// The message inside a `rawloader` error, without its `RawLoaderError: "..."` wrapper.
fn loader_message(error: &rawloader::RawLoaderError) -> String {
    let text = error.to_string();
    text.strip_prefix("RawLoaderError: ")
        .and_then(|rest| rest.strip_prefix('"'))
        .and_then(|rest| rest.strip_suffix('"'))
        .map(str::to_string)
        .unwrap_or(text)
}

fn crop(samples: &[u16], full_width: usize, cpp: usize, area: &CropArea) -> Vec<u16> {
    let mut data = Vec::with_capacity(area.width * area.height * cpp);
    for row in area.top..area.top + area.height {
        let start = (row * full_width + area.left) * cpp;
        data.extend_from_slice(&samples[start..start + area.width * cpp]);
    }
    data
}

/// Mapping from raw sample to normalized linear value.
#[derive(Debug, Clone, Copy)]
struct Levels {
    black: f32,
    white: f32,
    multipliers: [f32; 3],
    gain: f32,
    clip: bool,
}

impl Levels {
    #[inline]
    fn normalize(&self, raw: u16, channel: usize) -> f32 {
        let v = ((f32::from(raw) - self.black) / (self.white - self.black)).max(0.0)
            * self.multipliers[channel]
            * self.gain;
        if self.clip {
            v.min(1.0)
        } else {
            v
        }
    }
}

/// Demosaiced linear RGB, interleaved.
struct LinearImage {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl RawBackend for RawloaderBackend {
    type Session = RawloaderSession;
    type MemImage = RawloaderImage;

    fn name(&self) -> &'static str {
        "rawloader"
    }

    fn extensions(&self) -> &[&'static str] {
        RAW_EXTENSIONS
    }

    fn supports_quality(&self, quality: DecodingQuality) -> bool {
        quality == DecodingQuality::Bilinear
    }

    fn open(&self, source: &Source) -> Result<Self::Session, BackendError> {
        let bytes: Arc<[u8]> = match source {
            Source::Path(path) => fs::read(path)?.into(),
            Source::Buffer { bytes, .. } => Arc::clone(bytes),
        };
        if bytes.is_empty() {
            return Err(BackendError::failed("file is empty"));
        }
        Ok(RawloaderSession {
            bytes: Some(bytes),
            ..Default::default()
        })
    }

    fn unpack(&self, session: &mut Self::Session) -> Result<(), BackendError> {
        let bytes = session
            .bytes
            .take()
            .ok_or_else(|| BackendError::failed("source already unpacked"))?;
        let raw = rawloader::decode(&mut Cursor::new(&bytes[..]))
            .map_err(|e| BackendError::failed(loader_message(&e)))?;
        session.sensor = Some(SensorData::from_raw(raw)?);
        Ok(())
    }

    fn adjust(
        &self,
        session: &mut Self::Session,
        settings: &DecodeSettings,
    ) -> Result<(), BackendError> {
        let sensor = session
            .sensor
            .as_ref()
            .ok_or_else(|| BackendError::failed("no sensor data"))?;
        session.levels = Some(levels_for(sensor, settings)?);
        Ok(())
    }

    fn process(
        &self,
        session: &mut Self::Session,
        settings: &DecodeSettings,
        callback: &mut dyn FnMut() -> ControlFlow<()>,
    ) -> Result<(), BackendError> {
        let linear = {
            let sensor = session
                .sensor
                .as_ref()
                .ok_or_else(|| BackendError::failed("no sensor data"))?;
            let levels = session
                .levels
                .as_ref()
                .ok_or_else(|| BackendError::failed("levels not adjusted"))?;

            if sensor.cpp == 3 {
                linear_from_rgb(sensor, levels, callback)?
            } else if settings.half_size {
                demosaic_half(sensor, levels, callback)?
            } else {
                demosaic_bilinear(sensor, levels, callback)?
            }
        };
        session.sensor = None;
        session.linear = Some(linear);
        Ok(())
    }

    fn materialize(
        &self,
        session: &mut Self::Session,
        settings: &DecodeSettings,
    ) -> Result<Self::MemImage, BackendError> {
        let linear = session
            .linear
            .take()
            .ok_or_else(|| BackendError::failed("nothing was processed"))?;
        let width = u32::try_from(linear.width).map_err(BackendError::failed)?;
        let height = u32::try_from(linear.height).map_err(BackendError::failed)?;

        let scale = if settings.auto_brightness {
            auto_brightness_scale(&linear.data)
        } else {
            1.0
        };
        let gamma = settings.output_color_space != OutputColorSpace::Raw;
        let encode = |v: f32| {
            let v = (v * scale).clamp(0.0, 1.0);
            if gamma {
                srgb_gamma(v)
            } else {
                v
            }
        };

        let image = if settings.sixteen_bits {
            let data: Vec<u16> = linear
                .data
                .iter()
                .map(|&v| (encode(v) * 65535.0).round() as u16)
                .collect();
            Rgb16Image::from_raw(width, height, data).map(RawloaderImage::Rgb16)
        } else {
            let data: Vec<u8> = linear
                .data
                .iter()
                .map(|&v| (encode(v) * 255.0).round() as u8)
                .collect();
            RgbImage::from_raw(width, height, data).map(RawloaderImage::Rgb8)
        };
        image.ok_or_else(|| BackendError::failed("pixel buffer does not match dimensions"))
    }

    fn package(
        &self,
        image: Self::MemImage,
        settings: &DecodeSettings,
    ) -> Result<DecodedImage, BackendError> {
        let (width, height) = image.dimensions();
        let (max_value, mut pixels) = match image {
            RawloaderImage::Rgb8(img) => (u16::from(u8::MAX), PixelData::Eight(img.into_raw())),
            RawloaderImage::Rgb16(img) => (u16::MAX, PixelData::Sixteen(img.into_raw())),
        };
        if settings.channel_order == ChannelOrder::Bgr {
            pixels.swap_red_blue();
        }
        Ok(DecodedImage {
            width,
            height,
            max_value,
            channel_order: settings.channel_order,
            pixels,
        })
    }
}

fn levels_for(sensor: &SensorData, settings: &DecodeSettings) -> Result<Levels, BackendError> {
    let black = settings.black_point.map_or(sensor.black, |v| v as f32);
    let white = settings
        .white_point
        .filter(|&v| v > 0)
        .map_or(sensor.white, |v| v as f32);
    if white <= black {
        return Err(BackendError::failed(format!(
            "white level {white} is not above black level {black}"
        )));
    }

    let multipliers = normalize_multipliers(match settings.white_balance {
        WhiteBalance::Daylight => [1.0; 3],
        WhiteBalance::Camera => {
            let [r, g, b, _] = sensor.wb_coeffs;
            [r, g, b]
        }
        WhiteBalance::Auto => gray_world(sensor, black),
        WhiteBalance::Custom => {
            let kelvin = settings.custom_temperature as f32;
            [kelvin / 6500.0, settings.custom_green, 6500.0 / kelvin]
        }
    });

    Ok(Levels {
        black,
        white,
        multipliers,
        gain: settings.brightness * settings.exposure.map_or(1.0, |e| e.gain()),
        clip: settings.highlights == HighlightMode::Clip,
    })
}

/// Scale so the smallest multiplier is 1. Unusable input gives unity.
fn normalize_multipliers(m: [f32; 3]) -> [f32; 3] {
    if m.iter().any(|c| !c.is_finite() || *c <= 0.0) {
        return [1.0; 3];
    }
    let min = m.iter().copied().fold(f32::INFINITY, f32::min);
    m.map(|c| c / min)
}

/// Gray-world estimate: equalize the channel means.
fn gray_world(sensor: &SensorData, black: f32) -> [f32; 3] {
    let pixels = sensor.width * sensor.height;
    let stride = (pixels / STATISTICS_SAMPLES).max(1);
    let mut sum = [0f64; 3];
    let mut count = [0u64; 3];

    for index in (0..pixels).step_by(stride) {
        let (row, col) = (index / sensor.width, index % sensor.width);
        if sensor.cpp == 3 {
            for c in 0..3 {
                sum[c] += f64::from((f32::from(sensor.data[index * 3 + c]) - black).max(0.0));
                count[c] += 1;
            }
        } else {
            let c = sensor.cfa.color(row, col);
            sum[c] += f64::from((f32::from(sensor.sample(row, col)) - black).max(0.0));
            count[c] += 1;
        }
    }

    let mean = |c: usize| {
        if count[c] == 0 {
            0.0
        } else {
            sum[c] / count[c] as f64
        }
    };
    let (r, g, b) = (mean(0), mean(1), mean(2));
    if r <= 0.0 || g <= 0.0 || b <= 0.0 {
        return [1.0; 3];
    }
    [(g / r) as f32, 1.0, (g / b) as f32]
}

fn checkpoint(
    row: usize,
    callback: &mut dyn FnMut() -> ControlFlow<()>,
) -> Result<(), BackendError> {
    if row % ROWS_PER_CALLBACK == 0 && callback().is_break() {
        Err(BackendError::Aborted)
    } else {
        Ok(())
    }
}

fn demosaic_bilinear(
    sensor: &SensorData,
    levels: &Levels,
    callback: &mut dyn FnMut() -> ControlFlow<()>,
) -> Result<LinearImage, BackendError> {
    let (width, height) = (sensor.width, sensor.height);
    let mut data = vec![0f32; width * height * 3];

    for row in 0..height {
        checkpoint(row, callback)?;
        let rows = row.saturating_sub(1)..=(row + 1).min(height - 1);
        for col in 0..width {
            let cols = col.saturating_sub(1)..=(col + 1).min(width - 1);
            let mut sum = [0f32; 3];
            let mut count = [0u32; 3];
            for r in rows.clone() {
                for c in cols.clone() {
                    let channel = sensor.cfa.color(r, c);
                    sum[channel] += levels.normalize(sensor.sample(r, c), channel);
                    count[channel] += 1;
                }
            }

            let own = sensor.cfa.color(row, col);
            let px = &mut data[(row * width + col) * 3..][..3];
            for channel in 0..3 {
                px[channel] = if channel == own {
                    levels.normalize(sensor.sample(row, col), channel)
                } else if count[channel] > 0 {
                    sum[channel] / count[channel] as f32
                } else {
                    0.0
                };
            }
        }
    }

    Ok(LinearImage {
        width,
        height,
        data,
    })
}

fn demosaic_half(
    sensor: &SensorData,
    levels: &Levels,
    callback: &mut dyn FnMut() -> ControlFlow<()>,
) -> Result<LinearImage, BackendError> {
    let (width, height) = (sensor.width / 2, sensor.height / 2);
    if width == 0 || height == 0 {
        return Err(BackendError::failed("image too small for half-size output"));
    }
    let mut data = vec![0f32; width * height * 3];

    for row in 0..height {
        checkpoint(row, callback)?;
        for col in 0..width {
            let mut sum = [0f32; 3];
            let mut count = [0u32; 3];
            for r in row * 2..row * 2 + 2 {
                for c in col * 2..col * 2 + 2 {
                    let channel = sensor.cfa.color(r, c);
                    sum[channel] += levels.normalize(sensor.sample(r, c), channel);
                    count[channel] += 1;
                }
            }
            let px = &mut data[(row * width + col) * 3..][..3];
            for channel in 0..3 {
                if count[channel] > 0 {
                    px[channel] = sum[channel] / count[channel] as f32;
                }
            }
        }
    }

    Ok(LinearImage {
        width,
        height,
        data,
    })
}

fn linear_from_rgb(
    sensor: &SensorData,
    levels: &Levels,
    callback: &mut dyn FnMut() -> ControlFlow<()>,
) -> Result<LinearImage, BackendError> {
    let row_len = sensor.width * 3;
    let mut data = Vec::with_capacity(sensor.data.len());
    for (row, samples) in sensor.data.chunks_exact(row_len).enumerate() {
        checkpoint(row, callback)?;
        data.extend(
            samples
                .iter()
                .enumerate()
                .map(|(i, &v)| levels.normalize(v, i % 3)),
        );
    }
    Ok(LinearImage {
        width: sensor.width,
        height: sensor.height,
        data,
    })
}

/// Scale that maps the 99th percentile of pixel maxima to full scale.
fn auto_brightness_scale(data: &[f32]) -> f32 {
    let pixels = data.len() / 3;
    if pixels == 0 {
        return 1.0;
    }
    let stride = (pixels / STATISTICS_SAMPLES).max(1);
    let mut maxima: Vec<f32> = data
        .chunks_exact(3)
        .step_by(stride)
        .map(|px| px[0].max(px[1]).max(px[2]))
        .collect();
    maxima.sort_unstable_by(f32::total_cmp);

    let index = ((maxima.len() - 1) as f32 * 0.99) as usize;
    let p99 = maxima[index];
    if p99 > 0.0 && p99.is_finite() {
        1.0 / p99
    } else {
        1.0
    }
}

/// sRGB transfer function for a linear value in `0.0..=1.0`.
#[inline]
fn srgb_gamma(v: f32) -> f32 {
    if v <= 0.003_130_8 {
        12.92 * v
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{DecodeError, Decoder, Stage, StagedDecoder};

    fn rggb() -> CfaPattern {
        CfaPattern::from_fn(|row, col| match (row % 2, col % 2) {
            (0, 0) => 0,
            (1, 1) => 2,
            (0, 1) => 1,
            _ => 3,
        })
    }

    fn uniform_sensor(width: usize, height: usize, value: u16) -> SensorData {
        SensorData {
            width,
            height,
            cpp: 1,
            data: vec![value; width * height],
            cfa: rggb(),
            black: 0.0,
            white: 1000.0,
            wb_coeffs: [1.0, 1.0, 1.0, f32::NAN],
        }
    }

    fn unity_levels() -> Levels {
        Levels {
            black: 0.0,
            white: 1000.0,
            multipliers: [1.0; 3],
            gain: 1.0,
            clip: true,
        }
    }

    fn never_cancel() -> impl FnMut() -> ControlFlow<()> {
        || ControlFlow::Continue(())
    }

    #[test]
    fn test_cfa_maps_second_green() {
        let cfa = rggb();
        assert_eq!(cfa.color(0, 0), 0);
        assert_eq!(cfa.color(1, 0), 1);
        assert_eq!(cfa.color(1, 1), 2);
        assert_eq!(cfa.color(7, 6), 1);
    }

    #[test]
    fn test_bilinear_on_flat_field() {
        let sensor = uniform_sensor(6, 4, 500);
        let image = demosaic_bilinear(&sensor, &unity_levels(), &mut never_cancel()).unwrap();

        assert_eq!((image.width, image.height), (6, 4));
        assert_eq!(image.data.len(), 6 * 4 * 3);
        assert!(image.data.iter().all(|v| (v - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_half_size_dimensions() {
        let sensor = uniform_sensor(7, 5, 1000);
        let image = demosaic_half(&sensor, &unity_levels(), &mut never_cancel()).unwrap();

        assert_eq!((image.width, image.height), (3, 2));
        assert!(image.data.iter().all(|v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_half_size_rejects_tiny_image() {
        let sensor = uniform_sensor(1, 1, 10);
        assert!(demosaic_half(&sensor, &unity_levels(), &mut never_cancel()).is_err());
    }

    #[test]
    fn test_callback_break_aborts_demosaic() {
        let sensor = uniform_sensor(8, 64, 10);
        let mut calls = 0;
        let mut callback = || {
            calls += 1;
            if calls == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        };

        let result = demosaic_bilinear(&sensor, &unity_levels(), &mut callback);
        assert!(matches!(result, Err(BackendError::Aborted)));
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_clip_mode_caps_values() {
        let sensor = uniform_sensor(2, 2, 1000);
        let mut levels = unity_levels();
        levels.gain = 4.0;
        let clipped = demosaic_bilinear(&sensor, &levels, &mut never_cancel()).unwrap();
        assert!(clipped.data.iter().all(|v| *v <= 1.0));

        levels.clip = false;
        let unclipped = demosaic_bilinear(&sensor, &levels, &mut never_cancel()).unwrap();
        assert!(unclipped.data.iter().all(|v| (v - 4.0).abs() < 1e-5));
    }

    #[test]
    fn test_crop_keeps_active_area() {
        #[rustfmt::skip]
        let samples = [
            0, 0, 0, 0,
            0, 1, 2, 0,
            0, 3, 4, 0,
        ];
        let area = CropArea {
            top: 1,
            left: 1,
            width: 2,
            height: 2,
        };
        assert_eq!(crop(&samples, 4, 1, &area), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_white_balance_modes() {
        let mut sensor = uniform_sensor(4, 4, 400);
        sensor.wb_coeffs = [2.0, 1.0, 1.5, f32::NAN];
        let mut settings = DecodeSettings::new();

        let camera = levels_for(&sensor, &settings).unwrap();
        assert_eq!(camera.multipliers, [2.0, 1.0, 1.5]);

        settings.white_balance = WhiteBalance::Daylight;
        assert_eq!(levels_for(&sensor, &settings).unwrap().multipliers, [1.0; 3]);

        settings.white_balance = WhiteBalance::Auto;
        let auto = levels_for(&sensor, &settings).unwrap().multipliers;
        assert!(auto.iter().all(|m| (m - 1.0).abs() < 1e-6));

        settings.white_balance = WhiteBalance::Custom;
        settings.custom_temperature = 3250;
        let custom = levels_for(&sensor, &settings).unwrap().multipliers;
        assert!((custom[0] - 1.0).abs() < 1e-6);
        assert!((custom[1] - 2.0).abs() < 1e-6);
        assert!((custom[2] - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_camera_coefficients_fall_back_to_unity() {
        assert_eq!(normalize_multipliers([0.0, 1.0, 1.0]), [1.0; 3]);
        assert_eq!(normalize_multipliers([f32::NAN, 1.0, 1.0]), [1.0; 3]);
    }

    #[test]
    fn test_levels_reject_inverted_range() {
        let sensor = uniform_sensor(2, 2, 0);
        let mut settings = DecodeSettings::new();
        settings.black_point = Some(900);
        settings.white_point = Some(800);
        assert!(levels_for(&sensor, &settings).is_err());
    }

    #[test]
    fn test_srgb_gamma_endpoints() {
        assert_eq!(srgb_gamma(0.0), 0.0);
        assert!((srgb_gamma(1.0) - 1.0).abs() < 1e-5);
        assert!(srgb_gamma(0.18) > 0.18);
    }

    #[test]
    fn test_auto_brightness_scale() {
        let data: Vec<f32> = (0..100).flat_map(|_| [0.25, 0.5, 0.1]).collect();
        assert!((auto_brightness_scale(&data) - 2.0).abs() < 1e-5);
        assert_eq!(auto_brightness_scale(&[]), 1.0);
    }

    #[test]
    fn test_materialize_and_package_bgr16() {
        let backend = RawloaderBackend::new();
        let mut session = RawloaderSession {
            linear: Some(LinearImage {
                width: 2,
                height: 1,
                data: vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0],
            }),
            ..Default::default()
        };
        let mut settings = DecodeSettings::new();
        settings.sixteen_bits = true;
        settings.auto_brightness = false;
        settings.channel_order = ChannelOrder::Bgr;

        let image = backend.materialize(&mut session, &settings).unwrap();
        let decoded = backend.package(image, &settings).unwrap();

        assert_eq!((decoded.width, decoded.height), (2, 1));
        assert_eq!(decoded.max_value, 65535);
        assert_eq!(
            decoded.pixels,
            PixelData::Sixteen(vec![0, 0, 65535, 65535, 0, 0])
        );
        assert!(session.linear.is_none());
    }

    #[test]
    fn test_garbage_bytes_fail_at_unpack() {
        let decoder = StagedDecoder::new(RawloaderBackend::new());
        let source = Source::buffer("broken.nef", vec![0x42u8; 256]);

        let result = decoder.decode(&source, &DecodeSettings::new(), &mut |_| {}, &|| false);

        match result {
            Err(DecodeError::Stage {
                stage: Stage::Unpack,
                message,
            }) => {
                assert!(!message.is_empty());
                assert!(!message.contains("RawLoaderError"), "{message}");
            }
            other => panic!("expected an unpack failure, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let decoder = StagedDecoder::new(RawloaderBackend::new());
        let source = Source::Path(dir.path().join("absent.cr2"));

        let result = decoder.decode(&source, &DecodeSettings::new(), &mut |_| {}, &|| false);

        assert!(matches!(result, Err(DecodeError::Io { .. })));
    }
}
