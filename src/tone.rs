use rayon::prelude::*;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::raster::{alloc_pixels, RasterBuffer, MAX_HEIGHT};

/// Elevation-to-intensity curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CurveType {
    #[default]
    Linear,
    /// `log10(1 + 9x)`, stretches contrast in the lowlands
    Log,
}

/// Pixel layout handed to the image writer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    /// Gray replicated to three 8-bit channels
    #[default]
    Rgb8,
    /// 8-bit gray RGB plus alpha, NoData transparent
    Rgba8,
    Gray16,
    /// 16-bit gray plus alpha, NoData transparent
    GrayAlpha16,
}

impl PixelFormat {
    pub fn from_flags(sixteen_bit: bool, alpha_nodata: bool) -> Self {
        match (sixteen_bit, alpha_nodata) {
            (false, false) => PixelFormat::Rgb8,
            (false, true) => PixelFormat::Rgba8,
            (true, false) => PixelFormat::Gray16,
            (true, true) => PixelFormat::GrayAlpha16,
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
            PixelFormat::Gray16 => 1,
            PixelFormat::GrayAlpha16 => 2,
        }
    }
}

/// Interleaved pixel samples
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    Rgb8(Vec<u8>),
    Rgba8(Vec<u8>),
    Gray8(Vec<u8>),
    Gray16(Vec<u16>),
    GrayAlpha16(Vec<u16>),
}

/// A rendered image ready for encoding
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    pub width: usize,
    pub height: usize,
    pub data: PixelData,
}

/// Elevation window mapped onto [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElevationRange {
    pub min: i32,
    pub max: i32,
}

impl ElevationRange {
    /// Pick the window used for rendering.
    ///
    /// Overrides win when together they still form `min < max`; otherwise the
    /// auto-detected batch range is used. A degenerate auto range (constant
    /// terrain) is widened down to 0 m so it renders at full intensity.
    pub fn effective(
        auto: Option<(i16, i16)>,
        min_override: Option<i32>,
        max_override: Option<i32>,
    ) -> Self {
        let (auto_min, auto_max) = auto
            .map(|(min, max)| (min as i32, max as i32))
            .unwrap_or((0, MAX_HEIGHT as i32));

        let min = min_override.unwrap_or(auto_min);
        let max = max_override.unwrap_or(auto_max);
        if min < max {
            return ElevationRange { min, max };
        }

        if auto_min < auto_max {
            ElevationRange {
                min: auto_min,
                max: auto_max,
            }
        } else if auto_max > 0 {
            ElevationRange {
                min: 0,
                max: auto_max,
            }
        } else {
            ElevationRange {
                min: auto_max,
                max: auto_max + 1,
            }
        }
    }

    /// Position of `elevation` inside the window, clamped to [0, 1]
    pub fn normalize(&self, elevation: i16) -> f32 {
        let span = (self.max - self.min) as f32;
        if span <= 0.0 {
            return 0.5;
        }
        let clamped = (elevation as i32).clamp(self.min, self.max);
        (clamped - self.min) as f32 / span
    }
}

/// Apply the mapping curve and gamma to a normalized value
///
/// Input and output are both clipped to [0, 1]. Gamma is applied as
/// `value^(1/gamma)`.
pub fn apply_curve(value: f32, curve: CurveType, gamma: f32) -> f32 {
    let value = value.clamp(0.0, 1.0);

    let mut result = match curve {
        CurveType::Linear => value,
        CurveType::Log => (1.0 + value * 9.0).log10(),
    };

    if gamma != 1.0 {
        result = result.powf(1.0 / gamma);
    }

    result.clamp(0.0, 1.0)
}

pub fn to_u8(value: f32) -> u8 {
    (value * 255.0).round().clamp(0.0, 255.0) as u8
}

pub fn to_u16(value: f32) -> u16 {
    (value * 65535.0).round().clamp(0.0, 65535.0) as u16
}

/// Everything the tone mapper needs besides the raster
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneSettings {
    pub range: ElevationRange,
    pub curve: CurveType,
    pub gamma: f32,
    pub format: PixelFormat,
}

impl ToneSettings {
    /// Normalized intensity for one elevation
    pub fn intensity(&self, elevation: i16) -> f32 {
        apply_curve(self.range.normalize(elevation), self.curve, self.gamma)
    }
}

/// `width * channels` x `height` buffer with overflow checks on every product
pub(crate) fn alloc_channels<T: Clone>(
    width: usize,
    height: usize,
    channels: usize,
    fill: T,
    what: &'static str,
) -> Result<Vec<T>> {
    let row_len = width.checked_mul(channels).ok_or(Error::AllocationOverflow {
        what,
        width,
        height,
        element_size: channels * std::mem::size_of::<T>(),
    })?;
    alloc_pixels(row_len, height, fill, what)
}

/// Render a raster into the requested pixel format
///
/// Rows are mapped in parallel. With an alpha format, NoData pixels get
/// alpha 0 and keep the tone of their 0 m replacement value.
pub fn render(raster: &RasterBuffer, settings: &ToneSettings) -> Result<PixelBuffer> {
    let width = raster.width();
    let height = raster.height();
    let channels = settings.format.channels();

    let data = match settings.format {
        PixelFormat::Rgb8 | PixelFormat::Rgba8 => {
            let mut pixels = alloc_channels(width, height, channels, 0u8, "8-bit pixel data")?;
            fill_rows(raster, &mut pixels, channels, |elevation, nodata, pixel| {
                let value = to_u8(settings.intensity(elevation));
                pixel[..3].fill(value);
                if let Some(alpha) = pixel.get_mut(3) {
                    *alpha = if nodata { 0 } else { 255 };
                }
            });
            if settings.format == PixelFormat::Rgb8 {
                PixelData::Rgb8(pixels)
            } else {
                PixelData::Rgba8(pixels)
            }
        }
        PixelFormat::Gray16 | PixelFormat::GrayAlpha16 => {
            let mut pixels = alloc_channels(width, height, channels, 0u16, "16-bit pixel data")?;
            fill_rows(raster, &mut pixels, channels, |elevation, nodata, pixel| {
                pixel[0] = to_u16(settings.intensity(elevation));
                if let Some(alpha) = pixel.get_mut(1) {
                    *alpha = if nodata { 0 } else { u16::MAX };
                }
            });
            if settings.format == PixelFormat::Gray16 {
                PixelData::Gray16(pixels)
            } else {
                PixelData::GrayAlpha16(pixels)
            }
        }
    };

    Ok(PixelBuffer {
        width,
        height,
        data,
    })
}

/// Run `write` for every raster pixel, one parallel task per row
fn fill_rows<T, F>(raster: &RasterBuffer, pixels: &mut [T], channels: usize, write: F)
where
    T: Send,
    F: Fn(i16, bool, &mut [T]) + Sync,
{
    let width = raster.width();
    if width == 0 {
        return;
    }

    pixels
        .par_chunks_mut(width * channels)
        .zip(raster.samples().par_chunks(width))
        .zip(raster.nodata_mask().par_chunks(width))
        .for_each(|((row, elevations), voids)| {
            let cells = elevations.iter().zip(voids);
            for (pixel, (&elevation, &nodata)) in row.chunks_exact_mut(channels).zip(cells) {
                write(elevation, nodata, pixel);
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{filled_raster, RasterType};

    fn settings(range: ElevationRange, format: PixelFormat) -> ToneSettings {
        ToneSettings {
            range,
            curve: CurveType::Linear,
            gamma: 1.0,
            format,
        }
    }

    #[test]
    fn test_linear_endpoints() {
        assert_eq!(apply_curve(0.0, CurveType::Linear, 1.0), 0.0);
        assert_eq!(apply_curve(1.0, CurveType::Linear, 1.0), 1.0);
        assert_eq!(apply_curve(0.25, CurveType::Linear, 1.0), 0.25);
    }

    #[test]
    fn test_log_curve_monotonic() {
        assert_eq!(apply_curve(0.0, CurveType::Log, 1.0), 0.0);
        assert!((apply_curve(1.0, CurveType::Log, 1.0) - 1.0).abs() < 1e-6);

        let mut previous = 0.0;
        for i in 1..=100 {
            let value = apply_curve(i as f32 / 100.0, CurveType::Log, 1.0);
            assert!(value > previous, "log curve not increasing at {}", i);
            previous = value;
        }
        // Lowlands get stretched
        assert!(apply_curve(0.1, CurveType::Log, 1.0) > 0.1);
    }

    #[test]
    fn test_gamma_and_clipping() {
        let brightened = apply_curve(0.25, CurveType::Linear, 2.0);
        assert!((brightened - 0.5).abs() < 1e-6);

        assert_eq!(apply_curve(-3.0, CurveType::Linear, 0.5), 0.0);
        assert_eq!(apply_curve(7.0, CurveType::Log, 2.2), 1.0);
    }

    fn range(min: i32, max: i32) -> ElevationRange {
        ElevationRange { min, max }
    }

    #[test]
    fn test_effective_range_overrides() {
        let auto = Some((100, 900));
        assert_eq!(ElevationRange::effective(auto, None, None), range(100, 900));
        assert_eq!(ElevationRange::effective(auto, Some(0), Some(2000)), range(0, 2000));
        assert_eq!(ElevationRange::effective(auto, None, Some(500)), range(100, 500));
        // min >= max falls back to auto
        assert_eq!(ElevationRange::effective(auto, Some(800), Some(300)), range(100, 900));
        assert_eq!(ElevationRange::effective(auto, Some(1000), None), range(100, 900));
    }

    #[test]
    fn test_effective_range_degenerate() {
        assert_eq!(ElevationRange::effective(Some((500, 500)), None, None), range(0, 500));
        assert_eq!(ElevationRange::effective(Some((0, 0)), None, None), range(0, 1));
        assert_eq!(ElevationRange::effective(None, None, None), range(0, 6000));
    }

    #[test]
    fn test_normalize_clamps() {
        let range = ElevationRange { min: 100, max: 300 };
        assert_eq!(range.normalize(50), 0.0);
        assert_eq!(range.normalize(200), 0.5);
        assert_eq!(range.normalize(5000), 1.0);
    }

    #[test]
    fn test_constant_raster_renders_white() {
        let raster = filled_raster(16, 8, 500);
        let range = ElevationRange::effective(raster.elevation_range(), None, None);

        let buffer = render(&raster, &settings(range, PixelFormat::Rgb8)).unwrap();
        assert_eq!((buffer.width, buffer.height), (16, 8));
        match buffer.data {
            PixelData::Rgb8(pixels) => {
                assert_eq!(pixels.len(), 16 * 8 * 3);
                assert!(pixels.iter().all(|&v| v == 255));
            }
            other => panic!("expected RGB8, got {:?}", other),
        }
    }

    #[test]
    fn test_alpha_marks_only_nodata() {
        let mut samples = vec![100i16; 12];
        let mut nodata = vec![false; 12];
        samples[7] = 0;
        nodata[7] = true;
        let raster = RasterBuffer::from_samples(
            4,
            3,
            samples,
            nodata,
            RasterType::Custom {
                width: 4,
                height: 3,
            },
            "hole.hgt",
        );
        let range = ElevationRange::effective(raster.elevation_range(), None, None);
        let tone = settings(range, PixelFormat::Rgba8);

        let buffer = render(&raster, &tone).unwrap();
        let PixelData::Rgba8(pixels) = buffer.data else {
            panic!("expected RGBA8");
        };

        let transparent: Vec<usize> = pixels
            .chunks_exact(4)
            .enumerate()
            .filter(|(_, p)| p[3] == 0)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(transparent, vec![7]);
        assert!(pixels.chunks_exact(4).filter(|p| p[3] != 0).all(|p| p[3] == 255));

        let hole = &pixels[7 * 4..7 * 4 + 3];
        let expected = to_u8(tone.intensity(0));
        assert_eq!(hole, &[expected, expected, expected]);
    }

    #[test]
    fn test_sixteen_bit_formats() {
        let samples = vec![0i16, 1000, 2000, 0];
        let nodata = vec![false, false, false, true];
        let raster = RasterBuffer::from_samples(
            2,
            2,
            samples,
            nodata,
            RasterType::Custom {
                width: 2,
                height: 2,
            },
            "g.hgt",
        );
        let range = ElevationRange { min: 0, max: 2000 };

        let gray = render(&raster, &settings(range, PixelFormat::Gray16)).unwrap();
        assert_eq!(gray.data, PixelData::Gray16(vec![0, 32768, 65535, 0]));

        let gray_alpha = render(&raster, &settings(range, PixelFormat::GrayAlpha16)).unwrap();
        assert_eq!(
            gray_alpha.data,
            PixelData::GrayAlpha16(vec![0, 65535, 32768, 65535, 65535, 65535, 0, 0])
        );
    }

    #[test]
    fn test_pixel_format_flags() {
        assert_eq!(PixelFormat::from_flags(false, false), PixelFormat::Rgb8);
        assert_eq!(PixelFormat::from_flags(false, true), PixelFormat::Rgba8);
        assert_eq!(PixelFormat::from_flags(true, false), PixelFormat::Gray16);
        assert_eq!(PixelFormat::from_flags(true, true), PixelFormat::GrayAlpha16);
    }
}
