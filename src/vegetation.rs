use rayon::prelude::*;
use serde::Serialize;

use crate::error::Result;
use crate::raster::{alloc_pixels, RasterBuffer};
use crate::terrain::{drainage_factor, surface_orientation};
use crate::tone::{to_u8, PixelBuffer, PixelData};

/// Window half-size used when estimating drainage
pub const DRAINAGE_RADIUS: usize = 3;

/// Slope (degrees) up to which the slope factor stays at 1
const GENTLE_SLOPE_DEG: f32 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Biome {
    #[default]
    Alpine,
    Temperate,
    Tropical,
    Arctic,
}

impl Biome {
    pub fn name(&self) -> &'static str {
        match self {
            Biome::Alpine => "alpine",
            Biome::Temperate => "temperate",
            Biome::Tropical => "tropical",
            Biome::Arctic => "arctic",
        }
    }

    /// Thresholds for this biome.
    ///
    /// Only the alpine table is calibrated. The other biomes share it until
    /// they get their own.
    pub fn params(&self) -> VegetationParams {
        match self {
            Biome::Alpine | Biome::Temperate | Biome::Tropical | Biome::Arctic => {
                VegetationParams::ALPINE
            }
        }
    }
}

/// Per-biome vegetation thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VegetationParams {
    /// Below this nothing grows (m)
    pub min_elevation: f32,
    pub tree_line: f32,
    pub bush_line: f32,
    /// Above this nothing grows (m)
    pub grass_line: f32,
    /// Absolute ceiling, never above `grass_line` in a sane table (m)
    pub max_elevation: f32,
    /// Steepest slope that still carries vegetation (degrees)
    pub max_slope: f32,
    /// Relative density change on north and south facing slopes
    pub aspect_modifier: f32,
    /// Relative density gain at the bottom of a valley
    pub drainage_bonus: f32,
}

impl VegetationParams {
    pub const ALPINE: VegetationParams = VegetationParams {
        min_elevation: 200.0,
        tree_line: 1800.0,
        bush_line: 2200.0,
        grass_line: 2800.0,
        max_elevation: 3500.0,
        max_slope: 45.0,
        aspect_modifier: 0.2,
        drainage_bonus: 0.3,
    };
}

/// Linear ramp from `from` at `start` to `to` at `end`
fn ramp(value: f32, start: f32, end: f32, from: f32, to: f32) -> f32 {
    if end <= start {
        return to;
    }
    let t = ((value - start) / (end - start)).clamp(0.0, 1.0);
    from + t * (to - from)
}

fn elevation_factor(elevation: f32, params: &VegetationParams) -> f32 {
    if elevation < params.min_elevation
        || elevation > params.grass_line
        || elevation > params.max_elevation
    {
        0.0
    } else if elevation <= params.tree_line {
        ramp(elevation, params.min_elevation, params.tree_line, 1.0, 0.7)
    } else if elevation <= params.bush_line {
        ramp(elevation, params.tree_line, params.bush_line, 0.7, 0.3)
    } else {
        ramp(elevation, params.bush_line, params.grass_line, 0.3, 0.1)
    }
}

fn slope_factor(slope_deg: f32, params: &VegetationParams) -> f32 {
    if slope_deg <= GENTLE_SLOPE_DEG {
        1.0
    } else if slope_deg > params.max_slope {
        0.0
    } else {
        ramp(slope_deg, GENTLE_SLOPE_DEG, params.max_slope, 1.0, 0.0)
    }
}

fn aspect_factor(aspect_deg: f32, params: &VegetationParams) -> f32 {
    if (135.0..=225.0).contains(&aspect_deg) {
        // Sunny and dry
        1.0 - params.aspect_modifier
    } else if aspect_deg >= 315.0 || aspect_deg <= 45.0 {
        1.0 + params.aspect_modifier
    } else {
        1.0
    }
}

/// Vegetation density for one set of terrain descriptors
///
/// # Arguments
/// * `elevation` - Height in meters
/// * `slope_deg` - Slope angle in degrees
/// * `aspect_deg` - Facing direction, 0 = north, clockwise
/// * `drainage` - Drainage factor in [0, 1]
/// * `params` - Biome thresholds
///
/// # Returns
/// * `f32` - Density in [0, 1]
pub fn density(
    elevation: f32,
    slope_deg: f32,
    aspect_deg: f32,
    drainage: f32,
    params: &VegetationParams,
) -> f32 {
    let elevation = elevation_factor(elevation, params);
    if elevation == 0.0 {
        return 0.0;
    }

    let combined = elevation
        * slope_factor(slope_deg, params)
        * aspect_factor(aspect_deg, params)
        * (1.0 + drainage * params.drainage_bonus);

    combined.clamp(0.0, 1.0)
}

/// Grayscale vegetation density mask, same size as the raster
///
/// NoData pixels are left at 0 without computing any terrain descriptor.
pub fn generate_mask(raster: &RasterBuffer, biome: Biome) -> Result<PixelBuffer> {
    let width = raster.width();
    let height = raster.height();
    let params = biome.params();

    let mut pixels = alloc_pixels(width, height, 0u8, "vegetation mask")?;

    if width > 0 {
        pixels.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
            for (x, pixel) in row.iter_mut().enumerate() {
                if raster.is_nodata(x, y) {
                    continue;
                }
                let orientation = surface_orientation(raster, x, y);
                let drainage = drainage_factor(raster, x, y, DRAINAGE_RADIUS);
                let value = density(
                    raster.at(x, y) as f32,
                    orientation.slope_deg,
                    orientation.aspect_deg,
                    drainage,
                    &params,
                );
                *pixel = to_u8(value);
            }
        });
    }

    Ok(PixelBuffer {
        width,
        height,
        data: PixelData::Gray8(pixels),
    })
}
