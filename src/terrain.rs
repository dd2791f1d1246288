use glam::Vec2;

use crate::raster::RasterBuffer;

/// Gradient magnitude that maps to a local slope of 1.0
const SLOPE_NORMALIZATION: f32 = 100.0;

/// Elevation difference (m) that saturates the drainage factor
const DRAINAGE_RANGE_M: f32 = 100.0;

/// Normalized slope at a (possibly fractional) source position
///
/// Central differences over the four direct neighbours, divided by the
/// distance they span (two pixel pitches). Returns 0 on the outer ring where
/// a neighbour is missing and on a NoData pixel. NoData neighbours take the
/// centre elevation.
///
/// # Arguments
/// * `raster` - Source elevation grid
/// * `x` - X position, truncated to the containing pixel
/// * `y` - Y position, truncated to the containing pixel
///
/// # Returns
/// * `f32` - Slope in [0, 1]
pub fn local_slope(raster: &RasterBuffer, x: f32, y: f32) -> f32 {
    let (ix, iy) = (x.floor(), y.floor());
    if ix < 1.0 || iy < 1.0 {
        return 0.0;
    }
    let (ix, iy) = (ix as usize, iy as usize);
    if ix + 1 >= raster.width() || iy + 1 >= raster.height() {
        return 0.0;
    }

    if raster.is_nodata(ix, iy) {
        return 0.0;
    }

    let center = raster.at(ix, iy) as f32;
    let z = |nx: usize, ny: usize| {
        if raster.is_nodata(nx, ny) {
            center
        } else {
            raster.at(nx, ny) as f32
        }
    };
    let left = z(ix - 1, iy);
    let right = z(ix + 1, iy);
    let top = z(ix, iy - 1);
    let bottom = z(ix, iy + 1);

    let distance = 2.0 * raster.pixel_pitch_m();
    let gradient = Vec2::new((right - left) / distance, (bottom - top) / distance);

    (gradient.length() / SLOPE_NORMALIZATION).min(1.0)
}

/// Slope and facing direction of a pixel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceOrientation {
    /// Inclination in degrees, 0 = flat
    pub slope_deg: f32,
    /// Compass direction the surface faces, 0 = north, clockwise
    pub aspect_deg: f32,
}

impl SurfaceOrientation {
    pub const FLAT: SurfaceOrientation = SurfaceOrientation {
        slope_deg: 0.0,
        aspect_deg: 0.0,
    };
}

/// Sobel gradient of the 3x3 window around (x, y), in rise per meter.
///
/// X grows east and Y grows south, matching the row order of the raster.
/// NoData neighbours take the centre elevation.
fn sobel_gradient(raster: &RasterBuffer, x: usize, y: usize) -> Vec2 {
    let center = raster.at(x, y) as f32;
    let z = |dx: usize, dy: usize| {
        let (nx, ny) = (x + dx - 1, y + dy - 1);
        if raster.is_nodata(nx, ny) {
            center
        } else {
            raster.at(nx, ny) as f32
        }
    };

    let gx = (z(2, 0) + 2.0 * z(2, 1) + z(2, 2)) - (z(0, 0) + 2.0 * z(0, 1) + z(0, 2));
    let gy = (z(0, 2) + 2.0 * z(1, 2) + z(2, 2)) - (z(0, 0) + 2.0 * z(1, 0) + z(2, 0));

    Vec2::new(gx, gy) / (8.0 * raster.pixel_pitch_m())
}

/// Slope angle and aspect at an integer pixel.
///
/// Edge pixels are reported as flat and north-facing.
pub fn surface_orientation(raster: &RasterBuffer, x: usize, y: usize) -> SurfaceOrientation {
    if x == 0 || y == 0 || x + 1 >= raster.width() || y + 1 >= raster.height() {
        return SurfaceOrientation::FLAT;
    }

    let gradient = sobel_gradient(raster, x, y);
    let slope_deg = gradient.length().atan().to_degrees();

    // The surface faces downhill: east component -gx, north component +gy
    let aspect_deg = (-gradient.x).atan2(gradient.y).to_degrees().rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative angles
    let aspect_deg = if aspect_deg >= 360.0 { 0.0 } else { aspect_deg };

    SurfaceOrientation {
        slope_deg,
        aspect_deg,
    }
}

/// Valley-versus-ridge indicator
///
/// Averages how much higher the valid neighbours within `radius` are than
/// the centre. A centre sitting 100 m below its surroundings scores 1, one
/// 100 m above scores 0, level ground 0.5.
///
/// # Arguments
/// * `raster` - Elevation grid
/// * `x` - Pixel column
/// * `y` - Pixel row
/// * `radius` - Half-size of the square window
///
/// # Returns
/// * `f32` - Drainage factor in [0, 1]
pub fn drainage_factor(raster: &RasterBuffer, x: usize, y: usize, radius: usize) -> f32 {
    let center = raster.at(x, y) as f32;

    let x_start = x.saturating_sub(radius);
    let y_start = y.saturating_sub(radius);
    let x_end = (x + radius).min(raster.width() - 1);
    let y_end = (y + radius).min(raster.height() - 1);

    let mut sum = 0.0;
    let mut count = 0;
    for ny in y_start..=y_end {
        for nx in x_start..=x_end {
            if (nx == x && ny == y) || raster.is_nodata(nx, ny) {
                continue;
            }
            sum += raster.at(nx, ny) as f32 - center;
            count += 1;
        }
    }

    if count == 0 {
        return 0.5;
    }

    let mean_difference = sum / count as f32;
    (0.5 + mean_difference / (2.0 * DRAINAGE_RANGE_M)).clamp(0.0, 1.0)
}

/// Detail multiplier for an elevation band
///
/// Mid-altitude mountains get the full synthetic detail; coastal plains and
/// extreme peaks get much less.
pub fn height_type_factor(elevation: f32) -> f32 {
    if elevation < 100.0 {
        0.5
    } else if elevation < 500.0 {
        0.7
    } else if elevation < 1500.0 {
        1.0
    } else if elevation < 3000.0 {
        0.8
    } else {
        0.3
    }
}
