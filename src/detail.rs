use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::noise::{layered_noise, DETAIL_BANDS};
use crate::raster::{alloc_pixels, RasterBuffer, RasterType, MAX_HEIGHT};
use crate::terrain::{height_type_factor, local_slope};

/// Largest supported upsampling factor
pub const MAX_SCALE_FACTOR: usize = 10;

/// Settings for procedural detail synthesis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetailOptions {
    /// Integer upsampling factor (1-10)
    pub scale_factor: usize,
    /// Peak detail amplitude in meters
    pub intensity: f32,
    /// Base noise seed
    pub seed: i32,
}

impl Default for DetailOptions {
    fn default() -> Self {
        DetailOptions {
            scale_factor: 3,
            intensity: 15.0,
            seed: 12345,
        }
    }
}

/// Bilinear elevation at a fractional source position
///
/// Coordinates are expected inside [0, width - 1] x [0, height - 1]; the
/// right and bottom neighbours are clamped to the last column and row.
/// NoData corners drop out and the remaining weights are renormalised.
fn bilinear_height(raster: &RasterBuffer, x: f32, y: f32) -> f32 {
    let x0 = (x.floor() as usize).min(raster.width() - 1);
    let y0 = (y.floor() as usize).min(raster.height() - 1);
    let x1 = (x0 + 1).min(raster.width() - 1);
    let y1 = (y0 + 1).min(raster.height() - 1);

    let tx = x - x0 as f32;
    let ty = y - y0 as f32;

    let corners = [
        (x0, y0, (1.0 - tx) * (1.0 - ty)),
        (x1, y0, tx * (1.0 - ty)),
        (x0, y1, (1.0 - tx) * ty),
        (x1, y1, tx * ty),
    ];

    let mut weighted = 0.0;
    let mut total = 0.0;
    for (cx, cy, weight) in corners {
        if raster.is_nodata(cx, cy) {
            continue;
        }
        weighted += raster.at(cx, cy) as f32 * weight;
        total += weight;
    }

    if total > 0.0 {
        weighted / total
    } else {
        raster.at(x0, y0) as f32
    }
}

/// Destination size for a scale factor, refusing overflow
fn scaled_dimensions(width: usize, height: usize, scale: usize) -> Result<(usize, usize)> {
    let overflow = || Error::ScaleOverflow {
        width,
        height,
        scale,
    };
    let new_width = width.checked_mul(scale).ok_or_else(overflow)?;
    let new_height = height.checked_mul(scale).ok_or_else(overflow)?;
    Ok((new_width, new_height))
}

/// Upsample a raster and inject terrain-aware fractal detail
///
/// Every destination pixel gets the bilinear base height of its source
/// position plus three bands of fractal noise, scaled by `intensity`, by the
/// local slope (flat ground keeps 30% of the detail) and by the elevation
/// band. Rows are computed in parallel; each one only reads the source.
///
/// Pixels whose nearest source sample is NoData stay NoData at 0 m.
///
/// # Arguments
/// * `source` - The decoded raster
/// * `options` - Scale factor, detail intensity and seed
///
/// # Returns
/// * `Result<RasterBuffer>` - Raster of size (width * scale) x (height * scale)
pub fn synthesize(source: &RasterBuffer, options: &DetailOptions) -> Result<RasterBuffer> {
    let scale = options.scale_factor;
    if !(1..=MAX_SCALE_FACTOR).contains(&scale) {
        return Err(Error::Config(format!(
            "scale factor must be between 1 and {}, got {}",
            MAX_SCALE_FACTOR, scale
        )));
    }
    if source.is_empty() {
        return Err(Error::EmptyRaster {
            filename: source.filename().to_string(),
        });
    }

    let src_width = source.width();
    let src_height = source.height();
    let (dst_width, dst_height) = scaled_dimensions(src_width, src_height, scale)?;

    let mut samples = alloc_pixels(dst_width, dst_height, 0i16, "detail raster")?;
    let mut nodata = alloc_pixels(dst_width, dst_height, false, "detail NoData mask")?;

    info!(
        file = source.filename(),
        width = dst_width,
        height = dst_height,
        intensity = options.intensity,
        "generating detailed heightmap"
    );

    let max_x = (src_width - 1) as f32;
    let max_y = (src_height - 1) as f32;
    let progress_step = (dst_height / 10).max(1);

    samples
        .par_chunks_mut(dst_width)
        .zip(nodata.par_chunks_mut(dst_width))
        .enumerate()
        .for_each(|(y, (row, mask_row))| {
            if y % progress_step == 0 {
                debug!(file = source.filename(), "detail progress {}%", y * 100 / dst_height);
            }

            let src_y = (y as f32 / scale as f32).min(max_y);
            let nearest_y = (src_y.round() as usize).min(src_height - 1);

            for (x, (sample, is_void)) in row.iter_mut().zip(mask_row.iter_mut()).enumerate() {
                let src_x = (x as f32 / scale as f32).min(max_x);
                let nearest_x = (src_x.round() as usize).min(src_width - 1);

                if source.is_nodata(nearest_x, nearest_y) {
                    *is_void = true;
                    continue;
                }

                let base_height = bilinear_height(source, src_x, src_y);

                let noise = layered_noise(x as f32, y as f32, options.seed, &DETAIL_BANDS);
                let slope_multiplier = 0.3 + 0.7 * local_slope(source, src_x, src_y);
                let variation =
                    noise * options.intensity * slope_multiplier * height_type_factor(base_height);

                let final_height = (base_height + variation).clamp(0.0, MAX_HEIGHT as f32);
                *sample = final_height.round() as i16;
            }
        });

    let raster = RasterBuffer::from_samples(
        dst_width,
        dst_height,
        samples,
        nodata,
        RasterType::Custom {
            width: dst_width,
            height: dst_height,
        },
        source.filename(),
    )
    .with_pixel_pitch(source.pixel_pitch_m() / scale as f32);

    Ok(raster)
}
