//! Deterministic value noise used for procedural terrain detail
//!
//! Everything here is integer hashing plus plain f32 arithmetic, so the same
//! inputs give the same output on every run and platform.

/// Hash three integers to a pseudo-random value in [-1, 1]
///
/// Shift-xor mixing followed by a cubic multiply-add, all in wrapping 32-bit
/// arithmetic.
///
/// # Arguments
/// * `x` - Lattice X coordinate
/// * `y` - Lattice Y coordinate
/// * `seed` - Seed selecting an independent noise field
///
/// # Returns
/// * `f32` - Noise value in [-1, 1]
pub fn hash_noise(x: i32, y: i32, seed: i32) -> f32 {
    let n = x
        .wrapping_add(y.wrapping_mul(57))
        .wrapping_add(seed.wrapping_mul(131));
    let n = n.wrapping_shl(13) ^ n;

    let mixed = n
        .wrapping_mul(n.wrapping_mul(n).wrapping_mul(15731).wrapping_add(789221))
        .wrapping_add(1376312589)
        & 0x7fff_ffff;

    1.0 - mixed as f32 / 1_073_741_824.0
}

/// Linearly interpolate between two values
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + t * (b - a)
}

/// Sample hash noise at a fractional position
///
/// Blends the four surrounding lattice values so the field is continuous
/// instead of blocky.
pub fn bilinear_noise(x: f32, y: f32, seed: i32) -> f32 {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (ix, iy) = (x0 as i32, y0 as i32);

    let v00 = hash_noise(ix, iy, seed);
    let v10 = hash_noise(ix.wrapping_add(1), iy, seed);
    let v01 = hash_noise(ix, iy.wrapping_add(1), seed);
    let v11 = hash_noise(ix.wrapping_add(1), iy.wrapping_add(1), seed);

    let top = lerp(v00, v10, fx);
    let bottom = lerp(v01, v11, fx);
    lerp(top, bottom, fy)
}

/// Multi-octave noise with amplitude normalization
///
/// Each octave doubles the frequency, scales the amplitude by `persistence`
/// and uses its own seed (`seed + octave`). The sum is divided by the total
/// amplitude so the result stays in roughly [-1, 1] for any octave count.
///
/// # Arguments
/// * `x` - X coordinate in noise space
/// * `y` - Y coordinate in noise space
/// * `octaves` - Number of noise layers
/// * `persistence` - Amplitude falloff per octave
/// * `scale` - Frequency of the first octave
/// * `seed` - Base seed
///
/// # Returns
/// * `f32` - Combined noise value
pub fn fractal_noise(x: f32, y: f32, octaves: u32, persistence: f32, scale: f32, seed: i32) -> f32 {
    let mut total = 0.0;
    let mut frequency = scale;
    let mut amplitude = 1.0;
    let mut max_value = 0.0;

    for octave in 0..octaves {
        let octave_seed = seed.wrapping_add(octave as i32);
        total += bilinear_noise(x * frequency, y * frequency, octave_seed) * amplitude;
        max_value += amplitude;
        amplitude *= persistence;
        frequency *= 2.0;
    }

    if max_value > 0.0 {
        total / max_value
    } else {
        0.0
    }
}

/// One frequency band of the detail noise
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseBand {
    /// Cycles per destination pixel
    pub frequency: f32,
    pub octaves: u32,
    pub persistence: f32,
    /// Offset added to the base seed to decorrelate bands
    pub seed_offset: i32,
    /// Share of this band in the combined value
    pub weight: f32,
}

/// Large, medium and fine terrain features
pub const DETAIL_BANDS: [NoiseBand; 3] = [
    NoiseBand {
        frequency: 0.005,
        octaves: 3,
        persistence: 0.5,
        seed_offset: 0,
        weight: 0.5,
    },
    NoiseBand {
        frequency: 0.02,
        octaves: 4,
        persistence: 0.6,
        seed_offset: 100,
        weight: 0.3,
    },
    NoiseBand {
        frequency: 0.08,
        octaves: 2,
        persistence: 0.4,
        seed_offset: 200,
        weight: 0.2,
    },
];

/// Weighted sum of the detail bands at a destination pixel
pub fn layered_noise(x: f32, y: f32, seed: i32, bands: &[NoiseBand]) -> f32 {
    bands
        .iter()
        .map(|band| {
            band.weight
                * fractal_noise(
                    x * band.frequency,
                    y * band.frequency,
                    band.octaves,
                    band.persistence,
                    1.0,
                    seed.wrapping_add(band.seed_offset),
                )
        })
        .sum()
}
