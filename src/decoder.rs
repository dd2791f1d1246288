use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::raster::{alloc_pixels, RasterBuffer, RasterType, MAX_HEIGHT, SRTM1_SIDE, SRTM3_SIDE};

/// Raw SRTM void marker (0x8000)
pub const NODATA_SENTINEL: i16 = i16::MIN;

/// Largest width or height accepted from a filename
const MAX_PARSED_DIMENSION: usize = 65536;

const SRTM1_BYTES: usize = SRTM1_SIDE * SRTM1_SIDE * 2;
const SRTM3_BYTES: usize = SRTM3_SIDE * SRTM3_SIDE * 2;

/// Read and decode a raster file from disk
pub fn decode_file(path: &Path) -> Result<RasterBuffer> {
    let bytes = std::fs::read(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    decode(&bytes, &path.to_string_lossy())
}

/// Decode the bytes of one raster file.
///
/// SRTM-sized inputs are big-endian with 0x8000 voids. Anything else needs
/// its dimensions in the filename and is read as little-endian samples
/// without void detection.
pub fn decode(bytes: &[u8], filename: &str) -> Result<RasterBuffer> {
    let raster_type = classify(bytes.len(), filename);
    let Some((width, height)) = raster_type.dimensions() else {
        return Err(unknown_layout(bytes.len(), filename));
    };

    let mut samples = alloc_pixels(width, height, 0i16, "elevation")?;
    let mut nodata = alloc_pixels(width, height, false, "NoData mask")?;

    let cells = samples.iter_mut().zip(nodata.iter_mut());
    for (raw, (sample, is_void)) in bytes.chunks_exact(2).zip(cells) {
        let raw = [raw[0], raw[1]];
        match normalize_sample(raw, raster_type) {
            Some(value) => *sample = value,
            None => *is_void = true,
        }
    }

    let raster = RasterBuffer::from_samples(width, height, samples, nodata, raster_type, filename);
    debug!(file = filename, kind = %raster_type.label(), width, height, "decoded raster");
    Ok(raster)
}

/// Turn two raw bytes into an elevation, `None` for a void sample.
///
/// The sentinel check runs on the host-order value before clamping.
pub fn normalize_sample(raw: [u8; 2], raster_type: RasterType) -> Option<i16> {
    let value = if raster_type.is_srtm() {
        let value = i16::from_be_bytes(raw);
        if value == NODATA_SENTINEL {
            return None;
        }
        value
    } else {
        i16::from_le_bytes(raw)
    };

    Some(value.clamp(0, MAX_HEIGHT))
}

/// Work out the raster layout from the byte length and filename.
///
/// `Unknown` when the length matches neither an SRTM tile nor the
/// dimensions found in the name.
pub fn classify(byte_len: usize, filename: &str) -> RasterType {
    match byte_len {
        SRTM1_BYTES => RasterType::Srtm1,
        SRTM3_BYTES => RasterType::Srtm3,
        _ => match parse_dimensions(filename) {
            Some((width, height)) if expected_bytes(width, height) == Some(byte_len) => {
                RasterType::Custom { width, height }
            }
            _ => RasterType::Unknown,
        },
    }
}

fn expected_bytes(width: usize, height: usize) -> Option<usize> {
    width.checked_mul(height)?.checked_mul(2)
}

/// Explain why a file was classified as `Unknown`
fn unknown_layout(byte_len: usize, filename: &str) -> Error {
    let Some((width, height)) = parse_dimensions(filename) else {
        return Error::UnknownRasterType {
            filename: filename.to_string(),
            actual: byte_len,
        };
    };

    match expected_bytes(width, height) {
        Some(expected) => Error::SizeMismatch {
            filename: filename.to_string(),
            width,
            height,
            expected,
            actual: byte_len,
        },
        None => Error::AllocationOverflow {
            what: "raster",
            width,
            height,
            element_size: 2,
        },
    }
}

/// Extract `width x height` from a filename.
///
/// Tries a `_<W>x<H>` suffix on the file stem first, then the fixed layout
/// with four digits at offsets 5 and 10 of the basename.
pub fn parse_dimensions(filename: &str) -> Option<(usize, usize)> {
    let basename = Path::new(filename).file_name()?.to_str()?;
    suffix_dimensions(basename).or_else(|| fixed_offset_dimensions(basename))
}

fn suffix_dimensions(basename: &str) -> Option<(usize, usize)> {
    let stem = basename.rsplit_once('.').map_or(basename, |(stem, _)| stem);
    let (_, dims) = stem.rsplit_once('_')?;
    let (width, height) = dims.split_once(['x', 'X'])?;
    plausible(width.parse().ok()?, height.parse().ok()?)
}

fn fixed_offset_dimensions(basename: &str) -> Option<(usize, usize)> {
    let bytes = basename.as_bytes();
    if bytes.len() < 15 {
        return None;
    }
    plausible(leading_number(&bytes[5..9]), leading_number(&bytes[10..14]))
}

/// Value of the leading decimal digits, 0 if there are none
fn leading_number(field: &[u8]) -> usize {
    field
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .fold(0, |acc, b| acc * 10 + (b - b'0') as usize)
}

fn plausible(width: usize, height: usize) -> Option<(usize, usize)> {
    let valid = |side: usize| side > 0 && side <= MAX_PARSED_DIMENSION;
    (valid(width) && valid(height)).then_some((width, height))
}
