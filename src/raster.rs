use crate::error::{Error, Result};

/// Highest elevation kept after decoding, in meters.
pub const MAX_HEIGHT: i16 = 6000;

/// Side length of a 1201x1201 SRTM tile.
pub const SRTM1_SIDE: usize = 1201;
/// Side length of a 3601x3601 SRTM tile.
pub const SRTM3_SIDE: usize = 3601;

/// Layout of a raster file, derived from its byte length or its name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterType {
    /// 1201x1201 big-endian tile
    Srtm1,
    /// 3601x3601 big-endian tile
    Srtm3,
    /// Dimensions parsed from the filename
    Custom { width: usize, height: usize },
    Unknown,
}

impl RasterType {
    /// Width and height implied by the type, if any
    pub fn dimensions(&self) -> Option<(usize, usize)> {
        match *self {
            RasterType::Srtm1 => Some((SRTM1_SIDE, SRTM1_SIDE)),
            RasterType::Srtm3 => Some((SRTM3_SIDE, SRTM3_SIDE)),
            RasterType::Custom { width, height } => Some((width, height)),
            RasterType::Unknown => None,
        }
    }

    pub fn is_srtm(&self) -> bool {
        matches!(self, RasterType::Srtm1 | RasterType::Srtm3)
    }

    /// Ground distance between two neighbouring samples in meters.
    ///
    /// Custom rasters are assumed to share the 1201 tile resolution.
    pub fn pixel_pitch_m(&self) -> f32 {
        match self {
            RasterType::Srtm3 => 90.0,
            _ => 30.0,
        }
    }

    pub fn label(&self) -> String {
        match self {
            RasterType::Srtm1 => "SRTM 1201x1201".to_string(),
            RasterType::Srtm3 => "SRTM 3601x3601".to_string(),
            RasterType::Custom { width, height } => format!("custom {}x{}", width, height),
            RasterType::Unknown => "unknown".to_string(),
        }
    }
}

/// Number of `T` elements for a `width` x `height` grid, refusing products
/// that overflow `usize` or exceed what a single allocation may hold.
pub fn checked_pixel_count<T>(width: usize, height: usize, what: &'static str) -> Result<usize> {
    let element_size = std::mem::size_of::<T>().max(1);
    let overflow = || Error::AllocationOverflow {
        what,
        width,
        height,
        element_size,
    };

    let count = width.checked_mul(height).ok_or_else(overflow)?;
    let bytes = count.checked_mul(element_size).ok_or_else(overflow)?;
    if bytes > isize::MAX as usize {
        return Err(overflow());
    }
    Ok(count)
}

/// Allocate a `width` x `height` buffer filled with `fill`.
///
/// Both the size computation and the allocation itself are fallible, so a
/// hostile header fails the file instead of aborting the process.
pub fn alloc_pixels<T: Clone>(
    width: usize,
    height: usize,
    fill: T,
    what: &'static str,
) -> Result<Vec<T>> {
    let count = checked_pixel_count::<T>(width, height, what)?;
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(count)
        .map_err(|_| Error::AllocationFailed {
            what,
            bytes: count * std::mem::size_of::<T>(),
        })?;
    buffer.resize(count, fill);
    Ok(buffer)
}

/// Row-major elevation grid with an out-of-band NoData mask.
///
/// NoData samples hold 0 in `samples`; the mask is what tells them apart
/// from a valid sea-level sample.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterBuffer {
    width: usize,
    height: usize,
    samples: Vec<i16>,
    nodata: Vec<bool>,
    raster_type: RasterType,
    filename: String,
    pixel_pitch_m: f32,
}

impl RasterBuffer {
    /// Wrap decoded samples. Panics if the buffers don't match the dimensions.
    pub fn from_samples(
        width: usize,
        height: usize,
        samples: Vec<i16>,
        nodata: Vec<bool>,
        raster_type: RasterType,
        filename: impl Into<String>,
    ) -> Self {
        assert_eq!(samples.len(), width * height, "sample count must be width * height");
        assert_eq!(nodata.len(), samples.len(), "NoData mask must cover every sample");

        RasterBuffer {
            width,
            height,
            samples,
            nodata,
            raster_type,
            filename: filename.into(),
            pixel_pitch_m: raster_type.pixel_pitch_m(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn raster_type(&self) -> RasterType {
        self.raster_type
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Meters between neighbouring samples of this grid
    pub fn pixel_pitch_m(&self) -> f32 {
        self.pixel_pitch_m
    }

    pub fn with_pixel_pitch(mut self, pixel_pitch_m: f32) -> Self {
        self.pixel_pitch_m = pixel_pitch_m;
        self
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize) -> usize {
        debug_assert!(
            x < self.width && y < self.height,
            "({}, {}) outside {}x{}",
            x,
            y,
            self.width,
            self.height
        );
        y * self.width + x
    }

    /// Sample at (x, y); the caller guarantees the coordinates are inside.
    #[inline]
    pub fn at(&self, x: usize, y: usize) -> i16 {
        self.samples[self.index(x, y)]
    }

    #[inline]
    pub fn is_nodata(&self, x: usize, y: usize) -> bool {
        self.nodata[self.index(x, y)]
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn nodata_mask(&self) -> &[bool] {
        &self.nodata
    }

    pub fn nodata_count(&self) -> usize {
        self.nodata.iter().filter(|&&flag| flag).count()
    }

    /// Min and max over valid samples, `None` if every sample is NoData
    pub fn elevation_range(&self) -> Option<(i16, i16)> {
        self.samples
            .iter()
            .zip(&self.nodata)
            .filter(|(_, nodata)| !**nodata)
            .fold(None, |range, (&value, _)| match range {
                None => Some((value, value)),
                Some((min, max)) => Some((min.min(value), max.max(value))),
            })
    }
}

/// Per-file facts gathered during the pre-scan
#[derive(Debug, Clone, PartialEq)]
pub struct FileStat {
    pub filename: String,
    pub raster_type: RasterType,
    pub width: usize,
    pub height: usize,
    pub min_elevation: Option<i16>,
    pub max_elevation: Option<i16>,
    pub nodata_count: usize,
}

impl FileStat {
    pub fn from_raster(raster: &RasterBuffer) -> Self {
        let range = raster.elevation_range();
        FileStat {
            filename: raster.filename().to_string(),
            raster_type: raster.raster_type(),
            width: raster.width(),
            height: raster.height(),
            min_elevation: range.map(|(min, _)| min),
            max_elevation: range.map(|(_, max)| max),
            nodata_count: raster.nodata_count(),
        }
    }

    pub fn nodata_percent(&self) -> f32 {
        let total = self.width * self.height;
        if total == 0 {
            return 0.0;
        }
        self.nodata_count as f32 / total as f32 * 100.0
    }
}

/// Overall valid elevation range across a batch.
///
/// Built during the sequential pre-scan and only read afterwards, so the
/// render workers share it by reference without locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalElevationRange {
    min: i16,
    max: i16,
}

impl Default for GlobalElevationRange {
    fn default() -> Self {
        GlobalElevationRange {
            min: i16::MAX,
            max: i16::MIN,
        }
    }
}

impl GlobalElevationRange {
    /// Fold one file's range in: min of mins, max of maxes
    pub fn merge(&mut self, stat: &FileStat) {
        if let Some(min) = stat.min_elevation {
            self.min = self.min.min(min);
        }
        if let Some(max) = stat.max_elevation {
            self.max = self.max.max(max);
        }
    }

    pub fn bounds(&self) -> Option<(i16, i16)> {
        (self.min <= self.max).then_some((self.min, self.max))
    }
}

#[cfg(test)]
pub(crate) fn filled_raster(width: usize, height: usize, value: i16) -> RasterBuffer {
    RasterBuffer::from_samples(
        width,
        height,
        vec![value; width * height],
        vec![false; width * height],
        RasterType::Custom { width, height },
        "test.hgt",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_pixel_count_overflow() {
        assert_eq!(checked_pixel_count::<i16>(1201, 1201, "test").unwrap(), 1201 * 1201);

        let result = checked_pixel_count::<i16>(usize::MAX / 2, 3, "test");
        assert!(matches!(result, Err(Error::AllocationOverflow { .. })));

        // Fits as a count but not as bytes
        let result = checked_pixel_count::<u64>(usize::MAX / 4, 1, "test");
        assert!(matches!(result, Err(Error::AllocationOverflow { .. })));
    }

    #[test]
    fn test_alloc_pixels_fills() {
        let buffer = alloc_pixels(4, 3, 7u16, "test").unwrap();
        assert_eq!(buffer.len(), 12);
        assert!(buffer.iter().all(|&v| v == 7));
    }

    #[test]
    fn test_raster_accessors() {
        let samples: Vec<i16> = (0..6).collect();
        let raster = RasterBuffer::from_samples(
            3,
            2,
            samples,
            vec![false; 6],
            RasterType::Custom {
                width: 3,
                height: 2,
            },
            "a.hgt",
        );

        assert_eq!(raster.at(2, 1), 5);
        assert_eq!(raster.at(1, 0), 1);
        assert_eq!(raster.index(1, 1), 4);
    }

    #[test]
    fn test_elevation_range_skips_nodata() {
        let samples = vec![0, 120, 80, 0];
        let nodata = vec![true, false, false, false];
        let raster = RasterBuffer::from_samples(
            2,
            2,
            samples,
            nodata,
            RasterType::Custom {
                width: 2,
                height: 2,
            },
            "a.hgt",
        );

        // The valid zero at index 3 counts, the NoData zero does not
        assert_eq!(raster.elevation_range(), Some((0, 120)));
        assert_eq!(raster.nodata_count(), 1);
    }

    #[test]
    fn test_elevation_range_all_nodata() {
        let raster = RasterBuffer::from_samples(
            2,
            1,
            vec![0, 0],
            vec![true, true],
            RasterType::Custom {
                width: 2,
                height: 1,
            },
            "a.hgt",
        );
        assert_eq!(raster.elevation_range(), None);

        let stat = FileStat::from_raster(&raster);
        assert_eq!(stat.min_elevation, None);
        assert_eq!(stat.nodata_percent(), 100.0);
    }

    #[test]
    fn test_global_range_merge() {
        let mut global = GlobalElevationRange::default();
        assert_eq!(global.bounds(), None);

        let mut stat = FileStat::from_raster(&filled_raster(2, 2, 300));
        global.merge(&stat);
        stat.min_elevation = Some(50);
        stat.max_elevation = Some(200);
        global.merge(&stat);

        assert_eq!(global.bounds(), Some((50, 300)));
    }

    #[test]
    fn test_pixel_pitch_per_type() {
        assert_eq!(RasterType::Srtm1.pixel_pitch_m(), 30.0);
        assert_eq!(RasterType::Srtm3.pixel_pitch_m(), 90.0);
        let (width, height) = (10, 10);
        assert_eq!(RasterType::Custom { width, height }.pixel_pitch_m(), 30.0);
        assert_eq!(RasterType::Srtm3.dimensions(), Some((3601, 3601)));
    }
}
