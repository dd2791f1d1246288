use std::fmt;
use std::path::{Path, PathBuf};

use image::ColorType;
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::options::MetadataFormat;
use crate::raster::FileStat;
use crate::tone::{ElevationRange, PixelBuffer, PixelData};
use crate::vegetation::Biome;

/// Destination for rendered images and their sidecars
///
/// Workers of one batch share a single sink, so implementations must be
/// safe to call from several threads at once.
pub trait OutputSink: Sync {
    /// Store one image under `name`, returning where it went
    fn write_image(&self, name: &str, image: &PixelBuffer) -> Result<PathBuf>;

    /// Store the sidecar for an image under `name`
    fn write_metadata(
        &self,
        name: &str,
        facts: &SidecarFacts,
        format: MetadataFormat,
    ) -> Result<PathBuf>;
}

/// Writes PNG files and sidecars into a directory
#[derive(Debug, Clone)]
pub struct FileSink {
    output_dir: PathBuf,
}

impl FileSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        FileSink {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl OutputSink for FileSink {
    fn write_image(&self, name: &str, image: &PixelBuffer) -> Result<PathBuf> {
        let path = self.output_dir.join(name);
        let too_large = || Error::ImageTooLarge {
            width: image.width,
            height: image.height,
        };
        let width = u32::try_from(image.width).map_err(|_| too_large())?;
        let height = u32::try_from(image.height).map_err(|_| too_large())?;

        let (bytes, color): (&[u8], ColorType) = match &image.data {
            PixelData::Rgb8(pixels) => (pixels.as_slice(), ColorType::Rgb8),
            PixelData::Rgba8(pixels) => (pixels.as_slice(), ColorType::Rgba8),
            PixelData::Gray8(pixels) => (pixels.as_slice(), ColorType::L8),
            PixelData::Gray16(pixels) => (bytemuck::cast_slice(pixels), ColorType::L16),
            PixelData::GrayAlpha16(pixels) => (bytemuck::cast_slice(pixels), ColorType::La16),
        };

        image::save_buffer(&path, bytes, width, height, color).map_err(|source| Error::Image {
            path: path.clone(),
            source,
        })?;

        debug!(path = %path.display(), width, height, "wrote image");
        Ok(path)
    }

    fn write_metadata(
        &self,
        name: &str,
        facts: &SidecarFacts,
        format: MetadataFormat,
    ) -> Result<PathBuf> {
        let path = self.output_dir.join(name);
        let contents = match format {
            MetadataFormat::Json => {
                let mut json = serde_json::to_string_pretty(facts)?;
                json.push('\n');
                json
            }
            MetadataFormat::Txt | MetadataFormat::None => facts.to_string(),
        };

        std::fs::write(&path, contents).map_err(|source| Error::Io {
            path: path.clone(),
            source,
        })?;

        debug!(path = %path.display(), "wrote metadata");
        Ok(path)
    }
}

/// Last path component of an input, as text
fn basename(input: &str) -> &str {
    Path::new(input)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(input)
}

/// Basename with a trailing `.hgt` / `.HGT` removed
fn output_stem(input: &str) -> &str {
    let name = basename(input);
    name.strip_suffix(".hgt")
        .or_else(|| name.strip_suffix(".HGT"))
        .unwrap_or(name)
}

/// `N47E011.hgt` -> `N47E011.png`; names without the extension get `.png`
/// appended
pub fn image_name(input: &str) -> String {
    format!("{}.png", output_stem(input))
}

/// `N47E011.hgt` -> `N47E011_vegetation_alpine.png`
pub fn vegetation_name(input: &str, biome: Biome) -> String {
    format!("{}_vegetation_{}.png", output_stem(input), biome.name())
}

/// Sidecar name next to the image, `None` when sidecars are off
pub fn metadata_name(input: &str, format: MetadataFormat) -> Option<String> {
    let extension = match format {
        MetadataFormat::Json => "json",
        MetadataFormat::Txt => "txt",
        MetadataFormat::None => return None,
    };
    Some(format!("{}.{}", output_stem(input), extension))
}

/// Latitude and longitude extent of a one-degree tile
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoBounds {
    pub south: f64,
    pub north: f64,
    pub west: f64,
    pub east: f64,
}

impl GeoBounds {
    /// `(latitude, longitude)` of the tile centre
    pub fn center(&self) -> (f64, f64) {
        ((self.south + self.north) / 2.0, (self.west + self.east) / 2.0)
    }
}

/// Read the tile extent from a `[N|S]DD[E|W]DDD` name prefix
///
/// The prefix names the south-west corner, so `S12W077` covers
/// 12S..11S and 77W..76W.
pub fn extract_geo_bounds(filename: &str) -> Option<GeoBounds> {
    let name = basename(filename).as_bytes();
    if name.len() < 7 {
        return None;
    }

    let digits = |field: &[u8]| -> Option<i32> {
        field.iter().try_fold(0i32, |acc, b| {
            b.is_ascii_digit().then(|| acc * 10 + (b - b'0') as i32)
        })
    };

    let lat = digits(&name[1..3])?;
    let lon = digits(&name[4..7])?;
    if lat > 90 || lon > 180 {
        return None;
    }

    let south = match name[0] {
        b'N' => lat,
        b'S' => -lat,
        _ => return None,
    };
    let west = match name[3] {
        b'E' => lon,
        b'W' => -lon,
        _ => return None,
    };

    Some(GeoBounds {
        south: south as f64,
        north: (south + 1) as f64,
        west: west as f64,
        east: (west + 1) as f64,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Dimensions {
    pub width: usize,
    pub height: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ElevationFacts {
    pub min_meters: i32,
    pub max_meters: i32,
    pub range_meters: i32,
    pub original_min: Option<i16>,
    pub original_max: Option<i16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WorldSize {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScalingFacts {
    pub pixel_pitch_meters: f64,
    pub scale_factor: usize,
    pub world_size_meters: WorldSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoCenter {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeographicFacts {
    pub bounds: GeoBounds,
    pub center: GeoCenter,
}

/// Per-image facts needed to rebuild the terrain at its real size
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SidecarFacts {
    pub source_file: String,
    pub png_file: String,
    pub dimensions: Dimensions,
    pub elevation: ElevationFacts,
    pub scaling: ScalingFacts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geographic: Option<GeographicFacts>,
}

impl SidecarFacts {
    /// # Arguments
    /// * `stat` - Pre-scan facts of the source file
    /// * `png_file` - Name of the rendered image
    /// * `width` - Output width in pixels
    /// * `height` - Output height in pixels
    /// * `range` - Elevation window the image was rendered with
    /// * `pixel_pitch_m` - Ground distance between output pixels
    /// * `scale_factor` - Upsampling factor that was applied
    pub fn new(
        stat: &FileStat,
        png_file: &str,
        width: usize,
        height: usize,
        range: ElevationRange,
        pixel_pitch_m: f32,
        scale_factor: usize,
    ) -> Self {
        let pitch = pixel_pitch_m as f64;
        let geographic = extract_geo_bounds(&stat.filename).map(|bounds| {
            let (latitude, longitude) = bounds.center();
            GeographicFacts {
                bounds,
                center: GeoCenter {
                    latitude,
                    longitude,
                },
            }
        });

        SidecarFacts {
            source_file: stat.filename.clone(),
            png_file: png_file.to_string(),
            dimensions: Dimensions { width, height },
            elevation: ElevationFacts {
                min_meters: range.min,
                max_meters: range.max,
                range_meters: range.max - range.min,
                original_min: stat.min_elevation,
                original_max: stat.max_elevation,
            },
            scaling: ScalingFacts {
                pixel_pitch_meters: pitch,
                scale_factor,
                world_size_meters: WorldSize {
                    width: width as f64 * pitch,
                    height: height as f64 * pitch,
                },
            },
            geographic,
        }
    }
}

/// Human readable sidecar
impl fmt::Display for SidecarFacts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let original =
            |value: Option<i16>| value.map_or_else(|| "n/a".to_string(), |v| v.to_string());

        writeln!(f, "HGT2PNG Metadata")?;
        writeln!(f, "================")?;
        writeln!(f)?;
        writeln!(f, "Source File: {}", self.source_file)?;
        writeln!(f, "PNG File: {}", self.png_file)?;
        writeln!(f)?;
        writeln!(f, "Image Dimensions:")?;
        writeln!(f, "  Width:  {} pixels", self.dimensions.width)?;
        writeln!(f, "  Height: {} pixels", self.dimensions.height)?;
        writeln!(f)?;
        writeln!(f, "Elevation Data:")?;
        writeln!(
            f,
            "  Effective Range: {} - {} meters",
            self.elevation.min_meters, self.elevation.max_meters
        )?;
        writeln!(
            f,
            "  Original Range:  {} - {} meters",
            original(self.elevation.original_min),
            original(self.elevation.original_max)
        )?;
        writeln!(f, "  Total Range:     {} meters", self.elevation.range_meters)?;
        writeln!(f)?;
        writeln!(f, "Scaling:")?;
        writeln!(f, "  Pixel Pitch: {:.6} meters/pixel", self.scaling.pixel_pitch_meters)?;
        writeln!(
            f,
            "  World Size:  {:.2} x {:.2} meters",
            self.scaling.world_size_meters.width, self.scaling.world_size_meters.height
        )?;
        writeln!(f, "  Scale Factor: {}", self.scaling.scale_factor)?;

        if let Some(geo) = &self.geographic {
            writeln!(f)?;
            writeln!(f, "Geographic Coordinates:")?;
            writeln!(
                f,
                "  Bounds: lat {:.6} to {:.6}, lon {:.6} to {:.6}",
                geo.bounds.south, geo.bounds.north, geo.bounds.west, geo.bounds.east
            )?;
            writeln!(
                f,
                "  Center: lat {:.6}, lon {:.6}",
                geo.center.latitude, geo.center.longitude
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;
    use crate::raster::RasterType;

    fn stat(filename: &str) -> FileStat {
        FileStat {
            filename: filename.to_string(),
            raster_type: RasterType::Srtm1,
            width: 1201,
            height: 1201,
            min_elevation: Some(412),
            max_elevation: Some(2950),
            nodata_count: 3,
        }
    }

    #[test]
    fn test_output_names() {
        assert_eq!(image_name("tiles/N47E011.hgt"), "N47E011.png");
        assert_eq!(image_name("N47E011.HGT"), "N47E011.png");
        assert_eq!(image_name("area_100x100.bin"), "area_100x100.bin.png");
        assert_eq!(
            vegetation_name("/x/N47E011.hgt", Biome::Alpine),
            "N47E011_vegetation_alpine.png"
        );
        assert_eq!(
            metadata_name("N47E011.hgt", MetadataFormat::Json).as_deref(),
            Some("N47E011.json")
        );
        assert_eq!(
            metadata_name("N47E011.hgt", MetadataFormat::Txt).as_deref(),
            Some("N47E011.txt")
        );
        assert_eq!(metadata_name("N47E011.hgt", MetadataFormat::None), None);
    }

    #[test]
    fn test_geo_bounds_from_name() {
        let bounds = extract_geo_bounds("/data/N49E004.hgt").unwrap();
        let expected = GeoBounds {
            south: 49.0,
            north: 50.0,
            west: 4.0,
            east: 5.0,
        };
        assert_eq!(bounds, expected);
        assert_eq!(bounds.center(), (49.5, 4.5));

        let southern = extract_geo_bounds("S12W077.hgt").unwrap();
        let expected = GeoBounds {
            south: -12.0,
            north: -11.0,
            west: -77.0,
            east: -76.0,
        };
        assert_eq!(southern, expected);

        assert_eq!(extract_geo_bounds("dgm1_0640x0480.hgt"), None);
        assert_eq!(extract_geo_bounds("N4xE004.hgt"), None);
        assert_eq!(extract_geo_bounds("N95E004.hgt"), None);
        assert_eq!(extract_geo_bounds("N47"), None);
    }

    #[test]
    fn test_sidecar_facts() {
        let range = ElevationRange {
            min: 400,
            max: 3000,
        };
        let facts =
            SidecarFacts::new(&stat("N47E011.hgt"), "N47E011.png", 3603, 3603, range, 10.0, 3);

        assert_eq!(facts.elevation.range_meters, 2600);
        assert_eq!(facts.elevation.original_min, Some(412));
        assert_eq!(facts.scaling.world_size_meters.width, 36030.0);
        let geo = facts.geographic.unwrap();
        assert_eq!((geo.center.latitude, geo.center.longitude), (47.5, 11.5));

        let no_geo = SidecarFacts::new(&stat("area_4x4.hgt"), "area_4x4.png", 4, 4, range, 30.0, 1);
        assert!(no_geo.geographic.is_none());
    }

    #[test]
    fn test_file_sink_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path());

        let image = PixelBuffer {
            width: 3,
            height: 2,
            data: PixelData::GrayAlpha16(vec![
                0, 0, 1000, 65535, 2000, 65535, 3000, 65535, 4000, 65535, 65535, 65535,
            ]),
        };
        let path = sink.write_image("tile.png", &image).unwrap();
        assert_eq!(path, dir.path().join("tile.png"));

        let decoded = image::open(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (3, 2));
        assert_eq!(decoded.color(), ColorType::La16);
        let pixels = decoded.into_luma_alpha16();
        assert_eq!(pixels.get_pixel(1, 0).0, [1000, 65535]);
        assert_eq!(pixels.get_pixel(0, 0).0, [0, 0]);
    }

    #[test]
    fn test_file_sink_writes_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path());
        let range = ElevationRange { min: 0, max: 3000 };
        let facts =
            SidecarFacts::new(&stat("N47E011.hgt"), "N47E011.png", 1201, 1201, range, 30.0, 1);

        let json_path = sink.write_metadata("N47E011.json", &facts, MetadataFormat::Json).unwrap();
        let contents = std::fs::read_to_string(json_path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(json["elevation"]["max_meters"], 3000);
        assert_eq!(json["scaling"]["pixel_pitch_meters"], 30.0);
        assert_eq!(json["geographic"]["bounds"]["north"], 48.0);

        let txt_path = sink.write_metadata("N47E011.txt", &facts, MetadataFormat::Txt).unwrap();
        let txt = std::fs::read_to_string(txt_path).unwrap();
        assert!(txt.contains("Effective Range: 0 - 3000 meters"));
        assert!(txt.contains("World Size:  36030.00 x 36030.00 meters"));
    }

    #[test]
    fn test_file_sink_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path().join("does/not/exist"));
        let image = PixelBuffer {
            width: 1,
            height: 1,
            data: PixelData::Gray8(vec![7]),
        };
        assert!(matches!(sink.write_image("x.png", &image), Err(Error::Image { .. })));
    }
}
