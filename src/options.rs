use std::path::{Path, PathBuf};

use crate::detail::{DetailOptions, MAX_SCALE_FACTOR};
use crate::error::{Error, Result};
use crate::tone::{ElevationRange, PixelFormat, ToneSettings};

pub use crate::tone::CurveType;
pub use crate::vegetation::Biome;

pub const MAX_THREADS: usize = 16;
pub const MAX_DETAIL_INTENSITY: f32 = 100.0;
pub const GAMMA_RANGE: (f32, f32) = (0.1, 10.0);

/// Sidecar written next to every image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum MetadataFormat {
    #[default]
    None,
    Json,
    Txt,
}

/// Everything that controls a conversion run
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramOptions {
    pub scale_factor: usize,
    /// Detail amplitude in meters
    pub detail_intensity: f32,
    pub noise_seed: i32,
    pub enable_detail: bool,
    pub threads: usize,
    pub quiet: bool,
    pub sixteen_bit: bool,
    pub alpha_nodata: bool,
    pub gamma: f32,
    pub curve: CurveType,
    pub min_height: Option<i32>,
    pub max_height: Option<i32>,
    pub metadata: MetadataFormat,
    pub vegetation_mask: bool,
    pub biome: Biome,
    pub output_dir: PathBuf,
}

impl Default for ProgramOptions {
    fn default() -> Self {
        let detail = DetailOptions::default();
        ProgramOptions {
            scale_factor: detail.scale_factor,
            detail_intensity: detail.intensity,
            noise_seed: detail.seed,
            enable_detail: true,
            threads: 4,
            quiet: false,
            sixteen_bit: false,
            alpha_nodata: false,
            gamma: 1.0,
            curve: CurveType::Linear,
            min_height: None,
            max_height: None,
            metadata: MetadataFormat::None,
            vegetation_mask: false,
            biome: Biome::Alpine,
            output_dir: PathBuf::from("."),
        }
    }
}

impl ProgramOptions {
    /// Check every numeric option against its allowed range
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_SCALE_FACTOR).contains(&self.scale_factor) {
            return Err(Error::Config(format!(
                "scale factor must be between 1 and {}, got {}",
                MAX_SCALE_FACTOR, self.scale_factor
            )));
        }
        if !(0.0..=MAX_DETAIL_INTENSITY).contains(&self.detail_intensity) {
            return Err(Error::Config(format!(
                "detail intensity must be between 0 and {} meters, got {}",
                MAX_DETAIL_INTENSITY, self.detail_intensity
            )));
        }
        if !(1..=MAX_THREADS).contains(&self.threads) {
            return Err(Error::Config(format!(
                "thread count must be between 1 and {}, got {}",
                MAX_THREADS, self.threads
            )));
        }
        let (min_gamma, max_gamma) = GAMMA_RANGE;
        if !(min_gamma..=max_gamma).contains(&self.gamma) {
            return Err(Error::Config(format!(
                "gamma must be between {} and {}, got {}",
                min_gamma, max_gamma, self.gamma
            )));
        }
        Ok(())
    }

    pub fn pixel_format(&self) -> PixelFormat {
        PixelFormat::from_flags(self.sixteen_bit, self.alpha_nodata)
    }

    pub fn detail_options(&self) -> DetailOptions {
        DetailOptions {
            scale_factor: self.scale_factor,
            intensity: self.detail_intensity,
            seed: self.noise_seed,
        }
    }

    /// Scale factor that actually applies to the output
    pub fn effective_scale(&self) -> usize {
        if self.enable_detail {
            self.scale_factor
        } else {
            1
        }
    }

    /// Tone settings for a batch whose valid elevations span `auto`
    pub fn tone_settings(&self, auto: Option<(i16, i16)>) -> ToneSettings {
        ToneSettings {
            range: ElevationRange::effective(auto, self.min_height, self.max_height),
            curve: self.curve,
            gamma: self.gamma,
            format: self.pixel_format(),
        }
    }
}

/// Whether an input argument names a raster rather than a file list
pub fn is_raster_name(name: &str) -> bool {
    name.contains("hgt") || name.contains("HGT")
}

/// Parse a file list: one path per line, blank lines skipped
pub fn parse_file_list(contents: &str) -> Vec<PathBuf> {
    contents
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Expand command line inputs into raster paths, reading list files
pub fn expand_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if is_raster_name(&input.to_string_lossy()) {
            files.push(input.clone());
            continue;
        }
        files.extend(read_file_list(input)?);
    }
    Ok(files)
}

fn read_file_list(path: &Path) -> Result<Vec<PathBuf>> {
    let contents = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_file_list(&contents))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let options = ProgramOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.scale_factor, 3);
        assert_eq!(options.detail_intensity, 15.0);
        assert_eq!(options.noise_seed, 12345);
        assert_eq!(options.threads, 4);
        assert_eq!(options.pixel_format(), PixelFormat::Rgb8);
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let cases = [
            ProgramOptions {
                scale_factor: 0,
                ..Default::default()
            },
            ProgramOptions {
                scale_factor: 11,
                ..Default::default()
            },
            ProgramOptions {
                detail_intensity: -1.0,
                ..Default::default()
            },
            ProgramOptions {
                detail_intensity: 100.5,
                ..Default::default()
            },
            ProgramOptions {
                threads: 0,
                ..Default::default()
            },
            ProgramOptions {
                threads: 17,
                ..Default::default()
            },
            ProgramOptions {
                gamma: 0.05,
                ..Default::default()
            },
            ProgramOptions {
                gamma: 12.0,
                ..Default::default()
            },
            ProgramOptions {
                gamma: f32::NAN,
                ..Default::default()
            },
        ];
        for options in cases {
            assert!(
                matches!(options.validate(), Err(Error::Config(_))),
                "{:?} should be rejected",
                options
            );
        }
    }

    #[test]
    fn test_effective_scale() {
        let options = ProgramOptions {
            scale_factor: 4,
            ..Default::default()
        };
        assert_eq!(options.effective_scale(), 4);
        let disabled = ProgramOptions {
            enable_detail: false,
            ..options
        };
        assert_eq!(disabled.effective_scale(), 1);
    }

    #[test]
    fn test_tone_settings_use_overrides() {
        let options = ProgramOptions {
            min_height: Some(0),
            max_height: Some(3000),
            alpha_nodata: true,
            ..Default::default()
        };
        let settings = options.tone_settings(Some((120, 900)));
        assert_eq!(settings.range, ElevationRange { min: 0, max: 3000 });
        assert_eq!(settings.format, PixelFormat::Rgba8);
    }

    #[test]
    fn test_raster_names() {
        assert!(is_raster_name("N47E011.hgt"));
        assert!(is_raster_name("/data/S12W077.HGT"));
        assert!(!is_raster_name("tiles.txt"));
    }

    #[test]
    fn test_parse_file_list() {
        let list = "N47E011.hgt\r\n\r\n  \nsub/N48E011.hgt\n";
        assert_eq!(
            parse_file_list(list),
            vec![PathBuf::from("N47E011.hgt"), PathBuf::from("sub/N48E011.hgt")]
        );
    }

    #[test]
    fn test_expand_inputs_reads_lists() {
        let dir = tempfile::tempdir().unwrap();
        let list_path = dir.path().join("tiles.lst");
        let mut list = std::fs::File::create(&list_path).unwrap();
        writeln!(list, "a.hgt").unwrap();
        writeln!(list, "b.hgt").unwrap();

        let inputs = vec![PathBuf::from("first.hgt"), list_path];
        let files = expand_inputs(&inputs).unwrap();
        assert_eq!(
            files,
            vec![PathBuf::from("first.hgt"), PathBuf::from("a.hgt"), PathBuf::from("b.hgt")]
        );

        let missing = expand_inputs(&[dir.path().join("missing.lst")]);
        assert!(matches!(missing, Err(Error::Io { .. })));
    }
}
