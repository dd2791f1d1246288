use std::path::PathBuf;

/// Everything that can go wrong while converting a raster.
///
/// `Config` is fatal before processing starts. `Threading` and
/// `WorkerPanic` abort the rest of a batch. Every other variant fails just
/// the file it was raised for.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("can't read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{filename} has an unknown HGT type ({actual} bytes, no SRTM size or dimensions)")]
    UnknownRasterType { filename: String, actual: usize },

    #[error("{filename}: expected {expected} bytes for {width}x{height}, got {actual}")]
    SizeMismatch {
        filename: String,
        width: usize,
        height: usize,
        expected: usize,
        actual: usize,
    },

    #[error("{what} allocation overflow at {width}x{height} x {element_size} bytes")]
    AllocationOverflow {
        what: &'static str,
        width: usize,
        height: usize,
        element_size: usize,
    },

    #[error("{width}x{height} scaled by {scale} does not fit in memory")]
    ScaleOverflow {
        width: usize,
        height: usize,
        scale: usize,
    },

    #[error("{filename} has no samples")]
    EmptyRaster { filename: String },

    #[error("can't allocate {bytes} bytes for {what}")]
    AllocationFailed { what: &'static str, bytes: usize },

    #[error("invalid option: {0}")]
    Config(String),

    #[error("can't spawn worker thread: {0}")]
    Threading(#[source] std::io::Error),

    #[error("worker for {filename} panicked")]
    WorkerPanic { filename: String },

    #[error("can't write image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("{width}x{height} is too large for an image file")]
    ImageTooLarge { width: usize, height: usize },

    #[error("can't encode metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

impl Error {
    /// Errors that stop the coordinator from launching further waves.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Threading(_) | Error::WorkerPanic { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
