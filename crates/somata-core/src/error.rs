use thiserror::Error;

#[derive(Error, Debug)]
pub enum SomataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image format error: {0}")]
    ImageError(#[from] image::ImageError),

    /// Raw frames are missing or unreadable. Fatal for the plane.
    #[error("Cannot read source frames: {0}")]
    SourceRead(String),

    /// An existing artifact was found but cannot be trusted. Treated as a cache miss.
    #[error("Cached artifact rejected: {0}")]
    CacheValidation(String),

    /// A frame's shift estimate exceeded the sanity bound and was clamped.
    #[error("Frame {frame} shift ({dx:.2}, {dy:.2}) exceeds bound {bound:.2}")]
    AlignmentDegenerate {
        frame: usize,
        dx: f64,
        dy: f64,
        bound: f64,
    },

    /// The segmentation model failed or returned unusable output. Fatal for the plane.
    #[error("Segmentation model '{model}' failed: {reason}")]
    ModelInvocation { model: String, reason: String },

    /// Stored curation overrides no longer match the candidate index space.
    #[error("Curation overrides for plane {plane} are stale ({stale} quarantined)")]
    CurationConflict { plane: usize, stale: usize },

    #[error("A run is already in progress for plane {plane} (lock: {lock})")]
    RunInProgress { plane: usize, lock: String },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Invalid image dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Frame index {index} out of range (total: {total})")]
    FrameIndexOutOfRange { index: usize, total: usize },

    #[error("Candidate index {index} out of range for plane {plane} ({count} candidates)")]
    IndexOutOfRange {
        plane: usize,
        index: usize,
        count: usize,
    },

    #[error("Plane {0} has no processed results")]
    UnknownPlane(usize),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Empty frame sequence")]
    EmptySequence,

    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

pub type Result<T> = std::result::Result<T, SomataError>;
