/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Number of histogram bins for Otsu's thresholding.
pub const OTSU_HISTOGRAM_BINS: usize = 256;

/// Name of the folder created under the destination directory.
pub const DEFAULT_SAVE_FOLDER: &str = "somata";

/// Registered volume file name inside a plane directory.
pub const VOLUME_FILE_NAME: &str = "data.bin";

/// Candidates (detection + classification) file name inside a plane directory.
pub const CANDIDATES_FILE_NAME: &str = "candidates.json";

/// Operator curation file name inside a plane directory.
pub const CURATION_FILE_NAME: &str = "curation.json";

/// Advisory lock file name inside a plane directory.
pub const LOCK_FILE_NAME: &str = ".somata.lock";

/// On-disk format version of the registered volume. Bumping it invalidates
/// every cached volume.
pub const VOLUME_FORMAT_VERSION: u32 = 1;

/// Magic bytes at the start of a registered volume file.
pub const VOLUME_MAGIC: &[u8; 8] = b"SOMATAv\0";

/// Scale between normalized f32 pixels and the stored i16 samples.
pub const VOLUME_SAMPLE_SCALE: f32 = i16::MAX as f32;

/// Default number of frames processed per registration batch.
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Default number of leading frames averaged into the initial reference.
pub const DEFAULT_REFERENCE_FRAMES: usize = 20;

/// Default number of align-and-reaverage passes when refining the reference.
pub const DEFAULT_REFERENCE_ITERATIONS: usize = 2;

/// Default sanity bound on a rigid shift as a fraction of the frame dimension.
pub const DEFAULT_MAX_SHIFT_FRACTION: f64 = 0.1;

/// Default block size (pixels) for non-rigid registration.
pub const DEFAULT_BLOCK_SIZE: usize = 64;

/// Default bound (pixels) on a non-rigid block's residual shift.
pub const DEFAULT_MAX_BLOCK_SHIFT: f64 = 5.0;

/// Default cell probability threshold.
pub const DEFAULT_CELL_PROBABILITY_THRESHOLD: f32 = 0.5;

/// Default Gaussian blur sigma applied before segmenting somata.
pub const DEFAULT_SOMA_BLUR_SIGMA: f32 = 1.0;

/// Default minimum soma area in pixels.
pub const DEFAULT_SOMA_MIN_AREA: usize = 12;

/// Default maximum soma area in pixels.
pub const DEFAULT_SOMA_MAX_AREA: usize = 2_000;

/// Default minimum neurite (dendrite/axon) area in pixels.
pub const DEFAULT_NEURITE_MIN_AREA: usize = 4;

/// Default sigma multiplier for MeanPlusSigma thresholding.
pub const DEFAULT_SIGMA_MULTIPLIER: f32 = 2.0;
