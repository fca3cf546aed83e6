pub mod nonrigid;
pub mod phase_correlation;
pub mod subpixel;

pub use phase_correlation::{
    bilinear_sample, compute_offset_array, shift_array, Correlation, PhaseCorrelator,
};
