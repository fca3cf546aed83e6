use std::path::Path;

use crate::curation::CurationState;
use crate::error::Result;
use crate::io::OutputLayout;

/// Load a processed session's candidates and curation without running any
/// stage. `dest` is the destination a run wrote to.
pub fn load_session(dest: &Path, save_folder: &str) -> Result<CurationState> {
    CurationState::open(OutputLayout::new(dest, save_folder))
}
