pub mod config;
pub mod curate;
pub mod info;
pub mod load;
pub mod quarantine;
pub mod run;
pub mod unlock;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use somata_core::consts::DEFAULT_SAVE_FOLDER;
use somata_core::curation::CurationState;
use somata_core::io::OutputLayout;
use somata_core::load_session;

/// Locates a session's output tree.
#[derive(Args)]
pub struct OutputArgs {
    /// Destination root the run wrote to (the source directory by default)
    pub dest: PathBuf,

    /// Output folder name under the destination
    #[arg(long, default_value = DEFAULT_SAVE_FOLDER)]
    pub save_folder: String,
}

impl OutputArgs {
    pub fn layout(&self) -> OutputLayout {
        OutputLayout::new(&self.dest, &self.save_folder)
    }

    pub fn open(&self) -> Result<CurationState> {
        load_session(&self.dest, &self.save_folder)
            .with_context(|| format!("Failed to load results under {}", self.dest.display()))
    }
}
