use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use somata_core::pipeline::{PipelineStage, PlaneState, ProgressReporter};

/// One progress bar per plane, driven by pipeline callbacks.
pub struct BarReporter {
    multi: MultiProgress,
    style: ProgressStyle,
    spinner: ProgressStyle,
    bars: Mutex<HashMap<usize, ProgressBar>>,
}

impl BarReporter {
    pub fn new() -> Result<Self> {
        Ok(Self {
            multi: MultiProgress::new(),
            style: ProgressStyle::default_bar()
                .template("plane {prefix:>2} {msg:16} [{bar:40}] {pos}/{len}")?
                .progress_chars("=> "),
            spinner: ProgressStyle::default_spinner().template("plane {prefix:>2} {msg:16} {spinner}")?,
            bars: Mutex::new(HashMap::new()),
        })
    }

    fn with_bar(&self, plane: usize, f: impl FnOnce(&ProgressBar)) {
        let Ok(mut bars) = self.bars.lock() else {
            return;
        };
        let bar = bars.entry(plane).or_insert_with(|| {
            let bar = self.multi.add(ProgressBar::new(0));
            bar.set_style(self.spinner.clone());
            bar.set_prefix(plane.to_string());
            bar
        });
        f(bar);
    }

    /// Leave every bar on screen in its final state.
    pub fn finish(&self) {
        if let Ok(bars) = self.bars.lock() {
            for bar in bars.values() {
                bar.finish();
            }
        }
    }
}

impl ProgressReporter for BarReporter {
    fn plane_state(&self, plane: usize, state: &PlaneState) {
        self.with_bar(plane, |bar| match state {
            PlaneState::Failed { stage, .. } => {
                bar.set_style(self.spinner.clone());
                bar.abandon_with_message(format!("failed ({stage})"));
            }
            PlaneState::Curated => {
                bar.set_style(self.spinner.clone());
                bar.finish_with_message("done");
            }
            _ => {}
        });
    }

    fn begin_stage(&self, plane: usize, stage: PipelineStage, total_items: Option<usize>) {
        self.with_bar(plane, |bar| {
            bar.reset();
            match total_items {
                Some(total) => {
                    bar.set_style(self.style.clone());
                    bar.set_length(total as u64);
                }
                None => bar.set_style(self.spinner.clone()),
            }
            bar.set_message(stage.to_string());
        });
    }

    fn advance(&self, plane: usize, items_done: usize) {
        self.with_bar(plane, |bar| bar.inc(items_done as u64));
    }

    fn finish_stage(&self, plane: usize) {
        self.with_bar(plane, |bar| {
            if let Some(len) = bar.length() {
                bar.set_position(len);
            }
        });
    }
}
