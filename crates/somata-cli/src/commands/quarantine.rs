use anyhow::Result;
use clap::{Args, Subcommand};

use super::OutputArgs;

#[derive(Subcommand)]
pub enum QuarantineAction {
    /// List quarantined overrides
    List,
    /// Re-apply the most recent quarantined batch
    Restore,
    /// Discard every quarantined override
    Dismiss,
}

#[derive(Args)]
pub struct QuarantineArgs {
    #[command(flatten)]
    pub output: OutputArgs,

    /// Plane index
    #[arg(long, default_value = "0")]
    pub plane: usize,

    #[command(subcommand)]
    pub action: QuarantineAction,
}

pub fn run(args: &QuarantineArgs) -> Result<()> {
    let mut state = args.output.open()?;
    let plane = args.plane;

    match args.action {
        QuarantineAction::List => {
            let batches = state.quarantined(plane)?;
            if batches.is_empty() {
                println!("Plane {plane}: nothing quarantined.");
            }
            for batch in batches {
                println!(
                    "{}  {} -> {} candidates, {} override(s)",
                    batch.quarantined_at.to_rfc3339(),
                    batch.candidate_count,
                    batch.new_candidate_count,
                    batch.overrides.len()
                );
                for (index, o) in &batch.overrides {
                    println!(
                        "    {:>4}  {}",
                        index,
                        if o.is_cell { "cell" } else { "not a cell" }
                    );
                }
                let missing = batch.out_of_range();
                if !missing.is_empty() {
                    println!("    no longer present: {missing:?}");
                }
            }
        }
        QuarantineAction::Restore => {
            let restored = state.restore_quarantine(plane)?;
            println!("Plane {plane}: restored {restored} override(s).");
        }
        QuarantineAction::Dismiss => {
            let dropped = state.dismiss_quarantine(plane)?;
            println!("Plane {plane}: dismissed {dropped} override(s).");
        }
    }
    Ok(())
}
