use anyhow::Result;
use clap::Args;
use somata_core::io::PlaneLock;

use super::OutputArgs;

#[derive(Args)]
pub struct UnlockArgs {
    #[command(flatten)]
    pub output: OutputArgs,

    /// Plane to unlock (all planes by default)
    #[arg(long)]
    pub plane: Option<usize>,
}

/// Only run this when no pipeline is running on the session.
pub fn run(args: &UnlockArgs) -> Result<()> {
    let layout = args.output.layout();
    let planes = match args.plane {
        Some(p) => vec![p],
        None => layout.discover_planes()?,
    };

    let mut released = 0;
    for p in planes {
        if PlaneLock::force_release(&layout.lock_path(p))? {
            println!("Released lock on plane {p}");
            released += 1;
        }
    }
    if released == 0 {
        println!("No locks held.");
    }
    Ok(())
}
