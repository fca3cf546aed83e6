use anyhow::Result;
use clap::{Args, ValueEnum};

use super::OutputArgs;

#[derive(Clone, Copy, ValueEnum)]
pub enum LabelArg {
    Cell,
    NotCell,
    /// Remove the override and fall back to the classifier
    Clear,
}

#[derive(Args)]
pub struct CurateArgs {
    #[command(flatten)]
    pub output: OutputArgs,

    /// Plane index
    #[arg(long, default_value = "0")]
    pub plane: usize,

    /// Candidate index within the plane
    pub index: usize,

    /// New label
    #[arg(value_enum)]
    pub label: LabelArg,
}

pub fn run(args: &CurateArgs) -> Result<()> {
    let mut state = args.output.open()?;
    let (plane, index) = (args.plane, args.index);

    match args.label {
        LabelArg::Cell | LabelArg::NotCell => {
            state.set_override(plane, index, matches!(args.label, LabelArg::Cell))?;
        }
        LabelArg::Clear => {
            if !state.clear_override(plane, index)? {
                println!("Plane {plane} candidate {index} had no override.");
            }
        }
    }

    let is_cell = state.get_effective_label(plane, index)?;
    println!(
        "Plane {plane} candidate {index}: {}",
        if is_cell { "cell" } else { "not a cell" }
    );
    Ok(())
}
