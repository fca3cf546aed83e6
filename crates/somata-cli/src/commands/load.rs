use anyhow::Result;
use clap::Args;

use super::OutputArgs;

#[derive(Args)]
pub struct LoadArgs {
    #[command(flatten)]
    pub output: OutputArgs,

    /// Also list every candidate of each plane
    #[arg(long)]
    pub candidates: bool,
}

pub fn run(args: &LoadArgs) -> Result<()> {
    let state = args.output.open()?;
    println!("Results:     {}", state.layout().root().display());

    let planes: Vec<usize> = state.plane_indices().collect();
    if planes.is_empty() {
        println!("No processed planes.");
        return Ok(());
    }

    for p in planes {
        let plane = state.plane(p)?;
        let labels = plane.effective_labels();
        let cells = labels.iter().filter(|&&l| l).count();
        println!();
        println!("Plane {p}");
        println!("  Model:        {}", plane.results.detection.model);
        println!("  Candidates:   {}", plane.results.candidate_count());
        println!("  Cells:        {cells}");
        println!("  Threshold:    {:.2}", plane.results.threshold);
        println!("  Overrides:    {}", plane.curation.overrides.len());
        if plane.curation.quarantined_count() > 0 {
            println!("  Quarantined:  {}", plane.curation.quarantined_count());
        }

        if args.candidates {
            for (c, &is_cell) in plane.results.detection.candidates.iter().zip(&labels) {
                let marker = if plane.curation.overrides.contains_key(&c.index) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "    {:>4}{marker} ({:>6.1}, {:>6.1}) npix {:>5}  p={:.3}  {}",
                    c.index,
                    c.centroid.0,
                    c.centroid.1,
                    c.npix,
                    plane.results.classification.probabilities[c.index],
                    if is_cell { "cell" } else { "-" }
                );
            }
        }
    }

    Ok(())
}
