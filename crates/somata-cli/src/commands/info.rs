use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use somata_core::io::source::{open_source, Interleave};

#[derive(Args)]
pub struct InfoArgs {
    /// SER file or directory of TIFF frames
    pub path: PathBuf,

    /// Also search immediate subdirectories for frames
    #[arg(long)]
    pub look_one_level_down: bool,

    /// Number of interleaved planes, to show per-plane frame counts
    #[arg(long, default_value = "1")]
    pub nplanes: usize,

    /// Number of interleaved channels
    #[arg(long, default_value = "1")]
    pub nchannels: usize,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    let source = open_source(&args.path, args.look_one_level_down)
        .with_context(|| format!("Failed to open {}", args.path.display()))?;
    let info = source.info();

    println!("Source:      {}", args.path.display());
    println!("Format:      {}", info.format);
    println!("Frames:      {}", info.total_frames);
    println!("Dimensions:  {}x{}", info.width, info.height);
    println!("Bit depth:   {}", info.bit_depth);

    let bytes_per_sample = (info.bit_depth as usize).div_ceil(8);
    let total_mb = (info.width as usize * info.height as usize * bytes_per_sample * info.total_frames)
        as f64
        / (1024.0 * 1024.0);
    println!("Data size:   {:.1} MB", total_mb);

    if args.nplanes > 1 || args.nchannels > 1 {
        let interleave = Interleave {
            nplanes: args.nplanes,
            nchannels: args.nchannels,
            functional_chan: 1,
        };
        interleave.validate()?;
        let segments = source.segments();
        for plane in 0..args.nplanes {
            println!(
                "Plane {:<6} {} frames",
                plane,
                interleave.plane_indices(plane, &segments).len()
            );
        }
    }

    Ok(())
}
