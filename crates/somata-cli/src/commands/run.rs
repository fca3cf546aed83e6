use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use somata_core::pipeline::{EntryPoint, Orchestrator, RunRequest};
use somata_core::{PipelineConfig, Session};

use crate::progress::BarReporter;
use crate::summary::{print_run_header, print_session_report};

#[derive(Clone, Copy, ValueEnum)]
pub enum EntryArg {
    /// Register (reusing a valid cached volume), detect, classify
    Full,
    /// Register even when a valid volume exists
    Register,
    /// Re-detect from the registered volume
    Detect,
    /// Reclassify stored candidates
    Classify,
}

impl From<EntryArg> for EntryPoint {
    fn from(arg: EntryArg) -> Self {
        match arg {
            EntryArg::Full => EntryPoint::Full,
            EntryArg::Register => EntryPoint::ForceRegistration,
            EntryArg::Detect => EntryPoint::Detection,
            EntryArg::Classify => EntryPoint::Classification,
        }
    }
}

#[derive(Args)]
pub struct RunArgs {
    /// SER file or directory of TIFF frames
    pub path: PathBuf,

    /// Pipeline config file (TOML); flags below override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of interleaved planes
    #[arg(long)]
    pub nplanes: Option<usize>,

    /// Number of interleaved channels
    #[arg(long)]
    pub nchannels: Option<usize>,

    /// 1-based functional channel
    #[arg(long)]
    pub functional_chan: Option<usize>,

    /// Cell probability threshold (0-1)
    #[arg(long)]
    pub threshold: Option<f32>,

    /// Use the neurite model instead of the soma model
    #[arg(long)]
    pub dendrites: bool,

    /// Also search immediate subdirectories for frames
    #[arg(long)]
    pub look_one_level_down: bool,

    /// Destination root (defaults to the source directory)
    #[arg(long)]
    pub save_path: Option<PathBuf>,

    /// Planes processed concurrently (0 = all cores)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Stage to enter each plane at
    #[arg(long, value_enum, default_value = "full")]
    pub entry: EntryArg,

    /// Comma-separated plane indices (all planes by default)
    #[arg(long, value_delimiter = ',')]
    pub planes: Option<Vec<usize>>,
}

pub fn run(args: &RunArgs) -> Result<()> {
    let config = build_config(args)?;
    config.validate().context("Invalid pipeline config")?;

    let session = Session::open(&args.path, &config)
        .with_context(|| format!("Failed to open session {}", args.path.display()))?;
    print_run_header(&session, &config);

    let mut request = RunRequest::new(args.entry.into());
    if let Some(ref planes) = args.planes {
        request = request.with_planes(planes.clone());
    }

    let reporter = Arc::new(BarReporter::new()?);
    let report = Orchestrator::new(&config)
        .with_reporter(reporter.clone())
        .run(&session, &config, &request)?;
    reporter.finish();

    print_session_report(&report);

    let failed = report.failed().count();
    if failed > 0 {
        bail!("{failed} plane(s) failed");
    }
    Ok(())
}

fn build_config(args: &RunArgs) -> Result<PipelineConfig> {
    let mut config: PipelineConfig = if let Some(ref config_path) = args.config {
        let contents = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config {}", config_path.display()))?;
        toml::from_str(&contents).context("Invalid pipeline config")?
    } else {
        PipelineConfig::default()
    };

    if let Some(n) = args.nplanes {
        config.nplanes = n;
    }
    if let Some(n) = args.nchannels {
        config.nchannels = n;
    }
    if let Some(c) = args.functional_chan {
        config.functional_chan = c;
    }
    if let Some(t) = args.threshold {
        config.cell_probability_threshold = t;
    }
    if let Some(w) = args.workers {
        config.workers = w;
    }
    if args.save_path.is_some() {
        config.save_path = args.save_path.clone();
    }
    config.detect_dendrites_axons |= args.dendrites;
    config.look_one_level_down |= args.look_one_level_down;
    Ok(config)
}
