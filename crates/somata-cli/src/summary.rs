use console::Style;
use somata_core::pipeline::{PlaneReport, PlaneState, RegistrationStatus, SessionReport};
use somata_core::registration::RegistrationMode;
use somata_core::{PipelineConfig, Session};

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    ok: Style,
    warn: Style,
    failed: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            ok: Style::new().green().bold(),
            warn: Style::new().yellow(),
            failed: Style::new().red().bold(),
            path: Style::new().underlined(),
        }
    }
}

pub fn print_run_header(session: &Session, config: &PipelineConfig) {
    let s = Styles::new();
    let info = session.source_info();

    println!();
    println!("  {}", s.title.apply_to("Somata Pipeline"));
    println!("  {}", s.title.apply_to("\u{2550}".repeat(15)));
    println!();

    println!(
        "  {:<14}{}",
        s.label.apply_to("Source"),
        s.path.apply_to(session.source_dir().display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Output"),
        s.path.apply_to(session.dest_dir().join(&config.save_folder).display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Frames"),
        s.value.apply_to(format!(
            "{} ({}x{}, {} bit, {})",
            info.total_frames, info.width, info.height, info.bit_depth, info.format
        ))
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Planes"),
        s.value.apply_to(format!(
            "{} x {} channel(s), functional {}",
            config.nplanes, config.nchannels, config.functional_chan
        ))
    );
    println!();

    println!("  {}", s.header.apply_to("Registration"));
    let mode = match config.registration.mode {
        RegistrationMode::Rigid => "rigid".to_string(),
        RegistrationMode::NonRigid { block_size, .. } => format!("nonrigid ({block_size}px blocks)"),
    };
    println!("    {:<12}{}", s.label.apply_to("Mode"), s.method.apply_to(mode));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Max shift"),
        s.value.apply_to(format!("{:.0}%", config.registration.max_shift_fraction * 100.0))
    );
    println!();

    println!("  {}", s.header.apply_to("Detection"));
    let model = if config.detect_dendrites_axons {
        "neurite"
    } else {
        "soma"
    };
    println!("    {:<12}{}", s.label.apply_to("Model"), s.method.apply_to(model));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Threshold"),
        s.value.apply_to(format!("{:.2}", config.cell_probability_threshold))
    );
    println!();
}

pub fn print_session_report(report: &SessionReport) {
    let s = Styles::new();

    println!();
    println!("  {}", s.header.apply_to("Results"));
    for plane in report.planes.values() {
        print_plane_line(&s, plane);
    }
    println!();
}

fn print_plane_line(s: &Styles, plane: &PlaneReport) {
    let label = format!("plane {}", plane.plane);
    if let PlaneState::Failed { stage, cause } = &plane.state {
        println!(
            "    {:<12}{} {}",
            s.label.apply_to(label),
            s.failed.apply_to(format!("failed in {stage}:")),
            cause
        );
        return;
    }

    let registration = match &plane.registration {
        RegistrationStatus::NotRun => "registration skipped".to_string(),
        RegistrationStatus::Reused => "volume reused".to_string(),
        RegistrationStatus::Computed(reason) => format!("registered ({reason})"),
    };
    println!(
        "    {:<12}{} {} / {} cells, {}",
        s.label.apply_to(label),
        s.ok.apply_to(&plane.state),
        s.value.apply_to(plane.cell_count()),
        plane.candidate_count,
        registration
    );
    if plane.low_confidence_frames > 0 {
        println!(
            "    {:<12}{}",
            "",
            s.warn.apply_to(format!(
                "{} frame(s) hit the shift bound",
                plane.low_confidence_frames
            ))
        );
    }
    if plane.quarantined_overrides > 0 {
        println!(
            "    {:<12}{}",
            "",
            s.warn.apply_to(format!(
                "{} override(s) quarantined; see `somata quarantine`",
                plane.quarantined_overrides
            ))
        );
    }
}
