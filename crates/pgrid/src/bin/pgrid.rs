//! pgrid CLI: project captured points from a JSON session description.

use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use nalgebra::Point2;
use pgrid::{CalibrationMode, SessionConfig, SessionInput};
use serde::Serialize;

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Parser)]
#[command(name = "pgrid")]
#[command(about = "Calibrate a photographed ground plane and project captured points to it")]
#[command(version)]
struct Cli {
    /// Log level for stderr output [default: $PGRID_LOG, else warn].
    #[arg(long, global = true)]
    log_level: Option<LevelFilter>,

    /// Emit logs as JSON through `tracing`.
    #[cfg(feature = "tracing")]
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Project the captured points of a session.
    Project(ProjectArgs),

    /// Print the default session configuration as JSON.
    Defaults,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Space {
    /// Metric world coordinates.
    World,
    /// World coordinates with measurement flips and offset applied.
    Measurements,
    /// Plan-view coordinates (×100).
    Display,
}

#[derive(Debug, Clone, Args)]
struct ProjectArgs {
    /// Session description (JSON).
    #[arg(long)]
    session: PathBuf,

    /// Override the calibration mode from the session file.
    #[arg(long)]
    mode: Option<CalibrationMode>,

    /// Output coordinate space.
    #[arg(long, value_enum, default_value_t = Space::World)]
    space: Space,

    /// Write the report here instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Serialize)]
struct ProjectionReport {
    mode: CalibrationMode,
    space: &'static str,
    corners: Vec<[f64; 2]>,
    /// `null` where a point has no projection.
    points: Vec<Option<[f64; 2]>>,
    rejected: usize,
}

fn xy(p: Point2<f64>) -> [f64; 2] {
    [p.x, p.y]
}

fn run_project(args: &ProjectArgs) -> CliResult<String> {
    let input = SessionInput::from_json_file(&args.session)?;
    let base_dir = args.session.parent();
    let mut session = input.into_session(base_dir)?;
    if let Some(mode) = args.mode {
        session.set_mode(mode);
    }

    let (space, points) = match args.space {
        Space::World => ("world", session.project_for_export()?),
        Space::Measurements => ("measurements", session.measurements()?),
        Space::Display => ("display", session.project_for_display()?),
    };
    let rejected = points.iter().filter(|p| p.is_none()).count();
    log::info!(
        "{}: projected {} points ({} rejected)",
        session.mode(),
        points.len(),
        rejected
    );

    let report = ProjectionReport {
        mode: session.mode(),
        space,
        corners: session.grid().corners().iter().map(|&c| xy(c)).collect(),
        points: points.into_iter().map(|p| p.map(xy)).collect(),
        rejected,
    };
    Ok(serde_json::to_string_pretty(&report)?)
}

fn init_logging(cli: &Cli) -> CliResult<()> {
    #[cfg(feature = "tracing")]
    if cli.log_json {
        pgrid::core::init_tracing(true);
        return Ok(());
    }
    match cli.log_level {
        Some(level) => pgrid::core::init_with_level(level)?,
        None => pgrid::core::init_from_env(LevelFilter::Warn)?,
    }
    Ok(())
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let json = match &cli.command {
        Commands::Project(args) => run_project(args)?,
        Commands::Defaults => serde_json::to_string_pretty(&SessionConfig::default())?,
    };
    match cli.command {
        Commands::Project(ProjectArgs { out: Some(path), .. }) => fs::write(path, json)?,
        _ => println!("{json}"),
    }
    Ok(())
}
