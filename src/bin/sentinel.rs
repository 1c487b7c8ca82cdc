//! sentinel - gate camera audit pipeline
//!
//! `sentinel run <VIDEO>` walks a recorded video frame by frame, counts gunny bags,
//! reads plates and checks faces, and commits one audit transaction per frame.
//! The remaining subcommands manage the SQLite reference tables.

use anyhow::{anyhow, Context, Result};
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gate_sentinel::detect::InferenceBackends;
use gate_sentinel::{
    EntityRegistry, EventBuilder, FileConfig, FileSource, FrameSource, MatchingPolicy,
    Orchestrator, PersistenceSink, RunSummary, SentinelConfig, SentinelError, SqliteEventStore,
    SqliteReferenceStore, Stages, Termination, VehicleType,
};

#[path = "../ui.rs"]
mod ui;

const EXIT_FAILURE: u8 = 1;
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "sentinel", version, about = "Gate camera audit pipeline")]
struct Cli {
    /// Config file (JSON, or TOML with a .toml extension). Overrides SENTINEL_CONFIG.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a recorded video and log bag, vehicle and face events
    Run {
        /// Local video file, or stub://name?frames=N for a synthetic stream
        video_path: String,

        /// UI mode for stderr progress (auto|plain|pretty)
        #[arg(long, default_value = "auto", value_name = "MODE")]
        ui: String,
    },
    /// Create the database schema
    InitDb,
    /// Register a person in the users table
    AddUser {
        #[arg(long)]
        name: String,
        #[arg(long)]
        role: String,
        /// Register the person as not authorized
        #[arg(long)]
        unauthorized: bool,
    },
    /// Register a vehicle plate
    AddVehicle {
        #[arg(long)]
        plate: String,
        /// Truck, Van, Bike or any other label
        #[arg(long, default_value = "Truck")]
        vehicle_type: String,
        /// Register the plate as not authorized
        #[arg(long)]
        unauthorized: bool,
    },
    /// Print committed event counts
    Summary,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(EXIT_FAILURE),
            };
        }
    };

    match dispatch(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("fatal: {:#}", err);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn dispatch(cli: Cli) -> Result<u8> {
    let cfg = SentinelConfig::load_from(cli.config.as_deref())
        .map_err(|e| SentinelError::Config(format!("{:#}", e)))?;

    match cli.command {
        Command::Run { video_path, ui } => run(&cfg, video_path, &ui),
        Command::InitDb => {
            SqliteEventStore::open(&cfg.db_path)
                .with_context(|| format!("failed to initialize {}", cfg.db_path))?;
            println!("schema ready in {}", cfg.db_path);
            Ok(0)
        }
        Command::AddUser {
            name,
            role,
            unauthorized,
        } => {
            let store = SqliteReferenceStore::open_or_create(&cfg.db_path)?;
            let id = store.add_user(&name, &role, !unauthorized)?;
            println!("user {} added with id {}", name, id);
            Ok(0)
        }
        Command::AddVehicle {
            plate,
            vehicle_type,
            unauthorized,
        } => {
            let store = SqliteReferenceStore::open_or_create(&cfg.db_path)?;
            let id = store.add_vehicle(&plate, &VehicleType::parse(&vehicle_type), !unauthorized)?;
            println!("vehicle {} stored with id {}", plate, id);
            Ok(0)
        }
        Command::Summary => {
            let store = SqliteEventStore::open(&cfg.db_path)?;
            let counts = store.counts()?;
            println!("gunny_bag_events: {}", counts.gunny_bag_events);
            println!("vehicle_logs:     {}", counts.vehicle_logs);
            println!("face_logs:        {}", counts.face_logs);
            Ok(0)
        }
    }
}

fn run(cfg: &SentinelConfig, video_path: String, ui_flag: &str) -> Result<u8> {
    let ui = ui::Ui::new(ui::UiMode::parse(ui_flag), std::io::stderr().is_terminal());

    let mut source = {
        let _phase = ui.phase("Open video");
        FileSource::open(FileConfig {
            path: video_path,
            target_fps: cfg.target_fps,
        })?
    };

    let mut backends = {
        let _phase = ui.phase("Load inference backends");
        let mut backends = InferenceBackends::from_settings(&cfg.backend)?;
        backends.warm_up()?;
        log::info!("inference backends: {}", backends.describe());
        if backends.synthetic_faces() {
            log::warn!(
                "face encoder '{}' is a stand-in: every frame yields one synthetic face, so \
                 face_logs will not reflect real identity checks (set backend = \"tract\" \
                 with face models for production)",
                backends.face_encoder.name()
            );
        }
        backends
    };

    let registry = {
        let _phase = ui.phase("Load known persons");
        let references = Arc::new(SqliteReferenceStore::open(&cfg.db_path).map_err(SentinelError::from)?);
        EntityRegistry::load(
            &cfg.known_faces_dir,
            backends.face_encoder.as_mut(),
            references.as_ref(),
            Box::new(Arc::clone(&references)),
        )
        .map_err(SentinelError::from)?
    };

    let mut sink = SqliteEventStore::open(&cfg.db_path)
        .with_context(|| format!("failed to open event store {}", cfg.db_path))?;
    let policy = MatchingPolicy::new(cfg.face_threshold)?;
    let builder = EventBuilder::new(&cfg.camera_id, &cfg.zone, cfg.volume_per_bag)?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;
    }

    let orchestrator = Orchestrator::new(&registry, policy, builder)
        .with_parallel_stages(cfg.parallel_stages)
        .with_stop_flag(stop);
    let mut stages = Stages::from_backends(backends, &cfg.bag_label, &cfg.plate_label);

    let mut progress = ui.frames(&source.describe());
    let summary = orchestrator.run_with_observer(
        &mut source,
        &mut stages,
        &mut sink,
        &mut |receipt| progress.record(receipt),
    );
    progress.finish();
    let summary = summary?;
    log::debug!("{} frame(s) decoded", source.stats().frames_decoded);

    print_summary(&summary);
    Ok(match summary.termination {
        Termination::Drained => 0,
        Termination::Cancelled => EXIT_CANCELLED,
        Termination::SourceError { .. } => EXIT_FAILURE,
    })
}

fn print_summary(summary: &RunSummary) {
    println!("source:           {}", summary.source);
    println!("frames processed: {}", summary.frames_processed);
    println!("gunny_bag_events: {}", summary.events.gunny_bag_events);
    println!("vehicle_logs:     {}", summary.events.vehicle_logs);
    println!("face_logs:        {}", summary.events.face_logs);
    println!(
        "stage failures:   bag={} plate={} face={}",
        summary.stage_failures.bag, summary.stage_failures.plate, summary.stage_failures.face
    );
    match &summary.termination {
        Termination::Drained => println!("status:           completed"),
        Termination::Cancelled => println!("status:           cancelled"),
        Termination::SourceError {
            frame_index,
            message,
        } => println!(
            "status:           stopped at frame {} ({})",
            frame_index, message
        ),
    }
}
