//! Cobot Cell - Collaborative Assembly Cell Controller
//!
//! Watches the operator's hands, recognizes handovers and runs the matching
//! robot task.

use cobot_cell::app::cli::{Cli, Commands, ConfigAction, TasksAction};
use cobot_cell::app::config::Config;
use cobot_cell::cell::capture::CaptureSettings;
use cobot_cell::cell::context::CellContext;
use cobot_cell::cell::orchestrator::{CellReport, OrchestratorSettings, ProcessOrchestrator};
use cobot_cell::cell::panel::{spawn_token_reader, Panel};
use cobot_cell::inference::LinearEnsembleBackend;
use cobot_cell::perception::frame::Calibration;
use cobot_cell::perception::pipeline::{PerceptionPipeline, PipelineSettings};
use cobot_cell::perception::source::ReplaySource;
use cobot_cell::robot::dispatch::{DispatchSettings, RemainingTasks, RobotDispatchLoop};
use cobot_cell::robot::executor::{ConsolePrompt, TaskExecutor};
use cobot_cell::robot::link::SimulatedRobotLink;
use cobot_cell::tasks::{TaskRegistry, TaskState};
use std::io::BufReader;
use std::path::Path;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Parse CLI arguments first so we can use --verbose to set log level
    let cli = Cli::parse_args();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = if let Some(path) = &cli.config {
        Config::load(path)?
    } else {
        Config::load_default()?
    };

    match cli.command {
        Commands::Run { frames, panel } => {
            run_cell(&frames, panel.as_deref(), &config)?;
        }
        Commands::Tasks { action } => {
            run_tasks(action, &config)?;
        }
        Commands::Init { force } => {
            run_init(force, &config_path)?;
        }
        Commands::Config { action } => {
            run_config(action, &config, &config_path)?;
        }
    }

    Ok(())
}

fn run_cell(frames: &Path, panel: Option<&Path>, config: &Config) -> anyhow::Result<()> {
    // Models load before anything starts; no decisions without them
    let backend =
        LinearEnsembleBackend::load(&config.models.segmentation_dir, &config.models.classification_dir)?;
    if backend.classes() < config.dispatch.class_count() {
        anyhow::bail!(
            "Classification models produce {} classes but dispatch expects {}",
            backend.classes(),
            config.dispatch.class_count()
        );
    }

    let calibration = match &config.perception.calibration_file {
        Some(path) => Calibration::load(path)?,
        None => {
            warn!("No calibration file configured, using unit calibration");
            Calibration::unit()
        }
    };
    let source = ReplaySource::open(frames, calibration)?;
    let pipeline = PerceptionPipeline::new(backend, PipelineSettings::from_config(config));

    let registry = TaskRegistry::open(&config.robot.tasks_dir, &config.robot.tools_file)?;
    let executor = TaskExecutor::new(registry, SimulatedRobotLink::new(), ConsolePrompt::stdio());
    let robot = RobotDispatchLoop::new(
        executor,
        &config.dispatch,
        DispatchSettings::from_config(config),
    );

    let ctx = CellContext::new();
    let stop = ctx.stop.clone();
    ctrlc::set_handler(move || {
        stop.raise();
    })?;

    let orchestrator =
        ProcessOrchestrator::with_context(OrchestratorSettings::from_config(config), ctx);
    info!(run_id = %orchestrator.run_id(), frames = %frames.display(), "Cell run");
    let capture_settings = CaptureSettings::from_config(config);

    let report = match panel {
        None => Some(orchestrator.run(source, capture_settings, pipeline, robot)?),
        Some(device) => {
            let port = std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .open(device)
                .map_err(|e| anyhow::anyhow!("Panel {} unavailable: {}", device.display(), e))?;
            info!(device = %device.display(), "Panel connected, press start");

            let events = spawn_token_reader(BufReader::new(port.try_clone()?))?;
            let mut panel = Panel::new(port);
            orchestrator.supervise(&mut panel, &events, move |o| {
                o.start(source, capture_settings, pipeline, robot)
            })?
        }
    };

    if let Some(report) = report {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &CellReport) {
    println!("Cell run finished:");
    println!("  Frames read:     {}", report.capture.frames_read);
    println!("  Frames sampled:  {}", report.capture.frames_sent);
    println!("  Frames dropped:  {}", report.capture.frames_dropped);
    println!("  Without hands:   {}", report.perception.frames_without_hands);
    println!("  Handovers:       {}", report.perception.labels_sent);
}

fn run_tasks(action: TasksAction, config: &Config) -> anyhow::Result<()> {
    let mut registry = TaskRegistry::open(&config.robot.tasks_dir, &config.robot.tools_file)?;

    match action {
        TasksAction::List => {
            let names = registry.stored_task_names()?;
            if names.is_empty() {
                println!("No tasks found in {:?}", config.robot.tasks_dir);
                return Ok(());
            }
            println!("Tasks in {:?}:\n", config.robot.tasks_dir);
            for name in names {
                registry.load_task(&name)?;
                let task = registry.get_task(&name)?;
                let saved = task
                    .metadata
                    .saved_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "  {:<20} {:>3} operations  {:>3} positions  saved {}",
                    task.name,
                    task.operations.len(),
                    task.positions.len(),
                    saved
                );
            }
        }
        TasksAction::Show { name } => {
            registry.load_task(&name)?;
            let task = registry.get_task(&name)?;
            println!("{}", serde_json::to_string_pretty(task)?);
        }
        TasksAction::Check => {
            let remaining = RemainingTasks::from_config(&config.dispatch);
            let mut missing = Vec::new();
            for instance in remaining.all_instances() {
                let state = registry.task_state(&instance)?;
                if state == TaskState::Missing {
                    missing.push(instance);
                    continue;
                }
                registry.load_task(&instance)?;
                println!("  {:<20} {}", instance, registry.task_state(&instance)?);
            }
            if !missing.is_empty() {
                anyhow::bail!("Missing task records: {}", missing.join(", "));
            }
            println!("All {} configured tasks present", remaining.all_instances().len());
        }
    }

    Ok(())
}

fn run_init(force: bool, config_path: &Path) -> anyhow::Result<()> {
    if config_path.exists() && !force {
        println!("Config already exists at {:?}", config_path);
        println!("Use --force to overwrite");
        return Ok(());
    }

    let config = Config::default();
    config.save(&config_path.to_path_buf())?;
    for dir in [
        &config.robot.tasks_dir,
        &config.models.segmentation_dir,
        &config.models.classification_dir,
    ] {
        std::fs::create_dir_all(dir)?;
    }

    println!("Initialized configuration at {:?}", config_path);
    println!("  Tasks:  {:?}", config.robot.tasks_dir);
    println!("  Models: {:?}", config.models.segmentation_dir.parent().unwrap_or(Path::new(".")));
    Ok(())
}

fn run_config(action: ConfigAction, config: &Config, config_path: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            println!("Configuration ({:?}):\n", config_path);
            println!("{}", config.to_toml()?);
        }
        ConfigAction::Get { key } => {
            println!("{} = {}", key, config.get_value(&key)?);
        }
        ConfigAction::Set { key, value } => {
            if !config_path.exists() {
                anyhow::bail!("No config file found. Run 'cobot-cell init' first.");
            }
            let updated = config.with_value(&key, &value)?;
            updated.save(&config_path.to_path_buf())?;
            println!("Set {} = {}", key, updated.get_value(&key)?);
        }
        ConfigAction::Reset { force } => {
            if config_path.exists() && !force {
                println!("Config exists at {:?}", config_path);
                println!("Use --force to reset to defaults");
                return Ok(());
            }

            Config::default().save(&config_path.to_path_buf())?;
            println!("Configuration reset to defaults at {:?}", config_path);
        }
    }

    Ok(())
}
