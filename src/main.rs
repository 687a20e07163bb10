use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;

mod cli;

use cli::Cli;
use cli::commands::Commands;
use vigil::collaborators::Collaborators;
use vigil::config::Config;
use vigil::engine::Engine;
use vigil::objects::ObjectModel;

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vigil")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("vigil.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn load_objects(path: Option<&PathBuf>) -> Result<ObjectModel> {
    match path {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read object file: {}", path.display()))?;
            let objects: ObjectModel = serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse object file: {}", path.display()))?;
            info!(
                "Loaded {} hosts and {} services from {}",
                objects.hosts.len(),
                objects.services.len(),
                path.display()
            );
            Ok(objects)
        }
        None => Ok(ObjectModel::new()),
    }
}

async fn run_scheduler(config: &Config, objects_path: Option<&PathBuf>) -> Result<bool> {
    let objects = load_objects(objects_path)?;
    let mut engine = Engine::new(config.clone(), objects, Collaborators::default());
    engine.rebuild_initial_schedule();

    let handle = engine.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.try_shutdown();
        }
    });

    engine.run().await.context("Dispatch loop failed")?;
    Ok(engine.restart_requested())
}

async fn handle_run_command(cli: &Cli, objects_path: Option<&PathBuf>) -> Result<()> {
    loop {
        let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
        println!("{}", "Starting scheduler...".cyan());
        let restart = run_scheduler(&config, objects_path).await?;
        if !restart {
            break;
        }
        // a restart reloads configuration and objects, then rebuilds
        info!("Restart requested, rebuilding schedule");
        println!("{}", "Restarting scheduler...".yellow());
    }
    println!("{}", "Scheduler stopped.".cyan());
    Ok(())
}

fn handle_projection_command(config: &Config, objects_path: Option<&PathBuf>) -> Result<()> {
    let objects = load_objects(objects_path)?;
    let mut engine = Engine::new(config.clone(), objects, Collaborators::default());
    engine.rebuild_initial_schedule();

    println!("{}", "Projected scheduling information".green().bold());
    println!();
    print!("{}", engine.projection_report());
    Ok(())
}

fn handle_check_config_command(cli: &Cli, config: &Config) -> Result<()> {
    info!("Configuration validated: {:?}", cli.config);
    println!("{}", "Configuration OK".green());
    println!(
        "  interval_length: {}s, sleep_time: {}s",
        config.scheduling.interval_length, config.sleep_time
    );
    println!(
        "  delay methods: service {:?}, host {:?}",
        config.scheduling.service_inter_check_delay_method,
        config.scheduling.host_inter_check_delay_method
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        None | Some(Commands::Run { objects: None }) => handle_run_command(&cli, None).await,
        Some(Commands::Run { objects }) => handle_run_command(&cli, objects.as_ref()).await,
        Some(Commands::Projection { objects }) => {
            handle_projection_command(&config, objects.as_ref())
        }
        Some(Commands::CheckConfig) => handle_check_config_command(&cli, &config),
    }
}
