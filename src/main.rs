use chrono::Utc;
use clap::{Parser, Subcommand};
use env_logger::Env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use xst_stream::acquisition::SubbandRange;
use xst_stream::archive;
use xst_stream::config::Config;
use xst_stream::dispatch::{CommandRenderer, Renderer};
use xst_stream::observation::ObservationController;
use xst_stream::simulate::{self, Simulation};
use xst_stream::state::{load_all_logs, SharedState};
use xst_stream::station::Station;
use xst_stream::web;

#[derive(Parser)]
#[command(name = "xst-stream")]
#[command(about = "Real-time LOFAR XST correlation acquisition")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file
    CheckConfig {
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },
    /// Run the HTTP control API
    Serve {
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },
    /// Run one observation in the foreground until Ctrl-C
    Observe {
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
        /// Input folder, overriding the configuration
        #[arg(long)]
        folder: Option<PathBuf>,
    },
    /// Replay a recorded stream into a folder one block at a time
    Simulate {
        /// Folder the stream file and descriptor are written to
        target: PathBuf,
        /// Recorded stream; a synthetic one is generated when omitted
        #[arg(long)]
        source: Option<PathBuf>,
        #[arg(long, default_value = "CS002")]
        station: String,
        #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
        interval: Duration,
        #[arg(long, default_value_t = 100)]
        min_subband: u32,
        #[arg(long, default_value_t = 110)]
        max_subband: u32,
        /// Blocks in the synthetic stream
        #[arg(long, default_value_t = 20)]
        blocks: usize,
    },
    /// Summarise the block archive of an observation
    Analyze {
        /// The observation's blocks/ folder
        blocks: PathBuf,
    },
    /// List past observations
    History {
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::CheckConfig { config } => check_config(&config),
        Commands::Serve { config } => serve(&config),
        Commands::Observe { config, folder } => observe(&config, folder),
        Commands::Simulate {
            target,
            source,
            station,
            interval,
            min_subband,
            max_subband,
            blocks,
        } => simulate(
            target,
            source,
            &station,
            interval,
            (min_subband, max_subband),
            blocks,
        ),
        Commands::Analyze { blocks } => analyze(blocks),
        Commands::History { config } => history(&config),
    }
}

fn load_config(path: &str) -> Option<Config> {
    match Config::from_file(path) {
        Ok(config) => Some(config),
        Err(e) => {
            eprintln!("Error loading {}: {}", path, e);
            None
        }
    }
}

fn build_controller(path: &str) -> Option<Arc<ObservationController>> {
    let config = load_config(path)?;
    let Some(renderer) = config.renderer.as_ref() else {
        eprintln!("No renderer configured in {}", path);
        return None;
    };
    let renderer: Arc<dyn Renderer> = Arc::new(CommandRenderer::new(renderer.command.clone()));
    Some(Arc::new(ObservationController::new(
        Arc::new(config),
        renderer,
        SharedState::new(),
    )))
}

fn check_config(path: &str) -> ExitCode {
    let Some(config) = load_config(path) else {
        return ExitCode::FAILURE;
    };

    let params = config.default_params();
    let station = config.station(&params);
    println!("Configuration is valid");
    println!(
        "  station: {} ({:?}, {} bytes per block)",
        station.name,
        station.station_type,
        station.block_bytes()
    );
    println!("  input: {}/*{}", params.folder.display(), config.input.suffix);
    println!("  output: {}", config.output.base_folder.display());
    println!(
        "  processing: step {}, {} threads, queue {}",
        params.step,
        params.threads,
        config.queue_capacity(params.threads)
    );
    match config.renderer {
        Some(renderer) => println!("  renderer: {}", renderer.command),
        None => println!("  renderer: none (observations cannot run)"),
    }
    ExitCode::SUCCESS
}

fn serve(path: &str) -> ExitCode {
    let Some(controller) = build_controller(path) else {
        return ExitCode::FAILURE;
    };
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let served = runtime.block_on(async {
        tokio::select! {
            result = web::run_server(Arc::clone(&controller)) => result,
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted, shutting down");
                Ok(())
            }
        }
    });

    controller.stop();
    if let Some(Err(e)) = controller.wait() {
        log::error!("Observation ended with error: {}", e);
    }

    match served {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Server error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn observe(path: &str, folder: Option<PathBuf>) -> ExitCode {
    let Some(controller) = build_controller(path) else {
        return ExitCode::FAILURE;
    };
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut params = controller.config().default_params();
    if let Some(folder) = folder {
        params.folder = folder;
    }
    let session = match controller.start(params) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Failed to start observation: {}", e);
            return ExitCode::FAILURE;
        }
    };
    println!("Observing into {} (Ctrl-C to stop)", session.root.display());

    let stopper = Arc::clone(&controller);
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.stop();
        }
    });

    match controller.wait() {
        Some(Ok(summary)) => {
            println!(
                "Observation {} done: {} blocks, {} images, {} failed",
                session.name, summary.blocks_seen, summary.completed, summary.failed
            );
            ExitCode::SUCCESS
        }
        Some(Err(e)) => {
            eprintln!("Observation failed: {}", e);
            ExitCode::FAILURE
        }
        None => ExitCode::SUCCESS,
    }
}

fn simulate(
    target: PathBuf,
    source: Option<PathBuf>,
    station: &str,
    interval: Duration,
    (min, max): (u32, u32),
    blocks: usize,
) -> ExitCode {
    let range = match SubbandRange::new(min, max) {
        Ok(range) => range,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let block_bytes = Station::new(station, 3, 1.5, 50.0).block_bytes();

    let source = match source {
        Some(source) => source,
        None => {
            let synthetic = target.join("synthetic_stream.raw");
            let written = std::fs::create_dir_all(&target).and_then(|()| {
                simulate::write_synthetic_source(&synthetic, block_bytes, blocks)
            });
            if let Err(e) = written {
                eprintln!("Failed to write synthetic stream: {}", e);
                return ExitCode::FAILURE;
            }
            synthetic
        }
    };

    let simulation = Simulation {
        source,
        stream_name: format!("{}_xst.dat", Utc::now().format("%Y%m%d_%H%M%S")),
        target_dir: target,
        block_bytes,
        interval,
        range,
    };

    match simulation.run(&CancellationToken::new()) {
        Ok(written) => {
            println!(
                "Wrote {} blocks to {}",
                written,
                simulation.target_file().display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Simulation failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn analyze(blocks_dir: PathBuf) -> ExitCode {
    let blocks = match archive::scan_blocks(&blocks_dir) {
        Ok(blocks) => blocks,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let Some(summary) = archive::summarize(&blocks) else {
        println!("No blocks found in {}", blocks_dir.display());
        return ExitCode::SUCCESS;
    };

    match serde_json::to_string_pretty(&summary) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to format summary: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn history(path: &str) -> ExitCode {
    let Some(config) = load_config(path) else {
        return ExitCode::FAILURE;
    };

    let logs = match load_all_logs(&config.output.base_folder) {
        Ok(logs) => logs,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if logs.is_empty() {
        println!("No observations in {}", config.output.base_folder.display());
    }
    for (name, log) in logs.iter().rev() {
        let subbands = match (
            log.iter().map(|e| e.subband).min(),
            log.iter().map(|e| e.subband).max(),
        ) {
            (Some(min), Some(max)) => format!("subbands {}-{}", min, max),
            _ => "no images".to_string(),
        };
        println!("  {}: {} images, {}", name, log.len(), subbands);
    }
    ExitCode::SUCCESS
}
