//! Command handler implementations
//!
//! This module contains the implementation of all CLI commands.

use crate::capture::thumbnail::ThumbnailGenerator;
use crate::cli::output::describe_artifact;
use crate::cli::{Args, Commands};
use crate::core::config::{get_config_path, init_config, Config};
use crate::core::sequence::{DirectorySequenceStore, SequenceAllocator};
use crate::core::CaptureStation;
use crate::testdb::fixtures::jpeg_bytes;
use crate::testdb::{MockCamera, MockCameraConfig};
use anyhow::{bail, Context, Result};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long `simulate` waits for a capture before giving up on it
const SIMULATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Run the appropriate command based on CLI arguments
pub fn run_command(args: &Args, config: &Config, shutdown_flag: Arc<AtomicBool>) -> Result<()> {
    match &args.command {
        Commands::Simulate {
            part,
            count,
            json,
            fail_primary,
        } => simulate(config, part, *count, *json, *fail_primary, shutdown_flag),
        Commands::NextSequence { part } => next_sequence(config, part),
        Commands::Thumbnail { path } => thumbnail(config, path),
        Commands::Config { path, reset } => handle_config_command(*path, *reset),
        Commands::GenerateConfig { to } => generate_config_file(to.clone()),
        Commands::ShowConfig => {
            show_config(config);
            Ok(())
        }
    }
}

/// Drive the whole pipeline against a mock camera
pub fn simulate(
    config: &Config,
    part: &str,
    count: u32,
    json: bool,
    fail_primary: bool,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start download runtime")?;
    let camera = Arc::new(MockCamera::with_config(MockCameraConfig {
        fail_memory_stream: fail_primary,
        ..Default::default()
    }));
    let station = CaptureStation::new(camera.clone(), config, runtime.handle().clone());

    station.connect(false)?;
    if let Some(model) = station.connected_model_name() {
        info!("Simulated camera: {}", model);
    }
    station.bind_part(part);
    let photos = station.subscribe();

    let started = Instant::now();
    for i in 0..count {
        let content = jpeg_bytes(1600 + i * 8, 1067).context("Failed to encode test image")?;
        camera.capture(&format!("IMG_{:04}.JPG", i + 1), content);
    }

    let mut received = 0;
    let mut deadline = Instant::now() + SIMULATE_TIMEOUT;
    while received < count {
        if shutdown_flag.load(Ordering::SeqCst) {
            warn!("Interrupted, {} of {} captures saved", received, count);
            break;
        }
        if Instant::now() >= deadline {
            warn!("Timed out, {} of {} captures saved", received, count);
            break;
        }
        if let Ok(artifact) = photos.recv_timeout(Duration::from_millis(200)) {
            received += 1;
            deadline = Instant::now() + SIMULATE_TIMEOUT;
            if json {
                println!("{}", serde_json::to_string(&artifact)?);
            } else {
                println!("{}", describe_artifact(&artifact));
            }
        }
    }

    if !station.wait_idle(Duration::from_secs(5)) {
        warn!("{} download(s) still running", station.in_flight());
    }
    station.disconnect();

    info!(
        "Saved {} of {} captures in {:.1}s ({} memory, {} disk-backed)",
        received,
        count,
        started.elapsed().as_secs_f64(),
        camera.memory_downloads(),
        camera.file_downloads()
    );
    Ok(())
}

/// Print the next free sequence number for a part
pub fn next_sequence(config: &Config, part: &str) -> Result<()> {
    let store = DirectorySequenceStore::new(config.output.root.clone());
    let allocator = SequenceAllocator::new(Arc::new(store));
    let next = allocator.next_sequence(part);
    println!("{}", next);
    info!(
        "Next capture of {} would be saved as {}",
        part,
        config
            .output
            .root
            .join(part)
            .join(format!("{}.{:03}.JPG", part, next))
            .display()
    );
    Ok(())
}

/// Generate a thumbnail next to an existing image
pub fn thumbnail(config: &Config, path: &Path) -> Result<()> {
    if !path.is_file() {
        bail!("Image not found: {}", path.display());
    }
    let generator = ThumbnailGenerator::new(&config.thumbnail);
    match generator.generate(path) {
        Some(thumb) => {
            println!("{}", thumb.display());
            Ok(())
        }
        None => bail!("Could not generate a thumbnail for {}", path.display()),
    }
}

/// Handle the `config` command - show path, or reset the config file
pub fn handle_config_command(show_path: bool, reset: bool) -> Result<()> {
    if reset {
        if let Some(config_path) = get_config_path() {
            if config_path.exists() {
                fs::remove_file(&config_path)?;
                info!("Removed existing config file");
            }
        }
        let path = init_config()?;
        info!("Created fresh config file at: {}", path.display());
        return Ok(());
    }

    if show_path {
        match Config::get_active_config_path() {
            Some(path) => {
                println!("{}", path.display());
                if path.exists() {
                    info!("Config file exists at: {}", path.display());
                } else {
                    info!("Config file would be created at: {}", path.display());
                }
            }
            None => warn!("Could not determine the configuration directory"),
        }
        return Ok(());
    }

    let path = init_config()?;
    info!("Config file: {}", path.display());
    info!("Edit this file, then run 'capture-station show-config' to verify your settings.");
    Ok(())
}

/// Generate a configuration file at the specified or default location
pub fn generate_config_file(output: Option<PathBuf>) -> Result<()> {
    let output_path = match output {
        Some(path) => {
            fs::write(&path, Config::generate_default_config())
                .with_context(|| format!("Failed to write {}", path.display()))?;
            path
        }
        None => init_config()?,
    };

    info!("Configuration file: {}", output_path.display());
    info!("Edit this file to customize the capture settings.");
    Ok(())
}

/// Show the current configuration settings
pub fn show_config(config: &Config) {
    match Config::get_active_config_path() {
        Some(path) if path.exists() => info!("Configuration file: {}", path.display()),
        _ => info!("(Using default settings - no config file found)"),
    }
    info!("");
    info!("Current Configuration:");
    info!("----------------------");
    info!("[output]");
    info!("  root = \"{}\"", config.output.root.display());
    info!("");
    info!("[connection]");
    info!("  cooldown_secs = {}", config.connection.cooldown_secs);
    info!("  pump_interval_ms = {}", config.connection.pump_interval_ms);
    info!(
        "  burst_log_interval_ms = {}",
        config.connection.burst_log_interval_ms
    );
    info!("");
    info!("[transfer]");
    info!("  max_attempts = {}", config.transfer.max_attempts);
    info!("  base_delay_ms = {}", config.transfer.base_delay_ms);
    info!(
        "  default_buffer_bytes = {}",
        config.transfer.default_buffer_bytes
    );
    info!("  fallback_wait_ms = {}", config.transfer.fallback_wait_ms);
    info!("  fallback_poll_ms = {}", config.transfer.fallback_poll_ms);
    info!(
        "  prefer_fallback_after_failures = {}",
        config.transfer.prefer_fallback_after_failures
    );
    info!(
        "  max_concurrent_downloads = {}",
        config.transfer.max_concurrent_downloads
    );
    info!(
        "  accepted_extensions = {:?}",
        config.transfer.accepted_extensions
    );
    info!("");
    info!("[events]");
    info!(
        "  volume_events_trigger_transfer = {}",
        config.events.volume_events_trigger_transfer
    );
    info!("  ignored_codes = {:?}", config.events.ignored_codes);
    info!("");
    info!("[thumbnail]");
    info!("  enabled = {}", config.thumbnail.enabled);
    info!("  max_edge = {}", config.thumbnail.max_edge);
    info!("  jpeg_quality = {}", config.thumbnail.jpeg_quality);
    info!("  marker = \"{}\"", config.thumbnail.marker);
    info!("");
    info!("[logging]");
    info!("  level = \"{}\"", config.logging.level);
    info!("  log_to_file = {}", config.logging.log_to_file);
    info!("  log_file = \"{}\"", config.logging.log_file.display());
}
