//! Voxpool - shared speech model manager and STT bridge
//!
//! Run with `voxpool` or `voxpool serve` to load models and serve the bridge.
//! Use `voxpool status` to load models and print what became available.
//! Use `voxpool transcribe <file>` to transcribe an audio file.

use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use voxpool::cli::{Cli, Commands};
use voxpool::config::{self, Config, Mode};
use voxpool::{service, ModelManager, TranscribeOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("voxpool={},warn", log_level))),
        )
        .with_target(false)
        .init();

    // Load configuration
    let mut config = config::load_config(cli.config.as_deref())?;

    // Apply CLI overrides
    if let Some(model) = cli.model {
        config.transcriber.model = model;
    }
    if let Some(endpoint) = cli.remote_stt {
        config.transcriber.remote_endpoint = Some(endpoint);
        config.transcriber.mode = Mode::Remote;
    }

    match cli.command.unwrap_or(Commands::Serve {
        host: None,
        port: None,
    }) {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.service.host = host;
            }
            if let Some(port) = port {
                config.service.port = port;
            }
            config.validate()?;
            run_service(config).await?;
        }

        Commands::Status => {
            config.validate()?;
            let manager = load_manager(config).await?;
            let snapshot = manager.clone();
            let status = tokio::task::spawn_blocking(move || snapshot.status()).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            manager.shutdown();
        }

        Commands::Transcribe { file, language } => {
            config.validate()?;
            if !file.exists() {
                anyhow::bail!("Audio file not found: {:?}", file);
            }
            let manager = load_manager(config).await?;
            let options = TranscribeOptions {
                language,
                prompt: None,
            };
            let result = manager.transcribe(file, options).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            manager.shutdown();
        }

        Commands::Voices { owner } => {
            let manager = ModelManager::from_config(config)?;
            let mut profiles = manager.voices().builtin_profiles();
            if let Some(owner) = owner {
                profiles.extend(manager.voices().user_profiles(owner));
            }
            println!("{}", serde_json::to_string_pretty(&profiles)?);
        }

        Commands::Config => {
            show_config(&config)?;
        }
    }

    Ok(())
}

/// Build the manager and run the blocking model loads off the runtime
async fn load_manager(config: Config) -> anyhow::Result<Arc<ModelManager>> {
    let manager = Arc::new(ModelManager::from_config(config)?);
    let loader = manager.clone();
    tokio::task::spawn_blocking(move || loader.load_models()).await??;
    Ok(manager)
}

async fn run_service(config: Config) -> anyhow::Result<()> {
    let service_cfg = config.service.clone();
    let manager = load_manager(config).await?;

    let handle = service::start(manager.clone(), &service_cfg).await?;
    tracing::info!("Voxpool bridge ready on http://{}", handle.addr());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal");

    handle.shutdown().await;
    manager.shutdown();
    Ok(())
}

fn show_config(config: &Config) -> anyhow::Result<()> {
    println!("# Voxpool Configuration\n");
    if let Some(path) = Config::default_path() {
        println!("# Default config path: {:?}", path);
    }
    println!("# Models directory: {:?}\n", config.transcriber.resolve_models_dir());
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
