mod bridge;
mod cli;
mod commands;
mod rtsp;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use cli::{Cli, Command, RtspCommand};
use streamgrid_core::config::Config;
use streamgrid_core::geometry::GridMetrics;
use streamgrid_core::network::NetClient;
use streamgrid_core::platform;
use streamgrid_core::repository::GridRepository;
use streamgrid_core::session::GridSession;
use streamgrid_core::storage::FileStore;

fn init_logging() -> anyhow::Result<()> {
    let log_path = platform::log_path();
    if let Some(dir) = log_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // stdout carries command output and bridge updates, so logs go elsewhere
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,streamgrid=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    let config_path = cli.config.clone().unwrap_or_else(Config::config_path);
    let mut config = Config::load_from(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    if let Some(dir) = cli.grids_dir.clone() {
        config.persistence.grids_dir = dir;
    }
    info!("Config loaded from: {:?}", config_path);

    let repo = GridRepository::new(FileStore::new(config.persistence.grids_dir.clone()));

    match cli.command.unwrap_or(Command::Session) {
        Command::Session => {
            let (rtsp, exits) = rtsp::RtspService::new(config.rtsp.clone());
            let handle = GridSession::spawn(config, repo).await?;
            bridge::run(handle, rtsp, exits).await?;
        }
        Command::List(args) => {
            let grids = repo.list_grids().await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&grids)?);
            } else {
                let current = repo.manifest().await?.current_grid_id;
                print!("{}", commands::format_grid_list(&grids, current.as_deref()));
            }
        }
        Command::New { name } => {
            let summary = commands::new_grid(&repo, &config, &name).await?;
            println!("Created '{}' ({})", summary.name, summary.id);
        }
        Command::Rename { grid, name } => {
            let found = commands::resolve_grid(&repo, &grid).await?;
            let summary = repo.rename_grid(&found.id, &name).await?;
            println!("Renamed '{}' to '{}'", found.name, summary.name);
        }
        Command::Delete { grid } => {
            let found = commands::resolve_grid(&repo, &grid).await?;
            repo.delete_grid(&found.id).await?;
            println!("Deleted '{}'", found.name);
        }
        Command::Duplicate { grid, name } => {
            let found = commands::resolve_grid(&repo, &grid).await?;
            let copy = repo.duplicate_grid(&found.id, &name).await?;
            println!("Copied '{}' to '{}' ({})", found.name, copy.name, copy.id);
        }
        Command::Use { grid } => {
            let found = commands::resolve_grid(&repo, &grid).await?;
            repo.set_current(Some(&found.id)).await?;
            println!("Current grid: '{}'", found.name);
        }
        Command::Export(args) => {
            let id = match args.grid {
                Some(key) => commands::resolve_grid(&repo, &key).await?.id,
                None => repo
                    .manifest()
                    .await?
                    .current_grid_id
                    .context("no current grid; pass a grid id")?,
            };
            let data = repo.export_grid(&id).await?;
            let text = serde_json::to_string_pretty(&data)?;
            match args.output {
                Some(path) => {
                    tokio::fs::write(&path, text)
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Exported to {}", path.display());
                }
                None => println!("{}", text),
            }
        }
        Command::Import(args) => {
            let text = tokio::fs::read_to_string(&args.file)
                .await
                .with_context(|| format!("Failed to read {}", args.file.display()))?;
            let grid = repo.import_grid(&args.name, &text).await??;
            println!(
                "Imported '{}' ({}) with {} stream(s)",
                grid.name,
                grid.id,
                grid.streams.len()
            );
        }
        Command::AddStream(args) => {
            let entry =
                commands::add_stream(&repo, &config, &args.url, args.name.as_deref(), &args.logo).await?;
            println!("Added {} stream '{}' ({})", entry.kind, entry.name, entry.id);
        }
        Command::RemoveStream { stream } => {
            let entry = commands::remove_stream(&repo, &config, &stream).await?;
            println!("Removed '{}'", entry.name);
        }
        Command::Classify(args) => {
            if args.json {
                let list: Vec<_> = args
                    .urls
                    .iter()
                    .map(|u| serde_json::json!({ "url": u, "classification": streamgrid_core::classify::classify(u) }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&list)?);
            } else {
                for url in &args.urls {
                    print!("{}", commands::describe_url(url, &config.network.embed_parent_host));
                }
            }
        }
        Command::Compact => {
            let moved = commands::compact(&repo, &config).await?;
            println!("Moved {} item(s)", moved);
        }
        Command::Layout(args) => {
            let metrics = GridMetrics::compute(args.width, args.height, &config.layout);
            print!("{}", commands::describe_metrics(&metrics));
        }
        Command::Title { url } => {
            let client = NetClient::new(&config.network)?;
            println!("{}", client.youtube_title(&url).await?);
        }
        Command::CheckUpdate => {
            let client = NetClient::new(&config.network)?;
            let current = env!("CARGO_PKG_VERSION");
            match client.check_update(current).await? {
                Some(latest) => println!("Update available: {} (running {})", latest, current),
                None => println!("Up to date ({})", current),
            }
        }
        Command::Rtsp(args) => {
            let (service, _exits) = rtsp::RtspService::new(config.rtsp.clone());
            match args.command {
                RtspCommand::Probe => println!("{}", service.probe().await?),
                RtspCommand::Serve { url } => {
                    let playlist = service.start("cli", &url).await?;
                    println!("{}", playlist);
                    tokio::signal::ctrl_c().await?;
                    service.stop_all().await;
                }
            }
        }
    }

    Ok(())
}
