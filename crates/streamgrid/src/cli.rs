use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "streamgrid", version, about = "Multi-stream viewing grid: saved grids, layout and playback session")]
pub struct Cli {
    /// Config file (defaults to ~/.config/streamgrid/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Grids directory, overriding the config.
    #[arg(long, global = true)]
    pub grids_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a session driven by JSON lines on stdin (default).
    Session,
    /// List saved grids, most recent first.
    List(ListArgs),
    /// Create an empty grid and make it current.
    New { name: String },
    /// Rename a saved grid.
    Rename { grid: String, name: String },
    /// Delete a saved grid.
    Delete { grid: String },
    /// Copy a saved grid under a new name.
    Duplicate { grid: String, name: String },
    /// Make a saved grid the current one.
    Use { grid: String },
    /// Print a grid in the exchange format.
    Export(ExportArgs),
    /// Create a grid from an exchange file.
    Import(ImportArgs),
    /// Add a stream to the current grid.
    AddStream(AddStreamArgs),
    /// Remove a stream (and its chats) from the current grid.
    RemoveStream { stream: String },
    /// Show how a URL is classified.
    Classify(ClassifyArgs),
    /// Pack the current grid's items upward.
    Compact,
    /// Print pixel geometry for a container size.
    Layout(LayoutArgs),
    /// Look up a YouTube video title.
    Title { url: String },
    /// Check for a newer release.
    CheckUpdate,
    /// RTSP transcoding helpers.
    Rtsp(RtspArgs),
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Print machine-readable JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Grid id (defaults to the current grid).
    pub grid: Option<String>,

    /// Write to a file instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    pub file: PathBuf,

    /// Name of the new grid.
    #[arg(long, default_value = "Imported Grid")]
    pub name: String,
}

#[derive(Debug, Args)]
pub struct AddStreamArgs {
    pub url: String,

    /// Display name (defaults to the URL).
    #[arg(long)]
    pub name: Option<String>,

    #[arg(long, default_value = "")]
    pub logo: String,
}

#[derive(Debug, Args)]
pub struct ClassifyArgs {
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Print machine-readable JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct LayoutArgs {
    #[arg(long)]
    pub width: f64,

    #[arg(long)]
    pub height: f64,
}

#[derive(Debug, Args)]
pub struct RtspArgs {
    #[command(subcommand)]
    pub command: RtspCommand,
}

#[derive(Debug, Subcommand)]
pub enum RtspCommand {
    /// Check that ffmpeg can be found and run.
    Probe,
    /// Transcode one RTSP URL and serve it until Ctrl-C.
    Serve { url: String },
}
