//! Data Room CLI - Command-line interface for a local data room
//!
//! Provides commands for:
//! - Browsing and searching the folder tree
//! - Creating, renaming, moving and deleting folders, files and links
//! - Uploading files in cancellable batches
//! - Managing the trash and edit grants
//! - Reading the audit trail

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{
    audit::AuditCommand,
    completions::CompletionsCommand,
    grant::GrantCommand,
    items::{LinkCommand, MkdirCommand, MvCommand, RenameCommand, RmCommand, UrlCommand},
    trash::TrashCommand,
    tree::{SearchCommand, TreeCommand},
    upload::UploadCommand,
    Context,
};
use dataroom_sync::SyncError;
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "dataroom", version, about = "Virtual data room on a local store")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the folder tree
    Tree(TreeCommand),
    /// Create a folder
    Mkdir(MkdirCommand),
    /// Upload files into a folder
    Upload(UploadCommand),
    /// Add a link item to a folder
    Link(LinkCommand),
    /// Rename a folder, file or link
    Rename(RenameCommand),
    /// Move a folder, file or link
    Mv(MvCommand),
    /// Move an item to the trash
    Rm(RmCommand),
    /// Print a retrieval URL for a file or link
    Url(UrlCommand),
    /// List, restore or purge trashed items
    #[command(subcommand)]
    Trash(TrashCommand),
    /// Grant or revoke edit rights
    Grant(GrantCommand),
    /// View audit trail entries
    Audit(AuditCommand),
    /// Find items by name
    Search(SearchCommand),
    /// Generate shell completions
    Completions(CompletionsCommand),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };
    let ctx = Context {
        format,
        quiet: cli.quiet,
        config_path: cli.config,
    };

    let result = match cli.command {
        Commands::Tree(cmd) => cmd.execute(&ctx).await,
        Commands::Mkdir(cmd) => cmd.execute(&ctx).await,
        Commands::Upload(cmd) => cmd.execute(&ctx).await,
        Commands::Link(cmd) => cmd.execute(&ctx).await,
        Commands::Rename(cmd) => cmd.execute(&ctx).await,
        Commands::Mv(cmd) => cmd.execute(&ctx).await,
        Commands::Rm(cmd) => cmd.execute(&ctx).await,
        Commands::Url(cmd) => cmd.execute(&ctx).await,
        Commands::Trash(cmd) => cmd.execute(&ctx).await,
        Commands::Grant(cmd) => cmd.execute(&ctx).await,
        Commands::Audit(cmd) => cmd.execute(&ctx).await,
        Commands::Search(cmd) => cmd.execute(&ctx).await,
        Commands::Completions(cmd) => cmd.execute(&ctx).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err.chain().find_map(|cause| cause.downcast_ref::<SyncError>()).map(SyncError::code);
            ctx.formatter().failure(code, &format!("{err:#}"));
            ExitCode::FAILURE
        }
    }
}
