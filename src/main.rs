use anyhow::Result;
use clap::{Parser, Subcommand};
use smods_manager::config::Paths;
use smods_manager::{App, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "smods")]
#[command(
    author,
    version,
    about = "Install and track Cities: Skylines mods with live status broadcasting"
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the status hub WebSocket server until Ctrl-C
    Serve,

    /// Install a mod and its dependencies
    Install {
        /// Catalogue mod ID
        mod_id: String,
        /// Revision to install (defaults to the latest)
        #[arg(long)]
        revision: Option<String>,
        /// Skip dependency installation
        #[arg(long)]
        no_deps: bool,
    },

    /// Uninstall a mod
    Uninstall {
        /// Catalogue mod ID
        mod_id: String,
    },

    /// Print the status snapshot of a mod as JSON
    Status {
        /// Catalogue mod ID
        mod_id: String,
    },

    /// List installed mods
    Installed,

    /// Star a mod
    Star { mod_id: String },

    /// Remove the star from a mod
    Unstar { mod_id: String },

    /// Manage playlists
    Playlist {
        #[command(subcommand)]
        action: PlaylistCommands,
    },

    /// Show or change configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum PlaylistCommands {
    /// Create a playlist
    Create { name: String },
    /// List playlists
    List,
    /// Add a mod to a playlist
    Add { playlist_id: i64, mod_id: String },
    /// Remove a mod from a playlist
    Remove { playlist_id: i64, mod_id: String },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set the game install and data folders
    SetPaths {
        /// Game installation folder (contains Files/Mods)
        #[arg(long)]
        install_dir: Option<String>,
        /// Game data folder (contains Maps and Addons)
        #[arg(long)]
        data_dir: Option<String>,
    },
    /// Set the downloads folder (empty to reset to the default)
    SetDownloadsDir { path: String },
}

fn setup_logging(verbosity: u8, also_stderr: bool) {
    let filter = match verbosity {
        0 => "smods_manager=info",
        1 => "smods_manager=debug",
        2 => "smods_manager=trace",
        _ => "trace",
    };

    let log_file = Paths::new().log_file();
    if let Some(dir) = log_file.parent() {
        std::fs::create_dir_all(dir).ok();
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .expect("Failed to open log file");

    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());
    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::sync::Arc::new(file));

    if also_stderr {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let is_server = matches!(cli.command, Commands::Serve);
    setup_logging(cli.verbose, !is_server);

    // Load configuration
    let config = Config::load().await?;

    // Initialize app
    let app = App::new(config).await?;

    match cli.command {
        Commands::Serve => app.cmd_serve().await?,
        Commands::Install {
            mod_id,
            revision,
            no_deps,
        } => {
            app.cmd_install(&mod_id, revision.as_deref(), !no_deps)
                .await?
        }
        Commands::Uninstall { mod_id } => app.cmd_uninstall(&mod_id).await?,
        Commands::Status { mod_id } => app.cmd_status(&mod_id).await?,
        Commands::Installed => app.cmd_installed().await?,
        Commands::Star { mod_id } => app.cmd_star(&mod_id, true).await?,
        Commands::Unstar { mod_id } => app.cmd_star(&mod_id, false).await?,
        Commands::Playlist { action } => match action {
            PlaylistCommands::Create { name } => app.cmd_playlist_create(&name).await?,
            PlaylistCommands::List => app.cmd_playlist_list().await?,
            PlaylistCommands::Add {
                playlist_id,
                mod_id,
            } => app.cmd_playlist_add(playlist_id, &mod_id).await?,
            PlaylistCommands::Remove {
                playlist_id,
                mod_id,
            } => app.cmd_playlist_remove(playlist_id, &mod_id).await?,
        },
        Commands::Config { action } => match action {
            ConfigCommands::Show => app.cmd_config_show().await?,
            ConfigCommands::SetPaths {
                install_dir,
                data_dir,
            } => {
                app.cmd_config_set_paths(install_dir.as_deref(), data_dir.as_deref())
                    .await?
            }
            ConfigCommands::SetDownloadsDir { path } => {
                app.cmd_config_set_downloads_dir(&path).await?
            }
        },
    }

    Ok(())
}
