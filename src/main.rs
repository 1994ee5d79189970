use anyhow::Result;
use clap::{Parser, Subcommand};

use apkvault::cli::{
    handle_config_command, handle_info_command, handle_journal_command, handle_list_command,
    handle_restore_command, handle_verify_command, ConfigCommands, RestoreArgs, VerifyArgs,
};
use apkvault::config::{Settings, VaultPaths};

#[derive(Parser)]
#[command(
    name = "apkvault",
    version,
    about = "Verifying restore engine for Android application backups",
    long_about = "apkvault restores Android application backups (APKs, data, keystore, \
                  permissions and rules) after checking them against their recorded \
                  checksums and signing certificates."
)]
struct Cli {
    /// Log filter, overrides the configured log level
    #[arg(long, global = true, env = "APKVAULT_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Restore one or more backups
    Restore(RestoreArgs),

    /// List backups
    #[command(alias = "ls")]
    List {
        /// Only this package
        package: Option<String>,
    },

    /// Show details of one backup
    Info {
        package: String,
        #[arg(short, long)]
        label: Option<String>,
    },

    /// Check a backup's integrity without restoring it
    Verify(VerifyArgs),

    /// Show recent restore outcomes
    Journal {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
        /// Only this package
        #[arg(short, long)]
        package: Option<String>,
    },

    /// Show or change configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let paths = VaultPaths::new()?;
    let mut settings = Settings::load_or_create(&paths)?;

    let level = cli.log_level.as_deref().unwrap_or(settings.log_level.as_str()).to_string();
    apkvault::logging::init(&level)?;

    match cli.command {
        Commands::Restore(args) => handle_restore_command(&paths, &settings, args)?,
        Commands::List { package } => handle_list_command(&paths, &settings, package)?,
        Commands::Info { package, label } => {
            handle_info_command(&paths, &settings, &package, label.as_deref())?
        }
        Commands::Verify(args) => handle_verify_command(&paths, &settings, args)?,
        Commands::Journal { limit, package } => handle_journal_command(&paths, limit, package.as_deref())?,
        Commands::Config(cmd) => handle_config_command(&paths, &mut settings, cmd)?,
    }

    Ok(())
}
