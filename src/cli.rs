use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pkgferry")]
#[command(author, version, about = "Inspect console packages and upload them to a remote installer")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the title, title ID and icon of a package
    Inspect {
        /// Package file to inspect
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,

        /// Directory to write the extracted icon into (defaults to the system temp dir)
        #[arg(long)]
        icon_dir: Option<PathBuf>,
    },

    /// Upload a package to the installer
    Upload {
        /// Package file to upload
        #[arg(required = true)]
        file: PathBuf,

        /// Installer base URL, overriding the config file
        #[arg(long)]
        server: Option<String>,
    },

    /// Ask the installer to download and install a package from a URL
    InstallUrl {
        /// Package URL reachable from the installer
        #[arg(required = true)]
        url: String,

        /// Installer base URL, overriding the config file
        #[arg(long)]
        server: Option<String>,
    },

    /// Cancel an upload session on the installer
    Cancel {
        /// Session key printed when the upload started
        #[arg(required = true)]
        session_key: String,

        /// Installer base URL, overriding the config file
        #[arg(long)]
        server: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
