mod cli;

use pkgferry::{config, HttpInstaller, PackageUploader};
use pkgferry_common::{ByteSource, FileSource, SessionKey};
use pkgferry_pkg::{extract_metadata, DirTempStore};
use pkgferry_upload::{InstallerApi, UploadObserver, UploadSummary};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "pkgferry=trace,pkgferry_pkg=trace,pkgferry_upload=trace,pkgferry_common=debug"
                .to_string()
        } else {
            "pkgferry=info,pkgferry_pkg=info,pkgferry_upload=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Inspect {
            file,
            json,
            icon_dir,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(inspect_file(&file, json, icon_dir))
        }
        Commands::Upload { file, server } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(upload_file(&file, cli.config.as_deref(), server))
        }
        Commands::InstallUrl { url, server } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(install_url(&url, cli.config.as_deref(), server))
        }
        Commands::Cancel {
            session_key,
            server,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(cancel_session(session_key, cli.config.as_deref(), server))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("pkgferry {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    if let Err(e) = &result {
        let hint = e
            .chain()
            .find_map(|cause| cause.downcast_ref::<pkgferry_common::Error>())
            .and_then(|e| e.hint());
        if let Some(hint) = hint {
            eprintln!("Hint: {}", hint);
        }
    }

    result
}

/// Load the config and apply a `--server` override.
fn installer_config(
    config_path: Option<&Path>,
    server: Option<String>,
) -> Result<config::Config> {
    let mut config = config::load_config_or_default(config_path)?;
    if let Some(url) = server {
        config.server.url = url;
        config::validate_config(&config)?;
    }
    Ok(config)
}

async fn open_package(file: &Path) -> Result<FileSource> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }
    FileSource::open(file)
        .await
        .with_context(|| format!("Failed to open package: {:?}", file))
}

async fn inspect_file(file: &Path, json: bool, icon_dir: Option<PathBuf>) -> Result<()> {
    let source = open_package(file).await?;
    let store = DirTempStore::new(icon_dir.unwrap_or_else(std::env::temp_dir));
    let metadata = extract_metadata(&source, &store).await?;

    if json {
        let json_str = serde_json::to_string_pretty(&metadata)?;
        println!("{}", json_str);
    } else {
        println!("File: {}", file.display());
        println!("Size: {} bytes", source.size());
        println!("Format: {}", metadata.format);
        println!("Title: {}", metadata.title);
        println!("Title ID: {}", metadata.title_id);
        match &metadata.icon_ref {
            Some(icon) => println!("Icon: {}", icon),
            None => println!("Icon: none"),
        }
        if metadata.is_fallback() {
            println!("(title ID recovered from fixed offset, metadata incomplete)");
        }
    }

    Ok(())
}

/// Logs aggregate progress in 10% steps.
#[derive(Default)]
struct LogObserver {
    last_step: AtomicU64,
}

impl UploadObserver for LogObserver {
    fn on_progress(&self, percent: f64) {
        let step = (percent / 10.0).floor() as u64;
        if self.last_step.fetch_max(step, Ordering::Relaxed) < step {
            tracing::info!("Uploaded {:.1}%", percent);
        }
    }

    fn on_complete(&self, summary: &UploadSummary) {
        tracing::info!(
            "Upload complete: {} bytes in {} chunks",
            summary.total_bytes,
            summary.chunks_uploaded
        );
    }
}

async fn upload_file(
    file: &Path,
    config_path: Option<&Path>,
    server: Option<String>,
) -> Result<()> {
    let config = installer_config(config_path, server)?;
    let source: Arc<dyn ByteSource> = Arc::new(open_package(file).await?);

    tracing::info!("Uploading {:?} to {}", file, config.server.url);
    let uploader = Arc::new(PackageUploader::from_config(&config));
    let handle = Arc::new(
        uploader
            .start_upload(source, Arc::new(LogObserver::default()))
            .await?,
    );

    // Ctrl-C cancels locally and asks the installer to drop the session
    let interrupt = {
        let uploader = uploader.clone();
        let handle = handle.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Cancelling upload...");
                if let Err(e) = uploader.cancel_upload(&handle).await {
                    eprintln!("Installer did not confirm cancellation: {}", e);
                }
            }
        })
    };

    let outcome = handle.wait().await;
    if handle.is_cancelled() {
        // Let the remote cancel finish before exiting
        let _ = interrupt.await;
    } else {
        interrupt.abort();
    }

    let summary = outcome?;
    println!(
        "Uploaded {} ({} bytes, session {})",
        file.display(),
        summary.total_bytes,
        summary.session_key
    );
    Ok(())
}

async fn install_url(url: &str, config_path: Option<&Path>, server: Option<String>) -> Result<()> {
    let config = installer_config(config_path, server)?;
    let installer = HttpInstaller::new(&config.server);
    installer.install_from_url(url).await?;
    println!("Install requested: {}", url);
    Ok(())
}

async fn cancel_session(
    session_key: String,
    config_path: Option<&Path>,
    server: Option<String>,
) -> Result<()> {
    let config = installer_config(config_path, server)?;
    let installer = HttpInstaller::new(&config.server);
    let session = SessionKey::new(session_key);
    installer.cancel_session(&session).await?;
    println!("Cancelled session {}", session);
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Server: {}", config.server.url);
            println!(
                "  Connect timeout: {}s",
                config.server.connect_timeout_secs
            );
            println!(
                "  Completion threshold: {}%",
                config.upload.completion_threshold
            );
            println!(
                "  Retries: {} list, {} empty",
                config.upload.max_list_retries, config.upload.max_empty_retries
            );
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Server: {}", config.server.url);
        }
    }

    Ok(())
}
