use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use photoapp::{Config, PhotoApp};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "photoapp")]
#[command(about = "Upload, label, retrieve and delete images stored in S3 and MySQL")]
#[command(version)]
struct Cli {
    /// Config file path (optional)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// AWS credential profile, overriding s3.profile
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Refuse to run unless the configured database user matches
    #[arg(long, global = true)]
    db_user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report object and user counts
    Ping,

    /// List all users
    Users,

    /// List assets, optionally for one user
    Images {
        #[arg(long)]
        user: Option<i64>,
    },

    /// Upload a local image for a user
    Upload { userid: i64, file: PathBuf },

    /// Download an asset, by default to its original file name
    Download {
        assetid: i64,
        dest: Option<PathBuf>,
    },

    /// Show the labels of an asset
    Labels { assetid: i64 },

    /// Find assets with a label containing the given text
    Search { label: String },

    /// Delete every asset, label and stored object
    DeleteAll,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    if let Some(profile) = cli.profile {
        config.s3.profile = Some(profile);
    }

    // Initialize logging
    init_tracing(&config.service.log_level, &config.service.log_format);

    if let Some(ref expected) = cli.db_user {
        config
            .verify_database_user(expected)
            .context("Database identity check failed")?;
    }

    info!(service = %config.service.name, "Starting photoapp");

    let app = PhotoApp::connect(&config)
        .await
        .context("Failed to initialize store clients")?;

    match cli.command {
        Commands::Ping => print_json(&app.ping().await),
        Commands::Users => print_json(&app.users().await.context("Failed to list users")?),
        Commands::Images { user } => {
            print_json(&app.images(user).await.context("Failed to list images")?)
        }
        Commands::Upload { userid, file } => {
            let assetid = app
                .upload(userid, &file)
                .await
                .with_context(|| format!("Failed to upload {}", file.display()))?;
            print_json(&serde_json::json!({ "assetid": assetid }))
        }
        Commands::Download { assetid, dest } => {
            let path = app
                .download(assetid, dest.as_deref())
                .await
                .with_context(|| format!("Failed to download asset {}", assetid))?;
            print_json(&serde_json::json!({ "assetid": assetid, "path": path }))
        }
        Commands::Labels { assetid } => print_json(
            &app.image_labels(assetid)
                .await
                .with_context(|| format!("Failed to read labels of asset {}", assetid))?,
        ),
        Commands::Search { label } => print_json(
            &app.images_with_label(&label)
                .await
                .context("Failed to search labels")?,
        ),
        Commands::DeleteAll => {
            print_json(&app.delete_all().await.context("Failed to delete assets")?)
        }
    }
}

/// Initialize tracing/logging on stderr so stdout carries only results
fn init_tracing(log_level: &str, log_format: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    if log_format == "pretty" {
        registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render output")?;
    println!("{}", rendered);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_upload() {
        let cli = Cli::try_parse_from(["photoapp", "upload", "80001", "degu.jpg"]).unwrap();
        match cli.command {
            Commands::Upload { userid, file } => {
                assert_eq!(userid, 80001);
                assert_eq!(file, PathBuf::from("degu.jpg"));
            }
            _ => panic!("expected upload"),
        }
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let cli = Cli::try_parse_from([
            "photoapp",
            "images",
            "--user",
            "80002",
            "--config",
            "photoapp.toml",
            "--db-user",
            "photoapp-read-write",
        ])
        .unwrap();

        assert!(matches!(cli.command, Commands::Images { user: Some(80002) }));
        assert_eq!(cli.config, Some(PathBuf::from("photoapp.toml")));
        assert_eq!(cli.db_user.as_deref(), Some("photoapp-read-write"));
    }

    #[test]
    fn test_download_destination_is_optional() {
        let cli = Cli::try_parse_from(["photoapp", "download", "1001"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Download {
                assetid: 1001,
                dest: None
            }
        ));
    }
}
