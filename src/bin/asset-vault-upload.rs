use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::process;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Re-use the response shape from the lib
use asset_vault::api::UploadResponse;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "asset-vault-upload")]
#[command(about = "Upload a file to an asset vault server", long_about = None)]
#[command(version = VERSION)]
struct Args {
    /// Path to the file to upload
    file: String,

    /// Project alias (e.g. @notes)
    #[arg(short, long)]
    project: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "asset_vault_upload=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let path = Path::new(&args.file);

    if !path.exists() {
        tracing::error!("File '{}' does not exist", args.file);
        process::exit(1);
    }

    let url = std::env::var("ASSET_VAULT_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:3000/api/upload".to_string());

    tracing::info!("Uploading {} to {}", args.file, url);

    let client = reqwest::Client::new();
    let file = match tokio::fs::read(path).await {
        Ok(f) => f,
        Err(e) => {
            tracing::error!("Error reading file: {}", e);
            process::exit(1);
        }
    };

    let file_name = path.file_name().unwrap().to_string_lossy().into_owned();
    let part = reqwest::multipart::Part::bytes(file).file_name(file_name);

    let form = reqwest::multipart::Form::new()
        .text("project", args.project.clone())
        .part("file", part);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .expect("static spinner template is valid"),
    );
    spinner.set_message("Uploading...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    match client.post(url).multipart(form).send().await {
        Ok(response) => {
            spinner.finish_and_clear();
            if response.status().is_success() {
                match response.json::<UploadResponse>().await {
                    Ok(asset) => {
                        println!("\n{}", "✓ Asset uploaded successfully".green().bold());
                        println!();
                        println!("  {}  {}", "Project:".cyan().bold(), args.project);
                        println!("  {}  {}", "URL:".cyan().bold(), asset.url);
                        println!(
                            "  {}  {} bytes",
                            "Size:".cyan().bold(),
                            asset.bytes.to_string().yellow()
                        );
                        println!("  {}  {}", "MIME:".cyan().bold(), asset.mime);
                        println!("  {}  {}", "SHA256:".cyan().bold(), asset.hash.bright_black());
                        println!();
                    }
                    Err(e) => {
                        tracing::warn!("Successfully uploaded but failed to parse response: {}", e);
                    }
                }
            } else {
                tracing::error!("Upload failed with status: {}", response.status());
                match response.text().await {
                    Ok(body) => tracing::error!("Error: {}", body),
                    Err(e) => tracing::error!("Error reading response: {}", e),
                }
                process::exit(1);
            }
        }
        Err(e) => {
            spinner.finish_and_clear();
            tracing::error!("Error uploading file: {}", e);
            process::exit(1);
        }
    }
}
