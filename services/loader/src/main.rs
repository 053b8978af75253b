//! Loader - pushes payroll spreadsheets to the API from the command line
//!
//! Thin operator tool for bulk backfills without the admin frontend: reads a
//! local .xlsx file, uploads it as multipart to the matching import endpoint
//! and prints the per-row outcome report.
//!
//! Usage:
//!   cargo run --bin loader -- --kind users --file plantilla.xlsx
//!   cargo run --bin loader -- --kind payslips --file boletas_marzo.xlsx

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(name = "loader", about = "Uploads payroll spreadsheets to the API")]
struct Args {
    /// Path to the .xlsx file to upload
    #[arg(long)]
    file: String,

    /// Import kind: users, work-details or payslips
    #[arg(long)]
    kind: String,

    /// API base URL (defaults to API_URL env var or localhost)
    #[arg(long)]
    api_url: Option<String>,

    /// Bearer token of an admin session (defaults to API_TOKEN env var)
    #[arg(long)]
    token: Option<String>,
}

/// The API's uniform envelope, as far as the loader cares.
#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    messages: Vec<String>,
    #[serde(default)]
    data: Option<ImportData>,
}

#[derive(Debug, Deserialize)]
struct ImportData {
    #[serde(default)]
    messages: Vec<String>,
    #[serde(default)]
    created_count: u32,
    #[serde(default)]
    updated_count: u32,
    #[serde(default)]
    skipped_count: u32,
}

fn endpoint_for(kind: &str) -> Option<&'static str> {
    match kind {
        "users" => Some("/profiles/upload-users"),
        "work-details" => Some("/profiles/upload-work-details"),
        "payslips" => Some("/payslips/upload-payslips"),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let api_url = args
        .api_url
        .or_else(|| std::env::var("API_URL").ok())
        .unwrap_or_else(|| "http://127.0.0.1:8080".to_string());
    let token = args
        .token
        .or_else(|| std::env::var("API_TOKEN").ok())
        .context("No token given (--token or API_TOKEN env var)")?;

    let Some(endpoint) = endpoint_for(&args.kind) else {
        bail!("Unknown kind '{}'. Expected users, work-details or payslips.", args.kind);
    };

    let filename = args
        .file
        .rsplit('/')
        .next()
        .unwrap_or(&args.file)
        .to_string();

    println!("=== Payroll Loader ===");
    println!("File: {}", args.file);
    println!("Kind: {} -> {}", args.kind, endpoint);

    let bytes = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file))?;
    println!("Size: {} bytes", bytes.len());

    let part = reqwest::multipart::Part::bytes(bytes)
        .file_name(filename)
        .mime_str("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet")?;
    let form = reqwest::multipart::Form::new().part("file", part);

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}{}", api_url, endpoint))
        .bearer_auth(&token)
        .multipart(form)
        .send()
        .await
        .context("Upload request failed")?;

    let http_status = response.status();
    let envelope: Envelope = response
        .json()
        .await
        .context("Response was not a valid API envelope")?;

    for message in &envelope.messages {
        println!("{}", message);
    }

    if let Some(data) = &envelope.data {
        println!();
        for message in &data.messages {
            println!("  {}", message);
        }
        println!(
            "\nCreated: {}  Updated: {}  Skipped: {}",
            data.created_count, data.updated_count, data.skipped_count
        );
    }

    if envelope.status != "success" {
        bail!("Import rejected ({})", http_status);
    }

    Ok(())
}
