use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cv_client::api::{AuthApi, CvApi, RegisterRequest};
use cv_client::upload::{check_upload, format_file_size};
use cv_client::{
    ClientConfig, FetchClient, FetchError, FileBlob, RequestOptions, ResponseBody,
    TracingNotifier,
};

/// cvctl: talk to the CV analysis backend from the terminal
#[derive(Parser, Debug)]
#[command(name = "cvctl", version)]
#[command(about = "Command-line client for the CV analysis API")]
struct Args {
    /// Retries for transient failures (overrides CV_API_RETRIES)
    #[arg(long, global = true)]
    retries: Option<u32>,

    /// Per-attempt timeout in milliseconds (overrides CV_API_TIMEOUT_MS)
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Get { path: String },
    Delete { path: String },
    Post {
        path: String,
        /// JSON body
        #[arg(long)]
        data: Option<String>,
    },
    Put {
        path: String,
        #[arg(long)]
        data: Option<String>,
    },
    Patch {
        path: String,
        #[arg(long)]
        data: Option<String>,
    },
    /// Upload a resume as multipart/form-data
    Upload {
        path: String,
        file: PathBuf,
        #[arg(long, default_value = "file")]
        field: String,
    },
    /// Upload a resume to the CV endpoint (Ctrl-C cancels)
    CvUpload { file: PathBuf },
    /// Show the ATS analysis of an uploaded CV
    CvAnalysis { id: String },
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    Logout,
    Me,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ClientConfig::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("cv_client={},cvctl={}", &config.rust_log, &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("cvctl v{} -> {}", env!("CARGO_PKG_VERSION"), config.base_url);

    let client = FetchClient::builder(config.clone())
        .notifier(Arc::new(TracingNotifier))
        .on_auth_expired(Arc::new(|| {
            eprintln!("Session expired. Run `cvctl login` to sign in again.");
        }))
        .build();

    let options = RequestOptions {
        timeout_ms: args.timeout_ms,
        retries: args.retries,
        ..RequestOptions::default()
    };

    match run(args.command, &client, &config, options).await {
        Ok(()) => Ok(()),
        Err(e) => {
            match e.downcast_ref::<FetchError>() {
                Some(fetch_error) => eprintln!("error: {}", fetch_error.user_message()),
                None => eprintln!("error: {e:#}"),
            }
            std::process::exit(1);
        }
    }
}

async fn run(
    command: Command,
    client: &FetchClient,
    config: &ClientConfig,
    options: RequestOptions,
) -> Result<()> {
    match command {
        Command::Get { path } => print_body(client.get(&path, options).await?),
        Command::Delete { path } => print_body(client.delete(&path, options).await?),
        Command::Post { path, data } => {
            print_body(client.post(&path, &parse_data(data)?, options).await?)
        }
        Command::Put { path, data } => {
            print_body(client.put(&path, &parse_data(data)?, options).await?)
        }
        Command::Patch { path, data } => {
            print_body(client.patch(&path, &parse_data(data)?, options).await?)
        }
        Command::Upload { path, file, field } => {
            let blob = read_upload(&file, config).await?;
            let upload_options = cv_client::UploadOptions {
                request: options.with_method(cv_client::Method::Post),
                ..cv_client::UploadOptions::default()
            }
            .with_field_name(field)
            .with_progress(Arc::new(print_progress));

            print_body(client.upload(&path, blob, upload_options).await?)
        }
        Command::CvUpload { file } => {
            let blob = read_upload(&file, config).await?;
            let cv = CvApi::new(client.clone());
            let interrupt = tokio::spawn({
                let cv = cv.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        cv.cancel();
                    }
                }
            });
            let receipt = cv.upload_resume(blob, Some(Arc::new(print_progress))).await;
            interrupt.abort();
            println!("{}", serde_json::to_string_pretty(&receipt?)?);
            Ok(())
        }
        Command::CvAnalysis { id } => {
            let analysis = CvApi::new(client.clone()).analysis(&id).await?;
            println!("{}", serde_json::to_string_pretty(&analysis)?);
            Ok(())
        }
        Command::Login { email, password } => {
            let session = AuthApi::new(client.clone()).login(&email, &password).await?;
            println!("{}", serde_json::to_string_pretty(&session.user)?);
            Ok(())
        }
        Command::Register {
            name,
            email,
            password,
        } => {
            let request = RegisterRequest {
                name,
                email,
                password,
                role: None,
            };
            let session = AuthApi::new(client.clone()).register(&request).await?;
            println!("{}", serde_json::to_string_pretty(&session.user)?);
            Ok(())
        }
        Command::Logout => {
            AuthApi::new(client.clone()).logout().await?;
            println!("Logged out");
            Ok(())
        }
        Command::Me => {
            let me = AuthApi::new(client.clone()).me().await?;
            println!("{}", serde_json::to_string_pretty(&me)?);
            Ok(())
        }
    }
}

async fn read_upload(file: &Path, config: &ClientConfig) -> Result<FileBlob> {
    let blob = FileBlob::from_path(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    // Size and type are the caller's call, not the client's.
    if let Err(rejection) = check_upload(&blob, config.max_upload_bytes) {
        bail!("{}: {rejection}", file.display());
    }
    info!("Uploading {} ({})", blob.name, format_file_size(blob.len() as u64));
    Ok(blob)
}

fn print_progress(fraction: f64) {
    eprint!("\r{:>3.0}%", fraction * 100.0);
    if fraction >= 1.0 {
        eprintln!();
    }
}

fn parse_data(data: Option<String>) -> Result<Value> {
    match data {
        Some(raw) => serde_json::from_str(&raw).context("--data must be valid JSON"),
        None => Ok(Value::Object(Default::default())),
    }
}

fn print_body(body: ResponseBody) -> Result<()> {
    match body {
        ResponseBody::Json(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        ResponseBody::Text(text) => println!("{text}"),
        ResponseBody::Empty => {}
    }
    Ok(())
}
