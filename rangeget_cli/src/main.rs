use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use rangeget_core::downloader::http_downloader::HttpDownloader;
use rangeget_core::downloader::strategy::ranged_download_strategy::RangedDownloadStrategy;
use rangeget_core::downloader::verifier::verify_digest;
use rangeget_core::types::types::{AuthenticationInfo, DownloadError, DEFAULT_CHUNK_COUNT};

mod output_name;
mod terminal_observer;

use output_name::output_name_from_url;
use terminal_observer::TerminalProgressObserver;

#[derive(Parser)]
#[command(name = "rangeget", about = "Download a file over parallel HTTP range requests")]
struct Args {
    /// URL of the file to download
    #[arg(short, long)]
    url: String,

    /// Output file path (default: last path segment of the URL)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of byte ranges fetched concurrently
    #[arg(short = 'n', long, default_value_t = DEFAULT_CHUNK_COUNT)]
    chunks: usize,

    /// Extra request header, "Name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Basic auth credentials, "user:password"
    #[arg(long)]
    user: Option<String>,

    /// Expected SHA-256 of the downloaded file
    #[arg(long)]
    sha256: Option<String>,

    /// Print the download report as JSON
    #[arg(long)]
    json: bool,
}

fn parse_header(raw: &str) -> Option<(String, String)> {
    let (name, value) = raw.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

fn parse_credentials(raw: &str) -> AuthenticationInfo {
    let (username, password) = raw.split_once(':').unwrap_or((raw, ""));
    AuthenticationInfo {
        username: username.to_string(),
        password: password.to_string(),
    }
}

async fn run(args: Args) -> Result<(), String> {
    let output = match args.output {
        Some(path) => path,
        None => output_name_from_url(&args.url)
            .ok_or_else(|| format!("no file name in URL {}; pass --output", args.url))?,
    };

    let mut builder = RangedDownloadStrategy::builder(args.url.clone(), output.clone())
        .with_chunk_count(args.chunks);
    for raw in &args.headers {
        let (name, value) =
            parse_header(raw).ok_or_else(|| format!("malformed header {:?}, expected \"Name: value\"", raw))?;
        builder = builder.add_header(name, value);
    }
    if let Some(user) = &args.user {
        builder = builder.with_authentication(parse_credentials(user));
    }

    let strategy = Arc::new(builder.build().map_err(|e| e.to_string())?);
    let mut downloader = HttpDownloader::new(strategy);
    downloader.add_observer(Box::new(TerminalProgressObserver::new()));

    println!(
        "Downloading {} in {} chunks...",
        output.display(),
        args.chunks
    );

    let report = downloader
        .download()
        .await
        .map_err(|e| format!("Download failed: {}", e))?;

    if let Some(expected) = &args.sha256 {
        match verify_digest(&report.output_path, expected).await {
            Ok(_) => println!("Checksum verified"),
            Err(e @ DownloadError::ChecksumMismatch { .. }) => return Err(e.to_string()),
            Err(e) => return Err(format!("Checksum verification failed: {}", e)),
        }
    }

    if args.json {
        println!("{}", report.to_json().map_err(|e| e.to_string())?);
    } else {
        println!("Time to download was: {:.2}s", report.elapsed_secs);
        println!("SHA256 Checksum: {}", report.sha256);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            log::error!("{}", message);
            eprintln!("{}", message);
            ExitCode::FAILURE
        }
    }
}
