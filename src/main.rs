use anyhow::{Context, Result};
use batchapps::config::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_RETRIES};
use batchapps::{CallError, ClientConfig, DownloadOptions, DownloadOutcome, RestClient, TokenProvider};
use clap::Parser;
use log::info;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::path::PathBuf;

/// batchapps - Batch Apps REST client
///
/// Issues authenticated calls against the Batch Apps service and downloads
/// job outputs.
///
/// If the BATCHAPPS_TOKEN environment variable is set, it is sent as a
/// bearer token.
///
/// Examples:
///   batchapps get https://host/api/jobs
///   batchapps download https://host/api/jobs/1/outputs/final --output ./out --ext .png
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Bearer token for authentication (also via BATCHAPPS_TOKEN)
    #[arg(long, env = "BATCHAPPS_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Transport retries for https requests (also via BATCHAPPS_RETRIES)
    #[arg(long, env = "BATCHAPPS_RETRIES", default_value_t = DEFAULT_MAX_RETRIES, global = true)]
    retries: usize,

    /// Extra request header, repeatable
    #[arg(short = 'H', long = "header", value_name = "NAME: VALUE", global = true)]
    headers: Vec<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// GET a URL and print the JSON reply
    Get(GetArgs),

    /// Print the size of a file
    Head(HeadArgs),

    /// POST a JSON message and print the JSON reply
    Post(PostArgs),

    /// Download a file into a directory
    Download(DownloadArgs),
}

#[derive(clap::Args, Debug)]
struct GetArgs {
    url: String,

    /// Query parameter, repeatable
    #[arg(long = "query", short = 'q', value_name = "KEY=VALUE")]
    query: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct HeadArgs {
    /// URL template containing {name}
    url: String,

    /// File name substituted for {name}
    #[arg(long)]
    name: Option<String>,
}

#[derive(clap::Args, Debug)]
struct PostArgs {
    url: String,

    /// JSON message body
    #[arg(long)]
    data: Option<String>,
}

#[derive(clap::Args, Debug)]
struct DownloadArgs {
    url: String,

    /// Directory to write into (must exist)
    #[arg(long, short = 'o', value_name = "DIR")]
    output: PathBuf,

    /// Expected size in bytes, for progress reporting
    #[arg(long)]
    size: Option<u64>,

    /// Replace an existing file
    #[arg(long)]
    overwrite: bool,

    /// File name to write instead of the one in the URL
    #[arg(long)]
    name: Option<String>,

    /// Extension added when the URL has none
    #[arg(long)]
    ext: Option<String>,

    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,
}

fn parse_headers(raw: &[String]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for entry in raw {
        let (name, value) = entry
            .split_once(':')
            .with_context(|| format!("Header {:?} is not in 'Name: value' form", entry))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .with_context(|| format!("Invalid header name in {:?}", entry))?;
        let value = HeaderValue::from_str(value.trim())
            .with_context(|| format!("Invalid header value in {:?}", entry))?;
        headers.append(name, value);
    }
    Ok(headers)
}

fn parse_query(raw: &[String]) -> Result<Vec<(&str, &str)>> {
    raw.iter()
        .map(|entry| {
            entry
                .split_once('=')
                .with_context(|| format!("Query parameter {:?} is not in KEY=VALUE form", entry))
        })
        .collect()
}

async fn run(cli: Cli) -> Result<()> {
    let headers = parse_headers(&cli.headers)?;
    let provider = TokenProvider::new(cli.token.as_deref())?;
    let config = ClientConfig::default().with_max_retries(cli.retries);

    match cli.command {
        Commands::Get(args) => {
            let query = parse_query(&args.query)?;
            let params = (!query.is_empty()).then_some(query.as_slice());
            let client = RestClient::with_config(provider, config);
            let value: serde_json::Value = client.get(&args.url, &headers, params).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::Head(args) => {
            let client = RestClient::with_config(provider, config);
            let size = client.head(&args.url, &headers, args.name.as_deref()).await?;
            println!("{}", size);
        }
        Commands::Post(args) => {
            let message: Option<serde_json::Value> = args
                .data
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .context("--data is not valid JSON")?;
            let client = RestClient::with_config(provider, config);
            let value: serde_json::Value =
                client.post(&args.url, &headers, message.as_ref()).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::Download(args) => {
            let client =
                RestClient::with_config(provider, config.with_chunk_size(args.chunk_size));
            let mut options = DownloadOptions::default().overwrite(args.overwrite);
            if let Some(name) = args.name {
                options = options.file_name(name);
            }
            if let Some(ext) = args.ext {
                options = options.extension(ext);
            }

            let outcome = client
                .download(&args.url, &headers, &args.output, args.size, &options)
                .await?;
            match outcome {
                DownloadOutcome::AlreadyExists(path) => {
                    println!("{} already exists, skipped", path.display());
                }
                DownloadOutcome::Completed {
                    path,
                    bytes_written,
                    ..
                } => {
                    println!("{} ({} bytes)", path.display(), bytes_written);
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match run(cli).await {
        Err(e) => match e.downcast_ref::<CallError>() {
            Some(call_err) if call_err.is_silent() => {
                info!("{}", call_err);
                Ok(())
            }
            _ => Err(e),
        },
        ok => ok,
    }
}
