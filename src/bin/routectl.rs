use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "routectl")]
#[command(about = "Management CLI for route-sync", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:9180")]
    url: String,

    /// Bearer token for the control-plane API. Omit when auth is disabled.
    #[arg(short, long)]
    key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or replace a route under KEY
    Put {
        /// Store key, e.g. /routes/a
        key: String,
        /// Request path the route matches
        #[arg(long)]
        uri: String,
        /// Upstream base URL
        #[arg(long)]
        upstream: String,
    },
    /// Delete the route under KEY
    Delete { key: String },
    /// Show the stored record under KEY
    Get { key: String },
    /// Check node status
    Status,
    /// Show reconciler progress
    Sync,
    /// List the routing table
    Routes,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    if let Some(key) = &cli.key {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", key))?,
        );
    }

    let base = cli.url.trim_end_matches('/');
    let key_url = |key: &str| format!("{}/keys/{}", base, key.trim_start_matches('/'));

    let request = match cli.command {
        Commands::Put { key, uri, upstream } => client
            .put(key_url(&key))
            .json(&json!({ "uri": uri, "upstream": upstream })),
        Commands::Delete { key } => client.delete(key_url(&key)),
        Commands::Get { key } => client.get(key_url(&key)),
        Commands::Status => client.get(format!("{}/admin/status", base)),
        Commands::Sync => client.get(format!("{}/admin/sync", base)),
        Commands::Routes => client.get(format!("{}/admin/routes", base)),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: control-plane API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
