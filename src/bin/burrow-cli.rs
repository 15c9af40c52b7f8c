use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "burrow-cli")]
#[command(about = "Management CLI for the burrow admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8081")]
    url: String,

    #[arg(short, long, env = "BURROW_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server status
    Status,
    /// Show blocklist, rate limiter, cache and generation statistics
    Stats,
    /// Ban an address (or "tor" for the shared Tor bucket)
    Ban {
        ip: String,
        /// Ban length in seconds; defaults to the server's rate_limit.ban_secs
        #[arg(short, long)]
        duration: Option<u64>,
    },
    /// Lift a ban
    Unban { ip: String },
    /// Re-fetch every blocklist source now
    Refresh,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let request = match cli.command {
        Commands::Status => client.get(format!("{base}/admin/status")),
        Commands::Stats => client.get(format!("{base}/admin/stats")),
        Commands::Ban { ip, duration } => client
            .post(format!("{base}/admin/bans/{ip}"))
            .json(&serde_json::json!({ "duration_secs": duration })),
        Commands::Unban { ip } => client.delete(format!("{base}/admin/bans/{ip}")),
        Commands::Refresh => client.post(format!("{base}/admin/blocklist/refresh")),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: admin API returned status {status}");
        if !text.is_empty() {
            eprintln!("Response: {text}");
        }
        std::process::exit(1);
    }
    if text.is_empty() {
        println!("{status}");
        return Ok(());
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{text}"),
    }
    Ok(())
}
