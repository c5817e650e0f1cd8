//! page-graph CLI
//!
//! Opens a page in Chrome, extracts the selected layers and prints the assembled graph as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use page_graph::{ChromeSession, ConnectionOptions, ExtractionOptions, HttpFetcher, LaunchOptions, PageExtractor};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "page-graph")]
#[command(version)]
#[command(about = "Extract a markup/style/script/network graph from a live page", long_about = None)]
struct Cli {
    /// Page to extract
    url: String,

    /// Seconds to wait for the initial load (0 disables the wait)
    #[arg(long, default_value = "5")]
    wait: f64,

    /// Seconds to wait after each replayed script
    #[arg(long, default_value = "3")]
    settle: f64,

    /// Launch browser in headed mode (default: headless)
    #[arg(long, short = 'H')]
    headed: bool,

    /// Path to custom browser executable
    #[arg(long, value_name = "PATH")]
    executable_path: Option<String>,

    /// WebSocket endpoint URL for remote browser connection
    #[arg(long, value_name = "URL")]
    ws_endpoint: Option<String>,

    #[arg(long)]
    no_markup: bool,

    #[arg(long)]
    no_style: bool,

    #[arg(long)]
    no_script: bool,

    #[arg(long)]
    no_network: bool,

    #[arg(long)]
    no_frames: bool,

    /// Include shadow-attached subtrees
    #[arg(long)]
    shadow_dom: bool,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let session = match &cli.ws_endpoint {
        Some(ws_url) => ChromeSession::connect(ConnectionOptions::new(ws_url.clone())),
        None => {
            let mut options = LaunchOptions::new().headless(!cli.headed);
            if let Some(path) = &cli.executable_path {
                options = options.chrome_path(path);
            }
            ChromeSession::launch(options)
        }
    }
    .context("Failed to start browser session")?;

    let options = ExtractionOptions::default()
        .with_markup(!cli.no_markup)
        .with_style(!cli.no_style)
        .with_script(!cli.no_script)
        .with_network(!cli.no_network)
        .with_frames(!cli.no_frames)
        .with_shadow_dom(cli.shadow_dom);

    let settle = Duration::try_from_secs_f64(cli.settle).context("Invalid settle interval")?;
    let mut extractor = PageExtractor::new(session, HttpFetcher::new()?).settle_interval(settle);
    extractor.set_url(cli.url.clone());
    extractor.set_wait_time(cli.wait)?;
    extractor.set_options(options)?;

    let model = extractor
        .extract()
        .with_context(|| format!("Failed to extract {}", cli.url))?;
    println!("{}", model.graph.to_json(cli.pretty)?);
    Ok(())
}
