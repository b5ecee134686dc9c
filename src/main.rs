use anyhow::Result;
use clap::Parser;
use std::path::Path;

#[derive(Parser, Debug)]
#[command(
    name = "untext",
    version,
    about = "Remove and replace text in images, and capture web pages into one tall screenshot"
)]
struct Cli {
    /// Address to serve on
    #[arg(short = 'a', long = "addr", default_value = "127.0.0.1:5000")]
    addr: String,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    untext::logging::init(cli.verbose)?;
    let settings = untext::settings::load_settings(cli.read_settings.as_deref().map(Path::new))?;
    untext::server::run_server(settings, cli.addr).await
}
