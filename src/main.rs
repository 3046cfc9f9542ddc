// Entrypoint for the CLI application.
// - Picks the appliance (explicit host or a subnet scan) and hands the
//   request to the workflows.
// - Every failure is printed once and turned into exit code 1.

use anyhow::Result;
use booktransfer_cli::{api::ApiClient, cli::Cli, discovery, ui};
use clap::Parser;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> ExitCode {
    // RUST_LOG=debug booktransfer  (request URLs, probe hits)
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let base_url = match cli.base_url() {
        Some(url) => url,
        None => find_server(cli.port)?,
    };
    info!(%base_url, "using appliance");

    let api = ApiClient::new(base_url)?;
    ui::run(&api, &cli.request(), &mut ui::TerminalPrompter)
}

fn find_server(port: u16) -> Result<String> {
    println!("No host given, scanning the local network...");
    let found = discovery::discover(port)?;
    let (first, rest) = discovery::select(&found)?;
    println!("Found server at {}", first);
    if !rest.is_empty() {
        let others: Vec<String> = rest.iter().map(|ip| ip.to_string()).collect();
        println!("Other servers: {}", others.join(", "));
    }
    Ok(format!("http://{}:{}", first, port))
}
