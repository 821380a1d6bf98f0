mod cli;
mod commands;
mod observability;
mod output;

use anyhow::Result;
use clap::Parser;
use mdsfid_auth::config::loader::load_config;

use cli::{Cli, Commands};
use output::print_error;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    observability::init_tracing_with_level(level);
    tracing::debug!(config = ?cli.config, "Loaded configuration");

    match &cli.command {
        Commands::AuthorizeUrl(args) => commands::authorize_url(&config, args).await?,
        Commands::CheckRedirect(args) => commands::check_redirect(&config, args)?,
        Commands::SignToken => commands::sign_token(&config)?,
        Commands::CreateIdentity(args) => commands::create_identity(&config, args).await?,
        Commands::ResolveIdentity(args) => commands::resolve_identity(&config, args).await?,
    }

    Ok(())
}
