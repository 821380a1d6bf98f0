use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "mdsfid")]
#[command(about = "Drive the VUS/MDSFID authentication handshake from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./mdsfid.toml)
    #[arg(short, long, global = true, env = "MDSFID_CONFIG")]
    pub config: Option<String>,

    /// Log level when RUST_LOG is not set (overrides the config file)
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build an authorization URL for a redirect URI
    AuthorizeUrl(RedirectArgs),
    /// Check a redirect URI against the allow-list
    CheckRedirect(RedirectArgs),
    /// Mint a service token for the identity backend
    SignToken,
    /// Register a pending identity exchange and print its id_token
    CreateIdentity(CreateIdentityArgs),
    /// Resolve an id_token into a citizen identity
    ResolveIdentity(ResolveIdentityArgs),
}

#[derive(clap::Args)]
pub struct RedirectArgs {
    /// Callback URI the provider should redirect to
    #[arg(short, long)]
    pub redirect_uri: String,
}

#[derive(clap::Args)]
pub struct CreateIdentityArgs {
    /// JSON document with run_ciudadano and dv_ciudadano
    #[arg(long)]
    pub id_user: String,
    /// Provider client id (defaults to handshake.client_id)
    #[arg(long)]
    pub client_id: Option<String>,
    /// Callback URI registered with the exchange
    #[arg(short, long)]
    pub redirect_uri: String,
}

#[derive(clap::Args)]
pub struct ResolveIdentityArgs {
    /// id_token received on the provider callback
    #[arg(long)]
    pub id_token: String,
    /// Print the full backend payload as well
    #[arg(long)]
    pub raw: bool,
}
