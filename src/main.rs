use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reqwest::Method;

use amocrm_connect::cli;
use amocrm_connect::connection::AuthMode;

#[derive(Parser)]
#[command(name = "amocrm", version, about = "Authorize against and call an amoCRM account API")]
struct Cli {
    /// Config file (defaults: $AMOCRM_CONFIG, ./config/amocrm.json, ~/.amocrm/amocrm.json)
    #[arg(long, global = true)]
    config: Option<String>,

    /// File the access token is loaded from and stored to
    #[arg(long, global = true, env = "AMOCRM_TOKEN_FILE")]
    token_file: Option<PathBuf>,

    /// Print errors as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the OAuth authorize URL
    #[command(name = "auth-url")]
    AuthUrl {
        /// Consent screen mode: popup or redirect
        #[arg(long, default_value = "popup")]
        mode: AuthMode,

        /// Opaque state echoed back to the redirect URI
        #[arg(long)]
        state: Option<String>,
    },

    /// Authorize interactively through the configured callback listener
    Login {
        /// Consent screen mode: popup or redirect
        #[arg(long, default_value = "popup")]
        mode: AuthMode,

        /// Only print the URL, do not open a browser
        #[arg(long)]
        no_browser: bool,
    },

    /// GET an API path; parameters go to the query string
    Get {
        /// API path, e.g. /api/v4/leads
        path: String,

        /// Query parameters as key=value or key:value
        params: Vec<String>,
    },

    /// POST JSON to an API path
    Post {
        /// API path, e.g. /api/v4/leads
        path: String,

        /// JSON request body
        #[arg(long)]
        data: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("AMOCRM_LOG_LEVEL")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let opts = Cli::parse();
    let json = opts.json;

    let result = run(opts).await;
    if let Err(e) = result {
        eprintln!("{}", cli::output::format_error(&e, json));
        std::process::exit(1);
    }
}

async fn run(opts: Cli) -> Result<(), amocrm_connect::AmoError> {
    let config = opts.config.as_deref();
    let token_file = opts.token_file.as_deref();

    match opts.command {
        Commands::AuthUrl { mode, state } => cli::auth::run_auth_url(config, mode, state.as_deref()),
        Commands::Login { mode, no_browser } => {
            cli::auth::run_login(config, token_file, mode, !no_browser).await
        }
        Commands::Get { path, params } => {
            let data = amocrm_connect::args::parse_params(&params)?;
            cli::request::run_request(config, token_file, Method::GET, &path, &data).await
        }
        Commands::Post { path, data } => {
            let data = amocrm_connect::args::parse_data(data.as_deref())?;
            cli::request::run_request(config, token_file, Method::POST, &path, &data).await
        }
    }
}
