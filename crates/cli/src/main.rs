//! LedgerGuard CLI — the main entry point.
//!
//! Commands:
//! - `init`      — Write a default config file
//! - `status`    — Show the effective configuration
//! - `doctor`    — Diagnose configuration problems
//! - `token`     — Issue or verify bearer tokens
//! - `csrf`      — Generate an anti-forgery token
//! - `sanitize`  — Run the input sanitizer on a string
//! - `encrypt` / `decrypt` — AES-256-GCM with the configured key
//! - `run`       — Start the security manager and its schedules

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "ledgerguard",
    about = "LedgerGuard — security manager for multi-tenant accounting services",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the effective configuration (secrets redacted)
    Status,

    /// Diagnose configuration problems
    Doctor,

    /// Issue or verify bearer tokens
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },

    /// Generate an anti-forgery token
    Csrf {
        /// Bind the token to this session id
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Sanitize a string and report what was detected
    Sanitize {
        /// The untrusted input
        input: String,
    },

    /// Encrypt a UTF-8 string with the configured key
    Encrypt {
        plaintext: String,
    },

    /// Decrypt base64 ciphertext, iv and tag with the configured key
    Decrypt {
        #[arg(long)]
        ciphertext: String,
        #[arg(long)]
        iv: String,
        #[arg(long)]
        tag: String,
    },

    /// Start the security manager and its background schedules
    Run,
}

#[derive(Subcommand)]
enum TokenAction {
    /// Issue an access/refresh pair
    Issue {
        /// Claims as key=value (values parsed as JSON when possible)
        #[arg(short, long = "claim")]
        claims: Vec<String>,
    },

    /// Verify a token and print its claims
    Verify {
        token: String,

        /// Expected token type
        #[arg(short = 't', long = "type", default_value = "access")]
        token_type: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Init { force } => commands::init::run(force).await?,
        Commands::Status => commands::status::run().await?,
        Commands::Doctor => commands::doctor::run().await?,
        Commands::Token { action } => match action {
            TokenAction::Issue { claims } => commands::token::issue(claims).await?,
            TokenAction::Verify { token, token_type } => {
                commands::token::verify(token, token_type).await?
            }
        },
        Commands::Csrf { session } => commands::csrf::run(session).await?,
        Commands::Sanitize { input } => commands::sanitize::run(input).await?,
        Commands::Encrypt { plaintext } => commands::crypto::encrypt(plaintext).await?,
        Commands::Decrypt { ciphertext, iv, tag } => {
            commands::crypto::decrypt(ciphertext, iv, tag).await?
        }
        Commands::Run => commands::run::run().await?,
    }

    Ok(())
}
