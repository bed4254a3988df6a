//! Identity provider administration CLI
//!
//! Drives the OAuth flow coordinator directly, without an HTTP layer. Useful
//! for operators and for smoke-testing a deployment against its Redis store.
//!
//! ## Usage Examples
//!
//! ```bash
//! # Generate a client record to add to CLIENTS_FILE
//! idp-admin register --name "Reports" --redirect-uri https://app/cb \
//!   --scope "read write" --grant-type client_credentials
//!
//! # Issue a code for a consenting user, then exchange it
//! idp-admin authorize --client-id app1 --subject u1 --redirect-uri https://app/cb
//! idp-admin token --grant-type authorization_code --client-id app1 \
//!   --client-secret s3cret --code <code> --redirect-uri https://app/cb
//!
//! idp-admin introspect --token <token>
//! idp-admin revoke --token <token>
//! ```
//!
//! With `STORAGE_BACKEND=memory` state lives only for one invocation, so
//! codes and revocations do not carry over between commands.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error (configuration, storage connection, I/O)
//! - 2: OAuth error; the error object is printed to stdout

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use idp_core::clock::{Clock, SystemClock};
use idp_core::config::Config;
use idp_core::errors::OAuthError;
use idp_core::oauth::{
    ClientRegistry, GrantRequest, GrantType, MemoryClientRegistry, OAuthErrorResponse,
    OAuthFlowCoordinator, RegistryScopeValidator, hash_client_secret, parse_scope,
};
use idp_core::storage::{StorageBackend, create_storage_backend, spawn_sweeper};
use serde::Serialize;
use serde_json::json;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::prelude::*;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(
    name = "idp-admin",
    about = "Identity provider administration CLI",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Output format
    #[arg(long, value_enum, default_value = "json")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Json,
    JsonPretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Issue an authorization code for an approved request
    Authorize(AuthorizeArgs),
    /// Run a token request (any grant type)
    Token(TokenArgs),
    /// Report whether a token is active
    Introspect(TokenOnlyArgs),
    /// Revoke an access or refresh token
    Revoke(TokenOnlyArgs),
    /// Print the stored form of a client secret
    HashSecret(HashSecretArgs),
    /// Generate a new client record with fresh credentials
    Register(RegisterArgs),
}

#[derive(Args)]
struct AuthorizeArgs {
    #[arg(long)]
    client_id: String,
    #[arg(long)]
    subject: String,
    #[arg(long)]
    redirect_uri: String,
    /// Space-delimited; defaults to everything the client is allowed
    #[arg(long)]
    scope: Option<String>,
}

#[derive(Args)]
struct TokenArgs {
    #[arg(long)]
    grant_type: String,
    #[arg(long, env = "IDP_CLIENT_ID")]
    client_id: String,
    #[arg(long, env = "IDP_CLIENT_SECRET")]
    client_secret: String,
    #[arg(long)]
    code: Option<String>,
    #[arg(long)]
    redirect_uri: Option<String>,
    #[arg(long)]
    refresh_token: Option<String>,
    #[arg(long)]
    scope: Option<String>,
}

#[derive(Args)]
struct TokenOnlyArgs {
    #[arg(long)]
    token: String,
}

#[derive(Args)]
struct HashSecretArgs {
    #[arg(long, env = "IDP_CLIENT_SECRET")]
    secret: String,
}

#[derive(Args)]
struct RegisterArgs {
    #[arg(long)]
    name: Option<String>,
    #[arg(long = "redirect-uri")]
    redirect_uris: Vec<String>,
    #[arg(long, default_value = "")]
    scope: String,
    #[arg(long = "grant-type", value_parser = parse_grant_type)]
    grant_types: Vec<GrantType>,
}

fn parse_grant_type(value: &str) -> Result<GrantType, String> {
    value.parse().map_err(|e: OAuthError| e.to_string())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "idp_core=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match run(&cli).await {
        Ok(Outcome::Done) => {}
        Ok(Outcome::Rejected) => process::exit(2),
        Err(e) => {
            tracing::error!(error = ?e, "command failed");
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

enum Outcome {
    Done,
    Rejected,
}

async fn run(cli: &Cli) -> Result<Outcome> {
    match &cli.command {
        Commands::HashSecret(args) => {
            print(
                &cli.format,
                &json!({ "client_secret_hash": hash_client_secret(&args.secret) }),
            )?;
            Ok(Outcome::Done)
        }
        Commands::Register(args) => {
            let registry = MemoryClientRegistry::new();
            let grant_types = if args.grant_types.is_empty() {
                vec![GrantType::AuthorizationCode, GrantType::RefreshToken]
            } else {
                args.grant_types.clone()
            };
            let (client, secret) = registry.register(
                args.name.clone(),
                args.redirect_uris.clone(),
                parse_scope(&args.scope),
                grant_types,
            )?;
            print(
                &cli.format,
                &json!({ "client": client, "client_secret": secret }),
            )?;
            Ok(Outcome::Done)
        }
        command => {
            let config = Config::new()?;
            tracing::debug!(version = %config.version, "configuration loaded");

            let token = CancellationToken::new();
            let (coordinator, sweeper) = build_coordinator(&config, token.clone()).await?;
            let outcome = run_flow(cli, command, &coordinator).await;

            token.cancel();
            if let Some(sweeper) = sweeper {
                sweeper.await?;
            }
            outcome
        }
    }
}

async fn build_coordinator(
    config: &Config,
    token: CancellationToken,
) -> Result<(OAuthFlowCoordinator, Option<tokio::task::JoinHandle<()>>)> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let registry = match &config.clients_file {
        Some(path) => MemoryClientRegistry::from_json_file(path).await?,
        None => {
            tracing::warn!("CLIENTS_FILE not set, no clients are registered");
            MemoryClientRegistry::new()
        }
    };
    let registry: Arc<dyn ClientRegistry> = Arc::new(registry);
    let scopes = Arc::new(RegistryScopeValidator::new(registry.clone()));

    let store = create_storage_backend(
        config.storage_backend.clone(),
        clock.clone(),
        *config.storage_timeout.as_ref(),
    )?;
    let sweeper = match config.storage_backend {
        StorageBackend::Memory => Some(spawn_sweeper(store.clone(), SWEEP_INTERVAL, token)),
        #[cfg(feature = "redis")]
        StorageBackend::Redis(_) => None,
    };

    let issuer = config.build_token_issuer(clock)?;
    Ok((
        OAuthFlowCoordinator::with_store(registry, scopes, issuer, store),
        sweeper,
    ))
}

async fn run_flow(
    cli: &Cli,
    command: &Commands,
    coordinator: &OAuthFlowCoordinator,
) -> Result<Outcome> {
    let result = match command {
        Commands::Authorize(args) => coordinator
            .authorize(
                &args.client_id,
                &args.subject,
                &args.redirect_uri,
                args.scope.as_deref(),
            )
            .await
            .map(|code| json!({ "code": code })),
        Commands::Token(args) => {
            let request = GrantRequest {
                grant_type: Some(args.grant_type.clone()),
                client_id: Some(args.client_id.clone()),
                client_secret: Some(args.client_secret.clone()),
                code: args.code.clone(),
                redirect_uri: args.redirect_uri.clone(),
                refresh_token: args.refresh_token.clone(),
                scope: args.scope.clone(),
            };
            coordinator
                .handle(request)
                .await
                .and_then(|response| to_value(&response))
        }
        Commands::Introspect(args) => to_value(&coordinator.introspect(&args.token).await),
        Commands::Revoke(args) => coordinator
            .revoke(&args.token)
            .await
            .map(|()| json!({ "revoked": true })),
        Commands::HashSecret(_) | Commands::Register(_) => {
            anyhow::bail!("command does not use the flow coordinator")
        }
    };

    match result {
        Ok(value) => {
            print(&cli.format, &value)?;
            Ok(Outcome::Done)
        }
        Err(e) => {
            print(&cli.format, &OAuthErrorResponse::from(&e))?;
            Ok(Outcome::Rejected)
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value, OAuthError> {
    serde_json::to_value(value).map_err(|e| OAuthError::ServerError(e.to_string()))
}

fn print<T: Serialize>(format: &OutputFormat, value: &T) -> Result<()> {
    let output = match format {
        OutputFormat::Json => serde_json::to_string(value)?,
        OutputFormat::JsonPretty => serde_json::to_string_pretty(value)?,
    };
    println!("{}", output);
    Ok(())
}
