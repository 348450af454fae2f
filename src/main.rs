use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use va_core::config::VaConfig;
use va_core::dns::HickoryResolver;
use va_core::keyauth::{Jwk, key_authorization};
use va_core::types::{Challenge, ChallengeType, Identifier};
use va_core::ValidationAuthority;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML config file (overlaid with VA_-prefixed env vars)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs one challenge validation against a live identifier and prints the verdict.
    Validate(ValidateArgs),
    /// Runs only the CAA check against a live identifier.
    CheckCaa(CheckCaaArgs),
}

#[derive(clap::Args, Debug)]
struct ValidateArgs {
    /// DNS identifier to validate, e.g. example.com or *.example.com
    identifier: String,

    /// Challenge type to run
    #[arg(long, value_enum, default_value = "http01")]
    challenge_type: ChallengeTypeArg,

    /// ACME account ID (used for CAA accounturi matching)
    #[arg(long, default_value = "test-account")]
    account_id: String,
}

#[derive(clap::Args, Debug)]
struct CheckCaaArgs {
    /// DNS identifier to check CAA policy for
    identifier: String,

    #[arg(long, default_value = "test-account")]
    account_id: String,

    #[arg(long, default_value = "http-01")]
    challenge_type: String,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum ChallengeTypeArg {
    Http01,
    Dns01,
    TlsAlpn01,
}

impl From<ChallengeTypeArg> for ChallengeType {
    fn from(value: ChallengeTypeArg) -> Self {
        match value {
            ChallengeTypeArg::Http01 => ChallengeType::Http01,
            ChallengeTypeArg::Dns01 => ChallengeType::Dns01,
            ChallengeTypeArg::TlsAlpn01 => ChallengeType::TlsAlpn01,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = VaConfig::load(cli.config.as_deref())?;
    let resolver: Arc<dyn va_core::dns::Resolver> =
        Arc::new(HickoryResolver::new(std::time::Duration::from_secs(5)));
    let va = ValidationAuthority::new(resolver, config);

    match cli.command {
        Command::Validate(args) => run_validate(&va, &args).await,
        Command::CheckCaa(args) => run_check_caa(&va, &args).await,
    }
}

async fn run_validate(va: &ValidationAuthority, args: &ValidateArgs) -> anyhow::Result<()> {
    info!(identifier = %args.identifier, "starting validation");

    let identifier = Identifier::dns(args.identifier.clone());
    let mut challenge = Challenge::new(args.challenge_type.into(), va_core::keyauth::generate_token());
    let jwk = Jwk {
        kty: "EC".to_string(),
        crv: "P-256".to_string(),
        x: "smoke-test-x".to_string(),
        y: "smoke-test-y".to_string(),
    };
    challenge.provided_key_authorization = Some(key_authorization(&challenge.token, &jwk));

    let (records, problem) = va
        .perform_validation(&identifier, &args.account_id, &challenge)
        .await;

    for record in &records {
        info!(?record, "validation record");
    }

    match problem {
        None => {
            println!("valid");
            Ok(())
        }
        Some(problem) => {
            error!(kind = ?problem.kind, detail = %problem.detail, "validation failed");
            println!("invalid: {problem}");
            std::process::exit(1);
        }
    }
}

async fn run_check_caa(va: &ValidationAuthority, args: &CheckCaaArgs) -> anyhow::Result<()> {
    let identifier = Identifier::dns(args.identifier.clone());
    match va
        .is_caa_valid(&identifier, &args.account_id, &args.challenge_type)
        .await
    {
        Ok(()) => {
            println!("caa: valid");
            Ok(())
        }
        Err(problem) => {
            error!(kind = ?problem.kind, detail = %problem.detail, "caa check failed");
            println!("caa: invalid: {problem}");
            std::process::exit(1);
        }
    }
}
