use clap::{Parser, Subcommand};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use parchment_core::auth::{AuthService, EnvSecretSource, SecretProvider, TokenRegistry, EXPECTED_AUDIENCE};
use parchment_core::config::DocConfig;
use parchment_core::housekeeper::Housekeeper;
use parchment_core::registry::{FragmentRegistry, StyleRegistry, TemplateRegistry};
use parchment_core::storage::Storage;

#[derive(Parser)]
#[command(name = "parchment", version, about = "Parchment admin CLI — tokens, housekeeping, and registry maintenance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Env var holding the JWT signing secret
    #[arg(long, global = true, default_value = "GOFR_DOC_AUTH_SECRET")]
    secret_env_var: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage bearer tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
    /// Run a housekeeper sweep immediately
    Housekeep {
        /// Override the configured storage threshold, in megabytes
        #[arg(long)]
        max_mb: Option<u64>,
    },
    /// Re-run the template/fragment/style registry load, migrating any
    /// remaining flat-layout directories into the group-partitioned layout
    Migrate,
}

#[derive(Subcommand)]
enum TokenCommands {
    /// Mint a new token for a group
    New {
        /// Group the token authenticates as
        group: String,
        /// Token lifetime in hours
        #[arg(long, default_value_t = 1)]
        hours: i64,
    },
    /// List issued tokens, optionally filtered by group
    List {
        #[arg(long)]
        group: Option<String>,
    },
    /// Revoke a token
    Revoke {
        token: String,
    },
}

fn mint_jwt(secret: &[u8], group: &str, hours: i64) -> anyhow::Result<String> {
    let now = chrono::Utc::now();
    let claims = serde_json::json!({
        "group": group,
        "aud": EXPECTED_AUDIENCE,
        "iat": now.timestamp(),
        "exp": (now + chrono::Duration::hours(hours)).timestamp(),
    });
    Ok(encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret))?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let config = DocConfig::load();

    match cli.command {
        Commands::Token { command } => {
            let secrets = SecretProvider::new(std::sync::Arc::new(EnvSecretSource::new(&cli.secret_env_var)));
            let registry = TokenRegistry::new(config.auth_dir());
            match command {
                TokenCommands::New { group, hours } => {
                    let secret = secrets.current_secret().await?;
                    let jwt = mint_jwt(&secret, &group, hours)?;
                    let record = registry.create(jwt.clone(), group, std::time::Duration::from_secs((hours.max(0) as u64) * 3600)).await?;
                    println!("token:      {jwt}");
                    println!("group:      {}", record.group);
                    println!("expires_at: {}", record.expires_at);
                }
                TokenCommands::List { group } => {
                    for record in registry.list(group.as_deref()).await? {
                        println!(
                            "{} group={} issued_at={} expires_at={} revoked={}",
                            record.token, record.group, record.issued_at, record.expires_at, record.revoked
                        );
                    }
                }
                TokenCommands::Revoke { token } => {
                    registry.revoke(&token).await?;
                    println!("revoked");
                }
            }
        }
        Commands::Housekeep { max_mb } => {
            let mut config = config;
            if let Some(max_mb) = max_mb {
                config.max_storage_mb = max_mb;
            }
            let storage = Storage::new(config.storage_dir());
            let housekeeper = Housekeeper::new(&config);
            match housekeeper.run_once(&storage).await? {
                Some(report) => {
                    println!("size_before: {} bytes", report.size_before);
                    println!("size_after:  {} bytes", report.size_after);
                    println!("deleted:     {}", report.deleted.len());
                    println!("target_met:  {}", report.target_met);
                }
                None => println!("lock held by another sweep, skipped"),
            }
        }
        Commands::Migrate => {
            TemplateRegistry::load(&config.templates_dir).await?;
            FragmentRegistry::load(&config.fragments_dir).await?;
            StyleRegistry::load(&config.styles_dir).await?;
            println!("registry load complete, any flat-layout directories were migrated to group 'public'");
        }
    }

    Ok(())
}
