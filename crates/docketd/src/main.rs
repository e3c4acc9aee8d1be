use clap::{Parser, Subcommand};
use dk_config::ServerConfig;
use dk_quota::Role;

#[derive(Parser)]
#[command(
    name = "docketd",
    version = docketd::DAEMON_VERSION,
    about = "Docket legal assistant backend"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server in the foreground
    Run {
        /// Port to bind to (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the effective configuration
    Config,
    /// Mint a development user token
    Token {
        /// User id placed in the `sub` claim
        #[arg(long)]
        user: String,
        /// Role claim (FREE, PLUS, PRO, LAWYER, ADMIN)
        #[arg(long, default_value = "FREE")]
        role: String,
        /// Lifetime in seconds; 0 for no expiry
        #[arg(long, default_value_t = 86_400)]
        ttl: u64,
    },
    /// Print version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "docketd=info,dk_api=info,dk_quota=info,dk_llm=info,tower_http=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { port } => {
            let mut config = ServerConfig::load()?;
            if let Some(port) = port {
                config.port = port;
            }
            config.validate()?;

            println!("Docket backend running...");
            println!();
            println!("  API:      http://{}", config.bind_addr());
            println!("  Frontend: {}", config.frontend_url);
            println!();

            docketd::serve(config).await
        }

        Commands::Config => {
            let config = ServerConfig::load()?;
            let paths = config.paths()?;
            println!("# {}", paths.config_path().display());
            print!("{}", config.to_toml()?);
            Ok(())
        }

        Commands::Token { user, role, ttl } => {
            let config = ServerConfig::load()?;
            let parsed = Role::from_claim(&role);
            if parsed.as_str() != role.trim().to_ascii_uppercase() {
                tracing::warn!("Unknown role {:?}, minting a {} token", role, parsed);
            }
            let token = docketd::mint_token(
                &config,
                &user,
                parsed,
                ttl,
                chrono::Utc::now().timestamp(),
            )?;
            println!("{}", token);
            Ok(())
        }

        Commands::Version => {
            println!("docketd {}", docketd::DAEMON_VERSION);
            Ok(())
        }
    }
}
