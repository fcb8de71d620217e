use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use callwire_server::{build_router, config::Config, crypto, spawn_cleanup, storage::Storage, AppState};

/// Callwire Server CLI
#[derive(Parser)]
#[command(name = "callwire-server")]
#[command(about = "Presence-aware relay server for call signaling")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a user and print its first session token
    AddUser {
        /// Admin master key for authorization
        #[arg(long)]
        admin_key: String,

        /// Optional user ID (will be generated if not provided)
        #[arg(long)]
        user_id: Option<String>,

        #[arg(long)]
        display_name: Option<String>,
    },

    /// Issue a new session token for an existing user
    IssueToken {
        /// Admin master key
        #[arg(long)]
        admin_key: String,

        #[arg(long)]
        user_id: String,
    },

    /// List all registered users
    ListUsers {
        /// Admin master key
        #[arg(long)]
        admin_key: String,
    },

    /// Deactivate a user and invalidate its sessions
    DeactivateUser {
        /// Admin master key
        #[arg(long)]
        admin_key: String,

        #[arg(long)]
        user_id: String,
    },

    /// Run the server
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "callwire_server=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config).await?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::AddUser {
            admin_key,
            user_id,
            display_name,
        } => {
            add_user(&config, &admin_key, user_id, display_name).await?;
        }
        Commands::IssueToken { admin_key, user_id } => {
            issue_token(&config, &admin_key, &user_id).await?;
        }
        Commands::ListUsers { admin_key } => {
            list_users(&config, &admin_key).await?;
        }
        Commands::DeactivateUser { admin_key, user_id } => {
            deactivate_user(&config, &admin_key, &user_id).await?;
        }
        Commands::Run => {
            run_server(config).await?;
        }
    }

    Ok(())
}

async fn add_user(
    config: &Config,
    admin_key: &str,
    user_id: Option<String>,
    display_name: Option<String>,
) -> anyhow::Result<()> {
    if !config.is_admin_key(admin_key) {
        anyhow::bail!("Invalid admin key");
    }

    let storage = Storage::new(&config.storage.database_path).await?;

    let user_id = match user_id {
        Some(id) => id,
        None => crypto::generate_user_id()?,
    };
    if storage.get_user(&user_id).await?.is_some() {
        anyhow::bail!("User {} already exists", user_id);
    }

    storage.create_user(&user_id, display_name.as_deref(), None).await?;
    let (token, expires_at) = storage.create_session(&user_id, config.storage.session_ttl_hours).await?;

    println!("=== New User Registered ===");
    println!("User ID: {}", user_id);
    println!("Session Token: {}", token);
    println!("Expires At: {}", expires_at);
    println!("===========================");
    println!("The token will NOT be shown again!");

    Ok(())
}

async fn issue_token(config: &Config, admin_key: &str, user_id: &str) -> anyhow::Result<()> {
    if !config.is_admin_key(admin_key) {
        anyhow::bail!("Invalid admin key");
    }

    let storage = Storage::new(&config.storage.database_path).await?;
    match storage.get_user(user_id).await? {
        Some(user) if user.is_active => {}
        _ => anyhow::bail!("No active user {}", user_id),
    }

    let (token, expires_at) = storage.create_session(user_id, config.storage.session_ttl_hours).await?;

    println!("User ID: {}", user_id);
    println!("Session Token: {}", token);
    println!("Expires At: {}", expires_at);

    Ok(())
}

async fn list_users(config: &Config, admin_key: &str) -> anyhow::Result<()> {
    if !config.is_admin_key(admin_key) {
        anyhow::bail!("Invalid admin key");
    }

    let storage = Storage::new(&config.storage.database_path).await?;
    let users = storage.list_users().await?;

    println!("=== Registered Users ===");
    for user in users {
        println!(
            "User ID: {} | Name: {} | Created: {} | Active: {}",
            user.user_id,
            user.display_name.as_deref().unwrap_or("-"),
            user.created_at,
            user.is_active
        );
    }

    Ok(())
}

async fn deactivate_user(config: &Config, admin_key: &str, user_id: &str) -> anyhow::Result<()> {
    if !config.is_admin_key(admin_key) {
        anyhow::bail!("Invalid admin key");
    }

    let storage = Storage::new(&config.storage.database_path).await?;
    storage.deactivate_user(user_id).await?;

    println!("User {} has been deactivated", user_id);

    Ok(())
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting Callwire Server v{}", env!("CARGO_PKG_VERSION"));

    let addr = config.bind_address();
    let cleanup_interval = config.storage.cleanup_interval_minutes;

    let state = AppState::new(config).await?;
    let _cleanup = spawn_cleanup(state.storage.clone(), cleanup_interval);
    let app = build_router(state);

    tracing::info!("Listening on {}", addr);
    let listener = TcpListener::bind(&addr).await?;

    axum::serve(listener, app).await?;

    Ok(())
}
