use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

mod commands;

#[derive(Parser)]
#[command(name = "sfr")]
#[command(about = "Storefront payment reconciliation operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> overlay...)
        #[arg(required = true)]
        paths: Vec<String>,

        /// Exit non-zero when the config has keys the service never reads.
        #[arg(long, default_value_t = false)]
        strict: bool,
    },

    /// Notification outbox
    Outbox {
        #[command(subcommand)]
        cmd: OutboxCmd,
    },

    /// Refund operations (admin)
    Refund {
        #[command(subcommand)]
        cmd: RefundCmd,
    },

    /// Order inspection
    Order {
        #[command(subcommand)]
        cmd: OrderCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    /// Apply embedded SQL migrations.
    Migrate,
}

#[derive(Subcommand)]
enum OutboxCmd {
    /// Deliver pending notifications now.
    Drain {
        /// Layered config paths in merge order (defaults to SFR_CONFIG_PATHS)
        #[arg(long = "config")]
        config_paths: Vec<String>,

        /// Stop after this many batches.
        #[arg(long, default_value_t = 50)]
        max_batches: usize,
    },
}

#[derive(Subcommand)]
enum RefundCmd {
    /// Re-submit a refund that ended `failed`.
    Retry {
        #[arg(long)]
        order_id: String,

        /// Admin user id recorded as the actor.
        #[arg(long)]
        admin_id: String,

        #[arg(long = "config")]
        config_paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum OrderCmd {
    /// Print order state, recent payment logs and status history.
    Show {
        #[arg(long)]
        reference: String,

        /// Print a single JSON document instead of key=value lines.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = sfr_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = sfr_db::status(&pool).await?;
                    println!(
                        "db_ok={} has_orders_table={} pending_notifications={}",
                        s.ok, s.has_orders_table, s.pending_notifications
                    );
                }
                DbCmd::Migrate => {
                    sfr_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths, strict } => commands::config_hash(&paths, strict)?,

        Commands::Outbox { cmd } => match cmd {
            OutboxCmd::Drain {
                config_paths,
                max_batches,
            } => commands::outbox::drain(&config_paths, max_batches).await?,
        },

        Commands::Refund { cmd } => match cmd {
            RefundCmd::Retry {
                order_id,
                admin_id,
                config_paths,
            } => {
                let order_id = Uuid::parse_str(&order_id).context("invalid order_id uuid")?;
                let admin_id = Uuid::parse_str(&admin_id).context("invalid admin_id uuid")?;
                commands::order::refund_retry(&config_paths, order_id, admin_id).await?;
            }
        },

        Commands::Order { cmd } => match cmd {
            OrderCmd::Show { reference, json } => commands::order::show(&reference, json).await?,
        },
    }

    Ok(())
}

/// Logs go to stderr; stdout carries the command output.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();
}
