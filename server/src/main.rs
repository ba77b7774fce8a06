use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gobet_common::config::Config;
use gobet_common::{Principal, TransactionKind};
use gobet_server::{
    BalanceManager, DatabaseConnection, DatabaseManager, ProfileResolver, Store, TransactionRequest,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "GoBet account administration", long_about = None)]
struct Args {
    /// TOML config file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply the schema and provision the administrator profile
    Bootstrap {
        /// Principal id the identity provider issued to the administrator
        #[arg(long)]
        admin_id: String,
    },
    /// List regular users with their balances
    Users,
    Deposit {
        user_id: String,
        amount: u64,
        #[arg(long)]
        actor: Option<String>,
    },
    Withdraw {
        user_id: String,
        amount: u64,
        #[arg(long)]
        actor: Option<String>,
    },
    /// Show the audit log for a user
    History { user_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("failed to load {path}"))?,
        None => Config::default(),
    };

    if config.database.is_ephemeral() {
        warn!(
            endpoint = %config.database.endpoint,
            "in-memory database, nothing written by this command outlives it; pass --config with a ws:// endpoint"
        );
    }

    let database = DatabaseConnection::connect(&config.database)
        .await
        .context("failed to connect to database")?;
    let (db, db_task) = DatabaseManager::spawn(database, 32);

    match args.command {
        Command::Bootstrap { admin_id } => {
            let resolver = ProfileResolver::new(db.clone(), config.provisioning.clone());
            let principal = Principal {
                id: admin_id,
                identifier: config.provisioning.admin_identifier.clone(),
            };
            let admin = resolver.resolve_or_provision(&principal).await?;
            info!(user_id = %admin.id, username = %admin.username, balance = admin.balance, "administrator ready");
        }
        Command::Users => {
            let resolver = ProfileResolver::new(db.clone(), config.provisioning.clone());
            for user in resolver.list_users().await? {
                println!("{}\t{}\t{} TN", user.id, user.username, user.balance);
            }
        }
        Command::Deposit {
            user_id,
            amount,
            actor,
        } => adjust(&db, user_id, amount, TransactionKind::Deposit, actor).await?,
        Command::Withdraw {
            user_id,
            amount,
            actor,
        } => adjust(&db, user_id, amount, TransactionKind::Withdraw, actor).await?,
        Command::History { user_id } => {
            for record in db.list_transactions(&user_id).await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    record.created_at.to_rfc3339(),
                    record.kind,
                    record.amount,
                    record.admin_id.as_deref().unwrap_or("-")
                );
            }
        }
    }

    drop(db);
    db_task.await.context("database manager panicked")?;
    Ok(())
}

async fn adjust<S: Store + Clone>(
    db: &S,
    user_id: String,
    amount: u64,
    kind: TransactionKind,
    actor: Option<String>,
) -> Result<()> {
    let manager = BalanceManager::new(db.clone());
    let mut request = TransactionRequest::new(user_id.clone(), amount, kind);
    request.admin_id = actor;
    let balance = manager
        .apply(request)
        .await
        .with_context(|| format!("{kind} of {amount} TN for {user_id} failed"))?;
    println!("{user_id}\t{balance} TN");
    Ok(())
}
