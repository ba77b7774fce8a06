use crate::store::Store;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gobet_common::config::DatabaseConfig;
use gobet_common::error::StoreError;
use gobet_common::{Account, NewProfile, Role, StoredProfile, TransactionRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use surrealdb::engine::any::{self, Any};
use surrealdb::opt::auth::Root;
use surrealdb::sql::{Id, Thing};
use surrealdb::{Connection, Surreal};
use tracing::{debug, info};

const PROFILE: &str = "profile";
const ACCOUNT: &str = "account";
const TRANSACTION_LOG: &str = "transaction_log";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Record {
    #[allow(dead_code)]
    pub id: Thing,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DbProfile {
    pub id: Thing,
    pub username: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Debug)]
struct ProfileContent<'a> {
    username: &'a str,
    role: Role,
    created_at: DateTime<Utc>,
}

impl DbProfile {
    fn joined(self, account: Option<Account>) -> StoredProfile {
        StoredProfile {
            id: self.id.id.to_raw(),
            username: self.username,
            role: self.role,
            created_at: self.created_at,
            account,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DbAccount {
    pub id: Thing,
    pub user_id: String,
    pub balance: u64,
}

#[derive(Serialize, Debug)]
struct AccountContent<'a> {
    user_id: &'a str,
    balance: u64,
}

impl From<DbAccount> for Account {
    fn from(value: DbAccount) -> Self {
        Account {
            id: value.id.id.to_raw(),
            user_id: value.user_id,
            balance: value.balance,
        }
    }
}

fn account_thing(user_id: &str) -> Thing {
    Thing {
        tb: ACCOUNT.into(),
        id: Id::String(user_id.into()),
    }
}

/// Maps a SurrealDB result into the store taxonomy.
pub fn transform_err<T>(result: surrealdb::Result<T>) -> Result<T, StoreError> {
    result.map_err(|e| {
        let message = e.to_string();
        if message.contains("already exists") || message.contains("already contains") {
            StoreError::Conflict(message)
        } else {
            StoreError::Backend(message)
        }
    })
}

pub struct DatabaseConnection<C: Connection> {
    connection: Surreal<C>,
}

impl DatabaseConnection<Any> {
    /// Connects to `mem://` or a remote endpoint and applies the schema.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let db = transform_err(any::connect(config.endpoint.as_str()).await)?;

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            transform_err(
                db.signin(Root {
                    username: username.as_str(),
                    password: password.as_str(),
                })
                .await,
            )?;
        }

        transform_err(
            db.use_ns(config.namespace.as_str())
                .use_db(config.database.as_str())
                .await,
        )?;
        info!(endpoint = %config.endpoint, namespace = %config.namespace, database = %config.database, "connected to database");

        let connection = Self::new(db);
        connection.ensure_schema().await?;
        Ok(connection)
    }
}

impl<C: Connection> DatabaseConnection<C> {
    pub fn new(connection: Surreal<C>) -> Self {
        Self { connection }
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let response = transform_err(
            self.connection
                .query("DEFINE INDEX profile_username ON TABLE profile COLUMNS username UNIQUE;")
                .query("DEFINE INDEX account_user ON TABLE account COLUMNS user_id UNIQUE;")
                .await,
        )?;
        transform_err(response.check())?;
        Ok(())
    }

    async fn select_profile(&self, user_id: &str) -> Result<Option<DbProfile>, StoreError> {
        transform_err(self.connection.select((PROFILE, user_id)).await)
    }

    async fn select_account(&self, user_id: &str) -> Result<Option<DbAccount>, StoreError> {
        transform_err(self.connection.select((ACCOUNT, user_id)).await)
    }
}

#[async_trait]
impl<C: Connection> Store for DatabaseConnection<C> {
    async fn get_profile(&self, user_id: &str) -> Result<Option<StoredProfile>, StoreError> {
        let Some(profile) = self.select_profile(user_id).await? else {
            return Ok(None);
        };
        let account = self.select_account(user_id).await?.map(Account::from);
        Ok(Some(profile.joined(account)))
    }

    async fn list_profiles(&self, role: Role) -> Result<Vec<StoredProfile>, StoreError> {
        let mut response = transform_err(
            self.connection
                .query("SELECT * FROM profile WHERE role = $role ORDER BY username ASC;")
                .bind(("role", role))
                .await,
        )?;
        let profiles: Vec<DbProfile> = transform_err(response.take(0))?;
        let accounts: Vec<DbAccount> = transform_err(self.connection.select(ACCOUNT).await)?;
        let mut accounts: HashMap<String, Account> = accounts
            .into_iter()
            .map(|account| (account.user_id.clone(), account.into()))
            .collect();

        Ok(profiles
            .into_iter()
            .map(|profile| {
                let account = accounts.remove(&profile.id.id.to_raw());
                profile.joined(account)
            })
            .collect())
    }

    async fn insert_profile(&self, profile: &NewProfile) -> Result<StoredProfile, StoreError> {
        let created: Option<DbProfile> = transform_err(
            self.connection
                .create((PROFILE, profile.id.as_str()))
                .content(ProfileContent {
                    username: &profile.username,
                    role: profile.role,
                    created_at: Utc::now(),
                })
                .await,
        )?;
        let created =
            created.ok_or_else(|| StoreError::Backend("profile insert returned nothing".into()))?;
        debug!(user_id = %profile.id, username = %profile.username, "profile inserted");
        let account = self.select_account(&profile.id).await?.map(Account::from);
        Ok(created.joined(account))
    }

    async fn delete_profile(&self, user_id: &str) -> Result<(), StoreError> {
        let _: Option<DbProfile> = transform_err(self.connection.delete((PROFILE, user_id)).await)?;
        Ok(())
    }

    async fn insert_account(&self, user_id: &str, balance: u64) -> Result<Account, StoreError> {
        let created: Option<DbAccount> = transform_err(
            self.connection
                .create((ACCOUNT, user_id))
                .content(AccountContent { user_id, balance })
                .await,
        )?;
        created
            .map(Account::from)
            .ok_or_else(|| StoreError::Backend("account insert returned nothing".into()))
    }

    async fn get_account(&self, user_id: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.select_account(user_id).await?.map(Account::from))
    }

    async fn compare_and_set_balance(
        &self,
        user_id: &str,
        expected: u64,
        new: u64,
    ) -> Result<Option<u64>, StoreError> {
        let mut response = transform_err(
            self.connection
                .query("UPDATE $account SET balance = $new WHERE balance = $expected RETURN AFTER;")
                .bind(("account", account_thing(user_id)))
                .bind(("new", new))
                .bind(("expected", expected))
                .await,
        )?;
        let updated: Vec<DbAccount> = transform_err(response.take(0))?;
        Ok(updated.into_iter().next().map(|account| account.balance))
    }

    async fn insert_transaction(&self, record: &TransactionRecord) -> Result<(), StoreError> {
        let _: Vec<Record> =
            transform_err(self.connection.create(TRANSACTION_LOG).content(record).await)?;
        Ok(())
    }

    async fn list_transactions(&self, user_id: &str) -> Result<Vec<TransactionRecord>, StoreError> {
        let mut response = transform_err(
            self.connection
                .query("SELECT * FROM transaction_log WHERE user_id = $user_id ORDER BY created_at ASC;")
                .bind(("user_id", user_id))
                .await,
        )?;
        transform_err(response.take(0))
    }
}
