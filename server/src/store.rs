use async_trait::async_trait;
use chrono::Utc;
use gobet_common::error::StoreError;
use gobet_common::{Account, NewProfile, Role, StoredProfile, TransactionRecord};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

/// Operations the core needs from the profile/account/transaction store.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Profile by principal id, joined with its account when one exists.
    async fn get_profile(&self, user_id: &str) -> Result<Option<StoredProfile>, StoreError>;

    async fn list_profiles(&self, role: Role) -> Result<Vec<StoredProfile>, StoreError>;

    /// Fails with `StoreError::Conflict` when the id or username is taken.
    async fn insert_profile(&self, profile: &NewProfile) -> Result<StoredProfile, StoreError>;

    async fn delete_profile(&self, user_id: &str) -> Result<(), StoreError>;

    /// Fails with `StoreError::Conflict` when the user already has an account.
    async fn insert_account(&self, user_id: &str, balance: u64) -> Result<Account, StoreError>;

    async fn get_account(&self, user_id: &str) -> Result<Option<Account>, StoreError>;

    /// Writes `new` only if the stored balance still equals `expected`.
    /// Returns the persisted balance, or `None` when the row changed or is gone.
    async fn compare_and_set_balance(
        &self,
        user_id: &str,
        expected: u64,
        new: u64,
    ) -> Result<Option<u64>, StoreError>;

    async fn insert_transaction(&self, record: &TransactionRecord) -> Result<(), StoreError>;

    async fn list_transactions(&self, user_id: &str) -> Result<Vec<TransactionRecord>, StoreError>;
}

#[derive(Default)]
struct Tables {
    profiles: BTreeMap<String, (NewProfile, chrono::DateTime<Utc>)>,
    accounts: BTreeMap<String, Account>,
    transactions: Vec<TransactionRecord>,
}

impl Tables {
    fn joined(&self, user_id: &str) -> Option<StoredProfile> {
        self.profiles.get(user_id).map(|(profile, created_at)| StoredProfile {
            id: profile.id.clone(),
            username: profile.username.clone(),
            role: profile.role,
            created_at: *created_at,
            account: self.accounts.get(user_id).cloned(),
        })
    }
}

/// Process-local store with the same row semantics as the database.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_profile(&self, user_id: &str) -> Result<Option<StoredProfile>, StoreError> {
        Ok(self.tables.lock().await.joined(user_id))
    }

    async fn list_profiles(&self, role: Role) -> Result<Vec<StoredProfile>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .profiles
            .iter()
            .filter(|(_, (profile, _))| profile.role == role)
            .filter_map(|(id, _)| tables.joined(id))
            .collect())
    }

    async fn insert_profile(&self, profile: &NewProfile) -> Result<StoredProfile, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.profiles.contains_key(&profile.id) {
            return Err(StoreError::Conflict(format!("profile {} exists", profile.id)));
        }
        if tables
            .profiles
            .values()
            .any(|(existing, _)| existing.username == profile.username)
        {
            return Err(StoreError::Conflict(format!(
                "username {} is taken",
                profile.username
            )));
        }
        tables
            .profiles
            .insert(profile.id.clone(), (profile.clone(), Utc::now()));
        tables
            .joined(&profile.id)
            .ok_or_else(|| StoreError::Backend("profile vanished after insert".into()))
    }

    async fn delete_profile(&self, user_id: &str) -> Result<(), StoreError> {
        self.tables.lock().await.profiles.remove(user_id);
        Ok(())
    }

    async fn insert_account(&self, user_id: &str, balance: u64) -> Result<Account, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.accounts.contains_key(user_id) {
            return Err(StoreError::Conflict(format!("account for {user_id} exists")));
        }
        let account = Account {
            id: user_id.to_string(),
            user_id: user_id.to_string(),
            balance,
        };
        tables.accounts.insert(user_id.to_string(), account.clone());
        Ok(account)
    }

    async fn get_account(&self, user_id: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.tables.lock().await.accounts.get(user_id).cloned())
    }

    async fn compare_and_set_balance(
        &self,
        user_id: &str,
        expected: u64,
        new: u64,
    ) -> Result<Option<u64>, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.accounts.get_mut(user_id) {
            Some(account) if account.balance == expected => {
                account.balance = new;
                Ok(Some(account.balance))
            }
            _ => Ok(None),
        }
    }

    async fn insert_transaction(&self, record: &TransactionRecord) -> Result<(), StoreError> {
        self.tables.lock().await.transactions.push(record.clone());
        Ok(())
    }

    async fn list_transactions(&self, user_id: &str) -> Result<Vec<TransactionRecord>, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .transactions
            .iter()
            .filter(|record| record.user_id == user_id)
            .cloned()
            .collect())
    }
}
