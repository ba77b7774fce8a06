use crate::store::Store;
use async_trait::async_trait;
use gobet_common::error::StoreError;
use gobet_common::{Account, NewProfile, Role, StoredProfile, TransactionRecord};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

pub type Responder<T> = oneshot::Sender<Result<T, StoreError>>;

pub enum DatabaseRequest {
    GetProfile {
        user_id: String,
        responder: Responder<Option<StoredProfile>>,
    },
    ListProfiles {
        role: Role,
        responder: Responder<Vec<StoredProfile>>,
    },
    InsertProfile {
        profile: NewProfile,
        responder: Responder<StoredProfile>,
    },
    DeleteProfile {
        user_id: String,
        responder: Responder<()>,
    },
    InsertAccount {
        user_id: String,
        balance: u64,
        responder: Responder<Account>,
    },
    GetAccount {
        user_id: String,
        responder: Responder<Option<Account>>,
    },
    CompareAndSetBalance {
        user_id: String,
        expected: u64,
        new: u64,
        responder: Responder<Option<u64>>,
    },
    InsertTransaction {
        record: TransactionRecord,
        responder: Responder<()>,
    },
    ListTransactions {
        user_id: String,
        responder: Responder<Vec<TransactionRecord>>,
    },
}

/// Owns the store and answers requests one at a time, in arrival order.
pub struct DatabaseManager<S: Store> {
    store: S,
    work_queue: mpsc::Receiver<DatabaseRequest>,
}

impl<S: Store> DatabaseManager<S> {
    pub fn new(store: S, work_queue: mpsc::Receiver<DatabaseRequest>) -> Self {
        Self { store, work_queue }
    }

    /// Runs the manager on its own task and returns a handle to talk to it.
    pub fn spawn(store: S, capacity: usize) -> (DatabaseHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity);
        let mut manager = Self::new(store, rx);
        let task = tokio::spawn(async move {
            manager.manage().await;
        });
        (DatabaseHandle::new(tx), task)
    }

    pub async fn manage(&mut self) {
        while let Some(request) = self.work_queue.recv().await {
            // a dropped receiver only means the caller gave up waiting
            match request {
                DatabaseRequest::GetProfile { user_id, responder } => {
                    let _ = responder.send(self.store.get_profile(&user_id).await);
                }
                DatabaseRequest::ListProfiles { role, responder } => {
                    let _ = responder.send(self.store.list_profiles(role).await);
                }
                DatabaseRequest::InsertProfile { profile, responder } => {
                    let _ = responder.send(self.store.insert_profile(&profile).await);
                }
                DatabaseRequest::DeleteProfile { user_id, responder } => {
                    let _ = responder.send(self.store.delete_profile(&user_id).await);
                }
                DatabaseRequest::InsertAccount {
                    user_id,
                    balance,
                    responder,
                } => {
                    let _ = responder.send(self.store.insert_account(&user_id, balance).await);
                }
                DatabaseRequest::GetAccount { user_id, responder } => {
                    let _ = responder.send(self.store.get_account(&user_id).await);
                }
                DatabaseRequest::CompareAndSetBalance {
                    user_id,
                    expected,
                    new,
                    responder,
                } => {
                    let resp = self
                        .store
                        .compare_and_set_balance(&user_id, expected, new)
                        .await;
                    let _ = responder.send(resp);
                }
                DatabaseRequest::InsertTransaction { record, responder } => {
                    let _ = responder.send(self.store.insert_transaction(&record).await);
                }
                DatabaseRequest::ListTransactions { user_id, responder } => {
                    let _ = responder.send(self.store.list_transactions(&user_id).await);
                }
            }
        }
        debug!("database manager queue closed");
    }
}

/// Cloneable sender side of a [`DatabaseManager`]; usable anywhere a [`Store`] is.
#[derive(Clone)]
pub struct DatabaseHandle {
    requester: mpsc::Sender<DatabaseRequest>,
}

impl DatabaseHandle {
    pub fn new(requester: mpsc::Sender<DatabaseRequest>) -> Self {
        Self { requester }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Responder<T>) -> DatabaseRequest,
    ) -> Result<T, StoreError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.requester
            .send(build(resp_tx))
            .await
            .map_err(|_| StoreError::Unavailable)?;
        resp_rx.await.map_err(|_| StoreError::Unavailable)?
    }
}

#[async_trait]
impl Store for DatabaseHandle {
    async fn get_profile(&self, user_id: &str) -> Result<Option<StoredProfile>, StoreError> {
        let user_id = user_id.to_string();
        self.request(|responder| DatabaseRequest::GetProfile { user_id, responder })
            .await
    }

    async fn list_profiles(&self, role: Role) -> Result<Vec<StoredProfile>, StoreError> {
        self.request(|responder| DatabaseRequest::ListProfiles { role, responder })
            .await
    }

    async fn insert_profile(&self, profile: &NewProfile) -> Result<StoredProfile, StoreError> {
        let profile = profile.clone();
        self.request(|responder| DatabaseRequest::InsertProfile { profile, responder })
            .await
    }

    async fn delete_profile(&self, user_id: &str) -> Result<(), StoreError> {
        let user_id = user_id.to_string();
        self.request(|responder| DatabaseRequest::DeleteProfile { user_id, responder })
            .await
    }

    async fn insert_account(&self, user_id: &str, balance: u64) -> Result<Account, StoreError> {
        let user_id = user_id.to_string();
        self.request(|responder| DatabaseRequest::InsertAccount {
            user_id,
            balance,
            responder,
        })
        .await
    }

    async fn get_account(&self, user_id: &str) -> Result<Option<Account>, StoreError> {
        let user_id = user_id.to_string();
        self.request(|responder| DatabaseRequest::GetAccount { user_id, responder })
            .await
    }

    async fn compare_and_set_balance(
        &self,
        user_id: &str,
        expected: u64,
        new: u64,
    ) -> Result<Option<u64>, StoreError> {
        let user_id = user_id.to_string();
        self.request(|responder| DatabaseRequest::CompareAndSetBalance {
            user_id,
            expected,
            new,
            responder,
        })
        .await
    }

    async fn insert_transaction(&self, record: &TransactionRecord) -> Result<(), StoreError> {
        let record = record.clone();
        self.request(|responder| DatabaseRequest::InsertTransaction { record, responder })
            .await
    }

    async fn list_transactions(&self, user_id: &str) -> Result<Vec<TransactionRecord>, StoreError> {
        let user_id = user_id.to_string();
        self.request(|responder| DatabaseRequest::ListTransactions { user_id, responder })
            .await
    }
}
