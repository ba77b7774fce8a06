use crate::store::Store;
use chrono::Utc;
use gobet_common::error::BalanceError;
use gobet_common::{TransactionKind, TransactionRecord, UserId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How many times a write is retried when the balance moved between read and write.
const MAX_WRITE_ATTEMPTS: usize = 5;

pub type Responder<T> = oneshot::Sender<Result<T, BalanceError>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub user_id: UserId,
    pub amount: u64,
    pub kind: TransactionKind,
    /// Actor who authorised the change, recorded in the audit entry.
    pub admin_id: Option<UserId>,
    /// Balance the caller was looking at; withdrawals above it are refused up front.
    pub observed_balance: Option<u64>,
}

impl TransactionRequest {
    pub fn new(user_id: impl Into<UserId>, amount: u64, kind: TransactionKind) -> Self {
        Self {
            user_id: user_id.into(),
            amount,
            kind,
            admin_id: None,
            observed_balance: None,
        }
    }

    pub fn authorised_by(mut self, admin_id: impl Into<UserId>) -> Self {
        self.admin_id = Some(admin_id.into());
        self
    }

    pub fn observed(mut self, balance: u64) -> Self {
        self.observed_balance = Some(balance);
        self
    }
}

pub enum BalanceRequest {
    Apply {
        request: TransactionRequest,
        responder: Responder<u64>,
    },
}

pub struct BalanceManager<S: Store> {
    store: S,
}

//NOTE: nothing in here may panic, a failed request must leave the account untouched
impl<S: Store> BalanceManager<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Runs the manager on its own task, fed by the returned handle.
    pub fn spawn(store: S, capacity: usize) -> (BalanceHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(capacity);
        let manager = Self::new(store);
        let task = tokio::spawn(async move {
            manager.manage(&mut rx).await;
        });
        (BalanceHandle { requester: tx }, task)
    }

    pub async fn manage(&self, work_queue: &mut mpsc::Receiver<BalanceRequest>) {
        while let Some(request) = work_queue.recv().await {
            match request {
                BalanceRequest::Apply { request, responder } => {
                    // we do not care if the receiver has already disappeared
                    responder.send(self.apply(request).await).ok();
                }
            }
        }
    }

    /// Applies a deposit or withdrawal and returns the balance as persisted.
    pub async fn apply(&self, request: TransactionRequest) -> Result<u64, BalanceError> {
        let TransactionRequest {
            user_id,
            amount,
            kind,
            admin_id,
            observed_balance,
        } = request;

        if amount == 0 {
            return Err(BalanceError::InvalidAmount);
        }
        if let (TransactionKind::Withdraw, Some(observed)) = (kind, observed_balance) {
            if amount > observed {
                return Err(BalanceError::InsufficientFunds {
                    balance: observed,
                    requested: amount,
                });
            }
        }

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let account = self
                .store
                .get_account(&user_id)
                .await?
                .ok_or_else(|| BalanceError::AccountNotFound(user_id.clone()))?;

            let new_balance = match kind {
                TransactionKind::Deposit => account
                    .balance
                    .checked_add(amount)
                    .ok_or(BalanceError::Overflow)?,
                TransactionKind::Withdraw => account.balance.checked_sub(amount).ok_or(
                    BalanceError::InsufficientFunds {
                        balance: account.balance,
                        requested: amount,
                    },
                )?,
            };

            let Some(persisted) = self
                .store
                .compare_and_set_balance(&user_id, account.balance, new_balance)
                .await?
            else {
                debug!(%user_id, attempt, "balance changed before write, re-reading");
                continue;
            };

            info!(%user_id, %kind, amount, balance = persisted, "balance updated");

            let record = TransactionRecord {
                account_id: account.id,
                user_id: user_id.clone(),
                kind,
                amount,
                admin_id,
                created_at: Utc::now(),
            };
            if let Err(e) = self.store.insert_transaction(&record).await {
                warn!(%user_id, %kind, amount, error = %e, "failed to log transaction");
            }

            return Ok(persisted);
        }

        Err(BalanceError::Contention(user_id))
    }
}

#[derive(Clone)]
pub struct BalanceHandle {
    requester: mpsc::Sender<BalanceRequest>,
}

impl BalanceHandle {
    pub async fn apply(&self, request: TransactionRequest) -> Result<u64, BalanceError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.requester
            .send(BalanceRequest::Apply {
                request,
                responder: resp_tx,
            })
            .await
            .map_err(|_| gobet_common::error::StoreError::Unavailable)?;
        resp_rx
            .await
            .map_err(|_| gobet_common::error::StoreError::Unavailable)?
    }

    pub async fn deposit(&self, user_id: &str, amount: u64) -> Result<u64, BalanceError> {
        self.apply(TransactionRequest::new(user_id, amount, TransactionKind::Deposit))
            .await
    }

    pub async fn withdraw(&self, user_id: &str, amount: u64) -> Result<u64, BalanceError> {
        self.apply(TransactionRequest::new(user_id, amount, TransactionKind::Withdraw))
            .await
    }
}
