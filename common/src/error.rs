//! Error taxonomy shared by the hosted side and the session side.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid login credentials")]
    InvalidCredentials,
    #[error("login identifier already registered: {0}")]
    IdentifierTaken(String),
    #[error("no active session")]
    NoSession,
    #[error("identity provider unreachable: {0}")]
    Unreachable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record conflict: {0}")]
    Conflict(String),
    #[error("store error: {0}")]
    Backend(String),
    #[error("store unavailable")]
    Unavailable,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProfileError {
    #[error("no profile for principal {0}")]
    NotFound(String),
    #[error("profile provisioning failed: {detail}")]
    Provisioning { detail: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BalanceError {
    #[error("amount must be positive")]
    InvalidAmount,
    #[error("no account for user {0}")]
    AccountNotFound(String),
    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: u64, requested: u64 },
    #[error("balance overflow")]
    Overflow,
    #[error("balance for user {0} kept changing, gave up")]
    Contention(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamFetchError {
    #[error("feed credentials are not configured")]
    NotConfigured,
    #[error("feed request failed: {0}")]
    Http(String),
    #[error("feed answered with status {0}")]
    Status(u16),
    #[error("feed payload malformed: {0}")]
    Malformed(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WagerError {
    #[error("sign in to place a bet")]
    NotSignedIn,
    #[error("bet slip is empty")]
    NoSelection,
    #[error("stake must be positive")]
    InvalidStake,
    #[error("odds must be at least 1.0, got {0}")]
    InvalidOdds(f64),
    #[error("insufficient balance: {balance} TN available, stake {stake} TN")]
    InsufficientBalance { balance: u64, stake: u64 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdminError {
    #[error("administrator capability required")]
    Forbidden,
    #[error("username and secret must not be empty")]
    MissingCredentials,
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error(transparent)]
    Balance(#[from] BalanceError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
