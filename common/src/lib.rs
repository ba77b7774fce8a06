use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod catalog;
pub mod config;
pub mod error;

pub use catalog::{Game, GameCategory, Market, Outcome, SportEvent};

pub type UserId = String;

/// An identity as the identity provider knows it, before any profile lookup.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Principal {
    pub id: UserId,
    pub identifier: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Session {
    pub principal: Principal,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub enum SessionEvent {
    SignedIn(Session),
    SignedOut,
    TokenRefreshed(Session),
}

impl SessionEvent {
    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionEvent::SignedIn(session) | SessionEvent::TokenRefreshed(session) => Some(session),
            SessionEvent::SignedOut => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Admin,
}

/// The domain profile joined with its account balance.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub role: Role,
    pub balance: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Account {
    pub id: String,
    pub user_id: UserId,
    pub balance: u64,
}

/// A profile row as the store returns it; `account` is absent when no
/// account row exists for the profile.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct StoredProfile {
    pub id: UserId,
    pub username: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub account: Option<Account>,
}

impl From<StoredProfile> for User {
    fn from(profile: StoredProfile) -> Self {
        User {
            id: profile.id,
            username: profile.username,
            role: profile.role,
            // a missing account reads as an empty one
            balance: profile.account.map(|account| account.balance).unwrap_or(0),
            created_at: profile.created_at,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct NewProfile {
    pub id: UserId,
    pub username: String,
    pub role: Role,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Deposit,
    Withdraw,
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionKind::Deposit => write!(f, "deposit"),
            TransactionKind::Withdraw => write!(f, "withdraw"),
        }
    }
}

/// Append-only audit entry for a balance mutation. `amount` is always the magnitude.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct TransactionRecord {
    pub account_id: String,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub amount: u64,
    pub admin_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

/// What the current session is allowed to do, decided once per session change.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct Capabilities {
    pub can_view_admin: bool,
    pub can_manage_accounts: bool,
    pub can_wager: bool,
}

impl Capabilities {
    pub fn for_user(user: Option<&User>) -> Self {
        match user {
            None => Self::default(),
            Some(user) => {
                let admin = user.role == Role::Admin;
                Self {
                    can_view_admin: admin,
                    can_manage_accounts: admin,
                    can_wager: true,
                }
            }
        }
    }
}

/// Usernames are turned into email-shaped login identifiers under a fixed domain.
pub fn login_identifier(username: &str, domain: &str) -> String {
    format!("{}@{}", username.trim().to_lowercase(), domain)
}
