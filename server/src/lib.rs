pub mod balance_manager;
pub mod database;
pub mod database_manager;
pub mod identity;
pub mod profile_resolver;
pub mod store;

pub use balance_manager::{BalanceHandle, BalanceManager, TransactionRequest};
pub use database::DatabaseConnection;
pub use database_manager::{DatabaseHandle, DatabaseManager};
pub use identity::{IdentityProvider, MemoryIdentityProvider};
pub use profile_resolver::ProfileResolver;
pub use store::{MemoryStore, Store};
