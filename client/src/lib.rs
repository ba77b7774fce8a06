pub mod admin;
pub mod bet_slip;
pub mod catalog;
pub mod controller;
pub mod services;
pub mod session;

pub use admin::AdminConsole;
pub use bet_slip::{BetSlip, PlacedBet, Selection};
pub use catalog::{CatalogGateway, Lobby, Sportsbook};
pub use controller::{SessionContext, SessionController, SessionSnapshot};
pub use services::{CatalogFeed, RapidApiFeed, StaticFeed};
pub use session::{SessionManager, Subscription};
