//! Single-selection bet slip. Placing a bet is simulated against the
//! session's balance and never reaches the balance engine.

use crate::controller::SessionContext;
use gobet_common::error::WagerError;
use gobet_common::{Market, Outcome, SportEvent};
use tracing::info;

pub const DEFAULT_STAKE: u64 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub event_id: String,
    pub market_name: String,
    pub outcome_name: String,
    pub odds: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedBet {
    pub selection: Selection,
    pub stake: u64,
    pub potential_return: f64,
    pub balance_after: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BetSlip {
    selection: Option<Selection>,
    stake: u64,
}

impl Default for BetSlip {
    fn default() -> Self {
        Self {
            selection: None,
            stake: DEFAULT_STAKE,
        }
    }
}

impl BetSlip {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any earlier selection.
    pub fn select(
        &mut self,
        event: &SportEvent,
        market: &Market,
        outcome: &Outcome,
    ) -> Result<&Selection, WagerError> {
        if outcome.value.is_nan() || outcome.value < 1.0 {
            return Err(WagerError::InvalidOdds(outcome.value));
        }
        Ok(&*self.selection.insert(Selection {
            event_id: event.id.clone(),
            market_name: market.name.clone(),
            outcome_name: outcome.name.clone(),
            odds: outcome.value,
        }))
    }

    /// Not validated until submit.
    pub fn set_stake(&mut self, stake: u64) {
        self.stake = stake;
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn stake(&self) -> u64 {
        self.stake
    }

    pub fn potential_return(&self) -> Option<f64> {
        self.selection
            .as_ref()
            .map(|selection| self.stake as f64 * selection.odds)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Debits the stake from the displayed balance and empties the slip.
    /// On error the slip and the balance are left as they were.
    pub fn submit(&mut self, session: &SessionContext) -> Result<PlacedBet, WagerError> {
        let snapshot = session.snapshot();
        let user = match &snapshot.user {
            Some(user) if snapshot.capabilities.can_wager => user,
            _ => return Err(WagerError::NotSignedIn),
        };
        let selection = self.selection.clone().ok_or(WagerError::NoSelection)?;
        if self.stake == 0 {
            return Err(WagerError::InvalidStake);
        }
        if self.stake > user.balance {
            return Err(WagerError::InsufficientBalance {
                balance: user.balance,
                stake: self.stake,
            });
        }

        let balance_after = user.balance - self.stake;
        session.update_balance(&user.id, balance_after);

        let placed = PlacedBet {
            potential_return: self.stake as f64 * selection.odds,
            stake: self.stake,
            selection,
            balance_after,
        };
        info!(
            user_id = %user.id,
            event_id = %placed.selection.event_id,
            outcome = %placed.selection.outcome_name,
            stake = placed.stake,
            "bet placed"
        );
        self.clear();
        Ok(placed)
    }
}
