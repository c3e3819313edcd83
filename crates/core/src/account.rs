use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub type AccountId = i64;

/// A configured broker login the desk trades through.
///
/// Accounts are created by an external admin action. The desk only reads them
/// and stamps the connect/disconnect markers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    /// Broker platform identifier, used to pick a connector implementation
    pub broker: String,
    pub server: String,
    /// Login reference; credentials are resolved by the connector factory
    pub login: String,
    pub is_active: bool,
    pub is_default: bool,
    pub is_demo: bool,
    pub currency: String,
    pub initial_balance: Decimal,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_disconnected_at: Option<DateTime<Utc>>,
}

impl Account {
    /// Creates an active, non-default demo account with no connection history.
    #[must_use]
    pub fn demo(id: AccountId, login: impl Into<String>, broker: impl Into<String>) -> Self {
        let login = login.into();
        Self {
            id,
            name: format!("demo-{login}"),
            broker: broker.into(),
            server: "demo".to_string(),
            login,
            is_active: true,
            is_default: false,
            is_demo: true,
            currency: "USD".to_string(),
            initial_balance: Decimal::from(10_000),
            last_connected_at: None,
            last_disconnected_at: None,
        }
    }

    #[must_use]
    pub fn with_default(mut self, is_default: bool) -> Self {
        self.is_default = is_default;
        self
    }

    #[must_use]
    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    /// Picks the account a bot run should trade through.
    ///
    /// Resolution order: explicit id (must be active), then the active account
    /// flagged default, then the first active account by id.
    #[must_use]
    pub fn resolve_target(accounts: &[Self], explicit: Option<AccountId>) -> Option<&Self> {
        if let Some(id) = explicit {
            return accounts.iter().find(|a| a.id == id && a.is_active);
        }

        accounts
            .iter()
            .find(|a| a.is_active && a.is_default)
            .or_else(|| {
                accounts
                    .iter()
                    .filter(|a| a.is_active)
                    .min_by_key(|a| a.id)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accounts() -> Vec<Account> {
        vec![
            Account::demo(3, "3003", "paper"),
            Account::demo(1, "1001", "paper").with_active(false),
            Account::demo(2, "2002", "paper"),
        ]
    }

    #[test]
    fn explicit_account_must_be_active() {
        let accounts = accounts();
        assert_eq!(Account::resolve_target(&accounts, Some(3)).map(|a| a.id), Some(3));
        assert!(Account::resolve_target(&accounts, Some(1)).is_none());
        assert!(Account::resolve_target(&accounts, Some(99)).is_none());
    }

    #[test]
    fn default_flag_wins_over_ordering() {
        let mut accounts = accounts();
        accounts[0].is_default = true;
        assert_eq!(Account::resolve_target(&accounts, None).map(|a| a.id), Some(3));
    }

    #[test]
    fn falls_back_to_first_active() {
        let accounts = accounts();
        assert_eq!(Account::resolve_target(&accounts, None).map(|a| a.id), Some(2));
    }

    #[test]
    fn inactive_default_is_skipped() {
        let mut accounts = accounts();
        accounts[1].is_default = true;
        assert_eq!(Account::resolve_target(&accounts, None).map(|a| a.id), Some(2));
    }
}
