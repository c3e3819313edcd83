use crate::account::{Account, AccountId};
use crate::traits::AccountStore;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Account store held in process memory, for tests and embedded setups.
#[derive(Default)]
pub struct InMemoryAccountStore {
    accounts: RwLock<BTreeMap<AccountId, Account>>,
}

impl InMemoryAccountStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        Self {
            accounts: RwLock::new(accounts.into_iter().map(|a| (a.id, a)).collect()),
        }
    }

    pub async fn upsert(&self, account: Account) {
        self.accounts.write().await.insert(account.id, account);
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn get(&self, id: AccountId) -> Result<Option<Account>> {
        Ok(self.accounts.read().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Account>> {
        Ok(self.accounts.read().await.values().cloned().collect())
    }

    async fn record_connected(&self, id: AccountId, at: DateTime<Utc>) -> Result<()> {
        if let Some(account) = self.accounts.write().await.get_mut(&id) {
            account.last_connected_at = Some(at);
        }
        Ok(())
    }

    async fn record_disconnected(&self, id: AccountId, at: DateTime<Utc>) -> Result<()> {
        if let Some(account) = self.accounts.write().await.get_mut(&id) {
            account.last_disconnected_at = Some(at);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_in_id_order_and_stamps_markers() {
        let store = InMemoryAccountStore::with_accounts([
            Account::demo(2, "b", "paper"),
            Account::demo(1, "a", "paper"),
        ]);

        let ids: Vec<_> = store.list().await.unwrap().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![1, 2]);

        let now = Utc::now();
        store.record_connected(1, now).await.unwrap();
        store.record_disconnected(2, now).await.unwrap();

        assert_eq!(store.get(1).await.unwrap().unwrap().last_connected_at, Some(now));
        assert_eq!(store.get(2).await.unwrap().unwrap().last_disconnected_at, Some(now));
        assert!(store.get(3).await.unwrap().is_none());
    }
}
