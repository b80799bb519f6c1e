use crate::account::{ServerAccount, SharedAccount};
use crate::backup::EncodedAccount;
use crate::error::{Error, Result};
use crate::locks::AccountLocks;
use crate::storage::Backend;
use crate::util::pasteurise_username;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The in-memory backend. Accounts live as encoded records in a shared map;
/// nothing survives the process. This is the default backend for tests.
#[derive(Default, Clone)]
pub struct Memory {
    data: Arc<Mutex<HashMap<String, EncodedAccount>>>,
    locks: Arc<AccountLocks>,
}

impl Backend for Memory {
    async fn fetch(&self, names: Vec<String>) -> Result<Vec<SharedAccount>> {
        let uids = self.locks.lock(&names).await;
        let data = self.data.lock().await;
        if let Some(missing) = uids.iter().find(|uid| !data.contains_key(uid.as_str())) {
            let missing = missing.clone();
            drop(data);
            self.locks.unlock(&uids).await;
            return Err(Error::ServerNotFound(missing));
        }
        let mut accounts = Vec::with_capacity(uids.len());
        for uid in &uids {
            if let Some(encoded) = data.get(uid) {
                accounts.push(SharedAccount::new(ServerAccount::from_encoded(encoded)));
            }
        }
        Ok(accounts)
    }

    async fn release(&self, accounts: Vec<SharedAccount>, save: bool) -> Result<()> {
        if save {
            let mut data = self.data.lock().await;
            for account in &accounts {
                let guard = account.lock().await;
                if guard.is_modified() {
                    data.insert(guard.uid().to_string(), guard.encode());
                }
            }
        }
        let uids: Vec<String> = accounts.iter().map(|a| a.uid().to_string()).collect();
        self.locks.unlock(&uids).await;
        Ok(())
    }

    async fn create(&self, name: &str) -> Result<SharedAccount> {
        let (name, _) = pasteurise_username(name);
        let uids = self.locks.lock(&[&name]).await;
        let data = self.data.lock().await;
        if data.contains_key(&uids[0]) {
            drop(data);
            let uid = uids[0].clone();
            self.locks.unlock(&uids).await;
            return Err(Error::ServerExists(uid));
        }
        Ok(SharedAccount::new(ServerAccount::new(&name)))
    }

    async fn list(&self) -> Vec<String> {
        self.data.lock().await.keys().cloned().collect()
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let uids = self.locks.lock(&[name]).await;
        let existed = self.data.lock().await.remove(&uids[0]).is_some();
        self.locks.unlock(&uids).await;
        Ok(existed)
    }
}
