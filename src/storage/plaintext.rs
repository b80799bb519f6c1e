use crate::account::{ServerAccount, SharedAccount};
use crate::backup::{self, EncodedAccount};
use crate::error::{Error, Result};
use crate::locks::AccountLocks;
use crate::storage::Backend;
use crate::util::pasteurise_username;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A whole-database JSON file backend: the file holds the same array of
/// encoded accounts the backup format uses and is rewritten atomically
/// (temp file + rename) whenever a modified account is released.
#[derive(Clone)]
pub struct Plaintext {
    data: Arc<Mutex<HashMap<String, EncodedAccount>>>,
    location: PathBuf,
    locks: Arc<AccountLocks>,
}

impl Plaintext {
    /// Opens (or creates) the database at `location`, loading any existing
    /// file through the regular restore path.
    pub async fn open(location: impl Into<PathBuf>) -> Result<Self> {
        let location = location.into();
        let db = Plaintext {
            data: Arc::default(),
            location,
            locks: Arc::default(),
        };
        match fs::read(&db.location) {
            Ok(raw) => {
                let encoded: Vec<EncodedAccount> = serde_json::from_slice(&raw)?;
                backup::restore(&db, encoded).await?;
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => return Err(error.into()),
        }
        Ok(db)
    }

    fn save(&self, data: &HashMap<String, EncodedAccount>) -> Result<()> {
        let encoded: Vec<&EncodedAccount> = data.values().collect();
        let raw = serde_json::to_vec(&encoded)?;
        let temp = self.location.with_extension("tmp");
        fs::write(&temp, raw)?;
        fs::rename(&temp, &self.location)?;
        Ok(())
    }
}

impl Backend for Plaintext {
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
        let mut result = Ok(());
        if save {
            let mut data = self.data.lock().await;
            let mut modified = false;
            for account in &accounts {
                let guard = account.lock().await;
                if guard.is_modified() {
                    modified = true;
                    data.insert(guard.uid().to_string(), guard.encode());
                }
            }
            if modified {
                result = self.save(&data);
            }
        }
        // The holds come off even if the file write failed; the in-memory
        // state is already updated and the next save retries the write.
        let uids: Vec<String> = accounts.iter().map(|a| a.uid().to_string()).collect();
        self.locks.unlock(&uids).await;
        result
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
        let mut data = self.data.lock().await;
        let existed = data.remove(&uids[0]).is_some();
        let result = if existed { self.save(&data) } else { Ok(()) };
        drop(data);
        self.locks.unlock(&uids).await;
        result.map(|_| existed)
    }
}
