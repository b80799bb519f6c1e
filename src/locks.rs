//! Per-account lock management.
//!
//! Storage backends hand out exclusive holds on account uids through an
//! [`AccountLocks`] instance. A batch of uids is acquired in one step under a
//! supervisor mutex, so two well-behaved callers can never deadlock on each
//! other regardless of the order they name accounts in.

use crate::util::homogenise_username;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A held uid parks its own mutex in the table; waiters queue on that mutex
/// and the guard drop on unlock is what wakes them.
struct Hold {
    mutex: Arc<Mutex<()>>,
    _guard: OwnedMutexGuard<()>,
}

#[derive(Default)]
pub struct AccountLocks {
    supervisor: Mutex<HashMap<String, Hold>>,
}

impl AccountLocks {
    /// Acquires exclusive holds on every named account and returns the
    /// deduplicated, homogenised uid list. Blocks until all requested uids
    /// are simultaneously free; the whole batch is claimed under the
    /// supervisor lock, so partial acquisition is never observable.
    pub async fn lock<S: AsRef<str>>(&self, names: &[S]) -> Vec<String> {
        let mut uids: Vec<String> = Vec::with_capacity(names.len());
        for name in names {
            let uid = homogenise_username(name.as_ref());
            if !uids.contains(&uid) {
                uids.push(uid);
            }
        }

        let mut supervisor = self.supervisor.lock().await;
        loop {
            let busy = uids
                .iter()
                .find_map(|uid| supervisor.get(uid).map(|hold| hold.mutex.clone()));
            match busy {
                Some(mutex) => {
                    // Queue on the holder's mutex without the supervisor
                    // lock, then retry the whole batch.
                    drop(supervisor);
                    drop(mutex.lock().await);
                    supervisor = self.supervisor.lock().await;
                }
                None => break,
            }
        }
        for uid in &uids {
            let mutex = Arc::new(Mutex::new(()));
            let guard = mutex.clone().lock_owned().await;
            supervisor.insert(
                uid.clone(),
                Hold {
                    mutex,
                    _guard: guard,
                },
            );
        }
        uids
    }

    /// Releases holds. Unknown uids are ignored.
    pub async fn unlock<S: AsRef<str>>(&self, uids: &[S]) {
        let mut supervisor = self.supervisor.lock().await;
        for uid in uids {
            supervisor.remove(uid.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_lock_homogenises_and_dedupes() {
        let locks = AccountLocks::default();
        let uids = locks.lock(&["Bank A", "bank B", "BANK a"]).await;
        assert_eq!(uids, vec!["bank_a", "bank_b"]);
        locks.unlock(&uids).await;
    }

    #[tokio::test]
    async fn test_waiter_blocks_until_release() {
        let locks = Arc::new(AccountLocks::default());
        let held = locks.lock(&["a"]).await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let uids = locks.lock(&["a", "b"]).await;
                locks.unlock(&uids).await;
            })
        };

        // The waiter cannot finish while "a" is held.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        locks.unlock(&held).await;
        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter timed out")
            .unwrap();
    }

    #[tokio::test]
    async fn test_disjoint_batches_do_not_contend() {
        let locks = Arc::new(AccountLocks::default());
        let first = locks.lock(&["a", "b"]).await;
        let second = timeout(Duration::from_secs(1), locks.lock(&["c", "d"]))
            .await
            .expect("disjoint lock timed out");
        locks.unlock(&first).await;
        locks.unlock(&second).await;
    }

    #[tokio::test]
    async fn test_opposite_order_batches_both_complete() {
        let locks = Arc::new(AccountLocks::default());
        let mut tasks = Vec::new();
        for names in [["a", "b"], ["b", "a"]] {
            let locks = locks.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..100 {
                    let uids = locks.lock(&names).await;
                    tokio::task::yield_now().await;
                    locks.unlock(&uids).await;
                }
            }));
        }
        for task in tasks {
            timeout(Duration::from_secs(5), task)
                .await
                .expect("deadlocked")
                .unwrap();
        }
    }
}
