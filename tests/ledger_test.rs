//! End-to-end ledger scenarios over the memory backend.

use lurkcoin::backup;
use lurkcoin::ledger::{self, LedgerTransaction};
use lurkcoin::storage::memory::Memory;
use lurkcoin::{pay, Currency, Error};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::timeout;

fn currency(s: &str) -> Currency {
    s.parse().unwrap()
}

/// Creates an account with the given balance and target balance.
async fn create_account(memory: &Memory, name: &str, balance: &str, target: &str) {
    let mut tx = LedgerTransaction::begin(memory.clone());
    let account = tx.create(name).await.unwrap();
    assert!(account.change_balance(&currency(balance)).await);
    assert!(account.set_target_balance(currency(target)).await);
    tx.commit().await.unwrap();
}

async fn balance_of(memory: &Memory, name: &str) -> Currency {
    let mut tx = LedgerTransaction::begin(memory.clone());
    let balance = tx.fetch_one(name).await.unwrap().balance().await;
    tx.abort().await.unwrap();
    balance
}

#[tokio::test]
async fn test_simple_payment_same_currency() {
    let memory = Memory::default();
    create_account(&memory, "A", "100", "0").await;
    create_account(&memory, "B", "0", "0").await;

    let mut tx = LedgerTransaction::begin(memory.clone());
    let accounts = tx.fetch(&["A", "B"]).await.unwrap();
    let transaction = pay(
        &accounts[0],
        "u1",
        "u2",
        &accounts[1],
        currency("25"),
        false,
        false,
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(balance_of(&memory, "A").await, currency("75"));
    assert_eq!(balance_of(&memory, "B").await, currency("25"));
    assert_eq!(transaction.amount, currency("25"));
    assert_eq!(transaction.sent_amount, currency("25"));
    assert_eq!(transaction.received_amount, currency("25"));

    let mut tx = LedgerTransaction::begin(memory.clone());
    let accounts = tx.fetch(&["A", "B"]).await.unwrap();
    assert_eq!(accounts[0].history().await.len(), 1);
    assert_eq!(accounts[1].history().await.len(), 1);
    let pending = accounts[1].pending().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, transaction.id);
    assert!(accounts[0].pending().await.is_empty());
    tx.abort().await.unwrap();
}

#[tokio::test]
async fn test_cross_currency_conversion() {
    let memory = Memory::default();
    create_account(&memory, "A", "100", "0").await;
    create_account(&memory, "B", "250000", "500000").await;

    let mut tx = LedgerTransaction::begin(memory.clone());
    let accounts = tx.fetch(&["A", "B"]).await.unwrap();
    let transaction = pay(
        &accounts[0],
        "u1",
        "u2",
        &accounts[1],
        currency("100"),
        false,
        true,
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(balance_of(&memory, "A").await, currency("0"));
    assert_eq!(balance_of(&memory, "B").await, currency("250100"));
    assert_eq!(transaction.received_amount, currency("199.96"));
}

#[tokio::test]
async fn test_rejection_reverses_revertable_payment() {
    let memory = Memory::default();
    create_account(&memory, "A", "100", "0").await;
    create_account(&memory, "B", "250000", "500000").await;

    let mut tx = LedgerTransaction::begin(memory.clone());
    let accounts = tx.fetch(&["A", "B"]).await.unwrap();
    let transaction = pay(
        &accounts[0],
        "u1",
        "u2",
        &accounts[1],
        currency("100"),
        false,
        true,
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();

    // The receiver rejects; its transaction is released before the
    // compensating payment runs.
    let mut tx = LedgerTransaction::begin(memory.clone());
    let rejecter = tx.fetch_one("B").await.unwrap();
    let rejected = rejecter.reject_pending(&transaction.id).await.unwrap();
    tx.commit().await.unwrap();
    ledger::revert_rejected(&memory, "b", &rejected).await.unwrap();

    // A is restored to within one hundredth of its pre-payment balance.
    assert_eq!(balance_of(&memory, "A").await, currency("99.99"));
    let b_balance = balance_of(&memory, "B").await;
    assert!(b_balance >= currency("250000") && b_balance < currency("250001"));
}

#[tokio::test]
async fn test_overspend_leaves_no_trace() {
    let memory = Memory::default();
    create_account(&memory, "A", "10", "0").await;
    create_account(&memory, "B", "0", "0").await;

    let mut tx = LedgerTransaction::begin(memory.clone());
    let accounts = tx.fetch(&["A", "B"]).await.unwrap();
    let error = pay(
        &accounts[0],
        "u1",
        "u2",
        &accounts[1],
        currency("100"),
        false,
        false,
    )
    .await
    .unwrap_err();
    assert!(matches!(error, Error::CannotAfford));
    tx.commit().await.unwrap();

    assert_eq!(balance_of(&memory, "A").await, currency("10"));
    assert_eq!(balance_of(&memory, "B").await, currency("0"));
    let mut tx = LedgerTransaction::begin(memory.clone());
    let accounts = tx.fetch(&["A", "B"]).await.unwrap();
    assert!(accounts[0].history().await.is_empty());
    assert!(accounts[1].history().await.is_empty());
    assert!(accounts[1].pending().await.is_empty());
    tx.abort().await.unwrap();
}

#[test]
fn test_id_uniqueness_under_load() {
    let threads: Vec<_> = (0..8)
        .map(|_| {
            std::thread::spawn(|| {
                let mut ids = Vec::with_capacity(12_500);
                for _ in 0..12_500 {
                    ids.push(lurkcoin::transaction::generate_id().0);
                }
                ids
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for thread in threads {
        for id in thread.join().unwrap() {
            assert!(seen.insert(id));
        }
    }
    assert_eq!(seen.len(), 100_000);
}

#[tokio::test]
async fn test_fetch_deduplication() {
    let memory = Memory::default();
    create_account(&memory, "a", "0", "0").await;
    create_account(&memory, "b", "0", "0").await;

    let mut tx = LedgerTransaction::begin(memory.clone());
    let accounts = tx.fetch(&["a", "b", "a"]).await.unwrap();
    assert_eq!(accounts.len(), 3);
    assert!(accounts[0].same_account(&accounts[2]));
    assert!(!accounts[0].same_account(&accounts[1]));
    tx.abort().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_payments_disjoint_accounts() {
    let memory = Memory::default();
    for name in ["a", "b", "c", "d"] {
        create_account(&memory, name, "100", "0").await;
    }

    let mut tasks = Vec::new();
    for (source, target) in [("a", "b"), ("c", "d")] {
        let memory = memory.clone();
        tasks.push(tokio::spawn(async move {
            let mut tx = LedgerTransaction::begin(memory.clone());
            let accounts = tx.fetch(&[source, target]).await.unwrap();
            pay(
                &accounts[0],
                "u1",
                "u2",
                &accounts[1],
                currency("10"),
                false,
                false,
            )
            .await
            .unwrap();
            tx.commit().await.unwrap();
        }));
    }
    for task in tasks {
        timeout(Duration::from_secs(5), task)
            .await
            .expect("disjoint payments contended")
            .unwrap();
    }

    assert_eq!(balance_of(&memory, "a").await, currency("90"));
    assert_eq!(balance_of(&memory, "b").await, currency("110"));
    assert_eq!(balance_of(&memory, "c").await, currency("90"));
    assert_eq!(balance_of(&memory, "d").await, currency("110"));
}

#[tokio::test]
async fn test_concurrent_payments_overlapping_accounts_serialise() {
    let memory = Memory::default();
    create_account(&memory, "a", "100", "0").await;
    create_account(&memory, "b", "100", "0").await;

    // Opposite-direction payments in both lock orders; every schedule must
    // serialise and conserve the total.
    let mut tasks = Vec::new();
    for i in 0..20 {
        let memory = memory.clone();
        let (source, target) = if i % 2 == 0 { ("a", "b") } else { ("b", "a") };
        tasks.push(tokio::spawn(async move {
            let mut tx = LedgerTransaction::begin(memory.clone());
            let accounts = tx.fetch(&[source, target]).await.unwrap();
            pay(
                &accounts[0],
                "u1",
                "u2",
                &accounts[1],
                currency("3"),
                false,
                false,
            )
            .await
            .unwrap();
            tx.commit().await.unwrap();
        }));
    }
    for task in tasks {
        timeout(Duration::from_secs(10), task)
            .await
            .expect("overlapping payments deadlocked")
            .unwrap();
    }

    // Ten payments each way cancel out.
    let a = balance_of(&memory, "a").await;
    let b = balance_of(&memory, "b").await;
    assert_eq!(a, currency("100"));
    assert_eq!(b, currency("100"));
    assert!(!a.lt_zero() && !b.lt_zero());
}

#[tokio::test]
async fn test_acknowledge_and_reject_idempotence() {
    let memory = Memory::default();
    create_account(&memory, "A", "100", "0").await;
    create_account(&memory, "B", "0", "0").await;

    let mut tx = LedgerTransaction::begin(memory.clone());
    let accounts = tx.fetch(&["A", "B"]).await.unwrap();
    let transaction = pay(
        &accounts[0],
        "u1",
        "u2",
        &accounts[1],
        currency("25"),
        false,
        false,
    )
    .await
    .unwrap();

    let b = &accounts[1];
    // Unknown IDs are no-ops.
    b.remove_pending("bogus").await;
    assert!(b.reject_pending("bogus").await.is_none());
    assert_eq!(b.pending().await.len(), 1);

    // Acknowledging twice removes the entry once.
    b.remove_pending(&transaction.id).await;
    b.remove_pending(&transaction.id).await;
    assert!(b.pending().await.is_empty());
    // Rejecting an already-acknowledged transaction does nothing.
    assert!(b.reject_pending(&transaction.id).await.is_none());
    tx.commit().await.unwrap();

    assert_eq!(balance_of(&memory, "B").await, currency("25"));
}

#[tokio::test]
async fn test_balances_never_negative_and_history_capped() {
    let memory = Memory::default();
    create_account(&memory, "A", "5", "0").await;
    create_account(&memory, "B", "0", "0").await;

    let mut tx = LedgerTransaction::begin(memory.clone());
    let accounts = tx.fetch(&["A", "B"]).await.unwrap();
    let mut successes = 0;
    for _ in 0..20 {
        if pay(
            &accounts[0],
            "u1",
            "u2",
            &accounts[1],
            currency("1"),
            false,
            false,
        )
        .await
        .is_ok()
        {
            successes += 1;
        }
        let a = accounts[0].balance().await;
        let b = accounts[1].balance().await;
        assert!(!a.lt_zero() && !b.lt_zero());
        assert!(accounts[0].history().await.len() <= 10);
        assert!(accounts[1].history().await.len() <= 10);
    }
    assert_eq!(successes, 5);
    tx.commit().await.unwrap();

    assert_eq!(balance_of(&memory, "A").await, currency("0"));
    assert_eq!(balance_of(&memory, "B").await, currency("5"));
}

#[tokio::test]
async fn test_backup_restore_preserves_ledger() {
    let memory = Memory::default();
    create_account(&memory, "A", "100", "0").await;
    create_account(&memory, "B", "250000", "500000").await;

    let mut tx = LedgerTransaction::begin(memory.clone());
    let accounts = tx.fetch(&["A", "B"]).await.unwrap();
    pay(
        &accounts[0],
        "u1",
        "u2",
        &accounts[1],
        currency("100"),
        false,
        true,
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let snapshot = backup::backup(&memory).await.unwrap();
    let raw = serde_json::to_vec(&snapshot).unwrap();

    let restored = Memory::default();
    let decoded = serde_json::from_slice(&raw).unwrap();
    backup::restore(&restored, decoded).await.unwrap();

    assert_eq!(balance_of(&restored, "A").await, currency("0"));
    assert_eq!(balance_of(&restored, "B").await, currency("250100"));
    let mut tx = LedgerTransaction::begin(restored.clone());
    let account = tx.fetch_one("B").await.unwrap();
    assert_eq!(account.pending().await.len(), 1);
    assert_eq!(account.history().await.len(), 1);
    assert!(account.pending().await[0].revertable);
    tx.abort().await.unwrap();
}

#[tokio::test]
async fn test_deadlock_free_opposite_order_fetches() {
    let memory = Memory::default();
    create_account(&memory, "A", "0", "0").await;
    create_account(&memory, "B", "0", "0").await;

    let mut tasks = Vec::new();
    for names in [["A", "B"], ["B", "A"]] {
        let memory = memory.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..50 {
                let mut tx = LedgerTransaction::begin(memory.clone());
                let accounts = tx.fetch(&names).await.unwrap();
                // Both accounts form one atomic view.
                assert_eq!(accounts.len(), 2);
                tokio::task::yield_now().await;
                tx.abort().await.unwrap();
            }
        }));
    }
    for task in tasks {
        timeout(Duration::from_secs(10), task)
            .await
            .expect("opposite-order fetches deadlocked")
            .unwrap();
    }
}
