//! Payment records and transaction ID minting.

use crate::currency::Currency;
use crate::util::unix_time;
use num_bigint::{BigInt, Sign};
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::{LazyLock, Mutex, PoisonError};
use std::time::Duration;

/// An immutable record of a completed payment. `amount` is in base units,
/// `sent_amount` in the source's local units and `received_amount` in the
/// target's local units.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub source: String,
    pub source_server: String,
    pub target: String,
    pub target_server: String,
    pub amount: Currency,
    pub sent_amount: Currency,
    pub received_amount: Currency,
    pub time: i64,

    /// If true the ledger will attempt to revert the transaction when it is
    /// rejected. Rejection is allowed either way.
    #[serde(default)]
    pub revertable: bool,
}

impl Transaction {
    pub fn new(
        source: String,
        source_server: String,
        target: String,
        target_server: String,
        amount: Currency,
        sent_amount: Currency,
        received_amount: Currency,
    ) -> Self {
        let (id, time) = generate_id();
        Transaction {
            id,
            source,
            source_server,
            target,
            target_server,
            amount,
            sent_amount,
            received_amount,
            time,
            revertable: false,
        }
    }

    /// The numeric ID used by the legacy API surface: the raw ID bytes read
    /// as a big-endian integer, reduced mod 9,999,999, plus one.
    pub fn legacy_id(&self) -> i32 {
        let raw = BigInt::from_bytes_be(Sign::Plus, self.id.as_bytes());
        let reduced = raw % BigInt::from(9_999_999);
        reduced.to_i32().unwrap_or(0) + 1
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} (sent {}, received {}) - Transaction from {:?} on {:?} to {:?} on {:?}.",
            self.id,
            self.amount.display_string(),
            self.sent_amount.raw_string(),
            self.received_amount.raw_string(),
            self.source,
            self.source_server,
            self.target,
            self.target_server,
        )
    }
}

struct IdMonitor {
    last_time: i64,
    seen: HashSet<u32>,
}

static ID_MONITOR: LazyLock<Mutex<IdMonitor>> = LazyLock::new(|| {
    Mutex::new(IdMonitor {
        last_time: -1,
        seen: HashSet::new(),
    })
});

/// Mints a process-unique transaction ID of the form
/// `T<hex seconds>-<hex rand>` along with the timestamp it encodes.
///
/// A process-wide monitor remembers every 32-bit draw minted within the
/// current second, so IDs never collide inside a second without any
/// cross-process coordination. Past one million IDs in a single second the
/// monitor sleeps until the clock advances.
pub fn generate_id() -> (String, i64) {
    loop {
        let mut monitor = ID_MONITOR
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let now = unix_time();
        if now > monitor.last_time {
            monitor.last_time = now;
            monitor.seen.clear();
        }
        if monitor.seen.len() > 1_048_576 {
            drop(monitor);
            std::thread::sleep(Duration::from_secs(1));
            continue;
        }

        let mut id = rand::random::<u32>();
        while !monitor.seen.insert(id) {
            id = rand::random();
        }
        return (format!("T{:X}-{:08X}", now, id), now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transaction(id: &str) -> Transaction {
        Transaction {
            id: id.to_string(),
            source: "alice".to_string(),
            source_server: "One".to_string(),
            target: "bob".to_string(),
            target_server: "Two".to_string(),
            amount: Currency::from_units(25),
            sent_amount: Currency::from_units(25),
            received_amount: Currency::from_units(25),
            time: 1_500_000_000,
            revertable: false,
        }
    }

    #[test]
    fn test_id_shape() {
        let (id, time) = generate_id();
        assert!(id.starts_with('T'));
        let (seconds, random) = id[1..].split_once('-').unwrap();
        assert_eq!(i64::from_str_radix(seconds, 16).unwrap(), time);
        assert_eq!(random.len(), 8);
        assert!(u32::from_str_radix(random, 16).is_ok());
    }

    #[test]
    fn test_ids_unique() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let (id, _) = generate_id();
            assert!(seen.insert(id));
        }
    }

    #[test]
    fn test_legacy_id_range() {
        for id in ["T5E000000-00000001", "T5E000000-FFFFFFFF", "x"] {
            let legacy = transaction(id).legacy_id();
            assert!((1..=9_999_999).contains(&legacy), "{} -> {}", id, legacy);
        }
        // Stable for a fixed input.
        assert_eq!(
            transaction("T5E000000-00000001").legacy_id(),
            transaction("T5E000000-00000001").legacy_id()
        );
    }

    #[test]
    fn test_display() {
        let rendered = transaction("T1-2").to_string();
        assert_eq!(
            rendered,
            "[T1-2] \u{a4}25.00 (sent 25.00, received 25.00) - \
             Transaction from \"alice\" on \"One\" to \"bob\" on \"Two\"."
        );
    }

    #[test]
    fn test_serde_round_trip() {
        let t = transaction("T1-2");
        let encoded = serde_json::to_string(&t).unwrap();
        assert!(encoded.contains("\"amount\":25.0"));
        let decoded: Transaction = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, t);
    }
}
