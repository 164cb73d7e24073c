use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::LamportClock;

/// Latest known reading from one station.
#[derive(Debug, Clone)]
pub struct StationRecord {
    /// The reading as submitted, stored verbatim.
    pub payload: Value,
    /// Clock value the sender carried with the accepted payload. The basis of
    /// last-writer-wins comparisons.
    pub sender_clock: u64,
    /// Merged Lamport value assigned when this payload was accepted. Reported
    /// to callers and used to resync the clock after a restart.
    pub received_clock: u64,
    /// Wall-clock liveness signal. Never consulted for ordering.
    last_seen: Instant,
}

/// One station's entry in a durable snapshot. `last_seen` is deliberately
/// absent: restored stations start a fresh liveness window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub payload: Value,
    pub sender_clock: u64,
    pub received_clock: u64,
}

/// Point-in-time copy of the whole store, keyed by station id.
pub type Snapshot = BTreeMap<String, PersistedRecord>;

/// Result of applying a PUT to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First reading ever seen for this station.
    Created,
    /// Payload replaced; the carried clock was at least the stored one.
    Updated,
    /// Carried clock was behind the stored one. The payload is kept but the
    /// station still counts as alive.
    Stale,
}

/// Concurrency-safe map of station id to latest record.
///
/// `DashMap` entry locks serialize operations per station key, so PUTs to
/// different stations never block each other and an eviction racing an upsert
/// for the same station resolves to whichever ran later.
pub struct StationStore {
    records: DashMap<String, StationRecord>,
    clock: Arc<LamportClock>,
}

impl StationStore {
    pub fn new(clock: Arc<LamportClock>) -> Self {
        Self {
            records: DashMap::new(),
            clock,
        }
    }

    /// Apply one PUT. Merges `incoming_clock` into the shared clock first (the
    /// one globally ordered step), then updates the station's record under its
    /// entry lock. Returns the outcome and the post-merge clock value.
    ///
    /// Replacement is judged by the clock the sender carried, not the merged
    /// value: the merged value is always ahead of every stored stamp, so
    /// comparing it would let any later arrival overwrite a higher-clock
    /// payload. Equal carried clocks accept, so a source resending at its
    /// current clock refreshes its own reading.
    pub fn upsert(
        &self,
        station_id: &str,
        payload: Value,
        incoming_clock: u64,
    ) -> (UpsertOutcome, u64) {
        let merged = self.clock.merge(incoming_clock);
        let now = Instant::now();

        let outcome = match self.records.entry(station_id.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(StationRecord {
                    payload,
                    sender_clock: incoming_clock,
                    received_clock: merged,
                    last_seen: now,
                });
                UpsertOutcome::Created
            }
            Entry::Occupied(mut slot) => {
                let record = slot.get_mut();
                record.last_seen = now;
                if incoming_clock >= record.sender_clock {
                    record.payload = payload;
                    record.sender_clock = incoming_clock;
                    record.received_clock = merged;
                    UpsertOutcome::Updated
                } else {
                    UpsertOutcome::Stale
                }
            }
        };

        (outcome, merged)
    }

    /// Copy-on-read snapshot of every station's latest record.
    pub fn read_all(&self) -> Snapshot {
        self.records
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    PersistedRecord {
                        payload: entry.value().payload.clone(),
                        sender_clock: entry.value().sender_clock,
                        received_clock: entry.value().received_clock,
                    },
                )
            })
            .collect()
    }

    /// Remove every station silent for longer than `timeout`; returns the
    /// evicted ids. Runs under the same shard locks as `upsert`, so a
    /// concurrent PUT either refreshes `last_seen` before the age check or
    /// reinserts the station afterwards.
    pub fn evict_idle(&self, timeout: Duration) -> Vec<String> {
        let mut evicted = Vec::new();
        self.records.retain(|station_id, record| {
            if record.last_seen.elapsed() > timeout {
                evicted.push(station_id.clone());
                false
            } else {
                true
            }
        });
        evicted
    }

    /// Replace the whole map from a durable snapshot and resync the clock past
    /// every restored record. Called once at startup, before any request.
    pub fn restore(&self, snapshot: Snapshot) {
        self.records.clear();
        let now = Instant::now();
        for (station_id, persisted) in snapshot {
            self.clock.resync(persisted.received_clock);
            self.records.insert(
                station_id,
                StationRecord {
                    payload: persisted.payload,
                    sender_clock: persisted.sender_clock,
                    received_clock: persisted.received_clock,
                    last_seen: now,
                },
            );
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> StationStore {
        StationStore::new(Arc::new(LamportClock::new()))
    }

    #[test]
    fn first_put_creates() {
        let store = store();
        let (outcome, clock) =
            store.upsert("station_0", json!({"id": "station_0", "temperature": "20"}), 0);
        assert_eq!(outcome, UpsertOutcome::Created);
        assert_eq!(clock, 1);
    }

    #[test]
    fn second_put_with_same_sender_clock_still_updates() {
        // Both PUTs carry clock 0: a tie on the carried clock, which the
        // later arrival wins so a source resending at its current clock can
        // refresh its own reading.
        let store = store();
        store.upsert("station_0", json!({"id": "station_0", "temperature": "20"}), 0);
        let (outcome, clock) = store.upsert("station_0", json!({"temperature": "21"}), 0);
        assert_eq!(outcome, UpsertOutcome::Updated);
        assert_eq!(clock, 2);

        let snap = store.read_all();
        assert_eq!(snap["station_0"].payload["temperature"], "21");
    }

    #[test]
    fn higher_clock_wins_in_either_arrival_order() {
        let a = json!({"id": "s", "temperature": "1"});
        let b = json!({"id": "s", "temperature": "2"});

        // Low clock then high clock.
        let forward = store();
        forward.upsert("s", a.clone(), 1);
        forward.upsert("s", b.clone(), 50);

        // High clock then low clock: the low one merges to a smaller value
        // than the stored record and must not regress the payload.
        let reverse = store();
        reverse.upsert("s", b.clone(), 50);
        let (outcome, _) = reverse.upsert("s", a.clone(), 1);
        assert_eq!(outcome, UpsertOutcome::Stale);

        assert_eq!(
            forward.read_all()["s"].payload,
            reverse.read_all()["s"].payload
        );
        assert_eq!(forward.read_all()["s"].payload["temperature"], "2");
    }

    #[test]
    fn later_arrival_with_lower_clock_never_overwrites() {
        // The merged service clock is always ahead of every stored stamp, so
        // acceptance has to be judged by the carried clock alone: a sender
        // whose clock is behind the stored record's must not replace it, no
        // matter how late its PUT arrives.
        let store = store();
        store.upsert("s", json!({"id": "s", "temperature": "30"}), 50);

        let (outcome, merged) = store.upsert("s", json!({"id": "s", "temperature": "5"}), 1);
        assert_eq!(outcome, UpsertOutcome::Stale);
        // The response clock still advances past the stored record.
        assert!(merged > 51);

        let snap = store.read_all();
        assert_eq!(snap["s"].payload["temperature"], "30");
        assert_eq!(snap["s"].sender_clock, 50);
    }

    #[test]
    fn distinct_stations_all_present() {
        let store = store();
        for i in 0..5 {
            let id = format!("station_{i}");
            store.upsert(&id, json!({"id": id, "temperature": "20"}), 0);
        }
        let snap = store.read_all();
        assert_eq!(snap.len(), 5);
        for i in 0..5 {
            assert!(snap.contains_key(&format!("station_{i}")));
        }
    }

    #[test]
    fn snapshot_is_a_copy() {
        let store = store();
        store.upsert("s", json!({"temperature": "20"}), 0);
        let before = store.read_all();
        store.upsert("s", json!({"temperature": "25"}), 10);
        assert_eq!(before["s"].payload["temperature"], "20");
    }

    #[test]
    fn idle_stations_are_evicted() {
        let store = store();
        store.upsert("old", json!({"temperature": "20"}), 0);
        std::thread::sleep(Duration::from_millis(30));
        store.upsert("fresh", json!({"temperature": "21"}), 0);

        let evicted = store.evict_idle(Duration::from_millis(20));
        assert_eq!(evicted, vec!["old".to_string()]);
        assert_eq!(store.len(), 1);
        assert!(store.read_all().contains_key("fresh"));
    }

    #[test]
    fn stale_put_refreshes_liveness() {
        let store = store();
        store.upsert("s", json!({"temperature": "20"}), 100);
        std::thread::sleep(Duration::from_millis(30));
        // Stale in clock terms, but it resets the idle timer.
        let (outcome, _) = store.upsert("s", json!({"temperature": "19"}), 0);
        assert_eq!(outcome, UpsertOutcome::Stale);
        assert!(store.evict_idle(Duration::from_millis(20)).is_empty());
        assert_eq!(store.read_all()["s"].payload["temperature"], "20");
    }

    #[test]
    fn put_after_eviction_recreates() {
        let store = store();
        store.upsert("s", json!({"temperature": "20"}), 0);
        std::thread::sleep(Duration::from_millis(15));
        store.evict_idle(Duration::from_millis(10));
        assert!(store.is_empty());

        let (outcome, _) = store.upsert("s", json!({"temperature": "22"}), 0);
        assert_eq!(outcome, UpsertOutcome::Created);
    }

    #[test]
    fn restore_resyncs_clock() {
        let clock = Arc::new(LamportClock::new());
        let store = StationStore::new(clock.clone());

        let mut snapshot = Snapshot::new();
        snapshot.insert(
            "s".to_string(),
            PersistedRecord {
                payload: json!({"temperature": "20"}),
                sender_clock: 0,
                received_clock: 7,
            },
        );
        store.restore(snapshot);

        assert_eq!(clock.current(), 7);
        // A sender restarting from clock 0 ties with the restored record and
        // merges past it.
        let (outcome, merged) = store.upsert("s", json!({"temperature": "21"}), 0);
        assert_eq!(outcome, UpsertOutcome::Updated);
        assert_eq!(merged, 8);
    }

    #[test]
    fn restore_keeps_the_staleness_discipline() {
        let store = store();
        let mut snapshot = Snapshot::new();
        snapshot.insert(
            "s".to_string(),
            PersistedRecord {
                payload: json!({"temperature": "20"}),
                sender_clock: 5,
                received_clock: 7,
            },
        );
        store.restore(snapshot);

        // A carried clock behind the restored record's is still stale.
        let (outcome, _) = store.upsert("s", json!({"temperature": "19"}), 3);
        assert_eq!(outcome, UpsertOutcome::Stale);
        assert_eq!(store.read_all()["s"].payload["temperature"], "20");

        let (outcome, _) = store.upsert("s", json!({"temperature": "22"}), 6);
        assert_eq!(outcome, UpsertOutcome::Updated);
        assert_eq!(store.read_all()["s"].payload["temperature"], "22");
    }
}
