use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use agent_core::{MacroSnapshot, StockSnapshot};

/// In-memory store of per-symbol snapshots plus the market-wide macro
/// snapshot. Both are replaced atomically at publication: readers clone an
/// `Arc` and always see a consistent prior-or-new state, never a partial one.
pub struct SnapshotStore {
    stocks: RwLock<Arc<HashMap<String, Arc<StockSnapshot>>>>,
    macro_snapshot: RwLock<Arc<MacroSnapshot>>,
    last_refresh: RwLock<Option<DateTime<Utc>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self {
            stocks: RwLock::new(Arc::new(HashMap::new())),
            macro_snapshot: RwLock::new(Arc::new(MacroSnapshot::neutral(
                Utc::now().date_naive(),
            ))),
            last_refresh: RwLock::new(None),
        }
    }

    pub fn publish_stocks(&self, snapshots: HashMap<String, Arc<StockSnapshot>>) {
        *self.stocks.write().expect("snapshot lock poisoned") = Arc::new(snapshots);
        *self.last_refresh.write().expect("snapshot lock poisoned") = Some(Utc::now());
    }

    pub fn publish_macro(&self, snapshot: MacroSnapshot) {
        *self.macro_snapshot.write().expect("snapshot lock poisoned") = Arc::new(snapshot);
    }

    pub fn get(&self, symbol: &str) -> Option<Arc<StockSnapshot>> {
        self.stocks
            .read()
            .expect("snapshot lock poisoned")
            .get(symbol)
            .cloned()
    }

    pub fn all(&self) -> Vec<Arc<StockSnapshot>> {
        self.stocks
            .read()
            .expect("snapshot lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.stocks.read().expect("snapshot lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn macro_snapshot(&self) -> Arc<MacroSnapshot> {
        self.macro_snapshot
            .read()
            .expect("snapshot lock poisoned")
            .clone()
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_refresh.read().expect("snapshot lock poisoned")
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}
