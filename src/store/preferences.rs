use std::collections::BTreeSet;
use std::sync::Mutex;

use dashmap::DashMap;
use rusqlite::{params, Connection};

use crate::data::types::ScanInterval;
use crate::error::PreferenceError;

pub const WATCHLIST_KEY: &str = "watchlist";
pub const DISMISSED_ALERTS_KEY: &str = "dismissed_alerts";
pub const SCAN_INTERVAL_KEY: &str = "scan_interval";

pub type PrefResult<T> = Result<T, PreferenceError>;

/// Durable small string sets, one independent set per key.
///
/// Every call is atomic with respect to its key's set. Adding an existing
/// member and removing an absent one are no-ops.
pub trait PreferenceStore: Send + Sync {
    fn get_set(&self, key: &str) -> PrefResult<Vec<String>>;
    fn add_to_set(&self, key: &str, value: &str) -> PrefResult<()>;
    fn remove_from_set(&self, key: &str, value: &str) -> PrefResult<()>;
    /// Swap the whole set in one step.
    fn replace_set(&self, key: &str, values: &[String]) -> PrefResult<()>;
}

pub struct SqlitePreferenceStore {
    conn: Mutex<Connection>,
}

impl SqlitePreferenceStore {
    pub fn open(db_path: &str) -> PrefResult<Self> {
        Self::with_connection(Connection::open(db_path)?)
    }

    pub fn in_memory() -> PrefResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> PrefResult<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS preference_sets (
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                added_at TIMESTAMP NOT NULL,
                PRIMARY KEY (key, value)
            );

            CREATE INDEX IF NOT EXISTS idx_preference_sets_key ON preference_sets(key);
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> PrefResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| PreferenceError::Poisoned)
    }
}

impl PreferenceStore for SqlitePreferenceStore {
    fn get_set(&self, key: &str) -> PrefResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT value FROM preference_sets WHERE key = ?1 ORDER BY value",
        )?;

        let values = stmt
            .query_map(params![key], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(values)
    }

    fn add_to_set(&self, key: &str, value: &str) -> PrefResult<()> {
        self.conn()?.execute(
            "INSERT OR IGNORE INTO preference_sets (key, value, added_at) VALUES (?1, ?2, ?3)",
            params![key, value, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove_from_set(&self, key: &str, value: &str) -> PrefResult<()> {
        self.conn()?.execute(
            "DELETE FROM preference_sets WHERE key = ?1 AND value = ?2",
            params![key, value],
        )?;
        Ok(())
    }

    fn replace_set(&self, key: &str, values: &[String]) -> PrefResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM preference_sets WHERE key = ?1", params![key])?;
        let now = chrono::Utc::now().to_rfc3339();
        for value in values {
            tx.execute(
                "INSERT OR IGNORE INTO preference_sets (key, value, added_at) VALUES (?1, ?2, ?3)",
                params![key, value, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

/// Process-local store, for tests and for running without a database file.
#[derive(Default)]
pub struct MemoryPreferenceStore {
    sets: DashMap<String, BTreeSet<String>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get_set(&self, key: &str) -> PrefResult<Vec<String>> {
        Ok(self
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn add_to_set(&self, key: &str, value: &str) -> PrefResult<()> {
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(value.to_string());
        Ok(())
    }

    fn remove_from_set(&self, key: &str, value: &str) -> PrefResult<()> {
        if let Some(mut set) = self.sets.get_mut(key) {
            set.remove(value);
        }
        Ok(())
    }

    fn replace_set(&self, key: &str, values: &[String]) -> PrefResult<()> {
        self.sets
            .insert(key.to_string(), values.iter().cloned().collect());
        Ok(())
    }
}

/// Typed access to the sets the operator UI keeps.
pub struct Preferences<'a> {
    store: &'a dyn PreferenceStore,
}

impl<'a> Preferences<'a> {
    pub fn new(store: &'a dyn PreferenceStore) -> Self {
        Self { store }
    }

    pub fn watchlist(&self) -> PrefResult<Vec<String>> {
        self.store.get_set(WATCHLIST_KEY)
    }

    pub fn watch(&self, symbol: &str) -> PrefResult<()> {
        self.store.add_to_set(WATCHLIST_KEY, symbol)
    }

    pub fn unwatch(&self, symbol: &str) -> PrefResult<()> {
        self.store.remove_from_set(WATCHLIST_KEY, symbol)
    }

    pub fn is_watched(&self, symbol: &str) -> PrefResult<bool> {
        Ok(self.watchlist()?.iter().any(|s| s == symbol))
    }

    /// Returns whether the symbol is watched afterwards.
    pub fn toggle_watch(&self, symbol: &str) -> PrefResult<bool> {
        if self.is_watched(symbol)? {
            self.unwatch(symbol)?;
            Ok(false)
        } else {
            self.watch(symbol)?;
            Ok(true)
        }
    }

    pub fn dismissed_alerts(&self) -> PrefResult<Vec<String>> {
        self.store.get_set(DISMISSED_ALERTS_KEY)
    }

    pub fn dismiss_alert(&self, id: &str) -> PrefResult<()> {
        self.store.add_to_set(DISMISSED_ALERTS_KEY, id)
    }

    pub fn restore_alert(&self, id: &str) -> PrefResult<()> {
        self.store.remove_from_set(DISMISSED_ALERTS_KEY, id)
    }

    pub fn last_interval(&self) -> PrefResult<Option<ScanInterval>> {
        Ok(self
            .store
            .get_set(SCAN_INTERVAL_KEY)?
            .first()
            .and_then(|raw| raw.parse::<u32>().ok())
            .and_then(|m| ScanInterval::try_from(m).ok()))
    }

    pub fn remember_interval(&self, interval: ScanInterval) -> PrefResult<()> {
        self.store
            .replace_set(SCAN_INTERVAL_KEY, &[interval.minutes().to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stores() -> Vec<Box<dyn PreferenceStore>> {
        vec![
            Box::new(SqlitePreferenceStore::in_memory().unwrap()),
            Box::new(MemoryPreferenceStore::new()),
        ]
    }

    #[test]
    fn test_add_and_remove_are_idempotent() {
        for store in stores() {
            store.add_to_set(WATCHLIST_KEY, "TCS").unwrap();
            store.add_to_set(WATCHLIST_KEY, "TCS").unwrap();
            store.add_to_set(WATCHLIST_KEY, "INFY").unwrap();
            assert_eq!(store.get_set(WATCHLIST_KEY).unwrap(), vec!["INFY", "TCS"]);

            store.remove_from_set(WATCHLIST_KEY, "TCS").unwrap();
            store.remove_from_set(WATCHLIST_KEY, "TCS").unwrap();
            store.remove_from_set(WATCHLIST_KEY, "NOPE").unwrap();
            assert_eq!(store.get_set(WATCHLIST_KEY).unwrap(), vec!["INFY"]);
        }
    }

    #[test]
    fn test_keys_are_independent() {
        for store in stores() {
            store.add_to_set(WATCHLIST_KEY, "TCS").unwrap();
            store.add_to_set(DISMISSED_ALERTS_KEY, "TCS").unwrap();
            store.remove_from_set(DISMISSED_ALERTS_KEY, "TCS").unwrap();

            assert_eq!(store.get_set(WATCHLIST_KEY).unwrap(), vec!["TCS"]);
            assert!(store.get_set(DISMISSED_ALERTS_KEY).unwrap().is_empty());
            assert!(store.get_set("never_written").unwrap().is_empty());
        }
    }

    #[test]
    fn test_replace_set() {
        for store in stores() {
            store.add_to_set(SCAN_INTERVAL_KEY, "5").unwrap();
            store
                .replace_set(SCAN_INTERVAL_KEY, &["10".to_string()])
                .unwrap();
            assert_eq!(store.get_set(SCAN_INTERVAL_KEY).unwrap(), vec!["10"]);
        }
    }

    #[test]
    fn test_sqlite_survives_reopen() {
        let path = std::env::temp_dir().join(format!(
            "signal_desk_prefs_{}_{}.db",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let path_str = path.to_string_lossy().to_string();

        {
            let store = SqlitePreferenceStore::open(&path_str).unwrap();
            let prefs = Preferences::new(&store);
            prefs.watch("HDFCBANK").unwrap();
            prefs.dismiss_alert("rec-42").unwrap();
            prefs
                .remember_interval(ScanInterval::try_from(30).unwrap())
                .unwrap();
        }

        let store = SqlitePreferenceStore::open(&path_str).unwrap();
        let prefs = Preferences::new(&store);
        assert_eq!(prefs.watchlist().unwrap(), vec!["HDFCBANK"]);
        assert_eq!(prefs.dismissed_alerts().unwrap(), vec!["rec-42"]);
        assert_eq!(prefs.last_interval().unwrap().map(|i| i.minutes()), Some(30));

        drop(store);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_preferences_helpers() {
        let store = MemoryPreferenceStore::new();
        let prefs = Preferences::new(&store);

        assert!(prefs.toggle_watch("TCS").unwrap());
        assert!(prefs.is_watched("TCS").unwrap());
        assert!(!prefs.toggle_watch("TCS").unwrap());
        assert!(prefs.watchlist().unwrap().is_empty());

        prefs.dismiss_alert("a1").unwrap();
        prefs.restore_alert("a1").unwrap();
        assert!(prefs.dismissed_alerts().unwrap().is_empty());

        assert!(prefs.last_interval().unwrap().is_none());
        store.add_to_set(SCAN_INTERVAL_KEY, "garbage").unwrap();
        assert!(prefs.last_interval().unwrap().is_none());
    }
}
