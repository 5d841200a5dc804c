use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{Connection, params};
use serde::Serialize;

use super::schema::{apply_pragmas, create_tables};
use crate::error::Result;
use crate::models::IdentityKey;

/// One persisted key, as reported by `history stats`.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub key: String,
    pub kind: String,
    pub title: Option<String>,
    pub added_at: String,
}

/// Durable record of every identity key that completed enrichment.
///
/// The key set is loaded once on open and kept in memory; writes go through
/// to SQLite one transaction per work, so a crash never leaves half a work
/// recorded.
pub struct ProcessedHistory {
    conn: Connection,
    path: Option<PathBuf>,
    keys: HashSet<String>,
}

impl ProcessedHistory {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let mut history = Self::from_connection(conn)?;
        history.path = Some(path.to_path_buf());
        tracing::debug!(path = %path.display(), keys = history.len(), "opened processed history");
        Ok(history)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        apply_pragmas(&conn)?;
        create_tables(&conn)?;
        let keys = {
            let mut stmt = conn.prepare("SELECT key FROM processed_keys")?;
            stmt.query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<HashSet<_>, _>>()?
        };
        Ok(Self {
            conn,
            path: None,
            keys,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn contains(&self, key: &IdentityKey) -> bool {
        self.keys.contains(&key.storage_key())
    }

    pub fn contains_any<'a, I>(&self, keys: I) -> bool
    where
        I: IntoIterator<Item = &'a IdentityKey>,
    {
        keys.into_iter().any(|k| self.contains(k))
    }

    /// Record every key of one work. Returns how many keys were new.
    pub fn append(&mut self, keys: &BTreeSet<IdentityKey>, title: Option<&str>) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        for key in keys {
            inserted += tx.execute(
                "INSERT OR IGNORE INTO processed_keys (key, kind, title, added_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![key.storage_key(), key.kind(), title, now],
            )?;
        }
        tx.commit()?;
        self.keys.extend(keys.iter().map(IdentityKey::storage_key));
        Ok(inserted)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn clear(&mut self) -> Result<usize> {
        let removed = self.conn.execute("DELETE FROM processed_keys", [])?;
        self.keys.clear();
        Ok(removed)
    }

    /// Key counts grouped by kind.
    pub fn counts_by_kind(&self) -> Result<Vec<(String, usize)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT kind, COUNT(*) FROM processed_keys GROUP BY kind ORDER BY kind")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT key, kind, title, added_at FROM processed_keys
             ORDER BY added_at DESC, key LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok(HistoryEntry {
                    key: row.get(0)?,
                    kind: row.get(1)?,
                    title: row.get(2)?,
                    added_at: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PMID;
    use tempfile::TempDir;

    fn keys() -> BTreeSet<IdentityKey> {
        BTreeSet::from([
            IdentityKey::doi("10.1000/a"),
            IdentityKey::external(PMID, "1"),
            IdentityKey::title("a study"),
        ])
    }

    #[test]
    fn append_then_contains() {
        let mut history = ProcessedHistory::open_in_memory().unwrap();
        assert!(history.is_empty());
        assert_eq!(history.append(&keys(), Some("A Study")).unwrap(), 3);
        assert!(history.contains(&IdentityKey::external(PMID, "1")));
        assert!(!history.contains(&IdentityKey::doi("10.1000/b")));
    }

    #[test]
    fn append_is_idempotent() {
        let mut history = ProcessedHistory::open_in_memory().unwrap();
        history.append(&keys(), None).unwrap();
        assert_eq!(history.append(&keys(), None).unwrap(), 0);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn contains_any_matches_single_overlap() {
        let mut history = ProcessedHistory::open_in_memory().unwrap();
        history.append(&keys(), None).unwrap();
        let probe = [IdentityKey::doi("10.9/zzz"), IdentityKey::title("a study")];
        assert!(history.contains_any(&probe));
        assert!(!history.contains_any(&probe[..1]));
    }

    #[test]
    fn survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("history.db");
        {
            let mut history = ProcessedHistory::open(&path).unwrap();
            history.append(&keys(), Some("A Study")).unwrap();
        }
        let history = ProcessedHistory::open(&path).unwrap();
        assert_eq!(history.len(), 3);
        assert!(history.contains(&IdentityKey::doi("10.1000/A")));
        assert_eq!(history.path(), Some(path.as_path()));
    }

    #[test]
    fn clear_removes_everything() {
        let mut history = ProcessedHistory::open_in_memory().unwrap();
        history.append(&keys(), None).unwrap();
        assert_eq!(history.clear().unwrap(), 3);
        assert!(history.is_empty());
        assert!(history.recent(10).unwrap().is_empty());
    }

    #[test]
    fn counts_group_by_kind() {
        let mut history = ProcessedHistory::open_in_memory().unwrap();
        history.append(&keys(), None).unwrap();
        let counts = history.counts_by_kind().unwrap();
        assert_eq!(
            counts,
            vec![
                ("doi".to_string(), 1),
                ("pmid".to_string(), 1),
                ("title".to_string(), 1)
            ]
        );
    }
}
