use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use super::{name_key, taste_key, url_key, ChangeSet, DiscoveryStore};
use crate::domain::{DiscoveredLink, SourceDefinition, StoredEvent, TasteEntry, TasteKind};
use crate::error::{DiscoveryError, Result};

/// SQLite-backed store. Records live as JSON in a `data` column; the other
/// columns are lookup keys with the uniqueness rules of the registry.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS links (
                seq   INTEGER PRIMARY KEY AUTOINCREMENT,
                url   TEXT NOT NULL UNIQUE,
                data  TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS sources (
                seq       INTEGER PRIMARY KEY AUTOINCREMENT,
                name_key  TEXT NOT NULL UNIQUE,
                url_key   TEXT NOT NULL UNIQUE,
                data      TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS events (
                dedup_key  TEXT PRIMARY KEY,
                start      TEXT,
                data       TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS taste (
                kind    TEXT NOT NULL,
                key     TEXT NOT NULL,
                manual  INTEGER NOT NULL,
                data    TEXT NOT NULL,
                PRIMARY KEY (kind, key)
            );
            "#,
        )?;
        info!("Opened discovery store at {}", path.display());
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DiscoveryError::Storage("sqlite connection lock poisoned".to_string()))
    }

    fn query_all<T: DeserializeOwned>(&self, sql: &str) -> Result<Vec<T>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for raw in rows {
            out.push(serde_json::from_str(&raw?)?);
        }
        Ok(out)
    }

    fn query_one<T: DeserializeOwned>(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Option<T>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(sql, params, |row| row.get(0))
            .optional()?;
        raw.map(|r| serde_json::from_str(&r)).transpose().map_err(Into::into)
    }
}

fn json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

impl DiscoveryStore for SqliteStore {
    fn add_link(&self, link: DiscoveredLink) -> Result<DiscoveredLink> {
        {
            let conn = self.conn()?;
            conn.execute(
                "INSERT OR IGNORE INTO links (url, data) VALUES (?1, ?2)",
                params![link.url, json(&link)?],
            )?;
        }
        self.link(&link.url)?
            .ok_or_else(|| DiscoveryError::Storage(format!("link {} vanished after insert", link.url)))
    }

    fn links(&self) -> Result<Vec<DiscoveredLink>> {
        self.query_all("SELECT data FROM links ORDER BY seq")
    }

    fn link(&self, url: &str) -> Result<Option<DiscoveredLink>> {
        self.query_one("SELECT data FROM links WHERE url = ?1", &[&url])
    }

    fn sources(&self) -> Result<Vec<SourceDefinition>> {
        self.query_all("SELECT data FROM sources ORDER BY seq")
    }

    fn source_by_name(&self, name: &str) -> Result<Option<SourceDefinition>> {
        self.query_one("SELECT data FROM sources WHERE name_key = ?1", &[&name_key(name)])
    }

    fn source_by_url(&self, url: &str) -> Result<Option<SourceDefinition>> {
        self.query_one("SELECT data FROM sources WHERE url_key = ?1", &[&url_key(url)])
    }

    fn events(&self) -> Result<Vec<StoredEvent>> {
        self.query_all("SELECT data FROM events ORDER BY start, dedup_key")
    }

    fn event(&self, dedup_key: &str) -> Result<Option<StoredEvent>> {
        self.query_one("SELECT data FROM events WHERE dedup_key = ?1", &[&dedup_key])
    }

    fn taste_entries(&self) -> Result<Vec<TasteEntry>> {
        self.query_all("SELECT data FROM taste ORDER BY kind, key")
    }

    fn taste_entry(&self, kind: TasteKind, key: &str) -> Result<Option<TasteEntry>> {
        self.query_one(
            "SELECT data FROM taste WHERE kind = ?1 AND key = ?2",
            &[&kind.as_str(), &taste_key(key)],
        )
    }

    fn apply(&self, changes: &ChangeSet) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        for source in &changes.sources {
            tx.execute(
                "INSERT OR IGNORE INTO sources (name_key, url_key, data) VALUES (?1, ?2, ?3)",
                params![name_key(&source.name), url_key(&source.url), json(source)?],
            )?;
        }
        for row in &changes.events {
            let start = row
                .event
                .start_datetime
                .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string());
            tx.execute(
                "INSERT OR REPLACE INTO events (dedup_key, start, data) VALUES (?1, ?2, ?3)",
                params![row.event.dedup_key, start, json(row)?],
            )?;
        }
        for entry in &changes.taste {
            tx.execute(
                "INSERT INTO taste (kind, key, manual, data) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (kind, key) DO UPDATE SET manual = excluded.manual, data = excluded.data
                 WHERE taste.manual = 0 AND excluded.manual = 1",
                params![entry.kind.as_str(), taste_key(&entry.key), entry.manual, json(entry)?],
            )?;
        }
        if let Some(ref link) = changes.link {
            tx.execute(
                "INSERT INTO links (url, data) VALUES (?1, ?2)
                 ON CONFLICT (url) DO UPDATE SET data = excluded.data",
                params![link.url, json(link)?],
            )?;
        }

        tx.commit()?;
        debug!(
            sources = changes.sources.len(),
            events = changes.events.len(),
            taste = changes.taste.len(),
            "committed change set"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Confidence, LinkStatus, NormalizedEvent};
    use chrono::Utc;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn open() -> (TempDir, SqliteStore) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path().join("nested").join("discovery.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn links_round_trip_and_update_in_place() {
        let (_dir, store) = open();
        let link = store
            .add_link(DiscoveredLink::pending("https://a.example/".into(), Some("tip".into()), Utc::now()))
            .unwrap();
        store.add_link(DiscoveredLink::pending("https://b.example/".into(), None, Utc::now())).unwrap();

        let mut done = link.clone();
        done.status = LinkStatus::Processed;
        done.events_found = 3;
        store.apply(&ChangeSet { link: Some(done), ..ChangeSet::default() }).unwrap();

        let links = store.links().unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].status, LinkStatus::Processed);
        assert_eq!(links[0].note.as_deref(), Some("tip"));
        assert_eq!(links[1].status, LinkStatus::Pending);
    }

    #[test]
    fn registry_uniqueness_and_taste_protection() {
        let (_dir, store) = open();
        let src: SourceDefinition =
            toml::from_str("name = \"blue_room\"\nurl = \"https://blueroom.example/calendar\"").unwrap();
        let dup_url: SourceDefinition =
            toml::from_str("name = \"other\"\nurl = \"https://blueroom.example/calendar/\"").unwrap();
        let manual = TasteEntry {
            kind: TasteKind::Artist,
            key: "Ann Trio".into(),
            weight: 0.9,
            manual: true,
        };
        let auto = TasteEntry {
            weight: 0.6,
            manual: false,
            ..manual.clone()
        };
        store
            .apply(&ChangeSet {
                sources: vec![src, dup_url],
                taste: vec![manual.clone()],
                ..ChangeSet::default()
            })
            .unwrap();
        store.apply(&ChangeSet { taste: vec![auto], ..ChangeSet::default() }).unwrap();

        assert_eq!(store.sources().unwrap().len(), 1);
        assert!(store.source_by_name("Blue_Room").unwrap().is_some());
        assert_eq!(store.taste_entry(TasteKind::Artist, "ann trio").unwrap(), Some(manual));
    }

    #[test]
    fn events_persist_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("discovery.db");
        let event = NormalizedEvent::new("Trio", None, "Blue Room", Confidence::High);
        {
            let store = SqliteStore::open(&path).unwrap();
            let row = StoredEvent {
                event: event.clone(),
                provenance: BTreeSet::from(["blue_room".to_string()]),
                first_seen: Utc::now(),
            };
            store.apply(&ChangeSet { events: vec![row], ..ChangeSet::default() }).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let stored = store.event(&event.dedup_key).unwrap().unwrap();
        assert_eq!(stored.event, event);
    }
}
