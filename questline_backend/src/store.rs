use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection, Transaction};
use std::path::Path;
use std::sync::Mutex;

/// Named collections in the per-user document subtree. Profile and the two
/// routine documents are singletons; the rest are multi-document collections
/// reconciled by id diffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKey {
    Profile,
    Metas,
    Missions,
    Skills,
    Routine,
    RoutineTemplates,
    Guilds,
    Users,
}

impl CollectionKey {
    pub fn as_str(self) -> &'static str {
        match self {
            CollectionKey::Profile => "profile",
            CollectionKey::Metas => "metas",
            CollectionKey::Missions => "missions",
            CollectionKey::Skills => "skills",
            CollectionKey::Routine => "routine",
            CollectionKey::RoutineTemplates => "routine_templates",
            CollectionKey::Guilds => "guilds",
            CollectionKey::Users => "users",
        }
    }

    pub fn is_singleton(self) -> bool {
        matches!(
            self,
            CollectionKey::Profile | CollectionKey::Routine | CollectionKey::RoutineTemplates
        )
    }
}

/// What a diff-based reconcile actually did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub upserted: usize,
    pub deleted: Vec<String>,
}

/// Document store over sqlite. Documents are opaque JSON blobs keyed by
/// string id; no schema is enforced beyond that.
pub struct DocumentStore {
    conn: Mutex<Connection>,
}

impl DocumentStore {
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Store lock poisoned: {}", e))
    }

    /// Create or open the store file.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS singletons (
                key TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            )"#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection)",
            [],
        )?;

        Ok(())
    }

    pub fn write_singleton(&self, key: CollectionKey, data: &serde_json::Value) -> Result<()> {
        let conn = self.lock_conn()?;
        Self::write_singleton_inner(&conn, key, data)
    }

    fn write_singleton_inner(
        conn: &Connection,
        key: CollectionKey,
        data: &serde_json::Value,
    ) -> Result<()> {
        conn.execute(
            "INSERT INTO singletons (key, data, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
            params![key.as_str(), data.to_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn read_singleton(&self, key: CollectionKey) -> Result<Option<serde_json::Value>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT data FROM singletons WHERE key = ?1")?;
        let mut rows = stmt.query_map([key.as_str()], |row| row.get::<_, String>(0))?;
        match rows.next() {
            Some(raw) => Ok(Some(serde_json::from_str(&raw?)?)),
            None => Ok(None),
        }
    }

    pub fn list_ids(&self, collection: CollectionKey) -> Result<Vec<String>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT id FROM documents WHERE collection = ?1")?;
        let ids = stmt
            .query_map([collection.as_str()], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    pub fn upsert_document(
        &self,
        collection: CollectionKey,
        id: &str,
        data: &serde_json::Value,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        Self::upsert_inner(&conn, collection, id, data)
    }

    fn upsert_inner(
        conn: &Connection,
        collection: CollectionKey,
        id: &str,
        data: &serde_json::Value,
    ) -> Result<()> {
        conn.execute(
            "INSERT INTO documents (collection, id, data, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(collection, id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
            params![
                collection.as_str(),
                id,
                data.to_string(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Explicit single-document delete. The synchronizer never calls this
    /// (its contract is diff-based reconcile); it exists for partial updates.
    pub fn delete_document(&self, collection: CollectionKey, id: &str) -> Result<bool> {
        let conn = self.lock_conn()?;
        let affected = conn.execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection.as_str(), id],
        )?;
        Ok(affected > 0)
    }

    pub fn read_collection(
        &self,
        collection: CollectionKey,
    ) -> Result<Vec<(String, serde_json::Value)>> {
        let conn = self.lock_conn()?;
        let mut stmt =
            conn.prepare("SELECT id, data FROM documents WHERE collection = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map([collection.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(id, raw)| Ok((id, serde_json::from_str(&raw)?)))
            .collect()
    }

    /// Diff-based reconciliation: the passed array is the full authoritative
    /// collection. Ids stored but absent from `docs` are deleted; every id in
    /// `docs` is upserted. Runs in one transaction.
    pub fn reconcile(
        &self,
        collection: CollectionKey,
        docs: &[(String, serde_json::Value)],
    ) -> Result<ReconcileReport> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let report = Self::reconcile_inner(&tx, collection, docs)?;
        tx.commit()?;
        Ok(report)
    }

    fn reconcile_inner(
        tx: &Transaction<'_>,
        collection: CollectionKey,
        docs: &[(String, serde_json::Value)],
    ) -> Result<ReconcileReport> {
        let stored_ids: Vec<String> = {
            let mut stmt = tx.prepare("SELECT id FROM documents WHERE collection = ?1")?;
            let ids = stmt
                .query_map([collection.as_str()], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids
        };

        let mut report = ReconcileReport::default();
        for stored in &stored_ids {
            if !docs.iter().any(|(id, _)| id == stored) {
                tx.execute(
                    "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                    params![collection.as_str(), stored],
                )?;
                report.deleted.push(stored.clone());
            }
        }
        for (id, data) in docs {
            Self::upsert_inner(tx, collection, id, data)?;
            report.upserted += 1;
        }
        Ok(report)
    }

    /// Atomically persist the three collections the completion cascade
    /// touches. Either all three land or none do.
    pub fn commit_batch(
        &self,
        profile: &serde_json::Value,
        missions: &[(String, serde_json::Value)],
        skills: &[(String, serde_json::Value)],
    ) -> Result<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        Self::write_singleton_inner(&tx, CollectionKey::Profile, profile)?;
        Self::reconcile_inner(&tx, CollectionKey::Missions, missions)?;
        Self::reconcile_inner(&tx, CollectionKey::Skills, skills)?;
        tx.commit()?;
        Ok(())
    }

    /// Wipe everything. Used by reset and import before re-seeding.
    pub fn clear_all(&self) -> Result<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM documents", [])?;
        tx.execute("DELETE FROM singletons", [])?;
        tx.commit()?;
        Ok(())
    }
}
