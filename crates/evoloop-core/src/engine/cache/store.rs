use super::CacheError;
use super::key::CacheKey;
use crate::engine::embedding::Embedding;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use tracing::debug;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS embeddings (
    model_id      TEXT    NOT NULL,
    mode          TEXT    NOT NULL,
    sequence_hash TEXT    NOT NULL,
    dim           INTEGER NOT NULL,
    vector        BLOB    NOT NULL,
    PRIMARY KEY (model_id, mode, sequence_hash)
);";

/// Persistent tier of the representation cache.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::Io {
                path: parent.to_string_lossy().to_string(),
                source: e,
            })?;
        }
        let unavailable = |e: rusqlite::Error| CacheError::Unavailable {
            path: path.to_string_lossy().to_string(),
            source: e,
        };
        let conn = Connection::open(path).map_err(unavailable)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")
            .map_err(unavailable)?;
        conn.execute_batch(SCHEMA).map_err(unavailable)?;
        debug!(path = %path.display(), "Opened representation store.");
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Fetches a stored vector. Rows whose blob disagrees with the recorded dimension are
    /// reported as absent.
    pub fn get(&self, key: &CacheKey) -> Result<Option<Embedding>, CacheError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT dim, vector FROM embeddings
             WHERE model_id = ?1 AND mode = ?2 AND sequence_hash = ?3",
        )?;
        let row: Option<(i64, Vec<u8>)> = stmt
            .query_row(
                params![key.model_id, key.mode.as_str(), key.sequence_hash],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(row.and_then(|(dim, blob)| {
            let embedding = Embedding::from_le_bytes(&blob)?;
            if dim < 0 || embedding.dim() != dim as usize || embedding.dim() == 0 {
                debug!(key = %key, dim, blob_len = blob.len(), "Ignoring corrupt cache row.");
                return None;
            }
            Some(embedding)
        }))
    }

    /// Writes all entries in one transaction.
    pub fn put_many(&mut self, entries: &[(CacheKey, Embedding)]) -> Result<usize, CacheError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO embeddings (model_id, mode, sequence_hash, dim, vector)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (key, embedding) in entries {
                stmt.execute(params![
                    key.model_id,
                    key.mode.as_str(),
                    key.sequence_hash,
                    embedding.dim() as i64,
                    embedding.to_le_bytes()
                ])?;
            }
        }
        tx.commit()?;
        Ok(entries.len())
    }

    pub fn len(&self) -> Result<usize, CacheError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }

    pub fn clear(&self) -> Result<usize, CacheError> {
        Ok(self.conn.execute("DELETE FROM embeddings", [])?)
    }
}
