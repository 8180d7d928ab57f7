//! SQLite + `sqlite-vec` backed `Backend` implementation.
//!
//! Extension registration follows `wg-ragsmith::stores::sqlite`'s
//! `register_sqlite_vec` pattern: `sqlite3_auto_extension` is unsafe, global,
//! and idempotent, so it is gated behind a `std::sync::Once` and the result
//! cached for every connection opened afterward.

use std::path::Path;
use std::sync::{Mutex, Once, OnceLock};

use async_trait::async_trait;
use tokio_rusqlite::{ffi, Connection};

use crate::error::{CoreError, CoreResult};
use crate::stores::{Backend, ChunkRecord};

static VEC_EXTENSION_INIT: Once = Once::new();
static VEC_EXTENSION_RESULT: OnceLock<Mutex<Result<(), String>>> = OnceLock::new();

fn register_sqlite_vec() -> CoreResult<()> {
    VEC_EXTENSION_INIT.call_once(|| {
        // SAFETY: `sqlite3_auto_extension` registers a callback invoked by
        // SQLite on every new connection; `sqlite_vec::sqlite3_vec_init` is
        // the extension's documented entry point and matches the signature
        // SQLite expects.
        let result = unsafe {
            ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite_vec::sqlite3_vec_init as *const (),
            )))
        };
        let outcome = if result == ffi::SQLITE_OK {
            Ok(())
        } else {
            Err(format!("sqlite3_auto_extension returned {result}"))
        };
        let _ = VEC_EXTENSION_RESULT.set(Mutex::new(outcome));
    });

    match VEC_EXTENSION_RESULT.get() {
        Some(lock) => lock
            .lock()
            .unwrap()
            .clone()
            .map_err(CoreError::VectorStoreUnavailable),
        None => Err(CoreError::VectorStoreUnavailable(
            "sqlite-vec extension registration did not run".to_string(),
        )),
    }
}

pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    pub async fn open(path: impl AsRef<Path>, embedding_dimension: usize) -> CoreResult<Self> {
        register_sqlite_vec()?;

        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)
            .await
            .map_err(|e| CoreError::VectorStoreUnavailable(e.to_string()))?;

        conn.call(move |conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS chunks (
                    id TEXT PRIMARY KEY,
                    domain TEXT NOT NULL,
                    site_name TEXT NOT NULL,
                    page_name TEXT NOT NULL,
                    page_url TEXT NOT NULL,
                    content TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS chunks_page_url_idx ON chunks(page_url);
                CREATE INDEX IF NOT EXISTS chunks_domain_idx ON chunks(domain);",
            )?;
            Ok::<_, tokio_rusqlite::Error>(())
        })
        .await
        .map_err(|e| CoreError::VectorStoreUnavailable(e.to_string()))?;

        let vec_table_sql = format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS chunks_embeddings USING vec0(
                chunk_id TEXT PRIMARY KEY,
                embedding float[{embedding_dimension}]
            );"
        );
        conn.call(move |conn| {
            conn.execute_batch(&vec_table_sql)?;
            Ok::<_, tokio_rusqlite::Error>(())
        })
        .await
        .map_err(|e| CoreError::VectorStoreUnavailable(e.to_string()))?;

        conn.call(|conn| Ok::<_, tokio_rusqlite::Error>(conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))))
            .await
            .map_err(|e| CoreError::VectorStoreUnavailable(format!("sqlite-vec not loaded: {e}")))?
            .map_err(|e| CoreError::VectorStoreUnavailable(format!("sqlite-vec not loaded: {e}")))?;

        Ok(SqliteBackend { conn })
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn insert_chunks(&self, chunks: Vec<ChunkRecord>) -> CoreResult<()> {
        let to_insert = chunks
            .into_iter()
            .filter(|c| c.embedding.is_some())
            .collect::<Vec<_>>();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for record in &to_insert {
                    tx.execute(
                        "INSERT OR REPLACE INTO chunks (id, domain, site_name, page_name, page_url, content)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        tokio_rusqlite::params![
                            record.chunk_id,
                            record.domain,
                            record.site_name,
                            record.page_name,
                            record.page_url,
                            record.chunk_text,
                        ],
                    )?;

                    let embedding = record.embedding.as_ref().expect("filtered above");
                    let blob = embedding
                        .iter()
                        .flat_map(|f| f.to_le_bytes())
                        .collect::<Vec<u8>>();
                    tx.execute(
                        "INSERT OR REPLACE INTO chunks_embeddings (chunk_id, embedding) VALUES (?1, ?2)",
                        tokio_rusqlite::params![record.chunk_id, blob],
                    )?;
                }
                tx.commit()?;
                Ok::<_, tokio_rusqlite::Error>(())
            })
            .await
            .map_err(|e| CoreError::VectorStoreUnavailable(e.to_string()))
    }

    async fn get_chunks_by_url(&self, page_url: &str) -> CoreResult<Vec<ChunkRecord>> {
        let page_url = page_url.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, domain, site_name, page_name, page_url, content FROM chunks WHERE page_url = ?1",
                )?;
                let rows = stmt
                    .query_map(tokio_rusqlite::params![page_url], |row| {
                        Ok(ChunkRecord {
                            chunk_id: row.get(0)?,
                            domain: row.get(1)?,
                            site_name: row.get(2)?,
                            page_name: row.get(3)?,
                            page_url: row.get(4)?,
                            chunk_text: row.get(5)?,
                            embedding: None,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok::<_, tokio_rusqlite::Error>(rows)
            })
            .await
            .map_err(|e| CoreError::VectorStoreUnavailable(e.to_string()))
    }

    async fn delete_chunks_by_url(&self, page_url: &str) -> CoreResult<usize> {
        let page_url = page_url.to_string();
        self.conn
            .call(move |conn| {
                let ids: Vec<String> = {
                    let mut stmt = conn.prepare("SELECT id FROM chunks WHERE page_url = ?1")?;
                    stmt.query_map(tokio_rusqlite::params![page_url], |row| row.get(0))?
                        .collect::<Result<Vec<_>, _>>()?
                };
                for id in &ids {
                    conn.execute(
                        "DELETE FROM chunks_embeddings WHERE chunk_id = ?1",
                        tokio_rusqlite::params![id],
                    )?;
                }
                let deleted = conn.execute(
                    "DELETE FROM chunks WHERE page_url = ?1",
                    tokio_rusqlite::params![page_url],
                )?;
                Ok::<_, tokio_rusqlite::Error>(deleted)
            })
            .await
            .map_err(|e| CoreError::VectorStoreUnavailable(e.to_string()))
    }

    async fn delete_domain(&self, domain: &str) -> CoreResult<usize> {
        let domain = domain.to_string();
        self.conn
            .call(move |conn| {
                let ids: Vec<String> = {
                    let mut stmt = conn.prepare("SELECT id FROM chunks WHERE domain = ?1")?;
                    stmt.query_map(tokio_rusqlite::params![domain], |row| row.get(0))?
                        .collect::<Result<Vec<_>, _>>()?
                };
                for id in &ids {
                    conn.execute(
                        "DELETE FROM chunks_embeddings WHERE chunk_id = ?1",
                        tokio_rusqlite::params![id],
                    )?;
                }
                let deleted = conn.execute(
                    "DELETE FROM chunks WHERE domain = ?1",
                    tokio_rusqlite::params![domain],
                )?;
                Ok::<_, tokio_rusqlite::Error>(deleted)
            })
            .await
            .map_err(|e| CoreError::VectorStoreUnavailable(e.to_string()))
    }

    async fn search_similar(
        &self,
        query_embedding: &[f32],
        top_k: usize,
    ) -> CoreResult<Vec<(ChunkRecord, f32)>> {
        let blob = query_embedding
            .iter()
            .flat_map(|f| f.to_le_bytes())
            .collect::<Vec<u8>>();
        let top_k = top_k as i64;

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT c.id, c.domain, c.site_name, c.page_name, c.page_url, c.content, e.distance
                     FROM chunks_embeddings e
                     JOIN chunks c ON c.id = e.chunk_id
                     WHERE e.embedding MATCH ?1 AND k = ?2
                     ORDER BY e.distance ASC",
                )?;
                let rows = stmt
                    .query_map(tokio_rusqlite::params![blob, top_k], |row| {
                        let distance: f64 = row.get(6)?;
                        Ok((
                            ChunkRecord {
                                chunk_id: row.get(0)?,
                                domain: row.get(1)?,
                                site_name: row.get(2)?,
                                page_name: row.get(3)?,
                                page_url: row.get(4)?,
                                chunk_text: row.get(5)?,
                                embedding: None,
                            },
                            // sqlite-vec reports L2 distance on raw float
                            // vectors; embedders are contractually
                            // L2-normalized, so cosine similarity is
                            // `1 - distance^2/2`, clamped to [-1, 1].
                            (1.0 - (distance as f32).powi(2) / 2.0).clamp(-1.0, 1.0),
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok::<_, tokio_rusqlite::Error>(rows)
            })
            .await
            .map_err(|e| CoreError::VectorStoreUnavailable(e.to_string()))
    }

    async fn count(&self) -> CoreResult<usize> {
        self.conn
            .call(|conn| {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
                Ok::<_, tokio_rusqlite::Error>(count as usize)
            })
            .await
            .map_err(|e| CoreError::VectorStoreUnavailable(e.to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "sqlite-vec"
    }
}
