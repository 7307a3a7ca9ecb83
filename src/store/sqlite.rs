//! SQLite-backed store with FTS5 and sqlite-vec.

use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::Once;

use tokio_rusqlite::{Connection, OptionalExtension, ffi};
use tracing::debug;

use super::{DocumentMeta, DocumentRecord, KnnHit, LexicalEntry, LexicalHit};
use crate::types::DocsError;

/// Handle over the single database holding documents, the lexical index, and
/// the vector index. Clone-cheap; all calls go through one connection.
#[derive(Clone)]
pub struct DocStore {
    conn: Connection,
    dimensions: usize,
}

impl DocStore {
    /// Opens (creating if needed) the database at `path` and ensures the
    /// schema exists. `dimensions` fixes the vec0 embedding column width.
    pub async fn open(path: impl AsRef<Path>, dimensions: usize) -> Result<Self, DocsError> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open(path)
            .await
            .map_err(|err| DocsError::Storage(err.to_string()))?;
        let store = Self { conn, dimensions };
        store.verify_vec_extension().await?;
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub async fn open_in_memory(dimensions: usize) -> Result<Self, DocsError> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open_in_memory()
            .await
            .map_err(|err| DocsError::Storage(err.to_string()))?;
        let store = Self { conn, dimensions };
        store.verify_vec_extension().await?;
        store.init_schema().await?;
        Ok(store)
    }

    fn register_sqlite_vec() -> Result<(), DocsError> {
        use std::sync::Mutex;

        static INIT: Once = Once::new();
        static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

        INIT.call_once(|| {
            let result = unsafe {
                type SqliteExtensionInit = unsafe extern "C" fn(
                    *mut ffi::sqlite3,
                    *mut *mut c_char,
                    *const ffi::sqlite3_api_routines,
                ) -> i32;

                let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
                let init_fn: SqliteExtensionInit =
                    transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
                let rc = ffi::sqlite3_auto_extension(Some(init_fn));
                if rc != 0 {
                    Err(format!(
                        "failed to register sqlite-vec extension (code {rc})"
                    ))
                } else {
                    Ok(())
                }
            };
            *INIT_RESULT.lock().expect("init result mutex poisoned") = Some(result);
        });

        INIT_RESULT
            .lock()
            .expect("init result mutex poisoned")
            .clone()
            .expect("init was called but result not set")
            .map_err(DocsError::Storage)
    }

    async fn verify_vec_extension(&self) -> Result<(), DocsError> {
        self.conn
            .call(|conn| {
                conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))
                    .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map(|version| debug!(%version, "sqlite-vec ready"))
            .map_err(|err| DocsError::Storage(err.to_string()))
    }

    async fn init_schema(&self) -> Result<(), DocsError> {
        let dimensions = self.dimensions;
        self.conn
            .call(move |conn| {
                conn.execute_batch(
                    "CREATE TABLE IF NOT EXISTS documents (
                        id TEXT PRIMARY KEY,
                        url TEXT UNIQUE NOT NULL,
                        source_name TEXT NOT NULL,
                        title TEXT,
                        last_modified INTEGER
                    );
                    CREATE INDEX IF NOT EXISTS idx_documents_source
                        ON documents(source_name);
                    CREATE VIRTUAL TABLE IF NOT EXISTS search_index USING fts5(
                        title,
                        headings,
                        content,
                        url UNINDEXED
                    );",
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                conn.execute_batch(&format!(
                    "CREATE VIRTUAL TABLE IF NOT EXISTS vec_chunks USING vec0(
                        doc_id TEXT,
                        chunk_embedding float[{dimensions}] distance_metric=cosine,
                        +chunk_text TEXT
                    );"
                ))
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await
            .map_err(|err| DocsError::Storage(err.to_string()))
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub async fn upsert_document(&self, record: DocumentRecord) -> Result<(), DocsError> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO documents (id, url, source_name, title, last_modified)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    (
                        &record.id,
                        &record.url,
                        &record.source_name,
                        &record.title,
                        record.last_modified,
                    ),
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await
            .map_err(|err| DocsError::Storage(err.to_string()))
    }

    /// Replaces the lexical entry for a URL. Delete-then-insert keeps the
    /// index free of duplicate matches for the same page.
    pub async fn replace_lexical(&self, entry: LexicalEntry) -> Result<(), DocsError> {
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM search_index WHERE url = ?1", [&entry.url])
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                conn.execute(
                    "INSERT INTO search_index (title, headings, content, url)
                     VALUES (?1, ?2, ?3, ?4)",
                    (&entry.title, &entry.headings, &entry.content, &entry.url),
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await
            .map_err(|err| DocsError::Storage(err.to_string()))
    }

    /// Runs an FTS5 match with the engine's bm25 ordering and a highlighted
    /// snippet over the content column.
    pub async fn lexical_search(
        &self,
        match_expr: &str,
        limit: usize,
    ) -> Result<Vec<LexicalHit>, DocsError> {
        let match_expr = match_expr.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT d.title, d.url, search_index.rank,
                                snippet(search_index, 2, '<b>', '</b>', '...', 30)
                         FROM search_index
                         JOIN documents d ON d.url = search_index.url
                         WHERE search_index MATCH ?1
                         ORDER BY search_index.rank
                         LIMIT ?2",
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let rows = stmt
                    .query_map((&match_expr, limit as i64), |row| {
                        Ok(LexicalHit {
                            title: row.get(0)?,
                            url: row.get(1)?,
                            score: row.get(2)?,
                            snippet: row.get(3)?,
                        })
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut hits = Vec::new();
                for row in rows {
                    hits.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(hits)
            })
            .await
            .map_err(|err| DocsError::Storage(err.to_string()))
    }

    pub async fn delete_chunks(&self, doc_id: &str) -> Result<usize, DocsError> {
        let doc_id = doc_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM vec_chunks WHERE doc_id = ?1", [&doc_id])
                    .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(|err| DocsError::Storage(err.to_string()))
    }

    /// Inserts chunk texts with their embeddings for one document. Vectors
    /// are passed to vec0 as JSON.
    pub async fn insert_chunks(
        &self,
        doc_id: &str,
        chunks: Vec<(String, Vec<f32>)>,
    ) -> Result<(), DocsError> {
        if chunks.is_empty() {
            return Ok(());
        }
        let doc_id = doc_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "INSERT INTO vec_chunks (doc_id, chunk_embedding, chunk_text)
                         VALUES (?1, ?2, ?3)",
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                for (text, embedding) in &chunks {
                    let vector_json = serde_json::to_string(embedding).map_err(|err| {
                        tokio_rusqlite::Error::Other(Box::new(err))
                    })?;
                    stmt.execute((&doc_id, &vector_json, text))
                        .map_err(tokio_rusqlite::Error::Rusqlite)?;
                }
                Ok(())
            })
            .await
            .map_err(|err| DocsError::Storage(err.to_string()))
    }

    /// K-nearest-neighbor search over chunk embeddings (cosine distance).
    pub async fn knn(&self, query: &[f32], k: usize) -> Result<Vec<KnnHit>, DocsError> {
        let vector_json =
            serde_json::to_string(query).map_err(|err| DocsError::Storage(err.to_string()))?;
        self.conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT doc_id, chunk_text, distance
                         FROM vec_chunks
                         WHERE chunk_embedding MATCH ?1 AND k = ?2",
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let rows = stmt
                    .query_map((&vector_json, k as i64), |row| {
                        Ok(KnnHit {
                            doc_id: row.get(0)?,
                            chunk_text: row.get(1)?,
                            distance: row.get(2)?,
                        })
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut hits = Vec::new();
                for row in rows {
                    hits.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(hits)
            })
            .await
            .map_err(|err| DocsError::Storage(err.to_string()))
    }

    pub async fn document_meta(&self, doc_id: &str) -> Result<Option<DocumentMeta>, DocsError> {
        let doc_id = doc_id.to_string();
        self.conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT title, url FROM documents WHERE id = ?1",
                    [&doc_id],
                    |row| {
                        Ok(DocumentMeta {
                            title: row.get(0)?,
                            url: row.get(1)?,
                        })
                    },
                )
                .optional()
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(|err| DocsError::Storage(err.to_string()))
    }

    /// Epoch milliseconds of the most recent index write for a source, if any.
    pub async fn last_crawled_at(&self, source_name: &str) -> Result<Option<i64>, DocsError> {
        let source_name = source_name.to_string();
        self.conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT MAX(last_modified) FROM documents WHERE source_name = ?1",
                    [&source_name],
                    |row| row.get::<_, Option<i64>>(0),
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(|err| DocsError::Storage(err.to_string()))
    }

    pub async fn count_documents(&self) -> Result<usize, DocsError> {
        self.conn
            .call(|conn| {
                conn.query_row("SELECT COUNT(*) FROM documents", [], |row| {
                    row.get::<_, i64>(0)
                })
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map(|count| count as usize)
            .map_err(|err| DocsError::Storage(err.to_string()))
    }

    pub async fn count_by_source(&self, source_name: &str) -> Result<usize, DocsError> {
        let source_name = source_name.to_string();
        self.conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM documents WHERE source_name = ?1",
                    [&source_name],
                    |row| row.get::<_, i64>(0),
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map(|count| count as usize)
            .map_err(|err| DocsError::Storage(err.to_string()))
    }

    /// Removes a source's documents together with their lexical entries and
    /// chunks, so no stale entries survive a recrawl.
    pub async fn delete_source(&self, source_name: &str) -> Result<usize, DocsError> {
        let source_name = source_name.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM search_index WHERE url IN
                        (SELECT url FROM documents WHERE source_name = ?1)",
                    [&source_name],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                conn.execute(
                    "DELETE FROM vec_chunks WHERE doc_id IN
                        (SELECT id FROM documents WHERE source_name = ?1)",
                    [&source_name],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                conn.execute("DELETE FROM documents WHERE source_name = ?1", [&source_name])
                    .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(|err| DocsError::Storage(err.to_string()))
    }

    #[cfg(test)]
    pub(crate) async fn count_chunks(&self) -> Result<usize, DocsError> {
        self.conn
            .call(|conn| {
                conn.query_row("SELECT COUNT(*) FROM vec_chunks", [], |row| {
                    row.get::<_, i64>(0)
                })
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map(|count| count as usize)
            .map_err(|err| DocsError::Storage(err.to_string()))
    }

    #[cfg(test)]
    pub(crate) async fn count_lexical(&self, url: &str) -> Result<usize, DocsError> {
        let url = url.to_string();
        self.conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM search_index WHERE url = ?1",
                    [&url],
                    |row| row.get::<_, i64>(0),
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map(|count| count as usize)
            .map_err(|err| DocsError::Storage(err.to_string()))
    }
}
