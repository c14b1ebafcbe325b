//! SQLite-backed fragment store.
//!
//! One row per `(document_key, kind)` in `fragments`; re-ingesting a ticket
//! replaces its rows in place. Embeddings are written as JSON array text and
//! read back as whatever SQLite holds (JSON text or a little-endian `f32`
//! BLOB), so vectors written by other tools stay usable.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use ticket_harness_core::models::{Fragment, FragmentKind, StoredVector};
use ticket_harness_core::source::FragmentSource;

/// Parent ticket or document row.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub document_key: String,
    pub title: Option<String>,
    pub status: Option<String>,
    /// File the record was ingested from.
    pub source_name: String,
    pub metadata_json: String,
    pub updated_at: i64,
}

/// A freshly computed embedding for a fragment.
#[derive(Debug, Clone, Copy)]
pub struct FragmentEmbedding<'a> {
    pub vector: &'a [f32],
    pub model: &'a str,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub documents: i64,
    pub fragments: i64,
    pub embedded: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindCount {
    pub kind: String,
    pub fragments: i64,
    pub embedded: i64,
}

pub struct SqliteFragmentStore {
    pool: SqlitePool,
}

impl SqliteFragmentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn upsert_document(&self, doc: &DocumentRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (document_key, title, status, source_name, metadata_json, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(document_key) DO UPDATE SET
                title = excluded.title,
                status = excluded.status,
                source_name = excluded.source_name,
                metadata_json = excluded.metadata_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&doc.document_key)
        .bind(&doc.title)
        .bind(&doc.status)
        .bind(&doc.source_name)
        .bind(&doc.metadata_json)
        .bind(doc.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or replace a fragment.
    ///
    /// Without a new embedding, the stored vector survives only if the
    /// content hash is unchanged; otherwise it is cleared so a stale vector
    /// never describes new text.
    pub async fn upsert_fragment(
        &self,
        fragment: &Fragment,
        content_hash: &str,
        embedding: Option<FragmentEmbedding<'_>>,
        updated_at: i64,
    ) -> Result<()> {
        let (vector_json, model) = match embedding {
            Some(e) => (Some(serde_json::to_string(e.vector)?), Some(e.model)),
            None => (None, None),
        };

        sqlx::query(
            r#"
            INSERT INTO fragments (document_key, kind, text, embedding, embedding_model,
                                   content_hash, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(document_key, kind) DO UPDATE SET
                text = excluded.text,
                embedding = CASE
                    WHEN excluded.embedding IS NOT NULL THEN excluded.embedding
                    WHEN fragments.content_hash = excluded.content_hash THEN fragments.embedding
                    ELSE NULL
                END,
                embedding_model = CASE
                    WHEN excluded.embedding IS NOT NULL THEN excluded.embedding_model
                    WHEN fragments.content_hash = excluded.content_hash THEN fragments.embedding_model
                    ELSE NULL
                END,
                content_hash = excluded.content_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&fragment.document_key)
        .bind(fragment.kind.as_str())
        .bind(&fragment.text)
        .bind(vector_json)
        .bind(model)
        .bind(content_hash)
        .bind(updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Stored hash and whether a vector is present, if the fragment exists.
    pub async fn content_hash(
        &self,
        document_key: &str,
        kind: &FragmentKind,
    ) -> Result<Option<(String, bool)>> {
        let row = sqlx::query(
            "SELECT content_hash, embedding IS NOT NULL AS has_embedding \
             FROM fragments WHERE document_key = ? AND kind = ?",
        )
        .bind(document_key)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            let has_embedding: i64 = r.get("has_embedding");
            (r.get("content_hash"), has_embedding != 0)
        }))
    }

    /// Delete fragments of `document_key` whose kind is not in `keep`.
    pub async fn remove_stale_kinds(&self, document_key: &str, keep: &[FragmentKind]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let kinds: Vec<String> =
            sqlx::query_scalar("SELECT kind FROM fragments WHERE document_key = ?")
                .bind(document_key)
                .fetch_all(&mut *tx)
                .await?;

        let mut removed = 0;
        for kind in kinds {
            if keep.iter().any(|k| k.as_str() == kind) {
                continue;
            }
            removed += sqlx::query("DELETE FROM fragments WHERE document_key = ? AND kind = ?")
                .bind(document_key)
                .bind(&kind)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(removed)
    }

    pub async fn counts(&self) -> Result<StoreCounts> {
        let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        let fragments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fragments")
            .fetch_one(&self.pool)
            .await?;
        let embedded: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM fragments WHERE embedding IS NOT NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(StoreCounts {
            documents,
            fragments,
            embedded,
        })
    }

    /// Most recent ingest timestamp across all documents.
    pub async fn last_updated(&self) -> Result<Option<i64>> {
        let ts: Option<i64> = sqlx::query_scalar("SELECT MAX(updated_at) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(ts)
    }

    pub async fn kind_counts(&self) -> Result<Vec<KindCount>> {
        let rows = sqlx::query(
            r#"
            SELECT kind,
                   COUNT(*) AS fragments,
                   SUM(CASE WHEN embedding IS NOT NULL THEN 1 ELSE 0 END) AS embedded
            FROM fragments
            GROUP BY kind
            ORDER BY fragments DESC, kind ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| KindCount {
                kind: row.get("kind"),
                fragments: row.get("fragments"),
                embedded: row.get("embedded"),
            })
            .collect())
    }
}

fn stored_vector(row: &SqliteRow) -> Result<Option<StoredVector>> {
    let storage: String = row.try_get("embedding_type")?;
    Ok(match storage.as_str() {
        "text" => Some(StoredVector::Serialized(
            row.try_get_unchecked::<String, _>("embedding")?,
        )),
        "blob" => Some(StoredVector::Blob(
            row.try_get_unchecked::<Vec<u8>, _>("embedding")?,
        )),
        "null" => None,
        other => {
            let key: String = row.try_get("document_key")?;
            debug!(document_key = %key, storage = other, "ignoring non-vector embedding value");
            None
        }
    })
}

#[async_trait]
impl FragmentSource for SqliteFragmentStore {
    async fn fetch_fragments(&self) -> Result<Vec<Fragment>> {
        let rows = sqlx::query(
            r#"
            SELECT document_key, kind, text, typeof(embedding) AS embedding_type, embedding
            FROM fragments
            WHERE text IS NOT NULL AND trim(text) != ''
            ORDER BY document_key ASC, kind ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut fragments = Vec::with_capacity(rows.len());
        for row in &rows {
            let document_key: String = row.try_get("document_key")?;
            let kind: String = row.try_get("kind")?;
            let text: String = row.try_get("text")?;
            let mut fragment = Fragment::new(document_key, kind, text);
            fragment.vector = stored_vector(row)?;
            fragments.push(fragment);
        }
        Ok(fragments)
    }
}
