use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use pgvector::Vector;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, info, warn};

use crate::ai::embeddings::Embedder;
use crate::graph::{Entity, GraphData, Relationship, entity_embedding_text};

use super::{
    DocumentStatus, EntityTypeCount, GraphStore, GraphSummary, UpsertSummary,
    filter_persistable_relationships,
};

const SCHEMA_DDL: &[&str] = &[
    "CREATE EXTENSION IF NOT EXISTS vector",
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        path TEXT NOT NULL,
        checksum TEXT,
        status TEXT DEFAULT 'pending',
        created_at TIMESTAMPTZ DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS entities (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        type TEXT NOT NULL,
        description TEXT,
        aliases JSONB,
        metadata JSONB,
        embedding VECTOR(768),
        version INT NOT NULL DEFAULT 1,
        created_at TIMESTAMPTZ DEFAULT now()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS embedding_index
        ON entities USING hnsw (embedding vector_cosine_ops)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS relationships (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        source_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
        target_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
        type TEXT NOT NULL,
        description TEXT,
        confidence DOUBLE PRECISION,
        source_paper_id TEXT,
        metadata JSONB,
        created_at TIMESTAMPTZ DEFAULT now(),
        UNIQUE (source_id, target_id, type)
    )
    "#,
];

const SERIALIZATION_RETRIES: u32 = 3;
const SERIALIZATION_BACKOFF_MS: u64 = 100;
const BATCH_SEARCH_CONCURRENCY: usize = 5;
const DEFAULT_CANDIDATES: usize = 5;

/// Graph store backed by Postgres with pgvector. One pool per process.
pub struct PgGraphStore {
    pool: PgPool,
    embedder: Arc<dyn Embedder>,
}

impl PgGraphStore {
    pub fn new(pool: PgPool, embedder: Arc<dyn Embedder>) -> Self {
        Self { pool, embedder }
    }

    pub async fn connect(database_url: &str, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .with_context(|| "failed to connect to the graph database")?;
        Ok(Self::new(pool, embedder))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn embed_entity(&self, entity: &Entity) -> Result<Vector> {
        let text = entity_embedding_text(
            &entity.name,
            &entity.entity_type,
            entity.description.as_deref(),
        );
        let vector = self.embedder.embed(&text).await?;
        Ok(Vector::from(vector))
    }

    /// One SERIALIZABLE attempt, returning how many relationship rows were
    /// actually inserted (conflicting triples count zero). Embeddings are
    /// computed by the caller so no provider round-trip happens while the
    /// transaction is open.
    async fn try_upsert(
        &self,
        entities: &[Entity],
        embeddings: &[Vector],
        relationships: &[Relationship],
    ) -> std::result::Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        for (entity, embedding) in entities.iter().zip(embeddings) {
            sqlx::query(
                r#"
                INSERT INTO entities (id, name, type, description, aliases, metadata, embedding, version)
                VALUES ($1, $2, $3, $4, $5, $6, $7, 1)
                ON CONFLICT (id) DO UPDATE SET
                    name = EXCLUDED.name,
                    type = EXCLUDED.type,
                    description = EXCLUDED.description,
                    aliases = EXCLUDED.aliases,
                    metadata = EXCLUDED.metadata,
                    embedding = EXCLUDED.embedding,
                    version = entities.version + 1
                "#,
            )
            .bind(&entity.id)
            .bind(&entity.name)
            .bind(&entity.entity_type)
            .bind(&entity.description)
            .bind(entity.aliases.as_ref().map(|a| serde_json::json!(a)))
            .bind(&entity.metadata)
            .bind(embedding)
            .execute(&mut *tx)
            .await?;
        }

        let mut inserted = 0u64;
        for rel in relationships {
            let result = sqlx::query(
                r#"
                INSERT INTO relationships
                    (source_id, target_id, type, description, confidence, source_paper_id, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (source_id, target_id, type) DO NOTHING
                "#,
            )
            .bind(&rel.source_id)
            .bind(&rel.target_id)
            .bind(&rel.rel_type)
            .bind(&rel.description)
            .bind(rel.confidence)
            .bind(&rel.source_paper_id)
            .bind(&rel.metadata)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }
}

fn is_serialization_failure(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("40001"),
        _ => false,
    }
}

fn entity_from_row(row: &sqlx::postgres::PgRow) -> Result<Entity> {
    let aliases: Option<serde_json::Value> = row.try_get("aliases")?;
    let aliases = match aliases {
        Some(value) => serde_json::from_value(value).ok(),
        None => None,
    };
    Ok(Entity {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        entity_type: row.try_get("type")?,
        description: row.try_get("description")?,
        aliases,
        metadata: row.try_get("metadata")?,
        embedding: None,
        version: i64::from(row.try_get::<i32, _>("version")?),
    })
}

#[async_trait]
impl GraphStore for PgGraphStore {
    async fn init(&self) -> Result<()> {
        for statement in SCHEMA_DDL {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .with_context(|| "failed applying graph schema")?;
        }
        info!("graph schema ready");
        Ok(())
    }

    async fn upsert_graph(&self, graph: &GraphData) -> Result<UpsertSummary> {
        if graph.is_empty() {
            return Ok(UpsertSummary::default());
        }

        // Embedding RPCs stay off the transaction's critical path.
        let mut embeddings = Vec::with_capacity(graph.entities.len());
        for entity in &graph.entities {
            embeddings.push(self.embed_entity(entity).await?);
        }

        let (relationships, dropped) = filter_persistable_relationships(graph);

        let mut attempt = 0u32;
        let inserted = loop {
            match self
                .try_upsert(&graph.entities, &embeddings, &relationships)
                .await
            {
                Ok(inserted) => break inserted,
                Err(err) if is_serialization_failure(&err) && attempt < SERIALIZATION_RETRIES => {
                    attempt += 1;
                    let delay = SERIALIZATION_BACKOFF_MS * 2u64.pow(attempt - 1)
                        + fastrand::u64(0..50);
                    warn!(
                        attempt,
                        delay_ms = delay,
                        "serialization failure during upsert; retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(err) => {
                    return Err(err).with_context(|| "graph upsert transaction failed");
                }
            }
        };

        debug!(
            entities = graph.entities.len(),
            relationships = inserted,
            dropped,
            "fragment persisted"
        );

        Ok(UpsertSummary {
            entities_upserted: graph.entities.len(),
            relationships_persisted: inserted as usize,
            relationships_dropped: dropped,
        })
    }

    async fn fetch_similar_entities(&self, entity: &Entity, k: usize) -> Result<Vec<Entity>> {
        let probe = self.embed_entity(entity).await?;
        let rows = sqlx::query(
            r#"
            SELECT id, name, type, description, aliases, metadata, version
            FROM entities
            WHERE embedding IS NOT NULL AND id <> $1
            ORDER BY embedding <=> $2
            LIMIT $3
            "#,
        )
        .bind(&entity.id)
        .bind(&probe)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await
        .with_context(|| "vector search failed")?;

        rows.iter().map(entity_from_row).collect()
    }

    async fn fetch_similar_entities_batch(
        &self,
        entities: &[Entity],
    ) -> Result<HashMap<String, Vec<Entity>>> {
        let futures: Vec<_> = entities
            .iter()
            .map(|entity| async move {
                (
                    entity.id.clone(),
                    self.fetch_similar_entities(entity, DEFAULT_CANDIDATES).await,
                )
            })
            .collect();
        let results: Vec<(String, Result<Vec<Entity>>)> = stream::iter(futures)
            .buffer_unordered(BATCH_SEARCH_CONCURRENCY)
            .collect()
            .await;

        let mut candidates = HashMap::new();
        for (id, result) in results {
            let found = result?;
            if !found.is_empty() {
                candidates.insert(id, found);
            }
        }
        Ok(candidates)
    }

    async fn record_document(&self, path: &str, checksum: Option<&str>) -> Result<()> {
        let existing = sqlx::query("SELECT id FROM documents WHERE path = $1")
            .bind(path)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| "document lookup failed")?;
        if existing.is_some() {
            return Ok(());
        }

        sqlx::query("INSERT INTO documents (path, checksum) VALUES ($1, $2)")
            .bind(path)
            .bind(checksum)
            .execute(&self.pool)
            .await
            .with_context(|| "failed to record document")?;
        Ok(())
    }

    async fn mark_document(&self, path: &str, status: DocumentStatus) -> Result<()> {
        sqlx::query("UPDATE documents SET status = $2 WHERE path = $1")
            .bind(path)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .with_context(|| "failed to update document status")?;
        Ok(())
    }

    async fn summarize(&self, top_k: usize) -> Result<GraphSummary> {
        let total_entities: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entities")
            .fetch_one(&self.pool)
            .await
            .with_context(|| "entity count failed")?;
        let total_relationships: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM relationships")
            .fetch_one(&self.pool)
            .await
            .with_context(|| "relationship count failed")?;

        let rows = sqlx::query(
            "SELECT type, COUNT(*) AS cnt FROM entities GROUP BY type ORDER BY cnt DESC LIMIT $1",
        )
        .bind(top_k as i64)
        .fetch_all(&self.pool)
        .await
        .with_context(|| "entity type aggregate failed")?;

        let mut top_entity_types = Vec::with_capacity(rows.len());
        for row in rows {
            top_entity_types.push(EntityTypeCount {
                entity_type: row.try_get("type")?,
                count: row.try_get("cnt")?,
            });
        }

        Ok(GraphSummary {
            total_entities,
            total_relationships,
            top_entity_types,
        })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
