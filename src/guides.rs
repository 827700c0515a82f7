//! Read-only guide snapshots: guide, ordered steps and their annotations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Guide {
    pub id: i64,
    pub tenant_id: i64,
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Step {
    pub id: i64,
    pub guide_id: i64,
    pub index: i32,
    pub title: Option<String>,
    pub description: Option<String>,
    pub screenshot_key: Option<String>,
}

/// A shape drawn over a step's screenshot. `data` holds the geometry in source
/// screenshot pixels; its shape depends on `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Annotation {
    pub id: i64,
    pub guide_id: i64,
    pub step_id: Option<i64>,
    pub kind: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum GuideStoreError {
    #[error("guide store query failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("guide store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait GuideStore: Send + Sync {
    async fn load_guide(&self, guide_id: i64) -> Result<Option<Guide>, GuideStoreError>;

    /// Steps of the guide in ascending `index` order.
    async fn load_steps_ordered(&self, guide_id: i64) -> Result<Vec<Step>, GuideStoreError>;

    async fn load_annotations(&self, guide_id: i64) -> Result<Vec<Annotation>, GuideStoreError>;
}

/// Guide store over the API's Postgres tables.
///
/// The API declares its keys as `INTEGER`; they are widened to `BIGINT` in each
/// query so the models decode either width.
#[derive(Clone)]
pub struct PgGuideStore {
    pool: PgPool,
}

impl PgGuideStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GuideStore for PgGuideStore {
    async fn load_guide(&self, guide_id: i64) -> Result<Option<Guide>, GuideStoreError> {
        let guide = sqlx::query_as::<_, Guide>(
            "SELECT id::BIGINT AS id, tenant_id::BIGINT AS tenant_id, title, description \
             FROM guides WHERE id = $1",
        )
        .bind(guide_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(guide)
    }

    async fn load_steps_ordered(&self, guide_id: i64) -> Result<Vec<Step>, GuideStoreError> {
        let steps = sqlx::query_as::<_, Step>(
            "SELECT id::BIGINT AS id, guide_id::BIGINT AS guide_id, \"index\"::INT AS \"index\", \
                    title, description, screenshot_key \
             FROM steps WHERE guide_id = $1 \
             ORDER BY \"index\" ASC, id ASC",
        )
        .bind(guide_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(steps)
    }

    async fn load_annotations(&self, guide_id: i64) -> Result<Vec<Annotation>, GuideStoreError> {
        let annotations = sqlx::query_as::<_, Annotation>(
            "SELECT id::BIGINT AS id, guide_id::BIGINT AS guide_id, step_id::BIGINT AS step_id, \
                    type AS kind, data \
             FROM annotations WHERE guide_id = $1 \
             ORDER BY id ASC",
        )
        .bind(guide_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(annotations)
    }
}
