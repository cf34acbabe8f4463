use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use fablepress_core::models::Storybook;
use fablepress_core::repository::StorybookRepository;
use fablepress_core::{FulfilmentError, FulfilmentResult};

pub struct PgStorybookRepository {
    pool: PgPool,
}

impl PgStorybookRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct StorybookRow {
    id: Uuid,
    title: String,
    is_finished: bool,
    pdf_url: Option<String>,
}

#[async_trait]
impl StorybookRepository for PgStorybookRepository {
    async fn get_storybook(&self, id: Uuid) -> FulfilmentResult<Option<Storybook>> {
        let row = sqlx::query_as::<_, StorybookRow>(
            "SELECT id, title, is_finished, pdf_url FROM storybooks WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FulfilmentError::Storage(e.to_string()))?;

        Ok(row.map(|r| Storybook {
            id: r.id,
            title: r.title,
            is_finished: r.is_finished,
            pdf_url: r.pdf_url,
        }))
    }

    async fn set_pdf_url(&self, id: Uuid, url: &str) -> FulfilmentResult<()> {
        sqlx::query("UPDATE storybooks SET pdf_url = $1 WHERE id = $2")
            .bind(url)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| FulfilmentError::Storage(e.to_string()))?;
        Ok(())
    }
}
