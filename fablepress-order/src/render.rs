use async_trait::async_trait;
use serde_json::Value;

use fablepress_core::models::Storybook;
use fablepress_core::notify::DocumentRenderer;
use fablepress_core::{FulfilmentError, FulfilmentResult};

/// Client for the PDF-generation service. The router calls this lazily,
/// only when a storybook has no cached document URL.
pub struct HttpDocumentRenderer {
    http: reqwest::Client,
    base_url: String,
}

impl HttpDocumentRenderer {
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl DocumentRenderer for HttpDocumentRenderer {
    async fn render_pdf(&self, storybook: &Storybook) -> FulfilmentResult<String> {
        let response = self
            .http
            .post(format!("{}/render", self.base_url))
            .json(&serde_json::json!({ "storybook_id": storybook.id }))
            .send()
            .await
            .map_err(|e| FulfilmentError::Storage(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FulfilmentError::Storage(format!(
                "document renderer returned {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| FulfilmentError::Storage(e.to_string()))?;
        body.get("url")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| {
                FulfilmentError::Storage("renderer response missing document url".to_string())
            })
    }
}
