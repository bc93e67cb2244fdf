//! Client for the external generative render service.
//!
//! Render calls are the least reliable dependency in the pipeline, so they
//! are wrapped in bounded retries with linear backoff. When every attempt
//! fails and the call site opted in, the original source image is substituted
//! and tagged: a degraded result keeps a multi-item batch moving where a
//! hard failure would lose the whole item.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

const BASE64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("render service error: HTTP {status} - {message}")]
    Service { status: u16, message: String },
    #[error("render quota exhausted")]
    Quota,
    #[error("render response was not valid base64")]
    Decode,
    #[error("render failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

/// One source image handed to the render service.
#[derive(Debug, Clone)]
pub struct RenderSource {
    pub data: Bytes,
    pub mime_type: String,
}

#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub data: Bytes,
    pub mime_type: String,
}

/// A single raw render call. The HTTP implementation is
/// [`RenderServiceClient`]; tests substitute scripted backends.
#[async_trait]
pub trait RenderBackend: Send + Sync {
    async fn render(
        &self,
        sources: &[RenderSource],
        instructions: &str,
    ) -> Result<RenderedImage, GenerationError>;
}

pub struct RenderServiceClient {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct RenderResponse {
    data: String,
    mime_type: String,
}

impl RenderServiceClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(300))
                .build()
                .expect("Failed to build HTTP client"),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl RenderBackend for RenderServiceClient {
    async fn render(
        &self,
        sources: &[RenderSource],
        instructions: &str,
    ) -> Result<RenderedImage, GenerationError> {
        let inputs: Vec<serde_json::Value> = sources
            .iter()
            .map(|s| {
                serde_json::json!({
                    "data": BASE64.encode(&s.data),
                    "mime_type": s.mime_type,
                })
            })
            .collect();

        let resp = self
            .client
            .post(format!("{}/render", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "inputs": inputs,
                "instructions": instructions,
            }))
            .send()
            .await?;

        match resp.status().as_u16() {
            200 => {
                let body: RenderResponse = resp.json().await?;
                let data = BASE64
                    .decode(&body.data)
                    .map_err(|_| GenerationError::Decode)?;
                Ok(RenderedImage {
                    data: Bytes::from(data),
                    mime_type: body.mime_type,
                })
            }
            429 => Err(GenerationError::Quota),
            status => Err(GenerationError::Service {
                status,
                message: resp.text().await.unwrap_or_default(),
            }),
        }
    }
}

/// Whether a render that exhausted its retries may substitute the original
/// input. Call sites declare this explicitly; there is no global default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackMode {
    /// Return the first source image, tagged `used_fallback`.
    UseFirstSource,
    /// Propagate the exhausted-retries error.
    Propagate,
}

#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub data: Bytes,
    pub mime_type: String,
    pub used_fallback: bool,
}

/// Retrying wrapper around a [`RenderBackend`].
pub struct GenerationClient {
    backend: Arc<dyn RenderBackend>,
    max_attempts: u32,
    base_delay: Duration,
}

impl GenerationClient {
    pub fn new(backend: Arc<dyn RenderBackend>, max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            backend,
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Render with up to `max_attempts` tries and linear backoff between
    /// them. Quota errors abort immediately instead of retrying or falling
    /// back. Other failures retry; once the attempts are spent, `fallback`
    /// decides between substitution and error.
    pub async fn generate(
        &self,
        sources: &[RenderSource],
        instructions: &str,
        fallback: FallbackMode,
    ) -> Result<GenerationOutput, GenerationError> {
        let mut last = String::new();
        for attempt in 1..=self.max_attempts {
            match self.backend.render(sources, instructions).await {
                Ok(image) => {
                    return Ok(GenerationOutput {
                        data: image.data,
                        mime_type: image.mime_type,
                        used_fallback: false,
                    });
                }
                Err(GenerationError::Quota) => return Err(GenerationError::Quota),
                Err(e) => {
                    warn!(attempt, max_attempts = self.max_attempts, error = %e, "Render attempt failed");
                    last = e.to_string();
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.base_delay * attempt).await;
                    }
                }
            }
        }

        match fallback {
            FallbackMode::UseFirstSource => match sources.first() {
                Some(source) => {
                    warn!("Render retries exhausted, substituting the original source image");
                    Ok(GenerationOutput {
                        data: source.data.clone(),
                        mime_type: source.mime_type.clone(),
                        used_fallback: true,
                    })
                }
                None => Err(GenerationError::Exhausted {
                    attempts: self.max_attempts,
                    last,
                }),
            },
            FallbackMode::Propagate => Err(GenerationError::Exhausted {
                attempts: self.max_attempts,
                last,
            }),
        }
    }
}
