use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod prompts;
pub mod questions;

pub use questions::{FollowUpQuestion, QuestionGenerator, QuestionKind, QuestionSet};

use crate::analysis::{create_fallback_response, parse_model_response, RepairAnalysis};
use crate::config::LlmConfig;
use crate::error::{HomeFixError, HomeFixResult};
use crate::logging::{LogContext, PerformanceLogger};

/// Image sent alongside the text prompt
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAttachment {
    pub mime_type: String,
    pub base64_data: String,
}

impl ImageAttachment {
    pub fn from_bytes(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            base64_data: STANDARD.encode(bytes),
        }
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64_data)
    }
}

/// One chat-completion call
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub image: Option<ImageAttachment>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub json_response: bool,
}

/// Chat-completion backend; returns the assistant message text
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> HomeFixResult<String>;
}

#[derive(Serialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<ImageUrlBlock>,
}

#[derive(Serialize)]
struct ImageUrlBlock {
    url: String,
    detail: &'static str,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Serialize)]
struct ChatCompletionBody {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

impl ChatCompletionBody {
    fn from_request(request: &CompletionRequest) -> Self {
        let mut user_content = vec![ContentBlock {
            content_type: "text",
            text: Some(request.user_prompt.clone()),
            image_url: None,
        }];

        if let Some(image) = &request.image {
            user_content.push(ContentBlock {
                content_type: "image_url",
                text: None,
                image_url: Some(ImageUrlBlock {
                    url: image.data_url(),
                    detail: "high",
                }),
            });
        }

        Self {
            model: request.model.clone(),
            messages: vec![
                Message {
                    role: "system",
                    content: vec![ContentBlock {
                        content_type: "text",
                        text: Some(request.system_prompt.clone()),
                        image_url: None,
                    }],
                },
                Message {
                    role: "user",
                    content: user_content,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format: request.json_response.then_some(ResponseFormat {
                format_type: "json_object",
            }),
        }
    }
}

/// Pull `choices[0].message.content` out of a chat-completion response
pub fn extract_assistant_content(root: &serde_json::Value) -> Option<String> {
    root.get("choices")?
        .as_array()?
        .iter()
        .find_map(|choice| choice.get("message")?.get("content")?.as_str())
        .map(str::trim)
        .filter(|content| !content.is_empty())
        .map(str::to_string)
}

/// OpenAI-compatible chat-completions client
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> HomeFixResult<String> {
        if self.api_key.trim().is_empty() {
            return Err(HomeFixError::config("OPENAI_API_KEY is not set"));
        }

        let body = ChatCompletionBody::from_request(request);
        let start = std::time::Instant::now();

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| HomeFixError::network(format!("Completion request failed: {}", e)))?;

        let status = response.status();
        let raw_body = response
            .text()
            .await
            .map_err(|e| HomeFixError::network(format!("Failed to read completion body: {}", e)))?;

        debug!(
            "Completion call: model={} status={} latency={:?} body_len={}",
            request.model,
            status,
            start.elapsed(),
            raw_body.len()
        );

        if !status.is_success() {
            return Err(HomeFixError::HttpRequest {
                url: self.endpoint.clone(),
                status: status.as_u16(),
            });
        }

        let root: serde_json::Value = serde_json::from_str(&raw_body)
            .map_err(|e| HomeFixError::llm(format!("Completion body is not JSON: {}", e)))?;

        extract_assistant_content(&root).ok_or_else(|| HomeFixError::llm("No content in completion response"))
    }
}

/// MIME type sent with the image, chosen by file extension
pub fn mime_type_for_path(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

/// Turns a problem description and optional photo into a repair plan
pub struct RepairAnalyzer {
    provider: Arc<dyn CompletionProvider>,
    config: LlmConfig,
}

impl RepairAnalyzer {
    pub fn new(provider: Arc<dyn CompletionProvider>, config: &LlmConfig) -> Self {
        Self {
            provider,
            config: config.clone(),
        }
    }

    /// Analyze the problem. Never fails: any provider or parse error yields the fallback plan.
    pub async fn analyze(&self, description: &str, image_path: Option<&Path>) -> RepairAnalysis {
        let perf = PerformanceLogger::new(
            LogContext::new("llm", "analyze")
                .with_field("has_image", image_path.is_some()),
        );

        match self.try_analyze(description, image_path).await {
            Ok(analysis) => {
                perf.finish_with_status("Repair analysis completed", "model");
                analysis
            }
            Err(e) => {
                perf.finish_with_error("Repair analysis failed, using fallback response", &e);
                create_fallback_response()
            }
        }
    }

    /// Analyze the problem, surfacing the failure instead of substituting the fallback
    pub async fn try_analyze(&self, description: &str, image_path: Option<&Path>) -> HomeFixResult<RepairAnalysis> {
        let image = match image_path {
            Some(path) => load_image(path).await,
            None => None,
        };

        let request = CompletionRequest {
            model: self.config.vision_model.clone(),
            system_prompt: prompts::get_system_prompt().to_string(),
            user_prompt: prompts::build_analysis_prompt(description),
            image,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            json_response: true,
        };

        let content = self.provider.complete(&request).await?;
        let analysis = parse_model_response(&content)?;

        info!(
            "Model returned {} materials, {} tools, {} steps",
            analysis.materials.len(),
            analysis.tools.len(),
            analysis.steps.len()
        );
        Ok(analysis)
    }
}

/// Read and encode an image; unreadable files are skipped so analysis continues text-only
async fn load_image(path: &Path) -> Option<ImageAttachment> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Some(ImageAttachment::from_bytes(&bytes, mime_type_for_path(path))),
        Err(e) => {
            warn!("Failed to read image {}: {}", path.display(), e);
            None
        }
    }
}
