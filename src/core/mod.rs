use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub mod enrichment;

use crate::analysis::{Material, RepairAnalysis, Tool, VideoResult};
use crate::config::AppConfig;
use crate::error::{HomeFixError, HomeFixResult};
use crate::images::{cleanup_processed_image, process_image_for_vision};
use crate::llm::questions::{QuestionGenerator, QuestionSet};
use crate::llm::{CompletionProvider, OpenAiClient, RepairAnalyzer};
use crate::logging::{LogContext, PerformanceLogger};
use crate::scraper::{fallback_youtube_url, ProductLookup, ScrapingEngine, VideoSearch};
use crate::storage::{ContactSubmission, StorageManager, TicketStatus, TicketWithAnalysis};
use enrichment::Enricher;

/// Description stored when only a photo was sent
pub const IMAGE_ONLY_DESCRIPTION: &str = "User uploaded an image for analysis";

const DEFAULT_TICKET_PAGE: i64 = 50;
const MAX_API_TICKET_PAGE: i64 = 100;

/// An uploaded photo already written to disk
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub path: PathBuf,
    pub original_name: String,
    pub mime: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct AnalyzeRequest {
    pub description: Option<String>,
    pub email: Option<String>,
    pub image: Option<ImageUpload>,
    /// Skip store and video lookups
    pub skip_lookups: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    #[serde(rename = "ticketId")]
    pub ticket_id: i64,
    pub materials: Vec<Material>,
    pub tools: Vec<Tool>,
    pub steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub likelihood: Option<BTreeMap<String, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub youtube_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub youtube_videos: Option<Vec<VideoResult>>,
}

/// Result of an analysis plus the background task that stores it
pub struct AnalyzeOutcome {
    pub response: AnalyzeResponse,
    pub persistence: JoinHandle<()>,
}

/// Raw contact form fields; all are required
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub subject: Option<String>,
    pub message: Option<String>,
}

/// Map a requested page size to what the ticket listing allows
pub fn ticket_page_size(limit: Option<i64>) -> usize {
    let limit = match limit {
        Some(l) if l != 0 => l,
        _ => DEFAULT_TICKET_PAGE,
    };
    limit.clamp(1, MAX_API_TICKET_PAGE) as usize
}

/// Core application state: analysis pipeline, lookups and persistence
pub struct HomeFixService {
    config: AppConfig,
    storage: Arc<StorageManager>,
    analyzer: Arc<RepairAnalyzer>,
    questions: Arc<QuestionGenerator>,
    enricher: Arc<Enricher>,
    videos: Arc<dyn VideoSearch>,
    email_pattern: Regex,
}

impl HomeFixService {
    /// Initialize the service with all subsystems
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("Initializing HomeFix service");

        let storage = Arc::new(StorageManager::new(&config.database).await?);
        info!("Storage manager initialized");

        let provider: Arc<dyn CompletionProvider> = Arc::new(OpenAiClient::new(&config.llm)?);
        info!("LLM client initialized (model: {})", config.llm.vision_model);

        let scraping = ScrapingEngine::new(&config.scraping).await?;
        info!("Scraping engine initialized");

        Self::with_components(config, storage, provider, scraping.products, scraping.videos)
    }

    /// Assemble the service from already-built parts
    pub fn with_components(
        config: AppConfig,
        storage: Arc<StorageManager>,
        provider: Arc<dyn CompletionProvider>,
        products: Arc<dyn ProductLookup>,
        videos: Arc<dyn VideoSearch>,
    ) -> Result<Self> {
        Ok(Self {
            analyzer: Arc::new(RepairAnalyzer::new(provider.clone(), &config.llm)),
            questions: Arc::new(QuestionGenerator::new(provider, &config.llm)),
            enricher: Arc::new(Enricher::new(products)),
            videos,
            storage,
            email_pattern: Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$")?,
            config,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Turn a description and/or photo into a repair plan.
    ///
    /// The model step never fails, so errors here come from input validation
    /// or from creating the ticket and asset rows. Storing the analysis happens
    /// on a spawned task after the response is ready.
    pub async fn analyze(&self, request: AnalyzeRequest) -> HomeFixResult<AnalyzeOutcome> {
        let description = request
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        if description.is_none() && request.image.is_none() {
            return Err(HomeFixError::input("Provide a description or an image."));
        }
        let description = description.unwrap_or_else(|| IMAGE_ONLY_DESCRIPTION.to_string());
        let email = request.email.as_deref().map(str::trim).filter(|e| !e.is_empty());

        let perf = PerformanceLogger::new(
            LogContext::new("core", "analyze").with_field("has_image", request.image.is_some()),
        );

        let (ticket, processed) = tokio::join!(
            self.storage.create_ticket(&description, email),
            self.prepare_image(request.image.as_ref())
        );
        let ticket_id = match ticket {
            Ok(id) => id,
            Err(e) => {
                discard_processed(processed.as_deref()).await;
                return Err(HomeFixError::database(e.to_string()));
            }
        };

        if let Some(upload) = &request.image {
            let asset = self
                .storage
                .create_asset(
                    ticket_id,
                    &upload.path.to_string_lossy(),
                    &upload.original_name,
                    &upload.mime,
                    upload.size_bytes,
                )
                .await;
            if let Err(e) = asset {
                discard_processed(processed.as_deref()).await;
                if let Err(status) = self.storage.update_ticket_status(ticket_id, TicketStatus::Failed).await {
                    warn!("Failed to mark ticket {} as failed: {}", ticket_id, status);
                }
                return Err(HomeFixError::database(e.to_string()));
            }
        }

        let model_image = processed
            .as_deref()
            .or_else(|| request.image.as_ref().map(|u| u.path.as_path()));
        let analysis = self.analyzer.analyze(&description, model_image).await;

        let model_url = analysis.youtube_url.as_deref().and_then(|url| {
            let normalized = self.videos.normalize_youtube_url(url);
            if normalized.is_none() {
                warn!("Model YouTube URL format invalid: {}", url);
            }
            normalized
        });

        let mut enriched = analysis.clone();
        let (searched_videos, model_url) = if request.skip_lookups {
            (None, model_url)
        } else {
            // The model link is only checked when the search came back empty,
            // and that check overlaps the product lookups
            let video_choice = async {
                let videos = self
                    .videos
                    .find_tutorial_videos(&description, Some(&analysis))
                    .await
                    .filter(|v| !v.is_empty());
                let model_url = match videos {
                    Some(_) => None,
                    None => self.verify_model_url(model_url).await,
                };
                (videos, model_url)
            };
            let (_, choice) = tokio::join!(self.enricher.add_product_info(&mut enriched), video_choice);
            choice
        };

        let youtube_url = choose_youtube_url(&description, searched_videos.as_deref(), model_url);

        let response = AnalyzeResponse {
            ticket_id,
            materials: enriched.materials.clone(),
            tools: enriched.tools.clone(),
            steps: enriched.steps.clone(),
            likelihood: enriched.likelihood.clone(),
            safety: enriched.safety.clone(),
            youtube_url: Some(youtube_url.clone()),
            youtube_videos: searched_videos,
        };

        let persistence = self.spawn_persistence(ticket_id, enriched, youtube_url, processed);

        perf.finish_with_status(&format!("Analysis ready for ticket {}", ticket_id), "ok");
        Ok(AnalyzeOutcome { response, persistence })
    }

    /// Processed copy of the upload, or `None` to send the original
    async fn prepare_image(&self, upload: Option<&ImageUpload>) -> Option<PathBuf> {
        let upload = upload?;
        match process_image_for_vision(&upload.path, None, &self.config.images).await {
            Ok(result) => Some(result.processed_path),
            Err(e) => {
                warn!("Failed to process image, using original: {}", e);
                None
            }
        }
    }

    /// Keep the model's normalized link only if its thumbnail answers
    async fn verify_model_url(&self, url: Option<String>) -> Option<String> {
        let url = url?;
        if self.videos.validate_video_url(&url).await {
            info!("Using model YouTube URL: {}", url);
            Some(url)
        } else {
            warn!("Model YouTube URL did not validate: {}", url);
            None
        }
    }

    fn spawn_persistence(
        &self,
        ticket_id: i64,
        analysis: RepairAnalysis,
        youtube_url: String,
        processed_image: Option<PathBuf>,
    ) -> JoinHandle<()> {
        let storage = self.storage.clone();
        tokio::spawn(async move {
            let context = LogContext::new("core", "persist").with_ticket_id(ticket_id.to_string());

            let status = match storage
                .create_analysis(ticket_id, &analysis, Some(youtube_url.as_str()))
                .await
            {
                Ok(_) => TicketStatus::Analyzed,
                Err(e) => {
                    let error = crate::contextual_error!(
                        HomeFixError::database(e.to_string()),
                        "create_analysis",
                        "storage",
                        "ticket_id" => ticket_id.to_string()
                    );
                    crate::log_warn!(context, error, "Failed to store analysis");
                    TicketStatus::Failed
                }
            };
            if let Err(e) = storage.update_ticket_status(ticket_id, status).await {
                crate::log_warn!(context, e, "Failed to update ticket status");
            }

            if let Some(path) = processed_image {
                cleanup_processed_image(&path).await;
            }
        })
    }

    pub async fn list_tickets(&self, limit: Option<i64>) -> HomeFixResult<Vec<TicketWithAnalysis>> {
        self.storage
            .list_tickets_with_analysis(ticket_page_size(limit))
            .await
            .map_err(|e| HomeFixError::database(e.to_string()))
    }

    pub async fn submit_contact(&self, request: ContactRequest) -> HomeFixResult<i64> {
        let field = |value: &Option<String>| value.as_deref().map(str::trim).unwrap_or("").to_string();
        let submission = ContactSubmission {
            name: field(&request.name),
            email: field(&request.email),
            subject: field(&request.subject),
            message: field(&request.message),
        };

        let missing = [&submission.name, &submission.email, &submission.subject, &submission.message]
            .iter()
            .any(|f| f.is_empty());
        if missing {
            return Err(HomeFixError::input(
                "All fields are required (name, email, subject, message).",
            ));
        }
        if !self.email_pattern.is_match(&submission.email) {
            return Err(HomeFixError::input("Please provide a valid email address."));
        }

        let id = self
            .storage
            .create_contact_submission(&submission)
            .await
            .map_err(|e| HomeFixError::database(e.to_string()))?;
        info!("Contact form submission saved: {}", id);
        Ok(id)
    }

    pub async fn generate_questions(&self, description: &str) -> HomeFixResult<QuestionSet> {
        let description = description.trim();
        if description.is_empty() {
            return Err(HomeFixError::input("Description is required"));
        }
        let perf = PerformanceLogger::new(LogContext::new("core", "generate_questions"));
        let questions = self.questions.generate(description).await;
        perf.finish(&format!("Generated {} follow-up questions", questions.questions.len()));
        Ok(questions)
    }
}

/// Searched video first, then the model's own link, then the fixed tutorial
fn choose_youtube_url(description: &str, searched: Option<&[VideoResult]>, model_url: Option<String>) -> String {
    if let Some(first) = searched.and_then(|v| v.first()) {
        return first.url.clone();
    }
    model_url.unwrap_or_else(|| fallback_youtube_url(description).to_string())
}

async fn discard_processed(path: Option<&Path>) {
    if let Some(path) = path {
        cleanup_processed_image(path).await;
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::analysis::create_fallback_response;
    use crate::scraper::FALLBACK_TUTORIAL_URL;
    use super::enrichment::test_support::StubProducts;

    const MODEL_REPLY: &str = r#"{
        "materials": [{"name": "Spackling compound", "qty": "1 tub"}],
        "tools": [{"name": "Putty knife"}],
        "steps": ["Clean the hole", "Apply compound", "Sand smooth"],
        "likelihood": {"impact_damage": 80},
        "youtube_url": "https://www.youtube.com/watch?v=abcDEF12345"
    }"#;

    fn video(id: &str) -> VideoResult {
        VideoResult {
            url: format!("https://www.youtube.com/watch?v={}", id),
            title: "How to Patch Drywall Fast".to_string(),
            channel: Some("YouTube".to_string()),
            views: None,
            duration: None,
        }
    }

    #[test]
    fn test_ticket_page_size() {
        assert_eq!(ticket_page_size(None), 50);
        assert_eq!(ticket_page_size(Some(0)), 50);
        assert_eq!(ticket_page_size(Some(20)), 20);
        assert_eq!(ticket_page_size(Some(500)), 100);
        assert_eq!(ticket_page_size(Some(-3)), 1);
    }

    #[tokio::test]
    async fn test_requires_description_or_image() {
        let (service, _dir) = service_with(MODEL_REPLY, StubProducts::default(), StubVideos::default()).await;

        let err = service
            .analyze(AnalyzeRequest {
                description: Some("   ".to_string()),
                ..Default::default()
            })
            .await
            .err()
            .unwrap();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.to_string(), "Provide a description or an image.");
    }

    #[tokio::test]
    async fn test_searched_video_wins_and_analysis_is_stored() {
        let videos = StubVideos {
            videos: Some(vec![video("AAAAAAAAAA1"), video("BBBBBBBBBB2")]),
            ..Default::default()
        };
        let products = StubProducts::default().with("Putty knife", "Home Depot");
        let (service, _dir) = service_with(MODEL_REPLY, products, videos).await;

        let outcome = service
            .analyze(AnalyzeRequest {
                description: Some("Fist-sized hole in drywall".to_string()),
                email: Some("owner@example.com".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let response = outcome.response;

        assert_eq!(response.youtube_url.as_deref(), Some("https://www.youtube.com/watch?v=AAAAAAAAAA1"));
        assert_eq!(response.youtube_videos.as_ref().unwrap().len(), 2);
        assert_eq!(response.likelihood.as_ref().unwrap()["impact_damage"], 0.8);
        assert_eq!(response.tools[0].store_name.as_deref(), Some("Home Depot"));

        outcome.persistence.await.unwrap();
        let tickets = service.list_tickets(None).await.unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].ticket.status, TicketStatus::Analyzed);
        let stored = tickets[0].latest_analysis.as_ref().unwrap();
        assert_eq!(stored.youtube_url, response.youtube_url);
        assert_eq!(stored.tools[0].store_name.as_deref(), Some("Home Depot"));
    }

    #[tokio::test]
    async fn test_model_url_used_only_when_valid() {
        let videos = StubVideos {
            videos: None,
            valid_urls: vec!["https://www.youtube.com/watch?v=abcDEF12345".to_string()],
        };
        let (service, _dir) = service_with(MODEL_REPLY, StubProducts::default(), videos).await;
        let outcome = service
            .analyze(AnalyzeRequest {
                description: Some("Hole in wall".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(
            outcome.response.youtube_url.as_deref(),
            Some("https://www.youtube.com/watch?v=abcDEF12345")
        );

        let (service, _dir) = service_with(MODEL_REPLY, StubProducts::default(), StubVideos::default()).await;
        let outcome = service
            .analyze(AnalyzeRequest {
                description: Some("Hole in wall".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(outcome.response.youtube_url.as_deref(), Some(FALLBACK_TUTORIAL_URL));
        assert!(outcome.response.youtube_videos.is_none());
    }

    #[tokio::test]
    async fn test_model_url_trusted_when_lookups_skipped() {
        let (service, _dir) = service_with(MODEL_REPLY, StubProducts::default(), StubVideos::default()).await;
        let outcome = service
            .analyze(AnalyzeRequest {
                description: Some("Hole in wall".to_string()),
                skip_lookups: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(
            outcome.response.youtube_url.as_deref(),
            Some("https://www.youtube.com/watch?v=abcDEF12345")
        );
    }

    fn photo_upload(dir: &Path) -> ImageUpload {
        let path = dir.join("photo.png");
        image::RgbImage::from_pixel(32, 32, image::Rgb([10, 20, 30])).save(&path).unwrap();
        ImageUpload {
            original_name: "photo.png".to_string(),
            mime: "image/png".to_string(),
            size_bytes: std::fs::metadata(&path).unwrap().len(),
            path,
        }
    }

    #[tokio::test]
    async fn test_asset_failure_discards_processed_image() {
        let (service, dir) = service_with(MODEL_REPLY, StubProducts::default(), StubVideos::default()).await;
        service.storage.execute_batch("DROP TABLE assets").await.unwrap();

        let err = service
            .analyze(AnalyzeRequest {
                image: Some(photo_upload(dir.path())),
                skip_lookups: true,
                ..Default::default()
            })
            .await
            .err()
            .unwrap();
        assert_eq!(err.status_code(), 500);
        assert!(!dir.path().join("photo_processed.jpg").exists());
        assert!(dir.path().join("photo.png").exists());

        let tickets = service.list_tickets(None).await.unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].ticket.status, TicketStatus::Failed);
    }

    #[tokio::test]
    async fn test_ticket_failure_discards_processed_image() {
        let (service, dir) = service_with(MODEL_REPLY, StubProducts::default(), StubVideos::default()).await;
        service.storage.execute_batch("DROP TABLE assets; DROP TABLE analyses; DROP TABLE tickets;").await.unwrap();

        let result = service
            .analyze(AnalyzeRequest {
                description: Some("Cracked tile".to_string()),
                image: Some(photo_upload(dir.path())),
                skip_lookups: true,
                ..Default::default()
            })
            .await;
        assert!(result.is_err());
        assert!(!dir.path().join("photo_processed.jpg").exists());
    }

    #[tokio::test]
    async fn test_failed_persistence_marks_ticket_failed() {
        let (service, _dir) = service_with(MODEL_REPLY, StubProducts::default(), StubVideos::default()).await;
        service.storage.execute_batch("DROP TABLE analyses").await.unwrap();

        let outcome = service
            .analyze(AnalyzeRequest {
                description: Some("Door sticks".to_string()),
                skip_lookups: true,
                ..Default::default()
            })
            .await
            .unwrap();
        outcome.persistence.await.unwrap();

        let ticket = service.storage.get_ticket(outcome.response.ticket_id).await.unwrap().unwrap();
        assert_eq!(ticket.status, TicketStatus::Failed);
    }

    #[tokio::test]
    async fn test_garbage_reply_yields_fallback_plan() {
        let (service, _dir) =
            service_with("I cannot help with that.", StubProducts::default(), StubVideos::default()).await;

        let outcome = service
            .analyze(AnalyzeRequest {
                description: Some("Something is wrong".to_string()),
                skip_lookups: true,
                ..Default::default()
            })
            .await
            .unwrap();

        let fallback = create_fallback_response();
        assert_eq!(outcome.response.steps, fallback.steps);
        assert_eq!(outcome.response.materials, fallback.materials);
        assert_eq!(outcome.response.youtube_url.as_deref(), Some(FALLBACK_TUTORIAL_URL));
    }

    #[tokio::test]
    async fn test_image_only_request() {
        let (service, dir) = service_with(MODEL_REPLY, StubProducts::default(), StubVideos::default()).await;
        let path = dir.path().join("photo.png");
        image::RgbImage::from_pixel(32, 32, image::Rgb([10, 20, 30])).save(&path).unwrap();

        let outcome = service
            .analyze(AnalyzeRequest {
                image: Some(ImageUpload {
                    path: path.clone(),
                    original_name: "photo.png".to_string(),
                    mime: "image/png".to_string(),
                    size_bytes: std::fs::metadata(&path).unwrap().len(),
                }),
                skip_lookups: true,
                ..Default::default()
            })
            .await
            .unwrap();
        outcome.persistence.await.unwrap();

        let tickets = service.list_tickets(Some(10)).await.unwrap();
        assert_eq!(tickets[0].ticket.description, IMAGE_ONLY_DESCRIPTION);
        let assets = service.storage.assets_for_ticket(outcome.response.ticket_id).await.unwrap();
        assert_eq!(assets.len(), 1);
        assert!(!dir.path().join("photo_processed.jpg").exists());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_contact_validation() {
        let (service, _dir) = service_with(MODEL_REPLY, StubProducts::default(), StubVideos::default()).await;

        let mut request = ContactRequest {
            name: Some("Pat".to_string()),
            email: Some("pat-at-example".to_string()),
            subject: Some("Hi".to_string()),
            message: None,
        };
        let err = service.submit_contact(request.clone()).await.unwrap_err();
        assert!(err.to_string().starts_with("All fields are required"));

        request.message = Some("Love it".to_string());
        let err = service.submit_contact(request.clone()).await.unwrap_err();
        assert_eq!(err.to_string(), "Please provide a valid email address.");

        request.email = Some(" pat@example.com ".to_string());
        assert!(service.submit_contact(request).await.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_generate_questions_requires_description() {
        let (service, _dir) = service_with("not json", StubProducts::default(), StubVideos::default()).await;

        assert!(service.generate_questions("  ").await.is_err());
        let set = service.generate_questions("Door sticks").await.unwrap();
        assert_eq!(set, QuestionSet::fallback());
    }
}
