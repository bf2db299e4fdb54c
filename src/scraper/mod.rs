//! Best-effort web lookups that decorate a repair plan: store listings for
//! materials and tools, and tutorial videos for the problem.
//!
//! Nothing in here fails loudly. A blocked request or a page whose markup
//! changed yields "nothing found" and the caller moves on.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub mod http_client;
pub mod keywords;
pub mod products;
pub mod relevance;
pub mod user_agent;
pub mod youtube;

pub use keywords::KeywordTables;
pub use products::{ProductInfo, ProductMatcher};
pub use relevance::is_product_relevant;
pub use youtube::{build_search_term, fallback_youtube_url, VideoFinder, FALLBACK_TUTORIAL_URL};

use crate::analysis::{RepairAnalysis, VideoResult};
use crate::config::ScrapingConfig;

/// Store lookup for a single material or tool name
#[async_trait]
pub trait ProductLookup: Send + Sync {
    async fn find_product_info(&self, item_name: &str) -> ProductInfo;
}

/// Tutorial video search and YouTube URL checks
#[async_trait]
pub trait VideoSearch: Send + Sync {
    async fn find_tutorial_videos(
        &self,
        description: &str,
        analysis: Option<&RepairAnalysis>,
    ) -> Option<Vec<VideoResult>>;

    fn normalize_youtube_url(&self, url: &str) -> Option<String>;

    async fn validate_video_url(&self, url: &str) -> bool;
}

/// Product and video lookups sharing one HTTP client
pub struct ScrapingEngine {
    pub products: Arc<dyn ProductLookup>,
    pub videos: Arc<dyn VideoSearch>,
}

impl ScrapingEngine {
    pub async fn new(config: &ScrapingConfig) -> Result<Self> {
        info!("Initializing scraping engine");

        let tables = Arc::new(KeywordTables::load(config.keywords_path.as_deref()).await?);
        let http = http_client::HttpClient::new(config)?;

        let products = ProductMatcher::new(http.clone(), tables, config)?;
        let videos = VideoFinder::new(http, config)?;

        Ok(Self {
            products: Arc::new(products),
            videos: Arc::new(videos),
        })
    }
}
