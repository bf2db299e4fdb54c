use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::http_client::HttpClient;
use super::VideoSearch;
use crate::analysis::{RepairAnalysis, VideoResult};
use crate::config::ScrapingConfig;

/// Known-good drywall tutorial used when nothing better is available
pub const FALLBACK_TUTORIAL_URL: &str = "https://www.youtube.com/watch?v=xDMP3i36naA";

const MAX_VIDEOS: usize = 5;
const MAX_SEARCH_WORDS: usize = 6;
const MIN_TITLE_CHARS: usize = 15;
const THUMBNAIL_SIZES: [&str; 4] = ["mqdefault", "hqdefault", "default", "maxresdefault"];

const ACTION_WORDS: &[&str] = &[
    "fix", "repair", "install", "replace", "remove", "clean", "paint", "caulk", "seal", "patch",
];

const OBJECT_WORDS: &[&str] = &[
    "drywall", "wall", "ceiling", "floor", "tile", "grout", "paint", "caulk", "pipe", "faucet", "outlet",
    "switch", "light", "door", "window", "toilet", "sink", "bathtub", "shower",
];

const FILLER_WORDS: &[&str] = &[
    "this", "that", "with", "have", "need", "want", "like", "would", "could", "should",
];

const FRAGMENT_STARTS: &[&str] = &[
    "and ", "but ", "or ", "so ", "then ", "that ", "this ", "the ", "a ", "because ", "since ", "when ",
    "where ", "what ", "why ", "who ", "cut a ", "that way", "mistake with",
];

const FRAGMENT_ENDS: &[&str] = &[
    " and", " but", " or", " so", " that", " this", " the", " a", " about", " with", " from", " to", " in",
    " on", " at",
];

/// Build a YouTube search phrase from the description and the analysis
pub fn build_search_term(description: &str, analysis: Option<&RepairAnalysis>) -> String {
    let desc = description.to_lowercase();
    let mut keywords: Vec<String> = Vec::new();

    let has_how_to = desc.contains("how to") || desc.contains("how do");
    let has_diy = desc.contains("diy") || desc.contains("do it yourself");
    if !has_how_to && !has_diy {
        keywords.push("how to".to_string());
    }

    if let Some(action) = ACTION_WORDS.iter().find(|a| desc.contains(*a)) {
        keywords.push(action.to_string());
    }

    keywords.extend(
        OBJECT_WORDS
            .iter()
            .filter(|o| desc.contains(*o))
            .map(|o| o.to_string()),
    );

    if let Some(analysis) = analysis {
        if let Some(material) = analysis.materials.first().map(|m| m.name.to_lowercase()) {
            if !keywords.contains(&material) {
                keywords.push(material);
            }
        }
        if let Some(tool) = analysis.tools.first().map(|t| t.name.to_lowercase()) {
            if !keywords.contains(&tool) && keywords.len() < 4 {
                keywords.push(tool);
            }
        }
    }

    if keywords.len() < 2 {
        let cleaned: String = desc
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c.is_whitespace() { c } else { ' ' })
            .collect();
        keywords.extend(
            cleaned
                .split_whitespace()
                .filter(|w| w.chars().count() > 3 && !FILLER_WORDS.contains(w))
                .take(3)
                .map(str::to_string),
        );
    }

    let term = keywords
        .into_iter()
        .take(MAX_SEARCH_WORDS)
        .collect::<Vec<_>>()
        .join(" ");

    if term.is_empty() {
        description.chars().take(50).collect()
    } else {
        term
    }
}

/// Reject titles that look like sentence fragments scraped out of context
pub fn is_plausible_title(title: &str) -> bool {
    let lower = title.to_lowercase();

    if FRAGMENT_STARTS.iter().any(|s| lower.starts_with(s)) {
        return false;
    }
    if FRAGMENT_ENDS.iter().any(|e| lower.ends_with(e)) {
        return false;
    }
    if title.split(' ').count() < 3 {
        return false;
    }

    const GOOD_PHRASES: &[&str] = &[
        "how to", "tutorial", "guide", "fix", "repair", "install", "diy", "step by step", "easy way",
        "best way", "complete", "full",
    ];
    if GOOD_PHRASES.iter().any(|p| lower.contains(p)) || has_counted_steps(&lower) {
        return true;
    }

    title.chars().count() >= 25 && !lower.contains("...")
}

/// "5 tips", "3 ways", "10 steps" and so on
fn has_counted_steps(lower: &str) -> bool {
    let words: Vec<&str> = lower.split(' ').collect();
    words.windows(2).any(|pair| {
        let number = pair[0].chars().rev().take_while(|c| c.is_ascii_digit()).count() > 0;
        number && ["step", "way", "method", "tip"].iter().any(|w| pair[1].starts_with(w))
    })
}

fn unescape_title(raw: &str) -> String {
    let unescaped = raw
        .replace("\\u0026", "&")
        .replace("\\\"", "\"")
        .replace("\\\\", "\\");
    html_escape::decode_html_entities(&unescaped).trim().to_string()
}

fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

/// Regexes for YouTube result pages and URLs
pub struct VideoPatterns {
    watch_link: Regex,
    rendered_video: Regex,
    video_id: Regex,
}

impl VideoPatterns {
    pub fn new() -> Result<Self> {
        Ok(Self {
            watch_link: Regex::new(r"/watch\?v=([a-zA-Z0-9_-]{11})")?,
            rendered_video: Regex::new(
                r#""videoId":"([a-zA-Z0-9_-]{11})"[^{}]*"thumbnail":\s*\{(?:[^{}]|\{[^{}]*\})*\}[^{}]*"title":\s*\{\s*"runs":\s*\[\s*\{\s*"text":"([^"]+)""#,
            )?,
            video_id: Regex::new(
                r#"(?:youtube\.com/(?:[^/]+/.+/|(?:v|e(?:mbed)?)/)|(.*[?&]v=)|youtu\.be/)([^"&?/\s]{11})"#,
            )?,
        })
    }

    /// Pull up to five videos out of a results page.
    ///
    /// The embedded player JSON gives real titles. When it yields nothing the
    /// bare watch links are used with a generic title.
    pub fn extract_videos(&self, html: &str) -> Vec<VideoResult> {
        if !self.watch_link.is_match(html) {
            return Vec::new();
        }

        let mut results = Vec::new();
        let mut seen = HashSet::new();
        for caps in self.rendered_video.captures_iter(html) {
            if results.len() >= MAX_VIDEOS {
                break;
            }
            let (Some(id), Some(title)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            if !seen.insert(id.as_str()) {
                continue;
            }

            let title = unescape_title(title.as_str());
            if title.chars().count() > MIN_TITLE_CHARS && is_plausible_title(&title) {
                results.push(VideoResult {
                    url: watch_url(id.as_str()),
                    title,
                    channel: Some("YouTube".to_string()),
                    views: None,
                    duration: None,
                });
            }
        }

        if results.is_empty() {
            debug!("No titled videos in results page, using bare watch links");
            let mut seen = HashSet::new();
            for caps in self.watch_link.captures_iter(html) {
                if results.len() >= MAX_VIDEOS {
                    break;
                }
                let Some(id) = caps.get(1).map(|m| m.as_str()) else {
                    continue;
                };
                if seen.insert(id) {
                    results.push(VideoResult {
                        url: watch_url(id),
                        title: "YouTube Tutorial".to_string(),
                        channel: Some("YouTube".to_string()),
                        views: None,
                        duration: None,
                    });
                }
            }
        }

        results
    }

    /// Video ID from watch, embed, `/v/` and youtu.be URLs. Placeholder IDs are rejected.
    pub fn youtube_video_id(&self, url: &str) -> Option<String> {
        let id = self.video_id.captures(url)?.get(2)?.as_str();

        let lower = id.to_lowercase();
        let placeholder = ["example", "placeholder", "sample", "demo"]
            .iter()
            .any(|p| lower.contains(p))
            || id.chars().all(|c| c.is_ascii_alphabetic() || c == '_');
        if placeholder {
            warn!("Placeholder YouTube video ID detected: {}", id);
            return None;
        }

        Some(id.to_string())
    }

    /// Canonical watch URL for any supported YouTube URL form
    pub fn normalize_youtube_url(&self, url: &str) -> Option<String> {
        self.youtube_video_id(url).map(|id| watch_url(&id))
    }
}

/// Tutorial used when neither search nor the model produced a usable URL
pub fn fallback_youtube_url(_description: &str) -> &'static str {
    FALLBACK_TUTORIAL_URL
}

/// Searches YouTube for repair tutorials
pub struct VideoFinder {
    http: HttpClient,
    patterns: VideoPatterns,
    search_timeout: Duration,
    thumbnail_timeout: Duration,
}

impl VideoFinder {
    pub fn new(http: HttpClient, config: &ScrapingConfig) -> Result<Self> {
        Ok(Self {
            http,
            patterns: VideoPatterns::new()?,
            search_timeout: Duration::from_secs(config.video_timeout_seconds),
            thumbnail_timeout: Duration::from_secs(config.thumbnail_timeout_seconds),
        })
    }

    pub fn patterns(&self) -> &VideoPatterns {
        &self.patterns
    }

    /// Search for tutorials; `None` when the search fails or finds nothing
    pub async fn find_tutorial_videos(
        &self,
        description: &str,
        analysis: Option<&RepairAnalysis>,
    ) -> Option<Vec<VideoResult>> {
        let query = match analysis.and_then(|a| a.youtube_search_term.as_deref()) {
            Some(term) if !term.trim().is_empty() => term.to_string(),
            _ => build_search_term(description, analysis),
        };
        debug!("YouTube search phrase: \"{}\"", query);

        let url = format!(
            "https://www.youtube.com/results?search_query={}",
            urlencoding::encode(&query)
        );
        let html = match self.http.fetch_html(&url, self.search_timeout).await {
            Ok(Some(html)) => html,
            Ok(None) => {
                warn!("YouTube search returned an error status");
                return None;
            }
            Err(e) => {
                warn!("YouTube search failed: {}", e);
                return None;
            }
        };

        let videos = self.patterns.extract_videos(&html);
        if videos.is_empty() {
            info!("No YouTube videos found for \"{}\"", query);
            return None;
        }

        info!("Found {} YouTube videos for \"{}\"", videos.len(), query);
        Some(videos)
    }

    /// Check that a video exists by requesting its thumbnails.
    /// All sizes are tried at once and the first success wins.
    pub async fn validate_video_url(&self, url: &str) -> bool {
        let Some(id) = self.patterns.youtube_video_id(url) else {
            warn!("Invalid YouTube URL format: {}", url);
            return false;
        };

        let checks = THUMBNAIL_SIZES.iter().map(|&size| {
            let thumbnail = format!("https://img.youtube.com/vi/{}/{}.jpg", id, size);
            Box::pin(async move {
                if self.http.check_url(&thumbnail, self.thumbnail_timeout).await {
                    Ok(size)
                } else {
                    Err(())
                }
            })
        });

        match futures::future::select_ok(checks).await {
            Ok((size, _)) => {
                debug!("YouTube video {} validated via {}", id, size);
                true
            }
            Err(()) => {
                warn!("All thumbnail checks failed for YouTube video {}", id);
                false
            }
        }
    }
}

#[async_trait]
impl VideoSearch for VideoFinder {
    async fn find_tutorial_videos(
        &self,
        description: &str,
        analysis: Option<&RepairAnalysis>,
    ) -> Option<Vec<VideoResult>> {
        VideoFinder::find_tutorial_videos(self, description, analysis).await
    }

    fn normalize_youtube_url(&self, url: &str) -> Option<String> {
        self.patterns.normalize_youtube_url(url)
    }

    async fn validate_video_url(&self, url: &str) -> bool {
        VideoFinder::validate_video_url(self, url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{create_fallback_response, Material, Tool};

    fn patterns() -> VideoPatterns {
        VideoPatterns::new().unwrap()
    }

    #[test]
    fn test_search_term_from_description() {
        assert_eq!(
            build_search_term("There is a hole in my drywall I need to patch", None),
            "how to patch drywall wall"
        );
        assert_eq!(
            build_search_term("How do I fix a leaky faucet", None),
            "fix faucet"
        );
    }

    #[test]
    fn test_search_term_uses_analysis_items() {
        let mut analysis = create_fallback_response();
        analysis.materials = vec![Material { name: "Spackling Compound".into(), ..Default::default() }];
        analysis.tools = vec![Tool { name: "Putty Knife".into(), ..Default::default() }];

        assert_eq!(
            build_search_term("Small dent near the door", Some(&analysis)),
            "how to door spackling compound putty knife"
        );
    }

    #[test]
    fn test_search_term_falls_back_to_description_words() {
        assert_eq!(build_search_term("Squeaky stairs keep me awake", None), "how to squeaky stairs keep");
    }

    #[test]
    fn test_title_plausibility() {
        assert!(is_plausible_title("How to Patch Drywall Like a Pro"));
        assert!(is_plausible_title("5 Tips for Smooth Walls"));
        assert!(is_plausible_title("Professional Painter Secrets Revealed"));
        assert!(!is_plausible_title("and then you sand it down"));
        assert!(!is_plausible_title("Patching holes in the"));
        assert!(!is_plausible_title("Drywall Repair"));
        assert!(!is_plausible_title("Short plain title"));
        assert!(!is_plausible_title("Painter secrets that nobody tells..."));
    }

    #[test]
    fn test_extract_rendered_videos() {
        let html = r#"
            <a href="/watch?v=AAAAAAAAAA1">x</a>
            {"videoId":"AAAAAAAAAA1","thumbnail":{"thumbnails":[{"url":"https://i.ytimg.com/a.jpg"}]},"title":{"runs":[{"text":"How to Fix a Hole in Drywall & Paint"}]}}
            {"videoId":"AAAAAAAAAA1","thumbnail":{"thumbnails":[]},"title":{"runs":[{"text":"How to Fix a Hole in Drywall again"}]}}
            {"videoId":"BBBBBBBBBB2","thumbnail":{"thumbnails":[]},"title":{"runs":[{"text":"and then it broke"}]}}
        "#;

        let videos = patterns().extract_videos(html);
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].url, "https://www.youtube.com/watch?v=AAAAAAAAAA1");
        assert_eq!(videos[0].title, "How to Fix a Hole in Drywall & Paint");
        assert_eq!(videos[0].channel.as_deref(), Some("YouTube"));
    }

    #[test]
    fn test_extract_falls_back_to_watch_links() {
        let html = (0..7)
            .map(|i| format!(r#"<a href="/watch?v=abcdefghij{}">v</a><a href="/watch?v=abcdefghij{}">"#, i, i))
            .collect::<String>();

        let videos = patterns().extract_videos(&html);
        assert_eq!(videos.len(), MAX_VIDEOS);
        assert_eq!(videos[1].url, "https://www.youtube.com/watch?v=abcdefghij1");
        assert!(videos.iter().all(|v| v.title == "YouTube Tutorial"));
    }

    #[test]
    fn test_extract_requires_watch_links() {
        assert!(patterns().extract_videos("<html>no results</html>").is_empty());
    }

    #[test]
    fn test_video_id_forms() {
        let p = patterns();
        assert_eq!(p.youtube_video_id("https://www.youtube.com/watch?v=xDMP3i36naA").as_deref(), Some("xDMP3i36naA"));
        assert_eq!(p.youtube_video_id("https://youtu.be/xDMP3i36naA").as_deref(), Some("xDMP3i36naA"));
        assert_eq!(p.youtube_video_id("https://www.youtube.com/embed/xDMP3i36naA?start=4").as_deref(), Some("xDMP3i36naA"));
        assert_eq!(p.youtube_video_id("https://example.com/video"), None);
    }

    #[test]
    fn test_placeholder_ids_rejected() {
        let p = patterns();
        assert_eq!(p.youtube_video_id("https://www.youtube.com/watch?v=VIDEO_ID_HERE"), None);
        assert_eq!(p.youtube_video_id("https://www.youtube.com/watch?v=example1234"), None);
        assert_eq!(p.normalize_youtube_url("https://www.youtube.com/watch?v=sample12345"), None);
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            patterns().normalize_youtube_url("https://youtu.be/xDMP3i36naA").as_deref(),
            Some(FALLBACK_TUTORIAL_URL)
        );
        assert_eq!(fallback_youtube_url("anything"), FALLBACK_TUTORIAL_URL);
    }
}
