use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

const BUILTIN_TABLES: &str = include_str!("../../data/product_keywords.toml");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub category: String,
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchEnhancement {
    pub keyword: String,
    pub terms: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticImage {
    pub keyword: String,
    pub url: String,
}

/// Word lists that drive product search and relevance scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordTables {
    #[serde(default)]
    pub stop_words: Vec<String>,
    #[serde(default)]
    pub irrelevant_image_terms: Vec<String>,
    #[serde(default)]
    pub category_rules: Vec<CategoryRule>,
    #[serde(default)]
    pub enhancements: Vec<SearchEnhancement>,
    #[serde(default)]
    pub static_images: Vec<StaticImage>,
}

impl KeywordTables {
    /// Tables compiled into the binary
    pub fn builtin() -> Result<Self> {
        Self::from_toml(BUILTIN_TABLES).context("Built-in keyword tables are invalid")
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut tables: KeywordTables = toml::from_str(content)?;
        tables.prepare();
        Ok(tables)
    }

    /// Load tables from `path`, or the built-in ones when no path is configured
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Self::builtin();
        };

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read keyword tables from {}", path.display()))?;
        let tables = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse keyword tables in {}", path.display()))?;

        info!(
            "Loaded keyword tables from {} ({} enhancements, {} category rules)",
            path.display(),
            tables.enhancements.len(),
            tables.category_rules.len()
        );
        Ok(tables)
    }

    fn prepare(&mut self) {
        for enhancement in &mut self.enhancements {
            enhancement.keyword = enhancement.keyword.to_lowercase();
        }
        // Stable sort: equal-length keywords keep file order
        self.enhancements
            .sort_by(|a, b| b.keyword.chars().count().cmp(&a.keyword.chars().count()));
    }

    /// Append category search words for the most specific keyword in the item name
    pub fn enhance_query(&self, item_name: &str) -> String {
        let item_lower = item_name.to_lowercase();
        self.enhancements
            .iter()
            .find(|e| item_lower.contains(e.keyword.as_str()))
            .map(|e| format!("{} {}", item_name, e.terms))
            .unwrap_or_else(|| item_name.to_string())
    }

    /// Fallback image: exact name first, then containment either way in table order
    pub fn static_image(&self, item_name: &str) -> Option<&str> {
        let name = item_name.to_lowercase();
        if name.trim().is_empty() {
            return None;
        }

        if let Some(image) = self.static_images.iter().find(|s| s.keyword == name) {
            return Some(image.url.as_str());
        }

        self.static_images
            .iter()
            .find(|s| name.contains(s.keyword.as_str()) || s.keyword.contains(name.as_str()))
            .map(|s| s.url.as_str())
    }

    pub fn is_stop_word(&self, word: &str) -> bool {
        self.stop_words.iter().any(|w| w == word)
    }
}
