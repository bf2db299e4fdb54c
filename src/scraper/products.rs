use anyhow::Result;
use async_trait::async_trait;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::http_client::HttpClient;
use super::keywords::KeywordTables;
use super::relevance::is_product_relevant;
use super::ProductLookup;
use crate::config::ScrapingConfig;

/// Where to buy an item and what it looks like
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductInfo {
    pub image_url: Option<String>,
    pub product_url: Option<String>,
    pub store_name: Option<String>,
}

impl ProductInfo {
    fn image_only(url: impl Into<String>) -> Self {
        Self {
            image_url: Some(url.into()),
            ..Default::default()
        }
    }
}

/// A product scraped from a retailer search page
#[derive(Debug, Clone, PartialEq)]
pub struct ProductListing {
    pub name: String,
    pub image_url: String,
    pub product_url: String,
    pub price: Option<String>,
    pub store: &'static str,
}

impl ProductListing {
    pub fn display_price(&self) -> String {
        match &self.price {
            Some(price) => format!("${}", price),
            None => "Price not available".to_string(),
        }
    }
}

impl From<ProductListing> for ProductInfo {
    fn from(listing: ProductListing) -> Self {
        Self {
            image_url: Some(listing.image_url),
            product_url: Some(listing.product_url),
            store_name: Some(listing.store.to_string()),
        }
    }
}

/// One listing regex. Named groups: `image`, `name`, and optionally `url` and `price`.
struct ListingPattern {
    regex: Regex,
    /// The price must follow the match within this many bytes
    price_window: Option<usize>,
}

impl ListingPattern {
    fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            regex: Regex::new(pattern)?,
            price_window: None,
        })
    }

    fn with_price_window(mut self, bytes: usize) -> Self {
        self.price_window = Some(bytes);
        self
    }
}

/// Price regexes, most specific first
pub struct PricePatterns {
    patterns: Vec<Regex>,
    trailing: Regex,
}

/// Only the first patterns are used around a product URL
const URL_AREA_PRICE_PATTERNS: usize = 6;

impl PricePatterns {
    pub fn new() -> Result<Self> {
        let patterns = [
            r#"data-testid="sticky-nav__price-value--([0-9]+\.?[0-9]*)""#,
            r"\$([0-9]+\.?[0-9]*)",
            r"<span[^>]*>\$([0-9]+\.?[0-9]*)</span>",
            r"<div[^>]*>\$([0-9]+\.?[0-9]*)</div>",
            r#"data-price[^>]*="[^"]*\$([0-9]+\.?[0-9]*)""#,
            r"(?i)price[^>]*>[^$]*\$([0-9]+\.?[0-9]*)",
            r#""currentPrice"[^>]*>[^$]*\$([0-9]+\.?[0-9]*)"#,
            r#""price"[^>]*>[^$]*\$([0-9]+\.?[0-9]*)"#,
            r"[\s>]\$([0-9]{1,4}\.?[0-9]{0,2})[\s<]",
            r"(?i)product[^>]*>[^$]*\$([0-9]+\.?[0-9]*)",
        ]
        .iter()
        .map(|p| Regex::new(p))
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            patterns,
            trailing: Regex::new(r"\$([0-9,.]+)")?,
        })
    }

    fn first_match<'a>(patterns: impl Iterator<Item = &'a Regex>, area: &str) -> Option<String> {
        patterns
            .filter_map(|p| p.captures(area))
            .find_map(|c| c.get(1).map(|m| m.as_str().to_string()))
    }

    /// Look for a price around the product name, then around the product URL
    pub fn find_near(&self, html: &str, product_name: &str, product_url: &str) -> Option<String> {
        let name_index = html.find(product_name)?;
        let area = text_window(html, name_index, 1000);
        if let Some(price) = Self::first_match(self.patterns.iter(), area) {
            return Some(price);
        }

        if product_url.is_empty() {
            return None;
        }
        let url_index = html.find(product_url)?;
        let area = text_window(html, url_index, 2000);
        Self::first_match(self.patterns.iter().take(URL_AREA_PRICE_PATTERNS), area)
    }

    fn find_after(&self, html: &str, offset: usize, max_distance: usize) -> Option<String> {
        let rest = html.get(offset..)?;
        let caps = self.trailing.captures(rest)?;
        let whole = caps.get(0)?;
        if whole.start() > max_distance {
            return None;
        }
        caps.get(1).map(|m| m.as_str().to_string())
    }
}

/// Slice `radius` bytes either side of `center`, widened to char boundaries
fn text_window(text: &str, center: usize, radius: usize) -> &str {
    let mut start = center.saturating_sub(radius);
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = center.saturating_add(radius).min(text.len());
    while !text.is_char_boundary(end) {
        end += 1;
    }
    &text[start..end]
}

fn absolute_image_url(url: &str) -> String {
    if url.starts_with("//") {
        format!("https:{}", url)
    } else {
        url.to_string()
    }
}

/// Absolute URL for an `href` found on a retailer page
fn resolve_link(base_url: &str, href: &str) -> String {
    Url::parse(base_url)
        .and_then(|base| base.join(href))
        .map(String::from)
        .unwrap_or_else(|_| format!("{}{}", base_url, href))
}

/// A retailer search page and the patterns that pull a product out of it
pub struct RetailerSite {
    pub store: &'static str,
    base_url: &'static str,
    search_prefix: &'static str,
    search_suffix: &'static str,
    patterns: Vec<ListingPattern>,
    /// Search the page for a price when the matching pattern has none
    price_lookup: bool,
}

impl RetailerSite {
    pub fn home_depot() -> Result<Self> {
        Ok(Self {
            store: "Home Depot",
            base_url: "https://www.homedepot.com",
            search_prefix: "https://www.homedepot.com/s/",
            search_suffix: "?NCNI-5",
            patterns: vec![
                ListingPattern::new(
                    r#"<div[^>]*data-testid="product-pod"[^>]*>[\s\S]*?href="(?P<url>[^"]*)"[\s\S]*?<img[^>]*src="(?P<image>[^"]+)"[^>]*alt="(?P<name>[^"]*)"[\s\S]*?>\$(?P<price>[0-9,]+\.?[0-9]*)"#,
                )?,
                ListingPattern::new(
                    r#"<a[^>]*href="(?P<url>[^"]*/p/[^"]*)"[^>]*>[\s\S]*?<img[^>]*src="(?P<image>[^"]+)"[^>]*alt="(?P<name>[^"]*)""#,
                )?,
                ListingPattern::new(
                    r#"<img[^>]*src="(?P<image>[^"]*(?:images\.homedepot-static\.com|hdstatic\.net)[^"]*)"[^>]*alt="(?P<name>[^"]*)""#,
                )?
                .with_price_window(2000),
                ListingPattern::new(
                    r#"<img[^>]*src="(?P<image>[^"]*images\.homedepot-static\.com[^"]*)"[^>]*alt="(?P<name>[^"]*)"[^>]*>"#,
                )?,
                ListingPattern::new(
                    r#"(?i)<img[^>]*src="(?P<image>[^"]*(?:homedepot|hdstatic)[^"]*)"[^>]*alt="(?P<name>[^"]*)"[^>]*"#,
                )?,
            ],
            price_lookup: true,
        })
    }

    pub fn lowes() -> Result<Self> {
        Ok(Self {
            store: "Lowe's",
            base_url: "https://www.lowes.com",
            search_prefix: "https://www.lowes.com/search?searchTerm=",
            search_suffix: "",
            patterns: vec![
                ListingPattern::new(
                    r#"<div[^>]*class="[^"]*productTile[^"]*"[^>]*>[\s\S]*?<img[^>]*src="(?P<image>[^"]+)"[^>]*alt="(?P<name>[^"]*)"[\s\S]*?<a[^>]*href="(?P<url>[^"]*)"[\s\S]*?\$(?P<price>[0-9,.]+)"#,
                )?,
                ListingPattern::new(
                    r#"<a[^>]*href="(?P<url>[^"]*/pd/[^"]*)"[^>]*>[\s\S]*?<img[^>]*src="(?P<image>[^"]+)"[^>]*alt="(?P<name>[^"]*)"[\s\S]*?\$(?P<price>[0-9,.]+)"#,
                )?,
                ListingPattern::new(
                    r#"<img[^>]*src="(?P<image>[^"]*mobileimages\.lowes\.com[^"]*)"[^>]*alt="(?P<name>[^"]*)"[^>]*>"#,
                )?,
            ],
            price_lookup: false,
        })
    }

    pub fn search_url(&self, query: &str) -> String {
        format!("{}{}{}", self.search_prefix, urlencoding::encode(query), self.search_suffix)
    }

    /// First relevant product on a search results page.
    ///
    /// Each pattern contributes at most its first match; an irrelevant or
    /// unusable match moves on to the next pattern.
    pub fn extract_listing(
        &self,
        html: &str,
        query: &str,
        tables: &KeywordTables,
        prices: &PricePatterns,
    ) -> Option<ProductListing> {
        let search_url = self.search_url(query);

        for (index, pattern) in self.patterns.iter().enumerate() {
            let Some((caps, windowed_price)) = Self::first_capture(pattern, html, prices) else {
                continue;
            };

            let image_url = absolute_image_url(group(&caps, "image"));
            let name = group(&caps, "name");
            if !image_url.starts_with("http") || name.is_empty() {
                continue;
            }

            if !is_product_relevant(query, name, tables) {
                debug!("Skipping irrelevant {} product \"{}\" (pattern {})", self.store, name, index);
                continue;
            }

            let product_url = match caps.name("url") {
                Some(url) => resolve_link(self.base_url, url.as_str()),
                None => search_url.clone(),
            };

            let mut price = caps.name("price").map(|m| m.as_str().to_string()).or(windowed_price);
            if price.is_none() && self.price_lookup {
                let url_in_page = caps.name("url").map_or("", |m| m.as_str());
                price = prices.find_near(html, name, url_in_page);
            }

            debug!("Found {} product \"{}\" (pattern {})", self.store, name, index);
            return Some(ProductListing {
                name: html_escape::decode_html_entities(name.trim()).into_owned(),
                image_url,
                product_url,
                price,
                store: self.store,
            });
        }

        None
    }

    fn first_capture<'h>(
        pattern: &ListingPattern,
        html: &'h str,
        prices: &PricePatterns,
    ) -> Option<(Captures<'h>, Option<String>)> {
        match pattern.price_window {
            None => pattern.regex.captures(html).map(|caps| (caps, None)),
            Some(window) => pattern.regex.captures_iter(html).find_map(|caps| {
                let end = caps.get(0)?.end();
                let price = prices.find_after(html, end, window)?;
                Some((caps, Some(price)))
            }),
        }
    }
}

fn group<'h>(caps: &Captures<'h>, name: &str) -> &'h str {
    caps.name(name).map_or("", |m| m.as_str())
}

/// Generic image search used when no retailer has the item
pub struct ImageSearch {
    patterns: Vec<Regex>,
}

const IMAGE_MATCHES_PER_PATTERN: usize = 3;

impl ImageSearch {
    pub fn new() -> Result<Self> {
        let patterns = [
            r#""murl":"([^"]+)""#,
            r#""imgurl":"([^"]+)""#,
            r"mediaurl=([^&]+)",
            r"imgurl=([^&]+)",
            r#"(?i)src="([^"]*\.(?:jpg|jpeg|png|webp)[^"]*)">"#,
        ]
        .iter()
        .map(|p| Regex::new(p))
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { patterns })
    }

    fn category_hint(item: &str) -> &'static str {
        let lower = item.to_lowercase();
        let has = |terms: &[&str]| terms.iter().any(|t| lower.contains(t));

        if has(&["electrical", "wire", "outlet"]) {
            "electrical hardware store product"
        } else if has(&["plumbing", "pipe", "water"]) {
            "plumbing hardware store product"
        } else if has(&["tool"]) {
            "tool hardware store product"
        } else if has(&["paint", "primer"]) {
            "paint hardware store product"
        } else {
            "hardware store product"
        }
    }

    pub fn search_url(&self, item: &str) -> String {
        let query = format!("\"{}\" {}", item, Self::category_hint(item));
        format!(
            "https://www.bing.com/images/search?q={}&form=HDRSC2&first=1&cw=1177&ch=745",
            urlencoding::encode(&query)
        )
    }

    /// First usable image URL on a results page
    pub fn extract_image(&self, html: &str, item: &str, tables: &KeywordTables) -> Option<String> {
        let item_lower = item.to_lowercase();

        for pattern in &self.patterns {
            for caps in pattern.captures_iter(html).take(IMAGE_MATCHES_PER_PATTERN) {
                let Some(raw) = caps.get(1).map(|m| m.as_str()) else {
                    continue;
                };

                let image_url = if raw.contains('%') {
                    match urlencoding::decode(raw) {
                        Ok(decoded) => decoded.into_owned(),
                        Err(_) => continue,
                    }
                } else {
                    raw.to_string()
                };

                if !image_url.starts_with("http") || !has_image_extension(&image_url) {
                    continue;
                }

                let url_lower = image_url.to_lowercase();
                let irrelevant = tables
                    .irrelevant_image_terms
                    .iter()
                    .any(|term| url_lower.contains(term.as_str()) && !item_lower.contains(term.as_str()));
                if !irrelevant {
                    return Some(image_url);
                }
            }
        }

        None
    }
}

fn has_image_extension(url: &str) -> bool {
    [".jpg", ".png", ".jpeg", ".webp"].iter().any(|ext| url.contains(ext))
}

/// Finds a store listing or at least a picture for a material or tool
pub struct ProductMatcher {
    http: HttpClient,
    tables: Arc<KeywordTables>,
    retailers: Vec<RetailerSite>,
    image_search: ImageSearch,
    prices: PricePatterns,
    timeout: Duration,
}

impl ProductMatcher {
    pub fn new(http: HttpClient, tables: Arc<KeywordTables>, config: &ScrapingConfig) -> Result<Self> {
        Ok(Self {
            http,
            tables,
            retailers: vec![RetailerSite::home_depot()?, RetailerSite::lowes()?],
            image_search: ImageSearch::new()?,
            prices: PricePatterns::new()?,
            timeout: Duration::from_secs(config.retail_timeout_seconds),
        })
    }

    async fn fetch(&self, label: &str, url: &str) -> Option<String> {
        match self.http.fetch_html(url, self.timeout).await {
            Ok(Some(html)) => Some(html),
            Ok(None) => {
                warn!("{} search returned an error status", label);
                None
            }
            Err(e) => {
                warn!("{} search failed: {}", label, e);
                None
            }
        }
    }

    async fn search_retailer(&self, site: &RetailerSite, query: &str) -> Option<ProductListing> {
        let html = self.fetch(site.store, &site.search_url(query)).await?;
        site.extract_listing(&html, query, &self.tables, &self.prices)
    }

    async fn search_images(&self, item_name: &str) -> Option<String> {
        let html = self.fetch("Image", &self.image_search.search_url(item_name)).await?;
        self.image_search.extract_image(&html, item_name, &self.tables)
    }

    /// Try each retailer, then image search, then the static table
    pub async fn find_product_info(&self, item_name: &str) -> ProductInfo {
        let query = self.tables.enhance_query(item_name);
        debug!("Product search query for \"{}\": \"{}\"", item_name, query);

        for site in &self.retailers {
            if let Some(listing) = self.search_retailer(site, &query).await {
                info!(
                    "Found {} product for \"{}\": {} ({})",
                    listing.store,
                    item_name,
                    listing.name,
                    listing.display_price()
                );
                return listing.into();
            }
        }

        if let Some(image_url) = self.search_images(item_name).await {
            info!("Using image search result for \"{}\"", item_name);
            return ProductInfo::image_only(image_url);
        }

        if let Some(image_url) = self.tables.static_image(item_name) {
            info!("Using static image for \"{}\"", item_name);
            return ProductInfo::image_only(image_url);
        }

        info!("No product found for \"{}\"", item_name);
        ProductInfo::default()
    }
}

#[async_trait]
impl ProductLookup for ProductMatcher {
    async fn find_product_info(&self, item_name: &str) -> ProductInfo {
        ProductMatcher::find_product_info(self, item_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> KeywordTables {
        KeywordTables::builtin().unwrap()
    }

    #[test]
    fn test_resolve_link() {
        assert_eq!(
            resolve_link("https://www.lowes.com", "/pd/Utility-Knife/1000"),
            "https://www.lowes.com/pd/Utility-Knife/1000"
        );
        assert_eq!(
            resolve_link("https://www.homedepot.com", "https://www.homedepot.com/p/Caulk/42"),
            "https://www.homedepot.com/p/Caulk/42"
        );
    }

    #[test]
    fn test_home_depot_product_pod() {
        let site = RetailerSite::home_depot().unwrap();
        let html = r#"
            <div class="grid" data-testid="product-pod" data-sku="1">
              <a href="/p/Husky-Adjustable-Wrench/305">
                <img class="thumb" src="//images.homedepot-static.com/productImages/wrench.jpg" alt="Husky 10 in. Adjustable Wrench">
              </a>
              <span class="price">$19.97</span>
            </div>"#;

        let listing = site
            .extract_listing(html, "adjustable wrench", &tables(), &PricePatterns::new().unwrap())
            .unwrap();

        assert_eq!(listing.store, "Home Depot");
        assert_eq!(listing.image_url, "https://images.homedepot-static.com/productImages/wrench.jpg");
        assert_eq!(listing.product_url, "https://www.homedepot.com/p/Husky-Adjustable-Wrench/305");
        assert_eq!(listing.display_price(), "$19.97");
    }

    #[test]
    fn test_home_depot_price_found_near_name() {
        let site = RetailerSite::home_depot().unwrap();
        let html = r#"
            <a href="https://www.homedepot.com/p/Silicone-Caulk/42" class="link">
              <img src="https://images.homedepot-static.com/caulk.jpg" alt="Clear Silicone Caulk Sealant">
            </a>
            <div data-testid="sticky-nav__price-value--8.48"></div>"#;

        let listing = site
            .extract_listing(html, "silicone caulk", &tables(), &PricePatterns::new().unwrap())
            .unwrap();

        assert_eq!(listing.product_url, "https://www.homedepot.com/p/Silicone-Caulk/42");
        assert_eq!(listing.price.as_deref(), Some("8.48"));
    }

    #[test]
    fn test_home_depot_skips_irrelevant_products() {
        let site = RetailerSite::home_depot().unwrap();
        let html = r#"<img src="https://images.homedepot-static.com/primer.jpg" alt="Kilz Primer Sealer">"#;

        let listing = site.extract_listing(html, "interior paint", &tables(), &PricePatterns::new().unwrap());
        assert!(listing.is_none());
    }

    #[test]
    fn test_home_depot_image_only_uses_search_url() {
        let site = RetailerSite::home_depot().unwrap();
        let html = r#"<img src="https://images.homedepot-static.com/knife.jpg" alt="Putty Knife 3 in.">"#;

        let listing = site
            .extract_listing(html, "putty knife", &tables(), &PricePatterns::new().unwrap())
            .unwrap();

        assert_eq!(listing.product_url, site.search_url("putty knife"));
        assert!(listing.product_url.starts_with("https://www.homedepot.com/s/putty%20knife"));
        assert_eq!(listing.price, None);
    }

    #[test]
    fn test_lowes_pd_link() {
        let site = RetailerSite::lowes().unwrap();
        let html = r#"
            <a href="/pd/Project-Source-Utility-Knife/1000">
              <img src="https://mobileimages.lowes.com/knife.jpg" alt="Project Source Utility Knife">
            </a>
            <span>$6.98</span>"#;

        let listing = site
            .extract_listing(html, "utility knife", &tables(), &PricePatterns::new().unwrap())
            .unwrap();

        assert_eq!(listing.store, "Lowe's");
        assert_eq!(listing.product_url, "https://www.lowes.com/pd/Project-Source-Utility-Knife/1000");
        assert_eq!(listing.price.as_deref(), Some("6.98"));
    }

    #[test]
    fn test_price_window_limits_distance() {
        let prices = PricePatterns::new().unwrap();
        let html = format!("<img>{}$5.00", " ".repeat(30));
        assert_eq!(prices.find_after(&html, 5, 2000).as_deref(), Some("5.00"));
        assert_eq!(prices.find_after(&html, 5, 10), None);
    }

    #[test]
    fn test_text_window_respects_char_boundaries() {
        let text = "ééééé$1";
        let area = text_window(text, 3, 2);
        assert!(area.starts_with('é'));
        assert!(text.contains(area));
    }

    #[test]
    fn test_image_search_decodes_and_filters() {
        let search = ImageSearch::new().unwrap();
        let html = r#"
            {"murl":"https://cdn.example.com/garden-flower.jpg"}
            {"murl":"https%3A%2F%2Fcdn.example.com%2Fhammer.png"}
        "#;

        let url = search.extract_image(html, "Claw hammer", &tables());
        assert_eq!(url.as_deref(), Some("https://cdn.example.com/hammer.png"));

        let url = search.extract_image(html, "Garden flower pot", &tables());
        assert_eq!(url.as_deref(), Some("https://cdn.example.com/garden-flower.jpg"));
    }

    #[test]
    fn test_image_search_category_hint() {
        let search = ImageSearch::new().unwrap();
        let url = search.search_url("PVC pipe");
        assert!(url.contains("plumbing%20hardware%20store%20product"));
        assert!(url.starts_with("https://www.bing.com/images/search?q=%22PVC%20pipe%22"));
    }
}
