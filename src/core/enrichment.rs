use futures::future::join_all;
use std::sync::Arc;
use tracing::info;

use crate::analysis::RepairAnalysis;
use crate::scraper::{ProductInfo, ProductLookup};

/// Attaches store links and pictures to every material and tool of a plan
pub struct Enricher {
    products: Arc<dyn ProductLookup>,
}

impl Enricher {
    pub fn new(products: Arc<dyn ProductLookup>) -> Self {
        Self { products }
    }

    /// Look up all items concurrently and overwrite their product fields.
    /// Items with no result get their product fields cleared.
    pub async fn add_product_info(&self, analysis: &mut RepairAnalysis) {
        let material_lookups = join_all(
            analysis
                .materials
                .iter()
                .map(|m| self.products.find_product_info(&m.name)),
        );
        let tool_lookups = join_all(
            analysis
                .tools
                .iter()
                .map(|t| self.products.find_product_info(&t.name)),
        );
        let (material_info, tool_info) = tokio::join!(material_lookups, tool_lookups);

        let mut found = 0;
        for (material, info) in analysis.materials.iter_mut().zip(material_info) {
            found += usize::from(info.image_url.is_some());
            let ProductInfo { image_url, product_url, store_name } = info;
            material.image_url = image_url;
            material.product_url = product_url;
            material.store_name = store_name;
        }
        for (tool, info) in analysis.tools.iter_mut().zip(tool_info) {
            found += usize::from(info.image_url.is_some());
            let ProductInfo { image_url, product_url, store_name } = info;
            tool.image_url = image_url;
            tool.product_url = product_url;
            tool.store_name = store_name;
        }

        info!(
            "Product lookup found images for {} of {} items",
            found,
            analysis.materials.len() + analysis.tools.len()
        );
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Serves canned product info by item name
    #[derive(Default)]
    pub struct StubProducts {
        pub items: HashMap<String, ProductInfo>,
    }

    impl StubProducts {
        pub fn with(mut self, name: &str, store: &str) -> Self {
            self.items.insert(
                name.to_string(),
                ProductInfo {
                    image_url: Some(format!("https://img.test/{}.jpg", name.replace(' ', "-"))),
                    product_url: Some(format!("https://store.test/p/{}", name.replace(' ', "-"))),
                    store_name: Some(store.to_string()),
                },
            );
            self
        }
    }

    #[async_trait]
    impl ProductLookup for StubProducts {
        async fn find_product_info(&self, item_name: &str) -> ProductInfo {
            self.items.get(item_name).cloned().unwrap_or_default()
        }
    }
}
