use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::price_parser::PriceParser;
use super::traits::{RetailerScraper, ScrapeError};
use crate::models::{Observation, ScrapeUnit, ScrapingMethod};
use crate::session::ScrapeSession;
use crate::utils::error::AppError;

const QUERY_PLACEHOLDER: &str = "{query}";

/// CSS selectors describing one retailer's storefront.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectorScraperConfig {
    /// Must match the retailer's name in the catalog.
    pub retailer: String,
    /// Search page, `{query}` is replaced by the manufacturer id.
    pub search_url: String,
    /// First match on the search page leads to the product page.
    pub product_link: String,
    pub price: String,
    #[serde(default)]
    pub shipping_cost: Option<String>,
    /// Present only when the product can be ordered.
    #[serde(default)]
    pub in_stock: Option<String>,
    #[serde(default)]
    pub out_of_stock_text: Option<String>,
    #[serde(default)]
    pub sitemap_url: Option<String>,
    /// JSON pointer to the price inside a captured search API response.
    #[serde(default)]
    pub api_price_pointer: Option<String>,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "EUR".to_string()
}

impl SelectorScraperConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.retailer.trim().is_empty() {
            return Err("Scraper retailer name must not be empty".to_string());
        }

        if !self.search_url.contains(QUERY_PLACEHOLDER) {
            return Err(format!("{}: search_url must contain {}", self.retailer, QUERY_PLACEHOLDER));
        }
        Url::parse(&self.search_url.replace(QUERY_PLACEHOLDER, "query"))
            .map_err(|e| format!("{}: invalid search_url: {}", self.retailer, e))?;

        if let Some(sitemap) = &self.sitemap_url {
            Url::parse(sitemap).map_err(|e| format!("{}: invalid sitemap_url: {}", self.retailer, e))?;
        }

        let selectors = [Some(&self.product_link), Some(&self.price), self.shipping_cost.as_ref(), self.in_stock.as_ref()];
        for selector in selectors.into_iter().flatten() {
            Selector::parse(selector).map_err(|e| format!("{}: invalid selector '{}': {}", self.retailer, selector, e))?;
        }

        if let Some(pointer) = &self.api_price_pointer {
            if !pointer.starts_with('/') {
                return Err(format!("{}: api_price_pointer must start with '/'", self.retailer));
            }
        }

        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn example(retailer: &str) -> Self {
        Self {
            retailer: retailer.to_string(),
            search_url: "https://shop.example/search?q={query}".to_string(),
            product_link: "a.product-tile".to_string(),
            price: ".product-price".to_string(),
            shipping_cost: Some(".shipping-cost".to_string()),
            in_stock: Some(".add-to-cart".to_string()),
            out_of_stock_text: Some("nicht lieferbar".to_string()),
            sitemap_url: Some("https://shop.example/sitemap.xml".to_string()),
            api_price_pointer: Some("/product/price".to_string()),
            currency: "EUR".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ProductPage {
    price: f64,
    shipping_cost: Option<f64>,
    in_stock: Option<bool>,
}

pub struct SelectorScraper {
    config: SelectorScraperConfig,
    parser: PriceParser,
}

impl SelectorScraper {
    pub fn new(config: SelectorScraperConfig) -> Result<Self, AppError> {
        config.validate().map_err(AppError::InvalidConfiguration)?;
        let parser = PriceParser::new(&config.currency).map_err(|e| AppError::Internal(e.to_string()))?;
        Ok(Self { config, parser })
    }

    fn search_url(&self, unit: &ScrapeUnit) -> Result<String, ScrapeError> {
        let id = unit
            .manufacturer_id
            .as_deref()
            .ok_or_else(|| ScrapeError::Other(format!("{} has no manufacturer id to search for", unit.label())))?;
        let query: String = url::form_urlencoded::byte_serialize(id.as_bytes()).collect();
        Ok(self.config.search_url.replace(QUERY_PLACEHOLDER, &query))
    }

    fn selector(css: &str) -> Result<Selector, ScrapeError> {
        Selector::parse(css).map_err(|e| ScrapeError::parse(format!("selector '{}': {}", css, e)))
    }

    fn first_product_link(&self, html: &str, page_url: &str) -> Result<Option<String>, ScrapeError> {
        let document = Html::parse_document(html);
        let selector = Self::selector(&self.config.product_link)?;
        let Some(href) = document.select(&selector).find_map(|el| el.value().attr("href")) else {
            return Ok(None);
        };

        let base = Url::parse(page_url).map_err(|e| ScrapeError::parse(format!("page url '{}': {}", page_url, e)))?;
        let link = base
            .join(href)
            .map_err(|e| ScrapeError::parse(format!("product link '{}': {}", href, e)))?;
        Ok(Some(link.to_string()))
    }

    fn has_price(&self, html: &str) -> Result<bool, ScrapeError> {
        let selector = Self::selector(&self.config.price)?;
        Ok(Html::parse_document(html).select(&selector).next().is_some())
    }

    fn read_price(&self, text: &str) -> Result<f64, ScrapeError> {
        let parsed = self
            .parser
            .parse(text)
            .ok_or_else(|| ScrapeError::parse(format!("no price in '{}'", text.trim())))?;

        // Prices are stored without a currency, so a foreign one cannot be kept.
        if !parsed.currency.eq_ignore_ascii_case(&self.config.currency) {
            return Err(ScrapeError::parse(format!(
                "price '{}' is in {}, expected {}",
                text.trim(),
                parsed.currency,
                self.config.currency
            )));
        }

        parsed
            .as_f64()
            .ok_or_else(|| ScrapeError::parse(format!("price '{}' out of range", text.trim())))
    }

    fn parse_product_page(&self, html: &str) -> Result<ProductPage, ScrapeError> {
        let document = Html::parse_document(html);

        let price_selector = Self::selector(&self.config.price)?;
        let price_text: String = document
            .select(&price_selector)
            .next()
            .ok_or_else(|| ScrapeError::missing(&self.config.price))?
            .text()
            .collect();
        let price = self.read_price(&price_text)?;

        let shipping_cost = match &self.config.shipping_cost {
            Some(css) => {
                let selector = Self::selector(css)?;
                match document.select(&selector).next() {
                    Some(element) => Some(self.read_price(&element.text().collect::<String>())?),
                    None => None,
                }
            }
            None => None,
        };

        let out_of_stock = self.config.out_of_stock_text.as_ref().map(|needle| {
            let page_text = document.root_element().text().collect::<String>().to_lowercase();
            page_text.contains(&needle.to_lowercase())
        });
        let in_stock = match (out_of_stock, &self.config.in_stock) {
            (Some(true), _) => Some(false),
            (_, Some(css)) => Some(document.select(&Self::selector(css)?).next().is_some()),
            (Some(false), None) => Some(true),
            (None, None) => None,
        };

        Ok(ProductPage {
            price,
            shipping_cost,
            in_stock,
        })
    }

    fn sitemap_entry(&self, xml: &str, manufacturer_id: &str) -> Result<Option<String>, ScrapeError> {
        let document = Html::parse_document(xml);
        let selector = Self::selector("loc")?;
        Ok(document
            .select(&selector)
            .map(|loc| loc.text().collect::<String>().trim().to_string())
            .find(|url| url.contains(manufacturer_id)))
    }

    async fn scrape_product_page(
        &self,
        session: &dyn ScrapeSession,
        unit: &ScrapeUnit,
        url: &str,
    ) -> Result<Option<Observation>, ScrapeError> {
        session.navigate(url).await?;
        let html = session.content().await?;
        let page = self.parse_product_page(&html)?;

        Ok(Some(Observation {
            product_id: unit.product_id,
            retailer_id: unit.retailer_id,
            price: Some(page.price),
            shipping_cost: page.shipping_cost,
            in_stock: page.in_stock,
            url: Some(url.to_string()),
        }))
    }

    fn price_from_json(&self, value: &serde_json::Value) -> Option<f64> {
        match value {
            serde_json::Value::Number(number) => number.as_f64(),
            serde_json::Value::String(text) => self.read_price(text).ok(),
            _ => None,
        }
    }
}

#[async_trait]
impl RetailerScraper for SelectorScraper {
    fn name(&self) -> &str {
        &self.config.retailer
    }

    async fn scrape_by_ui(
        &self,
        session: &dyn ScrapeSession,
        unit: &ScrapeUnit,
    ) -> Result<Option<Observation>, ScrapeError> {
        let search_url = self.search_url(unit)?;
        session.navigate(&search_url).await?;
        let html = session.content().await?;
        let page_url = session.current_url().await?;

        if let Some(product_url) = self.first_product_link(&html, &page_url)? {
            return self.scrape_product_page(session, unit, &product_url).await;
        }

        // Some shops redirect an exact match straight to the product page.
        match self.has_price(&html)? {
            true => {
                let page = self.parse_product_page(&html)?;
                Ok(Some(Observation {
                    product_id: unit.product_id,
                    retailer_id: unit.retailer_id,
                    price: Some(page.price),
                    shipping_cost: page.shipping_cost,
                    in_stock: page.in_stock,
                    url: Some(page_url),
                }))
            }
            false => {
                debug!(scraper = %self.name(), manufacturer_id = %unit.label(), "No search result");
                Ok(None)
            }
        }
    }

    async fn scrape_by_sitemap(
        &self,
        session: &dyn ScrapeSession,
        unit: &ScrapeUnit,
    ) -> Result<Option<Observation>, ScrapeError> {
        let Some(sitemap_url) = &self.config.sitemap_url else {
            return Err(ScrapeError::Unsupported(ScrapingMethod::Sitemap));
        };
        let Some(manufacturer_id) = unit.manufacturer_id.as_deref() else {
            return Err(ScrapeError::Other(format!("{} has no manufacturer id to look up", unit.label())));
        };

        session.navigate(sitemap_url).await?;
        let xml = session.content().await?;

        match self.sitemap_entry(&xml, manufacturer_id)? {
            Some(product_url) => self.scrape_product_page(session, unit, &product_url).await,
            None => {
                debug!(scraper = %self.name(), manufacturer_id, "Not listed in sitemap");
                Ok(None)
            }
        }
    }

    async fn scrape_by_api(
        &self,
        session: &dyn ScrapeSession,
        unit: &ScrapeUnit,
    ) -> Result<Option<Observation>, ScrapeError> {
        let Some(pointer) = &self.config.api_price_pointer else {
            return Err(ScrapeError::Unsupported(ScrapingMethod::Api));
        };

        // Only responses triggered by this unit's search count.
        let seen = session.captured_responses().await.len();
        let search_url = self.search_url(unit)?;
        session.navigate(&search_url).await?;

        let responses = session.captured_responses().await;
        let price = responses
            .iter()
            .skip(seen)
            .filter_map(|response| response.body.pointer(pointer))
            .find_map(|value| self.price_from_json(value));

        let Some(price) = price else {
            debug!(scraper = %self.name(), manufacturer_id = %unit.label(), "No price in captured responses");
            return Ok(None);
        };

        Ok(Some(Observation {
            product_id: unit.product_id,
            retailer_id: unit.retailer_id,
            price: Some(price),
            shipping_cost: None,
            in_stock: None,
            url: Some(session.current_url().await?),
        }))
    }
}
