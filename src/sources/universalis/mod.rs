//! Universalis marketboard adapter

use crate::error::{AppError, Result};
use crate::sources::rate_limiter::RateLimiter;
use crate::sources::types::*;
use crate::sources::MarketSource;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

const BASE_URL: &str = "https://universalis.app/";

/// The API rejects more ids than this per request
pub const MAX_ITEMS_PER_REQUEST: usize = 100;

/// Listings requested per item in bulk mode unless configured otherwise
pub const DEFAULT_BULK_LISTINGS: usize = 50;

/// Requests per second (the API allows 25)
const REQUESTS_PER_SECOND: u32 = 20;

/// Universalis market source
pub struct UniversalisMarketSource {
    client: Client,
    base_url: Url,
    limiter: RateLimiter,
    bulk_listings: usize,
}

impl UniversalisMarketSource {
    pub fn new() -> Result<Self> {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("craft-planner/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: Url::parse(base_url)?,
            limiter: RateLimiter::new(REQUESTS_PER_SECOND),
            bulk_listings: DEFAULT_BULK_LISTINGS,
        })
    }

    /// Listings to request per item in bulk lookups
    pub fn with_listings_per_item(mut self, listings: usize) -> Self {
        self.bulk_listings = listings.max(1);
        self
    }

    fn bulk_query(&self) -> [(&'static str, String); 2] {
        [
            ("listings", self.bulk_listings.to_string()),
            ("entries", "0".to_string()),
        ]
    }

    fn market_url(&self, region: &str, item_ids: &[u32]) -> Result<Url> {
        let ids = item_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        Ok(self.base_url.join(&format!(
            "api/v2/{}/{}",
            urlencoding::encode(region),
            ids
        ))?)
    }

    async fn fetch_json(&self, mut url: Url, query: &[(&str, String)]) -> Result<Value> {
        url.query_pairs_mut()
            .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));

        self.limiter.acquire().await;
        tracing::debug!("GET {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Source(format!(
                "Universalis returned {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl MarketSource for UniversalisMarketSource {
    fn id(&self) -> &'static str {
        "universalis"
    }

    async fn get_market_data(
        &self,
        region: &str,
        item_id: u32,
        hq_only: bool,
        entries: usize,
    ) -> Result<MarketListings> {
        let url = self.market_url(region, &[item_id])?;
        let mut query = vec![("listings", entries.to_string()), ("entries", "0".to_string())];
        if hq_only {
            query.push(("hq", "true".to_string()));
        }

        let json = self.fetch_json(url, &query).await?;
        let raw: RawItemMarket = serde_json::from_value(json)?;
        Ok(raw.into_listings(region, item_id))
    }

    async fn get_market_data_bulk(
        &self,
        region: &str,
        item_ids: &[u32],
    ) -> Result<HashMap<u32, MarketListings>> {
        let mut result = HashMap::with_capacity(item_ids.len());

        for chunk in item_ids.chunks(MAX_ITEMS_PER_REQUEST) {
            let url = self.market_url(region, chunk)?;
            let query = self.bulk_query();
            let json = self.fetch_json(url, &query).await?;
            result.extend(parse_bulk_response(json, region, chunk)?);
        }

        tracing::debug!(
            "Universalis bulk {}: {} of {} items returned",
            region,
            result.len(),
            item_ids.len()
        );
        Ok(result)
    }
}

// ============================================================================
// Response parsing
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawListing {
    #[serde(default)]
    price_per_unit: u32,
    #[serde(default)]
    quantity: u32,
    #[serde(default)]
    world_name: Option<String>,
    #[serde(default)]
    retainer_name: Option<String>,
    #[serde(default)]
    hq: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawItemMarket {
    #[serde(rename = "itemID", default)]
    item_id: u32,
    /// Present when the query scope is a single world
    #[serde(default)]
    world_name: Option<String>,
    #[serde(default)]
    listings: Vec<RawListing>,
    #[serde(rename = "averagePriceNQ", default)]
    average_price_nq: f64,
    #[serde(rename = "averagePriceHQ", default)]
    average_price_hq: f64,
    #[serde(default)]
    last_upload_time: i64,
}

impl RawItemMarket {
    fn into_listings(self, region: &str, fallback_id: u32) -> MarketListings {
        let scope_world = self.world_name.unwrap_or_else(|| region.to_string());
        let listings = self
            .listings
            .into_iter()
            .filter(|l| l.quantity > 0)
            .map(|l| MarketListing {
                world_name: l.world_name.unwrap_or_else(|| scope_world.clone()),
                price_per_unit: l.price_per_unit,
                quantity: l.quantity,
                retainer_name: l.retainer_name.unwrap_or_default(),
                hq: l.hq,
            })
            .collect();

        MarketListings {
            item_id: if self.item_id == 0 { fallback_id } else { self.item_id },
            region: region.to_string(),
            listings,
            average_price_nq: self.average_price_nq,
            average_price_hq: self.average_price_hq,
            last_upload_time: self.last_upload_time,
        }
    }
}

/// Single-item responses are the item object itself; multi-item
/// responses wrap items in an `items` map keyed by id.
fn parse_bulk_response(
    json: Value,
    region: &str,
    requested: &[u32],
) -> Result<HashMap<u32, MarketListings>> {
    let mut result = HashMap::new();

    match json.get("items") {
        Some(Value::Object(items)) => {
            for (key, value) in items {
                let Ok(id) = key.parse::<u32>() else {
                    continue;
                };
                let raw: RawItemMarket = serde_json::from_value(value.clone())?;
                result.insert(id, raw.into_listings(region, id));
            }
        }
        _ => {
            if let [only] = requested {
                let raw: RawItemMarket = serde_json::from_value(json)?;
                result.insert(*only, raw.into_listings(region, *only));
            } else {
                return Err(AppError::InvalidData(
                    "Universalis bulk response has no 'items' map".to_string(),
                ));
            }
        }
    }

    Ok(result)
}
