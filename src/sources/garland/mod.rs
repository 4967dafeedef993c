//! Garland Tools item/recipe adapter
//!
//! Fetches item documents and normalizes them into [`ItemRecord`]s. The
//! documents are loosely typed: ids and counts arrive as numbers or
//! strings, flags as booleans or 0/1, and vendors either as full objects
//! or as NPC id references into the document's `partials` list. All of
//! that is resolved here.

use crate::error::{AppError, Result};
use crate::models::vendor::{dedupe_vendor_locations, VendorInfo, GIL};
use crate::sources::rate_limiter::RateLimiter;
use crate::sources::types::*;
use crate::sources::ItemSource;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use url::Url;

const BASE_URL: &str = "https://www.garlandtools.org/";

/// Requests per second allowed against the item database
const REQUESTS_PER_SECOND: u32 = 8;

/// Garland Tools item source
pub struct GarlandItemSource {
    client: Client,
    base_url: Url,
    limiter: RateLimiter,
}

impl GarlandItemSource {
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
        })
    }

    fn item_url(&self, item_id: u32) -> Result<Url> {
        Ok(self
            .base_url
            .join(&format!("db/doc/item/en/3/{}.json", item_id))?)
    }
}

#[async_trait]
impl ItemSource for GarlandItemSource {
    fn id(&self) -> &'static str {
        "garland"
    }

    async fn get_item(&self, item_id: u32) -> Result<Option<ItemRecord>> {
        self.limiter.acquire().await;

        let response = self.client.get(self.item_url(item_id)?).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                tracing::debug!("Garland has no item {}", item_id);
                return Ok(None);
            }
            status if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS => {
                return Err(AppError::InvalidData(format!(
                    "Garland rejected item {} with {}",
                    item_id, status
                )));
            }
            status if !status.is_success() => {
                return Err(AppError::Source(format!(
                    "Garland returned {} for item {}",
                    status, item_id
                )));
            }
            _ => {}
        }

        let document: Value = response.json().await?;
        parse_item_document(&document).map(Some)
    }
}

// ============================================================================
// Lenient value parsing
// ============================================================================

/// Number, numeric string or bool as `u32`; anything else is 0
fn lenient_u32(value: Option<&Value>) -> u32 {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
            .map(|v| v.min(u32::MAX as u64) as u32)
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        Some(Value::Bool(b)) => *b as u32,
        _ => 0,
    }
}

/// Bool, non-zero number or "true"/"1"; anything else is false
fn lenient_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => matches!(s.trim(), "1" | "true" | "True"),
        _ => false,
    }
}

/// String or number rendered as a string
fn lenient_string(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn array<'a>(value: Option<&'a Value>) -> &'a [Value] {
    value
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn job_name(job: Option<&Value>) -> String {
    if let Some(Value::String(s)) = job {
        if s.parse::<u32>().is_err() {
            return s.clone();
        }
    }
    match lenient_u32(job) {
        8 => "Carpenter",
        9 => "Blacksmith",
        10 => "Armorer",
        11 => "Goldsmith",
        12 => "Leatherworker",
        13 => "Weaver",
        14 => "Alchemist",
        15 => "Culinarian",
        0 => "Unknown",
        _ => "Other",
    }
    .to_string()
}

// ============================================================================
// Document parsing
// ============================================================================

/// Normalize a Garland item document (`{ item, partials, ... }`)
pub fn parse_item_document(document: &Value) -> Result<ItemRecord> {
    let item = document
        .get("item")
        .ok_or_else(|| AppError::InvalidData("Garland document has no 'item' field".to_string()))?;

    let id = lenient_u32(item.get("id"));
    if id == 0 {
        return Err(AppError::InvalidData("Garland item has no usable id".to_string()));
    }

    let partials = index_partials(document);

    let mut recipes = Vec::new();
    let mut company_craft_phases = Vec::new();
    for craft in array(item.get("craft")) {
        let phases = array(craft.get("phases"));
        if !phases.is_empty() {
            company_craft_phases = phases
                .iter()
                .enumerate()
                .map(|(i, phase)| CompanyCraftPhase {
                    phase: craft_phase_index(phase, i),
                    items: parse_ingredients(phase.get("items")),
                })
                .collect();
            continue;
        }

        recipes.push(RecipeRecord {
            recipe_id: lenient_u32(craft.get("id")),
            job: job_name(craft.get("job")),
            recipe_level: match lenient_u32(craft.get("lvl")) {
                0 => lenient_u32(craft.get("rlvl")),
                lvl => lvl,
            },
            yield_count: lenient_u32(craft.get("yield")).max(1),
            ingredients: parse_ingredients(craft.get("ingredients")),
        });
    }

    let mut vendors = extract_vendors(item, &partials);
    vendors.extend(extract_trade_shop_vendors(item, &partials));

    Ok(ItemRecord {
        id,
        name: lenient_string(item.get("name")).unwrap_or_else(|| format!("Item {}", id)),
        icon_id: lenient_u32(item.get("icon")),
        tradeable: lenient_bool(item.get("tradeable")),
        can_be_hq: lenient_bool(item.get("hq")) || lenient_bool(item.get("canBeHq")),
        recipes,
        vendors: dedupe_vendor_locations(vendors),
        company_craft_phases,
    })
}

fn craft_phase_index(phase: &Value, position: usize) -> u32 {
    match phase.get("phase") {
        Some(v) => lenient_u32(Some(v)),
        None => position as u32,
    }
}

fn parse_ingredients(value: Option<&Value>) -> Vec<Ingredient> {
    array(value)
        .iter()
        .map(|i| Ingredient {
            item_id: lenient_u32(i.get("id")),
            amount: lenient_u32(i.get("amount")).max(1),
        })
        .filter(|i| i.item_id != 0)
        .collect()
}

/// `(type, id) -> obj` for the document's partials
fn index_partials(document: &Value) -> HashMap<(String, u32), &Value> {
    array(document.get("partials"))
        .iter()
        .filter_map(|p| {
            let kind = p.get("type")?.as_str()?.to_string();
            let id = lenient_u32(p.get("id"));
            let obj = p.get("obj")?;
            Some(((kind, id), obj))
        })
        .collect()
}

fn npc_location(npc: &Value) -> String {
    match npc.get("l") {
        Some(Value::String(s)) => s.clone(),
        Some(v) => match lenient_u32(Some(v)) {
            0 => String::new(),
            id => format!("Zone {}", id),
        },
        None => lenient_string(npc.get("location")).unwrap_or_default(),
    }
}

/// Gil vendors for an item.
///
/// Handles fully populated vendor objects and NPC id references. Id
/// references are resolved only against the ids the item itself lists,
/// so unrelated NPCs in `partials` (quest givers and the like) are never
/// attributed as vendors.
fn extract_vendors(item: &Value, partials: &HashMap<(String, u32), &Value>) -> Vec<VendorInfo> {
    let price = lenient_u32(item.get("price"));
    let mut vendors = Vec::new();
    let mut declared_ids = Vec::new();

    for entry in array(item.get("vendors")) {
        match entry {
            Value::Object(_) => {
                let name = match lenient_string(entry.get("name")) {
                    Some(n) => n,
                    None => continue,
                };
                let entry_price = match lenient_u32(entry.get("price")) {
                    0 => price,
                    p => p,
                };
                vendors.push(VendorInfo {
                    name,
                    location: lenient_string(entry.get("location")).unwrap_or_default(),
                    price: entry_price,
                    currency: lenient_string(entry.get("currency")).unwrap_or_else(|| GIL.to_string()),
                    alternate_locations: Vec::new(),
                });
            }
            other => {
                let id = lenient_u32(Some(other));
                if id != 0 {
                    declared_ids.push(id);
                }
            }
        }
    }

    if !declared_ids.is_empty() && price > 0 {
        let mut seen = HashSet::new();
        for id in declared_ids.iter().filter(|id| seen.insert(**id)) {
            let Some(npc) = partials.get(&("npc".to_string(), *id)) else {
                tracing::trace!("Vendor npc {} not in partials", id);
                continue;
            };
            vendors.push(VendorInfo {
                name: lenient_string(npc.get("n")).unwrap_or_else(|| format!("NPC {}", id)),
                location: npc_location(npc),
                price,
                currency: GIL.to_string(),
                alternate_locations: Vec::new(),
            });
        }
    }

    vendors
}

/// Special-currency shops (`tradeShops`) selling the item for one unit
fn extract_trade_shop_vendors(
    item: &Value,
    partials: &HashMap<(String, u32), &Value>,
) -> Vec<VendorInfo> {
    let item_id = lenient_u32(item.get("id"));
    let mut vendors = Vec::new();

    for shop in array(item.get("tradeShops")) {
        let shop_name = lenient_string(shop.get("shop")).unwrap_or_else(|| "Trade Shop".to_string());

        for listing in array(shop.get("listings")) {
            let sells_item = array(listing.get("item"))
                .iter()
                .any(|i| lenient_u32(i.get("id")) == item_id);
            if !sells_item {
                continue;
            }
            let Some(currency) = array(listing.get("currency")).first() else {
                continue;
            };
            let currency_id = lenient_u32(currency.get("id"));
            let currency_name = partials
                .get(&("item".to_string(), currency_id))
                .and_then(|obj| lenient_string(obj.get("n")))
                .unwrap_or_else(|| format!("Currency {}", currency_id));
            let price = lenient_u32(currency.get("amount"));

            let npc_ids = array(shop.get("npcs"));
            if npc_ids.is_empty() {
                vendors.push(VendorInfo {
                    name: shop_name.clone(),
                    location: String::new(),
                    price,
                    currency: currency_name.clone(),
                    alternate_locations: Vec::new(),
                });
            }
            for npc_id in npc_ids {
                let id = lenient_u32(Some(npc_id));
                let npc = partials.get(&("npc".to_string(), id));
                vendors.push(VendorInfo {
                    name: npc
                        .and_then(|n| lenient_string(n.get("n")))
                        .unwrap_or_else(|| shop_name.clone()),
                    location: npc.map(|n| npc_location(n)).unwrap_or_default(),
                    price,
                    currency: currency_name.clone(),
                    alternate_locations: Vec::new(),
                });
            }
        }
    }

    vendors
}
