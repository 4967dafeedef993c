//! NPC vendor information

use serde::{Deserialize, Serialize};

/// Currency name used for ordinary (gil) vendors
pub const GIL: &str = "gil";

/// An NPC that sells an item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorInfo {
    pub name: String,
    /// Primary location
    pub location: String,
    /// Unit price in `currency`
    pub price: u32,
    pub currency: String,
    /// Other places the same vendor can be found
    #[serde(default)]
    pub alternate_locations: Vec<String>,
}

impl VendorInfo {
    pub fn gil(name: impl Into<String>, location: impl Into<String>, price: u32) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            price,
            currency: GIL.to_string(),
            alternate_locations: Vec::new(),
        }
    }

    pub fn is_gil_vendor(&self) -> bool {
        self.currency.eq_ignore_ascii_case(GIL)
    }
}

/// Cheapest gil vendor with its index, ties resolved by list order
pub fn cheapest_gil_vendor(vendors: &[VendorInfo]) -> Option<(usize, &VendorInfo)> {
    vendors
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_gil_vendor() && v.price > 0)
        .min_by_key(|(i, v)| (v.price, *i))
}

/// Merge vendors sharing a name, keeping the first location as primary.
///
/// Prices are taken from the first occurrence; later locations become
/// alternates unless they repeat an already-known location.
pub fn dedupe_vendor_locations(vendors: Vec<VendorInfo>) -> Vec<VendorInfo> {
    let mut merged: Vec<VendorInfo> = Vec::with_capacity(vendors.len());

    for vendor in vendors {
        let existing = merged
            .iter_mut()
            .find(|v| v.name == vendor.name && v.currency == vendor.currency);

        match existing {
            Some(v) => {
                let locations = std::iter::once(vendor.location).chain(vendor.alternate_locations);
                for location in locations {
                    if !location.is_empty()
                        && location != v.location
                        && !v.alternate_locations.contains(&location)
                    {
                        v.alternate_locations.push(location);
                    }
                }
            }
            None => merged.push(vendor),
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cheapest_gil_vendor_skips_special_currency() {
        let vendors = vec![
            VendorInfo::gil("Material Supplier", "Limsa Lominsa", 25),
            VendorInfo {
                currency: "Allagan Tomestone of Poetics".to_string(),
                ..VendorInfo::gil("Auriana", "Mor Dhona", 5)
            },
            VendorInfo::gil("Merchant & Mender", "Gridania", 12),
        ];

        let (index, vendor) = cheapest_gil_vendor(&vendors).unwrap();
        assert_eq!(index, 2);
        assert_eq!(vendor.price, 12);
    }

    #[test]
    fn test_no_gil_vendor() {
        let vendors = vec![VendorInfo {
            currency: "Wolf Mark".to_string(),
            ..VendorInfo::gil("Flame Quartermaster", "Gridania", 50)
        }];
        assert!(cheapest_gil_vendor(&vendors).is_none());
        assert!(!vendors[0].is_gil_vendor());
    }

    #[test]
    fn test_dedupe_keeps_primary_and_alternates() {
        let vendors = vec![
            VendorInfo::gil("Material Supplier", "Limsa Lominsa", 25),
            VendorInfo::gil("Material Supplier", "Gridania", 25),
            VendorInfo::gil("Material Supplier", "Limsa Lominsa", 25),
            VendorInfo::gil("Material Supplier", "Ul'dah", 25),
            VendorInfo::gil("Housing Merchant", "Mist", 30),
        ];

        let merged = dedupe_vendor_locations(vendors);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].location, "Limsa Lominsa");
        assert_eq!(merged[0].alternate_locations, vec!["Gridania", "Ul'dah"]);
        assert!(merged[1].alternate_locations.is_empty());
    }
}
