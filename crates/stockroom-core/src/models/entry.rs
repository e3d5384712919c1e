//! Merged view entries shown to the presentation layer

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::pending::PendingProduct;
use super::product::Product;

/// A product as displayed: either confirmed by the server or still pending
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductEntry {
    /// Server id for confirmed products, temp id for pending ones
    pub id: String,
    pub name: String,
    pub company: Option<String>,
    pub cost_price: f64,
    pub selling_price: f64,
    pub max_discount: f64,
    /// Remote URL when confirmed, local staged path when pending
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_pending: bool,
}

impl From<&Product> for ProductEntry {
    fn from(product: &Product) -> Self {
        Self {
            id: product.id.clone(),
            name: product.name.clone(),
            company: product.company.clone(),
            cost_price: product.cost_price,
            selling_price: product.selling_price,
            max_discount: product.max_discount,
            image: product.image_url.clone(),
            created_at: product.created_at,
            is_pending: false,
        }
    }
}

impl From<&PendingProduct> for ProductEntry {
    fn from(pending: &PendingProduct) -> Self {
        Self {
            id: pending.temp_id.to_string(),
            name: pending.name.clone(),
            company: pending.company.clone(),
            cost_price: pending.cost_price,
            selling_price: pending.selling_price,
            max_discount: pending.max_discount,
            image: pending
                .image
                .as_ref()
                .map(|image| image.path.display().to_string()),
            created_at: pending.created_at,
            is_pending: true,
        }
    }
}

/// Merge confirmed and pending products into one list, newest first.
///
/// Ties on `created_at` are broken by id so the order is deterministic.
pub fn merge_view<'a>(
    confirmed: impl IntoIterator<Item = &'a Product>,
    pending: impl IntoIterator<Item = &'a PendingProduct>,
) -> Vec<ProductEntry> {
    let mut entries: Vec<ProductEntry> = confirmed
        .into_iter()
        .map(ProductEntry::from)
        .chain(pending.into_iter().map(ProductEntry::from))
        .collect();
    entries.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProductInput, TempId};
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn product(id: &str, name: &str, created_at: DateTime<Utc>) -> Product {
        Product {
            id: id.to_string(),
            name: name.to_string(),
            company: None,
            company_id: None,
            cost_price: 1.0,
            selling_price: 2.0,
            max_discount: 0.0,
            image_url: None,
            created_at,
            client_ref: None,
        }
    }

    #[test]
    fn merge_sorts_newest_first_across_kinds() {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let older = product("srv-1", "Old", base);
        let newer = product("srv-2", "New", base + Duration::minutes(10));
        let valid = ProductInput::new("Middle", 1.0, 2.0).validate().unwrap();
        let middle_at = base + Duration::minutes(5);
        let pending = PendingProduct::new(TempId::generate(middle_at), valid, None, middle_at);

        let merged = merge_view([&older, &newer], [&pending]);
        let names: Vec<&str> = merged.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, vec!["New", "Middle", "Old"]);
        assert!(merged[1].is_pending);
        assert!(!merged[0].is_pending);
    }

    #[test]
    fn merge_breaks_timestamp_ties_by_id() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let merged = merge_view([&product("b", "B", at), &product("a", "A", at)], []);
        assert_eq!(merged[0].id, "a");
        assert_eq!(merged[1].id, "b");
    }
}
