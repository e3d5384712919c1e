//! Matching confirmed records against queued pending entries.
//!
//! A record that echoes a `client_ref` is matched exactly against the temp ids
//! of the local queue. Servers that drop the key fall back to a best-effort
//! field comparison within a tolerance window.

use chrono::Duration;

use crate::models::{PendingProduct, Product};
use crate::util::normalize_lookup_key;

/// How a pending entry was paired with a confirmed record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// The record carried the entry's temp id as idempotency key
    Exact,
    /// Same fields and creation times within the tolerance window
    Heuristic,
}

/// Index of the queued entry that `record` confirms, if any.
///
/// Records carrying a `client_ref` only ever match the entry with that temp
/// id, so a key belonging to another device retires nothing. Without a key,
/// only entries for which `writing` holds are considered, earliest-enqueued
/// first. Callers pass the entries whose create request is under way.
pub fn find_match(
    queue: &[PendingProduct],
    record: &Product,
    tolerance: Duration,
    writing: impl Fn(&PendingProduct) -> bool,
) -> Option<(usize, MatchKind)> {
    if let Some(client_ref) = record.client_ref.as_deref() {
        return queue
            .iter()
            .position(|entry| entry.temp_id.as_str() == client_ref)
            .map(|index| (index, MatchKind::Exact));
    }

    queue
        .iter()
        .position(|entry| writing(entry) && fields_match(entry, record, tolerance))
        .map(|index| (index, MatchKind::Heuristic))
}

/// Field comparison used when no idempotency key is available
pub fn fields_match(entry: &PendingProduct, record: &Product, tolerance: Duration) -> bool {
    entry.name == record.name
        && same_amount(entry.cost_price, record.cost_price)
        && same_amount(entry.selling_price, record.selling_price)
        && same_company(entry.company.as_deref(), record.company.as_deref())
        && (entry.created_at - record.created_at).abs() < tolerance
}

fn same_amount(left: f64, right: f64) -> bool {
    (left - right).abs() <= f64::EPSILON * left.abs().max(right.abs()).max(1.0)
}

fn same_company(left: Option<&str>, right: Option<&str>) -> bool {
    let key = |value: Option<&str>| value.map(normalize_lookup_key).unwrap_or_default();
    key(left) == key(right)
}
