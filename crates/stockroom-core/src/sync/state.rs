//! In-memory reconciliation state owned by the engine.
//!
//! `ReconcileState` holds the confirmed record map and the pending queue. All
//! mutations go through its methods; the engine keeps it behind a single lock.

use std::collections::HashMap;

use chrono::Duration;

use super::matching::{find_match, MatchKind};
use crate::models::{merge_view, PendingProduct, Product, ProductEntry, StagedImage, TempId};
use crate::remote::{diff_snapshots, ChangeEvent};

/// What a batch of change events did to the queue
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Applied {
    /// Pending entries retired by a matching confirmed record
    pub retired: Vec<(TempId, String)>,
    /// Pending entries purged by a removal
    pub purged: Vec<TempId>,
    /// Staged images no longer referenced by the queue or a running pass
    pub released: Vec<StagedImage>,
}

impl Applied {
    pub fn queue_changed(&self) -> bool {
        !self.retired.is_empty() || !self.purged.is_empty()
    }
}

/// Snapshot of an entry handed to a sync pass
#[derive(Debug, Clone)]
struct InFlight {
    entry: PendingProduct,
    retired_by: Option<MatchKind>,
}

#[derive(Debug)]
pub struct ReconcileState {
    confirmed: HashMap<String, Product>,
    queue: Vec<PendingProduct>,
    in_flight: HashMap<TempId, InFlight>,
    tolerance: Duration,
}

impl ReconcileState {
    pub fn new(tolerance: std::time::Duration) -> Self {
        Self {
            confirmed: HashMap::new(),
            queue: Vec::new(),
            in_flight: HashMap::new(),
            tolerance: Duration::from_std(tolerance).unwrap_or_else(|_| Duration::seconds(5)),
        }
    }

    /// Replace the queue with entries restored from durable storage
    pub fn restore(&mut self, queue: Vec<PendingProduct>) {
        self.queue = queue;
    }

    /// Phase one of an add: append a validated entry to the queue
    pub fn enqueue(&mut self, entry: PendingProduct) {
        self.queue.push(entry);
    }

    pub fn queue(&self) -> &[PendingProduct] {
        &self.queue
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    pub fn confirmed_count(&self) -> usize {
        self.confirmed.len()
    }

    /// Flag entries as sent. Until their write settles they are eligible for
    /// field matching.
    pub fn mark_submitted(&mut self, ids: &[TempId]) {
        for id in ids {
            let Some(entry) = self.queue.iter_mut().find(|entry| &entry.temp_id == id) else {
                continue;
            };
            entry.submitted = true;
            self.in_flight.insert(
                id.clone(),
                InFlight {
                    entry: entry.clone(),
                    retired_by: None,
                },
            );
        }
    }

    /// A direct write response confirmed `id` as `record`.
    ///
    /// Removes the entry if the change feed has not retired it already and
    /// folds the record into the confirmed map unless the feed delivered it.
    pub fn mark_synced(&mut self, id: &TempId, record: Product) -> bool {
        self.in_flight.remove(id);
        let removed = self.remove_entry(id).is_some();
        self.confirmed.entry(record.id.clone()).or_insert(record);
        removed
    }

    /// A submit attempt for `id` failed; keep the entry for the next pass.
    ///
    /// An in-flight entry retired by field matching is put back, since its
    /// own write never landed. Returns whether the entry is queued afterwards.
    pub fn requeue_failed(&mut self, id: &TempId, error: &str) -> bool {
        let in_flight = self.in_flight.remove(id);

        if let Some(entry) = self.queue.iter_mut().find(|entry| &entry.temp_id == id) {
            entry.attempts = entry.attempts.saturating_add(1);
            entry.last_error = Some(error.to_string());
            return true;
        }

        match in_flight {
            Some(InFlight {
                mut entry,
                retired_by: Some(MatchKind::Heuristic),
            }) => {
                tracing::warn!(
                    "Restoring {} after a field match retired it while its write failed",
                    entry.temp_id
                );
                entry.attempts = entry.attempts.saturating_add(1);
                entry.last_error = Some(error.to_string());
                let position = self
                    .queue
                    .iter()
                    .position(|queued| queued.created_at > entry.created_at)
                    .unwrap_or(self.queue.len());
                self.queue.insert(position, entry);
                true
            }
            _ => false,
        }
    }

    /// Drop the image reference of a queued entry (upload failed or bytes gone)
    pub fn clear_image(&mut self, id: &TempId) -> Option<StagedImage> {
        self.queue
            .iter_mut()
            .find(|entry| &entry.temp_id == id)
            .and_then(|entry| entry.image.take())
    }

    /// Apply one batch of change feed events
    pub fn apply_changes(&mut self, events: Vec<ChangeEvent>) -> Applied {
        let mut applied = Applied::default();

        for event in events {
            match event {
                ChangeEvent::Added(record) => {
                    let known = self.confirmed.contains_key(&record.id);
                    if !known {
                        self.retire_matched(&record, &mut applied);
                    }
                    self.confirmed.insert(record.id.clone(), record);
                }
                ChangeEvent::Modified(record) => {
                    self.confirmed.insert(record.id.clone(), record);
                }
                ChangeEvent::Removed { id } => {
                    self.confirmed.remove(&id);
                    let Ok(temp_id) = id.parse::<TempId>() else {
                        continue;
                    };
                    if let Some(entry) = self.remove_entry(&temp_id) {
                        tracing::debug!("Purged pending {temp_id} after removal");
                        self.release_unless_in_flight(entry, &mut applied);
                        applied.purged.push(temp_id);
                    }
                }
            }
        }

        applied
    }

    /// Replace the confirmed map with a full listing, retiring matches on the way
    pub fn replace_confirmed(&mut self, records: &[Product]) -> Applied {
        let events = diff_snapshots(&self.confirmed, records);
        self.apply_changes(events)
    }

    /// Confirmed and pending entries, newest first
    pub fn merged_view(&self) -> Vec<ProductEntry> {
        merge_view(self.confirmed.values(), self.queue.iter())
    }

    fn retire_matched(&mut self, record: &Product, applied: &mut Applied) {
        let writing = |entry: &PendingProduct| self.in_flight.contains_key(&entry.temp_id);
        let Some((index, kind)) = find_match(&self.queue, record, self.tolerance, writing) else {
            return;
        };
        let entry = self.queue.remove(index);
        tracing::debug!(
            "Retired pending {} as {} ({kind:?} match)",
            entry.temp_id,
            record.id
        );
        if let Some(in_flight) = self.in_flight.get_mut(&entry.temp_id) {
            in_flight.retired_by = Some(kind);
        }
        applied
            .retired
            .push((entry.temp_id.clone(), record.id.clone()));
        self.release_unless_in_flight(entry, applied);
    }

    fn release_unless_in_flight(&self, entry: PendingProduct, applied: &mut Applied) {
        if self.in_flight.contains_key(&entry.temp_id) {
            return;
        }
        if let Some(image) = entry.image {
            applied.released.push(image);
        }
    }

    fn remove_entry(&mut self, id: &TempId) -> Option<PendingProduct> {
        let index = self.queue.iter().position(|entry| &entry.temp_id == id)?;
        Some(self.queue.remove(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProductInput;
    use chrono::{DateTime, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn at(seconds: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, seconds).unwrap()
    }

    fn pending(name: &str, created_at: DateTime<Utc>) -> PendingProduct {
        let valid = ProductInput::new(name, 10.0, 15.0).validate().unwrap();
        PendingProduct::new(TempId::generate(created_at), valid, None, created_at)
    }

    fn confirmed(id: &str, name: &str, created_at: DateTime<Utc>) -> Product {
        Product {
            id: id.to_string(),
            name: name.to_string(),
            company: None,
            company_id: None,
            cost_price: 10.0,
            selling_price: 15.0,
            max_discount: 0.0,
            image_url: None,
            created_at,
            client_ref: None,
        }
    }

    fn keyed(id: &str, entry: &PendingProduct) -> Product {
        entry.to_new_product(None, None).into_product(id)
    }

    fn state() -> ReconcileState {
        ReconcileState::new(std::time::Duration::from_secs(5))
    }

    fn ids(view: &[ProductEntry]) -> Vec<(String, bool)> {
        view.iter()
            .map(|entry| (entry.id.clone(), entry.is_pending))
            .collect()
    }

    #[test]
    fn added_record_with_client_ref_retires_its_entry() {
        let mut state = state();
        let entry = pending("Mug", at(0));
        state.enqueue(entry.clone());

        let applied = state.apply_changes(vec![ChangeEvent::Added(keyed("srv-1", &entry))]);

        assert_eq!(applied.retired, vec![(entry.temp_id, "srv-1".to_string())]);
        assert_eq!(state.pending_count(), 0);
        assert_eq!(ids(&state.merged_view()), vec![("srv-1".to_string(), false)]);
    }

    #[test]
    fn unsubmitted_entry_is_not_retired_by_field_match() {
        let mut state = state();
        state.enqueue(pending("Mug", at(0)));

        let applied = state.apply_changes(vec![ChangeEvent::Added(confirmed("srv-1", "Mug", at(1)))]);

        assert!(!applied.queue_changed());
        assert_eq!(state.pending_count(), 1);
        assert_eq!(state.merged_view().len(), 2);
    }

    #[test]
    fn one_event_retires_at_most_one_entry() {
        let mut state = state();
        let first = pending("Mug", at(0));
        let second = pending("Mug", at(1));
        state.enqueue(first.clone());
        state.enqueue(second.clone());
        state.mark_submitted(&[first.temp_id.clone(), second.temp_id.clone()]);

        state.apply_changes(vec![ChangeEvent::Added(confirmed("srv-1", "Mug", at(1)))]);

        assert_eq!(state.queue().len(), 1);
        assert_eq!(state.queue()[0].temp_id, second.temp_id);
    }

    #[test]
    fn redelivered_record_does_not_retire_again() {
        let mut state = state();
        let first = pending("Mug", at(0));
        let second = pending("Mug", at(1));
        state.enqueue(first.clone());
        state.enqueue(second.clone());
        state.mark_submitted(&[first.temp_id.clone(), second.temp_id.clone()]);

        let record = confirmed("srv-1", "Mug", at(0));
        state.apply_changes(vec![ChangeEvent::Added(record.clone())]);
        state.apply_changes(vec![ChangeEvent::Added(record)]);

        assert_eq!(state.pending_count(), 1);
    }

    #[test]
    fn direct_write_removes_entry_and_folds_record() {
        let mut state = state();
        let entry = pending("Mug", at(0));
        state.enqueue(entry.clone());
        state.mark_submitted(&[entry.temp_id.clone()]);

        assert!(state.mark_synced(&entry.temp_id, keyed("srv-1", &entry)));
        assert_eq!(state.pending_count(), 0);
        assert_eq!(state.confirmed_count(), 1);

        let applied = state.apply_changes(vec![ChangeEvent::Added(keyed("srv-1", &entry))]);
        assert!(!applied.queue_changed());
        assert_eq!(state.merged_view().len(), 1);
    }

    #[test]
    fn failed_submit_keeps_entry_and_counts_attempt() {
        let mut state = state();
        let entry = pending("Mug", at(0));
        state.enqueue(entry.clone());
        state.mark_submitted(&[entry.temp_id.clone()]);

        assert!(state.requeue_failed(&entry.temp_id, "network down"));
        let queued = &state.queue()[0];
        assert_eq!(queued.attempts, 1);
        assert_eq!(queued.last_error.as_deref(), Some("network down"));
        assert!(queued.submitted);
    }

    #[test]
    fn settled_entry_is_not_retired_by_field_match() {
        let mut state = state();
        let entry = pending("Mug", at(0));
        state.enqueue(entry.clone());
        state.mark_submitted(&[entry.temp_id.clone()]);
        state.requeue_failed(&entry.temp_id, "network down");

        let applied = state.apply_changes(vec![ChangeEvent::Added(confirmed("srv-1", "Mug", at(1)))]);

        assert!(!applied.queue_changed());
        assert_eq!(state.queue()[0].temp_id, entry.temp_id);
        assert_eq!(state.merged_view().len(), 2);
    }

    #[test]
    fn restored_submitted_entry_waits_for_its_own_write() {
        let mut state = state();
        let mut entry = pending("Mug", at(0));
        entry.submitted = true;
        state.restore(vec![entry.clone()]);

        state.apply_changes(vec![ChangeEvent::Added(confirmed("srv-1", "Mug", at(0)))]);
        assert_eq!(state.pending_count(), 1);

        state.apply_changes(vec![ChangeEvent::Added(keyed("srv-2", &entry))]);
        assert_eq!(state.pending_count(), 0);
    }

    #[test]
    fn field_matched_entry_is_restored_when_its_write_fails() {
        let mut state = state();
        let earlier = pending("Plate", at(0));
        let entry = pending("Mug", at(2));
        state.enqueue(earlier);
        state.enqueue(entry.clone());
        state.mark_submitted(&[entry.temp_id.clone()]);

        state.apply_changes(vec![ChangeEvent::Added(confirmed("srv-9", "Mug", at(2)))]);
        assert_eq!(state.pending_count(), 1);

        assert!(state.requeue_failed(&entry.temp_id, "timeout"));
        assert_eq!(state.queue()[1].temp_id, entry.temp_id);
        assert_eq!(state.queue()[1].attempts, 1);
    }

    #[test]
    fn exactly_matched_entry_stays_retired_when_response_fails() {
        let mut state = state();
        let entry = pending("Mug", at(0));
        state.enqueue(entry.clone());
        state.mark_submitted(&[entry.temp_id.clone()]);

        state.apply_changes(vec![ChangeEvent::Added(keyed("srv-1", &entry))]);
        assert!(!state.requeue_failed(&entry.temp_id, "response lost"));
        assert_eq!(state.pending_count(), 0);
    }

    #[test]
    fn removal_purges_confirmed_and_matching_temp_id() {
        let mut state = state();
        let entry = pending("Mug", at(0));
        state.enqueue(entry.clone());
        state.apply_changes(vec![ChangeEvent::Added(confirmed("srv-1", "Plate", at(3)))]);

        let applied = state.apply_changes(vec![
            ChangeEvent::Removed {
                id: "srv-1".to_string(),
            },
            ChangeEvent::Removed {
                id: entry.temp_id.to_string(),
            },
        ]);

        assert_eq!(applied.purged, vec![entry.temp_id]);
        assert!(state.merged_view().is_empty());
    }

    #[test]
    fn modified_event_updates_without_retiring() {
        let mut state = state();
        let entry = pending("Mug", at(0));
        state.enqueue(entry.clone());
        state.mark_submitted(&[entry.temp_id.clone()]);

        state.apply_changes(vec![ChangeEvent::Modified(confirmed("srv-1", "Mug", at(0)))]);
        assert_eq!(state.pending_count(), 1);
    }

    #[test]
    fn retired_entry_releases_its_image() {
        let mut state = state();
        let mut entry = pending("Mug", at(0));
        let image = StagedImage {
            path: PathBuf::from("/tmp/staged.png"),
            file_name: "staged.png".to_string(),
            content_type: None,
            owned: true,
        };
        entry.image = Some(image.clone());
        state.enqueue(entry.clone());

        let applied = state.apply_changes(vec![ChangeEvent::Added(keyed("srv-1", &entry))]);
        assert_eq!(applied.released, vec![image]);
    }

    #[test]
    fn replace_confirmed_diffs_against_known_records() {
        let mut state = state();
        state.apply_changes(vec![ChangeEvent::Added(confirmed("srv-1", "Old", at(0)))]);
        let entry = pending("Mug", at(1));
        state.enqueue(entry.clone());

        let applied = state.replace_confirmed(&[keyed("srv-2", &entry)]);

        assert_eq!(applied.retired.len(), 1);
        assert_eq!(ids(&state.merged_view()), vec![("srv-2".to_string(), false)]);
    }

    #[test]
    fn merged_view_orders_pending_and_confirmed_by_time() {
        let mut state = state();
        state.apply_changes(vec![
            ChangeEvent::Added(confirmed("srv-1", "Old", at(0))),
            ChangeEvent::Added(confirmed("srv-2", "Newest", at(30))),
        ]);
        let entry = pending("Middle", at(10));
        state.enqueue(entry.clone());

        assert_eq!(
            ids(&state.merged_view()),
            vec![
                ("srv-2".to_string(), false),
                (entry.temp_id.to_string(), true),
                ("srv-1".to_string(), false),
            ]
        );
    }
}
