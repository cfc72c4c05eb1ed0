//! Commits one item's outcome to persistent state.
//!
//! Every item ends in exactly one reconciliation write, fresh or stale.
//! The stale path is the retry mechanism: only status and timestamp move,
//! so the record keeps its data and drops out of selection until the
//! refresh interval elapses again.

use std::sync::Arc;

use chrono::Utc;
use recrawl_shared::{Result, Status, TrackedRecord};
use recrawl_store::{PageCache, RecordStore};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::envelope::{HarvestInput, HarvestOutput};
use crate::harvester::{Extraction, Harvester, Payload};

/// The two reconciliation shapes, chosen per pipeline instance.
#[derive(Clone)]
pub enum Reconciler {
    /// Merge extracted fields into the tracked record itself.
    Single,
    /// Create child records and store their count on the parent.
    FanOut {
        /// Store receiving the children; may differ from the parent store.
        child_store: Arc<RecordStore>,
        /// Parent field that receives the extracted-child count.
        counter_field: String,
    },
}

impl Reconciler {
    /// Apply `output` to the stores. Called exactly once per item.
    pub async fn reconcile(
        &self,
        store: &RecordStore,
        cache: &PageCache,
        harvester: &dyn Harvester,
        threshold: Status,
        input: &HarvestInput,
        output: &HarvestOutput,
    ) -> Result<()> {
        let now = Utc::now();
        let record = &input.record;

        // Stale path: status and timestamp only. No cache write, no field
        // merge, no children.
        if output.status < threshold {
            debug!(
                id = %record.id,
                status = %output.status,
                "stale outcome, status-only update"
            );
            store
                .update_record(&record.id, output.status, now, &Map::new())
                .await?;
            return Ok(());
        }

        if input.update_cache {
            if let (Some(url), Some(content)) = (&output.url, &output.content) {
                cache.set(url.as_str(), content, input.cache_ttl).await?;
            }
        }

        match self {
            Reconciler::Single => {
                let patch = merge_patch(harvester, output);
                debug!(
                    id = %record.id,
                    status = %output.status,
                    merged = patch.len(),
                    "fresh outcome, merging fields"
                );
                store
                    .update_record(&record.id, output.status, now, &patch)
                    .await?;
            }
            Reconciler::FanOut {
                child_store,
                counter_field,
            } => match extracted_children(record, output) {
                Some(children) => {
                    // Parent counter first, then the idempotent bulk insert.
                    let mut patch = Map::new();
                    patch.insert(counter_field.clone(), Value::from(children.len() as u64));
                    store
                        .update_record(&record.id, output.status, now, &patch)
                        .await?;

                    if !children.is_empty() {
                        let inserted = child_store.insert_records(children).await?;
                        debug!(
                            id = %record.id,
                            extracted = children.len(),
                            inserted,
                            "fresh outcome, children inserted"
                        );
                    }
                }
                // No payload at all (the page vanished mid-flight): leave the
                // previous count alone, like the empty merge on the single
                // shape.
                None => {
                    store
                        .update_record(&record.id, output.status, now, &Map::new())
                        .await?;
                }
            },
        }

        Ok(())
    }
}

/// Extracted fields that pass the harvester's merge rule.
fn merge_patch(harvester: &dyn Harvester, output: &HarvestOutput) -> Map<String, Value> {
    let mut patch = Map::new();
    match &output.extraction {
        Some(Extraction {
            payload: Payload::Fields(fields),
            ..
        }) => {
            for (key, value) in fields {
                if harvester.mergeable(key, value) {
                    patch.insert(key.clone(), value.clone());
                }
            }
        }
        Some(Extraction {
            payload: Payload::Children(_),
            ..
        }) => {
            warn!("harvester produced children in a field-merge pipeline, nothing merged");
        }
        None => {}
    }
    patch
}

/// The extracted child sequence, or `None` when extraction never produced
/// one.
fn extracted_children<'a>(
    record: &TrackedRecord,
    output: &'a HarvestOutput,
) -> Option<&'a [TrackedRecord]> {
    match &output.extraction {
        Some(Extraction {
            payload: Payload::Children(children),
            ..
        }) => Some(children),
        Some(Extraction {
            payload: Payload::Fields(_),
            ..
        }) => {
            warn!(id = %record.id, "harvester produced fields in a fan-out pipeline, no children");
            None
        }
        None => None,
    }
}
