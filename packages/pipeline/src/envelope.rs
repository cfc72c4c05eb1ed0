//! Per-item input and output envelopes.

use recrawl_shared::{ParseOptions, PipelineConfig, RenderOptions, RequestOptions, Status, TrackedRecord};
use url::Url;

use crate::harvester::Extraction;

/// Everything one pipeline execution needs, fixed at selection time.
#[derive(Debug, Clone)]
pub struct HarvestInput {
    /// The record being refreshed.
    pub record: TrackedRecord,
    /// Skip the cache lookup for this item.
    pub ignore_cache: bool,
    /// Write fetched content back to the cache on a fresh outcome.
    pub update_cache: bool,
    /// Lifetime for cache writes made on behalf of this item.
    pub cache_ttl: chrono::Duration,
    /// HTTP options for this item's live fetch.
    pub request: RequestOptions,
    /// Browser options for this item's render.
    pub render: RenderOptions,
    /// Opaque options handed to the extraction hook.
    pub parse: ParseOptions,
}

impl HarvestInput {
    /// Build an envelope for `record` with the batch-level defaults.
    pub fn new(record: TrackedRecord, config: &PipelineConfig) -> Self {
        Self {
            record,
            ignore_cache: config.ignore_cache,
            update_cache: config.update_cache,
            cache_ttl: config.effective_cache_ttl(),
            request: config.request.clone(),
            render: config.render.clone(),
            parse: config.parse.clone(),
        }
    }
}

/// Accumulated result of one pipeline execution.
///
/// Starts at [`Status::NotStarted`] and is finalized exactly once; the
/// reconciler reads it after the last pipeline step ran for the item.
#[derive(Debug, Clone)]
pub struct HarvestOutput {
    /// Fetch target derived from the record, when derivation succeeded.
    pub url: Option<Url>,
    /// Decoded page text, kept even when extraction fails.
    pub content: Option<String>,
    /// Whether `content` came from the cache rather than a live fetch.
    pub from_cache: bool,
    /// Extraction payload, present only when the hook returned normally.
    pub extraction: Option<Extraction>,
    /// Final status committed by the reconciler.
    pub status: Status,
}

impl HarvestOutput {
    pub fn new() -> Self {
        Self {
            url: None,
            content: None,
            from_cache: false,
            extraction: None,
            status: Status::NotStarted,
        }
    }
}

impl Default for HarvestOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_carries_batch_defaults() {
        let mut config = PipelineConfig::default();
        config.ignore_cache = true;
        config.update_cache = false;
        config.cache_ttl = Some(chrono::Duration::hours(6));

        let input = HarvestInput::new(TrackedRecord::new("r1"), &config);
        assert!(input.ignore_cache);
        assert!(!input.update_cache);
        assert_eq!(input.cache_ttl, chrono::Duration::hours(6));
    }

    #[test]
    fn cache_ttl_defaults_to_refresh_interval() {
        let config = PipelineConfig::default();
        let input = HarvestInput::new(TrackedRecord::new("r1"), &config);
        assert_eq!(input.cache_ttl, config.refresh_interval);
    }

    #[test]
    fn output_starts_not_started() {
        let output = HarvestOutput::new();
        assert_eq!(output.status, Status::NotStarted);
        assert!(output.url.is_none());
        assert!(output.content.is_none());
        assert!(output.extraction.is_none());
        assert!(!output.from_cache);
    }
}
