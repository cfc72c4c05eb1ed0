//! The user-supplied extraction hook.
//!
//! A [`Harvester`] owns the domain knowledge the pipeline itself does not
//! have: how to turn a record into a fetch URL, how to parse fetched text,
//! and which extracted values are allowed to overwrite stored ones. The
//! driver calls it through a trait object, so one pipeline binary can ship
//! several harvesters and pick one at runtime.

use recrawl_shared::{ParseOptions, RecrawlError, TrackedRecord, default_mergeable};
use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;

/// Extraction failure raised by a harvester.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The page itself is broken upstream (error shell, empty stub). The
    /// record is parked like a vanished page; the fetched content is kept.
    #[error("page unusable upstream: {0}")]
    PageGone(String),

    /// The harvester could not make sense of the content. Retryable, since
    /// extraction logic changes more often than pages do.
    #[error("{0}")]
    Failed(String),
}

impl ExtractError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn page_gone(message: impl Into<String>) -> Self {
        Self::PageGone(message.into())
    }
}

/// A condition reported by an otherwise successful extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The page loaded but its content is a placeholder or partial render.
    /// The record is parked like a vanished page, keeping any fields the
    /// harvester did manage to extract.
    Unusable,
}

/// What a harvester produced from one page.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// Optional condition overriding the plain success status.
    pub verdict: Option<Verdict>,
    /// The extracted data itself.
    pub payload: Payload,
}

/// The two output shapes a pipeline can produce.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Field values merged into the record itself.
    Fields(Map<String, Value>),
    /// New child records fanned out from this record.
    Children(Vec<TrackedRecord>),
}

impl Extraction {
    pub fn fields(fields: Map<String, Value>) -> Self {
        Self {
            verdict: None,
            payload: Payload::Fields(fields),
        }
    }

    pub fn children(children: Vec<TrackedRecord>) -> Self {
        Self {
            verdict: None,
            payload: Payload::Children(children),
        }
    }

    pub fn with_verdict(mut self, verdict: Verdict) -> Self {
        self.verdict = Some(verdict);
        self
    }
}

/// Domain hooks for one kind of tracked record.
pub trait Harvester: Send + Sync {
    /// Derive the fetch URL for `record`. Pure; must not touch the network.
    fn build_url(&self, record: &TrackedRecord) -> Result<Url, RecrawlError>;

    /// Parse fetched text into an extraction payload.
    fn extract(&self, text: &str, options: &ParseOptions) -> Result<Extraction, ExtractError>;

    /// Whether an extracted value for `field` may overwrite the stored one.
    ///
    /// The default keeps empty strings, nulls, zeros, and empty collections
    /// from clobbering data a previous run already filled in. Booleans
    /// always merge.
    fn mergeable(&self, field: &str, value: &Value) -> bool {
        default_mergeable(field, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_builders_set_shape_and_verdict() {
        let single = Extraction::fields(Map::new());
        assert_eq!(single.verdict, None);
        assert!(matches!(single.payload, Payload::Fields(_)));

        let fanout = Extraction::children(vec![]).with_verdict(Verdict::Unusable);
        assert_eq!(fanout.verdict, Some(Verdict::Unusable));
        assert!(matches!(fanout.payload, Payload::Children(_)));
    }

    #[test]
    fn extract_error_messages() {
        assert_eq!(
            ExtractError::page_gone("server error shell").to_string(),
            "page unusable upstream: server error shell"
        );
        assert_eq!(ExtractError::failed("no table found").to_string(), "no table found");
    }
}
