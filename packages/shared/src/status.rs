//! The ordered status taxonomy for tracked records.
//!
//! Every record carries a numeric status code that encodes how far it got on
//! its last pass through the pipeline. Codes are totally ordered and gapped
//! so that new outcomes can slot in between existing ones without renumbering
//! persisted data.

use serde::{Deserialize, Serialize};

/// Outcome of the most recent harvest attempt for a record.
///
/// The numeric codes are persisted in the record store; comparisons against
/// the configured dedup threshold use the raw codes. `UpstreamGone` sits
/// above `Done`: a permanently unfetchable record is dedup-eligible even
/// though it never produced fresh data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i64)]
pub enum Status {
    /// Never processed, or explicitly reset.
    NotStarted = 0,
    /// Network or browser failure; retry on the next staleness pass.
    TransportError = 10,
    /// The server throttled or blocked us (HTTP 403); retry later.
    RateLimited = 20,
    /// Fetched fine but the payload could not be extracted.
    ExtractionError = 30,
    /// Processed successfully.
    Done = 50,
    /// The upstream page is gone for good (HTTP 404 or an in-content signal).
    UpstreamGone = 60,
}

impl Status {
    /// All variants in ascending code order.
    pub const ALL: [Status; 6] = [
        Status::NotStarted,
        Status::TransportError,
        Status::RateLimited,
        Status::ExtractionError,
        Status::Done,
        Status::UpstreamGone,
    ];

    /// The persisted numeric code.
    pub const fn code(self) -> i64 {
        self as i64
    }

    /// Look up a variant by its persisted code.
    pub fn from_code(code: i64) -> Option<Status> {
        match code {
            0 => Some(Status::NotStarted),
            10 => Some(Status::TransportError),
            20 => Some(Status::RateLimited),
            30 => Some(Status::ExtractionError),
            50 => Some(Status::Done),
            60 => Some(Status::UpstreamGone),
            _ => None,
        }
    }

    /// Stable snake_case name, matching the serde representation.
    pub const fn name(self) -> &'static str {
        match self {
            Status::NotStarted => "not_started",
            Status::TransportError => "transport_error",
            Status::RateLimited => "rate_limited",
            Status::ExtractionError => "extraction_error",
            Status::Done => "done",
            Status::UpstreamGone => "upstream_gone",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
