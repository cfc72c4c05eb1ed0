//! The recrawl per-item pipeline and its batch driver.
//!
//! One item flows fetch → transport classification → extraction →
//! reconciliation, always ending in exactly one persistent write. The
//! [`Harvester`] trait carries the domain-specific parts (URL derivation,
//! parsing, merge rules); the [`Reconciler`] picks between merging fields
//! into the record and fanning out child records; [`Pipeline`] drives whole
//! batches with either the HTTP worker pool or an exclusive browser
//! session.

pub mod builtin;
pub mod driver;
pub mod envelope;
pub mod harvester;
pub mod reconcile;

pub use builtin::{LinkHarvester, PageMetaHarvester};
pub use driver::{BatchReport, ItemReport, Pipeline};
pub use envelope::{HarvestInput, HarvestOutput};
pub use harvester::{ExtractError, Extraction, Harvester, Payload, Verdict};
pub use reconcile::Reconciler;
