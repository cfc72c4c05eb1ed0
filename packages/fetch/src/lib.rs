//! Fetch backends and transport classification for recrawl.
//!
//! Content is retrieved cache-first, then live through exactly one of two
//! backends: a plain HTTP client ([`HttpFetcher`]) or a headless-Chrome
//! session ([`BrowserSession`]). [`FetchStrategy`] wires the cache lookup
//! and the transport classifier in front of whichever backend the pipeline
//! runs with, producing a [`FetchOutcome`] per item.

pub mod browser;
pub mod decode;
pub mod http;
pub mod strategy;

pub use browser::BrowserSession;
pub use decode::decode_body;
pub use http::{HttpFetcher, HttpResponse};
pub use strategy::{BLOCKED_PAUSE, FetchOutcome, FetchStrategy};
