//! Built-in harvesters.
//!
//! Two ready-made [`Harvester`] implementations back the CLI: one merges
//! page metadata into the record itself, the other fans a page out into one
//! child record per outgoing link. Both derive the fetch URL from the
//! record's `url` field.

use std::collections::HashSet;

use recrawl_shared::{ParseOptions, RecrawlError, TrackedRecord};
use scraper::{Html, Selector};
use serde_json::{Map, json};
use sha2::{Digest, Sha256};
use url::Url;

use crate::harvester::{ExtractError, Extraction, Harvester, Verdict};

/// Extracts page metadata (title, meta description, first heading,
/// canonical URL) into the record's own fields.
pub struct PageMetaHarvester;

impl Harvester for PageMetaHarvester {
    fn build_url(&self, record: &TrackedRecord) -> Result<Url, RecrawlError> {
        record_url(record)
    }

    fn extract(&self, text: &str, _options: &ParseOptions) -> Result<Extraction, ExtractError> {
        if text.trim().is_empty() {
            return Ok(Extraction::fields(Map::new()).with_verdict(Verdict::Unusable));
        }
        let doc = Html::parse_document(text);

        let mut fields = Map::new();
        if let Some(title) = select_text(&doc, "title") {
            fields.insert("title".to_string(), json!(title));
        }
        if let Some(description) = select_attr(&doc, r#"meta[name="description"]"#, "content") {
            fields.insert("description".to_string(), json!(description));
        }
        if let Some(heading) = select_text(&doc, "h1") {
            fields.insert("heading".to_string(), json!(heading));
        }
        if let Some(canonical) = select_attr(&doc, r#"link[rel="canonical"]"#, "href") {
            fields.insert("canonical".to_string(), json!(canonical));
        }
        Ok(Extraction::fields(fields))
    }
}

/// Fans a page out into one child record per outgoing absolute link.
///
/// Child ids are content hashes of the normalized target, so re-harvesting
/// the same page (or finding the same link on another page) lands on the
/// same child row.
pub struct LinkHarvester;

impl Harvester for LinkHarvester {
    fn build_url(&self, record: &TrackedRecord) -> Result<Url, RecrawlError> {
        record_url(record)
    }

    fn extract(&self, text: &str, _options: &ParseOptions) -> Result<Extraction, ExtractError> {
        if text.trim().is_empty() {
            return Ok(Extraction::children(Vec::new()).with_verdict(Verdict::Unusable));
        }
        let doc = Html::parse_document(text);
        let link_sel = Selector::parse("a[href]").unwrap();

        let mut seen = HashSet::new();
        let mut children = Vec::new();
        for el in doc.select(&link_sel) {
            let Some(href) = el.value().attr("href") else {
                continue;
            };
            // Only absolute web links become children.
            let Ok(target) = Url::parse(href) else {
                continue;
            };
            if target.scheme() != "http" && target.scheme() != "https" {
                continue;
            }

            let normalized = normalize_url(&target);
            if !seen.insert(normalized.clone()) {
                continue;
            }

            let anchor = el.text().collect::<String>().trim().to_string();
            let mut child =
                TrackedRecord::new(link_id(&normalized)).with_field("url", json!(normalized));
            if !anchor.is_empty() {
                child = child.with_field("anchor", json!(anchor));
            }
            children.push(child);
        }
        Ok(Extraction::children(children))
    }
}

/// The URL derivation both built-ins share: the record's `url` field.
fn record_url(record: &TrackedRecord) -> Result<Url, RecrawlError> {
    let url = record.str_field("url").ok_or_else(|| {
        RecrawlError::validation(format!("record {} has no url field", record.id))
    })?;
    Url::parse(url)
        .map_err(|e| RecrawlError::validation(format!("record {}: invalid url: {e}", record.id)))
}

fn select_text(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).unwrap();
    doc.select(&sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn select_attr(doc: &Html, selector: &str, attr: &str) -> Option<String> {
    let sel = Selector::parse(selector).unwrap();
    doc.select(&sel)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Normalize a URL for child identity (strip fragment, drop trailing slash).
fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    let mut s = normalized.to_string();
    // Remove trailing slash for consistency (except root path)
    if s.ends_with('/') && s.matches('/').count() > 3 {
        s.pop();
    }
    s
}

/// Stable child id: hash of the normalized link target.
fn link_id(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvester::Payload;
    use serde_json::Value;

    fn fields_of(extraction: &Extraction) -> &Map<String, Value> {
        match &extraction.payload {
            Payload::Fields(fields) => fields,
            Payload::Children(_) => panic!("expected a field payload"),
        }
    }

    fn children_of(extraction: &Extraction) -> &[TrackedRecord] {
        match &extraction.payload {
            Payload::Children(children) => children,
            Payload::Fields(_) => panic!("expected a child payload"),
        }
    }

    #[test]
    fn page_meta_extracts_common_fields() {
        let html = r#"<html><head>
            <title> My Page </title>
            <meta name="description" content="A page about things.">
            <link rel="canonical" href="https://example.com/page">
            </head><body><h1>Things</h1></body></html>"#;

        let extraction = PageMetaHarvester
            .extract(html, &ParseOptions::default())
            .unwrap();
        assert_eq!(extraction.verdict, None);

        let fields = fields_of(&extraction);
        assert_eq!(fields.get("title"), Some(&json!("My Page")));
        assert_eq!(fields.get("description"), Some(&json!("A page about things.")));
        assert_eq!(fields.get("heading"), Some(&json!("Things")));
        assert_eq!(fields.get("canonical"), Some(&json!("https://example.com/page")));
    }

    #[test]
    fn page_meta_omits_missing_pieces() {
        let html = "<html><head><title>Bare</title></head><body></body></html>";
        let extraction = PageMetaHarvester
            .extract(html, &ParseOptions::default())
            .unwrap();

        let fields = fields_of(&extraction);
        assert_eq!(fields.get("title"), Some(&json!("Bare")));
        assert!(!fields.contains_key("description"));
        assert!(!fields.contains_key("heading"));
    }

    #[test]
    fn page_meta_flags_empty_content_as_unusable() {
        let extraction = PageMetaHarvester
            .extract("   \n", &ParseOptions::default())
            .unwrap();
        assert_eq!(extraction.verdict, Some(Verdict::Unusable));
    }

    #[test]
    fn build_url_requires_a_url_field() {
        let record = TrackedRecord::new("r1");
        let err = PageMetaHarvester.build_url(&record).unwrap_err();
        assert!(err.to_string().contains("no url field"));

        let record = TrackedRecord::new("r2").with_field("url", json!("not a url"));
        assert!(PageMetaHarvester.build_url(&record).is_err());
    }

    #[test]
    fn link_harvester_collects_absolute_links_once() {
        let html = r#"<html><body>
            <a href="https://example.com/a">First</a>
            <a href="https://example.com/a#section">First again</a>
            <a href="/relative">Relative</a>
            <a href="mailto:x@example.com">Mail</a>
            <a href="https://example.com/b/">Second</a>
            </body></html>"#;

        let extraction = LinkHarvester
            .extract(html, &ParseOptions::default())
            .unwrap();
        let children = children_of(&extraction);
        assert_eq!(children.len(), 2);

        assert_eq!(
            children[0].str_field("url"),
            Some("https://example.com/a")
        );
        assert_eq!(children[0].str_field("anchor"), Some("First"));
        // Trailing slash is normalized away.
        assert_eq!(
            children[1].str_field("url"),
            Some("https://example.com/b")
        );
    }

    #[test]
    fn link_ids_are_stable_across_pages() {
        let page_one = r#"<a href="https://example.com/ch/1">One</a>"#;
        let page_two = r#"<a href="https://example.com/ch/1#top">Top</a>"#;

        let first = LinkHarvester
            .extract(page_one, &ParseOptions::default())
            .unwrap();
        let second = LinkHarvester
            .extract(page_two, &ParseOptions::default())
            .unwrap();

        assert_eq!(children_of(&first)[0].id, children_of(&second)[0].id);
    }

    #[test]
    fn link_harvester_flags_empty_content_as_unusable() {
        let extraction = LinkHarvester.extract("", &ParseOptions::default()).unwrap();
        assert_eq!(extraction.verdict, Some(Verdict::Unusable));
        assert!(children_of(&extraction).is_empty());
    }
}
