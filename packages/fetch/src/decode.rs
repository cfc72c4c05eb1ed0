//! Charset inference for fetched bytes.

use chardetng::EncodingDetector;
use encoding_rs::Encoding;
use url::Url;

/// Decode response bytes to text: BOM first, then the Content-Type charset,
/// then statistical detection with a TLD hint from the URL's domain.
/// Decoding is lossy and never fails; undecodable sequences become
/// replacement characters.
pub fn decode_body(bytes: &[u8], content_type: Option<&str>, url: &Url) -> String {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return decode_with(bytes, encoding);
    }

    if let Some(label) = content_type.and_then(extract_charset) {
        if let Some(encoding) = Encoding::for_label(label.as_bytes()) {
            return decode_with(bytes, encoding);
        }
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let tld = url.domain().and_then(|d| d.rsplit('.').next());
    let encoding = detector.guess(tld.map(str::as_bytes), true);
    decode_with(bytes, encoding)
}

/// Pull the charset parameter out of a Content-Type header value.
fn extract_charset(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .filter_map(|part| {
            let part = part.trim();
            part.strip_prefix("charset=")
                .or_else(|| part.strip_prefix("Charset="))
                .or_else(|| part.strip_prefix("CHARSET="))
                .map(|v| v.trim_matches([' ', '"', '\''].as_ref()))
        })
        .next()
        .map(str::to_owned)
}

fn decode_with(bytes: &[u8], encoding: &'static Encoding) -> String {
    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("https://example.com/page").expect("test url")
    }

    #[test]
    fn plain_utf8_passes_through() {
        let decoded = decode_body("héllo wörld".as_bytes(), None, &url());
        assert_eq!(decoded, "héllo wörld");
    }

    #[test]
    fn content_type_charset_wins_without_bom() {
        // 0xE9 is "é" in ISO-8859-1 and invalid on its own in UTF-8.
        let bytes = [0x63, 0x61, 0x66, 0xE9];
        let decoded = decode_body(&bytes, Some("text/html; charset=ISO-8859-1"), &url());
        assert_eq!(decoded, "café");
    }

    #[test]
    fn bom_beats_content_type() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice("é".as_bytes());
        let decoded = decode_body(&bytes, Some("text/html; charset=ISO-8859-1"), &url());
        assert_eq!(decoded, "é");
    }

    #[test]
    fn lossy_decoding_never_fails() {
        let bytes = [0xFF, b'a'];
        let decoded = decode_body(&bytes, Some("text/html; charset=utf-8"), &url());
        assert_eq!(decoded, "\u{FFFD}a");
    }

    #[test]
    fn charset_extraction_handles_quotes_and_case() {
        assert_eq!(
            extract_charset("text/html; charset=\"windows-1252\"").as_deref(),
            Some("windows-1252")
        );
        assert_eq!(
            extract_charset("text/html; Charset='utf-8'").as_deref(),
            Some("utf-8")
        );
        assert_eq!(extract_charset("text/html"), None);
    }

    #[test]
    fn detection_fallback_handles_ascii() {
        let decoded = decode_body(b"just ascii text", None, &url());
        assert_eq!(decoded, "just ascii text");
    }
}
