//! Response-body decoding and title extraction.
//!
//! Bodies arrive already de-compressed (the HTTP client negotiates and
//! decodes gzip/deflate/brotli), but charset is still a free-for-all:
//! detection runs header hint, BOM, `<meta>` prescan, then a statistical
//! guess, and the result is transcoded to UTF-8 before the title regex runs.

use std::sync::LazyLock;

use encoding_rs::Encoding;
use regex::Regex;
use scraper::Html;

/// How many leading bytes are prescanned for a `<meta>` charset declaration.
const META_PRESCAN_BYTES: usize = 1024;

// Using this naive regex has the nice side effect of preventing us from
// ingesting malformed & potentially malicious titles, so this bad title
//
//     <title>Hi XSS vuln <script>alert('HACKED');</script>
//
// will be parsed as
//
//     'Hi XSS vuln'
//
// Hooray for dumb things that accidentally protect you!
static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<title[^>]*?>([^<]+)").expect("title pattern failed to compile - this is a bug")
});

static META_CHARSET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?([a-zA-Z0-9._-]+)"#)
        .expect("meta charset pattern failed to compile - this is a bug")
});

/// Whether a response body is worth scanning for a title. An absent or
/// empty Content-Type is given the benefit of the doubt.
pub fn should_parse_title(content_type: Option<&str>) -> bool {
    match content_type {
        None => true,
        Some(ct) => ct.is_empty() || ct.contains("html"),
    }
}

/// Decodes raw body bytes to UTF-8 text.
///
/// Charset sources, in priority order: byte-order mark, the Content-Type
/// `charset` parameter, an HTML `<meta>` prescan of the first kilobyte,
/// then a statistical detector. Undecodable sequences become replacement
/// characters rather than errors.
pub fn decode_body(raw: &[u8], content_type: Option<&str>) -> String {
    let encoding = detect_encoding(raw, content_type);
    let (decoded, _, _) = encoding.decode(raw);
    decoded.into_owned()
}

fn detect_encoding(raw: &[u8], content_type: Option<&str>) -> &'static Encoding {
    if let Some((encoding, _)) = Encoding::for_bom(raw) {
        return encoding;
    }

    if let Some(label) = content_type.and_then(charset_from_content_type) {
        if let Some(encoding) = Encoding::for_label(label.as_bytes()) {
            return encoding;
        }
    }

    let prefix = &raw[..raw.len().min(META_PRESCAN_BYTES)];
    if let Some(label) = charset_from_meta(prefix) {
        if let Some(encoding) = Encoding::for_label(label.as_bytes()) {
            return encoding;
        }
    }

    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(raw, true);
    detector.guess(None, true)
}

fn charset_from_content_type(content_type: &str) -> Option<String> {
    for part in content_type.split(';') {
        let trimmed = part.trim();
        if let Some(charset) = trimmed
            .to_ascii_lowercase()
            .strip_prefix("charset=")
            .map(str::to_string)
        {
            return Some(charset.trim_matches(['"', '\'']).to_string());
        }
    }
    None
}

fn charset_from_meta(prefix: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(prefix);
    META_CHARSET_RE
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Extracts the document title: the text between `<title...>` and the next
/// `<`, trimmed and with HTML entities decoded. Returns an empty string
/// when no title is found.
pub fn find_title(body: &str) -> String {
    let Some(captured) = TITLE_RE.captures(body).and_then(|caps| caps.get(1)) else {
        return String::new();
    };
    unescape_entities(captured.as_str().trim())
}

/// Decodes HTML entities in text that contains no markup.
fn unescape_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    Html::parse_fragment(text).root_element().text().collect()
}
