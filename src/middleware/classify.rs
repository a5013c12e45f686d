//! Decides whether a request is for a navigable HTML document.
//!
//! Only document responses are intercepted. Getting this wrong in the
//! permissive direction costs one buffered response; getting it wrong the
//! other way silently drops the reload script, so ties go to "document".

use axum::http::HeaderMap;
use axum::http::header::{ACCEPT, CONNECTION, UPGRADE};

const SEC_FETCH_DEST: &str = "sec-fetch-dest";

const DOCUMENT_TYPES: [&str; 3] = ["text/html", "application/xhtml+xml", "application/xml"];

/// Returns `true` if the response to a request with these headers is
/// expected to be a top-level HTML page.
///
/// First match wins:
/// 1. `Sec-Fetch-Dest` is trusted as-is (`document` or not).
/// 2. Upgrade requests are never documents.
/// 3. `Accept: text/event-stream` alone is never a document.
/// 4. An HTML or XML media type anywhere in `Accept`, or `*/*` as its first
///    entry, is a document. Anything else is not.
/// 5. No `Accept` at all is a document.
pub fn expects_document(headers: &HeaderMap) -> bool {
    if let Some(dest) = headers.get(SEC_FETCH_DEST) {
        return dest.as_bytes() == b"document";
    }

    if is_upgrade(headers) {
        return false;
    }

    let Some(accept) = headers.get(ACCEPT) else {
        return true;
    };
    let accept = String::from_utf8_lossy(accept.as_bytes());
    let media_types: Vec<String> = accept
        .split(',')
        .map(|item| {
            item.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
        .filter(|media| !media.is_empty())
        .collect();

    if media_types.len() == 1 && media_types[0] == "text/event-stream" {
        return false;
    }

    media_types.iter().enumerate().any(|(i, media)| {
        DOCUMENT_TYPES.contains(&media.as_str()) || (i == 0 && media == "*/*")
    })
}

/// Returns `true` if `Accept` asks for server-sent events anywhere.
pub fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers.get_all(ACCEPT).iter().any(|value| {
        String::from_utf8_lossy(value.as_bytes())
            .to_ascii_lowercase()
            .contains("text/event-stream")
    })
}

fn is_upgrade(headers: &HeaderMap) -> bool {
    if headers.contains_key(UPGRADE) {
        return true;
    }
    headers.get_all(CONNECTION).iter().any(|value| {
        value
            .as_bytes()
            .split(|&b| b == b',')
            .any(|token| token.trim_ascii().eq_ignore_ascii_case(b"upgrade"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_browser_navigation() {
        let map = headers(&[(
            "accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        )]);
        assert!(expects_document(&map));
    }

    #[test]
    fn test_html_with_wildcard() {
        assert!(expects_document(&headers(&[("accept", "text/html,*/*;q=0.8")])));
    }

    #[test]
    fn test_stylesheet_is_not_a_document() {
        assert!(!expects_document(&headers(&[("accept", "text/css")])));
        assert!(!expects_document(&headers(&[("accept", "text/css,*/*;q=0.1")])));
    }

    #[test]
    fn test_fetch_dest_is_trusted() {
        let map = headers(&[("sec-fetch-dest", "image"), ("accept", "text/html")]);
        assert!(!expects_document(&map));

        let map = headers(&[("sec-fetch-dest", "document"), ("accept", "image/png")]);
        assert!(expects_document(&map));

        // Compared literally
        assert!(!expects_document(&headers(&[("sec-fetch-dest", "Document")])));
    }

    #[test]
    fn test_upgrade_requests() {
        let map = headers(&[("upgrade", "websocket"), ("connection", "Upgrade")]);
        assert!(!expects_document(&map));

        let map = headers(&[("connection", "keep-alive, Upgrade"), ("accept", "text/html")]);
        assert!(!expects_document(&map));
    }

    #[test]
    fn test_event_stream() {
        assert!(!expects_document(&headers(&[("accept", "text/event-stream")])));
        assert!(!expects_document(&headers(&[("accept", " Text/Event-Stream ")])));
    }

    #[test]
    fn test_accepts_event_stream() {
        assert!(accepts_event_stream(&headers(&[("accept", "text/event-stream")])));
        assert!(accepts_event_stream(&headers(&[(
            "accept",
            "application/json, Text/Event-Stream"
        )])));
        assert!(!accepts_event_stream(&headers(&[("accept", "text/html")])));
        assert!(!accepts_event_stream(&HeaderMap::new()));
    }

    #[test]
    fn test_wildcard_only_counts_first() {
        assert!(expects_document(&headers(&[("accept", "*/*")])));
        assert!(!expects_document(&headers(&[("accept", "application/json, */*")])));
    }

    #[test]
    fn test_missing_accept() {
        assert!(expects_document(&HeaderMap::new()));
    }

    #[test]
    fn test_xml_counts_as_document() {
        assert!(expects_document(&headers(&[("accept", "image/webp, application/xml")])));
    }
}
