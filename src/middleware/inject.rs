//! Script placement and HTML sniffing.

use std::borrow::Cow;

/// Number of leading body bytes inspected when no `Content-Type` is set.
pub const SNIFF_LEN: usize = 512;

/// Byte offset at which the reload script should be inserted.
///
/// Before the first `</body>` if there is one, otherwise right after the `>`
/// closing the first `<body ...>` opener. `None` means neither was found and
/// the caller should append the script at the end of the stream.
pub fn injection_point(html: &[u8]) -> Option<usize> {
    if let Some(close) = find_tag(html, b"</body") {
        return Some(close);
    }

    let open = find_tag(html, b"<body")?;
    html[open..]
        .iter()
        .position(|&b| b == b'>')
        .map(|offset| open + offset + 1)
}

/// Insert `script` into `html` at [`injection_point`].
///
/// Returns the input unchanged (borrowed) when there is nowhere to put it.
pub fn inject_script<'a>(html: &'a [u8], script: &[u8]) -> Cow<'a, [u8]> {
    match injection_point(html) {
        Some(at) => {
            let mut out = Vec::with_capacity(html.len() + script.len());
            out.extend_from_slice(&html[..at]);
            out.extend_from_slice(script);
            out.extend_from_slice(&html[at..]);
            Cow::Owned(out)
        }
        None => Cow::Borrowed(html),
    }
}

/// First case-insensitive occurrence of `name` used as a tag, i.e. followed
/// by `>`, `/` or whitespace. `<bodyx` does not count as `<body`.
fn find_tag(haystack: &[u8], name: &[u8]) -> Option<usize> {
    haystack
        .windows(name.len())
        .enumerate()
        .filter(|(_, window)| window.eq_ignore_ascii_case(name))
        .map(|(i, _)| i)
        .find(|&i| match haystack.get(i + name.len()) {
            Some(&b) => b == b'>' || b == b'/' || b.is_ascii_whitespace(),
            // A tag cut off by the end of the buffer still counts
            None => true,
        })
}

/// HTML signatures recognised after leading whitespace.
const HTML_SIGNATURES: [&[u8]; 17] = [
    b"<!DOCTYPE HTML",
    b"<HTML",
    b"<HEAD",
    b"<SCRIPT",
    b"<IFRAME",
    b"<H1",
    b"<DIV",
    b"<FONT",
    b"<TABLE",
    b"<A",
    b"<STYLE",
    b"<TITLE",
    b"<B",
    b"<BODY",
    b"<BR",
    b"<P",
    b"<!--",
];

/// Sniff whether a body prefix looks like HTML.
///
/// Follows the WHATWG MIME sniffing rules for HTML: a known tag at the start
/// (after whitespace), matched case-insensitively and terminated by a space
/// or `>`. Only the first [`SNIFF_LEN`] bytes are considered.
pub fn sniff_html(body: &[u8]) -> bool {
    let body = &body[..body.len().min(SNIFF_LEN)];
    let start = body
        .iter()
        .position(|&b| !matches!(b, b'\t' | b'\n' | b'\x0c' | b'\r' | b' '))
        .unwrap_or(body.len());
    let data = &body[start..];

    HTML_SIGNATURES.iter().any(|signature| {
        data.len() > signature.len()
            && data[..signature.len()].eq_ignore_ascii_case(signature)
            && matches!(data[signature.len()], b' ' | b'>')
    })
}

/// Check if a `Content-Type` value denotes HTML.
pub fn is_html_content_type(value: &str) -> bool {
    value
        .trim_start()
        .get(..9)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("text/html"))
}
