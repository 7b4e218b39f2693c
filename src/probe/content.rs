//! Content matching against the response body.

use encoding_rs::Encoding;
use regex::Regex;

/// Pull the charset out of a Content-Type header value.
///
/// `"text/html; charset=UTF-8"` becomes `"UTF-8"`. The key match is
/// case-insensitive and whitespace around both key and value is ignored.
pub fn extract_charset(content_type: &str) -> Option<&str> {
    for component in content_type.split(';') {
        let mut parts = component.splitn(2, '=');
        let key = parts.next().unwrap_or("").trim();
        if key.eq_ignore_ascii_case("charset") {
            return parts.next().map(str::trim);
        }
    }
    None
}

/// Whether `pattern` matches anywhere in the body, decoded with the charset
/// advertised by the Content-Type header (UTF-8 when absent).
///
/// An unknown charset label or bytes that are malformed for the charset yield
/// false; decoding problems never escape this function.
pub fn match_content(pattern: &Regex, body: &[u8], content_type: Option<&str>) -> bool {
    let charset = content_type.and_then(extract_charset).unwrap_or("UTF-8");
    let Some(encoding) = Encoding::for_label(charset.as_bytes()) else {
        return false;
    };
    let (text, had_errors) = encoding.decode_without_bom_handling(body);
    if had_errors {
        return false;
    }
    pattern.is_match(&text)
}
