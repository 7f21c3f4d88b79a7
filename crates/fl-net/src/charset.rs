//! Text decoding for fetched markup.

use encoding_rs::Encoding;
use encoding_rs::UTF_8;

const META_SNIFF_BYTES: usize = 8 * 1024;

/// Decodes a response body to text.
///
/// Precedence: byte-order mark, a `charset=` declared in the first 8 KiB of
/// markup, the `Content-Type` charset, then UTF-8. Malformed sequences are
/// replaced rather than rejected.
pub fn decode_text_response(content_type: Option<&str>, body: &[u8]) -> String {
    let encoding = Encoding::for_bom(body)
        .map(|(encoding, _)| encoding)
        .or_else(|| sniff_meta_charset(body))
        .or_else(|| content_type.and_then(charset_from_content_type))
        .unwrap_or(UTF_8);

    let (text, _, had_errors) = encoding.decode(body);
    if had_errors {
        tracing::debug!(
            encoding = encoding.name(),
            "replaced malformed byte sequences while decoding"
        );
    }
    text.into_owned()
}

pub fn charset_from_content_type(content_type: &str) -> Option<&'static Encoding> {
    content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("charset"))
        .and_then(|(_, value)| {
            Encoding::for_label(value.trim().trim_matches(|c| c == '"' || c == '\'').as_bytes())
        })
}

fn sniff_meta_charset(body: &[u8]) -> Option<&'static Encoding> {
    let window = &body[..body.len().min(META_SNIFF_BYTES)];
    let lowered = window.to_ascii_lowercase();
    let mut from = 0;

    while let Some(offset) = find(&lowered[from..], b"<meta") {
        let tag_start = from + offset;
        let tag_end = lowered[tag_start..]
            .iter()
            .position(|byte| *byte == b'>')
            .map(|end| tag_start + end)
            .unwrap_or(lowered.len());
        let tag = &lowered[tag_start..tag_end];

        if let Some(position) = find(tag, b"charset=") {
            let value = &tag[position + b"charset=".len()..];
            let value = value
                .iter()
                .skip_while(|byte| matches!(byte, b'"' | b'\'' | b' '))
                .take_while(|byte| byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b':' | b'.'))
                .copied()
                .collect::<Vec<_>>();
            if let Some(encoding) = Encoding::for_label(&value) {
                // A page served as UTF-16 cannot declare itself in ASCII markup.
                return Some(encoding.output_encoding());
            }
        }

        from = tag_end;
    }

    None
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::decode_text_response;

    #[test]
    fn meta_charset_wins_over_header() {
        let body = b"<html><head><meta http-equiv=\"Content-Type\" content=\"text/html; charset=windows-1252\"></head><body>caf\xe9</body></html>";
        let text = decode_text_response(Some("text/html; charset=utf-8"), body);
        assert!(text.contains("caf\u{e9}"));
    }

    #[test]
    fn header_charset_applies_without_meta() {
        let text = decode_text_response(Some("text/html; charset=\"ISO-8859-1\""), b"<p>\xe9t\xe9</p>");
        assert_eq!(text, "<p>\u{e9}t\u{e9}</p>");
    }

    #[test]
    fn defaults_to_utf8_with_replacement() {
        let text = decode_text_response(None, "<p>தமிழ்</p>".as_bytes());
        assert_eq!(text, "<p>தமிழ்</p>");

        let broken = decode_text_response(Some("text/html"), b"<p>\xff</p>");
        assert_eq!(broken, "<p>\u{fffd}</p>");
    }

    #[test]
    fn byte_order_mark_is_honoured_and_stripped() {
        let text = decode_text_response(Some("text/html; charset=windows-1252"), b"\xef\xbb\xbf<p>x</p>");
        assert_eq!(text, "<p>x</p>");
    }
}
