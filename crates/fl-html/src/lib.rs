//! Tolerant HTML tokenization and tree building.
//!
//! The parser never fails: unterminated tags become text, stray end tags are
//! dropped and anything still open at end of input is closed implicitly.

use fl_dom::Document;
use fl_dom::Element;
use fl_dom::Node;
use fl_dom::is_raw_text_element;
use fl_dom::is_void_element;

/// Parses raw HTML into an owned [`Document`].
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlParser;

impl HtmlParser {
    pub fn parse(&self, input: &str) -> Document {
        build_tree(tokenize(input))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Token {
    Start {
        name: String,
        attrs: Vec<(String, String)>,
        self_closing: bool,
    },
    End {
        name: String,
    },
    Text(String),
    Comment(String),
    Declaration(String),
}

fn tokenize(source: &str) -> Vec<Token> {
    let mut out = Vec::new();
    let bytes = source.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'<' {
            let next = find_byte(bytes, i, b'<').unwrap_or(bytes.len());
            push_text(&mut out, slice(source, i, next));
            i = next;
            continue;
        }

        if starts_with(bytes, i, b"<!--") {
            let (body, next) = read_comment(source, i);
            out.push(Token::Comment(body.to_owned()));
            i = next;
            continue;
        }

        if starts_with(bytes, i, b"<!") {
            let end = find_byte(bytes, i + 2, b'>').unwrap_or(bytes.len());
            out.push(Token::Declaration(slice(source, i + 2, end).to_owned()));
            i = end.saturating_add(1).min(bytes.len());
            continue;
        }

        if starts_with(bytes, i, b"<?") {
            i = skip_processing_instruction(bytes, i);
            continue;
        }

        if starts_with(bytes, i, b"</") {
            if let Some((token, next)) = parse_end_tag(bytes, i) {
                out.push(token);
                i = next;
                continue;
            }
        } else if let Some((token, next)) = parse_start_tag(source, i) {
            let raw_text_tag = match &token {
                Token::Start {
                    name, self_closing, ..
                } if !*self_closing && is_raw_text_element(name) => Some(name.clone()),
                _ => None,
            };

            out.push(token);
            i = next;

            if let Some(tag_name) = raw_text_tag {
                let (raw_text, closing_end) = read_raw_text_until_end_tag(source, i, &tag_name);
                push_text(&mut out, raw_text);
                out.push(Token::End { name: tag_name });
                i = closing_end;
            }

            continue;
        }

        // A `<` that does not open a tag is literal text.
        let next = find_byte(bytes, i + 1, b'<').unwrap_or(bytes.len());
        push_text(&mut out, slice(source, i, next));
        i = next;
    }

    out
}

fn push_text(out: &mut Vec<Token>, text: &str) {
    if text.is_empty() {
        return;
    }

    if let Some(Token::Text(previous)) = out.last_mut() {
        previous.push_str(text);
        return;
    }

    out.push(Token::Text(text.to_owned()));
}

fn build_tree(tokens: Vec<Token>) -> Document {
    let mut stack = vec![Element::new("#document")];

    for token in tokens {
        match token {
            Token::Text(text) => append(&mut stack, Node::Text(text)),
            Token::Comment(body) => append(&mut stack, Node::Comment(body)),
            Token::Declaration(body) => append(&mut stack, Node::Declaration(body)),
            Token::Start {
                name,
                attrs,
                self_closing,
            } => {
                if stack.len() > 1
                    && stack
                        .last()
                        .is_some_and(|open| implicitly_closes(&name, &open.name))
                {
                    close_top(&mut stack);
                }

                let element = Element {
                    name,
                    attrs,
                    children: Vec::new(),
                };

                if self_closing || element.is_void() {
                    append(&mut stack, Node::Element(element));
                } else {
                    stack.push(element);
                }
            }
            Token::End { name } => {
                let Some(open_at) = stack.iter().rposition(|open| open.name == name) else {
                    continue;
                };
                if open_at == 0 {
                    continue;
                }

                while stack.len() > open_at {
                    close_top(&mut stack);
                }
            }
        }
    }

    while stack.len() > 1 {
        close_top(&mut stack);
    }

    let root = stack.pop().unwrap_or_else(|| Element::new("#document"));
    Document::new(root.children)
}

fn append(stack: &mut [Element], node: Node) {
    if let Some(current) = stack.last_mut() {
        current.children.push(node);
    }
}

fn close_top(stack: &mut Vec<Element>) {
    let Some(node) = stack.pop() else {
        return;
    };
    append(stack, Node::Element(node));
}

/// Start tags that end an open sibling of the same family, e.g. `<li>` after `<li>`,
/// and anything but head content ending an unterminated `<head>`.
fn implicitly_closes(incoming: &str, open: &str) -> bool {
    if open == "head" {
        return !is_head_content(incoming);
    }

    match incoming {
        "p" | "li" | "option" | "tr" => incoming == open,
        "dt" | "dd" => matches!(open, "dt" | "dd"),
        "td" | "th" => matches!(open, "td" | "th"),
        _ => false,
    }
}

fn is_head_content(name: &str) -> bool {
    matches!(
        name,
        "title" | "meta" | "link" | "style" | "script" | "base" | "noscript"
    )
}

fn read_comment(source: &str, start: usize) -> (&str, usize) {
    let bytes = source.as_bytes();
    let body_start = start + 4;
    match find_subslice(bytes, body_start, b"-->") {
        Some(end) => (slice(source, body_start, end), end + 3),
        None => (slice(source, body_start, bytes.len()), bytes.len()),
    }
}

fn skip_processing_instruction(bytes: &[u8], start: usize) -> usize {
    find_byte(bytes, start + 2, b'>')
        .map(|end| end + 1)
        .unwrap_or(bytes.len())
}

fn read_raw_text_until_end_tag<'a>(
    source: &'a str,
    start: usize,
    tag_name: &str,
) -> (&'a str, usize) {
    let bytes = source.as_bytes();
    let tag_bytes = tag_name.as_bytes();
    let mut i = start;

    while i < bytes.len() {
        if bytes[i] == b'<'
            && bytes.get(i + 1).copied() == Some(b'/')
            && starts_with_ignore_ascii_case(bytes, i + 2, tag_bytes)
            && tag_name_boundary(bytes, i + 2 + tag_bytes.len())
        {
            let close = find_byte(bytes, i + 2 + tag_bytes.len(), b'>')
                .map(|end| end + 1)
                .unwrap_or(bytes.len());
            return (slice(source, start, i), close);
        }

        i += 1;
    }

    (slice(source, start, bytes.len()), bytes.len())
}

fn parse_end_tag(bytes: &[u8], start: usize) -> Option<(Token, usize)> {
    let mut i = start + 2;
    skip_spaces(bytes, &mut i);
    let begin = i;
    while i < bytes.len() && is_name_char(bytes[i]) {
        i += 1;
    }
    if i == begin {
        return None;
    }

    let name = String::from_utf8_lossy(&bytes[begin..i]).to_ascii_lowercase();
    let close = find_byte(bytes, i, b'>')?;

    Some((Token::End { name }, close + 1))
}

fn parse_start_tag(source: &str, start: usize) -> Option<(Token, usize)> {
    let bytes = source.as_bytes();
    let mut i = start + 1;
    let begin = i;
    while i < bytes.len() && is_name_char(bytes[i]) {
        i += 1;
    }
    if i == begin || !bytes[begin].is_ascii_alphabetic() {
        return None;
    }

    let name = String::from_utf8_lossy(&bytes[begin..i]).to_ascii_lowercase();
    let mut attrs: Vec<(String, String)> = Vec::new();
    let mut self_closing = false;

    loop {
        skip_spaces(bytes, &mut i);
        if i >= bytes.len() {
            return None;
        }

        if bytes[i] == b'>' {
            i += 1;
            break;
        }

        if bytes[i] == b'/' {
            i += 1;
            skip_spaces(bytes, &mut i);
            if i < bytes.len() && bytes[i] == b'>' {
                self_closing = true;
                i += 1;
                break;
            }
            continue;
        }

        let attr_start = i;
        while i < bytes.len() && is_attr_name_char(bytes[i]) {
            i += 1;
        }
        if i == attr_start {
            // Unexpected byte inside the tag; drop it and keep scanning.
            i += 1;
            continue;
        }

        let attr_name = String::from_utf8_lossy(&bytes[attr_start..i]).to_ascii_lowercase();
        skip_spaces(bytes, &mut i);

        let mut value = "";
        if i < bytes.len() && bytes[i] == b'=' {
            i += 1;
            skip_spaces(bytes, &mut i);
            if i < bytes.len() && (bytes[i] == b'"' || bytes[i] == b'\'') {
                let quote = bytes[i];
                i += 1;
                let value_start = i;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                value = slice(source, value_start, i);
                if i < bytes.len() {
                    i += 1;
                }
            } else {
                let value_start = i;
                while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
                    i += 1;
                }
                value = slice(source, value_start, i);
            }
        }

        if !attrs.iter().any(|(existing, _)| *existing == attr_name) {
            attrs.push((attr_name, decode_entities(value)));
        }
    }

    Some((
        Token::Start {
            name,
            attrs,
            self_closing,
        },
        i,
    ))
}

/// Decodes named and numeric character references; unknown ones stay literal.
pub fn decode_entities(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut cursor = 0_usize;

    while let Some(rel_amp) = input[cursor..].find('&') {
        let amp = cursor + rel_amp;
        out.push_str(&input[cursor..amp]);

        let rest = &input[(amp + 1)..];
        let Some(rel_semi) = rest.find(';') else {
            out.push('&');
            cursor = amp + 1;
            continue;
        };

        let semi = amp + 1 + rel_semi;
        let entity = &input[(amp + 1)..semi];
        match decode_entity(entity) {
            Some(decoded) => {
                out.push(decoded);
                cursor = semi + 1;
            }
            None => {
                out.push('&');
                cursor = amp + 1;
            }
        }
    }

    out.push_str(&input[cursor..]);
    out
}

fn decode_entity(entity: &str) -> Option<char> {
    let named = match entity {
        "nbsp" => '\u{a0}',
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "copy" => '\u{a9}',
        "reg" => '\u{ae}',
        "trade" => '\u{2122}',
        "hellip" => '\u{2026}',
        "mdash" => '\u{2014}',
        "ndash" => '\u{2013}',
        "laquo" => '\u{ab}',
        "raquo" => '\u{bb}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201c}',
        "rdquo" => '\u{201d}',
        "middot" => '\u{b7}',
        "bull" => '\u{2022}',
        _ => {
            let value = if let Some(hex) = entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok()?
            } else if let Some(dec) = entity.strip_prefix('#') {
                dec.parse::<u32>().ok()?
            } else {
                return None;
            };
            return char::from_u32(value);
        }
    };

    Some(named)
}

fn slice(source: &str, start: usize, end: usize) -> &str {
    source.get(start..end).unwrap_or("")
}

fn tag_name_boundary(bytes: &[u8], i: usize) -> bool {
    match bytes.get(i).copied() {
        None => true,
        Some(byte) => byte.is_ascii_whitespace() || byte == b'>' || byte == b'/',
    }
}

fn skip_spaces(bytes: &[u8], i: &mut usize) {
    while *i < bytes.len() && bytes[*i].is_ascii_whitespace() {
        *i += 1;
    }
}

fn is_name_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b':')
}

fn is_attr_name_char(byte: u8) -> bool {
    !byte.is_ascii_whitespace() && !matches!(byte, b'>' | b'/' | b'=' | b'"' | b'\'' | b'<')
}

fn starts_with(bytes: &[u8], i: usize, pattern: &[u8]) -> bool {
    let end = i.saturating_add(pattern.len());
    end <= bytes.len() && bytes[i..end] == *pattern
}

fn starts_with_ignore_ascii_case(bytes: &[u8], i: usize, pattern: &[u8]) -> bool {
    let end = i.saturating_add(pattern.len());
    end <= bytes.len()
        && bytes[i..end]
            .iter()
            .zip(pattern.iter())
            .all(|(left, right)| left.eq_ignore_ascii_case(right))
}

fn find_subslice(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }

    bytes[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| from + offset)
}

fn find_byte(bytes: &[u8], from: usize, byte: u8) -> Option<usize> {
    bytes
        .get(from..)?
        .iter()
        .position(|candidate| *candidate == byte)
        .map(|offset| from + offset)
}
