//! SVG detection for text payloads
//!
//! Byte signatures cannot identify SVG, so the first chunk is decoded as text,
//! cleaned of comments and DTD declarations, and tested for an `<svg` root.
//!
//! Every pattern here runs on `regex-lite`, which never backtracks, and every
//! stripping pattern starts with a literal `<`. Classification time therefore
//! stays linear in the chunk size, including on long whitespace runs after a
//! DOCTYPE-like prefix.

use lazy_static::lazy_static;
use regex_lite::Regex;

lazy_static! {
    static ref COMMENT: Regex = Regex::new(r"(?s)<!--.*?-->").unwrap();

    static ref ENTITY_DECLARATION: Regex = Regex::new(
        r#"(?i)<!ENTITY\s+[^\s>]*\s*(?:"[^"]*"|'[^']*')\s*>"#
    ).unwrap();

    static ref MARKUP_DECLARATION: Regex = Regex::new(
        r"(?i)<!(?:ELEMENT|ATTLIST|NOTATION|ENTITY)[^>]*>"
    ).unwrap();

    static ref SVG_ROOT: Regex = Regex::new(
        r"(?i)^\s*(?:<\?xml[^>]*>\s*)?(?:<!doctype\s+svg[^>\[]*(?:\[[^\]]*\])?[^>]*>\s*)?<svg[\s/>]"
    ).unwrap();
}

/// Remove comments and DTD declarations that may sit in front of the root tag
pub fn strip_declarations(text: &str) -> String {
    let text = COMMENT.replace_all(text, "");
    let text = ENTITY_DECLARATION.replace_all(&text, "");
    MARKUP_DECLARATION.replace_all(&text, "").into_owned()
}

/// Check whether a leading chunk looks like an SVG document
pub fn is_svg(chunk: &[u8]) -> bool {
    let text = String::from_utf8_lossy(chunk);
    // A UTF-8 byte order mark may precede the prolog
    let text = text.strip_prefix('\u{FEFF}').unwrap_or(&text);
    SVG_ROOT.is_match(&strip_declarations(text))
}
