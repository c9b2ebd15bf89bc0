//! Tolerant regex-based HTML scanning.
//!
//! Feed descriptions and publisher pages are rarely well-formed; these
//! helpers look for tags and attributes without building a DOM.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

fn comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"))
}

fn attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)([a-z][a-z0-9_:-]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>/]+))"#)
            .expect("valid regex")
    })
}

fn url_attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)(\s)(src|href)(\s*=\s*)(?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
    })
}

fn invisible_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<(script|style|noscript)\b[^>]*>.*?</(?:script|style|noscript)>")
            .expect("valid regex")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"))
}

fn space_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

/// Remove HTML comments.
pub fn strip_comments(html: &str) -> String {
    comment_re().replace_all(html, "").into_owned()
}

/// Attributes of every `<name ...>` tag, in document order. Attribute
/// names are lowercased; comments are ignored.
pub fn find_tags(html: &str, name: &str) -> Vec<HashMap<String, String>> {
    let html = strip_comments(html);
    let pattern = format!(r"(?is)<{}\b([^>]*)>", regex::escape(name));
    let Ok(re) = Regex::new(&pattern) else {
        return Vec::new();
    };

    re.captures_iter(&html)
        .map(|tag| {
            attr_re()
                .captures_iter(&tag[1])
                .map(|attr| {
                    let value = attr
                        .get(2)
                        .or_else(|| attr.get(3))
                        .or_else(|| attr.get(4))
                        .map(|m| decode_entities(m.as_str().trim()))
                        .unwrap_or_default();
                    (attr[1].to_lowercase(), value)
                })
                .collect()
        })
        .collect()
}

/// `src` of every `<img>` tag, in document order.
pub fn image_sources(html: &str) -> Vec<String> {
    find_tags(html, "img")
        .into_iter()
        .filter_map(|mut attrs| attrs.remove("src"))
        .filter(|src| !src.is_empty())
        .collect()
}

/// Rewrite quoted `src` (and, with `include_href`, `href`) attribute values.
///
/// `rewrite` returns the new value or `None` to keep the old one. Returns
/// the rewritten document only when something changed.
pub fn rewrite_urls<F>(html: &str, include_href: bool, mut rewrite: F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut changed = false;
    let out = url_attr_re().replace_all(html, |caps: &Captures| {
        let original = caps[0].to_string();
        if !include_href && caps[2].eq_ignore_ascii_case("href") {
            return original;
        }
        let (value, quote) = match (caps.get(4), caps.get(5)) {
            (Some(v), _) => (v.as_str(), '"'),
            (None, Some(v)) => (v.as_str(), '\''),
            (None, None) => return original,
        };
        match rewrite(value) {
            Some(new) if new != value => {
                changed = true;
                format!("{}{}{}{quote}{new}{quote}", &caps[1], &caps[2], &caps[3])
            }
            _ => original,
        }
    });

    changed.then(|| out.into_owned())
}

/// Visible text of a document: scripts and styles removed, tags stripped,
/// whitespace collapsed.
pub fn visible_text(html: &str) -> String {
    let html = strip_comments(html);
    let html = invisible_re().replace_all(&html, " ");
    let text = tag_re().replace_all(&html, " ");
    let text = decode_entities(&text);
    space_re().replace_all(text.trim(), " ").into_owned()
}

/// Decode the handful of entities that commonly survive in attribute
/// values and text.
pub fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
