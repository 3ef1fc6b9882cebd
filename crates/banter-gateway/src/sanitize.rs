/// Formatting tags that survive content sanitization, bare (attributes are
/// always dropped). Everything else is stripped, inner text kept.
const ALLOWED_TAGS: [&str; 9] = ["ul", "ol", "li", "b", "i", "em", "strike", "pre", "strong"];

/// Reduce a display name to letters, digits, whitespace and hyphens, trimmed,
/// with internal whitespace runs collapsed to a single space. Never fails;
/// the worst case is an empty string.
pub fn display_name(raw: &str) -> String {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace() || *c == '-')
        .collect();

    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip all markup except the allow-list. Disallowed tags are removed but
/// their inner text is kept; allowed tags are normalized to their bare,
/// lowercase form with every attribute dropped.
pub fn content(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('>') {
            Some(end) => {
                if let Some(tag) = normalize_tag(&after[..end]) {
                    out.push_str(&tag);
                }
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated markup: drop the remainder.
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

fn normalize_tag(body: &str) -> Option<String> {
    let body = body.trim();
    let (closing, body) = match body.strip_prefix('/') {
        Some(stripped) => (true, stripped),
        None => (false, body),
    };

    let name_end = body
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(body.len());
    let name = body[..name_end].to_ascii_lowercase();

    if name.is_empty() || !ALLOWED_TAGS.contains(&name.as_str()) {
        return None;
    }

    Some(if closing {
        format!("</{name}>")
    } else {
        format!("<{name}>")
    })
}
