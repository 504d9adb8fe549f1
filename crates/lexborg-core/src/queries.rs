use serde_json::Value;

/// Extract up to `max` search queries from a model's structured output.
///
/// Tries, in order: the JSON as given (object with a `queries` array, or a
/// bare array), the same after turning single-quoted literals into double
/// quotes, and finally line heuristics (quoted, bulleted or numbered lines).
pub fn parse_queries(raw: &str, max: usize) -> Vec<String> {
    let text = strip_fences(raw);
    if text.is_empty() || max == 0 {
        return Vec::new();
    }

    let mut found = from_json(text)
        .or_else(|| from_json(&text.replace('\'', "\"")))
        .unwrap_or_else(|| from_lines(text));

    dedup_keep_order(&mut found);
    found.truncate(max);
    found
}

pub(crate) fn strip_fences(text: &str) -> &str {
    let t = text.trim();
    if !t.starts_with("```") {
        return t;
    }
    let nl = match t.find('\n') {
        Some(i) => i,
        None => return t,
    };
    let inner = &t[nl + 1..];
    if inner.ends_with("```") {
        inner[..inner.len() - 3].trim_end()
    } else {
        inner
    }
}

fn from_json(text: &str) -> Option<Vec<String>> {
    let value = serde_json::from_str::<Value>(text)
        .ok()
        .or_else(|| embedded_object(text).and_then(|s| serde_json::from_str(s).ok()))?;
    let queries = match &value {
        Value::Array(items) => strings(items),
        Value::Object(map) => match map.get("queries") {
            Some(Value::Array(items)) => strings(items),
            // Some models pick their own key; take the first list of strings.
            _ => map
                .values()
                .filter_map(Value::as_array)
                .map(|items| strings(items))
                .find(|v| !v.is_empty())
                .unwrap_or_default(),
        },
        _ => Vec::new(),
    };
    (!queries.is_empty()).then_some(queries)
}

/// `{...}` span inside surrounding prose.
fn embedded_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn strings(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.as_str()),
            Value::Object(o) => o.get("query").and_then(Value::as_str),
            _ => None,
        })
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn from_lines(text: &str) -> Vec<String> {
    text.lines().filter_map(line_item).collect()
}

fn line_item(line: &str) -> Option<String> {
    let t = line.trim().trim_end_matches(',').trim();
    if t.is_empty() {
        return None;
    }

    let item = if let Some(rest) = strip_bullet(t) {
        rest
    } else if let Some(inner) = unquote(t) {
        inner
    } else {
        return None;
    };

    // `"queries": [` and similar key lines are structure, not items.
    if is_key_line(t) {
        return None;
    }

    let item = item.trim().trim_end_matches(',').trim();
    let item = unquote(item).unwrap_or(item).trim();
    if item.chars().count() < 2 || item.chars().all(|c| "[]{}".contains(c)) {
        return None;
    }
    Some(item.to_string())
}

fn strip_bullet(t: &str) -> Option<&str> {
    for marker in ["- ", "* ", "• ", "+ "] {
        if let Some(rest) = t.strip_prefix(marker) {
            return Some(rest);
        }
    }
    let digits = t.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &t[digits..];
        for sep in [". ", ") ", "- "] {
            if let Some(rest) = rest.strip_prefix(sep) {
                return Some(rest);
            }
        }
    }
    None
}

fn unquote(t: &str) -> Option<&str> {
    for (open, close) in [('"', '"'), ('\'', '\''), ('“', '”')] {
        if t.chars().count() >= 2 && t.starts_with(open) && t.ends_with(close) {
            return Some(&t[open.len_utf8()..t.len() - close.len_utf8()]);
        }
    }
    None
}

fn is_key_line(t: &str) -> bool {
    let Some(first) = t.chars().next() else {
        return false;
    };
    if first != '"' && first != '\'' {
        return false;
    }
    t[1..]
        .find(first)
        .map(|close| t[1 + close + 1..].trim_start().starts_with(':'))
        .unwrap_or(false)
}

fn dedup_keep_order(items: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    items.retain(|q| seen.insert(q.to_lowercase()));
}
