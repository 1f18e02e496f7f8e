//! String utilities used when reporting upstream failures

/// Truncate a string at a character boundary
///
/// # Example
/// ```
/// use data_source_service::utils::truncate_str;
///
/// let text = "größe über";
/// assert_eq!(truncate_str(text, 5), "größe");
/// assert_eq!(truncate_str(text, 100), "größe über");
/// ```
pub fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Truncate and append `suffix` when something was cut off
pub fn truncate_with_suffix(s: &str, max_chars: usize, suffix: &str) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        format!("{}{}", truncate_str(s, max_chars), suffix)
    }
}

/// Short, single-line rendering of an upstream JSON body for log and detail fields
pub fn summarize_body(body: &serde_json::Value, max_chars: usize) -> String {
    let rendered = match body {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    };
    let single_line = rendered.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_with_suffix(&single_line, max_chars, "...")
}
