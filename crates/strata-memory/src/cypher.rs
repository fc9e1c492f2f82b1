//! Escaping for values interpolated into Apache AGE Cypher text.
//!
//! AGE runs Cypher through `cypher('<graph>', $$ ... $$)`, and the transport
//! offers no bound parameters, so every caller-controlled value is spliced
//! into the query string. Everything that reaches a query goes through one of
//! the functions here first:
//!
//! - [`escape_literal`] for values inside a single-quoted string literal,
//! - [`escape_pattern`] for values inside a `=~` regular expression literal,
//! - [`sanitize_label`] for edge types and labels (identifiers, not strings),
//! - [`sanitize_graph_name`] for the graph name in the SQL wrapper.
//!
//! A `$` anywhere in the body would let input close the `$$` dollar quote,
//! so it is removed rather than escaped.

/// Longest caller value (in chars) that is ever interpolated.
pub const MAX_LITERAL_CHARS: usize = 1000;

/// Longest entity slug.
pub const MAX_SLUG_CHARS: usize = 128;

/// Escape a value for a single-quoted Cypher string literal.
///
/// Truncates to [`MAX_LITERAL_CHARS`], escapes backslash, single quote,
/// newline and carriage return, and drops `$` and NUL.
pub fn escape_literal(value: &str) -> String {
    escape_truncated(&truncate_chars(value, MAX_LITERAL_CHARS))
}

/// Escape a value for use as a literal substring inside a `=~` pattern that
/// is itself a single-quoted string.
///
/// Pattern metacharacters are escaped first so the regex sees the raw text,
/// then the result is literal-escaped so the string cannot be broken out of.
pub fn escape_pattern(value: &str) -> String {
    let truncated = truncate_chars(value, MAX_LITERAL_CHARS);
    let mut regex_safe = String::with_capacity(truncated.len() * 2);
    for c in truncated.chars() {
        match c {
            '$' | '\0' => {}
            '.' | '*' | '+' | '?' | '^' | '{' | '}' | '(' | ')' | '|' | '[' | ']' | '\\' => {
                regex_safe.push('\\');
                regex_safe.push(c);
            }
            _ => regex_safe.push(c),
        }
    }
    escape_truncated(&regex_safe)
}

/// Reduce a label or edge type to `[A-Za-z0-9_]+`. `None` when nothing is left,
/// in which case the caller must not run the query.
pub fn sanitize_label(label: &str) -> Option<String> {
    let sanitized: String = label
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if sanitized.is_empty() {
        None
    } else {
        Some(sanitized)
    }
}

/// Reduce a graph name to `[A-Za-z0-9_]`.
pub fn sanitize_graph_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// Lowercase, collapse every run of non `[a-z0-9]` into one `-`, trim dashes
/// at both ends, cap at [`MAX_SLUG_CHARS`].
pub fn slugify(input: &str) -> String {
    let lower = input.to_lowercase();
    let mut out = String::with_capacity(lower.len());
    let mut pending_dash = false;
    for c in lower.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c);
        } else {
            pending_dash = true;
        }
    }
    truncate_chars(&out, MAX_SLUG_CHARS)
}

/// Graph node key for an entity: `slug("<type>:<name>")`.
pub fn entity_slug(entity_type: &str, name: &str) -> String {
    slugify(&format!("{entity_type}:{name}"))
}

/// Parse an agtype value returned as text.
///
/// AGE serializes vertices, edges and paths as JSON followed by a type
/// suffix (`::vertex`, `::edge`, `::path`, `::agtype`); plain values are
/// bare JSON. Text that is not JSON even after stripping the suffix comes
/// back as a JSON string.
pub fn parse_agtype(text: &str) -> serde_json::Value {
    if let Ok(v) = serde_json::from_str(text) {
        return v;
    }
    let mut cleaned = text.trim();
    for suffix in ["::vertex", "::edge", "::path", "::agtype"] {
        if let Some(stripped) = cleaned.strip_suffix(suffix) {
            cleaned = stripped.trim();
            break;
        }
    }
    serde_json::from_str(cleaned)
        .unwrap_or_else(|_| serde_json::Value::String(cleaned.to_string()))
}

fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

fn escape_truncated(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '$' | '\0' => {}
            _ => out.push(c),
        }
    }
    out
}
