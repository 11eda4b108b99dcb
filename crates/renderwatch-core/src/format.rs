//! Display helpers: human-readable durations and `{field}` message templates.

use crate::error::{RenderwatchError, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Durations
// ---------------------------------------------------------------------------

/// Render a millisecond duration as e.g. "1 hour, 2 minutes and 5.50 seconds".
///
/// Days are not used: long renders accumulate hours instead.
pub fn precise_duration(ms: i64) -> String {
    let ms = ms.max(0);
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let sec_ms = ms % 60_000;

    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(unit(hours, "hour"));
    }
    if minutes > 0 {
        parts.push(unit(minutes, "minute"));
    }
    if sec_ms > 0 || parts.is_empty() {
        if sec_ms % 1000 == 0 {
            parts.push(unit(sec_ms / 1000, "second"));
        } else {
            parts.push(format!("{:.2} seconds", sec_ms as f64 / 1000.0));
        }
    }

    match parts.split_last() {
        Some((last, [])) => last.clone(),
        Some((last, rest)) => format!("{} and {}", rest.join(", "), last),
        None => String::new(),
    }
}

fn unit(n: i64, name: &str) -> String {
    if n == 1 {
        format!("1 {name}")
    } else {
        format!("{n} {name}s")
    }
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder_re() -> &'static Regex {
    PLACEHOLDER_RE
        .get_or_init(|| Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap())
}

/// Fill `{field}` placeholders from `values`. `{{` and `}}` produce literal
/// braces. Any placeholder without a value is an error and nothing is
/// rendered.
pub fn render_template(template: &str, values: &BTreeMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in placeholder_re().captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&template[last..whole.start()]);
        match caps.get(1) {
            Some(name) => {
                let value = values
                    .get(name.as_str())
                    .ok_or_else(|| RenderwatchError::UnknownPlaceholder(name.as_str().to_string()))?;
                out.push_str(value);
            }
            None => out.push_str(&whole.as_str()[..1]),
        }
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}
