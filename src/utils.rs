//! Utility functions for common operations.

use crate::error::InferenceError;
use std::cmp::Ordering;

/// A run of either ASCII digits or everything else.
#[derive(Debug, PartialEq, Eq)]
enum Run<'a> {
    Number(&'a str),
    Text(&'a str),
}

fn runs(s: &str) -> Vec<Run<'_>> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut in_digits: Option<bool> = None;

    for (i, c) in s.char_indices() {
        let is_digit = c.is_ascii_digit();
        match in_digits {
            Some(prev) if prev != is_digit => {
                out.push(make_run(&s[start..i], prev));
                start = i;
            }
            _ => {}
        }
        in_digits = Some(is_digit);
    }
    if let Some(prev) = in_digits {
        out.push(make_run(&s[start..], prev));
    }
    out
}

fn make_run(s: &str, digits: bool) -> Run<'_> {
    if digits { Run::Number(s) } else { Run::Text(s) }
}

/// Compares two digit strings by numeric value without overflowing.
fn cmp_numeric(a: &str, b: &str) -> Ordering {
    let a_trim = a.trim_start_matches('0');
    let b_trim = b.trim_start_matches('0');
    a_trim
        .len()
        .cmp(&b_trim.len())
        .then_with(|| a_trim.cmp(b_trim))
        // "01" sorts after "1" so the order stays total
        .then_with(|| a.len().cmp(&b.len()))
}

/// Natural ordering for file names: `Chapter_2` sorts before `Chapter_10`.
///
/// Names are split into digit and non-digit runs. Digit runs compare as
/// integers, text runs compare case-insensitively, and the raw strings break
/// any remaining tie. Independent of locale collation.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let ra = runs(a);
    let rb = runs(b);

    for (x, y) in ra.iter().zip(rb.iter()) {
        let ord = match (x, y) {
            (Run::Number(x), Run::Number(y)) => cmp_numeric(x, y),
            (Run::Text(x), Run::Text(y)) => x.to_lowercase().cmp(&y.to_lowercase()),
            (Run::Number(_), Run::Text(_)) => Ordering::Less,
            (Run::Text(_), Run::Number(_)) => Ordering::Greater,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }

    ra.len().cmp(&rb.len()).then_with(|| a.cmp(b))
}

/// Collapses runs of whitespace into a single space and trims the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncates text to `max_chars` characters for log output.
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head.replace('\n', " "))
    } else {
        head.replace('\n', " ")
    }
}

/// Checks if an HTTP response is successful, and if not, returns a detailed error.
///
/// This helper extracts both the status code and response body for better error messages.
pub async fn check_response_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, InferenceError> {
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        return Err(InferenceError::Api { status, message });
    }
    Ok(response)
}
