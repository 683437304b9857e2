//! Traversal token catalog

/// Tokens ordered from stealthy to aggressive. The order is part of the
/// contract: probing and reporting follow it.
const TOKENS: [&str; 8] = [
    "..%2f",
    "../",
    "..%5c",
    "..;/",
    "%2e%2e%2f",
    ".%2e/",
    "..\\",
    "..%2f..%2f",
];

pub fn tokens() -> &'static [&'static str] {
    &TOKENS
}

/// Append each token to `base`, one candidate per token, preserving order.
/// Also used with the filtered per-host subset, so the tokens are a
/// parameter. The caller guarantees `base` ends with `/`.
pub fn build_traversal<S: AsRef<str>>(base: &str, tokens: &[S]) -> Vec<String> {
    tokens
        .iter()
        .map(|t| format!("{}{}", base, t.as_ref()))
        .collect()
}
