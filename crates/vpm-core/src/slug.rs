const MAX_SLUG_LEN: usize = 50;

/// Filesystem-safe rendering of a product name: spaces become `_`, anything
/// outside `[A-Za-z0-9_-]` is dropped, the result is capped at 50 characters
/// and lowercased.
pub fn slugify(name: &str) -> String {
    name.chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .take(MAX_SLUG_LEN)
        .collect::<String>()
        .to_ascii_lowercase()
}
