/// Keeps at most `max` characters (not bytes).
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Turns raw contract bytes into a storable string: NULs dropped, invalid
/// UTF-8 sequences replaced with `?`.
pub fn clean_string(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .chars()
        .filter(|c| *c != '\0')
        .map(|c| if c == char::REPLACEMENT_CHARACTER { '?' } else { c })
        .collect()
}
