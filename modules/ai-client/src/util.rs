/// Truncate a string to at most `max_bytes` bytes at a character boundary.
pub fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    &s[..end]
}

/// Truncate at the last newline at or before `max_bytes`, falling back to a
/// plain char-boundary cut when the prefix has no newline.
pub fn truncate_to_line_boundary(s: &str, max_bytes: usize) -> &str {
    let head = truncate_to_char_boundary(s, max_bytes);
    if head.len() == s.len() {
        return s;
    }
    match head.rfind('\n') {
        Some(idx) if idx > 0 => &head[..idx],
        _ => head,
    }
}
