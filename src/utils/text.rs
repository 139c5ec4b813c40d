pub fn truncate_utf8_prefix(value: &str, max_bytes: usize) -> String {
    if max_bytes == 0 {
        return String::new();
    }
    if value.len() <= max_bytes {
        return value.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

pub fn truncate_utf8_suffix(value: &str, max_bytes: usize) -> String {
    if max_bytes == 0 {
        return String::new();
    }
    let bytes = value.as_bytes();
    if bytes.len() <= max_bytes {
        return value.to_string();
    }
    let mut start = bytes.len().saturating_sub(max_bytes);
    while start < bytes.len() && !value.is_char_boundary(start) {
        start += 1;
    }
    value[start..].to_string()
}

pub fn tail_for_context(output: &str, max_bytes: usize) -> String {
    let trimmed = output.trim_end_matches(&['\r', '\n'][..]);
    if trimmed.len() <= max_bytes {
        return trimmed.to_string();
    }
    let dropped = trimmed.len() - max_bytes;
    format!(
        "[... {} bytes omitted ...]\n{}",
        dropped,
        truncate_utf8_suffix(trimmed, max_bytes)
    )
}

pub fn first_line(value: &str) -> &str {
    value.lines().next().unwrap_or("").trim()
}

// Lines that are not valid UTF-8 are dropped and counted instead of failing the whole file.
pub fn decode_utf8_lines(bytes: &[u8]) -> (String, usize) {
    let mut text = String::with_capacity(bytes.len());
    let mut dropped = 0usize;
    for line in bytes.split(|byte| *byte == b'\n') {
        match std::str::from_utf8(line) {
            Ok(line) => {
                text.push_str(line);
                text.push('\n');
            }
            Err(_) => dropped += 1,
        }
    }
    (text, dropped)
}
