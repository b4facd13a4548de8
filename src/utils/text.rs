/// Truncates to at most `max_chars` characters (not bytes).
pub(crate) fn truncate_chars(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

/// Approximate rendered width in em units: ASCII is half-width, everything else (Hangul) full-width.
pub(crate) fn em_width(value: &str) -> f32 {
    value
        .chars()
        .map(|c| if c.is_ascii() { 0.55 } else { 1.0 })
        .sum()
}

/// Greedy word wrap by approximate em width; words wider than a line are split by character.
pub(crate) fn wrap_em(text: &str, max_em: f32) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if line.is_empty() {
                word.to_string()
            } else {
                format!("{line} {word}")
            };
            if em_width(&candidate) <= max_em {
                line = candidate;
                continue;
            }
            if !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            for ch in word.chars() {
                let mut next = line.clone();
                next.push(ch);
                if em_width(&next) > max_em && !line.is_empty() {
                    lines.push(std::mem::take(&mut line));
                    line.push(ch);
                } else {
                    line = next;
                }
            }
        }
        lines.push(line);
    }
    lines
}

/// Shortens `value` so that it fits `max_em`, marking the cut with `..`.
pub(crate) fn fit_em(value: &str, max_em: f32) -> String {
    if em_width(value) <= max_em {
        return value.to_string();
    }
    let budget = (max_em - em_width("..")).max(0.0);
    let mut out = String::new();
    for ch in value.chars() {
        out.push(ch);
        if em_width(&out) > budget {
            out.pop();
            break;
        }
    }
    out.push_str("..");
    out
}
