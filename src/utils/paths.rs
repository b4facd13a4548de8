use std::path::PathBuf;

pub fn cache_dir() -> PathBuf {
    match dirs::cache_dir() {
        Some(dir) => dir.join("yeoshin-scrape"),
        None => std::env::temp_dir().join("yeoshin-scrape"),
    }
}

/// `yeoshin_<keyword>_report.pdf`, with path separators and control characters replaced.
pub fn default_report_path(keyword: &str) -> PathBuf {
    let safe: String = keyword
        .trim()
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
            {
                '_'
            } else if c.is_whitespace() {
                '-'
            } else {
                c
            }
        })
        .collect();
    PathBuf::from(format!("yeoshin_{safe}_report.pdf"))
}
