use serde::Serialize;
use tracing::{info, warn};

use crate::entities::event::{COLUMNS, EventRecord};
use crate::error::YeoshinError;
use crate::sources::anthropic::AnthropicClient;

pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
pub const DEFAULT_MAX_TOKENS: u32 = 2500;
pub const FALLBACK_TEXT: &str = "분석을 수행할 수 없습니다.";

const CLOSING_MARKER: &str = "마지막으로";
const RECOMMENDATION_MARKER: &str = "핵심 제언";

/// Section letter and display title, in prompt order.
pub const SECTIONS: [(char, &str); 4] = [
    ('A', "옵션 분석"),
    ('B', "첫 번째 옵션 분석"),
    ('C', "위치 기반 분석"),
    ('D', "고객 반응 분석"),
];

const PROMPT_HEADER: &str = "여신티켓의 시술 이벤트 데이터를 분석하여, 새로운 이벤트를 등록하려는 병원에 도움이 될 만한 인사이트를 제공해주세요.

아래 형식에 맞춰 분석해주세요:

A. 옵션 분석
1. 옵션 패턴 분석
2. 가격대별 옵션 구성 특징
3. 평균 옵션 개수 분석

B. 첫 번째 옵션 분석
1. 일반적인 첫 번째 옵션 패턴
2. 가격 비교

C. 위치 기반 분석
1. 지역별 특성

D. 고객 반응 분석
1. 고객 반응 상세 분석

분석 시 다음 가이드라인을 준수해주세요:
1. 실제 예시와 수치를 근거로 들어 분석해주세요.
2. 가격에 대한 분석을 할 때에는 정확한 금액과 실제 예시를 들어서 설명해주세요.
3. 분석할 때 주의사항:
    - 가격이나 용량의 범위를 표현할 때는 '~' 대신 '부터', '까지' 또는 '-' 를 사용해주세요.

마지막으로, 3가지 핵심 제언을 해주세요.

데이터:
";

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSection {
    pub key: char,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub raw: String,
    pub sections: Vec<AnalysisSection>,
    pub recommendations: Vec<String>,
    pub fallback: bool,
}

impl Analysis {
    pub fn from_text(raw: String) -> Self {
        let sections = split_sections(&raw);
        let recommendations = recommendations(&raw);
        Self {
            raw,
            sections,
            recommendations,
            fallback: false,
        }
    }

    pub fn fallback() -> Self {
        Self {
            raw: FALLBACK_TEXT.to_string(),
            sections: Vec::new(),
            recommendations: Vec::new(),
            fallback: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    pub model: String,
    pub max_tokens: u32,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// Data block appended to the prompt: one line per row, prefixed with the exposure order.
pub fn data_table(rows: &[EventRecord]) -> String {
    let mut out = String::from("exposure_order");
    for (_, label) in COLUMNS {
        out.push_str(" | ");
        out.push_str(label);
    }
    out.push('\n');
    for row in rows {
        out.push_str(&row.exposure_order.to_string());
        for (key, _) in COLUMNS {
            out.push_str(" | ");
            out.push_str(&row.field(key).replace(['\n', '|'], " "));
        }
        out.push('\n');
    }
    out
}

pub fn build_prompt(rows: &[EventRecord]) -> String {
    let mut prompt = String::from(PROMPT_HEADER);
    prompt.push_str(&data_table(rows));
    prompt
}

/// Byte offset of `marker` at or after `from`, only where it opens a line
/// (optionally behind markdown heading, bold, or list punctuation).
fn find_marker(text: &str, marker: &str, from: usize) -> Option<usize> {
    text.match_indices(marker)
        .map(|(pos, _)| pos)
        .filter(|pos| *pos >= from)
        .find(|pos| {
            let line_start = text[..*pos].rfind('\n').map_or(0, |p| p + 1);
            text[line_start..*pos]
                .chars()
                .all(|c| c.is_whitespace() || matches!(c, '#' | '*' | '>' | '-'))
        })
}

fn trim_section(body: &str) -> &str {
    body.trim()
        .trim_end_matches(|c: char| c.is_whitespace() || matches!(c, '#' | '*' | '-'))
}

/// Splits the answer into the A-D sections. A section ends at the next section marker that is
/// present; the last one found ends at the closing phrase. Missing markers are skipped.
pub fn split_sections(text: &str) -> Vec<AnalysisSection> {
    let mut out = Vec::new();
    for (idx, (key, title)) in SECTIONS.iter().enumerate() {
        let Some(start) = find_marker(text, &format!("{key}."), 0) else {
            continue;
        };
        let after = start + key.len_utf8() + 1;
        let end = SECTIONS[idx + 1..]
            .iter()
            .find_map(|(next, _)| find_marker(text, &format!("{next}."), after))
            .or_else(|| text[after..].find(CLOSING_MARKER).map(|p| p + after))
            .unwrap_or(text.len());

        let body = trim_section(&text[start..end]);
        if body.is_empty() {
            continue;
        }
        out.push(AnalysisSection {
            key: *key,
            title: (*title).to_string(),
            body: body.to_string(),
        });
    }
    out
}

/// Non-empty lines after the line that names the key recommendations.
pub fn recommendations(text: &str) -> Vec<String> {
    let Some(pos) = text.rfind(RECOMMENDATION_MARKER) else {
        return Vec::new();
    };
    text[pos..]
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Sends the prompt for `rows` and splits the answer.
pub async fn analyze(
    client: &AnthropicClient,
    rows: &[EventRecord],
    opts: &AnalysisOptions,
) -> Result<Analysis, YeoshinError> {
    if rows.is_empty() {
        return Err(YeoshinError::InvalidArgument(
            "No rows to analyze".into(),
        ));
    }
    let prompt = build_prompt(rows);
    info!(model = %opts.model, rows = rows.len(), "Requesting analysis");
    let text = client
        .complete(&opts.model, opts.max_tokens, 0.0, &prompt)
        .await?;
    Ok(Analysis::from_text(text))
}

/// Runs the analysis, degrading to the fallback text on any failure.
pub async fn analyze_or_fallback(
    client: &AnthropicClient,
    rows: &[EventRecord],
    opts: &AnalysisOptions,
) -> Analysis {
    match analyze(client, rows, opts).await {
        Ok(analysis) => analysis,
        Err(err) => {
            warn!("Analysis unavailable, using fallback text: {err}");
            Analysis::fallback()
        }
    }
}
