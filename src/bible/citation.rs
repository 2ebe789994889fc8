//! 인용 렌더링 / 파싱
//!
//! 검색 결과를 `[책 장장절절] 내용` 형식으로 렌더링하고,
//! LLM 도구 출력 텍스트에서 같은 형식의 인용을 역파싱합니다.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::retrieval::Passage;

/// 답변에 포함되는 최대 인용 수
pub const MAX_CITATIONS: usize = 3;

/// 인용 미리보기 최대 글자 수
const PREVIEW_MAX_CHARS: usize = 200;

// ============================================================================
// Types
// ============================================================================

/// 출처 인용 레코드
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// 책 이름
    pub book: String,
    /// 장 번호 (없으면 생략)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
    /// 절 번호 (없으면 생략)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verse: Option<String>,
    /// 내용 미리보기 (최대 200자)
    pub content: String,
}

impl Citation {
    /// 구조화된 검색 결과에서 인용 생성
    pub fn from_passage(passage: &Passage) -> Self {
        Self {
            book: passage.book.clone(),
            chapter: non_empty(&passage.chapter),
            verse: non_empty(&passage.verse),
            content: truncate_preview(&passage.content),
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

// ============================================================================
// Rendering
// ============================================================================

/// 검색 결과 한 건을 인용 텍스트로 렌더링
///
/// 형식: `[책 장장절절] 내용` + 유사도가 있으면 `(유사도: X.XXXX)` 줄 추가.
/// 장/절이 비어 있으면 해당 부분은 생략됩니다.
pub fn format_passage(passage: &Passage) -> String {
    let mut citation = passage.book.clone();
    if !passage.chapter.is_empty() {
        citation.push_str(&format!(" {}장", passage.chapter));
    }
    if !passage.verse.is_empty() {
        citation.push_str(&format!(" {}절", passage.verse));
    }

    match passage.similarity {
        Some(similarity) => format!(
            "[{}] {}\n(유사도: {:.4})",
            citation, passage.content, similarity
        ),
        None => format!("[{}] {}", citation, passage.content),
    }
}

/// 텍스트 자르기 (UTF-8 안전, 200자 초과 시 말줄임)
pub fn truncate_preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_MAX_CHARS {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(PREVIEW_MAX_CHARS).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// 렌더링된 인용 텍스트에서 인용 레코드 추출
///
/// `[책 장장절절]`과 뒤따르는 같은 줄의 내용을 찾아 최대 3건까지 추출합니다.
/// 괄호 내용은 공백으로 분리하여 첫 토큰을 책 이름으로, '장'이 포함된
/// 두 번째 토큰을 장으로, '절'이 포함된 세 번째 토큰을 절로 해석합니다.
pub fn parse_citations(text: &str) -> Vec<Citation> {
    let Ok(re) = Regex::new(r"\[([^\]]+)\]\s*([^\n]+)") else {
        return vec![];
    };

    let mut citations = Vec::new();

    for caps in re.captures_iter(text) {
        if citations.len() >= MAX_CITATIONS {
            break;
        }

        let bracket = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let content = caps.get(2).map(|m| m.as_str()).unwrap_or("").trim();

        let tokens: Vec<&str> = bracket.split_whitespace().collect();
        let Some(book) = tokens.first() else {
            continue;
        };

        let chapter = tokens
            .get(1)
            .filter(|t| t.contains('장'))
            .map(|t| t.trim_end_matches('장').to_string());
        let verse = tokens
            .get(2)
            .filter(|t| t.contains('절'))
            .map(|t| t.trim_end_matches('절').to_string());

        citations.push(Citation {
            book: book.to_string(),
            chapter,
            verse,
            content: truncate_preview(content),
        });
    }

    citations
}

// ============================================================================
// Tests
// ============================================================================
