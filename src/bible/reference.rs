//! 성경 참조 파서
//!
//! 자유 텍스트 쿼리에서 (책, 장, 절, 전체책 여부)를 추출합니다.
//!
//! 예시:
//! - "역대상 1장" -> ("역대상", "1", None, false)
//! - "창세기 1장 1절" -> ("창세기", "1", "1", false)
//! - "요한복음 3:16" -> ("요한복음", "3", "16", false)
//! - "역대상 전체" -> ("역대상", None, None, true)
//! - "역대상 요약" -> ("역대상", None, None, true)

use regex::Regex;

use super::books::canonical_books;

/// 전체 책 의도를 나타내는 키워드
const FULL_BOOK_KEYWORDS: [&str; 7] = ["전체", "전부", "모두", "요약", "전체를", "전부를", "모두를"];

/// 장 패턴 (순서대로 시도, 첫 매칭 사용)
const CHAPTER_PATTERNS: [&str; 4] = [
    r"(\d+)\s*장",
    r"(?i)chapter\s*(\d+)",
    r"(?i)ch\s*(\d+)",
    r"(\d+)\s*:",
];

/// 절 패턴 (순서대로 시도, 첫 매칭 사용)
const VERSE_PATTERNS: [&str; 3] = [r"(\d+)\s*절", r"(?i)verse\s*(\d+)", r"(?i)v\s*(\d+)"];

// ============================================================================
// Types
// ============================================================================

/// 파싱된 성경 참조
///
/// 불변식:
/// - `whole_book`은 `book`이 있고 `chapter`가 없을 때만 true
/// - `verse`는 `chapter` 없이 설정되지 않음
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedReference {
    /// 정식 책 이름 (66권 목록 중 하나)
    pub book: Option<String>,
    /// 장 번호 (텍스트, 검증하지 않음)
    pub chapter: Option<String>,
    /// 절 번호 (텍스트, 검증하지 않음)
    pub verse: Option<String>,
    /// 책 전체 요청 여부
    pub whole_book: bool,
}

impl ParsedReference {
    /// 구조화된 참조가 없는 빈 결과
    fn empty() -> Self {
        Self::default()
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// 쿼리에서 성경 참조 파싱
///
/// 장 번호가 없으면 키워드 유무와 무관하게 전체 책 요청으로 간주합니다.
/// 책 이름이 없으면 빈 참조를 반환하며, 호출자는 이를
/// "구조화된 참조 없음, 자유 텍스트 검색 사용" 신호로 처리해야 합니다.
pub fn parse_reference(query: &str) -> ParsedReference {
    // 1. 숫자:숫자 형식 (예: 3:16) - 콜론 앞에서 책 이름을 찾으면 즉시 반환
    if let Ok(re) = Regex::new(r"(\d+):(\d+)") {
        if let Some(caps) = re.captures(query) {
            let m = caps.get(0).map(|m| m.start()).unwrap_or(0);
            let book_part = &query[..m];

            for book in canonical_books() {
                if book_part.contains(book) {
                    return ParsedReference {
                        book: Some(book.to_string()),
                        chapter: caps.get(1).map(|c| c.as_str().to_string()),
                        verse: caps.get(2).map(|v| v.as_str().to_string()),
                        whole_book: false,
                    };
                }
            }
        }
    }

    // 2. 책 이름 찾기 (긴 이름부터 매칭 - 부분 이름 충돌 방지)
    let found_book = canonical_books().into_iter().find(|b| query.contains(b));

    let Some(book) = found_book else {
        return ParsedReference::empty();
    };

    // 3. 장 / 절 찾기
    let chapter = find_first_number(query, &CHAPTER_PATTERNS);
    let verse = find_first_number(query, &VERSE_PATTERNS);

    // 4. 장이 없으면 전체 책으로 간주 (키워드가 없어도)
    let Some(chapter) = chapter else {
        return ParsedReference {
            book: Some(book.to_string()),
            chapter: None,
            verse: None,
            whole_book: true,
        };
    };

    ParsedReference {
        book: Some(book.to_string()),
        chapter: Some(chapter),
        verse,
        whole_book: false,
    }
}

/// 전체 책 키워드 포함 여부
///
/// 파싱 결과에는 "장 없음 => 전체 책" 정책이 우선하지만,
/// 키워드 검출은 진단 로깅에 사용됩니다.
pub fn has_full_book_keyword(query: &str) -> bool {
    FULL_BOOK_KEYWORDS.iter().any(|k| query.contains(k))
}

/// 패턴 목록을 순서대로 시도하여 첫 매칭된 숫자 반환
fn find_first_number(query: &str, patterns: &[&str]) -> Option<String> {
    for pattern in patterns {
        let Ok(re) = Regex::new(pattern) else {
            continue;
        };
        if let Some(caps) = re.captures(query) {
            if let Some(num) = caps.get(1) {
                return Some(num.as_str().to_string());
            }
        }
    }
    None
}

// ============================================================================
// Tests
// ============================================================================
