//! 검색 쿼리 개선
//!
//! 책/장이 파싱된 경우 임베딩 관련성을 높이기 위해
//! 쿼리를 "책 장 [절]" 정규형으로 변환합니다.

use super::reference::ParsedReference;

/// 검색 쿼리 개선
///
/// 책과 장이 모두 있으면 "역대상 1장 요약해줘" -> "역대상 1" 형태로
/// 짧게 정규화하고, 아니면 원본 쿼리를 그대로 반환합니다.
/// 같은 파싱 결과로 다시 적용해도 결과가 같습니다 (누적되지 않음).
pub fn rewrite_query(query: &str, reference: &ParsedReference) -> String {
    let (Some(book), Some(chapter)) = (&reference.book, &reference.chapter) else {
        return query.to_string();
    };

    let mut improved = format!("{} {}", book, chapter);
    if let Some(verse) = &reference.verse {
        improved.push(' ');
        improved.push_str(verse);
    }
    improved
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bible::parse_reference;

    #[test]
    fn rewrites_book_chapter() {
        let r = parse_reference("역대상 1장 요약해줘");
        assert_eq!(rewrite_query("역대상 1장 요약해줘", &r), "역대상 1");
    }

    #[test]
    fn rewrites_book_chapter_verse() {
        let r = parse_reference("창세기 1장 1절");
        assert_eq!(rewrite_query("창세기 1장 1절", &r), "창세기 1 1");
    }

    #[test]
    fn passes_through_without_chapter() {
        let r = parse_reference("사랑에 대한 말씀");
        assert_eq!(
            rewrite_query("사랑에 대한 말씀", &r),
            "사랑에 대한 말씀"
        );
    }

    #[test]
    fn passes_through_whole_book() {
        let r = parse_reference("역대상 요약");
        assert_eq!(rewrite_query("역대상 요약", &r), "역대상 요약");
    }

    #[test]
    fn rewrite_is_idempotent() {
        let r = parse_reference("역대상 1장");
        let once = rewrite_query("역대상 1장", &r);
        let twice = rewrite_query(&once, &r);
        assert_eq!(once, twice);
    }
}
