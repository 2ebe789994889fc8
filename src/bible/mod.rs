//! 성경 참조 모듈 - 책 이름 / 장 / 절 파싱과 인용 처리
//!
//! 자유 텍스트 쿼리에서 성경 참조를 추출하고, 검색용 쿼리 개선과
//! `[책 장장절절] 내용` 형식의 인용 렌더링/파싱을 담당합니다.
//! 검색 라우팅의 판단 근거가 되는 핵심 모듈입니다.

mod books;
mod citation;
mod reference;
mod rewrite;

// Re-exports
pub use books::{canonical_books, KOREAN_BOOK_NAMES};
pub use citation::{format_passage, parse_citations, truncate_preview, Citation, MAX_CITATIONS};
pub use reference::{has_full_book_keyword, parse_reference, ParsedReference};
pub use rewrite::rewrite_query;
