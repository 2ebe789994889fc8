//! 검색 모듈 - 저장소 인터페이스와 검색 라우터
//!
//! 파싱된 성경 참조에 따라 정확 조회(장/책 단위)와 벡터 검색 중
//! 알맞은 전략을 선택하고, 전략 간 폴백을 처리합니다.

mod router;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// Re-exports
pub use router::{
    RetrievalRouter, DEFAULT_LIMIT, NO_RESULTS_MESSAGE, VECTOR_MATCH_THRESHOLD,
    WHOLE_BOOK_ROW_LIMIT, WHOLE_BOOK_VECTOR_LIMIT,
};

// ============================================================================
// Types
// ============================================================================

/// 검색된 성경 구절 단위
///
/// `verse`가 빈 문자열이면 장 전체 단위 청크를 의미합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub book: String,
    pub chapter: String,
    #[serde(default)]
    pub verse: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
}

/// 결과를 생산한 검색 전략
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// 책+장 동등 조건 조회
    ExactChapter,
    /// 책 전체 조회 (장 오름차순)
    WholeBook,
    /// 임베딩 유사도 검색
    Vector,
}

/// 검색 결과
#[derive(Debug, Clone)]
pub struct Retrieval {
    /// 검색된 구절 (순서 유지)
    pub passages: Vec<Passage>,
    /// 결과를 생산한 전략
    pub strategy: Strategy,
    /// 인용 형식으로 렌더링된 텍스트 (LLM 컨텍스트용)
    pub text: String,
}

// ============================================================================
// BibleStore Trait
// ============================================================================

/// 성경 청크 저장소 인터페이스
///
/// 구조화 조회 두 가지와 벡터 검색을 제공합니다.
#[async_trait]
pub trait BibleStore: Send + Sync {
    /// 책 이름으로 전체 행 조회 (장 오름차순, limit 상한)
    async fn select_by_book(&self, book: &str, limit: usize) -> Result<Vec<Passage>>;

    /// 책+장 동등 조건 조회
    async fn select_by_book_chapter(
        &self,
        book: &str,
        chapter: &str,
        limit: usize,
    ) -> Result<Vec<Passage>>;

    /// 임베딩 유사도 검색
    async fn vector_search(
        &self,
        embedding: &[f32],
        threshold: f32,
        count: usize,
    ) -> Result<Vec<Passage>>;
}
