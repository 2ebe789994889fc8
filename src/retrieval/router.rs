//! 검색 라우터 - 전략 선택과 폴백
//!
//! 결정 트리:
//! 1. 전체 책 요청이면 책 단위 정확 조회 (행이 있으면 즉시 반환)
//! 2. 책+장이 있으면 장 단위 정확 조회 (행이 있으면 벡터 검색 생략)
//! 3. 나머지는 개선된 쿼리를 임베딩하여 벡터 검색
//!
//! 각 단계의 백엔드 실패는 로그만 남기고 다음 전략으로 넘어갑니다.
//! 마지막 단계(벡터 검색)의 실패만 에러로 표면화됩니다.

use std::sync::Arc;

use crate::bible::{format_passage, has_full_book_keyword, parse_reference, rewrite_query};
use crate::embedding::EmbeddingProvider;
use crate::error::RetrievalError;

use super::{BibleStore, Passage, Retrieval, Strategy};

/// 기본 검색 결과 수
pub const DEFAULT_LIMIT: usize = 5;

/// 전체 책 조회 시 행 상한 (어떤 책이든 전체 장을 커버)
pub const WHOLE_BOOK_ROW_LIMIT: usize = 1000;

/// 전체 책 요청이 벡터 검색으로 폴백할 때의 확대된 limit
pub const WHOLE_BOOK_VECTOR_LIMIT: usize = 100;

/// 벡터 검색 유사도 임계값
///
/// 코퍼스가 작고 도메인이 한정적이므로 정밀도보다 재현율을 우선합니다.
pub const VECTOR_MATCH_THRESHOLD: f32 = 0.5;

/// 결과 없음 고정 문구 (에러 아님)
pub const NO_RESULTS_MESSAGE: &str = "관련된 성경 내용을 찾을 수 없습니다.";

// ============================================================================
// RetrievalRouter
// ============================================================================

/// 검색 라우터
///
/// 참조 파싱 결과에 따라 정확 조회와 벡터 검색 사이를 라우팅합니다.
pub struct RetrievalRouter {
    store: Arc<dyn BibleStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl RetrievalRouter {
    /// 새 라우터 생성
    pub fn new(store: Arc<dyn BibleStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    /// 쿼리 검색
    ///
    /// 백엔드가 모든 전략에서 닿지 않을 때만 실패합니다.
    /// 결과가 없는 것은 에러가 아니라 고정 문구를 담은 빈 결과입니다.
    pub async fn retrieve(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Retrieval, RetrievalError> {
        let reference = parse_reference(query);
        tracing::debug!(?reference, "쿼리 파싱 완료");

        // 1. 전체 책 요청: 책 단위 정확 조회
        let is_whole_book = reference.book.is_some() && reference.whole_book;
        if is_whole_book {
            let book = reference.book.as_deref().unwrap_or_default();
            tracing::debug!(
                book,
                explicit_keyword = has_full_book_keyword(query),
                "전체 책 요청"
            );
            match self.store.select_by_book(book, WHOLE_BOOK_ROW_LIMIT).await {
                Ok(rows) if !rows.is_empty() => {
                    let mut rows = rows;
                    sort_chapters_numeric(&mut rows);
                    return Ok(build_retrieval(rows, Strategy::WholeBook));
                }
                Ok(_) => {
                    tracing::debug!(book, "책 단위 조회 결과 없음, 벡터 검색으로 폴백");
                }
                Err(e) => {
                    tracing::warn!(book, error = %e, "책 단위 조회 실패, 벡터 검색으로 폴백");
                }
            }
        }

        // 2. 책+장 정확 조회 (행이 있으면 임베딩 호출 없이 반환)
        if let (Some(book), Some(chapter)) = (&reference.book, &reference.chapter) {
            match self
                .store
                .select_by_book_chapter(book, chapter, limit)
                .await
            {
                Ok(rows) if !rows.is_empty() => {
                    return Ok(build_retrieval(rows, Strategy::ExactChapter));
                }
                Ok(_) => {
                    tracing::debug!(book, chapter, "장 단위 조회 결과 없음, 벡터 검색으로 폴백");
                }
                Err(e) => {
                    tracing::warn!(book, chapter, error = %e, "장 단위 조회 실패, 벡터 검색으로 폴백");
                }
            }
        }

        // 3. 벡터 검색: 쿼리 개선 후 임베딩
        let improved = rewrite_query(query, &reference);

        // 전체 책 요청이 여기까지 왔으면 limit을 크게 확대
        let count = if is_whole_book {
            WHOLE_BOOK_VECTOR_LIMIT
        } else {
            limit
        };

        let embedding = self
            .embedder
            .embed(&improved)
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        let rows = self
            .store
            .vector_search(&embedding, VECTOR_MATCH_THRESHOLD, count)
            .await
            .map_err(|e| RetrievalError::BackendUnavailable(e.to_string()))?;

        if rows.is_empty() {
            return Ok(Retrieval {
                passages: vec![],
                strategy: Strategy::Vector,
                text: NO_RESULTS_MESSAGE.to_string(),
            });
        }

        Ok(build_retrieval(rows, Strategy::Vector))
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 구절 목록을 인용 텍스트로 렌더링하여 결과 생성
fn build_retrieval(passages: Vec<Passage>, strategy: Strategy) -> Retrieval {
    let text = passages
        .iter()
        .map(format_passage)
        .collect::<Vec<_>>()
        .join("\n\n");

    Retrieval {
        passages,
        strategy,
        text,
    }
}

/// 장 라벨을 숫자로 정렬 ("10"이 "9" 뒤에 오도록)
///
/// 저장소는 장을 TEXT로 보관하므로 사전순 정렬을 그대로 쓸 수 없습니다.
fn sort_chapters_numeric(passages: &mut [Passage]) {
    passages.sort_by_key(|p| {
        (
            p.chapter.trim().parse::<u32>().unwrap_or(u32::MAX),
            p.verse.trim().parse::<u32>().unwrap_or(u32::MAX),
        )
    });
}

// ============================================================================
// Tests
// ============================================================================
