//! 검색 에러 타입
//!
//! 검색 체인은 전략별 실패를 삼키고 다음 전략으로 넘어가므로,
//! 라우터 경계 밖으로 나가는 에러는 백엔드 전면 장애뿐입니다.

use thiserror::Error;

/// 검색 계층 에러
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// 모든 전략에서 백엔드 연결 실패
    #[error("네트워크 연결 오류: Supabase 서버에 연결할 수 없습니다. ({0})")]
    BackendUnavailable(String),

    /// 임베딩 생성 실패
    #[error("임베딩 생성 오류: {0}")]
    Embedding(String),
}
