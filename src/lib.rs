//! bible-qa - 성경 QA 챗봇 서비스
//!
//! 한국어 성경 구절 참조 파싱, Supabase 구조화 조회와 pgvector
//! 벡터 검색을 결합한 검색 라우팅, Gemini 기반 답변 생성(일괄/SSE
//! 스트리밍), 대화 기록 관리, XML 코퍼스 적재를 제공합니다.

pub mod answer;
pub mod bible;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod retrieval;
pub mod server;
pub mod storage;

// Re-exports
pub use answer::{AnswerComposer, AnswerEvent};
pub use bible::{parse_reference, Citation, ParsedReference, KOREAN_BOOK_NAMES};
pub use config::{get_api_key, has_api_key, Config};
pub use error::RetrievalError;
pub use ingest::{parse_zefania, ChapterDoc, ChunkSink, EmbeddedChunk, Ingestor};
pub use retrieval::{BibleStore, Passage, Retrieval, RetrievalRouter, Strategy};
pub use storage::{ConversationStore, SupabaseBibleStore, SupabaseConversationStore};
