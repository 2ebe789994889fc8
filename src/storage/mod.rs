//! 저장소 모듈 - Supabase PostgREST 클라이언트
//!
//! 성경 청크 테이블(`bible_chunks`)과 대화 기록 테이블
//! (`conversations` / `messages`)을 REST API로 접근합니다.

mod conversations;
mod supabase;

// Re-exports
pub use conversations::{
    Conversation, ConversationStore, StoredMessage, SupabaseConversationStore,
};
pub use supabase::SupabaseBibleStore;
