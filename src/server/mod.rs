//! HTTP 서버 모듈 - axum 기반 API 표면
//!
//! 엔드포인트:
//! - `POST /api/chat` - 일괄 채팅
//! - `POST /api/chat/stream` - SSE 스트리밍 채팅 (start|token|done|error)
//! - `GET /api/conversations`, `GET /api/conversations/{id}/messages`
//! - `DELETE /api/conversations/{id}`, `PATCH /api/conversations/{id}`
//! - `GET /api/health`, `GET /healthz`, `GET /`

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::answer::{AnswerComposer, AnswerEvent};
use crate::bible::Citation;
use crate::config::Config;
use crate::embedding::GeminiEmbedding;
use crate::llm::{ChatMessage, GeminiChat, Role};
use crate::retrieval::{RetrievalRouter, DEFAULT_LIMIT};
use crate::storage::{
    Conversation, ConversationStore, StoredMessage, SupabaseBibleStore,
    SupabaseConversationStore,
};

// ============================================================================
// State
// ============================================================================

/// 공유 애플리케이션 상태
///
/// 백엔드 클라이언트는 프로세스 시작 시 한 번 생성되어
/// 명시적으로 주입됩니다. 전역 가변 상태는 없습니다.
pub struct AppState {
    pub retriever: RetrievalRouter,
    pub composer: AnswerComposer,
    pub conversations: Arc<dyn ConversationStore>,
    pub allowed_origins: Vec<String>,
}

impl AppState {
    /// 설정에서 모든 백엔드 클라이언트 구성
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = Arc::new(SupabaseBibleStore::from_config(config)?);
        let embedder = Arc::new(GeminiEmbedding::from_config(config)?);
        let llm = Arc::new(GeminiChat::from_config(config)?);
        let conversations = Arc::new(SupabaseConversationStore::from_config(config)?);

        Ok(Self {
            retriever: RetrievalRouter::new(store, embedder),
            composer: AnswerComposer::new(llm),
            conversations,
            allowed_origins: config.allowed_origins_list(),
        })
    }
}

// ============================================================================
// Schemas
// ============================================================================

/// 채팅 요청
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// 채팅 응답
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Citation>>,
}

/// 대화 목록 쿼리 파라미터
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

// ============================================================================
// Error Mapping
// ============================================================================

/// 핸들러 에러 - 500과 메시지로 변환
struct ApiError(anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.0, "요청 처리 실패");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "detail": format!("처리 중 오류가 발생했습니다: {}", self.0)
            })),
        )
            .into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

// ============================================================================
// Router
// ============================================================================

/// axum 라우터 구성
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.allowed_origins);

    Router::new()
        .route("/", get(handle_root))
        .route("/healthz", get(handle_healthz))
        .route("/api/health", get(handle_health))
        .route("/api/chat", post(handle_chat))
        .route("/api/chat/stream", post(handle_chat_stream))
        .route("/api/conversations", get(handle_list_conversations))
        .route(
            "/api/conversations/{id}/messages",
            get(handle_get_messages),
        )
        .route(
            "/api/conversations/{id}",
            axum::routing::delete(handle_delete_conversation)
                .patch(handle_update_conversation),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS 레이어 구성
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let list: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        layer.allow_origin(list)
    }
}

/// 서버 실행
pub async fn serve(config: Config) -> Result<()> {
    let state = Arc::new(AppState::from_config(&config)?);
    let app = build_router(state);

    let addr = format!("{}:{}", config.api_host, config.api_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("{}에 바인드할 수 없습니다", addr))?;

    tracing::info!("서버 시작: http://{}", addr);
    axum::serve(listener, app).await.context("서버 실행 실패")?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

async fn handle_root() -> Json<Value> {
    Json(json!({
        "message": "성경 QA 챗봇 API에 오신 것을 환영합니다.",
        "health": "/api/health",
    }))
}

async fn handle_healthz() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn handle_health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "message": "서비스가 정상적으로 동작 중입니다.",
    }))
}

/// 일괄 채팅
async fn handle_chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let (conversation_id, prior_turns) = resolve_conversation(&state, &request).await?;

    let retrieval = state
        .retriever
        .retrieve(&request.message, DEFAULT_LIMIT)
        .await?;
    tracing::debug!(strategy = ?retrieval.strategy, "검색 완료");

    let (answer, citations) = state
        .composer
        .compose(&request.message, &prior_turns, &retrieval)
        .await?;

    state
        .conversations
        .append_message(&conversation_id, Role::User, &request.message, None)
        .await?;
    state
        .conversations
        .append_message(&conversation_id, Role::Assistant, &answer, Some(&citations))
        .await?;

    let sources = if citations.is_empty() {
        None
    } else {
        Some(citations)
    };

    Ok(Json(ChatResponse {
        answer,
        conversation_id,
        sources,
    }))
}

/// 스트리밍 채팅 (SSE)
///
/// 사용자 턴 저장은 토큰 스트리밍과 동시에 시작되며, 마지막 토큰
/// 이후 완료를 기다린 뒤에 어시스턴트 턴을 저장합니다.
async fn handle_chat_stream(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Sse<KeepAliveStream<ReceiverStream<Result<Event, Infallible>>>> {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Event, Infallible>>(64);

    tokio::spawn(async move {
        // 오류는 전송을 끊지 않고 스트림 내 error 이벤트로 전달
        if let Err(e) = run_chat_stream(state, request, &tx).await {
            tracing::error!(error = %e, "스트리밍 처리 실패");
            let _ = tx
                .send(Ok(sse_event("error", json!({ "detail": e.to_string() }))))
                .await;
        }
    });

    Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default())
}

async fn run_chat_stream(
    state: Arc<AppState>,
    request: ChatRequest,
    tx: &tokio::sync::mpsc::Sender<Result<Event, Infallible>>,
) -> Result<()> {
    let (conversation_id, prior_turns) = resolve_conversation(&state, &request).await?;

    // 사용자 턴 저장을 스트리밍과 동시에 시작
    let save_user = {
        let conversations = state.conversations.clone();
        let conversation_id = conversation_id.clone();
        let message = request.message.clone();
        tokio::spawn(async move {
            conversations
                .append_message(&conversation_id, Role::User, &message, None)
                .await
        })
    };

    let retrieval = state
        .retriever
        .retrieve(&request.message, DEFAULT_LIMIT)
        .await?;

    let mut events = state
        .composer
        .compose_stream(&request.message, &prior_turns, &retrieval)
        .await;

    while let Some(event) = events.recv().await {
        match event {
            AnswerEvent::Start => {
                let sent = tx
                    .send(Ok(sse_event(
                        "start",
                        json!({ "conversation_id": conversation_id }),
                    )))
                    .await;
                if sent.is_err() {
                    return Ok(());
                }
            }
            AnswerEvent::Token(token) => {
                let sent = tx
                    .send(Ok(sse_event("token", json!({ "content": token }))))
                    .await;
                if sent.is_err() {
                    return Ok(());
                }
            }
            AnswerEvent::Done { answer, citations } => {
                // 사용자 턴 저장이 어시스턴트 턴 저장보다 먼저 완료되도록 대기
                match save_user.await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => tracing::warn!(error = %e, "사용자 턴 저장 실패"),
                    Err(e) => tracing::warn!(error = %e, "사용자 턴 저장 태스크 실패"),
                }

                if let Err(e) = state
                    .conversations
                    .append_message(&conversation_id, Role::Assistant, &answer, Some(&citations))
                    .await
                {
                    tracing::warn!(error = %e, "어시스턴트 턴 저장 실패");
                }

                let _ = tx
                    .send(Ok(sse_event("done", done_payload(&conversation_id, &citations))))
                    .await;
                return Ok(());
            }
            AnswerEvent::Error(message) => {
                let _ = tx
                    .send(Ok(sse_event("error", json!({ "detail": message }))))
                    .await;
                return Ok(());
            }
        }
    }

    Ok(())
}

/// 대화 목록 조회
async fn handle_list_conversations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    let conversations = state
        .conversations
        .list_conversations(query.user_id.as_deref(), query.limit)
        .await?;
    Ok(Json(conversations))
}

/// 대화의 메시지 목록 조회
async fn handle_get_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<StoredMessage>>, ApiError> {
    let messages = state.conversations.get_messages(&id, query.limit).await?;
    Ok(Json(messages))
}

/// 대화 삭제
async fn handle_delete_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let deleted = state.conversations.delete_conversation(&id).await?;
    Ok(Json(json!({ "success": deleted })))
}

/// 대화 메타데이터 갱신
async fn handle_update_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(metadata): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let updated = state.conversations.update_conversation(&id, metadata).await?;
    Ok(Json(json!({ "success": updated })))
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 대화 ID 확보 및 이전 턴 로드
///
/// 요청에 대화 ID가 없으면 새 대화를 생성합니다.
async fn resolve_conversation(
    state: &AppState,
    request: &ChatRequest,
) -> Result<(String, Vec<ChatMessage>)> {
    let conversation_id = match &request.conversation_id {
        Some(id) => id.clone(),
        None => state.conversations.create_conversation(None).await?,
    };

    let prior_turns = state
        .conversations
        .get_messages(&conversation_id, None)
        .await?
        .iter()
        .map(to_chat_message)
        .collect();

    Ok((conversation_id, prior_turns))
}

/// 저장된 메시지를 채팅 메시지로 변환
fn to_chat_message(message: &StoredMessage) -> ChatMessage {
    ChatMessage {
        role: message.role(),
        content: message.content.clone(),
    }
}

/// SSE 이벤트 구성
///
/// 클라이언트는 `event:` 라인 대신 페이로드의 `type` 필드로 분기하므로
/// 이벤트 타입을 양쪽 모두에 싣습니다.
fn sse_event(event: &str, payload: Value) -> Event {
    Event::default()
        .event(event)
        .data(tag_payload(event, payload).to_string())
}

/// 페이로드에 이벤트 타입 필드 주입
fn tag_payload(event: &str, mut payload: Value) -> Value {
    if let Value::Object(map) = &mut payload {
        map.insert("type".to_string(), Value::String(event.to_string()));
    }
    payload
}

/// done 이벤트 페이로드
fn done_payload(conversation_id: &str, citations: &[Citation]) -> Value {
    json!({
        "conversation_id": conversation_id,
        "sources": citations,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_chat_message_roles() {
        let stored = StoredMessage {
            id: "m1".into(),
            conversation_id: "c1".into(),
            role: "assistant".into(),
            content: "답변".into(),
            sources: None,
            created_at: "2026-01-01T00:00:00Z".into(),
        };
        let message = to_chat_message(&stored);
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content, "답변");
    }

    #[test]
    fn test_done_payload_carries_citations() {
        let citations = vec![Citation {
            book: "창세기".into(),
            chapter: Some("1".into()),
            verse: Some("1".into()),
            content: "태초에".into(),
        }];

        let payload = done_payload("conv-1", &citations);
        assert_eq!(payload["conversation_id"], "conv-1");
        assert_eq!(payload["sources"][0]["book"], "창세기");
        assert_eq!(payload["sources"][0]["chapter"], "1");
    }

    #[test]
    fn test_payload_carries_event_type_field() {
        let tagged = tag_payload("token", json!({ "content": "태초에" }));
        assert_eq!(tagged["type"], "token");
        assert_eq!(tagged["content"], "태초에");

        let done = tag_payload("done", done_payload("conv-1", &[]));
        assert_eq!(done["type"], "done");
        assert_eq!(done["conversation_id"], "conv-1");
    }

    #[test]
    fn test_chat_request_deserialization() {
        let request: ChatRequest =
            serde_json::from_str(r#"{ "message": "창세기 1장" }"#).unwrap();
        assert_eq!(request.message, "창세기 1장");
        assert_eq!(request.conversation_id, None);
    }
}
