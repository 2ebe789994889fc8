//! LLM 모듈 - Gemini 채팅 모델 클라이언트
//!
//! 일괄 호출(`generateContent`)과 SSE 스트리밍
//! (`streamGenerateContent?alt=sse`)을 제공합니다.

use std::pin::Pin;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::Config;

// ============================================================================
// Types
// ============================================================================

/// 메시지 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// 저장된 role 문자열 해석 (알 수 없는 값은 user로 처리)
    pub fn parse(s: &str) -> Self {
        match s {
            "system" => Role::System,
            "assistant" => Role::Assistant,
            _ => Role::User,
        }
    }
}

/// 채팅 메시지
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// 스트리밍 이벤트
///
/// 토큰 이벤트의 텍스트는 증분일 수도, 누적일 수도 있습니다.
/// 소비자(AnswerComposer)가 접두 비교로 델타를 계산합니다.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// 토큰 텍스트 (증분 또는 누적)
    Token(String),
    /// 검색 도구 완료 - 렌더링된 인용 텍스트
    ToolResult(String),
    /// 종료 - 최종 메시지 콘텐츠
    Done(Value),
}

/// 이벤트 스트림 타입
pub type ChatEventStream = Pin<Box<dyn Stream<Item = Result<ChatEvent>> + Send>>;

// ============================================================================
// ChatModel Trait
// ============================================================================

/// 채팅 모델 트레이트
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// 일괄 호출 - 응답 콘텐츠를 원시 JSON 형태로 반환
    ///
    /// 콘텐츠는 문자열, 세그먼트 목록, 또는 매핑일 수 있으며
    /// 평탄화는 호출자가 수행합니다.
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<Value>;

    /// 스트리밍 호출 - 종료 이벤트까지의 지연 이벤트 시퀀스
    async fn stream_events(&self, messages: &[ChatMessage]) -> Result<ChatEventStream>;
}

// ============================================================================
// Google Gemini Chat
// ============================================================================

/// Gemini API 베이스 URL
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// 생성 온도
const TEMPERATURE: f32 = 0.7;

/// Google Gemini 채팅 구현체
#[derive(Debug)]
pub struct GeminiChat {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiChat {
    /// 새 Gemini 채팅 인스턴스 생성
    pub fn new(api_key: String, model: String) -> Result<Self> {
        // 스트리밍 응답은 오래 걸릴 수 있으므로 타임아웃을 길게 잡음
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            model,
            client,
        })
    }

    /// 설정에서 생성
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.gemini_api_key.clone(), config.llm_model.clone())
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/models/{}:{}", GEMINI_API_BASE, self.model, method)
    }

    /// 메시지 시퀀스를 Gemini 요청 본문으로 변환
    ///
    /// system 메시지는 `system_instruction`으로, 나머지는 user/model
    /// 역할의 `contents`로 매핑됩니다.
    fn build_request(&self, messages: &[ChatMessage]) -> Value {
        let system_text: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        let contents: Vec<Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let role = match m.role {
                    Role::Assistant => "model",
                    _ => "user",
                };
                json!({ "role": role, "parts": [{ "text": m.content }] })
            })
            .collect();

        let mut request = json!({
            "contents": contents,
            "generationConfig": { "temperature": TEMPERATURE },
        });

        if !system_text.is_empty() {
            request["system_instruction"] = json!({
                "parts": [{ "text": system_text.join("\n\n") }]
            });
        }

        request
    }
}

/// 스트리밍 청크에서 텍스트 추출
fn chunk_text(chunk: &Value) -> Option<String> {
    let parts = chunk
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[async_trait]
impl ChatModel for GeminiChat {
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<Value> {
        let request = self.build_request(messages);

        let response = self
            .client
            .post(self.endpoint("generateContent"))
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .context("Gemini 요청 실패")?;

        let status = response.status();
        let body = response.text().await.context("응답 본문 읽기 실패")?;

        if !status.is_success() {
            anyhow::bail!("Gemini API error ({}): {}", status, body);
        }

        let parsed: Value = serde_json::from_str(&body).context("Gemini 응답 파싱 실패")?;

        // candidates[0].content가 평탄화 대상 콘텐츠
        let content = parsed
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("content"))
            .cloned()
            .unwrap_or(Value::Null);

        Ok(content)
    }

    async fn stream_events(&self, messages: &[ChatMessage]) -> Result<ChatEventStream> {
        let request = self.build_request(messages);

        let response = self
            .client
            .post(format!("{}?alt=sse", self.endpoint("streamGenerateContent")))
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .context("Gemini 스트리밍 요청 실패")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Gemini API error ({}): {}", status, body);
        }

        let mut events = response.bytes_stream().eventsource();

        // SSE 이벤트를 ChatEvent로 변환. 스트림 종료 시 누적 텍스트를
        // 담은 종료 이벤트를 내보냄.
        let stream = async_stream(move |tx| async move {
            let mut accumulated = String::new();

            while let Some(event) = events.next().await {
                match event {
                    Ok(event) => {
                        let Ok(chunk) = serde_json::from_str::<Value>(&event.data) else {
                            continue;
                        };
                        if let Some(text) = chunk_text(&chunk) {
                            accumulated.push_str(&text);
                            if tx.send(Ok(ChatEvent::Token(text))).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx
                            .send(Err(anyhow::anyhow!("스트림 읽기 오류: {}", e)))
                            .await;
                        return;
                    }
                }
            }

            let _ = tx
                .send(Ok(ChatEvent::Done(Value::String(accumulated))))
                .await;
        });

        Ok(stream)
    }
}

/// mpsc 채널 기반 스트림 생성 헬퍼
fn async_stream<F, Fut>(f: F) -> ChatEventStream
where
    F: FnOnce(tokio::sync::mpsc::Sender<Result<ChatEvent>>) -> Fut,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = tokio::sync::mpsc::channel(32);
    tokio::spawn(f(tx));
    Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("system"), Role::System);
        assert_eq!(Role::parse("assistant"), Role::Assistant);
        assert_eq!(Role::parse("user"), Role::User);
        assert_eq!(Role::parse("unknown"), Role::User);
    }

    #[test]
    fn test_build_request_maps_roles() {
        let chat = GeminiChat::new("fake_key".into(), "gemini-2.0-flash".into()).unwrap();
        let messages = vec![
            ChatMessage::system("지시사항"),
            ChatMessage::user("질문"),
            ChatMessage::assistant("답변"),
        ];

        let request = chat.build_request(&messages);

        assert_eq!(
            request["system_instruction"]["parts"][0]["text"],
            "지시사항"
        );
        assert_eq!(request["contents"][0]["role"], "user");
        assert_eq!(request["contents"][1]["role"], "model");
        assert_eq!(request["contents"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_build_request_without_system() {
        let chat = GeminiChat::new("fake_key".into(), "gemini-2.0-flash".into()).unwrap();
        let request = chat.build_request(&[ChatMessage::user("질문")]);
        assert!(request.get("system_instruction").is_none());
    }

    #[test]
    fn test_chunk_text_extraction() {
        let chunk = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "태초에" }, { "text": " 하나님이" }] }
            }]
        });
        assert_eq!(chunk_text(&chunk).as_deref(), Some("태초에 하나님이"));
    }

    #[test]
    fn test_chunk_text_empty() {
        let chunk = json!({ "candidates": [{ "content": { "parts": [] } }] });
        assert_eq!(chunk_text(&chunk), None);
        assert_eq!(chunk_text(&json!({})), None);
    }

    #[test]
    fn test_endpoint() {
        let chat = GeminiChat::new("fake_key".into(), "gemini-2.0-flash".into()).unwrap();
        assert_eq!(
            chat.endpoint("generateContent"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }
}
