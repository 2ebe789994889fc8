//! 답변 합성 모듈
//!
//! 검색된 구절과 질문(및 이전 턴)을 LLM에 보내고, 다양한 형태의
//! 응답 페이로드에서 평문 답변을 추출합니다. 스트리밍 모드에서는
//! 누적/증분 토큰을 구분하여 델타만 내보냅니다.

use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::bible::{parse_citations, Citation, MAX_CITATIONS};
use crate::llm::{ChatEvent, ChatMessage, ChatModel};
use crate::retrieval::Retrieval;

/// 시스템 프롬프트 (성경 QA 어시스턴트 지침)
const SYSTEM_PROMPT: &str = "당신은 성경 내용을 바탕으로 정확하고 도움이 되는 답변을 제공하는 AI 어시스턴트입니다.\n\
- 답변할 때는 반드시 제공된 성경 내용을 근거로 하세요.\n\
- 책, 장, 절을 인용하여 출처를 명시하세요.\n\
- 전체 책 요약은 장별로 정리하여 포괄적으로 설명하세요.\n\
- 간결한 요약으로 시작하고, 소제목과 목록으로 구조화하여 한국어로 답변하세요.\n\
- 기록되지 않은 내용은 알려지지 않았다고 설명하고, 관련해서 살펴볼 주제를 제안하세요.";

// ============================================================================
// Types
// ============================================================================

/// 스트리밍 답변 이벤트 (SSE 릴레이용)
#[derive(Debug, Clone)]
pub enum AnswerEvent {
    /// 스트림 시작
    Start,
    /// 답변 토큰 (델타)
    Token(String),
    /// 완료 - 전체 답변과 인용
    Done {
        answer: String,
        citations: Vec<Citation>,
    },
    /// 오류 (스트림 내 인라인 전달)
    Error(String),
}

// ============================================================================
// AnswerComposer
// ============================================================================

/// 답변 합성기
pub struct AnswerComposer {
    llm: Arc<dyn ChatModel>,
}

impl AnswerComposer {
    /// 새 합성기 생성
    pub fn new(llm: Arc<dyn ChatModel>) -> Self {
        Self { llm }
    }

    /// 메시지 시퀀스 구성: 시스템 지침 + 이전 턴 + 검색 결과 + 현재 질문
    fn build_messages(
        question: &str,
        prior_turns: &[ChatMessage],
        retrieval_text: &str,
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(prior_turns.len() + 2);
        messages.push(ChatMessage::system(SYSTEM_PROMPT));
        messages.extend(prior_turns.iter().cloned());

        messages.push(ChatMessage::user(format!(
            "다음은 성경 내용입니다. 질문에 대해 성경 내용을 바탕으로 정확하고 도움이 되는 답변을 제공해주세요.\n\n\
             성경 내용:\n{}\n\n질문: {}\n\n답변:",
            retrieval_text, question
        )));

        messages
    }

    /// 일괄 답변 생성
    ///
    /// 인용은 구조화된 검색 결과에서 직접 생성합니다 (최대 3건).
    pub async fn compose(
        &self,
        question: &str,
        prior_turns: &[ChatMessage],
        retrieval: &Retrieval,
    ) -> Result<(String, Vec<Citation>)> {
        let messages = Self::build_messages(question, prior_turns, &retrieval.text);

        let content = self.llm.invoke(&messages).await?;
        let answer = flatten_content(&content);

        let citations: Vec<Citation> = retrieval
            .passages
            .iter()
            .take(MAX_CITATIONS)
            .map(Citation::from_passage)
            .collect();

        Ok((answer, citations))
    }

    /// 스트리밍 답변 생성
    ///
    /// 토큰 델타와 완료/오류 이벤트를 채널로 내보냅니다.
    /// 검색 도구 출력(렌더링된 인용 텍스트)은 도구 완료 이벤트와 동일하게
    /// 취급하여 인용을 역파싱합니다.
    pub async fn compose_stream(
        &self,
        question: &str,
        prior_turns: &[ChatMessage],
        retrieval: &Retrieval,
    ) -> mpsc::Receiver<AnswerEvent> {
        let (tx, rx) = mpsc::channel(64);

        let llm = self.llm.clone();
        let messages = Self::build_messages(question, prior_turns, &retrieval.text);
        let retrieval_text = retrieval.text.clone();

        tokio::spawn(async move {
            let _ = tx.send(AnswerEvent::Start).await;

            // 도구 완료 이벤트에 해당: 렌더링된 인용 텍스트에서 인용 추출
            let mut citations = parse_citations(&retrieval_text);

            let mut stream = match llm.stream_events(&messages).await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = tx.send(AnswerEvent::Error(e.to_string())).await;
                    return;
                }
            };

            let mut emitted = String::new();

            while let Some(event) = stream.next().await {
                match event {
                    Ok(ChatEvent::Token(text)) => {
                        let delta = stream_delta(&emitted, &text);
                        if !delta.is_empty() {
                            emitted.push_str(&delta);
                            if tx.send(AnswerEvent::Token(delta)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(ChatEvent::ToolResult(text)) => {
                        citations = parse_citations(&text);
                    }
                    Ok(ChatEvent::Done(content)) => {
                        // 최종 메시지가 스트리밍된 내용과 다르면 남은 델타를
                        // 따라잡기 토큰으로 내보냄 (유실 토큰 보정)
                        let full = flatten_content(&content);
                        let delta = stream_delta(&emitted, &full);
                        if !delta.is_empty() {
                            emitted.push_str(&delta);
                            if tx.send(AnswerEvent::Token(delta)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(AnswerEvent::Error(e.to_string())).await;
                        return;
                    }
                }
            }

            let _ = tx
                .send(AnswerEvent::Done {
                    answer: emitted,
                    citations,
                })
                .await;
        });

        rx
    }
}

// ============================================================================
// Content Normalization
// ============================================================================

/// 응답 콘텐츠를 단일 문자열로 평탄화
///
/// 콘텐츠는 문자열, text 필드를 가진 세그먼트 목록, 또는 매핑일 수
/// 있습니다. text 필드를 가진 세그먼트를 순서대로 이어 붙입니다.
pub fn flatten_content(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(segments) => segments
            .iter()
            .filter_map(|seg| match seg {
                Value::String(s) => Some(s.clone()),
                Value::Object(map) => map
                    .get("text")
                    .and_then(|t| t.as_str())
                    .map(|t| t.to_string()),
                _ => None,
            })
            .collect(),
        Value::Object(map) => {
            if let Some(text) = map.get("text").and_then(|t| t.as_str()) {
                text.to_string()
            } else if let Some(parts) = map.get("parts") {
                flatten_content(parts)
            } else {
                String::new()
            }
        }
        _ => String::new(),
    }
}

/// 스트리밍 델타 계산
///
/// 수신 텍스트가 이미 내보낸 텍스트의 누적형이면 새 접미사만,
/// 아니면 증분으로 간주하여 그대로 반환합니다.
pub fn stream_delta(emitted: &str, incoming: &str) -> String {
    match incoming.strip_prefix(emitted) {
        Some(suffix) => suffix.to_string(),
        None => incoming.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::llm::ChatEventStream;
    use crate::retrieval::{Passage, Strategy};

    #[test]
    fn delta_from_cumulative_chunks() {
        let mut emitted = String::new();
        let mut tokens = Vec::new();

        for incoming in ["A", "AB", "ABC"] {
            let delta = stream_delta(&emitted, incoming);
            emitted.push_str(&delta);
            tokens.push(delta);
        }

        assert_eq!(tokens, vec!["A", "B", "C"]);
    }

    #[test]
    fn delta_from_incremental_chunks() {
        let mut emitted = String::new();
        let mut tokens = Vec::new();

        for incoming in ["가", "나", "다"] {
            let delta = stream_delta(&emitted, incoming);
            emitted.push_str(&delta);
            tokens.push(delta);
        }

        assert_eq!(tokens, vec!["가", "나", "다"]);
    }

    #[test]
    fn delta_identical_resend_is_empty() {
        assert_eq!(stream_delta("안녕", "안녕"), "");
    }

    #[test]
    fn flattens_string_content() {
        assert_eq!(flatten_content(&json!("답변")), "답변");
    }

    #[test]
    fn flattens_segment_list() {
        let content = json!([
            { "text": "첫째, " },
            { "type": "tool_use", "id": "abc" },
            { "text": "둘째." },
        ]);
        assert_eq!(flatten_content(&content), "첫째, 둘째.");
    }

    #[test]
    fn flattens_mapping_with_text() {
        assert_eq!(flatten_content(&json!({ "text": "본문" })), "본문");
    }

    #[test]
    fn flattens_gemini_content_object() {
        let content = json!({
            "role": "model",
            "parts": [{ "text": "태초에" }, { "text": " 하나님이" }],
        });
        assert_eq!(flatten_content(&content), "태초에 하나님이");
    }

    #[test]
    fn flattens_null_to_empty() {
        assert_eq!(flatten_content(&Value::Null), "");
    }

    // ------------------------------------------------------------------------

    /// 각본대로 이벤트를 내보내는 모의 모델
    struct ScriptedModel {
        response: Value,
        events: Vec<ChatEvent>,
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn invoke(&self, _messages: &[ChatMessage]) -> Result<Value> {
            Ok(self.response.clone())
        }

        async fn stream_events(&self, _messages: &[ChatMessage]) -> Result<ChatEventStream> {
            let events = self.events.clone();
            Ok(Box::pin(futures::stream::iter(
                events.into_iter().map(Ok),
            )))
        }
    }

    fn retrieval_with_text(text: &str) -> Retrieval {
        Retrieval {
            passages: vec![Passage {
                book: "창세기".into(),
                chapter: "1".into(),
                verse: "1".into(),
                content: "태초에 하나님이 천지를 창조하시니라".into(),
                similarity: None,
            }],
            strategy: Strategy::ExactChapter,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn batch_compose_flattens_and_cites() {
        let model = ScriptedModel {
            response: json!({ "parts": [{ "text": "창세기 1장 1절은 창조를 선언합니다." }] }),
            events: vec![],
        };
        let composer = AnswerComposer::new(Arc::new(model));
        let retrieval = retrieval_with_text("[창세기 1장 1절] 태초에 하나님이 천지를 창조하시니라");

        let (answer, citations) = composer
            .compose("창세기 1장 1절", &[], &retrieval)
            .await
            .unwrap();

        assert_eq!(answer, "창세기 1장 1절은 창조를 선언합니다.");
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].book, "창세기");
        assert_eq!(citations[0].verse.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn streaming_emits_deltas_and_done() {
        let model = ScriptedModel {
            response: Value::Null,
            events: vec![
                ChatEvent::Token("A".into()),
                ChatEvent::Token("AB".into()),
                ChatEvent::Token("ABC".into()),
                ChatEvent::Done(Value::String("ABC".into())),
            ],
        };
        let composer = AnswerComposer::new(Arc::new(model));
        let retrieval = retrieval_with_text("[창세기 1장 1절] 태초에");

        let mut rx = composer.compose_stream("질문", &[], &retrieval).await;

        let mut tokens = Vec::new();
        let mut done = None;
        let mut started = false;

        while let Some(event) = rx.recv().await {
            match event {
                AnswerEvent::Start => started = true,
                AnswerEvent::Token(t) => tokens.push(t),
                AnswerEvent::Done { answer, citations } => {
                    done = Some((answer, citations));
                }
                AnswerEvent::Error(e) => panic!("unexpected error: {}", e),
            }
        }

        assert!(started);
        assert_eq!(tokens, vec!["A", "B", "C"]);

        let (answer, citations) = done.unwrap();
        assert_eq!(answer, "ABC");
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].book, "창세기");
    }

    #[tokio::test]
    async fn streaming_terminal_catchup_emits_missing_suffix() {
        // 종료 이벤트의 최종 메시지가 스트리밍된 내용보다 길면
        // 남은 부분을 따라잡기 토큰으로 내보냄
        let model = ScriptedModel {
            response: Value::Null,
            events: vec![
                ChatEvent::Token("안녕".into()),
                ChatEvent::Done(Value::String("안녕하세요".into())),
            ],
        };
        let composer = AnswerComposer::new(Arc::new(model));
        let retrieval = retrieval_with_text("없음");

        let mut rx = composer.compose_stream("질문", &[], &retrieval).await;

        let mut tokens = Vec::new();
        while let Some(event) = rx.recv().await {
            if let AnswerEvent::Token(t) = event {
                tokens.push(t);
            }
        }

        assert_eq!(tokens, vec!["안녕", "하세요"]);
    }

    #[tokio::test]
    async fn streaming_tool_result_overrides_citations() {
        let model = ScriptedModel {
            response: Value::Null,
            events: vec![
                ChatEvent::ToolResult("[시편 23장 1절] 여호와는 나의 목자시니".into()),
                ChatEvent::Token("답".into()),
                ChatEvent::Done(Value::String("답".into())),
            ],
        };
        let composer = AnswerComposer::new(Arc::new(model));
        let retrieval = retrieval_with_text("[창세기 1장] 태초에");

        let mut rx = composer.compose_stream("질문", &[], &retrieval).await;

        let mut citations = Vec::new();
        while let Some(event) = rx.recv().await {
            if let AnswerEvent::Done { citations: c, .. } = event {
                citations = c;
            }
        }

        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].book, "시편");
    }

    #[tokio::test]
    async fn streaming_error_is_inline_event() {
        struct FailingModel;

        #[async_trait]
        impl ChatModel for FailingModel {
            async fn invoke(&self, _messages: &[ChatMessage]) -> Result<Value> {
                anyhow::bail!("unreachable")
            }

            async fn stream_events(&self, _messages: &[ChatMessage]) -> Result<ChatEventStream> {
                anyhow::bail!("connection refused")
            }
        }

        let composer = AnswerComposer::new(Arc::new(FailingModel));
        let retrieval = retrieval_with_text("없음");

        let mut rx = composer.compose_stream("질문", &[], &retrieval).await;

        let mut saw_error = false;
        while let Some(event) = rx.recv().await {
            if let AnswerEvent::Error(msg) = event {
                assert!(msg.contains("connection refused"));
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[test]
    fn build_messages_includes_prior_turns() {
        let prior = vec![
            ChatMessage::user("이전 질문"),
            ChatMessage::assistant("이전 답변"),
        ];
        let messages = AnswerComposer::build_messages("새 질문", &prior, "검색 결과");

        assert_eq!(messages.len(), 4);
        assert!(messages[3].content.contains("검색 결과"));
        assert!(messages[3].content.contains("새 질문"));
    }
}
