//! 대화 기록 저장소
//!
//! 대화(`conversations`)와 메시지(`messages`)를 Supabase에 보관합니다.
//! 대화별 추가 전용 로그이며, 멀티턴 컨텍스트 재구성에 사용됩니다.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::bible::Citation;
use crate::config::Config;
use crate::llm::Role;

// ============================================================================
// Types
// ============================================================================

/// 대화 행
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub created_at: String,
    pub updated_at: String,
}

/// 메시지 행
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    /// 역할 문자열 ('user' | 'assistant' | 'system')
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Citation>>,
    pub created_at: String,
}

impl StoredMessage {
    /// 역할 해석
    pub fn role(&self) -> Role {
        Role::parse(&self.role)
    }
}

// ============================================================================
// ConversationStore Trait
// ============================================================================

/// 대화 기록 저장소 인터페이스
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// 새 대화 생성, 대화 ID 반환
    async fn create_conversation(&self, user_id: Option<&str>) -> Result<String>;

    /// 메시지 추가, 메시지 ID 반환
    ///
    /// 대화의 `updated_at`도 함께 갱신됩니다.
    async fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        sources: Option<&[Citation]>,
    ) -> Result<String>;

    /// 대화의 메시지 목록 조회 (생성 시각 오름차순)
    async fn get_messages(
        &self,
        conversation_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<StoredMessage>>;

    /// 대화 목록 조회 (갱신 시각 내림차순)
    async fn list_conversations(
        &self,
        user_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Conversation>>;

    /// 대화 삭제 (메시지는 CASCADE로 함께 삭제)
    async fn delete_conversation(&self, conversation_id: &str) -> Result<bool>;

    /// 대화 메타데이터 갱신 (기존 메타데이터와 병합)
    async fn update_conversation(&self, conversation_id: &str, metadata: Value) -> Result<bool>;
}

// ============================================================================
// Supabase Implementation
// ============================================================================

/// Supabase 기반 대화 저장소
pub struct SupabaseConversationStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl SupabaseConversationStore {
    /// 새 저장소 클라이언트 생성
    pub fn new(base_url: String, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// 설정에서 생성
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.supabase_url.clone(), config.supabase_key.clone())
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn expect_success(response: reqwest::Response, what: &str) -> Result<String> {
        let status = response.status();
        let body = response.text().await.context("응답 본문 읽기 실패")?;

        if !status.is_success() {
            anyhow::bail!("{} 실패 ({}): {}", what, status, body);
        }
        Ok(body)
    }

    /// 대화의 updated_at 갱신
    async fn touch_conversation(&self, conversation_id: &str) -> Result<()> {
        let response = self
            .authed(self.client.patch(self.table_url("conversations")))
            .query(&[("id", format!("eq.{}", conversation_id))])
            .header("Prefer", "return=minimal")
            .json(&json!({ "updated_at": Utc::now().to_rfc3339() }))
            .send()
            .await
            .context("대화 갱신 요청 실패")?;

        Self::expect_success(response, "대화 갱신").await?;
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for SupabaseConversationStore {
    async fn create_conversation(&self, user_id: Option<&str>) -> Result<String> {
        let conversation_id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        let mut row = json!({
            "id": conversation_id,
            "created_at": now,
            "updated_at": now,
        });
        if let Some(user_id) = user_id {
            row["user_id"] = json!(user_id);
        }

        let response = self
            .authed(self.client.post(self.table_url("conversations")))
            .header("Prefer", "return=minimal")
            .json(&row)
            .send()
            .await
            .context("대화 생성 요청 실패")?;

        Self::expect_success(response, "대화 생성").await?;

        tracing::info!(conversation_id, "새 대화 생성");
        Ok(conversation_id)
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        sources: Option<&[Citation]>,
    ) -> Result<String> {
        let message_id = Uuid::new_v4().to_string();

        let mut row = json!({
            "id": message_id,
            "conversation_id": conversation_id,
            "role": role,
            "content": content,
            "created_at": Utc::now().to_rfc3339(),
        });
        if let Some(sources) = sources {
            row["sources"] = json!(sources);
        }

        let response = self
            .authed(self.client.post(self.table_url("messages")))
            .header("Prefer", "return=minimal")
            .json(&row)
            .send()
            .await
            .context("메시지 추가 요청 실패")?;

        Self::expect_success(response, "메시지 추가").await?;

        self.touch_conversation(conversation_id).await?;

        Ok(message_id)
    }

    async fn get_messages(
        &self,
        conversation_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<StoredMessage>> {
        let mut query = vec![
            ("select", "*".to_string()),
            ("conversation_id", format!("eq.{}", conversation_id)),
            ("order", "created_at.asc".to_string()),
        ];
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }

        let result: Result<Vec<StoredMessage>> = async {
            let response = self
                .authed(self.client.get(self.table_url("messages")))
                .query(&query)
                .send()
                .await
                .context("메시지 조회 요청 실패")?;

            let body = Self::expect_success(response, "메시지 조회").await?;
            serde_json::from_str(&body).context("메시지 응답 파싱 실패")
        }
        .await;

        // 조회 실패는 빈 목록으로 강등
        match result {
            Ok(messages) => Ok(messages),
            Err(e) => {
                tracing::warn!(conversation_id, error = %e, "메시지 조회 실패");
                Ok(vec![])
            }
        }
    }

    async fn list_conversations(
        &self,
        user_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Conversation>> {
        let mut query = vec![
            ("select", "*".to_string()),
            ("order", "updated_at.desc".to_string()),
        ];
        if let Some(user_id) = user_id {
            query.push(("user_id", format!("eq.{}", user_id)));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }

        let result: Result<Vec<Conversation>> = async {
            let response = self
                .authed(self.client.get(self.table_url("conversations")))
                .query(&query)
                .send()
                .await
                .context("대화 목록 요청 실패")?;

            let body = Self::expect_success(response, "대화 목록 조회").await?;
            serde_json::from_str(&body).context("대화 목록 파싱 실패")
        }
        .await;

        match result {
            Ok(conversations) => Ok(conversations),
            Err(e) => {
                tracing::warn!(error = %e, "대화 목록 조회 실패");
                Ok(vec![])
            }
        }
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<bool> {
        let response = self
            .authed(self.client.delete(self.table_url("conversations")))
            .query(&[("id", format!("eq.{}", conversation_id))])
            .header("Prefer", "return=representation")
            .send()
            .await
            .context("대화 삭제 요청 실패")?;

        let body = Self::expect_success(response, "대화 삭제").await?;
        let deleted: Vec<Value> = serde_json::from_str(&body).unwrap_or_default();

        Ok(!deleted.is_empty())
    }

    async fn update_conversation(&self, conversation_id: &str, metadata: Value) -> Result<bool> {
        // 기존 메타데이터 조회 후 병합
        let response = self
            .authed(self.client.get(self.table_url("conversations")))
            .query(&[
                ("select", "metadata".to_string()),
                ("id", format!("eq.{}", conversation_id)),
            ])
            .send()
            .await
            .context("대화 조회 요청 실패")?;

        let body = Self::expect_success(response, "대화 조회").await?;
        let rows: Vec<Value> = serde_json::from_str(&body).unwrap_or_default();

        if rows.is_empty() {
            return Ok(false);
        }

        let existing = rows[0].get("metadata").cloned().unwrap_or(Value::Null);
        let merged = merge_metadata(existing, metadata);

        let response = self
            .authed(self.client.patch(self.table_url("conversations")))
            .query(&[("id", format!("eq.{}", conversation_id))])
            .header("Prefer", "return=minimal")
            .json(&json!({
                "metadata": merged,
                "updated_at": Utc::now().to_rfc3339(),
            }))
            .send()
            .await
            .context("대화 갱신 요청 실패")?;

        Self::expect_success(response, "대화 갱신").await?;
        Ok(true)
    }
}

/// 기존 메타데이터와 새 메타데이터 병합
///
/// 둘 다 객체면 키 단위로 덮어쓰고, 아니면 새 값으로 교체합니다.
fn merge_metadata(existing: Value, incoming: Value) -> Value {
    match (existing, &incoming) {
        (Value::Object(mut base), Value::Object(update)) => {
            for (key, value) in update {
                base.insert(key.clone(), value.clone());
            }
            Value::Object(base)
        }
        (_, _) => incoming,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_metadata_objects() {
        let existing = json!({ "title": "옛 제목", "pinned": true });
        let incoming = json!({ "title": "새 제목" });

        let merged = merge_metadata(existing, incoming);
        assert_eq!(merged["title"], "새 제목");
        assert_eq!(merged["pinned"], true);
    }

    #[test]
    fn test_merge_metadata_replaces_non_object() {
        let merged = merge_metadata(Value::Null, json!({ "title": "제목" }));
        assert_eq!(merged["title"], "제목");
    }

    #[test]
    fn test_stored_message_role() {
        let message = StoredMessage {
            id: "m1".into(),
            conversation_id: "c1".into(),
            role: "assistant".into(),
            content: "답변".into(),
            sources: None,
            created_at: "2026-01-01T00:00:00Z".into(),
        };
        assert_eq!(message.role(), Role::Assistant);
    }

    #[test]
    fn test_message_row_deserialization() {
        let body = r#"[
            {"id": "m1", "conversation_id": "c1", "role": "user",
             "content": "창세기 1장", "created_at": "2026-01-01T00:00:00Z"},
            {"id": "m2", "conversation_id": "c1", "role": "assistant",
             "content": "답변", "created_at": "2026-01-01T00:00:01Z",
             "sources": [{"book": "창세기", "chapter": "1", "content": "태초에"}]}
        ]"#;

        let rows: Vec<StoredMessage> = serde_json::from_str(body).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].sources, None);
        let sources = rows[1].sources.as_ref().unwrap();
        assert_eq!(sources[0].book, "창세기");
        assert_eq!(sources[0].verse, None);
    }
}
