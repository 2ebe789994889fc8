//! Supabase 성경 청크 저장소
//!
//! PostgREST 필터 쿼리로 구조화 조회를, `match_documents` RPC로
//! 벡터 검색을 수행합니다.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;

use crate::config::Config;
use crate::ingest::{ChunkSink, EmbeddedChunk};
use crate::retrieval::{BibleStore, Passage};

/// Supabase 기반 성경 청크 저장소
pub struct SupabaseBibleStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    table_name: String,
}

impl SupabaseBibleStore {
    /// 새 저장소 클라이언트 생성
    pub fn new(base_url: String, api_key: String, table_name: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            table_name,
        })
    }

    /// 설정에서 생성
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.supabase_url.clone(),
            config.supabase_key.clone(),
            config.supabase_table_name.clone(),
        )
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table_name)
    }

    fn rpc_url(&self, function: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url, function)
    }

    /// 공통 인증 헤더 적용
    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn fetch_rows(&self, request: reqwest::RequestBuilder) -> Result<Vec<Passage>> {
        let response = request.send().await.context("Supabase 요청 실패")?;

        let status = response.status();
        let body = response.text().await.context("응답 본문 읽기 실패")?;

        if !status.is_success() {
            anyhow::bail!("Supabase error ({}): {}", status, body);
        }

        serde_json::from_str(&body).context("Supabase 응답 파싱 실패")
    }
}

#[async_trait]
impl BibleStore for SupabaseBibleStore {
    async fn select_by_book(&self, book: &str, limit: usize) -> Result<Vec<Passage>> {
        tracing::debug!(book, limit, "책 단위 조회");

        let request = self.authed(self.client.get(self.table_url())).query(&[
            ("select", "*".to_string()),
            ("book", format!("eq.{}", book)),
            ("order", "chapter.asc".to_string()),
            ("limit", limit.to_string()),
        ]);

        self.fetch_rows(request).await
    }

    async fn select_by_book_chapter(
        &self,
        book: &str,
        chapter: &str,
        limit: usize,
    ) -> Result<Vec<Passage>> {
        tracing::debug!(book, chapter, limit, "장 단위 조회");

        let request = self.authed(self.client.get(self.table_url())).query(&[
            ("select", "*".to_string()),
            ("book", format!("eq.{}", book)),
            ("chapter", format!("eq.{}", chapter)),
            ("limit", limit.to_string()),
        ]);

        self.fetch_rows(request).await
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        threshold: f32,
        count: usize,
    ) -> Result<Vec<Passage>> {
        tracing::debug!(threshold, count, "벡터 검색 (match_documents)");

        let request = self
            .authed(self.client.post(self.rpc_url("match_documents")))
            .json(&json!({
                "query_embedding": embedding,
                "match_threshold": threshold,
                "match_count": count,
            }));

        self.fetch_rows(request).await
    }
}

#[async_trait]
impl ChunkSink for SupabaseBibleStore {
    async fn insert_chunks(&self, rows: &[EmbeddedChunk]) -> Result<()> {
        tracing::debug!(rows = rows.len(), "청크 배치 삽입");

        let response = self
            .authed(self.client.post(self.table_url()))
            .header("Prefer", "return=minimal")
            .json(rows)
            .send()
            .await
            .context("Supabase 삽입 요청 실패")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Supabase error ({}): {}", status, body);
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SupabaseBibleStore {
        SupabaseBibleStore::new(
            "https://example.supabase.co/".to_string(),
            "anon-key".to_string(),
            "bible_chunks".to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_table_url_strips_trailing_slash() {
        assert_eq!(
            store().table_url(),
            "https://example.supabase.co/rest/v1/bible_chunks"
        );
    }

    #[test]
    fn test_rpc_url() {
        assert_eq!(
            store().rpc_url("match_documents"),
            "https://example.supabase.co/rest/v1/rpc/match_documents"
        );
    }

    #[test]
    fn test_row_deserialization() {
        let body = r#"[
            {"book": "창세기", "chapter": "1", "verse": "1",
             "content": "태초에 하나님이 천지를 창조하시니라", "similarity": 0.82},
            {"book": "역대상", "chapter": "1", "content": "아담의 계보"}
        ]"#;

        let rows: Vec<Passage> = serde_json::from_str(body).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].similarity, Some(0.82));
        assert_eq!(rows[1].verse, "");
        assert_eq!(rows[1].similarity, None);
    }
}
