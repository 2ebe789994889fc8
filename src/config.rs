//! 설정 모듈 - 환경변수 기반 서비스 설정
//!
//! Supabase / Gemini 접속 정보와 서버 설정을 환경변수에서 읽습니다.
//! 필수 값이 없으면 설정 방법을 안내하는 에러를 반환합니다.

use anyhow::{Context, Result};

/// 기본 임베딩 차원 (gemini-embedding-001, output_dimensionality로 축소)
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;

/// 애플리케이션 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// Supabase 프로젝트 URL
    pub supabase_url: String,
    /// Supabase API 키 (anon 또는 service_role)
    pub supabase_key: String,
    /// 성경 청크 테이블 이름
    pub supabase_table_name: String,
    /// Gemini API 키
    pub gemini_api_key: String,
    /// 서버 바인드 호스트
    pub api_host: String,
    /// 서버 포트
    pub api_port: u16,
    /// CORS 허용 오리진 (콤마 구분)
    pub allowed_origins: String,
    /// 임베딩 모델 이름
    pub embedding_model: String,
    /// 임베딩 차원 (768, 1536, 3072 중 선택)
    pub embedding_dimension: usize,
    /// LLM 모델 이름
    pub llm_model: String,
}

impl Config {
    /// 환경변수에서 설정 로드
    pub fn from_env() -> Result<Self> {
        let supabase_url = std::env::var("SUPABASE_URL")
            .context("SUPABASE_URL이 설정되지 않았습니다. .env 파일을 확인하세요.")?;
        let supabase_key = std::env::var("SUPABASE_KEY")
            .context("SUPABASE_KEY가 설정되지 않았습니다. .env 파일을 확인하세요.")?;
        let gemini_api_key = get_api_key()?;

        let api_port = match std::env::var("API_PORT") {
            Ok(p) => p.parse().context("API_PORT는 숫자여야 합니다")?,
            Err(_) => 8000,
        };

        let embedding_dimension = match std::env::var("EMBEDDING_DIMENSION") {
            Ok(d) => d.parse().context("EMBEDDING_DIMENSION은 숫자여야 합니다")?,
            Err(_) => DEFAULT_EMBEDDING_DIMENSION,
        };

        Ok(Self {
            supabase_url,
            supabase_key,
            supabase_table_name: env_or("SUPABASE_TABLE_NAME", "bible_chunks"),
            gemini_api_key,
            api_host: env_or("API_HOST", "localhost"),
            api_port,
            allowed_origins: env_or("ALLOWED_ORIGINS", "http://localhost:3000"),
            embedding_model: env_or("EMBEDDING_MODEL", "models/gemini-embedding-001"),
            embedding_dimension,
            llm_model: env_or("LLM_MODEL", "gemini-2.0-flash"),
        })
    }

    /// 허용된 오리진 리스트 반환
    pub fn allowed_origins_list(&self) -> Vec<String> {
        self.allowed_origins
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect()
    }
}

/// 환경변수 또는 기본값
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

// ============================================================================
// API Key Management
// ============================================================================

/// Gemini API 키 로드 (환경변수에서)
///
/// 우선순위:
/// 1. `GEMINI_API_KEY` 환경변수
/// 2. `GOOGLE_AI_API_KEY` 환경변수
pub fn get_api_key() -> Result<String> {
    if let Ok(key) = std::env::var("GEMINI_API_KEY") {
        if !key.is_empty() {
            return Ok(key);
        }
    }

    if let Ok(key) = std::env::var("GOOGLE_AI_API_KEY") {
        if !key.is_empty() {
            return Ok(key);
        }
    }

    anyhow::bail!(
        "API key not found. Set GEMINI_API_KEY or GOOGLE_AI_API_KEY environment variable.\n\
         Get your API key at: https://aistudio.google.com/app/apikey"
    )
}

/// API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    get_api_key().is_ok()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_default() {
        assert_eq!(env_or("BIBLE_QA_NONEXISTENT_VAR", "fallback"), "fallback");
    }

    #[test]
    fn test_allowed_origins_list() {
        let config = Config {
            supabase_url: "https://x.supabase.co".into(),
            supabase_key: "key".into(),
            supabase_table_name: "bible_chunks".into(),
            gemini_api_key: "key".into(),
            api_host: "localhost".into(),
            api_port: 8000,
            allowed_origins: "http://localhost:3000, https://example.com".into(),
            embedding_model: "models/gemini-embedding-001".into(),
            embedding_dimension: 1536,
            llm_model: "gemini-2.0-flash".into(),
        };

        let origins = config.allowed_origins_list();
        assert_eq!(origins.len(), 2);
        assert_eq!(origins[0], "http://localhost:3000");
        assert_eq!(origins[1], "https://example.com");
    }
}
