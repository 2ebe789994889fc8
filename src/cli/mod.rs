//! CLI 모듈
//!
//! bible-qa CLI 명령어 정의 및 구현

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{has_api_key, Config};
use crate::embedding::GeminiEmbedding;
use crate::ingest::{parse_zefania, Ingestor, DEFAULT_BATCH_SIZE};
use crate::retrieval::{BibleStore, RetrievalRouter, Strategy, DEFAULT_LIMIT};
use crate::server;
use crate::storage::SupabaseBibleStore;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "bible-qa")]
#[command(version, about = "성경 QA 챗봇 서비스", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// HTTP API 서버 실행
    Serve {
        /// 바인드 호스트 (기본: API_HOST 환경변수)
        #[arg(long)]
        host: Option<String>,

        /// 바인드 포트 (기본: API_PORT 환경변수)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// 성경 XML 코퍼스를 벡터 DB에 적재
    Ingest {
        /// Zefania XML 성경 파일 경로
        #[arg(short, long)]
        file: PathBuf,

        /// 업로드 배치 크기
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
    },

    /// 검색 파이프라인 단건 실행 (디버그용)
    Query {
        /// 검색 쿼리
        query: String,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve { host, port } => cmd_serve(host, port).await,
        Commands::Ingest { file, batch_size } => cmd_ingest(&file, batch_size).await,
        Commands::Query { query, limit } => cmd_query(&query, limit).await,
        Commands::Status => cmd_status().await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 서버 실행 명령어 (serve)
async fn cmd_serve(host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut config = Config::from_env().context("설정 로드 실패")?;

    if let Some(host) = host {
        config.api_host = host;
    }
    if let Some(port) = port {
        config.api_port = port;
    }

    server::serve(config).await
}

/// 적재 명령어 (ingest)
///
/// XML 파싱 -> 청크 분할 -> 문서 임베딩 -> 배치 업로드.
async fn cmd_ingest(file: &PathBuf, batch_size: usize) -> Result<()> {
    // API 키 확인
    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             또는\n  \
             export GOOGLE_AI_API_KEY=your-api-key\n\n\
             API 키 발급: https://aistudio.google.com/app/apikey"
        );
    }

    let config = Config::from_env().context("설정 로드 실패")?;

    println!("[*] XML 파일 처리 중: {}", file.display());

    let xml = std::fs::read_to_string(file)
        .with_context(|| format!("XML 파일을 읽을 수 없습니다: {}", file.display()))?;

    let documents = parse_zefania(&xml)?;
    if documents.is_empty() {
        bail!("파싱된 문서가 없습니다");
    }
    println!("[*] 파싱 완료: {} 개의 장 문서", documents.len());

    let store = Arc::new(SupabaseBibleStore::from_config(&config)?);
    let embedder = Arc::new(GeminiEmbedding::from_config(&config)?);
    let ingestor = Ingestor::new(embedder, store, batch_size);

    println!("[*] 임베딩 생성 및 업로드 중 (배치 크기: {})...", batch_size);

    let stats = ingestor.ingest(&documents).await?;

    println!();
    println!(
        "[OK] 완료: 청크 {}, 업로드 {}, 실패 {}",
        stats.total_chunks, stats.uploaded, stats.failed
    );

    Ok(())
}

/// 검색 명령어 (query)
///
/// 답변 생성 없이 검색 파이프라인만 실행하여 어떤 전략이
/// 선택되었고 어떤 구절이 반환되는지 보여줍니다.
async fn cmd_query(query: &str, limit: usize) -> Result<()> {
    let config = Config::from_env().context("설정 로드 실패")?;

    println!("[*] 검색 중: \"{}\"", query);

    let store: Arc<dyn BibleStore> = Arc::new(SupabaseBibleStore::from_config(&config)?);
    let embedder = Arc::new(GeminiEmbedding::from_config(&config)?);
    let retriever = RetrievalRouter::new(store, embedder);

    let limit = if limit == 0 { DEFAULT_LIMIT } else { limit };
    let retrieval = retriever.retrieve(query, limit).await?;

    let strategy_str = match retrieval.strategy {
        Strategy::ExactChapter => "장 단위 조회",
        Strategy::WholeBook => "책 전체 조회",
        Strategy::Vector => "벡터 검색",
    };

    if retrieval.passages.is_empty() {
        println!("\n[!] {}", retrieval.text);
        return Ok(());
    }

    println!(
        "\n[OK] 검색 결과 ({} 건, 전략: {}):\n",
        retrieval.passages.len(),
        strategy_str
    );

    for (i, passage) in retrieval.passages.iter().enumerate() {
        let verse = if passage.verse.is_empty() {
            String::new()
        } else {
            format!("{}절", passage.verse)
        };

        println!(
            "{}. [{} {}장{}]",
            i + 1,
            passage.book,
            passage.chapter,
            verse
        );

        if let Some(similarity) = passage.similarity {
            println!("   유사도: {:.4}", similarity);
        }

        println!("   내용: {}", truncate_text(&passage.content, 200));
        println!();
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status() -> Result<()> {
    println!("bible-qa v{}", env!("CARGO_PKG_VERSION"));
    println!();

    // API 키 상태
    if has_api_key() {
        println!("[OK] Gemini API 키: 설정됨");
    } else {
        println!("[!] Gemini API 키: 미설정");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    // Supabase 설정 상태
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            println!("[!] 설정 불완전: {}", e);
            return Ok(());
        }
    };

    println!("[OK] Supabase URL: {}", config.supabase_url);
    println!("     테이블: {}", config.supabase_table_name);
    println!("     임베딩: {} ({}차원)", config.embedding_model, config.embedding_dimension);
    println!("     LLM: {}", config.llm_model);

    // 연결 확인 (창세기 1장 단건 조회)
    let store = SupabaseBibleStore::from_config(&config)?;
    match store.select_by_book_chapter("창세기", "1", 1).await {
        Ok(rows) => {
            if rows.is_empty() {
                println!("[!] Supabase 연결됨, 그러나 성경 데이터가 비어 있습니다");
            } else {
                println!("[OK] Supabase 연결 및 데이터 확인됨");
            }
        }
        Err(e) => {
            println!("[!] Supabase 연결 실패: {}", e);
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_truncate_unicode() {
        let korean = "태초에 하나님이 천지를 창조하시니라";
        let truncated = truncate_text(korean, 3);
        assert_eq!(truncated, "태초에...");
    }
}
