//! 코퍼스 적재 모듈
//!
//! Zefania XML 성경 파일을 장 단위 문서로 파싱하고, 청크로 분할한 뒤
//! RETRIEVAL_DOCUMENT 임베딩을 붙여 성경 청크 테이블에 배치
//! 업로드합니다. 서빙 경로와 달리 일회성 오프라인 작업입니다.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Serialize;

use crate::bible::KOREAN_BOOK_NAMES;
use crate::embedding::EmbeddingProvider;

/// 청크 최대 크기 (문자 수)
const CHUNK_MAX_CHARS: usize = 500;

/// 인접 청크 간 오버랩 (문자 수)
const CHUNK_OVERLAP_CHARS: usize = 50;

/// 기본 업로드 배치 크기
pub const DEFAULT_BATCH_SIZE: usize = 100;

// ============================================================================
// Types
// ============================================================================

/// 장 단위 문서 (XML 파싱 결과)
///
/// 절 텍스트는 `"절번호:본문"` 형태로 공백 결합됩니다.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterDoc {
    pub book: String,
    pub chapter: String,
    pub content: String,
}

/// 임베딩이 붙은 업로드 행
///
/// 장 단위 청크이므로 `verse`는 항상 빈 문자열입니다.
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddedChunk {
    pub book: String,
    pub chapter: String,
    pub verse: String,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// 적재 결과 통계
#[derive(Debug, Default, Clone, Copy)]
pub struct IngestStats {
    /// 분할된 전체 청크 수
    pub total_chunks: usize,
    /// 업로드된 청크 수
    pub uploaded: usize,
    /// 임베딩 또는 업로드 실패 청크 수
    pub failed: usize,
}

// ============================================================================
// ChunkSink Trait
// ============================================================================

/// 청크 업로드 대상 인터페이스
#[async_trait]
pub trait ChunkSink: Send + Sync {
    /// 임베딩된 청크 배치 삽입
    async fn insert_chunks(&self, rows: &[EmbeddedChunk]) -> Result<()>;
}

// ============================================================================
// XML Parsing
// ============================================================================

/// Zefania XML 성경 파싱
///
/// `BIBLEBOOK`(bnumber) > `CHAPTER`(cnumber) > `VERS`(vnumber) 구조를
/// 순회하며 장마다 하나의 문서를 만듭니다. `bnumber`가 66권 범위를
/// 벗어나면 `bname` 속성을 그대로 사용합니다. 빈 절은 건너뜁니다.
pub fn parse_zefania(xml: &str) -> Result<Vec<ChapterDoc>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut documents = Vec::new();
    let mut current_book = String::new();
    let mut current_chapter = String::new();
    let mut current_verse = String::new();
    let mut verses: Vec<String> = Vec::new();
    let mut in_verse = false;
    let mut verse_text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();

                match name.as_str() {
                    "BIBLEBOOK" => {
                        let mut bnumber = 0usize;
                        let mut bname = String::new();
                        for attr in e.attributes().flatten() {
                            let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                            let value = String::from_utf8_lossy(&attr.value).to_string();
                            match key.as_str() {
                                "bnumber" => bnumber = value.parse().unwrap_or(0),
                                "bname" => bname = value,
                                _ => {}
                            }
                        }
                        current_book = book_name(bnumber, &bname);
                    }
                    "CHAPTER" => {
                        current_chapter = attr_value(&e, "cnumber").unwrap_or_default();
                        verses.clear();
                    }
                    "VERS" => {
                        current_verse = attr_value(&e, "vnumber").unwrap_or_default();
                        verse_text.clear();
                        in_verse = true;
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                if in_verse {
                    verse_text = e.xml_content().unwrap_or_default().trim().to_string();
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();

                match name.as_str() {
                    "VERS" => {
                        if !verse_text.is_empty() {
                            verses.push(format!("{}:{}", current_verse, verse_text));
                        }
                        in_verse = false;
                    }
                    "CHAPTER" => {
                        if !verses.is_empty() {
                            documents.push(ChapterDoc {
                                book: current_book.clone(),
                                chapter: current_chapter.clone(),
                                content: verses.join(" "),
                            });
                        }
                        verses.clear();
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e).context("XML 파싱 실패"),
            _ => {}
        }
    }

    tracing::info!(chapters = documents.len(), "XML 파싱 완료");
    Ok(documents)
}

/// 책 번호를 정식 한국어 이름으로 변환 (범위 밖이면 bname 사용)
fn book_name(bnumber: usize, bname: &str) -> String {
    KOREAN_BOOK_NAMES
        .get(bnumber.wrapping_sub(1))
        .map(|n| n.to_string())
        .unwrap_or_else(|| bname.to_string())
}

/// 시작 태그에서 속성 값 추출
fn attr_value(e: &quick_xml::events::BytesStart, key: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key.as_bytes())
        .map(|a| String::from_utf8_lossy(&a.value).to_string())
}

// ============================================================================
// Chunking
// ============================================================================

/// 장 본문을 청크로 분할
///
/// 단어 경계에서 최대 500자까지 누적하고, 다음 청크는 이전 청크의
/// 끝 50자 가량을 단어 경계에 맞춰 앞에 이어받습니다.
pub fn chunk_content(content: &str) -> Vec<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return vec![];
    }
    if trimmed.chars().count() <= CHUNK_MAX_CHARS {
        return vec![trimmed.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for word in trimmed.split_whitespace() {
        let word_chars = word.chars().count();
        let current_chars = current.chars().count();

        if !current.is_empty() && current_chars + word_chars + 1 > CHUNK_MAX_CHARS {
            let overlap = tail_on_word_boundary(&current, CHUNK_OVERLAP_CHARS);
            chunks.push(current);
            current = overlap;
        }

        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// 문자열 끝에서 최대 `max_chars` 길이의 단어 경계 꼬리 추출
fn tail_on_word_boundary(s: &str, max_chars: usize) -> String {
    let total = s.chars().count();
    if total <= max_chars {
        return s.to_string();
    }

    let tail: String = s.chars().skip(total - max_chars).collect();

    // 단어 중간에서 시작하지 않도록 첫 공백 뒤로 이동
    match tail.find(char::is_whitespace) {
        Some(pos) => tail[pos..].trim_start().to_string(),
        None => tail,
    }
}

// ============================================================================
// Ingestor
// ============================================================================

/// 적재 파이프라인
///
/// 장 문서를 청크로 분할하고, 문서 임베딩을 붙여 배치 단위로
/// 업로드합니다. 개별 청크의 임베딩 실패와 배치 업로드 실패는
/// 로그만 남기고 다음으로 진행합니다.
pub struct Ingestor {
    embedder: Arc<dyn EmbeddingProvider>,
    sink: Arc<dyn ChunkSink>,
    batch_size: usize,
}

impl Ingestor {
    /// 새 파이프라인 생성
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        sink: Arc<dyn ChunkSink>,
        batch_size: usize,
    ) -> Self {
        Self {
            embedder,
            sink,
            batch_size: batch_size.max(1),
        }
    }

    /// 장 문서 목록 적재
    pub async fn ingest(&self, documents: &[ChapterDoc]) -> Result<IngestStats> {
        let chunks: Vec<ChapterDoc> = documents
            .iter()
            .flat_map(|doc| {
                chunk_content(&doc.content).into_iter().map(|content| ChapterDoc {
                    book: doc.book.clone(),
                    chapter: doc.chapter.clone(),
                    content,
                })
            })
            .collect();

        let mut stats = IngestStats {
            total_chunks: chunks.len(),
            ..Default::default()
        };
        tracing::info!(chunks = stats.total_chunks, "청크 분할 완료");

        for batch in chunks.chunks(self.batch_size) {
            let mut rows = Vec::with_capacity(batch.len());

            for chunk in batch {
                match self.embedder.embed_document(&chunk.content).await {
                    Ok(embedding) => rows.push(EmbeddedChunk {
                        book: chunk.book.clone(),
                        chapter: chunk.chapter.clone(),
                        verse: String::new(),
                        content: chunk.content.clone(),
                        embedding,
                    }),
                    Err(e) => {
                        tracing::warn!(
                            book = chunk.book,
                            chapter = chunk.chapter,
                            error = %e,
                            "임베딩 생성 실패, 청크 건너뜀"
                        );
                        stats.failed += 1;
                    }
                }
            }

            if rows.is_empty() {
                continue;
            }

            match self.sink.insert_chunks(&rows).await {
                Ok(_) => {
                    stats.uploaded += rows.len();
                    tracing::info!(
                        uploaded = stats.uploaded,
                        total = stats.total_chunks,
                        "업로드 진행"
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, "배치 업로드 실패");
                    stats.failed += rows.len();
                }
            }
        }

        Ok(stats)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::*;

    const SAMPLE_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<XMLBIBLE>
  <BIBLEBOOK bnumber="1" bname="Genesis">
    <CHAPTER cnumber="1">
      <VERS vnumber="1">태초에 하나님이 천지를 창조하시니라</VERS>
      <VERS vnumber="2">땅이 혼돈하고 공허하며</VERS>
      <VERS vnumber="3"></VERS>
    </CHAPTER>
    <CHAPTER cnumber="2">
      <VERS vnumber="1">천지와 만물이 다 이루니라</VERS>
    </CHAPTER>
  </BIBLEBOOK>
  <BIBLEBOOK bnumber="99" bname="외경">
    <CHAPTER cnumber="1">
      <VERS vnumber="1">본문</VERS>
    </CHAPTER>
  </BIBLEBOOK>
</XMLBIBLE>"#;

    #[test]
    fn parses_chapters_with_verse_prefixes() {
        let docs = parse_zefania(SAMPLE_XML).unwrap();

        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0].book, "창세기");
        assert_eq!(docs[0].chapter, "1");
        assert_eq!(
            docs[0].content,
            "1:태초에 하나님이 천지를 창조하시니라 2:땅이 혼돈하고 공허하며"
        );
        assert_eq!(docs[1].chapter, "2");
    }

    #[test]
    fn unknown_book_number_falls_back_to_bname() {
        let docs = parse_zefania(SAMPLE_XML).unwrap();
        assert_eq!(docs[2].book, "외경");
    }

    #[test]
    fn empty_verses_are_skipped() {
        let docs = parse_zefania(SAMPLE_XML).unwrap();
        assert!(!docs[0].content.contains("3:"));
    }

    #[test]
    fn short_content_is_single_chunk() {
        let chunks = chunk_content("1:태초에 하나님이 천지를 창조하시니라");
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn empty_content_yields_no_chunks() {
        assert!(chunk_content("   ").is_empty());
    }

    #[test]
    fn long_content_splits_with_overlap() {
        // 12자 단어 50개 = 공백 포함 649자, 최대 500자 초과
        let words: Vec<String> = (0..50)
            .map(|i| format!("단어단어단어단어단어{:02}", i))
            .collect();
        let content = words.join(" ");

        let chunks = chunk_content(&content);

        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            // 오버랩 이월분을 감안해도 최대 크기를 크게 넘지 않아야 함
            assert!(chunk.chars().count() <= CHUNK_MAX_CHARS + CHUNK_OVERLAP_CHARS);
        }

        // 두 번째 청크는 첫 청크 끝부분의 단어로 시작하고 (오버랩 이월),
        // 끝은 새로운 단어여야 함 (단어는 모두 고유)
        let carried = chunks[1].split_whitespace().next().unwrap();
        let advanced = chunks[1].split_whitespace().last().unwrap();
        assert!(chunks[0].contains(carried));
        assert!(!chunks[0].contains(advanced));
    }

    #[test]
    fn tail_respects_word_boundary() {
        let tail = tail_on_word_boundary("가나다 라마바 사아자", 7);
        assert_eq!(tail, "사아자");
    }

    // ------------------------------------------------------------------------

    /// 호출 기록용 모의 임베더
    struct RecordingEmbedder {
        fail_all: bool,
        texts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EmbeddingProvider for RecordingEmbedder {
        async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            if self.fail_all {
                anyhow::bail!("quota exceeded");
            }
            self.texts.lock().unwrap().push(text.to_string());
            Ok(vec![0.5; 4])
        }

        fn dimension(&self) -> usize {
            4
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    /// 배치를 수집하는 모의 싱크
    #[derive(Default)]
    struct CollectingSink {
        fail: AtomicBool,
        batches: Mutex<Vec<Vec<EmbeddedChunk>>>,
    }

    #[async_trait]
    impl ChunkSink for CollectingSink {
        async fn insert_chunks(&self, rows: &[EmbeddedChunk]) -> anyhow::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("insert failed");
            }
            self.batches.lock().unwrap().push(rows.to_vec());
            Ok(())
        }
    }

    fn chapter(book: &str, chapter_num: &str, content: &str) -> ChapterDoc {
        ChapterDoc {
            book: book.to_string(),
            chapter: chapter_num.to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn ingest_uploads_in_batches() {
        let embedder = Arc::new(RecordingEmbedder {
            fail_all: false,
            texts: Mutex::new(vec![]),
        });
        let sink = Arc::new(CollectingSink::default());
        let ingestor = Ingestor::new(embedder.clone(), sink.clone(), 2);

        let docs = vec![
            chapter("창세기", "1", "1:태초에"),
            chapter("창세기", "2", "1:천지와"),
            chapter("창세기", "3", "1:뱀이"),
        ];

        let stats = ingestor.ingest(&docs).await.unwrap();

        assert_eq!(stats.total_chunks, 3);
        assert_eq!(stats.uploaded, 3);
        assert_eq!(stats.failed, 0);

        let batches = sink.batches.lock().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].len(), 1);

        // 장 단위 청크이므로 절은 항상 빔, 임베딩 부착 확인
        assert_eq!(batches[0][0].verse, "");
        assert_eq!(batches[0][0].embedding.len(), 4);
    }

    #[tokio::test]
    async fn ingest_skips_failed_embeddings() {
        let embedder = Arc::new(RecordingEmbedder {
            fail_all: true,
            texts: Mutex::new(vec![]),
        });
        let sink = Arc::new(CollectingSink::default());
        let ingestor = Ingestor::new(embedder, sink.clone(), 10);

        let stats = ingestor
            .ingest(&[chapter("창세기", "1", "1:태초에")])
            .await
            .unwrap();

        assert_eq!(stats.uploaded, 0);
        assert_eq!(stats.failed, 1);
        assert!(sink.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn ingest_counts_failed_batch_upload() {
        let embedder = Arc::new(RecordingEmbedder {
            fail_all: false,
            texts: Mutex::new(vec![]),
        });
        let sink = Arc::new(CollectingSink::default());
        sink.fail.store(true, Ordering::SeqCst);
        let ingestor = Ingestor::new(embedder, sink.clone(), 10);

        let stats = ingestor
            .ingest(&[chapter("창세기", "1", "1:태초에")])
            .await
            .unwrap();

        assert_eq!(stats.uploaded, 0);
        assert_eq!(stats.failed, 1);
    }
}
