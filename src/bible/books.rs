//! 성경 66권 정식 책 이름 목록 (개역한글판)

/// 한국어 성경 책 이름 목록 (창세기 ~ 요한계시록 순)
pub const KOREAN_BOOK_NAMES: [&str; 66] = [
    "창세기", "출애굽기", "레위기", "민수기", "신명기",
    "여호수아", "사사기", "룻기", "사무엘상", "사무엘하",
    "열왕기상", "열왕기하", "역대상", "역대하", "에스라",
    "느헤미야", "에스더", "욥기", "시편", "잠언",
    "전도서", "아가", "이사야", "예레미야", "예레미야애가",
    "에스겔", "다니엘", "호세아", "요엘", "아모스",
    "오바댜", "요나", "미가", "나훔", "하박국",
    "스바냐", "학개", "스가랴", "말라기",
    "마태복음", "마가복음", "누가복음", "요한복음", "사도행전",
    "로마서", "고린도전서", "고린도후서", "갈라디아서", "에베소서",
    "빌립보서", "골로새서", "데살로니가전서", "데살로니가후서", "디모데전서",
    "디모데후서", "디도서", "빌레몬서", "히브리서", "야고보서",
    "베드로전서", "베드로후서", "요한일서", "요한이서", "요한삼서",
    "유다서", "요한계시록",
];

/// 긴 이름 우선으로 정렬된 책 목록
///
/// "역대상"이 "역대상하" 같은 더 긴 이름의 부분 문자열인 경우를 피하기 위해
/// 이름 길이 내림차순으로 매칭해야 합니다. (예: "예레미야" vs "예레미야애가")
pub fn canonical_books() -> Vec<&'static str> {
    let mut books: Vec<&'static str> = KOREAN_BOOK_NAMES.to_vec();
    books.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));
    books
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_count() {
        assert_eq!(KOREAN_BOOK_NAMES.len(), 66);
    }

    #[test]
    fn test_longest_first_ordering() {
        let books = canonical_books();

        // "예레미야애가"(6자)가 "예레미야"(4자)보다 먼저 와야 함
        let lamentations = books.iter().position(|b| *b == "예레미야애가").unwrap();
        let jeremiah = books.iter().position(|b| *b == "예레미야").unwrap();
        assert!(lamentations < jeremiah);
    }

    #[test]
    fn test_no_duplicates() {
        let mut books = KOREAN_BOOK_NAMES.to_vec();
        books.sort();
        books.dedup();
        assert_eq!(books.len(), 66);
    }
}
