//! Read-only SQL validation (spec.md §6 SQL read safety, §9 Open Question 3).
//!
//! A hard keyword-blacklist filter, exactly as the source does it. This is
//! intentionally conservative and explicitly **not** a security boundary —
//! it does not replace parameterized queries or a least-privilege DB role.
//! It exists only to keep the browser SQL passthrough (spec.md §4.H
//! `sql_query`/`get_options`) from accepting obviously-mutating statements.

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "TRUNCATE", "ALTER", "GRANT", "REVOKE", "EXECUTE",
    "CREATE",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlRejection {
    NotReadOnlyPrefix,
    ForbiddenKeyword(String),
    TrailingStatement,
}

impl std::fmt::Display for SqlRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlRejection::NotReadOnlyPrefix => {
                write!(f, "query must start with SELECT or WITH")
            }
            SqlRejection::ForbiddenKeyword(kw) => write!(f, "query contains forbidden keyword: {kw}"),
            SqlRejection::TrailingStatement => write!(f, "query contains a trailing statement"),
        }
    }
}

/// Validate that `query` is plausibly read-only. See module docs: not a
/// security boundary.
pub fn validate_read_only(query: &str) -> Result<(), SqlRejection> {
    let trimmed = query.trim();
    let upper = trimmed.to_uppercase();

    if !(upper.starts_with("SELECT") || upper.starts_with("WITH")) {
        return Err(SqlRejection::NotReadOnlyPrefix);
    }

    for keyword in FORBIDDEN_KEYWORDS {
        if contains_whole_word(&upper, keyword) {
            return Err(SqlRejection::ForbiddenKeyword((*keyword).to_owned()));
        }
    }

    let without_trailing_semicolon = trimmed.trim_end().trim_end_matches(';');
    if without_trailing_semicolon.contains(';') {
        return Err(SqlRejection::TrailingStatement);
    }

    Ok(())
}

fn contains_whole_word(haystack: &str, word: &str) -> bool {
    let bytes = haystack.as_bytes();
    let word_bytes = word.as_bytes();
    let is_word_char = |b: u8| b.is_ascii_alphanumeric() || b == b'_';

    let mut start = 0;
    while let Some(pos) = haystack[start..].find(word) {
        let abs = start + pos;
        let before_ok = abs == 0 || !is_word_char(bytes[abs - 1]);
        let after = abs + word_bytes.len();
        let after_ok = after >= bytes.len() || !is_word_char(bytes[after]);
        if before_ok && after_ok {
            return true;
        }
        start = abs + 1;
        if start >= haystack.len() {
            break;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_select() {
        assert!(validate_read_only("SELECT * FROM devices").is_ok());
    }

    #[test]
    fn accepts_with_cte() {
        assert!(validate_read_only("WITH x AS (SELECT 1) SELECT * FROM x").is_ok());
    }

    #[test]
    fn rejects_non_select_prefix() {
        assert_eq!(
            validate_read_only("EXPLAIN SELECT 1"),
            Err(SqlRejection::NotReadOnlyPrefix)
        );
    }

    #[test]
    fn rejects_embedded_insert() {
        assert_eq!(
            validate_read_only("SELECT 1; INSERT INTO devices VALUES ('x')"),
            Err(SqlRejection::TrailingStatement),
        );
    }

    #[test]
    fn rejects_forbidden_keyword_as_whole_word_only() {
        assert_eq!(
            validate_read_only("SELECT * FROM devices WHERE DROP = 'not a keyword column'"),
            Err(SqlRejection::ForbiddenKeyword("DROP".to_owned())),
        );
        // "update_count" should not false-positive on UPDATE as a whole word.
        assert!(validate_read_only("SELECT update_count FROM stream_metrics").is_ok());
    }

    #[test]
    fn rejects_trailing_statement_after_semicolon() {
        assert_eq!(
            validate_read_only("SELECT 1; SELECT 2"),
            Err(SqlRejection::TrailingStatement)
        );
    }

    #[test]
    fn allows_single_trailing_semicolon() {
        assert!(validate_read_only("SELECT * FROM devices;").is_ok());
    }
}
