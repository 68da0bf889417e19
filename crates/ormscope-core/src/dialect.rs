//! SQL dialects understood by the compiler.

use serde::{Deserialize, Serialize};

/// Words that must be quoted when used as identifiers.
const RESERVED_WORDS: &[&str] = &[
    "all", "and", "as", "asc", "between", "by", "case", "check", "column", "constraint",
    "create", "default", "delete", "desc", "distinct", "drop", "else", "end", "exists",
    "foreign", "from", "group", "having", "in", "index", "insert", "into", "is", "join", "key",
    "like", "limit", "not", "null", "offset", "on", "or", "order", "primary", "references",
    "returning", "select", "set", "table", "then", "to", "union", "unique", "update", "user",
    "values", "when", "where",
];

/// SQL dialect for generating dialect-specific SQL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    /// Generic rendering with named `:name` placeholders.
    #[default]
    Default,
    /// SQLite dialect (uses ?1, ?2 placeholders)
    Sqlite,
    /// PostgreSQL dialect (uses $1, $2 placeholders)
    Postgres,
}

impl Dialect {
    /// Render the placeholder for a bind parameter.
    ///
    /// `index` is 1-based and is used by positional dialects; `name` is the
    /// bind's resolved name and is used by `Default`.
    pub fn placeholder(self, index: usize, name: &str) -> String {
        match self {
            Dialect::Default => format!(":{name}"),
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Postgres => format!("${index}"),
        }
    }

    /// Whether placeholders are positional, so binds are ordered by appearance.
    pub const fn is_positional(self) -> bool {
        !matches!(self, Dialect::Default)
    }

    /// Whether `INSERT .. RETURNING` is understood.
    pub const fn supports_returning(self) -> bool {
        true
    }

    /// Quote an identifier, escaping embedded quotes by doubling them.
    pub fn quote_identifier(self, name: &str) -> String {
        let escaped = name.replace('"', "\"\"");
        format!("\"{}\"", escaped)
    }

    /// Quote an identifier only if it would not parse bare.
    ///
    /// Lower-case ASCII identifiers that are not reserved words render
    /// as-is; anything else is quoted.
    pub fn format_identifier(self, name: &str) -> String {
        if requires_quotes(name) {
            self.quote_identifier(name)
        } else {
            name.to_string()
        }
    }
}

fn requires_quotes(name: &str) -> bool {
    let mut chars = name.chars();
    let legal_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    if !legal_start {
        return true;
    }
    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '$') {
        return true;
    }
    RESERVED_WORDS.binary_search(&name).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_words_are_sorted() {
        let mut sorted = RESERVED_WORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, RESERVED_WORDS);
    }

    #[test]
    fn placeholders_per_dialect() {
        assert_eq!(Dialect::Default.placeholder(2, "y_2"), ":y_2");
        assert_eq!(Dialect::Sqlite.placeholder(2, "y_2"), "?2");
        assert_eq!(Dialect::Postgres.placeholder(2, "y_2"), "$2");
        assert!(!Dialect::Default.is_positional());
        assert!(Dialect::Sqlite.is_positional());
    }

    #[test]
    fn identifiers_quoted_only_when_needed() {
        let d = Dialect::Default;
        assert_eq!(d.format_identifier("test_table"), "test_table");
        assert_eq!(d.format_identifier("user"), "\"user\"");
        assert_eq!(d.format_identifier("Users"), "\"Users\"");
        assert_eq!(d.format_identifier("my col"), "\"my col\"");
        assert_eq!(d.format_identifier("1abc"), "\"1abc\"");
        assert_eq!(d.format_identifier("we\"ird"), "\"we\"\"ird\"");
    }
}
