use crate::error::{ExecutionError, ExecutionErrorKind};

/// lexical pre-check run before any sql reaches the engine: exactly one
/// statement, and it must start with SELECT or WITH
pub fn check_read_only(sql: &str) -> Result<(), ExecutionError> {
    let mut chars = sql.chars().peekable();
    let mut code = String::with_capacity(sql.len());
    let mut statements = 0usize;
    let mut current_has_code = false;

    while let Some(c) = chars.next() {
        match c {
            '-' if chars.peek() == Some(&'-') => {
                for n in chars.by_ref() {
                    if n == '\n' {
                        break;
                    }
                }
                code.push(' ');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for n in chars.by_ref() {
                    if prev == '*' && n == '/' {
                        break;
                    }
                    prev = n;
                }
                code.push(' ');
            }
            '\'' | '"' | '`' | '[' => {
                let close = if c == '[' { ']' } else { c };
                // a doubled quote just reopens the literal on the next pass
                for n in chars.by_ref() {
                    if n == close {
                        break;
                    }
                }
                code.push('?');
                current_has_code = true;
            }
            ';' => {
                if current_has_code {
                    statements += 1;
                    current_has_code = false;
                }
                code.push(' ');
            }
            other => {
                if !other.is_whitespace() {
                    if statements > 0 && !current_has_code {
                        // text after a terminated statement
                        return Err(ExecutionError::unsafe_statement(
                            "only a single sql statement is allowed",
                        ));
                    }
                    current_has_code = true;
                }
                code.push(other);
            }
        }
    }

    if current_has_code {
        statements += 1;
    }

    if statements > 1 {
        return Err(ExecutionError::unsafe_statement(
            "only a single sql statement is allowed",
        ));
    }

    if statements == 0 {
        return Err(ExecutionError::new(
            ExecutionErrorKind::Syntax,
            "empty sql statement",
        ));
    }

    let keyword: String = code
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_uppercase();

    match keyword.as_str() {
        "SELECT" | "WITH" => Ok(()),
        "" => Err(ExecutionError::unsafe_statement(
            "only SELECT or WITH queries are allowed",
        )),
        other => Err(ExecutionError::unsafe_statement(format!(
            "only SELECT or WITH queries are allowed, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(sql: &str) -> Option<ExecutionErrorKind> {
        check_read_only(sql).err().map(|e| e.kind)
    }

    #[test]
    fn test_select_and_with_pass() {
        assert!(check_read_only("SELECT * FROM flights").is_ok());
        assert!(check_read_only("  select 1;").is_ok());
        assert!(check_read_only("WITH x AS (SELECT 1) SELECT * FROM x").is_ok());
        assert!(check_read_only("-- cheapest\n/* note */ SELECT 1 -- trailing").is_ok());
    }

    #[test]
    fn test_writes_rejected() {
        assert_eq!(kind("DROP TABLE x"), Some(ExecutionErrorKind::Unsafe));
        assert_eq!(kind("delete from flights"), Some(ExecutionErrorKind::Unsafe));
        assert_eq!(kind("PRAGMA query_only = OFF"), Some(ExecutionErrorKind::Unsafe));
        assert_eq!(kind("ATTACH 'x.db' AS x"), Some(ExecutionErrorKind::Unsafe));
    }

    #[test]
    fn test_multiple_statements_rejected() {
        assert_eq!(
            kind("SELECT 1; DROP TABLE flights"),
            Some(ExecutionErrorKind::Unsafe)
        );
        assert_eq!(kind("SELECT 1;;SELECT 2"), Some(ExecutionErrorKind::Unsafe));
    }

    #[test]
    fn test_semicolons_inside_literals_and_comments_ignored() {
        assert!(check_read_only("SELECT ';DROP TABLE x' AS s").is_ok());
        assert!(check_read_only("SELECT \"a;b\" FROM t").is_ok());
        assert!(check_read_only("SELECT 'it''s; fine'").is_ok());
        assert!(check_read_only("SELECT 1; -- done; really").is_ok());
        assert!(check_read_only("SELECT 1 /* ; */").is_ok());
    }

    #[test]
    fn test_empty_is_syntax_error() {
        assert_eq!(kind("   "), Some(ExecutionErrorKind::Syntax));
        assert_eq!(kind("-- nothing"), Some(ExecutionErrorKind::Syntax));
    }
}
