//! POSIX shell quoting for remote command lines.
//!
//! Every path or argument interpolated into a command sent over the
//! transport goes through [`quote`].

/// Quote `s` as a single POSIX shell word.
///
/// Plain words are returned bare; anything else is wrapped in single quotes
/// with embedded single quotes written as `'\''`.
pub fn quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ',' | ':' | '@' | '%' | '+' | '='))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Split a command line built from [`quote`]d words back into words.
///
/// Understands single quotes, double quotes and backslash escapes outside
/// quotes; returns `None` on an unterminated quote. Shell operators such as
/// `&&` come back as ordinary words.
pub fn split(line: &str) -> Option<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next()? {
                        '\'' => break,
                        other => current.push(other),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next()? {
                        '"' => break,
                        '\\' => current.push(chars.next()?),
                        other => current.push(other),
                    }
                }
            }
            '\\' => {
                in_word = true;
                current.push(chars.next()?);
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            other => {
                in_word = true;
                current.push(other);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Some(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_words_stay_bare() {
        assert_eq!(quote("/srv/rcall/session-1/app.bin"), "/srv/rcall/session-1/app.bin");
    }

    #[test]
    fn test_empty_string() {
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn test_spaces_and_metacharacters() {
        assert_eq!(quote("a b"), "'a b'");
        assert_eq!(quote("$(rm -rf /)"), "'$(rm -rf /)'");
        assert_eq!(quote("x;y|z&`w`"), "'x;y|z&`w`'");
    }

    #[test]
    fn test_embedded_single_quote() {
        assert_eq!(quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn test_split_inverts_quote() {
        let words = vec![
            "cd".to_string(),
            "/srv/my dir".to_string(),
            "it's \"quoted\"".to_string(),
            "".to_string(),
            "a\nb".to_string(),
            "$HOME;ls".to_string(),
        ];
        let cmdline = words.iter().map(|w| quote(w)).collect::<Vec<_>>().join(" ");
        assert_eq!(split(&cmdline).unwrap(), words);
    }

    #[test]
    fn test_split_unterminated_quote() {
        assert_eq!(split("echo 'oops"), None);
    }
}
