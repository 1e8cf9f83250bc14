//! SQL template parsing.
//!
//! A template is literal SQL text interleaved with `$KEY` placeholders
//! and the `$?` sanitized-literal marker. Keys are identifiers
//! (`[A-Za-z_][A-Za-z0-9_]*`); a `$` not followed by a key or `?` is
//! kept as literal text.

/// One parsed segment of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Span {
    Literal(String),
    Placeholder(String),
    /// The `$?` marker consuming one pre-sanitized literal.
    SanitizedLiteral,
}

/// Split a template into literal spans and placeholders.
pub fn parse_template(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut literal = String::new();
    let mut chars = text.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '$' {
            literal.push(c);
            continue;
        }
        match chars.peek() {
            Some(&(_, '?')) => {
                chars.next();
                flush(&mut spans, &mut literal);
                spans.push(Span::SanitizedLiteral);
            }
            Some(&(_, next)) if next.is_ascii_alphabetic() || next == '_' => {
                let mut key = String::new();
                while let Some(&(_, k)) = chars.peek() {
                    if k.is_ascii_alphanumeric() || k == '_' {
                        key.push(k);
                        chars.next();
                    } else {
                        break;
                    }
                }
                flush(&mut spans, &mut literal);
                spans.push(Span::Placeholder(key));
            }
            _ => literal.push('$'),
        }
    }
    flush(&mut spans, &mut literal);
    spans
}

fn flush(spans: &mut Vec<Span>, literal: &mut String) {
    if !literal.is_empty() {
        spans.push(Span::Literal(std::mem::take(literal)));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_one_literal() {
        let spans = parse_template("SELECT * FROM users");
        assert_eq!(spans, vec![Span::Literal("SELECT * FROM users".into())]);
    }

    #[test]
    fn placeholders_are_split_out() {
        let spans = parse_template("SELECT * FROM users $WHERE_CRITERIA $PAGINATION");
        assert_eq!(
            spans,
            vec![
                Span::Literal("SELECT * FROM users ".into()),
                Span::Placeholder("WHERE_CRITERIA".into()),
                Span::Literal(" ".into()),
                Span::Placeholder("PAGINATION".into()),
            ]
        );
    }

    #[test]
    fn sanitized_literal_marker() {
        let spans = parse_template("WHERE $?");
        assert_eq!(
            spans,
            vec![Span::Literal("WHERE ".into()), Span::SanitizedLiteral]
        );
    }

    #[test]
    fn lone_dollar_stays_literal() {
        let spans = parse_template("price > 10$ ");
        assert_eq!(spans, vec![Span::Literal("price > 10$ ".into())]);
    }

    #[test]
    fn key_stops_at_non_identifier() {
        let spans = parse_template("($COLUMN_IN)");
        assert_eq!(
            spans,
            vec![
                Span::Literal("(".into()),
                Span::Placeholder("COLUMN_IN".into()),
                Span::Literal(")".into()),
            ]
        );
    }
}
