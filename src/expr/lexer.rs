//! Hand-written lexer for the embedded expression language.
//! Produces a flat token stream; the parser does all the structural work.

use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("unexpected character {c:?} at offset {offset}"))]
    UnexpectedChar { c: char, offset: usize },

    #[snafu(display("unterminated string literal starting at offset {offset}"))]
    UnterminatedString { offset: usize },
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    UInt(u64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Bool(bool),
    Null,
    Ident(String),

    Dot,
    Comma,
    Colon,
    Question,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,

    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,

    Eof,
}

pub fn tokenize(src: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => {
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            '?' => {
                tokens.push(Token::Question);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '{' => {
                tokens.push(Token::LBrace);
                i += 1;
            }
            '}' => {
                tokens.push(Token::RBrace);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::NotEq);
                    i += 2;
                } else {
                    tokens.push(Token::Bang);
                    i += 1;
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::EqEq);
                    i += 2;
                } else {
                    return UnexpectedCharSnafu { c, offset: i }.fail();
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::LtEq);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::GtEq);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::AndAnd);
                    i += 2;
                } else {
                    return UnexpectedCharSnafu { c, offset: i }.fail();
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::OrOr);
                    i += 2;
                } else {
                    return UnexpectedCharSnafu { c, offset: i }.fail();
                }
            }
            '\'' | '"' => {
                let (s, next) = read_string(&chars, i)?;
                tokens.push(Token::String(s));
                i = next;
            }
            'b' if chars.get(i + 1) == Some(&'\'') || chars.get(i + 1) == Some(&'"') => {
                let (s, next) = read_string(&chars, i + 1)?;
                tokens.push(Token::Bytes(s.into_bytes()));
                i = next;
            }
            c if c.is_ascii_digit() => {
                let (tok, next) = read_number(&chars, i);
                tokens.push(tok);
                i = next;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::Bool(true),
                    "false" => Token::Bool(false),
                    "null" => Token::Null,
                    _ => Token::Ident(word),
                });
            }
            c => return UnexpectedCharSnafu { c, offset: i }.fail(),
        }
    }

    tokens.push(Token::Eof);
    Ok(tokens)
}

fn read_string(chars: &[char], start: usize) -> Result<(String, usize)> {
    let quote = chars[start];
    let mut i = start + 1;
    let mut out = String::new();
    while i < chars.len() && chars[i] != quote {
        if chars[i] == '\\' && i + 1 < chars.len() {
            let escaped = chars[i + 1];
            out.push(match escaped {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                '\\' => '\\',
                '\'' => '\'',
                '"' => '"',
                other => other,
            });
            i += 2;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    if i >= chars.len() {
        return UnterminatedStringSnafu { offset: start }.fail();
    }
    Ok((out, i + 1))
}

fn read_number(chars: &[char], start: usize) -> (Token, usize) {
    let mut i = start;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    let mut is_double = false;
    if chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(char::is_ascii_digit) {
        is_double = true;
        i += 1;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
    }
    if matches!(chars.get(i), Some('e') | Some('E')) {
        is_double = true;
        i += 1;
        if matches!(chars.get(i), Some('+') | Some('-')) {
            i += 1;
        }
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
    }

    let is_unsigned = !is_double && chars.get(i) == Some(&'u');
    let text: String = chars[start..i].iter().collect();
    let end = if is_unsigned { i + 1 } else { i };

    if is_double {
        (Token::Double(text.parse().unwrap_or(0.0)), end)
    } else if is_unsigned {
        (Token::UInt(text.parse().unwrap_or(0)), end)
    } else {
        (Token::Int(text.parse().unwrap_or(0)), end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_arithmetic() {
        let tokens = tokenize("1 + 2 * 3").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Int(1),
                Token::Plus,
                Token::Int(2),
                Token::Star,
                Token::Int(3),
                Token::Eof
            ]
        );
    }

    #[test]
    fn tokenizes_string_with_escapes() {
        let tokens = tokenize(r#"'a\n\'b'"#).unwrap();
        assert_eq!(tokens, vec![Token::String("a\n'b".to_string()), Token::Eof]);
    }

    #[test]
    fn tokenizes_unsigned_suffix() {
        let tokens = tokenize("42u").unwrap();
        assert_eq!(tokens, vec![Token::UInt(42), Token::Eof]);
    }
}
