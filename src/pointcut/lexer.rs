#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Word(String),
    LParen,
    RParen,
    Comma,
    AndAnd,
    OrOr,
    Bang,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

impl Token {
    pub fn word(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Word(w) => Some(w.as_str()),
            _ => None,
        }
    }

    pub fn is(&self, kind: &TokenKind) -> bool {
        &self.kind == kind
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '$' | '.' | '*' | '@' | '+' | '[' | ']')
}

/// Splits a pointcut expression into tokens.
///
/// Generic type arguments (`List<String>`) are dropped. The argument of a
/// `bean(...)` designator is kept verbatim as one word since bean names may
/// contain characters that are not valid in type patterns.
pub fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let (offset, c) = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token { kind: TokenKind::LParen, offset });
                i += 1;
                if matches!(tokens.iter().rev().nth(1), Some(Token { kind: TokenKind::Word(w), .. }) if w == "bean") {
                    let start = i;
                    while i < chars.len() && chars[i].1 != ')' {
                        i += 1;
                    }
                    let raw: String = chars[start..i].iter().map(|(_, c)| c).collect();
                    let raw = raw.trim();
                    if !raw.is_empty() {
                        tokens.push(Token {
                            kind: TokenKind::Word(raw.to_string()),
                            offset: chars.get(start).map(|(o, _)| *o).unwrap_or(src.len()),
                        });
                    }
                }
            }
            ')' => {
                tokens.push(Token { kind: TokenKind::RParen, offset });
                i += 1;
            }
            ',' => {
                tokens.push(Token { kind: TokenKind::Comma, offset });
                i += 1;
            }
            '!' => {
                tokens.push(Token { kind: TokenKind::Bang, offset });
                i += 1;
            }
            '&' | '|' => {
                if chars.get(i + 1).map(|(_, n)| *n) != Some(c) {
                    return Err(format!("expected '{c}{c}' at offset {offset}"));
                }
                let kind = if c == '&' { TokenKind::AndAnd } else { TokenKind::OrOr };
                tokens.push(Token { kind, offset });
                i += 2;
            }
            c if is_word_char(c) => {
                let mut word = String::new();
                while i < chars.len() {
                    let c = chars[i].1;
                    if is_word_char(c) {
                        word.push(c);
                        i += 1;
                    } else if c == '<' {
                        i = skip_generics(&chars, i)?;
                    } else {
                        break;
                    }
                }
                tokens.push(Token { kind: TokenKind::Word(word), offset });
            }
            other => return Err(format!("unexpected character '{other}' at offset {offset}")),
        }
    }
    Ok(tokens)
}

fn skip_generics(chars: &[(usize, char)], mut i: usize) -> Result<usize, String> {
    let open = chars[i].0;
    let mut depth = 0usize;
    while i < chars.len() {
        match chars[i].1 {
            '<' => depth += 1,
            '>' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i + 1);
                }
            }
            _ => {}
        }
        i += 1;
    }
    Err(format!("unbalanced '<' at offset {open}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(src: &str) -> Vec<String> {
        tokenize(src)
            .unwrap()
            .into_iter()
            .map(|t| match t.kind {
                TokenKind::Word(w) => w,
                TokenKind::LParen => "(".to_string(),
                TokenKind::RParen => ")".to_string(),
                TokenKind::Comma => ",".to_string(),
                TokenKind::AndAnd => "&&".to_string(),
                TokenKind::OrOr => "||".to_string(),
                TokenKind::Bang => "!".to_string(),
            })
            .collect()
    }

    #[test]
    fn splits_execution_with_operators() {
        assert_eq!(
            words("execution(* com.example..*.get*(..)) && !within(com.example.internal.*)"),
            vec![
                "execution", "(", "*", "com.example..*.get*", "(", "..", ")", ")", "&&", "!", "within", "(",
                "com.example.internal.*", ")"
            ]
        );
    }

    #[test]
    fn drops_generic_arguments() {
        assert_eq!(
            words("execution(java.util.List<java.lang.String> *(java.util.Map<K, V>+))"),
            vec!["execution", "(", "java.util.List", "*", "(", "java.util.Map+", ")", ")"]
        );
    }

    #[test]
    fn keeps_bean_names_verbatim() {
        assert_eq!(words("bean(order-service*)"), vec!["bean", "(", "order-service*", ")"]);
    }

    #[test]
    fn rejects_single_ampersand() {
        assert!(tokenize("within(a.*) & within(b.*)").is_err());
    }
}
