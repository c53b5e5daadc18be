/// A piece of template source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Literal(&'a str),
    Tag {
        /// Text between `{{` and `}}`.
        inner: &'a str,
        /// Byte offset of the opening `{{`.
        start: usize,
        /// Byte offset just past the closing `}}`.
        end: usize,
    },
}

pub fn segments(input: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut literal_start = 0;
    let mut search = 0;

    while let Some(rel) = input[search..].find("{{") {
        let open = search + rel;
        match tag_close(input.as_bytes(), open + 2) {
            Some(close) => {
                if literal_start < open {
                    out.push(Segment::Literal(&input[literal_start..open]));
                }
                out.push(Segment::Tag {
                    inner: &input[open + 2..close],
                    start: open,
                    end: close + 2,
                });
                literal_start = close + 2;
                search = close + 2;
            }
            // No balanced close: these braces are plain text.
            None => search = open + 1,
        }
    }

    if literal_start < input.len() {
        out.push(Segment::Literal(&input[literal_start..]));
    }
    out
}

/// Offset of the `}}` that closes a tag whose body starts at `from`.
/// Markers are ASCII, so scanning bytes never splits a UTF-8 sequence
/// in a way that matters.
fn tag_close(bytes: &[u8], from: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = from;

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' | b'"' => quote = Some(b),
            b'(' | b'[' | b'{' => depth += 1,
            b'}' if depth == 0 && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            _ => {}
        }
        i += 1;
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Keywords
    True,
    False,
    Null,
    Undefined,
    Function,
    Return,

    // Symbols
    EqEq,      // == or ===
    NotEq,     // != or !==
    AndAnd,    // &&
    OrOr,      // ||
    Assign,    // =
    Bang,      // !
    Plus,      // +
    Minus,     // -
    Dot,       // .
    Comma,     // ,
    Colon,     // :
    Semicolon, // ;
    LParen,    // (
    RParen,    // )
    LBracket,  // [
    RBracket,  // ]
    LBrace,    // {
    RBrace,    // }

    // Data
    Ident(String),
    Number(f64),
    StringLit(String),
}

const SYMBOLS: &[(&str, Token)] = &[
    ("===", Token::EqEq),
    ("!==", Token::NotEq),
    ("==", Token::EqEq),
    ("!=", Token::NotEq),
    ("&&", Token::AndAnd),
    ("||", Token::OrOr),
    ("=", Token::Assign),
    ("!", Token::Bang),
    ("+", Token::Plus),
    ("-", Token::Minus),
    (".", Token::Dot),
    (",", Token::Comma),
    (":", Token::Colon),
    (";", Token::Semicolon),
    ("(", Token::LParen),
    (")", Token::RParen),
    ("[", Token::LBracket),
    ("]", Token::RBracket),
    ("{", Token::LBrace),
    ("}", Token::RBrace),
];

#[derive(Clone)]
pub struct Tokenizer<'a> {
    input: &'a str,
    cursor: usize,
    /// Digits right after a `.` are a key (`grid.0.1`), never a fraction.
    after_dot: bool,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            cursor: 0,
            after_dot: false,
        }
    }

    /// Tokenize the whole input.
    pub fn tokenize(input: &'a str) -> Result<Vec<Token>, String> {
        let mut tokenizer = Self::new(input);
        let mut tokens = Vec::new();
        while let Some(token) = tokenizer.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.cursor..]
    }

    fn advance(&mut self, n: usize) {
        self.cursor += n;
    }

    pub fn next_token(&mut self) -> Result<Option<Token>, String> {
        let token = self.scan()?;
        self.after_dot = token == Some(Token::Dot);
        Ok(token)
    }

    fn scan(&mut self) -> Result<Option<Token>, String> {
        let rest = self.remaining();
        let trimmed = rest.trim_start();
        self.advance(rest.len() - trimmed.len());

        let rest = self.remaining();
        let Some(first) = rest.chars().next() else {
            return Ok(None);
        };

        if first == '\'' || first == '"' {
            return self.string(first).map(Some);
        }
        if first.is_ascii_digit() && self.after_dot {
            return Ok(Some(self.index()));
        }
        if first.is_ascii_digit() {
            return self.number().map(Some);
        }
        if first.is_alphabetic() || first == '_' || first == '$' {
            let len = rest
                .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
                .unwrap_or(rest.len());
            let ident = &rest[..len];
            self.advance(len);
            return Ok(Some(match ident {
                "true" => Token::True,
                "false" => Token::False,
                "null" => Token::Null,
                "undefined" => Token::Undefined,
                "function" => Token::Function,
                "return" => Token::Return,
                _ => Token::Ident(ident.to_string()),
            }));
        }

        for (text, token) in SYMBOLS {
            if rest.starts_with(text) {
                self.advance(text.len());
                return Ok(Some(token.clone()));
            }
        }

        Err(format!("unexpected character `{first}`"))
    }

    fn index(&mut self) -> Token {
        let rest = self.remaining();
        let len = rest.bytes().take_while(u8::is_ascii_digit).count();
        self.advance(len);
        Token::Ident(rest[..len].to_string())
    }

    fn number(&mut self) -> Result<Token, String> {
        let bytes = self.remaining().as_bytes();
        let mut len = bytes.iter().take_while(|b| b.is_ascii_digit()).count();

        if bytes.get(len) == Some(&b'.') && bytes.get(len + 1).is_some_and(u8::is_ascii_digit) {
            len += 1;
            len += bytes[len..].iter().take_while(|b| b.is_ascii_digit()).count();
        }
        if matches!(bytes.get(len), Some(b'e' | b'E')) {
            let mut exp = len + 1;
            if matches!(bytes.get(exp), Some(b'+' | b'-')) {
                exp += 1;
            }
            let digits = bytes[exp.min(bytes.len())..]
                .iter()
                .take_while(|b| b.is_ascii_digit())
                .count();
            if digits > 0 {
                len = exp + digits;
            }
        }

        let text = &self.remaining()[..len];
        let n = text
            .parse::<f64>()
            .map_err(|_| format!("invalid number `{text}`"))?;
        self.advance(len);
        Ok(Token::Number(n))
    }

    fn string(&mut self, quote: char) -> Result<Token, String> {
        let rest = self.remaining();
        let mut s = String::new();
        let mut chars = rest.char_indices().skip(1);

        while let Some((idx, c)) = chars.next() {
            if c == quote {
                self.advance(idx + c.len_utf8());
                return Ok(Token::StringLit(s));
            }
            if c != '\\' {
                s.push(c);
                continue;
            }
            let Some((_, esc)) = chars.next() else { break };
            match esc {
                'n' => s.push('\n'),
                't' => s.push('\t'),
                'r' => s.push('\r'),
                'b' => s.push('\u{8}'),
                'f' => s.push('\u{c}'),
                'v' => s.push('\u{b}'),
                '0' => s.push('\0'),
                'u' => {
                    let hex: String = chars.by_ref().take(4).map(|(_, h)| h).collect();
                    let decoded = u32::from_str_radix(&hex, 16)
                        .ok()
                        .and_then(char::from_u32)
                        .ok_or_else(|| format!("invalid escape `\\u{hex}`"))?;
                    s.push(decoded);
                }
                '\n' => {}
                other => s.push(other),
            }
        }
        Err("unterminated string literal".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(input: &str) -> Vec<&str> {
        segments(input)
            .into_iter()
            .filter_map(|s| match s {
                Segment::Tag { inner, .. } => Some(inner),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    #[test]
    fn text_without_tags_is_one_literal() {
        let input = "plain }} text } with {braces}\n";
        assert_eq!(segments(input), vec![Segment::Literal(input)]);
    }

    #[test]
    fn literal_and_tag_offsets() {
        let segs = segments("a{{b}}c");
        assert_eq!(
            segs,
            vec![
                Segment::Literal("a"),
                Segment::Tag {
                    inner: "b",
                    start: 1,
                    end: 6
                },
                Segment::Literal("c"),
            ]
        );
    }

    #[test]
    fn close_marker_inside_arguments_does_not_end_tag() {
        assert_eq!(
            tags("{{foo({ a: { b: 1 }})}}tail"),
            vec!["foo({ a: { b: 1 }})"]
        );
        assert_eq!(
            tags(r#"{{foo(2).bar({ "foo" : "bar()" }).baz(1,2,3)}}"#),
            vec![r#"foo(2).bar({ "foo" : "bar()" }).baz(1,2,3)"#]
        );
    }

    #[test]
    fn quotes_are_opaque() {
        assert_eq!(tags(r#"{{foo('}})')}}"#), vec![r#"foo('}})')"#]);
        assert_eq!(tags(r#"{{foo("it\"s }}")}}"#), vec![r#"foo("it\"s }}")"#]);
    }

    #[test]
    fn unmatched_open_is_literal() {
        let input = "before {{foo( never closed }} after";
        assert_eq!(segments(input), vec![Segment::Literal(input)]);

        let segs = segments("{{ oops {{ok}}");
        assert_eq!(
            segs,
            vec![
                Segment::Literal("{{ oops "),
                Segment::Tag {
                    inner: "ok",
                    start: 8,
                    end: 14
                },
            ]
        );
    }

    #[test]
    fn tokenizes_expressions() {
        let tokens = Tokenizer::tokenize("foo('a\\n', 1.5, [true], { b : null }) !== x").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("foo".into()),
                Token::LParen,
                Token::StringLit("a\n".into()),
                Token::Comma,
                Token::Number(1.5),
                Token::Comma,
                Token::LBracket,
                Token::True,
                Token::RBracket,
                Token::Comma,
                Token::LBrace,
                Token::Ident("b".into()),
                Token::Colon,
                Token::Null,
                Token::RBrace,
                Token::RParen,
                Token::NotEq,
                Token::Ident("x".into()),
            ]
        );
    }

    #[test]
    fn numeric_path_segments_keep_dots() {
        let tokens = Tokenizer::tokenize("data.1.foo").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("data".into()),
                Token::Dot,
                Token::Ident("1".into()),
                Token::Dot,
                Token::Ident("foo".into()),
            ]
        );
    }

    #[test]
    fn consecutive_indices_are_separate_keys() {
        let tokens = Tokenizer::tokenize("grid.0.11 + 1.5").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("grid".into()),
                Token::Dot,
                Token::Ident("0".into()),
                Token::Dot,
                Token::Ident("11".into()),
                Token::Plus,
                Token::Number(1.5),
            ]
        );
    }

    #[test]
    fn rejects_unterminated_strings_and_stray_characters() {
        assert!(Tokenizer::tokenize("'abc").is_err());
        assert_eq!(
            Tokenizer::tokenize("a # b").unwrap_err(),
            "unexpected character `#`"
        );
    }
}
