//! A scanner for JavaScript-family sources. Not a parser: it produces a
//! flat token stream that is exact about the things dependency extraction
//! cares about (strings, template literals, comments, identifiers) and
//! deliberately coarse about everything else.

/// Byte range in the scanned source.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn text<'a>(&self, src: &'a str) -> &'a str {
        &src[self.start..self.end]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Ident,
    /// String literal; `value` is the unescaped content.
    Str { value: String },
    Template { has_interpolation: bool },
    Number,
    Punct(char),
    Regex,
}

#[derive(Clone, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn is_punct(&self, c: char) -> bool {
        self.kind == TokenKind::Punct(c)
    }

    pub fn ident_text<'a>(&self, src: &'a str) -> Option<&'a str> {
        match self.kind {
            TokenKind::Ident => Some(self.span.text(src)),
            _ => None,
        }
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$' || b >= 0x80
}

fn is_ident_continue(b: u8) -> bool {
    is_ident_start(b) || b.is_ascii_digit()
}

pub fn lex(src: &str) -> Vec<Token> {
    let bytes = src.as_bytes();
    let mut tokens: Vec<Token> = Vec::new();
    let mut i = 0usize;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b' ' | b'\t' | b'\r' | b'\n' => i += 1,
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i = (i + 2).min(bytes.len());
            }
            b'/' => {
                if regex_can_start(&tokens) {
                    let start = i;
                    i = scan_regex(bytes, i + 1);
                    tokens.push(Token {
                        kind: TokenKind::Regex,
                        span: Span { start, end: i },
                    });
                } else {
                    tokens.push(Token {
                        kind: TokenKind::Punct('/'),
                        span: Span { start: i, end: i + 1 },
                    });
                    i += 1;
                }
            }
            b'"' | b'\'' => {
                let start = i;
                let (end, value) = scan_string(bytes, src, i);
                i = end;
                tokens.push(Token {
                    kind: TokenKind::Str { value },
                    span: Span { start, end },
                });
            }
            b'`' => {
                let start = i;
                let (end, has_interpolation) = scan_template(bytes, i + 1);
                i = end;
                tokens.push(Token {
                    kind: TokenKind::Template { has_interpolation },
                    span: Span { start, end },
                });
            }
            b'0'..=b'9' => {
                let start = i;
                i += 1;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.' || bytes[i] == b'_')
                {
                    i += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Number,
                    span: Span { start, end: i },
                });
            }
            _ if is_ident_start(b) => {
                let start = i;
                i += 1;
                while i < bytes.len() && is_ident_continue(bytes[i]) {
                    i += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Ident,
                    span: Span { start, end: i },
                });
            }
            _ => {
                tokens.push(Token {
                    kind: TokenKind::Punct(b as char),
                    span: Span { start: i, end: i + 1 },
                });
                i += 1;
            }
        }
    }

    tokens
}

/// A leading `/` starts a regex when the previous meaningful token cannot
/// end an expression. Heuristic, but it only has to be good enough to avoid
/// mis-scanning the remainder of the file.
fn regex_can_start(tokens: &[Token]) -> bool {
    match tokens.last() {
        None => true,
        Some(token) => match &token.kind {
            TokenKind::Punct(c) => !matches!(*c, ')' | ']'),
            TokenKind::Ident => false,
            TokenKind::Number
            | TokenKind::Str { .. }
            | TokenKind::Template { .. }
            | TokenKind::Regex => false,
        },
    }
}

fn scan_regex(bytes: &[u8], mut i: usize) -> usize {
    let mut in_class = false;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'[' => in_class = true,
            b']' => in_class = false,
            b'/' if !in_class => {
                i += 1;
                // flags
                while i < bytes.len() && is_ident_continue(bytes[i]) {
                    i += 1;
                }
                return i;
            }
            b'\n' => return i, // not actually a regex; bail at the line end
            _ => {}
        }
        i += 1;
    }
    i
}

fn scan_string(bytes: &[u8], src: &str, start: usize) -> (usize, String) {
    let quote = bytes[start];
    let mut value = String::new();
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if i + 1 < bytes.len() => {
                let escaped = bytes[i + 1];
                match escaped {
                    b'n' => value.push('\n'),
                    b't' => value.push('\t'),
                    b'r' => value.push('\r'),
                    _ => value.push_str(&src[i + 1..i + 2]),
                }
                i += 2;
            }
            b if b == quote => return (i + 1, value),
            b'\n' => return (i, value), // unterminated; stop at the line end
            _ => {
                let ch_len = utf8_len(bytes[i]);
                value.push_str(&src[i..i + ch_len]);
                i += ch_len;
            }
        }
    }
    (i, value)
}

fn utf8_len(b: u8) -> usize {
    match b {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        _ => 4,
    }
}

/// Scans past the closing backtick, handling `${ ... }` interpolations with
/// nested strings and templates.
fn scan_template(bytes: &[u8], mut i: usize) -> (usize, bool) {
    let mut has_interpolation = false;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'`' => return (i + 1, has_interpolation),
            b'$' if bytes.get(i + 1) == Some(&b'{') => {
                has_interpolation = true;
                i += 2;
                let mut depth = 1usize;
                while i < bytes.len() && depth > 0 {
                    match bytes[i] {
                        b'{' => depth += 1,
                        b'}' => depth -= 1,
                        b'`' => {
                            let (end, _) = scan_template(bytes, i + 1);
                            i = end;
                            continue;
                        }
                        b'"' | b'\'' => {
                            let quote = bytes[i];
                            i += 1;
                            while i < bytes.len() && bytes[i] != quote {
                                if bytes[i] == b'\\' {
                                    i += 1;
                                }
                                i += 1;
                            }
                        }
                        _ => {}
                    }
                    i += 1;
                }
                continue;
            }
            _ => i += 1,
        }
    }
    (i, has_interpolation)
}
