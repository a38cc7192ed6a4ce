//! Tokenizer for the module scanner.
//!
//! Produces just enough structure to find top-level statements, bindings and
//! references: comments and whitespace are dropped, strings are decoded, and
//! template literals are split at `${` / `}` so their expressions are tokenized.

use super::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Punct,
    Str,
    Number,
    Regex,
    /// Template without substitutions.
    Template,
    TemplateHead,
    TemplateMiddle,
    TemplateTail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
    /// A line terminator appeared between the previous token and this one.
    pub newline_before: bool,
    /// Preceded by a `/* @__PURE__ */` or `/* #__PURE__ */` annotation.
    pub pure: bool,
    /// Decoded value for strings and substitution-free templates.
    pub value: Option<String>,
}

impl Token {
    #[must_use]
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }

    #[must_use]
    pub fn is_punct(&self, source: &str, p: &str) -> bool {
        self.kind == TokenKind::Punct && self.text(source) == p
    }

    #[must_use]
    pub fn is_ident(&self, source: &str, name: &str) -> bool {
        self.kind == TokenKind::Ident && self.text(source) == name
    }

    /// String or substitution-free template value, usable as a module specifier.
    #[must_use]
    pub fn string_value(&self) -> Option<&str> {
        match self.kind {
            TokenKind::Str | TokenKind::Template => self.value.as_deref(),
            _ => None,
        }
    }
}

const PUNCTUATORS: &[&str] = &[
    ">>>=", "...", "===", "!==", "**=", "<<=", ">>=", ">>>", "&&=", "||=", "??=", "=>", "==",
    "!=", "<=", ">=", "&&", "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=",
    "|=", "^=", "**", "<<", ">>", "{", "}", "(", ")", "[", "]", ";", ",", "<", ">", "+", "-",
    "*", "/", "%", "&", "|", "^", "!", "~", "?", ":", "=", ".", "@", "#",
];

/// Identifiers after which a `/` starts a regular expression rather than a division.
const REGEX_AFTER_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await",
];

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$' || b >= 0x80
}

fn is_ident_part(b: u8) -> bool {
    is_ident_start(b) || b.is_ascii_digit()
}

/// Tokenize a JavaScript/TypeScript source.
pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    tokens: Vec<Token>,
    newline_before: bool,
    pure: bool,
    /// `true` entries are `${` openers inside templates, `false` are plain braces.
    braces: Vec<bool>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            tokens: Vec::new(),
            newline_before: false,
            pure: false,
            braces: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Token>, ParseError> {
        // Hashbang
        if self.bytes.starts_with(b"#!") {
            while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
                self.pos += 1;
            }
        }

        while self.skip_trivia()? {
            let start = self.pos;
            let b = self.bytes[start];
            match b {
                b'"' | b'\'' => {
                    let value = self.read_string(b)?;
                    self.push(TokenKind::Str, start, Some(value));
                }
                b'`' => {
                    self.pos += 1;
                    self.read_template_part(start, true)?;
                }
                b'}' if self.braces.last() == Some(&true) => {
                    self.braces.pop();
                    self.pos += 1;
                    self.read_template_part(start, false)?;
                }
                b'0'..=b'9' => {
                    self.read_number(start);
                    self.push(TokenKind::Number, start, None);
                }
                b'.' if self.peek(1).is_some_and(|c| c.is_ascii_digit()) => {
                    self.read_number(start);
                    self.push(TokenKind::Number, start, None);
                }
                b'/' if self.regex_allowed() => {
                    self.read_regex()?;
                    self.push(TokenKind::Regex, start, None);
                }
                _ if is_ident_start(b) || b == b'\\' => {
                    self.pos += 1;
                    while self.pos < self.bytes.len()
                        && (is_ident_part(self.bytes[self.pos]) || self.bytes[self.pos] == b'\\')
                    {
                        self.pos += 1;
                    }
                    self.push(TokenKind::Ident, start, None);
                }
                _ => {
                    let rest = &self.src[start..];
                    let Some(p) = PUNCTUATORS.iter().find(|p| rest.starts_with(**p)) else {
                        return Err(ParseError::new(
                            format!("Unexpected character {:?}", rest.chars().next().unwrap_or('?')),
                            start,
                        ));
                    };
                    // `a?.5:b` is a conditional, not optional chaining
                    let len = if *p == "?." && self.peek(2).is_some_and(|c| c.is_ascii_digit()) {
                        1
                    } else {
                        p.len()
                    };
                    match &rest[..len] {
                        "{" => self.braces.push(false),
                        "}" => {
                            self.braces.pop();
                        }
                        _ => {}
                    }
                    self.pos += len;
                    self.push(TokenKind::Punct, start, None);
                }
            }
        }
        Ok(self.tokens)
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn push(&mut self, kind: TokenKind, start: usize, value: Option<String>) {
        self.tokens.push(Token {
            kind,
            start,
            end: self.pos,
            newline_before: std::mem::take(&mut self.newline_before),
            pure: std::mem::take(&mut self.pure),
            value,
        });
    }

    /// Skip whitespace and comments. Returns `false` at end of input.
    fn skip_trivia(&mut self) -> Result<bool, ParseError> {
        while self.pos < self.bytes.len() {
            let b = self.bytes[self.pos];
            match b {
                b'\n' | b'\r' => {
                    self.newline_before = true;
                    self.pos += 1;
                }
                b' ' | b'\t' | 0x0b | 0x0c => self.pos += 1,
                b'/' if self.peek(1) == Some(b'/') => {
                    while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
                        self.pos += 1;
                    }
                }
                b'/' if self.peek(1) == Some(b'*') => {
                    let start = self.pos;
                    let Some(close) = self.src[self.pos + 2..].find("*/") else {
                        return Err(ParseError::new("Unterminated comment", start));
                    };
                    let body = &self.src[self.pos + 2..self.pos + 2 + close];
                    if body.contains('\n') {
                        self.newline_before = true;
                    }
                    if body.contains("@__PURE__") || body.contains("#__PURE__") {
                        self.pure = true;
                    }
                    self.pos += close + 4;
                }
                _ if b >= 0x80 => {
                    // Unicode whitespace (NBSP, BOM, line separators); anything else is an identifier.
                    let ch = self.src[self.pos..].chars().next().unwrap_or(' ');
                    if ch.is_whitespace() || ch == '\u{feff}' {
                        if ch == '\u{2028}' || ch == '\u{2029}' {
                            self.newline_before = true;
                        }
                        self.pos += ch.len_utf8();
                    } else {
                        return Ok(true);
                    }
                }
                _ => return Ok(true),
            }
        }
        Ok(false)
    }

    fn regex_allowed(&self) -> bool {
        let Some(prev) = self.tokens.last() else {
            return true;
        };
        match prev.kind {
            TokenKind::Ident => REGEX_AFTER_KEYWORDS.contains(&prev.text(self.src)),
            TokenKind::Punct => !matches!(prev.text(self.src), ")" | "]" | "++" | "--"),
            TokenKind::TemplateHead | TokenKind::TemplateMiddle => true,
            _ => false,
        }
    }

    fn read_string(&mut self, quote: u8) -> Result<String, ParseError> {
        let start = self.pos;
        self.pos += 1;
        let mut value = String::new();
        loop {
            let Some(b) = self.peek(0) else {
                return Err(ParseError::new("Unterminated string literal", start));
            };
            match b {
                _ if b == quote => {
                    self.pos += 1;
                    return Ok(value);
                }
                b'\n' => return Err(ParseError::new("Unterminated string literal", start)),
                b'\\' => self.read_escape(&mut value),
                _ => {
                    let ch = self.src[self.pos..].chars().next().unwrap_or('\u{fffd}');
                    value.push(ch);
                    self.pos += ch.len_utf8();
                }
            }
        }
    }

    fn read_escape(&mut self, out: &mut String) {
        self.pos += 1;
        let Some(b) = self.peek(0) else { return };
        self.pos += 1;
        match b {
            b'n' => out.push('\n'),
            b't' => out.push('\t'),
            b'r' => out.push('\r'),
            b'b' => out.push('\u{8}'),
            b'f' => out.push('\u{c}'),
            b'v' => out.push('\u{b}'),
            b'0' if !self.peek(0).is_some_and(|c| c.is_ascii_digit()) => out.push('\0'),
            b'\r' => {
                if self.peek(0) == Some(b'\n') {
                    self.pos += 1;
                }
            }
            b'\n' => {}
            b'x' => {
                let code = self.read_hex(2);
                out.push(code.and_then(char::from_u32).unwrap_or('\u{fffd}'));
            }
            b'u' => {
                let code = if self.peek(0) == Some(b'{') {
                    self.pos += 1;
                    let end = self.src[self.pos..].find('}').map_or(self.pos, |i| self.pos + i);
                    let code = u32::from_str_radix(&self.src[self.pos..end], 16).ok();
                    self.pos = (end + 1).min(self.bytes.len());
                    code
                } else {
                    self.read_hex(4)
                };
                out.push(code.and_then(char::from_u32).unwrap_or('\u{fffd}'));
            }
            _ => {
                self.pos -= 1;
                let ch = self.src[self.pos..].chars().next().unwrap_or('\u{fffd}');
                out.push(ch);
                self.pos += ch.len_utf8();
            }
        }
    }

    fn read_hex(&mut self, len: usize) -> Option<u32> {
        let end = (self.pos + len).min(self.bytes.len());
        let code = u32::from_str_radix(self.src.get(self.pos..end)?, 16).ok();
        self.pos = end;
        code
    }

    /// Read template characters up to the closing backtick or the next `${`.
    /// `pos` is just past the opening backtick or the `}` that closed a substitution.
    fn read_template_part(&mut self, start: usize, opened: bool) -> Result<(), ParseError> {
        let mut value = String::new();
        loop {
            let Some(b) = self.peek(0) else {
                return Err(ParseError::new("Unterminated template literal", start));
            };
            match b {
                b'`' => {
                    self.pos += 1;
                    if opened {
                        self.push(TokenKind::Template, start, Some(value));
                    } else {
                        self.push(TokenKind::TemplateTail, start, None);
                    }
                    return Ok(());
                }
                b'$' if self.peek(1) == Some(b'{') => {
                    self.pos += 2;
                    self.braces.push(true);
                    let kind = if opened {
                        TokenKind::TemplateHead
                    } else {
                        TokenKind::TemplateMiddle
                    };
                    self.push(kind, start, None);
                    return Ok(());
                }
                b'\\' => self.read_escape(&mut value),
                _ => {
                    let ch = self.src[self.pos..].chars().next().unwrap_or('\u{fffd}');
                    value.push(ch);
                    self.pos += ch.len_utf8();
                }
            }
        }
    }

    fn read_number(&mut self, start: usize) {
        let hex = self.src[start..].starts_with("0x") || self.src[start..].starts_with("0X");
        while let Some(b) = self.peek(0) {
            let continues = b.is_ascii_alphanumeric()
                || b == b'_'
                || b == b'.'
                || ((b == b'+' || b == b'-')
                    && matches!(self.bytes.get(self.pos.wrapping_sub(1)), Some(b'e' | b'E'))
                    && !hex);
            if !continues {
                break;
            }
            self.pos += 1;
        }
    }

    fn read_regex(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        self.pos += 1;
        let mut in_class = false;
        loop {
            let Some(b) = self.peek(0) else {
                return Err(ParseError::new("Unterminated regular expression", start));
            };
            self.pos += 1;
            match b {
                b'\\' => self.pos += 1,
                b'[' => in_class = true,
                b']' => in_class = false,
                b'/' if !in_class => break,
                b'\n' => return Err(ParseError::new("Unterminated regular expression", start)),
                _ => {}
            }
        }
        while self.peek(0).is_some_and(is_ident_part) {
            self.pos += 1;
        }
        Ok(())
    }
}
