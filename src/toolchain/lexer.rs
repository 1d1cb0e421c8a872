use super::ast::Span;
use super::error::CompileError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Int(i32),
    Long(i64),
    Double(f64),
    Str(String),
    True,
    False,
    Null,

    // Identifiers & keywords
    Ident(String),
    Using,
    Namespace,
    Class,
    Static,
    Public,
    Private,
    Internal,
    Protected,
    Void,
    Return,
    If,
    Else,
    While,
    For,
    Break,
    Continue,
    New,
    Ref,
    Out,
    In,

    // Predefined type keywords
    BoolKw,
    IntKw,
    LongKw,
    DoubleKw,
    StringKw,
    ObjectKw,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    Semicolon,
    Comma,
    Dot,
    Question,
    Colon,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusPlus,   // ++
    MinusMinus, // --
    Eq,         // =
    PlusEq,     // +=
    MinusEq,    // -=
    StarEq,     // *=
    SlashEq,    // /=
    PercentEq,  // %=
    EqEq,       // ==
    Ne,         // !=
    Lt,
    Gt,
    Le,         // <=
    Ge,         // >=
    And,        // &&
    Or,         // ||
    Bang,       // !

    Eof,
}

impl Token {
    /// The token as it appears in source, for messages.
    pub fn text(&self) -> String {
        let s = match self {
            Token::Int(v) => return v.to_string(),
            Token::Long(v) => return format!("{v}L"),
            Token::Double(v) => return v.to_string(),
            Token::Str(s) => return format!("\"{s}\""),
            Token::Ident(name) => return name.clone(),
            Token::True => "true",
            Token::False => "false",
            Token::Null => "null",
            Token::Using => "using",
            Token::Namespace => "namespace",
            Token::Class => "class",
            Token::Static => "static",
            Token::Public => "public",
            Token::Private => "private",
            Token::Internal => "internal",
            Token::Protected => "protected",
            Token::Void => "void",
            Token::Return => "return",
            Token::If => "if",
            Token::Else => "else",
            Token::While => "while",
            Token::For => "for",
            Token::Break => "break",
            Token::Continue => "continue",
            Token::New => "new",
            Token::Ref => "ref",
            Token::Out => "out",
            Token::In => "in",
            Token::BoolKw => "bool",
            Token::IntKw => "int",
            Token::LongKw => "long",
            Token::DoubleKw => "double",
            Token::StringKw => "string",
            Token::ObjectKw => "object",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::Semicolon => ";",
            Token::Comma => ",",
            Token::Dot => ".",
            Token::Question => "?",
            Token::Colon => ":",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::PlusPlus => "++",
            Token::MinusMinus => "--",
            Token::Eq => "=",
            Token::PlusEq => "+=",
            Token::MinusEq => "-=",
            Token::StarEq => "*=",
            Token::SlashEq => "/=",
            Token::PercentEq => "%=",
            Token::EqEq => "==",
            Token::Ne => "!=",
            Token::Lt => "<",
            Token::Gt => ">",
            Token::Le => "<=",
            Token::Ge => ">=",
            Token::And => "&&",
            Token::Or => "||",
            Token::Bang => "!",
            Token::Eof => "end-of-file",
        };
        s.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

pub fn lex(source: &str) -> Result<Vec<SpannedToken>, Vec<CompileError>> {
    let mut lexer = Lexer::new(source);
    lexer.tokenize()
}

struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    tokens: Vec<SpannedToken>,
    errors: Vec<CompileError>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            tokens: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn tokenize(&mut self) -> Result<Vec<SpannedToken>, Vec<CompileError>> {
        while self.pos < self.bytes.len() {
            self.skip_whitespace_and_comments();
            if self.pos >= self.bytes.len() {
                break;
            }

            let start = self.pos;
            let ch = self.bytes[self.pos];

            match ch {
                b'(' => self.single(Token::LParen),
                b')' => self.single(Token::RParen),
                b'{' => self.single(Token::LBrace),
                b'}' => self.single(Token::RBrace),
                b';' => self.single(Token::Semicolon),
                b',' => self.single(Token::Comma),
                b'?' => self.single(Token::Question),
                b':' => self.single(Token::Colon),
                b'.' if self.bytes.get(self.pos + 1).is_some_and(u8::is_ascii_digit) => {
                    self.lex_number(start);
                }
                b'.' => self.single(Token::Dot),
                b'+' => self.operator(&[(b'+', Token::PlusPlus), (b'=', Token::PlusEq)], Token::Plus),
                b'-' => self.operator(&[(b'-', Token::MinusMinus), (b'=', Token::MinusEq)], Token::Minus),
                b'*' => self.operator(&[(b'=', Token::StarEq)], Token::Star),
                b'/' => self.operator(&[(b'=', Token::SlashEq)], Token::Slash),
                b'%' => self.operator(&[(b'=', Token::PercentEq)], Token::Percent),
                b'=' => self.operator(&[(b'=', Token::EqEq)], Token::Eq),
                b'!' => self.operator(&[(b'=', Token::Ne)], Token::Bang),
                b'<' => self.operator(&[(b'=', Token::Le)], Token::Lt),
                b'>' => self.operator(&[(b'=', Token::Ge)], Token::Gt),
                b'&' if self.bytes.get(self.pos + 1) == Some(&b'&') => {
                    self.pos += 2;
                    self.push(Token::And, start, self.pos);
                }
                b'|' if self.bytes.get(self.pos + 1) == Some(&b'|') => {
                    self.pos += 2;
                    self.push(Token::Or, start, self.pos);
                }
                b'&' | b'|' | b'^' | b'~' => {
                    self.pos += 1;
                    self.errors.push(CompileError::unsupported(
                        &format!("bitwise operator '{}'", ch as char),
                        Span::new(start, self.pos),
                    ));
                }
                b'"' => {
                    self.pos += 1;
                    self.lex_string(start);
                }
                b'@' if self.bytes.get(self.pos + 1) == Some(&b'"') => {
                    self.pos += 2;
                    self.lex_verbatim_string(start);
                }
                b'\'' => self.lex_char(start),
                b'0'..=b'9' => self.lex_number(start),
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.lex_ident(start),
                _ => {
                    let c = self.source[start..].chars().next().unwrap_or('\u{fffd}');
                    if c.is_alphabetic() {
                        self.lex_ident(start);
                    } else {
                        self.pos += c.len_utf8();
                        self.errors.push(CompileError::error(
                            "CS1056",
                            format!("Unexpected character '{c}'"),
                            Span::new(start, self.pos),
                        ));
                    }
                }
            }
        }

        self.tokens.push(SpannedToken {
            token: Token::Eof,
            span: Span::new(self.pos, self.pos),
        });

        if self.errors.is_empty() {
            Ok(std::mem::take(&mut self.tokens))
        } else {
            Err(std::mem::take(&mut self.errors))
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn push(&mut self, token: Token, start: usize, end: usize) {
        self.tokens.push(SpannedToken {
            token,
            span: Span::new(start, end),
        });
    }

    fn single(&mut self, token: Token) {
        let start = self.pos;
        self.pos += 1;
        self.push(token, start, self.pos);
    }

    /// One-byte operator, or a two-byte one when the next byte matches.
    fn operator(&mut self, pairs: &[(u8, Token)], fallback: Token) {
        let start = self.pos;
        self.pos += 1;
        let next = self.peek();
        for (second, token) in pairs {
            if next == Some(*second) {
                self.pos += 1;
                self.push(token.clone(), start, self.pos);
                return;
            }
        }
        self.push(fallback, start, self.pos);
    }

    fn skip_whitespace_and_comments(&mut self) {
        while self.pos < self.bytes.len() {
            match self.bytes[self.pos] {
                b' ' | b'\t' | b'\n' | b'\r' => self.pos += 1,
                b'/' if self.bytes.get(self.pos + 1) == Some(&b'/') => {
                    while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
                        self.pos += 1;
                    }
                }
                b'/' if self.bytes.get(self.pos + 1) == Some(&b'*') => {
                    let start = self.pos;
                    self.pos += 2;
                    loop {
                        if self.pos + 1 >= self.bytes.len() {
                            self.pos = self.bytes.len();
                            self.errors.push(CompileError::error(
                                "CS1035",
                                "End-of-file found, '*/' expected",
                                Span::new(start, self.pos),
                            ));
                            break;
                        }
                        if self.bytes[self.pos] == b'*' && self.bytes[self.pos + 1] == b'/' {
                            self.pos += 2;
                            break;
                        }
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
    }

    fn lex_string(&mut self, start: usize) {
        let mut value = String::new();
        loop {
            let Some(c) = self.source[self.pos..].chars().next() else {
                self.newline_in_constant(start);
                break;
            };
            match c {
                '"' => {
                    self.pos += 1;
                    break;
                }
                '\n' | '\r' => {
                    self.newline_in_constant(start);
                    break;
                }
                '\\' => {
                    let escape_start = self.pos;
                    self.pos += 1;
                    match self.lex_escape() {
                        Some(e) => value.push(e),
                        None => self.errors.push(CompileError::error(
                            "CS1009",
                            "Unrecognized escape sequence",
                            Span::new(escape_start, self.pos),
                        )),
                    }
                }
                other => {
                    value.push(other);
                    self.pos += other.len_utf8();
                }
            }
        }
        self.push(Token::Str(value), start, self.pos);
    }

    fn newline_in_constant(&mut self, start: usize) {
        self.errors.push(CompileError::error(
            "CS1010",
            "Newline in constant",
            Span::new(start, self.pos),
        ));
    }

    /// Escape body after the backslash; `None` when unrecognized.
    fn lex_escape(&mut self) -> Option<char> {
        let c = self.source[self.pos..].chars().next()?;
        self.pos += c.len_utf8();
        match c {
            'n' => Some('\n'),
            't' => Some('\t'),
            'r' => Some('\r'),
            '0' => Some('\0'),
            '\\' => Some('\\'),
            '"' => Some('"'),
            '\'' => Some('\''),
            'u' => {
                let hex = self.source.get(self.pos..self.pos + 4)?;
                let code = u32::from_str_radix(hex, 16).ok()?;
                self.pos += 4;
                char::from_u32(code)
            }
            _ => None,
        }
    }

    /// `@"..."`: no escapes, `""` is a quote, newlines allowed.
    fn lex_verbatim_string(&mut self, start: usize) {
        let mut value = String::new();
        loop {
            let Some(c) = self.source[self.pos..].chars().next() else {
                self.errors.push(CompileError::error(
                    "CS1039",
                    "Unterminated string literal",
                    Span::new(start, self.pos),
                ));
                break;
            };
            self.pos += c.len_utf8();
            if c == '"' {
                if self.peek() == Some(b'"') {
                    self.pos += 1;
                    value.push('"');
                } else {
                    break;
                }
            } else {
                value.push(c);
            }
        }
        self.push(Token::Str(value), start, self.pos);
    }

    fn lex_char(&mut self, start: usize) {
        self.pos += 1;
        while self.pos < self.bytes.len() && !matches!(self.bytes[self.pos], b'\'' | b'\n') {
            if self.bytes[self.pos] == b'\\' {
                self.pos += 1;
            }
            self.pos += 1;
        }
        if self.peek() == Some(b'\'') {
            self.pos += 1;
        }
        let end = self.pos.min(self.bytes.len());
        self.pos = end;
        self.errors.push(CompileError::unsupported("character literal", Span::new(start, end)));
    }

    fn lex_number(&mut self, start: usize) {
        if self.bytes[self.pos] == b'0' && matches!(self.bytes.get(self.pos + 1), Some(b'x' | b'X')) {
            self.pos += 2;
            let digits = self.pos;
            while self.peek().is_some_and(|b| b.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let text = &self.source[digits..self.pos];
            let parsed = u64::from_str_radix(text, 16).ok();
            self.finish_integer(start, parsed);
            return;
        }

        let mut is_real = false;
        self.skip_digits();
        if self.peek() == Some(b'.') && self.bytes.get(self.pos + 1).is_some_and(u8::is_ascii_digit) {
            is_real = true;
            self.pos += 1;
            self.skip_digits();
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let save = self.pos;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            if self.peek().is_some_and(|b| b.is_ascii_digit()) {
                is_real = true;
                self.skip_digits();
            } else {
                self.pos = save;
            }
        }

        let text: String = self.source[start..self.pos].chars().filter(|&c| c != '_').collect();
        match self.peek() {
            Some(b'd' | b'D') => {
                self.pos += 1;
                self.finish_real(start, &text);
            }
            Some(b'f' | b'F' | b'm' | b'M') => {
                self.pos += 1;
                self.errors.push(CompileError::unsupported(
                    "float and decimal literals",
                    Span::new(start, self.pos),
                ));
            }
            _ if is_real => self.finish_real(start, &text),
            _ => self.finish_integer(start, text.parse::<u64>().ok()),
        }
    }

    fn skip_digits(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_digit() || b == b'_') {
            self.pos += 1;
        }
    }

    fn finish_real(&mut self, start: usize, text: &str) {
        match text.parse::<f64>() {
            Ok(v) => self.push(Token::Double(v), start, self.pos),
            Err(_) => self.errors.push(CompileError::error(
                "CS0594",
                "Floating-point constant is outside the range of type 'double'",
                Span::new(start, self.pos),
            )),
        }
    }

    /// Integer literal typing: `int` when it fits, `long` otherwise or
    /// with an `L` suffix.
    fn finish_integer(&mut self, start: usize, value: Option<u64>) {
        let long_suffix = matches!(self.peek(), Some(b'l' | b'L'));
        if long_suffix {
            self.pos += 1;
        }
        if matches!(self.peek(), Some(b'u' | b'U')) {
            self.pos += 1;
            self.errors.push(CompileError::unsupported("unsigned literals", Span::new(start, self.pos)));
            return;
        }
        let span = Span::new(start, self.pos);
        let token = match value {
            Some(v) if !long_suffix && v <= i32::MAX as u64 => Token::Int(v as i32),
            Some(v) if v <= i64::MAX as u64 => Token::Long(v as i64),
            _ => {
                self.errors.push(CompileError::error("CS1021", "Integral constant is too large", span));
                return;
            }
        };
        self.push(token, span.start, span.end);
    }

    fn lex_ident(&mut self, start: usize) {
        while let Some(c) = self.source[self.pos..].chars().next() {
            if c.is_alphanumeric() || c == '_' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        let word = &self.source[start..self.pos];
        let token = match word {
            "using" => Token::Using,
            "namespace" => Token::Namespace,
            "class" => Token::Class,
            "static" => Token::Static,
            "public" => Token::Public,
            "private" => Token::Private,
            "internal" => Token::Internal,
            "protected" => Token::Protected,
            "void" => Token::Void,
            "return" => Token::Return,
            "if" => Token::If,
            "else" => Token::Else,
            "while" => Token::While,
            "for" => Token::For,
            "break" => Token::Break,
            "continue" => Token::Continue,
            "new" => Token::New,
            "ref" => Token::Ref,
            "out" => Token::Out,
            "in" => Token::In,
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            "bool" => Token::BoolKw,
            "int" => Token::IntKw,
            "long" => Token::LongKw,
            "double" => Token::DoubleKw,
            "string" => Token::StringKw,
            "object" => Token::ObjectKw,
            _ => Token::Ident(word.to_string()),
        };
        self.push(token, start, self.pos);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn tok(s: &str) -> Vec<Token> {
        lex(s).unwrap().into_iter().map(|t| t.token).collect()
    }

    fn codes(s: &str) -> Vec<&'static str> {
        lex(s).unwrap_err().into_iter().map(|e| e.code).collect()
    }

    #[test]
    fn simple_tokens() {
        let tokens = tok("1 + 2.5");
        assert_eq!(tokens, vec![Token::Int(1), Token::Plus, Token::Double(2.5), Token::Eof]);
    }

    #[test]
    fn keywords_and_type_keywords() {
        let tokens = tok("public static int Execute(ref string it)");
        assert_eq!(tokens, vec![
            Token::Public, Token::Static, Token::IntKw, Token::Ident("Execute".into()),
            Token::LParen, Token::Ref, Token::StringKw, Token::Ident("it".into()), Token::RParen,
            Token::Eof,
        ]);
    }

    #[test]
    fn compound_operators() {
        let tokens = tok("++ -- += -= *= /= %= == != <= >= && || !");
        assert_eq!(tokens, vec![
            Token::PlusPlus, Token::MinusMinus, Token::PlusEq, Token::MinusEq, Token::StarEq,
            Token::SlashEq, Token::PercentEq, Token::EqEq, Token::Ne, Token::Le, Token::Ge,
            Token::And, Token::Or, Token::Bang, Token::Eof,
        ]);
    }

    #[test]
    fn integer_literal_typing() {
        assert_eq!(tok("2147483647")[0], Token::Int(i32::MAX));
        assert_eq!(tok("2147483648")[0], Token::Long(2_147_483_648));
        assert_eq!(tok("5L")[0], Token::Long(5));
        assert_eq!(tok("0x1F")[0], Token::Int(31));
        assert_eq!(codes("99999999999999999999"), ["CS1021"]);
    }

    #[test]
    fn real_literals() {
        assert_eq!(tok("1e3")[0], Token::Double(1000.0));
        assert_eq!(tok(".5")[0], Token::Double(0.5));
        assert_eq!(tok("2d")[0], Token::Double(2.0));
        assert_eq!(codes("1.5f"), ["DC0001"]);
    }

    #[test]
    fn member_access_on_integer_is_not_a_real() {
        let tokens = tok("1.ToString()");
        assert_eq!(tokens[..3], [Token::Int(1), Token::Dot, Token::Ident("ToString".into())]);
    }

    #[test]
    fn string_escapes() {
        assert_eq!(tok(r#""a\tb\"c\u0041""#)[0], Token::Str("a\tb\"cA".into()));
        assert_eq!(tok(r#"@"C:\dir ""x""""#)[0], Token::Str(r#"C:\dir "x""#.into()));
        assert_eq!(codes(r#""bad \q""#), ["CS1009"]);
        assert_eq!(codes("\"open\nx"), ["CS1010"]);
    }

    #[test]
    fn comments_stripped() {
        let tokens = tok("a // line\n/* block\n */ b");
        assert_eq!(tokens, vec![Token::Ident("a".into()), Token::Ident("b".into()), Token::Eof]);
        assert_eq!(codes("a /* open"), ["CS1035"]);
    }

    #[test]
    fn unexpected_characters() {
        assert_eq!(codes("a # b"), ["CS1056"]);
        assert_eq!(codes("'c'"), ["DC0001"]);
        assert_eq!(codes("a & b"), ["DC0001"]);
    }

    #[test]
    fn spans_cover_tokens() {
        let tokens = lex("  foo += 12;").unwrap();
        assert_eq!(tokens[0].span, Span::new(2, 5));
        assert_eq!(tokens[1].span, Span::new(6, 8));
        assert_eq!(tokens[2].span, Span::new(9, 11));
    }
}
