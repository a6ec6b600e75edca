//! Tokenizer with trivia and preprocessor evaluation

use super::kind::{Keyword, TokenKind, TriviaKind};
use super::text::Span;
use super::ParseError;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trivia {
    pub kind: TriviaKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub leading: Vec<Trivia>,
}

/// Output of the lexer: tokens (ending with `Eof`) and lexical errors
#[derive(Debug, Clone, Default)]
pub struct Lexed {
    pub tokens: Vec<Token>,
    pub errors: Vec<ParseError>,
}

#[derive(Debug, Clone, Copy)]
struct PpFrame {
    parent_active: bool,
    taken: bool,
    active: bool,
    start: u32,
}

/// Tokenize `text`. `defines` seeds the preprocessor symbol set.
pub fn lex(text: &str, defines: &[String]) -> Lexed {
    let mut lexer = Lexer {
        src: text,
        bytes: text.as_bytes(),
        pos: 0,
        line_start: true,
        defines: defines.iter().cloned().collect(),
        stack: Vec::new(),
        errors: Vec::new(),
    };
    let mut tokens = Vec::new();
    loop {
        let leading = lexer.trivia();
        let start = lexer.pos;
        if lexer.pos >= lexer.bytes.len() {
            tokens.push(Token {
                kind: TokenKind::Eof,
                span: Span::empty(start as u32),
                leading,
            });
            break;
        }
        let kind = lexer.token();
        lexer.line_start = false;
        tokens.push(Token {
            kind,
            span: Span::from_bounds(start as u32, lexer.pos as u32),
            leading,
        });
    }
    for frame in lexer.stack.iter().rev() {
        lexer.errors.push(ParseError::new(
            Span::new(frame.start, 1),
            "'#endif' directive expected",
        ));
    }
    Lexed {
        tokens,
        errors: lexer.errors,
    }
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line_start: bool,
    defines: HashSet<String>,
    stack: Vec<PpFrame>,
    errors: Vec<ParseError>,
}

impl<'a> Lexer<'a> {
    fn peek(&self, ahead: usize) -> u8 {
        self.bytes.get(self.pos + ahead).copied().unwrap_or(0)
    }

    fn current_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn active(&self) -> bool {
        self.stack.last().map_or(true, |f| f.active)
    }

    fn error(&mut self, start: usize, end: usize, message: impl Into<String>) {
        self.errors.push(ParseError::new(
            Span::from_bounds(start as u32, end as u32),
            message,
        ));
    }

    fn line_end(&self) -> usize {
        self.src[self.pos..]
            .find(['\r', '\n'])
            .map_or(self.bytes.len(), |i| self.pos + i)
    }

    fn trivia(&mut self) -> Vec<Trivia> {
        let mut out = Vec::new();
        while self.pos < self.bytes.len() {
            let start = self.pos;
            if !self.active() && self.line_start {
                let end = self.line_end();
                let line = &self.src[self.pos..end];
                if !line.is_empty() && !line.trim_start().starts_with('#') {
                    self.pos = end;
                    out.push(self.make_trivia(TriviaKind::DisabledText, start));
                    continue;
                }
            }
            let c = self.peek(0);
            let kind = match c {
                b' ' | b'\t' | 0x0b | 0x0c => {
                    while matches!(self.peek(0), b' ' | b'\t' | 0x0b | 0x0c) {
                        self.pos += 1;
                    }
                    TriviaKind::Whitespace
                }
                b'\r' | b'\n' => {
                    if c == b'\r' && self.peek(1) == b'\n' {
                        self.pos += 2;
                    } else {
                        self.pos += 1;
                    }
                    self.line_start = true;
                    TriviaKind::Newline
                }
                b'/' if self.peek(1) == b'/' => {
                    let doc = self.peek(2) == b'/' && self.peek(3) != b'/';
                    self.pos = self.line_end();
                    self.line_start = false;
                    if doc {
                        TriviaKind::DocComment
                    } else {
                        TriviaKind::LineComment
                    }
                }
                b'/' if self.peek(1) == b'*' => {
                    match self.src[self.pos + 2..].find("*/") {
                        Some(i) => self.pos += 2 + i + 2,
                        None => {
                            self.pos = self.bytes.len();
                            self.error(start, self.pos, "end-of-file found, '*/' expected");
                        }
                    }
                    self.line_start = false;
                    TriviaKind::BlockComment
                }
                b'#' if self.line_start => {
                    self.pos = self.line_end();
                    let directive = self.src[start + 1..self.pos].to_string();
                    self.directive(start, &directive);
                    self.line_start = false;
                    TriviaKind::Directive
                }
                _ => match self.current_char() {
                    Some(ch) if ch.is_whitespace() || ch == '\u{feff}' => {
                        while let Some(ch) = self.current_char() {
                            if (ch.is_whitespace() && ch != '\n' && ch != '\r') || ch == '\u{feff}' {
                                self.pos += ch.len_utf8();
                            } else {
                                break;
                            }
                        }
                        TriviaKind::Whitespace
                    }
                    _ => break,
                },
            };
            out.push(self.make_trivia(kind, start));
        }
        out
    }

    fn make_trivia(&self, kind: TriviaKind, start: usize) -> Trivia {
        Trivia {
            kind,
            span: Span::from_bounds(start as u32, self.pos as u32),
        }
    }

    fn directive(&mut self, start: usize, text: &str) {
        let text = text.trim();
        let (name, rest) = match text.find(char::is_whitespace) {
            Some(i) => (&text[..i], text[i..].trim()),
            None => (text, ""),
        };
        let rest = rest.split("//").next().unwrap_or("").trim();
        let end = start + 1 + text.len();
        match name {
            "if" => {
                let parent_active = self.active();
                let value = parent_active && self.evaluate(rest, start, end);
                self.stack.push(PpFrame {
                    parent_active,
                    taken: value,
                    active: value,
                    start: start as u32,
                });
            }
            "elif" => {
                let Some(frame) = self.stack.last().copied() else {
                    self.error(start, end, "unexpected preprocessor directive");
                    return;
                };
                let value = frame.parent_active && !frame.taken && self.evaluate(rest, start, end);
                if let Some(top) = self.stack.last_mut() {
                    top.active = value;
                    top.taken |= value;
                }
            }
            "else" => match self.stack.last_mut() {
                Some(top) => {
                    top.active = top.parent_active && !top.taken;
                    top.taken = true;
                }
                None => self.error(start, end, "unexpected preprocessor directive"),
            },
            "endif" => {
                if self.stack.pop().is_none() {
                    self.error(start, end, "unexpected preprocessor directive");
                }
            }
            "define" if self.active() => {
                self.defines.insert(rest.to_string());
            }
            "undef" if self.active() => {
                self.defines.remove(rest);
            }
            _ => {}
        }
    }

    fn evaluate(&mut self, expr: &str, start: usize, end: usize) -> bool {
        match eval_condition(expr, &self.defines) {
            Some(value) => value,
            None => {
                self.error(start, end, "invalid preprocessor expression");
                false
            }
        }
    }

    fn token(&mut self) -> TokenKind {
        let start = self.pos;
        let c = self.peek(0);
        match c {
            b'"' => {
                self.regular_string();
                TokenKind::StringLiteral
            }
            b'@' if self.peek(1) == b'"' => {
                self.pos += 1;
                self.verbatim_string();
                TokenKind::StringLiteral
            }
            b'$' | b'@' if matches!(self.peek(1), b'"' | b'$' | b'@') => {
                let verbatim = c == b'@' || self.peek(1) == b'@';
                while matches!(self.peek(0), b'$' | b'@') {
                    self.pos += 1;
                }
                if self.peek(0) == b'"' {
                    self.interpolated_string(verbatim);
                    TokenKind::StringLiteral
                } else {
                    self.error(start, self.pos, "unexpected character");
                    TokenKind::Unknown
                }
            }
            b'\'' => {
                self.char_literal();
                TokenKind::CharLiteral
            }
            b'0'..=b'9' => self.number(),
            b'.' if self.peek(1).is_ascii_digit() => self.number(),
            b'@' if is_ident_start(self.src[self.pos + 1..].chars().next()) => {
                self.pos += 1;
                self.ident_tail();
                TokenKind::Ident
            }
            _ if is_ident_start(self.current_char()) => {
                self.ident_tail();
                match Keyword::from_ident(&self.src[start..self.pos]) {
                    Some(kw) => TokenKind::Keyword(kw),
                    None => TokenKind::Ident,
                }
            }
            _ => self.punct(),
        }
    }

    fn ident_tail(&mut self) {
        while let Some(ch) = self.current_char() {
            if ch == '_' || ch.is_alphanumeric() {
                self.pos += ch.len_utf8();
            } else {
                break;
            }
        }
    }

    fn regular_string(&mut self) {
        let start = self.pos;
        self.pos += 1;
        loop {
            match self.peek(0) {
                b'"' => {
                    self.pos += 1;
                    return;
                }
                b'\\' => self.pos += 2,
                b'\n' | b'\r' | 0 => {
                    self.pos = self.pos.min(self.bytes.len());
                    self.error(start, self.pos, "newline in constant");
                    return;
                }
                _ => self.pos += 1,
            }
        }
    }

    fn verbatim_string(&mut self) {
        let start = self.pos;
        self.pos += 1;
        loop {
            match self.peek(0) {
                b'"' if self.peek(1) == b'"' => self.pos += 2,
                b'"' => {
                    self.pos += 1;
                    return;
                }
                0 if self.pos >= self.bytes.len() => {
                    self.error(start, self.pos, "unterminated string literal");
                    return;
                }
                _ => self.pos += 1,
            }
        }
    }

    fn interpolated_string(&mut self, verbatim: bool) {
        let start = self.pos;
        self.pos += 1;
        let mut depth = 0usize;
        loop {
            if self.pos >= self.bytes.len() {
                self.error(start, self.pos, "unterminated string literal");
                return;
            }
            let c = self.peek(0);
            if depth == 0 {
                match c {
                    b'"' if verbatim && self.peek(1) == b'"' => self.pos += 2,
                    b'"' => {
                        self.pos += 1;
                        return;
                    }
                    b'\\' if !verbatim => self.pos += 2,
                    b'{' if self.peek(1) == b'{' => self.pos += 2,
                    b'{' => {
                        depth = 1;
                        self.pos += 1;
                    }
                    b'\n' | b'\r' if !verbatim => {
                        self.error(start, self.pos, "newline in constant");
                        return;
                    }
                    _ => self.pos += 1,
                }
            } else {
                match c {
                    b'{' => {
                        depth += 1;
                        self.pos += 1;
                    }
                    b'}' => {
                        depth -= 1;
                        self.pos += 1;
                    }
                    b'"' => self.regular_string(),
                    b'\'' => self.char_literal(),
                    _ => self.pos += 1,
                }
            }
        }
    }

    fn char_literal(&mut self) {
        let start = self.pos;
        self.pos += 1;
        loop {
            match self.peek(0) {
                b'\'' => {
                    self.pos += 1;
                    return;
                }
                b'\\' => self.pos += 2,
                b'\n' | b'\r' | 0 => {
                    self.pos = self.pos.min(self.bytes.len());
                    self.error(start, self.pos, "newline in constant");
                    return;
                }
                _ => self.pos += 1,
            }
        }
    }

    fn number(&mut self) -> TokenKind {
        let mut real = false;
        if self.peek(0) == b'0' && matches!(self.peek(1), b'x' | b'X') {
            self.pos += 2;
            while self.peek(0).is_ascii_hexdigit() || self.peek(0) == b'_' {
                self.pos += 1;
            }
        } else if self.peek(0) == b'0' && matches!(self.peek(1), b'b' | b'B') {
            self.pos += 2;
            while matches!(self.peek(0), b'0' | b'1' | b'_') {
                self.pos += 1;
            }
        } else {
            self.digits();
            if self.peek(0) == b'.' && self.peek(1).is_ascii_digit() {
                real = true;
                self.pos += 1;
                self.digits();
            }
            if matches!(self.peek(0), b'e' | b'E') {
                let sign = usize::from(matches!(self.peek(1), b'+' | b'-'));
                if self.peek(1 + sign).is_ascii_digit() {
                    real = true;
                    self.pos += 1 + sign;
                    self.digits();
                }
            }
            if matches!(self.peek(0), b'f' | b'F' | b'd' | b'D' | b'm' | b'M') {
                self.pos += 1;
                return TokenKind::RealLiteral;
            }
        }
        while matches!(self.peek(0), b'u' | b'U' | b'l' | b'L') {
            self.pos += 1;
        }
        if real {
            TokenKind::RealLiteral
        } else {
            TokenKind::IntLiteral
        }
    }

    fn digits(&mut self) {
        while self.peek(0).is_ascii_digit() || self.peek(0) == b'_' {
            self.pos += 1;
        }
    }

    fn punct(&mut self) -> TokenKind {
        use TokenKind::*;
        let (kind, len) = match (self.peek(0), self.peek(1), self.peek(2)) {
            (b'{', ..) => (LBrace, 1),
            (b'}', ..) => (RBrace, 1),
            (b'(', ..) => (LParen, 1),
            (b')', ..) => (RParen, 1),
            (b'[', ..) => (LBracket, 1),
            (b']', ..) => (RBracket, 1),
            (b';', ..) => (Semi, 1),
            (b',', ..) => (Comma, 1),
            (b'.', b'.', _) => (DotDot, 2),
            (b'.', ..) => (Dot, 1),
            (b':', b':', _) => (ColonColon, 2),
            (b':', ..) => (Colon, 1),
            (b'?', b'?', b'=') => (QuestionQuestionEq, 3),
            (b'?', b'?', _) => (QuestionQuestion, 2),
            (b'?', b'.', d) if !d.is_ascii_digit() => (QuestionDot, 2),
            (b'?', ..) => (Question, 1),
            (b'=', b'>', _) => (Arrow, 2),
            (b'=', b'=', _) => (EqEq, 2),
            (b'=', ..) => (Eq, 1),
            (b'!', b'=', _) => (BangEq, 2),
            (b'!', ..) => (Bang, 1),
            (b'<', b'<', b'=') => (ShlEq, 3),
            (b'<', b'<', _) => (Shl, 2),
            (b'<', b'=', _) => (LtEq, 2),
            (b'<', ..) => (Lt, 1),
            (b'>', b'>', b'=') => (ShrEq, 3),
            (b'>', b'=', _) => (GtEq, 2),
            (b'>', ..) => (Gt, 1),
            (b'+', b'+', _) => (PlusPlus, 2),
            (b'+', b'=', _) => (PlusEq, 2),
            (b'+', ..) => (Plus, 1),
            (b'-', b'-', _) => (MinusMinus, 2),
            (b'-', b'=', _) => (MinusEq, 2),
            (b'-', ..) => (Minus, 1),
            (b'*', b'=', _) => (StarEq, 2),
            (b'*', ..) => (Star, 1),
            (b'/', b'=', _) => (SlashEq, 2),
            (b'/', ..) => (Slash, 1),
            (b'%', b'=', _) => (PercentEq, 2),
            (b'%', ..) => (Percent, 1),
            (b'&', b'&', _) => (AmpAmp, 2),
            (b'&', b'=', _) => (AmpEq, 2),
            (b'&', ..) => (Amp, 1),
            (b'|', b'|', _) => (PipePipe, 2),
            (b'|', b'=', _) => (PipeEq, 2),
            (b'|', ..) => (Pipe, 1),
            (b'^', b'=', _) => (CaretEq, 2),
            (b'^', ..) => (Caret, 1),
            (b'~', ..) => (Tilde, 1),
            _ => {
                let start = self.pos;
                self.pos += self.current_char().map_or(1, char::len_utf8);
                self.error(start, self.pos, "unexpected character");
                return Unknown;
            }
        };
        self.pos += len;
        kind
    }
}

fn is_ident_start(ch: Option<char>) -> bool {
    matches!(ch, Some(c) if c == '_' || c.is_alphabetic())
}

/// Evaluate a `#if`/`#elif` condition against a symbol set.
///
/// Returns `None` on malformed input.
pub fn eval_condition(expr: &str, defines: &HashSet<String>) -> Option<bool> {
    let tokens = pp_tokens(expr)?;
    let mut parser = PpParser {
        tokens: &tokens,
        pos: 0,
        defines,
    };
    let value = parser.or()?;
    if parser.pos == tokens.len() {
        Some(value)
    } else {
        None
    }
}

#[derive(Debug, PartialEq)]
enum PpToken<'a> {
    Ident(&'a str),
    Not,
    And,
    Or,
    EqEq,
    NotEq,
    LParen,
    RParen,
}

fn pp_tokens(expr: &str) -> Option<Vec<PpToken<'_>>> {
    let mut out = Vec::new();
    let bytes = expr.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b' ' | b'\t' => i += 1,
            b'(' => {
                out.push(PpToken::LParen);
                i += 1;
            }
            b')' => {
                out.push(PpToken::RParen);
                i += 1;
            }
            b'!' if bytes.get(i + 1) == Some(&b'=') => {
                out.push(PpToken::NotEq);
                i += 2;
            }
            b'!' => {
                out.push(PpToken::Not);
                i += 1;
            }
            b'&' if bytes.get(i + 1) == Some(&b'&') => {
                out.push(PpToken::And);
                i += 2;
            }
            b'|' if bytes.get(i + 1) == Some(&b'|') => {
                out.push(PpToken::Or);
                i += 2;
            }
            b'=' if bytes.get(i + 1) == Some(&b'=') => {
                out.push(PpToken::EqEq);
                i += 2;
            }
            _ if c == b'_' || c.is_ascii_alphanumeric() => {
                let start = i;
                while i < bytes.len() && (bytes[i] == b'_' || bytes[i].is_ascii_alphanumeric()) {
                    i += 1;
                }
                out.push(PpToken::Ident(&expr[start..i]));
            }
            _ => return None,
        }
    }
    Some(out)
}

struct PpParser<'t, 'a> {
    tokens: &'t [PpToken<'a>],
    pos: usize,
    defines: &'t HashSet<String>,
}

impl PpParser<'_, '_> {
    fn eat(&mut self, token: &PpToken<'_>) -> bool {
        if self.tokens.get(self.pos) == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or(&mut self) -> Option<bool> {
        let mut value = self.and()?;
        while self.eat(&PpToken::Or) {
            value |= self.and()?;
        }
        Some(value)
    }

    fn and(&mut self) -> Option<bool> {
        let mut value = self.equality()?;
        while self.eat(&PpToken::And) {
            value &= self.equality()?;
        }
        Some(value)
    }

    fn equality(&mut self) -> Option<bool> {
        let mut value = self.unary()?;
        loop {
            if self.eat(&PpToken::EqEq) {
                value = value == self.unary()?;
            } else if self.eat(&PpToken::NotEq) {
                value = value != self.unary()?;
            } else {
                return Some(value);
            }
        }
    }

    fn unary(&mut self) -> Option<bool> {
        if self.eat(&PpToken::Not) {
            return self.unary().map(|v| !v);
        }
        if self.eat(&PpToken::LParen) {
            let value = self.or()?;
            return self.eat(&PpToken::RParen).then_some(value);
        }
        match self.tokens.get(self.pos)? {
            PpToken::Ident(name) => {
                self.pos += 1;
                Some(match *name {
                    "true" => true,
                    "false" => false,
                    other => self.defines.contains(other),
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<TokenKind> {
        lex(text, &[]).tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_basic_tokens() {
        use TokenKind::*;
        assert_eq!(
            kinds("var x = a?.b ?? 1;"),
            vec![Ident, Ident, Eq, Ident, QuestionDot, Ident, QuestionQuestion, IntLiteral, Semi, Eof]
        );
        assert_eq!(
            kinds("if (x >= 1.5f) return;"),
            vec![
                Keyword(super::Keyword::If),
                LParen,
                Ident,
                GtEq,
                RealLiteral,
                RParen,
                Keyword(super::Keyword::Return),
                Semi,
                Eof
            ]
        );
    }

    #[test]
    fn test_generic_close_is_two_tokens() {
        use TokenKind::*;
        assert_eq!(kinds("A<B<C>>"), vec![Ident, Lt, Ident, Lt, Ident, Gt, Gt, Eof]);
    }

    #[test]
    fn test_trivia_covers_everything() {
        let text = "// lead\nint  x; /* block */\n/// doc\n";
        let lexed = lex(text, &[]);
        let mut covered = 0u32;
        for token in &lexed.tokens {
            for trivia in &token.leading {
                assert_eq!(trivia.span.start, covered);
                covered = trivia.span.end();
            }
            assert_eq!(token.span.start, covered);
            covered = token.span.end();
        }
        assert_eq!(covered as usize, text.len());
        let eof = lexed.tokens.last().unwrap();
        assert!(eof.leading.iter().any(|t| t.kind == TriviaKind::DocComment));
    }

    #[test]
    fn test_strings() {
        let lexed = lex(r#"x = @"a""b" + $"v{y + "}"}" + 'c';"#, &[]);
        let strings: Vec<_> = lexed
            .tokens
            .iter()
            .filter(|t| matches!(t.kind, TokenKind::StringLiteral | TokenKind::CharLiteral))
            .collect();
        assert_eq!(strings.len(), 3);
        assert!(lexed.errors.is_empty());
    }

    #[test]
    fn test_preprocessor_if() {
        let text = "#if DEBUG\nint a;\n#else\nint b;\n#endif\n";
        let without: Vec<_> = lex(text, &[])
            .tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Ident)
            .map(|t| &text[t.span.range()])
            .collect();
        assert_eq!(without, vec!["b"]);
        let with: Vec<_> = lex(text, &["DEBUG".to_string()])
            .tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Ident)
            .map(|t| &text[t.span.range()])
            .collect();
        assert_eq!(with, vec!["a"]);
    }

    #[test]
    fn test_nested_inactive_region() {
        let text = "#if A\n#if B\nint a;\n#endif\nint b;\n#endif\nint c;\n";
        let lexed = lex(text, &["B".to_string()]);
        let idents: Vec<_> = lexed
            .tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Ident)
            .map(|t| &text[t.span.range()])
            .collect();
        assert_eq!(idents, vec!["c"]);
        assert!(lexed.errors.is_empty());
    }

    #[test]
    fn test_eval_condition() {
        let defines: HashSet<String> = ["NET46".to_string()].into_iter().collect();
        assert_eq!(eval_condition("NET46 && !NETCORE", &defines), Some(true));
        assert_eq!(eval_condition("(A || NET46) == true", &defines), Some(true));
        assert_eq!(eval_condition("A ||", &defines), None);
    }

    #[test]
    fn test_unterminated_comment_is_error() {
        let lexed = lex("int x; /* open", &[]);
        assert_eq!(lexed.errors.len(), 1);
    }
}
