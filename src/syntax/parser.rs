//! Recursive-descent parser building the arena tree

use super::kind::{Keyword, LanguageVersion, SyntaxKind, TokenKind};
use super::lexer::Token;
use super::text::Span;
use super::tree::{NodeData, NodeId, SyntaxTree};
use super::{ParseError, ParseOptions};

use SyntaxKind as K;
use TokenKind as T;

/// Binary operator precedence levels, lowest first
const PREC_OR: u8 = 1;
const PREC_AND: u8 = 2;
const PREC_BIT_OR: u8 = 3;
const PREC_BIT_XOR: u8 = 4;
const PREC_BIT_AND: u8 = 5;
const PREC_EQUALITY: u8 = 6;
const PREC_RELATIONAL: u8 = 7;
const PREC_SHIFT: u8 = 8;
const PREC_ADDITIVE: u8 = 9;
const PREC_MULTIPLICATIVE: u8 = 10;

/// Deepest syntactic nesting parsed before the rest of a construct becomes an error node
pub(crate) const MAX_NESTING: usize = 256;

pub(crate) fn parse_tokens(
    text: &str,
    tokens: Vec<Token>,
    mut errors: Vec<ParseError>,
    options: &ParseOptions,
) -> SyntaxTree {
    let mut parser = Parser {
        text,
        tokens,
        pos: 0,
        nodes: Vec::new(),
        errors: Vec::new(),
        version: options.language_version,
        depth: 0,
    };
    let root = parser.compilation_unit();
    errors.append(&mut parser.errors);
    errors.sort_by_key(|e| (e.span.start, e.span.len));
    SyntaxTree::from_parts(text.to_string(), parser.tokens, parser.nodes, root, errors)
}

struct Parser<'a> {
    text: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    nodes: Vec<NodeData>,
    errors: Vec<ParseError>,
    version: LanguageVersion,
    depth: usize,
}

impl<'a> Parser<'a> {
    // ----- token helpers -----

    fn nth(&self, n: usize) -> TokenKind {
        self.kind_at(self.pos + n)
    }

    fn kind_at(&self, index: usize) -> TokenKind {
        self.tokens.get(index).map_or(T::Eof, |t| t.kind)
    }

    fn current(&self) -> TokenKind {
        self.nth(0)
    }

    fn text_at(&self, index: usize) -> &'a str {
        let text = self.text;
        self.tokens
            .get(index)
            .and_then(|t| text.get(t.span.range()))
            .unwrap_or("")
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.current() == kind
    }

    fn at_kw(&self, kw: Keyword) -> bool {
        self.current() == T::Keyword(kw)
    }

    fn ident_text_at(&self, index: usize) -> Option<&'a str> {
        (self.kind_at(index) == T::Ident).then(|| self.text_at(index))
    }

    fn at_contextual(&self, word: &str) -> bool {
        self.ident_text_at(self.pos) == Some(word)
    }

    fn bump(&mut self) -> u32 {
        let index = self.pos as u32;
        if self.current() != T::Eof {
            self.pos += 1;
        }
        index
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn current_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map_or(Span::default(), |t| t.span)
    }

    fn error_here(&mut self, message: impl Into<String>) {
        let span = self.current_span();
        self.errors.push(ParseError::new(span, message));
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Option<u32> {
        if self.at(kind) {
            Some(self.bump())
        } else {
            self.error_here(format!("'{}' expected", what));
            None
        }
    }

    fn expect_ident(&mut self) -> Option<u32> {
        if self.at(T::Ident) {
            Some(self.bump())
        } else {
            self.error_here("identifier expected");
            None
        }
    }

    fn require(&mut self, version: LanguageVersion, feature: &str, span: Span) {
        if self.version < version {
            self.errors.push(ParseError::new(
                span,
                format!("feature '{}' requires C# {}", feature, version.number()),
            ));
        }
    }

    fn gap_position(&self) -> u32 {
        if self.pos == 0 {
            0
        } else {
            self.tokens[self.pos - 1].span.end()
        }
    }

    fn finish(
        &mut self,
        kind: SyntaxKind,
        start: usize,
        children: Vec<NodeId>,
        token: Option<u32>,
    ) -> NodeId {
        let mut span = if start < self.pos {
            Span::from_bounds(
                self.tokens[start].span.start,
                self.tokens[self.pos - 1].span.end(),
            )
        } else {
            Span::empty(self.gap_position())
        };
        for child in &children {
            span = span.cover(self.nodes[child.index()].span);
        }
        let id = NodeId(self.nodes.len() as u32);
        for child in &children {
            self.nodes[child.index()].parent = Some(id);
        }
        self.nodes.push(NodeData {
            kind,
            span,
            parent: None,
            children,
            token,
            tokens: (start as u32, self.pos.max(start) as u32),
        });
        id
    }

    fn leaf(&mut self, kind: SyntaxKind) -> NodeId {
        let start = self.pos;
        let token = self.bump();
        self.finish(kind, start, Vec::new(), Some(token))
    }

    fn missing(&mut self, message: &str) -> NodeId {
        self.error_here(message.to_string());
        self.finish(K::Error, self.pos, Vec::new(), None)
    }

    fn skip_token_as_error(&mut self, message: impl Into<String>) -> NodeId {
        self.error_here(message);
        let start = self.pos;
        self.bump();
        self.finish(K::Error, start, Vec::new(), None)
    }

    /// Run `parse` one nesting level deeper, or skip the construct once too deep
    fn nested(&mut self, statement: bool, parse: fn(&mut Self) -> NodeId) -> NodeId {
        if self.depth >= MAX_NESTING {
            return self.skip_nested(statement);
        }
        self.depth += 1;
        let node = parse(self);
        self.depth -= 1;
        node
    }

    /// Consume a bracket-balanced run of tokens as one error node.
    ///
    /// An expression run stops before `;`, `,` or an unmatched closer, or
    /// after the braces it starts with. A statement run also consumes its
    /// terminating `;` or block, and only stops before an unmatched `}`.
    fn skip_nested(&mut self, statement: bool) -> NodeId {
        self.error_here("nesting too deep");
        let start = self.pos;
        let block = self.at(T::LBrace);
        let mut depth = 0usize;
        loop {
            match self.current() {
                T::Eof => break,
                T::LParen | T::LBracket | T::LBrace => depth += 1,
                T::RBrace if depth == 0 => break,
                T::RParen | T::RBracket if depth == 0 => {
                    if !statement {
                        break;
                    }
                }
                T::RBrace => {
                    depth -= 1;
                    if depth == 0 && (statement || block) {
                        self.bump();
                        break;
                    }
                }
                T::RParen | T::RBracket => depth -= 1,
                T::Semi if depth == 0 => {
                    if statement {
                        self.bump();
                    }
                    break;
                }
                T::Comma if depth == 0 && !statement => break,
                _ => {}
            }
            self.bump();
        }
        self.finish(K::Error, start, Vec::new(), None)
    }

    // ----- lookahead scanners (no nodes are built) -----

    fn scan_type(&self, i: usize) -> Option<usize> {
        self.scan_type_within(i, 0)
    }

    fn scan_type_within(&self, mut i: usize, depth: usize) -> Option<usize> {
        if depth >= MAX_NESTING {
            return None;
        }
        match self.kind_at(i) {
            T::Keyword(kw) if kw.is_predefined_type() => i += 1,
            T::Ident => {
                i = self.scan_named(i, depth)?;
                while matches!(self.kind_at(i), T::Dot | T::ColonColon) && self.kind_at(i + 1) == T::Ident {
                    i = self.scan_named(i + 1, depth)?;
                }
            }
            T::LParen => {
                i += 1;
                let mut count = 0;
                loop {
                    i = self.scan_type_within(i, depth + 1)?;
                    if self.kind_at(i) == T::Ident {
                        i += 1;
                    }
                    count += 1;
                    match self.kind_at(i) {
                        T::Comma => i += 1,
                        T::RParen if count > 1 => {
                            i += 1;
                            break;
                        }
                        _ => return None,
                    }
                }
            }
            _ => return None,
        }
        loop {
            match self.kind_at(i) {
                T::Question => i += 1,
                T::LBracket => {
                    let mut j = i + 1;
                    while self.kind_at(j) == T::Comma {
                        j += 1;
                    }
                    if self.kind_at(j) != T::RBracket {
                        break;
                    }
                    i = j + 1;
                }
                _ => break,
            }
        }
        Some(i)
    }

    fn scan_named(&self, i: usize, depth: usize) -> Option<usize> {
        if self.kind_at(i) != T::Ident {
            return None;
        }
        if self.kind_at(i + 1) == T::Lt {
            self.scan_type_args_within(i + 1, depth + 1).or(Some(i + 1))
        } else {
            Some(i + 1)
        }
    }

    /// `i` points at `<`; returns the index after the matching `>`
    fn scan_type_args(&self, i: usize) -> Option<usize> {
        self.scan_type_args_within(i, 0)
    }

    fn scan_type_args_within(&self, i: usize, depth: usize) -> Option<usize> {
        let mut j = i + 1;
        loop {
            j = self.scan_type_within(j, depth)?;
            match self.kind_at(j) {
                T::Comma => j += 1,
                T::Gt => return Some(j + 1),
                _ => return None,
            }
        }
    }

    fn looks_like_local_decl(&self) -> bool {
        if self.at_contextual("await") || self.at_contextual("yield") {
            return false;
        }
        let mut i = self.pos;
        if self.kind_at(i) == T::Keyword(Keyword::Ref) {
            i += 1;
        }
        match self.scan_type(i) {
            Some(j) => {
                self.kind_at(j) == T::Ident
                    && matches!(self.kind_at(j + 1), T::Eq | T::Semi | T::Comma | T::RParen)
            }
            None => false,
        }
    }

    fn looks_like_local_function(&self) -> bool {
        let mut i = self.pos;
        while matches!(self.kind_at(i), T::Keyword(Keyword::Static) | T::Keyword(Keyword::Unsafe))
            || (self.ident_text_at(i) == Some("async") && self.kind_at(i + 1) != T::LParen)
        {
            i += 1;
        }
        if self.ident_text_at(i) == Some("await") {
            return false;
        }
        match self.scan_type(i) {
            Some(j) => self.kind_at(j) == T::Ident && matches!(self.kind_at(j + 1), T::LParen | T::Lt),
            None => false,
        }
    }

    fn matching_paren(&self, open: usize) -> Option<usize> {
        let mut depth = 0usize;
        let mut i = open;
        loop {
            match self.kind_at(i) {
                T::LParen => depth += 1,
                T::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                T::Eof | T::LBrace | T::Semi => return None,
                _ => {}
            }
            i += 1;
        }
    }

    fn looks_like_lambda(&self) -> bool {
        let mut i = self.pos;
        if self.ident_text_at(i) == Some("async")
            && matches!(self.kind_at(i + 1), T::Ident | T::LParen | T::Keyword(Keyword::Static))
        {
            i += 1;
        }
        if self.kind_at(i) == T::Keyword(Keyword::Static) {
            i += 1;
        }
        match self.kind_at(i) {
            T::Ident => self.kind_at(i + 1) == T::Arrow,
            T::LParen => self
                .matching_paren(i)
                .is_some_and(|close| self.kind_at(close + 1) == T::Arrow),
            _ => false,
        }
    }

    fn looks_like_cast(&self) -> bool {
        let Some(j) = self.scan_type(self.pos + 1) else {
            return false;
        };
        if self.kind_at(j) != T::RParen {
            return false;
        }
        let first = self.kind_at(self.pos + 1);
        let simple_name = first == T::Ident && (j - (self.pos + 1)) % 2 == 1 && (self.pos + 1..j).all(|k| {
            matches!(self.kind_at(k), T::Ident | T::Dot)
        });
        let after = self.kind_at(j + 1);
        if !simple_name {
            return matches!(first, T::Keyword(_)) || can_start_operand(after);
        }
        match after {
            T::Ident
            | T::IntLiteral
            | T::RealLiteral
            | T::StringLiteral
            | T::CharLiteral
            | T::LParen
            | T::Bang
            | T::Tilde => true,
            T::Keyword(kw) => matches!(
                kw,
                Keyword::This
                    | Keyword::Base
                    | Keyword::New
                    | Keyword::Typeof
                    | Keyword::Default
                    | Keyword::True
                    | Keyword::False
                    | Keyword::Null
                    | Keyword::Checked
                    | Keyword::Unchecked
            ) || kw.is_predefined_type(),
            _ => false,
        }
    }

    // ----- declarations -----

    fn compilation_unit(&mut self) -> NodeId {
        let mut children = Vec::new();
        while !self.at(T::Eof) {
            let before = self.pos;
            if self.at_kw(Keyword::Using) || (self.at_contextual("global") && self.nth(1) == T::Keyword(Keyword::Using)) {
                children.push(self.using_directive());
            } else if let Some(member) = self.member() {
                children.push(member);
            }
            if self.pos == before {
                children.push(self.skip_token_as_error("type or namespace definition expected"));
            }
        }
        self.finish(K::CompilationUnit, 0, children, None)
    }

    fn using_directive(&mut self) -> NodeId {
        let start = self.pos;
        if self.at_contextual("global") {
            self.bump();
        }
        self.bump();
        self.eat(T::Keyword(Keyword::Static));
        let mut alias = None;
        if self.at(T::Ident) && self.nth(1) == T::Eq {
            alias = Some(self.bump());
            self.bump();
        }
        let name = self.parse_type();
        self.expect(T::Semi, ";");
        self.finish(K::UsingDirective, start, vec![name], alias)
    }

    fn can_start_member(&self) -> bool {
        match self.current() {
            T::Ident | T::LBracket | T::Tilde => true,
            T::Keyword(kw) => {
                kw.is_modifier()
                    || kw.is_predefined_type()
                    || matches!(
                        kw,
                        Keyword::Class
                            | Keyword::Struct
                            | Keyword::Interface
                            | Keyword::Enum
                            | Keyword::Namespace
                            | Keyword::Delegate
                            | Keyword::Implicit
                            | Keyword::Explicit
                    )
            }
            _ => false,
        }
    }

    fn at_contextual_modifier(&self) -> bool {
        matches!(self.ident_text_at(self.pos), Some("partial" | "async" | "required"))
            && matches!(self.nth(1), T::Ident | T::Keyword(_))
    }

    fn attributes(&mut self, children: &mut Vec<NodeId>) {
        while self.at(T::LBracket) {
            let start = self.pos;
            let mut depth = 0usize;
            loop {
                match self.current() {
                    T::LBracket => depth += 1,
                    T::RBracket => {
                        depth -= 1;
                        if depth == 0 {
                            self.bump();
                            break;
                        }
                    }
                    T::Eof => break,
                    _ => {}
                }
                self.bump();
            }
            children.push(self.finish(K::AttributeList, start, Vec::new(), None));
        }
    }

    fn modifiers(&mut self, children: &mut Vec<NodeId>) {
        let start = self.pos;
        loop {
            match self.current() {
                T::Keyword(kw) if kw.is_modifier() => {
                    if kw == Keyword::New && self.nth(1) == T::LParen {
                        break;
                    }
                    self.bump();
                }
                T::Ident if self.at_contextual_modifier() => {
                    self.bump();
                }
                _ => break,
            }
        }
        if self.pos > start {
            children.push(self.finish(K::ModifierList, start, Vec::new(), None));
        }
    }

    /// Namespace, type or member declaration. Returns `None` without consuming when nothing fits.
    fn member(&mut self) -> Option<NodeId> {
        if self.depth >= MAX_NESTING {
            return Some(self.skip_nested(true));
        }
        self.depth += 1;
        let member = self.member_decl();
        self.depth -= 1;
        member
    }

    fn member_decl(&mut self) -> Option<NodeId> {
        if !self.can_start_member() {
            return None;
        }
        let start = self.pos;
        if self.at_kw(Keyword::Namespace) {
            return Some(self.namespace_decl());
        }
        let mut children = Vec::new();
        self.attributes(&mut children);
        self.modifiers(&mut children);
        let kind = match self.current() {
            T::Keyword(Keyword::Class) => Some(K::ClassDecl),
            T::Keyword(Keyword::Struct) => Some(K::StructDecl),
            T::Keyword(Keyword::Interface) => Some(K::InterfaceDecl),
            T::Keyword(Keyword::Enum) => Some(K::EnumDecl),
            T::Ident
                if self.at_contextual("record")
                    && matches!(
                        self.nth(1),
                        T::Ident | T::Keyword(Keyword::Class) | T::Keyword(Keyword::Struct)
                    ) =>
            {
                Some(K::RecordDecl)
            }
            _ => None,
        };
        if let Some(kind) = kind {
            return Some(self.type_decl(kind, start, children));
        }
        match self.current() {
            T::Tilde => return Some(self.destructor(start, children)),
            T::Ident if self.nth(1) == T::LParen => return Some(self.constructor(start, children)),
            T::Keyword(Keyword::Delegate | Keyword::Implicit | Keyword::Explicit) => {
                return Some(self.recover_member(start, children, "declaration is not supported"));
            }
            T::RBrace | T::Eof => {
                return Some(self.finish(K::Error, start, children, None));
            }
            _ => {}
        }
        let ty = self.parse_type();
        children.push(ty);
        if self.at_kw(Keyword::Operator) || self.at_kw(Keyword::This) {
            return Some(self.recover_member(start, children, "declaration is not supported"));
        }
        let mut name = self.expect_ident();
        while self.at(T::Dot) && self.nth(1) == T::Ident {
            self.bump();
            name = Some(self.bump());
        }
        if name.is_none() {
            return Some(self.recover_member(start, children, "member declaration expected"));
        }
        match self.current() {
            T::LParen | T::Lt => Some(self.method_rest(K::MethodDecl, start, children, name)),
            T::LBrace | T::Arrow => Some(self.property_rest(start, children, name)),
            T::Eq | T::Semi | T::Comma => {
                let ty_start = self.nodes[ty.index()].tokens.0 as usize;
                let decl = self.declarators(ty_start, ty, name);
                let children = replace_last(children, decl);
                self.expect(T::Semi, ";");
                Some(self.finish(K::FieldDecl, start, children, None))
            }
            _ => Some(self.recover_member(start, children, "member declaration expected")),
        }
    }

    fn recover_member(&mut self, start: usize, mut children: Vec<NodeId>, message: &str) -> NodeId {
        self.error_here(message.to_string());
        let skip_start = self.pos;
        let mut depth = 0usize;
        loop {
            match self.current() {
                T::Eof => break,
                T::LBrace => depth += 1,
                T::RBrace => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                    if depth == 0 {
                        self.bump();
                        break;
                    }
                }
                T::Semi if depth == 0 => {
                    self.bump();
                    break;
                }
                _ => {}
            }
            self.bump();
        }
        if self.pos > skip_start {
            children.push(self.finish(K::Error, skip_start, Vec::new(), None));
        }
        self.finish(K::Error, start, children, None)
    }

    fn namespace_decl(&mut self) -> NodeId {
        let start = self.pos;
        let ns_token = self.bump();
        let name = self.parse_type();
        let mut children = vec![name];
        if self.at(T::Semi) {
            let span = self.current_span();
            self.require(LanguageVersion::CSharp10, "file-scoped namespace", span);
            self.bump();
            while !self.at(T::Eof) {
                let before = self.pos;
                if self.at_kw(Keyword::Using) {
                    children.push(self.using_directive());
                } else if let Some(member) = self.member() {
                    children.push(member);
                }
                if self.pos == before {
                    children.push(self.skip_token_as_error("type or namespace definition expected"));
                }
            }
            return self.finish(K::FileScopedNamespaceDecl, start, children, Some(ns_token));
        }
        self.expect(T::LBrace, "{");
        self.member_list(&mut children, true);
        self.expect(T::RBrace, "}");
        self.finish(K::NamespaceDecl, start, children, Some(ns_token))
    }

    fn member_list(&mut self, children: &mut Vec<NodeId>, allow_usings: bool) {
        while !self.at(T::RBrace) && !self.at(T::Eof) {
            let before = self.pos;
            if allow_usings && self.at_kw(Keyword::Using) {
                children.push(self.using_directive());
            } else if let Some(member) = self.member() {
                children.push(member);
            }
            if self.pos == before {
                children.push(self.skip_token_as_error("member declaration expected"));
            }
        }
    }

    fn type_decl(&mut self, kind: SyntaxKind, start: usize, mut children: Vec<NodeId>) -> NodeId {
        if kind == K::RecordDecl {
            let span = self.current_span();
            self.require(LanguageVersion::CSharp9, "records", span);
            self.bump();
            if self.at_kw(Keyword::Class) || self.at_kw(Keyword::Struct) {
                self.bump();
            }
        } else {
            self.bump();
        }
        let name = self.expect_ident();
        if self.at(T::Lt) {
            children.push(self.type_parameter_list());
        }
        if kind == K::RecordDecl && self.at(T::LParen) {
            children.push(self.parameter_list());
        }
        if self.at(T::Colon) {
            children.push(self.base_list());
        }
        self.skip_constraints();
        if self.at(T::LBrace) {
            self.bump();
            if kind == K::EnumDecl {
                self.enum_members(&mut children);
            } else {
                self.member_list(&mut children, false);
            }
            self.expect(T::RBrace, "}");
            self.eat(T::Semi);
        } else if !self.eat(T::Semi) {
            self.error_here("'{' expected");
        }
        self.finish(kind, start, children, name)
    }

    fn enum_members(&mut self, children: &mut Vec<NodeId>) {
        while !self.at(T::RBrace) && !self.at(T::Eof) {
            let start = self.pos;
            let mut member_children = Vec::new();
            self.attributes(&mut member_children);
            let Some(name) = self.expect_ident() else {
                children.push(self.skip_token_as_error("enum member expected"));
                continue;
            };
            if self.eat(T::Eq) {
                member_children.push(self.expr());
            }
            children.push(self.finish(K::EnumMemberDecl, start, member_children, Some(name)));
            if !self.eat(T::Comma) {
                break;
            }
        }
    }

    fn skip_constraints(&mut self) {
        while self.at_contextual("where") {
            while !matches!(self.current(), T::LBrace | T::Semi | T::Arrow | T::Eof) {
                self.bump();
                if self.at_contextual("where") {
                    break;
                }
            }
        }
    }

    fn type_parameter_list(&mut self) -> NodeId {
        let start = self.pos;
        self.bump();
        let mut children = Vec::new();
        while !self.at(T::Gt) && !self.at(T::Eof) {
            let param_start = self.pos;
            let mut attrs = Vec::new();
            self.attributes(&mut attrs);
            if self.at_kw(Keyword::In) || self.at_kw(Keyword::Out) {
                self.bump();
            }
            let Some(name) = self.expect_ident() else { break };
            children.push(self.finish(K::TypeParameter, param_start, attrs, Some(name)));
            if !self.eat(T::Comma) {
                break;
            }
        }
        self.expect(T::Gt, ">");
        self.finish(K::TypeParameterList, start, children, None)
    }

    fn base_list(&mut self) -> NodeId {
        let start = self.pos;
        self.bump();
        let mut children = vec![self.parse_type()];
        if self.at(T::LParen) {
            children.push(self.argument_list(T::LParen, T::RParen));
        }
        while self.eat(T::Comma) {
            children.push(self.parse_type());
        }
        self.finish(K::BaseList, start, children, None)
    }

    fn method_rest(
        &mut self,
        kind: SyntaxKind,
        start: usize,
        mut children: Vec<NodeId>,
        name: Option<u32>,
    ) -> NodeId {
        if self.at(T::Lt) {
            children.push(self.type_parameter_list());
        }
        children.push(self.parameter_list());
        self.skip_constraints();
        self.body(&mut children);
        self.finish(kind, start, children, name)
    }

    /// Block, `=> expr;` or `;`
    fn body(&mut self, children: &mut Vec<NodeId>) {
        match self.current() {
            T::LBrace => children.push(self.block()),
            T::Arrow => {
                children.push(self.arrow_body());
                self.expect(T::Semi, ";");
            }
            T::Semi => {
                self.bump();
            }
            _ => self.error_here("'{' expected"),
        }
    }

    fn arrow_body(&mut self) -> NodeId {
        let start = self.pos;
        self.bump();
        let expr = self.expr();
        self.finish(K::ArrowBody, start, vec![expr], None)
    }

    fn constructor(&mut self, start: usize, mut children: Vec<NodeId>) -> NodeId {
        let name = self.bump();
        children.push(self.parameter_list());
        if self.at(T::Colon) {
            let init_start = self.pos;
            self.bump();
            let which = if self.at_kw(Keyword::Base) || self.at_kw(Keyword::This) {
                Some(self.bump())
            } else {
                self.error_here("'base' or 'this' expected");
                None
            };
            let args = self.argument_list(T::LParen, T::RParen);
            children.push(self.finish(K::ConstructorInitializer, init_start, vec![args], which));
        }
        self.body(&mut children);
        self.finish(K::ConstructorDecl, start, children, Some(name))
    }

    fn destructor(&mut self, start: usize, mut children: Vec<NodeId>) -> NodeId {
        self.bump();
        let name = self.expect_ident();
        children.push(self.parameter_list());
        self.body(&mut children);
        self.finish(K::DestructorDecl, start, children, name)
    }

    fn property_rest(&mut self, start: usize, mut children: Vec<NodeId>, name: Option<u32>) -> NodeId {
        if self.at(T::Arrow) {
            children.push(self.arrow_body());
            self.expect(T::Semi, ";");
            return self.finish(K::PropertyDecl, start, children, name);
        }
        let list_start = self.pos;
        self.bump();
        let mut accessors = Vec::new();
        while !self.at(T::RBrace) && !self.at(T::Eof) {
            let accessor_start = self.pos;
            let mut accessor_children = Vec::new();
            self.attributes(&mut accessor_children);
            self.modifiers(&mut accessor_children);
            match self.ident_text_at(self.pos) {
                Some("get" | "set" | "init" | "add" | "remove") => {
                    let keyword = self.bump();
                    self.body(&mut accessor_children);
                    accessors.push(self.finish(
                        K::AccessorDecl,
                        accessor_start,
                        accessor_children,
                        Some(keyword),
                    ));
                }
                _ => {
                    accessor_children.push(self.skip_token_as_error("'get' or 'set' accessor expected"));
                    accessors.push(self.finish(K::Error, accessor_start, accessor_children, None));
                }
            }
        }
        self.expect(T::RBrace, "}");
        children.push(self.finish(K::AccessorList, list_start, accessors, None));
        if self.eat(T::Eq) {
            children.push(self.expr());
            self.expect(T::Semi, ";");
        }
        self.finish(K::PropertyDecl, start, children, name)
    }

    fn parameter_list(&mut self) -> NodeId {
        let start = self.pos;
        let mut children = Vec::new();
        if self.expect(T::LParen, "(").is_none() {
            return self.finish(K::ParameterList, start, children, None);
        }
        while !self.at(T::RParen) && !self.at(T::Eof) {
            let before = self.pos;
            children.push(self.parameter(false));
            if self.pos == before || !self.eat(T::Comma) {
                break;
            }
        }
        self.expect(T::RParen, ")");
        self.finish(K::ParameterList, start, children, None)
    }

    fn parameter(&mut self, allow_untyped: bool) -> NodeId {
        let start = self.pos;
        let mut children = Vec::new();
        self.attributes(&mut children);
        let mod_start = self.pos;
        while matches!(
            self.current(),
            T::Keyword(Keyword::Ref | Keyword::Out | Keyword::In | Keyword::Params | Keyword::This)
        ) || (self.at_contextual("scoped") && self.nth(1) == T::Ident)
        {
            self.bump();
        }
        if self.pos > mod_start {
            children.push(self.finish(K::ModifierList, mod_start, Vec::new(), None));
        }
        let untyped = allow_untyped && self.at(T::Ident) && matches!(self.nth(1), T::Comma | T::RParen);
        if !untyped {
            children.push(self.parse_type());
        }
        let name = self.expect_ident();
        if self.eat(T::Eq) {
            children.push(self.expr());
        }
        self.finish(K::Parameter, start, children, name)
    }

    fn declarators(&mut self, start: usize, ty: NodeId, first: Option<u32>) -> NodeId {
        let mut children = vec![ty];
        let mut name = first;
        loop {
            let decl_start = name.map_or(self.pos, |n| n as usize);
            let mut init = Vec::new();
            if self.eat(T::Eq) {
                if self.at(T::LBrace) {
                    init.push(self.initializer());
                } else {
                    init.push(self.expr());
                }
            }
            children.push(self.finish(K::VariableDeclarator, decl_start, init, name));
            if !self.eat(T::Comma) {
                break;
            }
            name = self.expect_ident();
            if name.is_none() {
                break;
            }
        }
        self.finish(K::VariableDeclaration, start, children, None)
    }

    /// Type followed by one or more declarators
    fn variable_declaration(&mut self) -> NodeId {
        let start = self.pos;
        self.eat(T::Keyword(Keyword::Ref));
        let ty = self.parse_type();
        let name = self.expect_ident();
        self.declarators(start, ty, name)
    }

    // ----- types -----

    fn parse_type(&mut self) -> NodeId {
        self.nested(false, Self::type_syntax)
    }

    fn type_syntax(&mut self) -> NodeId {
        let start = self.pos;
        let mut ty = match self.current() {
            T::Keyword(kw) if kw.is_predefined_type() => self.leaf(K::PredefinedType),
            T::Ident => {
                let mut left = self.named_type();
                let mut qualifiers = 0;
                while matches!(self.current(), T::Dot | T::ColonColon)
                    && self.nth(1) == T::Ident
                    && self.depth + qualifiers < MAX_NESTING
                {
                    qualifiers += 1;
                    self.bump();
                    let right = self.named_type();
                    left = self.finish(K::QualifiedType, start, vec![left, right], None);
                }
                left
            }
            T::LParen => {
                self.bump();
                let mut elements = Vec::new();
                while !self.at(T::RParen) && !self.at(T::Eof) {
                    elements.push(self.parse_type());
                    if self.at(T::Ident) {
                        self.bump();
                    }
                    if !self.eat(T::Comma) {
                        break;
                    }
                }
                self.expect(T::RParen, ")");
                self.finish(K::TupleType, start, elements, None)
            }
            _ => return self.missing("type expected"),
        };
        loop {
            match self.current() {
                T::Question => {
                    self.bump();
                    ty = self.finish(K::NullableType, start, vec![ty], None);
                }
                T::LBracket if matches!(self.nth(1), T::RBracket | T::Comma) => {
                    self.bump();
                    while self.eat(T::Comma) {}
                    self.expect(T::RBracket, "]");
                    ty = self.finish(K::ArrayType, start, vec![ty], None);
                }
                _ => break,
            }
        }
        ty
    }

    fn named_type(&mut self) -> NodeId {
        let start = self.pos;
        let name = self.bump();
        let mut children = Vec::new();
        if self.at(T::Lt) {
            children.push(self.type_argument_list());
        }
        self.finish(K::NamedType, start, children, Some(name))
    }

    fn type_argument_list(&mut self) -> NodeId {
        let start = self.pos;
        self.bump();
        let mut children = Vec::new();
        while !self.at(T::Gt) && !self.at(T::Eof) {
            let before = self.pos;
            children.push(self.parse_type());
            if self.pos == before || !self.eat(T::Comma) {
                break;
            }
        }
        self.expect(T::Gt, ">");
        self.finish(K::TypeArgumentList, start, children, None)
    }

    // ----- statements -----

    fn block(&mut self) -> NodeId {
        let start = self.pos;
        self.bump();
        let mut children = Vec::new();
        while !self.at(T::RBrace) && !self.at(T::Eof) {
            children.push(self.statement());
        }
        self.expect(T::RBrace, "}");
        self.finish(K::Block, start, children, None)
    }

    fn embedded_statement(&mut self) -> NodeId {
        if self.at(T::RBrace) || self.at(T::Eof) {
            return self.missing("statement expected");
        }
        self.statement()
    }

    /// Parse one statement; always consumes at least one token unless at `}`/EOF.
    fn statement(&mut self) -> NodeId {
        self.nested(true, Self::plain_statement)
    }

    fn plain_statement(&mut self) -> NodeId {
        let start = self.pos;
        match self.current() {
            T::LBrace => self.block(),
            T::Semi => self.leaf(K::EmptyStmt),
            T::Keyword(kw) => match kw {
                Keyword::If => self.if_stmt(),
                Keyword::While => self.while_stmt(),
                Keyword::Do => self.do_stmt(),
                Keyword::For => self.for_stmt(),
                Keyword::Foreach => self.foreach_stmt(),
                Keyword::Switch => self.switch_stmt(),
                Keyword::Break => self.simple_jump(K::BreakStmt),
                Keyword::Continue => self.simple_jump(K::ContinueStmt),
                Keyword::Return | Keyword::Throw => {
                    let kind = if kw == Keyword::Return { K::ReturnStmt } else { K::ThrowStmt };
                    let token = self.bump();
                    let mut children = Vec::new();
                    if !self.at(T::Semi) {
                        children.push(self.expr());
                    }
                    self.expect(T::Semi, ";");
                    self.finish(kind, start, children, Some(token))
                }
                Keyword::Goto => self.goto_stmt(),
                Keyword::Try => self.try_stmt(),
                Keyword::Lock => {
                    let token = self.bump();
                    self.expect(T::LParen, "(");
                    let expr = self.expr();
                    self.expect(T::RParen, ")");
                    let body = self.embedded_statement();
                    self.finish(K::LockStmt, start, vec![expr, body], Some(token))
                }
                Keyword::Checked | Keyword::Unchecked if self.nth(1) == T::LBrace => {
                    let token = self.bump();
                    let block = self.block();
                    self.finish(K::CheckedStmt, start, vec![block], Some(token))
                }
                Keyword::Using if self.nth(1) == T::LParen => self.using_stmt(),
                Keyword::Using => {
                    let span = self.current_span();
                    self.require(LanguageVersion::CSharp8, "using declarations", span);
                    let mods_start = self.pos;
                    self.bump();
                    let mods = self.finish(K::ModifierList, mods_start, Vec::new(), None);
                    self.local_decl(start, vec![mods])
                }
                Keyword::Const => {
                    let mods_start = self.pos;
                    self.bump();
                    let mods = self.finish(K::ModifierList, mods_start, Vec::new(), None);
                    self.local_decl(start, vec![mods])
                }
                Keyword::Static | Keyword::Unsafe if self.looks_like_local_function() => {
                    self.local_function()
                }
                _ if self.looks_like_local_function() => self.local_function(),
                _ if self.looks_like_local_decl() => self.local_decl(start, Vec::new()),
                _ => self.expression_stmt(),
            },
            T::Ident => {
                let text = self.text_at(self.pos);
                if text == "yield" && self.nth(1) == T::Keyword(Keyword::Return) {
                    let token = self.bump();
                    self.bump();
                    let expr = self.expr();
                    self.expect(T::Semi, ";");
                    self.finish(K::YieldReturnStmt, start, vec![expr], Some(token))
                } else if text == "yield" && self.nth(1) == T::Keyword(Keyword::Break) {
                    let token = self.bump();
                    self.bump();
                    self.expect(T::Semi, ";");
                    self.finish(K::YieldBreakStmt, start, Vec::new(), Some(token))
                } else if self.nth(1) == T::Colon {
                    let label = self.bump();
                    self.bump();
                    let stmt = self.embedded_statement();
                    self.finish(K::LabeledStmt, start, vec![stmt], Some(label))
                } else if self.looks_like_local_function() {
                    self.local_function()
                } else if self.looks_like_local_decl() {
                    self.local_decl(start, Vec::new())
                } else {
                    self.expression_stmt()
                }
            }
            kind if can_start_operand(kind) => self.expression_stmt(),
            _ => self.skip_token_as_error(format!(
                "invalid expression term '{}'",
                self.text_at(self.pos)
            )),
        }
    }

    fn expression_stmt(&mut self) -> NodeId {
        let start = self.pos;
        let expr = self.expr();
        if self.pos == start {
            // nothing parsed: consume the offending token
            let error = self.skip_token_as_error("invalid expression term");
            return self.finish(K::ExpressionStmt, start, vec![expr, error], None);
        }
        self.expect(T::Semi, ";");
        self.finish(K::ExpressionStmt, start, vec![expr], None)
    }

    fn local_decl(&mut self, start: usize, mut children: Vec<NodeId>) -> NodeId {
        children.push(self.variable_declaration());
        self.expect(T::Semi, ";");
        self.finish(K::LocalDeclStmt, start, children, None)
    }

    fn local_function(&mut self) -> NodeId {
        let start = self.pos;
        let mut children = Vec::new();
        self.modifiers(&mut children);
        while self.at_contextual("async") {
            let mod_start = self.pos;
            self.bump();
            children.push(self.finish(K::ModifierList, mod_start, Vec::new(), None));
        }
        children.push(self.parse_type());
        let name = self.expect_ident();
        self.method_rest(K::LocalFunctionStmt, start, children, name)
    }

    fn simple_jump(&mut self, kind: SyntaxKind) -> NodeId {
        let start = self.pos;
        let token = self.bump();
        self.expect(T::Semi, ";");
        self.finish(kind, start, Vec::new(), Some(token))
    }

    fn paren_condition(&mut self) -> NodeId {
        self.expect(T::LParen, "(");
        let cond = self.expr();
        self.expect(T::RParen, ")");
        cond
    }

    fn if_stmt(&mut self) -> NodeId {
        let start = self.pos;
        let token = self.bump();
        let cond = self.paren_condition();
        let then = self.embedded_statement();
        let mut children = vec![cond, then];
        if self.at_kw(Keyword::Else) {
            let else_start = self.pos;
            let else_token = self.bump();
            let stmt = self.embedded_statement();
            children.push(self.finish(K::ElseClause, else_start, vec![stmt], Some(else_token)));
        }
        self.finish(K::IfStmt, start, children, Some(token))
    }

    fn while_stmt(&mut self) -> NodeId {
        let start = self.pos;
        let token = self.bump();
        let cond = self.paren_condition();
        let body = self.embedded_statement();
        self.finish(K::WhileStmt, start, vec![cond, body], Some(token))
    }

    fn do_stmt(&mut self) -> NodeId {
        let start = self.pos;
        let token = self.bump();
        let body = self.embedded_statement();
        self.expect(T::Keyword(Keyword::While), "while");
        let cond = self.paren_condition();
        self.expect(T::Semi, ";");
        self.finish(K::DoStmt, start, vec![body, cond], Some(token))
    }

    fn for_stmt(&mut self) -> NodeId {
        let start = self.pos;
        let token = self.bump();
        self.expect(T::LParen, "(");

        let init_start = self.pos;
        let mut init = Vec::new();
        if self.looks_like_local_decl() {
            init.push(self.variable_declaration());
        } else {
            self.expression_list(&mut init, T::Semi);
        }
        let init = self.finish(K::ForInitializer, init_start, init, None);
        self.expect(T::Semi, ";");

        let cond_start = self.pos;
        let mut cond = Vec::new();
        if !self.at(T::Semi) {
            cond.push(self.expr());
        }
        let cond = self.finish(K::ForCondition, cond_start, cond, None);
        self.expect(T::Semi, ";");

        let incr_start = self.pos;
        let mut incr = Vec::new();
        self.expression_list(&mut incr, T::RParen);
        let incr = self.finish(K::ForIncrementor, incr_start, incr, None);
        self.expect(T::RParen, ")");

        let body = self.embedded_statement();
        self.finish(K::ForStmt, start, vec![init, cond, incr, body], Some(token))
    }

    fn expression_list(&mut self, out: &mut Vec<NodeId>, terminator: TokenKind) {
        while !self.at(terminator) && !self.at(T::Eof) {
            let before = self.pos;
            out.push(self.expr());
            if self.pos == before || !self.eat(T::Comma) {
                break;
            }
        }
    }

    fn foreach_stmt(&mut self) -> NodeId {
        let start = self.pos;
        self.bump();
        self.expect(T::LParen, "(");
        let ty = self.parse_type();
        let name = self.expect_ident();
        self.expect(T::Keyword(Keyword::In), "in");
        let collection = self.expr();
        self.expect(T::RParen, ")");
        let body = self.embedded_statement();
        self.finish(K::ForEachStmt, start, vec![ty, collection, body], name)
    }

    fn switch_stmt(&mut self) -> NodeId {
        let start = self.pos;
        let token = self.bump();
        let governing = self.paren_condition();
        let mut children = vec![governing];
        self.expect(T::LBrace, "{");
        while !self.at(T::RBrace) && !self.at(T::Eof) {
            let before = self.pos;
            children.push(self.switch_section());
            if self.pos == before {
                children.push(self.skip_token_as_error("'case' or 'default' expected"));
            }
        }
        self.expect(T::RBrace, "}");
        self.finish(K::SwitchStmt, start, children, Some(token))
    }

    fn at_switch_label(&self) -> bool {
        self.at_kw(Keyword::Case) || (self.at_kw(Keyword::Default) && self.nth(1) == T::Colon)
    }

    fn switch_section(&mut self) -> NodeId {
        let start = self.pos;
        let mut children = Vec::new();
        while self.at_switch_label() {
            let label_start = self.pos;
            let token = self.bump();
            if self.kind_at(token as usize) == T::Keyword(Keyword::Default) {
                self.expect(T::Colon, ":");
                children.push(self.finish(K::DefaultLabel, label_start, Vec::new(), Some(token)));
                continue;
            }
            let mut label_children = vec![self.pattern()];
            if self.at_contextual("when") {
                label_children.push(self.when_clause(false));
            }
            self.expect(T::Colon, ":");
            children.push(self.finish(K::CaseLabel, label_start, label_children, Some(token)));
        }
        if children.is_empty() {
            return self.finish(K::Error, start, children, None);
        }
        while !self.at_switch_label() && !self.at(T::RBrace) && !self.at(T::Eof) {
            children.push(self.statement());
        }
        self.finish(K::SwitchSection, start, children, None)
    }

    fn when_clause(&mut self, parenthesized: bool) -> NodeId {
        let start = self.pos;
        let token = self.bump();
        let expr = if parenthesized {
            self.paren_condition()
        } else {
            self.expr()
        };
        self.finish(K::WhenClause, start, vec![expr], Some(token))
    }

    fn goto_stmt(&mut self) -> NodeId {
        let start = self.pos;
        self.bump();
        let mut children = Vec::new();
        let target = match self.current() {
            T::Keyword(Keyword::Case) => {
                let token = self.bump();
                children.push(self.expr());
                Some(token)
            }
            T::Keyword(Keyword::Default) => Some(self.bump()),
            _ => self.expect_ident(),
        };
        self.expect(T::Semi, ";");
        self.finish(K::GotoStmt, start, children, target)
    }

    fn try_stmt(&mut self) -> NodeId {
        let start = self.pos;
        let token = self.bump();
        let mut children = Vec::new();
        if self.at(T::LBrace) {
            children.push(self.block());
        } else {
            children.push(self.missing("'{' expected"));
        }
        while self.at_kw(Keyword::Catch) {
            let catch_start = self.pos;
            let catch_token = self.bump();
            let mut catch_children = Vec::new();
            if self.at(T::LParen) {
                let decl_start = self.pos;
                self.bump();
                let ty = self.parse_type();
                let name = if self.at(T::Ident) { Some(self.bump()) } else { None };
                self.expect(T::RParen, ")");
                catch_children.push(self.finish(K::CatchDeclaration, decl_start, vec![ty], name));
            }
            if self.at_contextual("when") {
                catch_children.push(self.when_clause(true));
            }
            if self.at(T::LBrace) {
                catch_children.push(self.block());
            } else {
                catch_children.push(self.missing("'{' expected"));
            }
            children.push(self.finish(K::CatchClause, catch_start, catch_children, Some(catch_token)));
        }
        if self.at_kw(Keyword::Finally) {
            let finally_start = self.pos;
            let finally_token = self.bump();
            let block = if self.at(T::LBrace) {
                self.block()
            } else {
                self.missing("'{' expected")
            };
            children.push(self.finish(K::FinallyClause, finally_start, vec![block], Some(finally_token)));
        }
        if children.len() == 1 {
            self.error_here("'catch' or 'finally' expected");
        }
        self.finish(K::TryStmt, start, children, Some(token))
    }

    fn using_stmt(&mut self) -> NodeId {
        let start = self.pos;
        let token = self.bump();
        self.bump();
        let resource = if self.looks_like_local_decl() {
            self.variable_declaration()
        } else {
            self.expr()
        };
        self.expect(T::RParen, ")");
        let body = self.embedded_statement();
        self.finish(K::UsingStmt, start, vec![resource, body], Some(token))
    }

    // ----- expressions -----

    fn expr(&mut self) -> NodeId {
        self.nested(false, Self::assignment)
    }

    fn assignment(&mut self) -> NodeId {
        if self.looks_like_lambda() {
            return self.lambda();
        }
        let start = self.pos;
        let target = self.conditional();
        if self.current().is_assignment_operator() {
            if self.at(T::QuestionQuestionEq) {
                let span = self.current_span();
                self.require(LanguageVersion::CSharp8, "null-coalescing assignment", span);
            }
            let op = self.bump();
            let value = if self.at(T::LBrace) && self.kind_at(op as usize) == T::Eq {
                self.initializer()
            } else {
                self.expr()
            };
            return self.finish(K::AssignmentExpr, start, vec![target, value], Some(op));
        }
        target
    }

    fn conditional(&mut self) -> NodeId {
        let start = self.pos;
        let cond = self.coalesce();
        if self.at(T::Question) {
            let op = self.bump();
            let when_true = self.expr();
            self.expect(T::Colon, ":");
            let when_false = self.expr();
            return self.finish(K::ConditionalExpr, start, vec![cond, when_true, when_false], Some(op));
        }
        cond
    }

    fn coalesce(&mut self) -> NodeId {
        let start = self.pos;
        let left = self.binary(PREC_OR);
        if self.at(T::QuestionQuestion) {
            let op = self.bump();
            let right = if self.at_kw(Keyword::Throw) {
                self.unary()
            } else {
                self.nested(false, Self::coalesce)
            };
            return self.finish(K::BinaryExpr, start, vec![left, right], Some(op));
        }
        left
    }

    fn binary_precedence(&self) -> Option<u8> {
        let prec = match self.current() {
            T::PipePipe => PREC_OR,
            T::AmpAmp => PREC_AND,
            T::Pipe => PREC_BIT_OR,
            T::Caret => PREC_BIT_XOR,
            T::Amp => PREC_BIT_AND,
            T::EqEq | T::BangEq => PREC_EQUALITY,
            T::Gt if self.is_shift_right() => PREC_SHIFT,
            T::Lt | T::Gt | T::LtEq | T::GtEq => PREC_RELATIONAL,
            T::Keyword(Keyword::Is | Keyword::As) => PREC_RELATIONAL,
            T::Shl => PREC_SHIFT,
            T::Plus | T::Minus => PREC_ADDITIVE,
            T::Star | T::Slash | T::Percent => PREC_MULTIPLICATIVE,
            _ => return None,
        };
        Some(prec)
    }

    fn is_shift_right(&self) -> bool {
        self.nth(1) == T::Gt
            && self.tokens[self.pos].span.end() == self.tokens[self.pos + 1].span.start
    }

    fn binary(&mut self, min_prec: u8) -> NodeId {
        let start = self.pos;
        let base = self.depth;
        let mut left = self.unary();
        while let Some(prec) = self.binary_precedence() {
            if prec < min_prec {
                break;
            }
            // Each operator nests the left operand one level deeper
            self.depth += 1;
            match self.current() {
                T::Keyword(Keyword::Is) => {
                    let op = self.bump();
                    let pattern = self.pattern();
                    left = self.finish(K::IsPatternExpr, start, vec![left, pattern], Some(op));
                }
                T::Keyword(Keyword::As) => {
                    let op = self.bump();
                    let ty = self.parse_type();
                    left = self.finish(K::AsExpr, start, vec![left, ty], Some(op));
                }
                _ => {
                    let shift = self.at(T::Gt) && self.is_shift_right();
                    let op = self.bump();
                    if shift {
                        self.bump();
                    }
                    let right = self.binary(prec + 1);
                    left = self.finish(K::BinaryExpr, start, vec![left, right], Some(op));
                }
            }
        }
        self.depth = base;
        left
    }

    fn unary(&mut self) -> NodeId {
        self.nested(false, Self::unary_expr)
    }

    fn unary_expr(&mut self) -> NodeId {
        let start = self.pos;
        let expr = match self.current() {
            T::Bang | T::Minus | T::Plus | T::Tilde | T::PlusPlus | T::MinusMinus | T::Amp | T::Star => {
                let op = self.bump();
                let operand = self.unary();
                self.finish(K::PrefixUnaryExpr, start, vec![operand], Some(op))
            }
            T::Ident if self.at_contextual("await") && can_start_operand(self.nth(1)) => {
                let op = self.bump();
                let operand = self.unary();
                self.finish(K::AwaitExpr, start, vec![operand], Some(op))
            }
            T::Keyword(Keyword::Throw) => {
                let op = self.bump();
                let operand = self.expr();
                self.finish(K::ThrowExpr, start, vec![operand], Some(op))
            }
            T::LParen if self.looks_like_cast() => {
                let open = self.bump();
                let ty = self.parse_type();
                self.expect(T::RParen, ")");
                let operand = self.unary();
                self.finish(K::CastExpr, start, vec![ty, operand], Some(open))
            }
            _ => {
                let primary = self.primary();
                self.postfix(start, primary)
            }
        };
        if self.at_kw(Keyword::Switch) && self.nth(1) == T::LBrace {
            return self.switch_expr(start, expr);
        }
        expr
    }

    fn postfix(&mut self, start: usize, mut expr: NodeId) -> NodeId {
        let base = self.depth;
        loop {
            let continues = matches!(
                self.current(),
                T::Dot | T::QuestionDot | T::LParen | T::LBracket | T::PlusPlus | T::MinusMinus
            ) || (self.at(T::Bang) && !can_start_operand(self.nth(1)));
            if !continues {
                break;
            }
            if self.depth >= MAX_NESTING {
                let rest = self.skip_nested(false);
                expr = self.finish(K::Error, start, vec![expr, rest], None);
                break;
            }
            self.depth += 1;
            match self.current() {
                T::Dot => {
                    self.bump();
                    let name = self.expect_ident();
                    let mut children = vec![expr];
                    if self.at(T::Lt) {
                        if let Some(j) = self.scan_type_args(self.pos) {
                            if matches!(self.kind_at(j), T::LParen | T::Dot) {
                                children.push(self.type_argument_list());
                            }
                        }
                    }
                    expr = self.finish(K::MemberAccessExpr, start, children, name);
                }
                T::QuestionDot => {
                    self.bump();
                    if self.at(T::LBracket) {
                        let args = self.argument_list(T::LBracket, T::RBracket);
                        expr = self.finish(K::ConditionalElementAccessExpr, start, vec![expr, args], None);
                    } else {
                        let name = self.expect_ident();
                        expr = self.finish(K::ConditionalAccessExpr, start, vec![expr], name);
                    }
                }
                T::LParen => {
                    let args = self.argument_list(T::LParen, T::RParen);
                    expr = self.finish(K::InvocationExpr, start, vec![expr, args], None);
                }
                T::LBracket => {
                    let args = self.argument_list(T::LBracket, T::RBracket);
                    expr = self.finish(K::ElementAccessExpr, start, vec![expr, args], None);
                }
                // `++`, `--` and the null-forgiving `!`
                _ => {
                    let op = self.bump();
                    expr = self.finish(K::PostfixUnaryExpr, start, vec![expr], Some(op));
                }
            }
        }
        self.depth = base;
        expr
    }

    fn primary(&mut self) -> NodeId {
        let start = self.pos;
        match self.current() {
            T::IntLiteral | T::RealLiteral | T::CharLiteral => self.leaf(K::LiteralExpr),
            T::StringLiteral => {
                let interpolated = self.text_at(self.pos).starts_with('$')
                    || self.text_at(self.pos).starts_with("@$");
                self.leaf(if interpolated {
                    K::InterpolatedStringExpr
                } else {
                    K::LiteralExpr
                })
            }
            T::Keyword(Keyword::True | Keyword::False | Keyword::Null) => self.leaf(K::LiteralExpr),
            T::Keyword(Keyword::This) => self.leaf(K::ThisExpr),
            T::Keyword(Keyword::Base) => self.leaf(K::BaseExpr),
            T::Keyword(Keyword::Default) => {
                let token = self.bump();
                let mut children = Vec::new();
                if self.at(T::LParen) {
                    self.bump();
                    children.push(self.parse_type());
                    self.expect(T::RParen, ")");
                }
                self.finish(K::DefaultExpr, start, children, Some(token))
            }
            T::Keyword(Keyword::Typeof | Keyword::Sizeof) => {
                let token = self.bump();
                self.expect(T::LParen, "(");
                let ty = self.parse_type();
                self.expect(T::RParen, ")");
                self.finish(K::TypeOfExpr, start, vec![ty], Some(token))
            }
            T::Keyword(Keyword::Checked | Keyword::Unchecked) => {
                let token = self.bump();
                self.expect(T::LParen, "(");
                let inner = self.expr();
                self.expect(T::RParen, ")");
                self.finish(K::ParenExpr, start, vec![inner], Some(token))
            }
            T::Keyword(Keyword::New) => self.new_expr(),
            T::Keyword(Keyword::Delegate) => {
                let token = self.bump();
                let mut children = Vec::new();
                if self.at(T::LParen) {
                    children.push(self.parameter_list());
                }
                if self.at(T::LBrace) {
                    children.push(self.block());
                } else {
                    children.push(self.missing("'{' expected"));
                }
                self.finish(K::LambdaExpr, start, children, Some(token))
            }
            T::Keyword(kw) if kw.is_predefined_type() => {
                let ty = self.leaf(K::PredefinedType);
                self.finish(K::TypeExpr, start, vec![ty], None)
            }
            T::Ident => {
                let name = self.bump();
                let mut children = Vec::new();
                if self.at(T::Lt) {
                    if let Some(j) = self.scan_type_args(self.pos) {
                        if matches!(self.kind_at(j), T::LParen | T::Dot) {
                            children.push(self.type_argument_list());
                        }
                    }
                }
                self.finish(K::IdentifierName, start, children, Some(name))
            }
            T::LParen => {
                let open = self.bump();
                let first = self.expr();
                if self.at(T::Comma) {
                    let mut elements = vec![first];
                    while self.eat(T::Comma) {
                        elements.push(self.expr());
                    }
                    self.expect(T::RParen, ")");
                    return self.finish(K::TupleExpr, start, elements, Some(open));
                }
                self.expect(T::RParen, ")");
                self.finish(K::ParenExpr, start, vec![first], None)
            }
            _ => {
                let text = self.text_at(self.pos).to_string();
                self.missing(&format!("invalid expression term '{}'", text))
            }
        }
    }

    fn new_expr(&mut self) -> NodeId {
        let start = self.pos;
        let token = self.bump();
        match self.current() {
            T::LParen => {
                let span = self.tokens[token as usize].span;
                self.require(LanguageVersion::CSharp9, "target-typed object creation", span);
                let mut children = vec![self.argument_list(T::LParen, T::RParen)];
                if self.at(T::LBrace) {
                    children.push(self.initializer());
                }
                self.finish(K::ImplicitObjectCreationExpr, start, children, Some(token))
            }
            T::LBracket => {
                self.bump();
                while self.eat(T::Comma) {}
                self.expect(T::RBracket, "]");
                let init = if self.at(T::LBrace) {
                    self.initializer()
                } else {
                    self.missing("'{' expected")
                };
                self.finish(K::ImplicitArrayCreationExpr, start, vec![init], Some(token))
            }
            T::LBrace => {
                let init = self.initializer();
                self.finish(K::ImplicitObjectCreationExpr, start, vec![init], Some(token))
            }
            _ => {
                let ty = self.parse_type();
                let is_array_type = self.nodes[ty.index()].kind == K::ArrayType;
                let mut children = vec![ty];
                if self.at(T::LBracket) {
                    self.bump();
                    while !self.at(T::RBracket) && !self.at(T::Eof) {
                        let before = self.pos;
                        children.push(self.expr());
                        if self.pos == before || !self.eat(T::Comma) {
                            break;
                        }
                    }
                    self.expect(T::RBracket, "]");
                    while self.at(T::LBracket) {
                        self.bump();
                        while self.eat(T::Comma) {}
                        self.expect(T::RBracket, "]");
                    }
                    if self.at(T::LBrace) {
                        children.push(self.initializer());
                    }
                    return self.finish(K::ArrayCreationExpr, start, children, Some(token));
                }
                if is_array_type {
                    if self.at(T::LBrace) {
                        children.push(self.initializer());
                    } else {
                        self.error_here("array creation must have array size or array initializer");
                    }
                    return self.finish(K::ArrayCreationExpr, start, children, Some(token));
                }
                if self.at(T::LParen) {
                    children.push(self.argument_list(T::LParen, T::RParen));
                } else if !self.at(T::LBrace) {
                    self.error_here("'(' expected");
                }
                if self.at(T::LBrace) {
                    children.push(self.initializer());
                }
                self.finish(K::ObjectCreationExpr, start, children, Some(token))
            }
        }
    }

    fn initializer(&mut self) -> NodeId {
        self.nested(false, Self::initializer_elements)
    }

    fn initializer_elements(&mut self) -> NodeId {
        let start = self.pos;
        self.bump();
        let mut children = Vec::new();
        while !self.at(T::RBrace) && !self.at(T::Eof) {
            let before = self.pos;
            if self.at(T::LBrace) {
                children.push(self.initializer());
            } else {
                children.push(self.expr());
            }
            if self.pos == before || !self.eat(T::Comma) {
                break;
            }
        }
        self.expect(T::RBrace, "}");
        self.finish(K::InitializerExpr, start, children, None)
    }

    fn argument_list(&mut self, open: TokenKind, close: TokenKind) -> NodeId {
        let start = self.pos;
        let mut children = Vec::new();
        if !self.eat(open) {
            self.error_here("'(' expected");
            return self.finish(K::ArgumentList, start, children, None);
        }
        while !self.at(close) && !self.at(T::Eof) {
            let before = self.pos;
            children.push(self.argument());
            if self.pos == before || !self.eat(T::Comma) {
                break;
            }
        }
        let close_text = if close == T::RBracket { "]" } else { ")" };
        self.expect(close, close_text);
        self.finish(K::ArgumentList, start, children, None)
    }

    fn argument(&mut self) -> NodeId {
        let start = self.pos;
        if self.at(T::Ident) && self.nth(1) == T::Colon {
            self.bump();
            self.bump();
        }
        let modifier = match self.current() {
            T::Keyword(Keyword::Ref | Keyword::Out | Keyword::In) => Some(self.bump()),
            _ => None,
        };
        let is_out_decl = modifier.is_some()
            && self
                .scan_type(self.pos)
                .is_some_and(|j| self.kind_at(j) == T::Ident && matches!(self.kind_at(j + 1), T::Comma | T::RParen));
        let value = if is_out_decl {
            let decl_start = self.pos;
            let ty = self.parse_type();
            let name = self.expect_ident();
            self.finish(K::DeclarationExpr, decl_start, vec![ty], name)
        } else {
            self.expr()
        };
        self.finish(K::Argument, start, vec![value], modifier)
    }

    fn lambda(&mut self) -> NodeId {
        let start = self.pos;
        let mut children = Vec::new();
        let mods_start = self.pos;
        while self.at_contextual("async") || self.at_kw(Keyword::Static) {
            if self.at_contextual("async") && matches!(self.nth(1), T::Arrow) {
                break;
            }
            self.bump();
        }
        if self.pos > mods_start {
            children.push(self.finish(K::ModifierList, mods_start, Vec::new(), None));
        }
        if self.at(T::Ident) {
            let list_start = self.pos;
            let name = self.bump();
            let param = self.finish(K::Parameter, list_start, Vec::new(), Some(name));
            children.push(self.finish(K::ParameterList, list_start, vec![param], None));
        } else {
            let list_start = self.pos;
            self.bump();
            let mut params = Vec::new();
            while !self.at(T::RParen) && !self.at(T::Eof) {
                let before = self.pos;
                params.push(self.parameter(true));
                if self.pos == before || !self.eat(T::Comma) {
                    break;
                }
            }
            self.expect(T::RParen, ")");
            children.push(self.finish(K::ParameterList, list_start, params, None));
        }
        let arrow = self.expect(T::Arrow, "=>");
        if self.at(T::LBrace) {
            children.push(self.block());
        } else {
            children.push(self.expr());
        }
        self.finish(K::LambdaExpr, start, children, arrow)
    }

    fn switch_expr(&mut self, start: usize, governing: NodeId) -> NodeId {
        let span = self.current_span();
        self.require(LanguageVersion::CSharp8, "switch expression", span);
        let token = self.bump();
        self.bump();
        let mut children = vec![governing];
        while !self.at(T::RBrace) && !self.at(T::Eof) {
            let arm_start = self.pos;
            let mut arm = vec![self.pattern()];
            if self.at_contextual("when") {
                arm.push(self.when_clause(false));
            }
            let arrow = self.expect(T::Arrow, "=>");
            arm.push(self.expr());
            let made_progress = self.pos > arm_start;
            children.push(self.finish(K::SwitchExprArm, arm_start, arm, arrow));
            if !made_progress || !self.eat(T::Comma) {
                break;
            }
        }
        self.expect(T::RBrace, "}");
        self.finish(K::SwitchExpr, start, children, Some(token))
    }

    // ----- patterns -----

    fn pattern(&mut self) -> NodeId {
        self.nested(false, Self::or_pattern)
    }

    fn or_pattern(&mut self) -> NodeId {
        let start = self.pos;
        let base = self.depth;
        let mut left = self.and_pattern();
        while self.at_contextual("or") {
            self.depth += 1;
            let span = self.current_span();
            self.require(LanguageVersion::CSharp9, "pattern combinators", span);
            let op = self.bump();
            let right = self.nested(false, Self::and_pattern);
            left = self.finish(K::OrPattern, start, vec![left, right], Some(op));
        }
        self.depth = base;
        left
    }

    fn and_pattern(&mut self) -> NodeId {
        let start = self.pos;
        let base = self.depth;
        let mut left = self.not_pattern();
        while self.at_contextual("and") {
            self.depth += 1;
            let span = self.current_span();
            self.require(LanguageVersion::CSharp9, "pattern combinators", span);
            let op = self.bump();
            let right = self.nested(false, Self::not_pattern);
            left = self.finish(K::AndPattern, start, vec![left, right], Some(op));
        }
        self.depth = base;
        left
    }

    fn not_pattern(&mut self) -> NodeId {
        let start = self.pos;
        if self.at_contextual("not") && !matches!(self.nth(1), T::RParen | T::Colon | T::Arrow | T::Comma) {
            let span = self.current_span();
            self.require(LanguageVersion::CSharp9, "not pattern", span);
            let op = self.bump();
            let inner = self.nested(false, Self::not_pattern);
            return self.finish(K::NotPattern, start, vec![inner], Some(op));
        }
        self.primary_pattern()
    }

    fn primary_pattern(&mut self) -> NodeId {
        let start = self.pos;
        match self.current() {
            T::LParen => {
                self.bump();
                let inner = self.pattern();
                self.expect(T::RParen, ")");
                return self.finish(K::ParenthesizedPattern, start, vec![inner], None);
            }
            T::Lt | T::Gt | T::LtEq | T::GtEq => {
                let span = self.current_span();
                self.require(LanguageVersion::CSharp9, "relational pattern", span);
                let op = self.bump();
                let value = self.binary(PREC_SHIFT);
                return self.finish(K::RelationalPattern, start, vec![value], Some(op));
            }
            T::Ident if self.at_contextual("_") && !matches!(self.nth(1), T::Dot | T::LParen) => {
                return self.leaf(K::DiscardPattern);
            }
            T::Ident if self.at_contextual("var") && self.nth(1) == T::Ident => {
                self.bump();
                let name = self.bump();
                return self.finish(K::VarPattern, start, Vec::new(), Some(name));
            }
            T::Ident | T::Keyword(_) if !self.current().is_literal() => {
                if let Some(j) = self.scan_type(self.pos) {
                    let designation = self.ident_text_at(j);
                    if designation.is_some_and(|d| !matches!(d, "and" | "or" | "when")) {
                        let ty = self.parse_type();
                        let name = self.bump();
                        return self.finish(K::DeclarationPattern, start, vec![ty], Some(name));
                    }
                    let simple = j == self.pos + 1 || self.kind_at(self.pos + 1) == T::Lt;
                    let predefined = matches!(self.current(), T::Keyword(kw) if kw.is_predefined_type());
                    let is_label = self.kind_at(j) == T::Colon;
                    if predefined || (simple && !is_label && self.at(T::Ident)) {
                        let ty = self.parse_type();
                        return self.finish(K::TypePattern, start, vec![ty], None);
                    }
                }
            }
            _ => {}
        }
        let value = self.binary(PREC_SHIFT);
        self.finish(K::ConstantPattern, start, vec![value], None)
    }
}

/// Tokens that can begin an operand expression
fn can_start_operand(kind: TokenKind) -> bool {
    match kind {
        T::Ident
        | T::IntLiteral
        | T::RealLiteral
        | T::StringLiteral
        | T::CharLiteral
        | T::LParen
        | T::Bang
        | T::Minus
        | T::Plus
        | T::Tilde
        | T::PlusPlus
        | T::MinusMinus => true,
        T::Keyword(kw) => {
            kw.is_predefined_type()
                || matches!(
                    kw,
                    Keyword::New
                        | Keyword::This
                        | Keyword::Base
                        | Keyword::Typeof
                        | Keyword::Sizeof
                        | Keyword::Default
                        | Keyword::True
                        | Keyword::False
                        | Keyword::Null
                        | Keyword::Checked
                        | Keyword::Unchecked
                        | Keyword::Throw
                        | Keyword::Delegate
                )
        }
        _ => false,
    }
}

fn replace_last(mut children: Vec<NodeId>, replacement: NodeId) -> Vec<NodeId> {
    children.pop();
    children.push(replacement);
    children
}

#[cfg(test)]
mod tests {
    use crate::syntax::{parse, LanguageVersion, ParseOptions, SyntaxKind, SyntaxTree};

    fn tree(text: &str) -> SyntaxTree {
        let tree = parse(text, &ParseOptions::default());
        assert!(tree.validate().is_ok(), "{:?}", tree.validate());
        tree
    }

    fn kinds_of(tree: &SyntaxTree, kind: SyntaxKind) -> Vec<String> {
        tree.preorder()
            .filter(|n| n.kind() == kind)
            .map(|n| n.text().to_string())
            .collect()
    }

    #[test]
    fn test_class_members() {
        let tree = tree(
            r#"
using System;
namespace N
{
    public class C : IDisposable
    {
        private int a = 1, b;
        public C(int x) : base(x) { }
        public string Name { get; set; } = "c";
        public int Twice => a * 2;
        void M<T>(ref int y) where T : class { }
        public void Dispose() { }
    }
}
"#,
        );
        assert!(tree.errors().is_empty(), "{:?}", tree.errors());
        assert_eq!(kinds_of(&tree, SyntaxKind::VariableDeclarator), vec!["a = 1", "b"]);
        assert_eq!(tree.preorder().filter(|n| n.kind() == SyntaxKind::MethodDecl).count(), 2);
        assert_eq!(tree.preorder().filter(|n| n.kind() == SyntaxKind::PropertyDecl).count(), 2);
        let ctor = tree
            .preorder()
            .find(|n| n.kind() == SyntaxKind::ConstructorDecl)
            .unwrap();
        assert_eq!(ctor.name(), Some("C"));
        assert!(ctor.child_of_kind(SyntaxKind::ConstructorInitializer).is_some());
    }

    #[test]
    fn test_precedence() {
        let tree = tree("class C { bool M() => a || b && c == d + e * f; }");
        let top = tree
            .preorder()
            .find(|n| n.kind() == SyntaxKind::BinaryExpr)
            .unwrap();
        assert_eq!(top.token_text(), Some("||"));
        assert_eq!(top.child(1).unwrap().token_text(), Some("&&"));
    }

    #[test]
    fn test_statements() {
        let tree = tree(
            r#"
class C {
    void M(int[] xs) {
        for (int i = 0; i < 10; i++) { continue; }
        foreach (var x in xs) { if (x > 1) break; else return; }
        while (true) { }
        do { } while (false);
        switch (xs.Length) { case 0: case 1 when xs != null: break; default: goto case 0; }
        try { throw new Exception(); } catch (Exception e) when (e != null) { } finally { }
        using (var s = new MemoryStream()) { }
        lock (this) { }
        label: ;
        int Local(int q) => q;
    }
}
"#,
        );
        assert!(tree.errors().is_empty(), "{:?}", tree.errors());
        for kind in [
            SyntaxKind::ForStmt,
            SyntaxKind::ForEachStmt,
            SyntaxKind::WhileStmt,
            SyntaxKind::DoStmt,
            SyntaxKind::SwitchStmt,
            SyntaxKind::TryStmt,
            SyntaxKind::UsingStmt,
            SyntaxKind::LockStmt,
            SyntaxKind::LabeledStmt,
            SyntaxKind::LocalFunctionStmt,
            SyntaxKind::WhenClause,
        ] {
            assert!(tree.preorder().any(|n| n.kind() == kind), "missing {:?}", kind);
        }
    }

    #[test]
    fn test_casts_lambdas_and_patterns() {
        let tree = tree(
            r#"
class C {
    void M(object o) {
        var a = (int)o;
        var b = (a) + 1;
        Func<int, int> f = x => x + 1;
        Action g = () => { };
        if (o is string s && s.Length > 0) { }
        if (o is not null) { }
        var r = o switch { int i when i > 0 => 1, null => 0, _ => -1 };
        var n = o as string ?? "";
        var list = new List<int> { 1, 2 };
        var arr = new int[] { 1 };
        M<int>(o);
    }
}
"#,
        );
        assert!(tree.errors().is_empty(), "{:?}", tree.errors());
        assert_eq!(kinds_of(&tree, SyntaxKind::CastExpr), vec!["(int)o"]);
        assert_eq!(tree.preorder().filter(|n| n.kind() == SyntaxKind::LambdaExpr).count(), 2);
        assert_eq!(kinds_of(&tree, SyntaxKind::DeclarationPattern), vec!["string s", "int i"]);
        assert!(tree.preorder().any(|n| n.kind() == SyntaxKind::NotPattern));
        assert_eq!(tree.preorder().filter(|n| n.kind() == SyntaxKind::SwitchExprArm).count(), 3);
        assert!(tree.preorder().any(|n| n.kind() == SyntaxKind::ArrayCreationExpr));
    }

    #[test]
    fn test_best_effort_on_errors() {
        let tree = tree("class C { void M() { int x = ; y(); } void N() { } }");
        assert!(!tree.errors().is_empty());
        assert_eq!(tree.preorder().filter(|n| n.kind() == SyntaxKind::MethodDecl).count(), 2);
        assert!(tree.preorder().any(|n| n.kind() == SyntaxKind::InvocationExpr));
    }

    #[test]
    fn test_garbage_does_not_hang() {
        let tree = tree("class C { void M() { ) ] } } } #");
        assert!(!tree.errors().is_empty());
    }

    #[test]
    fn test_language_version_gate() {
        let options = ParseOptions {
            language_version: LanguageVersion::CSharp7,
            ..ParseOptions::default()
        };
        let tree = parse("class C { void M(object o) { if (o is not null) { } } }", &options);
        assert!(tree
            .errors()
            .iter()
            .any(|e| e.message == "feature 'not pattern' requires C# 9"));
        assert!(tree.preorder().any(|n| n.kind() == SyntaxKind::NotPattern));
    }

    fn max_depth(tree: &SyntaxTree) -> usize {
        tree.preorder()
            .map(|n| std::iter::successors(n.parent(), |p| p.parent()).count())
            .max()
            .unwrap_or(0)
    }

    fn nesting_errors(tree: &SyntaxTree) -> usize {
        tree.errors().iter().filter(|e| e.message == "nesting too deep").count()
    }

    #[test]
    fn test_deep_parentheses_become_error_node() {
        let text = format!(
            "class C {{ void M() {{ var x = {}1{}; var y = 2; }} }}",
            "(".repeat(5000),
            ")".repeat(5000)
        );
        let tree = tree(&text);
        assert_eq!(nesting_errors(&tree), 1);
        assert!(max_depth(&tree) <= 2 * super::MAX_NESTING);
        assert_eq!(kinds_of(&tree, SyntaxKind::VariableDeclarator).last().map(String::as_str), Some("y = 2"));
    }

    #[test]
    fn test_deep_statements_and_chains_are_bounded() {
        let ifs = format!(
            "class C {{ void M(bool b) {{ {}return;{} }} void N() {{ }} }}",
            "if (b) { ".repeat(5000),
            " }".repeat(5000)
        );
        let chain = format!("class C {{ int M() => {}1; void N() {{ }} }}", "1 + ".repeat(5000));
        let classes = format!("{}{}", "class C { ".repeat(5000), "}".repeat(5000));
        for text in [ifs, chain, classes] {
            let tree = tree(&text);
            assert!(nesting_errors(&tree) >= 1);
            assert!(max_depth(&tree) <= 2 * super::MAX_NESTING);
        }
    }
}
