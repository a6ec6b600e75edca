//! Lexer, parser and concrete syntax tree

pub mod kind;
pub mod lexer;
pub mod parser;
pub mod text;
pub mod tree;

pub use kind::{Category, Keyword, LanguageVersion, SyntaxKind, TokenKind, TriviaKind};
pub use lexer::{Token, Trivia};
pub use text::{LineCol, LineIndex, Span};
pub use tree::{Node, NodeId, SyntaxTree};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A recoverable syntax error recorded during lexing or parsing
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ParseError {
    pub span: Span,
    pub message: String,
}

impl ParseError {
    pub fn new(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
        }
    }
}

/// Compiler invocation context affecting parsing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOptions {
    pub language_version: LanguageVersion,
    /// Preprocessor symbols defined before the first line
    pub defines: Vec<String>,
}

impl ParseOptions {
    pub fn new(language_version: LanguageVersion) -> Self {
        Self {
            language_version,
            defines: Vec::new(),
        }
    }

    pub fn with_define(mut self, symbol: impl Into<String>) -> Self {
        self.defines.push(symbol.into());
        self
    }
}

/// Lex and parse `text` into a best-effort tree. Never fails; errors are kept on the tree.
pub fn parse(text: &str, options: &ParseOptions) -> SyntaxTree {
    let lexed = lexer::lex(text, &options.defines);
    log::trace!("lexed {} tokens", lexed.tokens.len());
    parser::parse_tokens(text, lexed.tokens, lexed.errors, options)
}
