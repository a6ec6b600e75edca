//! Symbols, types and name binding

pub mod binder;
pub mod symbols;
pub mod types;

pub use binder::SemanticModel;
pub use symbols::{Accessibility, Modifiers, Symbol, SymbolId, SymbolKind, SymbolTable};
pub use types::{KnownTypes, TypeRef};
