//! Symbol table

use super::types::TypeRef;
use crate::syntax::{NodeId, Span};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

impl SymbolId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolKind {
    Namespace,
    Class,
    Struct,
    Interface,
    Record,
    Enum,
    EnumMember,
    Method,
    Constructor,
    Field,
    Constant,
    Property,
    Parameter,
    Local,
    LocalFunction,
}

impl SymbolKind {
    pub fn is_type(self) -> bool {
        matches!(
            self,
            SymbolKind::Class
                | SymbolKind::Struct
                | SymbolKind::Interface
                | SymbolKind::Record
                | SymbolKind::Enum
        )
    }

    /// Locals and parameters tracked by flow analyses
    pub fn is_variable(self) -> bool {
        matches!(self, SymbolKind::Local | SymbolKind::Parameter)
    }

    pub fn is_member(self) -> bool {
        matches!(
            self,
            SymbolKind::Method
                | SymbolKind::Constructor
                | SymbolKind::Field
                | SymbolKind::Constant
                | SymbolKind::Property
                | SymbolKind::EnumMember
        )
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SymbolKind::Namespace => "namespace",
            SymbolKind::Class => "class",
            SymbolKind::Struct => "struct",
            SymbolKind::Interface => "interface",
            SymbolKind::Record => "record",
            SymbolKind::Enum => "enum",
            SymbolKind::EnumMember => "enum member",
            SymbolKind::Method => "method",
            SymbolKind::Constructor => "constructor",
            SymbolKind::Field => "field",
            SymbolKind::Constant => "constant",
            SymbolKind::Property => "property",
            SymbolKind::Parameter => "parameter",
            SymbolKind::Local => "local",
            SymbolKind::LocalFunction => "local function",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Accessibility {
    Public,
    Internal,
    Protected,
    ProtectedInternal,
    PrivateProtected,
    Private,
}

impl fmt::Display for Accessibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Accessibility::Public => "public",
            Accessibility::Internal => "internal",
            Accessibility::Protected => "protected",
            Accessibility::ProtectedInternal => "protected internal",
            Accessibility::PrivateProtected => "private protected",
            Accessibility::Private => "private",
        };
        write!(f, "{}", s)
    }
}

/// Declaration modifiers relevant to analysis
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub is_static: bool,
    pub is_const: bool,
    pub is_readonly: bool,
    pub is_abstract: bool,
    pub is_virtual: bool,
    pub is_override: bool,
    pub is_extern: bool,
    pub is_partial: bool,
    pub is_async: bool,
    pub is_event: bool,
    /// `ref`/`out`/`in` parameter
    pub is_by_ref: bool,
    pub is_out: bool,
    pub is_params: bool,
    /// `using var` local
    pub is_using: bool,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub container: Option<SymbolId>,
    pub accessibility: Accessibility,
    pub modifiers: Modifiers,
    /// Declared type; return type for methods
    pub ty: TypeRef,
    pub declaration: NodeId,
    pub name_span: Span,
    /// Base list entries for types
    pub bases: Vec<TypeRef>,
}

/// Arena of symbols with per-container member lists
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    members: HashMap<SymbolId, Vec<SymbolId>>,
}

impl SymbolTable {
    pub fn add(&mut self, symbol: Symbol) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        if let Some(container) = symbol.container {
            self.members.entry(container).or_default().push(id);
        }
        self.symbols.push(symbol);
        id
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.index()]
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
        self.symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (SymbolId(i as u32), s))
    }

    pub fn members(&self, container: SymbolId) -> &[SymbolId] {
        self.members.get(&container).map_or(&[], Vec::as_slice)
    }

    pub fn members_named<'a>(
        &'a self,
        container: SymbolId,
        name: &'a str,
    ) -> impl Iterator<Item = SymbolId> + 'a {
        self.members(container)
            .iter()
            .copied()
            .filter(move |&m| self.get(m).name == name)
    }

    /// Nearest containing symbol that is a type
    pub fn containing_type(&self, id: SymbolId) -> Option<SymbolId> {
        let mut current = self.get(id).container;
        while let Some(c) = current {
            if self.get(c).kind.is_type() {
                return Some(c);
            }
            current = self.get(c).container;
        }
        None
    }

    /// Dotted name from the outermost container
    pub fn qualified_name(&self, id: SymbolId) -> String {
        let mut parts = vec![self.get(id).name.as_str()];
        let mut current = self.get(id).container;
        while let Some(c) = current {
            parts.push(self.get(c).name.as_str());
            current = self.get(c).container;
        }
        parts.reverse();
        parts.join(".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(name: &str, kind: SymbolKind, container: Option<SymbolId>) -> Symbol {
        Symbol {
            name: name.to_string(),
            kind,
            container,
            accessibility: Accessibility::Private,
            modifiers: Modifiers::default(),
            ty: TypeRef::Unknown,
            declaration: NodeId(0),
            name_span: Span::default(),
            bases: Vec::new(),
        }
    }

    #[test]
    fn test_members_and_containers() {
        let mut table = SymbolTable::default();
        let ns = table.add(symbol("N", SymbolKind::Namespace, None));
        let class = table.add(symbol("C", SymbolKind::Class, Some(ns)));
        let field = table.add(symbol("f", SymbolKind::Field, Some(class)));
        let method = table.add(symbol("M", SymbolKind::Method, Some(class)));
        let local = table.add(symbol("x", SymbolKind::Local, Some(method)));

        assert_eq!(table.members(class), &[field, method]);
        assert_eq!(table.members_named(class, "M").collect::<Vec<_>>(), vec![method]);
        assert_eq!(table.containing_type(local), Some(class));
        assert_eq!(table.qualified_name(field), "N.C.f");
        assert!(table.members(field).is_empty());
    }
}
