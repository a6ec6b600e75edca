//! Two-pass binder producing the semantic model

use super::symbols::{Accessibility, Modifiers, Symbol, SymbolId, SymbolKind, SymbolTable};
use super::types::{KnownTypes, TypeRef};
use crate::syntax::{Keyword, Node, NodeId, SyntaxKind, SyntaxTree, TokenKind};
use std::collections::HashMap;

use SyntaxKind as K;

const MAX_BASE_DEPTH: usize = 16;

/// Symbols, declarations and resolved references for one file.
///
/// Immutable once [`SemanticModel::bind`] returns.
#[derive(Debug, Clone, Default)]
pub struct SemanticModel {
    table: SymbolTable,
    declared: HashMap<NodeId, SymbolId>,
    references: HashMap<NodeId, SymbolId>,
    unresolved: Vec<(NodeId, String)>,
    types_by_name: HashMap<String, Vec<SymbolId>>,
}

impl SemanticModel {
    pub fn bind(tree: &SyntaxTree) -> Self {
        let mut binder = Binder {
            tree,
            model: SemanticModel::default(),
            scopes: Vec::new(),
            types: Vec::new(),
            member: None,
        };
        binder.declare(tree.root(), None);
        binder.bind_declarations(tree.root());
        log::trace!(
            "bound {} symbols, {} references, {} unresolved",
            binder.model.table.len(),
            binder.model.references.len(),
            binder.model.unresolved.len()
        );
        binder.model
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.table
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        self.table.get(id)
    }

    /// Symbol declared by a declaration node (declarator, method, parameter, pattern, ...)
    pub fn declared_symbol(&self, node: NodeId) -> Option<SymbolId> {
        self.declared.get(&node).copied()
    }

    /// Symbol an identifier or member access resolves to
    pub fn referenced_symbol(&self, node: NodeId) -> Option<SymbolId> {
        self.references.get(&node).copied()
    }

    pub fn references(&self) -> impl Iterator<Item = (NodeId, SymbolId)> + '_ {
        self.references.iter().map(|(&n, &s)| (n, s))
    }

    /// Names that could not be resolved, with the referencing node
    pub fn unresolved(&self) -> &[(NodeId, String)] {
        &self.unresolved
    }

    pub fn types_named(&self, simple_name: &str) -> &[SymbolId] {
        self.types_by_name.get(simple_name).map_or(&[], Vec::as_slice)
    }

    pub fn type_symbol(&self, ty: &TypeRef) -> Option<SymbolId> {
        ty.simple_name()
            .and_then(|n| self.types_named(n).first().copied())
    }

    /// Member lookup through base types declared in this file
    pub fn lookup_member(&self, ty: SymbolId, name: &str) -> Option<SymbolId> {
        self.lookup_member_depth(ty, name, 0)
    }

    fn lookup_member_depth(&self, ty: SymbolId, name: &str, depth: usize) -> Option<SymbolId> {
        if depth > MAX_BASE_DEPTH {
            return None;
        }
        if let Some(found) = self.table.members_named(ty, name).next() {
            return Some(found);
        }
        self.table
            .get(ty)
            .bases
            .iter()
            .filter_map(|b| self.type_symbol(b))
            .filter(|&b| b != ty)
            .find_map(|b| self.lookup_member_depth(b, name, depth + 1))
    }

    pub fn is_value_type(&self, ty: &TypeRef) -> bool {
        if ty.is_value_type() {
            return true;
        }
        self.type_symbol(ty).is_some_and(|s| {
            matches!(self.symbol(s).kind, SymbolKind::Struct | SymbolKind::Enum)
        })
    }

    pub fn is_nullable_value_type(&self, ty: &TypeRef) -> bool {
        match ty {
            TypeRef::Nullable(inner) => self.is_value_type(inner),
            other => other.is_nullable_value_type(),
        }
    }

    pub fn is_disposable(&self, ty: &TypeRef) -> bool {
        self.is_disposable_depth(ty, 0)
    }

    fn is_disposable_depth(&self, ty: &TypeRef, depth: usize) -> bool {
        if depth > MAX_BASE_DEPTH {
            return false;
        }
        let Some(name) = ty.simple_name() else {
            return false;
        };
        if KnownTypes::is_disposable_name(name) {
            return true;
        }
        self.types_named(name).iter().any(|&s| {
            self.symbol(s)
                .bases
                .iter()
                .any(|b| self.is_disposable_depth(b, depth + 1))
        })
    }

    /// Best-effort static type of an expression
    pub fn type_of(&self, node: Node<'_>) -> TypeRef {
        match node.kind() {
            K::LiteralExpr => match node.token_kind() {
                Some(TokenKind::IntLiteral) => TypeRef::named("int"),
                Some(TokenKind::RealLiteral) => {
                    let text = node.text().to_ascii_lowercase();
                    if text.ends_with('f') {
                        TypeRef::named("float")
                    } else if text.ends_with('m') {
                        TypeRef::named("decimal")
                    } else {
                        TypeRef::named("double")
                    }
                }
                Some(TokenKind::StringLiteral) => TypeRef::named("string"),
                Some(TokenKind::CharLiteral) => TypeRef::named("char"),
                Some(TokenKind::Keyword(Keyword::True | Keyword::False)) => TypeRef::named("bool"),
                _ => TypeRef::Unknown,
            },
            K::InterpolatedStringExpr => TypeRef::named("string"),
            K::ObjectCreationExpr => node.child(0).map_or(TypeRef::Unknown, TypeRef::from_syntax),
            K::ArrayCreationExpr => match node.child(0) {
                Some(t) if t.kind() == K::ArrayType => TypeRef::from_syntax(t),
                Some(t) => TypeRef::Array(Box::new(TypeRef::from_syntax(t))),
                None => TypeRef::Unknown,
            },
            K::IdentifierName | K::MemberAccessExpr | K::ConditionalAccessExpr => {
                match self.referenced_symbol(node.id()) {
                    Some(s) => {
                        let symbol = self.symbol(s);
                        match symbol.kind {
                            kind if kind.is_type() => TypeRef::named(symbol.name.clone()),
                            SymbolKind::Method | SymbolKind::LocalFunction => TypeRef::Unknown,
                            _ => symbol.ty.clone(),
                        }
                    }
                    None => TypeRef::Unknown,
                }
            }
            K::InvocationExpr => node
                .child(0)
                .and_then(|callee| self.referenced_symbol(callee.id()))
                .filter(|&s| {
                    matches!(
                        self.symbol(s).kind,
                        SymbolKind::Method | SymbolKind::LocalFunction
                    )
                })
                .map_or(TypeRef::Unknown, |s| self.symbol(s).ty.clone()),
            K::CastExpr => node.child(0).map_or(TypeRef::Unknown, TypeRef::from_syntax),
            K::AsExpr => node.child(1).map_or(TypeRef::Unknown, TypeRef::from_syntax),
            K::ParenExpr => node.child(0).map_or(TypeRef::Unknown, |c| self.type_of(c)),
            K::ConditionalExpr => {
                let when_true = node.child(1).map_or(TypeRef::Unknown, |c| self.type_of(c));
                if when_true.is_unknown() {
                    node.child(2).map_or(TypeRef::Unknown, |c| self.type_of(c))
                } else {
                    when_true
                }
            }
            K::DefaultExpr => node.child(0).map_or(TypeRef::Unknown, TypeRef::from_syntax),
            K::ThisExpr => node
                .ancestors()
                .find(|a| a.kind().is_type_declaration())
                .and_then(|a| a.name())
                .map_or(TypeRef::Unknown, TypeRef::named),
            K::IsPatternExpr => TypeRef::named("bool"),
            K::PrefixUnaryExpr if node.token_kind() == Some(TokenKind::Bang) => TypeRef::named("bool"),
            K::BinaryExpr => match node.token_kind() {
                Some(
                    TokenKind::EqEq
                    | TokenKind::BangEq
                    | TokenKind::Lt
                    | TokenKind::Gt
                    | TokenKind::LtEq
                    | TokenKind::GtEq
                    | TokenKind::AmpAmp
                    | TokenKind::PipePipe,
                ) => TypeRef::named("bool"),
                Some(TokenKind::QuestionQuestion) => {
                    let left = node.child(0).map_or(TypeRef::Unknown, |c| self.type_of(c));
                    match left {
                        TypeRef::Nullable(inner) => *inner,
                        TypeRef::Unknown => {
                            node.child(1).map_or(TypeRef::Unknown, |c| self.type_of(c))
                        }
                        other => other,
                    }
                }
                Some(TokenKind::Plus) => {
                    let left = node.child(0).map_or(TypeRef::Unknown, |c| self.type_of(c));
                    let right = node.child(1).map_or(TypeRef::Unknown, |c| self.type_of(c));
                    if left.simple_name() == Some("string") || right.simple_name() == Some("string") {
                        TypeRef::named("string")
                    } else {
                        TypeRef::Unknown
                    }
                }
                _ => TypeRef::Unknown,
            },
            _ => TypeRef::Unknown,
        }
    }
}

struct Binder<'t> {
    tree: &'t SyntaxTree,
    model: SemanticModel,
    scopes: Vec<HashMap<String, SymbolId>>,
    types: Vec<SymbolId>,
    member: Option<SymbolId>,
}

impl<'t> Binder<'t> {
    fn add_symbol(&mut self, node: Node<'t>, symbol: Symbol) -> SymbolId {
        let name = symbol.name.clone();
        let is_type = symbol.kind.is_type();
        let id = self.model.table.add(symbol);
        self.model.declared.insert(node.id(), id);
        if is_type {
            self.model.types_by_name.entry(name).or_default().push(id);
        }
        id
    }

    fn reference(&mut self, node: Node<'_>, symbol: SymbolId) {
        self.model.references.insert(node.id(), symbol);
    }

    // ----- pass 1: declarations -----

    fn declare(&mut self, node: Node<'t>, container: Option<SymbolId>) {
        match node.kind() {
            K::CompilationUnit => {
                for child in node.children() {
                    self.declare(child, container);
                }
            }
            K::NamespaceDecl | K::FileScopedNamespaceDecl => {
                let name: String = node
                    .child(0)
                    .map(|n| n.text().split_whitespace().collect())
                    .unwrap_or_default();
                let name_span = node.child(0).map_or(node.span(), |n| n.span());
                let id = self.add_symbol(
                    node,
                    Symbol {
                        name,
                        kind: SymbolKind::Namespace,
                        container,
                        accessibility: Accessibility::Public,
                        modifiers: Modifiers::default(),
                        ty: TypeRef::Unknown,
                        declaration: node.id(),
                        name_span,
                        bases: Vec::new(),
                    },
                );
                for child in node.children().skip(1) {
                    self.declare(child, Some(id));
                }
            }
            kind if kind.is_type_declaration() => {
                let symbol_kind = match kind {
                    K::ClassDecl => SymbolKind::Class,
                    K::StructDecl => SymbolKind::Struct,
                    K::InterfaceDecl => SymbolKind::Interface,
                    K::RecordDecl => SymbolKind::Record,
                    _ => SymbolKind::Enum,
                };
                let bases = node
                    .child_of_kind(K::BaseList)
                    .map(|list| {
                        list.children()
                            .filter(|c| c.kind().is_type())
                            .map(TypeRef::from_syntax)
                            .collect()
                    })
                    .unwrap_or_default();
                let name = node.name().unwrap_or("").to_string();
                let ty = TypeRef::named(name.clone());
                let symbol = self.make_symbol(node, name, symbol_kind, container, ty);
                let id = self.add_symbol(node, Symbol { bases, ..symbol });
                if kind == K::RecordDecl {
                    if let Some(params) = node.child_of_kind(K::ParameterList) {
                        for param in params.children_of_kind(K::Parameter) {
                            let ty = param.type_child().map_or(TypeRef::Unknown, TypeRef::from_syntax);
                            let name = param.name().unwrap_or("").to_string();
                            let mut symbol =
                                self.make_symbol(param, name, SymbolKind::Property, Some(id), ty);
                            symbol.accessibility = Accessibility::Public;
                            self.add_symbol(param, symbol);
                        }
                    }
                }
                for child in node.children() {
                    self.declare(child, Some(id));
                }
            }
            K::FieldDecl => {
                let is_const = node.has_modifier(Keyword::Const);
                let Some(declaration) = node.child_of_kind(K::VariableDeclaration) else {
                    return;
                };
                let ty = declaration.child(0).map_or(TypeRef::Unknown, TypeRef::from_syntax);
                for declarator in declaration.children_of_kind(K::VariableDeclarator) {
                    let kind = if is_const { SymbolKind::Constant } else { SymbolKind::Field };
                    let name = declarator.name().unwrap_or("").to_string();
                    let mut symbol = self.make_symbol(declarator, name, kind, container, ty.clone());
                    symbol.modifiers = modifiers_of(node);
                    symbol.accessibility = self.accessibility_of(node, container);
                    self.add_symbol(declarator, symbol);
                }
            }
            K::MethodDecl | K::PropertyDecl | K::DestructorDecl => {
                let kind = if node.kind() == K::PropertyDecl {
                    SymbolKind::Property
                } else {
                    SymbolKind::Method
                };
                let ty = node.type_child().map_or(TypeRef::Unknown, TypeRef::from_syntax);
                let mut name = node.name().unwrap_or("").to_string();
                if node.kind() == K::DestructorDecl {
                    name = format!("~{}", name);
                }
                let mut symbol = self.make_symbol(node, name, kind, container, ty);
                if node.kind() == K::DestructorDecl || self.is_explicit_interface_impl(node) {
                    symbol.accessibility = Accessibility::Public;
                }
                self.add_symbol(node, symbol);
            }
            K::ConstructorDecl => {
                let ty = container
                    .map(|c| TypeRef::named(self.model.table.get(c).name.clone()))
                    .unwrap_or_default();
                let name = node.name().unwrap_or("").to_string();
                let symbol = self.make_symbol(node, name, SymbolKind::Constructor, container, ty);
                self.add_symbol(node, symbol);
            }
            K::EnumMemberDecl => {
                let ty = container
                    .map(|c| TypeRef::named(self.model.table.get(c).name.clone()))
                    .unwrap_or_default();
                let name = node.name().unwrap_or("").to_string();
                let mut symbol = self.make_symbol(node, name, SymbolKind::EnumMember, container, ty);
                symbol.accessibility = Accessibility::Public;
                self.add_symbol(node, symbol);
            }
            _ => {}
        }
    }

    fn is_explicit_interface_impl(&self, node: Node<'_>) -> bool {
        node.token_index()
            .and_then(|i| i.checked_sub(1))
            .and_then(|i| self.tree.tokens().get(i))
            .is_some_and(|t| t.kind == TokenKind::Dot)
    }

    fn make_symbol(
        &self,
        node: Node<'_>,
        name: String,
        kind: SymbolKind,
        container: Option<SymbolId>,
        ty: TypeRef,
    ) -> Symbol {
        Symbol {
            name,
            kind,
            container,
            accessibility: self.accessibility_of(node, container),
            modifiers: modifiers_of(node),
            ty,
            declaration: node.id(),
            name_span: node.token_span().unwrap_or(node.span()),
            bases: Vec::new(),
        }
    }

    fn accessibility_of(&self, node: Node<'_>, container: Option<SymbolId>) -> Accessibility {
        let has = |kw| node.has_modifier(kw);
        match (
            has(Keyword::Public),
            has(Keyword::Internal),
            has(Keyword::Protected),
            has(Keyword::Private),
        ) {
            (true, ..) => Accessibility::Public,
            (_, true, true, _) => Accessibility::ProtectedInternal,
            (_, _, true, true) => Accessibility::PrivateProtected,
            (_, true, ..) => Accessibility::Internal,
            (_, _, true, _) => Accessibility::Protected,
            (_, _, _, true) => Accessibility::Private,
            _ => match container.map(|c| self.model.table.get(c).kind) {
                Some(SymbolKind::Interface | SymbolKind::Enum) => Accessibility::Public,
                Some(kind) if kind.is_type() => Accessibility::Private,
                _ => Accessibility::Internal,
            },
        }
    }

    // ----- pass 2: bodies -----

    fn bind_declarations(&mut self, node: Node<'t>) {
        match node.kind() {
            K::CompilationUnit | K::NamespaceDecl | K::FileScopedNamespaceDecl => {
                for child in node.children() {
                    self.bind_declarations(child);
                }
            }
            kind if kind.is_type_declaration() => {
                let Some(id) = self.model.declared_symbol(node.id()) else {
                    return;
                };
                self.types.push(id);
                for child in node.children() {
                    match child.kind() {
                        K::BaseList => self.bind_node(child),
                        K::ParameterList => {
                            for param in child.children() {
                                self.bind_children(param);
                            }
                        }
                        _ => self.bind_declarations(child),
                    }
                }
                self.types.pop();
            }
            K::FieldDecl => {
                for child in node.children() {
                    if child.kind() != K::VariableDeclaration {
                        self.bind_node(child);
                        continue;
                    }
                    // Declarators already carry their field symbols from pass 1
                    if let Some(type_node) = child.child(0) {
                        self.bind_node(type_node);
                    }
                    for declarator in child.children_of_kind(K::VariableDeclarator) {
                        if let Some(init) = declarator.child(0) {
                            self.bind_node(init);
                        }
                    }
                }
            }
            K::EnumMemberDecl => self.bind_children(node),
            K::MethodDecl | K::ConstructorDecl | K::DestructorDecl => {
                if let Some(id) = self.model.declared_symbol(node.id()) {
                    self.bind_function(node, id);
                }
            }
            K::PropertyDecl => {
                let Some(id) = self.model.declared_symbol(node.id()) else {
                    return;
                };
                let saved = self.member.replace(id);
                for child in node.children() {
                    match child.kind() {
                        K::AccessorList => {
                            for accessor in child.children() {
                                self.scopes.push(HashMap::new());
                                if matches!(accessor.name(), Some("set" | "init" | "add" | "remove")) {
                                    let ty = self.model.symbol(id).ty.clone();
                                    let mut symbol = self.make_symbol(
                                        accessor,
                                        "value".to_string(),
                                        SymbolKind::Parameter,
                                        Some(id),
                                        ty,
                                    );
                                    symbol.accessibility = Accessibility::Public;
                                    let value = self.model.table.add(symbol);
                                    self.declare_in_scope("value", value);
                                }
                                self.bind_children(accessor);
                                self.scopes.pop();
                            }
                        }
                        _ => self.bind_node(child),
                    }
                }
                self.member = saved;
            }
            _ => {}
        }
    }

    fn bind_function(&mut self, node: Node<'t>, id: SymbolId) {
        let saved = self.member.replace(id);
        self.scopes.push(HashMap::new());
        for child in node.children() {
            match child.kind() {
                K::ParameterList => self.declare_parameters(child, id),
                _ => self.bind_node(child),
            }
        }
        self.scopes.pop();
        self.member = saved;
    }

    fn declare_parameters(&mut self, list: Node<'t>, container: SymbolId) {
        for param in list.children_of_kind(K::Parameter) {
            self.bind_children(param);
            let ty = param.type_child().map_or(TypeRef::Unknown, TypeRef::from_syntax);
            let name = param.name().unwrap_or("").to_string();
            let mut symbol = self.make_symbol(param, name.clone(), SymbolKind::Parameter, Some(container), ty);
            symbol.accessibility = Accessibility::Public;
            let id = self.add_symbol(param, symbol);
            self.declare_in_scope(&name, id);
        }
    }

    fn declare_in_scope(&mut self, name: &str, id: SymbolId) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), id);
        }
    }

    fn local_container(&self) -> Option<SymbolId> {
        self.member.or_else(|| self.types.last().copied())
    }

    fn declare_local(&mut self, node: Node<'t>, ty: TypeRef, modifiers: Modifiers) -> SymbolId {
        let name = node.name().unwrap_or("").to_string();
        let container = self.local_container();
        let mut symbol = self.make_symbol(node, name.clone(), SymbolKind::Local, container, ty);
        symbol.accessibility = Accessibility::Public;
        symbol.modifiers = modifiers;
        let id = self.add_symbol(node, symbol);
        self.declare_in_scope(&name, id);
        id
    }

    fn bind_children(&mut self, node: Node<'t>) {
        for child in node.children() {
            self.bind_node(child);
        }
    }

    fn with_scope(&mut self, f: impl FnOnce(&mut Self)) {
        self.scopes.push(HashMap::new());
        f(self);
        self.scopes.pop();
    }

    fn predeclare_local_functions(&mut self, block: Node<'t>) {
        for stmt in block.children_of_kind(K::LocalFunctionStmt) {
            let ty = stmt.type_child().map_or(TypeRef::Unknown, TypeRef::from_syntax);
            let name = stmt.name().unwrap_or("").to_string();
            let container = self.local_container();
            let mut symbol =
                self.make_symbol(stmt, name.clone(), SymbolKind::LocalFunction, container, ty);
            symbol.accessibility = Accessibility::Public;
            let id = self.add_symbol(stmt, symbol);
            self.declare_in_scope(&name, id);
        }
    }

    fn bind_node(&mut self, node: Node<'t>) {
        match node.kind() {
            K::Block => self.with_scope(|b| {
                b.predeclare_local_functions(node);
                b.bind_children(node);
            }),
            K::SwitchStmt => {
                if let Some(governing) = node.child(0) {
                    self.bind_node(governing);
                }
                self.with_scope(|b| {
                    for section in node.children().skip(1) {
                        b.bind_children(section);
                    }
                });
            }
            K::ForStmt | K::UsingStmt | K::CatchClause | K::SwitchExprArm => {
                self.with_scope(|b| b.bind_children(node))
            }
            K::VariableDeclaration => self.bind_variable_declaration(node),
            K::LocalFunctionStmt => {
                let id = match self.model.declared_symbol(node.id()) {
                    Some(id) => id,
                    None => {
                        self.predeclare_single(node);
                        match self.model.declared_symbol(node.id()) {
                            Some(id) => id,
                            None => return,
                        }
                    }
                };
                self.bind_function(node, id);
            }
            K::ForEachStmt => {
                if let Some(collection) = node.child(1) {
                    self.bind_node(collection);
                }
                self.with_scope(|b| {
                    let declared = node.child(0).map_or(TypeRef::Unknown, TypeRef::from_syntax);
                    if let Some(ty) = node.child(0) {
                        b.bind_node(ty);
                    }
                    let ty = if declared.is_var() {
                        match node.child(1).map(|c| b.model.type_of(c)) {
                            Some(TypeRef::Array(elem)) => *elem,
                            Some(TypeRef::Named { args, .. }) if args.len() == 1 => args[0].clone(),
                            _ => TypeRef::Unknown,
                        }
                    } else {
                        declared
                    };
                    b.declare_local(node, ty, Modifiers::default());
                    for child in node.children().skip(2) {
                        b.bind_node(child);
                    }
                });
            }
            K::CatchDeclaration => {
                if let Some(ty) = node.child(0) {
                    self.bind_node(ty);
                }
                if node.name().is_some() {
                    let ty = node.child(0).map_or(TypeRef::Unknown, TypeRef::from_syntax);
                    self.declare_local(node, ty, Modifiers::default());
                }
            }
            K::LambdaExpr => {
                let container = self.local_container();
                self.with_scope(|b| {
                    for child in node.children() {
                        if child.kind() == K::ParameterList {
                            for param in child.children_of_kind(K::Parameter) {
                                b.bind_children(param);
                                let ty = param.type_child().map_or(TypeRef::Unknown, TypeRef::from_syntax);
                                let name = param.name().unwrap_or("").to_string();
                                let mut symbol =
                                    b.make_symbol(param, name.clone(), SymbolKind::Parameter, container, ty);
                                symbol.accessibility = Accessibility::Public;
                                let id = b.add_symbol(param, symbol);
                                b.declare_in_scope(&name, id);
                            }
                        } else {
                            b.bind_node(child);
                        }
                    }
                });
            }
            K::DeclarationPattern | K::DeclarationExpr => {
                if let Some(ty) = node.child(0) {
                    self.bind_node(ty);
                }
                let ty = node.child(0).map_or(TypeRef::Unknown, TypeRef::from_syntax);
                let ty = if ty.is_var() { TypeRef::Unknown } else { ty };
                self.declare_local(node, ty, Modifiers::default());
            }
            K::VarPattern => {
                self.declare_local(node, TypeRef::Unknown, Modifiers::default());
            }
            K::IdentifierName => {
                self.bind_children(node);
                self.resolve_simple(node);
            }
            K::MemberAccessExpr | K::ConditionalAccessExpr => {
                self.bind_children(node);
                self.resolve_member(node);
            }
            K::ObjectCreationExpr => self.bind_object_creation(node),
            K::NamedType => {
                self.bind_children(node);
                if let Some(name) = node.name() {
                    if name != "var" {
                        if let Some(&ty) = self.model.types_named(name).first() {
                            self.reference(node, ty);
                        }
                    }
                }
            }
            _ => self.bind_children(node),
        }
    }

    fn predeclare_single(&mut self, stmt: Node<'t>) {
        let ty = stmt.type_child().map_or(TypeRef::Unknown, TypeRef::from_syntax);
        let name = stmt.name().unwrap_or("").to_string();
        let container = self.local_container();
        let mut symbol = self.make_symbol(stmt, name.clone(), SymbolKind::LocalFunction, container, ty);
        symbol.accessibility = Accessibility::Public;
        let id = self.add_symbol(stmt, symbol);
        self.declare_in_scope(&name, id);
    }

    fn bind_variable_declaration(&mut self, node: Node<'t>) {
        let Some(type_node) = node.child(0) else {
            return;
        };
        self.bind_node(type_node);
        let declared = TypeRef::from_syntax(type_node);
        let mut modifiers = Modifiers::default();
        if let Some(parent) = node.parent() {
            modifiers.is_using = parent.kind() == K::UsingStmt || parent.has_modifier(Keyword::Using);
            modifiers.is_const = parent.has_modifier(Keyword::Const);
        }
        for declarator in node.children_of_kind(K::VariableDeclarator) {
            let init = declarator.child(0);
            if let Some(init) = init {
                self.bind_node(init);
            }
            let ty = if declared.is_var() {
                init.map_or(TypeRef::Unknown, |i| self.model.type_of(i))
            } else {
                declared.clone()
            };
            self.declare_local(declarator, ty, modifiers);
        }
    }

    fn bind_object_creation(&mut self, node: Node<'t>) {
        let created = node.child(0).and_then(|t| {
            self.bind_node(t);
            self.model.type_symbol(&TypeRef::from_syntax(t))
        });
        for child in node.children().skip(1) {
            if child.kind() != K::InitializerExpr {
                self.bind_node(child);
                continue;
            }
            for element in child.children() {
                let target = element
                    .child(0)
                    .filter(|t| element.kind() == K::AssignmentExpr && t.kind() == K::IdentifierName);
                match target {
                    Some(target) => {
                        let name = target.name().unwrap_or("");
                        match created.and_then(|c| self.model.lookup_member(c, name)) {
                            Some(member) => self.reference(target, member),
                            None => self.model.unresolved.push((target.id(), name.to_string())),
                        }
                        for value in element.children().skip(1) {
                            self.bind_node(value);
                        }
                    }
                    None => self.bind_node(element),
                }
            }
        }
    }

    fn resolve_simple(&mut self, node: Node<'t>) {
        let Some(name) = node.name() else {
            return;
        };
        if let Some(id) = self.scopes.iter().rev().find_map(|s| s.get(name).copied()) {
            self.reference(node, id);
            return;
        }
        for &ty in self.types.iter().rev() {
            if let Some(member) = self.model.lookup_member(ty, name) {
                self.model.references.insert(node.id(), member);
                return;
            }
        }
        if let Some(&ty) = self.model.types_named(name).first() {
            self.reference(node, ty);
            return;
        }
        self.model.unresolved.push((node.id(), name.to_string()));
    }

    fn resolve_member(&mut self, node: Node<'t>) {
        let Some(name) = node.name() else {
            return;
        };
        let Some(receiver) = node.child(0).map(|r| r.unparenthesized()) else {
            return;
        };
        let target = match receiver.kind() {
            K::ThisExpr | K::BaseExpr => self.types.last().copied(),
            _ => match self.model.referenced_symbol(receiver.id()) {
                Some(s) if self.model.symbol(s).kind.is_type() => Some(s),
                _ => {
                    let ty = self.model.type_of(receiver);
                    self.model.type_symbol(ty.underlying())
                }
            },
        };
        match target.and_then(|t| self.model.lookup_member(t, name)) {
            Some(member) => self.reference(node, member),
            None => self.model.unresolved.push((node.id(), name.to_string())),
        }
    }
}

fn modifiers_of(node: Node<'_>) -> Modifiers {
    let Some(list) = node.child_of_kind(K::ModifierList) else {
        return Modifiers::default();
    };
    let mut m = Modifiers::default();
    let tree = node.tree();
    for token in list.tokens() {
        match token.kind {
            TokenKind::Keyword(kw) => match kw {
                Keyword::Static => m.is_static = true,
                Keyword::Const => m.is_const = true,
                Keyword::Readonly => m.is_readonly = true,
                Keyword::Abstract => m.is_abstract = true,
                Keyword::Virtual => m.is_virtual = true,
                Keyword::Override => m.is_override = true,
                Keyword::Extern => m.is_extern = true,
                Keyword::Event => m.is_event = true,
                Keyword::Ref | Keyword::In => m.is_by_ref = true,
                Keyword::Out => {
                    m.is_by_ref = true;
                    m.is_out = true;
                }
                Keyword::Params => m.is_params = true,
                Keyword::Using => m.is_using = true,
                _ => {}
            },
            TokenKind::Ident => match tree.slice(token.span) {
                "partial" => m.is_partial = true,
                "async" => m.is_async = true,
                _ => {}
            },
            _ => {}
        }
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::{parse, ParseOptions};

    fn bind(text: &str) -> (SyntaxTree, SemanticModel) {
        let tree = parse(text, &ParseOptions::default());
        let model = SemanticModel::bind(&tree);
        (tree, model)
    }

    fn symbol_named<'m>(model: &'m SemanticModel, name: &str, kind: SymbolKind) -> &'m Symbol {
        model
            .symbols()
            .iter()
            .map(|(_, s)| s)
            .find(|s| s.name == name && s.kind == kind)
            .unwrap()
    }

    #[test]
    fn test_declarations_and_accessibility() {
        let (_, model) = bind(
            r#"
namespace N {
    class C {
        int f;
        public const int K = 1;
        void M(int p) { }
        public string P { get; set; }
        class Nested { }
    }
    interface I { void Run(); }
    enum E { A, B }
}
"#,
        );
        assert_eq!(symbol_named(&model, "C", SymbolKind::Class).accessibility, Accessibility::Internal);
        assert_eq!(symbol_named(&model, "f", SymbolKind::Field).accessibility, Accessibility::Private);
        assert_eq!(symbol_named(&model, "K", SymbolKind::Constant).accessibility, Accessibility::Public);
        assert_eq!(symbol_named(&model, "M", SymbolKind::Method).accessibility, Accessibility::Private);
        assert_eq!(symbol_named(&model, "Nested", SymbolKind::Class).accessibility, Accessibility::Private);
        assert_eq!(symbol_named(&model, "Run", SymbolKind::Method).accessibility, Accessibility::Public);
        assert_eq!(symbol_named(&model, "A", SymbolKind::EnumMember).accessibility, Accessibility::Public);
        assert_eq!(symbol_named(&model, "p", SymbolKind::Parameter).ty, TypeRef::named("int"));
    }

    #[test]
    fn test_field_declarators_keep_field_symbols() {
        let (tree, model) = bind("class C\n{\n    private int a = 1, b;\n    const int K = 2;\n    public int Use() => a;\n}\n");
        let kinds: Vec<_> = tree
            .preorder()
            .filter(|n| n.kind() == SyntaxKind::VariableDeclarator)
            .map(|n| {
                let symbol = model.symbol(model.declared_symbol(n.id()).unwrap());
                (symbol.name.clone(), symbol.kind, symbol.accessibility)
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("a".to_string(), SymbolKind::Field, Accessibility::Private),
                ("b".to_string(), SymbolKind::Field, Accessibility::Private),
                ("K".to_string(), SymbolKind::Constant, Accessibility::Private),
            ]
        );
        assert_eq!(model.symbols().iter().filter(|(_, s)| s.kind == SymbolKind::Local).count(), 0);
    }

    #[test]
    fn test_resolution_order() {
        let (tree, model) = bind(
            r#"
class C {
    int x;
    void M(int y) {
        var z = x + y;
        int x = 2;
        Use(x, z, this.x, Undefined);
    }
    void Use(params int[] v) { }
}
"#,
        );
        let mut resolved = Vec::new();
        for node in tree.preorder() {
            if node.kind() == SyntaxKind::IdentifierName || node.kind() == SyntaxKind::MemberAccessExpr {
                let kind = model.referenced_symbol(node.id()).map(|s| model.symbol(s).kind);
                resolved.push((node.text().to_string(), kind));
            }
        }
        assert_eq!(
            resolved,
            vec![
                ("x".to_string(), Some(SymbolKind::Field)),
                ("y".to_string(), Some(SymbolKind::Parameter)),
                ("Use".to_string(), Some(SymbolKind::Method)),
                ("x".to_string(), Some(SymbolKind::Local)),
                ("z".to_string(), Some(SymbolKind::Local)),
                ("this.x".to_string(), Some(SymbolKind::Field)),
                ("Undefined".to_string(), None),
            ]
        );
        assert_eq!(model.unresolved().len(), 1);
        assert_eq!(model.unresolved()[0].1, "Undefined");
    }

    #[test]
    fn test_var_inference_and_disposable_types() {
        let (_, model) = bind(
            r#"
class Res : IDisposable { public void Dispose() { } }
class Derived : Res { }
class C {
    void M() {
        var fs = new FileStream("a", FileMode.Open);
        var d = new Derived();
        int? n = null;
        var s = "text";
    }
}
"#,
        );
        let fs = symbol_named(&model, "fs", SymbolKind::Local);
        assert_eq!(fs.ty.simple_name(), Some("FileStream"));
        assert!(model.is_disposable(&fs.ty));
        let d = symbol_named(&model, "d", SymbolKind::Local);
        assert!(model.is_disposable(&d.ty));
        let n = symbol_named(&model, "n", SymbolKind::Local);
        assert!(model.is_nullable_value_type(&n.ty));
        let s = symbol_named(&model, "s", SymbolKind::Local);
        assert_eq!(s.ty, TypeRef::named("string"));
        assert!(!model.is_disposable(&s.ty));
    }

    #[test]
    fn test_lambda_and_pattern_scopes() {
        let (tree, model) = bind(
            r#"
class C {
    void M(object o) {
        Func<int, int> f = a => a + 1;
        if (o is string s) { Print(s); }
        int Local(int q) => q * 2;
        Local(1);
    }
}
"#,
        );
        let local_fn = symbol_named(&model, "Local", SymbolKind::LocalFunction);
        assert_eq!(local_fn.ty, TypeRef::named("int"));
        let uses: Vec<_> = tree
            .preorder()
            .filter(|n| n.kind() == SyntaxKind::IdentifierName)
            .filter_map(|n| model.referenced_symbol(n.id()).map(|s| (n.text(), model.symbol(s).kind)))
            .collect();
        assert!(uses.contains(&("a", SymbolKind::Parameter)));
        assert!(uses.contains(&("s", SymbolKind::Local)));
        assert!(uses.contains(&("q", SymbolKind::Parameter)));
        assert!(uses.contains(&("Local", SymbolKind::LocalFunction)));
    }

    #[test]
    fn test_member_access_through_typed_receiver() {
        let (tree, model) = bind(
            r#"
class Box { public int Width; }
class C {
    void M() {
        var b = new Box { Width = 3 };
        var w = b.Width;
    }
}
"#,
        );
        let width = tree
            .preorder()
            .find(|n| n.kind() == SyntaxKind::MemberAccessExpr)
            .unwrap();
        let symbol = model.referenced_symbol(width.id()).unwrap();
        assert_eq!(model.symbol(symbol).kind, SymbolKind::Field);
        let init_target = tree
            .preorder()
            .find(|n| n.kind() == SyntaxKind::IdentifierName && n.text() == "Width")
            .unwrap();
        assert_eq!(model.referenced_symbol(init_target.id()), Some(symbol));
    }
}
