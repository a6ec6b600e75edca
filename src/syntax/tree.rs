//! Arena syntax tree and node cursor

use super::kind::{Keyword, SyntaxKind, TokenKind, TriviaKind};
use super::lexer::{Token, Trivia};
use super::text::{LineCol, LineIndex, Span};
use super::ParseError;
use std::fmt;

/// Index of a node in its tree's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct NodeData {
    pub kind: SyntaxKind,
    pub span: Span,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Operator, identifier or literal token carrying the node's detail
    pub token: Option<u32>,
    /// Half-open token index range
    pub tokens: (u32, u32),
}

/// Immutable concrete syntax tree for one source file
#[derive(Debug, Clone)]
pub struct SyntaxTree {
    text: String,
    tokens: Vec<Token>,
    nodes: Vec<NodeData>,
    root: NodeId,
    errors: Vec<ParseError>,
    line_index: LineIndex,
}

impl SyntaxTree {
    pub(crate) fn from_parts(
        text: String,
        tokens: Vec<Token>,
        nodes: Vec<NodeData>,
        root: NodeId,
        errors: Vec<ParseError>,
    ) -> Self {
        let line_index = LineIndex::new(&text);
        Self {
            text,
            tokens,
            nodes,
            root,
            errors,
            line_index,
        }
    }

    pub fn root(&self) -> Node<'_> {
        self.node(self.root)
    }

    pub fn node(&self, id: NodeId) -> Node<'_> {
        Node { tree: self, id }
    }

    pub fn data(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    pub fn line_index(&self) -> &LineIndex {
        &self.line_index
    }

    pub fn slice(&self, span: Span) -> &str {
        self.text.get(span.range()).unwrap_or("")
    }

    pub fn line_col(&self, offset: u32) -> LineCol {
        self.line_index.line_col(&self.text, offset)
    }

    /// All comment trivia in source order
    pub fn comments(&self) -> impl Iterator<Item = Trivia> + '_ {
        self.tokens
            .iter()
            .flat_map(|t| t.leading.iter().copied())
            .filter(|t| t.kind.is_comment())
    }

    /// Pre-order iterator over every node
    pub fn preorder(&self) -> Descendants<'_> {
        self.root().descendants()
    }

    /// Innermost node whose span contains `span`
    pub fn covering_node(&self, span: Span) -> Node<'_> {
        let mut current = self.root();
        'outer: loop {
            for child in current.children() {
                if child.span().contains(span) && !child.span().is_empty() {
                    current = child;
                    continue 'outer;
                }
            }
            return current;
        }
    }

    /// Check structural invariants: single parent, acyclic, ordered disjoint contained children
    pub fn validate(&self) -> Result<(), String> {
        let mut seen_as_child = vec![false; self.nodes.len()];
        for (index, data) in self.nodes.iter().enumerate() {
            let id = NodeId(index as u32);
            let mut previous_end = data.span.start;
            for &child in &data.children {
                let child_data = self
                    .nodes
                    .get(child.index())
                    .ok_or_else(|| format!("{:?} has dangling child {:?}", id, child))?;
                if seen_as_child[child.index()] {
                    return Err(format!("{:?} has more than one parent", child));
                }
                seen_as_child[child.index()] = true;
                if child_data.parent != Some(id) {
                    return Err(format!("{:?} does not point back to {:?}", child, id));
                }
                if !data.span.contains(child_data.span) {
                    return Err(format!(
                        "{:?} span {} escapes parent {:?} span {}",
                        child_data.kind, child_data.span, data.kind, data.span
                    ));
                }
                if child_data.span.start < previous_end {
                    return Err(format!(
                        "{:?} span {} overlaps or precedes its previous sibling",
                        child_data.kind, child_data.span
                    ));
                }
                previous_end = child_data.span.end();
            }
        }
        for (index, data) in self.nodes.iter().enumerate() {
            let id = NodeId(index as u32);
            if id == self.root {
                if data.parent.is_some() {
                    return Err("root has a parent".to_string());
                }
                continue;
            }
            if !seen_as_child[index] {
                return Err(format!("{:?} ({:?}) is detached", id, data.kind));
            }
            let mut steps = 0;
            let mut current = data.parent;
            while let Some(parent) = current {
                steps += 1;
                if steps > self.nodes.len() {
                    return Err(format!("cycle through {:?}", id));
                }
                current = self.nodes[parent.index()].parent;
            }
        }
        Ok(())
    }
}

/// Copyable cursor into a [`SyntaxTree`]
#[derive(Clone, Copy)]
pub struct Node<'t> {
    tree: &'t SyntaxTree,
    id: NodeId,
}

impl<'t> PartialEq for Node<'t> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && std::ptr::eq(self.tree, other.tree)
    }
}

impl Eq for Node<'_> {}

impl fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@{}", self.kind(), self.span())
    }
}

impl<'t> Node<'t> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn tree(&self) -> &'t SyntaxTree {
        self.tree
    }

    fn data(&self) -> &'t NodeData {
        &self.tree.nodes[self.id.index()]
    }

    pub fn kind(&self) -> SyntaxKind {
        self.data().kind
    }

    pub fn is(&self, kind: SyntaxKind) -> bool {
        self.kind() == kind
    }

    pub fn span(&self) -> Span {
        self.data().span
    }

    pub fn text(&self) -> &'t str {
        self.tree.slice(self.span())
    }

    /// 1-based line of the node's first character
    pub fn line(&self) -> usize {
        self.tree.line_col(self.span().start).line
    }

    pub fn parent(&self) -> Option<Node<'t>> {
        self.data().parent.map(|id| self.tree.node(id))
    }

    pub fn ancestors(&self) -> impl Iterator<Item = Node<'t>> {
        let tree = self.tree;
        std::iter::successors(self.parent(), move |n| n.data().parent.map(|id| tree.node(id)))
    }

    pub fn children(&self) -> impl DoubleEndedIterator<Item = Node<'t>> + ExactSizeIterator {
        let tree = self.tree;
        self.data().children.iter().map(move |&id| tree.node(id))
    }

    pub fn child(&self, index: usize) -> Option<Node<'t>> {
        self.data().children.get(index).map(|&id| self.tree.node(id))
    }

    pub fn child_count(&self) -> usize {
        self.data().children.len()
    }

    pub fn child_of_kind(&self, kind: SyntaxKind) -> Option<Node<'t>> {
        self.children().find(|c| c.kind() == kind)
    }

    pub fn children_of_kind(&self, kind: SyntaxKind) -> impl Iterator<Item = Node<'t>> {
        self.children().filter(move |c| c.kind() == kind)
    }

    /// Expression children in order
    pub fn expressions(&self) -> impl Iterator<Item = Node<'t>> {
        self.children().filter(|c| c.kind().is_expression())
    }

    pub fn expr(&self, index: usize) -> Option<Node<'t>> {
        self.expressions().nth(index)
    }

    /// Statement children in order
    pub fn statements(&self) -> impl Iterator<Item = Node<'t>> {
        self.children().filter(|c| c.kind().is_statement())
    }

    /// First child that is a type
    pub fn type_child(&self) -> Option<Node<'t>> {
        self.children().find(|c| c.kind().is_type())
    }

    /// Pre-order traversal including `self`
    pub fn descendants(&self) -> Descendants<'t> {
        Descendants {
            tree: self.tree,
            stack: vec![self.id],
        }
    }

    pub fn nearest_ancestor(&self, pred: impl Fn(SyntaxKind) -> bool) -> Option<Node<'t>> {
        self.ancestors().find(|a| pred(a.kind()))
    }

    pub fn is_descendant_of(&self, other: Node<'t>) -> bool {
        self.ancestors().any(|a| a == other)
    }

    pub fn token(&self) -> Option<&'t Token> {
        self.data().token.map(|i| &self.tree.tokens[i as usize])
    }

    pub fn token_index(&self) -> Option<usize> {
        self.data().token.map(|i| i as usize)
    }

    pub fn token_kind(&self) -> Option<TokenKind> {
        self.token().map(|t| t.kind)
    }

    pub fn token_span(&self) -> Option<Span> {
        self.token().map(|t| t.span)
    }

    pub fn token_text(&self) -> Option<&'t str> {
        self.token().map(|t| self.tree.slice(t.span))
    }

    /// Identifier name carried by the main token, without a verbatim `@`
    pub fn name(&self) -> Option<&'t str> {
        self.token_text().map(|t| t.strip_prefix('@').unwrap_or(t))
    }

    /// Every token covered by this node
    pub fn tokens(&self) -> &'t [Token] {
        let (start, end) = self.data().tokens;
        &self.tree.tokens[start as usize..end as usize]
    }

    pub fn first_token(&self) -> Option<&'t Token> {
        self.tokens().first()
    }

    pub fn has_modifier(&self, kw: Keyword) -> bool {
        self.child_of_kind(SyntaxKind::ModifierList)
            .is_some_and(|m| m.tokens().iter().any(|t| t.kind.is_keyword(kw)))
    }

    /// Contextual modifier (`async`, `partial`) in the modifier list
    pub fn has_contextual_modifier(&self, word: &str) -> bool {
        self.child_of_kind(SyntaxKind::ModifierList).is_some_and(|m| {
            m.tokens()
                .iter()
                .any(|t| t.kind == TokenKind::Ident && self.tree.slice(t.span) == word)
        })
    }

    /// Whether the node's tokens carry a comment trivia anywhere after its first token
    pub fn contains_comments(&self) -> bool {
        self.tokens()
            .iter()
            .skip(1)
            .any(|t| t.leading.iter().any(|tr| tr.kind.is_comment()))
    }

    /// Nearest enclosing node of an executable member kind
    pub fn enclosing_member(&self) -> Option<Node<'t>> {
        self.ancestors()
            .find(|a| a.kind().is_executable_member() || a.kind() == SyntaxKind::LambdaExpr)
    }

    /// Skip any number of enclosing parentheses
    pub fn unparenthesized(&self) -> Node<'t> {
        let mut current = *self;
        while current.kind() == SyntaxKind::ParenExpr {
            match current.child(0) {
                Some(inner) => current = inner,
                None => break,
            }
        }
        current
    }

    /// Walk up through parenthesised parents
    pub fn outer_parenthesized(&self) -> Node<'t> {
        let mut current = *self;
        while let Some(parent) = current.parent() {
            if parent.kind() == SyntaxKind::ParenExpr {
                current = parent;
            } else {
                break;
            }
        }
        current
    }

    pub fn leading_trivia_kinds(&self) -> impl Iterator<Item = TriviaKind> + 't {
        self.first_token()
            .into_iter()
            .flat_map(|t| t.leading.iter().map(|tr| tr.kind))
    }
}

/// Pre-order node iterator
pub struct Descendants<'t> {
    tree: &'t SyntaxTree,
    stack: Vec<NodeId>,
}

impl<'t> Iterator for Descendants<'t> {
    type Item = Node<'t>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        let data = &self.tree.nodes[id.index()];
        self.stack.extend(data.children.iter().rev().copied());
        Some(self.tree.node(id))
    }
}

impl<'t> Descendants<'t> {
    /// Iterate without entering nodes for which `skip` is true
    pub fn pruned(self, skip: impl Fn(Node<'t>) -> bool) -> impl Iterator<Item = Node<'t>> {
        Pruned {
            tree: self.tree,
            stack: self.stack,
            skip,
        }
    }
}

struct Pruned<'t, F> {
    tree: &'t SyntaxTree,
    stack: Vec<NodeId>,
    skip: F,
}

impl<'t, F: Fn(Node<'t>) -> bool> Iterator for Pruned<'t, F> {
    type Item = Node<'t>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        let node = self.tree.node(id);
        if !(self.skip)(node) {
            let data = &self.tree.nodes[id.index()];
            self.stack.extend(data.children.iter().rev().copied());
        }
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use crate::syntax::{parse, ParseOptions};
    use crate::syntax::SyntaxKind;

    #[test]
    fn test_parent_and_ancestors() {
        let tree = parse("class C { void M() { int x = 1; } }", &ParseOptions::default());
        let declarator = tree
            .preorder()
            .find(|n| n.kind() == SyntaxKind::VariableDeclarator)
            .unwrap();
        assert_eq!(declarator.name(), Some("x"));
        let kinds: Vec<_> = declarator.ancestors().map(|a| a.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                SyntaxKind::VariableDeclaration,
                SyntaxKind::LocalDeclStmt,
                SyntaxKind::Block,
                SyntaxKind::MethodDecl,
                SyntaxKind::ClassDecl,
                SyntaxKind::CompilationUnit,
            ]
        );
        assert!(tree.validate().is_ok());
    }

    #[test]
    fn test_covering_node() {
        let text = "class C { int M() => a + b; }";
        let tree = parse(text, &ParseOptions::default());
        let offset = text.find('+').unwrap() as u32;
        let node = tree.covering_node(crate::syntax::Span::new(offset, 1));
        assert_eq!(node.kind(), SyntaxKind::BinaryExpr);
        assert_eq!(node.text(), "a + b");
    }

    #[test]
    fn test_pruned_descendants_skip_lambda_bodies() {
        let tree = parse(
            "class C { void M() { F(() => y); z(); } }",
            &ParseOptions::default(),
        );
        let names: Vec<_> = tree
            .preorder()
            .pruned(|n| n.kind() == SyntaxKind::LambdaExpr)
            .filter(|n| n.kind() == SyntaxKind::IdentifierName)
            .filter_map(|n| n.name())
            .collect();
        assert_eq!(names, vec!["F", "z"]);
    }
}
