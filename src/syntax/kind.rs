//! Token and node kinds

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved keywords. Contextual keywords (`var`, `when`, `not`, ...) lex as identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Abstract,
    As,
    Base,
    Bool,
    Break,
    Byte,
    Case,
    Catch,
    Char,
    Checked,
    Class,
    Const,
    Continue,
    Decimal,
    Default,
    Delegate,
    Do,
    Double,
    Else,
    Enum,
    Event,
    Explicit,
    Extern,
    False,
    Finally,
    Fixed,
    Float,
    For,
    Foreach,
    Goto,
    If,
    Implicit,
    In,
    Int,
    Interface,
    Internal,
    Is,
    Lock,
    Long,
    Namespace,
    New,
    Null,
    Object,
    Operator,
    Out,
    Override,
    Params,
    Private,
    Protected,
    Public,
    Readonly,
    Ref,
    Return,
    Sbyte,
    Sealed,
    Short,
    Sizeof,
    Stackalloc,
    Static,
    String,
    Struct,
    Switch,
    This,
    Throw,
    True,
    Try,
    Typeof,
    Uint,
    Ulong,
    Unchecked,
    Unsafe,
    Ushort,
    Using,
    Virtual,
    Void,
    Volatile,
    While,
}

impl Keyword {
    pub fn from_ident(text: &str) -> Option<Self> {
        use Keyword::*;
        let kw = match text {
            "abstract" => Abstract,
            "as" => As,
            "base" => Base,
            "bool" => Bool,
            "break" => Break,
            "byte" => Byte,
            "case" => Case,
            "catch" => Catch,
            "char" => Char,
            "checked" => Checked,
            "class" => Class,
            "const" => Const,
            "continue" => Continue,
            "decimal" => Decimal,
            "default" => Default,
            "delegate" => Delegate,
            "do" => Do,
            "double" => Double,
            "else" => Else,
            "enum" => Enum,
            "event" => Event,
            "explicit" => Explicit,
            "extern" => Extern,
            "false" => False,
            "finally" => Finally,
            "fixed" => Fixed,
            "float" => Float,
            "for" => For,
            "foreach" => Foreach,
            "goto" => Goto,
            "if" => If,
            "implicit" => Implicit,
            "in" => In,
            "int" => Int,
            "interface" => Interface,
            "internal" => Internal,
            "is" => Is,
            "lock" => Lock,
            "long" => Long,
            "namespace" => Namespace,
            "new" => New,
            "null" => Null,
            "object" => Object,
            "operator" => Operator,
            "out" => Out,
            "override" => Override,
            "params" => Params,
            "private" => Private,
            "protected" => Protected,
            "public" => Public,
            "readonly" => Readonly,
            "ref" => Ref,
            "return" => Return,
            "sbyte" => Sbyte,
            "sealed" => Sealed,
            "short" => Short,
            "sizeof" => Sizeof,
            "stackalloc" => Stackalloc,
            "static" => Static,
            "string" => String,
            "struct" => Struct,
            "switch" => Switch,
            "this" => This,
            "throw" => Throw,
            "true" => True,
            "try" => Try,
            "typeof" => Typeof,
            "uint" => Uint,
            "ulong" => Ulong,
            "unchecked" => Unchecked,
            "unsafe" => Unsafe,
            "ushort" => Ushort,
            "using" => Using,
            "virtual" => Virtual,
            "void" => Void,
            "volatile" => Volatile,
            "while" => While,
            _ => return None,
        };
        Some(kw)
    }

    /// Keywords naming a predefined type
    pub fn is_predefined_type(self) -> bool {
        use Keyword::*;
        matches!(
            self,
            Bool | Byte
                | Char
                | Decimal
                | Double
                | Float
                | Int
                | Long
                | Object
                | Sbyte
                | Short
                | String
                | Uint
                | Ulong
                | Ushort
                | Void
        )
    }

    /// Keywords that may appear in a modifier list
    pub fn is_modifier(self) -> bool {
        use Keyword::*;
        matches!(
            self,
            Abstract
                | Const
                | Event
                | Extern
                | Fixed
                | Internal
                | New
                | Override
                | Private
                | Protected
                | Public
                | Readonly
                | Sealed
                | Static
                | Unsafe
                | Virtual
                | Volatile
                | Ref
        )
    }
}

/// Lexical token kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Ident,
    Keyword(Keyword),
    IntLiteral,
    RealLiteral,
    StringLiteral,
    CharLiteral,
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Semi,
    Comma,
    Dot,
    Colon,
    ColonColon,
    Question,
    QuestionDot,
    QuestionQuestion,
    QuestionQuestionEq,
    Arrow,
    Eq,
    EqEq,
    BangEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Shl,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    AmpAmp,
    Pipe,
    PipePipe,
    Caret,
    Bang,
    Tilde,
    PlusPlus,
    MinusMinus,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    AmpEq,
    PipeEq,
    CaretEq,
    ShlEq,
    ShrEq,
    DotDot,
    Unknown,
    Eof,
}

impl TokenKind {
    pub fn is_keyword(self, kw: Keyword) -> bool {
        self == TokenKind::Keyword(kw)
    }

    pub fn is_literal(self) -> bool {
        matches!(
            self,
            TokenKind::IntLiteral
                | TokenKind::RealLiteral
                | TokenKind::StringLiteral
                | TokenKind::CharLiteral
                | TokenKind::Keyword(Keyword::True)
                | TokenKind::Keyword(Keyword::False)
                | TokenKind::Keyword(Keyword::Null)
        )
    }

    pub fn is_assignment_operator(self) -> bool {
        use TokenKind::*;
        matches!(
            self,
            Eq | PlusEq
                | MinusEq
                | StarEq
                | SlashEq
                | PercentEq
                | AmpEq
                | PipeEq
                | CaretEq
                | ShlEq
                | ShrEq
                | QuestionQuestionEq
        )
    }
}

/// Trivia attached in front of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriviaKind {
    Whitespace,
    Newline,
    LineComment,
    BlockComment,
    DocComment,
    Directive,
    DisabledText,
}

impl TriviaKind {
    pub fn is_comment(self) -> bool {
        matches!(
            self,
            TriviaKind::LineComment | TriviaKind::BlockComment | TriviaKind::DocComment
        )
    }
}

/// Broad grouping of node kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Declaration,
    Statement,
    Expression,
    Pattern,
    Type,
    Clause,
    Error,
}

/// Syntax node kinds. Child layouts are documented per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SyntaxKind {
    // Declarations
    /// usings, attribute lists, members
    CompilationUnit,
    /// name
    UsingDirective,
    /// name, members
    NamespaceDecl,
    /// name, members
    FileScopedNamespaceDecl,
    /// attributes, modifiers, type parameters, parameters (records), base list, members
    ClassDecl,
    StructDecl,
    InterfaceDecl,
    RecordDecl,
    /// attributes, modifiers, base list, enum members
    EnumDecl,
    /// attributes, value expression
    EnumMemberDecl,
    /// attributes, modifiers, variable declaration
    FieldDecl,
    /// attributes, modifiers, return type, type parameters, parameters, body
    MethodDecl,
    /// attributes, modifiers, parameters, constructor initializer, body
    ConstructorDecl,
    /// attributes, modifiers, parameters, body
    DestructorDecl,
    /// attributes, modifiers, type, accessor list or arrow body, initializer
    PropertyDecl,
    /// accessors
    AccessorList,
    /// attributes, modifiers, body
    AccessorDecl,
    /// parameters
    ParameterList,
    /// attributes, modifiers, type, default value
    Parameter,
    TypeParameterList,
    TypeParameter,
    /// base types
    BaseList,
    /// argument list
    ConstructorInitializer,
    AttributeList,
    ModifierList,
    /// expression
    ArrowBody,
    /// type, declarators
    VariableDeclaration,
    /// initializer expression
    VariableDeclarator,

    // Types
    PredefinedType,
    /// type argument list
    NamedType,
    /// left type, right named type
    QualifiedType,
    /// element type
    ArrayType,
    /// element type
    NullableType,
    /// element types
    TupleType,
    TypeArgumentList,

    // Statements
    Block,
    /// modifiers, variable declaration
    LocalDeclStmt,
    /// same layout as a method declaration
    LocalFunctionStmt,
    ExpressionStmt,
    /// condition, then statement, else clause
    IfStmt,
    /// statement
    ElseClause,
    /// condition, body
    WhileStmt,
    /// body, condition
    DoStmt,
    /// initializer, condition, incrementor, body
    ForStmt,
    ForInitializer,
    ForCondition,
    ForIncrementor,
    /// type, collection, body
    ForEachStmt,
    /// governing expression, sections
    SwitchStmt,
    /// labels, statements
    SwitchSection,
    /// pattern, when clause
    CaseLabel,
    DefaultLabel,
    /// expression
    WhenClause,
    BreakStmt,
    ContinueStmt,
    ReturnStmt,
    ThrowStmt,
    /// optional case expression
    GotoStmt,
    /// statement
    LabeledStmt,
    /// block, catch clauses, finally clause
    TryStmt,
    /// declaration, filter, block
    CatchClause,
    /// type
    CatchDeclaration,
    /// block
    FinallyClause,
    /// declaration or expression, body
    UsingStmt,
    /// expression, body
    LockStmt,
    YieldReturnStmt,
    YieldBreakStmt,
    EmptyStmt,
    /// block
    CheckedStmt,

    // Expressions
    LiteralExpr,
    /// type argument list for generic names
    IdentifierName,
    ThisExpr,
    BaseExpr,
    ParenExpr,
    /// left, right
    BinaryExpr,
    /// operand
    PrefixUnaryExpr,
    /// operand
    PostfixUnaryExpr,
    /// target, value
    AssignmentExpr,
    /// condition, when true, when false
    ConditionalExpr,
    /// receiver
    MemberAccessExpr,
    /// receiver
    ConditionalAccessExpr,
    /// receiver, arguments
    ElementAccessExpr,
    /// receiver, arguments
    ConditionalElementAccessExpr,
    /// callee, argument list
    InvocationExpr,
    ArgumentList,
    /// expression
    Argument,
    /// type
    DeclarationExpr,
    /// type, argument list, initializer
    ObjectCreationExpr,
    /// argument list, initializer
    ImplicitObjectCreationExpr,
    /// element type, rank sizes, initializer
    ArrayCreationExpr,
    /// initializer
    ImplicitArrayCreationExpr,
    InitializerExpr,
    /// type, operand
    CastExpr,
    /// operand, type
    AsExpr,
    /// operand, pattern
    IsPatternExpr,
    /// governing expression, arms
    SwitchExpr,
    /// pattern, when clause, expression
    SwitchExprArm,
    /// parameters, body
    LambdaExpr,
    /// type
    TypeOfExpr,
    /// type
    DefaultExpr,
    AwaitExpr,
    ThrowExpr,
    TupleExpr,
    /// type used as a member access receiver (`int.Parse`)
    TypeExpr,
    /// interpolated or opaque string
    InterpolatedStringExpr,

    // Patterns
    ConstantPattern,
    TypePattern,
    DeclarationPattern,
    VarPattern,
    DiscardPattern,
    NotPattern,
    AndPattern,
    OrPattern,
    RelationalPattern,
    ParenthesizedPattern,

    Error,
}

impl SyntaxKind {
    pub fn category(self) -> Category {
        use SyntaxKind::*;
        match self {
            CompilationUnit | UsingDirective | NamespaceDecl | FileScopedNamespaceDecl
            | ClassDecl | StructDecl | InterfaceDecl | RecordDecl | EnumDecl | EnumMemberDecl
            | FieldDecl | MethodDecl | ConstructorDecl | DestructorDecl | PropertyDecl
            | AccessorDecl | Parameter | TypeParameter | VariableDeclarator => Category::Declaration,

            AccessorList | ParameterList | TypeParameterList | BaseList
            | ConstructorInitializer | AttributeList | ModifierList | ArrowBody
            | VariableDeclaration | ElseClause | ForInitializer | ForCondition
            | ForIncrementor | SwitchSection | CaseLabel | DefaultLabel | WhenClause
            | CatchClause | CatchDeclaration | FinallyClause | ArgumentList | Argument
            | SwitchExprArm | TypeArgumentList => Category::Clause,

            PredefinedType | NamedType | QualifiedType | ArrayType | NullableType
            | TupleType => Category::Type,

            Block | LocalDeclStmt | LocalFunctionStmt | ExpressionStmt | IfStmt | WhileStmt
            | DoStmt | ForStmt | ForEachStmt | SwitchStmt | BreakStmt | ContinueStmt
            | ReturnStmt | ThrowStmt | GotoStmt | LabeledStmt | TryStmt | UsingStmt
            | LockStmt | YieldReturnStmt | YieldBreakStmt | EmptyStmt | CheckedStmt => {
                Category::Statement
            }

            LiteralExpr | IdentifierName | ThisExpr | BaseExpr | ParenExpr | BinaryExpr
            | PrefixUnaryExpr | PostfixUnaryExpr | AssignmentExpr | ConditionalExpr
            | MemberAccessExpr | ConditionalAccessExpr | ElementAccessExpr
            | ConditionalElementAccessExpr | InvocationExpr | DeclarationExpr
            | ObjectCreationExpr | ImplicitObjectCreationExpr | ArrayCreationExpr
            | ImplicitArrayCreationExpr | InitializerExpr | CastExpr | AsExpr
            | IsPatternExpr | SwitchExpr | LambdaExpr | TypeOfExpr | DefaultExpr
            | AwaitExpr | ThrowExpr | TupleExpr | TypeExpr
            | InterpolatedStringExpr => Category::Expression,

            ConstantPattern | TypePattern | DeclarationPattern | VarPattern | DiscardPattern
            | NotPattern | AndPattern | OrPattern | RelationalPattern
            | ParenthesizedPattern => Category::Pattern,

            Error => Category::Error,
        }
    }

    pub fn is_expression(self) -> bool {
        self.category() == Category::Expression || self == SyntaxKind::Error
    }

    pub fn is_statement(self) -> bool {
        self.category() == Category::Statement
    }

    pub fn is_type(self) -> bool {
        self.category() == Category::Type
    }

    pub fn is_pattern(self) -> bool {
        self.category() == Category::Pattern
    }

    pub fn is_type_declaration(self) -> bool {
        matches!(
            self,
            SyntaxKind::ClassDecl
                | SyntaxKind::StructDecl
                | SyntaxKind::InterfaceDecl
                | SyntaxKind::RecordDecl
                | SyntaxKind::EnumDecl
        )
    }

    /// Nodes that own an executable body and get their own control-flow graph
    pub fn is_executable_member(self) -> bool {
        matches!(
            self,
            SyntaxKind::MethodDecl
                | SyntaxKind::ConstructorDecl
                | SyntaxKind::DestructorDecl
                | SyntaxKind::AccessorDecl
                | SyntaxKind::PropertyDecl
                | SyntaxKind::LocalFunctionStmt
        )
    }

    /// Nested function bodies that flow analyses do not enter
    pub fn is_nested_function(self) -> bool {
        matches!(self, SyntaxKind::LambdaExpr | SyntaxKind::LocalFunctionStmt)
    }

    /// Every node kind, in declaration order
    pub fn all() -> &'static [SyntaxKind] {
        use SyntaxKind::*;
        &[
            CompilationUnit, UsingDirective, NamespaceDecl, FileScopedNamespaceDecl, ClassDecl,
            StructDecl, InterfaceDecl, RecordDecl, EnumDecl, EnumMemberDecl, FieldDecl,
            MethodDecl, ConstructorDecl, DestructorDecl, PropertyDecl, AccessorList,
            AccessorDecl, ParameterList, Parameter, TypeParameterList, TypeParameter, BaseList,
            ConstructorInitializer, AttributeList, ModifierList, ArrowBody, VariableDeclaration,
            VariableDeclarator, PredefinedType, NamedType, QualifiedType, ArrayType,
            NullableType, TupleType, TypeArgumentList, Block, LocalDeclStmt, LocalFunctionStmt,
            ExpressionStmt, IfStmt, ElseClause, WhileStmt, DoStmt, ForStmt, ForInitializer,
            ForCondition, ForIncrementor, ForEachStmt, SwitchStmt, SwitchSection, CaseLabel,
            DefaultLabel, WhenClause, BreakStmt, ContinueStmt, ReturnStmt, ThrowStmt, GotoStmt,
            LabeledStmt, TryStmt, CatchClause, CatchDeclaration, FinallyClause, UsingStmt,
            LockStmt, YieldReturnStmt, YieldBreakStmt, EmptyStmt, CheckedStmt, LiteralExpr,
            IdentifierName, ThisExpr, BaseExpr, ParenExpr, BinaryExpr, PrefixUnaryExpr,
            PostfixUnaryExpr, AssignmentExpr, ConditionalExpr, MemberAccessExpr,
            ConditionalAccessExpr, ElementAccessExpr, ConditionalElementAccessExpr,
            InvocationExpr, ArgumentList, Argument, DeclarationExpr, ObjectCreationExpr,
            ImplicitObjectCreationExpr, ArrayCreationExpr, ImplicitArrayCreationExpr,
            InitializerExpr, CastExpr, AsExpr, IsPatternExpr, SwitchExpr, SwitchExprArm,
            LambdaExpr, TypeOfExpr, DefaultExpr, AwaitExpr, ThrowExpr, TupleExpr, TypeExpr,
            InterpolatedStringExpr, ConstantPattern, TypePattern, DeclarationPattern,
            VarPattern, DiscardPattern, NotPattern, AndPattern, OrPattern, RelationalPattern,
            ParenthesizedPattern, Error,
        ]
    }
}

impl fmt::Display for SyntaxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Language version gates for newer syntax
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum LanguageVersion {
    #[serde(rename = "7")]
    CSharp7,
    #[serde(rename = "8")]
    CSharp8,
    #[serde(rename = "9")]
    CSharp9,
    #[serde(rename = "10")]
    CSharp10,
    #[default]
    #[serde(rename = "latest")]
    Latest,
}

impl LanguageVersion {
    pub fn number(self) -> &'static str {
        match self {
            LanguageVersion::CSharp7 => "7",
            LanguageVersion::CSharp8 => "8",
            LanguageVersion::CSharp9 => "9",
            LanguageVersion::CSharp10 => "10",
            LanguageVersion::Latest => "latest",
        }
    }
}

impl fmt::Display for LanguageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LanguageVersion::Latest => write!(f, "latest"),
            other => write!(f, "C# {}", other.number()),
        }
    }
}

impl std::str::FromStr for LanguageVersion {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s
            .trim()
            .to_lowercase()
            .replace("csharp", "")
            .replace("c#", "")
            .replace(' ', "");
        match normalized.as_str() {
            "7" | "7.0" | "7.3" => Ok(LanguageVersion::CSharp7),
            "8" | "8.0" => Ok(LanguageVersion::CSharp8),
            "9" | "9.0" => Ok(LanguageVersion::CSharp9),
            "10" | "10.0" => Ok(LanguageVersion::CSharp10),
            "latest" | "preview" => Ok(LanguageVersion::Latest),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_a_category() {
        for kind in SyntaxKind::all() {
            let _ = kind.category();
        }
        assert_eq!(SyntaxKind::all().len(), SyntaxKind::Error as usize + 1);
    }

    #[test]
    fn test_keyword_lookup() {
        assert_eq!(Keyword::from_ident("foreach"), Some(Keyword::Foreach));
        assert_eq!(Keyword::from_ident("var"), None);
        assert!(Keyword::Int.is_predefined_type());
        assert!(!Keyword::If.is_predefined_type());
    }

    #[test]
    fn test_language_version_parse() {
        assert_eq!("CSharp9".parse::<LanguageVersion>(), Ok(LanguageVersion::CSharp9));
        assert_eq!("8".parse::<LanguageVersion>(), Ok(LanguageVersion::CSharp8));
        assert_eq!("latest".parse::<LanguageVersion>(), Ok(LanguageVersion::Latest));
        assert!("11".parse::<LanguageVersion>().is_err());
        assert!(LanguageVersion::CSharp7 < LanguageVersion::CSharp8);
    }
}
