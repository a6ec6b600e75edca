//! Type references and the catalog of well-known framework types

use crate::syntax::{Node, SyntaxKind};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum TypeRef {
    Named {
        name: String,
        args: Vec<TypeRef>,
    },
    Array(Box<TypeRef>),
    Nullable(Box<TypeRef>),
    #[default]
    Unknown,
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        TypeRef::Named {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Build from a type syntax node
    pub fn from_syntax(node: Node<'_>) -> Self {
        match node.kind() {
            SyntaxKind::PredefinedType => node.token_text().map_or(TypeRef::Unknown, TypeRef::named),
            SyntaxKind::NamedType => {
                let args = node
                    .child_of_kind(SyntaxKind::TypeArgumentList)
                    .map(|list| list.children().map(TypeRef::from_syntax).collect())
                    .unwrap_or_default();
                match node.name() {
                    Some(name) => TypeRef::Named {
                        name: name.to_string(),
                        args,
                    },
                    None => TypeRef::Unknown,
                }
            }
            SyntaxKind::QualifiedType => {
                let right = node.child(1).map(TypeRef::from_syntax);
                let left = node.child(0).map(|l| {
                    l.text()
                        .split('<')
                        .next()
                        .unwrap_or("")
                        .split_whitespace()
                        .collect::<String>()
                });
                match (left, right) {
                    (Some(left), Some(TypeRef::Named { name, args })) => TypeRef::Named {
                        name: format!("{}.{}", left, name),
                        args,
                    },
                    _ => TypeRef::Unknown,
                }
            }
            SyntaxKind::ArrayType => node
                .child(0)
                .map_or(TypeRef::Unknown, |e| TypeRef::Array(Box::new(TypeRef::from_syntax(e)))),
            SyntaxKind::NullableType => node.child(0).map_or(TypeRef::Unknown, |e| {
                TypeRef::Nullable(Box::new(TypeRef::from_syntax(e)))
            }),
            SyntaxKind::TupleType => TypeRef::Named {
                name: "ValueTuple".to_string(),
                args: node.children().map(TypeRef::from_syntax).collect(),
            },
            _ => TypeRef::Unknown,
        }
    }

    /// Last dotted segment of a named type
    pub fn simple_name(&self) -> Option<&str> {
        match self {
            TypeRef::Named { name, .. } => Some(name.rsplit('.').next().unwrap_or(name)),
            _ => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, TypeRef::Unknown)
    }

    pub fn is_var(&self) -> bool {
        self.simple_name() == Some("var")
    }

    /// Predefined or well-known framework value type; user structs need the semantic model
    pub fn is_value_type(&self) -> bool {
        match self {
            TypeRef::Nullable(inner) => inner.is_value_type(),
            TypeRef::Named { name, args } => {
                let simple = name.rsplit('.').next().unwrap_or(name);
                if simple == "Nullable" && args.len() == 1 {
                    return true;
                }
                KnownTypes::is_value_type_name(simple)
            }
            _ => false,
        }
    }

    /// `int?`, `Nullable<T>`: a nullable wrapper over a value type
    pub fn is_nullable_value_type(&self) -> bool {
        match self {
            TypeRef::Nullable(inner) => inner.is_value_type(),
            TypeRef::Named { name, args } => {
                name.rsplit('.').next() == Some("Nullable") && args.len() == 1
            }
            _ => false,
        }
    }

    /// Strip one nullable wrapper
    pub fn underlying(&self) -> &TypeRef {
        match self {
            TypeRef::Nullable(inner) => inner,
            TypeRef::Named { name, args }
                if name.rsplit('.').next() == Some("Nullable") && args.len() == 1 =>
            {
                &args[0]
            }
            other => other,
        }
    }

    pub fn is_bool(&self) -> bool {
        matches!(self.simple_name(), Some("bool" | "Boolean"))
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Named { name, args } if args.is_empty() => write!(f, "{}", name),
            TypeRef::Named { name, args } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}<{}>", name, args.join(", "))
            }
            TypeRef::Array(elem) => write!(f, "{}[]", elem),
            TypeRef::Nullable(inner) => write!(f, "{}?", inner),
            TypeRef::Unknown => write!(f, "?"),
        }
    }
}

/// Framework types the analyses know about without referenced assemblies
pub struct KnownTypes;

const VALUE_TYPES: &[&str] = &[
    "bool", "byte", "sbyte", "char", "decimal", "double", "float", "int", "uint", "long", "ulong",
    "short", "ushort", "Boolean", "Byte", "SByte", "Char", "Decimal", "Double", "Single", "Int16",
    "Int32", "Int64", "UInt16", "UInt32", "UInt64", "DateTime", "DateTimeOffset", "TimeSpan",
    "Guid", "CancellationToken", "IntPtr", "UIntPtr", "KeyValuePair", "ValueTuple",
];

const DISPOSABLE_TYPES: &[&str] = &[
    "FileStream",
    "StreamReader",
    "StreamWriter",
    "BinaryReader",
    "BinaryWriter",
    "MemoryStream",
    "Stream",
    "TextReader",
    "TextWriter",
    "StringReader",
    "StringWriter",
    "HttpClient",
    "WebClient",
    "Timer",
    "SqlConnection",
    "SqlCommand",
    "Socket",
    "TcpClient",
    "UdpClient",
    "Process",
    "Bitmap",
    "Font",
    "CancellationTokenSource",
    "SemaphoreSlim",
    "ManualResetEvent",
    "AutoResetEvent",
    "Mutex",
    "RSACryptoServiceProvider",
    "X509Certificate2",
    "ZipArchive",
    "GZipStream",
    "DeflateStream",
    "CryptoStream",
    "NetworkStream",
    "BufferedStream",
    "FileSystemWatcher",
];

const DISPOSABLE_INTERFACES: &[&str] = &["IDisposable", "IAsyncDisposable"];

impl KnownTypes {
    pub fn is_value_type_name(simple: &str) -> bool {
        VALUE_TYPES.contains(&simple)
    }

    pub fn is_disposable_name(simple: &str) -> bool {
        DISPOSABLE_TYPES.contains(&simple) || DISPOSABLE_INTERFACES.contains(&simple)
    }

    pub fn is_disposable_interface(simple: &str) -> bool {
        DISPOSABLE_INTERFACES.contains(&simple)
    }

    /// Methods that release a disposable resource
    pub fn is_dispose_method(name: &str) -> bool {
        matches!(name, "Dispose" | "Close" | "DisposeAsync")
    }
}
