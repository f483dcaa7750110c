//! Abstract Syntax Tree for the C declarations the generator understands.

use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Source location of a declaration, in the original (pre-`cpp`) file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Coord {
    pub file: PathBuf,
    pub line: usize,
}

impl Coord {
    pub fn new(file: impl AsRef<Path>, line: usize) -> Self {
        Coord {
            file: normalize_path(file.as_ref()),
            line,
        }
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.line)
    }
}

/// Lexically drop `.` and resolve `..` so one header reached through different
/// include paths compares equal.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// A parsed, preprocessed C file.
#[derive(Debug, Clone, Default)]
pub struct TranslationUnit {
    pub decls: Vec<Decl>,
}

/// One declarator of a declaration (`int a, *b;` yields two).
#[derive(Debug, Clone)]
pub struct Decl {
    /// `None` for bare type definitions such as `struct s { ... };`.
    pub name: Option<String>,
    pub is_typedef: bool,
    pub ty: DeclType,
    /// Width expression of a C bit-field (`int x : 3`).
    pub bitsize: Option<String>,
    pub coord: Coord,
}

/// Declarator shape, outermost first: `int *a[3]` is an array of pointers.
#[derive(Debug, Clone)]
pub enum DeclType {
    TypeDecl(TypeSpec),
    ArrayDecl { dim: ArrayDim, inner: Box<DeclType> },
    PtrDecl(Box<DeclType>),
    FuncDecl(Box<DeclType>),
}

impl DeclType {
    /// Type specifier at the bottom of the declarator.
    pub fn spec(&self) -> &TypeSpec {
        match self {
            DeclType::TypeDecl(spec) => spec,
            DeclType::ArrayDecl { inner, .. } | DeclType::PtrDecl(inner) | DeclType::FuncDecl(inner) => {
                inner.spec()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum TypeSpec {
    /// Builtin or typedef name, one entry per word (`unsigned`, `long`).
    Identifier(Vec<String>),
    Struct(StructSpec),
    Union(StructSpec),
    Enum(EnumSpec),
}

#[derive(Debug, Clone)]
pub struct StructSpec {
    pub name: Option<String>,
    /// `None` for a reference or forward declaration.
    pub members: Option<Vec<Decl>>,
    pub coord: Coord,
}

#[derive(Debug, Clone)]
pub struct EnumSpec {
    pub name: Option<String>,
    pub values: Option<Vec<Enumerator>>,
    pub coord: Coord,
}

#[derive(Debug, Clone)]
pub struct Enumerator {
    pub name: String,
    /// Expression text as written, if any.
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrayDim {
    Literal(u64),
    /// Anything that is not an integer literal, kept as text.
    Expr(String),
    Unsized,
}

/// Parse a C integer literal: decimal, hex, octal, with optional `u`/`l` suffixes.
pub fn parse_int_literal(text: &str) -> Option<i64> {
    let t = text.trim().trim_end_matches(['u', 'U', 'l', 'L']);
    let (neg, t) = match t.strip_prefix('-') {
        Some(rest) => (true, rest.trim()),
        None => (false, t),
    };
    let value = if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else if t.len() > 1 && t.starts_with('0') {
        i64::from_str_radix(&t[1..], 8).ok()?
    } else {
        t.parse().ok()?
    };
    Some(if neg { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_literals() {
        assert_eq!(parse_int_literal("42"), Some(42));
        assert_eq!(parse_int_literal("0x1F"), Some(31));
        assert_eq!(parse_int_literal("010"), Some(8));
        assert_eq!(parse_int_literal("16UL"), Some(16));
        assert_eq!(parse_int_literal("-3"), Some(-3));
        assert_eq!(parse_int_literal("N + 1"), None);
    }

    #[test]
    fn coords_normalize() {
        let a = Coord::new("include/./../include/a.h", 3);
        let b = Coord::new("include/a.h", 3);
        assert_eq!(a, b);
        assert_eq!(b.to_string(), "include/a.h:3");
    }
}
