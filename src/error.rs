//! Error taxonomy: configuration errors, C parse errors and the umbrella [`Error`].

use crate::ast::Coord;
use std::path::PathBuf;

/// Malformed or contradictory rule declarations and options.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{struct_name}: rule needs either a `member` or a `type` key")]
    MissingKey { struct_name: String },
    #[error("{struct_name}: rule has both `member` and `type` keys")]
    AmbiguousKey { struct_name: String },
    #[error("{struct_name}: range rule needs a min or max value")]
    EmptyRange { struct_name: String },
    #[error("{struct_name}: enum rule needs a non-empty mapping or list of values")]
    EmptyEnum { struct_name: String },
    #[error("{struct_name}: invalid bitstring key `{key}`")]
    InvalidBitstringKey { struct_name: String, key: String },
    #[error("{struct_name}: bitstring rule defines no bits")]
    EmptyBitstring { struct_name: String },
    #[error("{struct_name}: invalid trailer rule: {reason}")]
    InvalidTrailer { struct_name: String, reason: String },
    #[error("{struct_name}: custom rule needs a `field` kind")]
    MissingCustomField { struct_name: String },
    #[error("unknown ProtoField kind `{0}`")]
    UnknownFieldKind(String),
    #[error("unknown field alignment for `{member}`")]
    UnknownAlignment { member: String },
    #[error("unknown size for `{member}` of type `{ctype}`")]
    UnknownSize { member: String, ctype: String },
    #[error("no wire type for `{member}` of type `{ctype}`")]
    UnmappedType { member: String, ctype: String },
    #[error("unknown platform `{0}`")]
    UnknownPlatform(String),
    #[error("conformance file not found: {}", .0.display())]
    UnknownFile(PathBuf),
    #[error("two structs named `{name}`: {first} and {second}")]
    DuplicateStruct {
        name: String,
        first: Coord,
        second: Coord,
    },
    #[error("invalid message id for `{name}`: {id} (0 - 65535)")]
    InvalidId { name: String, id: i64 },
    #[error("struct block in {} has no name", .0.display())]
    UnnamedStruct(PathBuf),
    #[error("{struct_name}: invalid value for `{key}`: {reason}")]
    InvalidValue {
        struct_name: String,
        key: String,
        reason: String,
    },
    #[error("YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// C input the struct builder cannot handle.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("{file}: syntax error: {message}")]
    Syntax { file: String, message: String },
    #[error("unsupported declaration of member `{member}`: {reason}")]
    UnsupportedMember { member: String, reason: String },
    #[error("unknown enum `{0}`")]
    UnknownEnum(String),
    #[error("unknown struct or union `{0}`")]
    UnknownStruct(String),
    #[error("unknown type `{ctype}` for member `{member}`")]
    UnknownType { member: String, ctype: String },
    #[error("enumerator `{name}`: unsupported value `{expr}`")]
    EnumValue { name: String, expr: String },
    #[error("{file}: preprocessor failed: {message}")]
    Preprocessor { file: String, message: String },
}

/// Any failure while loading rules, parsing C or generating dissectors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("struct `{name}` ({coord}): {source}")]
    InStruct {
        name: String,
        coord: Coord,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Innermost error, skipping `InStruct` context layers.
    pub fn root(&self) -> &Error {
        match self {
            Error::InStruct { source, .. } => source.root(),
            other => other,
        }
    }
}
