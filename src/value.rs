//! Values produced by the layout preview.

use crate::preview::Decoded;
use std::fmt;

/// A single decoded value (leaf or compound).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Unsigned(u64),
    Signed(i64),
    Bool(bool),
    Float(f32),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// Struct, union or inline group members, in layout order.
    Struct(Vec<Decoded>),
    /// Array elements (or inner dimensions), in order.
    List(Vec<Decoded>),
}

impl Value {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Unsigned(x) => Some(*x),
            Value::Signed(x) => u64::try_from(*x).ok(),
            Value::Bool(x) => Some(*x as u64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Signed(x) => Some(*x),
            Value::Unsigned(x) => i64::try_from(*x).ok(),
            Value::Bool(x) => Some(*x as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x as f64),
            Value::Double(x) => Some(*x),
            Value::Unsigned(x) => Some(*x as f64),
            Value::Signed(x) => Some(*x as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&[Decoded]> {
        match self {
            Value::Struct(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Decoded]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_compound(&self) -> bool {
        matches!(self, Value::Struct(_) | Value::List(_))
    }
}

fn hex_string(b: &[u8]) -> String {
    b.iter().map(|x| format!("{:02x}", x)).collect::<Vec<_>>().join(" ")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unsigned(x) => write!(f, "{}", x),
            Value::Signed(x) => write!(f, "{}", x),
            Value::Bool(x) => write!(f, "{}", x),
            Value::Float(x) => write!(f, "{}", x),
            Value::Double(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "hex({})", hex_string(b)),
            Value::Struct(m) => write!(f, "struct ({} members)", m.len()),
            Value::List(v) => write!(f, "[{} elements]", v.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions() {
        assert_eq!(Value::Signed(-1).as_u64(), None);
        assert_eq!(Value::Signed(7).as_u64(), Some(7));
        assert_eq!(Value::Unsigned(u64::MAX).as_i64(), None);
        assert_eq!(Value::Bool(true).as_i64(), Some(1));
        assert_eq!(Value::Float(1.5).as_f64(), Some(1.5));
        assert!(Value::List(Vec::new()).is_compound());
    }

    #[test]
    fn display() {
        assert_eq!(Value::Bytes(vec![0xde, 0xad]).to_string(), "hex(de ad)");
        assert_eq!(Value::Text("ab".to_string()).to_string(), "\"ab\"");
        assert_eq!(Value::Signed(-3).to_string(), "-3");
    }
}
