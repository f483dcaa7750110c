//! Rule model: the per-member overrides a YAML `Structs` block can declare.
//!
//! Rule bodies are read from raw [`serde_yaml::Mapping`]s because bitstring keys are
//! data (`0`, `"1-3"`), not field names.

use crate::error::ConfigError;
use crate::field::{BitSpan, Field, WireType};
use crate::platform::Platform;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;

/// What a keyed rule applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleKey {
    Member(String),
    Type(String),
}

impl RuleKey {
    /// Exactly one of `member:` / `type:` must be present.
    pub fn from_yaml(struct_name: &str, map: &Mapping) -> Result<Self, ConfigError> {
        let member = get(map, "member").map(scalar_text);
        let ctype = get(map, "type").map(scalar_text);
        match (member, ctype) {
            (Some(_), Some(_)) => Err(ConfigError::AmbiguousKey {
                struct_name: struct_name.to_string(),
            }),
            (Some(m), None) => Ok(RuleKey::Member(m)),
            (None, Some(t)) => Ok(RuleKey::Type(t)),
            (None, None) => Err(ConfigError::MissingKey {
                struct_name: struct_name.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeRule {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl RangeRule {
    pub fn from_yaml(struct_name: &str, map: &Mapping) -> Result<Self, ConfigError> {
        let min = number(struct_name, map, "min")?;
        let max = number(struct_name, map, "max")?;
        if min.is_none() && max.is_none() {
            return Err(ConfigError::EmptyRange {
                struct_name: struct_name.to_string(),
            });
        }
        Ok(RangeRule { min, max })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumRule {
    pub values: BTreeMap<i64, String>,
    pub strict: bool,
}

impl EnumRule {
    pub fn from_yaml(struct_name: &str, map: &Mapping) -> Result<Self, ConfigError> {
        let values = match get(map, "values") {
            Some(v) => value_map(struct_name, "values", v)?,
            None => BTreeMap::new(),
        };
        if values.is_empty() {
            return Err(ConfigError::EmptyEnum {
                struct_name: struct_name.to_string(),
            });
        }
        let strict = match get(map, "strict") {
            None => true,
            Some(Value::Bool(b)) => *b,
            Some(other) => {
                return Err(invalid(struct_name, "strict", &format!("expected a boolean, got {}", scalar_text(other))))
            }
        };
        Ok(EnumRule { values, strict })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BitstringRule {
    pub bits: Vec<BitSpan>,
}

impl BitstringRule {
    /// Every key other than `member`/`type` names a bit or bit range.
    pub fn from_yaml(struct_name: &str, map: &Mapping) -> Result<Self, ConfigError> {
        let mut bits = Vec::new();
        for (key, value) in map {
            if matches!(key.as_str(), Some("member") | Some("type")) {
                continue;
            }
            let (start, width) = parse_bit_key(key).ok_or_else(|| ConfigError::InvalidBitstringKey {
                struct_name: struct_name.to_string(),
                key: scalar_text(key),
            })?;
            let (name, values) = match value {
                Value::Sequence(items) if !items.is_empty() => {
                    let name = scalar_text(&items[0]);
                    let labels: BTreeMap<i64, String> = items[1..]
                        .iter()
                        .enumerate()
                        .map(|(i, v)| (i as i64, scalar_text(v)))
                        .collect();
                    (name, labels)
                }
                Value::Sequence(_) => {
                    return Err(invalid(struct_name, &scalar_text(key), "empty bit definition"))
                }
                other => (scalar_text(other), BTreeMap::new()),
            };
            let values = if values.is_empty() && width == 1 {
                yes_no()
            } else {
                values
            };
            bits.push(BitSpan {
                start,
                width,
                name,
                values,
            });
        }
        if bits.is_empty() {
            return Err(ConfigError::EmptyBitstring {
                struct_name: struct_name.to_string(),
            });
        }
        bits.sort_by_key(|b| b.start);
        Ok(BitstringRule { bits })
    }
}

fn yes_no() -> BTreeMap<i64, String> {
    let mut values = BTreeMap::new();
    values.insert(0, "No".to_string());
    values.insert(1, "Yes".to_string());
    values
}

/// `N` is bit N alone; `A-B` covers bits A through B inclusive.
pub fn parse_bit_key(key: &Value) -> Option<(u32, u32)> {
    match key {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()).map(|n| (n, 1)),
        Value::String(s) => parse_bit_range(s),
        _ => None,
    }
}

pub fn parse_bit_range(s: &str) -> Option<(u32, u32)> {
    let s = s.trim();
    match s.split_once('-') {
        Some((a, b)) => {
            let start: u32 = a.trim().parse().ok()?;
            let end: u32 = b.trim().parse().ok()?;
            if end < start {
                return None;
            }
            Some((start, end - start + 1))
        }
        None => s.parse().ok().map(|n| (n, 1)),
    }
}

/// How many times a trailer repeats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrailerCount {
    Fixed(usize),
    /// Read at run time from the named member.
    Member(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrailerRule {
    /// Registered dissector name of the trailing protocol.
    pub name: String,
    pub count: TrailerCount,
    pub size: Option<usize>,
}

impl TrailerRule {
    pub fn from_yaml(struct_name: &str, map: &Mapping) -> Result<Self, ConfigError> {
        let bad = |reason: &str| ConfigError::InvalidTrailer {
            struct_name: struct_name.to_string(),
            reason: reason.to_string(),
        };
        let name = get(map, "name")
            .map(scalar_text)
            .ok_or_else(|| bad("missing `name`"))?;
        let count = match (get(map, "count"), get(map, "member")) {
            (Some(_), Some(_)) => return Err(bad("both `count` and `member` given")),
            (None, None) => return Err(bad("needs either `count` or `member`")),
            (Some(c), None) => TrailerCount::Fixed(
                c.as_u64()
                    .map(|c| c as usize)
                    .ok_or_else(|| bad("`count` must be a non-negative integer"))?,
            ),
            (None, Some(m)) => TrailerCount::Member(scalar_text(m)),
        };
        let size = match get(map, "size") {
            Some(s) => Some(
                s.as_u64()
                    .map(|s| s as usize)
                    .ok_or_else(|| bad("`size` must be a non-negative integer"))?,
            ),
            None => None,
        };
        Ok(TrailerRule { name, count, size })
    }
}

/// Replaces field construction entirely.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomRule {
    pub kind: WireType,
    pub size: Option<usize>,
    pub alignment: Option<usize>,
    pub abbr: Option<String>,
    pub display_name: Option<String>,
    pub base: Option<String>,
    pub values: Option<BTreeMap<i64, String>>,
    pub mask: Option<u64>,
    pub description: Option<String>,
}

impl CustomRule {
    pub fn from_yaml(struct_name: &str, map: &Mapping) -> Result<Self, ConfigError> {
        let kind = get(map, "field")
            .map(scalar_text)
            .ok_or_else(|| ConfigError::MissingCustomField {
                struct_name: struct_name.to_string(),
            })?
            .parse::<WireType>()?;
        let values = match get(map, "values") {
            Some(v) => Some(value_map(struct_name, "values", v)?),
            None => None,
        };
        Ok(CustomRule {
            kind,
            size: unsigned(struct_name, map, "size")?.map(|v| v as usize),
            alignment: unsigned(struct_name, map, "alignment_size")?.map(|v| v as usize),
            abbr: get(map, "abbr").map(scalar_text),
            display_name: get(map, "name").map(scalar_text),
            base: get(map, "base")
                .map(scalar_text)
                .map(|b| b.trim_start_matches("base.").to_string()),
            values,
            mask: unsigned(struct_name, map, "mask")?,
            description: get(map, "desc").map(scalar_text),
        })
    }

    /// Build the field this rule describes for `member` of C type `ctype`.
    pub fn create(
        &self,
        platform: &Platform,
        member: &str,
        ctype: &str,
        size: Option<usize>,
        alignment: Option<usize>,
    ) -> Result<Field, ConfigError> {
        let size = self
            .size
            .or(size)
            .or_else(|| platform.size_of(ctype))
            .ok_or_else(|| ConfigError::UnknownSize {
                member: member.to_string(),
                ctype: ctype.to_string(),
            })?;
        let alignment = self
            .alignment
            .or(alignment)
            .or_else(|| platform.alignment_of(ctype))
            .unwrap_or(size);
        let mut field = Field::new(member, self.kind, size, alignment, platform.endian);
        field.label = self.display_name.clone();
        field.abbr = self.abbr.clone();
        field.base = self.base.clone();
        field.mask = self.mask;
        field.desc = self.description.clone();
        if let Some(values) = &self.values {
            field.set_list_validation(values.clone(), false);
        }
        Ok(field)
    }
}

/// Any keyed rule.
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    Range(RangeRule),
    Enum(EnumRule),
    Bitstring(BitstringRule),
    Custom(CustomRule),
}

pub(crate) fn get<'a>(map: &'a Mapping, key: &str) -> Option<&'a Value> {
    map.get(key).filter(|v| !v.is_null())
}

/// Render a YAML scalar the way a user wrote it.
pub(crate) fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

fn invalid(struct_name: &str, key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        struct_name: struct_name.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn number(struct_name: &str, map: &Mapping, key: &str) -> Result<Option<f64>, ConfigError> {
    match get(map, key) {
        None => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| invalid(struct_name, key, "expected a number")),
    }
}

fn unsigned(struct_name: &str, map: &Mapping, key: &str) -> Result<Option<u64>, ConfigError> {
    match get(map, key) {
        None => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| invalid(struct_name, key, "expected a non-negative integer")),
    }
}

/// A `{value: label}` mapping, or a list whose index is the value.
fn value_map(struct_name: &str, key: &str, value: &Value) -> Result<BTreeMap<i64, String>, ConfigError> {
    match value {
        Value::Mapping(m) => m
            .iter()
            .map(|(k, v)| {
                let n = match k {
                    Value::Number(n) => n.as_i64(),
                    Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                };
                n.map(|n| (n, scalar_text(v)))
                    .ok_or_else(|| invalid(struct_name, key, &format!("`{}` is not an integer", scalar_text(k))))
            })
            .collect(),
        Value::Sequence(items) => Ok(items
            .iter()
            .enumerate()
            .map(|(i, v)| (i as i64, scalar_text(v)))
            .collect()),
        other => Err(invalid(
            struct_name,
            key,
            &format!("expected a mapping or a list, got {}", scalar_text(other)),
        )),
    }
}
