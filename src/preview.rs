//! Layout preview: decode a byte buffer through a built [`Dissector`] model,
//! walking the same offsets and readers as the generated Lua.

use crate::dissector::{Dissector, ProtocolRegistry};
use crate::field::{ArrayField, BitField, Field, FieldNode, WireType};
use crate::platform::Endian;
use crate::value::Value;
use byteorder::{BigEndian, ByteOrder, LittleEndian};

#[derive(Debug, thiserror::Error)]
pub enum PreviewError {
    #[error("{field}: {size} bytes at offset {offset} exceed the {len}-byte buffer")]
    Truncated {
        field: String,
        offset: usize,
        size: usize,
        len: usize,
    },
    #[error("no dissector for {name} on {platform}")]
    UnknownProtocol { name: String, platform: String },
    #[error("{field}: cannot read a {size}-byte {kind}")]
    Unsupported {
        field: String,
        kind: &'static str,
        size: usize,
    },
}

/// One node of the decoded tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub name: String,
    pub offset: usize,
    pub size: usize,
    pub value: Value,
    /// Enumerator or bit label of the value.
    pub label: Option<String>,
    /// Problems the Lua code would report as expert info.
    pub expert: Vec<String>,
}

impl Decoded {
    fn new(name: &str, offset: usize, size: usize, value: Value) -> Self {
        Decoded {
            name: name.to_string(),
            offset,
            size,
            value,
            label: None,
            expert: Vec::new(),
        }
    }

    pub fn children(&self) -> &[Decoded] {
        match &self.value {
            Value::Struct(m) | Value::List(m) => m,
            _ => &[],
        }
    }

    pub fn get(&self, name: &str) -> Option<&Decoded> {
        self.children().iter().find(|c| c.name == name)
    }

    /// Dotted path lookup, e.g. `from.port` or `m.m[1]`.
    pub fn find(&self, path: &str) -> Option<&Decoded> {
        path.split('.').try_fold(self, |node, part| node.get(part))
    }

    /// Indented text dump, one node per line.
    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        self.render_into(0, &mut lines);
        lines.join("\n")
    }

    fn render_into(&self, depth: usize, lines: &mut Vec<String>) {
        let mut line = format!(
            "{}{} @{} ({} bytes): {}",
            "  ".repeat(depth),
            self.name,
            self.offset,
            self.size,
            self.value
        );
        if let Some(label) = &self.label {
            line.push_str(&format!(" ({})", label));
        }
        for problem in &self.expert {
            line.push_str(&format!(" [{}]", problem));
        }
        lines.push(line);
        for child in self.children() {
            child.render_into(depth + 1, lines);
        }
    }
}

/// Decode `bytes` as `dissector`, resolving nested structs through `registry`.
pub fn preview(dissector: &Dissector, registry: &ProtocolRegistry, bytes: &[u8]) -> Result<Decoded, PreviewError> {
    let walker = Walker {
        registry,
        platform: &dissector.platform.name,
        bytes,
    };
    walker.dissector(dissector, 0)
}

struct Walker<'a> {
    registry: &'a ProtocolRegistry,
    platform: &'a str,
    bytes: &'a [u8],
}

impl<'a> Walker<'a> {
    fn slice(&self, field: &str, offset: usize, size: usize) -> Result<&'a [u8], PreviewError> {
        self.bytes
            .get(offset..offset + size)
            .ok_or_else(|| PreviewError::Truncated {
                field: field.to_string(),
                offset,
                size,
                len: self.bytes.len(),
            })
    }

    fn dissector(&self, d: &Dissector, start: usize) -> Result<Decoded, PreviewError> {
        let size = d.size();
        self.slice(&d.name, start, size)?;
        let children = d
            .children
            .iter()
            .zip(d.layout(start))
            .map(|(child, at)| self.node(child, at))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Decoded::new(&d.name, start, size, Value::Struct(children)))
    }

    fn node(&self, node: &FieldNode, at: usize) -> Result<Decoded, PreviewError> {
        match node {
            FieldNode::Field(f) => self.field(f, at),
            FieldNode::Bits(b) => self.bits(b, at),
            FieldNode::Array(a) => self.array(a, at),
            FieldNode::Protocol(p) => {
                let sub = self
                    .registry
                    .get(&p.proto_name)
                    .and_then(|proto| proto.dissector(self.platform))
                    .ok_or_else(|| PreviewError::UnknownProtocol {
                        name: p.proto_name.clone(),
                        platform: self.platform.to_string(),
                    })?;
                let mut decoded = self.dissector(sub, at)?;
                decoded.name = p.name.clone();
                Ok(decoded)
            }
            FieldNode::Group(d) => self.dissector(d, at),
        }
    }

    fn field(&self, f: &Field, at: usize) -> Result<Decoded, PreviewError> {
        let raw = self.slice(&f.name, at, f.size)?;
        let unsupported = || PreviewError::Unsupported {
            field: f.name.clone(),
            kind: f.wire_type.as_str(),
            size: f.size,
        };
        let value = match f.wire_type {
            WireType::Bool => Value::Bool(read_uint(raw, f.endian).ok_or_else(unsupported)? != 0),
            WireType::Int8 | WireType::Int16 | WireType::Int24 | WireType::Int32 | WireType::Int64 => {
                Value::Signed(read_int(raw, f.endian).ok_or_else(unsupported)?)
            }
            WireType::Uint8
            | WireType::Uint16
            | WireType::Uint24
            | WireType::Uint32
            | WireType::Uint64
            | WireType::Framenum => {
                let v = read_uint(raw, f.endian).ok_or_else(unsupported)?;
                Value::Unsigned(match f.mask {
                    Some(mask) if mask != 0 => (v & mask) >> mask.trailing_zeros(),
                    _ => v,
                })
            }
            WireType::Float | WireType::Double => match (raw.len(), f.endian) {
                (4, Endian::Big) => Value::Float(BigEndian::read_f32(raw)),
                (4, Endian::Little) => Value::Float(LittleEndian::read_f32(raw)),
                (8, Endian::Big) => Value::Double(BigEndian::read_f64(raw)),
                (8, Endian::Little) => Value::Double(LittleEndian::read_f64(raw)),
                _ => return Err(unsupported()),
            },
            WireType::String | WireType::Stringz => {
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                Value::Text(String::from_utf8_lossy(&raw[..end]).into_owned())
            }
            _ => Value::Bytes(raw.to_vec()),
        };
        let mut decoded = Decoded::new(&f.name, at, f.size, value);
        check(f, &mut decoded);
        Ok(decoded)
    }

    fn bits(&self, b: &BitField, at: usize) -> Result<Decoded, PreviewError> {
        let mut decoded = self.field(&b.field, at)?;
        let raw = decoded.value.as_u64().or_else(|| decoded.value.as_i64().map(|v| v as u64));
        let spans = b
            .bits
            .iter()
            .map(|span| {
                let v = raw.and_then(|r| (r & span.mask()).checked_shr(span.start)).unwrap_or(0);
                let mut d = Decoded::new(&span.name, at, b.field.size, Value::Unsigned(v));
                d.label = i64::try_from(v).ok().and_then(|v| span.values.get(&v)).cloned();
                d
            })
            .collect();
        decoded.value = Value::Struct(spans);
        Ok(decoded)
    }

    fn array(&self, a: &ArrayField, at: usize) -> Result<Decoded, PreviewError> {
        let items = if a.depth.is_empty() || a.count() == 0 {
            Vec::new()
        } else {
            self.dimension(a, 0, at, &a.name)?
        };
        Ok(Decoded::new(&a.name, at, a.size(), Value::List(items)))
    }

    fn dimension(&self, a: &ArrayField, level: usize, offset: usize, label: &str) -> Result<Vec<Decoded>, PreviewError> {
        let stride = a.element.size() * a.depth[level + 1..].iter().product::<usize>();
        (0..a.depth[level])
            .map(|i| {
                let at = offset + i * stride;
                let name = format!("{}[{}]", label, i);
                if level + 1 == a.depth.len() {
                    let mut element = self.node(&a.element, at)?;
                    element.name = name;
                    Ok(element)
                } else {
                    let inner = self.dimension(a, level + 1, at, &name)?;
                    Ok(Decoded::new(&name, at, stride, Value::List(inner)))
                }
            })
            .collect()
    }
}

/// Label and validate a scalar like the generated decode statement does.
fn check(f: &Field, decoded: &mut Decoded) {
    let Some(value) = decoded.value.as_i64() else {
        return;
    };
    if let Some(values) = &f.values {
        decoded.label = values.get(&value).cloned();
        if decoded.label.is_none() && f.strict && f.wire_type.is_integer() {
            decoded.expert.push("Unknown value".to_string());
        }
    }
    for range in &f.ranges {
        let v = value as f64;
        let low = range.min.is_some_and(|min| v < min);
        let high = range.max.is_some_and(|max| v > max);
        if low || high {
            let mut text = Vec::new();
            if let Some(min) = range.min {
                text.push(format!(">= {}", min));
            }
            if let Some(max) = range.max {
                text.push(format!("<= {}", max));
            }
            decoded.expert.push(format!("Should be {}", text.join(" and ")));
        }
    }
}

fn read_uint(raw: &[u8], endian: Endian) -> Option<u64> {
    if raw.is_empty() || raw.len() > 8 {
        return None;
    }
    Some(match endian {
        Endian::Big => BigEndian::read_uint(raw, raw.len()),
        Endian::Little => LittleEndian::read_uint(raw, raw.len()),
    })
}

fn read_int(raw: &[u8], endian: Endian) -> Option<i64> {
    if raw.is_empty() || raw.len() > 8 {
        return None;
    }
    Some(match endian {
        Endian::Big => BigEndian::read_int(raw, raw.len()),
        Endian::Little => LittleEndian::read_int(raw, raw.len()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Coord;
    use crate::dissector::{dissector_name, Layout, Protocol};
    use crate::field::{BitSpan, ProtocolField};
    use crate::platform::Platform;
    use std::collections::BTreeMap;
    use std::rc::Rc;

    fn platform(name: &str) -> Rc<Platform> {
        Rc::new(Platform::by_name(name).unwrap())
    }

    fn field(name: &str, wire: WireType, size: usize, p: &Platform) -> Field {
        Field::new(name, wire, size, size, p.endian)
    }

    #[test]
    fn offsets_follow_layout() {
        let p = platform("Linux-x86-64");
        let mut d = Dissector::new("rec", p.clone(), Layout::Sequential);
        d.add_field(FieldNode::Field(field("a", WireType::Uint8, 1, &p)));
        d.add_field(FieldNode::Field(field("b", WireType::Int32, 4, &p)));
        d.add_field(FieldNode::Field(field("c", WireType::Uint16, 2, &p)));
        let bytes = [7, 0, 0, 0, 0xfe, 0xff, 0xff, 0xff, 0x34, 0x12, 0, 0];
        let tree = preview(&d, &ProtocolRegistry::new(), &bytes).unwrap();
        let offsets: Vec<usize> = tree.children().iter().map(|c| c.offset).collect();
        assert_eq!(offsets, d.layout(0));
        assert_eq!(tree.get("a").unwrap().value, Value::Unsigned(7));
        assert_eq!(tree.get("b").unwrap().value, Value::Signed(-2));
        assert_eq!(tree.get("c").unwrap().value, Value::Unsigned(0x1234));
        assert_eq!(tree.size, 12);
    }

    #[test]
    fn big_endian_and_strings() {
        let p = platform("Solaris-SPARC");
        let mut d = Dissector::new("msg", p.clone(), Layout::Sequential);
        d.add_field(FieldNode::Field(field("len", WireType::Uint16, 2, &p)));
        d.add_field(FieldNode::Field(Field::new("name", WireType::String, 4, 1, p.endian)));
        let tree = preview(&d, &ProtocolRegistry::new(), &[0x01, 0x02, b'a', b'b', 0, b'z']).unwrap();
        assert_eq!(tree.find("len").unwrap().value, Value::Unsigned(0x0102));
        assert_eq!(tree.find("name").unwrap().value.as_str(), Some("ab"));
    }

    #[test]
    fn enums_and_ranges_are_checked() {
        let p = platform("Linux-x86-64");
        let mut color = field("color", WireType::Uint8, 1, &p);
        color.set_list_validation(BTreeMap::from([(1, "RED".to_string())]), true);
        let mut level = field("level", WireType::Int8, 1, &p);
        level.set_range_validation(Some(0.0), Some(10.0));
        let mut d = Dissector::new("s", p.clone(), Layout::Sequential);
        d.add_field(FieldNode::Field(color));
        d.add_field(FieldNode::Field(level));

        let ok = preview(&d, &ProtocolRegistry::new(), &[1, 5]).unwrap();
        assert_eq!(ok.get("color").unwrap().label.as_deref(), Some("RED"));
        assert!(ok.get("level").unwrap().expert.is_empty());

        let bad = preview(&d, &ProtocolRegistry::new(), &[2, 11]).unwrap();
        assert_eq!(bad.get("color").unwrap().expert, vec!["Unknown value"]);
        assert_eq!(bad.get("level").unwrap().expert, vec!["Should be >= 0 and <= 10"]);
    }

    #[test]
    fn bit_spans() {
        let p = platform("Linux-x86-64");
        let spans = vec![
            BitSpan {
                start: 0,
                width: 1,
                name: "ack".to_string(),
                values: BTreeMap::from([(0, "No".to_string()), (1, "Yes".to_string())]),
            },
            BitSpan {
                start: 4,
                width: 4,
                name: "kind".to_string(),
                values: BTreeMap::new(),
            },
        ];
        let mut d = Dissector::new("s", p.clone(), Layout::Sequential);
        d.add_field(FieldNode::Bits(BitField::new(field("flags", WireType::Uint8, 1, &p), spans)));
        let tree = preview(&d, &ProtocolRegistry::new(), &[0xa1]).unwrap();
        let ack = tree.find("flags.ack").unwrap();
        assert_eq!(ack.value, Value::Unsigned(1));
        assert_eq!(ack.label.as_deref(), Some("Yes"));
        assert_eq!(tree.find("flags.kind").unwrap().value, Value::Unsigned(0xa));
    }

    #[test]
    fn arrays_and_nested_protocols() {
        let p = platform("Linux-x86-64");
        let mut inner = Dissector::new("pair", p.clone(), Layout::Sequential);
        inner.add_field(FieldNode::Field(field("lo", WireType::Uint8, 1, &p)));
        inner.add_field(FieldNode::Field(field("hi", WireType::Uint8, 1, &p)));
        let mut proto = Protocol::new("pair", None, Coord::new("p.h", 1));
        proto.add_dissector(inner);
        let mut registry = ProtocolRegistry::new();
        registry.insert(proto);

        let mut outer = Dissector::new("outer", p.clone(), Layout::Sequential);
        let element = FieldNode::Field(field("m", WireType::Uint16, 2, &p));
        outer.add_field(FieldNode::Array(ArrayField::new("m", element, vec![2, 2])));
        outer.add_field(FieldNode::Protocol(ProtocolField {
            name: "p".to_string(),
            proto_name: "pair".to_string(),
            dissector: dissector_name("pair", &p.name),
            size: 2,
            alignment: 1,
            offset: None,
        }));
        let bytes = [1, 0, 2, 0, 3, 0, 4, 0, 9, 8];
        let tree = preview(&outer, &registry, &bytes).unwrap();
        assert_eq!(tree.find("m.m[1].m[1][0]").unwrap().value, Value::Unsigned(3));
        assert_eq!(tree.find("m.m[1].m[1][0]").unwrap().offset, 4);
        assert_eq!(tree.find("p.hi").unwrap().value, Value::Unsigned(8));
        assert_eq!(tree.find("p").unwrap().offset, 8);
        assert!(tree.render().contains("  p @8 (2 bytes): struct (2 members)"));
    }

    #[test]
    fn short_buffers_fail() {
        let p = platform("Linux-x86-64");
        let mut d = Dissector::new("s", p.clone(), Layout::Sequential);
        d.add_field(FieldNode::Field(field("x", WireType::Uint32, 4, &p)));
        assert!(matches!(
            preview(&d, &ProtocolRegistry::new(), &[0, 0]),
            Err(PreviewError::Truncated { size: 4, len: 2, .. })
        ));
    }
}
