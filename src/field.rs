//! Field model: the nodes a dissector is made of, and the Lua they render to.
//!
//! Every node reports its `size` and `alignment`, learns its `offset` while code is
//! generated, and renders two snippets:
//!
//! - a **definition** (`ProtoField` declarations, value tables),
//! - a **decode** statement adding the field to a tree at a byte offset.
//!
//! Naming prefixes (fields table, enclosing groups, protocol abbreviation) are pushed
//! down once by [`Dissector::push_modifiers`](crate::dissector::Dissector::push_modifiers).

use crate::conformance::ConformanceFile;
use crate::dissector::Dissector;
use crate::error::ConfigError;
use crate::platform::Endian;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::str::FromStr;

/// Wireshark `ProtoField` kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Bool,
    Uint8,
    Uint16,
    Uint24,
    Uint32,
    Uint64,
    Int8,
    Int16,
    Int24,
    Int32,
    Int64,
    Float,
    Double,
    String,
    Stringz,
    Bytes,
    Ipv4,
    Ipv6,
    Ether,
    AbsoluteTime,
    RelativeTime,
    Framenum,
    Guid,
}

impl WireType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WireType::Bool => "bool",
            WireType::Uint8 => "uint8",
            WireType::Uint16 => "uint16",
            WireType::Uint24 => "uint24",
            WireType::Uint32 => "uint32",
            WireType::Uint64 => "uint64",
            WireType::Int8 => "int8",
            WireType::Int16 => "int16",
            WireType::Int24 => "int24",
            WireType::Int32 => "int32",
            WireType::Int64 => "int64",
            WireType::Float => "float",
            WireType::Double => "double",
            WireType::String => "string",
            WireType::Stringz => "stringz",
            WireType::Bytes => "bytes",
            WireType::Ipv4 => "ipv4",
            WireType::Ipv6 => "ipv6",
            WireType::Ether => "ether",
            WireType::AbsoluteTime => "absolute_time",
            WireType::RelativeTime => "relative_time",
            WireType::Framenum => "framenum",
            WireType::Guid => "guid",
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            WireType::Bool
                | WireType::Uint8
                | WireType::Uint16
                | WireType::Uint24
                | WireType::Uint32
                | WireType::Uint64
                | WireType::Int8
                | WireType::Int16
                | WireType::Int24
                | WireType::Int32
                | WireType::Int64
                | WireType::Framenum
        )
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || matches!(self, WireType::Float | WireType::Double)
    }

    fn is_64bit(&self) -> bool {
        matches!(self, WireType::Uint64 | WireType::Int64)
    }

    /// Name of the `TvbRange` method reading this kind as a Lua value.
    pub fn reader(&self, endian: Endian) -> &'static str {
        let le = endian == Endian::Little;
        match self {
            WireType::Bool
            | WireType::Uint8
            | WireType::Uint16
            | WireType::Uint24
            | WireType::Uint32
            | WireType::Framenum => {
                if le {
                    "le_uint"
                } else {
                    "uint"
                }
            }
            WireType::Uint64 => {
                if le {
                    "le_uint64"
                } else {
                    "uint64"
                }
            }
            WireType::Int8 | WireType::Int16 | WireType::Int24 | WireType::Int32 => {
                if le {
                    "le_int"
                } else {
                    "int"
                }
            }
            WireType::Int64 => {
                if le {
                    "le_int64"
                } else {
                    "int64"
                }
            }
            WireType::Float | WireType::Double => {
                if le {
                    "le_float"
                } else {
                    "float"
                }
            }
            WireType::String => "string",
            WireType::Stringz => "stringz",
            WireType::Ipv4 => {
                if le {
                    "le_ipv4"
                } else {
                    "ipv4"
                }
            }
            WireType::Ipv6 => "ipv6",
            WireType::Ether => "ether",
            WireType::AbsoluteTime | WireType::RelativeTime => {
                if le {
                    "le_nstime"
                } else {
                    "nstime"
                }
            }
            WireType::Bytes | WireType::Guid => "bytes",
        }
    }

    fn add_method(&self, endian: Endian) -> &'static str {
        match self {
            WireType::String | WireType::Stringz | WireType::Bytes | WireType::Guid => "add",
            _ if endian == Endian::Little => "add_le",
            _ => "add",
        }
    }
}

impl FromStr for WireType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "bool" => WireType::Bool,
            "uint8" => WireType::Uint8,
            "uint16" => WireType::Uint16,
            "uint24" => WireType::Uint24,
            "uint32" => WireType::Uint32,
            "uint64" => WireType::Uint64,
            "int8" => WireType::Int8,
            "int16" => WireType::Int16,
            "int24" => WireType::Int24,
            "int32" => WireType::Int32,
            "int64" => WireType::Int64,
            "float" => WireType::Float,
            "double" => WireType::Double,
            "string" => WireType::String,
            "stringz" => WireType::Stringz,
            "bytes" => WireType::Bytes,
            "ipv4" => WireType::Ipv4,
            "ipv6" => WireType::Ipv6,
            "ether" => WireType::Ether,
            "absolute_time" => WireType::AbsoluteTime,
            "relative_time" => WireType::RelativeTime,
            "framenum" => WireType::Framenum,
            "guid" => WireType::Guid,
            other => return Err(ConfigError::UnknownFieldKind(other.to_string())),
        })
    }
}

const LUA_KEYWORDS: &[&str] = &[
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if",
    "in", "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

/// Turn any name into a valid, lower-case Lua identifier.
pub fn lua_var(name: &str) -> String {
    let mut var: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if var.is_empty() || var.starts_with(|c: char| c.is_ascii_digit()) {
        var.insert(0, '_');
    }
    if LUA_KEYWORDS.contains(&var.as_str()) {
        var.push('_');
    }
    var
}

/// Quote a string as a Lua literal.
pub fn lua_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Print integral floats without a fraction (`10` rather than `10.0`).
pub fn lua_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Lua table literal `{[0]="a", [1]="b"}`.
pub fn lua_table(values: &BTreeMap<i64, String>) -> String {
    let items: Vec<String> = values
        .iter()
        .map(|(k, v)| format!("[{}]={}", k, lua_string(v)))
        .collect();
    format!("{{{}}}", items.join(", "))
}

/// Prefix every non-empty line with `levels` tabs.
pub fn indent(code: &str, levels: usize) -> String {
    let tabs = "\t".repeat(levels);
    code.lines()
        .map(|l| {
            if l.is_empty() {
                String::new()
            } else {
                format!("{}{}", tabs, l)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Naming context pushed down from the enclosing dissector(s).
#[derive(Debug, Clone, Default)]
pub struct Prefix {
    /// Fields table first (`f_linux_x86`), then enclosing group names.
    var: Vec<String>,
    /// Protocol abbreviation first, then enclosing group names.
    abbr: Vec<String>,
    pushed: bool,
}

impl Prefix {
    /// Returns false when prefixes were already set.
    pub fn push(&mut self, var: &[String], abbr: &[String]) -> bool {
        if self.pushed {
            return false;
        }
        self.pushed = true;
        self.var = var.to_vec();
        self.abbr = abbr.to_vec();
        true
    }

    pub fn var(&self, name: &str) -> String {
        match self.var.split_first() {
            Some((table, groups)) => {
                let mut path: Vec<String> = groups.to_vec();
                path.push(lua_var(name));
                format!("{}.{}", table, path.join("_"))
            }
            None => lua_var(name),
        }
    }

    pub fn abbr(&self, last: &str) -> String {
        let mut parts = self.abbr.clone();
        parts.push(last.to_string());
        parts.join(".")
    }

    pub fn var_parts(&self) -> &[String] {
        &self.var
    }

    pub fn abbr_parts(&self) -> &[String] {
        &self.abbr
    }
}

/// A bound check attached to a numeric field.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeCheck {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// One named span of bits inside an integer member.
#[derive(Debug, Clone, PartialEq)]
pub struct BitSpan {
    pub start: u32,
    pub width: u32,
    pub name: String,
    pub values: BTreeMap<i64, String>,
}

impl BitSpan {
    pub fn mask(&self) -> u64 {
        let bits = if self.width >= 64 {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        };
        bits.checked_shl(self.start).unwrap_or(0)
    }
}

/// A scalar, string or opaque leaf field.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub wire_type: WireType,
    pub size: usize,
    pub alignment: usize,
    pub endian: Endian,
    pub offset: Option<usize>,
    /// Display name, defaults to `name`.
    pub label: Option<String>,
    /// Replaces the last component of the abbreviation.
    pub abbr: Option<String>,
    /// `base.<X>` display, e.g. `HEX`.
    pub base: Option<String>,
    pub mask: Option<u64>,
    pub desc: Option<String>,
    pub values: Option<BTreeMap<i64, String>>,
    pub strict: bool,
    pub ranges: Vec<RangeCheck>,
    prefix: Prefix,
}

impl Field {
    pub fn new(name: &str, wire_type: WireType, size: usize, alignment: usize, endian: Endian) -> Self {
        Field {
            name: name.to_string(),
            wire_type,
            size,
            alignment,
            endian,
            offset: None,
            label: None,
            abbr: None,
            base: None,
            mask: None,
            desc: None,
            values: None,
            strict: false,
            ranges: Vec::new(),
            prefix: Prefix::default(),
        }
    }

    /// Map values to labels; when `strict`, unmapped values are flagged.
    pub fn set_list_validation(&mut self, values: BTreeMap<i64, String>, strict: bool) {
        self.values = Some(values);
        self.strict = strict;
    }

    /// Add a bound check; several checks stack.
    pub fn set_range_validation(&mut self, min: Option<f64>, max: Option<f64>) {
        self.ranges.push(RangeCheck { min, max });
    }

    pub fn push_modifiers(&mut self, var: &[String], abbr: &[String]) {
        self.prefix.push(var, abbr);
    }

    pub fn var(&self) -> String {
        self.prefix.var(&self.name)
    }

    pub fn abbr_path(&self) -> String {
        let last = self.abbr.clone().unwrap_or_else(|| lua_var(&self.name));
        self.prefix.abbr(&last)
    }

    pub fn values_var(&self) -> String {
        format!("{}_values", self.var().replace('.', "_"))
    }

    pub fn reader(&self) -> &'static str {
        self.wire_type.reader(self.endian)
    }

    fn read_expr(&self, offset: usize) -> String {
        let read = format!("buffer({}, {}):{}()", offset, self.size, self.reader());
        if self.wire_type.is_64bit() {
            format!("{}:tonumber()", read)
        } else {
            read
        }
    }

    fn proto_field(&self) -> String {
        let mut args: Vec<Option<String>> = vec![
            Some(lua_string(&self.abbr_path())),
            Some(lua_string(self.label.as_deref().unwrap_or(&self.name))),
        ];
        if self.wire_type.is_integer() {
            args.push(self.base.as_ref().map(|b| format!("base.{}", b)));
            args.push(self.values.as_ref().map(|_| self.values_var()));
            args.push(self.mask.map(|m| format!("0x{:x}", m)));
        } else {
            args.push(None);
        }
        args.push(self.desc.as_deref().map(lua_string));
        while matches!(args.last(), Some(None)) {
            args.pop();
        }
        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.unwrap_or_else(|| "nil".to_string()))
            .collect();
        format!(
            "{} = ProtoField.{}({})",
            self.var(),
            self.wire_type.as_str(),
            args.join(", ")
        )
    }

    pub fn definition(&self) -> String {
        let mut data = Vec::new();
        if let Some(values) = self.values.as_ref().filter(|_| self.wire_type.is_integer()) {
            data.push(format!("local {} = {}", self.values_var(), lua_table(values)));
        }
        data.push(self.proto_field());
        data.join("\n")
    }

    /// Statements flagging invalid values on `node` (empty when unchecked).
    fn validation(&self, node: &str, offset: usize) -> Vec<String> {
        if !self.wire_type.is_numeric() {
            return Vec::new();
        }
        let strict = self.strict && self.values.is_some() && self.wire_type.is_integer();
        if !strict && self.ranges.is_empty() {
            return Vec::new();
        }
        let mut lines = vec![format!("local value = {}", self.read_expr(offset))];
        if strict {
            lines.push(format!(
                "if ({}[value] == nil) then {}:add_expert_info(PI_MALFORMED, PI_WARN, \"Unknown value\") end",
                self.values_var(),
                node
            ));
        }
        for range in &self.ranges {
            let mut cond = Vec::new();
            let mut text = Vec::new();
            if let Some(min) = range.min {
                cond.push(format!("value < {}", lua_number(min)));
                text.push(format!(">= {}", lua_number(min)));
            }
            if let Some(max) = range.max {
                cond.push(format!("value > {}", lua_number(max)));
                text.push(format!("<= {}", lua_number(max)));
            }
            if cond.is_empty() {
                continue;
            }
            lines.push(format!(
                "if ({}) then {}:add_expert_info(PI_MALFORMED, PI_WARN, \"Should be {}\") end",
                cond.join(" or "),
                node,
                text.join(" and ")
            ));
        }
        lines
    }

    fn add_expr(&self, tree: &str, offset: usize) -> String {
        format!(
            "{}:{}({}, buffer({}, {}))",
            tree,
            self.wire_type.add_method(self.endian),
            self.var(),
            offset,
            self.size
        )
    }

    /// Decode statement. With `store`, the tree item is kept in that local.
    pub fn code(&mut self, offset: usize, tree: &str, store: Option<&str>) -> String {
        self.offset = Some(offset);
        let add = self.add_expr(tree, offset);
        if let Some(store) = store {
            let mut lines = vec![format!("\tlocal {} = {}", store, add)];
            lines.extend(self.validation(store, offset).into_iter().map(|l| format!("\t{}", l)));
            return lines.join("\n");
        }
        let checks = self.validation("node", offset);
        if checks.is_empty() {
            return format!("\t{}", add);
        }
        let mut lines = vec!["\tdo".to_string(), format!("\t\tlocal node = {}", add)];
        lines.extend(checks.into_iter().map(|l| format!("\t\t{}", l)));
        lines.push("\tend".to_string());
        lines.join("\n")
    }

    /// `local <var> = buffer(<offset>, <size>):<reader>()` at the generated offset.
    pub fn store_value(&self, var: &str) -> String {
        format!("\tlocal {} = {}", var, self.read_expr(self.offset.unwrap_or(0)))
    }
}

/// An integer member decoded into named bit spans.
#[derive(Debug, Clone)]
pub struct BitField {
    pub field: Field,
    pub bits: Vec<BitSpan>,
}

impl BitField {
    pub fn new(field: Field, bits: Vec<BitSpan>) -> Self {
        BitField { field, bits }
    }

    fn span_var(&self, span: &BitSpan) -> String {
        format!("{}_{}", self.field.var(), lua_var(&span.name))
    }

    fn span_kind(&self) -> WireType {
        if self.field.wire_type.is_integer() && self.field.wire_type != WireType::Bool {
            return self.field.wire_type;
        }
        match self.field.size {
            1 => WireType::Uint8,
            2 => WireType::Uint16,
            3 => WireType::Uint24,
            4 => WireType::Uint32,
            _ => WireType::Uint64,
        }
    }

    pub fn definition(&self) -> String {
        let mut data = vec![self.field.definition()];
        let kind = self.span_kind();
        for span in &self.bits {
            let var = self.span_var(span);
            let abbr = format!("{}.{}", self.field.abbr_path(), lua_var(&span.name));
            let values = if span.values.is_empty() {
                "nil".to_string()
            } else {
                let values_var = format!("{}_values", var.replace('.', "_"));
                data.push(format!("local {} = {}", values_var, lua_table(&span.values)));
                values_var
            };
            data.push(format!(
                "{} = ProtoField.{}({}, {}, base.DEC, {}, 0x{:x})",
                var,
                kind.as_str(),
                lua_string(&abbr),
                lua_string(&span.name),
                values,
                span.mask()
            ));
        }
        data.join("\n")
    }

    pub fn code(&mut self, offset: usize, tree: &str) -> String {
        self.field.offset = Some(offset);
        let add = kind_add(self.field.endian);
        let mut lines = vec![
            "\tdo".to_string(),
            format!(
                "\t\tlocal bits_tree = {}:{}({}, buffer({}, {}))",
                tree,
                add,
                self.field.var(),
                offset,
                self.field.size
            ),
        ];
        for span in &self.bits {
            lines.push(format!(
                "\t\tbits_tree:{}({}, buffer({}, {}))",
                add,
                self.span_var(span),
                offset,
                self.field.size
            ));
        }
        lines.push("\tend".to_string());
        lines.join("\n")
    }
}

fn kind_add(endian: Endian) -> &'static str {
    match endian {
        Endian::Little => "add_le",
        Endian::Big => "add",
    }
}

/// A (possibly multi-dimensional) array of identical elements.
#[derive(Debug, Clone)]
pub struct ArrayField {
    pub name: String,
    pub element: Box<FieldNode>,
    /// Extent of each dimension, outermost first.
    pub depth: Vec<usize>,
    pub offset: Option<usize>,
}

impl ArrayField {
    pub fn new(name: &str, element: FieldNode, depth: Vec<usize>) -> Self {
        ArrayField {
            name: name.to_string(),
            element: Box::new(element),
            depth,
            offset: None,
        }
    }

    pub fn count(&self) -> usize {
        self.depth.iter().product()
    }

    pub fn size(&self) -> usize {
        self.element.size() * self.count()
    }

    fn dimension(
        &mut self,
        level: usize,
        offset: usize,
        tree: &str,
        label: &str,
        cnf: Option<&ConformanceFile>,
    ) -> String {
        let count = self.depth[level];
        let stride = self.element.size() * self.depth[level + 1..].iter().product::<usize>();
        let node = format!("array_tree{}", level);
        let mut lines = vec![
            "\tdo".to_string(),
            format!(
                "\t\tlocal {} = {}:add(buffer({}, {}), {})",
                node,
                tree,
                offset,
                count * stride,
                lua_string(label)
            ),
        ];
        for i in 0..count {
            let off = offset + i * stride;
            let code = if level + 1 == self.depth.len() {
                self.element.code(off, &node, cnf)
            } else {
                let sub_label = format!("{}[{}]", label, i);
                self.dimension(level + 1, off, &node, &sub_label, cnf)
            };
            lines.push(indent(&code, 1));
        }
        lines.push("\tend".to_string());
        lines.join("\n")
    }

    pub fn code(&mut self, offset: usize, tree: &str, cnf: Option<&ConformanceFile>) -> String {
        self.offset = Some(offset);
        if self.count() == 0 || self.depth.is_empty() {
            return String::new();
        }
        let label = self.name.clone();
        self.dimension(0, offset, tree, &label, cnf)
    }
}

/// Reference to another struct's dissector for the same platform.
#[derive(Debug, Clone)]
pub struct ProtocolField {
    pub name: String,
    /// Struct name of the referenced protocol.
    pub proto_name: String,
    /// Registered Lua dissector name (`<struct>.<platform>`).
    pub dissector: String,
    pub size: usize,
    pub alignment: usize,
    pub offset: Option<usize>,
}

impl ProtocolField {
    pub fn code(&mut self, offset: usize, tree: &str) -> String {
        self.offset = Some(offset);
        format!(
            "\tpinfo.private.field_name = {}\n\tDissector.get({}):call(buffer({}, {}):tvb(), pinfo, {})",
            lua_string(&self.name),
            lua_string(&self.dissector),
            offset,
            self.size,
            tree
        )
    }
}

/// Any node a dissector can hold.
#[derive(Debug, Clone)]
pub enum FieldNode {
    Field(Field),
    Bits(BitField),
    Array(ArrayField),
    Protocol(ProtocolField),
    /// Inline anonymous struct or union.
    Group(Dissector),
}

impl FieldNode {
    pub fn name(&self) -> &str {
        match self {
            FieldNode::Field(f) => &f.name,
            FieldNode::Bits(b) => &b.field.name,
            FieldNode::Array(a) => &a.name,
            FieldNode::Protocol(p) => &p.name,
            FieldNode::Group(d) => &d.name,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            FieldNode::Field(f) => f.size,
            FieldNode::Bits(b) => b.field.size,
            FieldNode::Array(a) => a.size(),
            FieldNode::Protocol(p) => p.size,
            FieldNode::Group(d) => d.size(),
        }
    }

    pub fn alignment(&self) -> usize {
        match self {
            FieldNode::Field(f) => f.alignment,
            FieldNode::Bits(b) => b.field.alignment,
            FieldNode::Array(a) => a.element.alignment(),
            FieldNode::Protocol(p) => p.alignment,
            FieldNode::Group(d) => d.alignment(),
        }
    }

    pub fn offset(&self) -> Option<usize> {
        match self {
            FieldNode::Field(f) => f.offset,
            FieldNode::Bits(b) => b.field.offset,
            FieldNode::Array(a) => a.offset,
            FieldNode::Protocol(p) => p.offset,
            FieldNode::Group(d) => d.offset,
        }
    }

    /// The scalar behind this node, if it has one.
    pub fn as_field(&self) -> Option<&Field> {
        match self {
            FieldNode::Field(f) => Some(f),
            FieldNode::Bits(b) => Some(&b.field),
            _ => None,
        }
    }

    pub fn as_field_mut(&mut self) -> Option<&mut Field> {
        match self {
            FieldNode::Field(f) => Some(f),
            FieldNode::Bits(b) => Some(&mut b.field),
            _ => None,
        }
    }

    pub fn push_modifiers(&mut self, var: &[String], abbr: &[String]) {
        match self {
            FieldNode::Field(f) => f.push_modifiers(var, abbr),
            FieldNode::Bits(b) => b.field.push_modifiers(var, abbr),
            FieldNode::Array(a) => a.element.push_modifiers(var, abbr),
            FieldNode::Protocol(_) => {}
            FieldNode::Group(d) => {
                let group = lua_var(&d.name);
                let mut var = var.to_vec();
                var.push(group.clone());
                let mut abbr = abbr.to_vec();
                abbr.push(group);
                d.push_children(&var, &abbr);
            }
        }
    }

    /// `cnf` reaches the members of inline groups.
    pub fn definition(&self, cnf: Option<&ConformanceFile>) -> String {
        match self {
            FieldNode::Field(f) => f.definition(),
            FieldNode::Bits(b) => b.definition(),
            FieldNode::Array(a) => a.element.definition(cnf),
            FieldNode::Protocol(_) => String::new(),
            FieldNode::Group(d) => d.field_definitions(cnf),
        }
    }

    pub fn code(&mut self, offset: usize, tree: &str, cnf: Option<&ConformanceFile>) -> String {
        match self {
            FieldNode::Field(f) => f.code(offset, tree, None),
            FieldNode::Bits(b) => b.code(offset, tree),
            FieldNode::Array(a) => a.code(offset, tree, cnf),
            FieldNode::Protocol(p) => p.code(offset, tree),
            FieldNode::Group(d) => {
                let node = format!("{}_tree", lua_var(&d.name));
                let size = d.size();
                let mut code = String::new();
                let _ = writeln!(code, "\tdo");
                let _ = writeln!(
                    code,
                    "\t\tlocal {} = {}:add(buffer({}, {}), {})",
                    node,
                    tree,
                    offset,
                    size,
                    lua_string(&d.name)
                );
                let body = d.field_code(offset, &node, cnf);
                if !body.is_empty() {
                    let _ = writeln!(code, "{}", indent(&body, 1));
                }
                code.push_str("\tend");
                code
            }
        }
    }

    /// "Read and store value" statement for scalar nodes.
    pub fn store_value(&self, var: &str) -> Option<String> {
        self.as_field().map(|f| f.store_value(var))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pushed(mut field: Field) -> Field {
        field.push_modifiers(&["f_linux_x86".to_string()], &["point".to_string()]);
        field
    }

    #[test]
    fn lua_var_sanitizes() {
        assert_eq!(lua_var("Linux-x86"), "linux_x86");
        assert_eq!(lua_var("end"), "end_");
        assert_eq!(lua_var("1st"), "_1st");
        assert_eq!(lua_var("Message length"), "message_length");
    }

    #[test]
    fn wire_type_from_str() {
        assert_eq!("uint16".parse::<WireType>().unwrap(), WireType::Uint16);
        assert!(matches!(
            "quux".parse::<WireType>(),
            Err(ConfigError::UnknownFieldKind(_))
        ));
    }

    #[test]
    fn definition_and_code() {
        let mut f = pushed(Field::new("x", WireType::Int32, 4, 4, Endian::Little));
        assert_eq!(
            f.definition(),
            "f_linux_x86.x = ProtoField.int32(\"point.x\", \"x\")"
        );
        assert_eq!(
            f.code(4, "subtree", None),
            "\tsubtree:add_le(f_linux_x86.x, buffer(4, 4))"
        );
        assert_eq!(f.offset, Some(4));
    }

    #[test]
    fn definition_trailing_nils_trimmed() {
        let mut f = pushed(Field::new("x", WireType::Uint8, 1, 1, Endian::Big));
        f.desc = Some("the x".to_string());
        assert_eq!(
            f.definition(),
            "f_linux_x86.x = ProtoField.uint8(\"point.x\", \"x\", nil, nil, nil, \"the x\")"
        );
    }

    #[test]
    fn strict_values_are_checked() {
        let mut f = pushed(Field::new("kind", WireType::Uint8, 1, 1, Endian::Big));
        let mut values = BTreeMap::new();
        values.insert(0, "Off".to_string());
        values.insert(1, "On".to_string());
        f.set_list_validation(values, true);
        let def = f.definition();
        assert!(def.starts_with("local f_linux_x86_kind_values = {[0]=\"Off\", [1]=\"On\"}"));
        assert!(!def.contains("base."));
        assert!(def.ends_with("ProtoField.uint8(\"point.kind\", \"kind\", nil, f_linux_x86_kind_values)"));
        let code = f.code(0, "subtree", None);
        assert!(code.contains("local value = buffer(0, 1):uint()"));
        assert!(code.contains("if (f_linux_x86_kind_values[value] == nil)"));
    }

    #[test]
    fn stacked_ranges() {
        let mut f = pushed(Field::new("v", WireType::Int16, 2, 2, Endian::Little));
        f.set_range_validation(Some(0.0), None);
        f.set_range_validation(None, Some(10.5));
        let code = f.code(2, "subtree", None);
        assert!(code.contains("if (value < 0) then"));
        assert!(code.contains("if (value > 10.5) then"));
        assert!(code.contains("buffer(2, 2):le_int()"));
    }

    #[test]
    fn bit_spans() {
        let field = pushed(Field::new("flags", WireType::Uint8, 1, 1, Endian::Big));
        let bits = vec![
            BitSpan {
                start: 0,
                width: 4,
                name: "low".to_string(),
                values: BTreeMap::new(),
            },
            BitSpan {
                start: 4,
                width: 4,
                name: "high".to_string(),
                values: BTreeMap::new(),
            },
        ];
        assert_eq!(bits[0].mask(), 0x0f);
        assert_eq!(bits[1].mask(), 0xf0);
        let mut b = BitField::new(field, bits);
        let def = b.definition();
        assert!(def.contains("f_linux_x86.flags_low = ProtoField.uint8(\"point.flags.low\", \"low\", base.DEC, nil, 0xf)"));
        assert!(def.contains("0xf0)"));
        let code = b.code(3, "subtree");
        assert!(code.contains("bits_tree:add(f_linux_x86.flags_low, buffer(3, 1))"));
    }

    #[test]
    fn array_unrolls_dimensions() {
        let element = FieldNode::Field(pushed(Field::new("m", WireType::Int32, 4, 4, Endian::Big)));
        let mut a = ArrayField::new("m", element, vec![2, 3]);
        assert_eq!(a.size(), 24);
        let code = a.code(8, "subtree", None);
        assert!(code.contains("local array_tree0 = subtree:add(buffer(8, 24), \"m\")"));
        assert!(code.contains("local array_tree1 = array_tree0:add(buffer(20, 12), \"m[1]\")"));
        assert!(code.contains("array_tree1:add(f_linux_x86.m, buffer(28, 4))"));
    }

    #[test]
    fn store_value_uses_generated_offset() {
        let mut f = pushed(Field::new("count", WireType::Uint16, 2, 2, Endian::Little));
        f.code(6, "subtree", None);
        assert_eq!(f.store_value("n"), "\tlocal n = buffer(6, 2):le_uint()");
    }
}
