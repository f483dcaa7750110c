//! Struct model builder: walks a [`TranslationUnit`] and builds one [`Protocol`] per
//! struct or union, with one [`Dissector`] per target platform.

use crate::ast::*;
use crate::config::{plain_field, CType, Config, ConfigSet};
use crate::dissector::{dissector_name, Dissector, Layout, Protocol, ProtocolRegistry};
use crate::error::{ConfigError, Error, ParseError};
use crate::field::{ArrayField, Field, FieldNode, ProtocolField, WireType};
use crate::platform::{normalize_ctype, Platform};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use tracing::{debug, warn};

const MAX_ALIAS_DEPTH: usize = 64;
/// Largest array a Lua `TvbRange` can address.
const MAX_ARRAY_BYTES: usize = u32::MAX as usize;

/// Builds protocols for the structs of one translation unit into a shared registry.
pub struct StructVisitor<'a> {
    configs: &'a ConfigSet,
    platforms: &'a [Rc<Platform>],
    registry: &'a mut ProtocolRegistry,
    /// Enum name -> value -> enumerator.
    enums: HashMap<String, BTreeMap<i64, String>>,
    /// Every enumerator seen so far.
    constants: HashMap<String, i64>,
    /// Typedef name -> declared type.
    aliases: HashMap<String, DeclType>,
}

/// Build every struct of `unit`; returns the names of newly built protocols.
pub fn find_structs(
    unit: &TranslationUnit,
    configs: &ConfigSet,
    platforms: &[Rc<Platform>],
    registry: &mut ProtocolRegistry,
) -> Result<Vec<String>, Error> {
    StructVisitor::new(configs, platforms, registry).visit(unit)
}

impl<'a> StructVisitor<'a> {
    pub fn new(
        configs: &'a ConfigSet,
        platforms: &'a [Rc<Platform>],
        registry: &'a mut ProtocolRegistry,
    ) -> Self {
        StructVisitor {
            configs,
            platforms,
            registry,
            enums: HashMap::new(),
            constants: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    pub fn visit(&mut self, unit: &TranslationUnit) -> Result<Vec<String>, Error> {
        let mut built = Vec::new();
        for decl in &unit.decls {
            self.visit_decl(decl, &mut built)?;
        }
        Ok(built)
    }

    fn visit_decl(&mut self, decl: &Decl, built: &mut Vec<String>) -> Result<(), Error> {
        match decl.ty.spec() {
            TypeSpec::Enum(spec) if spec.values.is_some() => {
                if let Some(name) = spec.name.as_ref().or(decl.name.as_ref()) {
                    self.add_enum(name, spec)?;
                } else {
                    self.add_constants(spec)?;
                }
            }
            TypeSpec::Struct(spec) | TypeSpec::Union(spec) if spec.members.is_some() => {
                let layout = layout_of(decl.ty.spec());
                match spec.name.as_ref().or(decl.name.as_ref()) {
                    Some(name) => {
                        let name = name.clone();
                        if self.visit_struct(&name, spec, layout)? {
                            built.push(name);
                        }
                    }
                    None => debug!(coord = %spec.coord, "anonymous struct without a name, skipped"),
                }
            }
            _ => {}
        }
        if decl.is_typedef {
            if let Some(name) = &decl.name {
                self.aliases.insert(name.clone(), named_ref(&decl.ty, name));
            }
        }
        Ok(())
    }

    /// Returns false when the struct was seen before or had no fields.
    fn visit_struct(&mut self, name: &str, spec: &StructSpec, layout: Layout) -> Result<bool, Error> {
        let in_struct = |e: Error| Error::InStruct {
            name: name.to_string(),
            coord: spec.coord.clone(),
            source: Box::new(e),
        };
        if !self.registry.register_coord(name, &spec.coord).map_err(|e| in_struct(e.into()))? {
            debug!(struct_name = name, coord = %spec.coord, "already visited");
            return Ok(false);
        }
        let members = spec.members.as_deref().unwrap_or_default();
        self.visit_nested(members).map_err(in_struct)?;

        let conf = self.configs.get(name);
        let mut proto = Protocol::new(name, conf.cloned(), spec.coord.clone());
        for platform in self.platforms {
            let dissector = self
                .build_dissector(name, members, layout, platform, conf)
                .map_err(in_struct)?;
            proto.add_dissector(dissector);
        }
        if proto.dissectors.iter().all(|d| d.children.is_empty()) {
            debug!(struct_name = name, "no fields, dropped");
            return Ok(false);
        }
        debug!(struct_name = name, platforms = proto.dissectors.len(), "built protocol");
        self.registry.insert(proto);
        Ok(true)
    }

    /// Named definitions inside members are file-scope types: build them first.
    fn visit_nested(&mut self, members: &[Decl]) -> Result<(), Error> {
        for member in members {
            match member.ty.spec() {
                TypeSpec::Enum(spec) if spec.values.is_some() => match spec.name.as_ref().or(member.name.as_ref()) {
                    Some(name) => self.add_enum(name, spec)?,
                    None => self.add_constants(spec)?,
                },
                TypeSpec::Struct(spec) | TypeSpec::Union(spec) => {
                    let Some(inner) = &spec.members else { continue };
                    match &spec.name {
                        Some(tag) => {
                            let tag = tag.clone();
                            self.visit_struct(&tag, spec, layout_of(member.ty.spec()))?;
                        }
                        None => self.visit_nested(inner)?,
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn build_dissector(
        &self,
        name: &str,
        members: &[Decl],
        layout: Layout,
        platform: &Rc<Platform>,
        conf: Option<&Config>,
    ) -> Result<Dissector, Error> {
        let mut dissector = Dissector::new(name, platform.clone(), layout);
        for member in members {
            dissector.add_field(self.member_node(member, platform, conf)?);
        }
        Ok(dissector)
    }

    fn member_node(&self, member: &Decl, platform: &Rc<Platform>, conf: Option<&Config>) -> Result<FieldNode, Error> {
        let Some(name) = member.name.as_deref() else {
            return Err(ParseError::UnsupportedMember {
                member: "<unnamed>".to_string(),
                reason: "unnamed members are not supported".to_string(),
            }
            .into());
        };
        if let Some(bits) = &member.bitsize {
            return Err(ParseError::UnsupportedMember {
                member: name.to_string(),
                reason: format!("bit-field width `{}` is not supported", bits),
            }
            .into());
        }
        let (ty, spelled) = self.resolve(&member.ty, 0);
        match &ty {
            DeclType::ArrayDecl { .. } => self.array_node(name, &ty, spelled.as_deref(), platform, conf),
            _ => self.node(name, &ty, spelled.as_deref(), None, platform, conf),
        }
    }

    /// Node for a non-array type; `size` overrides the platform size.
    fn node(
        &self,
        name: &str,
        ty: &DeclType,
        spelled: Option<&str>,
        size: Option<usize>,
        platform: &Rc<Platform>,
        conf: Option<&Config>,
    ) -> Result<FieldNode, Error> {
        match ty {
            DeclType::PtrDecl(_) => {
                debug!(member = name, "pointer member");
                let ctype = CType {
                    spelled: spelled.unwrap_or("pointer"),
                    base: "pointer",
                };
                Ok(self.scalar(name, ctype, None, platform, conf)?)
            }
            DeclType::FuncDecl(_) => Err(ParseError::UnsupportedMember {
                member: name.to_string(),
                reason: "function declarator".to_string(),
            }
            .into()),
            DeclType::ArrayDecl { .. } => self.array_node(name, ty, spelled, platform, conf),
            DeclType::TypeDecl(TypeSpec::Identifier(words)) => {
                let ctype = normalize_ctype(&words.join(" "));
                let ctype = CType {
                    spelled: spelled.unwrap_or(ctype.as_str()),
                    base: ctype.as_str(),
                };
                Ok(self.scalar(name, ctype, size, platform, conf)?)
            }
            DeclType::TypeDecl(TypeSpec::Enum(spec)) => {
                let enum_name = spec.name.clone().unwrap_or_else(|| name.to_string());
                let values = match &spec.values {
                    Some(_) => self.enum_values(spec)?,
                    None => self
                        .enums
                        .get(&enum_name)
                        .cloned()
                        .ok_or_else(|| ParseError::UnknownEnum(enum_name.clone()))?,
                };
                let ctype = CType {
                    spelled: spelled.unwrap_or(enum_name.as_str()),
                    base: "enum",
                };
                let mut node = self.scalar(name, ctype, None, platform, conf)?;
                if let FieldNode::Field(field) = &mut node {
                    if field.values.is_none() {
                        field.set_list_validation(values, true);
                    }
                }
                Ok(node)
            }
            DeclType::TypeDecl(TypeSpec::Struct(s) | TypeSpec::Union(s)) => {
                if s.name.is_none() {
                    let members = s.members.as_deref().unwrap_or_default();
                    debug!(member = name, "inline group");
                    let group = self.build_dissector(name, members, layout_of(ty.spec()), platform, conf)?;
                    return Ok(FieldNode::Group(group));
                }
                let tag = s.name.as_deref().unwrap_or_default();
                self.struct_ref(name, tag, platform)
            }
        }
    }

    fn scalar(
        &self,
        name: &str,
        ctype: CType,
        size: Option<usize>,
        platform: &Platform,
        conf: Option<&Config>,
    ) -> Result<FieldNode, ConfigError> {
        match conf {
            Some(conf) => conf.create_field(platform, name, ctype, size, None),
            None => Ok(FieldNode::Field(plain_field(platform, name, ctype.base, size, None)?)),
        }
    }

    fn struct_ref(&self, name: &str, tag: &str, platform: &Rc<Platform>) -> Result<FieldNode, Error> {
        if let Some(sub) = self.registry.get(tag).and_then(|p| p.dissector(&platform.name)) {
            return Ok(FieldNode::Protocol(ProtocolField {
                name: name.to_string(),
                proto_name: tag.to_string(),
                dissector: dissector_name(tag, &platform.name),
                size: sub.size(),
                alignment: sub.alignment(),
                offset: None,
            }));
        }
        match self.configs.get(tag).and_then(|c| c.size) {
            Some(size) => {
                debug!(member = name, struct_name = tag, size, "opaque struct");
                Ok(FieldNode::Field(Field::new(name, WireType::Bytes, size, 1, platform.endian)))
            }
            None => Err(ParseError::UnknownStruct(tag.to_string()).into()),
        }
    }

    fn array_node(
        &self,
        name: &str,
        ty: &DeclType,
        spelled: Option<&str>,
        platform: &Rc<Platform>,
        conf: Option<&Config>,
    ) -> Result<FieldNode, Error> {
        let mut dims = Vec::new();
        let mut element = ty;
        while let DeclType::ArrayDecl { dim, inner } = element {
            dims.push(self.extent(name, dim));
            element = inner.as_ref();
        }
        let is_char = matches!(element, DeclType::TypeDecl(TypeSpec::Identifier(words)) if words.len() == 1 && words[0] == "char");
        let Some(&innermost) = dims.last() else {
            return self.node(name, element, spelled, None, platform, conf);
        };
        // outer dimensions of extent 1 add nothing to the tree
        let mut depth: Vec<usize> = dims[..dims.len() - 1].iter().copied().filter(|&d| d != 1).collect();

        let node = if is_char {
            let ctype = CType {
                spelled: spelled.unwrap_or("string"),
                base: "string",
            };
            self.scalar(name, ctype, Some(innermost), platform, conf)?
        } else {
            depth.push(innermost);
            self.node(name, element, spelled, None, platform, conf)?
        };
        let total = depth
            .iter()
            .try_fold(node.size(), |bytes, &d| bytes.checked_mul(d))
            .filter(|&bytes| bytes <= MAX_ARRAY_BYTES);
        if total.is_none() {
            return Err(ParseError::UnsupportedMember {
                member: name.to_string(),
                reason: format!("array extents {:?} exceed {} bytes", dims, MAX_ARRAY_BYTES),
            }
            .into());
        }
        if depth.is_empty() {
            return Ok(node);
        }
        Ok(FieldNode::Array(ArrayField::new(name, node, depth)))
    }

    fn extent(&self, member: &str, dim: &ArrayDim) -> usize {
        match dim {
            ArrayDim::Literal(n) => usize::try_from(*n).unwrap_or(usize::MAX),
            ArrayDim::Expr(expr) => {
                warn!(member, extent = %expr, "array extent is not an integer literal, using 0");
                0
            }
            ArrayDim::Unsized => {
                warn!(member, "array without extent, using 0");
                0
            }
        }
    }

    fn add_enum(&mut self, name: &str, spec: &EnumSpec) -> Result<(), ParseError> {
        let values = self.enum_values(spec)?;
        self.add_constants(spec)?;
        debug!(enum_name = name, count = values.len(), "enum");
        self.enums.insert(name.to_string(), values);
        Ok(())
    }

    fn add_constants(&mut self, spec: &EnumSpec) -> Result<(), ParseError> {
        let values = self.enum_values(spec)?;
        for (value, name) in values {
            self.constants.insert(name, value);
        }
        Ok(())
    }

    /// Literal values or earlier enumerators, with implicit increments.
    fn enum_values(&self, spec: &EnumSpec) -> Result<BTreeMap<i64, String>, ParseError> {
        let mut values = BTreeMap::new();
        let mut local: HashMap<&str, i64> = HashMap::new();
        let mut next = 0i64;
        for e in spec.values.as_deref().unwrap_or_default() {
            let value = match &e.value {
                None => next,
                Some(expr) => parse_int_literal(expr)
                    .or_else(|| local.get(expr.as_str()).copied())
                    .or_else(|| self.constants.get(expr).copied())
                    .ok_or_else(|| ParseError::EnumValue {
                        name: e.name.clone(),
                        expr: expr.clone(),
                    })?,
            };
            values.insert(value, e.name.clone());
            local.insert(e.name.as_str(), value);
            next = value + 1;
        }
        Ok(values)
    }

    /// Replace typedef names at the bottom of `ty`; also returns the outermost typedef name.
    fn resolve(&self, ty: &DeclType, depth: usize) -> (DeclType, Option<String>) {
        match ty {
            DeclType::TypeDecl(TypeSpec::Identifier(words)) if depth < MAX_ALIAS_DEPTH => {
                let key = words.join(" ");
                match self.aliases.get(&key) {
                    Some(target) => (self.resolve(target, depth + 1).0, Some(key)),
                    None => (ty.clone(), None),
                }
            }
            DeclType::TypeDecl(_) => (ty.clone(), None),
            DeclType::ArrayDecl { dim, inner } => {
                let (inner, spelled) = self.resolve(inner, depth);
                (
                    DeclType::ArrayDecl {
                        dim: dim.clone(),
                        inner: Box::new(inner),
                    },
                    spelled,
                )
            }
            DeclType::PtrDecl(inner) => {
                let (inner, spelled) = self.resolve(inner, depth);
                (DeclType::PtrDecl(Box::new(inner)), spelled)
            }
            DeclType::FuncDecl(inner) => {
                let (inner, spelled) = self.resolve(inner, depth);
                (DeclType::FuncDecl(Box::new(inner)), spelled)
            }
        }
    }
}

fn layout_of(spec: &TypeSpec) -> Layout {
    match spec {
        TypeSpec::Union(_) => Layout::Overlay,
        _ => Layout::Sequential,
    }
}

/// `ty` with its struct/union/enum definition replaced by a reference, naming
/// anonymous definitions `name`.
fn named_ref(ty: &DeclType, name: &str) -> DeclType {
    match ty {
        DeclType::TypeDecl(spec) => DeclType::TypeDecl(match spec {
            TypeSpec::Struct(s) | TypeSpec::Union(s) => {
                let r = StructSpec {
                    name: Some(s.name.clone().unwrap_or_else(|| name.to_string())),
                    members: None,
                    coord: s.coord.clone(),
                };
                if matches!(spec, TypeSpec::Union(_)) {
                    TypeSpec::Union(r)
                } else {
                    TypeSpec::Struct(r)
                }
            }
            TypeSpec::Enum(e) => TypeSpec::Enum(EnumSpec {
                name: Some(e.name.clone().unwrap_or_else(|| name.to_string())),
                values: None,
                coord: e.coord.clone(),
            }),
            other => other.clone(),
        }),
        DeclType::ArrayDecl { dim, inner } => DeclType::ArrayDecl {
            dim: dim.clone(),
            inner: Box::new(named_ref(inner, name)),
        },
        DeclType::PtrDecl(inner) => DeclType::PtrDecl(Box::new(named_ref(inner, name))),
        DeclType::FuncDecl(inner) => DeclType::FuncDecl(Box::new(named_ref(inner, name))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn build(src: &str, configs: &ConfigSet) -> Result<ProtocolRegistry, Error> {
        let unit = parse(src, "test.h").unwrap();
        let platforms = vec![Rc::new(Platform::by_name("Linux-x86-64").unwrap())];
        let mut registry = ProtocolRegistry::new();
        find_structs(&unit, configs, &platforms, &mut registry)?;
        Ok(registry)
    }

    fn offsets(registry: &ProtocolRegistry, name: &str) -> Vec<usize> {
        registry.get(name).unwrap().dissectors[0].layout(0)
    }

    #[test]
    fn typedefs_and_nested_structs() {
        let src = "
            typedef unsigned short port_t;
            typedef struct { char host[16]; port_t port; } endpoint_t;
            struct conn { endpoint_t from; endpoint_t to; long opened; };
        ";
        let reg = build(src, &ConfigSet::new()).unwrap();
        assert_eq!(reg.len(), 2);
        let endpoint = &reg.get("endpoint_t").unwrap().dissectors[0];
        assert_eq!(endpoint.size(), 18);
        assert_eq!(offsets(&reg, "conn"), vec![0, 18, 40]);
        let conn = &reg.get("conn").unwrap().dissectors[0];
        assert!(matches!(&conn.children[0], FieldNode::Protocol(p) if p.dissector == "endpoint_t.linux_x86_64"));
    }

    #[test]
    fn enums_from_literals_and_earlier_enumerators() {
        let src = "
            enum color { RED = 1, GREEN, BLUE = 0x10, ALIAS = GREEN };
            struct pixel { enum color c; };
        ";
        let reg = build(src, &ConfigSet::new()).unwrap();
        let pixel = &reg.get("pixel").unwrap().dissectors[0];
        let field = pixel.children[0].as_field().unwrap();
        let values = field.values.as_ref().unwrap();
        assert_eq!(values.get(&2).map(String::as_str), Some("ALIAS"));
        assert_eq!(values.get(&16).map(String::as_str), Some("BLUE"));
        assert_eq!(field.size, 4);
    }

    #[test]
    fn undeclared_enum_fails() {
        let err = build("struct s { enum missing m; };", &ConfigSet::new()).unwrap_err();
        assert!(matches!(err.root(), Error::Parse(ParseError::UnknownEnum(n)) if n == "missing"));
    }

    #[test]
    fn arrays() {
        let src = "struct s { char name[1][8]; int m[2][3]; short one[1][4]; char names[3][5]; };";
        let reg = build(src, &ConfigSet::new()).unwrap();
        let d = &reg.get("s").unwrap().dissectors[0];
        assert!(matches!(&d.children[0], FieldNode::Field(f) if f.size == 8 && f.wire_type == WireType::String));
        assert!(matches!(&d.children[1], FieldNode::Array(a) if a.depth == vec![2, 3]));
        assert!(matches!(&d.children[2], FieldNode::Array(a) if a.depth == vec![4]));
        assert!(matches!(&d.children[3], FieldNode::Array(a) if a.depth == vec![3] && a.element.size() == 5));
        assert_eq!(d.layout(0), vec![0, 8, 32, 40]);
    }

    #[test]
    fn non_literal_extent_is_zero() {
        let reg = build("struct s { int n; char path[PATH_MAX]; };", &ConfigSet::new()).unwrap();
        let d = &reg.get("s").unwrap().dissectors[0];
        assert_eq!(d.children[1].size(), 0);
        assert_eq!(d.size(), 4);
    }

    #[test]
    fn zero_size_member_adds_no_padding() {
        let reg = build("struct s { char a; double arr[N]; char b; };", &ConfigSet::new()).unwrap();
        let d = &reg.get("s").unwrap().dissectors[0];
        let layout = d.layout(0);
        assert_eq!(layout, vec![0, 1, 1]);
        assert_eq!(d.size(), 8);
        assert!(layout[2] + d.children[2].size() <= d.size());
    }

    #[test]
    fn oversized_arrays_are_rejected() {
        let err = build("struct s { int a[4294967296][4294967296]; };", &ConfigSet::new()).unwrap_err();
        assert!(matches!(err.root(), Error::Parse(ParseError::UnsupportedMember { member, .. }) if member == "a"));
        let err = build("struct t { char big[8589934592]; };", &ConfigSet::new()).unwrap_err();
        assert!(matches!(err.root(), Error::Parse(ParseError::UnsupportedMember { .. })));
    }

    #[test]
    fn unions_and_groups() {
        let src = "struct s { int kind; union { int i; double d; } value; char tail; };";
        let reg = build(src, &ConfigSet::new()).unwrap();
        let d = &reg.get("s").unwrap().dissectors[0];
        match &d.children[1] {
            FieldNode::Group(g) => {
                assert_eq!(g.layout, Layout::Overlay);
                assert_eq!(g.size(), 8);
            }
            other => panic!("expected group, got {:?}", other),
        }
        assert_eq!(d.layout(0), vec![0, 8, 16]);
        assert_eq!(d.size(), 24);
    }

    #[test]
    fn bitfields_and_unnamed_members_are_rejected() {
        let err = build("struct s { int a : 3; };", &ConfigSet::new()).unwrap_err();
        assert!(matches!(err.root(), Error::Parse(ParseError::UnsupportedMember { .. })));
        let err = build("struct s { struct { int a; }; };", &ConfigSet::new()).unwrap_err();
        assert!(matches!(err.root(), Error::Parse(ParseError::UnsupportedMember { .. })));
    }

    #[test]
    fn pointers_and_empty_structs() {
        let reg = build("struct e { }; struct p { char *name; void (*cb)(int); };", &ConfigSet::new()).unwrap();
        assert!(reg.get("e").is_none());
        let d = &reg.get("p").unwrap().dissectors[0];
        assert_eq!(d.layout(0), vec![0, 8]);
        assert_eq!(d.children[0].as_field().unwrap().wire_type, WireType::Uint64);
    }

    #[test]
    fn unknown_struct_uses_configured_size() {
        let mut configs = ConfigSet::new();
        configs.entry("opaque").size = Some(12);
        let reg = build("struct s { struct opaque o; };", &configs).unwrap();
        assert_eq!(reg.get("s").unwrap().dissectors[0].size(), 12);
        let err = build("struct s { struct opaque o; };", &ConfigSet::new()).unwrap_err();
        assert!(matches!(err.root(), Error::Parse(ParseError::UnknownStruct(_))));
    }

    #[test]
    fn duplicate_definitions() {
        let src = "struct a { int x; };\n\nstruct a { int y; };";
        let err = build(src, &ConfigSet::new()).unwrap_err();
        assert!(matches!(err.root(), Error::Config(ConfigError::DuplicateStruct { .. })));
    }
}
