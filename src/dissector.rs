//! Layout and code generation: [`Dissector`] (one struct on one platform),
//! [`Protocol`] (one struct on every platform) and the [`ProtocolRegistry`].

use crate::ast::Coord;
use crate::config::Config;
use crate::conformance::ConformanceFile;
use crate::error::ConfigError;
use crate::field::{lua_string, lua_var, FieldNode};
use crate::platform::{Endian, Platform};
use crate::rules::{TrailerCount, TrailerRule};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;

/// Name of the Lua function protocols call to register with the delegator.
pub const REGISTER_FUNC: &str = "delegator_register_proto";

/// Smallest offset `>= offset` that is a multiple of `alignment` (0: no constraint).
pub fn padding(alignment: usize, offset: usize) -> usize {
    if alignment == 0 {
        return offset;
    }
    offset + (alignment - offset % alignment) % alignment
}

/// Registered Lua dissector name for `struct_name` on `platform`.
pub fn dissector_name(struct_name: &str, platform: &str) -> String {
    format!("{}.{}", lua_var(struct_name), lua_var(platform))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Struct: children one after another.
    Sequential,
    /// Union: every child at the same offset.
    Overlay,
}

#[derive(Debug, Clone)]
pub struct Dissector {
    pub name: String,
    pub platform: Rc<Platform>,
    pub layout: Layout,
    pub children: Vec<FieldNode>,
    pub offset: Option<usize>,
    pushed: bool,
}

impl Dissector {
    pub fn new(name: &str, platform: Rc<Platform>, layout: Layout) -> Self {
        Dissector {
            name: name.to_string(),
            platform,
            layout,
            children: Vec::new(),
            offset: None,
            pushed: false,
        }
    }

    pub fn endian(&self) -> Endian {
        self.platform.endian
    }

    pub fn add_field(&mut self, node: FieldNode) {
        self.children.push(node);
    }

    /// Fields table of this platform (`f_linux_x86`).
    pub fn field_var(&self) -> String {
        format!("f_{}", lua_var(&self.platform.name))
    }

    pub fn proto_var(&self) -> String {
        format!("proto_{}", dissector_name(&self.name, &self.platform.name).replace('.', "_"))
    }

    pub fn proto_name(&self) -> String {
        dissector_name(&self.name, &self.platform.name)
    }

    pub fn alignment(&self) -> usize {
        self.children.iter().map(FieldNode::alignment).max().unwrap_or(0)
    }

    pub fn size(&self) -> usize {
        let size = match self.layout {
            Layout::Sequential => self
                .children
                .iter()
                .filter(|c| c.size() > 0)
                .fold(0, |end, c| padding(c.alignment(), end) + c.size()),
            Layout::Overlay => self.children.iter().map(FieldNode::size).max().unwrap_or(0),
        };
        padding(self.alignment(), size)
    }

    /// Offset of every child when the dissector starts at `start`.
    pub fn layout(&self, start: usize) -> Vec<usize> {
        let mut offset = start;
        self.children
            .iter()
            .map(|child| {
                // zero-size children take no room and add no padding
                let at = match child.size() {
                    0 => offset,
                    _ => padding(child.alignment(), offset),
                };
                if self.layout == Layout::Sequential {
                    offset = at + child.size();
                }
                at
            })
            .collect()
    }

    /// Push naming prefixes to every field, once.
    pub fn push_modifiers(&mut self) {
        if self.pushed {
            return;
        }
        let var = vec![self.field_var()];
        let abbr = vec![lua_var(&self.name)];
        self.push_children(&var, &abbr);
    }

    pub(crate) fn push_children(&mut self, var: &[String], abbr: &[String]) {
        self.pushed = true;
        for child in &mut self.children {
            child.push_modifiers(var, abbr);
        }
    }

    /// Field definitions, spliced through `conf`'s conformance file.
    pub fn definition(&self, conf: Option<&Config>) -> String {
        let cnf = conf.and_then(|c| c.cnf.as_ref());
        let mut data = vec![self.field_definitions(cnf)];
        if let Some(cnf) = cnf {
            data.push(cnf.match_extra(true));
        }
        join_nonempty(&data)
    }

    /// Child definitions only; inline groups share the enclosing struct's sections.
    pub(crate) fn field_definitions(&self, cnf: Option<&ConformanceFile>) -> String {
        let data: Vec<String> = self
            .children
            .iter()
            .map(|child| {
                let def = child.definition(cnf);
                match cnf {
                    Some(cnf) => cnf.match_field(child.name(), &def, true, Some(child)),
                    None => def,
                }
            })
            .collect();
        join_nonempty(&data)
    }

    /// Decode statements for every child starting at `offset`, then trailers.
    pub fn code(&mut self, offset: usize, tree: &str, conf: Option<&Config>) -> String {
        let cnf = conf.and_then(|c| c.cnf.as_ref());
        let mut data = vec![self.field_code(offset, tree, cnf)];
        if let Some(cnf) = cnf {
            data.push(cnf.match_extra(false));
        }
        if let Some(conf) = conf.filter(|c| !c.trailers.is_empty()) {
            let offsets = self.layout(offset);
            let end = match (self.layout, offsets.last(), self.children.last()) {
                (Layout::Sequential, Some(at), Some(last)) => at + last.size(),
                _ => offset,
            };
            data.push(self.trailers(&conf.trailers, end));
        }
        join_nonempty(&data)
    }

    /// Child decode statements only, each spliced through `cnf`.
    pub(crate) fn field_code(&mut self, offset: usize, tree: &str, cnf: Option<&ConformanceFile>) -> String {
        self.offset = Some(offset);
        let offsets = self.layout(offset);
        let mut data = Vec::new();
        for (child, at) in self.children.iter_mut().zip(&offsets) {
            let mut code = child.code(*at, tree, cnf);
            if let Some(cnf) = cnf {
                code = cnf.match_field(child.name(), &code, false, Some(&*child));
            }
            data.push(code);
        }
        join_nonempty(&data)
    }

    fn child(&self, name: &str) -> Option<&FieldNode> {
        self.children.iter().find(|c| c.name() == name)
    }

    /// Calls into trailing protocols after the fixed part, starting at `end`.
    pub fn trailers(&self, rules: &[TrailerRule], end: usize) -> String {
        let mut data = vec![
            format!("\t-- Trailers handling for struct: {}", self.name),
            format!("\tlocal trail_offset = {}", end),
        ];
        for (i, rule) in rules.iter().enumerate() {
            let call = match rule.size {
                Some(size) => format!(
                    "Dissector.get({}):call(buffer(trail_offset, {}):tvb(), pinfo, tree)",
                    lua_string(&rule.name),
                    size
                ),
                None => format!(
                    "Dissector.get({}):call(buffer(trail_offset):tvb(), pinfo, tree)",
                    lua_string(&rule.name)
                ),
            };
            let looped = matches!(rule.count, TrailerCount::Member(_) | TrailerCount::Fixed(2..));
            let advance = match rule.size {
                Some(size) if looped || i + 1 < rules.len() => {
                    Some(format!("trail_offset = trail_offset + {}", size))
                }
                _ => None,
            };
            let mut body = vec![call];
            body.extend(advance);
            match &rule.count {
                TrailerCount::Member(member) => {
                    let Some(store) = self.child(member).and_then(|c| c.store_value("trail_count")) else {
                        debug!(dissector = %self.name, member = %member, "trailer count member not found, skipped");
                        continue;
                    };
                    data.push(store);
                    data.push("\tfor i = 1, trail_count do".to_string());
                    data.extend(body.iter().map(|l| format!("\t\t{}", l)));
                    data.push("\tend".to_string());
                }
                TrailerCount::Fixed(0) => {}
                TrailerCount::Fixed(1) => data.extend(body.iter().map(|l| format!("\t{}", l))),
                TrailerCount::Fixed(n) => {
                    data.push(format!("\tfor i = 1, {} do", n));
                    data.extend(body.iter().map(|l| format!("\t\t{}", l)));
                    data.push("\tend".to_string());
                }
            }
        }
        if data.len() == 2 {
            return String::new();
        }
        data.join("\n")
    }
}

fn join_nonempty(parts: &[String]) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join("\n")
}

/// One struct, with a dissector per platform.
#[derive(Debug, Clone)]
pub struct Protocol {
    pub name: String,
    pub conf: Option<Config>,
    pub ids: Vec<u16>,
    pub description: String,
    pub coord: Coord,
    pub dissectors: Vec<Dissector>,
}

impl Protocol {
    pub fn new(name: &str, conf: Option<Config>, coord: Coord) -> Self {
        let ids = conf.as_ref().map(|c| c.ids.clone()).unwrap_or_default();
        let description = conf
            .as_ref()
            .and_then(|c| c.description.clone())
            .unwrap_or_else(|| name.to_string());
        Protocol {
            name: name.to_string(),
            conf,
            ids,
            description,
            coord,
            dissectors: Vec::new(),
        }
    }

    pub fn dissector(&self, platform: &str) -> Option<&Dissector> {
        self.dissectors.iter().find(|d| d.platform.name == platform)
    }

    pub fn add_dissector(&mut self, dissector: Dissector) {
        self.dissectors.retain(|d| d.platform.name != dissector.platform.name);
        self.dissectors.push(dissector);
    }

    /// The complete Lua file for this struct.
    pub fn generate(&mut self) -> String {
        for d in &mut self.dissectors {
            d.push_modifiers();
        }
        let conf = self.conf.as_ref();
        let mut data = vec![format!("-- Dissector for {}: {}", self.name, self.description)];
        for d in &self.dissectors {
            data.push(format!(
                "local {} = Proto({}, {})",
                d.proto_var(),
                lua_string(&d.proto_name()),
                lua_string(&format!("{} ({})", self.description, d.platform.name))
            ));
        }
        data.push(String::new());

        for d in &self.dissectors {
            data.push(format!("-- ProtoField definitions for: {} ({})", self.name, d.platform.name));
            data.push(format!("local {} = {}.fields", d.field_var(), d.proto_var()));
            let defs = d.definition(conf);
            if !defs.is_empty() {
                data.push(defs);
            }
            data.push(String::new());
        }

        for d in &mut self.dissectors {
            let size = d.size();
            data.push(format!("-- Dissector function for: {} ({})", self.name, d.platform.name));
            data.push(format!("function {}.dissector(buffer, pinfo, tree)", d.proto_var()));
            data.push(format!(
                "\tlocal subtree = tree:add({}, buffer(0, {}))",
                d.proto_var(),
                size
            ));
            data.push("\tif pinfo.private.field_name then".to_string());
            data.push("\t\tsubtree:set_text(pinfo.private.field_name .. \": \" .. subtree.text)".to_string());
            data.push("\t\tpinfo.private.field_name = nil".to_string());
            data.push("\telse".to_string());
            data.push(format!("\t\tpinfo.cols.info:append(\" ({})\")", d.proto_var()));
            data.push("\tend".to_string());
            let code = d.code(0, "subtree", conf);
            if !code.is_empty() {
                data.push(code);
            }
            data.push("end".to_string());
            data.push(String::new());
        }

        for d in &self.dissectors {
            let platform = lua_string(&d.platform.name);
            let name = lua_string(&self.name);
            if self.ids.is_empty() {
                data.push(format!(
                    "{}({}, {}, {}, nil)",
                    REGISTER_FUNC,
                    d.proto_var(),
                    platform,
                    name
                ));
            }
            for id in &self.ids {
                data.push(format!(
                    "{}({}, {}, {}, {})",
                    REGISTER_FUNC,
                    d.proto_var(),
                    platform,
                    name,
                    id
                ));
            }
        }
        data.join("\n") + "\n"
    }
}

/// All protocols built in one run, by name, in build order.
#[derive(Debug, Default)]
pub struct ProtocolRegistry {
    protocols: Vec<Protocol>,
    index: HashMap<String, usize>,
    coords: HashMap<String, Coord>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record where `name` is defined. `Ok(false)` means this exact definition
    /// was seen before; a different location is an error.
    pub fn register_coord(&mut self, name: &str, coord: &Coord) -> Result<bool, ConfigError> {
        match self.coords.get(name) {
            Some(first) if first == coord => Ok(false),
            Some(first) => Err(ConfigError::DuplicateStruct {
                name: name.to_string(),
                first: first.clone(),
                second: coord.clone(),
            }),
            None => {
                self.coords.insert(name.to_string(), coord.clone());
                Ok(true)
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Protocol> {
        self.index.get(name).map(|&i| &self.protocols[i])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Protocol> {
        self.index.get(name).map(|&i| &mut self.protocols[i])
    }

    /// Add or replace the protocol with the same name.
    pub fn insert(&mut self, protocol: Protocol) {
        match self.index.get(&protocol.name) {
            Some(&i) => self.protocols[i] = protocol,
            None => {
                self.index.insert(protocol.name.clone(), self.protocols.len());
                self.protocols.push(protocol);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Protocol> {
        self.protocols.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Protocol> {
        self.protocols.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.protocols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.protocols.is_empty()
    }
}
