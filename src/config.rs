//! Rule registry: per-struct [`Config`]s and the YAML loader that fills them.

use crate::conformance::ConformanceFile;
use crate::error::{ConfigError, Error};
use crate::field::{BitField, Field, FieldNode};
use crate::options::{Options, OptionsSection};
use crate::platform::Platform;
use crate::rules::{
    BitstringRule, CustomRule, EnumRule, RangeRule, Rule, RuleKey, TrailerRule,
};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A member's C type: as spelled in the declaration and after typedef resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CType<'a> {
    pub spelled: &'a str,
    pub base: &'a str,
}

impl<'a> CType<'a> {
    pub fn plain(name: &'a str) -> Self {
        CType {
            spelled: name,
            base: name,
        }
    }

    /// Rule lookup names, spelled name first.
    pub fn names(&self) -> Vec<&'a str> {
        if self.spelled == self.base {
            vec![self.base]
        } else {
            vec![self.spelled, self.base]
        }
    }
}

/// Everything configured for one struct name.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub name: String,
    pub ids: Vec<u16>,
    pub description: Option<String>,
    /// Fixed size, used when the struct itself is not available.
    pub size: Option<usize>,
    pub cnf: Option<ConformanceFile>,
    pub trailers: Vec<TrailerRule>,
    members: HashMap<String, Vec<Rule>>,
    types: HashMap<String, Vec<Rule>>,
}

impl Config {
    pub fn new(name: &str) -> Self {
        Config {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn add_member_rule(&mut self, member: &str, rule: Rule) {
        self.members.entry(member.to_string()).or_default().push(rule);
    }

    pub fn add_type_rule(&mut self, ctype: &str, rule: Rule) {
        self.types.entry(ctype.to_string()).or_default().push(rule);
    }

    pub fn add_rule(&mut self, key: RuleKey, rule: Rule) {
        match key {
            RuleKey::Member(m) => self.add_member_rule(&m, rule),
            RuleKey::Type(t) => self.add_type_rule(&t, rule),
        }
    }

    /// Member rules first, then type rules in the order of `types`.
    pub fn get_rules(&self, member: &str, types: &[&str]) -> Vec<&Rule> {
        let mut rules: Vec<&Rule> = self.members.get(member).into_iter().flatten().collect();
        for ctype in types {
            rules.extend(self.types.get(*ctype).into_iter().flatten());
        }
        rules
    }

    /// Build the field for `member`, applying matching rules by priority.
    pub fn create_field(
        &self,
        platform: &Platform,
        member: &str,
        ctype: CType,
        size: Option<usize>,
        alignment: Option<usize>,
    ) -> Result<FieldNode, ConfigError> {
        let mut bitstrings: Vec<&BitstringRule> = Vec::new();
        let mut enums: Vec<&EnumRule> = Vec::new();
        let mut ranges: Vec<&RangeRule> = Vec::new();
        let mut customs: Vec<&CustomRule> = Vec::new();
        for rule in self.get_rules(member, &ctype.names()) {
            match rule {
                Rule::Bitstring(r) => bitstrings.push(r),
                Rule::Enum(r) => enums.push(r),
                Rule::Range(r) => ranges.push(r),
                Rule::Custom(r) => customs.push(r),
            }
        }

        if let Some(custom) = customs.first() {
            debug!(struct_name = %self.name, member, "custom field");
            return custom
                .create(platform, member, ctype.base, size, alignment)
                .map(FieldNode::Field);
        }

        let mut field = plain_field(platform, member, ctype.base, size, alignment)?;
        if let Some(bitstring) = bitstrings.first() {
            let width = field.size as u64 * 8;
            if let Some(span) = bitstring.bits.iter().find(|s| u64::from(s.start) + u64::from(s.width) > width) {
                return Err(ConfigError::InvalidBitstringKey {
                    struct_name: self.name.clone(),
                    key: match span.width {
                        1 => span.start.to_string(),
                        w => format!("{}-{}", span.start, span.start + w - 1),
                    },
                });
            }
            return Ok(FieldNode::Bits(BitField::new(field, bitstring.bits.clone())));
        }
        for rule in enums {
            field.set_list_validation(rule.values.clone(), rule.strict);
        }
        for rule in ranges {
            field.set_range_validation(rule.min, rule.max);
        }
        Ok(FieldNode::Field(field))
    }
}

/// A field straight from the platform tables, without rules.
pub fn plain_field(
    platform: &Platform,
    member: &str,
    ctype: &str,
    size: Option<usize>,
    alignment: Option<usize>,
) -> Result<Field, ConfigError> {
    let size = size
        .or_else(|| platform.size_of(ctype))
        .ok_or_else(|| ConfigError::UnknownSize {
            member: member.to_string(),
            ctype: ctype.to_string(),
        })?;
    let wire_type = platform
        .map_type(ctype)
        .ok_or_else(|| ConfigError::UnmappedType {
            member: member.to_string(),
            ctype: ctype.to_string(),
        })?;
    let alignment = alignment
        .or_else(|| platform.alignment_of(ctype))
        .ok_or_else(|| ConfigError::UnknownAlignment {
            member: member.to_string(),
        })?;
    Ok(Field::new(member, wire_type, size, alignment, platform.endian))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IdSpec {
    One(i64),
    Many(Vec<i64>),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StructSection {
    name: Option<String>,
    id: Option<IdSpec>,
    description: Option<String>,
    size: Option<usize>,
    cnf: Option<PathBuf>,
    bitstrings: Vec<Mapping>,
    enums: Vec<Mapping>,
    ranges: Vec<Mapping>,
    trailers: Vec<Mapping>,
    customs: Vec<Mapping>,
}

#[derive(Debug, Default, Deserialize)]
struct Document {
    #[serde(rename = "Options", default)]
    options: Option<OptionsSection>,
    #[serde(rename = "Structs", default)]
    structs: Vec<StructSection>,
}

/// All struct configurations of one run, by name.
#[derive(Debug, Default)]
pub struct ConfigSet {
    configs: HashMap<String, Config>,
}

impl ConfigSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Config> {
        self.configs.get(name)
    }

    /// The config for `name`, created on first mention.
    pub fn entry(&mut self, name: &str) -> &mut Config {
        self.configs
            .entry(name.to_string())
            .or_insert_with(|| Config::new(name))
    }

    pub fn insert(&mut self, config: Config) {
        self.configs.insert(config.name.clone(), config);
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.configs.keys().map(String::as_str)
    }

    pub fn load_file(&mut self, path: &Path, options: &mut Options) -> Result<(), Error> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        self.load_str(&text, Some(path), options)?;
        Ok(())
    }

    /// Load every YAML document in `text`. `path` resolves relative `cnf` files.
    pub fn load_str(&mut self, text: &str, path: Option<&Path>, options: &mut Options) -> Result<(), ConfigError> {
        for document in serde_yaml::Deserializer::from_str(text) {
            let value = Value::deserialize(document)?;
            if value.is_null() {
                continue;
            }
            let document: Document = serde_yaml::from_value(value)?;
            if let Some(section) = document.options {
                options.update(section);
            }
            for section in document.structs {
                self.apply_struct(section, path)?;
            }
        }
        Ok(())
    }

    fn apply_struct(&mut self, section: StructSection, path: Option<&Path>) -> Result<(), ConfigError> {
        let name = section.name.ok_or_else(|| {
            ConfigError::UnnamedStruct(path.map(Path::to_path_buf).unwrap_or_default())
        })?;
        let conf = self.entry(&name);
        if let Some(id) = section.id {
            let ids = match id {
                IdSpec::One(id) => vec![id],
                IdSpec::Many(ids) => ids,
            };
            conf.ids = ids
                .into_iter()
                .map(|id| {
                    u16::try_from(id).map_err(|_| ConfigError::InvalidId {
                        name: name.clone(),
                        id,
                    })
                })
                .collect::<Result<_, _>>()?;
        }
        if section.description.is_some() {
            conf.description = section.description;
        }
        if section.size.is_some() {
            conf.size = section.size;
        }
        if let Some(cnf) = section.cnf {
            conf.cnf = Some(ConformanceFile::load(&cnf, path)?);
        }
        for map in &section.bitstrings {
            let key = RuleKey::from_yaml(&name, map)?;
            conf.add_rule(key, Rule::Bitstring(BitstringRule::from_yaml(&name, map)?));
        }
        for map in &section.enums {
            let key = RuleKey::from_yaml(&name, map)?;
            conf.add_rule(key, Rule::Enum(EnumRule::from_yaml(&name, map)?));
        }
        for map in &section.ranges {
            let key = RuleKey::from_yaml(&name, map)?;
            conf.add_rule(key, Rule::Range(RangeRule::from_yaml(&name, map)?));
        }
        for map in &section.customs {
            let key = RuleKey::from_yaml(&name, map)?;
            conf.add_rule(key, Rule::Custom(CustomRule::from_yaml(&name, map)?));
        }
        for map in &section.trailers {
            conf.trailers.push(TrailerRule::from_yaml(&name, map)?);
        }
        Ok(())
    }
}
