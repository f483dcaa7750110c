//! Conformance files: hand-written Lua spliced around generated code.
//!
//! A file is plain text split by `#.<TOKEN> [field]` marker lines. Only the
//! `DEF_*`/`FUNC_*` sections keep their text; `#.COMMENT`, `#.END` and unknown
//! tokens are inert, and `#.END_OF_CNF` stops reading.

use crate::error::ConfigError;
use crate::field::{lua_var, FieldNode};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Token {
    DefHeader,
    DefBody,
    DefFooter,
    DefExtra,
    FuncHeader,
    FuncBody,
    FuncFooter,
    FuncExtra,
}

impl Token {
    fn parse(s: &str) -> Option<Token> {
        Some(match s {
            "DEF_HEADER" => Token::DefHeader,
            "DEF_BODY" => Token::DefBody,
            "DEF_FOOTER" => Token::DefFooter,
            "DEF_EXTRA" => Token::DefExtra,
            "FUNC_HEADER" => Token::FuncHeader,
            "FUNC_BODY" => Token::FuncBody,
            "FUNC_FOOTER" => Token::FuncFooter,
            "FUNC_EXTRA" => Token::FuncExtra,
            _ => return None,
        })
    }
}

/// `BODY` first, then `FOOTER`, then `HEADER`.
fn splice_order(definition: bool) -> [Token; 3] {
    if definition {
        [Token::DefBody, Token::DefFooter, Token::DefHeader]
    } else {
        [Token::FuncBody, Token::FuncFooter, Token::FuncHeader]
    }
}

/// Substitute the current code into a `BODY` section.
pub fn splice_body(code: &str, text: &str) -> String {
    text.replace("%(DEFAULT_BODY)s", code)
        .replace("{DEFAULT_BODY}", code)
}

pub fn splice_header(code: &str, text: &str) -> String {
    if code.is_empty() {
        return text.to_string();
    }
    format!("{}\n{}", text, code)
}

pub fn splice_footer(code: &str, text: &str) -> String {
    if code.is_empty() {
        return text.to_string();
    }
    format!("{}\n{}", code, text)
}

/// Sections of one conformance file, keyed by (field, token).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConformanceFile {
    pub path: Option<PathBuf>,
    sections: BTreeMap<(Option<String>, Token), String>,
}

impl ConformanceFile {
    pub fn parse(text: &str) -> Self {
        let mut cnf = ConformanceFile::default();
        let mut open: Option<(Option<String>, Token)> = None;
        let mut content: Vec<&str> = Vec::new();
        for line in text.lines() {
            let Some(marker) = line.strip_prefix("#.") else {
                content.push(line);
                continue;
            };
            cnf.flush(open.take(), &mut content);
            let mut parts = marker.split_whitespace();
            let token = parts.next().unwrap_or_default();
            if token == "END_OF_CNF" {
                return cnf;
            }
            open = Token::parse(token).map(|t| (parts.next().map(str::to_string), t));
        }
        cnf.flush(open, &mut content);
        cnf
    }

    fn flush(&mut self, key: Option<(Option<String>, Token)>, content: &mut Vec<&str>) {
        if let Some(key) = key {
            let text = content.join("\n");
            self.sections
                .insert(key, text.trim_end_matches(['\n', '\r']).to_string());
        }
        content.clear();
    }

    /// Read `path`, trying it as given and then relative to the YAML file that named it.
    pub fn load(path: &Path, config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut candidates = vec![path.to_path_buf()];
        if let Some(dir) = config_file.and_then(Path::parent) {
            candidates.push(dir.join(path));
        }
        let found = candidates
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| ConfigError::UnknownFile(path.to_path_buf()))?;
        let text = std::fs::read_to_string(&found)
            .map_err(|_| ConfigError::UnknownFile(found.clone()))?;
        let mut cnf = ConformanceFile::parse(&text);
        cnf.path = Some(found);
        Ok(cnf)
    }

    pub fn section(&self, field: Option<&str>, token: Token) -> Option<&str> {
        self.sections
            .get(&(field.map(str::to_string), token))
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// `DEF_EXTRA` or `FUNC_EXTRA` text, or "".
    pub fn match_extra(&self, definition: bool) -> String {
        let token = if definition {
            Token::DefExtra
        } else {
            Token::FuncExtra
        };
        self.section(None, token).unwrap_or_default().to_string()
    }

    /// Splice every section registered for `name` into `code`.
    pub fn match_field(&self, name: &str, code: &str, definition: bool, field: Option<&FieldNode>) -> String {
        let mut code = code.to_string();
        for token in splice_order(definition) {
            let Some(text) = self.section(Some(name), token) else {
                continue;
            };
            let mut text = text.to_string();
            if !definition {
                if let Some(field) = field {
                    (code, text) = substitute_field(&code, &text, field);
                }
            }
            code = match token {
                Token::DefBody | Token::FuncBody => splice_body(&code, &text),
                Token::DefFooter | Token::FuncFooter => splice_footer(&code, &text),
                _ => splice_header(&code, &text),
            };
        }
        code
    }
}

/// Resolve `{OFFSET}` and `{VALUE}` in `text`. `{VALUE}` also prepends a statement
/// storing the field's value to `code`.
fn substitute_field(code: &str, text: &str, field: &FieldNode) -> (String, String) {
    let mut text = text.to_string();
    let mut code = code.to_string();
    if let Some(offset) = field.offset() {
        text = text.replace("{OFFSET}", &offset.to_string());
    }
    if text.contains("{VALUE}") {
        let var = format!("{}_value", lua_var(field.name()));
        if let Some(store) = field.store_value(&var) {
            text = text.replace("{VALUE}", &var);
            code = splice_header(&code, &store);
        }
    }
    (code, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{Field, WireType};
    use crate::platform::Endian;

    const CNF: &str = "\
#.COMMENT
ignored text
#.DEF_EXTRA
local extra = 1
#.FUNC_BODY x
-- before
{DEFAULT_BODY}
-- after
#.FUNC_HEADER x
-- header
#.FUNC_FOOTER x
-- footer
#.UNKNOWN_TOKEN x
skipped
#.END_OF_CNF
#.FUNC_EXTRA
never stored
";

    #[test]
    fn parse_keeps_store_tokens_only() {
        let cnf = ConformanceFile::parse(CNF);
        assert_eq!(cnf.match_extra(true), "local extra = 1");
        assert_eq!(cnf.match_extra(false), "");
        assert_eq!(cnf.section(Some("x"), Token::FuncHeader), Some("-- header"));
        assert_eq!(cnf.sections.len(), 4);
    }

    #[test]
    fn body_then_footer_then_header() {
        let cnf = ConformanceFile::parse(CNF);
        let code = cnf.match_field("x", "\tsubtree:add(f.x, buffer(0, 4))", false, None);
        assert_eq!(
            code,
            "-- header\n-- before\n\tsubtree:add(f.x, buffer(0, 4))\n-- after\n-- footer"
        );
        assert_eq!(cnf.match_field("y", "code", false, None), "code");
    }

    #[test]
    fn header_and_footer_never_replace() {
        let cnf = ConformanceFile::parse("#.DEF_HEADER a\n-- h\n#.DEF_FOOTER a\n-- f\n");
        assert_eq!(cnf.match_field("a", "def", true, None), "-- h\ndef\n-- f");
    }

    #[test]
    fn legacy_body_placeholder() {
        let cnf = ConformanceFile::parse("#.DEF_BODY a\nX %(DEFAULT_BODY)s Y\n");
        assert_eq!(cnf.match_field("a", "def", true, None), "X def Y");
    }

    #[test]
    fn offset_and_value() {
        let cnf = ConformanceFile::parse("#.FUNC_FOOTER len\nif {VALUE} > 0 then print({OFFSET}) end\n");
        let mut field = Field::new("len", WireType::Uint16, 2, 2, Endian::Big);
        let code = field.code(6, "subtree", None);
        let node = FieldNode::Field(field);
        let out = cnf.match_field("len", &code, false, Some(&node));
        assert_eq!(
            out,
            "\tlocal len_value = buffer(6, 2):uint()\n\tsubtree:add(len, buffer(6, 2))\nif len_value > 0 then print(6) end"
        );
    }

    #[test]
    fn load_relative_to_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.cnf"), "#.FUNC_EXTRA\n-- x\n").unwrap();
        let yaml = dir.path().join("a.yml");
        let cnf = ConformanceFile::load(Path::new("a.cnf"), Some(&yaml)).unwrap();
        assert_eq!(cnf.match_extra(false), "-- x");
        assert!(matches!(
            ConformanceFile::load(Path::new("missing.cnf"), Some(&yaml)),
            Err(ConfigError::UnknownFile(_))
        ));
    }
}
