//! Parser for preprocessed C declarations (pest grammar in `grammar.pest`).
//!
//! Preprocessor directives are blanked before parsing; `cpp` line markers
//! (`# 12 "file.h"`) are kept aside so every coordinate points at the original header.

use crate::ast::*;
use crate::error::ParseError;
use pest::Parser;
use pest_derive::Parser as PestParser;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
pub struct CParser;

type Pair<'a> = pest::iterators::Pair<'a, Rule>;

/// Parse C source; `filename` names the input for coordinates before any line marker.
pub fn parse(source: &str, filename: &str) -> Result<TranslationUnit, ParseError> {
    let (text, lines) = strip_directives(source, filename);
    let mut pairs = CParser::parse(Rule::translation_unit, &text).map_err(|e| ParseError::Syntax {
        file: filename.to_string(),
        message: e.to_string(),
    })?;
    let unit = pairs.next().ok_or_else(|| ParseError::Syntax {
        file: filename.to_string(),
        message: "empty parse".to_string(),
    })?;
    let builder = Builder { lines: &lines };
    let mut decls = Vec::new();
    builder.external_decls(unit, &mut decls)?;
    Ok(TranslationUnit { decls })
}

/// Physical line -> original (file, line), from `cpp` line markers.
#[derive(Debug, Default)]
pub struct LineMap {
    file: String,
    /// (physical line of the marker, line it announces, file)
    marks: Vec<(usize, usize, String)>,
}

impl LineMap {
    pub fn coord(&self, physical: usize) -> Coord {
        let idx = self.marks.partition_point(|(p, _, _)| *p < physical);
        match idx.checked_sub(1).map(|i| &self.marks[i]) {
            Some((p, line, file)) => Coord::new(file, line + (physical - p - 1)),
            None => Coord::new(&self.file, physical),
        }
    }
}

/// Parse `# 12 "file.h" 1` or `#line 12 "file.h"`.
fn line_marker(directive: &str) -> Option<(usize, Option<String>)> {
    let rest = directive.trim_start().strip_prefix('#')?.trim_start();
    let rest = rest.strip_prefix("line").unwrap_or(rest).trim_start();
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    let line = digits.parse().ok()?;
    let after = rest[digits.len()..].trim_start();
    let file = after
        .strip_prefix('"')
        .and_then(|s| s.find('"').map(|end| s[..end].to_string()));
    Some((line, file))
}

/// Blank every directive line (keeping line numbers) and collect line markers.
pub fn strip_directives(source: &str, filename: &str) -> (String, LineMap) {
    let mut map = LineMap {
        file: filename.to_string(),
        marks: Vec::new(),
    };
    let mut out = String::with_capacity(source.len());
    let mut continued = false;
    for (idx, line) in source.lines().enumerate() {
        let physical = idx + 1;
        let directive = continued || line.trim_start().starts_with('#');
        if !directive {
            out.push_str(line);
            out.push('\n');
            continue;
        }
        if !continued {
            if let Some((announced, file)) = line_marker(line) {
                let file = file
                    .or_else(|| map.marks.last().map(|m| m.2.clone()))
                    .unwrap_or_else(|| filename.to_string());
                map.marks.push((physical, announced, file));
            }
        }
        continued = line.trim_end().ends_with('\\');
        out.push('\n');
    }
    (out, map)
}

/// Drop comments from raw expression text.
fn expr_text(raw: &str) -> String {
    let mut out = String::new();
    let mut rest = raw;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("/*") {
            rest = after.find("*/").map(|i| &after[i + 2..]).unwrap_or("");
        } else if let Some(after) = rest.strip_prefix("//") {
            rest = after.find('\n').map(|i| &after[i..]).unwrap_or("");
        } else {
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                out.push(c);
            }
            rest = chars.as_str();
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

enum Suffix {
    Array(ArrayDim),
    Func,
}

struct Builder<'a> {
    lines: &'a LineMap,
}

impl<'a> Builder<'a> {
    fn coord(&self, pair: &Pair) -> Coord {
        self.lines.coord(pair.as_span().start_pos().line_col().0)
    }

    fn external_decls(&self, pair: Pair, decls: &mut Vec<Decl>) -> Result<(), ParseError> {
        for item in pair.into_inner() {
            match item.as_rule() {
                Rule::declaration => decls.extend(self.declaration(item)?),
                Rule::extern_block => self.external_decls(item, decls)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn declaration(&self, pair: Pair) -> Result<Vec<Decl>, ParseError> {
        let coord = self.coord(&pair);
        let mut inner = pair.into_inner();
        let specs = inner.next().ok_or_else(|| self.syntax(&coord, "missing specifiers"))?;
        let (is_typedef, spec) = self.decl_specs(specs)?;
        let mut decls = Vec::new();
        for init in inner.filter(|p| p.as_rule() == Rule::init_declarator) {
            let declarator = init
                .into_inner()
                .next()
                .ok_or_else(|| self.syntax(&coord, "missing declarator"))?;
            let (name, ty) = self.declarator(declarator, DeclType::TypeDecl(spec.clone()))?;
            decls.push(Decl {
                name: Some(name),
                is_typedef,
                ty,
                bitsize: None,
                coord: coord.clone(),
            });
        }
        if decls.is_empty() {
            decls.push(Decl {
                name: None,
                is_typedef,
                ty: DeclType::TypeDecl(spec),
                bitsize: None,
                coord,
            });
        }
        Ok(decls)
    }

    fn decl_specs(&self, pair: Pair) -> Result<(bool, TypeSpec), ParseError> {
        let mut is_typedef = false;
        let mut words = Vec::new();
        let mut spec = None;
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::kw_typedef => is_typedef = true,
                Rule::builtin_types => {
                    for b in p.into_inner() {
                        match b.as_rule() {
                            Rule::builtin => words.push(b.as_str().to_string()),
                            Rule::kw_typedef => is_typedef = true,
                            _ => {}
                        }
                    }
                }
                Rule::type_name => words.push(p.as_str().trim().to_string()),
                Rule::struct_or_union_spec => spec = Some(self.struct_spec(p)?),
                Rule::enum_spec => spec = Some(TypeSpec::Enum(self.enum_spec(p)?)),
                _ => {}
            }
        }
        Ok((is_typedef, spec.unwrap_or(TypeSpec::Identifier(words))))
    }

    fn struct_spec(&self, pair: Pair) -> Result<TypeSpec, ParseError> {
        let coord = self.coord(&pair);
        let mut is_union = false;
        let mut name = None;
        let mut members = None;
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::struct_kw => is_union = p.as_str().starts_with("union"),
                Rule::ident => name = Some(p.as_str().to_string()),
                Rule::member_block => members = Some(self.members(p)?),
                _ => {}
            }
        }
        let spec = StructSpec {
            name,
            members,
            coord,
        };
        Ok(if is_union {
            TypeSpec::Union(spec)
        } else {
            TypeSpec::Struct(spec)
        })
    }

    fn members(&self, pair: Pair) -> Result<Vec<Decl>, ParseError> {
        let mut members = Vec::new();
        for decl in pair.into_inner().filter(|p| p.as_rule() == Rule::member_decl) {
            let coord = self.coord(&decl);
            let mut inner = decl.into_inner();
            let specs = inner.next().ok_or_else(|| self.syntax(&coord, "missing specifiers"))?;
            let (is_typedef, spec) = self.decl_specs(specs)?;
            let mut any = false;
            for member in inner.filter(|p| p.as_rule() == Rule::member_declarator) {
                any = true;
                let mut name = None;
                let mut ty = DeclType::TypeDecl(spec.clone());
                let mut bitsize = None;
                for p in member.into_inner() {
                    match p.as_rule() {
                        Rule::declarator => {
                            let (n, t) = self.declarator(p, DeclType::TypeDecl(spec.clone()))?;
                            name = Some(n);
                            ty = t;
                        }
                        Rule::bitfield => bitsize = Some(expr_text(p.as_str().trim_start_matches(':'))),
                        _ => {}
                    }
                }
                members.push(Decl {
                    name,
                    is_typedef,
                    ty,
                    bitsize,
                    coord: coord.clone(),
                });
            }
            if !any {
                members.push(Decl {
                    name: None,
                    is_typedef,
                    ty: DeclType::TypeDecl(spec),
                    bitsize: None,
                    coord,
                });
            }
        }
        Ok(members)
    }

    fn enum_spec(&self, pair: Pair) -> Result<EnumSpec, ParseError> {
        let coord = self.coord(&pair);
        let mut name = None;
        let mut values = None;
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::ident => name = Some(p.as_str().to_string()),
                Rule::enum_block => {
                    let mut list = Vec::new();
                    for e in p.into_inner() {
                        let mut parts = e.into_inner();
                        let Some(ident) = parts.next() else { continue };
                        list.push(Enumerator {
                            name: ident.as_str().to_string(),
                            value: parts.next().map(|v| expr_text(v.as_str())),
                        });
                    }
                    values = Some(list);
                }
                _ => {}
            }
        }
        Ok(EnumSpec {
            name,
            values,
            coord,
        })
    }

    /// Wrap `base` in the declarator's pointers and suffixes, inside out.
    fn declarator(&self, pair: Pair, base: DeclType) -> Result<(String, DeclType), ParseError> {
        let coord = self.coord(&pair);
        let mut ty = base;
        let mut direct = None;
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::pointer => ty = DeclType::PtrDecl(Box::new(ty)),
                Rule::direct_declarator => direct = Some(p),
                _ => {}
            }
        }
        let direct = direct.ok_or_else(|| self.syntax(&coord, "missing declarator"))?;
        let mut name = None;
        let mut nested = None;
        let mut suffixes = Vec::new();
        for p in direct.into_inner() {
            match p.as_rule() {
                Rule::ident => name = Some(p.as_str().to_string()),
                Rule::declarator => nested = Some(p),
                Rule::array_suffix => {
                    let dim = p
                        .into_inner()
                        .find(|e| e.as_rule() == Rule::const_expr)
                        .map(|e| {
                            let text = expr_text(e.as_str());
                            match parse_int_literal(&text) {
                                Some(n) if n >= 0 => ArrayDim::Literal(n as u64),
                                _ => ArrayDim::Expr(text),
                            }
                        })
                        .unwrap_or(ArrayDim::Unsized);
                    suffixes.push(Suffix::Array(dim));
                }
                Rule::param_suffix => suffixes.push(Suffix::Func),
                _ => {}
            }
        }
        for suffix in suffixes.into_iter().rev() {
            ty = match suffix {
                Suffix::Array(dim) => DeclType::ArrayDecl {
                    dim,
                    inner: Box::new(ty),
                },
                Suffix::Func => DeclType::FuncDecl(Box::new(ty)),
            };
        }
        match (nested, name) {
            (Some(inner), _) => self.declarator(inner, ty),
            (None, Some(name)) => Ok((name, ty)),
            (None, None) => Err(self.syntax(&coord, "declarator without a name")),
        }
    }

    fn syntax(&self, coord: &Coord, message: &str) -> ParseError {
        ParseError::Syntax {
            file: coord.file.display().to_string(),
            message: format!("line {}: {}", coord.line, message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_markers_map_coordinates() {
        let src = "# 1 \"input.c\"\n# 10 \"include/a.h\" 1\n\nstruct a { int x; };\n";
        let (text, map) = strip_directives(src, "input.c");
        assert!(!text.contains('#'));
        let c = map.coord(4);
        assert_eq!(c.file.to_str(), Some("include/a.h"));
        assert_eq!(c.line, 11);
        assert_eq!(map.coord(1).line, 1);
    }

    #[test]
    fn directives_with_continuation_are_blanked() {
        let src = "#define A \\\n  1\nint x;\n";
        let (text, _) = strip_directives(src, "a.h");
        assert_eq!(text, "\n\nint x;\n");
    }

    #[test]
    fn pointer_to_array_vs_array_of_pointers() {
        let unit = parse("int *a[3]; int (*b)[3];", "t.h").unwrap();
        assert!(matches!(
            &unit.decls[0].ty,
            DeclType::ArrayDecl { dim: ArrayDim::Literal(3), inner } if matches!(**inner, DeclType::PtrDecl(_))
        ));
        assert!(matches!(&unit.decls[1].ty, DeclType::PtrDecl(inner) if matches!(**inner, DeclType::ArrayDecl { .. })));
    }

    #[test]
    fn expr_text_drops_comments() {
        assert_eq!(expr_text(" 32 /* max */ "), "32");
        assert_eq!(expr_text("N + 1 // tail\n"), "N + 1");
    }
}
