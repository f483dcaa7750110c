//! C parser tests: the declarations real headers contain after `cpp`.

use luastructs::ast::{ArrayDim, Coord, DeclType, TypeSpec};
use luastructs::{parse, ConfigSet, Generator, Options, ParseError};

const LINUX: &str = "Linux-x86-64";

fn generator(yaml: &str) -> Generator {
    let mut options = Options {
        use_cpp: false,
        platforms: vec![LINUX.to_string()],
        ..Options::default()
    };
    let mut configs = ConfigSet::new();
    configs.load_str(yaml, None, &mut options).expect("rules");
    Generator::new(options, configs).expect("generator")
}

fn struct_names(src: &str) -> Vec<String> {
    let mut g = generator("");
    g.add_source(src, "input.h").expect("parse");
    g.registry().iter().map(|p| p.name.clone()).collect()
}

#[test]
fn test_syntax_error_names_file() {
    let err = parse("struct broken { int a }", "bad.h").unwrap_err();
    match err {
        ParseError::Syntax { file, message } => {
            assert_eq!(file, "bad.h");
            assert!(!message.is_empty());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_line_markers_point_into_headers() {
    let src = r#"# 1 "main.c"
# 1 "include/net.h" 1
struct hdr {
  int a;
};
# 5 "main.c" 2
struct body { int b; };
"#;
    let unit = parse(src, "main.c").unwrap();
    assert_eq!(unit.decls.len(), 2);
    let coords: Vec<Coord> = unit
        .decls
        .iter()
        .map(|d| match d.ty.spec() {
            TypeSpec::Struct(s) => s.coord.clone(),
            other => panic!("expected a struct, got {other:?}"),
        })
        .collect();
    assert_eq!(coords, vec![Coord::new("include/net.h", 1), Coord::new("main.c", 5)]);
}

#[test]
fn test_same_header_through_different_paths() {
    assert_eq!(Coord::new("include/../include/./a.h", 3), Coord::new("include/a.h", 3));
    assert_eq!(Coord::new("../a.h", 1).file.to_str(), Some("../a.h"));
}

#[test]
fn test_multiple_declarators() {
    let unit = parse("struct a { int x, y[2], *z; };", "a.h").unwrap();
    let TypeSpec::Struct(spec) = unit.decls[0].ty.spec() else {
        panic!("expected a struct");
    };
    let members = spec.members.as_ref().unwrap();
    let names: Vec<&str> = members.iter().filter_map(|m| m.name.as_deref()).collect();
    assert_eq!(names, vec!["x", "y", "z"]);
    assert!(matches!(&members[0].ty, DeclType::TypeDecl(TypeSpec::Identifier(words)) if words == &["int"]));
    assert!(matches!(&members[1].ty, DeclType::ArrayDecl { dim: ArrayDim::Literal(2), .. }));
    assert!(matches!(&members[2].ty, DeclType::PtrDecl(_)));

    let mut g = generator("");
    g.add_source("struct a { int x, y[2], *z; };", "a.h").unwrap();
    let d = g.registry().get("a").unwrap().dissector(LINUX).unwrap();
    assert_eq!(d.layout(0), vec![0, 4, 16]);
    assert_eq!(d.size(), 24);
}

#[test]
fn test_array_dimensions() {
    let unit = parse("char a[0x10]; char b[N + 1]; char c[];", "dims.h").unwrap();
    let dims: Vec<ArrayDim> = unit
        .decls
        .iter()
        .map(|d| match &d.ty {
            DeclType::ArrayDecl { dim, .. } => dim.clone(),
            other => panic!("expected an array, got {other:?}"),
        })
        .collect();
    assert_eq!(
        dims,
        vec![ArrayDim::Literal(16), ArrayDim::Expr("N + 1".to_string()), ArrayDim::Unsized]
    );
}

#[test]
fn test_multiword_builtins() {
    let unit = parse("unsigned long long int a; const signed char b;", "w.h").unwrap();
    let words: Vec<Vec<String>> = unit
        .decls
        .iter()
        .map(|d| match d.ty.spec() {
            TypeSpec::Identifier(words) => words.clone(),
            other => panic!("expected builtin words, got {other:?}"),
        })
        .collect();
    assert_eq!(words[0], vec!["unsigned", "long", "long", "int"]);
    assert_eq!(words[1], vec!["signed", "char"]);
}

#[test]
fn test_functions_are_skipped() {
    let src = r#"
        struct s { int x; };
        int prototype(struct s *p, int n);
        static int helper(int a) { if (a) { return a; } return 0; }
        int old_style(a) int a; { return a; }
    "#;
    assert_eq!(struct_names(src), vec!["s"]);
}

#[test]
fn test_gnu_decorations_are_ignored() {
    let src = r#"
        __extension__ typedef unsigned long long u64;
        struct __attribute__((packed)) p {
            char c;
            u64 v __attribute__((aligned (8)));
        } __attribute__ ((aligned(8)));
        extern int __attribute__((visibility("default"))) counter;
    "#;
    let mut g = generator("");
    assert_eq!(g.add_source(src, "gnu.h").unwrap(), vec!["p"]);
    let d = g.registry().get("p").unwrap().dissector(LINUX).unwrap();
    assert_eq!(d.layout(0), vec![0, 8]);
    assert_eq!(d.size(), 16);
}

#[test]
fn test_extern_c_block_and_static_assert() {
    let src = r#"
        extern "C" {
            struct e { int a; };
            _Static_assert(sizeof(struct e) == 4, "size of e");
        }
        static_assert(1, "plain");
    "#;
    assert_eq!(struct_names(src), vec!["e"]);
}

#[test]
fn test_comments_everywhere() {
    let src = r#"
        /* leading */
        struct c { // trailing
            int /* inline */ a;
            char b[4 /* four */];
        };
        enum mode { OFF = 0 /* off */, ON = 1 // on
        };
    "#;
    let unit = parse(src, "c.h").unwrap();
    let TypeSpec::Struct(spec) = unit.decls[0].ty.spec() else {
        panic!("expected a struct");
    };
    let members = spec.members.as_ref().unwrap();
    assert!(matches!(&members[1].ty, DeclType::ArrayDecl { dim: ArrayDim::Literal(4), .. }));
    let TypeSpec::Enum(mode) = unit.decls[1].ty.spec() else {
        panic!("expected an enum");
    };
    let values: Vec<Option<&str>> = mode.values.as_ref().unwrap().iter().map(|e| e.value.as_deref()).collect();
    assert_eq!(values, vec![Some("0"), Some("1")]);
}

#[test]
fn test_typedef_chain_keeps_spelled_name_for_rules() {
    let rules = r#"
Structs:
  - name: t
    ranges:
      - type: level_t
        max: 9
"#;
    let src = r#"
        typedef unsigned int u32;
        typedef u32 level_t;
        struct t { level_t lvl; u32 raw; };
    "#;
    let mut g = generator(rules);
    g.add_source(src, "t.h").unwrap();
    let d = g.registry().get("t").unwrap().dissector(LINUX).unwrap();
    assert_eq!(d.size(), 8);

    let files = g.generate();
    let lua = &files.iter().find(|f| f.name == "t").unwrap().content;
    assert!(lua.contains("ProtoField.uint32(\"t.lvl\", \"lvl\")"));
    assert_eq!(lua.matches("Should be <= 9").count(), 1);
}

#[test]
fn test_nested_definitions_are_built_first() {
    let src = r#"
        struct outer {
            struct inner { int a; } in;
            union { short s; char c; } u;
            int b;
        };
    "#;
    assert_eq!(struct_names(src), vec!["inner", "outer"]);
}

#[test]
fn test_typedef_of_anonymous_struct_takes_alias_name() {
    let unit = parse("typedef struct { int a; } alias_t;", "alias.h").unwrap();
    let decl = &unit.decls[0];
    assert!(decl.is_typedef);
    assert_eq!(decl.name.as_deref(), Some("alias_t"));
    assert_eq!(struct_names("typedef struct { int a; } alias_t;"), vec!["alias_t"]);
}
