//! Benchmark: parse a synthetic header of nested structs, build protocols for
//! three platforms, generate the Lua, and decode a record with the preview.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use luastructs::{parse, ConfigSet, Generator, Options};

const STRUCTS: usize = 200;
const PLATFORMS: &[&str] = &["Win32", "Linux-x86-64", "Solaris-SPARC"];

const RULES: &str = r#"
Structs:
  - name: record_0
    id: [1]
    ranges:
      - type: int
        min: 0
        max: 1000
    enums:
      - member: kind
        values: [IDLE, BUSY, DONE]
"#;

fn header() -> String {
    let mut src = String::from("enum kind { IDLE, BUSY, DONE };\n");
    for i in 0..STRUCTS {
        src.push_str(&format!(
            "struct record_{i} {{\n    unsigned short id;\n    enum kind kind;\n    double stamp;\n    char tag[{}];\n    int samples[4][2];\n",
            i % 7 + 1
        ));
        if i > 0 {
            src.push_str(&format!("    struct record_{} prev;\n", i - 1));
        }
        src.push_str("    union { float f; long l; } any;\n};\n");
    }
    src
}

fn generator() -> Generator {
    let mut options = Options {
        use_cpp: false,
        platforms: PLATFORMS.iter().map(|p| p.to_string()).collect(),
        ..Options::default()
    };
    let mut configs = ConfigSet::new();
    configs.load_str(RULES, None, &mut options).expect("rules");
    Generator::new(options, configs).expect("generator")
}

fn bench_generate(c: &mut Criterion) {
    let src = header();

    c.bench_function("parse_header", |b| {
        b.iter(|| black_box(parse(black_box(&src), "bench.h").expect("parse")))
    });

    c.bench_function("build_protocols", |b| {
        b.iter(|| {
            let mut g = generator();
            black_box(g.add_source(&src, "bench.h").expect("build"))
        })
    });

    c.bench_function("generate_lua", |b| {
        b.iter(|| {
            let mut g = generator();
            g.add_source(&src, "bench.h").expect("build");
            black_box(g.generate())
        })
    });

    let mut g = generator();
    g.add_source(&src, "bench.h").expect("build");
    let last = format!("record_{}", STRUCTS - 1);
    let size = g
        .registry()
        .get(&last)
        .and_then(|p| p.dissector("Linux-x86-64"))
        .map(|d| d.size())
        .expect("record");
    let bytes: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    c.bench_function("preview_nested_record", |b| {
        b.iter(|| black_box(g.preview(&last, "Linux-x86-64", black_box(&bytes))))
    });
}

criterion_group!(benches, bench_generate);
criterion_main!(benches);
