//! Feed arbitrary text to the C parser and, when it parses, to the struct
//! builder. Neither may panic.
//! Run with: cargo fuzz run c_parser

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let Ok(src) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(unit) = luastructs::parse(src, "fuzz.h") else {
        return;
    };
    let Ok(platforms) = luastructs::Options::default().resolve_platforms() else {
        return;
    };
    let mut registry = luastructs::ProtocolRegistry::new();
    let _ = luastructs::find_structs(&unit, &luastructs::ConfigSet::new(), &platforms, &mut registry);
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run c_parser");
}
