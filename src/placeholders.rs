//! YAML skeleton listing every built struct that has no rules yet.

use crate::config::ConfigSet;
use crate::dissector::ProtocolRegistry;
use std::fmt::Write;

const PREAMBLE: &str = "\
Options:
    platforms: []
    verbose:
    debug:
    strict:
    excludes: []
    use_cpp:
    cpp_path:
    include_dirs: []
    includes: []
    defines: []
    undefines: []
    arguments: []
    files: []

Structs:
";

/// The skeleton text and how many structs it lists.
pub fn generate_placeholders(registry: &ProtocolRegistry, configs: &ConfigSet) -> (String, usize) {
    let mut text = PREAMBLE.to_string();
    let mut count = 0;
    for proto in registry.iter().filter(|p| configs.get(&p.name).is_none()) {
        count += 1;
        let _ = writeln!(text, "  - name: {} # {}", proto.name, proto.coord);
        for key in ["id", "description"] {
            let _ = writeln!(text, "    {}:", key);
        }
        for key in ["ranges", "enums", "bitstrings", "trailers"] {
            let _ = writeln!(text, "    {}: []", key);
        }
        text.push('\n');
    }
    (text, count)
}
