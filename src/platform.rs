//! Target platforms: C type sizes, alignments, wire types, byte order and dispatch flag.
//!
//! Every generated dissector is specific to one platform. The delegator uses the
//! platform's `flag` (second byte of the message header) to pick the right one.

use crate::field::WireType;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

/// Integer widths that differ between data models.
#[derive(Debug, Clone, Copy)]
struct DataModel {
    long: usize,
    pointer: usize,
    wchar: usize,
    long_double: (usize, usize),
    /// Alignment of 8-byte scalars (`double`, `long long`); i386 System V uses 4.
    align8: usize,
}

const ILP32: DataModel = DataModel {
    long: 4,
    pointer: 4,
    wchar: 4,
    long_double: (8, 8),
    align8: 8,
};

const LP64: DataModel = DataModel {
    long: 8,
    pointer: 8,
    wchar: 4,
    long_double: (16, 16),
    align8: 8,
};

/// A target ABI plus the flag identifying it on the wire.
#[derive(Debug, Clone)]
pub struct Platform {
    pub name: String,
    pub flag: u8,
    pub endian: Endian,
    sizes: HashMap<String, usize>,
    alignments: HashMap<String, usize>,
    types: HashMap<String, WireType>,
}

fn int_type(size: usize, signed: bool) -> WireType {
    match (size, signed) {
        (1, true) => WireType::Int8,
        (1, false) => WireType::Uint8,
        (2, true) => WireType::Int16,
        (2, false) => WireType::Uint16,
        (4, true) => WireType::Int32,
        (4, false) => WireType::Uint32,
        (_, true) => WireType::Int64,
        (_, false) => WireType::Uint64,
    }
}

impl Platform {
    fn with_model(name: &str, flag: u8, endian: Endian, model: DataModel) -> Self {
        let mut p = Platform {
            name: name.to_string(),
            flag,
            endian,
            sizes: HashMap::new(),
            alignments: HashMap::new(),
            types: HashMap::new(),
        };
        let fixed: &[(&str, usize, WireType)] = &[
            ("char", 1, WireType::String),
            ("signed char", 1, WireType::Int8),
            ("unsigned char", 1, WireType::Uint8),
            ("_Bool", 1, WireType::Bool),
            ("bool", 1, WireType::Bool),
            ("short", 2, WireType::Int16),
            ("unsigned short", 2, WireType::Uint16),
            ("int", 4, WireType::Int32),
            ("unsigned int", 4, WireType::Uint32),
            ("long long", 8, WireType::Int64),
            ("unsigned long long", 8, WireType::Uint64),
            ("float", 4, WireType::Float),
            ("double", 8, WireType::Double),
            ("enum", 4, WireType::Uint32),
            ("int8_t", 1, WireType::Int8),
            ("uint8_t", 1, WireType::Uint8),
            ("int16_t", 2, WireType::Int16),
            ("uint16_t", 2, WireType::Uint16),
            ("int32_t", 4, WireType::Int32),
            ("uint32_t", 4, WireType::Uint32),
            ("int64_t", 8, WireType::Int64),
            ("uint64_t", 8, WireType::Uint64),
        ];
        for (ctype, size, wire) in fixed {
            p.insert(ctype, *size, *size, *wire);
        }
        p.insert("long", model.long, model.long, int_type(model.long, true));
        p.insert("unsigned long", model.long, model.long, int_type(model.long, false));
        p.insert("pointer", model.pointer, model.pointer, int_type(model.pointer, false));
        p.insert("size_t", model.pointer, model.pointer, int_type(model.pointer, false));
        p.insert("ssize_t", model.pointer, model.pointer, int_type(model.pointer, true));
        p.insert("ptrdiff_t", model.pointer, model.pointer, int_type(model.pointer, true));
        p.insert("intptr_t", model.pointer, model.pointer, int_type(model.pointer, true));
        p.insert("uintptr_t", model.pointer, model.pointer, int_type(model.pointer, false));
        p.insert("wchar_t", model.wchar, model.wchar, int_type(model.wchar, model.wchar == 4));
        let (ld_size, ld_align) = model.long_double;
        p.insert("long double", ld_size, ld_align, WireType::Bytes);
        for ctype in ["double", "long long", "unsigned long long", "int64_t", "uint64_t"] {
            p.alignments.insert(ctype.to_string(), model.align8);
        }
        if model.long == 8 {
            for ctype in ["long", "unsigned long"] {
                p.alignments.insert(ctype.to_string(), model.align8);
            }
        }
        // Strings are sized per member; only the wire type is fixed.
        p.types.insert("string".to_string(), WireType::String);
        p.alignments.insert("string".to_string(), 1);
        p
    }

    fn insert(&mut self, ctype: &str, size: usize, alignment: usize, wire: WireType) {
        self.sizes.insert(ctype.to_string(), size);
        self.alignments.insert(ctype.to_string(), alignment);
        self.types.insert(ctype.to_string(), wire);
    }

    /// All built-in platforms, in dispatch flag order.
    pub fn builtin() -> Vec<Platform> {
        let i386 = DataModel {
            long_double: (12, 4),
            align8: 4,
            ..ILP32
        };
        let llp64 = DataModel {
            long: 4,
            wchar: 2,
            long_double: (8, 8),
            ..LP64
        };
        vec![
            Platform::with_model("default", 0, Endian::Big, ILP32),
            Platform::with_model("Win32", 1, Endian::Little, DataModel { wchar: 2, ..ILP32 }),
            Platform::with_model("Win64", 2, Endian::Little, llp64),
            Platform::with_model(
                "Solaris-SPARC",
                3,
                Endian::Big,
                DataModel {
                    long_double: (16, 8),
                    ..ILP32
                },
            ),
            Platform::with_model("Macos", 4, Endian::Little, LP64),
            Platform::with_model("Linux-x86", 5, Endian::Little, i386),
            Platform::with_model("Solaris-x86-64", 6, Endian::Little, LP64),
            Platform::with_model("Linux-x86-64", 7, Endian::Little, LP64),
        ]
    }

    /// Look up a built-in platform by its configuration name.
    pub fn by_name(name: &str) -> Option<Platform> {
        Platform::builtin().into_iter().find(|p| p.name == name)
    }

    /// The platform matching the machine running the generator.
    pub fn host() -> Platform {
        let name = if cfg!(target_os = "windows") {
            if cfg!(target_pointer_width = "64") {
                "Win64"
            } else {
                "Win32"
            }
        } else if cfg!(target_os = "macos") {
            "Macos"
        } else if cfg!(target_os = "solaris") {
            "Solaris-x86-64"
        } else if cfg!(target_os = "linux") {
            if cfg!(target_pointer_width = "64") {
                "Linux-x86-64"
            } else {
                "Linux-x86"
            }
        } else {
            "default"
        };
        Platform::by_name(name).unwrap_or_else(Platform::default_platform)
    }

    pub fn default_platform() -> Platform {
        Platform::with_model("default", 0, Endian::Big, ILP32)
    }

    pub fn size_of(&self, ctype: &str) -> Option<usize> {
        self.sizes.get(ctype).copied()
    }

    pub fn alignment_of(&self, ctype: &str) -> Option<usize> {
        self.alignments.get(ctype).copied()
    }

    pub fn map_type(&self, ctype: &str) -> Option<WireType> {
        self.types.get(ctype).copied()
    }
}

impl PartialEq for Platform {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.flag == other.flag
    }
}

/// Canonical spelling of an integer type: `unsigned` -> `unsigned int`,
/// `long int` -> `long`, `signed short` -> `short`.
pub fn normalize_ctype(ctype: &str) -> String {
    let mut words: Vec<&str> = ctype.split_whitespace().collect();
    if words.contains(&"signed") && !words.contains(&"char") {
        words.retain(|w| *w != "signed");
        if words.is_empty() {
            return "int".to_string();
        }
    }
    if words == ["unsigned"] {
        return "unsigned int".to_string();
    }
    if words.len() > 1 && words.contains(&"int") {
        words.retain(|w| *w != "int");
    }
    words.join(" ")
}
