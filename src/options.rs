//! Run options: the YAML `Options` section merged with command-line flags.

use crate::error::ConfigError;
use crate::platform::Platform;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Preprocessor settings, global or for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CppConfig {
    pub include_dirs: Vec<PathBuf>,
    pub includes: Vec<PathBuf>,
    pub defines: Vec<String>,
    pub undefines: Vec<String>,
    pub arguments: Vec<String>,
}

impl CppConfig {
    pub fn extend(&mut self, other: &CppConfig) {
        self.include_dirs.extend(other.include_dirs.iter().cloned());
        self.includes.extend(other.includes.iter().cloned());
        self.defines.extend(other.defines.iter().cloned());
        self.undefines.extend(other.undefines.iter().cloned());
        self.arguments.extend(other.arguments.iter().cloned());
    }

    /// Command-line arguments for `cpp`.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for dir in &self.include_dirs {
            args.push(format!("-I{}", dir.display()));
        }
        for header in &self.includes {
            args.push("-include".to_string());
            args.push(header.display().to_string());
        }
        args.extend(self.defines.iter().map(|d| format!("-D{}", d)));
        args.extend(self.undefines.iter().map(|u| format!("-U{}", u)));
        args.extend(self.arguments.iter().cloned());
        args
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FileSection {
    pub name: PathBuf,
    #[serde(flatten)]
    pub cpp: CppConfig,
}

/// The `Options:` block of a YAML document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OptionsSection {
    pub verbose: Option<bool>,
    pub debug: Option<bool>,
    pub strict: Option<bool>,
    pub output_dir: Option<PathBuf>,
    pub output_file: Option<PathBuf>,
    pub generate_placeholders: Option<bool>,
    pub use_cpp: Option<bool>,
    pub cpp_path: Option<PathBuf>,
    pub excludes: Vec<PathBuf>,
    pub platforms: Vec<String>,
    #[serde(flatten)]
    pub cpp: CppConfig,
    pub files: Vec<FileSection>,
}

pub const DEFAULT_PLACEHOLDERS: &str = "placeholders.yml";

#[derive(Debug, Clone)]
pub struct Options {
    pub verbose: bool,
    pub debug: bool,
    /// Abort the run on the first failing file.
    pub strict: bool,
    pub output_dir: PathBuf,
    /// Write everything into this single file instead of `output_dir`.
    pub output_file: Option<PathBuf>,
    /// Where to write a YAML skeleton for structs without rules.
    pub placeholders: Option<PathBuf>,
    pub use_cpp: bool,
    pub cpp_path: PathBuf,
    pub excludes: Vec<PathBuf>,
    pub platforms: Vec<String>,
    pub cpp: CppConfig,
    pub files: Vec<FileSection>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            verbose: false,
            debug: false,
            strict: false,
            output_dir: PathBuf::from("."),
            output_file: None,
            placeholders: None,
            use_cpp: true,
            cpp_path: PathBuf::from("cpp"),
            excludes: Vec::new(),
            platforms: Vec::new(),
            cpp: CppConfig::default(),
            files: Vec::new(),
        }
    }
}

impl Options {
    /// Merge a YAML section: scalars overwrite, lists extend.
    pub fn update(&mut self, section: OptionsSection) {
        if let Some(v) = section.verbose {
            self.verbose = v;
        }
        if let Some(v) = section.debug {
            self.debug = v;
        }
        if let Some(v) = section.strict {
            self.strict = v;
        }
        if let Some(dir) = section.output_dir {
            self.output_dir = dir;
        }
        if section.output_file.is_some() {
            self.output_file = section.output_file;
        }
        if section.generate_placeholders == Some(true) && self.placeholders.is_none() {
            self.placeholders = Some(PathBuf::from(DEFAULT_PLACEHOLDERS));
        }
        if let Some(v) = section.use_cpp {
            self.use_cpp = v;
        }
        if let Some(path) = section.cpp_path {
            self.cpp_path = path;
        }
        self.excludes.extend(section.excludes);
        for name in section.platforms {
            if !self.platforms.contains(&name) {
                self.platforms.push(name);
            }
        }
        self.cpp.extend(&section.cpp);
        self.files.extend(section.files);
    }

    /// Preprocessor settings for `file`: the defaults plus every matching `files` entry.
    pub fn match_file(&self, file: &Path) -> CppConfig {
        let mut cpp = self.cpp.clone();
        for entry in self.files.iter().filter(|f| file.ends_with(&f.name)) {
            cpp.extend(&entry.cpp);
        }
        cpp
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        self.excludes
            .iter()
            .any(|e| path.starts_with(e) || path.ends_with(e))
    }

    /// Configured platforms, or the host platform when none are named.
    pub fn resolve_platforms(&self) -> Result<Vec<Rc<Platform>>, ConfigError> {
        if self.platforms.is_empty() {
            return Ok(vec![Rc::new(Platform::host())]);
        }
        self.platforms
            .iter()
            .map(|name| {
                Platform::by_name(name)
                    .map(Rc::new)
                    .ok_or_else(|| ConfigError::UnknownPlatform(name.clone()))
            })
            .collect()
    }
}
