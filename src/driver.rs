//! End-to-end run: collect C inputs, preprocess, parse, build protocols and
//! write the Lua dissectors.

use crate::builder::find_structs;
use crate::config::ConfigSet;
use crate::cpp;
use crate::delegator::{Delegator, DELEGATOR_NAME};
use crate::dissector::ProtocolRegistry;
use crate::error::Error;
use crate::options::Options;
use crate::parser;
use crate::placeholders::generate_placeholders;
use crate::platform::Platform;
use crate::preview::{preview, Decoded, PreviewError};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, info, warn};

const INPUT_EXTENSIONS: &[&str] = &["h", "c"];

/// One generated Lua file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    /// Struct name, or the delegator's name.
    pub name: String,
    pub content: String,
}

#[derive(Debug, Default)]
pub struct Summary {
    pub parsed: usize,
    pub structs: usize,
    /// Files that failed, when not running strict.
    pub failed: Vec<(PathBuf, Error)>,
}

pub struct Generator {
    options: Options,
    configs: ConfigSet,
    platforms: Vec<Rc<Platform>>,
    registry: ProtocolRegistry,
}

impl Generator {
    pub fn new(options: Options, configs: ConfigSet) -> Result<Self, Error> {
        let platforms = options.resolve_platforms()?;
        debug!(platforms = ?platforms.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(), "target platforms");
        Ok(Generator {
            options,
            configs,
            platforms,
            registry: ProtocolRegistry::new(),
        })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn registry(&self) -> &ProtocolRegistry {
        &self.registry
    }

    pub fn platforms(&self) -> &[Rc<Platform>] {
        &self.platforms
    }

    /// Expand directories into their `.h`/`.c` files, drop excluded paths.
    pub fn collect_inputs(&self, inputs: &[PathBuf]) -> Result<Vec<PathBuf>, Error> {
        let mut files = Vec::new();
        for input in inputs {
            let meta = fs::metadata(input).map_err(|e| Error::io(input, e))?;
            if meta.is_dir() {
                let mut found = Vec::new();
                walk_dir(input, &mut found)?;
                found.sort();
                files.extend(found);
            } else {
                files.push(input.clone());
            }
        }
        files.retain(|f| {
            let excluded = self.options.is_excluded(f);
            if excluded {
                debug!(file = %f.display(), "excluded");
            }
            !excluded
        });
        Ok(files)
    }

    /// Preprocess (unless disabled), parse and build the structs of one file.
    pub fn parse_file(&mut self, path: &Path) -> Result<Vec<String>, Error> {
        let source = if self.options.use_cpp {
            let cpp = self.options.match_file(path);
            cpp::preprocess(&self.options.cpp_path, path, &cpp)?
        } else {
            fs::read_to_string(path).map_err(|e| Error::io(path, e))?
        };
        self.add_source(&source, &path.display().to_string())
    }

    /// Parse already preprocessed C text and build its structs.
    pub fn add_source(&mut self, source: &str, filename: &str) -> Result<Vec<String>, Error> {
        let unit = parser::parse(source, filename)?;
        let built = find_structs(&unit, &self.configs, &self.platforms, &mut self.registry)?;
        info!(file = filename, structs = built.len(), "parsed");
        Ok(built)
    }

    /// Parse every input; a failing file aborts only in strict mode.
    pub fn run(&mut self, inputs: &[PathBuf]) -> Result<Summary, Error> {
        let mut summary = Summary::default();
        for file in self.collect_inputs(inputs)? {
            match self.parse_file(&file) {
                Ok(built) => {
                    summary.parsed += 1;
                    summary.structs += built.len();
                }
                Err(e) if self.options.strict => return Err(e),
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "skipping file");
                    summary.failed.push((file, e));
                }
            }
        }
        Ok(summary)
    }

    /// Lua for the delegator, then one file per protocol in build order.
    pub fn generate(&mut self) -> Vec<OutputFile> {
        let mut files = vec![OutputFile {
            name: DELEGATOR_NAME.to_string(),
            content: Delegator::new(&self.platforms).generate(),
        }];
        for proto in self.registry.iter_mut() {
            files.push(OutputFile {
                name: proto.name.clone(),
                content: proto.generate(),
            });
        }
        files
    }

    /// Write `files` to `output_file`, or one `<name>.lua` each under `output_dir`.
    pub fn write(&self, files: &[OutputFile]) -> Result<Vec<PathBuf>, Error> {
        if let Some(path) = &self.options.output_file {
            create_parent(path)?;
            let content: Vec<&str> = files.iter().map(|f| f.content.as_str()).collect();
            fs::write(path, content.join("\n")).map_err(|e| Error::io(path, e))?;
            info!(path = %path.display(), protocols = files.len(), "wrote dissectors");
            return Ok(vec![path.clone()]);
        }
        let dir = &self.options.output_dir;
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        let mut written = Vec::with_capacity(files.len());
        for file in files {
            let path = dir.join(format!("{}.lua", file.name));
            fs::write(&path, &file.content).map_err(|e| Error::io(&path, e))?;
            debug!(path = %path.display(), "wrote dissector");
            written.push(path);
        }
        info!(dir = %dir.display(), files = written.len(), "wrote dissectors");
        Ok(written)
    }

    /// Write the rules skeleton when requested and at least one struct lacks rules.
    pub fn write_placeholders(&self) -> Result<Option<PathBuf>, Error> {
        let Some(path) = &self.options.placeholders else {
            return Ok(None);
        };
        let (text, count) = generate_placeholders(&self.registry, &self.configs);
        if count == 0 {
            return Ok(None);
        }
        create_parent(path)?;
        fs::write(path, text).map_err(|e| Error::io(path, e))?;
        info!(path = %path.display(), structs = count, "wrote placeholders");
        Ok(Some(path.clone()))
    }

    /// Decode `bytes` as struct `name` on `platform`.
    pub fn preview(&self, name: &str, platform: &str, bytes: &[u8]) -> Result<Decoded, PreviewError> {
        let dissector = self
            .registry
            .get(name)
            .and_then(|p| p.dissector(platform))
            .ok_or_else(|| PreviewError::UnknownProtocol {
                name: name.to_string(),
                platform: platform.to_string(),
            })?;
        preview(dissector, &self.registry, bytes)
    }
}

fn walk_dir(dir: &Path, found: &mut Vec<PathBuf>) -> Result<(), Error> {
    for entry in fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let path = entry.map_err(|e| Error::io(dir, e))?.path();
        if path.is_dir() {
            walk_dir(&path, found)?;
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| INPUT_EXTENSIONS.contains(&e))
        {
            found.push(path);
        }
    }
    Ok(())
}

fn create_parent(path: &Path) -> Result<(), Error> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => fs::create_dir_all(parent).map_err(|e| Error::io(parent, e)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator(platforms: &[&str]) -> Generator {
        let options = Options {
            use_cpp: false,
            platforms: platforms.iter().map(|p| p.to_string()).collect(),
            ..Options::default()
        };
        Generator::new(options, ConfigSet::new()).unwrap()
    }

    #[test]
    fn delegator_comes_first() {
        let mut g = generator(&["Win32", "Solaris-SPARC"]);
        g.add_source("struct a { int x; };\nstruct b { struct a inner; char c; };", "ab.h")
            .unwrap();
        let files = g.generate();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["luastructs", "a", "b"]);
        assert!(files[2].content.contains("Dissector.get(\"a.solaris_sparc\")"));
    }

    #[test]
    fn collect_skips_excluded_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("a.h"), "").unwrap();
        fs::write(dir.path().join("sub/b.c"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        fs::write(dir.path().join("skip.h"), "").unwrap();

        let mut g = generator(&[]);
        g.options.excludes.push(PathBuf::from("skip.h"));
        let files = g.collect_inputs(&[dir.path().to_path_buf()]).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|f| f.strip_prefix(dir.path()).unwrap().display().to_string())
            .collect();
        assert_eq!(names, vec!["a.h", "sub/b.c"]);
    }

    #[test]
    fn lenient_and_strict_runs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.h"), "struct broken { int x; ").unwrap();
        fs::write(dir.path().join("good.h"), "struct fine { int x; };").unwrap();
        let inputs = vec![dir.path().to_path_buf()];

        let mut lenient = generator(&[]);
        let summary = lenient.run(&inputs).unwrap();
        assert_eq!(summary.parsed, 1);
        assert_eq!(summary.failed.len(), 1);
        assert!(lenient.registry().get("fine").is_some());

        let mut strict = generator(&[]);
        strict.options.strict = true;
        assert!(strict.run(&inputs).is_err());
    }
}
