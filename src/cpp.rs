//! Runs the C preprocessor over an input file.

use crate::error::ParseError;
use crate::options::CppConfig;
use std::ffi::OsString;
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Arguments for preprocessing `file`: configured flags, the file's own
/// directory as an include path, then the file.
pub fn command_args(file: &Path, cpp: &CppConfig) -> Vec<OsString> {
    let mut args: Vec<OsString> = cpp.args().into_iter().map(OsString::from).collect();
    if let Some(dir) = file.parent().filter(|d| !d.as_os_str().is_empty()) {
        let mut include = OsString::from("-I");
        include.push(dir);
        args.push(include);
    }
    args.push(file.as_os_str().to_owned());
    args
}

/// Preprocessed text of `file`, with line markers.
pub fn preprocess(cpp_path: &Path, file: &Path, cpp: &CppConfig) -> Result<String, ParseError> {
    let args = command_args(file, cpp);
    debug!(cpp = %cpp_path.display(), ?args, "running preprocessor");
    let failed = |message: String| ParseError::Preprocessor {
        file: file.display().to_string(),
        message,
    };
    let output = Command::new(cpp_path)
        .args(&args)
        .output()
        .map_err(|e| failed(format!("{}: {}", cpp_path.display(), e)))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(failed(format!("{}: {}", output.status, stderr.trim())));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn args_include_file_directory() {
        let cpp = CppConfig {
            defines: vec!["DEBUG".to_string()],
            ..CppConfig::default()
        };
        let args = command_args(Path::new("inc/a.h"), &cpp);
        assert_eq!(args, vec![OsString::from("-DDEBUG"), OsString::from("-Iinc"), OsString::from("inc/a.h")]);
        assert_eq!(command_args(Path::new("a.h"), &CppConfig::default()), vec![OsString::from("a.h")]);
    }

    #[test]
    fn missing_preprocessor() {
        let err = preprocess(
            &PathBuf::from("/nonexistent/luastructs-cpp"),
            Path::new("a.h"),
            &CppConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::Preprocessor { file, .. } if file == "a.h"));
    }
}
