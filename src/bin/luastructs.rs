//! Generate Wireshark Lua dissectors from C headers.
//!
//! Usage:
//!   luastructs [OPTIONS] <INPUT>...
//!
//! Inputs are `.h`/`.c` files or directories searched recursively. Rules and
//! run options come from YAML files given with `-c`; flags on the command line
//! override the YAML `Options` section.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use luastructs::{ConfigSet, Generator, Options};

#[derive(Parser, Debug)]
#[command(name = "luastructs", version, about = "Generate Wireshark Lua dissectors from C structs")]
struct Args {
    /// C header or source files, or directories to search
    #[arg(required = true)]
    input: Vec<PathBuf>,

    /// YAML rules and options (repeatable; later files win)
    #[arg(short = 'c', long = "config")]
    config: Vec<PathBuf>,

    /// Directory for the generated `.lua` files
    #[arg(short = 'o', long)]
    output_dir: Option<PathBuf>,

    /// Write every dissector into this one file instead
    #[arg(long)]
    output_file: Option<PathBuf>,

    /// Target platform (repeatable; default: the host)
    #[arg(short = 'p', long = "platform")]
    platform: Vec<String>,

    /// Read inputs as-is instead of running the C preprocessor
    #[arg(long)]
    no_cpp: bool,

    /// Preprocessor executable
    #[arg(long)]
    cpp_path: Option<PathBuf>,

    /// Skip inputs under this path (repeatable)
    #[arg(short = 'x', long = "exclude")]
    exclude: Vec<PathBuf>,

    /// Write a YAML rules skeleton for structs without rules
    #[arg(long, value_name = "FILE")]
    placeholders: Option<PathBuf>,

    /// Stop at the first file that fails
    #[arg(short = 's', long)]
    strict: bool,

    /// Verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    /// Command-line flags on top of the YAML options.
    fn apply(&self, options: &mut Options) {
        if let Some(dir) = &self.output_dir {
            options.output_dir = dir.clone();
        }
        if self.output_file.is_some() {
            options.output_file = self.output_file.clone();
        }
        for name in &self.platform {
            if !options.platforms.contains(name) {
                options.platforms.push(name.clone());
            }
        }
        if self.no_cpp {
            options.use_cpp = false;
        }
        if let Some(path) = &self.cpp_path {
            options.cpp_path = path.clone();
        }
        options.excludes.extend(self.exclude.iter().cloned());
        if self.placeholders.is_some() {
            options.placeholders = self.placeholders.clone();
        }
        options.strict |= self.strict;
    }
}

fn init_logging(verbose: u8, options: &Options) {
    let level = match verbose {
        0 if options.debug => "debug",
        0 if options.verbose => "info",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into()))
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut options = Options::default();
    let mut configs = ConfigSet::new();
    for path in &args.config {
        configs
            .load_file(path, &mut options)
            .with_context(|| format!("Failed to load rules: {}", path.display()))?;
    }
    args.apply(&mut options);
    init_logging(args.verbose, &options);

    let mut generator = Generator::new(options, configs).context("Invalid options")?;
    let summary = generator.run(&args.input)?;
    for (file, error) in &summary.failed {
        eprintln!("{}: {}", file.display(), error);
    }
    if generator.registry().is_empty() {
        bail!("no structs found in {} file(s)", summary.parsed);
    }

    let files = generator.generate();
    let written = generator.write(&files).context("Failed to write dissectors")?;
    eprintln!(
        "Generated {} dissector(s) for {} platform(s) into {} file(s)",
        files.len() - 1,
        generator.platforms().len(),
        written.len()
    );
    if let Some(path) = generator.write_placeholders()? {
        eprintln!("Wrote rules skeleton to {}", path.display());
    }
    Ok(())
}
