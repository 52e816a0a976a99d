#![deny(clippy::all)]

use anyhow::Context;
use cppc::{CompatMode, Options, Target};
use log::LevelFilter;
use simple_logger::SimpleLogger;
use std::{fs, path::PathBuf, process};
use structopt::StructOpt;

/// cppc executable: compiles one C++ translation unit to a relocatable
/// object file.
#[derive(Debug, StructOpt)]
#[structopt(name = "cppc")]
struct Opt {
    /// Path to the C++ source file
    #[structopt(parse(from_os_str))]
    input: PathBuf,

    /// Path of the object file to write
    #[structopt(parse(from_os_str), long = "output", short = "o")]
    output: PathBuf,

    /// Output format
    #[structopt(
        long = "target",
        default_value = "elf",
        possible_values = &["elf", "coff"]
    )]
    target: Target,

    /// Imitate gcc's ABI conventions
    #[structopt(long = "fgcc-compat")]
    gcc_compat: bool,

    /// Imitate clang's ABI conventions
    #[structopt(long = "fclang-compat")]
    clang_compat: bool,

    /// Disable member access checking
    #[structopt(long = "fno-access-control")]
    no_access_control: bool,

    /// Instantiate templates eagerly at first reference
    #[structopt(long = "eager-template-instantiation")]
    eager_template_instantiation: bool,

    /// Log verbosity, either `<level>` or `<category>:<level>`
    #[structopt(long = "log-level")]
    log_level: Option<String>,
}

/// Exit codes: 0 success, 1 compile error, 2 internal error, 3 I/O
/// failure.
const EXIT_COMPILE_ERROR: i32 = 1;
const EXIT_INTERNAL_ERROR: i32 = 2;
const EXIT_IO_ERROR: i32 = 3;

fn init_logging(spec: Option<&str>) {
    let mut logger = SimpleLogger::new().with_level(LevelFilter::Warn);
    if let Some(spec) = spec {
        match spec.split_once(':') {
            Some((category, level)) => {
                if let Ok(level) = level.parse() {
                    logger = logger.with_module_level(category, level);
                }
            }
            None => {
                if let Ok(level) = spec.parse() {
                    logger = logger.with_level(level);
                }
            }
        }
    }
    // A second init (e.g. in tests) is harmless
    let _ = logger.init();
}

fn options_from(opt: &Opt) -> Options {
    let compat = if opt.gcc_compat {
        CompatMode::Gcc
    } else if opt.clang_compat {
        CompatMode::Clang
    } else {
        CompatMode::Msvc
    };
    Options {
        target: opt.target,
        compat,
        access_control: !opt.no_access_control,
        eager_template_instantiation: opt.eager_template_instantiation,
    }
}

fn run(opt: Opt) -> anyhow::Result<i32> {
    // Argument validation belongs to structopt; by the time we are here
    // the flags are well-formed.
    let options = options_from(&opt);
    let source = match fs::read_to_string(&opt.input)
        .with_context(|| format!("Failed to read file {:?}", opt.input))
    {
        Ok(source) => source,
        Err(err) => {
            eprintln!("{:#}", err);
            return Ok(EXIT_IO_ERROR);
        }
    };
    let file_name = opt
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input.cpp".to_string());

    match cppc::compile_to_object(source, file_name, options) {
        Ok(bytes) => {
            if let Err(err) = fs::write(&opt.output, bytes)
                .with_context(|| format!("Failed to write file {:?}", opt.output))
            {
                eprintln!("{:#}", err);
                return Ok(EXIT_IO_ERROR);
            }
            Ok(0)
        }
        Err(diagnostics) => {
            // Alternate mode renders the caret snippets
            eprintln!("{:#}", diagnostics);
            Ok(EXIT_COMPILE_ERROR)
        }
    }
}

fn main() {
    let opt = Opt::from_args();
    init_logging(opt.log_level.as_deref());
    // Internal compiler errors surface as panics; map them to their own
    // exit code so build systems can tell them from source errors.
    let exit_code =
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| run(opt))) {
            Ok(Ok(code)) => code,
            Ok(Err(err)) => {
                eprintln!("{:#}", err);
                EXIT_IO_ERROR
            }
            Err(_) => {
                eprintln!("internal compiler error (this is a bug)");
                EXIT_INTERNAL_ERROR
            }
        };
    process::exit(exit_code);
}
