use clap::{Arg, ArgAction, Command};
use sbx::runner;
use sbx::{Inputs, Record};
use std::fs;
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let matches = Command::new("sbx")
        .about("Runs a sandboxed script against a read-only context object")
        .arg(
            Arg::new("file")
                .help("The script file to execute")
                .value_name("FILE")
                .index(1)
                .required(true),
        )
        .arg(
            Arg::new("type-object")
                .long("type-object")
                .help("Integer injected into the script as `type_object`")
                .value_name("N")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("set")
                .long("set")
                .help("Context attribute as NAME=LITERAL; may be repeated")
                .value_name("NAME=LITERAL")
                .value_parser(runner::parse_field)
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("plain")
                .long("plain")
                .help("Print the plain context window instead of a colour report")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Log compile and run events to stderr")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    init_tracing(matches.get_flag("verbose"));

    let plain = matches.get_flag("plain");
    let mut context = Record::new("Context");
    if let Some(fields) = matches.get_many::<(String, String)>("set") {
        for (name, literal) in fields {
            match runner::evaluate_literal(literal) {
                Ok(value) => context.set(name.as_str(), value),
                Err(error) => {
                    eprintln!("invalid value for '{}':", name);
                    runner::report(&error, &format!("result = {}", literal), None, plain);
                    return ExitCode::from(2);
                }
            }
        }
    }

    let inputs = match matches.get_one::<i64>("type-object") {
        Some(type_object) => Inputs::type_object(*type_object),
        None => Inputs::new(),
    };

    let Some(file_path) = matches.get_one::<String>("file") else {
        return ExitCode::from(2);
    };
    run_file(file_path, context, &inputs, plain)
}

fn init_tracing(verbose: bool) {
    // RUST_LOG wins; otherwise warnings only, or debug with --verbose.
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_file(path: &str, context: Record, inputs: &Inputs, plain: bool) -> ExitCode {
    let path = Path::new(path);

    if !path.exists() {
        eprintln!("Error: File '{}' not found", path.display());
        return ExitCode::FAILURE;
    }

    match fs::read_to_string(path) {
        Ok(source) => {
            let filename = path.to_string_lossy();
            if runner::run(&source, Some(filename.as_ref()), context, inputs, plain) {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("Error reading file '{}': {}", path.display(), e);
            ExitCode::FAILURE
        }
    }
}
