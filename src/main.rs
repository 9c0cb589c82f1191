use clap::{App, AppSettings, Arg, ArgMatches};
use std::path::Path;
use std::process;
use whitvm::parse::read_source;
use whitvm::{minify, MinifyConfig, Program, Vm, VmConfig};

const CMD_RUN: &str = "run";
const CMD_CHECK: &str = "check";
const CMD_MINIFY: &str = "minify";

const ARG_FILE: &str = "file";
const ARG_SEED: &str = "seed";
const ARG_OUTPUT: &str = "output";
const ARG_SHRINK_NAMES: &str = "shrink-names";
const ARG_FOLD_CONSTANTS: &str = "fold-constants";
const ARG_DEAD_STORES: &str = "dead-stores";
const ARG_UNREACHABLE: &str = "unreachable";
const ARG_POOL_STRINGS: &str = "pool-strings";
const ARG_POOL_THRESHOLD: &str = "pool-threshold";
const ARG_AGGRESSIVE: &str = "aggressive";

const EXIT_RUNTIME_ERROR: i32 = 1;
const EXIT_PARSE_ERROR: i32 = 2;

fn args() -> ArgMatches {
    let file = Arg::new(ARG_FILE)
        .takes_value(true)
        .required(true)
        .help("whitvm source file");

    App::new("whitvm")
        .about("an interpreter and minifier for whitvm text adventures")
        .version("0.1.0")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .subcommand(
            App::new(CMD_RUN)
                .about("executes a whitvm game against stdin/stdout")
                .arg(file.clone())
                .arg(
                    Arg::new(ARG_SEED)
                        .short('s')
                        .long(ARG_SEED)
                        .takes_value(true)
                        .required(false)
                        .help("fixed random seed for deterministic replay"),
                ),
        )
        .subcommand(
            App::new(CMD_CHECK)
                .about("loads and validates a whitvm game without running it")
                .arg(file.clone()),
        )
        .subcommand(
            App::new(CMD_MINIFY)
                .about("rewrites a whitvm game to a smaller equivalent")
                .arg(file)
                .arg(
                    Arg::new(ARG_OUTPUT)
                        .short('o')
                        .long(ARG_OUTPUT)
                        .takes_value(true)
                        .required(false)
                        .help("output file (default: <file>.min.whitvm)"),
                )
                .arg(
                    Arg::new(ARG_SHRINK_NAMES)
                        .long(ARG_SHRINK_NAMES)
                        .takes_value(false)
                        .help("rename variables and labels to minimal identifiers"),
                )
                .arg(
                    Arg::new(ARG_FOLD_CONSTANTS)
                        .long(ARG_FOLD_CONSTANTS)
                        .takes_value(false)
                        .help("evaluate expressions built from literals"),
                )
                .arg(
                    Arg::new(ARG_DEAD_STORES)
                        .long(ARG_DEAD_STORES)
                        .takes_value(false)
                        .help("drop assignments that are never read"),
                )
                .arg(
                    Arg::new(ARG_UNREACHABLE)
                        .long(ARG_UNREACHABLE)
                        .takes_value(false)
                        .help("drop instructions no execution path reaches"),
                )
                .arg(
                    Arg::new(ARG_POOL_STRINGS)
                        .long(ARG_POOL_STRINGS)
                        .takes_value(false)
                        .help("extract repeated strings into variables"),
                )
                .arg(
                    Arg::new(ARG_POOL_THRESHOLD)
                        .long(ARG_POOL_THRESHOLD)
                        .takes_value(true)
                        .required(false)
                        .help("occurrences a string needs before it is pooled (default: 2)"),
                )
                .arg(
                    Arg::new(ARG_AGGRESSIVE)
                        .short('a')
                        .long(ARG_AGGRESSIVE)
                        .takes_value(false)
                        .help("enable every optional pass"),
                ),
        )
        .get_matches()
}

fn main() {
    let matches = args();
    let code = match matches.subcommand() {
        Some((CMD_RUN, sub)) => cmd_run(sub),
        Some((CMD_CHECK, sub)) => cmd_check(sub),
        Some((CMD_MINIFY, sub)) => cmd_minify(sub),
        _ => EXIT_PARSE_ERROR,
    };
    process::exit(code);
}

fn cmd_run(matches: &ArgMatches) -> i32 {
    let file_name = matches.value_of(ARG_FILE).unwrap();
    let config = match matches.value_of(ARG_SEED) {
        Some(seed) => match seed.parse() {
            Ok(seed) => VmConfig::seeded(seed),
            Err(_) => {
                eprintln!("invalid seed: {}", seed);
                return EXIT_PARSE_ERROR;
            }
        },
        None => VmConfig::default_entropy(),
    };

    let program = match Program::from_file(file_name) {
        Ok(program) => program,
        Err(err) => {
            eprintln!("{}", err);
            return EXIT_PARSE_ERROR;
        }
    };

    let mut vm = Vm::with_stdio(program, config);
    match vm.run() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{}", err);
            EXIT_RUNTIME_ERROR
        }
    }
}

fn cmd_check(matches: &ArgMatches) -> i32 {
    let file_name = matches.value_of(ARG_FILE).unwrap();
    match Program::from_file(file_name) {
        Ok(program) => {
            println!("{} is valid", file_name);
            println!("instructions: {}", program.instructions.len());
            println!("labels: {}", program.labels.len());
            0
        }
        Err(err) => {
            eprintln!("{}", err);
            EXIT_PARSE_ERROR
        }
    }
}

fn cmd_minify(matches: &ArgMatches) -> i32 {
    let file_name = matches.value_of(ARG_FILE).unwrap();
    let mut config = if matches.is_present(ARG_AGGRESSIVE) {
        MinifyConfig::aggressive()
    } else {
        MinifyConfig::essential()
    };
    config.shrink_names |= matches.is_present(ARG_SHRINK_NAMES);
    config.fold_constants |= matches.is_present(ARG_FOLD_CONSTANTS);
    config.dead_stores |= matches.is_present(ARG_DEAD_STORES);
    config.remove_unreachable |= matches.is_present(ARG_UNREACHABLE);
    config.pool_strings |= matches.is_present(ARG_POOL_STRINGS);
    if let Some(threshold) = matches.value_of(ARG_POOL_THRESHOLD) {
        match threshold.parse() {
            Ok(threshold) => config.pool_threshold = threshold,
            Err(_) => {
                eprintln!("invalid pool threshold: {}", threshold);
                return EXIT_PARSE_ERROR;
            }
        }
    }

    let source = match read_source(file_name) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("{}", err);
            return EXIT_PARSE_ERROR;
        }
    };

    let minified = match minify(&source, &config) {
        Ok(minified) => minified,
        Err(err) => {
            eprintln!("{}", err);
            return EXIT_PARSE_ERROR;
        }
    };

    let output = match matches.value_of(ARG_OUTPUT) {
        Some(output) => output.to_string(),
        None => Path::new(file_name)
            .with_extension("min.whitvm")
            .to_string_lossy()
            .into_owned(),
    };
    if let Err(err) = std::fs::write(&output, &minified) {
        eprintln!("failed to write {}, details: {}", output, err);
        return EXIT_RUNTIME_ERROR;
    }

    println!("minified: {} -> {}", file_name, output);
    println!(
        "size: {} -> {} bytes ({} saved)",
        source.len(),
        minified.len(),
        source.len().saturating_sub(minified.len())
    );
    0
}
