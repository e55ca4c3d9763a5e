use std::{env, fs, process::ExitCode, time::Instant};

use tealeaf::{Analyzer, CmdVal, LogLevel, Options};

const USAGE: &str = "usage: tealeaf <file.py> [options]

options:
  --json                 print the report as JSON
  --log-level <level>    none | result-only | reduced | full (default: reduced)
  --arg <name>=<value>   seed an argparse flag of the analyzed program
  --subcommand <name>    value reported to argparse subparsers
  --ignore-assert        skip Python assert statements
  --extract-ir           write the lowered IR next to the entry file
  --path-cap <n>         maximum live paths before merging (default: 64)";

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let parsed = match parse_cli(&args) {
        Ok(parsed) => parsed,
        Err(message) => {
            eprintln!("error: {message}\n{USAGE}");
            return ExitCode::FAILURE;
        }
    };
    let (opts, json) = parsed;

    let code = match read_file(&opts.entry_path) {
        Ok(code) => code,
        Err(message) => {
            eprintln!("error: {message}");
            return ExitCode::FAILURE;
        }
    };

    let start = Instant::now();
    let analyzer = Analyzer::new(opts);
    let report = match analyzer.analyze_source(&code) {
        Ok(report) => report,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };
    let elapsed = start.elapsed();

    if json {
        match report.to_json() {
            Ok(json) => println!("{json}"),
            Err(err) => {
                eprintln!("error: could not render report: {err}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        print!("{report}");
        eprintln!("analysis took {elapsed:?}");
    }

    if report.failure_count() > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn parse_cli(args: &[String]) -> Result<(Options, bool), String> {
    let mut opts = Options::default();
    let mut json = false;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--json" => json = true,
            "--ignore-assert" => opts.ignore_assert = true,
            "--extract-ir" => opts.extract_ir = true,
            "--log-level" => {
                let value = iter.next().ok_or("--log-level needs a value")?;
                opts.log_level = value
                    .parse::<LogLevel>()
                    .map_err(|_| format!("unknown log level '{value}'"))?;
            }
            "--arg" => {
                let value = iter.next().ok_or("--arg needs name=value")?;
                let (name, raw) = value.split_once('=').ok_or("--arg needs name=value")?;
                opts.cmd_args.insert(name.to_owned(), CmdVal::parse_loose(raw));
            }
            "--subcommand" => {
                let value = iter.next().ok_or("--subcommand needs a value")?;
                opts.subcommand = Some(value.clone());
            }
            "--path-cap" => {
                let value = iter.next().ok_or("--path-cap needs a number")?;
                opts.path_cap = value.parse().map_err(|_| format!("invalid path cap '{value}'"))?;
            }
            "--help" | "-h" => return Err("help requested".to_owned()),
            other if other.starts_with("--") => return Err(format!("unknown option '{other}'")),
            other => {
                if !opts.entry_path.is_empty() {
                    return Err("more than one input file".to_owned());
                }
                opts.entry_path = other.to_owned();
            }
        }
    }
    if opts.entry_path.is_empty() {
        return Err("no input file".to_owned());
    }
    Ok((opts, json))
}

fn read_file(path: &str) -> Result<String, String> {
    match fs::metadata(path) {
        Ok(metadata) => {
            if !metadata.is_file() {
                return Err(format!("{path} is not a file"));
            }
        }
        Err(err) => return Err(format!("cannot read {path}: {err}")),
    }
    fs::read_to_string(path).map_err(|err| format!("cannot read {path}: {err}"))
}
