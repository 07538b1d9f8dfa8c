// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::path::Path;

use log::error;

use crate::config::Config;
use crate::{selftest, DaemonError};

pub fn help() -> &'static str {
    "rpcalld serves rpcall requests over ulink. \
     Usage: rpcalld [--help] [--check <config.toml>] [--selftest [<config.toml>]]"
}

fn load(path: Option<&str>) -> Result<Config, DaemonError> {
    Ok(match path {
        Some(path) => Config::load(Path::new(path))?,
        None => Config::builtin(),
    })
}

fn check(path: &str) -> Result<String, DaemonError> {
    let config = load(Some(path))?;
    Ok(format!(
        "config ok: local {} osid {}, {} links, {} services",
        config.local,
        config.osid,
        config.links.len(),
        config.services.len()
    ))
}

fn run_selftest(path: Option<&str>) -> Result<String, DaemonError> {
    let config = load(path)?;
    let report = selftest::run(&config)?;
    let mut out = report.lines.join("\n");
    out.push_str("\nselftest passed");
    Ok(out)
}

fn dispatch(args: &[&str]) -> Result<String, DaemonError> {
    match args {
        [] => Ok("rpcall daemon ready".to_string()),
        ["--check", path] => check(path),
        ["--selftest"] => run_selftest(None),
        ["--selftest", path] => run_selftest(Some(*path)),
        _ => Ok(help().to_string()),
    }
}

/// Runs one command line; failures are rendered as `error: ...`.
pub fn execute(args: &[&str]) -> String {
    if args.contains(&"--help") {
        return help().to_string();
    }
    match dispatch(args) {
        Ok(out) => out,
        Err(err) => format!("error: {err}"),
    }
}

/// Process entry; returns the exit status.
pub fn run() -> i32 {
    let owned: Vec<String> = std::env::args().skip(1).collect();
    let refs: Vec<&str> = owned.iter().map(|s| s.as_str()).collect();
    if refs.contains(&"--help") {
        println!("{}", help());
        return 0;
    }
    match dispatch(&refs) {
        Ok(out) => {
            println!("{out}");
            0
        }
        Err(err) => {
            error!("rpcalld: {err}");
            eprintln!("rpcalld: {err}");
            err.exit_code()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{execute, help};

    #[test]
    fn help_contains_name() {
        assert!(help().contains("rpcalld"));
        assert_eq!(execute(&["--help"]), help());
    }

    #[test]
    fn exec_default() {
        assert!(execute(&[]).contains("ready"));
    }

    #[test]
    fn unknown_flag_prints_help() {
        assert_eq!(execute(&["--bogus"]), help());
    }

    #[test]
    fn missing_config_is_reported() {
        assert!(execute(&["--check", "/nonexistent/rpcalld.toml"]).starts_with("error: failed to read"));
    }
}
