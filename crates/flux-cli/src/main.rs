//! `flux` CLI (spec.md §6/§7): parses a module file, runs the static passes
//! (schema, semantic, type, effect) and reports whether its canonical form
//! would differ, with the stable exit codes spec.md §7 names.

use std::process::ExitCode;
use std::{env, fs};

use flux::ast::Module;
use flux::diagnostics::{Code, Diagnostic, Severity};
use flux::{effects, format, semantic, types};
use serde_json::json;

struct Args {
    path: String,
    json: bool,
    write: bool,
}

fn parse_args(raw: &[String]) -> Result<Args, String> {
    let mut path = None;
    let mut json = false;
    let mut write = false;
    for arg in raw {
        match arg.as_str() {
            "--json" => json = true,
            "--write" => write = true,
            other if other.starts_with('-') => return Err(format!("unknown flag `{other}`")),
            other if path.is_none() => path = Some(other.to_owned()),
            other => return Err(format!("unexpected extra argument `{other}`")),
        }
    }
    let path = path.ok_or_else(|| "usage: flux [--json] [--write] <file>".to_owned())?;
    Ok(Args { path, json, write })
}

fn main() -> ExitCode {
    let raw: Vec<String> = env::args().skip(1).collect();
    let args = match parse_args(&raw) {
        Ok(a) => a,
        Err(message) => {
            eprintln!("error: {message}");
            return ExitCode::from(3);
        }
    };
    run(&args)
}

fn run(args: &Args) -> ExitCode {
    let text = match fs::read_to_string(&args.path) {
        Ok(t) => t,
        Err(err) => {
            eprintln!("error: could not read `{}`: {err}", args.path);
            return ExitCode::from(3);
        }
    };

    let parsed = match flux::parse::parse(&text) {
        Ok(p) => p,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(3);
        }
    };

    let mut diags: Vec<Diagnostic> = format::validate_schema(&parsed.value)
        .into_iter()
        .map(|issue| Diagnostic::new(issue.pointer, Code::SchemaError, issue.message).with_detail(issue.validator))
        .collect();

    let module = match Module::from_value(&parsed.value) {
        Ok(m) => Some(m),
        Err(err) => {
            diags.push(Diagnostic::new(err.pointer.clone(), Code::SchemaError, err.message.clone()));
            None
        }
    };

    if let Some(module) = &module {
        diags.extend(semantic::analyze(module));
        diags.extend(types::check(module));
        diags.extend(effects::check(module));
    }

    let has_errors = diags.iter().any(Diagnostic::is_error);
    let canonical = module.as_ref().map(format::canon_module);

    let formatting_differs = match (&canonical, args.write) {
        (Some(canonical), true) if canonical != &text => {
            if let Err(err) = fs::write(&args.path, canonical) {
                eprintln!("error: could not write `{}`: {err}", args.path);
                return ExitCode::from(3);
            }
            true
        }
        (Some(canonical), false) => canonical != &text,
        _ => false,
    };

    if args.json {
        let payload = json!({"diagnostics": diags, "formatting_differs": formatting_differs});
        println!("{}", serde_json::to_string(&payload).expect("diagnostics serialize"));
    } else {
        for d in &diags {
            let severity = match d.severity {
                Severity::Error => "error",
                Severity::Warning => "warning",
            };
            println!("{} [{severity}] {:?}: {}", d.pointer, d.code, d.message);
        }
        if formatting_differs {
            println!("(formatting would differ from canonical form)");
        }
    }

    if has_errors {
        ExitCode::from(2)
    } else if formatting_differs || diags.iter().any(|d| !d.is_error()) {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}
