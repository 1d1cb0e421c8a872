// CLI binary; panicking on unrecoverable errors is acceptable here.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::unreachable, clippy::indexing_slicing)]

use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};

use dyncompile::settings::{self, CompilerSettings};
use dyncompile::source_gen::GenerationRequest;
use dyncompile::{value, CompileOptions, Compiler, EmitOptions, EntryPoint, Error, ParamMode, Value};

// ── CLI argument parsing ─────────────────────────────────────────

#[derive(Parser)]
#[command(name = "dyncompile-cli", about = "Compile and run C# method bodies", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Compiler settings file (JSON)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Output raw JSON instead of formatted text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the compilation unit generated for a body
    Generate {
        #[command(flatten)]
        method: MethodArgs,
    },
    /// Compile a body and call it with the given arguments
    Run {
        #[command(flatten)]
        method: MethodArgs,
        /// Values for every non-`out` parameter, in order
        args: Vec<String>,
    },
    /// Compile a source file and call one of its public static methods
    Assembly {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value = "")]
        namespace: String,
        #[arg(long)]
        class: String,
        #[arg(long)]
        method: String,
        /// Values for every non-`out` parameter, in order
        args: Vec<String>,
    },
}

#[derive(Args)]
struct MethodArgs {
    /// Method body
    #[arg(long)]
    body: String,
    /// Parameter declaration, e.g. "ref int x" (repeatable)
    #[arg(long = "param")]
    params: Vec<String>,
    /// Result type
    #[arg(long, default_value = "void")]
    returns: String,
    /// Extra using directives
    #[arg(long, default_value = "")]
    usings: String,
    #[arg(long)]
    namespace: Option<String>,
    #[arg(long)]
    class: Option<String>,
    #[arg(long)]
    method: Option<String>,
}

impl MethodArgs {
    fn options(&self, emit: EmitOptions) -> CompileOptions {
        let mut options = CompileOptions::new().usings(self.usings.clone()).emit_options(emit);
        if let Some(ns) = &self.namespace {
            options = options.namespace_name(ns.clone());
        }
        if let Some(class) = &self.class {
            options = options.class_name(class.clone());
        }
        if let Some(method) = &self.method {
            options = options.method_name(method.clone());
        }
        options
    }

    fn parameters(&self) -> String {
        self.params.join(", ")
    }
}

// ── Arguments and results ────────────────────────────────────────

fn parse_arg(type_name: &str, text: &str) -> Result<Value, String> {
    let bad = |e: &dyn std::fmt::Display| format!("cannot read '{text}' as {type_name}: {e}");
    Ok(match type_name {
        value::INT32 => Value::Int(text.parse().map_err(|e| bad(&e))?),
        value::INT64 => Value::Long(text.parse().map_err(|e| bad(&e))?),
        value::DOUBLE => Value::Double(text.parse().map_err(|e| bad(&e))?),
        value::BOOLEAN => Value::Bool(text.to_ascii_lowercase().parse().map_err(|e| bad(&e))?),
        value::STRING | value::OBJECT if text == "null" => Value::Null,
        value::STRING | value::OBJECT => Value::string(text),
        other => return Err(format!("parameters of type {other} cannot be given on the command line")),
    })
}

/// One slot per parameter; `out` slots start empty and consume no text.
fn build_args(entry: &EntryPoint, texts: &[String]) -> Result<Vec<Value>, String> {
    let params = &entry.signature().params;
    let wanted = params.iter().filter(|p| p.mode != ParamMode::Out).count();
    if texts.len() != wanted {
        return Err(format!("expected {wanted} arguments, got {}", texts.len()));
    }
    let mut texts = texts.iter();
    params
        .iter()
        .map(|p| match p.mode {
            ParamMode::Out => Ok(Value::Null),
            _ => parse_arg(&p.type_name, texts.next().map(String::as_str).unwrap_or_default()),
        })
        .collect()
}

fn invoke(entry: &EntryPoint, texts: &[String], raw_json: bool) -> Result<(), Error> {
    let mut args = build_args(entry, texts).map_err(Error::argument_mismatch)?;
    let result = entry.invoke_raw(&mut args)?;
    let returns = entry.signature().result.is_some();
    let outputs: Vec<(&str, &Value)> = entry
        .signature()
        .params
        .iter()
        .zip(&args)
        .filter(|(p, _)| p.mode.writes_back())
        .map(|(p, v)| (p.name.as_str(), v))
        .collect();

    if raw_json {
        let outputs: serde_json::Map<String, serde_json::Value> =
            outputs.iter().map(|(name, v)| ((*name).to_string(), v.to_json())).collect();
        let json = serde_json::json!({
            "result": if returns { result.to_json() } else { serde_json::Value::Null },
            "outputs": outputs,
        });
        println!("{}", serde_json::to_string_pretty(&json).unwrap_or_default());
        return Ok(());
    }

    if returns {
        println!("{result}");
    }
    for (name, v) in outputs {
        println!("{name} = {v}");
    }
    Ok(())
}

fn fail(error: &Error, raw_json: bool) -> ! {
    if raw_json {
        println!("{}", serde_json::to_string_pretty(error).unwrap_or_default());
    } else {
        eprintln!("Error: {error}");
    }
    process::exit(1);
}

// ── Main ─────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();
    let raw = cli.json;

    let settings = match &cli.settings {
        Some(path) => match settings::load_settings(path) {
            Ok(Some(s)) => s,
            Ok(None) => {
                eprintln!("Error: settings file {} not found", path.display());
                process::exit(1);
            }
            Err(e) => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        },
        None => CompilerSettings::default(),
    };
    let compiler = Compiler::from_settings(&settings);
    let emit = EmitOptions::from(&settings);

    let outcome = match &cli.command {
        Commands::Generate { method } => {
            let request = GenerationRequest::new(method.body.clone())
                .parameters(method.parameters())
                .return_type(method.returns.clone())
                .usings(method.usings.clone());
            let options = method.options(emit);
            let request = request
                .namespace_name(options.namespace_name)
                .class_name(options.class_name)
                .method_name(options.method_name);
            dyncompile::generate_source(&request).map(|source| {
                if raw {
                    println!("{}", serde_json::json!({ "source": source }));
                } else {
                    println!("{source}");
                }
            })
        }
        Commands::Run { method, args } => compiler
            .compile_method(&method.body, &method.parameters(), &method.returns, &method.options(emit))
            .and_then(|entry| invoke(&entry, args, raw)),
        Commands::Assembly {
            file,
            namespace,
            class,
            method,
            args,
        } => {
            let source = std::fs::read_to_string(file).unwrap_or_else(|e| {
                eprintln!("Error: cannot read {}: {e}", file.display());
                process::exit(1);
            });
            let options = CompileOptions::new().emit_options(emit);
            compiler
                .compile_assembly(&source, &options)
                .and_then(|artifact| dyncompile::symbols::resolve(&artifact, namespace, class, method))
                .and_then(|entry| invoke(&entry, args, raw))
        }
    };

    if let Err(e) = outcome {
        fail(&e, raw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn parse_arg_reads_primitives_and_null() {
        assert_eq!(parse_arg(value::INT32, "-7").unwrap(), Value::Int(-7));
        assert_eq!(parse_arg(value::INT64, "9000000000").unwrap(), Value::Long(9_000_000_000));
        assert_eq!(parse_arg(value::BOOLEAN, "True").unwrap(), Value::Bool(true));
        assert_eq!(parse_arg(value::STRING, "null").unwrap(), Value::Null);
        assert_eq!(parse_arg(value::OBJECT, "null").unwrap(), Value::Null);
        assert_eq!(parse_arg(value::STRING, "hi").unwrap(), Value::string("hi"));

        let err = parse_arg(value::INT32, "seven").unwrap_err();
        assert!(err.contains("cannot read 'seven' as System.Int32"), "{err}");
        assert!(parse_arg("System.Char", "c").is_err());
    }

    #[test]
    fn build_args_leaves_out_slots_empty() {
        let entry =
            dyncompile::compile_method("y = x + 1;", "int x, out int y, ref string s", "void", &CompileOptions::new())
                .unwrap();
        let args = build_args(&entry, &texts(&["4", "null"])).unwrap();
        assert_eq!(args, [Value::Int(4), Value::Null, Value::Null]);

        let err = build_args(&entry, &texts(&["4", "a", "b"])).unwrap_err();
        assert_eq!(err, "expected 2 arguments, got 3");
    }
}
