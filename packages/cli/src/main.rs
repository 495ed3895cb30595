//! `sigcall`: command-line client for sigcall services.
//!
//! - **`keygen`**: create a signing key and print its seed and verify key.
//! - **`verify`**: check the signature on a signed envelope read from a file.
//! - **`tree`**: print the operations in a saved catalog, or the ones the
//!   caller may use on a live service.
//! - **`call`**: log in and invoke one operation with JSON arguments.
//!
//! Connection settings come from `SIGCALL_*` environment variables; see
//! [`ClientConfig::from_env`]. Set `RUST_LOG` to change log verbosity.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufRead, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use sigcall::{ProtocolVersion, SignedEnvelope, SigningKey, Value};
use sigcall_api::EndpointCatalog;
use sigcall_client::{
    detached_trees, ApiError, ApiSession, CallArgs, ClientConfig, Prompter, ProxyNode,
    SessionBuilder,
};

/// sigcall: signed remote calls from the command line
#[derive(Parser)]
#[command(name = "sigcall", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a signing key.
    ///
    /// Prints the hex seed (export it as SIGCALL_SEED) and the multibase
    /// verify key that identifies you to services.
    Keygen {
        /// Derive from an existing hex seed instead of generating one.
        #[arg(long, value_name = "HEX")]
        seed: Option<String>,
    },

    /// Verify a signed envelope.
    ///
    /// Exits 0 and prints the signer if the signature is valid, 1 otherwise.
    /// Pass `-` as FILE to read from stdin.
    Verify {
        /// Path to a JSON envelope, or `-` for stdin.
        file: PathBuf,
    },

    /// Print a proxy tree with rendered signatures.
    ///
    /// With CATALOG, reads a saved catalog JSON file (`-` for stdin).
    /// Without it, logs in to the service and prints the caller's catalog.
    Tree {
        /// Path to an endpoint catalog JSON file, or `-` for stdin.
        catalog: Option<PathBuf>,

        /// Service URL.
        #[arg(long, env = "SIGCALL_URL")]
        url: Option<String>,

        /// Also list library functions.
        #[arg(long)]
        lib: bool,
    },

    /// Call an operation.
    ///
    /// Arguments are JSON; anything that is not valid JSON is sent as a
    /// string. Examples:
    ///   sigcall call user.get --kwarg email='"a@b.c"'
    ///   sigcall call math.add --arg 1 --arg 2 --no-block
    Call {
        /// Dotted operation path, e.g. `user.get`.
        path: String,

        /// Positional argument as JSON. Repeat for more.
        #[arg(long = "arg", value_name = "JSON")]
        args: Vec<String>,

        /// Keyword argument as NAME=JSON. Repeat for more.
        #[arg(long = "kwarg", value_name = "NAME=JSON")]
        kwargs: Vec<String>,

        /// Ask the service not to wait for the result.
        #[arg(long)]
        no_block: bool,

        /// Approve endpoint warnings without asking.
        #[arg(short = 'y', long)]
        yes: bool,

        /// Service URL.
        #[arg(long, env = "SIGCALL_URL")]
        url: Option<String>,

        /// Newest protocol version to offer.
        #[arg(long, value_name = "VERSION")]
        protocol: Option<ProtocolVersion>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sigcall=info,sigcall_client=info".into()),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Keygen { seed } => {
            let key = match seed {
                Some(hex_seed) => SigningKey::from_hex_seed(&hex_seed)
                    .unwrap_or_else(|e| fatal(&format!("invalid seed: {e}"))),
                None => SigningKey::generate(),
            };
            println!("seed:       {}", hex::encode(key.seed()));
            println!("verify_key: {}", key.verify_key());
        }

        Command::Verify { file } => {
            let json = read_input(&file);
            let envelope: SignedEnvelope<serde_json::Value> = serde_json::from_str(&json)
                .unwrap_or_else(|e| fatal(&format!("failed to parse envelope: {e}")));
            if envelope.verify() {
                println!("valid");
                eprintln!("signed by {}", envelope.signer());
            } else {
                eprintln!("invalid signature (claimed signer {})", envelope.signer());
                process::exit(1);
            }
        }

        Command::Tree {
            catalog: Some(file),
            lib,
            ..
        } => {
            let json = read_input(&file);
            let catalog: EndpointCatalog = serde_json::from_str(&json)
                .unwrap_or_else(|e| fatal(&format!("failed to parse catalog: {e}")));
            let (api, lib_tree) = detached_trees(&catalog).unwrap_or_else(|e| fatal_api(e));
            println!(
                "{} as {} (protocol {})",
                catalog.service_name, catalog.role, catalog.protocol
            );
            print!("{}", api.describe());
            if lib {
                println!("\n[lib]");
                print!("{}", lib_tree.describe());
            }
        }

        Command::Tree {
            catalog: None,
            url,
            lib,
        } => {
            let session = login(url, None, false);
            println!(
                "{} as {} (protocol {})",
                session.service().name,
                session.role(),
                session.protocol()
            );
            let api = session.api().unwrap_or_else(|e| fatal_api(e));
            print!("{}", api.describe());
            if lib {
                let lib_tree = session.lib().unwrap_or_else(|e| fatal_api(e));
                println!("\n[lib]");
                print!("{}", lib_tree.describe());
            }
        }

        Command::Call {
            path,
            args,
            kwargs,
            no_block,
            yes,
            url,
            protocol,
        } => {
            let mut call_args = CallArgs::new();
            for raw in &args {
                call_args = call_args.arg(parse_json_arg(raw));
            }
            for raw in &kwargs {
                let (name, json) = raw.split_once('=').unwrap_or_else(|| {
                    fatal(&format!("invalid --kwarg {raw:?}: expected NAME=JSON"))
                });
                call_args = call_args.kwarg(name, parse_json_arg(json));
            }
            if no_block {
                call_args = call_args.blocking(false);
            }

            let session = login(url, protocol, yes);
            let tree = session.api().unwrap_or_else(|e| fatal_api(e));
            let function = match tree.resolve(&path) {
                Ok(ProxyNode::Function(f)) => Arc::clone(f),
                Ok(ProxyNode::Namespace(ns)) => {
                    let prefix = format!("{}.", ns.path());
                    for leaf in tree.leaf_paths().iter().filter(|p| p.starts_with(&prefix)) {
                        println!("{leaf}");
                    }
                    return;
                }
                Err(e) => fatal_api(e),
            };
            match function.call(call_args) {
                Ok(Some(value)) => {
                    let out = serde_json::to_string_pretty(&to_json(&value))
                        .unwrap_or_else(|e| fatal(&e.to_string()));
                    println!("{out}");
                }
                Ok(None) => eprintln!("cancelled"),
                Err(e) => fatal_api(e),
            }
        }
    }
}

fn login(url: Option<String>, protocol: Option<ProtocolVersion>, yes: bool) -> ApiSession {
    let mut config =
        ClientConfig::from_env().unwrap_or_else(|e| fatal(&format!("bad configuration: {e}")));
    if let Some(url) = url {
        config.url = url.trim_end_matches('/').to_string();
    }
    if let Some(protocol) = protocol {
        config.protocol = protocol;
    }
    let prompter: Arc<dyn Prompter> = if yes {
        Arc::new(sigcall_client::ApproveAll)
    } else {
        Arc::new(StdinPrompter)
    };
    let session = SessionBuilder::from_config(&config)
        .and_then(|b| b.prompter(prompter).login())
        .unwrap_or_else(|e| fatal(&format!("login to {} failed: {e}", config.url)));
    session.enable_auto_refresh();
    session
}

/// Asks on the terminal before calling operations that carry a warning.
struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn confirm(&self, path: &str, message: &str) -> bool {
        eprint!("{message}\nCall {path}? [y/N] ");
        let _ = io::stderr().flush();
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim(), "y" | "Y" | "yes")
    }
}

/// Parse a command-line argument as JSON, falling back to a bare string.
fn parse_json_arg(raw: &str) -> Value {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(json) => from_json(json),
        Err(_) => Value::Str(raw.to_string()),
    }
}

fn from_json(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::None,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(s) => Value::Str(s),
        serde_json::Value::Array(items) => Value::List(items.into_iter().map(from_json).collect()),
        serde_json::Value::Object(map) => Value::Map(
            map.into_iter()
                .map(|(k, v)| (k, from_json(v)))
                .collect::<BTreeMap<_, _>>(),
        ),
    }
}

fn to_json(value: &Value) -> serde_json::Value {
    use serde_json::json;
    match value {
        Value::None => serde_json::Value::Null,
        Value::Bool(b) => json!(b),
        Value::Int(i) => json!(i),
        Value::Float(f) => json!(f),
        Value::Str(s) => json!(s),
        Value::Bytes(b) => json!(hex::encode(b)),
        Value::Uid(u) | Value::Pointer(u) => json!(u.to_string()),
        Value::List(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
        Value::Map(map) => serde_json::Value::Object(
            map.iter().map(|(k, v)| (k.clone(), to_json(v))).collect(),
        ),
        Value::Object(obj) => {
            let fields: serde_json::Map<_, _> = obj
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), to_json(v)))
                .collect();
            json!({ "type": obj.canonical_name, "version": obj.version, "fields": fields })
        }
        Value::Remote(remote) => json!({ "remote": remote.id.to_string(), "type": remote.type_name }),
    }
}

/// Read the full contents of a file, or stdin when the path is `"-"`.
fn read_input(path: &PathBuf) -> String {
    if path.to_str() == Some("-") {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .unwrap_or_else(|e| fatal(&format!("failed to read stdin: {e}")));
        buf
    } else {
        fs::read_to_string(path)
            .unwrap_or_else(|e| fatal(&format!("failed to read {}: {e}", path.display())))
    }
}

fn fatal_api(e: ApiError) -> ! {
    fatal(&e.to_string())
}

/// Print an error message to stderr and exit with code 2.
fn fatal(msg: &str) -> ! {
    eprintln!("sigcall: {msg}");
    process::exit(2);
}
