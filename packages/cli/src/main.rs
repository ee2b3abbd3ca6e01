//! `shapecode` — command-line client for the Shapeways API.
//!
//! Subcommands:
//!
//! - **`methods`**: list every callable endpoint, grouped by HTTP verb.
//! - **`call`**: invoke an operation by identifier and print the reply.
//! - **`upload`**: upload a model file.
//! - **`request-token`** / **`access-token`**: the two legs of the OAuth
//!   authorization flow.
//!
//! Credentials come from flags or the `SHAPEWAYS_*` environment variables;
//! endpoint, timeouts and trust bundle from the `SHAPECODE_*` variables.

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use shapecode::{
    AccessToken, ApiReply, ClientConfig, ConsumerCredentials, ModelUpload, Params,
    ReturnFormat, ShapecodeClient,
};

/// shapecode — Shapeways API client
///
/// Sign and send API calls, and print the normalized replies as JSON.
#[derive(Parser)]
#[command(name = "shapecode", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    credentials: Credentials,

    /// Reply representation: object | map | json.
    /// Defaults to SHAPECODE_RETURN_FORMAT, then `object`.
    #[arg(long, global = true, value_name = "FORMAT")]
    format: Option<ReturnFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Credentials {
    #[arg(long, env = "SHAPEWAYS_CONSUMER_KEY", hide_env_values = true, global = true)]
    consumer_key: Option<String>,

    #[arg(long, env = "SHAPEWAYS_CONSUMER_SECRET", hide_env_values = true, global = true)]
    consumer_secret: Option<String>,

    /// Access token (or request token for `access-token`).
    #[arg(long, env = "SHAPEWAYS_ACCESS_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    #[arg(long, env = "SHAPEWAYS_ACCESS_TOKEN_SECRET", hide_env_values = true, global = true)]
    token_secret: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// List every callable endpoint, grouped by HTTP verb.
    Methods,

    /// Call an operation by identifier.
    ///
    /// Examples:
    ///   shapecode call materials
    ///   shapecode call models_MODELID_info -p modelId=1234
    ///   shapecode call models_MODELID_info -p modelId=1234 -p title="New title"
    Call {
        /// Operation identifier, e.g. `models_MODELID_info`.
        operation: String,

        /// A parameter as key=value. Repeat for more.
        #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// JSON object of parameters, or `-` for stdin. `-p` values win.
        #[arg(long = "params", value_name = "FILE")]
        params_file: Option<PathBuf>,
    },

    /// Upload a 3D model file.
    Upload {
        /// Path to the model file.
        file: PathBuf,

        #[arg(long)]
        title: String,

        #[arg(long, default_value = "")]
        description: String,

        /// Comma-separated tags, e.g. "test, demo, cube".
        #[arg(long, default_value = "")]
        tags: String,

        /// Make the model public.
        #[arg(long)]
        public: bool,

        #[arg(long, value_name = "ID", default_value_t = shapecode::client::DEFAULT_MATERIAL_ID)]
        material_id: u64,
    },

    /// Obtain a request token; prints the authentication URL to visit.
    RequestToken {
        #[arg(long, default_value = "oob")]
        callback: String,
    },

    /// Exchange a request token (--token/--token-secret) and verifier for an
    /// access token.
    AccessToken {
        #[arg(long)]
        verifier: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shapecode=info".into()),
        )
        .init();

    let cli = Cli::parse();

    if let Command::Methods = cli.command {
        for (verb, templates) in ShapecodeClient::<shapecode::HttpTransport>::api_methods() {
            println!("{verb}");
            for template in templates {
                println!("  {template}");
            }
        }
        return;
    }

    let mut client = build_client(&cli.credentials, cli.format);

    let reply = match cli.command {
        Command::Methods => return,
        Command::Call {
            operation,
            params,
            params_file,
        } => {
            let params = collect_params(params_file.as_ref(), &params);
            client.call(&operation, params)
        }
        Command::Upload {
            file,
            title,
            description,
            tags,
            public,
            material_id,
        } => {
            let file = file
                .to_str()
                .unwrap_or_else(|| fatal(&format!("{} is not valid UTF-8", file.display())))
                .to_string();
            let mut upload = ModelUpload::new(file, title).with_tag_list(&tags);
            upload.description = description;
            upload.is_public = public;
            upload.default_material_id = material_id;
            client.upload_model(&upload)
        }
        Command::RequestToken { callback } => client
            .acquire_request_token(&callback)
            .map(|reply| ApiReply::render(reply, client.return_format())),
        Command::AccessToken { verifier } => client
            .acquire_access_token(&verifier)
            .map(|reply| ApiReply::render(reply, client.return_format())),
    };

    let reply = reply.unwrap_or_else(|e| fatal(&e.to_string()));
    print_reply(&reply);
    if reply.status() >= 400 {
        process::exit(1);
    }
}

fn build_client(credentials: &Credentials, format: Option<ReturnFormat>) -> ShapecodeClient {
    let mut config = ClientConfig::from_env().unwrap_or_else(|e| fatal(&e.to_string()));
    if let Some(format) = format {
        config.return_format = format;
    }

    let (Some(key), Some(secret)) = (&credentials.consumer_key, &credentials.consumer_secret)
    else {
        fatal("consumer key and secret are required (SHAPEWAYS_CONSUMER_KEY / SHAPEWAYS_CONSUMER_SECRET)");
    };

    let mut client = ShapecodeClient::new(ConsumerCredentials::new(key, secret), config)
        .unwrap_or_else(|e| fatal(&e.to_string()));
    match (&credentials.token, &credentials.token_secret) {
        (Some(token), Some(secret)) => client.set_token(AccessToken::new(token, secret)),
        (None, None) => {}
        _ => fatal("--token and --token-secret must be given together"),
    }
    client
}

/// Merge a JSON parameter file (if any) with `key=value` pairs.
fn collect_params(file: Option<&PathBuf>, pairs: &[String]) -> Params {
    let mut params = match file {
        Some(path) => match serde_json::from_str::<Value>(&read_input(path)) {
            Ok(Value::Object(map)) => map,
            Ok(_) => fatal("parameter file must contain a JSON object"),
            Err(e) => fatal(&format!("failed to parse parameters: {e}")),
        },
        None => Params::new(),
    };
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            fatal(&format!("expected KEY=VALUE, got {pair:?}"));
        };
        params.insert(key.to_string(), Value::String(value.to_string()));
    }
    params
}

fn print_reply(reply: &ApiReply) {
    match reply {
        ApiReply::Json { body, status } => {
            eprintln!("HTTP {status}");
            println!("{body}");
        }
        other => match serde_json::to_string_pretty(&other.to_value()) {
            Ok(text) => println!("{text}"),
            Err(e) => fatal(&format!("failed to render reply: {e}")),
        },
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

/// Print an error message to stderr and exit with code 2.
fn fatal(msg: &str) -> ! {
    eprintln!("shapecode: {msg}");
    process::exit(2);
}
