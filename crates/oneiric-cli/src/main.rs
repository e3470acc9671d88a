mod cli;
mod commands;
mod output;

use clap::error::ErrorKind;
use clap::Parser;
use cli::Cli;
use oneiric_lifecycle::LifecycleError;
use oneiric_runtime::RuntimeError;
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    let json = cli.json;
    match commands::run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            render_error(&e, json);
            std::process::exit(exit_code(e.kind()));
        }
    }
}

fn render_error(e: &RuntimeError, json_output: bool) {
    if json_output {
        let mut body = json!({ "error_kind": e.kind(), "message": e.to_string() });
        if let RuntimeError::Lifecycle(LifecycleError::SwapFailed { rollback, cause, .. }) = e {
            body["rollback"] = json!(rollback);
            body["cause"] = json!(cause.to_string());
        }
        println!("{body}");
    } else {
        eprintln!("error: {e}");
    }
}

/// 0 success, 1 usage, 2 operational failure, 3 resolution failure,
/// 4 security failure.
fn exit_code(kind: &str) -> i32 {
    match kind {
        "no_candidate" | "override_unsatisfied" => 3,
        "factory_denied" | "signature_invalid" | "digest_mismatch" | "path_escape"
        | "integrity_failure" => 4,
        _ => 2,
    }
}
