mod cli;
mod smoke;
mod viewer;

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, RunArgs};
use rlm_driver::{Driver, DriverConfig, Env, EventSink, RlmError, exit_code};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RLM_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Command::Run(args) => run(args).await,
        Command::Smoke(args) => smoke::run(args).await,
        Command::View(args) => viewer::run(&args),
    };
    std::process::exit(code);
}

fn fail(err: &RlmError) -> i32 {
    eprintln!("rlm: {err}");
    err.exit_code()
}

fn load_config(path: Option<&Path>) -> Result<DriverConfig, RlmError> {
    match path {
        Some(path) => DriverConfig::load_from_path(path),
        None => Ok(DriverConfig::default()),
    }
}

fn read_context(args: &RunArgs) -> Result<String, RlmError> {
    match args.context.as_deref() {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .map_err(|err| RlmError::Usage(format!("cannot read context {}: {err}", path.display()))),
        _ => {
            let mut context = String::new();
            std::io::stdin()
                .read_to_string(&mut context)
                .map_err(|err| RlmError::Usage(format!("cannot read context from stdin: {err}")))?;
            Ok(context)
        }
    }
}

async fn run(args: RunArgs) -> i32 {
    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => return fail(&err),
    };
    let context = match read_context(&args) {
        Ok(context) if !context.trim().is_empty() => context,
        Ok(_) => return fail(&RlmError::Usage("context is empty".to_string())),
        Err(err) => return fail(&err),
    };

    let env = Env::from_process();
    let sink = Arc::new(EventSink::new(&args.log_dir, args.log_prefix.clone()));
    let driver = match Driver::from_env(config, &env, sink) {
        Ok(driver) => driver,
        Err(err) => return fail(&err),
    };

    let outcome = tokio::select! {
        outcome = driver.run(&context) => outcome,
        _ = tokio::signal::ctrl_c() => {
            driver.flush();
            if let Some(path) = driver.log_file() {
                eprintln!("rlm: event log: {}", path.display());
            }
            return fail(&RlmError::Interrupted);
        }
    };

    if let Some(path) = &outcome.log_file {
        eprintln!("rlm: event log: {}", path.display());
    }
    if let Some(err) = &outcome.error {
        return fail(err);
    }

    let rendered = match &outcome.final_result {
        Some(serde_json::Value::String(text)) => text.clone(),
        Some(value) => value.to_string(),
        None => "null".to_string(),
    };
    match &args.output {
        Some(path) => {
            if let Err(err) = std::fs::write(path, &rendered) {
                return fail(&RlmError::Output(format!(
                    "cannot write {}: {err}",
                    path.display()
                )));
            }
        }
        None => println!("{rendered}"),
    }
    exit_code::OK
}
