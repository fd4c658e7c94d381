//! Proxy smoke check: can we reach the endpoint and resolve a model pair?

use rlm_driver::{
    Env, exit_code, fetch_available_models, resolve_model_names, resolve_proxy_client_config,
    resolve_runtime_models,
};

use crate::cli::SmokeArgs;
use crate::{fail, load_config};

pub async fn run(args: SmokeArgs) -> i32 {
    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => return fail(&err),
    };
    let env = Env::from_process();
    let proxy = match resolve_proxy_client_config(&env) {
        Ok(proxy) => proxy,
        Err(err) => return fail(&err),
    };

    let http = reqwest::Client::new();
    let available = match fetch_available_models(&http, &proxy).await {
        Ok(available) => available,
        Err(err) => return fail(&err),
    };

    let requested = resolve_model_names(&config, &env);
    let resolved = resolve_runtime_models(&requested, &available, &env);
    for warning in &resolved.warnings {
        eprintln!("rlm: warning: {warning}");
    }
    println!(
        "ok: {} models at {}; primary={} sub={}",
        available.len(),
        proxy.base_url,
        resolved.primary_agent,
        resolved.sub_agent
    );
    exit_code::OK
}
