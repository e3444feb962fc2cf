//! dispatch-cli: 调度层的演示与配置检查工具
//!
//! Usage:
//!   dispatch-cli run [--calls N] [--unique N] [--concurrency N] [--latency-ms MS]
//!                    [--failure-rate F] [--batch] [--config <file>]
//!   dispatch-cli config [--config <file>]
//!   dispatch-cli version

use ai_lib_dispatch::{
    upstream_fn, CallOptions, ClientConfig, DispatchClientBuilder, Error, UpstreamRequest,
};
use anyhow::{bail, Context};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    match args[1].as_str() {
        "run" => cmd_run(&args[2..]),
        "config" => cmd_config(&args[2..]),
        "version" | "--version" | "-V" => {
            cmd_version();
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!(
        r#"dispatch-cli: ai-lib-dispatch 命令行工具

USAGE:
    dispatch-cli <COMMAND> [OPTIONS]

COMMANDS:
    run                         Drive a simulated upstream and print stats
    config                      Print the effective configuration as YAML
    version                     Show version information
    help                        Show this help message

RUN OPTIONS:
    --calls <n>                 Logical calls to issue (default 20)
    --unique <n>                Distinct payloads among them (default 10)
    --concurrency <n>           Override max_concurrency
    --latency-ms <ms>           Simulated upstream latency (default 100)
    --failure-rate <f>          Fraction of upstream attempts failing with 503 (default 0.1)
    --batch                     Send everything through batch_call
    --config <file>             YAML configuration file

ENVIRONMENT:
    AI_LIB_DISPATCH_*           Configuration overrides (e.g. AI_LIB_DISPATCH_MAX_CONCURRENCY)
    RUST_LOG                    Log filter (default: info)"#
    );
}

fn cmd_version() {
    println!(
        "dispatch-cli {} (ai-lib-dispatch {})",
        env!("CARGO_PKG_VERSION"),
        env!("CARGO_PKG_VERSION"),
    );
}

fn flag_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn parse_flag<T: std::str::FromStr>(args: &[String], name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match flag_value(args, name) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid value for {name}: {raw:?} ({e})")),
        None => Ok(default),
    }
}

fn load_config(args: &[String]) -> anyhow::Result<ClientConfig> {
    match flag_value(args, "--config") {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("loading configuration from {path}")),
        None => Ok(ClientConfig::from_env()?),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn cmd_config(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    config.validate()?;
    print!("{}", config.to_yaml()?);
    Ok(())
}

/// True for the attempts a steady `rate` of failures lands on.
fn scripted_failure(attempt: u64, rate: f64) -> bool {
    ((attempt + 1) as f64 * rate).floor() > (attempt as f64 * rate).floor()
}

fn cmd_run(args: &[String]) -> anyhow::Result<()> {
    init_tracing();

    let calls: usize = parse_flag(args, "--calls", 20)?;
    let unique: usize = parse_flag(args, "--unique", 10)?;
    let latency_ms: u64 = parse_flag(args, "--latency-ms", 100)?;
    let failure_rate: f64 = parse_flag(args, "--failure-rate", 0.1)?;
    let batch = args.iter().any(|a| a == "--batch");
    if !(0.0..=1.0).contains(&failure_rate) {
        bail!("--failure-rate must be within 0.0..=1.0");
    }

    let mut config = load_config(args)?;
    if let Some(raw) = flag_value(args, "--concurrency") {
        config = config.with_max_concurrency(raw.parse().context("invalid --concurrency")?);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting tokio runtime")?;

    runtime.block_on(async move {
        let attempts = Arc::new(AtomicU64::new(0));
        let upstream = {
            let attempts = attempts.clone();
            upstream_fn(move |req: UpstreamRequest| {
                let n = attempts.fetch_add(1, Ordering::Relaxed);
                async move {
                    tokio::time::sleep(Duration::from_millis(latency_ms)).await;
                    if scripted_failure(n, failure_rate) {
                        return Err(Error::from_status(503, "simulated overload"));
                    }
                    Ok(json!({ "agent": req.identity, "result": req.payload }))
                }
            })
            .named("simulated")
        };

        let client = DispatchClientBuilder::new(upstream).config(config).build()?;
        let requests: Vec<UpstreamRequest> = (0..calls)
            .map(|i| {
                UpstreamRequest::new("demo-agent", json!({ "task": i % unique.max(1) }))
                    .with_options(CallOptions::new().with_temperature(0.0))
            })
            .collect();

        let started = Instant::now();
        let results = if batch {
            client.batch_call(requests).await
        } else {
            let futures = requests.into_iter().map(|r| {
                let client = client.clone();
                async move { client.call_request(r).await }
            });
            futures::future::join_all(futures).await
        };
        let elapsed = started.elapsed();

        let ok = results.iter().filter(|r| r.is_ok()).count();
        println!("{ok}/{} calls succeeded in {} ms", results.len(), elapsed.as_millis());
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            println!("  error: {err}");
        }
        println!("{}", serde_json::to_string_pretty(&client.stats())?);
        println!("{}", serde_json::to_string_pretty(&client.health_check().await)?);
        anyhow::Ok(())
    })
}
