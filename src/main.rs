use anyhow::Context;
use clap::Parser;
use sheet_calc::utils::logger;
use sheet_calc::{
    CliArgs, ErrorKind, ExecutionResponse, RequestInfo, RuntimeConfig, ScriptEngine,
    ServiceDescriptor, ServiceExecutor,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let config = match &args.config {
        Some(path) => match RuntimeConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("❌ {}", e);
                eprintln!("💡 建議: {}", e.recovery_suggestion());
                std::process::exit(1);
            }
        },
        None => RuntimeConfig::default(),
    };
    let config = match &args.telemetry_file {
        Some(path) => config.with_telemetry_file(path),
        None => config,
    };

    // 初始化日誌
    let verbose = args.verbose || config.logging.verbose;
    if config.json_logging() {
        logger::init_json_logger(verbose);
    } else {
        logger::init_cli_logger(verbose);
    }

    tracing::info!("Starting sheet-calc CLI");
    tracing::debug!("CLI args: {:?}", args);

    let service = match ServiceDescriptor::from_file(&args.service) {
        Ok(service) => service,
        Err(e) => {
            tracing::error!("❌ Failed to load service descriptor: {}", e);
            tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };
    let inputs = args
        .load_inputs()
        .context("failed to read inputs")?;

    let telemetry = config
        .build_telemetry()
        .context("failed to set up telemetry")?;
    let executor = ServiceExecutor::new(ScriptEngine::new(), Arc::new(config.build_cache()), telemetry)
    .with_options(config.execution_options());

    let request = RequestInfo {
        client: Some("sheet-calc-cli".to_string()),
        ..RequestInfo::default()
    };

    let mut exit_code = 0;
    for run in 1..=args.repeat.max(1) {
        tracing::debug!("Run {}/{}", run, args.repeat.max(1));
        let outcome = executor.execute(&service, &inputs, &request).await;
        if let Err(error) = &outcome {
            exit_code = match error.error {
                ErrorKind::Validation => 2,
                ErrorKind::Calculation => 1,
            };
        }
        let response = ExecutionResponse::from(outcome);
        println!("{}", serde_json::to_string_pretty(&response)?);
    }

    // 結束前等待背景的 telemetry 任務寫完
    executor.flush_telemetry().await;

    if exit_code > 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
