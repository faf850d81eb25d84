//! ledgerflow: the weekly personal-finance job.
//!
//! Runs the six workflow stages once against the configured services, prints
//! the JSON run report to stdout, and exits non-zero when the run failed.

use anyhow::{anyhow, Context};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

use ledgerflow::config::LedgerflowConfig;
use ledgerflow::observability::{init_tracing, LogFormat};
use ledgerflow::pipeline::{RunReport, StageOrchestrator};
use ledgerflow::resilience::{AuthTokenCache, CircuitBreakerRegistry, ResilientService, RetryPolicy};
use ledgerflow::services::{HttpServiceClient, ServiceKind};
use ledgerflow::workflow::{weekly_pipeline, WorkflowServices};

/// Weekly transaction categorization, budget report and savings transfer.
#[derive(Parser, Debug)]
#[command(name = "ledgerflow")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, default_value = "text")]
    log_format: LogFormat,

    /// Dry run - validate configuration without processing.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.log_format).map_err(|e| anyhow!(e))?;

    let config = LedgerflowConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    if args.dry_run {
        info!("Dry run mode - validating configuration");
        for kind in ServiceKind::ALL {
            info!(service = %kind, base_url = %config.services.get(kind).base_url, "Service");
        }
        info!("Configuration is valid");
        return Ok(ExitCode::SUCCESS);
    }

    let tokens = Arc::new(AuthTokenCache::new(config.auth.clone()));
    let breakers = CircuitBreakerRegistry::new(config.breaker.clone());
    let services = WorkflowServices::try_build(|kind| {
        let client = HttpServiceClient::new(kind.as_str(), config.services.get(kind).clone())?;
        Ok::<_, anyhow::Error>(Arc::new(ResilientService::new(
            Arc::new(client),
            Arc::clone(&tokens),
            &breakers,
            RetryPolicy::new(config.retry_for(kind)),
        )))
    })?;

    let stages = weekly_pipeline(&services, &config.workflow);
    let ctx = StageOrchestrator::new("weekly_finance").run(&stages).await;

    let report = RunReport::from_context(&ctx).with_circuits(breakers.snapshot());
    println!("{}", report.to_json()?);

    Ok(if report.is_failed() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
