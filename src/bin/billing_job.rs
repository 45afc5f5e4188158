//! Computes billing snapshots for the trailing months and stores them.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use cluster_billing::config::{BillingConfig, ConfigBuilder, MemoryConfigProvider};
use cluster_billing::job::BillingJob;
use cluster_billing::observability::{MetricsSummary, init_tracing};
use cluster_billing::store::StoreFactory;

#[derive(Parser, Debug)]
#[command(author, version, about = "Per-user cluster billing snapshot job")]
struct Cli {
    /// JSON config file; `BILLING_*` environment variables take precedence
    #[arg(long, default_value = "billing.json")]
    config: PathBuf,
    /// Number of complete months to compute, overriding `job_months`
    #[arg(long)]
    months: Option<u32>,
    #[arg(long)]
    json_logs: bool,
}

async fn load_config(cli: &Cli) -> cluster_billing::Result<BillingConfig> {
    let mut overrides = MemoryConfigProvider::named("cli");
    if let Some(months) = cli.months {
        overrides = overrides.value("job_months", months.to_string());
    }
    let provider = ConfigBuilder::new()
        .memory(overrides)
        .env()
        .file(&cli.config)
        .build();
    Ok(BillingConfig::load(&provider).await?)
}

async fn run(config: BillingConfig) -> cluster_billing::Result<()> {
    let store = StoreFactory::connect(&config.store).await?;

    let job = BillingJob::from_config(&config, store)?;
    let result = job.run(config.job_months).await;

    let summary = MetricsSummary::from_metrics(job.metrics());
    tracing::info!(?summary, "Billing job metrics");

    let report = result?;
    tracing::info!(
        windows = report.windows.len(),
        snapshots = report.snapshots_written,
        "Billing job finished"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {}", e);
            return ExitCode::from(2);
        }
    };
    init_tracing(cli.json_logs || config.log_json);

    tokio::select! {
        result = run(config) => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, category = ?e.category(), "Billing job failed");
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted; snapshots already written are kept");
            ExitCode::from(130)
        }
    }
}
