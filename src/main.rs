use perpsentinel::autonomy::discovery::{default_gate_config, FundingRateDiscovery};
use perpsentinel::autonomy::{AutonomyConfig, AutonomyLoop};
use perpsentinel::config::Config;
use perpsentinel::journal::{Journal, SqliteJournal};
use perpsentinel::limiter::SqliteLimiter;
use perpsentinel::llm::OpenRouterLlm;
use perpsentinel::orchestrator::builtin_tools::default_registry;
use perpsentinel::orchestrator::{Orchestrator, OrchestratorConfig, RunOptions};
use perpsentinel::scheduler::{JobHandler, Schedule, ScheduledJob, Scheduler, SqliteSchedulerStore};
use perpsentinel::venue::HyperliquidVenue;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

struct AutonomyJob(Arc<AutonomyLoop>);

#[async_trait::async_trait]
impl JobHandler for AutonomyJob {
    async fn run(&self) -> anyhow::Result<()> {
        let summary = self.0.tick().await?;
        info!(executed = summary.executed, failed = summary.failed, blocked = summary.blocked, "autonomy scan complete");
        for line in &summary.lines {
            info!("{line}");
        }
        Ok(())
    }
}

struct DailyReportJob {
    journal: Arc<SqliteJournal>,
}

#[async_trait::async_trait]
impl JobHandler for DailyReportJob {
    async fn run(&self) -> anyhow::Result<()> {
        let pnls = self.journal.recent_close_pnls(50).await?;
        let total: f64 = pnls.iter().sum();
        info!(trailing_close_pnl_total = total, count = pnls.len(), "daily report");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = Config::from_env()?;
    info!(database_path = %config.database_path, model = %config.llm_model, "starting perpsentinel");

    let journal = Arc::new(SqliteJournal::open(&config.database_path)?);
    let limiter = Arc::new(SqliteLimiter::open(&config.database_path, config.autonomy_daily_budget_usd)?);
    let scheduler_store = Arc::new(SqliteSchedulerStore::open(&config.database_path)?);

    let http = reqwest::Client::new();
    let llm = Arc::new(OpenRouterLlm::from_env(http.clone(), config.llm_model.clone())?);
    let venue = Arc::new(HyperliquidVenue::from_env(http)?);

    let registry = Arc::new(default_registry());

    let orchestrator = Orchestrator::new(
        llm.clone(),
        venue.clone(),
        limiter.clone(),
        journal.clone(),
        journal.clone(),
        journal.clone(),
        registry,
        OrchestratorConfig {
            identity_prompt: "You are a disciplined, risk-aware perpetual futures trading agent.".to_string(),
            max_parallel_read_steps: config.max_parallel_read_steps,
            base_slippage_bps: config.base_slippage_bps,
            max_order_retries: config.max_order_retries,
            default_symbol: config.default_symbol().to_string(),
            per_order_reserve_usd: config.autonomy_per_trade_cap_usd,
            fragility_scan_enabled: true,
        },
    );

    // A goal passed as a command-line argument runs once through the
    // orchestrator and exits; no chat transport lives in this binary.
    if let Some(goal) = std::env::args().nth(1) {
        let outcome = orchestrator.run(&goal, RunOptions::default()).await?;
        println!("{}", outcome.response);
        return Ok(());
    }

    let discovery = Arc::new(FundingRateDiscovery::new(
        venue.clone(),
        config.default_symbols.clone(),
        config.autonomy_per_trade_cap_usd,
        config.autonomy_leverage_cap,
    ));
    let autonomy_loop = Arc::new(AutonomyLoop::new(
        discovery,
        venue.clone(),
        limiter.clone(),
        journal.clone(),
        AutonomyConfig {
            gate: default_gate_config(),
            concurrent_position_cap: config.autonomy_concurrent_position_cap as u32,
            per_trade_cap_usd: config.autonomy_per_trade_cap_usd,
            min_order_notional_usd: config.autonomy_min_order_usd,
            news_size_cap_fraction: config.autonomy_news_size_cap_fraction,
            configured_leverage_cap: config.autonomy_leverage_cap,
            max_notional_usd: config.autonomy_daily_budget_usd,
            loss_streak_pause_threshold: config.autonomy_loss_streak_threshold.unwrap_or(4),
            loss_streak_pause_secs: config.autonomy_loss_streak_pause_secs as i64,
        },
    ));

    let mut scheduler = Scheduler::new(scheduler_store, "perpsentinel-main");
    scheduler
        .register(ScheduledJob {
            name: "autonomy_scan".to_string(),
            schedule: Schedule::Interval(chrono::Duration::seconds(config.autonomy_base_interval_secs as i64)),
            lease: chrono::Duration::from_std(config.scheduler_lease)?,
            handler: Arc::new(AutonomyJob(autonomy_loop)),
        })
        .await?;

    let (report_hour, report_minute) = config.daily_report_time_utc;
    scheduler
        .register(ScheduledJob {
            name: "daily_report".to_string(),
            schedule: Schedule::Daily(
                chrono::NaiveTime::from_hms_opt(report_hour, report_minute, 0)
                    .unwrap_or_else(|| chrono::NaiveTime::from_hms_opt(13, 0, 0).unwrap()),
            ),
            lease: chrono::Duration::seconds(60),
            handler: Arc::new(DailyReportJob { journal: journal.clone() }),
        })
        .await?;

    let cancel = scheduler.cancel_token();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown signal received");
        cancel.cancel();
    });

    let poll_interval = config.scheduler_poll_interval;
    let scheduler_task = tokio::spawn(async move { scheduler.run(poll_interval).await });
    if let Err(e) = scheduler_task.await {
        error!(error = %e, "scheduler task panicked");
    }

    Ok(())
}
