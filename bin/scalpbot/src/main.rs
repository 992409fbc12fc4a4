use std::sync::Arc;

use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common::{BarSource, Config, ExecutionGateway, Notifier, RunMode};
use engine::{
    run_pair_backtest, run_pair_live, run_single_backtest, run_single_live,
    startup_position_audit, AlpacaClient, AuditLog, LiveGateway, LiveSettings, PairInstance,
    StrategyInstance, WebhookNotifier,
};
use paper::PaperGateway;
use strategy::StrategyFileConfig;

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    info!(mode = %cfg.run_mode, "ScalpBot starting");

    let strategy_file = StrategyFileConfig::load(&cfg.strategy_config_path);
    if strategy_file.strategies.is_empty() && strategy_file.pairs.is_empty() {
        panic!(
            "No strategies configured in '{}'. Add at least one [[strategy]] or [[pair]] entry.",
            cfg.strategy_config_path
        );
    }

    // ── Database ──────────────────────────────────────────────────────────────
    let db = SqlitePool::connect(&cfg.database_url)
        .await
        .unwrap_or_else(|e| panic!("Failed to connect to database: {e}"));
    let audit = Arc::new(
        AuditLog::new(db)
            .await
            .unwrap_or_else(|e| panic!("Failed to prepare audit schema: {e}")),
    );
    info!("Database ready");

    // ── Market data ───────────────────────────────────────────────────────────
    let data: Arc<dyn BarSource> = Arc::new(AlpacaClient::new(&cfg.data_key, &cfg.data_secret));

    match cfg.run_mode {
        RunMode::Backtest => run_backtests(&cfg, &strategy_file, data, &audit).await,
        RunMode::Live | RunMode::Paper => run_polling(&cfg, &strategy_file, data, &audit).await,
    }
}

/// Replay every configured strategy over the configured window and print
/// the ledgers; trades are persisted in one pass per strategy at the end.
async fn run_backtests(
    cfg: &Config,
    strategy_file: &StrategyFileConfig,
    data: Arc<dyn BarSource>,
    audit: &AuditLog,
) {
    let end = cfg.backtest_end.unwrap_or_else(Utc::now);
    let start = cfg.backtest_start.unwrap_or(end - Duration::days(5));
    info!(start = %start, end = %end, "backtest window");

    for scfg in &strategy_file.strategies {
        let mut instance = StrategyInstance::from_config(scfg);
        let bars = data
            .get_bars(&instance.symbol, instance.timeframe, start, end)
            .await
            .unwrap_or_else(|e| panic!("Failed to fetch bars for '{}': {e}", instance.symbol));
        if bars.is_empty() {
            warn!(strategy = %instance.name, "no bars in the backtest window; skipping");
            continue;
        }
        let report = run_single_backtest(&mut instance, &bars, cfg.paper_slippage_bps)
            .await
            .unwrap_or_else(|e| panic!("Backtest '{}' failed: {e}", instance.name));
        println!("{}: {}", instance.name, report.summary());
        if let Err(e) = audit.record_ledger(&instance.name, &report.trades).await {
            error!(strategy = %instance.name, error = %e, "failed to persist ledger");
        }
    }

    for pcfg in &strategy_file.pairs {
        let mut instance = PairInstance::from_config(pcfg);
        let symbol_a = instance.tracker.settings().symbol_a.clone();
        let symbol_b = instance.tracker.settings().symbol_b.clone();
        let bars_a = data
            .get_bars(&symbol_a, instance.timeframe, start, end)
            .await
            .unwrap_or_else(|e| panic!("Failed to fetch bars for '{symbol_a}': {e}"));
        let bars_b = data
            .get_bars(&symbol_b, instance.timeframe, start, end)
            .await
            .unwrap_or_else(|e| panic!("Failed to fetch bars for '{symbol_b}': {e}"));
        if bars_a.is_empty() || bars_b.is_empty() {
            warn!(pair = %instance.name, "no bars in the backtest window; skipping");
            continue;
        }
        let report = run_pair_backtest(&mut instance, &bars_a, &bars_b, cfg.paper_slippage_bps)
            .await
            .unwrap_or_else(|e| panic!("Backtest '{}' failed: {e}", instance.name));
        println!("{}: {}", instance.name, report.summary());
        if let Err(e) = audit.record_ledger(&instance.name, &report.trades).await {
            error!(pair = %instance.name, error = %e, "failed to persist ledger");
        }
    }
}

/// Spawn one polling loop per configured strategy and wait for ctrl-c.
/// Loops stop at their next cycle boundary once the flag flips.
async fn run_polling(
    cfg: &Config,
    strategy_file: &StrategyFileConfig,
    data: Arc<dyn BarSource>,
    audit: &Arc<AuditLog>,
) {
    let gateway = match cfg.run_mode {
        RunMode::Live => {
            let key = cfg
                .trade_key
                .as_deref()
                .unwrap_or_else(|| panic!("TRADE_KEY is required in live mode"));
            let secret = cfg
                .trade_secret
                .as_deref()
                .unwrap_or_else(|| panic!("TRADE_SECRET is required in live mode"));
            info!("Live trading mode — orders go to the venue");
            LiveGateway::Real(Arc::new(AlpacaClient::new(key, secret)) as Arc<dyn ExecutionGateway>)
        }
        _ => {
            info!(
                slippage_bps = cfg.paper_slippage_bps,
                "Paper trading mode — fills simulated in-process"
            );
            LiveGateway::Paper(Arc::new(PaperGateway::new(cfg.paper_slippage_bps)))
        }
    };

    startup_position_audit(&gateway).await;

    let notifier: Option<Arc<dyn Notifier>> = cfg
        .webhook_url
        .as_ref()
        .map(|url| Arc::new(WebhookNotifier::new(url.clone())) as Arc<dyn Notifier>);

    let settings = LiveSettings::from_config(cfg);
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    for scfg in &strategy_file.strategies {
        let instance = StrategyInstance::from_config(scfg);
        tasks.push(tokio::spawn(run_single_live(
            instance,
            data.clone(),
            gateway.clone(),
            notifier.clone(),
            audit.clone(),
            settings.clone(),
            stop_rx.clone(),
        )));
    }
    for pcfg in &strategy_file.pairs {
        let instance = PairInstance::from_config(pcfg);
        tasks.push(tokio::spawn(run_pair_live(
            instance,
            data.clone(),
            gateway.clone(),
            notifier.clone(),
            audit.clone(),
            settings.clone(),
            stop_rx.clone(),
        )));
    }

    info!(loops = tasks.len(), "all strategy loops started; ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .unwrap_or_else(|e| panic!("Failed to listen for shutdown signal: {e}"));
    info!("Shutdown signal received; stopping at the next cycle boundary");
    let _ = stop_tx.send(true);

    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "strategy loop panicked");
        }
    }
    info!("All loops stopped. Exiting.");
}
