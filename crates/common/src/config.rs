use chrono::{DateTime, FixedOffset, NaiveTime, Utc};

/// Which runner the process starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Replay a fixed historical window and print the trade ledger.
    Backtest,
    /// Poll the provider and submit real orders.
    Live,
    /// Poll the provider and simulate fills in-process.
    Paper,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Backtest => write!(f, "backtest"),
            RunMode::Live => write!(f, "live"),
            RunMode::Paper => write!(f, "paper"),
        }
    }
}

/// Trading-session window evaluated in a fixed UTC offset.
///
/// Equities sessions are clock-of-day windows (e.g. 09:30–16:00 New York);
/// crypto runs around the clock via `always_open`.
#[derive(Debug, Clone, Copy)]
pub struct SessionHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
    offset: FixedOffset,
    pub always_open: bool,
}

impl SessionHours {
    pub fn new(open: NaiveTime, close: NaiveTime, utc_offset_hours: i32) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_hours * 3600)
            .unwrap_or_else(|| panic!("Invalid session UTC offset: {utc_offset_hours}"));
        Self {
            open,
            close,
            offset,
            always_open: false,
        }
    }

    /// 24/7 session, used for crypto symbols.
    pub fn always_open() -> Self {
        Self {
            open: NaiveTime::MIN,
            close: NaiveTime::MIN,
            offset: FixedOffset::east_opt(0).unwrap(),
            always_open: true,
        }
    }

    /// Whether `now` falls inside the trading session.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        if self.always_open {
            return true;
        }
        let local = now.with_timezone(&self.offset).time();
        local >= self.open && local < self.close
    }
}

/// All process configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
#[derive(Debug, Clone)]
pub struct Config {
    // Market-data credentials
    pub data_key: String,
    pub data_secret: String,

    // Trading credentials (required only in live mode)
    pub trade_key: Option<String>,
    pub trade_secret: Option<String>,

    // Notification webhook, optional
    pub webhook_url: Option<String>,

    // Audit database
    pub database_url: String,

    pub run_mode: RunMode,
    pub poll_interval_secs: u64,
    pub paper_slippage_bps: f64,
    pub strategy_config_path: String,
    pub session: SessionHours,

    // Backtest window; defaults are chosen by the runner when absent
    pub backtest_start: Option<DateTime<Utc>>,
    pub backtest_end: Option<DateTime<Utc>>,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let run_mode = match required_env("RUN_MODE").to_lowercase().as_str() {
            "backtest" => RunMode::Backtest,
            "live" => RunMode::Live,
            "paper" => RunMode::Paper,
            other => panic!("ERROR: RUN_MODE must be 'backtest', 'live' or 'paper', got: '{other}'"),
        };

        let session = if optional_env("SESSION_ALWAYS_OPEN")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
        {
            SessionHours::always_open()
        } else {
            let open = parse_time(&optional_env("SESSION_OPEN").unwrap_or_else(|| "09:30".into()));
            let close =
                parse_time(&optional_env("SESSION_CLOSE").unwrap_or_else(|| "16:00".into()));
            let offset = optional_env("SESSION_UTC_OFFSET")
                .and_then(|v| v.parse().ok())
                .unwrap_or(-4);
            SessionHours::new(open, close, offset)
        };

        Config {
            data_key: required_env("DATA_KEY"),
            data_secret: required_env("DATA_SECRET"),
            trade_key: optional_env("TRADE_KEY"),
            trade_secret: optional_env("TRADE_SECRET"),
            webhook_url: optional_env("WEBHOOK_URL"),
            database_url: required_env("DATABASE_URL"),
            run_mode,
            poll_interval_secs: optional_env("POLL_INTERVAL_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            paper_slippage_bps: optional_env("PAPER_SLIPPAGE_BPS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(10.0),
            strategy_config_path: optional_env("STRATEGY_CONFIG_PATH")
                .unwrap_or_else(|| "config/strategies.toml".to_string()),
            session,
            backtest_start: optional_env("BACKTEST_START").map(|v| parse_datetime("BACKTEST_START", &v)),
            backtest_end: optional_env("BACKTEST_END").map(|v| parse_datetime("BACKTEST_END", &v)),
        }
    }
}

fn parse_time(value: &str) -> NaiveTime {
    NaiveTime::parse_from_str(value, "%H:%M")
        .unwrap_or_else(|_| panic!("Session time must be HH:MM, got: '{value}'"))
}

fn parse_datetime(key: &str, value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| panic!("{key} must be RFC 3339, got: '{value}'"))
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}
