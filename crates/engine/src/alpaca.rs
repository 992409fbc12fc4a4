use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use common::{
    Bar, BarSource, Error, ExecutionGateway, Fill, OpenPosition, Order, OrderSide, Result,
    Timeframe,
};

const DATA_URL: &str = "https://data.alpaca.markets";
const TRADING_URL: &str = "https://paper-api.alpaca.markets";

/// How long to wait for an order to reach `filled` before giving up and
/// reporting the submission as unresolved.
const FILL_POLL_ATTEMPTS: u32 = 10;
const FILL_POLL_DELAY_MS: u64 = 500;

/// REST client for the Alpaca data and trading APIs.
///
/// Data and trading use separate credentials, so the process holds two
/// instances: one built from the data keys used as a `BarSource`, one
/// from the trading keys used as an `ExecutionGateway`.
pub struct AlpacaClient {
    key: String,
    secret: String,
    http: Client,
}

impl AlpacaClient {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
            http: Client::builder()
                .use_rustls_tls()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self
            .http
            .get(url)
            .header("APCA-API-KEY-ID", &self.key)
            .header("APCA-API-SECRET-KEY", &self.secret)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Gateway(format!("HTTP {status}: {body}")));
        }
        serde_json::from_str(&body).map_err(|e| Error::Gateway(format!("bad response: {e}")))
    }

    async fn fetch_order(&self, id: &str) -> Result<OrderResponse> {
        self.get_json(&format!("{TRADING_URL}/v2/orders/{id}")).await
    }

    /// Poll the submitted order until the venue reports it filled. An
    /// explicit terminal rejection maps to `OrderRejected`; an order that
    /// is still working after the poll budget stays ambiguous, which the
    /// caller treats as an unresolved submission.
    async fn await_fill(&self, submitted: OrderResponse, order: &Order) -> Result<Fill> {
        let mut current = submitted;
        for attempt in 0..FILL_POLL_ATTEMPTS {
            match current.status.as_str() {
                "filled" => return fill_from_response(&current, order),
                "rejected" | "canceled" | "expired" => {
                    return Err(Error::OrderRejected {
                        reason: format!("order {} {}", current.id, current.status),
                    });
                }
                other => {
                    debug!(order_id = %current.id, status = other, attempt, "awaiting fill");
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(FILL_POLL_DELAY_MS)).await;
            current = self.fetch_order(&current.id).await?;
        }
        Err(Error::Gateway(format!(
            "order {} still '{}' after {} polls",
            current.id, current.status, FILL_POLL_ATTEMPTS
        )))
    }
}

#[async_trait]
impl BarSource for AlpacaClient {
    async fn get_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>> {
        // Crypto symbols carry a slash ("BTC/USD") and live on a separate
        // endpoint with a per-symbol response map.
        let raw = if symbol.contains('/') {
            let url = format!(
                "{DATA_URL}/v1beta3/crypto/us/bars?symbols={}&timeframe={timeframe}&start={}&end={}&limit=1000",
                symbol.replace('/', "%2F"),
                start.to_rfc3339(),
                end.to_rfc3339(),
            );
            let mut resp: CryptoBarsResponse = self.get_json(&url).await?;
            resp.bars.remove(symbol)
        } else {
            let url = format!(
                "{DATA_URL}/v2/stocks/{symbol}/bars?timeframe={timeframe}&start={}&end={}&limit=1000&feed=iex",
                start.to_rfc3339(),
                end.to_rfc3339(),
            );
            let resp: StockBarsResponse = self.get_json(&url).await?;
            resp.bars
        };

        // An absent or empty window is a skip for the runner, not an error.
        let raw = raw.unwrap_or_default();
        debug!(symbol, bars = raw.len(), "fetched bars");
        Ok(raw
            .into_iter()
            .map(|b| Bar {
                timestamp: b.t,
                open: b.o,
                high: b.h,
                low: b.l,
                close: b.c,
                volume: b.v,
            })
            .collect())
    }
}

#[async_trait]
impl ExecutionGateway for AlpacaClient {
    async fn submit_order(&self, order: &Order) -> Result<Fill> {
        let body = serde_json::json!({
            "symbol": order.symbol,
            "qty": order.quantity.to_string(),
            "side": order.side.to_string(),
            "type": "market",
            "time_in_force": order.time_in_force.to_string(),
            "client_order_id": order.id,
        });
        debug!(symbol = %order.symbol, side = %order.side, qty = order.quantity, "submitting order");

        let resp = self
            .http
            .post(format!("{TRADING_URL}/v2/orders"))
            .header("APCA-API-KEY-ID", &self.key)
            .header("APCA-API-SECRET-KEY", &self.secret)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if status == reqwest::StatusCode::FORBIDDEN
            || status == reqwest::StatusCode::UNPROCESSABLE_ENTITY
        {
            // The venue refused the order outright; nothing was executed.
            return Err(Error::OrderRejected {
                reason: format!("HTTP {status}: {text}"),
            });
        }
        if !status.is_success() {
            return Err(Error::Gateway(format!("HTTP {status}: {text}")));
        }

        let submitted: OrderResponse =
            serde_json::from_str(&text).map_err(|e| Error::Gateway(format!("bad response: {e}")))?;
        self.await_fill(submitted, order).await
    }

    async fn open_positions(&self) -> Result<Vec<OpenPosition>> {
        let raw: Vec<PositionResponse> =
            self.get_json(&format!("{TRADING_URL}/v2/positions")).await?;
        let mut positions = Vec::with_capacity(raw.len());
        for p in raw {
            let side = match p.side.as_str() {
                "long" => OrderSide::Buy,
                "short" => OrderSide::Sell,
                other => {
                    warn!(symbol = %p.symbol, side = other, "skipping position with unknown side");
                    continue;
                }
            };
            positions.push(OpenPosition {
                symbol: p.symbol,
                side,
                entry_price: parse_price(&p.avg_entry_price)?,
                quantity: parse_price(&p.qty)?,
            });
        }
        Ok(positions)
    }
}

fn fill_from_response(resp: &OrderResponse, order: &Order) -> Result<Fill> {
    let price = resp
        .filled_avg_price
        .as_deref()
        .ok_or_else(|| Error::Gateway(format!("order {} filled without a price", resp.id)))?;
    let timestamp = resp
        .filled_at
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(order.submitted_at);
    Ok(Fill {
        order_id: resp.id.clone(),
        symbol: order.symbol.clone(),
        side: order.side,
        fill_price: parse_price(price)?,
        quantity: order.quantity,
        timestamp,
    })
}

fn parse_price(value: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .map_err(|e| Error::Gateway(format!("bad numeric field '{value}': {e}")))
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StockBarsResponse {
    #[serde(default)]
    bars: Option<Vec<RawBar>>,
}

#[derive(Deserialize)]
struct CryptoBarsResponse {
    #[serde(default)]
    bars: std::collections::HashMap<String, Vec<RawBar>>,
}

#[derive(Deserialize)]
struct RawBar {
    t: DateTime<Utc>,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
}

#[derive(Deserialize)]
struct OrderResponse {
    id: String,
    status: String,
    #[serde(default)]
    filled_avg_price: Option<String>,
    #[serde(default)]
    filled_at: Option<String>,
}

#[derive(Deserialize)]
struct PositionResponse {
    symbol: String,
    side: String,
    avg_entry_price: String,
    qty: String,
}
