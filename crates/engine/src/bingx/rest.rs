use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, info, warn};

use common::{Bar, Error, ExchangeClient, Fill, Interval, OrderIntent, OrderSide, Result};

const MAINNET_URL: &str = "https://open-api.bingx.com";
const TESTNET_URL: &str = "https://open-api-vst.bingx.com";
const MAX_KLINES: usize = 1000;
const RECV_WINDOW_MS: u64 = 5000;
/// Delay after a candle boundary before asking for the closed candle.
const SETTLE_DELAY: StdDuration = StdDuration::from_secs(2);
const POLL_RETRIES: usize = 10;

/// REST client for BingX perpetual swaps (USDT-margined).
pub struct BingxClient {
    api_key: String,
    secret: String,
    base_url: &'static str,
    http: Client,
    /// Server time minus local time, in milliseconds.
    time_offset_ms: AtomicI64,
}

impl BingxClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>, testnet: bool) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(StdDuration::from_secs(15))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            api_key: api_key.into(),
            secret: secret.into(),
            base_url: if testnet { TESTNET_URL } else { MAINNET_URL },
            http,
            time_offset_ms: AtomicI64::new(0),
        })
    }

    /// `BTCUSDT` → `BTC-USDT`; already dashed symbols pass through.
    pub fn exchange_symbol(symbol: &str) -> String {
        if symbol.contains('-') {
            return symbol.to_string();
        }
        match symbol.strip_suffix("USDT") {
            Some(base) if !base.is_empty() => format!("{base}-USDT"),
            _ => symbol.to_string(),
        }
    }

    fn sign(&self, query: &str) -> Result<String> {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| Error::Exchange(format!("invalid API secret: {e}")))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn timestamp_ms(&self) -> i64 {
        Utc::now().timestamp_millis() + self.time_offset_ms.load(Ordering::Relaxed)
    }

    /// Sync the local clock offset against the exchange. Returns server time.
    pub async fn sync_time(&self) -> Result<DateTime<Utc>> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct ServerTime {
            server_time: i64,
        }
        let data: ServerTime = self
            .request(Method::GET, "/openApi/swap/v2/server/time", &[], false)
            .await?;
        let offset = data.server_time - Utc::now().timestamp_millis();
        self.time_offset_ms.store(offset, Ordering::Relaxed);
        debug!(offset_ms = offset, "Clock synced with BingX");
        millis_to_utc(data.server_time)
    }

    pub async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        let symbol = Self::exchange_symbol(symbol);
        for side in ["LONG", "SHORT"] {
            let params = [
                ("symbol", symbol.clone()),
                ("side", side.to_string()),
                ("leverage", leverage.to_string()),
            ];
            let _: Value = self
                .request(Method::POST, "/openApi/swap/v2/trade/leverage", &params, true)
                .await?;
        }
        info!(symbol = %symbol, leverage, "Leverage set");
        Ok(())
    }

    /// Absolute open quantity on `position_side` ("LONG" or "SHORT").
    async fn position_amount(&self, symbol: &str, position_side: &str) -> Result<f64> {
        let params = [("symbol", symbol.to_string())];
        let data: Vec<Value> = self
            .request(Method::GET, "/openApi/swap/v2/user/positions", &params, true)
            .await?;
        Ok(data
            .iter()
            .filter(|p| p.get("positionSide").and_then(Value::as_str) == Some(position_side))
            .filter_map(|p| p.get("positionAmt").map(number))
            .filter_map(Result::ok)
            .map(f64::abs)
            .sum())
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        signed: bool,
    ) -> Result<T> {
        let mut url = Url::parse(&format!("{}{path}", self.base_url))
            .map_err(|e| Error::Http(e.to_string()))?;
        let mut request = if signed {
            // Sign the raw sorted parameter string, send it URL-encoded.
            let mut pairs: Vec<(&str, String)> = params.to_vec();
            pairs.push(("recvWindow", RECV_WINDOW_MS.to_string()));
            pairs.push(("timestamp", self.timestamp_ms().to_string()));
            pairs.sort_by(|a, b| a.0.cmp(b.0));
            let raw = pairs
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("&");
            let signature = self.sign(&raw)?;
            url.query_pairs_mut()
                .extend_pairs(pairs.iter().map(|(k, v)| (*k, v.as_str())))
                .append_pair("signature", &signature);
            self.http
                .request(method, url)
                .header("X-BX-APIKEY", &self.api_key)
        } else {
            url.query_pairs_mut()
                .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
            self.http.request(method, url)
        };
        request = request.header("Accept", "application/json");

        let resp = request
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {body}")));
        }

        let envelope: Envelope<T> = serde_json::from_str(&body)?;
        if envelope.code != 0 {
            return Err(Error::Exchange(format!(
                "{path}: code {} {}",
                envelope.code, envelope.msg
            )));
        }
        envelope
            .data
            .ok_or_else(|| Error::Exchange(format!("{path}: response without data")))
    }

    async fn klines(&self, symbol: &str, interval: Interval, limit: usize) -> Result<Vec<Bar>> {
        let params = [
            ("symbol", Self::exchange_symbol(symbol)),
            ("interval", interval.as_str().to_string()),
            ("limit", limit.min(MAX_KLINES).to_string()),
        ];
        let rows: Vec<Value> = self
            .request(Method::GET, "/openApi/swap/v3/quote/klines", &params, false)
            .await?;
        let mut bars = rows.iter().map(parse_kline).collect::<Result<Vec<_>>>()?;
        bars.sort_by_key(|b| b.timestamp);
        bars.dedup_by_key(|b| b.timestamp);
        Ok(bars)
    }
}

#[async_trait]
impl ExchangeClient for BingxClient {
    async fn fetch_history(
        &self,
        symbol: &str,
        interval: Interval,
        count: usize,
    ) -> Result<Vec<Bar>> {
        // One extra row: the newest kline is usually still forming.
        let mut bars = self.klines(symbol, interval, count + 1).await?;
        let now = Utc.timestamp_millis_opt(self.timestamp_ms()).single().unwrap_or_else(Utc::now);
        let step = interval.duration();
        bars.retain(|b| b.timestamp + step <= now);
        let excess = bars.len().saturating_sub(count);
        bars.drain(..excess);
        Ok(bars)
    }

    async fn next_closed_bar(&self, symbol: &str, interval: Interval) -> Result<Bar> {
        let step_ms = interval.duration().num_milliseconds();
        let now_ms = self.timestamp_ms();
        let boundary = (now_ms / step_ms + 1) * step_ms;
        let wait = u64::try_from(boundary - now_ms).unwrap_or(0);
        tokio::time::sleep(StdDuration::from_millis(wait) + SETTLE_DELAY).await;

        let expected = millis_to_utc(boundary - step_ms)?;
        for attempt in 0..POLL_RETRIES {
            let bars = self.fetch_history(symbol, interval, 2).await?;
            match bars.last() {
                Some(bar) if bar.timestamp >= expected => return Ok(*bar),
                _ => {
                    debug!(attempt, %expected, "Closed candle not published yet");
                    tokio::time::sleep(SETTLE_DELAY).await;
                }
            }
        }
        Err(Error::Exchange(format!(
            "candle {expected} not available after {POLL_RETRIES} polls"
        )))
    }

    async fn place_order(&self, intent: &OrderIntent) -> Result<Fill> {
        let symbol = Self::exchange_symbol(&intent.symbol);
        // Hedge mode: a position side is always named; closes use the side
        // being reduced.
        let position_side = match (intent.side, intent.reduce_only) {
            (OrderSide::Buy, false) | (OrderSide::Sell, true) => "LONG",
            (OrderSide::Sell, false) | (OrderSide::Buy, true) => "SHORT",
        };

        if intent.reduce_only && self.position_amount(&symbol, position_side).await? == 0.0 {
            // Already flattened by the protective order attached at entry.
            warn!(symbol = %symbol, "Nothing to close on the exchange; treating as filled");
            return Ok(Fill {
                order_id: intent.id.clone(),
                symbol: intent.symbol.clone(),
                side: intent.side,
                fill_price: intent.reference_price,
                quantity: intent.quantity,
                timestamp: Utc::now(),
            });
        }

        let mut params = vec![
            ("symbol", symbol.clone()),
            ("side", intent.side.to_string()),
            ("positionSide", position_side.to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", intent.quantity.to_string()),
            ("clientOrderID", intent.id.clone()),
        ];
        if let Some(stop) = intent.stop_loss {
            params.push(("stopLoss", protective_order("STOP_MARKET", stop)));
        }
        if let Some(target) = intent.take_profit {
            params.push(("takeProfit", protective_order("TAKE_PROFIT_MARKET", target)));
        }

        debug!(symbol = %symbol, side = %intent.side, position_side, "Submitting order to BingX");
        let data: OrderData = self
            .request(Method::POST, "/openApi/swap/v2/trade/order", &params, true)
            .await?;

        let fill_price = data
            .order
            .avg_price
            .as_ref()
            .and_then(|v| number(v).ok())
            .filter(|p| *p > 0.0)
            .unwrap_or(intent.reference_price);

        Ok(Fill {
            order_id: data
                .order
                .order_id
                .map(|v| v.to_string().trim_matches('"').to_string())
                .unwrap_or_else(|| intent.id.clone()),
            symbol: intent.symbol.clone(),
            side: intent.side,
            fill_price,
            quantity: intent.quantity,
            timestamp: Utc::now(),
        })
    }

    async fn account_equity(&self) -> Result<f64> {
        let balances: Vec<Value> = self
            .request(Method::GET, "/openApi/swap/v3/user/balance", &[], true)
            .await?;
        let usdt = balances
            .iter()
            .find(|b| b.get("asset").and_then(Value::as_str) == Some("USDT"))
            .or_else(|| balances.first())
            .ok_or_else(|| Error::Exchange("empty balance response".into()))?;
        usdt.get("equity")
            .or_else(|| usdt.get("balance"))
            .map(number)
            .unwrap_or_else(|| Err(Error::Exchange("balance without equity".into())))
    }
}

fn protective_order(kind: &str, price: f64) -> String {
    serde_json::json!({
        "type": kind,
        "stopPrice": price,
        "price": price,
        "workingType": "MARK_PRICE",
    })
    .to_string()
}

fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| Error::Exchange(format!("invalid timestamp {ms}")))
}

/// BingX sends numbers as JSON numbers or as strings.
fn number(v: &Value) -> Result<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| Error::Exchange(format!("expected a number, got {v}")))
}

/// Kline rows come as objects (`time`, `open`, ...) or as positional arrays.
fn parse_kline(row: &Value) -> Result<Bar> {
    let field = |name: &str, pos: usize| -> Result<f64> {
        row.get(name)
            .or_else(|| row.get(pos))
            .map(number)
            .unwrap_or_else(|| Err(Error::Exchange(format!("kline missing '{name}': {row}"))))
    };
    let time = field("time", 0)?;
    Ok(Bar::new(
        millis_to_utc(time as i64)?,
        field("open", 1)?,
        field("high", 2)?,
        field("low", 3)?,
        field("close", 4)?,
        field("volume", 5)?,
    ))
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Deserialize)]
struct OrderData {
    order: OrderDetail,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderDetail {
    order_id: Option<Value>,
    avg_price: Option<Value>,
}
