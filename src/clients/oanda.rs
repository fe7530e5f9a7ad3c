// OANDA v20 REST and streaming client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info};
use uuid::Uuid;

use super::gateway::{format_price, ExecutionGateway};
use super::stream::{decode_lines, parse_time, MessageStream, StreamConnector};
use crate::config::VenueConfig;
use crate::core::types::{
    AccountSnapshot, Bar, CandleQuery, ConversionFactors, Granularity, InstrumentRecord,
    LimitOrder, OrderAck, PendingOrder, PositionSet, StreamTarget,
};
use crate::error::{TradingError, TradingResult};

/// Tag stamped on every order this bot creates
pub const ORDER_TAG: &str = "fx-grid";

#[derive(Debug, Clone)]
pub struct OandaClient {
    client: reqwest::Client,
    stream_client: reqwest::Client,
    rest_url: String,
    stream_url: String,
    token: String,
    account_id: String,
}

impl OandaClient {
    pub fn new(
        rest_url: impl Into<String>,
        stream_url: impl Into<String>,
        token: impl Into<String>,
        account_id: impl Into<String>,
        request_timeout: Duration,
    ) -> TradingResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        // Streams stay open indefinitely, so only the connect phase is bounded
        let stream_client = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            stream_client,
            rest_url: rest_url.into().trim_end_matches('/').to_string(),
            stream_url: stream_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            account_id: account_id.into(),
        })
    }

    /// Build a client from config, resolving the account when none is configured
    pub async fn connect(config: &VenueConfig) -> TradingResult<Self> {
        let token = config.access_token()?;
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let mut client = Self::new(config.rest_url(), config.stream_url(), token, "", timeout)?;

        client.account_id = match &config.account_id {
            Some(id) => id.clone(),
            None => client
                .list_accounts()
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| {
                    TradingError::Configuration("token has no accessible accounts".to_string())
                })?,
        };

        info!("🔗 Using OANDA account {} ({:?})", client.account_id, config.environment);
        Ok(client)
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Account ids visible to the token, primary first
    pub async fn list_accounts(&self) -> TradingResult<Vec<String>> {
        let body = self.get("/v3/accounts", &[]).await?;
        let accounts = body
            .get("accounts")
            .and_then(|a| a.as_array())
            .ok_or_else(|| TradingError::ApiResponse("missing accounts".to_string()))?;

        Ok(accounts
            .iter()
            .filter_map(|a| a.get("id").and_then(|id| id.as_str()).map(str::to_string))
            .collect())
    }

    fn account_path(&self, suffix: &str) -> String {
        format!("/v3/accounts/{}{}", self.account_id, suffix)
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> TradingResult<Value> {
        let url = format!("{}{}", self.rest_url, path);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .header("Accept-Datetime-Format", "RFC3339")
            .query(query)
            .send()
            .await?;

        read_json(response).await
    }

    async fn put(&self, path: &str, body: Option<Value>) -> TradingResult<Value> {
        let url = format!("{}{}", self.rest_url, path);
        debug!("PUT {}", url);

        let mut request = self
            .client
            .put(&url)
            .bearer_auth(&self.token)
            .header("Accept-Datetime-Format", "RFC3339");
        if let Some(body) = body {
            request = request.json(&body);
        }

        read_json(request.send().await?).await
    }

    fn order_body(order: &LimitOrder) -> Value {
        let precision = order.price_precision;
        let mut body = Map::new();
        body.insert("type".into(), json!("LIMIT"));
        body.insert("instrument".into(), json!(order.instrument));
        body.insert("units".into(), json!(order.units.to_string()));
        body.insert("price".into(), json!(format_price(order.price, precision)));
        body.insert("timeInForce".into(), json!("GTC"));
        body.insert("positionFill".into(), json!("DEFAULT"));
        body.insert(
            "clientExtensions".into(),
            json!({ "id": format!("{}-{}", ORDER_TAG, Uuid::new_v4()), "tag": ORDER_TAG }),
        );

        if let Some(tp) = order.take_profit {
            body.insert("takeProfitOnFill".into(), json!({ "price": format_price(tp, precision) }));
        }
        if let Some(sl) = order.stop_loss {
            body.insert("stopLossOnFill".into(), json!({ "price": format_price(sl, precision) }));
        }
        if let Some(distance) = order.trailing_stop_distance {
            body.insert(
                "trailingStopLossOnFill".into(),
                json!({ "distance": format_price(distance, precision) }),
            );
        }

        json!({ "order": Value::Object(body) })
    }
}

/// Map a venue response to JSON or a typed error
async fn read_json(response: Response) -> TradingResult<Value> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let text = response.text().await.unwrap_or_default();
    Err(status_error(status, &text))
}

fn status_error(status: StatusCode, text: &str) -> TradingError {
    let message = serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| v.get("errorMessage").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| text.to_string());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            TradingError::ApiAuthentication(format!("{}: {}", status, message))
        }
        StatusCode::TOO_MANY_REQUESTS => TradingError::ApiRateLimit(message),
        _ => TradingError::ApiResponse(format!("{}: {}", status, message)),
    }
}

/// Rejection text from an order-create error body
fn rejection_text(body: &Value) -> String {
    let reason = body
        .get("orderRejectTransaction")
        .and_then(|t| t.get("rejectReason"))
        .or_else(|| body.get("errorCode"))
        .and_then(|r| r.as_str())
        .unwrap_or_default();
    let message = body
        .get("errorMessage")
        .and_then(|m| m.as_str())
        .unwrap_or_default();

    format!("{} {}", reason, message).trim().to_string()
}

/// Read a decimal that the venue may send as a string or a number
fn decimal(value: &Value, key: &str) -> Option<f64> {
    match value.get(key)? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn parse_instrument(value: &Value) -> Option<InstrumentRecord> {
    let name = value.get("name")?.as_str()?;
    let text = |key: &str| value.get(key).and_then(|v| v.as_str()).map(str::to_string);
    let int = |key: &str| value.get(key).and_then(|v| v.as_i64());

    Some(InstrumentRecord {
        name: name.to_string(),
        kind: text("type"),
        display_name: text("displayName"),
        pip_location: int("pipLocation").map(|v| v as i32),
        display_precision: int("displayPrecision").map(|v| v as u32),
        trade_units_precision: int("tradeUnitsPrecision").map(|v| v as u32),
        minimum_trade_size: decimal(value, "minimumTradeSize"),
        maximum_trailing_stop_distance: decimal(value, "maximumTrailingStopDistance"),
        minimum_trailing_stop_distance: decimal(value, "minimumTrailingStopDistance"),
        maximum_position_size: decimal(value, "maximumPositionSize"),
        maximum_order_units: decimal(value, "maximumOrderUnits"),
        margin_rate: decimal(value, "marginRate"),
        guaranteed_stop_loss_order_mode: text("guaranteedStopLossOrderMode"),
    })
}

fn parse_candle(value: &Value) -> Option<Bar> {
    let mid = value.get("mid")?;
    Some(Bar {
        time: parse_time(value.get("time")?.as_str()?)?,
        open: decimal(mid, "o")?,
        high: decimal(mid, "h")?,
        low: decimal(mid, "l")?,
        close: decimal(mid, "c")?,
        volume: value.get("volume").and_then(|v| v.as_i64()).unwrap_or(0),
        complete: value.get("complete").and_then(|v| v.as_bool()).unwrap_or(false),
    })
}

#[async_trait]
impl ExecutionGateway for OandaClient {
    async fn account_snapshot(&self) -> TradingResult<AccountSnapshot> {
        let body = self.get(&self.account_path("/summary"), &[]).await?;
        let account = body
            .get("account")
            .ok_or_else(|| TradingError::ApiResponse("missing account".to_string()))?;

        Ok(AccountSnapshot {
            id: account
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or(self.account_id.as_str())
                .to_string(),
            currency: account
                .get("currency")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            balance: decimal(account, "balance")
                .ok_or_else(|| TradingError::ApiResponse("missing balance".to_string()))?,
            margin_available: decimal(account, "marginAvailable")
                .ok_or_else(|| TradingError::ApiResponse("missing marginAvailable".to_string()))?,
        })
    }

    async fn account_instruments(&self) -> TradingResult<Vec<InstrumentRecord>> {
        let body = self.get(&self.account_path("/instruments"), &[]).await?;
        let instruments = body
            .get("instruments")
            .and_then(|i| i.as_array())
            .ok_or_else(|| TradingError::ApiResponse("missing instruments".to_string()))?;

        Ok(instruments.iter().filter_map(parse_instrument).collect())
    }

    async fn conversion_factors(&self, instrument: &str) -> TradingResult<ConversionFactors> {
        let body = self
            .get(&self.account_path("/pricing"), &[("instruments", instrument.to_string())])
            .await?;

        let factors = body
            .get("prices")
            .and_then(|p| p.get(0))
            .and_then(|p| p.get("quoteHomeConversionFactors"))
            .ok_or_else(|| TradingError::MarketData(format!("no price returned for {}", instrument)))?;

        match (decimal(factors, "positiveUnits"), decimal(factors, "negativeUnits")) {
            (Some(positive), Some(negative)) => Ok(ConversionFactors { positive, negative }),
            _ => Err(TradingError::MarketData(format!(
                "incomplete conversion factors for {}",
                instrument
            ))),
        }
    }

    async fn candles(
        &self,
        instrument: &str,
        granularity: Granularity,
        query: CandleQuery,
    ) -> TradingResult<Vec<Bar>> {
        let mut params = vec![
            ("price", "M".to_string()),
            ("granularity", granularity.as_str().to_string()),
        ];
        match query {
            CandleQuery::Latest { count } => params.push(("count", count.to_string())),
            CandleQuery::Since { from } => params.push(("from", from.to_rfc3339())),
            CandleQuery::Before { to, count } => {
                params.push(("to", to.to_rfc3339()));
                params.push(("count", count.to_string()));
            }
        }

        let path = format!("/v3/instruments/{}/candles", instrument);
        let body = self.get(&path, &params).await?;
        let candles = body
            .get("candles")
            .and_then(|c| c.as_array())
            .ok_or_else(|| TradingError::MarketData(format!("no candles returned for {}", instrument)))?;

        Ok(candles.iter().filter_map(parse_candle).collect())
    }

    async fn place_limit_order(&self, order: &LimitOrder) -> TradingResult<OrderAck> {
        let url = format!("{}{}", self.rest_url, self.account_path("/orders"));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("Accept-Datetime-Format", "RFC3339")
            .json(&Self::order_body(order))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if status.is_client_error()
            && !matches!(
                status,
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS
            )
        {
            let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
            let err = TradingError::rejected(rejection_text(&body));
            error!(
                "❌ Order rejected for {}: {} units @ {} ({})",
                order.instrument, order.units, order.price, err
            );
            return Err(err);
        }
        if !status.is_success() {
            return Err(status_error(status, &text));
        }

        let body: Value = serde_json::from_str(&text)?;
        if let Some(cancel) = body.get("orderCancelTransaction") {
            let reason = cancel
                .get("reason")
                .and_then(|r| r.as_str())
                .unwrap_or("ORDER_CANCELLED");
            let err = TradingError::rejected(reason);
            error!("❌ Order for {} cancelled on creation: {}", order.instrument, err);
            return Err(err);
        }

        let order_id = body
            .get("orderCreateTransaction")
            .and_then(|t| t.get("id"))
            .and_then(|id| id.as_str())
            .ok_or_else(|| TradingError::ApiResponse("missing orderCreateTransaction".to_string()))?
            .to_string();

        Ok(OrderAck {
            order_id,
            instrument: order.instrument.clone(),
            units: order.units,
            price: order.price,
        })
    }

    async fn pending_orders(&self, instrument: &str) -> TradingResult<Vec<PendingOrder>> {
        let body = self.get(&self.account_path("/pendingOrders"), &[]).await?;
        let orders = body
            .get("orders")
            .and_then(|o| o.as_array())
            .ok_or_else(|| TradingError::ApiResponse("missing orders".to_string()))?;

        Ok(orders
            .iter()
            .filter(|o| o.get("instrument").and_then(|i| i.as_str()) == Some(instrument))
            .filter_map(|o| {
                Some(PendingOrder {
                    id: o.get("id")?.as_str()?.to_string(),
                    instrument: instrument.to_string(),
                    units: decimal(o, "units").map(|u| u as i64).unwrap_or(0),
                    price: decimal(o, "price"),
                    kind: o.get("type").and_then(|t| t.as_str()).unwrap_or("UNKNOWN").to_string(),
                })
            })
            .collect())
    }

    async fn cancel_order(&self, order_id: &str) -> TradingResult<()> {
        self.put(&self.account_path(&format!("/orders/{}/cancel", order_id)), None)
            .await?;
        Ok(())
    }

    async fn open_positions(&self, instrument: &str) -> TradingResult<PositionSet> {
        let body = self.get(&self.account_path("/openPositions"), &[]).await?;
        let positions = body
            .get("positions")
            .and_then(|p| p.as_array())
            .ok_or_else(|| TradingError::ApiResponse("missing positions".to_string()))?;

        let position = positions
            .iter()
            .find(|p| p.get("instrument").and_then(|i| i.as_str()) == Some(instrument));

        Ok(match position {
            Some(p) => PositionSet {
                long_units: p.get("long").and_then(|l| decimal(l, "units")).unwrap_or(0.0),
                short_units: p.get("short").and_then(|s| decimal(s, "units")).unwrap_or(0.0),
            },
            None => PositionSet::default(),
        })
    }

    async fn close_position(&self, instrument: &str, positions: PositionSet) -> TradingResult<()> {
        let mut body = Map::new();
        if positions.long_units != 0.0 {
            body.insert("longUnits".into(), json!("ALL"));
        }
        if positions.short_units != 0.0 {
            body.insert("shortUnits".into(), json!("ALL"));
        }
        if body.is_empty() {
            return Ok(());
        }

        self.put(
            &self.account_path(&format!("/positions/{}/close", instrument)),
            Some(Value::Object(body)),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StreamConnector for OandaClient {
    async fn open(&self, target: &StreamTarget) -> TradingResult<MessageStream> {
        let (path, query) = match target {
            StreamTarget::Pricing { instruments } => (
                self.account_path("/pricing/stream"),
                vec![("instruments", instruments.join(","))],
            ),
            StreamTarget::Transactions => (self.account_path("/transactions/stream"), vec![]),
        };
        let url = format!("{}{}", self.stream_url, path);

        let response = self
            .stream_client
            .get(&url)
            .bearer_auth(&self.token)
            .header("Accept-Datetime-Format", "RFC3339")
            .query(&query)
            .send()
            .await
            .map_err(|e| TradingError::Stream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TradingError::Stream(status_error(status, &text).to_string()));
        }

        info!("📡 Opened {} stream", target);
        Ok(decode_lines(response.bytes_stream()))
    }
}
