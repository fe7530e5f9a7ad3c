// HTTP-level tests for the OANDA client against a local mock server

use std::time::Duration;

use futures_util::StreamExt;
use mockito::{Matcher, Server};
use serde_json::json;

use fx_grid_bot::core::types::{CandleQuery, LimitOrder, PositionSet, StreamMessage, StreamTarget};
use fx_grid_bot::{
    ExecutionGateway, Granularity, OandaClient, RejectReason, StreamConnector, TradingError,
};

const ACCOUNT: &str = "101-004-1234567-001";

fn client(server: &Server) -> OandaClient {
    OandaClient::new(server.url(), server.url(), "test-token", ACCOUNT, Duration::from_secs(5))
        .expect("client builds")
}

fn path(suffix: &str) -> String {
    format!("/v3/accounts/{}{}", ACCOUNT, suffix)
}

fn limit_order(units: i64, price: f64) -> LimitOrder {
    LimitOrder {
        instrument: "EUR_USD".to_string(),
        units,
        price,
        price_precision: 5,
        take_profit: Some(1.10125),
        stop_loss: Some(1.09825),
        trailing_stop_distance: None,
    }
}

#[tokio::test]
async fn test_account_snapshot_parses_decimal_strings() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", path("/summary").as_str())
        .match_header("authorization", "Bearer test-token")
        .match_header("accept-datetime-format", "RFC3339")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "account": {
                    "id": ACCOUNT,
                    "currency": "USD",
                    "balance": "10000.5000",
                    "marginAvailable": "9500.2500"
                }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let snapshot = client(&server).account_snapshot().await.unwrap();
    assert_eq!(snapshot.balance, 10000.5);
    assert_eq!(snapshot.margin_available, 9500.25);
    assert_eq!(snapshot.currency, "USD");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_unauthorized_maps_to_authentication_error() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", path("/summary").as_str())
        .with_status(401)
        .with_body(r#"{"errorMessage":"Insufficient authorization to perform request."}"#)
        .create_async()
        .await;

    let err = client(&server).margin_available().await.unwrap_err();
    assert!(matches!(err, TradingError::ApiAuthentication(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_list_accounts() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/v3/accounts")
        .with_status(200)
        .with_body(json!({ "accounts": [{ "id": ACCOUNT }, { "id": "101-004-1234567-002" }] }).to_string())
        .create_async()
        .await;

    let accounts = client(&server).list_accounts().await.unwrap();
    assert_eq!(accounts, vec![ACCOUNT.to_string(), "101-004-1234567-002".to_string()]);
}

#[tokio::test]
async fn test_account_instruments() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", path("/instruments").as_str())
        .with_status(200)
        .with_body(
            json!({
                "instruments": [{
                    "name": "USD_JPY",
                    "type": "CURRENCY",
                    "displayName": "USD/JPY",
                    "pipLocation": -2,
                    "displayPrecision": 3,
                    "tradeUnitsPrecision": 0,
                    "minimumTradeSize": "1",
                    "maximumTrailingStopDistance": "100.000",
                    "minimumTrailingStopDistance": "0.050",
                    "maximumPositionSize": "0",
                    "maximumOrderUnits": "100000000",
                    "marginRate": "0.04",
                    "guaranteedStopLossOrderMode": "DISABLED"
                }]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let records = client(&server).account_instruments().await.unwrap();
    assert_eq!(records.len(), 1);
    let jpy = &records[0];
    assert_eq!(jpy.kind.as_deref(), Some("CURRENCY"));
    assert_eq!(jpy.pip_location, Some(-2));
    assert_eq!(jpy.display_precision, Some(3));
    assert_eq!(jpy.minimum_trailing_stop_distance, Some(0.05));
    assert_eq!(jpy.margin_rate, Some(0.04));
}

#[tokio::test]
async fn test_conversion_factors() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", path("/pricing").as_str())
        .match_query(Matcher::UrlEncoded("instruments".into(), "EUR_GBP".into()))
        .with_status(200)
        .with_body(
            json!({
                "prices": [{
                    "instrument": "EUR_GBP",
                    "quoteHomeConversionFactors": {
                        "positiveUnits": "1.26500",
                        "negativeUnits": "1.26600"
                    }
                }]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let factors = client(&server).conversion_factors("EUR_GBP").await.unwrap();
    assert_eq!(factors.positive, 1.265);
    assert_eq!(factors.negative, 1.266);
}

#[tokio::test]
async fn test_candles_and_current_price() {
    let mut server = Server::new_async().await;
    let body = json!({
        "instrument": "EUR_USD",
        "granularity": "S5",
        "candles": [
            { "complete": true, "volume": 3, "time": "2024-03-01T12:00:00Z",
              "mid": { "o": "1.08000", "h": "1.08010", "l": "1.07990", "c": "1.08005" } },
            { "complete": false, "volume": 1, "time": "2024-03-01T12:00:05Z",
              "mid": { "o": "1.08005", "h": "1.08020", "l": "1.08000", "c": "1.08015" } }
        ]
    });
    server
        .mock("GET", "/v3/instruments/EUR_USD/candles")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("price".into(), "M".into()),
            Matcher::UrlEncoded("granularity".into(), "S5".into()),
        ]))
        .with_status(200)
        .with_body(body.to_string())
        .expect(2)
        .create_async()
        .await;

    let client = client(&server);
    let bars = client
        .candles("EUR_USD", Granularity::S5, CandleQuery::Latest { count: 2 })
        .await
        .unwrap();
    assert_eq!(bars.len(), 2);
    assert!(bars[0].complete);
    assert!(!bars[1].complete);

    let price = client.current_price("EUR_USD").await.unwrap();
    assert_eq!(price, 1.08015);
}

#[tokio::test]
async fn test_place_limit_order_returns_order_id() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", path("/orders").as_str())
        .match_body(Matcher::PartialJson(json!({
            "order": {
                "type": "LIMIT",
                "instrument": "EUR_USD",
                "units": "100",
                "price": "1.09975",
                "timeInForce": "GTC",
                "takeProfitOnFill": { "price": "1.10125" },
                "stopLossOnFill": { "price": "1.09825" },
                "clientExtensions": { "tag": "fx-grid" }
            }
        })))
        .with_status(201)
        .with_body(json!({ "orderCreateTransaction": { "id": "6372", "type": "LIMIT_ORDER" } }).to_string())
        .create_async()
        .await;

    let ack = client(&server).place_limit_order(&limit_order(100, 1.09975)).await.unwrap();
    assert_eq!(ack.order_id, "6372");
    assert_eq!(ack.units, 100);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_rejected_order_is_classified() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", path("/orders").as_str())
        .with_status(400)
        .with_body(
            json!({
                "orderRejectTransaction": { "type": "LIMIT_ORDER_REJECT", "rejectReason": "INSUFFICIENT_MARGIN" },
                "errorCode": "INSUFFICIENT_MARGIN",
                "errorMessage": "Insufficient margin"
            })
            .to_string(),
        )
        .create_async()
        .await;

    let err = client(&server).place_limit_order(&limit_order(-100, 1.10025)).await.unwrap_err();
    assert_eq!(err.reject_reason(), Some(RejectReason::InsufficientFunds));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_order_cancelled_on_creation_is_rejection() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", path("/orders").as_str())
        .with_status(201)
        .with_body(
            json!({
                "orderCreateTransaction": { "id": "6373" },
                "orderCancelTransaction": { "id": "6374", "reason": "TAKE_PROFIT_ON_FILL_LOSS" }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let err = client(&server).place_limit_order(&limit_order(100, 1.09975)).await.unwrap_err();
    assert_eq!(err.reject_reason(), Some(RejectReason::InvalidTakeProfit));
}

#[tokio::test]
async fn test_cancel_all_pending_only_touches_instrument() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", path("/pendingOrders").as_str())
        .with_status(200)
        .with_body(
            json!({
                "orders": [
                    { "id": "11", "instrument": "EUR_USD", "units": "100", "price": "1.09975", "type": "LIMIT" },
                    { "id": "12", "instrument": "EUR_USD", "units": "-100", "price": "1.10025", "type": "LIMIT" },
                    { "id": "13", "instrument": "GBP_USD", "units": "50", "price": "1.25000", "type": "LIMIT" }
                ]
            })
            .to_string(),
        )
        .create_async()
        .await;
    let cancel_11 = server
        .mock("PUT", path("/orders/11/cancel").as_str())
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let cancel_12 = server
        .mock("PUT", path("/orders/12/cancel").as_str())
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let cancel_13 = server
        .mock("PUT", path("/orders/13/cancel").as_str())
        .expect(0)
        .create_async()
        .await;

    let cancelled = client(&server).cancel_all_pending("EUR_USD").await.unwrap();
    assert_eq!(cancelled, 2);
    cancel_11.assert_async().await;
    cancel_12.assert_async().await;
    cancel_13.assert_async().await;
}

#[tokio::test]
async fn test_close_position_sends_only_open_sides() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("PUT", path("/positions/EUR_USD/close").as_str())
        .match_body(Matcher::Json(json!({ "longUnits": "ALL" })))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let positions = PositionSet { long_units: 100.0, short_units: 0.0 };
    client(&server).close_position("EUR_USD", positions).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_open_positions_defaults_to_flat() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", path("/openPositions").as_str())
        .with_status(200)
        .with_body(
            json!({
                "positions": [{
                    "instrument": "GBP_USD",
                    "long": { "units": "200" },
                    "short": { "units": "0" }
                }]
            })
            .to_string(),
        )
        .expect(2)
        .create_async()
        .await;

    let client = client(&server);
    assert!(client.open_positions("EUR_USD").await.unwrap().is_flat());
    assert_eq!(client.open_positions("GBP_USD").await.unwrap().long_units, 200.0);
}

#[tokio::test]
async fn test_pricing_stream_decodes_lines() {
    let mut server = Server::new_async().await;
    let body = concat!(
        r#"{"type":"PRICE","instrument":"EUR_USD","time":"2024-03-01T12:00:00.000000000Z","bids":[{"price":"1.08000"}],"asks":[{"price":"1.08020"}]}"#,
        "\n",
        r#"{"type":"HEARTBEAT","time":"2024-03-01T12:00:05.000000000Z"}"#,
        "\n"
    );
    server
        .mock("GET", path("/pricing/stream").as_str())
        .match_query(Matcher::UrlEncoded("instruments".into(), "EUR_USD,GBP_USD".into()))
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;

    let target = StreamTarget::Pricing {
        instruments: vec!["EUR_USD".to_string(), "GBP_USD".to_string()],
    };
    let stream = client(&server).open(&target).await.unwrap();
    let messages: Vec<_> = stream.collect().await;

    assert_eq!(messages.len(), 2);
    match &messages[0] {
        Ok(StreamMessage::Price { instrument, bid, time, .. }) => {
            assert_eq!(instrument, "EUR_USD");
            assert_eq!(*bid, Some(1.08));
            assert!(time.is_some());
        }
        other => panic!("expected price, got {:?}", other),
    }
    assert!(matches!(messages[1], Ok(StreamMessage::Heartbeat { time: Some(_) })));
}

#[tokio::test]
async fn test_stream_open_failure_is_stream_error() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", path("/transactions/stream").as_str())
        .with_status(503)
        .create_async()
        .await;

    let err = match client(&server).open(&StreamTarget::Transactions).await {
        Ok(_) => panic!("expected failure"),
        Err(e) => e,
    };
    assert!(matches!(err, TradingError::Stream(_)));
}
