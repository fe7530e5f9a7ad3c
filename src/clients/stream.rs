// Streaming connector seam and newline-delimited JSON decoding

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use serde_json::Value;

use crate::core::types::{StreamMessage, StreamTarget};
use crate::error::{TradingError, TradingResult};

/// Messages from one open subscription. The stream ends when the venue closes it.
pub type MessageStream = BoxStream<'static, TradingResult<StreamMessage>>;

/// Opens price or transaction subscriptions
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn open(&self, target: &StreamTarget) -> TradingResult<MessageStream>;
}

/// Split a chunked byte stream into lines and decode each one.
///
/// Chunks may end mid-line; the partial tail is held until the next chunk
/// arrives. A transport error is yielded once and ends the stream.
pub fn decode_lines<S, B, E>(chunks: S) -> MessageStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = (Box::pin(chunks), Vec::<u8>::new(), false);

    stream::unfold(state, |(mut chunks, mut buf, mut done)| async move {
        loop {
            if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line);
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                let message = parse_stream_line(text);
                return Some((message, (chunks, buf, done)));
            }

            if done {
                let rest = std::mem::take(&mut buf);
                let text = String::from_utf8_lossy(&rest);
                let text = text.trim();
                if text.is_empty() {
                    return None;
                }
                let message = parse_stream_line(text);
                return Some((message, (chunks, buf, done)));
            }

            match chunks.next().await {
                Some(Ok(chunk)) => buf.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    buf.clear();
                    done = true;
                    return Some((Err(TradingError::Stream(e.to_string())), (chunks, buf, done)));
                }
                None => done = true,
            }
        }
    })
    .boxed()
}

/// Decode one line of a pricing or transaction stream
pub fn parse_stream_line(line: &str) -> TradingResult<StreamMessage> {
    let data: Value = serde_json::from_str(line)
        .map_err(|e| TradingError::Stream(format!("malformed stream line: {}", e)))?;

    let kind = data
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| TradingError::Stream(format!("stream line without type: {}", line)))?;

    let time = data.get("time").and_then(|t| t.as_str()).and_then(parse_time);

    let message = match kind {
        "HEARTBEAT" => StreamMessage::Heartbeat { time },
        "PRICE" => {
            let instrument = data
                .get("instrument")
                .and_then(|i| i.as_str())
                .ok_or_else(|| TradingError::Stream("price without instrument".to_string()))?
                .to_string();

            StreamMessage::Price {
                instrument,
                bid: best_quote(&data, "bids"),
                ask: best_quote(&data, "asks"),
                time,
            }
        }
        other => StreamMessage::Transaction {
            id: data.get("id").and_then(|i| i.as_str()).map(str::to_string),
            kind: other.to_string(),
            payload: data.clone(),
        },
    };

    Ok(message)
}

fn best_quote(data: &Value, side: &str) -> Option<f64> {
    data.get(side)?
        .get(0)?
        .get("price")?
        .as_str()?
        .parse::<f64>()
        .ok()
}

pub(crate) fn parse_time(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
