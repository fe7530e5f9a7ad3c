// Venue adapters and the seams the strategy layer talks through

pub mod gateway;
pub mod oanda;
pub mod stream;

// Re-export client types
pub use gateway::{adjust_to_pip_location, pip_value, round_to_decimals, ExecutionGateway};
pub use oanda::OandaClient;
pub use stream::{decode_lines, parse_stream_line, MessageStream, StreamConnector};
