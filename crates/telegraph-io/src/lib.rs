mod common;
mod error;
mod mini_packet_tunnel;
mod raw_data;
mod slip;
mod websocket;

pub use common::{PACKET_REMOTE_LOCATION_FIELD, PacketContext, PacketIo, RAW_DATA_FIELD, RAW_DATA_WHAT, StreamIo, TEXT_DATA_FIELD, TEXT_DATA_WHAT};
pub use error::{GatewayError, GatewayResult};
pub use mini_packet_tunnel::MiniPacketTunnelIOGateway;
pub use raw_data::RawDataMessageIOGateway;
pub use slip::SlipFramedIOGateway;
pub use websocket::WebSocketMessageIOGateway;
