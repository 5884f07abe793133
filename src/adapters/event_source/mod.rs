pub mod frame_parser;
pub mod websocket_source;
