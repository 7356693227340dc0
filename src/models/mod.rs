pub mod chat;
pub mod websocket;
pub mod worker;
