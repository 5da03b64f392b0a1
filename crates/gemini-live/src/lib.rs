mod client;
pub mod types;

pub use client::{
    Client, LiveConfig, ServerEvent, ServerRx, SessionError, connect, connect_with_capacity,
};
