pub mod client;
pub mod protocol;
pub mod server;

pub use client::MmioClient;
pub use protocol::*;
pub use server::{serve_client, MmioServer};
