pub mod alerts;
pub mod health;
pub mod metrics;
pub mod reports;
pub mod websocket;
