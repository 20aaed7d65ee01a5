pub mod webhook;

pub use webhook::Webhook;
