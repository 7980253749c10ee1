pub mod caption;
pub mod chat;
pub mod credentials;
pub mod events;
pub mod scenarios;
pub mod session;
