pub mod broadcast;
pub mod connection;
pub mod delivery;
pub mod ingest;
pub mod lifecycle;
pub mod registry;
pub mod sanitize;
pub mod subscriptions;
