// Library for tests to access modules

pub mod aggregator;
pub mod config;
pub mod fetch_client;
pub mod mock_backend;
pub mod models;
pub mod routes;
pub mod scheduler;
pub mod slot;
pub mod version;
