//! Persistence layer for the A2A Task Hub: connection pooling, migrations,
//! and every SQL query against the relational Store.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
