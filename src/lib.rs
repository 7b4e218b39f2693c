//! webping - Website Availability Monitoring
//!
//! A probe process measures TCP/HTTP timings for a target URL and publishes
//! each measurement to Kafka; an ingestion process persists them to PostgreSQL.

pub mod bus;
pub mod config;
pub mod ingest;
pub mod metric;
pub mod probe;
pub mod shutdown;
