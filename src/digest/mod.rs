pub mod analyze;
pub mod audit;
pub mod cache;
pub mod classify;
pub mod cluster;
pub mod config;
pub mod context;
pub mod dedup;
pub mod extract;
pub mod model;
pub mod paths;
pub mod pipeline;
pub mod provider;
pub mod report;
pub mod util;
pub mod warn;
