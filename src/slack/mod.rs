pub mod client;
pub mod scraped;
