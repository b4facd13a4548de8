//! Scrape, price-summary, and analysis workflows used by the CLI.

pub(crate) mod analysis;
pub(crate) mod event;
pub(crate) mod stats;
