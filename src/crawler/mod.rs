//! Crawler module for fetching and reading pages
//!
//! This module contains the network and markup side of the pipeline:
//! - HTTP fetching with typed failures
//! - Fetch gateways that queue outcomes for a consuming stage
//! - Listing table and info panel extraction

mod fetcher;
mod gateway;
mod parser;

pub use fetcher::{build_http_client, fetch_url, Body, BodyKind, FetchError, FetchOutcome, Fetched};
pub use gateway::FetchGateway;
pub use parser::{
    cell_fragments, cell_text, column_index, find_primary_table, first_anchor,
    first_image_in_infobox, header_texts, parse_listing, row_cells, ListingParse, ListingRow,
};
