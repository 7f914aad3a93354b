//! Fills a census tract column in an Airtable table from each row's coordinates.

pub mod airtable;
pub mod fill;
pub mod geocoder;
pub mod lookup;
pub mod table;
