//! XBRL parsing and Compustat item extraction.
//!
//! Facts come either from the SEC company-facts JSON API or from a raw
//! XBRL instance document. [`extract_items`] turns them into Compustat
//! fundamental items.
//!
//! # Example
//!
//! ```no_run
//! use riskfeed_data::xbrl::{PeriodType, TagMap, XbrlClient, extract_items};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = XbrlClient::new()?;
//!     let doc = client.fetch_company_facts("320193").await?;
//!     let items = extract_items(&doc, &TagMap::default(), PeriodType::Annual, "320193");
//!     for item in items.iter().filter(|i| i.item == "AT") {
//!         println!("{} {}: {:.1}", item.fiscal_year, item.item, item.value);
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod compustat;
pub mod facts;
mod instance;

pub use client::XbrlClient;
pub use compustat::{
    CompustatItem, FundamentalItem, PeriodType, TagMap, compustat_fiscal_year, extract_items,
    pad_cik, scale_value,
};
pub use facts::{XbrlDocument, XbrlFact};
