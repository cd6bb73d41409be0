pub mod price_parser;
pub mod registry;
pub mod selector;
pub mod traits;

pub use price_parser::{ParsedPrice, PriceParser};
pub use registry::{ScraperHandle, ScraperRegistry};
pub use selector::{SelectorScraper, SelectorScraperConfig};
pub use traits::{RetailerScraper, ScrapeError};
