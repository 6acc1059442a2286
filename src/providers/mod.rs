// ABOUTME: Built-in provider implementations for live research runs.
// ABOUTME: DuckDuckGo HTML search and a plain HTTP page fetcher.

mod duckduckgo;
mod http_fetch;

pub use duckduckgo::DuckDuckGoSearch;
pub use http_fetch::HttpFetcher;
