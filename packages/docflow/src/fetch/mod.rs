//! Fetching: politeness, robots.txt, retries, and the HTTP transport.

pub mod http;
pub mod polite;
pub mod robots;
pub mod schedule;

pub use http::ReqwestTransport;
pub use polite::PoliteFetcher;
pub use robots::RobotsRules;
