//! Infrastructure layer - configuration, logging and external integrations
//!
//! File and HTTP I/O (rule document, supplier feed, reports, the Shopify
//! Admin API) plus the shared runtime pieces every remote call goes through:
//! the rate limiter and the retry policy.

pub mod config;
pub mod feed_parser;
pub mod logging;
pub mod rate_limiter;
pub mod report_writer;
pub mod retry_policy;
pub mod rule_config;
pub mod shopify_client;

// Re-export commonly used items
pub use config::{AppConfig, ConfigManager};
pub use feed_parser::{FeedIngestion, RejectedRow, load_feed, parse_feed};
pub use logging::{get_log_directory, init_logging, init_logging_with_config};
pub use rate_limiter::RateLimiter;
pub use report_writer::ReportWriter;
pub use retry_policy::{RetryOutcome, RetryPolicy};
pub use rule_config::{load_rules, parse_rules};
pub use shopify_client::ShopifyClient;
