pub mod dead_letter;
pub mod ingestion;
pub mod outbox;
pub mod rate_limiter;
pub mod template_cache;
pub mod worker;
