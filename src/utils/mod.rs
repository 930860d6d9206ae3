pub mod placeholders;
pub mod retry;
pub mod urls;
