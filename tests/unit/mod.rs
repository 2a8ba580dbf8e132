pub mod circuit_breaker_test;
pub mod config_test;
pub mod rate_limit_test;
