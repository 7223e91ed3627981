pub mod agent;
pub mod error;
pub mod ids;
pub mod redis;
pub mod response_log;
