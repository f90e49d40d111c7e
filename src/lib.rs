//! teller: domain chat service with conversation memory
//!
//! This library provides:
//! - HTTP API for financial-analysis and customer-support chat
//! - Conversation context store with sliding TTL expiry and FIFO history
//! - Per-client sliding-window rate limiting
//! - Redis-backed cache facade (with an in-process fallback)
//! - JWT authentication with bcrypt-hashed credentials
//! - Pluggable text-generation providers (OpenAI-compatible, local)

pub mod auth;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod market;
pub mod metrics;
pub mod ratelimit;
pub mod server;
pub mod training;

pub use config::Config;
pub use context::ContextStore;
pub use ratelimit::RateLimiter;
