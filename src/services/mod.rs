//! Service layer shared by routes and the command line.
//!
//! Contains the Redis cache, the CPV dictionary, notifications, attachment
//! storage and the transactional helpers behind onboarding and tenders.

pub mod accounts;
pub mod cache;
pub mod cpv;
pub mod notifications;
pub mod refs;
pub mod storage;
pub mod tenders;

pub use cache::RedisCache;
pub use cpv::CpvTreeCache;
