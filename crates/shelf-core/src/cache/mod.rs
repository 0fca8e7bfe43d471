pub mod persist;
pub mod store;
pub mod subscription;

pub use store::{PackageCache, cache_key};
pub use subscription::{CacheSubscription, CacheUpdate, SubscriptionId};
