pub mod cache;
pub mod error;
pub mod package;
pub mod source;

pub use cache::{CacheEntry, CacheStats};
pub use error::{CoreError, CoreErrorKind};
pub use package::PackageRecord;
pub use source::{PackageAction, PackageSource};
