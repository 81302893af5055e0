//! Driver interface for the content-addressable blob backend.

mod driver;
mod error;
mod key;

pub use driver::Driver;
pub use driver::Metadata;
pub use error::{StorageError, StorageErrorBuilder, StorageErrorKind};
pub use key::ObjectKey;
