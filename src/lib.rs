//! Reader/writer framework for binary game resources: seekable byte
//! cursors, reflective versioned fields, TGI resource keys, dependent
//! lists with pluggable count encodings, and lazily re-serialized
//! resource wrappers with change tracking.

use std::sync::atomic::{AtomicBool, Ordering};

pub mod catalog;
pub mod change;
pub mod cursor;
pub mod error;
pub mod fields;
pub mod jazz;
pub mod key;
pub mod list;
pub mod resource;

pub use catalog::{CatalogCommon, CatalogResource, TypeCode};
pub use change::{Attach, ChangeHandler, ChangeNotifier};
pub use cursor::ByteCursor;
pub use error::{Error, Result};
pub use fields::{ApiVersionedFields, FieldDescriptor, FieldValue};
pub use jazz::{JazzCommand, JazzGraphResource};
pub use key::{KeyOrder, ResourceKey, TgiBlock};
pub use list::{CountEncoding, CountedTgiBlockList, DependentList, ListElement, TgiBlockList};
pub use resource::{Resource, ResourceCore};

static STRICT_CHECKING: AtomicBool = AtomicBool::new(true);

/// Toggles structural validation (offset, size and trailing-byte checks)
/// process-wide. Strict by default; lenient mode is for salvaging streams
/// written by sloppy third-party editors.
pub fn set_strict_checking(enabled: bool) {
    STRICT_CHECKING.store(enabled, Ordering::Relaxed);
}

pub fn strict_checking() -> bool {
    STRICT_CHECKING.load(Ordering::Relaxed)
}
