use std::rc::Rc;

use tracing::debug_span;

use crate::change::{ChangeHandler, ChangeNotifier};
use crate::error::Result;
use crate::fields::ApiVersionedFields;

/// Resolves a requested API version: 0 means "use the type's recommended
/// version".
pub fn effective_api_version<T: ApiVersionedFields>(requested: i32) -> i32 {
    if requested == 0 {
        T::recommended_api_version()
    } else {
        requested
    }
}

/// Shared state every concrete resource embeds: the requested API version,
/// the memoized serialized buffer, and the change notifier the whole
/// ownership tree reports into.
pub struct ResourceCore {
    requested_api_version: i32,
    cache: Option<Vec<u8>>,
    notifier: Rc<ChangeNotifier>,
}

impl ResourceCore {
    /// Core for a resource built from scratch; the buffer is synthesized
    /// lazily on the first byte read.
    pub fn new(requested_api_version: i32) -> Self {
        Self {
            requested_api_version,
            cache: None,
            notifier: ChangeNotifier::new(),
        }
    }

    /// Core for a resource parsed from an existing buffer, which stays
    /// cached until something is mutated.
    pub fn from_stream(requested_api_version: i32, bytes: Vec<u8>) -> Self {
        Self {
            requested_api_version,
            cache: Some(bytes),
            notifier: ChangeNotifier::new(),
        }
    }

    /// Handler to hand to every nested element and list at parse time.
    pub fn handler(&self) -> ChangeHandler {
        ChangeHandler::new(self.notifier.clone())
    }

    pub fn requested_api_version(&self) -> i32 {
        self.requested_api_version
    }

    pub fn is_dirty(&self) -> bool {
        self.notifier.is_dirty()
    }

    pub fn mark_dirty(&self) {
        self.notifier.notify();
    }

    /// Registers the listener fired whenever anything in the resource
    /// changes, e.g. the owning package index.
    pub fn set_resource_changed(&self, listener: impl Fn() + 'static) {
        self.notifier.set_listener(listener);
    }

    pub(crate) fn cached(&self) -> Option<&[u8]> {
        self.cache.as_deref()
    }

    pub(crate) fn store(&mut self, bytes: Vec<u8>) {
        self.cache = Some(bytes);
        self.notifier.clear_dirty();
    }
}

impl std::fmt::Debug for ResourceCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCore")
            .field("requested_api_version", &self.requested_api_version)
            .field("dirty", &self.notifier.is_dirty())
            .field("cached", &self.cache.as_ref().map(Vec::len))
            .finish()
    }
}

/// A decoded binary record that can regenerate its own byte stream.
///
/// Serialization is lazy: mutations only flip the dirty bit, and the buffer
/// is rebuilt the next time bytes are actually needed. Callers can therefore
/// batch many small field edits without paying for re-encoding each time.
pub trait Resource: ApiVersionedFields {
    fn core(&self) -> &ResourceCore;

    fn core_mut(&mut self) -> &mut ResourceCore;

    /// Serializes the current field values into a fresh buffer, walking the
    /// object graph in parse order.
    fn unparse(&self) -> Result<Vec<u8>>;

    fn requested_api_version(&self) -> i32 {
        self.core().requested_api_version()
    }

    fn is_dirty(&self) -> bool {
        self.core().is_dirty()
    }

    /// The resource's serialized bytes, regenerated first if a mutation made
    /// the cached buffer stale. Reading while clean returns the cached
    /// buffer unchanged.
    fn as_bytes(&mut self) -> Result<&[u8]> {
        if self.core().is_dirty() || self.core().cached().is_none() {
            let _span = debug_span!("Resource::unparse").entered();
            let bytes = self.unparse()?;
            self.core_mut().store(bytes);
        }
        Ok(self.core().cached().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::ByteCursor;
    use crate::error::Error;
    use crate::fields::{check_field, FieldDescriptor, FieldValue};
    use std::cell::Cell;

    struct Marker {
        core: ResourceCore,
        value: u32,
        unparses: Cell<u32>,
    }

    impl Marker {
        fn new(value: u32) -> Self {
            Self {
                core: ResourceCore::new(0),
                value,
                unparses: Cell::new(0),
            }
        }

        fn set_value(&mut self, v: u32) {
            if self.value != v {
                self.value = v;
                self.core.mark_dirty();
            }
        }
    }

    const MARKER_FIELDS: &[FieldDescriptor] = &[FieldDescriptor::new("Value", 1)];

    impl ApiVersionedFields for Marker {
        fn field_table() -> &'static [FieldDescriptor] {
            MARKER_FIELDS
        }

        fn get_field(&self, name: &str) -> crate::error::Result<FieldValue> {
            check_field::<Self>(name, 0)?;
            Ok(FieldValue::U32(self.value))
        }

        fn set_field(&mut self, name: &str, value: FieldValue) -> crate::error::Result<()> {
            check_field::<Self>(name, 0)?;
            match value {
                FieldValue::U32(v) => {
                    self.set_value(v);
                    Ok(())
                }
                other => Err(Error::TypeMismatch {
                    field: name.to_string(),
                    expected: "u32",
                    found: other.type_name(),
                }),
            }
        }
    }

    impl Resource for Marker {
        fn core(&self) -> &ResourceCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut ResourceCore {
            &mut self.core
        }

        fn unparse(&self) -> crate::error::Result<Vec<u8>> {
            self.unparses.set(self.unparses.get() + 1);
            let mut cur = ByteCursor::empty();
            cur.write_u32(self.value)?;
            Ok(cur.into_inner())
        }
    }

    #[test]
    fn bytes_are_regenerated_only_while_dirty() {
        let mut r = Marker::new(1);
        assert_eq!(r.as_bytes().unwrap(), &[1, 0, 0, 0]);
        assert_eq!(r.unparses.get(), 1);

        // clean read: cached buffer, no re-encode
        r.as_bytes().unwrap();
        assert_eq!(r.unparses.get(), 1);

        r.set_value(2);
        assert!(r.is_dirty());
        assert_eq!(r.as_bytes().unwrap(), &[2, 0, 0, 0]);
        assert_eq!(r.unparses.get(), 2);
        assert!(!r.is_dirty());
    }

    #[test]
    fn from_stream_serves_original_bytes_until_mutated() {
        let mut r = Marker::new(5);
        r.core = ResourceCore::from_stream(0, vec![5, 0, 0, 0]);
        assert_eq!(r.as_bytes().unwrap(), &[5, 0, 0, 0]);
        assert_eq!(r.unparses.get(), 0);
    }

    #[test]
    fn requested_version_zero_resolves_to_recommended() {
        assert_eq!(effective_api_version::<Marker>(0), 1);
        assert_eq!(effective_api_version::<Marker>(3), 3);
    }

    #[test]
    fn resource_changed_listener_fires_on_mutation() {
        let r = Marker::new(1);
        let fired = std::rc::Rc::new(Cell::new(false));
        let observed = fired.clone();
        r.core.set_resource_changed(move || observed.set(true));
        r.core.handler().notify();
        assert!(fired.get());
    }
}
