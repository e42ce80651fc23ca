use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Dirty bit plus an optional listener, shared by a resource and every
/// element it owns.
///
/// Elements never point at each other; they all point here. The listener is
/// how an owning package index learns it must re-fetch bytes before saving.
pub struct ChangeNotifier {
    dirty: Cell<bool>,
    listener: RefCell<Option<Box<dyn Fn()>>>,
}

impl ChangeNotifier {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            dirty: Cell::new(false),
            listener: RefCell::new(None),
        })
    }

    pub fn notify(&self) {
        self.dirty.set(true);
        if let Some(listener) = self.listener.borrow().as_ref() {
            listener();
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    pub fn clear_dirty(&self) {
        self.dirty.set(false);
    }

    pub fn set_listener(&self, listener: impl Fn() + 'static) {
        *self.listener.borrow_mut() = Some(Box::new(listener));
    }
}

/// Handle through which an element reports mutations to its owner.
///
/// Handed down at construction or adoption time; an element keeps exactly one
/// for its whole life. Re-parenting an element means cloning it with a new
/// handler via [`Attach::attached`], never rebinding a shared instance.
#[derive(Clone)]
pub struct ChangeHandler {
    notifier: Rc<ChangeNotifier>,
}

impl ChangeHandler {
    pub fn new(notifier: Rc<ChangeNotifier>) -> Self {
        Self { notifier }
    }

    /// A handler bound to a fresh, unobserved notifier. Used for elements
    /// built free-standing before adoption by a resource.
    pub fn detached() -> Self {
        Self {
            notifier: ChangeNotifier::new(),
        }
    }

    pub fn notify(&self) {
        self.notifier.notify();
    }

    pub fn is_dirty(&self) -> bool {
        self.notifier.is_dirty()
    }
}

impl std::fmt::Debug for ChangeHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeHandler")
            .field("dirty", &self.notifier.is_dirty())
            .finish()
    }
}

/// Clone-on-adopt: produces a deep copy of `self` with every change handler
/// in the subtree rebound to `handler`.
///
/// This is the rule that keeps the dirty-propagation graph a tree. Two live
/// owners must never share one mutable element, or edits to one resource
/// would dirty an unrelated one.
pub trait Attach: Sized {
    fn attached(&self, handler: &ChangeHandler) -> Self;
}
