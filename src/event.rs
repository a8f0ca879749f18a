//! Listener sets and the reentrancy-safe dispatch protocol.
//!
//! See the [`Event`] type for details.
use crate::{
    error::{AggregateError, ListenerError},
    ring::{Key, Ring},
};
use core::fmt;
use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

/// An ordered set of listeners that can be fired, and mutated *while* being
/// fired.
///
/// Listeners are called in subscription order. Every operation takes
/// `&self`, so a listener running inside [`emit`] may freely call
/// [`subscribe`], [`unsubscribe`], [`unsubscribe_all`], or even [`emit`]
/// again on the same event, and the set stays consistent throughout. This is
/// cooperative, single-threaded reentrancy: `Event` is deliberately not
/// [`Send`] or [`Sync`], and there are no locks.
///
/// # Removal during dispatch
///
/// Internally the listeners live in a [`Ring`] so that each one can be
/// unlinked in O(1). While a dispatch is in progress, removal only
/// *tombstones* the listener (its callback is dropped and it will never
/// fire again, and [`listener_count`] reflects the removal immediately),
/// because physically unlinking a node would invalidate the cursor of the
/// in-flight pass. The outermost pass unlinks tombstones as it encounters
/// them and sweeps any stragglers as it finishes, so no tombstone survives
/// once the event is idle.
///
/// # Listener failures
///
/// Callbacks may fail with a [`ListenerError`]. [`emit`] is fail-fast: it
/// stops at the first failure and returns it alone. [`emit_all`] runs every
/// listener regardless and raises one [`AggregateError`] at the end if any
/// failed. The `safe_*` variants catch the failure and hand it to an error
/// sink instead ([`tracing::error!`] by default), returning `bool` success.
///
/// # Examples
///
/// ```
/// use fairy_ring::Event;
/// use std::{cell::Cell, rc::Rc};
///
/// let event: Event<i32> = Event::new();
/// let total = Rc::new(Cell::new(0));
///
/// let sink = total.clone();
/// let handle = event.subscribe(move |n: &i32| sink.set(sink.get() + n));
///
/// event.emit(&3).unwrap();
/// event.emit(&4).unwrap();
/// assert_eq!(total.get(), 7);
///
/// assert!(handle.unlisten());
/// assert!(!handle.unlisten()); // at most once
/// ```
///
/// [`emit`]: Event::emit
/// [`emit_all`]: Event::emit_all
/// [`subscribe`]: Event::subscribe
/// [`unsubscribe`]: Event::unsubscribe
/// [`unsubscribe_all`]: Event::unsubscribe_all
/// [`listener_count`]: Event::listener_count
pub struct Event<A: ?Sized + 'static = ()> {
    inner: Rc<RefCell<Core<A>>>,
}

/// A callback registered (or registrable) on an [`Event`].
///
/// `Listener` is a cheaply clonable shared handle to the underlying
/// callback; clones compare equal by *identity* (the same underlying
/// callback), which is what [`Event::unsubscribe_listener`] keys on. Hold
/// on to a clone of the `Listener` you subscribed if you want to remove it
/// by value later; otherwise, plain closures passed to
/// [`Event::subscribe`] are wrapped on the fly.
///
/// Callbacks are `Fn`, not `FnMut`: a nested dispatch may legitimately
/// reenter the same listener, which `FnMut` cannot express. Listeners that
/// need mutable state capture a [`Cell`](core::cell::Cell) or
/// [`RefCell`].
pub struct Listener<A: ?Sized + 'static> {
    f: Rc<dyn Fn(&A) -> Result<(), ListenerError>>,
}

/// A token for one listener registration, usable for at-most-once removal.
///
/// Returned by the `subscribe` family of methods. The handle stays valid
/// across other mutations of the event; [`unlisten`](Handle::unlisten) is
/// idempotent and returns `false` once the registration (or the event
/// itself) is gone.
pub struct Handle<A: ?Sized + 'static> {
    event: Weak<RefCell<Core<A>>>,
    key: Key,
}

/// A copyable, subscribe-only view of an [`Event`].
///
/// Lets an owner hand out the ability to listen without exposing
/// [`Event::emit`] or ownership of the event itself. Clones compare equal
/// iff they view the same event. The view does not keep the event alive;
/// once the event is dropped, [`is_valid`](Listenable::is_valid) returns
/// `false` and the subscription methods panic.
pub struct Listenable<A: ?Sized + 'static> {
    inner: Weak<RefCell<Core<A>>>,
}

struct Core<A: ?Sized + 'static> {
    /// `None` entries are tombstones: logically removed, awaiting unlink.
    ring: Ring<Option<Listener<A>>>,
    /// Linked tombstones awaiting physical unlink.
    pending: usize,
    /// Nesting depth of in-progress dispatches; 0 when idle.
    lock_depth: usize,
}

/// What the dispatch loop decided to do with the current node, with the
/// core borrow already released.
enum Action<A: ?Sized + 'static> {
    Call(Listener<A>),
    Advance(Key),
    Stop,
}

// === impl Event ===

impl<A: ?Sized + 'static> Event<A> {
    /// Returns a new event with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Core {
                ring: Ring::new(),
                pending: 0,
                lock_depth: 0,
            })),
        }
    }

    /// Returns the number of listeners currently subscribed.
    ///
    /// Reflects removals immediately, even those made during an in-progress
    /// dispatch (whose physical unlink may still be deferred).
    pub fn listener_count(&self) -> usize {
        self.inner.borrow().live()
    }

    /// Returns `true` if no listeners are subscribed.
    pub fn is_empty(&self) -> bool {
        self.listener_count() == 0
    }

    /// Subscribes `f`, returning a [`Handle`] for later removal.
    ///
    /// Listeners fire in subscription order. Subscribing during an
    /// in-progress dispatch is allowed; the new listener is appended at the
    /// end of the order, and fires in the *current* pass if the cursor has
    /// not yet wrapped around.
    pub fn subscribe(&self, f: impl Fn(&A) + 'static) -> Handle<A> {
        self.subscribe_listener(&Listener::new(f))
    }

    /// Subscribes a fallible callback; its error fails the dispatch per the
    /// mode it was invoked with (see [`emit`](Event::emit) and
    /// [`emit_all`](Event::emit_all)).
    pub fn subscribe_fallible(
        &self,
        f: impl Fn(&A) -> Result<(), ListenerError> + 'static,
    ) -> Handle<A> {
        self.subscribe_listener(&Listener::fallible(f))
    }

    /// Subscribes an existing [`Listener`].
    ///
    /// The same listener may be subscribed more than once; it fires once
    /// per subscription and [`unsubscribe_listener`] removes every one.
    ///
    /// [`unsubscribe_listener`]: Event::unsubscribe_listener
    pub fn subscribe_listener(&self, listener: &Listener<A>) -> Handle<A> {
        let key = self.inner.borrow_mut().ring.push(Some(listener.clone()));
        Handle {
            event: Rc::downgrade(&self.inner),
            key,
        }
    }

    /// Subscribes `f` to fire exactly once; the registration removes itself
    /// the first time it is dispatched.
    pub fn subscribe_once(&self, f: impl Fn(&A) + 'static) -> Handle<A> {
        let registration: Rc<RefCell<Option<Handle<A>>>> = Rc::new(RefCell::new(None));
        let this = registration.clone();
        let handle = self.subscribe(move |arg| {
            if let Some(handle) = this.borrow_mut().take() {
                handle.unlisten();
            }
            f(arg);
        });
        *registration.borrow_mut() = Some(handle.clone());
        handle
    }

    /// Subscribes `f` until it returns `true`; the registration removes
    /// itself after the first dispatch for which it does.
    pub fn subscribe_until(&self, f: impl Fn(&A) -> bool + 'static) -> Handle<A> {
        let registration: Rc<RefCell<Option<Handle<A>>>> = Rc::new(RefCell::new(None));
        let this = registration.clone();
        let handle = self.subscribe(move |arg| {
            if f(arg) {
                if let Some(handle) = this.borrow_mut().take() {
                    handle.unlisten();
                }
            }
        });
        *registration.borrow_mut() = Some(handle.clone());
        handle
    }

    /// Removes the registration named by `handle`.
    ///
    /// Returns `false` (mutating nothing) if the handle came from a
    /// different event, or its registration was already removed. Otherwise
    /// the listener will never fire again and [`listener_count`] drops
    /// immediately, even if the physical unlink is deferred because a
    /// dispatch is in progress.
    ///
    /// [`listener_count`]: Event::listener_count
    pub fn unsubscribe(&self, handle: &Handle<A>) -> bool {
        self.inner.borrow_mut().remove_key(handle.key)
    }

    /// Removes every subscription of `listener` (compared by identity),
    /// returning how many were removed.
    pub fn unsubscribe_listener(&self, listener: &Listener<A>) -> usize {
        self.inner.borrow_mut().remove_matching(listener)
    }

    /// Removes every listener.
    ///
    /// Safe to call mid-dispatch: already-visited listeners have fired,
    /// the rest never will, and listeners subscribed *afterwards* are
    /// unaffected.
    pub fn unsubscribe_all(&self) {
        self.inner.borrow_mut().remove_all();
    }

    /// Fires every listener with `arg`, in subscription order, stopping at
    /// the first failure.
    ///
    /// The first error is returned alone and the remaining listeners do not
    /// fire; the event is left in a consistent state and can be emitted
    /// again. Firing an event with no listeners is a no-op.
    pub fn emit(&self, arg: &A) -> Result<(), ListenerError> {
        self.dispatch(arg, None)
    }

    /// Fires every listener with `arg`, in subscription order, regardless
    /// of failures.
    ///
    /// If any listener failed, one [`AggregateError`] carrying every
    /// failure (in firing order) is returned after the pass completes.
    pub fn emit_all(&self, arg: &A) -> Result<(), AggregateError> {
        let mut errors = Vec::new();
        match self.dispatch(arg, Some(&mut errors)) {
            Ok(()) => {}
            // unreachable: an aggregating dispatch records failures
            // instead of returning them
            Err(error) => errors.push(error),
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AggregateError::new(errors))
        }
    }

    /// Like [`emit`](Event::emit), but hands the failure to
    /// [`tracing::error!`] instead of returning it. Returns `true` if every
    /// listener succeeded.
    pub fn safe_emit(&self, arg: &A) -> bool {
        self.safe_emit_with(arg, |error| {
            tracing::error!(%error, "listener failed during dispatch");
        })
    }

    /// Like [`emit`](Event::emit), but hands the failure to `sink` instead
    /// of returning it. Returns `true` if every listener succeeded.
    pub fn safe_emit_with(&self, arg: &A, sink: impl FnOnce(ListenerError)) -> bool {
        match self.emit(arg) {
            Ok(()) => true,
            Err(error) => {
                sink(error);
                false
            }
        }
    }

    /// Like [`emit_all`](Event::emit_all), but hands the aggregate failure
    /// to [`tracing::error!`] instead of returning it. Returns `true` if
    /// every listener succeeded.
    pub fn safe_emit_all(&self, arg: &A) -> bool {
        self.safe_emit_all_with(arg, |error| {
            tracing::error!(
                failures = error.errors().len(),
                errors = %error.display_errors(),
                "listeners failed during dispatch",
            );
        })
    }

    /// Like [`emit_all`](Event::emit_all), but hands the aggregate failure
    /// to `sink` instead of returning it. Returns `true` if every listener
    /// succeeded.
    pub fn safe_emit_all_with(&self, arg: &A, sink: impl FnOnce(AggregateError)) -> bool {
        match self.emit_all(arg) {
            Ok(()) => true,
            Err(error) => {
                sink(error);
                false
            }
        }
    }

    /// Returns a copyable, subscribe-only [`Listenable`] view of this event.
    #[must_use]
    pub fn listenable(&self) -> Listenable<A> {
        Listenable {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Runs one dispatch pass. With `errors`, failures are recorded and the
    /// pass continues; without, the first failure ends the pass and is
    /// returned.
    ///
    /// The core is only ever borrowed *between* callbacks, never across
    /// one, so listeners may reenter any operation on this event.
    fn dispatch(
        &self,
        arg: &A,
        mut errors: Option<&mut Vec<ListenerError>>,
    ) -> Result<(), ListenerError> {
        let boundary = {
            let mut core = self.inner.borrow_mut();
            let Some(head) = core.ring.head_key() else {
                // nothing to do; the lock depth is left untouched
                return Ok(());
            };
            core.lock_depth += 1;
            head
        };

        let mut cursor = Some(boundary);
        while let Some(key) = cursor {
            let action = {
                let mut core = self.inner.borrow_mut();
                match core.ring.get(key) {
                    Some(Some(listener)) => Action::Call(listener.clone()),
                    Some(None) => {
                        // A tombstone. The outermost pass is the only
                        // frame that may unlink it: any deeper frame is
                        // running under an outer cursor that still points
                        // into the ring.
                        let next = core.ring.next_key(key);
                        if core.lock_depth == 1 {
                            core.ring.remove(key);
                            core.pending -= 1;
                            test_trace!(?key, "dispatch: unlinked tombstone");
                        } else {
                            test_trace!(?key, "dispatch: skipped tombstone");
                        }
                        match next {
                            Some(next) if next != boundary && !core.ring.is_empty() => {
                                Action::Advance(next)
                            }
                            _ => Action::Stop,
                        }
                    }
                    // the cursor no longer resolves; the pass is over
                    None => Action::Stop,
                }
            };

            match action {
                Action::Call(listener) => {
                    if let Err(error) = listener.call(arg) {
                        match &mut errors {
                            Some(errors) => errors.push(error),
                            None => {
                                // fail fast: surface the first failure
                                // without firing the remaining listeners
                                self.unlock();
                                return Err(error);
                            }
                        }
                    }
                    // Advance only after the callback, so a listener
                    // appended during the pass is seen before the cursor
                    // wraps back to the boundary.
                    let core = self.inner.borrow();
                    cursor = match core.ring.next_key(key) {
                        Some(next) if next != boundary => Some(next),
                        _ => None,
                    };
                }
                Action::Advance(next) => cursor = Some(next),
                Action::Stop => cursor = None,
            }
        }

        self.unlock();
        Ok(())
    }

    /// Ends a dispatch pass. When the outermost pass unlocks, any
    /// tombstones it did not revisit are swept so that none survive while
    /// the event is idle.
    fn unlock(&self) {
        let mut core = self.inner.borrow_mut();
        core.lock_depth -= 1;
        if core.lock_depth == 0 {
            core.sweep();
        }
    }
}

impl Event<()> {
    /// Fires every listener, stopping at the first failure. Shorthand for
    /// [`emit`](Event::emit) on a payload-less event.
    pub fn fire(&self) -> Result<(), ListenerError> {
        self.emit(&())
    }

    /// Fires every listener regardless of failures. Shorthand for
    /// [`emit_all`](Event::emit_all) on a payload-less event.
    pub fn fire_all(&self) -> Result<(), AggregateError> {
        self.emit_all(&())
    }
}

/// Cloning an `Event` is shallow: both clones share the same listener set,
/// like cloning an [`Rc`].
impl<A: ?Sized + 'static> Clone for Event<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A: ?Sized + 'static> Default for Event<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: ?Sized + 'static> fmt::Debug for Event<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(core) => f
                .debug_struct("Event")
                .field("listeners", &core.live())
                .field("lock_depth", &core.lock_depth)
                .field("pending", &core.pending)
                .finish(),
            Err(_) => f.write_str("Event { .. }"),
        }
    }
}

// === impl Core ===

impl<A: ?Sized + 'static> Core<A> {
    /// Listeners subscribed and not removed, tombstoned or otherwise.
    fn live(&self) -> usize {
        self.ring.len() - self.pending
    }

    /// Logically removes the registration named by `key`; physical unlink
    /// happens now if idle, or is deferred to the in-flight dispatch.
    fn remove_key(&mut self, key: Key) -> bool {
        let Some(entry) = self.ring.get_mut(key) else {
            // foreign or stale key; nothing to do
            return false;
        };
        if entry.is_none() {
            // already tombstoned
            return false;
        }

        *entry = None;
        if self.lock_depth == 0 {
            self.ring.remove(key);
        } else {
            self.pending += 1;
        }
        true
    }

    /// Tombstones every registration of `listener`, walking the full ring
    /// exactly once. Returns the number removed.
    fn remove_matching(&mut self, listener: &Listener<A>) -> usize {
        let mut removed = 0;
        let mut cursor = self.ring.head_key();
        for _ in 0..self.ring.len() {
            let Some(key) = cursor else { break };
            let next = self.ring.next_key(key);
            if let Some(entry) = self.ring.get_mut(key) {
                if entry.as_ref() == Some(listener) {
                    *entry = None;
                    removed += 1;
                    if self.lock_depth == 0 {
                        self.ring.remove(key);
                    } else {
                        self.pending += 1;
                    }
                }
            }
            cursor = next;
        }

        removed
    }

    fn remove_all(&mut self) {
        if self.lock_depth == 0 {
            debug_assert_eq!(self.pending, 0, "no tombstones may exist while idle");
            self.ring.clear();
            return;
        }

        let mut cursor = self.ring.head_key();
        for _ in 0..self.ring.len() {
            let Some(key) = cursor else { break };
            cursor = self.ring.next_key(key);
            if let Some(entry) = self.ring.get_mut(key) {
                if entry.is_some() {
                    *entry = None;
                    self.pending += 1;
                }
            }
        }
    }

    /// Unlinks every remaining tombstone. Only sound while idle: no cursor
    /// is outstanding.
    fn sweep(&mut self) {
        debug_assert_eq!(self.lock_depth, 0, "sweeping under a live cursor is unsound");
        if self.pending == 0 {
            return;
        }

        test_trace!(pending = self.pending, "sweeping tombstones");
        let mut cursor = self.ring.head_key();
        for _ in 0..self.ring.len() {
            if self.pending == 0 {
                break;
            }
            let Some(key) = cursor else { break };
            cursor = self.ring.next_key(key);
            if matches!(self.ring.get(key), Some(None)) {
                self.ring.remove(key);
                self.pending -= 1;
            }
        }

        debug_assert_eq!(self.pending, 0, "a sweep must clear every tombstone");
    }
}

// === impl Listener ===

impl<A: ?Sized + 'static> Listener<A> {
    /// Wraps an infallible callback.
    pub fn new(f: impl Fn(&A) + 'static) -> Self {
        Self {
            f: Rc::new(move |arg: &A| {
                f(arg);
                Ok(())
            }),
        }
    }

    /// Wraps a fallible callback.
    pub fn fallible(f: impl Fn(&A) -> Result<(), ListenerError> + 'static) -> Self {
        Self { f: Rc::new(f) }
    }

    pub(crate) fn call(&self, arg: &A) -> Result<(), ListenerError> {
        (self.f)(arg)
    }
}

impl<A: ?Sized + 'static> Clone for Listener<A> {
    fn clone(&self) -> Self {
        Self { f: self.f.clone() }
    }
}

/// Listeners compare by identity: two `Listener`s are equal iff they share
/// the same underlying callback (i.e. one is a clone of the other).
impl<A: ?Sized + 'static> PartialEq for Listener<A> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.f, &other.f)
    }
}

impl<A: ?Sized + 'static> Eq for Listener<A> {}

impl<A: ?Sized + 'static> fmt::Debug for Listener<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({:p})", Rc::as_ptr(&self.f))
    }
}

// === impl Handle ===

impl<A: ?Sized + 'static> Handle<A> {
    /// Removes the registration this handle names, returning `true` on the
    /// first call and `false` on every subsequent one (or once the event
    /// itself has been dropped).
    pub fn unlisten(&self) -> bool {
        match self.event.upgrade() {
            Some(event) => event.borrow_mut().remove_key(self.key),
            None => false,
        }
    }

    /// Returns `true` while the registration this handle names is still
    /// subscribed.
    pub fn is_active(&self) -> bool {
        self.event
            .upgrade()
            .is_some_and(|event| matches!(event.borrow().ring.get(self.key), Some(Some(_))))
    }
}

impl<A: ?Sized + 'static> Clone for Handle<A> {
    fn clone(&self) -> Self {
        Self {
            event: self.event.clone(),
            key: self.key,
        }
    }
}

impl<A: ?Sized + 'static> fmt::Debug for Handle<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle").field("key", &self.key).finish()
    }
}

// === impl Listenable ===

impl<A: ?Sized + 'static> Listenable<A> {
    /// Returns `true` while the viewed [`Event`] is still alive.
    pub fn is_valid(&self) -> bool {
        self.inner.strong_count() > 0
    }

    /// See [`Event::subscribe`].
    ///
    /// # Panics
    ///
    /// If the viewed event has been dropped.
    pub fn subscribe(&self, f: impl Fn(&A) + 'static) -> Handle<A> {
        self.upgrade().subscribe(f)
    }

    /// See [`Event::subscribe_listener`].
    ///
    /// # Panics
    ///
    /// If the viewed event has been dropped.
    pub fn subscribe_listener(&self, listener: &Listener<A>) -> Handle<A> {
        self.upgrade().subscribe_listener(listener)
    }

    /// See [`Event::unsubscribe`].
    ///
    /// # Panics
    ///
    /// If the viewed event has been dropped.
    pub fn unsubscribe(&self, handle: &Handle<A>) -> bool {
        self.upgrade().unsubscribe(handle)
    }

    /// See [`Event::unsubscribe_listener`].
    ///
    /// # Panics
    ///
    /// If the viewed event has been dropped.
    pub fn unsubscribe_listener(&self, listener: &Listener<A>) -> usize {
        self.upgrade().unsubscribe_listener(listener)
    }

    fn upgrade(&self) -> Event<A> {
        Event {
            inner: self
                .inner
                .upgrade()
                .expect("operation on a Listenable whose Event has been dropped"),
        }
    }
}

impl<A: ?Sized + 'static> Clone for Listenable<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Two `Listenable`s are equal iff they view the same [`Event`].
impl<A: ?Sized + 'static> PartialEq for Listenable<A> {
    fn eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.inner, &other.inner)
    }
}

impl<A: ?Sized + 'static> Eq for Listenable<A> {}

impl<A: ?Sized + 'static> fmt::Debug for Listenable<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listenable")
            .field("valid", &self.is_valid())
            .finish()
    }
}

#[cfg(test)]
mod tests;
