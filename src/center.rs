//! A string-keyed registry of type-erased [`Event`]s.
use crate::{
    error::{AggregateError, ListenerError},
    event::{Event, Handle, Listener},
};
use core::fmt;
use std::{any::Any, cell::RefCell, collections::HashMap};

/// A registry of [`Event`]s addressed by string key.
///
/// Events are created lazily the first time a key is subscribed to, and
/// payloads are type-erased as [`&dyn Any`](Any) so one center can carry
/// heterogeneous events; pass `&()` when a key has no payload. For a
/// homogeneous, statically typed channel, use [`Event<A>`] directly
/// instead.
///
/// Every emitting and unsubscribing operation treats an absent key as an
/// event with no listeners, so callers need not create keys up front. The
/// internal map is never borrowed while listener code runs, so listeners
/// may reentrantly subscribe, unsubscribe, or emit through the same
/// center.
///
/// # Examples
///
/// ```
/// use fairy_ring::EventCenter;
/// use std::any::Any;
///
/// let center = EventCenter::new();
/// center.subscribe("damage", |amount: &dyn Any| {
///     if let Some(amount) = amount.downcast_ref::<u32>() {
///         println!("took {amount} damage");
///     }
/// });
///
/// center.emit("damage", &3u32).unwrap();
/// center.emit("healed", &()).unwrap(); // nobody listening; a no-op
/// ```
///
/// # Panics
///
/// The empty string is not a valid key; every method panics when given
/// one.
pub struct EventCenter {
    events: RefCell<HashMap<String, Event<dyn Any>>>,
}

// === impl EventCenter ===

impl EventCenter {
    /// Returns a new registry with no keys.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: RefCell::new(HashMap::new()),
        }
    }

    /// Subscribes `f` under `key`, creating the event if the key is new.
    /// See [`Event::subscribe`].
    pub fn subscribe(&self, key: &str, f: impl Fn(&dyn Any) + 'static) -> Handle<dyn Any> {
        self.get_or_create(key).subscribe(f)
    }

    /// Subscribes a fallible callback under `key`. See
    /// [`Event::subscribe_fallible`].
    pub fn subscribe_fallible(
        &self,
        key: &str,
        f: impl Fn(&dyn Any) -> Result<(), ListenerError> + 'static,
    ) -> Handle<dyn Any> {
        self.get_or_create(key).subscribe_fallible(f)
    }

    /// Subscribes an existing [`Listener`] under `key`. See
    /// [`Event::subscribe_listener`].
    pub fn subscribe_listener(&self, key: &str, listener: &Listener<dyn Any>) -> Handle<dyn Any> {
        self.get_or_create(key).subscribe_listener(listener)
    }

    /// Subscribes `f` under `key` to fire exactly once. See
    /// [`Event::subscribe_once`].
    pub fn subscribe_once(&self, key: &str, f: impl Fn(&dyn Any) + 'static) -> Handle<dyn Any> {
        self.get_or_create(key).subscribe_once(f)
    }

    /// Subscribes `f` under `key` until it returns `true`. See
    /// [`Event::subscribe_until`].
    pub fn subscribe_until(
        &self,
        key: &str,
        f: impl Fn(&dyn Any) -> bool + 'static,
    ) -> Handle<dyn Any> {
        self.get_or_create(key).subscribe_until(f)
    }

    /// Removes the registration named by `handle` from the event under
    /// `key`. Returns `false` if the key is absent, or the handle is
    /// foreign or spent.
    pub fn unsubscribe(&self, key: &str, handle: &Handle<dyn Any>) -> bool {
        match self.get(key) {
            Some(event) => event.unsubscribe(handle),
            None => false,
        }
    }

    /// Removes every subscription of `listener` under `key`, returning how
    /// many were removed; 0 if the key is absent.
    pub fn unsubscribe_listener(&self, key: &str, listener: &Listener<dyn Any>) -> usize {
        match self.get(key) {
            Some(event) => event.unsubscribe_listener(listener),
            None => 0,
        }
    }

    /// Removes every listener under `key`. The key itself remains
    /// registered.
    pub fn unsubscribe_all(&self, key: &str) {
        if let Some(event) = self.get(key) {
            event.unsubscribe_all();
        }
    }

    /// Fires the event under `key`, stopping at the first failure. Absent
    /// keys succeed trivially. See [`Event::emit`].
    pub fn emit(&self, key: &str, arg: &dyn Any) -> Result<(), ListenerError> {
        match self.get(key) {
            Some(event) => event.emit(arg),
            None => Ok(()),
        }
    }

    /// Fires the event under `key`, collecting every failure. Absent keys
    /// succeed trivially. See [`Event::emit_all`].
    pub fn emit_all(&self, key: &str, arg: &dyn Any) -> Result<(), AggregateError> {
        match self.get(key) {
            Some(event) => event.emit_all(arg),
            None => Ok(()),
        }
    }

    /// Like [`emit`](EventCenter::emit), routing the failure to
    /// [`tracing::error!`]. Returns `true` if every listener succeeded.
    pub fn safe_emit(&self, key: &str, arg: &dyn Any) -> bool {
        match self.get(key) {
            Some(event) => event.safe_emit(arg),
            None => true,
        }
    }

    /// Like [`emit_all`](EventCenter::emit_all), routing the failures to
    /// [`tracing::error!`]. Returns `true` if every listener succeeded.
    pub fn safe_emit_all(&self, key: &str, arg: &dyn Any) -> bool {
        match self.get(key) {
            Some(event) => event.safe_emit_all(arg),
            None => true,
        }
    }

    /// Returns the number of listeners under `key`; 0 if the key is
    /// absent.
    pub fn listener_count(&self, key: &str) -> usize {
        match self.get(key) {
            Some(event) => event.listener_count(),
            None => 0,
        }
    }

    /// Returns `true` if an event has been created under `key`.
    pub fn contains(&self, key: &str) -> bool {
        check_key(key);
        self.events.borrow().contains_key(key)
    }

    /// Returns the number of keys with a created event.
    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    /// Returns `true` if no event has been created yet.
    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }

    /// Removes every key, tearing down each event's listeners.
    ///
    /// Outstanding [`Handle`]s become spent, and clones of the torn-down
    /// events keep working but start empty.
    pub fn clear(&self) {
        // drop the map borrow before touching any event, in case a
        // torn-down listener's drop glue reenters this center
        let events = core::mem::take(&mut *self.events.borrow_mut());
        for event in events.into_values() {
            event.unsubscribe_all();
        }
    }

    fn get(&self, key: &str) -> Option<Event<dyn Any>> {
        check_key(key);
        self.events.borrow().get(key).cloned()
    }

    fn get_or_create(&self, key: &str) -> Event<dyn Any> {
        check_key(key);
        self.events
            .borrow_mut()
            .entry(key.to_owned())
            .or_insert_with(Event::new)
            .clone()
    }
}

impl Default for EventCenter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventCenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.events.try_borrow() {
            Ok(events) => {
                let mut keys: Vec<_> = events.keys().collect();
                keys.sort();
                f.debug_struct("EventCenter").field("keys", &keys).finish()
            }
            Err(_) => f.write_str("EventCenter { .. }"),
        }
    }
}

fn check_key(key: &str) {
    assert!(!key.is_empty(), "event keys must not be empty");
}
