#![cfg_attr(docsrs, doc = include_str!("../README.md"))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(docsrs, deny(missing_docs))]
//! Reentrancy-safe publish/subscribe primitives for single-threaded code.
//!
//! The core type is [`Event`]: an ordered set of listeners that may be
//! subscribed to, unsubscribed from, and emitted, including from *inside*
//! a listener currently being fired. Removal during dispatch is handled by
//! tombstoning nodes in a circular [`ring`] and deferring the physical
//! unlink until no dispatch cursor can be invalidated, so the common case
//! allocates nothing and every mutation is O(1) (removal by value and bulk
//! removal walk the ring once).
//!
//! On top of `Event` sit:
//!
//! - [`Handle`], a token for at-most-once removal of one registration;
//! - [`Listenable`], a copyable subscribe-only view that hides `emit`;
//! - [`EventCenter`], a string-keyed registry of type-erased events.
//!
//! All of these are single-threaded by design (`!Send`, `!Sync`);
//! reentrancy is cooperative, not concurrent.
//!
//! # Examples
//!
//! ```
//! use fairy_ring::{Event, Handle};
//! use std::{cell::RefCell, rc::Rc};
//!
//! let event: Event<&str> = Event::new();
//! let log = Rc::new(RefCell::new(Vec::new()));
//!
//! let sink = log.clone();
//! event.subscribe(move |msg: &&str| sink.borrow_mut().push(msg.to_string()));
//!
//! // a listener may unsubscribe itself mid-dispatch
//! let once: Rc<RefCell<Option<Handle<&str>>>> = Rc::new(RefCell::new(None));
//! let registration = once.clone();
//! let sink = log.clone();
//! let handle = event.subscribe(move |msg: &&str| {
//!     sink.borrow_mut().push(format!("{msg} (once)"));
//!     if let Some(handle) = registration.borrow_mut().take() {
//!         assert!(handle.unlisten());
//!     }
//! });
//! *once.borrow_mut() = Some(handle);
//!
//! event.emit(&"first").unwrap();
//! event.emit(&"second").unwrap();
//! assert_eq!(
//!     *log.borrow(),
//!     ["first", "first (once)", "second"],
//! );
//! ```

#[macro_use]
pub(crate) mod util;

pub mod center;
pub mod event;
pub mod ring;

mod error;

#[doc(inline)]
pub use self::center::EventCenter;
#[doc(inline)]
pub use self::event::{Event, Handle, Listenable, Listener};
pub use self::error::{AggregateError, ListenerError};
