use super::*;
use std::cell::Cell;

fn trace_init() -> tracing::dispatcher::DefaultGuard {
    use tracing_subscriber::prelude::*;
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .with_target(false)
        .set_default()
}

/// A shared append-only log of which listeners fired, in order.
#[derive(Clone, Default)]
struct Log(Rc<RefCell<Vec<&'static str>>>);

impl Log {
    fn new() -> Self {
        Self::default()
    }

    fn push(&self, name: &'static str) {
        self.0.borrow_mut().push(name);
    }

    fn take(&self) -> Vec<&'static str> {
        core::mem::take(&mut self.0.borrow_mut())
    }
}

fn counter() -> (Rc<Cell<usize>>, impl Fn(&()) + 'static) {
    let count = Rc::new(Cell::new(0));
    let listener = {
        let count = count.clone();
        move |_: &()| count.set(count.get() + 1)
    };
    (count, listener)
}

fn failing(msg: &'static str) -> impl Fn(&()) -> Result<(), ListenerError> + 'static {
    move |_: &()| Err(msg.into())
}

#[test]
fn listeners_fire_in_subscription_order() {
    let _trace = trace_init();
    let event: Event = Event::new();
    let log = Log::new();

    for name in ["a", "b", "c"] {
        let log = log.clone();
        event.subscribe(move |_| log.push(name));
    }

    event.fire().unwrap();
    assert_eq!(log.take(), ["a", "b", "c"]);
    assert_eq!(event.listener_count(), 3);
}

#[test]
fn unlisten_is_idempotent() {
    let _trace = trace_init();
    let event: Event = Event::new();
    let (count, listener) = counter();

    let handle = event.subscribe(listener);
    assert!(handle.is_active());
    assert!(handle.unlisten());
    assert!(!handle.is_active());
    assert!(!handle.unlisten());
    assert!(!event.unsubscribe(&handle));

    event.fire().unwrap();
    assert_eq!(count.get(), 0);
    assert!(event.is_empty());
}

#[test]
fn listener_subscribed_mid_pass_fires_in_the_same_pass() {
    let _trace = trace_init();
    let event: Event = Event::new();
    let log = Log::new();

    // "a" appends "c" the first time it runs; the pass must pick it up.
    {
        let log = log.clone();
        let event = event.clone();
        let added = Cell::new(false);
        event.clone().subscribe(move |_| {
            log.push("a");
            if !added.replace(true) {
                let log = log.clone();
                event.subscribe(move |_| log.push("c"));
            }
        });
    }
    {
        let log = log.clone();
        event.subscribe(move |_| log.push("b"));
    }

    event.fire().unwrap();
    assert_eq!(log.take(), ["a", "b", "c"]);

    event.fire().unwrap();
    assert_eq!(log.take(), ["a", "b", "c"]);
}

#[test]
fn self_removal_during_dispatch() {
    let _trace = trace_init();
    let event: Event = Event::new();
    let log = Log::new();

    let handle: Rc<RefCell<Option<Handle<()>>>> = Rc::new(RefCell::new(None));
    {
        let log = log.clone();
        let registration = handle.clone();
        let h = event.subscribe(move |_| {
            log.push("a");
            registration.borrow().as_ref().unwrap().unlisten();
        });
        *handle.borrow_mut() = Some(h);
    }
    {
        let log = log.clone();
        event.subscribe(move |_| log.push("b"));
    }

    event.fire().unwrap();
    assert_eq!(log.take(), ["a", "b"]);
    assert_eq!(event.listener_count(), 1);

    event.fire().unwrap();
    assert_eq!(log.take(), ["b"]);
}

#[test]
fn removing_an_unvisited_listener_mid_pass_prevents_it_firing() {
    let _trace = trace_init();
    let event: Event = Event::new();
    let log = Log::new();

    let victim: Rc<RefCell<Option<Handle<()>>>> = Rc::new(RefCell::new(None));
    {
        let log = log.clone();
        let victim = victim.clone();
        event.subscribe(move |_| {
            log.push("a");
            if let Some(b) = victim.borrow_mut().take() {
                assert!(b.unlisten());
            }
        });
    }
    {
        let log = log.clone();
        *victim.borrow_mut() = Some(event.subscribe(move |_| log.push("b")));
    }
    {
        let log = log.clone();
        event.subscribe(move |_| log.push("c"));
    }

    event.fire().unwrap();
    assert_eq!(log.take(), ["a", "c"]);
    assert_eq!(event.listener_count(), 2);
}

#[test]
fn unsubscribe_all_mid_pass_spares_later_additions() {
    let _trace = trace_init();
    let event: Event = Event::new();
    let log = Log::new();

    {
        let log = log.clone();
        event.subscribe(move |_| log.push("a"));
    }
    {
        let log = log.clone();
        let event = event.clone();
        let armed = Cell::new(true);
        event.clone().subscribe(move |_| {
            log.push("b");
            if armed.replace(false) {
                event.unsubscribe_all();
                let log = log.clone();
                event.subscribe(move |_| log.push("d"));
            }
        });
    }
    {
        let log = log.clone();
        event.subscribe(move |_| log.push("c"));
    }

    // "c" was wiped before it fired; "d" was added after the wipe and
    // still fires in this pass.
    event.fire().unwrap();
    assert_eq!(log.take(), ["a", "b", "d"]);
    assert_eq!(event.listener_count(), 1);

    event.fire().unwrap();
    assert_eq!(log.take(), ["d"]);
}

#[test]
fn emit_stops_at_the_first_failure() {
    let _trace = trace_init();
    let event: Event = Event::new();
    let (count, listener) = counter();

    event.subscribe_fallible(failing("first"));
    event.subscribe(listener);
    event.subscribe_fallible(failing("second"));

    let error = event.fire().unwrap_err();
    assert_eq!(error.to_string(), "first");
    assert_eq!(count.get(), 0, "later listeners must not fire");

    // the event is still usable
    let error = event.fire().unwrap_err();
    assert_eq!(error.to_string(), "first");
}

#[test]
fn emit_all_collects_every_failure() {
    let _trace = trace_init();
    let event: Event = Event::new();
    let (count, listener) = counter();

    event.subscribe_fallible(failing("first"));
    event.subscribe(listener);
    event.subscribe_fallible(failing("second"));

    let error = event.fire_all().unwrap_err();
    let messages: Vec<_> = error.errors().iter().map(|e| e.to_string()).collect();
    assert_eq!(messages, ["first", "second"]);
    assert_eq!(count.get(), 1, "every listener fires in aggregating mode");
    assert_eq!(error.display_errors().to_string(), "first; second");
}

#[test]
fn firing_an_empty_event_is_a_no_op() {
    let _trace = trace_init();
    let event: Event = Event::new();
    event.fire().unwrap();
    event.fire_all().unwrap();
    assert!(event.safe_emit(&()));
}

#[test]
fn foreign_handles_are_rejected() {
    let _trace = trace_init();
    let first: Event = Event::new();
    let second: Event = Event::new();
    let (count, listener) = counter();

    let handle = first.subscribe(listener);
    second.subscribe(|_| {});

    assert!(!second.unsubscribe(&handle));
    assert_eq!(first.listener_count(), 1);
    assert_eq!(second.listener_count(), 1);

    // rejection must not have consumed the registration
    assert!(first.unsubscribe(&handle));
    assert_eq!(count.get(), 0);
}

#[test]
fn nested_dispatch_defers_unlinking_to_the_outer_pass() {
    let _trace = trace_init();
    let event: Event = Event::new();
    let log = Log::new();

    // "a" reenters the event once, and the nested pass removes "b". The
    // nested pass may not unlink under the outer cursor, but the removal
    // is immediately visible to both passes.
    let b_handle: Rc<RefCell<Option<Handle<()>>>> = Rc::new(RefCell::new(None));
    {
        let log = log.clone();
        let event = event.clone();
        let b_handle = b_handle.clone();
        let depth = Cell::new(0usize);
        event.clone().subscribe(move |_| {
            log.push("a");
            if depth.replace(depth.get() + 1) == 0 {
                if let Some(b) = b_handle.borrow_mut().take() {
                    assert!(b.unlisten());
                }
                event.fire().unwrap();
            }
            depth.set(depth.get() - 1);
        });
    }
    {
        let log = log.clone();
        *b_handle.borrow_mut() = Some(event.subscribe(move |_| log.push("b")));
    }
    {
        let log = log.clone();
        event.subscribe(move |_| log.push("c"));
    }

    event.fire().unwrap();
    assert_eq!(log.take(), ["a", "a", "c", "c"]);
    assert_eq!(event.listener_count(), 2);

    event.fire().unwrap();
    assert_eq!(log.take(), ["a", "a", "c", "c"]);
}

#[test]
fn boundary_listener_removed_in_a_nested_pass_is_swept_afterwards() {
    let _trace = trace_init();
    let event: Event = Event::new();
    let log = Log::new();

    // "b" reenters the event once; during the nested pass, "a" removes
    // itself. "a" is the boundary of both passes, so its tombstone may
    // only be unlinked once every cursor is gone.
    let a_handle: Rc<RefCell<Option<Handle<()>>>> = Rc::new(RefCell::new(None));
    let nested = Rc::new(Cell::new(false));
    {
        let log = log.clone();
        let registration = a_handle.clone();
        let nested = nested.clone();
        let h = event.subscribe(move |_| {
            log.push("a");
            if nested.get() {
                if let Some(a) = registration.borrow_mut().take() {
                    assert!(a.unlisten());
                }
            }
        });
        *a_handle.borrow_mut() = Some(h);
    }
    {
        let log = log.clone();
        let event = event.clone();
        let nested = nested.clone();
        let reentered = Cell::new(false);
        event.clone().subscribe(move |_| {
            log.push("b");
            if !reentered.replace(true) {
                nested.set(true);
                event.fire().unwrap();
                nested.set(false);
            }
        });
    }

    event.fire().unwrap();
    assert_eq!(log.take(), ["a", "b", "a", "b"]);
    assert_eq!(event.listener_count(), 1);

    event.fire().unwrap();
    assert_eq!(log.take(), ["b"]);
}

#[test]
fn nested_wipe_of_the_boundary_keeps_the_outer_pass_consistent() {
    let _trace = trace_init();
    let event: Event = Event::new();
    let log = Log::new();

    // The nested pass tombstones every listener, including both passes'
    // boundary, then appends a replacement. The replacement fires in both
    // passes and is all that survives.
    let wipe = Rc::new(Cell::new(false));
    {
        let log = log.clone();
        let event = event.clone();
        let wipe = wipe.clone();
        event.clone().subscribe(move |_| {
            log.push("a");
            if wipe.get() {
                event.unsubscribe_all();
                let log = log.clone();
                event.subscribe(move |_| log.push("d"));
            }
        });
    }
    {
        let log = log.clone();
        let event = event.clone();
        let wipe = wipe.clone();
        event.clone().subscribe(move |_| {
            log.push("b");
            if !wipe.replace(true) {
                event.fire().unwrap();
                wipe.set(false);
            }
        });
    }

    event.fire().unwrap();
    assert_eq!(log.take(), ["a", "b", "a", "d", "d"]);
    assert_eq!(event.listener_count(), 1);

    event.fire().unwrap();
    assert_eq!(log.take(), ["d"]);
}

#[test]
fn remove_by_value_mid_pass_counts_immediately_and_spares_the_rest() {
    let _trace = trace_init();
    let event: Event = Event::new();
    let (count, f) = counter();
    let listener = Listener::new(f);

    event.subscribe_listener(&listener);
    {
        let event = event.clone();
        let listener = listener.clone();
        let armed = Cell::new(true);
        event.clone().subscribe(move |_| {
            let expected = if armed.replace(false) { 2 } else { 0 };
            assert_eq!(event.unsubscribe_listener(&listener), expected);
            // the count reflects the removal even though both nodes are
            // still linked as tombstones
            assert_eq!(event.listener_count(), 1);
        });
    }
    event.subscribe_listener(&listener);

    event.fire().unwrap();
    assert_eq!(count.get(), 1, "only the first registration fired");
    assert_eq!(event.listener_count(), 1);

    event.fire().unwrap();
    assert_eq!(count.get(), 1);
}

#[test]
fn subscribe_once_fires_exactly_once() {
    let _trace = trace_init();
    let event: Event = Event::new();
    let (count, listener) = counter();

    let handle = event.subscribe_once(listener);
    assert_eq!(event.listener_count(), 1);

    event.fire().unwrap();
    event.fire().unwrap();
    assert_eq!(count.get(), 1);
    assert_eq!(event.listener_count(), 0);
    assert!(!handle.unlisten());
}

#[test]
fn subscribe_once_before_firing_can_still_be_cancelled() {
    let _trace = trace_init();
    let event: Event = Event::new();
    let (count, listener) = counter();

    let handle = event.subscribe_once(listener);
    assert!(handle.unlisten());

    event.fire().unwrap();
    assert_eq!(count.get(), 0);
}

#[test]
fn subscribe_until_unsubscribes_when_the_predicate_holds() {
    let _trace = trace_init();
    let event: Event<i32> = Event::new();
    let seen = Rc::new(RefCell::new(Vec::new()));

    {
        let seen = seen.clone();
        event.subscribe_until(move |n: &i32| {
            seen.borrow_mut().push(*n);
            *n >= 2
        });
    }

    for n in 1..=4 {
        event.emit(&n).unwrap();
    }
    assert_eq!(*seen.borrow(), [1, 2]);
    assert!(event.is_empty());
}

#[test]
fn unsubscribe_listener_removes_every_registration() {
    let _trace = trace_init();
    let event: Event = Event::new();
    let (count, f) = counter();
    let listener = Listener::new(f);

    let first = event.subscribe_listener(&listener);
    event.subscribe(|_| {});
    let second = event.subscribe_listener(&listener);
    assert_eq!(event.listener_count(), 3);

    event.fire().unwrap();
    assert_eq!(count.get(), 2);

    assert_eq!(event.unsubscribe_listener(&listener), 2);
    assert_eq!(event.listener_count(), 1);
    assert!(!first.is_active());
    assert!(!second.is_active());

    event.fire().unwrap();
    assert_eq!(count.get(), 2);
    assert_eq!(event.unsubscribe_listener(&listener), 0);
}

#[test]
fn listener_equality_is_identity() {
    let a: Listener<()> = Listener::new(|_| {});
    let b = a.clone();
    let c: Listener<()> = Listener::new(|_| {});
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn listenable_subscribes_without_exposing_emit() {
    let _trace = trace_init();
    let event: Event = Event::new();
    let listenable = event.listenable();
    let (count, listener) = counter();

    assert!(listenable.is_valid());
    assert_eq!(listenable.clone(), listenable);
    assert_ne!(Event::<()>::new().listenable(), listenable);

    let handle = listenable.subscribe(listener);
    event.fire().unwrap();
    assert_eq!(count.get(), 1);

    assert!(listenable.unsubscribe(&handle));
    event.fire().unwrap();
    assert_eq!(count.get(), 1);
}

#[test]
fn listenable_outliving_its_event_is_invalid() {
    let _trace = trace_init();
    let event: Event = Event::new();
    let listenable = event.listenable();
    drop(event);
    assert!(!listenable.is_valid());
}

#[test]
#[should_panic(expected = "dropped")]
fn subscribing_through_a_dead_listenable_panics() {
    let event: Event = Event::new();
    let listenable = event.listenable();
    drop(event);
    listenable.subscribe(|_| {});
}

#[test]
fn handles_outliving_their_event_unlisten_to_false() {
    let _trace = trace_init();
    let event: Event = Event::new();
    let handle = event.subscribe(|_| {});
    drop(event);
    assert!(!handle.unlisten());
    assert!(!handle.is_active());
}

#[test]
fn stale_handles_cannot_remove_reused_slots() {
    let _trace = trace_init();
    let event: Event = Event::new();
    let (count, listener) = counter();

    let old = event.subscribe(|_| {});
    assert!(old.unlisten());

    // the new registration reuses the freed slot; the spent handle must
    // not be able to reach it
    event.subscribe(listener);
    assert!(!old.unlisten());
    assert_eq!(event.listener_count(), 1);

    event.fire().unwrap();
    assert_eq!(count.get(), 1);
}

#[test]
fn typed_payloads_are_passed_by_reference() {
    let _trace = trace_init();
    let event: Event<String> = Event::new();
    let log = Log::new();

    {
        let log = log.clone();
        event.subscribe(move |s: &String| {
            if s == "hello" {
                log.push("greeted");
            }
        });
    }

    event.emit(&"hello".to_string()).unwrap();
    event.emit(&"bye".to_string()).unwrap();
    assert_eq!(log.take(), ["greeted"]);
}

#[test]
fn safe_emit_routes_failures_to_the_sink() {
    let _trace = trace_init();
    let event: Event = Event::new();
    event.subscribe_fallible(failing("boom"));

    let seen = RefCell::new(None);
    assert!(!event.safe_emit_with(&(), |error| {
        *seen.borrow_mut() = Some(error.to_string());
    }));
    assert_eq!(seen.borrow().as_deref(), Some("boom"));

    assert!(!event.safe_emit(&()));
    assert!(!event.safe_emit_all(&()));

    event.unsubscribe_all();
    assert!(event.safe_emit(&()));
    assert!(event.safe_emit_all_with(&(), |_| panic!("no failure expected")));
}

#[test]
fn unsubscribe_all_while_idle_frees_everything() {
    let _trace = trace_init();
    let event: Event = Event::new();
    let handles: Vec<_> = (0..4).map(|_| event.subscribe(|_| {})).collect();

    event.unsubscribe_all();
    assert!(event.is_empty());
    for handle in &handles {
        assert!(!handle.unlisten());
    }
}
