use closeable_pool::{CloseFuture, CloseListener, CloseState, WaitOutcome};

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn listener<F: Fn() + Send + Sync + 'static>(f: F) -> CloseListener {
    Arc::new(f)
}

#[test]
fn starts_open() {
    let future = CloseFuture::new();

    assert_eq!(CloseState::Open, future.state());
    assert!(!future.is_closed());
    assert!(!future.is_closing());
}

#[test]
fn request_close_moves_to_closing() {
    let future = CloseFuture::new();

    future.request_close();

    assert_eq!(CloseState::Closing, future.state());
    assert!(future.is_closing());
    assert!(!future.is_closed());

    // Closing never moves back
    future.request_close();
    assert_eq!(CloseState::Closing, future.state());
}

#[test]
fn listeners_notified_in_registration_order() {
    let future = CloseFuture::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..3 {
        let order = order.clone();
        future.add_listener(&listener(move || order.lock().unwrap().push(i)));
    }

    future.set_closed();

    assert_eq!(vec![0, 1, 2], *order.lock().unwrap());

    // A listener registered after the close is notified immediately
    let order2 = order.clone();
    future.add_listener(&listener(move || order2.lock().unwrap().push(3)));

    assert_eq!(vec![0, 1, 2, 3], *order.lock().unwrap());
}

#[test]
fn duplicate_listener_ignored_by_identity() {
    let future = CloseFuture::new();
    let fired = Arc::new(AtomicUsize::new(0));

    let l = {
        let fired = fired.clone();
        listener(move || {
            fired.fetch_add(1, SeqCst);
        })
    };

    future.add_listener(&l);
    future.add_listener(&l);
    future.set_closed();

    assert_eq!(1, fired.load(SeqCst));
}

#[test]
fn remove_listener_matches_identity() {
    let future = CloseFuture::new();
    let fired = Arc::new(AtomicUsize::new(0));

    let keep = {
        let fired = fired.clone();
        listener(move || {
            fired.fetch_add(1, SeqCst);
        })
    };
    let drop_me = {
        let fired = fired.clone();
        listener(move || {
            fired.fetch_add(10, SeqCst);
        })
    };

    future.add_listener(&keep);
    future.add_listener(&drop_me);
    future.remove_listener(&drop_me);
    future.set_closed();

    assert_eq!(1, fired.load(SeqCst));

    // Removing after notification is a harmless no-op
    future.remove_listener(&keep);
}

#[test]
fn set_closed_is_idempotent() {
    let future = CloseFuture::new();
    let fired = Arc::new(AtomicUsize::new(0));

    {
        let fired = fired.clone();
        future.add_listener(&listener(move || {
            fired.fetch_add(1, SeqCst);
        }));
    }

    assert!(future.set_closed());
    assert!(!future.set_closed());

    assert_eq!(1, fired.load(SeqCst));
    assert_eq!(CloseState::Closed, future.state());
}

#[test]
fn concurrent_set_closed_transitions_once() {
    let future = CloseFuture::new();
    let transitions = Arc::new(AtomicUsize::new(0));
    let fired = Arc::new(AtomicUsize::new(0));

    {
        let fired = fired.clone();
        future.add_listener(&listener(move || {
            fired.fetch_add(1, SeqCst);
        }));
    }

    let mut threads = Vec::new();

    for _ in 0..8 {
        let future = future.clone();
        let transitions = transitions.clone();

        threads.push(thread::spawn(move || {
            if future.set_closed() {
                transitions.fetch_add(1, SeqCst);
            }
            assert!(future.is_closed());
        }));
    }

    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(1, transitions.load(SeqCst));
    assert_eq!(1, fired.load(SeqCst));
}

#[test]
fn waiters_are_released() {
    let future = CloseFuture::new();

    let waiter = {
        let future = future.clone();
        thread::spawn(move || future.await_closed())
    };

    // Give the waiter a chance to block
    thread::sleep(Duration::from_millis(50));
    future.set_closed();

    assert_eq!(WaitOutcome::Closed, waiter.join().unwrap());

    // A waiter arriving after the close does not block
    assert_eq!(WaitOutcome::AlreadyClosed, future.await_closed());
}

#[test]
fn timed_wait_outcomes() {
    let future = CloseFuture::new();

    assert_eq!(
        WaitOutcome::TimedOut,
        future.await_closed_timeout(Duration::from_millis(50))
    );

    // Zero timeout checks state without blocking
    assert_eq!(
        WaitOutcome::TimedOut,
        future.await_closed_timeout(Duration::from_millis(0))
    );

    let waiter = {
        let future = future.clone();
        thread::spawn(move || future.await_closed_timeout(Duration::from_secs(5)))
    };

    thread::sleep(Duration::from_millis(50));
    future.set_closed();

    assert_eq!(WaitOutcome::Closed, waiter.join().unwrap());
    assert_eq!(
        WaitOutcome::AlreadyClosed,
        future.await_closed_timeout(Duration::from_secs(5))
    );
}

#[test]
fn listener_panic_does_not_stop_others() {
    let future = CloseFuture::new();
    let fired = Arc::new(AtomicUsize::new(0));

    future.add_listener(&listener(|| panic!("listener failure")));

    {
        let fired = fired.clone();
        future.add_listener(&listener(move || {
            fired.fetch_add(1, SeqCst);
        }));
    }

    assert!(future.set_closed());
    assert_eq!(1, fired.load(SeqCst));
    assert!(future.is_closed());
}

#[test]
fn listener_may_reenter_the_future() {
    let future = CloseFuture::new();
    let fired = Arc::new(AtomicUsize::new(0));

    {
        let future2 = future.clone();
        let fired = fired.clone();

        future.add_listener(&listener(move || {
            // Runs with the future already closed; registering here must
            // notify immediately instead of deadlocking
            let fired = fired.clone();
            future2.add_listener(&listener(move || {
                fired.fetch_add(1, SeqCst);
            }));
            assert!(future2.is_closed());
        }));
    }

    future.set_closed();

    assert_eq!(1, fired.load(SeqCst));
}
