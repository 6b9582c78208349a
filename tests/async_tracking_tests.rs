//! Integration tests for window async-task tracking

mod common;

use common::{window, Counter};
use futures::FutureExt;
use pretty_assertions::assert_eq;
use std::cell::Cell;
use std::rc::Rc;
use window_async::{FetchOptions, HttpMethod, MockNetwork, MockResponse, TaskKind, Window};

/// Two timeouts, two frames and two fetches, each bumping `counter` when done
fn start_six(win: &Window, net: &MockNetwork, counter: &Counter) {
    net.route(
        HttpMethod::Get,
        "http://api.test/a",
        MockResponse::json(&serde_json::json!({ "n": 1 })),
    );
    net.route(HttpMethod::Get, "http://api.test/b", MockResponse::text("hello"));

    for delay in [10, 20] {
        let c = counter.clone();
        win.set_timeout(move || c.bump(), delay);
    }
    for _ in 0..2 {
        let c = counter.clone();
        win.request_animation_frame(move |_| c.bump());
    }

    let (c, w) = (counter.clone(), win.clone());
    win.spawn_local(async move {
        if let Ok(resp) = w.fetch("http://api.test/a", FetchOptions::get()).await {
            if resp.json::<serde_json::Value>().await.is_ok() {
                c.bump();
            }
        }
    });
    let (c, w) = (counter.clone(), win.clone());
    win.spawn_local(async move {
        if let Ok(resp) = w.fetch("http://api.test/b", FetchOptions::get()).await {
            if resp.text().await.is_ok() {
                c.bump();
            }
        }
    });

    // Issue both requests.
    win.run_pending_microtasks();
}

mod completion {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_idle_window_resolves_immediately() {
        let (win, _) = window();
        let done = win.when_async_complete();
        assert!(done.is_immediate());
        assert_eq!(done.now_or_never(), Some(()));
        assert_eq!(win.event_loop_stats().timers_scheduled, 0);
    }

    #[test]
    fn test_resolves_once_after_sixth_completion() {
        let (win, net) = window();
        let counter = Counter::new();
        start_six(&win, &net, &counter);
        assert_eq!(win.pending_async_count(), 6);

        let observed: Rc<Cell<Option<u32>>> = Rc::new(Cell::new(None));
        let resolutions = Counter::new();
        let done = win.when_async_complete();
        let (o, r, c) = (observed.clone(), resolutions.clone(), counter.clone());
        win.spawn_local(async move {
            done.await;
            r.bump();
            o.set(Some(c.get()));
        });

        net.deliver("http://api.test/b");
        win.run_pending_microtasks();
        assert_eq!(counter.get(), 1);

        win.advance_time(10);
        assert_eq!(counter.get(), 2);

        assert_eq!(win.run_animation_frame(), 2);
        assert_eq!(counter.get(), 4);

        net.deliver_all();
        win.run_pending_microtasks();
        assert_eq!(counter.get(), 5);
        assert_eq!(observed.get(), None);
        assert_eq!(win.pending_async_count(), 1);

        win.advance_time(10);
        assert_eq!(observed.get(), Some(6));
        assert_eq!(resolutions.get(), 1);
        assert_eq!(win.pending_async_count(), 0);
        assert_eq!(win.tracker_stats().drains, 1);
    }

    #[test]
    fn test_concurrent_waiters_both_resolve() {
        let (win, _) = window();
        let first_tick = win.set_timeout(|| {}, 5);
        win.set_timeout(|| {}, 15);

        let first = win.when_async_complete();
        win.advance_time(5);
        assert!(!win.tracker().is_pending(first_tick));
        let second = win.when_async_complete();

        let resolved = Counter::new();
        for done in [first, second] {
            let r = resolved.clone();
            win.spawn_local(async move {
                done.await;
                r.bump();
            });
        }
        win.run_pending_microtasks();
        assert_eq!(resolved.get(), 0);

        win.advance_time(10);
        assert_eq!(resolved.get(), 2);
        assert_eq!(win.tracker().waiter_count(), 0);
    }

    #[test]
    fn test_work_started_by_a_callback_is_a_new_window() {
        let (win, _) = window();
        let nested = Counter::new();
        let (w, n) = (win.clone(), nested.clone());
        win.set_timeout(
            move || {
                let n = n.clone();
                w.set_timeout(move || n.bump(), 10);
            },
            5,
        );

        let done = win.when_async_complete();
        win.advance_time(5);
        // The timeout deregistered before its callback scheduled more work.
        assert!(done.now_or_never().is_some());
        assert_eq!(win.pending_async_count(), 1);

        let again = win.when_async_complete();
        win.advance_time(10);
        assert_eq!(nested.get(), 1);
        assert!(again.now_or_never().is_some());
    }

    #[test]
    fn test_double_completion_does_not_double_resolve() {
        let (win, _) = window();
        let tracker = win.tracker();
        let a = tracker.register(TaskKind::Timeout, || Ok(()));
        let b = tracker.register(TaskKind::Timeout, || Ok(()));
        let mut done = win.when_async_complete();

        assert!(tracker.deregister(a));
        assert!(!tracker.deregister(a));
        assert_eq!(win.pending_async_count(), 1);
        assert!((&mut done).now_or_never().is_none());

        assert!(tracker.deregister(b));
        assert!(!tracker.deregister(b));
        assert_eq!(win.pending_async_count(), 0);
        assert!(done.now_or_never().is_some());
        assert_eq!(win.tracker_stats().waiters_resolved, 1);
    }
}

mod cancellation {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cancel_before_anything_fires() {
        let (win, net) = window();
        let counter = Counter::new();

        let before_any = win.when_async_complete();
        start_six(&win, &net, &counter);
        let before = win.when_async_complete();

        win.cancel_async();
        let after = win.when_async_complete();
        assert_eq!(win.pending_async_count(), 0);

        net.deliver_all();
        win.run_pending_microtasks();
        win.advance_time(100);
        win.run_animation_frame();
        win.run_until_idle().unwrap();

        assert_eq!(counter.get(), 0);
        assert!(before_any.now_or_never().is_some());
        assert!(before.now_or_never().is_some());
        assert!(after.is_immediate());
        assert_eq!(win.tracker_stats().cancelled, 6);
    }

    #[test]
    fn test_queued_callback_skipped_after_cancel() {
        let (win, _) = window();
        let ran = Counter::new();
        let w = win.clone();
        win.set_timeout(move || w.cancel_async(), 5);
        let r = ran.clone();
        win.set_timeout(move || r.bump(), 5);

        assert_eq!(win.advance_time(5), 1);
        assert_eq!(ran.get(), 0);
        assert!(!win.event_loop().has_pending_timers());
    }

    #[test]
    fn test_interval_cleared_immediately_never_fires() {
        let (win, _) = window();
        let ticks = Counter::new();
        let t = ticks.clone();
        let id = win.set_interval(move || t.bump(), 10);

        assert!(win.clear_interval(id));
        assert_eq!(win.pending_async_count(), 0);
        win.advance_time(100);
        assert_eq!(ticks.get(), 0);
    }

    #[test]
    fn test_interval_until_cancel_async() {
        let (win, _) = window();
        let ticks = Counter::new();
        let t = ticks.clone();
        win.set_interval(move || t.bump(), 10);

        win.advance_time(30);
        assert_eq!(ticks.get(), 3);
        let done = win.when_async_complete();
        win.cancel_async();
        win.advance_time(30);
        assert_eq!(ticks.get(), 3);
        assert!(done.now_or_never().is_some());
    }

    #[test]
    fn test_frame_cancelled_inside_its_batch() {
        let (win, _) = window();
        let ran = Counter::new();
        let victim: Rc<Cell<Option<window_async::TaskId>>> = Rc::new(Cell::new(None));

        let (w, v) = (win.clone(), victim.clone());
        win.request_animation_frame(move |_| {
            if let Some(id) = v.get() {
                w.cancel_animation_frame(id);
            }
        });
        let r = ran.clone();
        victim.set(Some(win.request_animation_frame(move |_| r.bump())));

        assert_eq!(win.run_animation_frame(), 1);
        assert_eq!(ran.get(), 0);
        assert_eq!(win.pending_async_count(), 0);
    }

    #[test]
    fn test_clear_unknown_ids_is_noop() {
        let (win, _) = window();
        let id = win.set_timeout(|| {}, 1);
        win.advance_time(1);
        assert!(!win.clear_timeout(id));
        assert!(!win.clear_interval(id));
        assert!(!win.cancel_animation_frame(id));
        assert_eq!(win.pending_async_count(), 0);
    }

    #[test]
    fn test_failing_capability_does_not_stick() {
        let (win, _) = window();
        win.tracker().register(TaskKind::NetworkFetch, || {
            Err(window_async::Error::cancel(TaskKind::NetworkFetch, "socket gone"))
        });
        let ran = Counter::new();
        let r = ran.clone();
        win.set_timeout(move || r.bump(), 1);
        let done = win.when_async_complete();

        win.cancel_async();
        win.advance_time(5);

        assert_eq!(ran.get(), 0);
        assert_eq!(win.pending_async_count(), 0);
        assert_eq!(win.tracker_stats().cancel_failures, 1);
        assert!(done.now_or_never().is_some());
    }
}

mod clock_edges {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_delay_past_end_of_clock_never_fires() {
        let (win, _) = window();
        win.advance_time(1);
        let ran = Counter::new();
        let r = ran.clone();
        let id = win.set_timeout(move || r.bump(), u64::MAX);

        assert_eq!(win.advance_time(u64::MAX), 0);
        assert_eq!(win.now(), u64::MAX);
        assert_eq!(ran.get(), 0);
        assert!(win.tracker().is_pending(id));

        let result = win.run_until_idle().unwrap();
        assert_eq!(result.timers_fired, 0);
        assert_eq!(result.final_time, u64::MAX);
        assert!(win.clear_timeout(id));
        assert_eq!(win.pending_async_count(), 0);
    }

    #[test]
    fn test_huge_advance_fires_everything_due() {
        let (win, _) = window();
        let ran = Counter::new();
        for delay in [10, 1_000, u64::MAX - 1] {
            let r = ran.clone();
            win.set_timeout(move || r.bump(), delay);
        }
        assert_eq!(win.advance_time(u64::MAX), 3);
        assert_eq!(ran.get(), 3);
        assert_eq!(win.pending_async_count(), 0);
    }

    #[test]
    fn test_interval_at_end_of_clock() {
        let network = Rc::new(MockNetwork::new());
        let config = window_async::WindowConfig {
            start_time_ms: u64::MAX - 25,
            ..window_async::WindowConfig::default()
        };
        let win = Window::new(config, network);
        let ticks = Counter::new();
        let t = ticks.clone();
        let id = win.set_interval(move || t.bump(), 10);

        let result = win.run_until_idle().unwrap();
        assert_eq!(ticks.get(), 2);
        assert_eq!(result.final_time, u64::MAX - 5);
        // Still registered, just never due again.
        assert!(win.tracker().is_pending(id));
        assert!(win.clear_interval(id));
    }

    #[test]
    fn test_frames_still_run_at_end_of_clock() {
        let (win, _) = window();
        win.advance_time(u64::MAX);
        let ran = Counter::new();
        let r = ran.clone();
        win.request_animation_frame(move |_| r.bump());

        let result = win.run_until_idle().unwrap();
        assert_eq!(result.frames_run, 1);
        assert_eq!(result.final_time, u64::MAX);
        assert_eq!(ran.get(), 1);
    }
}
