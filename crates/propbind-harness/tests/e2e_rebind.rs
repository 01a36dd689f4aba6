//! E2E: re-binding.
//!
//! Covers the three ways a binding is re-loaded and what each must
//! guarantee:
//! 1. Watched external inputs: only a change of a watched name re-loads.
//! 2. Explicit predicates take precedence over watched inputs.
//! 3. Computed dependencies: exactly one re-load per distinct change, with
//!    the previous subscription and watch disposed first.
//! 4. In every case a value from the replaced stream is never committed.

#![forbid(unsafe_code)]

use std::cell::Cell;
use std::rc::Rc;

use propbind_core::InputSnapshot;
use propbind_harness::fixtures::{Json, counting, keyed_by_prop, snapshot};
use propbind_harness::scripted::ScriptedStream;
use propbind_harness::trace;
use propbind_runtime::declaration::Binding;
use propbind_runtime::diagnostics;
use propbind_runtime::host::{HostClass, Instance};
use propbind_runtime::trigger::UpdateNotice;
use serde_json::json;

fn player(binding: Binding<Json>, props: InputSnapshot<Json>) -> Instance<Json> {
    HostClass::new("Player")
        .state("channel", Some(json!(1)))
        .state("quality", Some(json!("hd")))
        .bind(binding)
        .expect("bind")
        .finish()
        .instantiate(props)
}

// ── Watched inputs ──────────────────────────────────────────────────────

#[test]
fn watched_input_change_reloads_only_when_it_differs() {
    let feed = ScriptedStream::new();
    let (loads, stream_fn) = counting(&feed);
    let p = player(
        Binding::derived("video", stream_fn)
            .on_props_change(["video"])
            .build()
            .unwrap(),
        snapshot([("video", json!("a")), ("volume", json!(1))]),
    );
    p.mount();
    assert_eq!(loads.get(), 1);

    // Unwatched input changes.
    p.set_props(snapshot([("video", json!("a")), ("volume", json!(2))]));
    assert_eq!(loads.get(), 1);

    // Watched input changes.
    p.set_props(snapshot([("video", json!("b")), ("volume", json!(2))]));
    assert_eq!(loads.get(), 2);
    assert_eq!(feed.active(), 1);
    assert_eq!(feed.dispose_count(), 1);
}

#[test]
fn watched_input_appearing_counts_as_change() {
    let feed = ScriptedStream::new();
    let (loads, stream_fn) = counting(&feed);
    let p = player(
        Binding::derived("video", stream_fn)
            .on_prop_change("video")
            .build()
            .unwrap(),
        InputSnapshot::new(),
    );
    p.mount();
    p.set_props(snapshot([("video", json!("a"))]));
    assert_eq!(loads.get(), 2);
}

#[test]
fn switching_source_never_commits_stale_value() {
    let a = ScriptedStream::leaky();
    let b = ScriptedStream::leaky();
    let p = player(
        Binding::derived(
            "video",
            keyed_by_prop("video", vec![("a", a.clone()), ("b", b.clone())], ScriptedStream::new()),
        )
        .on_props_change(["video"])
        .build()
        .unwrap(),
        snapshot([("video", json!("a"))]),
    );
    p.mount();
    a.emit(json!("from-a"));
    assert_eq!(p.get("video"), Some(json!("from-a")));

    p.set_props(snapshot([("video", json!("b"))]));
    let before = diagnostics::stale_callbacks_total();
    let ((), capture) = trace::capture(|| a.emit(json!("stale")));
    assert_eq!(p.get("video"), Some(json!("from-a")));
    assert!(diagnostics::stale_callbacks_total() > before);
    assert_eq!(capture.count("binding.stale"), 1);

    b.emit(json!("from-b"));
    assert_eq!(p.get("video"), Some(json!("from-b")));
}

// ── Predicates ──────────────────────────────────────────────────────────

#[test]
fn predicate_takes_precedence_over_watch_list() {
    let feed = ScriptedStream::new();
    let (loads, stream_fn) = counting(&feed);
    let p = player(
        Binding::derived("video", stream_fn)
            .on_props_change(["video"])
            .rebind_when(|_, notice| notice.context == Some(json!("force")))
            .build()
            .unwrap(),
        snapshot([("video", json!("a"))]),
    );
    p.mount();

    // The watched input changes but the predicate says no.
    p.set_props(snapshot([("video", json!("b"))]));
    assert_eq!(loads.get(), 1);

    let notice = UpdateNotice::new(p.props(), p.props()).with_context(json!("force"));
    p.update(notice);
    assert_eq!(loads.get(), 2);
}

#[test]
fn predicate_sees_instance_state() {
    let feed = ScriptedStream::new();
    let (loads, stream_fn) = counting(&feed);
    let p = player(
        Binding::derived("video", stream_fn)
            .rebind_when(|instance, notice| {
                notice.prev_state.get("quality") != instance.get("quality").as_ref()
            })
            .build()
            .unwrap(),
        InputSnapshot::new(),
    );
    p.mount();

    let prev_state = p.state().snapshot();
    p.commit(|tx| {
        tx.set("quality", json!("sd"));
    });
    p.update(UpdateNotice::new(p.props(), p.props()).with_prev_state(prev_state));
    assert_eq!(loads.get(), 2);
}

#[test]
fn updates_without_trigger_never_reload() {
    let feed = ScriptedStream::new();
    let (loads, stream_fn) = counting(&feed);
    let p = player(
        Binding::derived("video", stream_fn).build().unwrap(),
        snapshot([("video", json!("a"))]),
    );
    p.mount();
    for n in 0..5 {
        p.set_props(snapshot([("video", json!(n))]));
    }
    assert_eq!(loads.get(), 1);
}

// ── Computed ────────────────────────────────────────────────────────────

#[test]
fn computed_dependency_reloads_once_per_distinct_change() {
    let feed = ScriptedStream::new();
    let (loads, stream_fn) = counting(&feed);
    let p = player(
        Binding::derived("video", stream_fn)
            .resubscribe_on(|i| i.get("channel").unwrap_or(Json::Null))
            .build()
            .unwrap(),
        InputSnapshot::new(),
    );
    p.mount();
    assert_eq!(loads.get(), 1);

    for channel in [2, 2, 3, 3, 3, 4] {
        p.commit(|tx| {
            tx.set("channel", json!(channel));
        });
    }
    assert_eq!(loads.get(), 4);
    assert_eq!(feed.subscribe_count(), 4);
    assert_eq!(feed.dispose_count(), 3);
    assert_eq!(feed.active(), 1);
}

#[test]
fn computed_tracks_external_inputs_read_by_stream_function() {
    let a = ScriptedStream::new();
    let b = ScriptedStream::new();
    let p = player(
        Binding::derived(
            "video",
            keyed_by_prop("source", vec![("a", a.clone()), ("b", b.clone())], ScriptedStream::new()),
        )
        .computed()
        .build()
        .unwrap(),
        snapshot([("source", json!("a"))]),
    );
    p.mount();
    assert_eq!((a.active(), b.active()), (1, 0));

    p.set_props(snapshot([("source", json!("b"))]));
    assert_eq!((a.active(), b.active()), (0, 1));
}

#[test]
fn computed_and_watched_input_reload_once_for_one_change() {
    let a = ScriptedStream::new();
    let b = ScriptedStream::new();
    let p = player(
        Binding::derived(
            "video",
            keyed_by_prop("source", vec![("a", a.clone()), ("b", b.clone())], ScriptedStream::new()),
        )
        .computed()
        .on_props_change(["source"])
        .build()
        .unwrap(),
        snapshot([("source", json!("a"))]),
    );
    p.mount();

    // A second load would subscribe `b` twice.
    p.set_props(snapshot([("source", json!("b"))]));
    assert_eq!((a.subscribe_count(), b.subscribe_count()), (1, 1));
    assert_eq!((a.active(), b.active()), (0, 1));
    assert!(p.is_watching("video"));

    // The re-armed watch still follows the input.
    p.set_props(snapshot([("source", json!("a"))]));
    assert_eq!((a.subscribe_count(), b.subscribe_count()), (2, 1));
    assert_eq!((a.active(), b.active()), (1, 0));
}

#[test]
fn trigger_rebind_rearms_watch_before_next_change() {
    let feed = ScriptedStream::new();
    let (loads, stream_fn) = counting(&feed);
    let evaluations = Rc::new(Cell::new(0));
    let counter = Rc::clone(&evaluations);
    let p = player(
        Binding::derived("video", stream_fn)
            .resubscribe_on(move |i| {
                counter.set(counter.get() + 1);
                i.get("channel").unwrap_or(Json::Null)
            })
            .on_props_change(["video"])
            .build()
            .unwrap(),
        snapshot([("video", json!("a"))]),
    );
    p.mount();
    assert_eq!(evaluations.get(), 1);

    p.set_props(snapshot([("video", json!("b"))]));
    assert_eq!(loads.get(), 2);
    // Re-arming evaluated a fresh watch.
    assert_eq!(evaluations.get(), 2);

    p.commit(|tx| {
        tx.set("channel", json!(9));
    });
    // One watch, one reload.
    assert_eq!(loads.get(), 3);
    assert_eq!(feed.active(), 1);
}

#[test]
fn released_binding_ignores_dependency_changes() {
    let feed = ScriptedStream::new();
    let (loads, stream_fn) = counting(&feed);
    let p = player(
        Binding::derived("video", stream_fn)
            .resubscribe_on(|i| i.get("channel").unwrap_or(Json::Null))
            .build()
            .unwrap(),
        InputSnapshot::new(),
    );
    p.mount();
    assert!(p.release("video"));
    p.commit(|tx| {
        tx.set("channel", json!(5));
    });
    assert_eq!(loads.get(), 1);
    assert_eq!(feed.active(), 0);

    // A manual reload brings the subscription back, not the watch.
    assert!(p.reload());
    assert_eq!(feed.active(), 1);
    assert!(!p.is_watching("video"));
}
