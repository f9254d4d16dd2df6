use super::*;
use crate::protocol::channel;
use serde_json::json;
use std::sync::Mutex;

fn recorder() -> (Listener, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let listener = Listener::new(move |m: &Message| {
        sink.lock().unwrap().push(m.channel.clone());
    });
    (listener, seen)
}

#[test]
fn test_channel_exists_only_with_listeners() {
    let mut set = ChannelSet::new();
    let (a, _) = recorder();
    let (b, _) = recorder();

    assert!(set.subscribe("/foo", a.clone()));
    assert!(!set.subscribe("/foo", b.clone()));
    assert_eq!(set.get("/foo").unwrap().listeners().len(), 2);

    assert!(!set.unsubscribe("/foo", &a));
    assert!(set.has_subscription("/foo"));
    assert!(set.unsubscribe("/foo", &b));
    assert!(!set.has_subscription("/foo"));
    assert!(set.is_empty());
}

#[test]
fn test_unknown_listener_is_ignored() {
    let mut set = ChannelSet::new();
    let (a, _) = recorder();
    let (stranger, _) = recorder();
    set.subscribe("/foo", a);

    assert!(!set.unsubscribe("/foo", &stranger));
    assert!(!set.unsubscribe("/bar", &stranger));
    assert_eq!(set.len(), 1);
}

#[test]
fn test_same_listener_is_added_once() {
    let mut set = ChannelSet::new();
    let (a, _) = recorder();
    set.subscribe("/foo", a.clone());
    set.subscribe("/foo", a.clone());
    assert_eq!(set.get("/foo").unwrap().listeners().len(), 1);
    assert!(set.unsubscribe("/foo", &a));
}

#[test]
fn test_distribute_reaches_matching_patterns_only() {
    let mut set = ChannelSet::new();
    let patterns = [
        "/**",
        "/foo/bar",
        "/foo/*",
        "/foo/**",
        "/foo/bar/*",
        "/foo/bar/**",
        "/baz/*",
        "/foo/baz",
    ];
    let mut seen = Vec::new();
    for pattern in patterns {
        let (listener, log) = recorder();
        set.subscribe(pattern, listener);
        seen.push((pattern, log));
    }

    set.distribute_message(&Message::publish("/foo/bar", None, json!(1)));

    for (pattern, log) in seen {
        let delivered = log.lock().unwrap().len();
        let expected = usize::from(channel::matches(pattern, "/foo/bar"));
        assert_eq!(delivered, expected, "pattern {pattern}");
    }
}

#[test]
fn test_distribute_preserves_arrival_order() {
    let mut set = ChannelSet::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    set.subscribe(
        "/ticks",
        Listener::new(move |m: &Message| {
            sink.lock().unwrap().push(m.data.clone().unwrap_or_default());
        }),
    );

    for n in 0..5 {
        set.distribute_message(&Message::publish("/ticks", None, json!(n)));
    }
    assert_eq!(
        *seen.lock().unwrap(),
        vec![json!(0), json!(1), json!(2), json!(3), json!(4)]
    );
}

#[test]
fn test_established_channels() {
    let mut set = ChannelSet::new();
    let (a, _) = recorder();
    let (b, _) = recorder();
    set.subscribe("/b", a);
    set.subscribe("/a", b);
    assert!(set.established().is_empty());

    set.set_established("/b", true);
    set.set_established("/a", true);
    set.set_established("/missing", true);
    assert_eq!(set.established(), vec!["/a".to_string(), "/b".to_string()]);

    set.clear();
    assert!(set.established().is_empty());
}
