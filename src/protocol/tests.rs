use super::channel;
use super::error::ProtocolError;
use super::message::{Advice, Message, Reconnect, decode_messages, encode_messages};
use serde_json::json;

#[test]
fn test_error_round_trip() {
    let err = ProtocolError::parse("401:client1:Unknown client");
    assert_eq!(err.code, Some(401));
    assert_eq!(err.params, vec!["client1".to_string()]);
    assert_eq!(err.message, "Unknown client");
    assert_eq!(err.to_string(), "401:client1:Unknown client");
}

#[test]
fn test_error_with_several_params() {
    let err = ProtocolError::parse("405:/foo/*,/bar:Invalid channel");
    assert_eq!(err.params, vec!["/foo/*", "/bar"]);
    assert_eq!(err.to_string(), "405:/foo/*,/bar:Invalid channel");
}

#[test]
fn test_error_with_no_params() {
    let err = ProtocolError::parse("402::Missing required parameter");
    assert_eq!(err.code, Some(402));
    assert!(err.params.is_empty());
    assert_eq!(err.to_string(), "402::Missing required parameter");
}

#[test]
fn test_unparseable_error_keeps_raw_text() {
    let err = ProtocolError::parse("something broke");
    assert_eq!(err.code, None);
    assert_eq!(err.message, "something broke");
    assert_eq!(err.to_string(), "something broke");

    let err = ProtocolError::parse("40x:a:b");
    assert_eq!(err.code, None);
}

#[test]
fn test_error_constructors() {
    assert_eq!(
        ProtocolError::client_unknown(&["abc"]).to_string(),
        "401:abc:Unknown client"
    );
    assert_eq!(ProtocolError::server_error(&[]).code, Some(500));
}

#[test]
fn test_channel_validity() {
    assert!(channel::is_valid("/foo"));
    assert!(channel::is_valid("/foo/bar"));
    assert!(channel::is_valid("/foo/*"));
    assert!(channel::is_valid("/foo/**"));
    assert!(channel::is_valid("/**"));
    assert!(!channel::is_valid("foo"));
    assert!(!channel::is_valid("/"));
    assert!(!channel::is_valid("/foo//bar"));
    assert!(!channel::is_valid("/foo/*/bar"));
    assert!(!channel::is_valid("/foo/b ar"));
}

#[test]
fn test_channel_expand() {
    assert_eq!(
        channel::expand("/foo/bar"),
        vec!["/**", "/foo/bar", "/foo/*", "/foo/**", "/foo/bar/**"]
    );
    assert!(channel::expand("bad").is_empty());
}

#[test]
fn test_expansion_agrees_with_matching() {
    let patterns = [
        "/**", "/foo", "/foo/*", "/foo/**", "/foo/bar", "/foo/bar/*", "/foo/bar/**", "/baz/*",
        "/*",
    ];
    let names = ["/foo", "/foo/bar", "/foo/bar/baz", "/baz/qux", "/qux"];
    for name in names {
        let expanded = channel::expand(name);
        for pattern in patterns {
            assert_eq!(
                expanded.iter().any(|p| p == pattern),
                channel::matches(pattern, name),
                "pattern {pattern} vs {name}"
            );
        }
    }
}

#[test]
fn test_glob_matching() {
    assert!(channel::matches("/foo/*", "/foo/bar"));
    assert!(!channel::matches("/foo/*", "/foo/bar/baz"));
    assert!(!channel::matches("/foo/*", "/foo"));
    assert!(channel::matches("/foo/**", "/foo/bar/baz"));
    assert!(channel::matches("/foo/**", "/foo"));
    assert!(channel::matches("/**", "/anything/at/all"));
    assert!(!channel::matches("/foo/**", "/food"));
}

#[test]
fn test_meta_detection() {
    assert!(channel::is_meta(channel::CONNECT));
    assert!(!channel::is_meta("/metadata"));
    assert!(channel::is_service("/service/echo"));
}

#[test]
fn test_message_serializes_camel_case_and_skips_empty() {
    let msg = Message::connect("abc", "long-polling").with_id("1");
    let value = serde_json::to_value(&msg).unwrap();
    assert_eq!(
        value,
        json!({
            "channel": "/meta/connect",
            "id": "1",
            "clientId": "abc",
            "connectionType": "long-polling"
        })
    );
}

#[test]
fn test_message_keeps_unknown_fields() {
    let raw = r#"[{"channel":"/foo","data":{"a":1},"timestamp":"2024-01-01T00:00:00"}]"#;
    let messages = decode_messages(raw).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].extra["timestamp"], "2024-01-01T00:00:00");

    let encoded = encode_messages(&messages).unwrap();
    assert!(encoded.contains("\"timestamp\""));
}

#[test]
fn test_decode_single_object() {
    let messages = decode_messages(r#"{"channel":"/meta/connect","successful":true}"#).unwrap();
    assert!(messages[0].is_reply());
    assert!(messages[0].is_successful());
}

#[test]
fn test_advice_parsing() {
    let raw = r#"{"channel":"/meta/connect","successful":false,"error":"401::Unknown client",
                  "advice":{"reconnect":"handshake","interval":0,"timeout":45000.0}}"#;
    let msg: Message = serde_json::from_str(raw).unwrap();
    let advice = msg.advice.clone().unwrap();
    assert_eq!(advice.reconnect, Some(Reconnect::Handshake));
    assert_eq!(advice.interval(), Some(std::time::Duration::ZERO));
    assert_eq!(advice.timeout(), Some(std::time::Duration::from_secs(45)));
    assert_eq!(msg.protocol_error().code, Some(401));
    assert_eq!(Advice::default().reconnect, None);
}

#[test]
fn test_unrecognised_reconnect_keeps_the_batch() {
    let raw = r#"[{"channel":"/meta/connect","successful":true,"advice":{"reconnect":"later"}},
                  {"channel":"/chat","successful":true,"id":"2"}]"#;
    let messages = decode_messages(raw).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(
        messages[0].advice.as_ref().and_then(|a| a.reconnect),
        Some(Reconnect::Unknown)
    );
    assert_eq!(messages[1].channel, "/chat");
}
