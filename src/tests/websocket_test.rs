use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tungstenite::protocol::Message as WsMessage;

use crate::protocol::{Advice, Message, Reconnect, channel, decode_messages, encode_messages};
use crate::transport::mock::ack;
use crate::{Client, ClientOptions, Listener, State};

/// A single-node Bayeux responder speaking the websocket transport.
async fn serve(listener: TcpListener) {
    while let Ok((stream, _)) = listener.accept().await {
        tokio::spawn(session(stream));
    }
}

async fn session(stream: TcpStream) {
    let Ok(socket) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<Message>>();
    tokio::spawn(async move {
        while let Some(batch) = rx.recv().await {
            let text = encode_messages(&batch).unwrap();
            if write.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut subscriptions: Vec<String> = Vec::new();
    while let Some(Ok(frame)) = read.next().await {
        let WsMessage::Text(text) = frame else {
            continue;
        };
        for message in decode_messages(text.as_str()).unwrap() {
            match message.channel.as_str() {
                channel::HANDSHAKE => {
                    let mut reply = ack(&message);
                    reply.client_id = Some(uuid::Uuid::new_v4().to_string());
                    reply.version = Some("1.0".to_string());
                    reply.supported_connection_types = Some(vec!["websocket".to_string()]);
                    reply.advice = Some(Advice {
                        reconnect: Some(Reconnect::Retry),
                        interval: Some(0.0),
                        timeout: Some(1000.0),
                    });
                    let _ = tx.send(vec![reply]);
                }
                channel::CONNECT => {
                    let tx = tx.clone();
                    let reply = ack(&message);
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        let _ = tx.send(vec![reply]);
                    });
                }
                channel::SUBSCRIBE => {
                    subscriptions.extend(message.subscription.clone());
                    let _ = tx.send(vec![ack(&message)]);
                }
                name if channel::is_meta(name) => {
                    let _ = tx.send(vec![ack(&message)]);
                }
                name => {
                    let mut out = vec![ack(&message)];
                    if subscriptions.iter().any(|p| channel::matches(p, name)) {
                        out.push(Message {
                            data: message.data.clone(),
                            ..Message::new(name)
                        });
                    }
                    let _ = tx.send(out);
                }
            }
        }
    }
}

#[tokio::test]
async fn test_websocket_subscribe_publish_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(serve(listener));

    let client = Client::new(
        &format!("http://127.0.0.1:{port}/bayeux"),
        ClientOptions {
            connection_types: Some(vec!["websocket".to_string()]),
            timeout: 10.0,
            retry: 1.0,
            ..ClientOptions::default()
        },
    )
    .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener = Listener::new(move |m: &Message| {
        let _ = tx.send(m.clone());
    });
    timeout(Duration::from_secs(10), client.subscribe("/chat/*", listener))
        .await
        .expect("subscribe timed out")
        .unwrap();
    assert_eq!(client.connection_type().as_deref(), Some("websocket"));
    assert!(uuid::Uuid::parse_str(&client.client_id().unwrap()).is_ok());

    let reply = client
        .publish("/chat/room", json!({"text": "hello"}))
        .await
        .unwrap();
    assert!(reply.is_successful());

    let received = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no message delivered")
        .unwrap();
    assert_eq!(received.channel, "/chat/room");
    assert_eq!(received.data, Some(json!({"text": "hello"})));

    timeout(Duration::from_secs(5), client.disconnect())
        .await
        .expect("disconnect timed out")
        .unwrap();
    assert_eq!(client.state(), State::Unconnected);
}
