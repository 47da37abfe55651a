use std::future::Future;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::{WebSocketStream, accept_async};

use common::{Shutdown, ShutdownTrigger};
use pipeline::config::FeedConfig;
use pipeline::error::FeedError;
use pipeline::feed::{FeedConnector, FeedEvent, FeedSource};

const DEPTH: &str = r#"{"e":"depthUpdate","E":1,"s":"BTCUSDT","U":1,"u":2,"b":[["100.5","1"]],"a":[]}"#;

/// Serves one websocket connection on a local port, driven by `script`.
async fn serve<F, Fut>(script: F) -> String
where
    F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        script(ws).await;
    });

    format!("ws://{addr}")
}

async fn close_with(mut ws: WebSocketStream<TcpStream>, code: CloseCode) {
    let _ = ws
        .close(Some(CloseFrame {
            code,
            reason: Utf8Bytes::from_static("bye"),
        }))
        .await;
    while let Some(Ok(_)) = ws.next().await {}
}

fn connector(url: String, max_retries: u32) -> FeedConnector {
    FeedConnector::new(&FeedConfig {
        url,
        max_retries,
        retry_delay: Duration::from_millis(10),
    })
}

fn frame_text(ev: FeedEvent) -> String {
    match ev {
        FeedEvent::Frame(bytes) => String::from_utf8(bytes).unwrap(),
        other => panic!("expected frame, got {other:?}"),
    }
}

#[tokio::test]
async fn frames_arrive_in_order_then_going_away_closes_quietly() {
    let url = serve(|mut ws| async move {
        ws.send(Message::Text(DEPTH.into())).await.unwrap();
        ws.send(Message::Binary(b"second".to_vec().into())).await.unwrap();
        ws.send(Message::Text("third".into())).await.unwrap();
        close_with(ws, CloseCode::Away).await;
    })
    .await;

    let mut feed = connector(url, 1).open(Shutdown::never()).await.unwrap();

    assert_eq!(frame_text(feed.next().await), DEPTH);
    assert_eq!(frame_text(feed.next().await), "second");
    assert_eq!(frame_text(feed.next().await), "third");
    assert!(matches!(feed.next().await, FeedEvent::Closed));
    // Stays closed.
    assert!(matches!(feed.next().await, FeedEvent::Closed));
}

#[tokio::test]
async fn normal_close_is_surfaced_as_fault() {
    let url = serve(|ws| close_with(ws, CloseCode::Normal)).await;

    let mut feed = connector(url, 1).open(Shutdown::never()).await.unwrap();

    match feed.next().await {
        FeedEvent::Fault(FeedError::UnexpectedClose { code, .. }) => assert_eq!(code, Some(1000)),
        other => panic!("expected close fault, got {other:?}"),
    }
}

#[tokio::test]
async fn exhausted_retries_report_attempts() {
    // Grab a free port, then release it so nothing is listening.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = connector(format!("ws://{addr}"), 3).open(Shutdown::never()).await;

    let Err(err) = result else {
        panic!("connection to a closed port succeeded");
    };
    assert!(matches!(err, FeedError::Connection { attempts: 3, .. }));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn close_request_releases_the_connection() {
    let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();
    let url = serve(|mut ws| async move {
        let mut saw_close = false;
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                saw_close = true;
            }
        }
        let _ = seen_tx.send(saw_close);
    })
    .await;

    let mut feed = connector(url, 1).open(Shutdown::never()).await.unwrap();
    feed.close();

    assert!(matches!(feed.next().await, FeedEvent::Closed));
    let saw_close = tokio::time::timeout(Duration::from_secs(5), seen_rx)
        .await
        .unwrap()
        .unwrap();
    assert!(saw_close);
}

#[tokio::test]
async fn shutdown_stops_the_reader() {
    let url = serve(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} }).await;

    let trigger = ShutdownTrigger::new();
    let mut feed = connector(url, 1).open(trigger.subscribe()).await.unwrap();
    trigger.trigger();

    let ev = tokio::time::timeout(Duration::from_secs(5), feed.next())
        .await
        .unwrap();
    assert!(matches!(ev, FeedEvent::Closed));
}
