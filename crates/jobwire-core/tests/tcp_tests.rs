//! End-to-end tests against a minimal job server over TCP.

use std::net::SocketAddr;
use std::time::Duration;

use jobwire::connection::tcp::{read_frame, write_frame};
use jobwire::{CallOptions, Dispatcher, JobStatus, ProtocolConfig, TcpChannel};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const MAX_FRAME: usize = ProtocolConfig::MAX_FRAME_SIZE;

async fn read_request(stream: &mut TcpStream) -> Option<Value> {
    let bytes = read_frame(stream, MAX_FRAME).await.unwrap()?;
    Some(serde_json::from_slice(&bytes).unwrap())
}

async fn write_raw(stream: &mut TcpStream, frame: &str) {
    write_frame(stream, frame.as_bytes()).await.unwrap();
}

async fn write_json(stream: &mut TcpStream, value: Value) {
    write_raw(stream, &value.to_string()).await;
}

/// Serves `add`, `longTask` and `__cancel__` until the client disconnects.
async fn serve(listener: TcpListener) {
    let (mut stream, _) = listener.accept().await.unwrap();
    let mut long_task = None;

    while let Some(request) = read_request(&mut stream).await {
        let id = request["id"].as_u64().unwrap();
        match request["method"].as_str().unwrap() {
            "add" => {
                let sum: i64 = request["params"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .filter_map(Value::as_i64)
                    .sum();
                write_json(&mut stream, json!({"jsonrpc": "2.0", "id": id, "response": sum}))
                    .await;
            }
            "longTask" => {
                for worked in [1, 10] {
                    write_json(
                        &mut stream,
                        json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "progress": {"worked": worked, "total": 10}
                        }),
                    )
                    .await;
                }
                long_task = Some(id);
            }
            "ratio" => {
                write_raw(
                    &mut stream,
                    &format!(
                        r#"{{"jsonrpc":"2.0","id":{},"response":[NaN,Infinity,-Infinity]}}"#,
                        id
                    ),
                )
                .await;
            }
            "__cancel__" => {
                let target = request["params"]["id"].as_u64().unwrap();
                if long_task == Some(target) {
                    write_json(
                        &mut stream,
                        json!({
                            "jsonrpc": "2.0",
                            "id": target,
                            "error": {"code": 999, "message": "cancelled"}
                        }),
                    )
                    .await;
                    long_task = None;
                }
                write_json(&mut stream, json!({"jsonrpc": "2.0", "id": id, "response": null}))
                    .await;
            }
            other => {
                write_json(
                    &mut stream,
                    json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32601, "message": format!("Method not found: {}", other)}
                    }),
                )
                .await;
            }
        }
    }
}

async fn start_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener));
    addr
}

#[tokio::test]
async fn test_add_over_tcp() {
    let addr = start_server().await;
    let (channel, events) = TcpChannel::connect(addr).await.unwrap();
    let dispatcher = Dispatcher::spawn(channel, events);

    let sum = dispatcher.call("add", json!([2, 3])).unwrap().await.unwrap();
    assert_eq!(sum, json!(5));
}

#[tokio::test]
async fn test_progress_and_cancel_over_tcp() {
    let addr = start_server().await;
    let (channel, events) = TcpChannel::connect(addr).await.unwrap();
    let dispatcher = Dispatcher::spawn(channel, events);
    let (worked_tx, mut worked_rx) = mpsc::unbounded_channel();

    let handle = dispatcher
        .call_with(
            "longTask",
            json!({}),
            CallOptions::new().on_progress(move |p| {
                let _ = worked_tx.send(p.worked);
            }),
        )
        .unwrap();

    assert_eq!(worked_rx.recv().await, Some(Some(1.0)));
    assert_eq!(worked_rx.recv().await, Some(Some(10.0)));

    handle.cancel();

    let status = handle.status_watch();
    assert!(handle.await.unwrap_err().is_cancelled());
    assert_eq!(*status.borrow(), JobStatus::Cancelled);
}

#[tokio::test]
async fn test_non_finite_numbers_become_null() {
    let addr = start_server().await;
    let (channel, events) = TcpChannel::connect(addr).await.unwrap();
    let dispatcher = Dispatcher::spawn(channel, events);

    let value = dispatcher.call("ratio", json!([0, 0])).unwrap().await.unwrap();
    assert_eq!(value, json!([null, null, null]));
}

#[tokio::test]
async fn test_unknown_method_is_developer_error() {
    let addr = start_server().await;
    let (channel, events) = TcpChannel::connect(addr).await.unwrap();
    let dispatcher = Dispatcher::spawn(channel, events);

    let error = dispatcher
        .call("missing", Value::Null)
        .unwrap()
        .await
        .unwrap_err();
    let failure = error.failure().unwrap();
    assert_eq!(failure.code, -32601);
    assert!(jobwire::is_developer_error(failure.code));
}

#[tokio::test]
async fn test_server_disconnect_closes_dispatcher() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);
    });

    let (channel, events) = TcpChannel::connect(addr).await.unwrap();
    let dispatcher = Dispatcher::builder()
        .fail_outstanding_on_close(true)
        .spawn(channel, events);

    tokio::time::timeout(Duration::from_secs(2), async {
        while dispatcher.is_open() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Connection never reported closed");
    assert!(!dispatcher.is_open());
    assert!(matches!(
        dispatcher.call("add", json!([1, 2])),
        Err(jobwire::JobwireError::NotConnected)
    ));
}
