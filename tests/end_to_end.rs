//! End-to-end tests: a client and a server endpoint over an in-memory duplex.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use procwire_rpc::handler::{Operations, Service};
use procwire_rpc::protocol::Parameter;
use procwire_rpc::{CallDispatcher, ConnectionState, Endpoint, FrameEvent, Observer, ProcwireError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::duplex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
enum Color {
    Red,
    Green,
    Blue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Item {
    name: String,
    qty: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Order {
    id: Uuid,
    color: Color,
    items: Vec<Item>,
    note: Option<String>,
}

#[derive(Default)]
struct Shop {
    echoed: Arc<Mutex<Vec<usize>>>,
}

impl Service for Shop {
    fn operations(ops: &mut Operations<Self>) {
        ops.register_sync("Echo", |shop: &Shop, (text,): (String,)| {
            shop.echoed.lock().push(text.len());
            Ok::<_, String>(text)
        })
        .register_sync("Describe", |_s: &Shop, (color, id): (Color, Uuid)| {
            Ok::<_, String>(format!("{color:?}:{id}"))
        })
        .register_sync("Repeat", |_s: &Shop, (order,): (Order,)| Ok::<_, String>(order))
        .register("Divide", |_s: Arc<Shop>, (a, b): (i64, i64)| async move {
            if b == 0 {
                return Err("division by zero".to_string());
            }
            Ok(a / b)
        })
        .register_sync("Explode", |_s: &Shop, (): ()| -> Result<(), String> {
            panic!("the shop is on fire")
        });
    }
}

async fn pair_with(
    chunk: usize,
    observer: Arc<dyn Observer>,
) -> (Endpoint, Endpoint, Arc<Mutex<Vec<usize>>>) {
    let echoed = Arc::new(Mutex::new(Vec::new()));
    let (a, b) = duplex(256 * 1024);

    let log = echoed.clone();
    let server = Endpoint::server(move || Shop { echoed: log.clone() })
        .chunk_size(chunk)
        .observer(observer.clone())
        .attach(a)
        .await
        .unwrap();
    let client = Endpoint::client()
        .chunk_size(chunk)
        .observer(observer)
        .attach(b)
        .await
        .unwrap();
    (client, server, echoed)
}

async fn pair() -> (Endpoint, Endpoint) {
    let (client, server, _) = pair_with(2048, Arc::new(procwire_rpc::TracingObserver)).await;
    (client, server)
}

#[derive(Default)]
struct PaddingCounter {
    sent: AtomicUsize,
    received: AtomicUsize,
}

impl Observer for PaddingCounter {
    fn frame_sent(&self, event: &FrameEvent) {
        if event.padded {
            self.sent.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn frame_received(&self, event: &FrameEvent) {
        if event.padded {
            self.received.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[tokio::test]
async fn test_thousand_growing_messages_arrive_in_order() {
    let padding = Arc::new(PaddingCounter::default());
    let (client, _server, echoed) = pair_with(64, padding.clone()).await;

    for len in 0..1000 {
        let text = "a".repeat(len);
        let back: String = client.invoke("Echo", (text.as_str(),)).await.unwrap();
        assert_eq!(back.len(), len);
    }

    assert_eq!(*echoed.lock(), (0..1000).collect::<Vec<_>>());
    assert!(padding.sent.load(Ordering::SeqCst) > 0, "padding branch never hit");
    assert!(padding.received.load(Ordering::SeqCst) > 0);
}

#[tokio::test]
async fn test_enum_uuid_and_nested_struct_round_trip() {
    let (client, _server) = pair().await;
    let id = Uuid::new_v4();

    let described: String = client
        .invoke("Describe", (Color::Green, id))
        .await
        .unwrap();
    assert_eq!(described, format!("Green:{id}"));

    // Ordinal for the enum, braced form for the identifier.
    let described: String = client
        .invoke_with(
            "Describe",
            vec![
                Parameter::typed("Color", json!(2)),
                Parameter::typed("Guid", json!(format!("{{{id}}}"))),
            ],
        )
        .await
        .unwrap();
    assert_eq!(described, format!("Blue:{id}"));

    let order = Order {
        id,
        color: Color::Red,
        items: vec![
            Item {
                name: "bolt".into(),
                qty: 12,
            },
            Item {
                name: "nut".into(),
                qty: 0,
            },
        ],
        note: None,
    };
    let back: Order = client.invoke("Repeat", (order.clone(),)).await.unwrap();
    assert_eq!(back, order);
}

#[tokio::test]
async fn test_failures_keep_the_connection_working() {
    let (client, _server) = pair().await;

    let err = client.invoke::<i64, _>("Divide", (1, 0)).await.unwrap_err();
    assert!(matches!(err, ProcwireError::RemoteInvocation(ref m) if m == "division by zero"));

    let err = client.invoke::<(), _>("Explode", ()).await.unwrap_err();
    match err {
        ProcwireError::RemoteInvocation(m) => {
            assert_eq!(m, "operation 'Explode' panicked: the shop is on fire")
        }
        other => panic!("unexpected error: {other}"),
    }

    let err = client.invoke::<(), _>("Missing", ()).await.unwrap_err();
    assert!(matches!(
        err,
        ProcwireError::RemoteInvocation(ref m) if m == "Unknown operation 'Missing'"
    ));

    let err = client.invoke::<i64, _>("Divide", ("ten", 2)).await.unwrap_err();
    assert!(matches!(
        err,
        ProcwireError::RemoteInvocation(ref m) if m.starts_with("invalid arguments")
    ));

    let err = client.invoke::<Vec<u8>, _>("Divide", (10, 2)).await.unwrap_err();
    assert!(matches!(err, ProcwireError::Decode(_)));

    assert_eq!(client.invoke::<i64, _>("Divide", (10, 2)).await.unwrap(), 5);
    assert_eq!(client.state(), ConnectionState::Connected);
}

struct Relay {
    peer: Arc<CallDispatcher>,
}

impl Service for Relay {
    fn operations(ops: &mut Operations<Self>) {
        ops.register("Process", |relay: Arc<Relay>, (n,): (i64,)| async move {
            let doubled: i64 = relay
                .peer
                .invoke("Double", (n,))
                .await
                .map_err(|e| e.to_string())?;
            Ok::<_, String>(doubled + 1)
        });
    }
}

#[derive(Default)]
struct Doubler;

impl Service for Doubler {
    fn operations(ops: &mut Operations<Self>) {
        ops.register_sync("Double", |_d: &Doubler, (n,): (i64,)| Ok::<_, String>(n * 2));
    }
}

#[tokio::test]
async fn test_callback_during_request_does_not_deadlock() {
    let (a, b) = duplex(64 * 1024);
    let _server = Endpoint::server_with_callback(|peer| Relay { peer })
        .attach(a)
        .await
        .unwrap();
    let client = Endpoint::client_with_callback(Doubler::default)
        .attach(b)
        .await
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), async {
        let mut out = Vec::new();
        for n in [1i64, 20, 300] {
            out.push(client.invoke::<i64, _>("Process", (n,)).await.unwrap());
        }
        out
    })
    .await
    .expect("callback deadlocked");

    assert_eq!(result, vec![3, 41, 601]);
}
