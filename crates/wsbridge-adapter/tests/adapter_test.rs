//! Adapter behaviour against an in-memory host

use futures::future::LocalBoxFuture;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::LocalSet;
use wsbridge_adapter::{
    connect, connect_url, target_url, AdapterError, AdapterResult, CancellationToken, ClosePayload,
    ErrorPayload, EventSender, Host, HostSocket, TransportAdapter, TransportEvent,
};

#[derive(Default)]
struct Recorder {
    sent: RefCell<Vec<Vec<u8>>>,
    closes: Cell<usize>,
    fail_sends: Cell<bool>,
}

struct FakeSocket {
    recorder: Rc<Recorder>,
}

impl HostSocket for FakeSocket {
    fn send(&self, data: &[u8]) -> AdapterResult<()> {
        if self.recorder.fail_sends.get() {
            return Err(AdapterError::SendFailed("buffer full".to_string()));
        }
        self.recorder.sent.borrow_mut().push(data.to_vec());
        Ok(())
    }

    fn close(&self) {
        self.recorder.closes.set(self.recorder.closes.get() + 1);
    }
}

/// Replays a scripted list of events as soon as the socket is opened, then
/// lets the test inject more.
struct FakeHost {
    script: RefCell<Vec<TransportEvent>>,
    sender: RefCell<Option<EventSender>>,
    opened: RefCell<Option<String>>,
    recorder: Rc<Recorder>,
}

impl FakeHost {
    fn new(script: Vec<TransportEvent>) -> Self {
        Self {
            script: RefCell::new(script),
            sender: RefCell::new(None),
            opened: RefCell::new(None),
            recorder: Rc::new(Recorder::default()),
        }
    }

    fn push(&self, event: TransportEvent) -> bool {
        match self.sender.borrow().as_ref() {
            Some(sender) => sender.push(event),
            None => false,
        }
    }

    fn closes(&self) -> usize {
        self.recorder.closes.get()
    }

    fn sent(&self) -> Vec<Vec<u8>> {
        self.recorder.sent.borrow().clone()
    }
}

impl Host for FakeHost {
    type Socket = FakeSocket;

    fn open(&self, url: &str, events: EventSender) -> AdapterResult<FakeSocket> {
        *self.opened.borrow_mut() = Some(url.to_string());
        for event in self.script.borrow_mut().drain(..) {
            events.push(event);
        }
        *self.sender.borrow_mut() = Some(events);
        Ok(FakeSocket {
            recorder: self.recorder.clone(),
        })
    }

    fn spawn_local(&self, task: LocalBoxFuture<'static, ()>) {
        tokio::task::spawn_local(task);
    }
}

const URL: &str = "ws://relay.test/ws/ssh.example.com/22";

fn data(bytes: &[u8]) -> TransportEvent {
    TransportEvent::Data(bytes.to_vec())
}

fn closed(code: u16) -> TransportEvent {
    TransportEvent::Closed(ClosePayload {
        code,
        reason: String::new(),
    })
}

async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

async fn open(host: &FakeHost) -> TransportAdapter<FakeSocket> {
    init_tracing();
    connect_url(host, URL).await.expect("connect")
}

async fn read_until_error(adapter: &TransportAdapter<FakeSocket>) -> (Vec<u8>, AdapterError) {
    let mut collected = Vec::new();
    let mut buf = [0u8; 4];
    loop {
        match adapter.read(&mut buf).await {
            Ok(0) => panic!("unexpected end of stream"),
            Ok(n) => collected.extend_from_slice(&buf[..n]),
            Err(err) => return (collected, err),
        }
    }
}

#[tokio::test]
async fn test_buffered_data_is_read_before_close_error() {
    LocalSet::new()
        .run_until(async {
            let host = FakeHost::new(vec![
                TransportEvent::Opened,
                data(b"hello "),
                data(b"world"),
                closed(1000),
            ]);
            let adapter = open(&host).await;

            let (bytes, err) = read_until_error(&adapter).await;
            assert_eq!(bytes, b"hello world");
            assert_eq!(err, AdapterError::ConnectionClosed);
            assert_eq!(host.closes(), 1);
        })
        .await;
}

#[tokio::test]
async fn test_buffered_data_is_read_before_transport_error() {
    LocalSet::new()
        .run_until(async {
            let host = FakeHost::new(vec![
                TransportEvent::Opened,
                data(b"partial"),
                TransportEvent::Error(ErrorPayload::new("reset by peer")),
            ]);
            let adapter = open(&host).await;

            let (bytes, err) = read_until_error(&adapter).await;
            assert_eq!(bytes, b"partial");
            assert_eq!(err, AdapterError::Transport("reset by peer".to_string()));
        })
        .await;
}

#[tokio::test]
async fn test_connect_error_with_message() {
    LocalSet::new()
        .run_until(async {
            let host = FakeHost::new(vec![TransportEvent::Error(ErrorPayload::new(
                "connection refused",
            ))]);

            let err = connect_url(&host, URL).await.unwrap_err();
            assert_eq!(err, AdapterError::ConnectFailed("connection refused".to_string()));
            assert_eq!(err.to_string(), "ws.dial: connection refused");
            assert_eq!(host.closes(), 1);
        })
        .await;
}

#[tokio::test]
async fn test_connect_error_then_close_reports_code() {
    LocalSet::new()
        .run_until(async {
            let host = FakeHost::new(vec![
                TransportEvent::Error(ErrorPayload::default()),
                closed(1006),
            ]);

            let err = connect_url(&host, URL).await.unwrap_err();
            assert_eq!(err, AdapterError::ClosedBeforeOpen { code: 1006 });
            assert_eq!(err.to_string(), "connection closed with code 1006");
        })
        .await;
}

#[tokio::test]
async fn test_connect_error_without_detail() {
    LocalSet::new()
        .run_until(async {
            let host = FakeHost::new(vec![
                TransportEvent::Error(ErrorPayload::default()),
                data(b"?"),
            ]);

            let err = connect_url(&host, URL).await.unwrap_err();
            assert_eq!(err, AdapterError::ConnectFailedSeeConsole);
            assert_eq!(host.closes(), 1);
        })
        .await;
}

#[tokio::test]
async fn test_close_before_open() {
    LocalSet::new()
        .run_until(async {
            let host = FakeHost::new(vec![closed(1008)]);

            let err = connect_url(&host, URL).await.unwrap_err();
            assert_eq!(err, AdapterError::ClosedBeforeOpen { code: 1008 });
            assert_eq!(host.closes(), 1);
        })
        .await;
}

#[tokio::test]
async fn test_connect_cancelled_discards_late_open() {
    LocalSet::new()
        .run_until(async {
            let host = FakeHost::new(Vec::new());
            let cancel = CancellationToken::new();

            let trigger = cancel.clone();
            tokio::task::spawn_local(async move {
                tokio::task::yield_now().await;
                trigger.cancel();
            });

            let err = connect(&host, URL, &cancel).await.unwrap_err();
            assert_eq!(err, AdapterError::Cancelled);
            assert_eq!(host.closes(), 1);
            assert!(!host.push(TransportEvent::Opened));
        })
        .await;
}

#[tokio::test]
async fn test_close_is_idempotent_across_clones() {
    LocalSet::new()
        .run_until(async {
            let host = FakeHost::new(vec![TransportEvent::Opened]);
            let adapter = open(&host).await;
            let other = adapter.clone();

            assert_eq!(adapter.close().await, Ok(()));
            assert_eq!(other.close().await, Ok(()));
            assert_eq!(adapter.close().await, Ok(()));

            settle().await;
            assert_eq!(host.closes(), 1);
            assert!(other.is_closed());
        })
        .await;
}

#[tokio::test]
async fn test_close_after_remote_close_repeats_error() {
    LocalSet::new()
        .run_until(async {
            let host = FakeHost::new(vec![TransportEvent::Opened, closed(1000)]);
            let adapter = open(&host).await;
            settle().await;

            assert_eq!(adapter.close().await, Err(AdapterError::ConnectionClosed));
            assert_eq!(adapter.close().await, Err(AdapterError::ConnectionClosed));
            assert_eq!(host.closes(), 1);
        })
        .await;
}

#[tokio::test]
async fn test_write_forwards_whole_payload() {
    LocalSet::new()
        .run_until(async {
            let host = FakeHost::new(vec![TransportEvent::Opened]);
            let adapter = open(&host).await;

            let payload = b"SSH-2.0-wsbridge\r\n";
            assert_eq!(adapter.write(payload).await, Ok(payload.len()));
            assert_eq!(host.sent(), vec![payload.to_vec()]);
        })
        .await;
}

#[tokio::test]
async fn test_write_after_error_fails_without_send() {
    LocalSet::new()
        .run_until(async {
            let host = FakeHost::new(vec![
                TransportEvent::Opened,
                TransportEvent::Error(ErrorPayload::new("reset")),
            ]);
            let adapter = open(&host).await;
            settle().await;

            let err = adapter.write(b"late").await.unwrap_err();
            assert_eq!(err, AdapterError::Transport("reset".to_string()));
            assert!(host.sent().is_empty());
        })
        .await;
}

#[tokio::test]
async fn test_write_and_read_after_local_close() {
    LocalSet::new()
        .run_until(async {
            let host = FakeHost::new(vec![TransportEvent::Opened]);
            let adapter = open(&host).await;
            adapter.close().await.unwrap();

            assert_eq!(adapter.write(b"x").await, Err(AdapterError::ConnectionClosed));
            let mut buf = [0u8; 8];
            assert_eq!(adapter.read(&mut buf).await, Ok(0));
            assert!(!host.push(data(b"dropped")));
        })
        .await;
}

#[tokio::test]
async fn test_send_failure_is_surfaced() {
    LocalSet::new()
        .run_until(async {
            let host = FakeHost::new(vec![TransportEvent::Opened]);
            let adapter = open(&host).await;
            host.recorder.fail_sends.set(true);

            let err = adapter.write(b"x").await.unwrap_err();
            assert!(matches!(err, AdapterError::SendFailed(_)));
        })
        .await;
}

#[tokio::test]
async fn test_blocked_reader_is_woken_by_data() {
    LocalSet::new()
        .run_until(async {
            let host = FakeHost::new(vec![TransportEvent::Opened]);
            let adapter = open(&host).await;

            let reader = adapter.clone();
            let pending = tokio::task::spawn_local(async move {
                let mut buf = [0u8; 16];
                let n = reader.read(&mut buf).await.unwrap();
                buf[..n].to_vec()
            });

            settle().await;
            assert!(!pending.is_finished());
            assert!(host.push(data(b"late")));

            assert_eq!(pending.await.unwrap(), b"late");
        })
        .await;
}

#[tokio::test]
async fn test_blocked_reader_is_woken_by_close() {
    LocalSet::new()
        .run_until(async {
            let host = FakeHost::new(vec![TransportEvent::Opened]);
            let adapter = open(&host).await;

            let reader = adapter.clone();
            let pending = tokio::task::spawn_local(async move {
                let mut buf = [0u8; 16];
                reader.read(&mut buf).await
            });

            settle().await;
            adapter.close().await.unwrap();
            assert_eq!(pending.await.unwrap(), Ok(0));
        })
        .await;
}

#[tokio::test]
async fn test_async_io_traits() {
    LocalSet::new()
        .run_until(async {
            let host = FakeHost::new(vec![TransportEvent::Opened, data(b"pong")]);
            let mut stream = open(&host).await;

            stream.write_all(b"ping").await.unwrap();
            stream.flush().await.unwrap();
            assert_eq!(host.sent(), vec![b"ping".to_vec()]);

            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"pong");

            stream.shutdown().await.unwrap();
            let mut rest = Vec::new();
            assert_eq!(stream.read_to_end(&mut rest).await.unwrap(), 0);
            assert_eq!(host.closes(), 1);
        })
        .await;
}

#[tokio::test]
async fn test_async_read_maps_close_to_io_error() {
    LocalSet::new()
        .run_until(async {
            let host = FakeHost::new(vec![TransportEvent::Opened, data(b"ab"), closed(1000)]);
            let mut stream = open(&host).await;

            let mut rest = Vec::new();
            let err = stream.read_to_end(&mut rest).await.unwrap_err();
            assert_eq!(err.kind(), std::io::ErrorKind::ConnectionAborted);
            assert_eq!(rest, b"ab");
        })
        .await;
}

#[tokio::test]
async fn test_deadline_setters_are_accepted() {
    LocalSet::new()
        .run_until(async {
            let host = FakeHost::new(vec![TransportEvent::Opened]);
            let adapter = open(&host).await;

            adapter.set_deadline(None);
            adapter.set_read_deadline(Some(std::time::Instant::now()));
            adapter.set_write_deadline(None);

            assert_eq!(adapter.write(b"still open").await, Ok(10));
        })
        .await;
}

#[tokio::test]
async fn test_connect_opens_target_url() {
    LocalSet::new()
        .run_until(async {
            let host = FakeHost::new(vec![TransportEvent::Opened]);
            let url = target_url("wss://relay.test/ws/", "ssh.example.com", 22);
            let adapter = connect_url(&host, &url).await.expect("connect");

            assert_eq!(adapter.url(), "wss://relay.test/ws/ssh.example.com/22");
            assert_eq!(host.opened.borrow().as_deref(), Some(adapter.url()));
        })
        .await;
}
