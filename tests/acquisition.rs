use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWriteExt, DuplexStream, ReadBuf, duplex};
use tokio::time::{self, Duration, Instant};

use serial_trend::channel::ChannelStore;
use serial_trend::error::AcquisitionError;
use serial_trend::serial::{Acquisition, ConnStatus, PortSettings, ReadStats};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fast_settings() -> PortSettings {
    PortSettings::new("loopback")
        .with_timeout(Duration::from_millis(20))
        .with_idle_backoff(Duration::from_millis(10))
        .with_shutdown_timeout(Duration::from_secs(1))
}

fn temp_hum_store() -> ChannelStore {
    ChannelStore::new(["TEMP", "HUM"], 4, 64).unwrap()
}

async fn wait_for<F: FnMut() -> bool>(mut condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

async fn connected(store: &ChannelStore) -> (Acquisition, DuplexStream) {
    let (device, host) = duplex(1024);
    let mut acquisition = Acquisition::new(store.sink());
    acquisition.open_stream(fast_settings(), host).await.unwrap();
    assert_eq!(acquisition.status(), ConnStatus::Connected);
    (acquisition, device)
}

/// Reader whose poll blocks the worker thread, so the read timeout never fires
/// in time.
struct HungReader;

impl AsyncRead for HungReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        std::thread::sleep(std::time::Duration::from_millis(400));
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Reader that fails every poll, like an unplugged adapter.
struct FailingReader;

impl AsyncRead for FailingReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::other("device unplugged")))
    }
}

#[tokio::test]
async fn test_lines_reach_rolling_windows() {
    init_logger();
    let mut store = temp_hum_store();
    let (mut acquisition, mut device) = connected(&store).await;

    device.write_all(b"$TEMP:10\r\n$TEMP:11\r\n").await.unwrap();
    assert!(wait_for(|| store.pending("TEMP") == Some(2)).await);

    store.advance();
    assert_eq!(store.snapshot("TEMP").unwrap(), &[10.0, 10.0, 10.0, 10.0]);
    store.advance();
    assert_eq!(store.snapshot("TEMP").unwrap(), &[10.0, 10.0, 10.0, 11.0]);
    assert_eq!(store.snapshot("HUM").unwrap(), &[0.0, 0.0, 0.0, 0.0]);

    acquisition.close().await.unwrap();
    assert_eq!(acquisition.status(), ConnStatus::Closed);
}

#[tokio::test]
async fn test_bad_records_are_counted_and_skipped() {
    init_logger();
    let store = temp_hum_store();
    let (mut acquisition, mut device) = connected(&store).await;

    device.write_all(b"$TEMP:1\r\n").await.unwrap();
    device.write_all(b"TEMP:2\r\n").await.unwrap();
    device.write_all(b"$TEMP:abc\r\n").await.unwrap();
    device.write_all(b"$A:B:C\r\n").await.unwrap();
    device.write_all(&[b'$', 0xFF, b'\r', b'\n']).await.unwrap();
    device.write_all(b"$PRESSURE:3\r\n").await.unwrap();
    device.write_all(b"\r\n").await.unwrap();
    device.write_all(b"$HUM:5\r\n").await.unwrap();

    assert!(wait_for(|| acquisition.stats().samples == 2).await);
    assert_eq!(
        acquisition.stats(),
        ReadStats {
            records: 6,
            samples: 2,
            unknown_flags: 1,
            decode_errors: 1,
            parse_errors: 3,
            io_errors: 0,
            oversized: 0,
        }
    );
    assert_eq!(store.pending("TEMP"), Some(1));
    assert_eq!(store.pending("HUM"), Some(1));
    assert_eq!(acquisition.status(), ConnStatus::Connected);

    acquisition.close().await.unwrap();
}

#[tokio::test]
async fn test_fragmented_writes_are_reassembled() {
    init_logger();
    let mut store = temp_hum_store();
    let (mut acquisition, mut device) = connected(&store).await;

    for fragment in [&b"$TE"[..], b"MP:2", b"3.5\r", b"\n"] {
        device.write_all(fragment).await.unwrap();
        time::sleep(Duration::from_millis(30)).await;
    }
    assert!(wait_for(|| acquisition.stats().samples == 1).await);

    store.advance();
    assert_eq!(store.latest("TEMP"), Some(23.5));
    acquisition.close().await.unwrap();
}

#[tokio::test]
async fn test_oversized_records_are_dropped() {
    init_logger();
    let store = temp_hum_store();
    let (mut device, host) = duplex(1024);
    let mut acquisition = Acquisition::new(store.sink());
    acquisition
        .open_stream(fast_settings().with_max_record_len(16), host)
        .await
        .unwrap();

    device
        .write_all(b"$TEMP:1111111111111111111111111\r\n$HUM:2\r\n")
        .await
        .unwrap();
    assert!(wait_for(|| acquisition.stats().samples == 1).await);
    assert_eq!(acquisition.stats().oversized, 1);
    assert_eq!(store.pending("TEMP"), Some(0));

    acquisition.close().await.unwrap();
}

#[tokio::test]
async fn test_end_of_stream_marks_connection_lost() {
    init_logger();
    let mut store = temp_hum_store();
    let (mut acquisition, mut device) = connected(&store).await;
    let mut status = acquisition.subscribe_status();

    device.write_all(b"$TEMP:1\r\n").await.unwrap();
    assert!(wait_for(|| acquisition.stats().samples == 1).await);
    drop(device);

    time::timeout(Duration::from_secs(2), status.wait_for(|s| s.is_lost()))
        .await
        .expect("status never reached Lost")
        .unwrap();
    assert_eq!(acquisition.status(), ConnStatus::Lost);

    // a fresh open reaps the dead worker and starts over
    let (mut device, host) = duplex(1024);
    acquisition.open_stream(fast_settings(), host).await.unwrap();
    assert_eq!(acquisition.status(), ConnStatus::Connected);
    assert_eq!(acquisition.stats(), ReadStats::default());

    device.write_all(b"$HUM:7\r\n").await.unwrap();
    assert!(wait_for(|| store.pending("HUM") == Some(1)).await);
    store.advance();
    assert_eq!(store.latest("TEMP"), Some(1.0));
    assert_eq!(store.latest("HUM"), Some(7.0));

    acquisition.close().await.unwrap();
}

#[tokio::test]
async fn test_open_while_running_is_ignored() {
    init_logger();
    let store = temp_hum_store();
    let (mut acquisition, mut device) = connected(&store).await;

    let (_other_device, other_host) = duplex(64);
    acquisition
        .open_stream(fast_settings(), other_host)
        .await
        .unwrap();
    assert_eq!(acquisition.status(), ConnStatus::Connected);

    device.write_all(b"$TEMP:4\r\n").await.unwrap();
    assert!(wait_for(|| store.pending("TEMP") == Some(1)).await);

    acquisition.close().await.unwrap();
}

#[tokio::test]
async fn test_close_without_connection() {
    let store = temp_hum_store();
    let mut acquisition = Acquisition::new(store.sink());
    assert!(acquisition.close().await.is_ok());
    assert_eq!(acquisition.status(), ConnStatus::Closed);
}

#[tokio::test]
async fn test_idle_loop_closes_within_shutdown_bound() {
    init_logger();
    let store = temp_hum_store();
    let (_device, host) = duplex(64);
    let mut acquisition = Acquisition::new(store.sink());
    let settings = PortSettings::new("loopback")
        .with_timeout(Duration::from_millis(300))
        .with_idle_backoff(Duration::from_millis(300))
        .with_shutdown_timeout(Duration::from_millis(700));
    acquisition.open_stream(settings, host).await.unwrap();

    // let the loop reach the read-then-back-off cycle
    time::sleep(Duration::from_millis(50)).await;
    acquisition.close().await.unwrap();
    assert_eq!(acquisition.status(), ConnStatus::Closed);
}

#[tokio::test]
async fn test_shutdown_bound_below_poll_bound_is_rejected() {
    let store = temp_hum_store();
    let mut acquisition = Acquisition::new(store.sink());
    let (_device, host) = duplex(64);
    let settings = PortSettings::new("loopback")
        .with_timeout(Duration::from_millis(300))
        .with_idle_backoff(Duration::from_millis(300))
        .with_shutdown_timeout(Duration::from_millis(500));
    let result = acquisition.open_stream(settings, host).await;

    assert!(matches!(result, Err(AcquisitionError::InvalidConfig(_))));
    assert_eq!(acquisition.status(), ConnStatus::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_times_out_on_hung_read() {
    init_logger();
    let store = temp_hum_store();
    let mut acquisition = Acquisition::new(store.sink());
    let settings = fast_settings().with_shutdown_timeout(Duration::from_millis(100));
    acquisition.open_stream(settings, HungReader).await.unwrap();
    time::sleep(Duration::from_millis(10)).await;

    match acquisition.close().await {
        Err(AcquisitionError::ShutdownTimeout { waited }) => {
            assert_eq!(waited, Duration::from_millis(100))
        }
        other => panic!("unexpected close result: {other:?}"),
    }
    assert_eq!(acquisition.status(), ConnStatus::Closed);
}

#[tokio::test]
async fn test_subscriber_sees_loss_right_after_open() {
    init_logger();
    let store = temp_hum_store();
    let mut acquisition = Acquisition::new(store.sink());
    let mut status = acquisition.subscribe_status();

    let (device, host) = duplex(64);
    drop(device);
    acquisition.open_stream(fast_settings(), host).await.unwrap();

    let lost = time::timeout(Duration::from_secs(2), async {
        loop {
            if status.borrow_and_update().is_lost() {
                return;
            }
            status.changed().await.unwrap();
        }
    })
    .await;
    assert!(lost.is_ok(), "loss after open was never observed");
    acquisition.close().await.unwrap();
}

#[tokio::test]
async fn test_repeated_io_errors_mark_connection_lost() {
    init_logger();
    let store = temp_hum_store();
    let mut acquisition = Acquisition::new(store.sink());
    acquisition
        .open_stream(fast_settings().with_max_io_errors(3), FailingReader)
        .await
        .unwrap();

    assert!(wait_for(|| acquisition.status().is_lost()).await);
    assert_eq!(acquisition.stats().io_errors, 3);
    acquisition.close().await.unwrap();
    assert_eq!(acquisition.status(), ConnStatus::Closed);
}

#[tokio::test]
async fn test_open_missing_port_returns_to_closed() {
    init_logger();
    let store = temp_hum_store();
    let mut acquisition = Acquisition::new(store.sink());
    let result = acquisition
        .open(PortSettings::new("/dev/serial-trend-missing"))
        .await;

    assert!(matches!(result, Err(AcquisitionError::PortOpen { .. })));
    assert_eq!(acquisition.status(), ConnStatus::Closed);
}

#[tokio::test]
async fn test_invalid_settings_are_rejected() {
    let store = temp_hum_store();
    let mut acquisition = Acquisition::new(store.sink());
    let (_device, host) = duplex(64);
    let result = acquisition.open_stream(PortSettings::default(), host).await;

    assert!(matches!(result, Err(AcquisitionError::InvalidConfig(_))));
    assert_eq!(acquisition.status(), ConnStatus::Closed);
}
