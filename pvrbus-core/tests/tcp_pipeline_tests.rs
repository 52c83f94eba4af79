//! Daemons talking through the TCP proxy

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use pvrbus_core::daemon::loggerd;
use pvrbus_core::log::list_sessions;
use pvrbus_core::messages;
use pvrbus_core::prelude::*;
use pvrbus_core::topics;

async fn start_proxy(shutdown: &CancellationToken) -> BusConfig {
    let proxy = BusProxy::bind("127.0.0.1:0", "127.0.0.1:0", 1000)
        .await
        .expect("bind proxy");
    let config = BusConfig {
        host: "127.0.0.1".to_string(),
        pub_port: proxy.pub_addr().unwrap().port(),
        sub_port: proxy.sub_addr().unwrap().port(),
        ..Default::default()
    };
    tokio::spawn(proxy.run(shutdown.clone()));
    config
}

#[tokio::test]
async fn test_logger_records_through_proxy() {
    let root = TempDir::new().expect("Failed to create temp dir");
    let shutdown = CancellationToken::new();
    let bus: Arc<dyn Bus> = Arc::new(TcpBus::new(start_proxy(&shutdown).await));

    let logger_config = LoggerConfig {
        log_root: root.path().to_path_buf(),
        status_interval: Duration::from_millis(20),
        ..Default::default()
    };
    let logger = tokio::spawn(loggerd::run(bus.clone(), logger_config, shutdown.child_token()));

    let mut status = bus.subscriber_for(&[topics::LOGGERD_STATUS]).await.unwrap();
    let publisher = bus.publisher().await.unwrap();

    // Subscriptions travel asynchronously; repeat the trigger until it lands.
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            publisher
                .send(BusMessage::trigger(topics::LOGGERD_START))
                .await
                .unwrap();
            if let Ok(Some(latest)) =
                drain_latest_timeout(status.as_mut(), 100, Duration::from_millis(100)).await
            {
                let current: LoggerStatus =
                    messages::decode(topics::LOGGERD_STATUS, latest.get(topics::LOGGERD_STATUS).unwrap())
                        .unwrap();
                if current.recording {
                    break;
                }
            }
        }
    })
    .await
    .expect("logger never started recording");

    for i in 0..5u8 {
        publisher
            .send(BusMessage::new(&b"/pose/"[..], vec![i]))
            .await
            .unwrap();
    }
    publisher
        .send(BusMessage::trigger(topics::LOGGERD_STOP))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let message = status.recv().await.unwrap();
            let current: LoggerStatus = messages::decode(&message.topic, &message.payload).unwrap();
            if !current.recording {
                break;
            }
        }
    })
    .await
    .expect("logger never stopped recording");

    shutdown.cancel();
    logger.await.unwrap().unwrap();

    let mut poses = Vec::new();
    for session in list_sessions(root.path()).unwrap().logs {
        let Ok(reader) = LogReader::open(root.path().join(&session.id), "pvrlog") else {
            continue;
        };
        for entry in reader {
            let entry = entry.unwrap();
            if entry.topic.as_ref() == b"/pose/" {
                poses.push(entry.payload);
            }
        }
    }
    let expected: Vec<Bytes> = (0..5u8).map(|i| Bytes::from(vec![i])).collect();
    assert_eq!(poses, expected);
}
