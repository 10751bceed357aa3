//! ---
//! bmq_section: "02-host-bridge-core"
//! bmq_subsection: "tests"
//! bmq_type: "source"
//! bmq_scope: "test"
//! bmq_description: "Configuration files flowing into native session creation."
//! bmq_version: "v0.0.0-prealpha"
//! bmq_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use bmq_bridge::client::{BrokerConnector, BrokerSession, SessionEventHandler};
use bmq_bridge::{HostCallbacks, HostRuntime, Session, SessionError, SessionOptions};
use bmq_bridge_common::{CompressionAlgorithm, SessionConfig};
use parking_lot::Mutex;
use tempfile::tempdir;

/// Records the options it is asked to connect with, then refuses.
#[derive(Default)]
struct Unreachable {
    seen: Mutex<Vec<SessionOptions>>,
}

impl BrokerConnector for Unreachable {
    fn connect(
        &self,
        _handler: Arc<dyn SessionEventHandler>,
        options: &SessionOptions,
        runtime: Arc<HostRuntime>,
    ) -> anyhow::Result<Box<dyn BrokerSession>> {
        assert!(!runtime.is_held_by_current_thread());
        self.seen.lock().push(options.clone());
        anyhow::bail!("broker unreachable")
    }
}

fn callbacks() -> HostCallbacks {
    HostCallbacks::new(|_| Ok(()), |_| Ok(()), |_| Ok(()))
}

#[test]
fn config_file_reaches_the_connector() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("session.toml");
    std::fs::write(
        &path,
        r#"
broker_uri = "tcp://broker.internal:30114"
process_name_override = "pricing-feed"
message_compression = "zlib"
blob_buffer_size = 8192
event_queue_watermarks = [10, 400]

[timeouts]
open_queue = 12.5
close_queue = 4.0
"#,
    )
    .expect("write config");

    let config = SessionConfig::load(&[&path]).expect("load");
    assert_eq!(config.message_compression, CompressionAlgorithm::Zlib);

    let connector = Unreachable::default();
    let runtime = HostRuntime::new();
    let host = runtime.acquire();
    let err = Session::builder(config)
        .runtime(Arc::clone(&runtime))
        .connect(&connector, callbacks())
        .expect_err("unreachable");
    drop(host);

    match &err {
        SessionError::GenericFailure { message, code } => {
            assert_eq!(message, "Failed to create session: broker unreachable");
            assert_eq!(*code, -1);
        }
        other => panic!("unexpected error {other:?}"),
    }

    let seen = connector.seen.lock();
    let options = &seen[0];
    assert_eq!(options.broker_uri, "tcp://broker.internal:30114");
    assert_eq!(options.process_name, "pricing-feed");
    assert_eq!(options.blob_buffer_size, 8192);
    assert_eq!(
        (options.event_queue_low_watermark, options.event_queue_high_watermark),
        (10, 400)
    );
    assert_eq!(options.timeouts.open_queue, Duration::from_millis(12_500));
    assert_eq!(options.timeouts.close_queue, Duration::from_secs(4));
    assert_eq!(options.timeouts.connect, Duration::from_secs(60));
    assert_eq!(
        options.num_processing_threads,
        SessionOptions::DEFAULT_NUM_PROCESSING_THREADS
    );
}

#[test]
fn invalid_config_never_reaches_the_connector() {
    let connector = Unreachable::default();
    let config = SessionConfig {
        event_queue_watermarks: Some((50, 50)),
        ..SessionConfig::default()
    };
    let err = Session::builder(config)
        .connect(&connector, callbacks())
        .expect_err("invalid");
    assert!(matches!(err, SessionError::InvalidConfig(_)));
    assert!(err.to_string().contains("event_queue_watermarks"));
    assert!(connector.seen.lock().is_empty());
}

#[test]
fn logging_section_is_installed_before_connecting() {
    let dir = tempdir().expect("tempdir");
    let logs = dir.path().join("logs");
    let config: SessionConfig = format!(
        r#"
[logging]
directory = '{}'
format = "pretty"
file_output = true
"#,
        logs.display()
    )
    .parse()
    .expect("config");

    let connector = Unreachable::default();
    Session::builder(config.clone())
        .tracing("bmq-bridge-test")
        .connect(&connector, callbacks())
        .expect_err("unreachable");
    assert!(logs.is_dir());
    assert_eq!(connector.seen.lock().len(), 1);

    let blocked = dir.path().join("not-a-dir");
    std::fs::write(&blocked, b"").expect("write");
    let config = SessionConfig {
        logging: bmq_bridge_common::LoggingConfig {
            directory: blocked.join("logs"),
            ..config.logging
        },
        ..config
    };
    let err = Session::builder(config)
        .tracing("bmq-bridge-test")
        .connect(&connector, callbacks())
        .expect_err("log directory");
    assert!(matches!(err, SessionError::InvalidConfig(_)));
    assert_eq!(connector.seen.lock().len(), 1);
}
