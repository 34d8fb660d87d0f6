//! Repair and session tests against a real device named by `TEST_PORT`.

use crate::common::TestPortConfig;
use solid_serial::fixer::{self, FixerError, NativeOp};
use solid_serial::port::{SerialPortConfig, SerialSession};
use std::time::Duration;

fn test_port() -> Option<TestPortConfig> {
    let config = TestPortConfig::from_env();
    if config.is_none() {
        println!("⚠️  TEST_PORT not set - skipping test");
    }
    config
}

#[test]
#[ignore] // Requires hardware
fn test_repair_real_port() {
    let Some(port) = test_port() else { return };

    let report = fixer::repair(&port.port_name).expect("repair should succeed");
    println!(
        "✅ Repaired {} (abort-on-error was set: {})",
        report.port_name, report.abort_on_error_was_set
    );

    // The flag is persistent, so a second pass finds it clear.
    let again = fixer::repair(&port.port_name).unwrap();
    assert!(!again.abort_on_error_was_set);
}

#[test]
#[ignore] // Requires hardware
fn test_open_and_close_session() {
    let Some(port) = test_port() else { return };

    let config = SerialPortConfig::with_defaults(&port.port_name, port.baud_rate)
        .unwrap()
        .with_timeouts(Duration::from_millis(500), Duration::from_millis(500));
    let mut session = SerialSession::open(config).expect("session should open");
    assert!(session.is_open());

    let report = session.close();
    println!("Teardown: {report:?}");
    assert!(!session.is_open());
    assert!(report.stream_closed);

    // The port is free again.
    let reopened = SerialSession::open(
        SerialPortConfig::with_defaults(&port.port_name, port.baud_rate).unwrap(),
    );
    assert!(reopened.is_ok());
}

#[test]
#[ignore] // Requires hardware
fn test_unplug_during_session() {
    let Some(port) = test_port() else { return };
    if std::env::var("TEST_UNPLUG").ok().as_deref() != Some("1") {
        println!("⚠️  TEST_UNPLUG=1 not set - skipping manual unplug test");
        return;
    }

    let config = SerialPortConfig::with_defaults(&port.port_name, port.baud_rate).unwrap();
    let mut session = SerialSession::open(config).unwrap();

    println!("Unplug the adapter within 10 seconds...");
    std::thread::sleep(Duration::from_secs(10));

    let report = session.close();
    println!("Teardown after unplug: {report:?}");
    assert!(!session.is_open());
}

#[test]
fn test_nonexistent_port() {
    let name = if cfg!(windows) {
        "COM_NONEXISTENT_9999"
    } else {
        "/dev/ttyNONEXISTENT9999"
    };

    let err = fixer::repair(name).unwrap_err();

    assert!(matches!(
        err,
        FixerError::OsHandle {
            operation: NativeOp::CreateFile,
            ..
        }
    ));
}
