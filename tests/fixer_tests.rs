//! Repair routine tests against the scripted mock backend.
//!
//! Covers:
//! - Flag clearing and preservation of every other control-block field
//! - The bounded clear-then-retry policy for reads and writes
//! - Handle release on every exit path
//! - Name validation (including property tests)

mod common;

use common::abort_flagged_device;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use solid_serial::fixer::{
    DeviceType, FixerError, InvalidPortReason, MockBlock, MockCall, MockCommApi, NativeError,
    NativeOp, PortFixer, PortNaming, COMM_STATE_RETRIES,
};

// ============================================================================
// Successful repair
// ============================================================================

#[test]
fn test_repair_clears_flag_and_keeps_other_fields() {
    // Arrange
    let original = MockBlock {
        baud_rate: 115200,
        flags: MockBlock::ABORT_ON_ERROR | 0x0001 | 0x0010,
        byte_size: 7,
        parity: 2,
        stop_bits: 2,
        xon_char: 0x21,
        ..MockBlock::default()
    };
    let api = MockCommApi::new().with_block(original.clone());

    // Act
    let report = PortFixer::new(api.clone()).repair("COM3").unwrap();

    // Assert
    let expected = MockBlock {
        flags: 0x0001 | 0x0010,
        ..original
    };
    assert_eq!(api.current_block(), expected);
    assert!(report.abort_on_error_was_set);
    assert_eq!(report.device_path, r"\\.\COM3");
    assert_eq!((report.read_attempts, report.write_attempts), (1, 1));
}

#[test]
fn test_repair_is_idempotent() {
    let api = abort_flagged_device();
    let fixer = PortFixer::new(api.clone());

    let first = fixer.repair("COM3").unwrap();
    let block_after_first = api.current_block();
    let second = fixer.repair("COM3").unwrap();

    assert!(first.abort_on_error_was_set);
    assert!(!second.abort_on_error_was_set);
    assert_eq!(api.current_block(), block_after_first);
}

#[test]
fn test_call_order() {
    let api = MockCommApi::new();
    PortFixer::new(api.clone()).repair("com7").unwrap();

    assert_eq!(
        api.calls(),
        vec![
            MockCall::Open(r"\\.\com7".to_string()),
            MockCall::DeviceType,
            MockCall::ClearCommError,
            MockCall::GetCommState,
            MockCall::ClearCommError,
            MockCall::SetCommState,
            MockCall::Close,
        ]
    );
}

#[test]
fn test_port_can_be_reopened_after_repair() {
    let api = abort_flagged_device();
    let fixer = PortFixer::new(api.clone());

    fixer.repair("COM3").unwrap();

    assert_eq!(api.open_handles(), 0, "repair must release the device");
    assert!(fixer.repair("COM3").is_ok(), "exclusive reopen must succeed");
}

#[test]
fn test_posix_naming() {
    let api = MockCommApi::new().with_naming(PortNaming::Posix);
    let report = PortFixer::new(api).repair("/dev/ttyUSB0").unwrap();
    assert_eq!(report.device_path, "/dev/ttyUSB0");
}

// ============================================================================
// Retry policy
// ============================================================================

#[test]
fn test_transient_read_failures_are_retried() {
    let api = abort_flagged_device().with_get_failures(3);

    let report = PortFixer::new(api.clone()).repair("COM3").unwrap();

    assert_eq!(report.read_attempts, 4);
    assert_eq!(api.count(MockCall::GetCommState), 4);
    // Every get attempt is preceded by a clear, plus one before the set.
    assert_eq!(api.count(MockCall::ClearCommError), 5);
    assert!(!api.current_block().abort_on_error_set());
}

#[test]
fn test_read_gives_up_after_retry_budget() {
    let api = abort_flagged_device().with_get_failures(COMM_STATE_RETRIES);

    let err = PortFixer::new(api.clone()).repair("COM3").unwrap_err();

    assert!(matches!(
        err,
        FixerError::OsHandle {
            operation: NativeOp::GetCommState,
            ..
        }
    ));
    assert_eq!(err.os_code(), Some(31));
    assert_eq!(
        api.count(MockCall::GetCommState),
        COMM_STATE_RETRIES as usize
    );
    assert_eq!(api.count(MockCall::SetCommState), 0);
    assert_eq!(api.open_handles(), 0);
    assert!(api.current_block().abort_on_error_set());
}

#[test]
fn test_write_succeeds_on_last_attempt() {
    let api = abort_flagged_device().with_set_failures(COMM_STATE_RETRIES - 1);

    let report = PortFixer::new(api.clone()).repair("COM3").unwrap();

    assert_eq!(report.write_attempts, COMM_STATE_RETRIES);
    assert!(!api.current_block().abort_on_error_set());
}

#[test]
fn test_write_gives_up_after_retry_budget() {
    let api = abort_flagged_device().with_set_failures(COMM_STATE_RETRIES);

    let err = PortFixer::new(api.clone()).repair("COM3").unwrap_err();

    assert!(matches!(
        err,
        FixerError::OsHandle {
            operation: NativeOp::SetCommState,
            ..
        }
    ));
    assert_eq!(
        api.count(MockCall::SetCommState),
        COMM_STATE_RETRIES as usize
    );
    assert_eq!(api.open_handles(), 0);
}

#[test]
fn test_clear_failure_aborts_without_retry() {
    // The second clear precedes the first write attempt.
    let api = abort_flagged_device().with_clear_failure_at(2);

    let err = PortFixer::new(api.clone()).repair("COM3").unwrap_err();

    assert!(matches!(
        err,
        FixerError::OsHandle {
            operation: NativeOp::ClearCommError,
            ..
        }
    ));
    assert_eq!(api.count(MockCall::ClearCommError), 2);
    assert_eq!(api.count(MockCall::SetCommState), 0);
    assert_eq!(api.open_handles(), 0);
}

#[test]
fn test_pending_line_errors_do_not_fail_repair() {
    let api = abort_flagged_device().with_pending_errors(0x0002);
    assert!(PortFixer::new(api).repair("COM3").is_ok());
}

// ============================================================================
// Failure paths
// ============================================================================

#[test]
fn test_missing_device() {
    let api = MockCommApi::new().with_open_error(NativeError::new(
        2,
        "The system cannot find the file specified.",
    ));

    let err = PortFixer::new(api.clone())
        .repair("COM_NONEXISTENT_9999")
        .unwrap_err();

    assert!(matches!(
        err,
        FixerError::OsHandle {
            operation: NativeOp::CreateFile,
            ..
        }
    ));
    assert_eq!(err.os_code(), Some(2));
    assert_eq!(api.open_handles(), 0);
}

#[test]
fn test_device_already_open_elsewhere() {
    let api = MockCommApi::new();
    let fixer = PortFixer::new(api.clone());
    let _held = {
        use solid_serial::fixer::CommApi;
        api.open(r"\\.\COM3").unwrap()
    };

    let err = fixer.repair("COM3").unwrap_err();
    assert_eq!(err.os_code(), Some(5));
}

#[test]
fn test_non_serial_device_is_rejected_and_closed() {
    let api = MockCommApi::new().with_device_type(DeviceType::Disk);

    let err = PortFixer::new(api.clone()).repair("COM3").unwrap_err();

    assert!(matches!(
        err,
        FixerError::InvalidPort {
            reason: InvalidPortReason::NotSerialDevice(DeviceType::Disk),
            ..
        }
    ));
    assert_eq!(api.count(MockCall::Close), 1);
    assert_eq!(api.count(MockCall::GetCommState), 0);
    assert_eq!(api.open_handles(), 0);
}

#[test]
fn test_unknown_device_type_is_accepted() {
    let api = MockCommApi::new().with_device_type(DeviceType::Unknown);
    assert!(PortFixer::new(api).repair("COM3").is_ok());
}

#[test]
fn test_empty_name_rejected_without_calls() {
    let api = MockCommApi::new();

    for name in ["", "   "] {
        let err = PortFixer::new(api.clone()).repair(name).unwrap_err();
        assert!(matches!(
            err,
            FixerError::InvalidPort {
                reason: InvalidPortReason::Empty,
                ..
            }
        ));
    }
    assert!(api.calls().is_empty());
}

// ============================================================================
// Property tests
// ============================================================================

proptest! {
    #[test]
    fn prop_names_without_com_prefix_make_no_calls(name in "[A-Za-z0-9_/]{1,12}") {
        prop_assume!(!name.to_ascii_uppercase().starts_with("COM"));
        let api = MockCommApi::new();

        let err = PortFixer::new(api.clone()).repair(&name).unwrap_err();

        prop_assert!(err.is_invalid_port());
        prop_assert!(api.calls().is_empty());
    }

    #[test]
    fn prop_com_names_map_to_device_namespace(suffix in "[0-9]{1,3}") {
        let name = format!("COM{suffix}");
        let report = PortFixer::new(MockCommApi::new()).repair(&name).unwrap();
        prop_assert_eq!(report.device_path, format!(r"\\.\{name}"));
    }

    #[test]
    fn prop_only_abort_bit_changes(flags in any::<u32>()) {
        let api = MockCommApi::new().with_flags(flags);

        PortFixer::new(api.clone()).repair("COM1").unwrap();

        prop_assert_eq!(api.current_block().flags, flags & !MockBlock::ABORT_ON_ERROR);
    }
}
