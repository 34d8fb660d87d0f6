//! Port discovery against the ports present on this machine.

use solid_serial::discovery::{DetectionMode, DeviceSelector, PortDetector};

#[test]
#[ignore] // Requires hardware
fn test_all_ports_includes_test_port() {
    let mut detector = PortDetector::new(DetectionMode::AllPorts);
    let ports = detector
        .detect_candidate_ports(&DeviceSelector::TI_CC2540)
        .expect("enumeration should work");

    println!("Found {} port(s): {:?}", ports.len(), ports);

    if let Ok(test_port) = std::env::var("TEST_PORT") {
        assert!(
            ports.contains(&test_port),
            "TEST_PORT {test_port} should be listed"
        );
    }
}

#[test]
#[ignore] // Requires a TI CC2540 dongle
fn test_cc2540_detection() {
    let mut detector = PortDetector::default();
    let ports = detector
        .detect_candidate_ports(&DeviceSelector::TI_CC2540)
        .unwrap();

    if ports.is_empty() {
        println!("⚠️  No CC2540 dongle found");
        return;
    }
    println!("✅ CC2540 candidates ({:?}): {:?}", detector.mode(), ports);
}
