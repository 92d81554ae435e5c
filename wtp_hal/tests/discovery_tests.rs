//! Discovery integration tests.
//!
//! Classification of endpoints on mixed benches: responsive devices are
//! registered under their role, endpoints that answered something else are
//! `Generic` and the rest stay `Unknown`.

use std::sync::Arc;
use wtp_common::config::{DiscoverySettings, SerialSettings};
use wtp_common::device::DeviceType;
use wtp_hal::discovery::{DeviceDiscovery, PortInfo, VirtualDevice, VirtualPortProvider};

fn discovery(provider: &VirtualPortProvider) -> DeviceDiscovery {
    DeviceDiscovery::new(
        Arc::new(provider.clone()),
        DiscoverySettings::default(),
        SerialSettings::eight_n_one(9600, 500),
    )
}

#[tokio::test(start_paused = true)]
async fn silent_endpoint_stays_unknown() {
    let provider = VirtualPortProvider::new();
    provider.attach(PortInfo::new("/dev/ttyS2", "16550A"), VirtualDevice::Silent);

    let result = discovery(&provider).detect_all().await;
    assert!(!result.has_hardware());
    assert!(result.pendant.is_none());
    assert!(result.motion_controller.is_none());
    assert_eq!(result.endpoints.len(), 1);
    assert_eq!(result.endpoints[0].device_type, DeviceType::Unknown);
    assert_eq!(provider.open_handles("/dev/ttyS2"), 0);
}

#[tokio::test(start_paused = true)]
async fn mixed_bench_classification() {
    let provider = VirtualPortProvider::new();
    provider.attach(
        PortInfo::usb("/dev/ttyUSB3", "USB Serial", 0x067B, 0x2303),
        VirtualDevice::Silent,
    );
    provider.attach(PortInfo::new("/dev/ttyS0", ""), VirtualDevice::Unavailable);
    provider.attach(
        PortInfo::usb("/dev/ttyUSB0", "Teach Pendant", 0x0403, 0x6001),
        VirtualDevice::Pendant,
    );
    provider.attach(
        PortInfo::new("/dev/ttyS1", "Motion Controller"),
        VirtualDevice::MotionController { baud_rate: 38_400 },
    );

    let result = discovery(&provider).detect_all().await;
    let pendant = result.pendant.as_ref().expect("pendant");
    let motion = result.motion_controller.as_ref().expect("motion controller");
    assert_eq!(pendant.endpoint, "/dev/ttyUSB0");
    assert_eq!(motion.endpoint, "/dev/ttyS1");
    assert_eq!(motion.baud_rate, Some(38_400));

    let type_of = |name: &str| {
        result
            .endpoints
            .iter()
            .find(|d| d.endpoint == name)
            .map(|d| d.device_type)
    };
    assert_eq!(type_of("/dev/ttyUSB3"), Some(DeviceType::Unknown));
    assert_eq!(type_of("/dev/ttyS0"), Some(DeviceType::Unknown));
    assert_eq!(type_of("/dev/ttyUSB0"), Some(DeviceType::Pendant));
    assert_eq!(type_of("/dev/ttyS1"), Some(DeviceType::MotionController));

    for name in ["/dev/ttyUSB3", "/dev/ttyS0", "/dev/ttyUSB0", "/dev/ttyS1"] {
        assert_eq!(provider.open_handles(name), 0, "{name} left open");
    }
}

#[tokio::test(start_paused = true)]
async fn list_endpoints_reports_usb_ids() {
    let provider = VirtualPortProvider::demo_bench();
    let endpoints = discovery(&provider)
        .list_endpoints()
        .await
        .expect("list endpoints");

    assert_eq!(endpoints.len(), 2);
    let pendant = &endpoints[0];
    assert_eq!(pendant.vendor_id, Some(0x0403));
    assert_eq!(pendant.product_id, Some(0x6001));
    assert_eq!(pendant.device_type, DeviceType::Unknown);
    assert_eq!(endpoints[1].device_type, DeviceType::Unknown);
}

#[tokio::test(start_paused = true)]
async fn answering_endpoint_becomes_generic() {
    let provider = VirtualPortProvider::new();
    provider.attach(
        PortInfo::usb("/dev/ttyUSB1", "USB Modem", 0x1A86, 0x7523),
        VirtualDevice::Chatty,
    );
    provider.attach(
        PortInfo::usb("/dev/ttyUSB2", "USB Serial", 0x067B, 0x2303),
        VirtualDevice::Silent,
    );
    provider.attach(PortInfo::new("/dev/ttyS0", ""), VirtualDevice::Unavailable);

    let result = discovery(&provider).detect_all().await;
    assert!(!result.has_hardware());

    let find = |name: &str| {
        result
            .endpoints
            .iter()
            .find(|d| d.endpoint == name)
            .cloned()
            .expect("endpoint listed")
    };
    let chatty = find("/dev/ttyUSB1");
    assert_eq!(chatty.device_type, DeviceType::Generic);
    assert_eq!(chatty.vendor_id, Some(0x1A86));
    assert!(chatty.available);
    assert_eq!(find("/dev/ttyUSB2").device_type, DeviceType::Unknown);

    let busy = find("/dev/ttyS0");
    assert_eq!(busy.device_type, DeviceType::Unknown);
    assert!(!busy.available);
}

#[tokio::test(start_paused = true)]
async fn failing_endpoint_is_released_and_skipped() {
    let provider = VirtualPortProvider::new();
    provider.attach(PortInfo::new("/dev/ttyS4", "Teach Pendant"), VirtualDevice::Pendant);
    provider.set_failing("/dev/ttyS4", true);

    let d = discovery(&provider);
    assert!(d.detect_pendant().await.is_none());
    assert_eq!(provider.open_handles("/dev/ttyS4"), 0);
    assert!(provider.written("/dev/ttyS4").is_empty());

    provider.set_failing("/dev/ttyS4", false);
    let pendant = d.detect_pendant().await.expect("pendant after recovery");
    assert_eq!(pendant.endpoint, "/dev/ttyS4");
}
