//! Supervisor integration tests.
//!
//! Exercise initial mode selection, fallback, hot-plug swaps and event relay
//! against the virtual device bench. All tests run on a paused clock, so the
//! 5 s discovery poll interval costs nothing.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use wtp_common::config::WtpConfig;
use wtp_common::controller::ControllerKind;
use wtp_common::events::ControllerEvent;
use wtp_hal::discovery::{
    DeviceDiscovery, PortInfo, PortProvider, VirtualDevice, VirtualPortProvider,
};
use wtp_hal::{ControllerSupervisor, DefaultControllerFactory, SupervisorEvent};

fn supervisor(provider: &VirtualPortProvider, config: WtpConfig) -> ControllerSupervisor {
    let provider: Arc<dyn PortProvider> = Arc::new(provider.clone());
    let discovery = DeviceDiscovery::new(
        Arc::clone(&provider),
        config.discovery.clone(),
        config.pendant.serial(),
    );
    let factory = Arc::new(DefaultControllerFactory::new(config.clone(), provider));
    ControllerSupervisor::new(config, discovery, factory)
}

fn attach_demo_devices(provider: &VirtualPortProvider) {
    provider.attach(
        PortInfo::usb("/dev/ttyVP0", "Teach Pendant", 0x0403, 0x6001),
        VirtualDevice::Pendant,
    );
    provider.attach(
        PortInfo::new("/dev/ttyVP1", "Motion Controller"),
        VirtualDevice::MotionController { baud_rate: 115_200 },
    );
}

async fn saw_speed(rx: &mut broadcast::Receiver<ControllerEvent>, percent: u32) -> bool {
    tokio::time::sleep(Duration::from_millis(10)).await;
    let mut seen = false;
    while let Ok(event) = rx.try_recv() {
        if let ControllerEvent::StatusChanged { new, .. } = event {
            seen |= new.speed_percent == percent;
        }
    }
    seen
}

fn swaps(rx: &mut broadcast::Receiver<SupervisorEvent>) -> Vec<(ControllerKind, ControllerKind)> {
    let mut out = Vec::new();
    while let Ok(SupervisorEvent::ControllerChanged { previous, current }) = rx.try_recv() {
        out.push((previous, current));
    }
    out
}

#[tokio::test(start_paused = true)]
async fn unresponsive_pendant_falls_back_to_simulation() {
    let provider = VirtualPortProvider::demo_bench();
    provider.attach(PortInfo::new("/dev/ttyS9", "Onboard UART"), VirtualDevice::Silent);
    let mut config = WtpConfig::default();
    config.pendant.endpoint = Some("/dev/ttyS9".to_string());
    config.discovery.monitor = false;

    let s = supervisor(&provider, config);
    let mut rx = s.subscribe();
    let kind = s.initialize().await.expect("join").expect("initialize");

    assert_eq!(kind, ControllerKind::Simulated);
    assert!(!s.is_hardware_mode());
    assert!(s.current_controller().status().connected);
    assert!(swaps(&mut rx).is_empty());
    // The failed hardware attempt released the endpoint.
    assert_eq!(provider.open_handles("/dev/ttyS9"), 0);
    s.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn hot_plug_attach_and_detach() {
    let provider = VirtualPortProvider::new();
    let s = supervisor(&provider, WtpConfig::default());
    let mut rx = s.subscribe();

    assert_eq!(
        s.initialize_async().await.expect("initialize"),
        ControllerKind::Simulated
    );
    assert!(s.discovery().is_monitoring());

    attach_demo_devices(&provider);
    // One poll interval plus the debounce and probe time.
    tokio::time::sleep(Duration::from_secs(8)).await;

    assert!(s.is_hardware_mode());
    let active = s.active();
    assert_eq!(active.kind, ControllerKind::HardwareBacked);
    assert!(active.controller.status().connected);
    assert_eq!(
        swaps(&mut rx),
        vec![(ControllerKind::Simulated, ControllerKind::HardwareBacked)]
    );
    assert_eq!(provider.open_handles("/dev/ttyVP0"), 1);

    provider.detach("/dev/ttyVP1");
    tokio::time::sleep(Duration::from_secs(6)).await;

    assert!(!s.is_hardware_mode());
    assert!(s.current_controller().status().connected);
    assert!(!active.controller.status().connected);
    assert_eq!(
        swaps(&mut rx),
        vec![(ControllerKind::HardwareBacked, ControllerKind::Simulated)]
    );
    assert_eq!(provider.open_handles("/dev/ttyVP0"), 0);

    s.shutdown().await;
    assert!(!s.discovery().is_monitoring());
}

#[tokio::test(start_paused = true)]
async fn unrelated_detach_keeps_hardware() {
    let provider = VirtualPortProvider::demo_bench();
    provider.attach(PortInfo::new("/dev/ttyS0", ""), VirtualDevice::Silent);
    let s = supervisor(&provider, WtpConfig::default());

    assert_eq!(
        s.initialize_async().await.expect("initialize"),
        ControllerKind::HardwareBacked
    );
    let mut rx = s.subscribe();

    provider.detach("/dev/ttyS0");
    tokio::time::sleep(Duration::from_secs(6)).await;

    assert!(s.is_hardware_mode());
    assert!(swaps(&mut rx).is_empty());
    s.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn refresh_switches_modes() {
    let provider = VirtualPortProvider::new();
    let mut config = WtpConfig::default();
    config.discovery.monitor = false;
    let s = supervisor(&provider, config);
    s.initialize_async().await.expect("initialize");

    assert_eq!(
        s.refresh_hardware().await.expect("refresh"),
        ControllerKind::Simulated
    );

    attach_demo_devices(&provider);
    assert_eq!(
        s.refresh_hardware().await.expect("refresh"),
        ControllerKind::HardwareBacked
    );

    provider.detach("/dev/ttyVP0");
    provider.detach("/dev/ttyVP1");
    assert_eq!(
        s.refresh_hardware().await.expect("refresh"),
        ControllerKind::Simulated
    );
    s.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn controller_events_follow_the_active_controller() {
    let provider = VirtualPortProvider::new();
    let mut config = WtpConfig::default();
    config.discovery.monitor = false;
    let s = supervisor(&provider, config);
    s.initialize_async().await.expect("initialize");
    let mut events = s.subscribe_controller_events();

    assert!(s.current_controller().set_speed(80).await);
    assert!(saw_speed(&mut events, 80).await);

    provider.attach(
        PortInfo::usb("/dev/ttyVP0", "Teach Pendant", 0x0403, 0x6001),
        VirtualDevice::Pendant,
    );
    assert_eq!(
        s.refresh_hardware().await.expect("refresh"),
        ControllerKind::HardwareBacked
    );
    assert!(!saw_speed(&mut events, 30).await);

    assert!(s.current_controller().set_speed(30).await);
    assert!(saw_speed(&mut events, 30).await, "hardware controller events were not relayed");
    s.shutdown().await;
}
