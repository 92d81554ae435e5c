//! Device discovery result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a communication endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// Nothing known about the endpoint.
    #[default]
    Unknown,
    /// Teaching pendant indicator device (answered the pendant handshake).
    Pendant,
    /// Motion controller (answered the status query).
    MotionController,
    /// Answered a probe, but not with a known device signature.
    Generic,
}

/// A communication endpoint and what is known about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Endpoint identifier (port name, e.g. `/dev/ttyUSB0` or `COM3`)
    pub endpoint: String,
    /// Human readable description reported by the OS
    pub description: String,
    /// USB vendor id, if the endpoint is USB backed
    pub vendor_id: Option<u16>,
    /// USB product id, if the endpoint is USB backed
    pub product_id: Option<u16>,
    /// Endpoint could be opened during the last scan
    pub available: bool,
    /// Classified device type
    pub device_type: DeviceType,
    /// Baud rate the classifying probe succeeded with
    pub baud_rate: Option<u32>,
}

impl DeviceDescriptor {
    /// Create an unclassified descriptor.
    pub fn new(endpoint: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            description: description.into(),
            vendor_id: None,
            product_id: None,
            available: true,
            device_type: DeviceType::Unknown,
            baud_rate: None,
        }
    }

    /// Attach USB identifiers.
    pub fn with_usb_ids(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.vendor_id = Some(vendor_id);
        self.product_id = Some(product_id);
        self
    }

    /// Copy of this descriptor classified as `device_type`.
    pub fn classified(&self, device_type: DeviceType, baud_rate: u32) -> Self {
        Self {
            device_type,
            baud_rate: Some(baud_rate),
            available: true,
            ..self.clone()
        }
    }

    /// `vid:pid` formatted for logs, if both are known.
    pub fn usb_id(&self) -> Option<String> {
        match (self.vendor_id, self.product_id) {
            (Some(v), Some(p)) => Some(format!("{v:04X}:{p:04X}")),
            _ => None,
        }
    }
}

/// Outcome of a full discovery run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Every endpoint seen during the run
    pub endpoints: Vec<DeviceDescriptor>,
    /// The pendant, if one answered
    pub pendant: Option<DeviceDescriptor>,
    /// The motion controller, if one answered
    pub motion_controller: Option<DeviceDescriptor>,
    /// When the run finished
    pub detected_at: DateTime<Utc>,
}

impl DetectionResult {
    /// Result with no endpoints.
    pub fn empty() -> Self {
        Self {
            endpoints: Vec::new(),
            pendant: None,
            motion_controller: None,
            detected_at: Utc::now(),
        }
    }

    /// True if a pendant or a motion controller was found.
    pub fn has_hardware(&self) -> bool {
        self.pendant.is_some() || self.motion_controller.is_some()
    }

    /// Endpoints claimed by classified hardware.
    pub fn hardware_endpoints(&self) -> Vec<&str> {
        self.pendant
            .iter()
            .chain(self.motion_controller.iter())
            .map(|d| d.endpoint.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_defaults() {
        let d = DeviceDescriptor::new("/dev/ttyUSB0", "USB Serial");
        assert_eq!(d.device_type, DeviceType::Unknown);
        assert!(d.available);
        assert!(d.usb_id().is_none());

        let d = d.with_usb_ids(0x0403, 0x6001);
        assert_eq!(d.usb_id().as_deref(), Some("0403:6001"));
    }

    #[test]
    fn test_classified_keeps_identity() {
        let d = DeviceDescriptor::new("COM3", "Teach Pendant").with_usb_ids(0x10C4, 0xEA60);
        let p = d.classified(DeviceType::Pendant, 9600);
        assert_eq!(p.endpoint, "COM3");
        assert_eq!(p.vendor_id, Some(0x10C4));
        assert_eq!(p.device_type, DeviceType::Pendant);
        assert_eq!(p.baud_rate, Some(9600));
    }

    #[test]
    fn test_detection_result_hardware() {
        let mut result = DetectionResult::empty();
        assert!(!result.has_hardware());
        assert!(result.hardware_endpoints().is_empty());

        result.motion_controller = Some(
            DeviceDescriptor::new("/dev/ttyS1", "").classified(DeviceType::MotionController, 115_200),
        );
        assert!(result.has_hardware());
        assert_eq!(result.hardware_endpoints(), vec!["/dev/ttyS1"]);
    }
}
