//! Controller construction.
//!
//! The supervisor never builds controllers itself; it asks a
//! [`ControllerFactory`]. Tests substitute their own factory to inject
//! failing or instrumented hardware.

use std::sync::Arc;
use tracing::{debug, warn};
use wtp_common::config::WtpConfig;
use wtp_common::controller::{ControllerError, MotionController};
use wtp_common::device::DetectionResult;
use wtp_common::safety::{SafetyInterlock, SafetySwitch};

use crate::discovery::PortProvider;
use crate::drivers::fieldbus::{FieldbusRegistry, HardwareController, PendantIndicator};
use crate::drivers::simulation::SimulatedController;

/// Builds disconnected controllers.
pub trait ControllerFactory: Send + Sync {
    /// A simulated controller.
    fn create_simulated(&self) -> Arc<dyn MotionController>;

    /// A hardware-backed controller for the detected devices.
    ///
    /// # Errors
    /// Fails if no fieldbus backend can be created.
    fn create_hardware(
        &self,
        detection: &DetectionResult,
    ) -> Result<Arc<dyn MotionController>, ControllerError>;
}

/// Factory driven by configuration.
///
/// Fixed endpoints from `[pendant]` and `[fieldbus]` take precedence over the
/// discovered devices.
pub struct DefaultControllerFactory {
    config: WtpConfig,
    provider: Arc<dyn PortProvider>,
    registry: FieldbusRegistry,
    interlock: Arc<dyn SafetyInterlock>,
}

impl DefaultControllerFactory {
    /// Factory with the built-in fieldbus backends and a permissive interlock.
    pub fn new(config: WtpConfig, provider: Arc<dyn PortProvider>) -> Self {
        Self {
            config,
            provider,
            registry: FieldbusRegistry::with_builtin(),
            interlock: Arc::new(SafetySwitch::default()),
        }
    }

    /// Use a custom backend registry.
    pub fn with_registry(mut self, registry: FieldbusRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Use an external safety verdict.
    pub fn with_interlock(mut self, interlock: Arc<dyn SafetyInterlock>) -> Self {
        self.interlock = interlock;
        self
    }
}

impl ControllerFactory for DefaultControllerFactory {
    fn create_simulated(&self) -> Arc<dyn MotionController> {
        Arc::new(SimulatedController::new(&self.config).with_interlock(Arc::clone(&self.interlock)))
    }

    fn create_hardware(
        &self,
        detection: &DetectionResult,
    ) -> Result<Arc<dyn MotionController>, ControllerError> {
        let backend = self.config.fieldbus.backend.as_str();
        let bus = self.registry.create(backend).inspect_err(|e| {
            warn!(backend, available = ?self.registry.backends(), "{e}");
        })?;

        let pendant = self
            .config
            .pendant
            .endpoint
            .clone()
            .or_else(|| detection.pendant.as_ref().map(|d| d.endpoint.clone()));
        let fieldbus = self
            .config
            .fieldbus
            .endpoint
            .clone()
            .or_else(|| detection.motion_controller.as_ref().map(|d| d.endpoint.clone()));
        debug!(
            backend = bus.name(),
            ?pendant,
            ?fieldbus,
            "Building hardware controller"
        );

        let indicator = PendantIndicator::new(
            Arc::clone(&self.provider),
            pendant,
            self.config.pendant.serial(),
        );
        Ok(Arc::new(HardwareController::new(
            &self.config,
            bus,
            fieldbus,
            indicator,
            Arc::clone(&self.interlock),
        )))
    }
}
