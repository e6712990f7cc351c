//! Driver binding: PCI identity matching, PCI attribute negotiation and the
//! lifecycle of bound controllers.

use bitflags::bitflags;

use crate::config::{MptScsiConfig, Stall, ThreadStall};
use crate::controller::MptScsiController;
use crate::dma::{DmaBuffer, DMA_REGION_LEN};
use crate::error::{MptError, Result, TransportError};
use crate::registry::{ControllerHandle, ControllerRegistry};
use crate::regs::RegisterWindow;

pub const LSI_LOGIC_PCI_VENDOR_ID: u16 = 0x1000;
pub const LSI_53C1030_PCI_DEVICE_ID: u16 = 0x0030;
pub const LSI_SAS1068_PCI_DEVICE_ID: u16 = 0x0054;
pub const LSI_SAS1068E_PCI_DEVICE_ID: u16 = 0x0058;

pub const DRIVER_NAME: &str = "LSI Fusion MPT SCSI Driver";

/// Looks up the driver name for an ISO 639-2 ("eng") or RFC 4646 ("en",
/// "en-US") language code.
pub fn driver_name(language: &str) -> Option<&'static str> {
    let primary = language.split('-').next().unwrap_or_default();
    if primary.eq_ignore_ascii_case("en") || primary.eq_ignore_ascii_case("eng") {
        Some(DRIVER_NAME)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciIdentity {
    pub vendor_id: u16,
    pub device_id: u16,
}

impl PciIdentity {
    pub fn is_supported(&self) -> bool {
        self.vendor_id == LSI_LOGIC_PCI_VENDOR_ID
            && matches!(
                self.device_id,
                LSI_53C1030_PCI_DEVICE_ID | LSI_SAS1068_PCI_DEVICE_ID | LSI_SAS1068E_PCI_DEVICE_ID
            )
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct PciAttributes: u64 {
        const IO = 0x0100;
        const MEMORY = 0x0200;
        const BUS_MASTER = 0x0400;
        /// The function may be handed 64-bit DMA addresses.
        const DUAL_ADDRESS_CYCLE = 0x8000;
    }
}

/// The platform's view of one PCI function.
pub trait PciFunction {
    type Registers: RegisterWindow;
    type Dma: DmaBuffer;

    fn identity(&mut self) -> std::result::Result<PciIdentity, TransportError>;
    fn attributes(&mut self) -> std::result::Result<PciAttributes, TransportError>;
    fn enable_attributes(&mut self, attributes: PciAttributes)
        -> std::result::Result<(), TransportError>;
    fn set_attributes(&mut self, attributes: PciAttributes)
        -> std::result::Result<(), TransportError>;
    fn map_bar0(&mut self) -> std::result::Result<Self::Registers, TransportError>;
    fn allocate_dma(&mut self, len: usize) -> std::result::Result<Self::Dma, TransportError>;
}

pub type BoundMptController<P> =
    MptScsiController<<P as PciFunction>::Registers, <P as PciFunction>::Dma>;

struct BoundController<P: PciFunction> {
    pci: P,
    original_attributes: PciAttributes,
    controller: BoundMptController<P>,
}

/// Binds supported PCI functions and owns the resulting controllers.
pub struct DriverBinding<P: PciFunction> {
    config: MptScsiConfig,
    new_stall: fn() -> Box<dyn Stall + Send>,
    controllers: ControllerRegistry<BoundController<P>>,
}

fn thread_stall() -> Box<dyn Stall + Send> {
    Box::new(ThreadStall)
}

impl<P: PciFunction> DriverBinding<P> {
    pub fn new(config: MptScsiConfig) -> Self {
        Self {
            config,
            new_stall: thread_stall,
            controllers: ControllerRegistry::new(),
        }
    }

    /// Replaces the stall provider given to controllers started from now on.
    pub fn with_stall(mut self, new_stall: fn() -> Box<dyn Stall + Send>) -> Self {
        self.new_stall = new_stall;
        self
    }

    pub fn supported(&self, pci: &mut P) -> Result<()> {
        let id = pci.identity()?;
        if id.is_supported() {
            Ok(())
        } else {
            Err(MptError::Unsupported("not an LSI Fusion-MPT SCSI function"))
        }
    }

    /// Enables the function, brings the adapter up and registers it.
    ///
    /// On failure the function's original PCI attributes are restored.
    pub fn start(&mut self, mut pci: P) -> Result<ControllerHandle> {
        let original_attributes = pci.attributes()?;
        if let Err(err) = pci.enable_attributes(PciAttributes::IO | PciAttributes::BUS_MASTER) {
            restore_attributes(&mut pci, original_attributes);
            return Err(err.into());
        }

        if let Err(err) = pci.enable_attributes(PciAttributes::DUAL_ADDRESS_CYCLE) {
            tracing::warn!(error = %err, "failed to enable 64-bit DMA addresses");
        }

        let controller = match self.start_controller(&mut pci) {
            Ok(controller) => controller,
            Err(err) => {
                restore_attributes(&mut pci, original_attributes);
                return Err(err);
            }
        };

        let handle = self.controllers.insert(BoundController {
            pci,
            original_attributes,
            controller,
        });
        tracing::debug!(?handle, "controller bound");
        Ok(handle)
    }

    fn start_controller(&self, pci: &mut P) -> Result<BoundMptController<P>> {
        let regs = pci.map_bar0()?;
        let dma = pci.allocate_dma(DMA_REGION_LEN)?;
        MptScsiController::start_with_stall(regs, dma, self.config, (self.new_stall)())
    }

    /// Quiesces the controller, restores the function's PCI attributes and
    /// hands the function back.
    pub fn stop(&mut self, handle: ControllerHandle) -> Result<P> {
        let bound = self.controllers.remove(handle).ok_or(MptError::NotFound)?;
        let BoundController {
            mut pci,
            original_attributes,
            controller,
        } = bound;

        if let Err((_, err)) = controller.shutdown() {
            tracing::warn!(?handle, error = %err, "controller reset failed during stop");
        }
        restore_attributes(&mut pci, original_attributes);
        tracing::debug!(?handle, "controller unbound");
        Ok(pci)
    }

    pub fn controller(&self, handle: ControllerHandle) -> Option<&BoundMptController<P>> {
        self.controllers.get(handle).map(|bound| &bound.controller)
    }

    pub fn controller_mut(
        &mut self,
        handle: ControllerHandle,
    ) -> Option<&mut BoundMptController<P>> {
        self.controllers
            .get_mut(handle)
            .map(|bound| &mut bound.controller)
    }

    pub fn handles(&self) -> impl Iterator<Item = ControllerHandle> + '_ {
        self.controllers.handles()
    }
}

fn restore_attributes<P: PciFunction>(pci: &mut P, attributes: PciAttributes) {
    if let Err(err) = pci.set_attributes(attributes) {
        tracing::warn!(error = %err, "failed to restore original PCI attributes");
    }
}
