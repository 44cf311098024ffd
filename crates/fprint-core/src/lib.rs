//! Core runtime for userspace USB fingerprint sensor drivers.
//!
//! This crate owns the event loop, the sequential state machine engine, the
//! image-device orchestrator, and the stored-print model; it knows nothing
//! about any particular sensor's wire protocol or about how USB transfers
//! actually reach hardware. A concrete backend (`fprint-usb`) implements
//! [`usb::UsbTransport`]; concrete sensor families (`fprint-driver-*`)
//! implement [`driver::ImagingDriver`] or [`driver::PrimitiveDriver`] and
//! register themselves with a [`library::Library`].

pub mod assembly;
pub mod blocking;
pub mod device;
pub mod driver;
pub mod error;
pub mod event_loop;
pub mod image;
pub mod library;
pub mod orchestrator;
pub mod print;
pub mod ssm;
pub mod state;
pub mod storage;
pub mod timer;
pub mod usb;

pub use device::{DeviceDescriptor, DeviceHandle, DriverEntry, DriverRegistry};
pub use driver::{Dev, DriverCaps, DriverInfo, DriverKind, ImagingDriver, ImagingSink, ImagingSubState, PrimitiveDriver, ScanType};
pub use error::{Error, IdentifyResult, Result, RetryHint, VerifyResult};
pub use image::{Image, ImageFlags};
pub use library::{DeviceId, Library};
pub use print::{DataType, StoredPrint};
pub use ssm::{SsmArena, SsmHandle};
pub use state::{DeviceState, Operation};
