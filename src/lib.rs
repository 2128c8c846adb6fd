#![no_std]

#[cfg(test)]
extern crate std;

use core::fmt::Debug;
use embedded_storage::nor_flash::{ErrorType, NorFlashError, NorFlashErrorKind};

mod external_impls;
pub mod ext_flash;
pub mod transport;

use transport::{QspiTransport, ReadyCallback};

pub const PAGE_SIZE: u32 = 256;
pub const SECTOR_4K_SIZE: u32 = 4 * 1024;
pub const BLOCK_64K_SIZE: u32 = 64 * 1024;

/// Base address of the XIP (execute-in-place) window through which the
/// external flash is memory mapped.
pub const XIP_BASE: u32 = 0x1200_0000;
/// Size of the XIP window in bytes.
pub const XIP_SIZE: u32 = 0x0E00_0000;

/// Quad-Enable flag in status register 2.
pub const STATUS2_QE: u8 = 0x02;

/// Converts a flash offset to the address of the same byte in the XIP window.
///
/// `flash_addr` must be below [`XIP_SIZE`]; larger offsets have no XIP
/// mapping.
pub const fn flash_to_xip_addr(flash_addr: u32) -> u32 {
    debug_assert!(flash_addr < XIP_SIZE);
    flash_addr + XIP_BASE
}

/// Converts an address in the XIP window back to a flash offset.
///
/// `xip_addr` must lie inside the window, see [`is_xip_addr`].
pub const fn xip_to_flash_addr(xip_addr: u32) -> u32 {
    debug_assert!(is_xip_addr(xip_addr));
    xip_addr - XIP_BASE
}

/// Returns true when the address falls inside the XIP window.
pub const fn is_xip_addr(addr: u32) -> bool {
    addr.wrapping_sub(XIP_BASE) < XIP_SIZE
}

/// JEDEC identification response (opcode 0x9F).
///
/// The capacity byte is log2 encoded, e.g. 0x18 for a 16 MiB part.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct JedecId {
    pub manufacturer_id: u8,
    pub memory_type: u8,
    pub capacity: u8,
}

impl JedecId {
    /// Device size in bytes, or 0 when the capacity code is 0 (unknown).
    ///
    /// Codes of 32 and above cannot name a representable size; a bus with no
    /// chip answering reads back 0xFF. Those also map to the 0 sentinel.
    pub fn size_bytes(&self) -> u32 {
        if self.capacity == 0 {
            0
        } else {
            1u32.checked_shl(u32::from(self.capacity)).unwrap_or(0)
        }
    }
}

/// Identification data read once during initialization.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashInfo {
    pub jedec_id: JedecId,
    pub device_id: u8,
    pub unique_id: u64,
}

/// Outcome of the mode-entry sequence.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InitState {
    #[default]
    NotAttempted,
    Ready,
    Failed,
}

/// Driver for an external QSPI NOR flash chip sitting behind an nRF-style
/// QSPI peripheral.
///
/// Initialization negotiates Quad-Enable and QPI mode; afterwards the
/// read/write/erase triggers run as background DMA transfers on the
/// transport. One instance owns the chip for the lifetime of the process.
pub struct ExtFlash<T, D> {
    transport: T,
    delay: D,
    info: FlashInfo,
    state: InitState,
    powered_down: bool,
    on_ready: Option<ReadyCallback>,
}

impl<T, D> ExtFlash<T, D> {
    pub fn new(transport: T, delay: D) -> Self {
        Self {
            transport,
            delay,
            info: FlashInfo::default(),
            state: InitState::NotAttempted,
            powered_down: false,
            on_ready: None,
        }
    }

    /// Installs the completion callback handed to the transport during
    /// initialization. The transport invokes it from its completion
    /// interrupt, so it may run on a different logical thread than the
    /// call that triggered the transfer.
    ///
    /// Must be set before `init`; changing it afterwards has no effect.
    pub fn set_ready_callback(&mut self, on_ready: ReadyCallback) {
        self.on_ready = Some(on_ready);
    }

    pub fn init_state(&self) -> InitState {
        self.state
    }

    /// True after a successful initialization.
    pub fn is_init_done(&self) -> bool {
        self.state == InitState::Ready
    }

    /// True while the chip has been put into deep power-down with `sleep`.
    /// The chip does not respond to commands in this state.
    pub fn is_powered_down(&self) -> bool {
        self.powered_down
    }

    /// Manufacturer ID as assigned by JEDEC (JEP106), e.g. 0xEF for Winbond.
    ///
    /// This and the accessors below return zeroed defaults until `init`
    /// has completed successfully; check [`ExtFlash::is_init_done`] first.
    pub fn manufacturer_id(&self) -> u8 {
        self.info.jedec_id.manufacturer_id
    }

    /// Manufacturer-specific device ID.
    pub fn device_id(&self) -> u8 {
        self.info.device_id
    }

    /// Factory-programmed 64-bit unique ID.
    pub fn unique_id(&self) -> u64 {
        self.info.unique_id
    }

    /// Manufacturer-specific memory type byte.
    pub fn memory_type(&self) -> u8 {
        self.info.jedec_id.memory_type
    }

    /// Device size in bytes, 0 when unknown.
    pub fn size_bytes(&self) -> u32 {
        self.info.jedec_id.size_bytes()
    }

    /// Releases the transport and delay provider from the driver.
    pub fn release(self) -> (T, D) {
        (self.transport, self.delay)
    }
}

impl<T, D> ErrorType for ExtFlash<T, D>
where
    T: QspiTransport,
{
    type Error = Error<T::Error>;
}

/// Custom error type for the various errors that can be thrown by the driver.
/// Can be converted into a NorFlashError.
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error<E: Debug> {
    /// The underlying transport rejected a transaction.
    Transport(E),
    /// Operation attempted while initialization has not completed.
    NotReady,
    /// A prior read/write/erase is still in flight.
    Busy,
    /// The chip is in deep power-down and cannot respond.
    PoweredDown,
    /// The ready-wait budget ran out during mode entry.
    InitTimeout,
    NotAligned,
    OutOfBounds,
}

impl<E: Debug> NorFlashError for Error<E> {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            Error::NotAligned => NorFlashErrorKind::NotAligned,
            Error::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            _ => NorFlashErrorKind::Other,
        }
    }
}

/// Easily readable representation of the command bytes used by the flash chip
/// during mode entry.
#[repr(u8)]
pub(crate) enum Command {
    ManufacturerDeviceId = 0x90,
    JedecId = 0x9F,
    UniqueId = 0x4B,
    WriteEnableVolatile = 0x50,
    StatusRegister2 = 0x35, // same opcode reads and writes the register
    EnterQpiMode = 0x38,
}
