//! Abstraction over the QSPI peripheral transaction engine.
//!
//! The driver never touches peripheral registers itself; everything goes
//! through [`QspiTransport`], which a HAL implements on top of the actual
//! hardware. Custom-instruction and long-frame transfers block until the bus
//! transaction finishes, while `start_read`/`start_write`/`start_erase` only
//! trigger a background DMA transfer whose completion is reported through
//! [`QspiTransport::is_ready`] and the ready callback.

use core::fmt::Debug;

/// Completion events delivered to the ready callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Event {
    /// A background read, write or erase transfer finished.
    TransferDone,
}

/// Callback invoked by the transport from its completion interrupt.
///
/// It may run on a different logical thread than the call that triggered the
/// transfer, so it must not borrow from the caller's stack.
pub type ReadyCallback = fn(Event);

/// SPI clock phase/polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpiMode {
    Mode0,
    Mode3,
}

/// Width of the address phase on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressWidth {
    Bits24,
    Bits32,
}

/// Opcode family used for background reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReadOperation {
    /// Single data line fast read.
    Fast,
    /// Dual output fast read.
    Fast2Out,
    /// Dual I/O fast read.
    Fast2Io,
    /// Quad output fast read.
    Fast4Out,
    /// Quad I/O fast read.
    Fast4Io,
}

/// Opcode family used for background writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WriteOperation {
    /// Single data line page program.
    PageProgram,
    /// Dual data line page program.
    PageProgram2Out,
    /// Quad data line page program.
    PageProgram4Out,
    /// Quad I/O page program.
    PageProgram4Io,
}

/// Immutable peripheral configuration, constructed once at startup and passed
/// by value into [`QspiTransport::init`]. Pin assignment is the HAL's
/// concern and not part of this struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransportConfig {
    /// Offset of the flash within the XIP window.
    pub xip_offset: u32,
    pub read_operation: ReadOperation,
    pub write_operation: WriteOperation,
    pub address_width: AddressWidth,
    /// Allow the peripheral to drive the chip's deep power-down state.
    pub deep_power_mode: bool,
    /// Clock-to-CSN delay in peripheral time units.
    pub sck_delay: u8,
    pub spi_mode: SpiMode,
    /// Peripheral clock divider; 1 is full speed.
    pub sck_divider: u8,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            xip_offset: 0,
            read_operation: ReadOperation::Fast4Io,
            write_operation: WriteOperation::PageProgram4Out,
            address_width: AddressWidth::Bits24,
            deep_power_mode: true,
            sck_delay: 1,
            spi_mode: SpiMode::Mode0,
            sck_divider: 1,
        }
    }
}

/// One custom-instruction transfer: an opcode followed by up to 8 data bytes
/// clocked out of `write` and into `read`.
pub struct CommandFrame<'a> {
    pub opcode: u8,
    /// Total frame length in bytes, opcode included.
    pub length: u8,
    pub write: Option<&'a [u8]>,
    pub read: Option<&'a mut [u8]>,
    /// Issue a write-enable as part of the instruction.
    pub write_enable: bool,
    /// Block until the chip's write-in-progress flag clears before returning.
    pub wait_busy: bool,
}

impl<'a> CommandFrame<'a> {
    pub fn new(opcode: u8, length: u8) -> Self {
        Self {
            opcode,
            length,
            write: None,
            read: None,
            write_enable: false,
            wait_busy: false,
        }
    }
}

/// Erase granularities supported by the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EraseGranularity {
    Sector4K,
    Block64K,
    /// Whole device; the address argument is ignored.
    All,
}

/// Blocking command channel plus asynchronous bulk transfer engine of a QSPI
/// peripheral.
pub trait QspiTransport {
    type Error: Debug;

    /// Brings up the peripheral. The callback, when given, is invoked on
    /// every background transfer completion.
    fn init(
        &mut self,
        config: &TransportConfig,
        on_ready: Option<ReadyCallback>,
    ) -> Result<(), Self::Error>;

    /// Executes one custom-instruction transfer, blocking until the frame has
    /// been clocked out.
    fn command(&mut self, frame: CommandFrame<'_>) -> Result<(), Self::Error>;

    /// Opens a long-frame transfer for frames beyond the custom-instruction
    /// data limit. Must be followed by one or more `long_frame_transfer`
    /// calls, the last one with `last` set.
    fn long_frame_start(&mut self, opcode: u8) -> Result<(), Self::Error>;

    /// Clocks `tx` out while capturing the same number of bytes into `rx`.
    fn long_frame_transfer(
        &mut self,
        tx: &[u8],
        rx: &mut [u8],
        last: bool,
    ) -> Result<(), Self::Error>;

    /// Triggers a background DMA read. The buffer must stay valid and
    /// untouched until [`QspiTransport::is_ready`] reports true again.
    fn start_read(&mut self, buf: &mut [u8], address: u32) -> Result<(), Self::Error>;

    /// Triggers a background DMA write. The target region must have been
    /// erased beforehand.
    fn start_write(&mut self, buf: &[u8], address: u32) -> Result<(), Self::Error>;

    /// Triggers a background erase of the given granularity.
    fn start_erase(
        &mut self,
        granularity: EraseGranularity,
        address: u32,
    ) -> Result<(), Self::Error>;

    /// Hardware busy/ready flag; false while a background transfer or chip
    /// program/erase is in flight.
    fn is_ready(&self) -> bool;

    /// Programs the delay applied after the deep power-down enter/exit
    /// instructions, in 16 us units. Fire and forget.
    fn set_power_down_durations(&mut self, enter: u16, exit: u16);

    /// Toggles the deep power-down enable bit in the interface configuration
    /// register. Fire and forget; the chip is unreachable while enabled.
    fn set_deep_power_down(&mut self, enabled: bool);
}
