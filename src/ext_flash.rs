//! Mode entry and the public flash operations.
//!
//! The chip ships in standard SPI mode. [`ExtFlash::init`] walks the ordered
//! handshake that reads the identification registers, sets the Quad-Enable
//! bit when it is not already set and switches the bus into QPI mode. Every
//! step is checked; the first failure aborts the whole sequence and leaves
//! the driver in [`InitState::Failed`] with nothing fixed up afterwards.

use super::*;
use crate::transport::{CommandFrame, EraseGranularity, QspiTransport, TransportConfig};
use embedded_hal::delay::DelayNs;

/// Maximum number of ready polls per wait point.
const READY_WAIT_ATTEMPTS: u32 = 100;
/// Spacing between ready polls, in microseconds.
const READY_WAIT_INTERVAL_US: u32 = 10;
/// Delay after the deep power-down enter/exit instructions, in 16 us units.
const POWER_DOWN_DURATION: u16 = 1;

/// Polls `condition` up to `attempts` times with `interval_us` between
/// checks. Returns true as soon as the condition holds, false when the
/// budget runs out.
///
/// This busy-spins on purpose: the waits are sub-millisecond and run before
/// any scheduler or interrupt infrastructure may be active.
pub(crate) fn wait_for<D: DelayNs>(
    delay: &mut D,
    attempts: u32,
    interval_us: u32,
    mut condition: impl FnMut() -> bool,
) -> bool {
    for _ in 0..attempts {
        if condition() {
            return true;
        }
        delay.delay_us(interval_us);
    }
    false
}

impl<T, D> ExtFlash<T, D>
where
    T: QspiTransport,
    D: DelayNs,
{
    /// Bounded wait for the peripheral's ready flag, at most ~1 ms.
    fn wait_until_ready(&mut self) -> bool {
        let Self {
            transport, delay, ..
        } = self;
        wait_for(delay, READY_WAIT_ATTEMPTS, READY_WAIT_INTERVAL_US, || {
            transport.is_ready()
        })
    }

    fn read_jedec_id(&mut self) -> Result<JedecId, Error<T::Error>> {
        let mut id = [0u8; 3];
        let mut frame = CommandFrame::new(Command::JedecId as u8, 4);
        frame.read = Some(&mut id);
        self.transport.command(frame).map_err(Error::Transport)?;

        Ok(JedecId {
            manufacturer_id: id[0],
            memory_type: id[1],
            capacity: id[2],
        })
    }

    fn read_device_id(&mut self) -> Result<u8, Error<T::Error>> {
        // Zeroed dummy/address preamble; the device ID is the last byte
        // clocked back.
        let preamble = [0u8; 5];
        let mut response = [0u8; 5];
        let mut frame = CommandFrame::new(Command::ManufacturerDeviceId as u8, 6);
        frame.write = Some(&preamble);
        frame.read = Some(&mut response);
        self.transport.command(frame).map_err(Error::Transport)?;

        Ok(response[4])
    }

    fn read_unique_id(&mut self) -> Result<u64, Error<T::Error>> {
        // 12 bytes exceed the custom-instruction limit, so this goes through
        // long frame mode: 4 dummy bytes, then the 8 ID bytes.
        let tx = [0u8; 12];
        let mut rx = [0u8; 12];
        self.transport
            .long_frame_start(Command::UniqueId as u8)
            .map_err(Error::Transport)?;
        self.transport
            .long_frame_transfer(&tx, &mut rx, true)
            .map_err(Error::Transport)?;

        let mut id = [0u8; 8];
        id.copy_from_slice(&rx[4..12]);
        Ok(u64::from_le_bytes(id))
    }

    fn read_status_register_2(&mut self) -> Result<u8, Error<T::Error>> {
        let mut status = [0u8; 1];
        let mut frame = CommandFrame::new(Command::StatusRegister2 as u8, 2);
        frame.read = Some(&mut status);
        self.transport.command(frame).map_err(Error::Transport)?;

        Ok(status[0])
    }

    /// Sets the volatile Quad-Enable bit: a volatile write-enable followed by
    /// a status-register-2 write. The register write carries its own implied
    /// write-enable, so no separate non-volatile write-enable is issued.
    fn set_quad_enable(&mut self, status2: u8) -> Result<(), Error<T::Error>> {
        let mut frame = CommandFrame::new(Command::WriteEnableVolatile as u8, 1);
        frame.wait_busy = true;
        self.transport.command(frame).map_err(Error::Transport)?;

        let updated = [status2 | STATUS2_QE];
        let mut frame = CommandFrame::new(Command::StatusRegister2 as u8, 2);
        frame.write = Some(&updated);
        frame.wait_busy = true;
        frame.write_enable = true;
        self.transport.command(frame).map_err(Error::Transport)?;

        Ok(())
    }

    /// Brings the chip from power-on into QPI mode and reads its
    /// identification registers.
    ///
    /// The sequence is strictly ordered and fail-fast: transport bring-up,
    /// ID reads, status-register-2 read, Quad-Enable write (skipped when the
    /// bit is already set, so re-running on a quad-enabled chip does not
    /// toggle it again), QPI entry. The final bounded ready-wait decides the
    /// overall outcome; on any failure the state is [`InitState::Failed`],
    /// the identification data stays zeroed and no step is retried.
    ///
    /// May be invoked again after a failure.
    pub fn init(&mut self, config: &TransportConfig) -> Result<(), Error<T::Error>> {
        self.state = InitState::Failed;
        self.info = FlashInfo::default();
        self.powered_down = false;

        self.transport
            .init(config, self.on_ready)
            .map_err(Error::Transport)?;

        // The first commands assume the chip has fully left any residual
        // power-down state.
        self.transport
            .set_power_down_durations(POWER_DOWN_DURATION, POWER_DOWN_DURATION);

        let jedec_id = self.read_jedec_id()?;
        let _ = self.wait_until_ready();
        let device_id = self.read_device_id()?;
        let _ = self.wait_until_ready();
        let unique_id = self.read_unique_id()?;
        let _ = self.wait_until_ready();

        let status2 = self.read_status_register_2()?;
        if status2 & STATUS2_QE == 0 {
            self.set_quad_enable(status2)?;
        }

        let _ = self.wait_until_ready();

        let mut frame = CommandFrame::new(Command::EnterQpiMode as u8, 1);
        frame.wait_busy = true;
        self.transport.command(frame).map_err(Error::Transport)?;

        // The last wait is the definitive outcome: the chip must come back
        // ready in QPI mode within the budget.
        if !self.wait_until_ready() {
            return Err(Error::InitTimeout);
        }

        self.info = FlashInfo {
            jedec_id,
            device_id,
            unique_id,
        };
        self.state = InitState::Ready;
        Ok(())
    }

    /// True when the peripheral can accept a new read/write/erase trigger.
    pub fn is_ready(&self) -> bool {
        self.transport.is_ready()
    }

    /// True while a background read/write/erase is still in flight.
    pub fn is_busy(&self) -> bool {
        !self.transport.is_ready()
    }

    fn check_operational(&self) -> Result<(), Error<T::Error>> {
        if self.state != InitState::Ready {
            return Err(Error::NotReady);
        }
        if self.powered_down {
            return Err(Error::PoweredDown);
        }
        Ok(())
    }

    /// Triggers a background read into `buf` starting at `address`.
    ///
    /// Returns as soon as the DMA transfer is set up; poll
    /// [`ExtFlash::is_busy`] or use the ready callback before consuming the
    /// buffer. Data can also be read through a pointer into the XIP window,
    /// see [`flash_to_xip_addr`].
    pub fn read(&mut self, buf: &mut [u8], address: u32) -> Result<(), Error<T::Error>> {
        self.check_operational()?;
        if !self.transport.is_ready() {
            return Err(Error::Busy);
        }
        self.transport
            .start_read(buf, address)
            .map_err(Error::Transport)
    }

    /// Triggers a background write of `buf` starting at `address`.
    ///
    /// The target region must have been erased beforehand; a NOR write only
    /// clears bits. Poll [`ExtFlash::is_busy`] or use the ready callback to
    /// learn when the transfer is done.
    pub fn write(&mut self, buf: &[u8], address: u32) -> Result<(), Error<T::Error>> {
        self.check_operational()?;
        if !self.transport.is_ready() {
            return Err(Error::Busy);
        }
        self.transport
            .start_write(buf, address)
            .map_err(Error::Transport)
    }

    fn trigger_erase(
        &mut self,
        granularity: EraseGranularity,
        address: u32,
    ) -> Result<(), Error<T::Error>> {
        self.check_operational()?;
        if !self.transport.is_ready() {
            return Err(Error::Busy);
        }
        self.transport
            .start_erase(granularity, address)
            .map_err(Error::Transport)
    }

    /// Triggers erasing the 4 KiB sector containing `address`.
    pub fn erase_sector_4k(&mut self, address: u32) -> Result<(), Error<T::Error>> {
        self.trigger_erase(EraseGranularity::Sector4K, address)
    }

    /// Triggers erasing the 64 KiB block containing `address`.
    pub fn erase_block_64k(&mut self, address: u32) -> Result<(), Error<T::Error>> {
        self.trigger_erase(EraseGranularity::Block64K, address)
    }

    /// Triggers erasing the whole device. This can take in the order of
    /// hundreds of seconds; completion is only visible through
    /// [`ExtFlash::is_busy`] and the ready callback.
    pub fn erase_all(&mut self) -> Result<(), Error<T::Error>> {
        self.trigger_erase(EraseGranularity::All, 0)
    }

    /// Puts the chip into deep power-down. Fire and forget; no further
    /// read/write/erase may be issued until [`ExtFlash::wake`].
    pub fn sleep(&mut self) -> Result<(), Error<T::Error>> {
        if self.state != InitState::Ready {
            return Err(Error::NotReady);
        }
        self.transport.set_deep_power_down(true);
        self.powered_down = true;
        Ok(())
    }

    /// Wakes the chip from deep power-down. Fire and forget; the chip needs
    /// the programmed wake delay before it responds again.
    pub fn wake(&mut self) -> Result<(), Error<T::Error>> {
        if self.state != InitState::Ready {
            return Err(Error::NotReady);
        }
        self.transport.set_deep_power_down(false);
        self.powered_down = false;
        Ok(())
    }
}
