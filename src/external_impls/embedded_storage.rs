//! Blocking `embedded-storage` adapter layered over the asynchronous
//! transfer triggers: each operation starts the background transfer and then
//! spins on the hardware ready flag. No completion timeout applies here; a
//! full-chip erase can keep `erase` busy for minutes.

use crate::transport::QspiTransport;
use crate::{Error, ExtFlash, SECTOR_4K_SIZE};
use core::fmt::Debug;
use embedded_hal::delay::DelayNs;
use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};

/// The QSPI DMA engine moves whole words.
const WORD_SIZE: u32 = 4;

fn check_slice<E: Debug>(capacity: u32, offset: u32, len: usize) -> Result<(), Error<E>> {
    let len = len as u32;
    if !offset.is_multiple_of(WORD_SIZE) || !len.is_multiple_of(WORD_SIZE) {
        return Err(Error::NotAligned);
    }
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(Error::OutOfBounds),
    }
}

impl<T, D> ReadNorFlash for ExtFlash<T, D>
where
    T: QspiTransport,
    D: DelayNs,
{
    const READ_SIZE: usize = WORD_SIZE as usize;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        check_slice(self.size_bytes(), offset, bytes.len())?;

        while self.is_busy() {}
        ExtFlash::read(self, bytes, offset)?;
        while self.is_busy() {}
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.size_bytes() as usize
    }
}

impl<T, D> NorFlash for ExtFlash<T, D>
where
    T: QspiTransport,
    D: DelayNs,
{
    const WRITE_SIZE: usize = WORD_SIZE as usize;
    const ERASE_SIZE: usize = SECTOR_4K_SIZE as usize;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if !from.is_multiple_of(SECTOR_4K_SIZE) || !to.is_multiple_of(SECTOR_4K_SIZE) {
            return Err(Error::NotAligned);
        }
        if from > to || to > self.size_bytes() {
            return Err(Error::OutOfBounds);
        }

        for address in (from..to).step_by(SECTOR_4K_SIZE as usize) {
            while self.is_busy() {}
            self.erase_sector_4k(address)?;
        }
        while self.is_busy() {}
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        check_slice(self.size_bytes(), offset, bytes.len())?;

        while self.is_busy() {}
        ExtFlash::write(self, bytes, offset)?;
        while self.is_busy() {}
        Ok(())
    }
}
