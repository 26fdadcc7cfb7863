//! System record page in the on-chip flash.

use embassy_stm32::flash::{Blocking, Flash};
use flow_core::persistence::StoreError;

use crate::record::{RecordFlash, RecordImage};

/// STM32G0 erase granularity.
const PAGE_SIZE: u32 = 2 * 1024;
/// Last page of the 512 KiB part, well clear of the image.
const RECORD_OFFSET: u32 = 512 * 1024 - PAGE_SIZE;

pub struct BoardFlash {
    flash: Flash<'static, Blocking>,
}

impl BoardFlash {
    pub fn new(flash: Flash<'static, Blocking>) -> Self {
        Self { flash }
    }
}

impl RecordFlash for BoardFlash {
    fn read_image(&mut self, image: &mut RecordImage) -> Result<(), StoreError> {
        self.flash
            .blocking_read(RECORD_OFFSET, image)
            .map_err(|err| {
                defmt::warn!("flash: read failed: {}", defmt::Debug2Format(&err));
                StoreError::Unavailable
            })
    }

    fn write_image(&mut self, image: &RecordImage) -> Result<(), StoreError> {
        self.flash
            .blocking_erase(RECORD_OFFSET, RECORD_OFFSET + PAGE_SIZE)
            .and_then(|()| self.flash.blocking_write(RECORD_OFFSET, image))
            .map_err(|err| {
                defmt::warn!("flash: record write failed: {}", defmt::Debug2Format(&err));
                StoreError::Unavailable
            })
    }
}
