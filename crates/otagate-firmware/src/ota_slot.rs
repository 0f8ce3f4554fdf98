//! [`ImageSink`] writing into the next OTA app partition.

use alloc::boxed::Box;

use embedded_storage::Storage;
use esp_bootloader_esp_idf::ota::OtaImageState;
use esp_bootloader_esp_idf::ota_updater::OtaUpdater;
use esp_bootloader_esp_idf::partitions::PARTITION_TABLE_MAX_LEN;
use esp_storage::FlashStorage;
use log::{debug, error, info, warn};
use otagate_core::ota::{ImageSink, OtaError};

/// Flash is written one sector at a time
const SECTOR: usize = FlashStorage::SECTOR_SIZE as usize;

pub struct OtaSlotSink {
    flash: FlashStorage<'static>,
    table: Box<[u8; PARTITION_TABLE_MAX_LEN]>,
    sector: Box<[u8; SECTOR]>,
    /// Image offset of `sector[0]`
    sector_offset: u32,
    filled: usize,
}

impl OtaSlotSink {
    pub fn new(flash: FlashStorage<'static>) -> Self {
        Self {
            flash,
            table: Box::new([0; PARTITION_TABLE_MAX_LEN]),
            sector: Box::new([0; SECTOR]),
            sector_offset: 0,
            filled: 0,
        }
    }

    /// Mark the running image valid so a rollback-enabled bootloader keeps it
    pub fn confirm_running_image(&mut self) {
        let Ok(mut ota) = OtaUpdater::new(&mut self.flash, &mut self.table) else {
            warn!("No OTA data partition, running image not confirmed");
            return;
        };
        match ota.current_ota_state() {
            Ok(OtaImageState::New | OtaImageState::PendingVerify) => {
                match ota.set_current_ota_state(OtaImageState::Valid) {
                    Ok(()) => info!("Running image marked valid"),
                    Err(e) => warn!("Marking running image valid failed: {:?}", e),
                }
            }
            Ok(state) => debug!("Running image state: {:?}", state),
            Err(e) => debug!("No OTA state for running image: {:?}", e),
        }
    }

    fn flush(&mut self) -> Result<(), OtaError> {
        if self.filled == 0 {
            return Ok(());
        }
        let offset = self.sector_offset;
        let data = &self.sector[..self.filled];
        let mut ota = OtaUpdater::new(&mut self.flash, &mut self.table).map_err(|e| {
            error!("Reading partition table failed: {:?}", e);
            OtaError::ImageWrite { offset }
        })?;
        ota.with_next_partition(|mut region, _| region.write(offset, data))
            .map_err(|e| {
                error!("No OTA slot to write to: {:?}", e);
                OtaError::ImageWrite { offset }
            })?
            .map_err(|e| {
                error!("Flash write at {:#x} failed: {:?}", offset, e);
                OtaError::ImageWrite { offset }
            })?;

        self.sector_offset += self.filled as u32;
        self.filled = 0;
        Ok(())
    }
}

impl ImageSink for OtaSlotSink {
    fn begin(&mut self) -> Result<(), OtaError> {
        self.sector_offset = 0;
        self.filled = 0;
        let mut ota = OtaUpdater::new(&mut self.flash, &mut self.table).map_err(|e| {
            error!("OTA partitions unavailable: {:?}", e);
            OtaError::ImageWrite { offset: 0 }
        })?;
        let slot = ota
            .with_next_partition(|_, slot| slot)
            .map_err(|_| OtaError::ImageWrite { offset: 0 })?;
        info!("Writing new image to {:?}", slot);
        Ok(())
    }

    fn write(&mut self, offset: u32, mut chunk: &[u8]) -> Result<(), OtaError> {
        debug_assert_eq!(offset, self.sector_offset + self.filled as u32);
        while !chunk.is_empty() {
            let take = chunk.len().min(SECTOR - self.filled);
            self.sector[self.filled..self.filled + take].copy_from_slice(&chunk[..take]);
            self.filled += take;
            chunk = &chunk[take..];
            if self.filled == SECTOR {
                self.flush()?;
            }
        }
        Ok(())
    }

    fn finalize(&mut self, len: u32) -> Result<(), OtaError> {
        self.flush()?;
        let mut ota =
            OtaUpdater::new(&mut self.flash, &mut self.table).map_err(|_| OtaError::Activate)?;
        ota.activate_next_partition().map_err(|e| {
            error!("Activating next slot failed: {:?}", e);
            OtaError::Activate
        })?;
        ota.set_current_ota_state(OtaImageState::New)
            .map_err(|_| OtaError::Activate)?;
        info!("Image of {len} bytes activated");
        Ok(())
    }

    fn abort(&mut self) {
        // The next slot is only booted once activated, leftovers are harmless
        self.sector_offset = 0;
        self.filled = 0;
    }
}
