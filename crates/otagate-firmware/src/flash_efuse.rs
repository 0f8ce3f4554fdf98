//! Virtual eFuses persisted in the `efuse_em` flash partition.
//!
//! Every burn rewrites the partition before the new bits become readable, so
//! the identity survives reboots like real fuses while the chip's one-time
//! fuses stay untouched during bring-up.

use embedded_storage::{ReadStorage, Storage};
use esp_bootloader_esp_idf::partitions::{
    DataPartitionSubType, PARTITION_TABLE_MAX_LEN, PartitionType, read_partition_table,
};
use esp_storage::FlashStorage;
use log::info;
use otagate_core::efuse::persistent::{MAX_RECORD_IMAGE_LEN, RECORD_HEADER_LEN};
use otagate_core::efuse::{PersistentEfuse, VirtualEfuse, decode_record};
use thiserror_no_std::Error;

#[derive(Error, Debug)]
pub enum FlashEfuseError {
    #[error("partition table unreadable")]
    PartitionTable,
    #[error("no data partition with subtype efuse")]
    NoPartition,
    #[error("flash access at {offset:#x} failed")]
    Flash { offset: u32 },
}

/// Locate the emulation partition and load the burned image from it.
/// An erased or foreign partition reads as a blank chip.
pub fn open<'a>(
    flash: &'a mut FlashStorage<'static>,
) -> Result<PersistentEfuse<impl FnMut(&[u8]) -> Result<(), FlashEfuseError> + 'a>, FlashEfuseError>
{
    let mut table = [0u8; PARTITION_TABLE_MAX_LEN];
    let offset = {
        let pt = read_partition_table(&mut *flash, &mut table)
            .map_err(|_| FlashEfuseError::PartitionTable)?;
        let part = pt
            .find_partition(PartitionType::Data(DataPartitionSubType::EfuseEm))
            .map_err(|_| FlashEfuseError::PartitionTable)?
            .ok_or(FlashEfuseError::NoPartition)?;
        info!(
            "eFuse emulation partition '{}' at {:#x} ({} bytes)",
            part.label_as_str(),
            part.offset(),
            part.len()
        );
        part.offset()
    };

    let mut raw = [0u8; RECORD_HEADER_LEN + MAX_RECORD_IMAGE_LEN];
    flash
        .read(offset, &mut raw)
        .map_err(|_| FlashEfuseError::Flash { offset })?;

    let inner = decode_record(&raw).unwrap_or_else(|| {
        info!("eFuse emulation partition is blank");
        VirtualEfuse::new()
    });

    let write = move |record: &[u8]| {
        flash
            .write(offset, record)
            .map_err(|_| FlashEfuseError::Flash { offset })
    };
    Ok(PersistentEfuse::new(inner, write))
}
