//! Write-through persistence for [`VirtualEfuse`].
//!
//! Every burn is applied to a copy, the copy is written out, and only then
//! does it replace the live image. A failed write therefore leaves both the
//! stored record and the in-memory fields as they were, which is what a
//! failed burn on real fuses looks like.
//!
//! Stored record layout: `b"OGEF"`, the image length as a little-endian
//! `u16`, then the postcard-encoded image.

use alloc::vec::Vec;
use core::fmt::Debug;

use log::{debug, warn};
use thiserror_no_std::Error;

use super::field::EfuseField;
use super::store::EfuseStore;
use super::virtual_efuse::{VirtualEfuse, VirtualEfuseError};

pub const RECORD_MAGIC: [u8; 4] = *b"OGEF";
pub const RECORD_HEADER_LEN: usize = RECORD_MAGIC.len() + 2;
/// Largest encoded image accepted back from storage
pub const MAX_RECORD_IMAGE_LEN: usize = 64;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistentEfuseError<E: Debug> {
    #[error("eFuse emulation: {0}")]
    Efuse(VirtualEfuseError),
    #[error("persisting the eFuse image failed: {0:?}")]
    Persist(E),
}

impl<E: Debug> From<VirtualEfuseError> for PersistentEfuseError<E> {
    fn from(e: VirtualEfuseError) -> Self {
        Self::Efuse(e)
    }
}

/// Frame `efuse` as a storage record.
pub fn encode_record(efuse: &VirtualEfuse) -> Result<Vec<u8>, VirtualEfuseError> {
    let image = efuse.to_bytes()?;
    let mut record = Vec::with_capacity(RECORD_HEADER_LEN + image.len());
    record.extend_from_slice(&RECORD_MAGIC);
    record.extend_from_slice(&(image.len() as u16).to_le_bytes());
    record.extend_from_slice(&image);
    Ok(record)
}

/// Read a record back. `None` for erased or foreign data.
pub fn decode_record(raw: &[u8]) -> Option<VirtualEfuse> {
    if raw.len() < RECORD_HEADER_LEN || raw[..RECORD_MAGIC.len()] != RECORD_MAGIC {
        return None;
    }
    let len = u16::from_le_bytes([raw[4], raw[5]]) as usize;
    if len > MAX_RECORD_IMAGE_LEN || raw.len() < RECORD_HEADER_LEN + len {
        warn!("eFuse record claims {len} bytes, ignoring");
        return None;
    }
    match VirtualEfuse::from_bytes(&raw[RECORD_HEADER_LEN..RECORD_HEADER_LEN + len]) {
        Ok(efuse) => Some(efuse),
        Err(e) => {
            warn!("eFuse record unreadable: {e}");
            None
        }
    }
}

/// A [`VirtualEfuse`] whose burned bits are written out through `persist`
/// before they become visible.
pub struct PersistentEfuse<W> {
    inner: VirtualEfuse,
    persist: W,
}

impl<W, E> PersistentEfuse<W>
where
    W: FnMut(&[u8]) -> Result<(), E>,
    E: Debug,
{
    pub fn new(inner: VirtualEfuse, persist: W) -> Self {
        Self { inner, persist }
    }

    pub fn inner(&self) -> &VirtualEfuse {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut VirtualEfuse {
        &mut self.inner
    }

    fn burn(
        &mut self,
        apply: impl FnOnce(&mut VirtualEfuse) -> Result<(), VirtualEfuseError>,
    ) -> Result<(), PersistentEfuseError<E>> {
        let mut next = self.inner.clone();
        apply(&mut next)?;
        let record = encode_record(&next)?;
        (self.persist)(&record).map_err(PersistentEfuseError::Persist)?;
        debug!("eFuse record saved ({} bytes)", record.len());
        self.inner = next;
        Ok(())
    }
}

impl<W, E> EfuseStore for PersistentEfuse<W>
where
    W: FnMut(&[u8]) -> Result<(), E>,
    E: Debug,
{
    type Error = PersistentEfuseError<E>;

    fn read_field(&mut self, field: EfuseField, out: &mut [u8]) -> Result<(), Self::Error> {
        Ok(self.inner.read_field(field, out)?)
    }

    fn write_field(&mut self, field: EfuseField, bits: &[u8]) -> Result<(), Self::Error> {
        if self.inner.batch_open() {
            // Staged bits are volatile until the commit
            return Ok(self.inner.write_field(field, bits)?);
        }
        self.burn(|efuse| efuse.write_field(field, bits))
    }

    fn begin_batch(&mut self) -> Result<(), Self::Error> {
        Ok(self.inner.begin_batch()?)
    }

    fn commit_batch(&mut self) -> Result<(), Self::Error> {
        let result = self.burn(|efuse| efuse.commit_batch());
        if result.is_err() {
            // The batch is consumed whether or not the burn landed
            self.inner.discard_batch();
        }
        result
    }

    fn cancel_batch(&mut self) -> Result<(), Self::Error> {
        Ok(self.inner.cancel_batch()?)
    }
}
