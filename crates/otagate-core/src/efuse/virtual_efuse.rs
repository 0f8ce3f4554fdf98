//! In-memory eFuse backend.
//!
//! Behaves like the chip's virtual-eFuse mode: bits only ever go 0 -> 1,
//! re-programming a burned (or already staged) bit is rejected, and a batch
//! is burned all at once on commit. The burned image serializes with
//! `postcard` so firmware can keep it in a flash sector and the simulator in
//! a file, which makes "provision, reboot, provision again" reproducible.

use alloc::vec::Vec;

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use super::field::{EfuseField, FieldImage, IMAGE_LEN};
use super::store::EfuseStore;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualEfuseError {
    #[error("batch write already in progress")]
    BatchInProgress,
    #[error("no batch write in progress")]
    NoBatch,
    #[error("{field}: expected {expected} bytes, got {actual}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{field}: repeated programming of bit(s) {bits:#04x} at byte {byte}")]
    RepeatedProgramming {
        field: &'static str,
        byte: usize,
        bits: u8,
    },
    #[error("{field}: read failed")]
    ReadFault { field: &'static str },
    #[error("{field}: write failed")]
    WriteFault { field: &'static str },
    #[error("batch commit failed")]
    CommitFault,
    #[error("stored eFuse image is corrupt")]
    CorruptImage,
}

/// Failures to inject on the next operations, used to exercise error paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultPlan {
    pub fail_read: Option<EfuseField>,
    pub fail_write: Option<EfuseField>,
    pub fail_commit: bool,
}

/// Counters of what the backend was asked to do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EfuseStats {
    pub reads: u32,
    pub writes: u32,
    pub batches_begun: u32,
    pub commits: u32,
    pub cancels: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualEfuse {
    burned: FieldImage,
    #[serde(skip)]
    staged: Option<FieldImage>,
    #[serde(skip)]
    faults: FaultPlan,
    #[serde(skip)]
    stats: EfuseStats,
}

impl VirtualEfuse {
    /// A fresh chip: every custom field reads zero
    pub fn new() -> Self {
        Self::default()
    }

    /// A chip whose fields already hold `image`
    pub fn with_image(image: FieldImage) -> Self {
        Self {
            burned: image,
            ..Self::default()
        }
    }

    pub fn burned(&self) -> &FieldImage {
        &self.burned
    }

    pub fn batch_open(&self) -> bool {
        self.staged.is_some()
    }

    /// Drop staged bits without counting a cancel, as a failed burn does
    pub fn discard_batch(&mut self) {
        self.staged = None;
    }

    pub fn stats(&self) -> EfuseStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = EfuseStats::default();
    }

    pub fn inject(&mut self, faults: FaultPlan) {
        self.faults = faults;
    }

    /// Serialize the burned bits (staged bits are volatile and never persisted)
    pub fn to_bytes(&self) -> Result<Vec<u8>, VirtualEfuseError> {
        postcard::to_allocvec(self).map_err(|_| VirtualEfuseError::CorruptImage)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VirtualEfuseError> {
        postcard::from_bytes(bytes).map_err(|_| VirtualEfuseError::CorruptImage)
    }

    fn check_len(field: EfuseField, len: usize) -> Result<(), VirtualEfuseError> {
        if len != field.byte_len() {
            return Err(VirtualEfuseError::LengthMismatch {
                field: field.name(),
                expected: field.byte_len(),
                actual: len,
            });
        }
        Ok(())
    }

    /// Burned bits plus whatever the open batch already holds
    fn programmed(&self) -> FieldImage {
        match self.staged {
            Some(staged) => {
                let mut merged = self.burned;
                for (out, s) in merged.0.iter_mut().zip(staged.0) {
                    *out |= s;
                }
                merged
            }
            None => self.burned,
        }
    }
}

impl EfuseStore for VirtualEfuse {
    type Error = VirtualEfuseError;

    fn read_field(&mut self, field: EfuseField, out: &mut [u8]) -> Result<(), Self::Error> {
        Self::check_len(field, out.len())?;
        self.stats.reads += 1;
        if self.faults.fail_read == Some(field) {
            return Err(VirtualEfuseError::ReadFault {
                field: field.name(),
            });
        }
        // Staged bits are not visible until the batch is committed
        out.copy_from_slice(self.burned.field(field));
        Ok(())
    }

    fn write_field(&mut self, field: EfuseField, bits: &[u8]) -> Result<(), Self::Error> {
        Self::check_len(field, bits.len())?;
        if self.faults.fail_write == Some(field) {
            return Err(VirtualEfuseError::WriteFault {
                field: field.name(),
            });
        }

        let programmed = self.programmed();
        let current = programmed.field(field);
        if let Some(byte) = current.iter().zip(bits).position(|(&c, &b)| c & b != 0) {
            return Err(VirtualEfuseError::RepeatedProgramming {
                field: field.name(),
                byte,
                bits: current[byte] & bits[byte],
            });
        }

        self.stats.writes += 1;
        let target = match self.staged.as_mut() {
            Some(staged) => staged,
            None => &mut self.burned,
        };
        for (out, &b) in target.field_mut(field).iter_mut().zip(bits) {
            *out |= b;
        }
        Ok(())
    }

    fn begin_batch(&mut self) -> Result<(), Self::Error> {
        if self.staged.is_some() {
            return Err(VirtualEfuseError::BatchInProgress);
        }
        self.stats.batches_begun += 1;
        self.staged = Some(FieldImage::BLANK);
        Ok(())
    }

    fn commit_batch(&mut self) -> Result<(), Self::Error> {
        let staged = self.staged.take().ok_or(VirtualEfuseError::NoBatch)?;
        if self.faults.fail_commit {
            // Hardware programs a block all-or-nothing: a failed burn leaves it untouched
            return Err(VirtualEfuseError::CommitFault);
        }
        for (out, s) in self.burned.0.iter_mut().zip(staged.0) {
            *out |= s;
        }
        self.stats.commits += 1;
        Ok(())
    }

    fn cancel_batch(&mut self) -> Result<(), Self::Error> {
        self.staged.take().ok_or(VirtualEfuseError::NoBatch)?;
        self.stats.cancels += 1;
        Ok(())
    }
}

// serde only derives fixed-size arrays up to 32 elements
const _: () = assert!(IMAGE_LEN <= 32);
