//! Idempotent device-identity provisioning on top of an [`EfuseStore`].
//!
//! Burning is irreversible, so `program` is written to be safe to call on
//! every boot: a device that already carries a valid CRC is left alone, a
//! request that would need clearing a burned bit is refused before anything
//! is staged, and only the bits that are still missing get written, all in
//! one batch that is cancelled on the first staging error.

use core::fmt::Debug;

use log::{debug, error, info, warn};
use thiserror_no_std::Error;

use super::field::{EfuseField, FieldImage, MAX_FIELD_BYTES, first_conflict, stage_delta};
use super::payload::ProvisioningPayload;
use super::store::EfuseStore;
use crate::gate::{GateId, GateTrail};

#[derive(Error, Debug)]
pub enum ProvisionError<E: Debug> {
    #[error("failed to read {field}: {cause:?}")]
    Read { field: &'static str, cause: E },
    #[error("{field} conflict: would require clearing bits at byte {byte} (current {current:#04x}, desired {desired:#04x})")]
    Conflict {
        field: &'static str,
        byte: usize,
        current: u8,
        desired: u8,
    },
    #[error("serial number is {len} bytes, at most 16 fit")]
    SerialTooLong { len: usize },
    #[error("failed to stage {field}: {cause:?}")]
    Stage { field: &'static str, cause: E },
    #[error("batch {step} failed: {cause:?}")]
    Batch { step: &'static str, cause: E },
}

/// Health of the stored identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningStatus {
    /// CRC field still reads zero
    Blank,
    /// A CRC is burned but does not match the payload
    CrcMismatch { stored: u16, computed: u16 },
    Valid { crc: u16 },
}

/// Everything read back from the custom fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisioningRecord {
    pub payload: ProvisioningPayload,
    pub stored_crc: u16,
}

impl ProvisioningRecord {
    pub fn from_image(image: &FieldImage) -> Self {
        Self {
            payload: ProvisioningPayload::from_image(image),
            stored_crc: image.stored_crc(),
        }
    }

    pub fn serial(&self) -> &str {
        self.payload.serial()
    }

    pub fn hw_rev(&self) -> u16 {
        self.payload.hw_rev()
    }

    pub fn feature_flags(&self) -> u32 {
        self.payload.feature_flags()
    }

    pub fn computed_crc(&self) -> u16 {
        self.payload.crc16()
    }

    pub fn status(&self) -> ProvisioningStatus {
        let computed = self.computed_crc();
        if self.stored_crc == 0 {
            ProvisioningStatus::Blank
        } else if self.stored_crc != computed {
            ProvisioningStatus::CrcMismatch {
                stored: self.stored_crc,
                computed,
            }
        } else {
            ProvisioningStatus::Valid { crc: computed }
        }
    }
}

/// Answer of [`Provisioner::is_provisioned`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisionCheck {
    /// Stored CRC is non-zero and matches the payload
    pub provisioned: bool,
    /// Stored CRC equals the recomputed CRC
    pub crc_ok: bool,
}

/// Successful result of [`Provisioner::program`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramOutcome {
    /// A valid identity is already burned; nothing was touched
    AlreadyProvisioned { crc: u16 },
    /// Every requested bit is already set; nothing was touched
    NothingToBurn,
    /// A batch with `fields` field writes was committed
    Committed { crc: u16, fields: u8 },
}

impl ProgramOutcome {
    /// Whether any bit was burned
    pub fn burned(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }
}

/// Owns the eFuse store for the duration of provisioning.
pub struct Provisioner<S> {
    store: S,
    gates: GateTrail,
}

impl<S: EfuseStore> Provisioner<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            gates: GateTrail::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    /// Gates evaluated by the last [`program`](Self::program) call
    pub fn last_gates(&self) -> &GateTrail {
        &self.gates
    }

    fn read_image(&mut self) -> Result<FieldImage, ProvisionError<S::Error>> {
        let mut image = FieldImage::BLANK;
        for field in EfuseField::ALL {
            self.store
                .read_field(field, image.field_mut(field))
                .map_err(|cause| {
                    error!("Reading {} failed: {:?}", field.name(), cause);
                    ProvisionError::Read {
                        field: field.name(),
                        cause,
                    }
                })?;
        }
        Ok(image)
    }

    /// Read serial, hardware revision, feature flags and the stored CRC.
    pub fn read_fields(&mut self) -> Result<ProvisioningRecord, ProvisionError<S::Error>> {
        Ok(ProvisioningRecord::from_image(&self.read_image()?))
    }

    /// Recompute the CRC over the stored payload and compare it with the stored one.
    pub fn is_provisioned(&mut self) -> Result<ProvisionCheck, ProvisionError<S::Error>> {
        let record = self.read_fields()?;
        let crc_ok = record.stored_crc == record.computed_crc();
        Ok(ProvisionCheck {
            provisioned: record.stored_crc != 0 && crc_ok,
            crc_ok,
        })
    }

    /// Read all fields and log them together with the CRC verdict.
    pub fn report(&mut self) -> Result<ProvisioningRecord, ProvisionError<S::Error>> {
        let record = self.read_fields()?;

        info!("SERIAL_NUMBER: '{}'", record.serial());
        info!("HW_REV: {:#06x} ({})", record.hw_rev(), record.hw_rev());
        info!("FEATURE_FLAGS: {:#010x}", record.feature_flags());
        info!("PROVISIONING_CRC16: {:#06x}", record.stored_crc);
        info!("CRC16 recalculated: {:#06x}", record.computed_crc());

        match record.status() {
            ProvisioningStatus::Blank => {
                warn!("CRC16 stored is 0x0000 (likely not provisioned yet)")
            }
            ProvisioningStatus::CrcMismatch { stored, computed } => {
                warn!("CRC16 mismatch (stored {stored:#06x} != calculated {computed:#06x})")
            }
            ProvisioningStatus::Valid { .. } => info!("CRC16 check: OK"),
        }

        Ok(record)
    }

    /// Burn `serial`, `hw_rev` and `flags` plus their CRC, at most once.
    ///
    /// Safe to call on every boot: returns
    /// [`ProgramOutcome::AlreadyProvisioned`] without writing when a valid
    /// identity is present (even if it differs from the requested one), and
    /// [`ProgramOutcome::NothingToBurn`] when all requested bits are set.
    ///
    /// # Errors
    /// - [`ProvisionError::Conflict`] if any field would need a bit cleared.
    ///   Retrying with the same input fails the same way.
    /// - [`ProvisionError::Read`], [`ProvisionError::Stage`] and
    ///   [`ProvisionError::Batch`] from the store. A staging error cancels the
    ///   batch so nothing is burned.
    pub fn program(
        &mut self,
        serial: &str,
        hw_rev: u16,
        flags: u32,
    ) -> Result<ProgramOutcome, ProvisionError<S::Error>> {
        self.gates.clear();

        let desired = ProvisioningPayload::new(serial, hw_rev, flags).ok_or(
            ProvisionError::SerialTooLong {
                len: serial.len(),
            },
        )?;

        let current = self.read_image()?;
        let record = ProvisioningRecord::from_image(&current);
        if !self.gates.record(
            GateId::NotProvisioned,
            !matches!(record.status(), ProvisioningStatus::Valid { .. }),
        ) {
            if record.payload != desired {
                warn!(
                    "Device already provisioned as '{}' (HW_REV {:#06x}); requested identity ignored",
                    record.serial(),
                    record.hw_rev()
                );
            }
            info!("Device already provisioned (CRC OK). Skipping eFuse programming.");
            return Ok(ProgramOutcome::AlreadyProvisioned {
                crc: record.stored_crc,
            });
        }

        let desired_crc = desired.crc16();
        let target = desired.sealed_image();

        for field in EfuseField::ALL {
            let cur = current.field(field);
            let want = target.field(field);
            if let Some(byte) = first_conflict(cur, want) {
                self.gates.record(GateId::NoConflict, false);
                error!(
                    "{} conflict: would require clearing bits at byte {} ({:#04x} -> {:#04x})",
                    field.name(),
                    byte,
                    cur[byte],
                    want[byte]
                );
                return Err(ProvisionError::Conflict {
                    field: field.name(),
                    byte,
                    current: cur[byte],
                    desired: want[byte],
                });
            }
        }
        self.gates.record(GateId::NoConflict, true);

        let mut deltas = [[0u8; MAX_FIELD_BYTES]; EfuseField::ALL.len()];
        let mut pending = [false; EfuseField::ALL.len()];
        for (i, field) in EfuseField::ALL.into_iter().enumerate() {
            let delta = &mut deltas[i][..field.byte_len()];
            pending[i] = stage_delta(current.field(field), target.field(field), delta);
        }

        if !self.gates.record(GateId::PendingBits, pending.contains(&true)) {
            info!("No new bits to program. Skipping commit.");
            return Ok(ProgramOutcome::NothingToBurn);
        }

        self.store.begin_batch().map_err(|cause| {
            error!("Starting eFuse batch failed: {:?}", cause);
            ProvisionError::Batch {
                step: "begin",
                cause,
            }
        })?;

        let mut fields = 0u8;
        for (i, field) in EfuseField::ALL.into_iter().enumerate() {
            if !pending[i] {
                debug!("{}: no new bits, not staged", field.name());
                continue;
            }
            if let Err(cause) = self
                .store
                .write_field(field, &deltas[i][..field.byte_len()])
            {
                error!("Staging {} failed: {:?}; cancelling batch", field.name(), cause);
                if let Err(cancel) = self.store.cancel_batch() {
                    error!("Cancelling eFuse batch failed: {:?}", cancel);
                }
                return Err(ProvisionError::Stage {
                    field: field.name(),
                    cause,
                });
            }
            fields += 1;
        }

        self.store.commit_batch().map_err(|cause| {
            error!("Burning staged eFuse bits failed: {:?}", cause);
            ProvisionError::Batch {
                step: "commit",
                cause,
            }
        })?;

        info!("Provisioning committed (CRC16={desired_crc:#06x}, {fields} field(s) written)");
        Ok(ProgramOutcome::Committed {
            crc: desired_crc,
            fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::efuse::virtual_efuse::{FaultPlan, VirtualEfuse, VirtualEfuseError};

    const SERIAL: &str = "SN-ESP32S3-0001";
    const HW_REV: u16 = 0x0001;
    const FLAGS: u32 = 0x0000_000F;

    fn blank() -> Provisioner<VirtualEfuse> {
        Provisioner::new(VirtualEfuse::new())
    }

    /// No bit set in `before` may be missing from `after`
    fn assert_monotonic(before: &FieldImage, after: &FieldImage) {
        for (b, a) in before.0.iter().zip(after.0.iter()) {
            assert_eq!(b & !a, 0, "bit cleared: {b:#04x} -> {a:#04x}");
        }
    }

    #[test]
    fn test_blank_device_is_not_provisioned() {
        let mut prov = blank();
        let check = prov.is_provisioned().unwrap();
        assert_eq!(
            check,
            ProvisionCheck {
                provisioned: false,
                crc_ok: false
            }
        );
        assert_eq!(prov.read_fields().unwrap().status(), ProvisioningStatus::Blank);
    }

    #[test]
    fn test_program_blank_device() {
        let mut prov = blank();
        let outcome = prov.program(SERIAL, HW_REV, FLAGS).unwrap();

        assert_eq!(outcome, ProgramOutcome::Committed { crc: 0x3305, fields: 4 });
        assert!(prov.last_gates().all_passed());

        let record = prov.read_fields().unwrap();
        assert_eq!(record.serial(), SERIAL);
        assert_eq!(record.hw_rev(), HW_REV);
        assert_eq!(record.feature_flags(), FLAGS);
        assert_eq!(record.stored_crc, 0x3305);
        assert_eq!(
            prov.is_provisioned().unwrap(),
            ProvisionCheck {
                provisioned: true,
                crc_ok: true
            }
        );
    }

    #[test]
    fn test_program_is_idempotent() {
        let mut prov = blank();
        prov.program(SERIAL, HW_REV, FLAGS).unwrap();
        let first = *prov.store().burned();
        prov.store_mut().reset_stats();

        let outcome = prov.program(SERIAL, HW_REV, FLAGS).unwrap();

        assert_eq!(outcome, ProgramOutcome::AlreadyProvisioned { crc: 0x3305 });
        assert!(!outcome.burned());
        assert_eq!(prov.store().burned(), &first);
        let stats = prov.store().stats();
        assert_eq!(stats.writes, 0);
        assert_eq!(stats.batches_begun, 0);
        assert_eq!(prov.last_gates().blocked_by(), Some(GateId::NotProvisioned));
    }

    #[test]
    fn test_provisioned_device_ignores_different_identity() {
        let mut prov = blank();
        prov.program(SERIAL, HW_REV, FLAGS).unwrap();

        let outcome = prov.program("SN-OTHER", 0x0002, 0xFF).unwrap();
        assert_eq!(outcome, ProgramOutcome::AlreadyProvisioned { crc: 0x3305 });
        assert_eq!(prov.read_fields().unwrap().serial(), SERIAL);
    }

    #[test]
    fn test_conflict_refused_before_staging() {
        // HW_REV low byte already has 0b1010_0000 burned, request wants 0b0000_1111
        let mut image = FieldImage::BLANK;
        image.field_mut(EfuseField::HwRev)[0] = 0b1010_0000;
        let mut prov = Provisioner::new(VirtualEfuse::with_image(image));

        let err = prov.program(SERIAL, 0x000F, FLAGS).unwrap_err();
        match err {
            ProvisionError::Conflict {
                field,
                byte,
                current,
                desired,
            } => {
                assert_eq!(field, "HW_REV");
                assert_eq!(byte, 0);
                assert_eq!(current, 0xA0);
                assert_eq!(desired, 0x0F);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(prov.store().burned(), &image);
        assert_eq!(prov.store().stats().batches_begun, 0);
        assert_eq!(prov.last_gates().blocked_by(), Some(GateId::NoConflict));
    }

    #[test]
    fn test_conflict_on_stale_crc_field() {
        // A half-provisioned device: payload matches, but a wrong CRC bit is burned
        let desired = ProvisioningPayload::new(SERIAL, HW_REV, FLAGS).unwrap();
        let mut image = desired.sealed_image();
        image.field_mut(EfuseField::ProvisioningCrc16).copy_from_slice(&[0x02, 0x00]);
        let mut prov = Provisioner::new(VirtualEfuse::with_image(image));

        let err = prov.program(SERIAL, HW_REV, FLAGS).unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Conflict {
                field: "PROVISIONING_CRC16",
                byte: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_partial_provisioning_stages_only_missing_bits() {
        // Serial and HW_REV made it, flags and CRC did not
        let desired = ProvisioningPayload::new(SERIAL, HW_REV, FLAGS).unwrap();
        let mut image = FieldImage::BLANK;
        image.0[..18].copy_from_slice(&desired.as_bytes()[..18]);
        let mut prov = Provisioner::new(VirtualEfuse::with_image(image));

        let outcome = prov.program(SERIAL, HW_REV, FLAGS).unwrap();

        // Re-staging the serial would have tripped RepeatedProgramming
        assert_eq!(outcome, ProgramOutcome::Committed { crc: 0x3305, fields: 2 });
        assert_eq!(prov.store().burned(), &desired.sealed_image());
    }

    #[test]
    fn test_staging_failure_cancels_batch() {
        let mut efuse = VirtualEfuse::new();
        efuse.inject(FaultPlan {
            fail_write: Some(EfuseField::FeatureFlags),
            ..FaultPlan::default()
        });
        let mut prov = Provisioner::new(efuse);

        let err = prov.program(SERIAL, HW_REV, FLAGS).unwrap_err();

        assert!(matches!(
            err,
            ProvisionError::Stage {
                field: "FEATURE_FLAGS",
                cause: VirtualEfuseError::WriteFault { .. }
            }
        ));
        // SERIAL_NUMBER and HW_REV were staged before the failure, none burned
        assert_eq!(prov.store().burned(), &FieldImage::BLANK);
        assert!(!prov.store().batch_open());
        assert_eq!(prov.store().stats().cancels, 1);
    }

    #[test]
    fn test_commit_failure_is_propagated() {
        let mut efuse = VirtualEfuse::new();
        efuse.inject(FaultPlan {
            fail_commit: true,
            ..FaultPlan::default()
        });
        let mut prov = Provisioner::new(efuse);

        let err = prov.program(SERIAL, HW_REV, FLAGS).unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Batch {
                step: "commit",
                cause: VirtualEfuseError::CommitFault
            }
        ));
        assert_eq!(prov.store().burned(), &FieldImage::BLANK);
    }

    #[test]
    fn test_read_failure_is_propagated() {
        let mut efuse = VirtualEfuse::new();
        efuse.inject(FaultPlan {
            fail_read: Some(EfuseField::HwRev),
            ..FaultPlan::default()
        });
        let mut prov = Provisioner::new(efuse);

        assert!(matches!(
            prov.read_fields(),
            Err(ProvisionError::Read {
                field: "HW_REV",
                ..
            })
        ));
        assert!(matches!(
            prov.program(SERIAL, HW_REV, FLAGS),
            Err(ProvisionError::Read { .. })
        ));
        assert_eq!(prov.store().stats().writes, 0);
    }

    #[test]
    fn test_serial_too_long() {
        let mut prov = blank();
        assert!(matches!(
            prov.program("SN-ESP32S3-0001-EXTRA", HW_REV, FLAGS),
            Err(ProvisionError::SerialTooLong { len: 21 })
        ));
        assert_eq!(prov.store().stats().reads, 0);
    }

    #[test]
    fn test_program_sequence_never_clears_bits() {
        let requests: [(&str, u16, u32); 5] = [
            ("SN-A", 0x0001, 0x0000_0001),
            ("SN-A", 0x0003, 0x0000_0003),
            ("SN-B", 0x0001, 0x0000_0001),
            (SERIAL, HW_REV, FLAGS),
            ("", 0, 0),
        ];

        let mut prov = blank();
        let mut history = alloc::vec::Vec::new();
        history.push(*prov.store().burned());

        for (serial, hw_rev, flags) in requests {
            // Outcome does not matter, only that burned bits never disappear
            let _ = prov.program(serial, hw_rev, flags);
            history.push(*prov.store().burned());
        }

        for (i, earlier) in history.iter().enumerate() {
            for later in &history[i..] {
                assert_monotonic(earlier, later);
            }
        }
    }
}
