//! One-time-programmable device identity.
//!
//! [`field`] describes the custom USER_DATA fields and the bit algebra,
//! [`payload`] the CRC-sealed identity, [`store`] the hardware seam,
//! [`virtual_efuse`] an in-memory backend, [`persistent`] its write-through
//! wrapper for non-volatile storage and [`provisioner`] the idempotent
//! program/verify flow on top of them.

pub mod field;
pub mod payload;
pub mod persistent;
pub mod provisioner;
pub mod store;
pub mod virtual_efuse;

pub use field::{EfuseField, FieldImage, bit_conflict, first_conflict, stage_delta};
pub use payload::ProvisioningPayload;
pub use persistent::{PersistentEfuse, PersistentEfuseError, decode_record, encode_record};
pub use provisioner::{
    ProgramOutcome, ProvisionCheck, ProvisionError, Provisioner, ProvisioningRecord,
    ProvisioningStatus,
};
pub use store::EfuseStore;
pub use virtual_efuse::{EfuseStats, FaultPlan, VirtualEfuse, VirtualEfuseError};
