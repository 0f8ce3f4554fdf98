use core::fmt::Debug;

use super::field::EfuseField;

/// Access to one-time-programmable field storage.
///
/// Writes have OR semantics: `bits` names the bits to burn, never the final
/// value. Callers must only pass bits that are still 0 (see
/// [`stage_delta`](super::stage_delta)); backends report re-programming of a
/// burned bit as an error.
///
/// Fields sharing an error-correcting block must be written inside one
/// batch: `begin_batch`, any number of `write_field`, then `commit_batch`
/// (burn everything) or `cancel_batch` (burn nothing). Calls must be
/// serialized by the caller.
pub trait EfuseStore {
    type Error: Debug;

    /// Read the field into `out`, which must be exactly `field.byte_len()` long.
    fn read_field(&mut self, field: EfuseField, out: &mut [u8]) -> Result<(), Self::Error>;

    /// Burn (or, inside a batch, stage) `bits` into the field.
    fn write_field(&mut self, field: EfuseField, bits: &[u8]) -> Result<(), Self::Error>;

    fn begin_batch(&mut self) -> Result<(), Self::Error>;

    fn commit_batch(&mut self) -> Result<(), Self::Error>;

    fn cancel_batch(&mut self) -> Result<(), Self::Error>;
}
