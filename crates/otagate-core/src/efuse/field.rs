//! Custom USER_DATA eFuse fields and the bit algebra used to burn them.
//!
//! The field table mirrors the custom eFuse CSV the device is built with:
//!
//! | Field                           | Bits | Image bytes |
//! |---------------------------------|------|-------------|
//! | `USER_DATA.SERIAL_NUMBER`       | 128  | 0..16       |
//! | `USER_DATA.HW_REV`              | 16   | 16..18      |
//! | `USER_DATA.FEATURE_FLAGS`       | 32   | 18..22      |
//! | `USER_DATA.PROVISIONING_CRC16`  | 16   | 22..24      |
//!
//! Multi-byte values are little-endian. The first three fields form the
//! 22-byte provisioning payload sealed by the CRC field.

use core::ops::Range;

use serde::{Deserialize, Serialize};

/// Length of the provisioning payload (serial + hw_rev + feature flags)
pub const PAYLOAD_LEN: usize = 22;

/// Length of all four fields back to back
pub const IMAGE_LEN: usize = 24;

/// Widest field in bytes
pub const MAX_FIELD_BYTES: usize = 16;

/// One custom field in the USER_DATA block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EfuseField {
    SerialNumber,
    HwRev,
    FeatureFlags,
    ProvisioningCrc16,
}

impl EfuseField {
    /// All fields in table (and staging) order
    pub const ALL: [EfuseField; 4] = [
        Self::SerialNumber,
        Self::HwRev,
        Self::FeatureFlags,
        Self::ProvisioningCrc16,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::SerialNumber => "SERIAL_NUMBER",
            Self::HwRev => "HW_REV",
            Self::FeatureFlags => "FEATURE_FLAGS",
            Self::ProvisioningCrc16 => "PROVISIONING_CRC16",
        }
    }

    /// Fixed width in bits, never changes once the table is burned into a product line
    pub const fn bit_width(self) -> usize {
        match self {
            Self::SerialNumber => 128,
            Self::HwRev => 16,
            Self::FeatureFlags => 32,
            Self::ProvisioningCrc16 => 16,
        }
    }

    pub const fn byte_len(self) -> usize {
        self.bit_width() / 8
    }

    /// Byte offset of the field inside [`FieldImage`]
    pub const fn offset(self) -> usize {
        match self {
            Self::SerialNumber => 0,
            Self::HwRev => 16,
            Self::FeatureFlags => 18,
            Self::ProvisioningCrc16 => 22,
        }
    }

    pub const fn image_range(self) -> Range<usize> {
        self.offset()..self.offset() + self.byte_len()
    }
}

// The storage format is part of the device identity: pin it.
const _: () = {
    assert!(EfuseField::SerialNumber.byte_len() == 16);
    assert!(EfuseField::HwRev.offset() == EfuseField::SerialNumber.byte_len());
    assert!(
        EfuseField::FeatureFlags.offset()
            == EfuseField::HwRev.offset() + EfuseField::HwRev.byte_len()
    );
    assert!(
        EfuseField::ProvisioningCrc16.offset()
            == EfuseField::FeatureFlags.offset() + EfuseField::FeatureFlags.byte_len()
    );
    assert!(EfuseField::ProvisioningCrc16.offset() == PAYLOAD_LEN);
    assert!(PAYLOAD_LEN + EfuseField::ProvisioningCrc16.byte_len() == IMAGE_LEN);
};

/// Current (or desired) contents of every custom field, back to back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldImage(pub [u8; IMAGE_LEN]);

impl FieldImage {
    pub const BLANK: Self = Self([0; IMAGE_LEN]);

    pub fn field(&self, field: EfuseField) -> &[u8] {
        &self.0[field.image_range()]
    }

    pub fn field_mut(&mut self, field: EfuseField) -> &mut [u8] {
        &mut self.0[field.image_range()]
    }

    /// The CRC-sealed part of the image
    pub fn payload(&self) -> [u8; PAYLOAD_LEN] {
        let mut payload = [0u8; PAYLOAD_LEN];
        payload.copy_from_slice(&self.0[..PAYLOAD_LEN]);
        payload
    }

    pub fn stored_crc(&self) -> u16 {
        u16::from_le_bytes([self.0[PAYLOAD_LEN], self.0[PAYLOAD_LEN + 1]])
    }
}

/// Byte index of the first position where `current` has a bit set that
/// `desired` lacks, i.e. where burning `desired` would need a 1 -> 0 flip.
pub fn first_conflict(current: &[u8], desired: &[u8]) -> Option<usize> {
    debug_assert_eq!(current.len(), desired.len());
    current
        .iter()
        .zip(desired)
        .position(|(&cur, &want)| cur & !want != 0)
}

/// Whether burning `desired` over `current` would require clearing a bit.
pub fn bit_conflict(current: &[u8], desired: &[u8]) -> bool {
    first_conflict(current, desired).is_some()
}

/// Write the bits that must still go 0 -> 1 into `delta`.
///
/// Returns `true` if any bit is pending. Bits already burned are never
/// staged again, hardware rejects repeated programming.
pub fn stage_delta(current: &[u8], desired: &[u8], delta: &mut [u8]) -> bool {
    debug_assert_eq!(current.len(), desired.len());
    debug_assert_eq!(current.len(), delta.len());
    let mut pending = false;
    for ((out, &cur), &want) in delta.iter_mut().zip(current).zip(desired) {
        *out = want & !cur;
        pending |= *out != 0;
    }
    pending
}
