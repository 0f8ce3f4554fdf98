//! The CRC-sealed identity payload.

use super::field::{EfuseField, FieldImage, PAYLOAD_LEN};
use crate::crc::crc16_ccitt_false;

/// Bytes reserved for the ASCII serial number
pub const SERIAL_LEN: usize = 16;

/// Serial number, hardware revision and feature flags in storage layout.
///
/// Binary format (little-endian):
/// - serial: 16 bytes, ASCII, zero padded
/// - hw_rev: 2 bytes (u16)
/// - feature_flags: 4 bytes (u32)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisioningPayload {
    bytes: [u8; PAYLOAD_LEN],
}

impl ProvisioningPayload {
    /// Build the payload, or `None` if `serial` does not fit in 16 bytes.
    pub fn new(serial: &str, hw_rev: u16, flags: u32) -> Option<Self> {
        let serial = serial.as_bytes();
        if serial.len() > SERIAL_LEN {
            return None;
        }

        let mut bytes = [0u8; PAYLOAD_LEN];
        bytes[..serial.len()].copy_from_slice(serial);
        bytes[EfuseField::HwRev.image_range()].copy_from_slice(&hw_rev.to_le_bytes());
        bytes[EfuseField::FeatureFlags.image_range()].copy_from_slice(&flags.to_le_bytes());

        Some(Self { bytes })
    }

    pub const fn from_bytes(bytes: [u8; PAYLOAD_LEN]) -> Self {
        Self { bytes }
    }

    pub fn from_image(image: &FieldImage) -> Self {
        Self::from_bytes(image.payload())
    }

    pub const fn as_bytes(&self) -> &[u8; PAYLOAD_LEN] {
        &self.bytes
    }

    pub fn serial_bytes(&self) -> &[u8] {
        &self.bytes[EfuseField::SerialNumber.image_range()]
    }

    /// Serial up to the first NUL, or `"<non-utf8>"` for garbage
    pub fn serial(&self) -> &str {
        let raw = self.serial_bytes();
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        core::str::from_utf8(&raw[..end]).unwrap_or("<non-utf8>")
    }

    pub fn hw_rev(&self) -> u16 {
        let b = &self.bytes[EfuseField::HwRev.image_range()];
        u16::from_le_bytes([b[0], b[1]])
    }

    pub fn feature_flags(&self) -> u32 {
        let b = &self.bytes[EfuseField::FeatureFlags.image_range()];
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    pub fn crc16(&self) -> u16 {
        crc16_ccitt_false(&self.bytes)
    }

    /// The complete field image this payload seals, CRC included
    pub fn sealed_image(&self) -> FieldImage {
        let mut image = FieldImage::BLANK;
        image.0[..PAYLOAD_LEN].copy_from_slice(&self.bytes);
        image
            .field_mut(EfuseField::ProvisioningCrc16)
            .copy_from_slice(&self.crc16().to_le_bytes());
        image
    }
}
