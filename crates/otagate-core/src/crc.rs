//! CRC used to seal the provisioning payload.

use crc::{CRC_16_IBM_3740, Crc};

/// CRC-16/CCITT-FALSE: poly 0x1021, init 0xFFFF, no reflection, xorout 0.
///
/// The `crc` crate catalogues this parameter set as `CRC_16_IBM_3740`.
const CCITT_FALSE: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Compute CRC-16/CCITT-FALSE over `data`.
pub fn crc16_ccitt_false(data: &[u8]) -> u16 {
    CCITT_FALSE.checksum(data)
}
