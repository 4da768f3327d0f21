//! Ring placement of nameservice keys.
//!
//! Nameservice entries are assigned to superpeers by the CRC16 of their
//! application id, independent of the probing hash used inside the table.

use crate::node::NodeId;
use crc::{Crc, CRC_16_IBM_3740};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// CRC16 of the big-endian bytes of `key`.
#[inline]
pub fn crc16(key: i32) -> u16 {
    CRC16.checksum(&key.to_be_bytes())
}

/// Ring position of a nameservice key, usable with the interval helpers.
#[inline]
pub fn nameservice_position(key: i32) -> NodeId {
    NodeId(crc16(key))
}
