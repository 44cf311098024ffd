//! Stored-print object model (§4.9) and its wire format (§6). Persistence
//! itself — where the bytes live on disk — is [`crate::storage`]; this
//! module only knows how to serialize/deserialize the container and check
//! compatibility against an open device.

use crate::driver::DriverKind;
use crate::error::{Error, Result};

/// Which kind of payload a stored print carries. Raw prints belong to
/// primitive (on-chip matching) drivers; minutiae prints belong to imaging
/// drivers whose minutiae are extracted by an external matcher (§1: out of
/// scope here, we only carry the bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Raw = 0,
    Minutiae = 1,
}

impl DataType {
    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(DataType::Raw),
            1 => Ok(DataType::Minutiae),
            other => Err(Error::protocol(format!("unknown stored-print data type {other}"))),
        }
    }

    fn for_driver_kind(kind: DriverKind) -> Self {
        match kind {
            DriverKind::Primitive => DataType::Raw,
            DriverKind::Imaging => DataType::Minutiae,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPrint {
    pub driver_id: u16,
    pub devtype: u32,
    pub data_type: DataType,
    pub items: Vec<Vec<u8>>,
}

const HEADER_LEN: usize = 10;

impl StoredPrint {
    pub fn new(driver_id: u16, devtype: u32, data_type: DataType, items: Vec<Vec<u8>>) -> Self {
        StoredPrint {
            driver_id,
            devtype,
            data_type,
            items,
        }
    }

    /// True iff this print could have come from `driver_id`/`devtype`, and
    /// its payload tag matches the data type that `kind` of driver
    /// produces (§3/§4.9, §8 scenario 5).
    pub fn is_compatible_with(&self, driver_id: u16, devtype: u32, kind: DriverKind) -> bool {
        self.driver_id == driver_id
            && self.devtype == devtype
            && self.data_type == DataType::for_driver_kind(kind)
    }

    fn write_header(&self, magic: &[u8; 3], out: &mut Vec<u8>) {
        out.extend_from_slice(magic);
        out.extend_from_slice(&self.driver_id.to_le_bytes());
        out.extend_from_slice(&self.devtype.to_le_bytes());
        out.push(self.data_type as u8);
    }

    /// Encodes as "FP1": a single opaque blob. Panics if `items.len() != 1`
    /// — callers choose the format up front based on how many items they
    /// have, they don't get to call the wrong encoder.
    pub fn encode_fp1(&self) -> Vec<u8> {
        assert_eq!(self.items.len(), 1, "FP1 carries exactly one item");
        let mut out = Vec::with_capacity(HEADER_LEN + self.items[0].len());
        self.write_header(b"FP1", &mut out);
        out.extend_from_slice(&self.items[0]);
        out
    }

    /// Encodes as "FP2": a length-prefixed sequence of items, any count
    /// including zero or one.
    pub fn encode_fp2(&self) -> Vec<u8> {
        let payload_len: usize = self.items.iter().map(|i| 4 + i.len()).sum();
        let mut out = Vec::with_capacity(HEADER_LEN + payload_len);
        self.write_header(b"FP2", &mut out);
        for item in &self.items {
            out.extend_from_slice(&(item.len() as u32).to_le_bytes());
            out.extend_from_slice(item);
        }
        out
    }

    /// Decodes either format, detected from the 3-byte magic. Truncated
    /// FP2 length-prefixed items fail cleanly with `Error::Protocol`
    /// rather than attempting partial recovery past the last complete
    /// item (§6).
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(Error::protocol("stored print buffer shorter than header"));
        }
        let magic = &buf[0..3];
        let driver_id = u16::from_le_bytes([buf[3], buf[4]]);
        let devtype = u32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]]);
        let data_type = DataType::from_byte(buf[9])?;
        let payload = &buf[HEADER_LEN..];

        let items = match magic {
            b"FP1" => vec![payload.to_vec()],
            b"FP2" => decode_fp2_items(payload)?,
            _ => return Err(Error::protocol("unrecognised stored print magic")),
        };

        Ok(StoredPrint {
            driver_id,
            devtype,
            data_type,
            items,
        })
    }
}

fn decode_fp2_items(mut payload: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut items = Vec::new();
    while !payload.is_empty() {
        if payload.len() < 4 {
            return Err(Error::protocol("truncated FP2 item length"));
        }
        let len = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
        payload = &payload[4..];
        if len > payload.len() {
            return Err(Error::protocol("truncated FP2 item payload"));
        }
        items.push(payload[..len].to_vec());
        payload = &payload[len..];
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// §8 scenario 6: two items round-trip through FP2 with the exact byte
    /// count the spec calls out (24 bytes total).
    #[test]
    fn fp2_round_trip_matches_spec_byte_count() {
        let sp = StoredPrint::new(
            0x08ff,
            0x0000_2580,
            DataType::Minutiae,
            vec![vec![0xDE, 0xAD], vec![0xBE, 0xEF, 0xCA, 0xFE]],
        );
        let buf = sp.encode_fp2();
        assert_eq!(buf.len(), 24);
        let decoded = StoredPrint::decode(&buf).unwrap();
        assert_eq!(decoded, sp);
    }

    #[test]
    fn fp2_round_trip_with_zero_items() {
        let sp = StoredPrint::new(1, 2, DataType::Raw, vec![]);
        let buf = sp.encode_fp2();
        assert_eq!(buf.len(), HEADER_LEN);
        assert_eq!(StoredPrint::decode(&buf).unwrap(), sp);
    }

    #[test]
    fn fp1_round_trip_single_item() {
        let sp = StoredPrint::new(7, 9, DataType::Raw, vec![vec![1, 2, 3]]);
        let buf = sp.encode_fp1();
        assert_eq!(StoredPrint::decode(&buf).unwrap(), sp);
    }

    #[test]
    fn truncated_fp2_payload_fails_cleanly() {
        let sp = StoredPrint::new(1, 2, DataType::Raw, vec![vec![1, 2, 3, 4]]);
        let mut buf = sp.encode_fp2();
        buf.truncate(buf.len() - 2); // chop off part of the payload
        let err = StoredPrint::decode(&buf).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    /// §8 scenario 5: same driver_id/devtype and the data-type that
    /// matches an imaging driver is compatible; a devtype mismatch is not.
    #[test]
    fn compatibility_checks_driver_id_devtype_and_data_type() {
        let sp = StoredPrint::new(0x08ff, 0x0000_2580, DataType::Minutiae, vec![vec![0]]);
        assert!(sp.is_compatible_with(0x08ff, 0x0000_2580, DriverKind::Imaging));
        assert!(!sp.is_compatible_with(0x08ff, 0x0000_2500, DriverKind::Imaging));
        assert!(!sp.is_compatible_with(0x08ff, 0x0000_2580, DriverKind::Primitive));
    }
}
