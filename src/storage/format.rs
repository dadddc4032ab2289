//! Byte layout of cluster blocks and of the global index file.
//!
//! A cluster block, before compression, is a run of tagged frames:
//!
//! ```text
//! RECORD_TAG <bincode TaggedRecord>   (owned records, then duplicates)
//! ...
//! INDEX_TAG  <bincode PersistedSubIndex> | END_TAG
//! ```
//!
//! The index file is `GCIX`, a little-endian `u32` format version and a
//! bincode body holding the schema and the entry list.

use crate::cluster::indexed::PersistedSubIndex;
use crate::error::{ClusterError, Result};
use bytes::{BufMut, BytesMut};
use geocluster_types::{ClusterSchema, TaggedRecord};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use super::index::GlobalIndexEntry;

pub const INDEX_FILE_NAME: &str = "cluster.idx";
pub const PARTITION_EXTENSION: &str = "part";

pub const INDEX_MAGIC: &[u8; 4] = b"GCIX";
pub const FORMAT_VERSION: u32 = 1;

pub const RECORD_TAG: u8 = 0x01;
pub const INDEX_TAG: u8 = 0x02;
pub const END_TAG: u8 = 0x03;

pub fn encode_record(buf: &mut BytesMut, record: &TaggedRecord) -> Result<()> {
    buf.put_u8(RECORD_TAG);
    bincode::serialize_into(buf.writer(), record)?;
    Ok(())
}

pub fn encode_sub_index(buf: &mut BytesMut, index: &PersistedSubIndex) -> Result<()> {
    buf.put_u8(INDEX_TAG);
    bincode::serialize_into(buf.writer(), index)?;
    Ok(())
}

pub fn encode_end(buf: &mut BytesMut) {
    buf.put_u8(END_TAG);
}

/// Decoded content of a cluster block.
#[derive(Debug, Default)]
pub struct DecodedBlock {
    pub records: Vec<TaggedRecord>,
    pub sub_index: Option<PersistedSubIndex>,
}

/// Decode the frames of an uncompressed cluster block.
///
/// With `limit`, decoding stops after that many records and the trailer is
/// not read.
pub fn decode_block<R: Read>(mut reader: R, limit: Option<usize>) -> Result<DecodedBlock> {
    let mut block = DecodedBlock::default();
    loop {
        if limit.is_some_and(|max| block.records.len() >= max) {
            return Ok(block);
        }
        let mut tag = [0u8; 1];
        reader.read_exact(&mut tag)?;
        match tag[0] {
            RECORD_TAG => block.records.push(bincode::deserialize_from(&mut reader)?),
            INDEX_TAG => {
                block.sub_index = Some(bincode::deserialize_from(&mut reader)?);
                return Ok(block);
            }
            END_TAG => return Ok(block),
            other => {
                return Err(ClusterError::InvalidFormat(format!(
                    "unknown frame tag 0x{other:02x}"
                )));
            }
        }
    }
}

#[derive(Serialize)]
struct IndexBodyRef<'a> {
    schema: &'a ClusterSchema,
    entries: &'a [GlobalIndexEntry],
}

#[derive(Deserialize)]
pub(crate) struct IndexBody {
    pub schema: ClusterSchema,
    pub entries: Vec<GlobalIndexEntry>,
}

pub(crate) fn write_index_body<W: Write>(
    mut writer: W,
    schema: &ClusterSchema,
    entries: &[GlobalIndexEntry],
) -> Result<()> {
    writer.write_all(INDEX_MAGIC)?;
    writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
    bincode::serialize_into(&mut writer, &IndexBodyRef { schema, entries })?;
    writer.flush()?;
    Ok(())
}

pub(crate) fn read_index_body<R: Read>(mut reader: R) -> Result<IndexBody> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != INDEX_MAGIC {
        return Err(ClusterError::InvalidFormat(format!(
            "bad index magic: {magic:?}"
        )));
    }
    let mut version = [0u8; 4];
    reader.read_exact(&mut version)?;
    let version = u32::from_le_bytes(version);
    if version != FORMAT_VERSION {
        return Err(ClusterError::InvalidFormat(format!(
            "unsupported index version: {version}"
        )));
    }
    Ok(bincode::deserialize_from(reader)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geocluster_types::{Envelope, Record, Value};

    fn tagged(id: i64) -> TaggedRecord {
        TaggedRecord::new(
            Envelope::from_point(id as f64, 1.0),
            Record::new(vec![Value::Long(id), Value::String(format!("r{id}"))]),
        )
    }

    #[test]
    fn test_decode_stops_at_limit() {
        let mut buf = BytesMut::new();
        for id in 0..5 {
            encode_record(&mut buf, &tagged(id)).unwrap();
        }
        encode_end(&mut buf);

        let all = decode_block(&buf[..], None).unwrap();
        assert_eq!(all.records.len(), 5);
        assert!(all.sub_index.is_none());

        let head = decode_block(&buf[..], Some(2)).unwrap();
        assert_eq!(head.records, vec![tagged(0), tagged(1)]);
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let buf = [0x7fu8, 0, 0];
        assert!(matches!(
            decode_block(&buf[..], None),
            Err(ClusterError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_truncated_block_is_an_error() {
        let mut buf = BytesMut::new();
        encode_record(&mut buf, &tagged(7)).unwrap();
        let cut = buf.len() - 3;
        assert!(decode_block(&buf[..cut], None).is_err());
    }

    #[test]
    fn test_index_header_is_checked() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"NOPE");
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        assert!(matches!(
            read_index_body(&bytes[..]),
            Err(ClusterError::InvalidFormat(_))
        ));
    }
}
