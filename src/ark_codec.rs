//! Binary Kaldi ark records: `<id> \0BFM `, tagged i32 rows and cols, row-major f32 LE payload.

use std::io::{self, BufRead, Read, Write};

use ndarray::{Array2, ArrayView2};

use crate::error::{FeedError, Result};

const HEADER: &[u8; 5] = b"\0BFM ";

/// Size tag Kaldi writes before each dimension.
const INT32_TAG: u8 = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub id: String,
    pub matrix: Array2<f32>,
}

/// Read the next record.
///
/// Returns `Ok(None)` when the stream ends before the first id byte, which is how a chunk ends.
pub fn read_utterance<R: BufRead>(reader: &mut R) -> Result<Option<Utterance>> {
    let mut id = Vec::new();
    let n = reader
        .read_until(b' ', &mut id)
        .map_err(|e| FeedError::io("reading utterance id", e))?;
    if n == 0 {
        return Ok(None);
    }
    if id.pop() != Some(b' ') {
        return Err(FeedError::CorruptRecord(format!(
            "stream ended inside utterance id {:?}",
            String::from_utf8_lossy(&id)
        )));
    }
    let id = String::from_utf8(id)
        .map_err(|e| FeedError::CorruptRecord(format!("utterance id is not utf-8: {e}")))?;
    if id.is_empty() {
        return Err(FeedError::CorruptRecord("empty utterance id".to_string()));
    }

    let mut header = [0u8; 5];
    read_field(reader, &mut header, &id, "header")?;
    let rows = read_dim(reader, &id, "row count")?;
    let cols = read_dim(reader, &id, "column count")?;

    let len = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| FeedError::CorruptRecord(format!("{id}: {rows}x{cols} overflows")))?;
    // Grow only as far as the stream actually delivers; the dims are untrusted.
    let mut payload = Vec::new();
    reader
        .by_ref()
        .take(len as u64)
        .read_to_end(&mut payload)
        .map_err(|e| FeedError::io(format!("reading matrix payload of {id}"), e))?;
    if payload.len() != len {
        return Err(FeedError::CorruptRecord(format!(
            "{id}: truncated matrix payload, {} of {len} bytes",
            payload.len()
        )));
    }
    let values = payload
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect::<Vec<_>>();
    let matrix = Array2::from_shape_vec((rows, cols), values)?;

    Ok(Some(Utterance { id, matrix }))
}

/// Write one record in the layout [`read_utterance`] expects.
pub fn write_utterance<W: Write>(
    writer: &mut W,
    id: &str,
    matrix: ArrayView2<'_, f32>,
) -> Result<()> {
    if id.is_empty() || id.bytes().any(|b| b.is_ascii_whitespace()) {
        return Err(FeedError::InvalidUtteranceId(id.to_string()));
    }
    let (rows, cols) = matrix.dim();
    let too_large =
        || FeedError::CorruptRecord(format!("{id}: {rows}x{cols} exceeds i32 dimensions"));
    let rows = i32::try_from(rows).map_err(|_| too_large())?;
    let cols = i32::try_from(cols).map_err(|_| too_large())?;

    let mut buf = Vec::with_capacity(id.len() + 16 + matrix.len() * 4);
    buf.extend_from_slice(id.as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(HEADER);
    buf.push(INT32_TAG);
    buf.extend_from_slice(&rows.to_le_bytes());
    buf.push(INT32_TAG);
    buf.extend_from_slice(&cols.to_le_bytes());
    for v in matrix.iter() {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    writer
        .write_all(&buf)
        .map_err(|e| FeedError::io(format!("writing utterance {id}"), e))
}

fn read_field<R: Read>(reader: &mut R, buf: &mut [u8], id: &str, what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            FeedError::CorruptRecord(format!("{id}: truncated {what}"))
        }
        _ => FeedError::io(format!("reading {what} of {id}"), e),
    })
}

fn read_dim<R: Read>(reader: &mut R, id: &str, what: &str) -> Result<usize> {
    let mut field = [0u8; 5];
    read_field(reader, &mut field, id, what)?;
    let value = i32::from_le_bytes([field[1], field[2], field[3], field[4]]);
    usize::try_from(value)
        .map_err(|_| FeedError::CorruptRecord(format!("{id}: negative {what} {value}")))
}
