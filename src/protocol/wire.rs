//! Framing primitives: big-endian `i32` length + body.

use std::io::{Read, Write};

use crate::error::{Error, Result};

/// Reads one frame, rejecting bodies larger than `max_size`.
pub fn read_frame(stream: &mut impl Read, max_size: usize) -> Result<Vec<u8>> {
    let mut header = [0u8; 4];
    stream
        .read_exact(&mut header)
        .map_err(|e| Error::Io(format!("connection closed while reading header: {e}")))?;
    let len = i32::from_be_bytes(header);
    if len < 0 {
        return Err(Error::Io(format!("negative frame length {len}")));
    }
    let len = len as usize;
    if len > max_size {
        return Err(Error::Resource(format!(
            "frame of {len} bytes exceeds the limit of {max_size}"
        )));
    }
    let mut body = vec![0u8; len];
    stream
        .read_exact(&mut body)
        .map_err(|e| Error::Io(format!("connection closed while reading body: {e}")))?;
    Ok(body)
}

pub fn write_frame(stream: &mut impl Write, body: &[u8]) -> Result<()> {
    if body.len() > i32::MAX as usize {
        return Err(Error::Resource(format!(
            "frame of {} bytes cannot be framed",
            body.len()
        )));
    }
    stream.write_all(&(body.len() as i32).to_be_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

pub fn read_string(stream: &mut impl Read, max_size: usize) -> Result<String> {
    let body = read_frame(stream, max_size)?;
    String::from_utf8(body).map_err(|e| Error::Io(format!("frame is not UTF-8: {e}")))
}

pub fn write_string(stream: &mut impl Write, value: &str) -> Result<()> {
    write_frame(stream, value.as_bytes())
}

pub fn read_json(stream: &mut impl Read, max_size: usize) -> Result<serde_json::Value> {
    let body = read_frame(stream, max_size)?;
    serde_json::from_slice(&body).map_err(Into::into)
}

pub fn write_json(stream: &mut impl Write, value: &serde_json::Value) -> Result<()> {
    let body =
        serde_json::to_vec(value).map_err(|e| Error::Internal(format!("unserializable reply: {e}")))?;
    write_frame(stream, &body)
}

/// Reads a float-column payload: a frame of little-endian `f64` values.
pub fn read_floats(stream: &mut impl Read, max_size: usize) -> Result<Vec<f64>> {
    let body = read_frame(stream, max_size)?;
    if body.len() % 8 != 0 {
        return Err(Error::InvalidArgument(format!(
            "float payload of {} bytes is not a multiple of 8",
            body.len()
        )));
    }
    Ok(body
        .chunks_exact(8)
        .map(|c| f64::from_le_bytes(c.try_into().expect("chunk of 8")))
        .collect())
}

pub fn write_floats(stream: &mut impl Write, values: &[f64]) -> Result<()> {
    let mut body = Vec::with_capacity(values.len() * 8);
    for v in values {
        body.extend_from_slice(&v.to_le_bytes());
    }
    write_frame(stream, &body)
}

/// Reads a string-column payload: a frame holding a JSON array of strings,
/// null entries allowed.
pub fn read_string_column(stream: &mut impl Read, max_size: usize) -> Result<Vec<Option<String>>> {
    let value = read_json(stream, max_size)?;
    serde_json::from_value(value)
        .map_err(|e| Error::InvalidArgument(format!("malformed string column payload: {e}")))
}

pub fn write_string_column(stream: &mut impl Write, values: &[Option<String>]) -> Result<()> {
    let body = serde_json::to_vec(values)
        .map_err(|e| Error::Internal(format!("unserializable string column: {e}")))?;
    write_frame(stream, &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frame_roundtrip() {
        let mut buffer = Vec::new();
        write_string(&mut buffer, "Success!").unwrap();
        let mut cursor = Cursor::new(buffer);
        assert_eq!(read_string(&mut cursor, 1024).unwrap(), "Success!");
    }

    #[test]
    fn test_floats_roundtrip() {
        let mut buffer = Vec::new();
        write_floats(&mut buffer, &[1.5, f64::NAN, -3.0]).unwrap();
        let mut cursor = Cursor::new(buffer);
        let back = read_floats(&mut cursor, 1024).unwrap();
        assert_eq!(back[0], 1.5);
        assert!(back[1].is_nan());
        assert_eq!(back[2], -3.0);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut buffer = Vec::new();
        write_string(&mut buffer, "0123456789").unwrap();
        let mut cursor = Cursor::new(buffer);
        let err = read_frame(&mut cursor, 4).unwrap_err();
        assert_eq!(err.tag(), "Resource");
    }

    #[test]
    fn test_negative_length_rejected() {
        let mut cursor = Cursor::new((-1i32).to_be_bytes().to_vec());
        let err = read_frame(&mut cursor, 1024).unwrap_err();
        assert_eq!(err.tag(), "Io");
    }

    #[test]
    fn test_string_column_roundtrip() {
        let mut buffer = Vec::new();
        write_string_column(
            &mut buffer,
            &[Some("a".to_string()), None, Some("b".to_string())],
        )
        .unwrap();
        let mut cursor = Cursor::new(buffer);
        let back = read_string_column(&mut cursor, 1024).unwrap();
        assert_eq!(back.len(), 3);
        assert!(back[1].is_none());
    }
}
