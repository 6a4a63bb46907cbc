//! Offset-addressed chunk I/O.
//!
//! Reads and writes are positioned with an explicit seek, so chunks may be
//! served or stored in any order. Short reads and short writes are retried
//! until the full chunk has been moved; nothing else is retried.

use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};

use crate::error::{Error, Result};

/// Read exactly `length` bytes starting at `position`.
///
/// # Errors
///
/// Returns [`Error::ReadShortfall`] if end of file is reached first. That
/// points at a truncated or concurrently modified source; the end of a
/// transfer is signalled by the transport, not by running out of data.
pub fn read_chunk<R>(handle: &mut R, position: u64, length: usize) -> Result<Vec<u8>>
where
    R: Read + Seek + ?Sized,
{
    handle.seek(SeekFrom::Start(position))?;

    let mut buf = vec![0u8; length];
    let mut filled = 0;
    while filled < length {
        match handle.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(Error::ReadShortfall {
                    position,
                    expected: length,
                    actual: filled,
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }

    Ok(buf)
}

/// Write the first `length` bytes of `data` at `position`.
///
/// # Errors
///
/// Returns [`Error::InvalidChunk`] if `data` holds fewer than `length` bytes,
/// or an I/O error if seeking or writing fails.
pub fn write_chunk<W>(handle: &mut W, data: &[u8], position: u64, length: usize) -> Result<()>
where
    W: Write + Seek + ?Sized,
{
    let Some(data) = data.get(..length) else {
        return Err(Error::InvalidChunk(format!(
            "{length} bytes requested but only {} supplied",
            data.len()
        )));
    };

    handle.seek(SeekFrom::Start(position))?;

    let mut written = 0;
    while written < length {
        match handle.write(&data[written..]) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    ErrorKind::WriteZero,
                    format!("wrote {written} of {length} bytes at offset {position}"),
                )
                .into());
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}
