// SPDX-License-Identifier: MIT OR Apache-2.0

use std::io::{ ErrorKind, Read, Seek, SeekFrom, Result };
use byteorder::{ ReadBytesExt, BigEndian };
use memchr::memmem;
use crate::desc_reader::ChunkIndexEntry;

/// Type and magic of a raw GPS record, as they appear on disk
pub const RAW_GPS_MAGIC: &[u8] = b"freeGPS ";
pub const SCAN_BUFFER_SIZE: usize = 1024 * 1024;

/// The record's size field sits right before the magic
const SIZE_FIELD_LEN: u64 = 4;

/// Offsets of every occurrence of `magic` in the stream, ascending.
pub fn scan_for_magic<R: Read + Seek>(reader: &mut R, magic: &[u8]) -> Result<Vec<u64>> {
    scan_with_buffer(reader, magic, SCAN_BUFFER_SIZE)
}

fn scan_with_buffer<R: Read + Seek>(reader: &mut R, magic: &[u8], buffer_size: usize) -> Result<Vec<u64>> {
    let mut matches = Vec::new();
    if magic.is_empty() { return Ok(matches); }

    let finder = memmem::Finder::new(magic);
    // Tail of the previous window carried over, so matches across a refill are not lost
    let overlap = magic.len() - 1;
    let mut buf = vec![0u8; overlap + buffer_size.max(magic.len())];
    let mut carried = 0;
    let mut base = 0u64;

    reader.seek(SeekFrom::Start(0))?;
    loop {
        let n = fill(reader, &mut buf[carried..])?;
        if n == 0 { break; }
        let filled = carried + n;
        matches.extend(finder.find_iter(&buf[..filled]).map(|m| base + m as u64));

        let keep = overlap.min(filled);
        buf.copy_within(filled - keep..filled, 0);
        base += (filled - keep) as u64;
        carried = keep;
    }
    Ok(matches)
}

fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// Candidate records for every raw GPS magic in the file. Each record starts 4 bytes
/// before its magic, and its length is the size field found there.
pub fn find_raw_records<R: Read + Seek>(reader: &mut R) -> Result<Vec<ChunkIndexEntry>> {
    let matches = scan_for_magic(reader, RAW_GPS_MAGIC)?;
    log::info!("Found {} raw GPS magic matches", matches.len());

    let mut entries = Vec::with_capacity(matches.len());
    for m in matches {
        let Some(position) = m.checked_sub(SIZE_FIELD_LEN) else {
            log::warn!("Ignoring GPS magic at {m}, no room for the size field");
            continue;
        };
        let Ok(position) = u32::try_from(position) else {
            log::warn!("Ignoring GPS magic at {m}, beyond 4 GiB");
            continue;
        };
        reader.seek(SeekFrom::Start(position as u64))?;
        let length = reader.read_u32::<BigEndian>()?;
        log::debug!("Raw GPS record candidate at {position}, size: {length}");
        entries.push(ChunkIndexEntry { position, length });
    }
    Ok(entries)
}
