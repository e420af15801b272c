// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2022 Adrian <adrian.eddy at gmail>

use std::io::{ Read, Seek, SeekFrom, Result };
use byteorder::{ ReadBytesExt, BigEndian };
use crate::{ fourcc, read_box_header, typ_to_str, BoxHeader };

pub const MOVIE_BOX: u32 = fourcc("moov");
pub const GPS_DESCRIPTOR_BOX: u32 = fourcc("gps ");

/// Box header plus version/flags and an unknown word before the first entry
pub const DESCRIPTOR_HEADER_SIZE: u64 = 16;
pub const INDEX_ENTRY_SIZE: u64 = 8;

/// Location of the `moov/gps ` box
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBox {
    pub position: u64,
    pub size: u64,
}

/// One raw GPS record somewhere in the file. Ordered by position first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChunkIndexEntry {
    pub position: u32,
    pub length: u32,
}

/// Walks the top level boxes until `moov`, then looks for `gps ` among its direct children.
/// A zero box size ends the walk.
pub fn find_gps_descriptor<R: Read + Seek>(d: &mut R) -> Option<DescriptorBox> {
    let mut offs = 0u64;
    while let Some(header) = read_box_header(d, offs) {
        if header.size == 0 { break; }
        log::debug!("Reading {}, offset: {offs}, size: {}", typ_to_str(header.typ), header.size);
        if header.typ == MOVIE_BOX {
            log::debug!("Found moov box...");
            return find_in_movie_box(d, &header);
        }
        offs = offs.checked_add(header.size)?;
    }
    None
}

fn find_in_movie_box<R: Read + Seek>(d: &mut R, moov: &BoxHeader) -> Option<DescriptorBox> {
    let end = moov.position.saturating_add(moov.size);
    let mut offs = moov.position + moov.header_size;
    while offs < end {
        let Some(child) = read_box_header(d, offs) else { break; };
        if child.size == 0 { break; }
        log::debug!("Reading moov/{}, offset: {offs}, size: {}", typ_to_str(child.typ), child.size);
        if child.typ == GPS_DESCRIPTOR_BOX {
            log::info!("Found gps chunk descriptor box at {offs}");
            return Some(DescriptorBox { position: offs, size: child.size });
        }
        offs = offs.checked_add(child.size)?;
    }
    None
}

/// Reads the (position, length) pairs of the descriptor box. Stops early if the file ends.
pub fn read_chunk_index<R: Read + Seek>(d: &mut R, descriptor: &DescriptorBox) -> Vec<ChunkIndexEntry> {
    let end = descriptor.position.saturating_add(descriptor.size);
    let mut offs = descriptor.position + DESCRIPTOR_HEADER_SIZE;
    let mut entries = Vec::new();
    while offs < end {
        match read_entry(d, offs) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                log::warn!("GPS chunk index ends early at {offs}: {e}");
                break;
            }
        }
        offs += INDEX_ENTRY_SIZE;
    }
    log::debug!("Read {} GPS chunk index entries", entries.len());
    entries
}

fn read_entry<R: Read + Seek>(d: &mut R, offs: u64) -> Result<ChunkIndexEntry> {
    d.seek(SeekFrom::Start(offs))?;
    Ok(ChunkIndexEntry {
        position: d.read_u32::<BigEndian>()?,
        length: d.read_u32::<BigEndian>()?,
    })
}
