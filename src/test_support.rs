// SPDX-License-Identifier: MIT OR Apache-2.0

// Builders for synthetic Novatek-style files used by the unit tests.

use byteorder::{ BigEndian, LittleEndian, WriteBytesExt };

#[derive(Clone, Debug)]
pub struct Fix {
    /// hour, minute, second, year (since 2000), month, day
    pub time: [u32; 6],
    pub active: u8,
    pub lat_ref: u8,
    pub lon_ref: u8,
    pub latitude: f32,
    pub longitude: f32,
    pub speed: f32,
    pub heading: Option<f32>,
}

impl Default for Fix {
    fn default() -> Self {
        Self {
            time: [10, 15, 30, 21, 5, 21],
            active: b'A',
            lat_ref: b'N',
            lon_ref: b'W',
            latitude: 3723.2475,
            longitude: 12158.3416,
            speed: 10.0,
            heading: None,
        }
    }
}

pub fn boxed(typ: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.write_u32::<BigEndian>(8 + payload.len() as u32).unwrap();
    out.extend_from_slice(typ);
    out.extend_from_slice(payload);
    out
}

/// One raw `free`/`GPS ` record with the fields at `field_offset`.
pub fn record(fix: &Fix, discriminator: u32, field_offset: usize) -> Vec<u8> {
    let len = field_offset + 44 + 16;
    let mut out = Vec::with_capacity(len);
    out.write_u32::<BigEndian>(len as u32).unwrap();
    out.extend_from_slice(b"freeGPS ");
    out.write_u32::<LittleEndian>(discriminator).unwrap();
    out.resize(field_offset, 0);
    for x in fix.time { out.write_u32::<LittleEndian>(x).unwrap(); }
    out.extend_from_slice(&[fix.active, fix.lat_ref, fix.lon_ref, 0]);
    out.write_f32::<LittleEndian>(fix.latitude).unwrap();
    out.write_f32::<LittleEndian>(fix.longitude).unwrap();
    out.write_f32::<LittleEndian>(fix.speed).unwrap();
    out.write_f32::<LittleEndian>(fix.heading.unwrap_or(0.0)).unwrap();
    out.resize(len, 0);
    out
}

/// `gps ` chunk descriptor box: 8 byte header, 8 bytes of version/flags, then the entries.
pub fn gps_index(entries: &[(u32, u32)]) -> Vec<u8> {
    let mut payload = vec![0u8; 8];
    for (pos, len) in entries {
        payload.write_u32::<BigEndian>(*pos).unwrap();
        payload.write_u32::<BigEndian>(*len).unwrap();
    }
    boxed(b"gps ", &payload)
}

/// ftyp + mdat holding `records` + moov, with a `gps ` index in moov if `with_index`.
pub fn novatek_file(records: &[Vec<u8>], with_index: bool) -> Vec<u8> {
    let mut out = boxed(b"ftyp", b"isom\0\0\x02\0isomiso2");
    let mut entries = Vec::with_capacity(records.len());
    let mut pos = out.len() as u32 + 8;
    for r in records {
        entries.push((pos, r.len() as u32));
        pos += r.len() as u32;
    }
    out.extend(boxed(b"mdat", &records.concat()));

    let mut moov = boxed(b"mvhd", &[0u8; 100]);
    if with_index {
        moov.extend(gps_index(&entries));
    }
    moov.extend(boxed(b"udta", &[0u8; 16]));
    out.extend(boxed(b"moov", &moov));
    out
}
