// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;
use std::io::{ Read, Seek, SeekFrom };
use byteorder::{ BigEndian, ByteOrder, LittleEndian, ReadBytesExt };
use crate::{ fourcc, tag_str };

/// Box type of a raw GPS record
pub const RECORD_TYPE: u32 = fourcc("free");
/// Magic following the box type
pub const RECORD_MAGIC: u32 = fourcc("GPS ");

/// 1 knot = 0.514444 m/s
pub const KNOTS_TO_MPS: f64 = 0.514444;

const DISCRIMINATOR_OFFSET: usize = 12;

/// One GPS fix, in decimal degrees and m/s
#[derive(Debug, Clone, PartialEq)]
pub struct GpsSample {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: String,
    pub speed_mps: f64,
    pub heading_deg: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SkipReason {
    ReadError,
    Truncated,
    GarbageTag,
    SanityCheckFailed,
    GarbageFields,
    NoSatelliteReception,
    CoordinateOutOfRange,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::ReadError            => "read-error",
            SkipReason::Truncated            => "truncated",
            SkipReason::GarbageTag           => "garbage-tag",
            SkipReason::SanityCheckFailed    => "sanity-check-failed",
            SkipReason::GarbageFields        => "garbage-fields",
            SkipReason::NoSatelliteReception => "no-satellite-reception",
            SkipReason::CoordinateOutOfRange => "coordinate-out-of-range",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome {
    Sample(GpsSample),
    Skipped(SkipReason),
}

impl DecodeOutcome {
    pub fn into_sample(self) -> Option<GpsSample> {
        match self {
            DecodeOutcome::Sample(s) => Some(s),
            DecodeOutcome::Skipped(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutVersion {
    /// time, flags, latitude, longitude, speed
    Basic,
    /// Basic followed by heading
    WithHeading,
}

impl LayoutVersion {
    /// Bytes taken by the fields
    pub const fn byte_len(self) -> usize {
        match self {
            LayoutVersion::Basic       => 6*4 + 4 + 3*4,
            LayoutVersion::WithHeading => 6*4 + 4 + 4*4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    pub field_offset: usize,
    pub version: LayoutVersion,
}

/// Known firmware families, keyed by the little-endian word at offset 12 of the record.
/// New devices are added here.
pub const RECORD_LAYOUTS: &[(u32, RecordLayout)] = &[
    (0x58,  RecordLayout { field_offset: 0x30, version: LayoutVersion::WithHeading }),
    (0x3F0, RecordLayout { field_offset: 0x10, version: LayoutVersion::WithHeading }),
];

/// Oldest firmwares have no discriminator
pub const DEFAULT_LAYOUT: RecordLayout = RecordLayout { field_offset: 0x30, version: LayoutVersion::Basic };

pub fn layout_for(discriminator: u32) -> RecordLayout {
    RECORD_LAYOUTS.iter()
        .find(|(d, _)| *d == discriminator)
        .map(|(_, layout)| *layout)
        .unwrap_or(DEFAULT_LAYOUT)
}

struct RawFix {
    hour: u32, minute: u32, second: u32,
    year: u32, month: u32, day: u32,
    active: u8,
    lat_ref: u8,
    lon_ref: u8,
    latitude: f32,
    longitude: f32,
    speed: f32,
    heading: Option<f32>,
}

impl RawFix {
    fn parse(mut d: &[u8], version: LayoutVersion) -> std::io::Result<Self> {
        let (hour, minute, second) = (d.read_u32::<LittleEndian>()?, d.read_u32::<LittleEndian>()?, d.read_u32::<LittleEndian>()?);
        let (year, month, day)     = (d.read_u32::<LittleEndian>()?, d.read_u32::<LittleEndian>()?, d.read_u32::<LittleEndian>()?);
        let (active, lat_ref, lon_ref, _unknown) = (d.read_u8()?, d.read_u8()?, d.read_u8()?, d.read_u8()?);
        let latitude  = d.read_f32::<LittleEndian>()?;
        let longitude = d.read_f32::<LittleEndian>()?;
        let speed     = d.read_f32::<LittleEndian>()?;
        let heading = if version == LayoutVersion::WithHeading { Some(d.read_f32::<LittleEndian>()?) } else { None };
        Ok(Self { hour, minute, second, year, month, day, active, lat_ref, lon_ref, latitude, longitude, speed, heading })
    }

    fn time_in_range(&self) -> bool {
        self.year < 100 && (1..=12).contains(&self.month) && (1..=31).contains(&self.day) &&
        self.hour < 24 && self.minute < 60 && self.second < 61
    }
}

pub fn fix_time(hour: u32, minute: u32, second: u32, year: u32, month: u32, day: u32) -> String {
    format!("{}-{:02}-{:02}T{:02}:{:02}:{:02}Z", year as u64 + 2000, month, day, hour, minute, second)
}

/// Novatek stores coordinates as DDDmm.mmmm
pub fn fix_coordinates(hemisphere: char, coordinate: f64) -> f64 {
    let minutes = coordinate.rem_euclid(100.0);
    let degrees = coordinate - minutes;
    let coordinate = degrees / 100.0 + minutes / 60.0;
    if hemisphere == 'S' || hemisphere == 'W' { -coordinate } else { coordinate }
}

pub fn fix_speed(knots: f64) -> f64 {
    knots * KNOTS_TO_MPS
}

fn flag(b: u8) -> Option<char> {
    b.is_ascii().then_some(b as char)
}

/// Bytes of a record the decoder looks at, whatever its declared length
pub const RECORD_PREFIX_LEN: usize = record_prefix_len();

const fn record_prefix_len() -> usize {
    let mut max = DEFAULT_LAYOUT.field_offset + DEFAULT_LAYOUT.version.byte_len();
    let mut i = 0;
    while i < RECORD_LAYOUTS.len() {
        let layout = RECORD_LAYOUTS[i].1;
        let end = layout.field_offset + layout.version.byte_len();
        if end > max { max = end; }
        i += 1;
    }
    max
}

/// Reads and decodes the record at `position`. Never fails, anything unexpected is a skip.
/// The whole `declared_length` span must lie within the stream, but only its first
/// [`RECORD_PREFIX_LEN`] bytes are read.
pub fn decode_record<R: Read + Seek>(reader: &mut R, position: u64, declared_length: u32) -> DecodeOutcome {
    let mut read = || -> std::io::Result<Vec<u8>> {
        let stream_len = reader.seek(SeekFrom::End(0))?;
        if position + declared_length as u64 > stream_len {
            return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, format!("record ends past the end of the stream ({stream_len} bytes)")));
        }
        reader.seek(SeekFrom::Start(position))?;
        let mut data = vec![0u8; (declared_length as usize).min(RECORD_PREFIX_LEN)];
        reader.read_exact(&mut data)?;
        Ok(data)
    };
    match read() {
        Ok(data) => decode_record_bytes(&data, position, declared_length),
        Err(e) => {
            log::warn!("Skipping record at {position:#x}, failed to read {declared_length} bytes: {e}");
            DecodeOutcome::Skipped(SkipReason::ReadError)
        }
    }
}

/// Decodes a record from its first bytes (at least [`RECORD_PREFIX_LEN`] of them, or all of
/// it when shorter). `position` is only used for logging.
pub fn decode_record_bytes(data: &[u8], position: u64, declared_length: u32) -> DecodeOutcome {
    use DecodeOutcome::Skipped;

    if data.len() < DISCRIMINATOR_OFFSET {
        log::warn!("Skipping record at {position:#x}, only {} bytes", data.len());
        return Skipped(SkipReason::Truncated);
    }
    let size  = BigEndian::read_u32(&data[0..4]);
    let typ   = BigEndian::read_u32(&data[4..8]);
    let magic = BigEndian::read_u32(&data[8..12]);
    let (Some(typ_str), Some(magic_str)) = (tag_str(typ), tag_str(magic)) else {
        log::warn!("Skipping record at {position:#x}, undecodable tags {typ:08X} {magic:08X}");
        return Skipped(SkipReason::GarbageTag);
    };
    if size != declared_length || typ != RECORD_TYPE || magic != RECORD_MAGIC {
        log::warn!("Skipping record at {position:#x} (expected size: {declared_length}, actual size: {size}, expected type: free, actual type: {typ_str}, expected magic: GPS , actual magic: {magic_str})");
        return Skipped(SkipReason::SanityCheckFailed);
    }

    let Some(discriminator) = data.get(DISCRIMINATOR_OFFSET..DISCRIMINATOR_OFFSET + 4).map(LittleEndian::read_u32) else {
        log::warn!("Skipping record at {position:#x}, no room for the layout discriminator");
        return Skipped(SkipReason::Truncated);
    };
    let layout = layout_for(discriminator);
    let Some(fields) = data.get(layout.field_offset..layout.field_offset + layout.version.byte_len()) else {
        log::warn!("Skipping record at {position:#x}, {} bytes is too short for layout {layout:?}", data.len());
        return Skipped(SkipReason::Truncated);
    };
    let fix = match RawFix::parse(fields, layout.version) {
        Ok(x) => x,
        Err(_) => return Skipped(SkipReason::Truncated),
    };

    let (Some(active), Some(lat_ref), Some(lon_ref)) = (flag(fix.active), flag(fix.lat_ref), flag(fix.lon_ref)) else {
        log::warn!("Skipping record at {position:#x}, undecodable flags {:02X} {:02X} {:02X}", fix.active, fix.lat_ref, fix.lon_ref);
        return Skipped(SkipReason::GarbageFields);
    };
    // 'A' means the receiver had a fix
    if active != 'A' {
        log::debug!("Skipping record at {position:#x}: lost GPS satellite reception");
        return Skipped(SkipReason::NoSatelliteReception);
    }
    if !fix.time_in_range() {
        log::warn!("Skipping record at {position:#x}, invalid time {}:{}:{} {}/{}/{}", fix.hour, fix.minute, fix.second, fix.year, fix.month, fix.day);
        return Skipped(SkipReason::GarbageFields);
    }

    let timestamp = fix_time(fix.hour, fix.minute, fix.second, fix.year, fix.month, fix.day);

    let latitude  = fix_coordinates(lat_ref, fix.latitude as f64);
    let longitude = fix_coordinates(lon_ref, fix.longitude as f64);
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        log::warn!("Skipping record at {position:#x}, coordinates out of range: {latitude}, {longitude} ({timestamp})");
        return Skipped(SkipReason::CoordinateOutOfRange);
    }

    DecodeOutcome::Sample(GpsSample {
        latitude,
        longitude,
        timestamp,
        speed_mps: fix_speed(fix.speed as f64),
        heading_deg: fix.heading.map(|x| x as f64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use crate::test_support::*;

    fn decode(data: &[u8]) -> DecodeOutcome {
        decode_record_bytes(data, 0, data.len() as u32)
    }

    fn is_timestamp(s: &str) -> bool {
        let b = s.as_bytes();
        b.len() == 20 && b.iter().enumerate().all(|(i, c)| match i {
            4 | 7 => *c == b'-',
            10 => *c == b'T',
            13 | 16 => *c == b':',
            19 => *c == b'Z',
            _ => c.is_ascii_digit(),
        })
    }

    #[test]
    fn test_fix_coordinates() {
        for (d, m) in [(37.0, 23.2475), (121.0, 0.0), (0.0, 59.5), (12.0, 99.9999)] {
            let v = d * 100.0 + m;
            let expected = d + m / 60.0;
            assert!((fix_coordinates('N', v) - expected).abs() < 1e-9);
            assert!((fix_coordinates('E', v) - expected).abs() < 1e-9);
            assert!((fix_coordinates('S', v) + expected).abs() < 1e-9);
            assert!((fix_coordinates('W', v) + expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_fix_speed() {
        assert_eq!(fix_speed(0.0), 0.0);
        assert_eq!(fix_speed(10.0), 10.0 * 0.514444);
        assert_eq!(fix_speed(-3.5), -3.5 * 0.514444);
        assert_eq!(fix_speed(123.456), 123.456 * 0.514444);
    }

    #[test]
    fn test_fix_time() {
        assert_eq!(fix_time(10, 15, 30, 21, 5, 21), "2021-05-21T10:15:30Z");
        assert_eq!(fix_time(0, 0, 0, 0, 1, 1), "2000-01-01T00:00:00Z");
        for (h, m, s, y, mo, d) in [(23, 59, 59, 99, 12, 31), (1, 2, 3, 4, 5, 6)] {
            let t = fix_time(h, m, s, y, mo, d);
            assert!(is_timestamp(&t), "{t}");
            assert!(t.starts_with(&format!("{}", 2000 + y)));
        }
    }

    #[test]
    fn test_layout_table() {
        assert_eq!(layout_for(0x58), RecordLayout { field_offset: 0x30, version: LayoutVersion::WithHeading });
        assert_eq!(layout_for(0x3F0), RecordLayout { field_offset: 0x10, version: LayoutVersion::WithHeading });
        assert_eq!(layout_for(0), DEFAULT_LAYOUT);
        assert_eq!(layout_for(0xDEADBEEF), DEFAULT_LAYOUT);
        assert_eq!(LayoutVersion::Basic.byte_len(), 40);
        assert_eq!(LayoutVersion::WithHeading.byte_len(), 44);
    }

    #[test]
    fn test_decode_default_layout() {
        let DecodeOutcome::Sample(s) = decode(&record(&Fix::default(), 0, 0x30)) else { panic!("expected a sample") };
        assert!((s.latitude - 37.387458).abs() < 1e-5);
        assert!((s.longitude + 121.972360).abs() < 1e-5);
        assert_eq!(s.timestamp, "2021-05-21T10:15:30Z");
        assert_eq!(s.speed_mps, 10.0 * 0.514444);
        assert_eq!(s.heading_deg, None);
    }

    #[test]
    fn test_decode_heading_layouts() {
        let fix = Fix { heading: Some(271.5), lat_ref: b'S', lon_ref: b'E', ..Fix::default() };
        for (discriminator, offset) in [(0x58, 0x30), (0x3F0, 0x10)] {
            let DecodeOutcome::Sample(s) = decode(&record(&fix, discriminator, offset)) else { panic!("expected a sample") };
            assert!((s.latitude + 37.387458).abs() < 1e-5);
            assert!((s.longitude - 121.972360).abs() < 1e-5);
            assert_eq!(s.heading_deg, Some(271.5));
        }
    }

    #[test]
    fn test_wrong_offset_for_discriminator_is_not_a_sample() {
        // Fields written at 0x30 but discriminator says 0x10
        assert!(matches!(decode(&record(&Fix::default(), 0x3F0, 0x30)), DecodeOutcome::Skipped(_)));
    }

    #[test]
    fn test_sanity_rejection() {
        let data = record(&Fix::default(), 0, 0x30);
        assert_eq!(decode_record_bytes(&data, 0, data.len() as u32 + 4), DecodeOutcome::Skipped(SkipReason::SanityCheckFailed));

        let mut bad_type = data.clone();
        bad_type[4..8].copy_from_slice(b"skip");
        assert_eq!(decode(&bad_type), DecodeOutcome::Skipped(SkipReason::SanityCheckFailed));

        let mut bad_magic = data.clone();
        bad_magic[8..12].copy_from_slice(b"GPS5");
        assert_eq!(decode(&bad_magic), DecodeOutcome::Skipped(SkipReason::SanityCheckFailed));

        let mut garbage = data;
        garbage[8..12].copy_from_slice(&[0xC3, 0x28, 0xA0, 0xA1]);
        assert_eq!(decode(&garbage), DecodeOutcome::Skipped(SkipReason::GarbageTag));
    }

    #[test]
    fn test_fix_status_filter() {
        for active in [b'V', b' ', 0] {
            let data = record(&Fix { active, ..Fix::default() }, 0, 0x30);
            assert_eq!(decode(&data), DecodeOutcome::Skipped(SkipReason::NoSatelliteReception));
        }
        // Receivers without a fix often leave the time zeroed too
        let data = record(&Fix { active: b'V', time: [0; 6], ..Fix::default() }, 0, 0x30);
        assert_eq!(decode(&data), DecodeOutcome::Skipped(SkipReason::NoSatelliteReception));
    }

    #[test]
    fn test_garbage_fields() {
        let data = record(&Fix { lat_ref: 0xE9, ..Fix::default() }, 0, 0x30);
        assert_eq!(decode(&data), DecodeOutcome::Skipped(SkipReason::GarbageFields));

        let data = record(&Fix { time: [10, 15, 30, 21, 13, 21], ..Fix::default() }, 0, 0x30);
        assert_eq!(decode(&data), DecodeOutcome::Skipped(SkipReason::GarbageFields));
    }

    #[test]
    fn test_out_of_range_coordinates() {
        let data = record(&Fix { latitude: 9530.0, ..Fix::default() }, 0, 0x30);
        assert_eq!(decode(&data), DecodeOutcome::Skipped(SkipReason::CoordinateOutOfRange));

        let data = record(&Fix { longitude: f32::NAN, ..Fix::default() }, 0, 0x30);
        assert_eq!(decode(&data), DecodeOutcome::Skipped(SkipReason::CoordinateOutOfRange));
    }

    #[test]
    fn test_truncated_records() {
        assert_eq!(decode(b"\0\0\0\x08free"), DecodeOutcome::Skipped(SkipReason::Truncated));

        let mut short = record(&Fix::default(), 0, 0x30);
        short.truncate(0x30 + 20);
        let len = short.len() as u32;
        short[0..4].copy_from_slice(&len.to_be_bytes());
        assert_eq!(decode(&short), DecodeOutcome::Skipped(SkipReason::Truncated));
    }

    #[test]
    fn test_decode_record_read_error() {
        let data = record(&Fix::default(), 0, 0x30);
        let len = data.len() as u32;
        let mut c = Cursor::new(data);
        assert!(matches!(decode_record(&mut c, 0, len), DecodeOutcome::Sample(_)));
        assert_eq!(decode_record(&mut c, 8, len), DecodeOutcome::Skipped(SkipReason::ReadError));
        assert_eq!(decode_record(&mut c, 1 << 40, len), DecodeOutcome::Skipped(SkipReason::ReadError));
    }

    struct CountingReader<R> {
        inner: R,
        bytes_read: usize,
    }

    impl<R: Read> Read for CountingReader<R> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.inner.read(buf)?;
            self.bytes_read += n;
            Ok(n)
        }
    }

    impl<R: Seek> Seek for CountingReader<R> {
        fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> { self.inner.seek(pos) }
    }

    #[test]
    fn test_record_prefix_len() {
        assert_eq!(RECORD_PREFIX_LEN, 0x30 + 44);
    }

    #[test]
    fn test_decode_record_reads_only_the_prefix() {
        const STREAM_LEN: usize = 4 * 1024 * 1024;

        // Garbage size field in front of a stray magic
        let mut r = CountingReader { inner: Cursor::new(vec![0xAAu8; STREAM_LEN]), bytes_read: 0 };
        assert_eq!(decode_record(&mut r, 0, 0xFFFF_FFF0), DecodeOutcome::Skipped(SkipReason::ReadError));
        assert_eq!(r.bytes_read, 0);

        // Fits in the stream, but isn't a GPS record
        assert_eq!(decode_record(&mut r, 16, STREAM_LEN as u32 - 16), DecodeOutcome::Skipped(SkipReason::GarbageTag));
        assert!(r.bytes_read <= RECORD_PREFIX_LEN);

        // Valid record declaring a large size
        let mut data = record(&Fix::default(), 0, 0x30);
        data[0..4].copy_from_slice(&(STREAM_LEN as u32).to_be_bytes());
        data.resize(STREAM_LEN, 0);
        let mut r = CountingReader { inner: Cursor::new(data), bytes_read: 0 };
        assert!(matches!(decode_record(&mut r, 0, STREAM_LEN as u32), DecodeOutcome::Sample(_)));
        assert_eq!(r.bytes_read, RECORD_PREFIX_LEN);
    }
}
