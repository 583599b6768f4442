//! UTMT: internal, dependency-light transfer format for UTM tile messages.
//!
//! - Stores the tile origin as f64 UTM metres and the UTM zone it refers to.
//! - Carries exactly one payload: nothing, a coloured point block, or an
//!   annotation JSON document.
//! - Optional zlib compression of the payload (flag bit 1).
//!
//! File layout (little-endian):
//!   00  : [u8;4]  magic = b"UTMT"
//!   04  : u32     version = 1
//!   08  : u32     flags (bitfield)
//!                 bit 0 => northern hemisphere
//!                 bit 1 => payload is zlib-compressed
//!   0C  : u32     utm_zone_number (0 = unspecified, else 1..=60)
//!   10  : f64[3]  origin (easting, northing, altitude)
//!   28  : u32     payload kind (0 empty, 1 points, 2 annotation json)
//!   2C  : u32     payload_size (stored bytes)
//!   30  : ..      payload
//!
//! Points payload (after decompression):
//!   u32 count, f32[3] * count positions, f32[3] * count colors
//!
//! Positions are offsets from the origin in metres. Colors are linear RGB.

use std::fs::File;
use std::io::{self, ErrorKind, Write};
use std::path::Path;

use miniz_oxide::inflate::TINFLStatus;

pub const UTMT_MAGIC: [u8; 4] = *b"UTMT";
pub const UTMT_VERSION: u32 = 1;
pub const UTMT_HEADER_LEN: usize = 48;
/// Largest payload accepted, before compression on write and after
/// decompression on read. Holds a little over 11 million points.
pub const UTMT_MAX_PAYLOAD_LEN: usize = 256 << 20;
/// File extension of UTMT tiles, without the dot.
pub const UTMT_EXTENSION: &str = "utmt";

const FLAG_NORTHERN: u32 = 1 << 0;
const FLAG_COMPRESSED: u32 = 1 << 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PayloadKind {
    Empty = 0,
    Points = 1,
    AnnotationJson = 2,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    Points {
        positions: Vec<[f32; 3]>,
        colors: Vec<[f32; 3]>,
    },
    /// Raw UTF-8 JSON; the format does not interpret it.
    AnnotationJson(Vec<u8>),
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Empty => PayloadKind::Empty,
            Payload::Points { .. } => PayloadKind::Points,
            Payload::AnnotationJson(_) => PayloadKind::AnnotationJson,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UtmtRecord {
    pub origin: [f64; 3],
    pub utm_zone_number: u32,
    pub northern_hemisphere: bool,
    pub payload: Payload,
}

#[inline(always)]
fn need(buf: &[u8], want: usize) -> io::Result<()> {
    if buf.len() < want {
        Err(io::Error::new(ErrorKind::UnexpectedEof, "truncated UTMT"))
    } else {
        Ok(())
    }
}

#[inline(always)]
fn take<'a>(buf: &mut &'a [u8], n: usize) -> io::Result<&'a [u8]> {
    need(buf, n)?;
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

#[inline(always)]
fn le_u32(buf: &mut &[u8]) -> io::Result<u32> {
    let b = take(buf, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[inline(always)]
fn le_f32(buf: &mut &[u8]) -> io::Result<f32> {
    let b = take(buf, 4)?;
    Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[inline(always)]
fn le_f64(buf: &mut &[u8]) -> io::Result<f64> {
    let b = take(buf, 8)?;
    Ok(f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
}

#[cold]
fn bad(msg: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, msg)
}

/// Parse a UTMT record from a contiguous byte slice. This is the single source of truth for parsing.
pub fn parse_utmt_bytes(p: &[u8]) -> io::Result<UtmtRecord> {
    parse_with_limit(p, UTMT_MAX_PAYLOAD_LEN)
}

fn parse_with_limit(mut p: &[u8], max_payload_len: usize) -> io::Result<UtmtRecord> {
    // Header
    if take(&mut p, 4)? != UTMT_MAGIC {
        return Err(bad("bad UTMT magic"));
    }

    let version = le_u32(&mut p)?;
    if version != UTMT_VERSION {
        return Err(bad("unsupported UTMT version"));
    }

    let flags = le_u32(&mut p)?;
    let northern_hemisphere = (flags & FLAG_NORTHERN) != 0;
    let compressed = (flags & FLAG_COMPRESSED) != 0;

    let utm_zone_number = le_u32(&mut p)?;
    if utm_zone_number > 60 {
        return Err(bad("utm zone number out of range"));
    }

    let origin = [le_f64(&mut p)?, le_f64(&mut p)?, le_f64(&mut p)?];

    let kind = le_u32(&mut p)?;
    let payload_size = le_u32(&mut p)? as usize;
    let stored = take(&mut p, payload_size)?;

    if !p.is_empty() {
        return Err(bad("trailing bytes after UTMT payload"));
    }

    let inflated;
    let body: &[u8] = if compressed {
        inflated = miniz_oxide::inflate::decompress_to_vec_zlib_with_limit(stored, max_payload_len)
            .map_err(|e| match e.status {
                TINFLStatus::HasMoreOutput => bad("inflated UTMT payload too large"),
                _ => bad("corrupt zlib payload"),
            })?;
        &inflated
    } else {
        stored
    };

    let payload = match kind {
        0 => {
            if !body.is_empty() {
                return Err(bad("empty payload carries data"));
            }
            Payload::Empty
        }
        1 => parse_points(body)?,
        2 => Payload::AnnotationJson(body.to_vec()),
        _ => return Err(bad(&format!("unknown UTMT payload kind {}", kind))),
    };

    Ok(UtmtRecord {
        origin,
        utm_zone_number,
        northern_hemisphere,
        payload,
    })
}

fn parse_points(mut p: &[u8]) -> io::Result<Payload> {
    let count = le_u32(&mut p)? as usize;
    let block = count.checked_mul(12).ok_or_else(|| bad("points size overflow"))?;
    need(p, block * 2)?;

    let positions = take_vec3_block(&mut p, count)?;
    let colors = take_vec3_block(&mut p, count)?;

    if !p.is_empty() {
        return Err(bad("trailing bytes after points block"));
    }

    Ok(Payload::Points { positions, colors })
}

fn take_vec3_block(p: &mut &[u8], count: usize) -> io::Result<Vec<[f32; 3]>> {
    let raw = take(p, count * 12)?;

    // Fast path: the block is tightly packed and, on little-endian hosts with a
    // 4-aligned buffer, can be reinterpreted directly.
    #[cfg(target_endian = "little")]
    {
        if let Ok(as_f32x3) = bytemuck::try_cast_slice::<u8, [f32; 3]>(raw) {
            return Ok(as_f32x3.to_vec());
        }
    }

    let mut out = Vec::<[f32; 3]>::with_capacity(count);
    let mut rest = raw;
    for _ in 0..count {
        out.push([le_f32(&mut rest)?, le_f32(&mut rest)?, le_f32(&mut rest)?]);
    }

    Ok(out)
}

fn encode_payload(payload: &Payload) -> io::Result<Vec<u8>> {
    match payload {
        Payload::Empty => Ok(Vec::new()),
        Payload::AnnotationJson(json) => Ok(json.clone()),
        Payload::Points { positions, colors } => {
            if positions.len() != colors.len() {
                return Err(bad("colors length != positions length"));
            }

            let count = u32::try_from(positions.len()).map_err(|_| bad("too many points"))?;
            let mut out = Vec::with_capacity(4 + positions.len() * 24);
            out.extend_from_slice(&count.to_le_bytes());

            for v in positions.iter().chain(colors.iter()) {
                out.extend_from_slice(&v[0].to_le_bytes());
                out.extend_from_slice(&v[1].to_le_bytes());
                out.extend_from_slice(&v[2].to_le_bytes());
            }

            Ok(out)
        }
    }
}

/// Serialize a record into `w`. With `compress` the payload is zlib-deflated.
pub fn write_to<W: Write>(w: &mut W, record: &UtmtRecord, compress: bool) -> io::Result<()> {
    if record.utm_zone_number > 60 {
        return Err(bad("utm zone number out of range"));
    }

    let mut flags = 0u32;

    if record.northern_hemisphere {
        flags |= FLAG_NORTHERN;
    }

    let mut body = encode_payload(&record.payload)?;
    if body.len() > UTMT_MAX_PAYLOAD_LEN {
        return Err(bad("payload too large"));
    }

    if compress && !body.is_empty() {
        flags |= FLAG_COMPRESSED;
        body = miniz_oxide::deflate::compress_to_vec_zlib(&body, 6);
    }

    let payload_size = u32::try_from(body.len()).map_err(|_| bad("payload too large"))?;

    w.write_all(&UTMT_MAGIC)?;

    write_u32(w, UTMT_VERSION)?;
    write_u32(w, flags)?;
    write_u32(w, record.utm_zone_number)?;

    write_f64(w, record.origin[0])?;
    write_f64(w, record.origin[1])?;
    write_f64(w, record.origin[2])?;

    write_u32(w, record.payload.kind() as u32)?;
    write_u32(w, payload_size)?;

    w.write_all(&body)
}

pub fn encode_utmt(record: &UtmtRecord, compress: bool) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(UTMT_HEADER_LEN);
    write_to(&mut out, record, compress)?;
    Ok(out)
}

/// Write a record to a new file at `path`, replacing any existing file.
pub fn write_file<P: AsRef<Path>>(path: P, record: &UtmtRecord, compress: bool) -> io::Result<()> {
    let mut file = File::create(path)?;
    write_to(&mut file, record, compress)?;
    file.flush()
}

pub mod wgs84 {
    /// Semi-major axis (equatorial radius) in meters.
    pub const A: f64 = 6_378_137.0;

    /// Flattening factor (1 / 298.257223563).
    pub const F: f64 = 1.0 / 298.257_223_563;

    /// First eccentricity squared.
    pub const E2: f64 = F * (2.0 - F);

    /// Second eccentricity squared.
    pub const E2P: f64 = E2 / (1.0 - E2);
}

#[inline]
fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

#[inline]
fn write_f64<W: Write>(w: &mut W, v: f64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}
