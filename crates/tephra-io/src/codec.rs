//! Binary encode/decode for particle artifacts and subfiles.
//!
//! All integers and floats are little-endian. A header's `data_offset`
//! is the byte position of the first record; the gap after the fixed
//! header is zero padding up to the configured stripe alignment.

use std::io::{self, Read, Write};

use tephra_core::field::{ParticleRecord, RECORD_LEN};

use crate::error::OutputError;
use crate::{FORMAT_VERSION, MAGIC, SUBFILE_MAGIC};

/// Encoded size of one particle record.
pub const RECORD_BYTES: usize = RECORD_LEN * 8;

/// Fixed size of an [`ArtifactHeader`] before padding.
pub const ARTIFACT_HEADER_LEN: u64 = 4 + 1 + 1 + 8 + 8 + 8 + 4 + 8;

/// Fixed size of a [`SubfileHeader`] before padding.
pub const SUBFILE_HEADER_LEN: u64 = 4 + 1 + 8 + 8 + 4 + 4 + 8 + 8;

// ── Primitive writers ───────────────────────────────────────────

fn write_u8(w: &mut dyn Write, v: u8) -> Result<(), OutputError> {
    w.write_all(&[v])?;
    Ok(())
}

fn write_u32_le(w: &mut dyn Write, v: u32) -> Result<(), OutputError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_u64_le(w: &mut dyn Write, v: u64) -> Result<(), OutputError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_f64_le(w: &mut dyn Write, v: f64) -> Result<(), OutputError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_padding(w: &mut dyn Write, len: u64) -> Result<(), OutputError> {
    io::copy(&mut io::repeat(0).take(len), w)?;
    Ok(())
}

// ── Primitive readers ───────────────────────────────────────────

fn read_u8(r: &mut dyn Read) -> Result<u8, OutputError> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u32_le(r: &mut dyn Read) -> Result<u32, OutputError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64_le(r: &mut dyn Read) -> Result<u64, OutputError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_f64_le(r: &mut dyn Read) -> Result<f64, OutputError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

fn read_magic(r: &mut dyn Read, expected: [u8; 4]) -> Result<(), OutputError> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic != expected {
        return Err(OutputError::InvalidMagic);
    }
    let version = read_u8(r)?;
    if version != FORMAT_VERSION {
        return Err(OutputError::UnsupportedVersion { found: version });
    }
    Ok(())
}

fn skip_padding(r: &mut dyn Read, data_offset: u64, header_len: u64) -> Result<(), OutputError> {
    let pad = data_offset
        .checked_sub(header_len)
        .ok_or_else(|| OutputError::Malformed {
            detail: format!("data offset {data_offset} inside the {header_len}-byte header"),
        })?;
    let skipped = io::copy(&mut Read::take(&mut *r, pad), &mut io::sink())?;
    if skipped != pad {
        return Err(OutputError::Malformed {
            detail: format!("truncated padding: expected {pad} bytes, found {skipped}"),
        });
    }
    Ok(())
}

fn read_payload(r: &mut dyn Read, particle_count: u64) -> Result<Vec<ParticleRecord>, OutputError> {
    let len = usize::try_from(particle_count)
        .ok()
        .and_then(|n| n.checked_mul(RECORD_BYTES))
        .ok_or_else(|| OutputError::Malformed {
            detail: format!("particle count {particle_count} overflows"),
        })?;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    decode_records(&buf)
}

// ── Alignment ───────────────────────────────────────────────────

/// Round `len` up to a multiple of `alignment`. `None`, 0 and 1 leave it
/// unchanged.
pub fn align_up(len: u64, alignment: Option<u64>) -> u64 {
    match alignment {
        Some(a) if a > 1 => len.div_ceil(a) * a,
        _ => len,
    }
}

// ── Records ─────────────────────────────────────────────────────

/// Encode records back to back as `7 × f64` each.
pub fn encode_records(records: impl IntoIterator<Item = ParticleRecord>) -> Vec<u8> {
    let mut out = Vec::new();
    for record in records {
        for v in record.to_array() {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    out
}

/// Decode a buffer produced by [`encode_records`].
pub fn decode_records(bytes: &[u8]) -> Result<Vec<ParticleRecord>, OutputError> {
    if bytes.len() % RECORD_BYTES != 0 {
        return Err(OutputError::Malformed {
            detail: format!(
                "record payload of {} bytes is not a multiple of {RECORD_BYTES}",
                bytes.len()
            ),
        });
    }
    Ok(bytes
        .chunks_exact(RECORD_BYTES)
        .map(|chunk| {
            let mut a = [0.0f64; RECORD_LEN];
            for (slot, word) in a.iter_mut().zip(chunk.chunks_exact(8)) {
                let mut b = [0u8; 8];
                b.copy_from_slice(word);
                *slot = f64::from_le_bytes(b);
            }
            ParticleRecord::from_array(a)
        })
        .collect())
}

/// Number of records in an encoded payload.
pub fn record_count(bytes: &[u8]) -> u64 {
    (bytes.len() / RECORD_BYTES) as u64
}

// ── Main artifact ───────────────────────────────────────────────

/// Whether a main artifact carries its records or is a subfiling stub.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Records follow the header.
    Complete,
    /// Records live in subfiles until fused.
    Stub,
}

impl ArtifactKind {
    fn tag(self) -> u8 {
        match self {
            Self::Complete => 0,
            Self::Stub => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, OutputError> {
        match tag {
            0 => Ok(Self::Complete),
            1 => Ok(Self::Stub),
            other => Err(OutputError::Malformed {
                detail: format!("unknown artifact kind {other}"),
            }),
        }
    }
}

/// Header of a main artifact.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ArtifactHeader {
    /// Complete or stub.
    pub kind: ArtifactKind,
    /// Solver step the artifact was written at.
    pub step: u64,
    /// Simulation time at that step.
    pub time: f64,
    /// Particles across the whole job.
    pub particle_count: u64,
    /// Subfiles holding the records (0 for a complete artifact written
    /// without subfiling).
    pub subfile_count: u32,
    /// Byte offset of the first record.
    pub data_offset: u64,
}

/// Write a main artifact. `payload` must be empty for a stub.
pub fn encode_artifact(
    w: &mut dyn Write,
    header: &ArtifactHeader,
    payload: &[u8],
) -> Result<(), OutputError> {
    if header.data_offset < ARTIFACT_HEADER_LEN {
        return Err(OutputError::Malformed {
            detail: format!("data offset {} inside the header", header.data_offset),
        });
    }
    w.write_all(&MAGIC)?;
    write_u8(w, FORMAT_VERSION)?;
    write_u8(w, header.kind.tag())?;
    write_u64_le(w, header.step)?;
    write_f64_le(w, header.time)?;
    write_u64_le(w, header.particle_count)?;
    write_u32_le(w, header.subfile_count)?;
    write_u64_le(w, header.data_offset)?;
    write_padding(w, header.data_offset - ARTIFACT_HEADER_LEN)?;
    w.write_all(payload)?;
    Ok(())
}

/// Read a main artifact. A stub yields no records.
pub fn decode_artifact(
    r: &mut dyn Read,
) -> Result<(ArtifactHeader, Vec<ParticleRecord>), OutputError> {
    read_magic(r, MAGIC)?;
    let header = ArtifactHeader {
        kind: ArtifactKind::from_tag(read_u8(r)?)?,
        step: read_u64_le(r)?,
        time: read_f64_le(r)?,
        particle_count: read_u64_le(r)?,
        subfile_count: read_u32_le(r)?,
        data_offset: read_u64_le(r)?,
    };
    if header.kind == ArtifactKind::Stub {
        return Ok((header, Vec::new()));
    }
    skip_padding(r, header.data_offset, ARTIFACT_HEADER_LEN)?;
    let records = read_payload(r, header.particle_count)?;
    Ok((header, records))
}

// ── Subfile ─────────────────────────────────────────────────────

/// Header of one node's subfile.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SubfileHeader {
    /// Solver step.
    pub step: u64,
    /// Simulation time.
    pub time: f64,
    /// 1-based subfile index (node group id + 1).
    pub index: u32,
    /// Total subfiles for this step.
    pub count: u32,
    /// Particles in this subfile.
    pub particle_count: u64,
    /// Byte offset of the first record.
    pub data_offset: u64,
}

/// Write a subfile.
pub fn encode_subfile(
    w: &mut dyn Write,
    header: &SubfileHeader,
    payload: &[u8],
) -> Result<(), OutputError> {
    if header.data_offset < SUBFILE_HEADER_LEN {
        return Err(OutputError::Malformed {
            detail: format!("data offset {} inside the header", header.data_offset),
        });
    }
    w.write_all(&SUBFILE_MAGIC)?;
    write_u8(w, FORMAT_VERSION)?;
    write_u64_le(w, header.step)?;
    write_f64_le(w, header.time)?;
    write_u32_le(w, header.index)?;
    write_u32_le(w, header.count)?;
    write_u64_le(w, header.particle_count)?;
    write_u64_le(w, header.data_offset)?;
    write_padding(w, header.data_offset - SUBFILE_HEADER_LEN)?;
    w.write_all(payload)?;
    Ok(())
}

/// Read a subfile.
pub fn decode_subfile(
    r: &mut dyn Read,
) -> Result<(SubfileHeader, Vec<ParticleRecord>), OutputError> {
    read_magic(r, SUBFILE_MAGIC)?;
    let header = SubfileHeader {
        step: read_u64_le(r)?,
        time: read_f64_le(r)?,
        index: read_u32_le(r)?,
        count: read_u32_le(r)?,
        particle_count: read_u64_le(r)?,
        data_offset: read_u64_le(r)?,
    };
    skip_padding(r, header.data_offset, SUBFILE_HEADER_LEN)?;
    let records = read_payload(r, header.particle_count)?;
    Ok((header, records))
}
