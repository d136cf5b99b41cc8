#![forbid(unsafe_code)]

use std::io::{Read, Write};

use crate::pak::error::{PakError, PakResult};

pub fn write_u8(w: &mut dyn Write, v: u8) -> PakResult<()> {
    w.write_all(&[v])?;
    Ok(())
}

pub fn write_u16(w: &mut dyn Write, v: u16) -> PakResult<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn write_u32(w: &mut dyn Write, v: u32) -> PakResult<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn write_u64(w: &mut dyn Write, v: u64) -> PakResult<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

/// `[u16 len][UTF-8 bytes]`
pub fn write_str(w: &mut dyn Write, s: &str) -> PakResult<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| PakError::Invalid(format!("name too long: {s}")))?;
    write_u16(w, len)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

pub fn read_exact<const N: usize>(r: &mut dyn Read) -> PakResult<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_u8(r: &mut dyn Read) -> PakResult<u8> {
    Ok(read_exact::<1>(r)?[0])
}

pub fn read_u16(r: &mut dyn Read) -> PakResult<u16> {
    Ok(u16::from_le_bytes(read_exact::<2>(r)?))
}

pub fn read_u32(r: &mut dyn Read) -> PakResult<u32> {
    Ok(u32::from_le_bytes(read_exact::<4>(r)?))
}

pub fn read_u64(r: &mut dyn Read) -> PakResult<u64> {
    Ok(u64::from_le_bytes(read_exact::<8>(r)?))
}

pub fn read_str(r: &mut dyn Read) -> PakResult<String> {
    let len = read_u16(r)? as usize;
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| PakError::Invalid("name is not utf8".into()))
}

/// First four bytes of the blake3 digest, as stored in the footer.
pub fn short_hash(bytes: &[u8]) -> u32 {
    let full: [u8; 32] = blake3::hash(bytes).into();
    u32::from_le_bytes([full[0], full[1], full[2], full[3]])
}
