use std::{convert::TryInto, mem::size_of};

use crate::error::{Error, ErrorKind, Result};

/// A type that writes itself as little-endian bytes.
pub trait Encodeable {
    fn encode(&self) -> Vec<u8>;
}

/// A type that reads itself back from a byte stream.
///
/// The process of encoding and decoding must be symmetric.
pub trait Decodeable: Sized {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Result<Self>;
}

pub fn read_into<T: Decodeable, R: std::io::Read>(reader: &mut R) -> Result<T> {
    T::decode_from(reader)
}

pub fn read_exact<R: std::io::Read>(reader: &mut R, bytes_count: usize) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; bytes_count];
    reader
        .read_exact(&mut buffer)
        .map_err(|_| Error::new(ErrorKind::Io, &format!("short read, expect {}", bytes_count)))?;
    Ok(buffer)
}

/// An append-only byte accumulator for building records and page bodies.
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn write<T: Encodeable>(&mut self, obj: &T) {
        self.buf.extend_from_slice(obj.encode().as_slice());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn to_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// # Format
///
/// - 1 byte (0 for false, 1 for true)
impl Encodeable for bool {
    fn encode(&self) -> Vec<u8> {
        vec![*self as u8]
    }
}

impl Decodeable for bool {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Result<Self> {
        Ok(u8::decode_from(reader)? == 1)
    }
}

macro_rules! impl_serialization {
    (for $($t:ty),+) => {
        $(
            impl Encodeable for $t {
                fn encode(&self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }
            }

            impl Decodeable for $t {
                fn decode_from<R: std::io::Read>(reader: &mut R) -> Result<Self> {
                    let bytes = read_exact(reader, size_of::<Self>())?;
                    Ok(Self::from_le_bytes(bytes.try_into().unwrap()))
                }
            }
        )*
    }
}

impl_serialization!(for u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

/// Little-endian field accessors over a fixed byte block. All page codecs
/// go through these two helpers so the on-disk layout has one chokepoint.
pub fn get_u64(buf: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap())
}

pub fn put_u64(buf: &mut [u8], offset: usize, v: u64) {
    buf[offset..offset + 8].copy_from_slice(&v.to_le_bytes());
}

pub fn get_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

pub fn put_u32(buf: &mut [u8], offset: usize, v: u32) {
    buf[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
}

pub fn get_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(buf[offset..offset + 2].try_into().unwrap())
}

pub fn put_u16(buf: &mut [u8], offset: usize, v: u16) {
    buf[offset..offset + 2].copy_from_slice(&v.to_le_bytes());
}
