//! Host/network byte order conversion and buffer-level (de)serialization
//! primitives.
//!
//! All multi-byte integers on the wire are big-endian ("network byte
//! order"). [`bytes::Buf`]/[`bytes::BufMut`] already read and write
//! big-endian by default, so `to_network`/`from_network` below are thin,
//! explicitly-named wrappers rather than hand-rolled byte swaps - this keeps
//! the wire layout defined independently of Rust's in-memory layout, field
//! by field, instead of relying on any kind of `#[repr(C, packed)]` +
//! `memcpy` trick.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Error produced while decoding a value from a byte buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The buffer had fewer bytes remaining than the value requires.
    #[error("buffer too short: need {needed} bytes, have {available}")]
    BufferTooShort {
        /// Bytes required to decode the value.
        needed: usize,
        /// Bytes actually remaining in the buffer.
        available: usize,
    },
    /// The buffer had leftover bytes after a fixed-size or exact-count value
    /// was fully decoded.
    #[error("buffer too long: {extra} unexpected trailing bytes")]
    TrailingBytes {
        /// Number of bytes left over after decoding.
        extra: usize,
    },
}

/// Requires that `buf` has at least `needed` bytes remaining.
fn require(buf: &Bytes, needed: usize) -> Result<(), CodecError> {
    let available = buf.remaining();
    if available < needed {
        return Err(CodecError::BufferTooShort { needed, available });
    }
    Ok(())
}

/// Converts a host-order `u16` into network (big-endian) byte order and
/// writes it to `buf`.
pub fn put_u16(buf: &mut BytesMut, value: u16) {
    buf.put_u16(value);
}

/// Reads a network-order `u16` from `buf`, advancing the cursor.
pub fn get_u16(buf: &mut Bytes) -> Result<u16, CodecError> {
    require(buf, size_of::<u16>())?;
    Ok(buf.get_u16())
}

/// Converts a host-order `u32` into network byte order and writes it to `buf`.
pub fn put_u32(buf: &mut BytesMut, value: u32) {
    buf.put_u32(value);
}

/// Reads a network-order `u32` from `buf`, advancing the cursor.
pub fn get_u32(buf: &mut Bytes) -> Result<u32, CodecError> {
    require(buf, size_of::<u32>())?;
    Ok(buf.get_u32())
}

/// Converts a host-order `i32` into network byte order and writes it to `buf`.
pub fn put_i32(buf: &mut BytesMut, value: i32) {
    buf.put_i32(value);
}

/// Reads a network-order `i32` from `buf`, advancing the cursor.
pub fn get_i32(buf: &mut Bytes) -> Result<i32, CodecError> {
    require(buf, size_of::<i32>())?;
    Ok(buf.get_i32())
}

/// Converts a host-order `i16` into network byte order and writes it to `buf`.
pub fn put_i16(buf: &mut BytesMut, value: i16) {
    buf.put_i16(value);
}

/// Reads a network-order `i16` from `buf`, advancing the cursor.
pub fn get_i16(buf: &mut Bytes) -> Result<i16, CodecError> {
    require(buf, size_of::<i16>())?;
    Ok(buf.get_i16())
}

/// Converts a host-order `f32` into network byte order and writes it to
/// `buf`, bit-casting through `u32` so that `NaN` payloads survive the round
/// trip byte-for-byte instead of being canonicalized by the platform's FPU.
pub fn put_f32(buf: &mut BytesMut, value: f32) {
    buf.put_u32(value.to_bits());
}

/// Reads a network-order `f32` from `buf`, advancing the cursor.
pub fn get_f32(buf: &mut Bytes) -> Result<f32, CodecError> {
    let bits = get_u32(buf)?;
    Ok(f32::from_bits(bits))
}

/// Writes a single byte to `buf`.
pub fn put_u8(buf: &mut BytesMut, value: u8) {
    buf.put_u8(value);
}

/// Reads a single byte from `buf`, advancing the cursor.
pub fn get_u8(buf: &mut Bytes) -> Result<u8, CodecError> {
    require(buf, 1)?;
    Ok(buf.get_u8())
}

/// Writes `N` raw bytes verbatim (used for fixed-size ASCII codes and names -
/// no byte order conversion applies to byte arrays).
pub fn put_bytes_exact<const N: usize>(buf: &mut BytesMut, value: &[u8; N]) {
    buf.put_slice(value);
}

/// Reads exactly `N` raw bytes from `buf`, advancing the cursor.
pub fn get_bytes_exact<const N: usize>(buf: &mut Bytes) -> Result<[u8; N], CodecError> {
    require(buf, N)?;
    let mut out = [0u8; N];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

/// A value with a wire representation of fixed, compile-time-known length.
///
/// Implemented individually per payload type rather than derived, because
/// the wire format has bespoke per-opcode rules (NUL-padded fixed strings,
/// variable-length entry lists with a shared header) that a one-size-fits-all
/// derive macro would fight rather than help.
pub trait WireEncode {
    /// Encoded length of this value in bytes.
    const ENCODED_LEN: usize;

    /// Appends this value's wire representation to `buf`.
    fn encode(&self, buf: &mut BytesMut);
}

/// The decode half of [`WireEncode`].
pub trait WireDecode: Sized {
    /// Decodes a value, consuming exactly [`WireEncode::ENCODED_LEN`] bytes
    /// from `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::BufferTooShort`] if `buf` has fewer bytes
    /// remaining than the fixed encoded length.
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError>;
}

/// Encodes `value` into a fresh, exactly-sized buffer.
pub fn encode_to_vec<T: WireEncode>(value: &T) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(T::ENCODED_LEN);
    value.encode(&mut buf);
    buf.to_vec()
}

/// Decodes a `T` from a byte slice, requiring that the slice contains
/// exactly `T::ENCODED_LEN` bytes (no more, no fewer).
///
/// Used for the fixed-size payload opcodes, where the validator has already
/// checked `payload_size == T::ENCODED_LEN` before the codec ever runs - this
/// is a second, independent check so the codec is safe to call standalone
/// (e.g. from tests or fuzz targets) without going through the validator
/// first.
///
/// # Errors
///
/// [`CodecError::BufferTooShort`] if `data` is shorter than
/// `T::ENCODED_LEN`; [`CodecError::TrailingBytes`] if it is longer.
pub fn decode_exact<T: WireDecode + WireEncode>(data: &[u8]) -> Result<T, CodecError> {
    if data.len() < T::ENCODED_LEN {
        return Err(CodecError::BufferTooShort {
            needed: T::ENCODED_LEN,
            available: data.len(),
        });
    }
    let mut buf = Bytes::copy_from_slice(data);
    let value = T::decode(&mut buf)?;
    if buf.has_remaining() {
        return Err(CodecError::TrailingBytes {
            extra: buf.remaining(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f32_round_trips_nan_bit_pattern() {
        let nan = f32::from_bits(0x7fc0_1234);
        let mut buf = BytesMut::new();
        put_f32(&mut buf, nan);
        let mut frozen = buf.freeze();
        let decoded = get_f32(&mut frozen).unwrap();
        assert_eq!(nan.to_bits(), decoded.to_bits());
    }

    #[test]
    fn decode_exact_rejects_short_buffer() {
        struct Two(u16);
        impl WireEncode for Two {
            const ENCODED_LEN: usize = 2;
            fn encode(&self, buf: &mut BytesMut) {
                put_u16(buf, self.0);
            }
        }
        impl WireDecode for Two {
            fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
                Ok(Self(get_u16(buf)?))
            }
        }

        assert!(matches!(
            decode_exact::<Two>(&[0u8]),
            Err(CodecError::BufferTooShort { .. })
        ));
        assert!(matches!(
            decode_exact::<Two>(&[0u8, 0, 0]),
            Err(CodecError::TrailingBytes { .. })
        ));
        assert_eq!(decode_exact::<Two>(&[0x01, 0x02]).unwrap().0, 0x0102);
    }
}
