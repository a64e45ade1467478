/*
 * BSD 2-Clause License
 *
 * Copyright (c) 2021, Khaled Emara
 * All rights reserved.
 *
 * Redistribution and use in source and binary forms, with or without
 * modification, are permitted provided that the following conditions are met:
 *
 * 1. Redistributions of source code must retain the above copyright notice, this
 *    list of conditions and the following disclaimer.
 *
 * 2. Redistributions in binary form must reproduce the above copyright notice,
 *    this list of conditions and the following disclaimer in the documentation
 *    and/or other materials provided with the distribution.
 *
 * THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS"
 * AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE
 * IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
 * DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE
 * FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL
 * DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
 * SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER
 * CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY,
 * OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
 * OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.
 */
use std::io::Read;

use bincode::{error::DecodeError, Decode};
use byteorder::{LittleEndian, ReadBytesExt};

/// Decode a Bincode structure from a byte slice.
///
/// HDF5 stores all multi-byte integers little-endian, so every derived
/// `Decode` in this crate goes through this one configuration.
pub fn decode<T>(bytes: &[u8]) -> Result<(T, usize), DecodeError>
where
    T: Decode<()>,
{
    let config = bincode::config::standard()
        .with_little_endian()
        .with_fixed_int_encoding();
    bincode::decode_from_slice(bytes, config)
}

/// Read a little-endian unsigned integer of `width` bytes (1..=8).
pub fn read_uint<R: Read>(r: &mut R, width: u8) -> std::io::Result<u64> {
    debug_assert!((1..=8).contains(&width));
    r.read_uint::<LittleEndian>(usize::from(width))
}

/// Read `n` bytes into a fresh buffer.
pub fn read_vec<R: Read>(r: &mut R, n: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Round `n` up to the next multiple of eight.  Version 1 object headers
/// pad every message body this way.
pub fn pad8(n: usize) -> usize {
    n.div_ceil(8) * 8
}

/// Minimum number of bytes needed to encode any value in `0..=limit`.
///
/// Version 2 B-trees and fractal heaps size several on-disk fields with
/// this rule.
pub fn enc_size(limit: u64) -> u8 {
    if limit == 0 {
        1
    } else {
        (63 - limit.leading_zeros() as u8) / 8 + 1
    }
}

/// Interpret `bytes` up to the first NUL as UTF-8.
pub fn read_cstr(bytes: &[u8]) -> Option<String> {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..end]).ok().map(str::to_owned)
}

#[cfg(test)]
mod t {
    use super::*;

    #[test]
    fn pad8_boundaries() {
        assert_eq!(pad8(0), 0);
        assert_eq!(pad8(1), 8);
        assert_eq!(pad8(8), 8);
        assert_eq!(pad8(9), 16);
    }

    #[test]
    fn enc_size_boundaries() {
        assert_eq!(enc_size(0), 1);
        assert_eq!(enc_size(255), 1);
        assert_eq!(enc_size(256), 2);
        assert_eq!(enc_size(65535), 2);
        assert_eq!(enc_size(65536), 3);
        assert_eq!(enc_size(u64::MAX), 8);
    }

    #[test]
    fn read_uint_le() {
        let bytes = [0x01, 0x02, 0x03, 0x04];
        let mut cur = &bytes[..];
        assert_eq!(read_uint(&mut cur, 4).unwrap(), 0x0403_0201);
    }

    #[test]
    fn cstr_stops_at_nul() {
        assert_eq!(read_cstr(b"meters\0junk").as_deref(), Some("meters"));
        assert_eq!(read_cstr(b"meters").as_deref(), Some("meters"));
    }
}
