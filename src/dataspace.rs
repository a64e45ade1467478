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

use byteorder::ReadBytesExt;

use crate::definitions::HdfDim;
use crate::error::{Error, Result};
use crate::sb::Superblock;

pub const MESSAGE_TYPE: u16 = 0x1;

/// The shape of a dataset or attribute payload.
#[derive(Clone, Debug)]
pub struct Dataspace {
    pub version: u8,
    pub dimensions: Vec<HdfDim>,
    pub max_dimensions: Option<Vec<HdfDim>>,
}

impl Dataspace {
    pub fn decode(body: &[u8], sb: &Superblock) -> Result<Self> {
        decode_body(body, sb).map_err(|_| {
            Error::corrupt_message(MESSAGE_TYPE, "truncated dataspace message")
        })?
    }

    /// Total number of elements.  A scalar dataspace (rank 0) holds one.
    /// Saturates instead of overflowing, so corrupt dimensions surface as
    /// an impossible size rather than a panic.
    pub fn element_count(&self) -> u64 {
        self.dimensions
            .iter()
            .fold(1u64, |acc, d| acc.saturating_mul(*d))
    }

    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }
}

fn decode_body(body: &[u8], sb: &Superblock) -> std::io::Result<Result<Dataspace>> {
    let mut cur = body;
    let version = cur.read_u8()?;
    let rank = cur.read_u8()?;
    let flags = cur.read_u8()?;
    match version {
        1 => {
            // Reserved type byte plus four reserved bytes.
            let _ = cur.read_u8()?;
            let _ = cur.read_u32::<byteorder::LittleEndian>()?;
        }
        2 => {
            let _space_type = cur.read_u8()?;
        }
        v => {
            return Ok(Err(Error::UnsupportedVersion {
                what: "dataspace message",
                version: v,
            }))
        }
    }
    if flags & 0x2 != 0 {
        return Ok(Err(Error::UnsupportedVersion {
            what: "dataspace with permutation indices",
            version,
        }));
    }

    let mut dimensions = Vec::with_capacity(usize::from(rank));
    for _ in 0..rank {
        dimensions.push(sb.read_length(&mut cur)?);
    }
    let max_dimensions = if flags & 0x1 != 0 {
        let mut max = Vec::with_capacity(usize::from(rank));
        for _ in 0..rank {
            max.push(sb.read_length(&mut cur)?);
        }
        Some(max)
    } else {
        None
    };

    Ok(Ok(Dataspace {
        version,
        dimensions,
        max_dimensions,
    }))
}

#[cfg(test)]
mod t {
    use super::*;

    fn sb() -> Superblock {
        Superblock {
            version: 0,
            offset_size: 8,
            length_size: 8,
            leaf_node_k: 4,
            internal_node_k: 16,
            base_address: 0,
            end_of_file_address: u64::MAX,
            root_header_address: 0,
        }
    }

    #[test]
    fn v1_simple() {
        let mut body = vec![1u8, 2, 0, 0, 0, 0, 0, 0];
        body.extend_from_slice(&10u64.to_le_bytes());
        body.extend_from_slice(&3u64.to_le_bytes());
        let ds = Dataspace::decode(&body, &sb()).unwrap();
        assert_eq!(ds.dimensions, vec![10, 3]);
        assert_eq!(ds.max_dimensions, None);
        assert_eq!(ds.element_count(), 30);
    }

    #[test]
    fn v2_with_max_dims() {
        let mut body = vec![2u8, 1, 1, 1];
        body.extend_from_slice(&4u64.to_le_bytes());
        body.extend_from_slice(&u64::MAX.to_le_bytes());
        let ds = Dataspace::decode(&body, &sb()).unwrap();
        assert_eq!(ds.dimensions, vec![4]);
        assert_eq!(ds.max_dimensions, Some(vec![u64::MAX]));
    }

    #[test]
    fn scalar_counts_one_element() {
        let body = vec![2u8, 0, 0, 0];
        let ds = Dataspace::decode(&body, &sb()).unwrap();
        assert_eq!(ds.element_count(), 1);
    }

    #[test]
    fn truncated_is_corrupt() {
        let body = vec![1u8, 4, 0];
        assert!(matches!(
            Dataspace::decode(&body, &sb()),
            Err(Error::CorruptMessage { kind: 0x1, .. })
        ));
    }
}
