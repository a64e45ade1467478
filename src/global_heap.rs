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
use bincode::Decode;

use crate::channel::FileChannel;
use crate::definitions::*;
use crate::error::{Error, Result};
use crate::sb::Superblock;
use crate::utils::{decode, pad8};

#[derive(Clone, Copy, Debug, Decode)]
struct ObjectPrefix {
    index: u16,
    _reference_count: u16,
    _reserved: u32,
}

/// Reference into a global heap collection, as stored in variable-length
/// dataset elements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GlobalHeapId {
    pub collection_address: HdfAddress,
    pub index: u32,
}

/// Fetch one reference-counted object out of a `GCOL` collection.
pub fn read_object(
    channel: &FileChannel,
    sb: &Superblock,
    id: GlobalHeapId,
) -> Result<Vec<u8>> {
    let address = id.collection_address;
    let corrupt = |detail: String| Error::corrupt_header(address, format!("global heap: {detail}"));

    let header_len = 8 + u64::from(sb.length_size);
    let header = channel.read_at(address, header_len)?;
    if header[..4] != GCOL_MAGIC {
        return Err(corrupt("bad signature".into()));
    }
    let version = header[4];
    if version != 1 {
        return Err(Error::UnsupportedVersion {
            what: "global heap collection",
            version,
        });
    }
    let mut cur = &header[8..];
    let collection_size = sb.read_length(&mut cur).map_err(|_| corrupt("truncated".into()))?;
    if collection_size < header_len {
        return Err(corrupt(format!("collection size {collection_size} too small")));
    }

    let objects = channel.read_at(address + header_len, collection_size - header_len)?;
    let mut cur = &objects[..];
    loop {
        if cur.len() < 8 + usize::from(sb.length_size) {
            return Err(corrupt(format!("object {} not found", id.index)));
        }
        let (prefix, used) = decode::<ObjectPrefix>(cur).unwrap();
        cur = &cur[used..];
        let object_size = sb.read_length(&mut cur).map_err(|_| corrupt("truncated".into()))?;
        // Object 0 is the free-space marker at the end of the collection.
        if prefix.index == 0 {
            return Err(corrupt(format!("object {} not found", id.index)));
        }
        let padded = pad8(object_size as usize);
        if padded > cur.len() {
            return Err(corrupt(format!(
                "object {} of {object_size} bytes overruns the collection",
                prefix.index
            )));
        }
        if u32::from(prefix.index) == id.index {
            return Ok(cur[..object_size as usize].to_vec());
        }
        cur = &cur[padded..];
    }
}

#[cfg(test)]
mod t {
    use std::io::Write;

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

    fn object(index: u16, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&index.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&(data.len() as u64).to_le_bytes());
        out.extend_from_slice(data);
        out.resize(16 + pad8(data.len()), 0);
        out
    }

    #[test]
    fn finds_object_by_index() {
        let mut body = Vec::new();
        body.extend_from_slice(&object(1, b"hello"));
        body.extend_from_slice(&object(2, b"variable length"));
        body.extend_from_slice(&object(0, &[]));

        let mut img = Vec::new();
        img.extend_from_slice(&GCOL_MAGIC);
        img.extend_from_slice(&[1, 0, 0, 0]);
        img.extend_from_slice(&((16 + body.len()) as u64).to_le_bytes());
        img.extend_from_slice(&body);

        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&img).unwrap();
        f.flush().unwrap();
        let ch = FileChannel::open(f.path()).unwrap();

        let id = GlobalHeapId {
            collection_address: 0,
            index: 2,
        };
        assert_eq!(read_object(&ch, &sb(), id).unwrap(), b"variable length");

        let missing = GlobalHeapId {
            collection_address: 0,
            index: 9,
        };
        assert!(read_object(&ch, &sb(), missing).is_err());
    }
}
