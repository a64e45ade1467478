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

use byteorder::{LittleEndian, ReadBytesExt};

use crate::definitions::{HdfAddress, HdfLength};
use crate::error::{Error, Result};
use crate::sb::Superblock;
use crate::utils::read_vec;

pub const MESSAGE_TYPE: u16 = 0x8;

/// Where a dataset's elements live.
#[derive(Clone, Debug)]
pub enum DataLayout {
    /// The payload is stored inline in the message itself.
    Compact { data: Vec<u8> },
    /// One dense slab at a file address.  The address is undefined for a
    /// dataset whose storage was never allocated.
    Contiguous {
        address: HdfAddress,
        size: HdfLength,
    },
    /// Tiled storage indexed by a version 1 B-tree.
    Chunked {
        btree_address: HdfAddress,
        /// Tile shape in elements, one entry per dataspace dimension.
        chunk_dimensions: Vec<u32>,
        element_size: u32,
    },
}

impl DataLayout {
    pub fn decode(body: &[u8], sb: &Superblock) -> Result<Self> {
        let truncated =
            |_| Error::corrupt_message(MESSAGE_TYPE, "truncated data layout message");
        let mut cur = body;

        let version = cur.read_u8().map_err(truncated)?;
        if version != 3 {
            return Err(Error::UnsupportedVersion {
                what: "data layout message",
                version,
            });
        }
        let class = cur.read_u8().map_err(truncated)?;
        match class {
            0 => {
                let size = cur.read_u16::<LittleEndian>().map_err(truncated)?;
                let data = read_vec(&mut cur, usize::from(size)).map_err(truncated)?;
                Ok(DataLayout::Compact { data })
            }
            1 => {
                let address = sb.read_offset(&mut cur).map_err(truncated)?;
                let size = sb.read_length(&mut cur).map_err(truncated)?;
                Ok(DataLayout::Contiguous { address, size })
            }
            2 => {
                // Dimensionality counts one extra entry; the final 4-byte
                // "dimension" is the element size.
                let dimensionality = cur.read_u8().map_err(truncated)?;
                if dimensionality < 2 {
                    return Err(Error::corrupt_message(
                        MESSAGE_TYPE,
                        format!("chunked layout with dimensionality {dimensionality}"),
                    ));
                }
                let btree_address = sb.read_offset(&mut cur).map_err(truncated)?;
                let mut chunk_dimensions = Vec::with_capacity(usize::from(dimensionality - 1));
                for _ in 0..dimensionality - 1 {
                    chunk_dimensions.push(cur.read_u32::<LittleEndian>().map_err(truncated)?);
                }
                let element_size = cur.read_u32::<LittleEndian>().map_err(truncated)?;
                Ok(DataLayout::Chunked {
                    btree_address,
                    chunk_dimensions,
                    element_size,
                })
            }
            _ => Err(Error::UnsupportedLayout),
        }
    }
}
