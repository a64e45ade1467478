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

use crate::channel::FileChannel;
use crate::definitions::*;
use crate::error::{Error, Result};
use crate::sb::Superblock;
use crate::utils::read_cstr;

/// The classic name heap used by symbol-table groups.  Link names are
/// NUL-terminated strings addressed by byte offset into the data segment.
#[derive(Clone, Copy, Debug)]
pub struct LocalHeap {
    pub address: HdfAddress,
    pub data_segment_size: HdfLength,
    pub data_segment_address: HdfAddress,
}

impl LocalHeap {
    pub fn read(channel: &FileChannel, sb: &Superblock, address: HdfAddress) -> Result<Self> {
        let corrupt = |detail: &str| Error::corrupt_header(address, format!("local heap: {detail}"));
        let header_len = 8 + 2 * u64::from(sb.length_size) + u64::from(sb.offset_size);
        let block = channel.read_at(address, header_len)?;
        if block[..4] != HEAP_MAGIC {
            return Err(corrupt("bad signature"));
        }
        let mut cur = &block[4..];
        let version = cur.read_u8().map_err(|_| corrupt("truncated"))?;
        if version != 0 {
            return Err(Error::UnsupportedVersion {
                what: "local heap",
                version,
            });
        }
        cur = &cur[3..]; // reserved
        let data_segment_size = sb.read_length(&mut cur).map_err(|_| corrupt("truncated"))?;
        let _free_list_head = sb.read_length(&mut cur).map_err(|_| corrupt("truncated"))?;
        let data_segment_address = sb.read_offset(&mut cur).map_err(|_| corrupt("truncated"))?;
        Ok(LocalHeap {
            address,
            data_segment_size,
            data_segment_address,
        })
    }

    /// The NUL-terminated string at `offset` within the data segment.
    pub fn get(&self, channel: &FileChannel, offset: u64) -> Result<String> {
        if offset >= self.data_segment_size {
            return Err(Error::corrupt_header(
                self.address,
                format!(
                    "heap offset {offset} outside data segment of {} bytes",
                    self.data_segment_size
                ),
            ));
        }
        let slice = channel.map_range(
            self.data_segment_address + offset,
            self.data_segment_size - offset,
        )?;
        read_cstr(&slice).ok_or_else(|| {
            Error::corrupt_header(self.address, format!("name at {offset} is not UTF-8"))
        })
    }
}
