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

//! The fractal heap (`FRHP`): a doubling table of direct blocks, addressed
//! by opaque heap IDs.  Indexed links and attributes store their payloads
//! here.

use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::channel::FileChannel;
use crate::checksum::checksum;
use crate::definitions::*;
use crate::error::{Error, Result};
use crate::sb::Superblock;
use crate::utils::{enc_size, read_uint};

const ID_TYPE_MANAGED: u8 = 0;
const ID_TYPE_HUGE: u8 = 1;
const ID_TYPE_TINY: u8 = 2;

/// Parsed `FRHP` header plus the derived doubling-table geometry.
#[derive(Clone, Debug)]
pub struct FractalHeap {
    pub address: HdfAddress,
    pub id_length: u16,
    flags: u8,
    table_width: u16,
    starting_block_size: u64,
    max_direct_block_size: u64,
    managed_space: u64,
    root_address: HdfAddress,
    current_rows: u16,
    /// Bytes of a managed ID spent on the heap offset.
    heap_off_bytes: u8,
    /// Bytes of a managed ID spent on the object length.
    heap_len_bytes: u8,
    max_direct_rows: u16,
}

impl FractalHeap {
    pub fn read(
        channel: &FileChannel,
        sb: &Superblock,
        address: HdfAddress,
        verify_checksums: bool,
    ) -> Result<Self> {
        let corrupt = |detail: &str| Error::corrupt_header(address, format!("fractal heap: {detail}"));
        let o = u64::from(sb.offset_size);
        let l = u64::from(sb.length_size);
        let header_len = 14 + 12 * l + 3 * o + 8 + 4;
        let block = channel.read_at(address, header_len)?;
        if block[..4] != FRHP_MAGIC {
            return Err(corrupt("bad FRHP signature"));
        }
        let mut cur = &block[4..];
        let version = cur.read_u8().unwrap();
        if version != 0 {
            return Err(Error::UnsupportedVersion {
                what: "fractal heap",
                version,
            });
        }
        let id_length = cur.read_u16::<LittleEndian>().unwrap();
        let io_filter_len = cur.read_u16::<LittleEndian>().unwrap();
        let flags = cur.read_u8().unwrap();
        let max_managed_size = cur.read_u32::<LittleEndian>().unwrap();
        let truncated = |_| corrupt("truncated");
        let _next_huge_id = sb.read_length(&mut cur).map_err(truncated)?;
        let _huge_btree_address = sb.read_offset(&mut cur).map_err(truncated)?;
        let _free_space = sb.read_length(&mut cur).map_err(truncated)?;
        let _free_space_manager = sb.read_offset(&mut cur).map_err(truncated)?;
        let managed_space = sb.read_length(&mut cur).map_err(truncated)?;
        let _allocated_space = sb.read_length(&mut cur).map_err(truncated)?;
        let _iterator_offset = sb.read_length(&mut cur).map_err(truncated)?;
        let _managed_objects = sb.read_length(&mut cur).map_err(truncated)?;
        let _huge_size = sb.read_length(&mut cur).map_err(truncated)?;
        let _huge_objects = sb.read_length(&mut cur).map_err(truncated)?;
        let _tiny_size = sb.read_length(&mut cur).map_err(truncated)?;
        let _tiny_objects = sb.read_length(&mut cur).map_err(truncated)?;
        let table_width = cur.read_u16::<LittleEndian>().map_err(truncated)?;
        let starting_block_size = sb.read_length(&mut cur).map_err(truncated)?;
        let max_direct_block_size = sb.read_length(&mut cur).map_err(truncated)?;
        let max_heap_size_bits = cur.read_u16::<LittleEndian>().map_err(truncated)?;
        let _starting_rows = cur.read_u16::<LittleEndian>().map_err(truncated)?;
        let root_address = sb.read_offset(&mut cur).map_err(truncated)?;
        let current_rows = cur.read_u16::<LittleEndian>().map_err(truncated)?;

        if io_filter_len > 0 {
            return Err(Error::UnsupportedVersion {
                what: "fractal heap with i/o filters",
                version: 0,
            });
        }
        let body_len = block.len() - cur.len();
        let stored_sum = cur.read_u32::<LittleEndian>().map_err(truncated)?;
        if verify_checksums && checksum(&block[..body_len]) != stored_sum {
            return Err(Error::ChecksumMismatch { address });
        }

        for (what, v) in [
            ("table width", u64::from(table_width)),
            ("starting block size", starting_block_size),
            ("max direct block size", max_direct_block_size),
        ] {
            if v == 0 || !v.is_power_of_two() {
                return Err(corrupt(&format!("{what} {v} is not a power of two")));
            }
        }

        if max_direct_block_size < starting_block_size {
            return Err(corrupt(&format!(
                "max direct block size {max_direct_block_size} below starting size {starting_block_size}"
            )));
        }
        let heap_off_width = (u32::from(max_heap_size_bits) + 7) / 8;
        if !(1..=8).contains(&heap_off_width) {
            return Err(corrupt(&format!("max heap size of {max_heap_size_bits} bits")));
        }
        let heap_off_bytes = heap_off_width as u8;
        let max_dir_off_bytes = ((log2(max_direct_block_size) + 7) / 8) as u8;
        let heap_len_bytes = max_dir_off_bytes.min(enc_size(u64::from(max_managed_size)));
        let max_direct_rows =
            (log2(max_direct_block_size) - log2(starting_block_size) + 2) as u16;

        Ok(FractalHeap {
            address,
            id_length,
            flags,
            table_width,
            starting_block_size,
            max_direct_block_size,
            managed_space,
            root_address,
            current_rows,
            heap_off_bytes,
            heap_len_bytes,
            max_direct_rows,
        })
    }

    /// Resolve a heap ID to the object's bytes.
    pub fn get(
        &self,
        channel: &FileChannel,
        sb: &Superblock,
        heap_id: &[u8],
        verify_checksums: bool,
    ) -> Result<Vec<u8>> {
        let corrupt = |detail: String| {
            Error::corrupt_header(self.address, format!("fractal heap id: {detail}"))
        };
        let Some((&first, rest)) = heap_id.split_first() else {
            return Err(corrupt("empty".into()));
        };
        let id_version = first >> 6;
        if id_version != 0 {
            return Err(Error::UnsupportedVersion {
                what: "fractal heap id",
                version: id_version,
            });
        }
        match (first >> 4) & 0x3 {
            ID_TYPE_MANAGED => {
                let mut cur = rest;
                let offset = read_uint(&mut cur, self.heap_off_bytes)
                    .map_err(|_| corrupt("truncated".into()))?;
                let length = read_uint(&mut cur, self.heap_len_bytes)
                    .map_err(|_| corrupt("truncated".into()))?;
                self.get_managed(channel, sb, offset, length, verify_checksums)
            }
            ID_TYPE_TINY => {
                let len = usize::from(first & 0xf) + 1;
                if rest.len() < len {
                    return Err(corrupt(format!("tiny object of {len} bytes truncated")));
                }
                Ok(rest[..len].to_vec())
            }
            ID_TYPE_HUGE => Err(Error::UnsupportedVersion {
                what: "huge fractal heap object",
                version: 0,
            }),
            t => Err(corrupt(format!("unknown id type {t}"))),
        }
    }

    fn get_managed(
        &self,
        channel: &FileChannel,
        sb: &Superblock,
        offset: u64,
        length: u64,
        verify_checksums: bool,
    ) -> Result<Vec<u8>> {
        if self.root_address == u64::MAX {
            return Err(Error::corrupt_header(
                self.address,
                "managed object in a heap with no root block".to_string(),
            ));
        }
        if self.current_rows == 0 {
            // The root is a lone direct block covering all managed space.
            return self.read_from_direct(
                channel,
                sb,
                self.root_address,
                self.managed_space,
                offset,
                length,
                verify_checksums,
            );
        }
        self.locate_indirect(
            channel,
            sb,
            self.root_address,
            0,
            self.current_rows,
            offset,
            length,
            verify_checksums,
        )
    }

    /// Walk one indirect block.  `block_start` is the heap-space offset the
    /// block covers from; rows double in size the same way at every level.
    #[allow(clippy::too_many_arguments)]
    fn locate_indirect(
        &self,
        channel: &FileChannel,
        sb: &Superblock,
        block_address: HdfAddress,
        block_start: u64,
        nrows: u16,
        offset: u64,
        length: u64,
        verify_checksums: bool,
    ) -> Result<Vec<u8>> {
        let corrupt = |detail: String| {
            Error::corrupt_header(block_address, format!("fractal heap indirect block: {detail}"))
        };

        let rel = offset
            .checked_sub(block_start)
            .ok_or_else(|| corrupt(format!("offset {offset} before block start {block_start}")))?;
        let row = self.row_of(rel);
        let col = (rel - self.row_start(row)) / self.block_size(row);
        if row >= u64::from(nrows) || col >= u64::from(self.table_width) {
            return Err(corrupt(format!("offset {offset} outside the block's table")));
        }
        let entry = row * u64::from(self.table_width) + col;

        let header_len = 4 + 1 + u64::from(sb.offset_size) + u64::from(self.heap_off_bytes);
        let entries_len = u64::from(nrows) * u64::from(self.table_width) * u64::from(sb.offset_size);
        let block = channel.read_at(block_address, header_len + entries_len + 4)?;
        if block[..4] != FHIB_MAGIC {
            return Err(corrupt("bad FHIB signature".into()));
        }
        if verify_checksums {
            let body_len = block.len() - 4;
            let stored = u32::from_le_bytes(block[body_len..].try_into().unwrap());
            if checksum(&block[..body_len]) != stored {
                return Err(Error::ChecksumMismatch {
                    address: block_address,
                });
            }
        }
        let mut cur = &block[header_len as usize + (entry * u64::from(sb.offset_size)) as usize..];
        let child_address = sb.read_offset(&mut cur).unwrap();
        if child_address == u64::MAX {
            return Err(corrupt(format!("offset {offset} points into an unallocated block")));
        }

        if row < u64::from(self.max_direct_rows) {
            self.read_from_direct(
                channel,
                sb,
                child_address,
                self.block_size(row),
                offset,
                length,
                verify_checksums,
            )
        } else {
            let child_start = block_start + self.row_start(row) + col * self.block_size(row);
            let child_rows = (log2(self.block_size(row)) as u16)
                .saturating_sub(log2(
                    self.starting_block_size * u64::from(self.table_width),
                ) as u16)
                + 1;
            self.locate_indirect(
                channel,
                sb,
                child_address,
                child_start,
                child_rows,
                offset,
                length,
                verify_checksums,
            )
        }
    }

    /// Pull `length` object bytes out of one direct block.  Heap-space
    /// offsets count the block header too, so the object's position inside
    /// the block is just the offset difference.
    #[allow(clippy::too_many_arguments)]
    fn read_from_direct(
        &self,
        channel: &FileChannel,
        sb: &Superblock,
        block_address: HdfAddress,
        block_size: u64,
        offset: u64,
        length: u64,
        verify_checksums: bool,
    ) -> Result<Vec<u8>> {
        let corrupt = |detail: String| {
            Error::corrupt_header(block_address, format!("fractal heap direct block: {detail}"))
        };
        let mut block = channel.read_at(block_address, block_size)?;
        if block[..4] != FHDB_MAGIC {
            return Err(corrupt("bad FHDB signature".into()));
        }
        let mut cur = &block[4..];
        let _version = cur.read_u8().unwrap();
        let _heap_header_address = sb.read_offset(&mut cur).map_err(|_| corrupt("truncated".into()))?;
        let block_offset =
            read_uint(&mut cur, self.heap_off_bytes).map_err(|_| corrupt("truncated".into()))?;
        let header_len = block.len() - cur.len();

        if self.flags & 0x2 != 0 {
            let mut sum_bytes = [0u8; 4];
            let mut tail = &block[header_len..];
            tail.read_exact(&mut sum_bytes).map_err(|_| corrupt("truncated".into()))?;
            if verify_checksums {
                let stored = u32::from_le_bytes(sum_bytes);
                // The stored field is zeroed while checksumming.
                block[header_len..header_len + 4].copy_from_slice(&[0u8; 4]);
                if checksum(&block) != stored {
                    return Err(Error::ChecksumMismatch {
                        address: block_address,
                    });
                }
                block[header_len..header_len + 4].copy_from_slice(&sum_bytes);
            }
        }

        let start = offset
            .checked_sub(block_offset)
            .ok_or_else(|| corrupt(format!("object offset {offset} before block {block_offset}")))?;
        let end = start
            .checked_add(length)
            .filter(|end| *end <= block.len() as u64)
            .ok_or_else(|| corrupt(format!("object of {length} bytes overruns the block")))?;
        Ok(block[start as usize..end as usize].to_vec())
    }

    fn block_size(&self, row: u64) -> u64 {
        self.starting_block_size << (row.max(1) - 1)
    }

    fn row_start(&self, row: u64) -> u64 {
        if row == 0 {
            0
        } else {
            (u64::from(self.table_width) * self.starting_block_size) << (row - 1)
        }
    }

    fn row_of(&self, rel_offset: u64) -> u64 {
        let first_row_span = u64::from(self.table_width) * self.starting_block_size;
        if rel_offset < first_row_span {
            0
        } else {
            u64::from(log2(rel_offset / first_row_span)) + 1
        }
    }
}

fn log2(v: u64) -> u32 {
    63 - v.leading_zeros()
}
