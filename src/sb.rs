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

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::debug;

use crate::channel::FileChannel;
use crate::checksum::checksum;
use crate::definitions::*;
use crate::error::{Error, Result};
use crate::utils::read_uint;

/// The file-level header: format version and the addressing parameters
/// every other decoder depends on.  Immutable after parse.
#[derive(Clone, Copy, Debug)]
pub struct Superblock {
    pub version: u8,
    pub offset_size: u8,
    pub length_size: u8,
    /// 1/2 rank of group-node B-tree leaves; versions 0 and 1 only.
    pub leaf_node_k: u16,
    /// 1/2 rank of group-node B-tree internal nodes; versions 0 and 1 only.
    pub internal_node_k: u16,
    /// Where the HDF5 data begins.  All other addresses are relative to
    /// this (zero unless the file carries a user block).
    pub base_address: HdfAddress,
    pub end_of_file_address: HdfAddress,
    /// Object header of the root group, already made absolute.
    pub root_header_address: HdfAddress,
}

impl Superblock {
    /// Scan for the signature at offsets 0, 512, 1024, 2048, … and parse
    /// the version-specific fields that follow it.
    pub fn locate(channel: &FileChannel, verify_checksums: bool) -> Result<Self> {
        let limit = channel.size().min(SIGNATURE_SCAN_LIMIT);
        let mut offset = 0u64;
        loop {
            if offset + HDF5_SIGNATURE.len() as u64 > limit {
                return Err(Error::NotHdf5);
            }
            let probe = channel.read_at(offset, HDF5_SIGNATURE.len() as u64)?;
            if probe == HDF5_SIGNATURE {
                debug!(offset, "found superblock signature");
                return Self::parse(channel, offset, verify_checksums);
            }
            offset = if offset == 0 { 512 } else { offset * 2 };
        }
    }

    fn parse(channel: &FileChannel, base: u64, verify_checksums: bool) -> Result<Self> {
        // Large enough for any superblock version; short files just map less.
        let len = (channel.size() - base).min(256);
        let block = channel.map_range(base, len)?;
        let mut cur = &block[HDF5_SIGNATURE.len()..];

        let corrupt =
            |detail: &str| Error::corrupt_header(base, format!("superblock: {detail}"));
        let truncated = |_| corrupt("truncated");

        let version = cur.read_u8().map_err(truncated)?;
        let sb = match version {
            0 | 1 => {
                let _free_space_version = cur.read_u8().map_err(truncated)?;
                let _root_entry_version = cur.read_u8().map_err(truncated)?;
                let _reserved = cur.read_u8().map_err(truncated)?;
                let _shared_header_version = cur.read_u8().map_err(truncated)?;
                let offset_size = cur.read_u8().map_err(truncated)?;
                let length_size = cur.read_u8().map_err(truncated)?;
                let _reserved = cur.read_u8().map_err(truncated)?;
                let leaf_node_k = cur.read_u16::<LittleEndian>().map_err(truncated)?;
                let internal_node_k = cur.read_u16::<LittleEndian>().map_err(truncated)?;
                let _consistency_flags = cur.read_u32::<LittleEndian>().map_err(truncated)?;
                if version == 1 {
                    let _indexed_storage_k = cur.read_u16::<LittleEndian>().map_err(truncated)?;
                    let _reserved = cur.read_u16::<LittleEndian>().map_err(truncated)?;
                }
                check_widths(base, offset_size, length_size)?;
                let _stored_base = read_uint(&mut cur, offset_size).map_err(truncated)?;
                let _free_space_address = read_uint(&mut cur, offset_size).map_err(truncated)?;
                let end_of_file_address = read_uint(&mut cur, offset_size).map_err(truncated)?;
                let _driver_info_address = read_uint(&mut cur, offset_size).map_err(truncated)?;

                // Root group symbol table entry.  Only the object header
                // address matters; the B-tree and heap addresses in the
                // scratch space are rediscovered through the root group's
                // own symbol table message.
                let _link_name_offset = read_uint(&mut cur, offset_size).map_err(truncated)?;
                let root_header = read_uint(&mut cur, offset_size).map_err(truncated)?;

                Superblock {
                    version,
                    offset_size,
                    length_size,
                    leaf_node_k,
                    internal_node_k,
                    base_address: base,
                    end_of_file_address,
                    root_header_address: base + root_header,
                }
            }
            2 | 3 => {
                let offset_size = cur.read_u8().map_err(truncated)?;
                let length_size = cur.read_u8().map_err(truncated)?;
                let _consistency_flags = cur.read_u8().map_err(truncated)?;
                check_widths(base, offset_size, length_size)?;
                let _stored_base = read_uint(&mut cur, offset_size).map_err(truncated)?;
                let _extension_address = read_uint(&mut cur, offset_size).map_err(truncated)?;
                let end_of_file_address = read_uint(&mut cur, offset_size).map_err(truncated)?;
                let root_header = read_uint(&mut cur, offset_size).map_err(truncated)?;

                let body_len = block.len() - cur.len();
                let stored_sum = cur.read_u32::<LittleEndian>().map_err(truncated)?;
                if verify_checksums && checksum(&block[..body_len]) != stored_sum {
                    return Err(Error::ChecksumMismatch { address: base });
                }

                Superblock {
                    version,
                    offset_size,
                    length_size,
                    leaf_node_k: 0,
                    internal_node_k: 0,
                    base_address: base,
                    end_of_file_address,
                    root_header_address: base + root_header,
                }
            }
            v => {
                return Err(Error::UnsupportedVersion {
                    what: "superblock",
                    version: v,
                })
            }
        };

        sb.sanity(channel.size())?;
        Ok(sb)
    }

    fn sanity(&self, file_size: u64) -> Result<()> {
        if self.root_header_address < self.base_address
            || self.root_header_address >= self.end_of_file_address
        {
            return Err(Error::corrupt_header(
                self.base_address,
                format!(
                    "root header {:#x} outside [{:#x}, {:#x})",
                    self.root_header_address, self.base_address, self.end_of_file_address
                ),
            ));
        }
        if self.end_of_file_address > file_size {
            return Err(Error::corrupt_header(
                self.base_address,
                format!(
                    "end-of-file address {:#x} past the real end {:#x}",
                    self.end_of_file_address, file_size
                ),
            ));
        }
        Ok(())
    }

    /// Read an address field, normalizing the width-dependent undefined
    /// sentinel to `u64::MAX` and rebasing everything else.
    pub fn read_offset<R: Read>(&self, r: &mut R) -> std::io::Result<HdfAddress> {
        let raw = read_uint(r, self.offset_size)?;
        if is_undefined(raw, self.offset_size) {
            Ok(u64::MAX)
        } else {
            Ok(self.base_address + raw)
        }
    }

    /// Read a length field.
    pub fn read_length<R: Read>(&self, r: &mut R) -> std::io::Result<HdfLength> {
        read_uint(r, self.length_size)
    }
}

fn check_widths(base: u64, offset_size: u8, length_size: u8) -> Result<()> {
    for (what, width) in [("offset", offset_size), ("length", length_size)] {
        if !matches!(width, 2 | 4 | 8) {
            return Err(Error::corrupt_header(
                base,
                format!("bad {what} size {width}"),
            ));
        }
    }
    Ok(())
}
