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

//! Version 1 B-trees (`TREE`): node type 0 indexes a group's symbol-table
//! nodes, node type 1 indexes a chunked dataset's chunks.

use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::channel::FileChannel;
use crate::definitions::*;
use crate::error::{Error, Result};
use crate::sb::Superblock;
use crate::utils::read_uint;

const NODE_TYPE_GROUP: u8 = 0;
const NODE_TYPE_CHUNK: u8 = 1;

/// One entry of a chunk B-tree: where a chunk's encoded bytes live and
/// which element-space corner they belong to.
#[derive(Clone, Debug)]
pub struct ChunkRecord {
    pub size_bytes: u32,
    pub filter_mask: u32,
    /// Element-space coordinates of the chunk's lower corner, one entry
    /// per key dimension (the dataset rank plus the trailing element
    /// offset, which writers leave at zero).
    pub offset: Vec<u64>,
    pub address: HdfAddress,
}

struct NodePrefix {
    level: u8,
    entries_used: u16,
}

fn read_prefix(
    channel: &FileChannel,
    sb: &Superblock,
    address: HdfAddress,
    expected_type: u8,
) -> Result<NodePrefix> {
    let prefix_len = 8 + 2 * u64::from(sb.offset_size);
    let block = channel.read_at(address, prefix_len)?;
    if block[..4] != TREE_MAGIC {
        return Err(Error::corrupt_btree(address, "bad TREE signature"));
    }
    let mut cur = &block[4..];
    let node_type = cur.read_u8().unwrap();
    let level = cur.read_u8().unwrap();
    let entries_used = cur.read_u16::<LittleEndian>().unwrap();
    if node_type != expected_type {
        return Err(Error::corrupt_btree(
            address,
            format!("node type {node_type}, expected {expected_type}"),
        ));
    }
    Ok(NodePrefix {
        level,
        entries_used,
    })
}

/// Collect the symbol-table-node addresses below a group B-tree, in key
/// order.
pub fn group_leaf_entries(
    channel: &FileChannel,
    sb: &Superblock,
    root_address: HdfAddress,
) -> Result<Vec<HdfAddress>> {
    let mut out = Vec::new();
    walk_group(channel, sb, root_address, None, &mut out)?;
    Ok(out)
}

fn walk_group(
    channel: &FileChannel,
    sb: &Superblock,
    address: HdfAddress,
    expected_level: Option<u8>,
    out: &mut Vec<HdfAddress>,
) -> Result<()> {
    let prefix = read_prefix(channel, sb, address, NODE_TYPE_GROUP)?;
    if let Some(expected) = expected_level {
        if prefix.level != expected {
            return Err(Error::corrupt_btree(
                address,
                format!("node level {}, expected {expected}", prefix.level),
            ));
        }
    }
    let prefix_len = 8 + 2 * u64::from(sb.offset_size);
    let entries = u64::from(prefix.entries_used);
    let body_len = (entries + 1) * u64::from(sb.length_size) + entries * u64::from(sb.offset_size);
    let body = channel.read_at(address + prefix_len, body_len)?;
    let mut cur = &body[..];

    let mut children = Vec::with_capacity(prefix.entries_used as usize);
    for _ in 0..prefix.entries_used {
        // Keys are offsets into the group's name heap; child discovery
        // does not need them.
        let _key = read_uint(&mut cur, sb.length_size).unwrap();
        children.push(sb.read_offset(&mut cur).unwrap());
    }

    if prefix.level == 0 {
        out.extend_from_slice(&children);
    } else {
        for child in children {
            walk_group(channel, sb, child, Some(prefix.level - 1), out)?;
        }
    }
    Ok(())
}

/// Collect every chunk record below a chunk B-tree.  `key_dimensionality`
/// is the dataset rank plus one, exactly as stored in the chunked layout
/// message.
pub fn chunk_records(
    channel: &FileChannel,
    sb: &Superblock,
    root_address: HdfAddress,
    key_dimensionality: u8,
) -> Result<Vec<ChunkRecord>> {
    let mut out = Vec::new();
    if root_address != u64::MAX {
        walk_chunks(channel, sb, root_address, key_dimensionality, None, &mut out)?;
    }
    Ok(out)
}

fn walk_chunks(
    channel: &FileChannel,
    sb: &Superblock,
    address: HdfAddress,
    key_dimensionality: u8,
    expected_level: Option<u8>,
    out: &mut Vec<ChunkRecord>,
) -> Result<()> {
    let prefix = read_prefix(channel, sb, address, NODE_TYPE_CHUNK)?;
    if let Some(expected) = expected_level {
        if prefix.level != expected {
            return Err(Error::corrupt_btree(
                address,
                format!("node level {}, expected {expected}", prefix.level),
            ));
        }
    }
    let prefix_len = 8 + 2 * u64::from(sb.offset_size);
    let key_len = 8 + 8 * u64::from(key_dimensionality);
    let entries = u64::from(prefix.entries_used);
    let body_len = (entries + 1) * key_len + entries * u64::from(sb.offset_size);
    let body = channel.read_at(address + prefix_len, body_len)?;
    let mut cur = &body[..];

    for _ in 0..prefix.entries_used {
        let size_bytes = cur.read_u32::<LittleEndian>().unwrap();
        let filter_mask = cur.read_u32::<LittleEndian>().unwrap();
        let mut offset = Vec::with_capacity(usize::from(key_dimensionality));
        for _ in 0..key_dimensionality {
            offset.push(cur.read_u64::<LittleEndian>().unwrap());
        }
        let child = sb.read_offset(&mut cur).unwrap();
        if prefix.level == 0 {
            out.push(ChunkRecord {
                size_bytes,
                filter_mask,
                offset,
                address: child,
            });
        } else {
            walk_chunks(
                channel,
                sb,
                child,
                key_dimensionality,
                Some(prefix.level - 1),
                out,
            )?;
        }
    }
    Ok(())
}

/// One `SNOD` entry: a named link to an object header, with the group
/// B-tree and heap addresses (or a soft link target) cached in the scratch
/// space.
#[derive(Clone, Debug)]
pub struct SymbolTableEntry {
    pub link_name_offset: u64,
    pub object_header_address: HdfAddress,
    pub cache_type: u32,
    pub scratch: [u8; 16],
}

/// Parse a symbol table node (`SNOD`).
pub fn read_symbol_table_node(
    channel: &FileChannel,
    sb: &Superblock,
    address: HdfAddress,
) -> Result<Vec<SymbolTableEntry>> {
    let header = channel.read_at(address, 8)?;
    if header[..4] != SNOD_MAGIC {
        return Err(Error::corrupt_btree(address, "bad SNOD signature"));
    }
    let version = header[4];
    if version != 1 {
        return Err(Error::UnsupportedVersion {
            what: "symbol table node",
            version,
        });
    }
    let count = u16::from_le_bytes(header[6..8].try_into().unwrap());
    let entry_len = 2 * u64::from(sb.offset_size) + 8 + 16;
    let body = channel.read_at(address + 8, u64::from(count) * entry_len)?;
    let mut cur = &body[..];

    let mut entries = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        // The link name offset indexes the local heap, so it is not
        // rebased like a file address.
        let link_name_offset = read_uint(&mut cur, sb.offset_size).unwrap();
        let object_header_address = sb.read_offset(&mut cur).unwrap();
        let cache_type = cur.read_u32::<LittleEndian>().unwrap();
        let _reserved = cur.read_u32::<LittleEndian>().unwrap();
        let mut scratch = [0u8; 16];
        cur.read_exact(&mut scratch).unwrap();
        entries.push(SymbolTableEntry {
            link_name_offset,
            object_header_address,
            cache_type,
            scratch,
        });
    }
    Ok(entries)
}
