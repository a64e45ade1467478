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

//! Version 2 B-trees (`BTHD`/`BTIN`/`BTLF`), used for indexed links and
//! attributes.  Every node carries a Jenkins lookup3 checksum.


use byteorder::{LittleEndian, ReadBytesExt};

use crate::channel::FileChannel;
use crate::checksum::checksum;
use crate::definitions::*;
use crate::error::{Error, Result};
use crate::sb::Superblock;
use crate::utils::{enc_size, read_uint, read_vec};

pub const RECORD_LINK_NAME: u8 = 5;
pub const RECORD_LINK_CREATION_ORDER: u8 = 6;
pub const RECORD_ATTRIBUTE_NAME: u8 = 8;

/// A typed record out of a v2 B-tree.
#[derive(Clone, Debug)]
pub enum RecordV2 {
    /// Type 5: a link indexed by name hash; the heap ID resolves to a link
    /// message in the group's fractal heap.
    LinkName { name_hash: u32, heap_id: Vec<u8> },
    /// Type 6: a link indexed by creation order.
    LinkCreationOrder { order: u64, heap_id: Vec<u8> },
    /// Type 8: an attribute indexed by name; the heap ID resolves to an
    /// attribute message in the object's fractal heap.
    AttributeName {
        heap_id: [u8; 8],
        flags: u8,
        creation_order: u32,
        name_hash: u32,
    },
    /// A record type the traversal does not interpret.
    Unknown(Vec<u8>),
}

/// Parsed `BTHD` header plus the node-capacity table derived from it.
#[derive(Clone, Debug)]
pub struct BtreeV2 {
    pub address: HdfAddress,
    pub record_type: u8,
    pub node_size: u32,
    pub record_size: u16,
    depth: u16,
    root_address: HdfAddress,
    root_nrec: u16,
    /// Maximum record count of a node at each depth; decides the width of
    /// the child-record-count fields in internal nodes.
    max_nrec: Vec<u64>,
    /// Maximum record count of a whole subtree at each depth.
    cum_max_nrec: Vec<u64>,
}

impl BtreeV2 {
    pub fn read(
        channel: &FileChannel,
        sb: &Superblock,
        address: HdfAddress,
        verify_checksums: bool,
    ) -> Result<Self> {
        let corrupt = |detail: &str| Error::corrupt_btree(address, detail);
        let header_len = 16 + u64::from(sb.offset_size) + 2 + u64::from(sb.length_size) + 4;
        let block = channel.read_at(address, header_len)?;
        if block[..4] != BTHD_MAGIC {
            return Err(corrupt("bad BTHD signature"));
        }
        let mut cur = &block[4..];
        let version = cur.read_u8().unwrap();
        if version != 0 {
            return Err(Error::UnsupportedVersion {
                what: "v2 b-tree header",
                version,
            });
        }
        let record_type = cur.read_u8().unwrap();
        let node_size = cur.read_u32::<LittleEndian>().unwrap();
        let record_size = cur.read_u16::<LittleEndian>().unwrap();
        let depth = cur.read_u16::<LittleEndian>().unwrap();
        let _split_percent = cur.read_u8().unwrap();
        let _merge_percent = cur.read_u8().unwrap();
        let root_address = sb.read_offset(&mut cur).map_err(|_| corrupt("truncated"))?;
        let root_nrec = cur.read_u16::<LittleEndian>().map_err(|_| corrupt("truncated"))?;
        let _total_nrec = sb.read_length(&mut cur).map_err(|_| corrupt("truncated"))?;

        let body_len = block.len() - cur.len();
        let stored_sum = cur.read_u32::<LittleEndian>().map_err(|_| corrupt("truncated"))?;
        if verify_checksums && checksum(&block[..body_len]) != stored_sum {
            return Err(Error::ChecksumMismatch { address });
        }

        if record_size == 0 || u64::from(node_size) <= NODE_OVERHEAD {
            return Err(corrupt("degenerate node geometry"));
        }

        // Capacity table, leaf upward.  An internal node's child pointers
        // shrink or grow with the widths of these counts, so they must be
        // computed exactly the way the writer did.
        let avail = u64::from(node_size) - NODE_OVERHEAD;
        let leaf_nrec = avail / u64::from(record_size);
        let mut max_nrec = vec![leaf_nrec];
        let mut cum_max_nrec = vec![leaf_nrec];
        for d in 1..=usize::from(depth) {
            let ptr = child_pointer_size(sb, &max_nrec, &cum_max_nrec, d);
            let nrec = avail
                .checked_sub(ptr)
                .map(|room| room / (u64::from(record_size) + ptr))
                .unwrap_or(0);
            if nrec == 0 {
                return Err(corrupt("internal node cannot hold any records"));
            }
            cum_max_nrec.push((nrec + 1) * cum_max_nrec[d - 1] + nrec);
            max_nrec.push(nrec);
        }

        Ok(BtreeV2 {
            address,
            record_type,
            node_size,
            record_size,
            depth,
            root_address,
            root_nrec,
            max_nrec,
            cum_max_nrec,
        })
    }

    /// Full traversal, emitting records in key order.
    pub fn records(
        &self,
        channel: &FileChannel,
        sb: &Superblock,
        verify_checksums: bool,
    ) -> Result<Vec<RecordV2>> {
        let mut out = Vec::new();
        if self.root_address != u64::MAX && self.root_nrec > 0 {
            self.walk(
                channel,
                sb,
                self.root_address,
                u64::from(self.root_nrec),
                self.depth,
                verify_checksums,
                &mut out,
            )?;
        }
        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    fn walk(
        &self,
        channel: &FileChannel,
        sb: &Superblock,
        address: HdfAddress,
        nrec: u64,
        depth: u16,
        verify_checksums: bool,
        out: &mut Vec<RecordV2>,
    ) -> Result<()> {
        let corrupt = |detail: &str| Error::corrupt_btree(address, detail);
        if depth == 0 {
            let used = 6 + nrec * u64::from(self.record_size) + 4;
            let block = channel.read_at(address, used)?;
            if block[..4] != BTLF_MAGIC {
                return Err(corrupt("bad BTLF signature"));
            }
            self.check_node(address, &block, verify_checksums)?;
            let mut cur = &block[6..];
            for _ in 0..nrec {
                let raw = read_vec(&mut cur, usize::from(self.record_size)).unwrap();
                out.push(self.parse_record(&raw)?);
            }
            return Ok(());
        }

        let ptr = child_pointer_size(sb, &self.max_nrec, &self.cum_max_nrec, usize::from(depth));
        let used = 6 + nrec * u64::from(self.record_size) + (nrec + 1) * ptr + 4;
        let block = channel.read_at(address, used)?;
        if block[..4] != BTIN_MAGIC {
            return Err(corrupt("bad BTIN signature"));
        }
        self.check_node(address, &block, verify_checksums)?;
        let mut cur = &block[6..];

        let mut records = Vec::with_capacity(nrec as usize);
        for _ in 0..nrec {
            let raw = read_vec(&mut cur, usize::from(self.record_size)).unwrap();
            records.push(self.parse_record(&raw)?);
        }
        let nrec_width = enc_size(self.max_nrec[usize::from(depth) - 1]);
        let total_width = if depth > 1 {
            enc_size(self.cum_max_nrec[usize::from(depth) - 1])
        } else {
            0
        };
        let mut children = Vec::with_capacity(nrec as usize + 1);
        for _ in 0..=nrec {
            let child_address = sb.read_offset(&mut cur).unwrap();
            let child_nrec = read_uint(&mut cur, nrec_width).unwrap();
            if total_width > 0 {
                let _child_total = read_uint(&mut cur, total_width).unwrap();
            }
            children.push((child_address, child_nrec));
        }

        // Children and records interleave in key order.
        for (i, (child_address, child_nrec)) in children.into_iter().enumerate() {
            self.walk(
                channel,
                sb,
                child_address,
                child_nrec,
                depth - 1,
                verify_checksums,
                out,
            )?;
            if i < records.len() {
                out.push(records[i].clone());
            }
        }
        Ok(())
    }

    fn check_node(&self, address: HdfAddress, block: &[u8], verify: bool) -> Result<()> {
        if !verify {
            return Ok(());
        }
        let body_len = block.len() - 4;
        let stored = u32::from_le_bytes(block[body_len..].try_into().unwrap());
        if checksum(&block[..body_len]) != stored {
            return Err(Error::ChecksumMismatch { address });
        }
        Ok(())
    }

    fn parse_record(&self, raw: &[u8]) -> Result<RecordV2> {
        let corrupt = || {
            Error::corrupt_btree(
                self.address,
                format!("record of {} bytes too short for type {}", raw.len(), self.record_type),
            )
        };
        match self.record_type {
            RECORD_LINK_NAME => {
                if raw.len() < 5 {
                    return Err(corrupt());
                }
                Ok(RecordV2::LinkName {
                    name_hash: u32::from_le_bytes(raw[..4].try_into().unwrap()),
                    heap_id: raw[4..].to_vec(),
                })
            }
            RECORD_LINK_CREATION_ORDER => {
                if raw.len() < 9 {
                    return Err(corrupt());
                }
                Ok(RecordV2::LinkCreationOrder {
                    order: u64::from_le_bytes(raw[..8].try_into().unwrap()),
                    heap_id: raw[8..].to_vec(),
                })
            }
            RECORD_ATTRIBUTE_NAME => {
                if raw.len() < 17 {
                    return Err(corrupt());
                }
                Ok(RecordV2::AttributeName {
                    heap_id: raw[..8].try_into().unwrap(),
                    flags: raw[8],
                    creation_order: u32::from_le_bytes(raw[9..13].try_into().unwrap()),
                    name_hash: u32::from_le_bytes(raw[13..17].try_into().unwrap()),
                })
            }
            _ => Ok(RecordV2::Unknown(raw.to_vec())),
        }
    }
}

const NODE_OVERHEAD: u64 = 10; // signature, version, type, checksum

fn child_pointer_size(sb: &Superblock, max_nrec: &[u64], cum_max_nrec: &[u64], depth: usize) -> u64 {
    let mut size = u64::from(sb.offset_size) + u64::from(enc_size(max_nrec[depth - 1]));
    if depth >= 2 {
        size += u64::from(enc_size(cum_max_nrec[depth - 1]));
    }
    size
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

    fn channel(img: &[u8]) -> (tempfile::NamedTempFile, FileChannel) {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(img).unwrap();
        f.flush().unwrap();
        let ch = FileChannel::open(f.path()).unwrap();
        (f, ch)
    }

    fn attr_record(heap_id: u64, order: u32, hash: u32) -> Vec<u8> {
        let mut r = Vec::new();
        r.extend_from_slice(&heap_id.to_le_bytes());
        r.push(0);
        r.extend_from_slice(&order.to_le_bytes());
        r.extend_from_slice(&hash.to_le_bytes());
        r
    }

    fn header(record_type: u8, record_size: u16, root_address: u64, root_nrec: u16) -> Vec<u8> {
        let mut h = Vec::new();
        h.extend_from_slice(&BTHD_MAGIC);
        h.push(0);
        h.push(record_type);
        h.extend_from_slice(&512u32.to_le_bytes()); // node size
        h.extend_from_slice(&record_size.to_le_bytes());
        h.extend_from_slice(&0u16.to_le_bytes()); // depth
        h.push(100);
        h.push(40);
        h.extend_from_slice(&root_address.to_le_bytes());
        h.extend_from_slice(&root_nrec.to_le_bytes());
        h.extend_from_slice(&(u64::from(root_nrec)).to_le_bytes());
        let sum = checksum(&h);
        h.extend_from_slice(&sum.to_le_bytes());
        h
    }

    fn leaf(records: &[Vec<u8>]) -> Vec<u8> {
        let mut n = Vec::new();
        n.extend_from_slice(&BTLF_MAGIC);
        n.push(0);
        n.push(RECORD_ATTRIBUTE_NAME);
        for r in records {
            n.extend_from_slice(r);
        }
        let sum = checksum(&n);
        n.extend_from_slice(&sum.to_le_bytes());
        n
    }

    #[test]
    fn leaf_records_parse() {
        let root_at = 0x100u64;
        let mut img = header(RECORD_ATTRIBUTE_NAME, 17, root_at, 2);
        img.resize(root_at as usize, 0);
        img.extend_from_slice(&leaf(&[
            attr_record(0x11, 0, 0xaaaa),
            attr_record(0x22, 1, 0xbbbb),
        ]));

        let (_f, ch) = channel(&img);
        let tree = BtreeV2::read(&ch, &sb(), 0, true).unwrap();
        assert_eq!(tree.record_type, RECORD_ATTRIBUTE_NAME);
        let records = tree.records(&ch, &sb(), true).unwrap();
        assert_eq!(records.len(), 2);
        match &records[1] {
            RecordV2::AttributeName {
                heap_id,
                creation_order,
                name_hash,
                ..
            } => {
                assert_eq!(u64::from_le_bytes(*heap_id), 0x22);
                assert_eq!(*creation_order, 1);
                assert_eq!(*name_hash, 0xbbbb);
            }
            other => panic!("wrong record {other:?}"),
        }
    }

    #[test]
    fn flipped_byte_is_localized() {
        let root_at = 0x100u64;
        let mut img = header(RECORD_ATTRIBUTE_NAME, 17, root_at, 1);
        img.resize(root_at as usize, 0);
        img.extend_from_slice(&leaf(&[attr_record(0x11, 0, 0xaaaa)]));
        // Flip a byte inside the leaf node.
        img[root_at as usize + 8] ^= 0x01;

        let (_f, ch) = channel(&img);
        let tree = BtreeV2::read(&ch, &sb(), 0, true).unwrap();
        let err = tree.records(&ch, &sb(), true).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { address } if address == root_at));
    }

    #[test]
    fn header_checksum_verified() {
        let mut img = header(RECORD_ATTRIBUTE_NAME, 17, 0x100, 0);
        img[6] ^= 0xff; // corrupt the node size
        img.resize(0x200, 0);
        let (_f, ch) = channel(&img);
        assert!(matches!(
            BtreeV2::read(&ch, &sb(), 0, true),
            Err(Error::ChecksumMismatch { address: 0 })
        ));
    }
}
