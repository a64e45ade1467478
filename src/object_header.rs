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
use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt};
use tracing::debug;

use crate::channel::FileChannel;
use crate::checksum::checksum;
use crate::definitions::*;
use crate::error::{Error, Result};
use crate::message::{decode_message, Message, MessageType};
use crate::sb::Superblock;
use crate::utils::{decode, read_uint};

#[derive(Clone, Copy, Debug, Decode)]
struct V1Prefix {
    version: u8,
    _reserved: u8,
    total_messages: u16,
    _reference_count: u32,
    header_size: u32,
}

#[derive(Clone, Copy, Debug, Decode)]
struct V1MessageEnvelope {
    kind: u16,
    size: u16,
    flags: u8,
    _reserved: [u8; 3],
}

bitflags! {
    /// Per-message status bits from the header envelope.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MessageFlags: u8 {
        const CONSTANT = 0x01;
        const SHARED = 0x02;
        const DO_NOT_SHARE = 0x04;
        const FAIL_ON_UNKNOWN_WRITE = 0x08;
        const MARK_IF_UNKNOWN = 0x10;
        const MODIFIED_IF_UNKNOWN = 0x20;
        const SHAREABLE = 0x40;
        const FAIL_ON_UNKNOWN_ALWAYS = 0x80;
    }
}

/// One decoded header message plus its envelope.
#[derive(Clone, Debug)]
pub struct HeaderMessage {
    pub kind: u16,
    pub flags: MessageFlags,
    pub creation_order: Option<u16>,
    pub message: Message,
}

/// The per-object metadata record: an ordered list of messages.
/// Immutable after parse.
#[derive(Clone, Debug)]
pub struct ObjectHeader {
    pub address: HdfAddress,
    pub version: u8,
    pub messages: Vec<HeaderMessage>,
}

impl ObjectHeader {
    pub fn read(
        channel: &FileChannel,
        sb: &Superblock,
        address: HdfAddress,
        verify_checksums: bool,
    ) -> Result<Self> {
        let probe = channel.read_at(address, 1)?;
        let header = if probe[0] == OHDR_MAGIC[0] {
            Self::read_v2(channel, sb, address, verify_checksums)
        } else {
            Self::read_v1(channel, sb, address)
        }?;
        debug!(
            address,
            version = header.version,
            messages = header.messages.len(),
            "parsed object header"
        );
        Ok(header)
    }

    fn read_v1(channel: &FileChannel, sb: &Superblock, address: HdfAddress) -> Result<Self> {
        let corrupt = |detail: String| Error::corrupt_header(address, detail);
        let prefix_block = channel.read_at(address, 16)?;
        let (prefix, _) = decode::<V1Prefix>(&prefix_block)
            .map_err(|_| corrupt("short prefix".into()))?;
        if prefix.version != 1 {
            return Err(Error::UnsupportedVersion {
                what: "object header",
                version: prefix.version,
            });
        }
        let total_messages = prefix.total_messages;
        // Four bytes of alignment padding sit between the 12-byte prefix
        // and the first message.
        let first_block = channel.read_at(address + 16, u64::from(prefix.header_size))?;

        let mut messages = Vec::with_capacity(usize::from(total_messages));
        let mut blocks = vec![first_block];
        let mut block_idx = 0;
        while messages.len() < usize::from(total_messages) {
            if block_idx >= blocks.len() {
                return Err(corrupt(format!(
                    "header claims {total_messages} messages but only {} were found",
                    messages.len()
                )));
            }
            let block = &blocks[block_idx];
            let mut cur = &block[..];
            let mut pending = Vec::new();
            while messages.len() < usize::from(total_messages) && cur.len() >= 8 {
                let offset_in_header = block.len() - cur.len();
                let (envelope, used) = decode::<V1MessageEnvelope>(cur).unwrap();
                cur = &cur[used..];
                if usize::from(envelope.size) > cur.len() {
                    return Err(corrupt(format!(
                        "message at offset {offset_in_header} overruns its block"
                    )));
                }
                let body = &cur[..usize::from(envelope.size)];
                let message = decode_message(envelope.kind, body, sb)?;
                if let Message::Continuation(ref c) = message {
                    pending.push((c.address, c.length));
                }
                messages.push(HeaderMessage {
                    kind: envelope.kind,
                    flags: MessageFlags::from_bits_retain(envelope.flags),
                    creation_order: None,
                    message,
                });
                cur = &cur[usize::from(envelope.size)..];
            }
            for (cont_address, cont_length) in pending {
                blocks.push(channel.read_at(cont_address, cont_length)?);
            }
            block_idx += 1;
        }

        Ok(ObjectHeader {
            address,
            version: 1,
            messages,
        })
    }

    fn read_v2(
        channel: &FileChannel,
        sb: &Superblock,
        address: HdfAddress,
        verify_checksums: bool,
    ) -> Result<Self> {
        let corrupt = |detail: String| Error::corrupt_header(address, detail);

        let fixed = channel.read_at(address, 6)?;
        if fixed[..4] != OHDR_MAGIC {
            return Err(corrupt("bad OHDR signature".into()));
        }
        let version = fixed[4];
        if version != 2 {
            return Err(Error::UnsupportedVersion {
                what: "object header",
                version,
            });
        }
        let flags = fixed[5];
        let times_len: u64 = if flags & 0x20 != 0 { 16 } else { 0 };
        let phase_len: u64 = if flags & 0x10 != 0 { 4 } else { 0 };
        let size_len = 1u64 << (flags & 0x3);
        let prefix_len = 6 + times_len + phase_len + size_len;

        let prefix = channel.read_at(address, prefix_len)?;
        let mut cur = &prefix[6 + times_len as usize + phase_len as usize..];
        let chunk0_size = read_uint(&mut cur, size_len as u8)
            .map_err(|_| corrupt("short prefix".into()))?;

        // The checksum covers the prefix and all of chunk 0.
        let block = channel.read_at(address, prefix_len + chunk0_size + 4)?;
        let body_len = (prefix_len + chunk0_size) as usize;
        let stored_sum = u32::from_le_bytes(block[body_len..body_len + 4].try_into().unwrap());
        if verify_checksums && checksum(&block[..body_len]) != stored_sum {
            return Err(Error::ChecksumMismatch { address });
        }

        let tracked_order = flags & 0x4 != 0;
        let mut messages = Vec::new();
        let mut blocks = vec![block[prefix_len as usize..body_len].to_vec()];
        let mut block_idx = 0;
        while block_idx < blocks.len() {
            let block = &blocks[block_idx];
            let min_message = if tracked_order { 6 } else { 4 };
            let mut cur = &block[..];
            let mut pending = Vec::new();
            while cur.len() >= min_message {
                let offset_in_header = block.len() - cur.len();
                let kind = u16::from(cur.read_u8().unwrap());
                let size = cur.read_u16::<LittleEndian>().unwrap();
                let flags = cur.read_u8().unwrap();
                let creation_order = if tracked_order {
                    Some(cur.read_u16::<LittleEndian>().unwrap())
                } else {
                    None
                };
                if usize::from(size) > cur.len() {
                    return Err(corrupt(format!(
                        "message at offset {offset_in_header} overruns its block"
                    )));
                }
                let body = &cur[..usize::from(size)];
                let message = decode_message(kind, body, sb)?;
                if let Message::Continuation(ref c) = message {
                    pending.push((c.address, c.length));
                }
                messages.push(HeaderMessage {
                    kind,
                    flags: MessageFlags::from_bits_retain(flags),
                    creation_order,
                    message,
                });
                cur = &cur[usize::from(size)..];
            }
            for (cont_address, cont_length) in pending {
                blocks.push(Self::read_v2_continuation(
                    channel,
                    cont_address,
                    cont_length,
                    verify_checksums,
                )?);
            }
            block_idx += 1;
        }

        Ok(ObjectHeader {
            address,
            version: 2,
            messages,
        })
    }

    /// A version 2 continuation block: `OCHK`, messages, checksum.
    fn read_v2_continuation(
        channel: &FileChannel,
        address: HdfAddress,
        length: HdfLength,
        verify_checksums: bool,
    ) -> Result<Vec<u8>> {
        if length < 8 {
            return Err(Error::corrupt_header(
                address,
                format!("continuation block of {length} bytes"),
            ));
        }
        let block = channel.read_at(address, length)?;
        if block[..4] != OCHK_MAGIC {
            return Err(Error::corrupt_header(
                address,
                "bad OCHK signature",
            ));
        }
        let body_len = block.len() - 4;
        let stored_sum = u32::from_le_bytes(block[body_len..].try_into().unwrap());
        if verify_checksums && checksum(&block[..body_len]) != stored_sum {
            return Err(Error::ChecksumMismatch { address });
        }
        Ok(block[4..body_len].to_vec())
    }

    pub fn dataspace(&self) -> Option<&crate::dataspace::Dataspace> {
        self.messages.iter().find_map(|m| match &m.message {
            Message::Dataspace(ds) => Some(ds),
            _ => None,
        })
    }

    pub fn datatype(&self) -> Option<&crate::datatype::Datatype> {
        self.messages.iter().find_map(|m| match &m.message {
            Message::Datatype(dt) => Some(dt),
            _ => None,
        })
    }

    pub fn layout(&self) -> Option<&crate::layout::DataLayout> {
        self.messages.iter().find_map(|m| match &m.message {
            Message::DataLayout(l) => Some(l),
            _ => None,
        })
    }

    pub fn filter_pipeline(&self) -> Option<&crate::filter::FilterPipeline> {
        self.messages.iter().find_map(|m| match &m.message {
            Message::FilterPipeline(p) => Some(p),
            _ => None,
        })
    }

    pub fn fill_value(&self) -> Option<&crate::message::FillValueMessage> {
        self.messages.iter().find_map(|m| match &m.message {
            Message::FillValue(fv) => Some(fv),
            _ => None,
        })
    }

    pub fn symbol_table(&self) -> Option<&crate::message::SymbolTableMessage> {
        self.messages.iter().find_map(|m| match &m.message {
            Message::SymbolTable(st) => Some(st),
            _ => None,
        })
    }

    pub fn link_info(&self) -> Option<&crate::message::LinkInfoMessage> {
        self.messages.iter().find_map(|m| match &m.message {
            Message::LinkInfo(li) => Some(li),
            _ => None,
        })
    }

    pub fn attribute_info(&self) -> Option<&crate::message::AttributeInfoMessage> {
        self.messages.iter().find_map(|m| match &m.message {
            Message::AttributeInfo(ai) => Some(ai),
            _ => None,
        })
    }

    pub fn links(&self) -> impl Iterator<Item = &crate::message::LinkMessage> {
        self.messages.iter().filter_map(|m| match &m.message {
            Message::Link(l) => Some(l),
            _ => None,
        })
    }

    pub fn inline_attributes(&self) -> impl Iterator<Item = &crate::message::AttributeMessage> {
        self.messages.iter().filter_map(|m| match &m.message {
            Message::Attribute(a) => Some(a),
            _ => None,
        })
    }

    pub fn modification_time(&self) -> Option<u32> {
        self.messages.iter().find_map(|m| match &m.message {
            Message::ModificationTime(t) => Some(*t),
            _ => None,
        })
    }

    pub fn messages_of_type(
        &self,
        kind: MessageType,
    ) -> impl Iterator<Item = &HeaderMessage> {
        self.messages.iter().filter(move |m| m.kind == kind as u16)
    }

    pub fn first_message_of_type(&self, kind: MessageType) -> Option<&HeaderMessage> {
        self.messages_of_type(kind).next()
    }

    pub fn has_message_of_type(&self, kind: MessageType) -> bool {
        self.first_message_of_type(kind).is_some()
    }
}
