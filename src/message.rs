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
use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;
use tracing::warn;

use crate::dataspace::Dataspace;
use crate::datatype::Datatype;
use crate::definitions::{HdfAddress, HdfLength};
use crate::error::{Error, Result};
use crate::filter::FilterPipeline;
use crate::layout::DataLayout;
use crate::sb::Superblock;
use crate::utils::{pad8, read_cstr, read_uint, read_vec};

/// On-disk header message type codes.
#[derive(Clone, Copy, Debug, FromPrimitive, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    Nil = 0x0,
    Dataspace = 0x1,
    LinkInfo = 0x2,
    Datatype = 0x3,
    FillValueOld = 0x4,
    FillValue = 0x5,
    Link = 0x6,
    ExternalDataFiles = 0x7,
    DataLayout = 0x8,
    Bogus = 0x9,
    GroupInfo = 0xA,
    FilterPipeline = 0xB,
    Attribute = 0xC,
    ObjectComment = 0xD,
    SharedMessageTable = 0xF,
    ObjectHeaderContinuation = 0x10,
    SymbolTable = 0x11,
    ObjectModificationTime = 0x12,
    BtreeKValues = 0x13,
    DriverInfo = 0x14,
    AttributeInfo = 0x15,
    ObjectReferenceCount = 0x16,
}

/// Modern group child discovery: where the link records live.
#[derive(Clone, Debug)]
pub struct LinkInfoMessage {
    pub max_creation_index: Option<u64>,
    pub fractal_heap_address: HdfAddress,
    pub name_index_btree_address: HdfAddress,
    pub creation_order_btree_address: HdfAddress,
}

/// One named edge out of a group.
#[derive(Clone, Debug)]
pub struct LinkMessage {
    pub name: String,
    pub creation_order: Option<u64>,
    pub target: LinkTarget,
}

#[derive(Clone, Debug)]
pub enum LinkTarget {
    Hard(HdfAddress),
    Soft(String),
    External { file: String, path: String },
}

#[derive(Clone, Debug)]
pub struct GroupInfoMessage {
    pub max_compact_links: Option<u16>,
    pub min_dense_links: Option<u16>,
    pub estimated_entries: Option<u16>,
    pub estimated_name_length: Option<u16>,
}

#[derive(Clone, Debug)]
pub struct FillValueMessage {
    pub version: u8,
    pub value: Option<Vec<u8>>,
}

#[derive(Clone, Debug)]
pub struct AttributeMessage {
    pub name: String,
    pub datatype: Datatype,
    pub dataspace: Dataspace,
    pub data: Vec<u8>,
}

/// Dense attribute storage: where the attribute records live.
#[derive(Clone, Debug)]
pub struct AttributeInfoMessage {
    pub max_creation_index: Option<u16>,
    pub fractal_heap_address: HdfAddress,
    pub name_btree_address: HdfAddress,
    pub creation_order_btree_address: HdfAddress,
}

#[derive(Clone, Debug)]
pub struct ContinuationMessage {
    pub address: HdfAddress,
    pub length: HdfLength,
}

/// Legacy group child discovery: the v1 B-tree and name heap.
#[derive(Clone, Debug)]
pub struct SymbolTableMessage {
    pub btree_address: HdfAddress,
    pub local_heap_address: HdfAddress,
}

/// A fully-decoded header message.
#[derive(Clone, Debug)]
pub enum Message {
    Nil,
    Dataspace(Dataspace),
    LinkInfo(LinkInfoMessage),
    Datatype(Datatype),
    FillValue(FillValueMessage),
    Link(LinkMessage),
    DataLayout(DataLayout),
    GroupInfo(GroupInfoMessage),
    FilterPipeline(FilterPipeline),
    Attribute(AttributeMessage),
    Continuation(ContinuationMessage),
    SymbolTable(SymbolTableMessage),
    ModificationTime(u32),
    AttributeInfo(AttributeInfoMessage),
    /// A type this reader does not decode.  Preserved so headers from newer
    /// writers still parse.
    Unknown(u16),
}

/// Decode one message body.  Pure: no I/O beyond the given bytes.
pub fn decode_message(kind: u16, body: &[u8], sb: &Superblock) -> Result<Message> {
    let Some(known) = MessageType::from_u16(kind) else {
        warn!(kind, "unknown header message type");
        return Ok(Message::Unknown(kind));
    };
    match known {
        MessageType::Nil => Ok(Message::Nil),
        MessageType::Dataspace => Dataspace::decode(body, sb).map(Message::Dataspace),
        MessageType::LinkInfo => decode_link_info(body, sb).map(Message::LinkInfo),
        MessageType::Datatype => Datatype::decode(body).map(Message::Datatype),
        MessageType::FillValue => decode_fill_value(body).map(Message::FillValue),
        MessageType::Link => decode_link(body, sb).map(Message::Link),
        MessageType::DataLayout => DataLayout::decode(body, sb).map(Message::DataLayout),
        MessageType::GroupInfo => decode_group_info(body).map(Message::GroupInfo),
        MessageType::FilterPipeline => {
            FilterPipeline::decode_message(body).map(Message::FilterPipeline)
        }
        MessageType::Attribute => decode_attribute(body, sb).map(Message::Attribute),
        MessageType::ObjectHeaderContinuation => {
            decode_continuation(body, sb).map(Message::Continuation)
        }
        MessageType::SymbolTable => decode_symbol_table(body, sb).map(Message::SymbolTable),
        MessageType::ObjectModificationTime => decode_modification_time(body),
        MessageType::AttributeInfo => decode_attribute_info(body, sb).map(Message::AttributeInfo),
        _ => Ok(Message::Unknown(kind)),
    }
}

fn decode_link_info(body: &[u8], sb: &Superblock) -> Result<LinkInfoMessage> {
    let truncated = |_| Error::corrupt_message(0x2, "truncated link info message");
    let mut cur = body;
    let version = cur.read_u8().map_err(truncated)?;
    if version != 0 {
        return Err(Error::UnsupportedVersion {
            what: "link info message",
            version,
        });
    }
    let flags = cur.read_u8().map_err(truncated)?;
    let max_creation_index = if flags & 0x1 != 0 {
        Some(cur.read_u64::<LittleEndian>().map_err(truncated)?)
    } else {
        None
    };
    let fractal_heap_address = sb.read_offset(&mut cur).map_err(truncated)?;
    let name_index_btree_address = sb.read_offset(&mut cur).map_err(truncated)?;
    let creation_order_btree_address = if flags & 0x2 != 0 {
        sb.read_offset(&mut cur).map_err(truncated)?
    } else {
        u64::MAX
    };
    Ok(LinkInfoMessage {
        max_creation_index,
        fractal_heap_address,
        name_index_btree_address,
        creation_order_btree_address,
    })
}

pub(crate) fn decode_link(body: &[u8], sb: &Superblock) -> Result<LinkMessage> {
    let truncated = |_| Error::corrupt_message(0x6, "truncated link message");
    let mut cur = body;
    let version = cur.read_u8().map_err(truncated)?;
    if version != 1 {
        return Err(Error::UnsupportedVersion {
            what: "link message",
            version,
        });
    }
    let flags = cur.read_u8().map_err(truncated)?;
    let link_type = if flags & 0x8 != 0 {
        cur.read_u8().map_err(truncated)?
    } else {
        0
    };
    let creation_order = if flags & 0x4 != 0 {
        Some(cur.read_u64::<LittleEndian>().map_err(truncated)?)
    } else {
        None
    };
    if flags & 0x10 != 0 {
        let _charset = cur.read_u8().map_err(truncated)?;
    }
    let name_len_size = 1u8 << (flags & 0x3);
    let name_len = read_uint(&mut cur, name_len_size).map_err(truncated)? as usize;
    let name_buf = read_vec(&mut cur, name_len).map_err(truncated)?;
    let name = String::from_utf8(name_buf)
        .map_err(|_| Error::corrupt_message(0x6, "link name is not UTF-8"))?;

    let target = match link_type {
        0 => LinkTarget::Hard(sb.read_offset(&mut cur).map_err(truncated)?),
        1 => {
            let len = cur.read_u16::<LittleEndian>().map_err(truncated)?;
            let buf = read_vec(&mut cur, usize::from(len)).map_err(truncated)?;
            let path = read_cstr(&buf)
                .ok_or_else(|| Error::corrupt_message(0x6, "soft link target is not UTF-8"))?;
            LinkTarget::Soft(path)
        }
        64 => {
            let len = cur.read_u16::<LittleEndian>().map_err(truncated)?;
            let buf = read_vec(&mut cur, usize::from(len)).map_err(truncated)?;
            // Version/flags byte, then two NUL-terminated strings.
            if buf.is_empty() {
                return Err(Error::corrupt_message(0x6, "empty external link value"));
            }
            let rest = &buf[1..];
            let file = read_cstr(rest).ok_or_else(|| {
                Error::corrupt_message(0x6, "external link file name is not UTF-8")
            })?;
            let path_start = file.len() + 1;
            let path = if path_start < rest.len() {
                read_cstr(&rest[path_start..]).ok_or_else(|| {
                    Error::corrupt_message(0x6, "external link path is not UTF-8")
                })?
            } else {
                String::new()
            };
            LinkTarget::External { file, path }
        }
        t => {
            return Err(Error::corrupt_message(
                0x6,
                format!("unknown link type {t}"),
            ))
        }
    };
    Ok(LinkMessage {
        name,
        creation_order,
        target,
    })
}

fn decode_group_info(body: &[u8]) -> Result<GroupInfoMessage> {
    let truncated = |_| Error::corrupt_message(0xA, "truncated group info message");
    let mut cur = body;
    let version = cur.read_u8().map_err(truncated)?;
    if version != 0 {
        return Err(Error::UnsupportedVersion {
            what: "group info message",
            version,
        });
    }
    let flags = cur.read_u8().map_err(truncated)?;
    let (max_compact_links, min_dense_links) = if flags & 0x1 != 0 {
        (
            Some(cur.read_u16::<LittleEndian>().map_err(truncated)?),
            Some(cur.read_u16::<LittleEndian>().map_err(truncated)?),
        )
    } else {
        (None, None)
    };
    let (estimated_entries, estimated_name_length) = if flags & 0x2 != 0 {
        (
            Some(cur.read_u16::<LittleEndian>().map_err(truncated)?),
            Some(cur.read_u16::<LittleEndian>().map_err(truncated)?),
        )
    } else {
        (None, None)
    };
    Ok(GroupInfoMessage {
        max_compact_links,
        min_dense_links,
        estimated_entries,
        estimated_name_length,
    })
}

fn decode_fill_value(body: &[u8]) -> Result<FillValueMessage> {
    let truncated = |_| Error::corrupt_message(0x5, "truncated fill value message");
    let mut cur = body;
    let version = cur.read_u8().map_err(truncated)?;
    let value = match version {
        1 => {
            let _space_allocation_time = cur.read_u8().map_err(truncated)?;
            let _write_time = cur.read_u8().map_err(truncated)?;
            let defined = cur.read_u8().map_err(truncated)?;
            let size = cur.read_u32::<LittleEndian>().map_err(truncated)?;
            let bytes = read_vec(&mut cur, size as usize).map_err(truncated)?;
            (defined != 0).then_some(bytes)
        }
        2 => {
            let _space_allocation_time = cur.read_u8().map_err(truncated)?;
            let _write_time = cur.read_u8().map_err(truncated)?;
            let defined = cur.read_u8().map_err(truncated)?;
            if defined != 0 {
                let size = cur.read_u32::<LittleEndian>().map_err(truncated)?;
                Some(read_vec(&mut cur, size as usize).map_err(truncated)?)
            } else {
                None
            }
        }
        3 => {
            let flags = cur.read_u8().map_err(truncated)?;
            if flags & 0x20 != 0 {
                let size = cur.read_u32::<LittleEndian>().map_err(truncated)?;
                Some(read_vec(&mut cur, size as usize).map_err(truncated)?)
            } else {
                None
            }
        }
        v => {
            return Err(Error::UnsupportedVersion {
                what: "fill value message",
                version: v,
            })
        }
    };
    // An explicitly empty fill value means "use zeros", same as absent.
    let value = value.filter(|v| !v.is_empty());
    Ok(FillValueMessage { version, value })
}

pub(crate) fn decode_attribute(body: &[u8], sb: &Superblock) -> Result<AttributeMessage> {
    let truncated = |_| Error::corrupt_message(0xC, "truncated attribute message");
    let mut cur = body;
    let version = cur.read_u8().map_err(truncated)?;
    if !(1..=3).contains(&version) {
        return Err(Error::UnsupportedVersion {
            what: "attribute message",
            version,
        });
    }
    let flags = cur.read_u8().map_err(truncated)?;
    if version != 1 && flags & 0x3 != 0 {
        return Err(Error::UnsupportedVersion {
            what: "attribute with shared datatype or dataspace",
            version,
        });
    }
    let name_size = cur.read_u16::<LittleEndian>().map_err(truncated)?;
    let datatype_size = cur.read_u16::<LittleEndian>().map_err(truncated)?;
    let dataspace_size = cur.read_u16::<LittleEndian>().map_err(truncated)?;
    if version == 3 {
        let _name_encoding = cur.read_u8().map_err(truncated)?;
    }
    // Version 1 pads each of the three regions to eight bytes; later
    // versions pack them.
    let region = |len: u16| -> usize {
        if version == 1 {
            pad8(usize::from(len))
        } else {
            usize::from(len)
        }
    };

    let name_buf = read_vec(&mut cur, region(name_size)).map_err(truncated)?;
    let name = read_cstr(&name_buf[..usize::from(name_size).min(name_buf.len())])
        .ok_or_else(|| Error::corrupt_message(0xC, "attribute name is not UTF-8"))?;

    let datatype_buf = read_vec(&mut cur, region(datatype_size)).map_err(truncated)?;
    let datatype = Datatype::decode(&datatype_buf)?;

    let dataspace_buf = read_vec(&mut cur, region(dataspace_size)).map_err(truncated)?;
    let dataspace = Dataspace::decode(&dataspace_buf, sb)?;

    let mut data = Vec::new();
    cur.read_to_end(&mut data).map_err(truncated)?;
    // Clamp to the declared payload size; trailing header padding is noise.
    let expected = dataspace
        .element_count()
        .saturating_mul(u64::from(datatype.size()));
    if (data.len() as u64) < expected {
        return Err(Error::corrupt_message(
            0xC,
            format!("attribute value has {} of {expected} bytes", data.len()),
        ));
    }
    data.truncate(expected as usize);

    Ok(AttributeMessage {
        name,
        datatype,
        dataspace,
        data,
    })
}

fn decode_attribute_info(body: &[u8], sb: &Superblock) -> Result<AttributeInfoMessage> {
    let truncated = |_| Error::corrupt_message(0x15, "truncated attribute info message");
    let mut cur = body;
    let version = cur.read_u8().map_err(truncated)?;
    if version != 0 {
        return Err(Error::UnsupportedVersion {
            what: "attribute info message",
            version,
        });
    }
    let flags = cur.read_u8().map_err(truncated)?;
    let max_creation_index = if flags & 0x1 != 0 {
        Some(cur.read_u16::<LittleEndian>().map_err(truncated)?)
    } else {
        None
    };
    let fractal_heap_address = sb.read_offset(&mut cur).map_err(truncated)?;
    let name_btree_address = sb.read_offset(&mut cur).map_err(truncated)?;
    let creation_order_btree_address = if flags & 0x2 != 0 {
        sb.read_offset(&mut cur).map_err(truncated)?
    } else {
        u64::MAX
    };
    Ok(AttributeInfoMessage {
        max_creation_index,
        fractal_heap_address,
        name_btree_address,
        creation_order_btree_address,
    })
}

fn decode_continuation(body: &[u8], sb: &Superblock) -> Result<ContinuationMessage> {
    let truncated = |_| Error::corrupt_message(0x10, "truncated continuation message");
    let mut cur = body;
    let address = sb.read_offset(&mut cur).map_err(truncated)?;
    let length = sb.read_length(&mut cur).map_err(truncated)?;
    Ok(ContinuationMessage { address, length })
}

fn decode_symbol_table(body: &[u8], sb: &Superblock) -> Result<SymbolTableMessage> {
    let truncated = |_| Error::corrupt_message(0x11, "truncated symbol table message");
    let mut cur = body;
    let btree_address = sb.read_offset(&mut cur).map_err(truncated)?;
    let local_heap_address = sb.read_offset(&mut cur).map_err(truncated)?;
    Ok(SymbolTableMessage {
        btree_address,
        local_heap_address,
    })
}

fn decode_modification_time(body: &[u8]) -> Result<Message> {
    let truncated = |_| Error::corrupt_message(0x12, "truncated modification time message");
    let mut cur = body;
    let version = cur.read_u8().map_err(truncated)?;
    if version != 1 {
        return Err(Error::UnsupportedVersion {
            what: "object modification time message",
            version,
        });
    }
    let _reserved = read_vec(&mut cur, 3).map_err(truncated)?;
    let seconds = cur.read_u32::<LittleEndian>().map_err(truncated)?;
    Ok(Message::ModificationTime(seconds))
}
