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
use std::sync::Arc;

use bincode::Decode;
use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::ZlibDecoder;
use tracing::trace;

use crate::definitions::HdfAddress;
use crate::error::{Error, Result};
use crate::utils::{decode, pad8, read_cstr, read_vec};

#[derive(Clone, Copy, Debug, Decode)]
struct DescriptorPrefixV1 {
    id: u16,
    name_len: u16,
    flags: u16,
    nvalues: u16,
}

pub const MESSAGE_TYPE: u16 = 0xB;

pub const FILTER_DEFLATE: u16 = 1;
pub const FILTER_SHUFFLE: u16 = 2;
pub const FILTER_FLETCHER32: u16 = 3;

/// One byte-to-byte decoder in a chunk's filter pipeline.  Filters are
/// stateless; `address` is the chunk's file address, used only for error
/// reporting.
pub trait Filter: Send + Sync {
    fn decode(&self, data: Vec<u8>, client_data: &[u32], address: HdfAddress) -> Result<Vec<u8>>;
}

/// A filter as described in the pipeline message.
#[derive(Clone, Debug)]
pub struct FilterDescriptor {
    pub id: u16,
    pub name: String,
    /// Bit 0 of the on-disk flags: the writer considered the filter
    /// optional.  Decoding still cannot proceed without it.
    pub optional: bool,
    pub client_data: Vec<u32>,
}

/// The ordered filter list attached to a chunked dataset.  Filters were
/// applied front-to-back when the file was written, so decoding runs them
/// back-to-front.
#[derive(Clone, Default)]
pub struct FilterPipeline {
    entries: Vec<(FilterDescriptor, Option<Arc<dyn Filter>>)>,
}

impl std::fmt::Debug for FilterPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(d, _)| d))
            .finish()
    }
}

impl FilterPipeline {
    pub fn decode_message(body: &[u8]) -> Result<Self> {
        let truncated =
            |_| Error::corrupt_message(MESSAGE_TYPE, "truncated filter pipeline message");
        let mut cur = body;

        let version = cur.read_u8().map_err(truncated)?;
        let nfilters = cur.read_u8().map_err(truncated)?;
        let mut entries = Vec::with_capacity(usize::from(nfilters));
        match version {
            1 => {
                let _reserved = cur.read_u16::<LittleEndian>().map_err(truncated)?;
                let _reserved = cur.read_u32::<LittleEndian>().map_err(truncated)?;
                for _ in 0..nfilters {
                    let (prefix, used) = decode::<DescriptorPrefixV1>(cur)
                        .map_err(|_| truncated(std::io::ErrorKind::UnexpectedEof.into()))?;
                    cur = &cur[used..];
                    // The stored name length is already padded to eight.
                    let name_buf =
                        read_vec(&mut cur, pad8(usize::from(prefix.name_len))).map_err(truncated)?;
                    let mut client_data = Vec::with_capacity(usize::from(prefix.nvalues));
                    for _ in 0..prefix.nvalues {
                        client_data.push(cur.read_u32::<LittleEndian>().map_err(truncated)?);
                    }
                    if prefix.nvalues % 2 == 1 {
                        let _pad = cur.read_u32::<LittleEndian>().map_err(truncated)?;
                    }
                    entries.push(descriptor(prefix.id, &name_buf, prefix.flags, client_data));
                }
            }
            2 => {
                for _ in 0..nfilters {
                    let id = cur.read_u16::<LittleEndian>().map_err(truncated)?;
                    let name_len = if id >= 256 {
                        cur.read_u16::<LittleEndian>().map_err(truncated)?
                    } else {
                        0
                    };
                    let flags = cur.read_u16::<LittleEndian>().map_err(truncated)?;
                    let nvalues = cur.read_u16::<LittleEndian>().map_err(truncated)?;
                    let name_buf = read_vec(&mut cur, usize::from(name_len)).map_err(truncated)?;
                    let mut client_data = Vec::with_capacity(usize::from(nvalues));
                    for _ in 0..nvalues {
                        client_data.push(cur.read_u32::<LittleEndian>().map_err(truncated)?);
                    }
                    entries.push(descriptor(id, &name_buf, flags, client_data));
                }
            }
            v => {
                return Err(Error::UnsupportedVersion {
                    what: "filter pipeline message",
                    version: v,
                })
            }
        }
        Ok(FilterPipeline { entries })
    }

    /// Build a pipeline from explicit filter implementations, bypassing the
    /// registry.  Test scaffolding for the decode machinery.
    #[cfg(test)]
    pub(crate) fn from_filters(filters: Vec<Arc<dyn Filter>>) -> Self {
        let entries = filters
            .into_iter()
            .enumerate()
            .map(|(i, f)| {
                (
                    FilterDescriptor {
                        id: 0x8000 + i as u16,
                        name: format!("test filter {i}"),
                        optional: false,
                        client_data: Vec::new(),
                    },
                    Some(f),
                )
            })
            .collect();
        FilterPipeline { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &FilterDescriptor> {
        self.entries.iter().map(|(d, _)| d)
    }

    /// Undo the pipeline.  Bit `i` of `filter_mask` says the writer skipped
    /// filter `i` for this chunk, so the reader skips it too.
    pub fn decode(
        &self,
        mut data: Vec<u8>,
        filter_mask: u32,
        address: HdfAddress,
    ) -> Result<Vec<u8>> {
        for (i, (desc, filter)) in self.entries.iter().enumerate().rev() {
            if filter_mask & (1 << i) != 0 {
                trace!(id = desc.id, "filter masked off for this chunk");
                continue;
            }
            let filter = filter
                .as_ref()
                .ok_or(Error::UnsupportedFilter { id: desc.id })?;
            data = filter.decode(data, &desc.client_data, address)?;
        }
        Ok(data)
    }
}

fn descriptor(
    id: u16,
    name_buf: &[u8],
    flags: u16,
    client_data: Vec<u32>,
) -> (FilterDescriptor, Option<Arc<dyn Filter>>) {
    let desc = FilterDescriptor {
        id,
        name: read_cstr(name_buf).unwrap_or_default(),
        optional: flags & 0x1 != 0,
        client_data,
    };
    let imp = builtin(id);
    (desc, imp)
}

/// The fixed filter registry, populated before the first open and never
/// mutated afterwards.
fn builtin(id: u16) -> Option<Arc<dyn Filter>> {
    match id {
        FILTER_DEFLATE => Some(Arc::new(Deflate)),
        FILTER_SHUFFLE => Some(Arc::new(Shuffle)),
        FILTER_FLETCHER32 => Some(Arc::new(Fletcher32)),
        _ => None,
    }
}

/// gzip deflate (zlib framing), filter id 1.
struct Deflate;

impl Filter for Deflate {
    fn decode(&self, data: Vec<u8>, _client_data: &[u32], address: HdfAddress) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        ZlibDecoder::new(&data[..])
            .read_to_end(&mut out)
            .map_err(|e| Error::io_at(address, e))?;
        Ok(out)
    }
}

/// Byte shuffle, filter id 2.  The writer regrouped element bytes by
/// significance; client data carries the element size.
struct Shuffle;

impl Filter for Shuffle {
    fn decode(&self, data: Vec<u8>, client_data: &[u32], _address: HdfAddress) -> Result<Vec<u8>> {
        let elem = client_data.first().copied().unwrap_or(1) as usize;
        if elem <= 1 || data.len() < elem {
            return Ok(data);
        }
        let n = data.len() / elem;
        let mut out = vec![0u8; data.len()];
        for i in 0..elem {
            for j in 0..n {
                out[j * elem + i] = data[i * n + j];
            }
        }
        // Bytes past the last whole element are stored unshuffled.
        out[n * elem..].copy_from_slice(&data[n * elem..]);
        Ok(out)
    }
}

/// Fletcher-32 checksum, filter id 3.  The writer appended four checksum
/// bytes; verify and strip them.
struct Fletcher32;

impl Filter for Fletcher32 {
    fn decode(&self, data: Vec<u8>, _client_data: &[u32], address: HdfAddress) -> Result<Vec<u8>> {
        if data.len() < 4 {
            return Err(Error::ChecksumMismatch { address });
        }
        let (payload, stored) = data.split_at(data.len() - 4);
        let stored = u32::from_le_bytes(stored.try_into().unwrap());
        if fletcher32(payload) != stored {
            return Err(Error::ChecksumMismatch { address });
        }
        Ok(payload.to_vec())
    }
}

/// The Fletcher-32 variant HDF5 computes over big-endian 16-bit words,
/// folding in blocks small enough that the running sums cannot overflow.
pub(crate) fn fletcher32(data: &[u8]) -> u32 {
    let mut sum1: u32 = 0;
    let mut sum2: u32 = 0;

    let mut pairs = data.chunks_exact(2);
    let mut remaining = data.len() / 2;
    while remaining > 0 {
        let block = remaining.min(360);
        remaining -= block;
        for _ in 0..block {
            let p = pairs.next().unwrap();
            sum1 = sum1.wrapping_add(u32::from(u16::from_be_bytes([p[0], p[1]])));
            sum2 = sum2.wrapping_add(sum1);
        }
        sum1 = (sum1 & 0xffff) + (sum1 >> 16);
        sum2 = (sum2 & 0xffff) + (sum2 >> 16);
    }

    if data.len() % 2 == 1 {
        sum1 = sum1.wrapping_add(u32::from(data[data.len() - 1]) << 8);
        sum2 = sum2.wrapping_add(sum1);
        sum1 = (sum1 & 0xffff) + (sum1 >> 16);
        sum2 = (sum2 & 0xffff) + (sum2 >> 16);
    }

    sum1 = (sum1 & 0xffff) + (sum1 >> 16);
    sum2 = (sum2 & 0xffff) + (sum2 >> 16);
    (sum2 << 16) | sum1
}
