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

//! Dataset payload access: compact, contiguous, and chunked layouts.
//! The chunked path owns the chunk index, the decoded-chunk cache, and the
//! scatter into the dense output buffer.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::btree_v1;
use crate::datatype::Datatype;
use crate::definitions::{HdfAddress, HdfDim};
use crate::error::{Error, Result};
use crate::filter::FilterPipeline;
use crate::layout::DataLayout;
use crate::lazy::Lazy;
use crate::node::{Attribute, AttributeMap, Group, NodeOps, NodeShared};

/// One stored chunk of a chunked dataset.
#[derive(Clone, Debug)]
pub struct Chunk {
    pub file_address: HdfAddress,
    pub on_disk_size: u32,
    /// Bit `i` set means filter `i` was skipped when this chunk was
    /// written.
    pub filter_mask: u32,
    /// Element-space coordinates of the chunk's lower corner, one entry
    /// per dataset dimension.
    pub chunk_offset: Vec<HdfDim>,
}

/// Chunk-lookup and cache key: the chunk's origin with its hash computed
/// once up front.
#[derive(Clone, Debug, Eq)]
pub struct ChunkKey {
    offset: Vec<HdfDim>,
    hash: u64,
}

impl ChunkKey {
    pub fn new(offset: Vec<HdfDim>) -> Self {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        offset.hash(&mut hasher);
        let hash = hasher.finish();
        ChunkKey { offset, hash }
    }

    pub fn offset(&self) -> &[HdfDim] {
        &self.offset
    }
}

impl PartialEq for ChunkKey {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset
    }
}

impl Hash for ChunkKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

/// Per-dataset decoded-chunk cache.  Monotonic: entries are only ever
/// added, and each key is decoded at most once across all threads.
#[derive(Default)]
pub(crate) struct ChunkCache {
    entries: Mutex<HashMap<ChunkKey, Arc<Lazy<Arc<[u8]>>>>>,
}

impl ChunkCache {
    fn get_or_decode<F>(&self, key: &ChunkKey, decode: F) -> Result<Arc<[u8]>>
    where
        F: FnOnce() -> Result<Arc<[u8]>>,
    {
        let cell = self.entries.lock().entry(key.clone()).or_default().clone();
        cell.get_or_try(decode)
    }

    /// Origins of the chunks decoded so far.
    fn decoded_origins(&self) -> Vec<Vec<HdfDim>> {
        self.entries
            .lock()
            .iter()
            .filter(|(_, cell)| matches!(cell.get(), Some(Ok(_))))
            .map(|(key, _)| key.offset.clone())
            .collect()
    }
}

#[derive(Clone)]
struct DatasetMeta {
    dimensions: Vec<HdfDim>,
    datatype: Datatype,
    layout: DataLayout,
    pipeline: FilterPipeline,
    fill_value: Option<Vec<u8>>,
}

pub(crate) struct DatasetInner {
    shared: NodeShared,
    meta: Lazy<DatasetMeta>,
    chunk_index: Lazy<Arc<HashMap<ChunkKey, Chunk>>>,
    cache: ChunkCache,
}

/// A leaf node carrying an n-dimensional typed payload.
#[derive(Clone)]
pub struct Dataset(Arc<DatasetInner>);

impl Dataset {
    pub(crate) fn from_shared(shared: NodeShared) -> Self {
        Dataset(Arc::new(DatasetInner {
            shared,
            meta: Lazy::new(),
            chunk_index: Lazy::new(),
            cache: ChunkCache::default(),
        }))
    }

    fn meta(&self) -> Result<DatasetMeta> {
        let inner = &self.0;
        inner.shared.file.ensure_open()?;
        inner.meta.get_or_try(|| {
            let header = inner.shared.header()?;
            let missing = |what: &str| {
                Error::corrupt_header(inner.shared.address, format!("dataset without a {what} message"))
            };
            let dataspace = header.dataspace().ok_or_else(|| missing("dataspace"))?;
            let datatype = header.datatype().ok_or_else(|| missing("datatype"))?.clone();
            let layout = header.layout().ok_or_else(|| missing("data layout"))?.clone();
            let pipeline = header.filter_pipeline().cloned().unwrap_or_default();
            let fill_value = header.fill_value().and_then(|fv| fv.value.clone());
            Ok(DatasetMeta {
                dimensions: dataspace.dimensions.clone(),
                datatype,
                layout,
                pipeline,
                fill_value,
            })
        })
    }

    /// Element-space shape.
    pub fn dimensions(&self) -> Result<Vec<HdfDim>> {
        Ok(self.meta()?.dimensions)
    }

    pub fn datatype(&self) -> Result<Datatype> {
        Ok(self.meta()?.datatype)
    }

    /// On-disk size of one element in bytes.
    pub fn elem_size(&self) -> Result<u32> {
        Ok(self.meta()?.datatype.size())
    }

    /// The declared fill value, if the file defines one.
    pub fn fill_value(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.meta()?.fill_value)
    }

    /// Origins of the chunks decoded so far, for cache introspection.
    pub fn decoded_chunks(&self) -> Vec<Vec<HdfDim>> {
        self.0.cache.decoded_origins()
    }

    /// Unix timestamp of the last modification, when the writer recorded
    /// one.
    pub fn modification_time(&self) -> Result<Option<u32>> {
        Ok(self.0.shared.header()?.modification_time())
    }

    /// The whole payload as a dense little-endian buffer in C order.
    pub fn read_raw(&self) -> Result<Vec<u8>> {
        let inner = &self.0;
        inner.shared.file.ensure_open()?;
        let meta = self.meta()?;
        let elem = meta.datatype.size() as u64;
        let count = meta
            .dimensions
            .iter()
            .fold(1u64, |acc, d| acc.saturating_mul(*d));
        let total = count
            .checked_mul(elem)
            .filter(|t| *t <= usize::MAX as u64)
            .ok_or_else(|| {
                Error::corrupt_header(inner.shared.address, "payload size overflows".to_string())
            })?;

        match &meta.layout {
            DataLayout::Compact { data } => {
                if (data.len() as u64) < total {
                    return Err(Error::corrupt_header(
                        inner.shared.address,
                        format!("compact payload has {} of {total} bytes", data.len()),
                    ));
                }
                Ok(data[..total as usize].to_vec())
            }
            DataLayout::Contiguous { address, .. } => {
                if *address == u64::MAX {
                    // Never allocated: every element reads as fill.
                    return Ok(filled_buffer(total as usize, elem as usize, &meta.fill_value));
                }
                self.0
                    .shared
                    .file
                    .channel
                    .read_at(*address, total)
            }
            DataLayout::Chunked {
                btree_address,
                chunk_dimensions,
                element_size,
            } => self.read_chunked(
                &meta,
                *btree_address,
                chunk_dimensions,
                u64::from(*element_size),
                total,
            ),
        }
    }

    fn chunk_index(
        &self,
        btree_address: HdfAddress,
        rank: usize,
    ) -> Result<Arc<HashMap<ChunkKey, Chunk>>> {
        let inner = &self.0;
        inner.chunk_index.get_or_try(|| {
            let file = &inner.shared.file;
            let records = btree_v1::chunk_records(
                &file.channel,
                &file.sb,
                btree_address,
                rank as u8 + 1,
            )?;
            let mut map = HashMap::with_capacity(records.len());
            for record in records {
                // The key stores rank+1 coordinates; the trailing element
                // byte offset is discarded.
                let chunk_offset: Vec<HdfDim> = record.offset[..rank].to_vec();
                let key = ChunkKey::new(chunk_offset.clone());
                map.insert(
                    key,
                    Chunk {
                        file_address: record.address,
                        on_disk_size: record.size_bytes,
                        filter_mask: record.filter_mask,
                        chunk_offset,
                    },
                );
            }
            debug!(chunks = map.len(), "built chunk index");
            Ok(Arc::new(map))
        })
    }

    fn read_chunked(
        &self,
        meta: &DatasetMeta,
        btree_address: HdfAddress,
        chunk_dimensions: &[u32],
        element_size: u64,
        total: u64,
    ) -> Result<Vec<u8>> {
        let inner = &self.0;
        let dims = &meta.dimensions;
        let rank = dims.len();
        if rank == 0 || chunk_dimensions.len() != rank {
            return Err(Error::corrupt_header(
                inner.shared.address,
                format!(
                    "chunk rank {} does not match dataspace rank {rank}",
                    chunk_dimensions.len()
                ),
            ));
        }
        let elem = meta.datatype.size() as u64;
        if element_size != elem {
            return Err(Error::corrupt_header(
                inner.shared.address,
                format!("layout element size {element_size} but datatype size {elem}"),
            ));
        }
        let chunk_dims: Vec<HdfDim> = chunk_dimensions.iter().map(|d| u64::from(*d)).collect();
        if chunk_dims.iter().any(|d| *d == 0) {
            return Err(Error::corrupt_header(
                inner.shared.address,
                "zero-sized chunk dimension".to_string(),
            ));
        }
        let chunk_elems = chunk_dims
            .iter()
            .fold(1u64, |acc, d| acc.saturating_mul(*d));
        let chunk_bytes = chunk_elems
            .checked_mul(elem)
            .filter(|t| *t <= usize::MAX as u64)
            .ok_or_else(|| {
                Error::corrupt_header(inner.shared.address, "chunk size overflows".to_string())
            })?;

        let index = self.chunk_index(btree_address, rank)?;
        // Missing chunks keep the fill value, so initialize the whole
        // buffer with it and scatter only what the index knows about.
        let mut out = filled_buffer(total as usize, elem as usize, &meta.fill_value);

        for chunk in index.values() {
            let key = ChunkKey::new(chunk.chunk_offset.clone());
            let file = inner.shared.file.clone();
            let pipeline = &meta.pipeline;
            let decoded = inner.cache.get_or_decode(&key, || {
                trace!(origin = ?chunk.chunk_offset, "decoding chunk");
                let raw = file
                    .channel
                    .read_at(chunk.file_address, u64::from(chunk.on_disk_size))?;
                let bytes = if pipeline.is_empty() {
                    raw
                } else {
                    pipeline.decode(raw, chunk.filter_mask, chunk.file_address)?
                };
                if (bytes.len() as u64) < chunk_bytes {
                    return Err(Error::io_at(
                        chunk.file_address,
                        std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            format!("decoded chunk has {} of {chunk_bytes} bytes", bytes.len()),
                        ),
                    ));
                }
                Ok(Arc::from(bytes))
            })?;
            scatter_chunk(
                &mut out,
                dims,
                &chunk_dims,
                &chunk.chunk_offset,
                &decoded,
                elem as usize,
            );
        }
        Ok(out)
    }
}

impl NodeOps for Dataset {
    fn name(&self) -> &str {
        &self.0.shared.name
    }

    fn path(&self) -> &str {
        &self.0.shared.path
    }

    fn address(&self) -> HdfAddress {
        self.0.shared.address
    }

    fn parent(&self) -> Option<Group> {
        self.0
            .shared
            .parent
            .as_ref()
            .and_then(std::sync::Weak::upgrade)
            .map(Group)
    }

    fn attributes(&self) -> Result<AttributeMap> {
        self.0.shared.attribute_map()
    }

    fn attribute(&self, name: &str) -> Result<Option<Attribute>> {
        Ok(self.0.shared.attribute_map()?.get(name).cloned())
    }
}

fn filled_buffer(total: usize, elem: usize, fill: &Option<Vec<u8>>) -> Vec<u8> {
    match fill {
        Some(value) if value.len() == elem && value.iter().any(|b| *b != 0) => {
            let mut out = Vec::with_capacity(total);
            while out.len() < total {
                out.extend_from_slice(value);
            }
            out.truncate(total);
            out
        }
        _ => vec![0u8; total],
    }
}

/// Copy one decoded chunk into the dense output.  Element `n` of the
/// output in C order belongs to the chunk whose origin is
/// `(n_multi / chunk_dims) * chunk_dims`; positions past the dataset edge
/// are skipped.
fn scatter_chunk(
    out: &mut [u8],
    dims: &[HdfDim],
    chunk_dims: &[HdfDim],
    origin: &[HdfDim],
    decoded: &[u8],
    elem: usize,
) {
    let rank = dims.len();
    let mut counts = Vec::with_capacity(rank);
    for i in 0..rank {
        if origin[i] >= dims[i] {
            return;
        }
        counts.push(chunk_dims[i].min(dims[i] - origin[i]));
    }

    // Row-major strides in elements.
    let mut dst_stride = vec![1u64; rank];
    let mut src_stride = vec![1u64; rank];
    for i in (0..rank - 1).rev() {
        dst_stride[i] = dst_stride[i + 1] * dims[i + 1];
        src_stride[i] = src_stride[i + 1] * chunk_dims[i + 1];
    }

    let run = counts[rank - 1] as usize;
    let mut idx = vec![0u64; rank - 1];
    loop {
        let mut src = 0u64;
        let mut dst = origin[rank - 1];
        for i in 0..rank - 1 {
            src += idx[i] * src_stride[i];
            dst += (origin[i] + idx[i]) * dst_stride[i];
        }
        let src = src as usize * elem;
        let dst = dst as usize * elem;
        out[dst..dst + run * elem].copy_from_slice(&decoded[src..src + run * elem]);

        // Advance the odometer over the leading axes.
        let mut axis = rank - 1;
        loop {
            if axis == 0 {
                return;
            }
            axis -= 1;
            idx[axis] += 1;
            if idx[axis] < counts[axis] {
                break;
            }
            idx[axis] = 0;
        }
    }
}

#[cfg(test)]
mod t {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    use super::*;

    fn le_i32s(values: &[i32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Output element n maps to chunk origin (n_multi / C) * C and the
    /// within-chunk offset n_multi - origin, per the C-order scatter law.
    #[test]
    fn scatter_reassembles_c_order() {
        let dims = [4u64, 4];
        let chunk_dims = [2u64, 2];
        let mut out = vec![0u8; 16 * 4];
        for origin in [[0u64, 0], [0, 2], [2, 0], [2, 2]] {
            // The chunk holds the values its footprint should produce.
            let values: Vec<i32> = (0..2)
                .flat_map(|r| {
                    (0..2).map(move |c| ((origin[0] + r) * 4 + origin[1] + c) as i32)
                })
                .collect();
            scatter_chunk(&mut out, &dims, &chunk_dims, &origin, &le_i32s(&values), 4);
        }
        let expect: Vec<i32> = (0..16).collect();
        assert_eq!(out, le_i32s(&expect));
    }

    #[test]
    fn scatter_clips_partial_edge_chunks() {
        // 3x3 dataset in 2x2 chunks: edge chunks overhang by one.
        let dims = [3u64, 3];
        let chunk_dims = [2u64, 2];
        let mut out = vec![0xffu8; 9];
        for origin in [[0u64, 0], [0, 2], [2, 0], [2, 2]] {
            let values: Vec<u8> = (0..4)
                .map(|i| {
                    let (r, c) = (i / 2, i % 2);
                    ((origin[0] + r) * 3 + origin[1] + c) as u8
                })
                .collect();
            scatter_chunk(&mut out, &dims, &chunk_dims, &origin, &values, 1);
        }
        assert_eq!(out, (0u8..9).collect::<Vec<u8>>());
    }

    #[test]
    fn scatter_one_dimensional() {
        let dims = [5u64];
        let chunk_dims = [2u64];
        let mut out = vec![0u8; 5];
        scatter_chunk(&mut out, &dims, &chunk_dims, &[4], &[9, 9], 1);
        assert_eq!(out, vec![0, 0, 0, 0, 9]);
    }

    #[test]
    fn chunk_key_equality_ignores_cached_hash() {
        let a = ChunkKey::new(vec![0, 2]);
        let b = ChunkKey::new(vec![0, 2]);
        let c = ChunkKey::new(vec![2, 0]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        let mut set = std::collections::HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.contains(&c));
    }

    /// Concurrent readers of the same chunk trigger exactly one decode,
    /// and everyone sees the same bytes.
    #[test]
    fn cache_decodes_each_key_once() {
        let cache = Arc::new(ChunkCache::default());
        let decodes = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let decodes = decodes.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    let key = ChunkKey::new(vec![0, 0]);
                    cache
                        .get_or_decode(&key, || {
                            decodes.fetch_add(1, Ordering::SeqCst);
                            Ok(Arc::from(vec![1u8, 2, 3]))
                        })
                        .unwrap()
                })
            })
            .collect();

        for h in handles {
            assert_eq!(&*h.join().unwrap(), &[1u8, 2, 3]);
        }
        assert_eq!(decodes.load(Ordering::SeqCst), 1);
        assert_eq!(cache.decoded_origins(), vec![vec![0, 0]]);
    }

    #[test]
    fn fill_buffer_repeats_value() {
        let fill = Some(vec![0xab, 0xcd]);
        assert_eq!(filled_buffer(6, 2, &fill), vec![0xab, 0xcd, 0xab, 0xcd, 0xab, 0xcd]);
        assert_eq!(filled_buffer(4, 2, &None), vec![0u8; 4]);
        // A fill value of the wrong width falls back to zeros.
        assert_eq!(filled_buffer(4, 4, &fill), vec![0u8; 4]);
    }
}
