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

//! A minimal HDF5 writer for the integration suite.  Since golden images
//! cannot be committed, the tests build legacy-format files in process:
//! version 0 superblock, version 1 object headers, symbol-table groups,
//! and version 1 chunk B-trees.

#![allow(dead_code)]

use std::io::Write;

pub const SIGNATURE: [u8; 8] = *b"\x89HDF\r\n\x1a\n";

/// An on-disk datatype description for the builder.
#[derive(Clone)]
pub struct Dtype {
    pub class_and_version: u8,
    pub bits: [u8; 3],
    pub size: u32,
    pub props: Vec<u8>,
}

pub fn dtype_i32() -> Dtype {
    let mut props = Vec::new();
    props.extend_from_slice(&0u16.to_le_bytes()); // bit offset
    props.extend_from_slice(&32u16.to_le_bytes()); // precision
    Dtype {
        class_and_version: 0x10,
        bits: [0x08, 0, 0], // little-endian, signed
        size: 4,
        props,
    }
}

pub fn dtype_f64() -> Dtype {
    let mut props = Vec::new();
    props.extend_from_slice(&0u16.to_le_bytes()); // bit offset
    props.extend_from_slice(&64u16.to_le_bytes()); // precision
    props.push(52); // exponent location
    props.push(11); // exponent size
    props.push(0); // mantissa location
    props.push(52); // mantissa size
    props.extend_from_slice(&1023u32.to_le_bytes()); // exponent bias
    Dtype {
        class_and_version: 0x11,
        bits: [0x20, 0x3f, 0],
        size: 8,
        props,
    }
}

pub fn dtype_string(size: u32) -> Dtype {
    Dtype {
        class_and_version: 0x13,
        bits: [0, 0, 0], // NUL-terminated, ASCII
        size,
        props: Vec::new(),
    }
}

#[derive(Clone)]
pub enum Layout {
    Contiguous(Vec<u8>),
    Chunked {
        chunk_dims: Vec<u64>,
        /// `(origin, raw chunk bytes)`; the builder compresses when
        /// `deflate` is set.  Omitted chunks read back as fill.
        chunks: Vec<(Vec<u64>, Vec<u8>)>,
        deflate: bool,
    },
}

#[derive(Clone)]
pub struct DatasetSpec {
    pub dims: Vec<u64>,
    pub dtype: Dtype,
    pub layout: Layout,
    /// Fixed-size string attributes, enough surface for the suite.
    pub attrs: Vec<(String, String)>,
    pub fill: Option<Vec<u8>>,
}

impl DatasetSpec {
    pub fn contiguous(dims: Vec<u64>, dtype: Dtype, data: Vec<u8>) -> Self {
        DatasetSpec {
            dims,
            dtype,
            layout: Layout::Contiguous(data),
            attrs: Vec::new(),
            fill: None,
        }
    }
}

#[derive(Clone)]
pub enum Spec {
    Group(Vec<(String, Spec)>),
    Dataset(DatasetSpec),
    SoftLink(String),
}

struct Image {
    buf: Vec<u8>,
}

impl Image {
    /// Append a block at the next 8-aligned address.
    fn alloc(&mut self, bytes: &[u8]) -> u64 {
        while self.buf.len() % 8 != 0 {
            self.buf.push(0);
        }
        let addr = self.buf.len() as u64;
        self.buf.extend_from_slice(bytes);
        addr
    }
}

/// Build a complete file image with the given root children.
pub fn build_file(root_children: Vec<(String, Spec)>) -> Vec<u8> {
    let mut img = Image {
        buf: vec![0u8; 96],
    };
    let root_addr = write_group(&mut img, root_children);
    let eof = img.buf.len() as u64;

    let sb = &mut img.buf[..96];
    sb[..8].copy_from_slice(&SIGNATURE);
    // Versions, address widths, and the group B-tree ranks.
    sb[8..16].copy_from_slice(&[0, 0, 0, 0, 0, 8, 8, 0]);
    sb[16..18].copy_from_slice(&4u16.to_le_bytes());
    sb[18..20].copy_from_slice(&16u16.to_le_bytes());
    sb[20..24].copy_from_slice(&0u32.to_le_bytes());
    sb[24..32].copy_from_slice(&0u64.to_le_bytes()); // base address
    sb[32..40].copy_from_slice(&u64::MAX.to_le_bytes()); // free space
    sb[40..48].copy_from_slice(&eof.to_le_bytes());
    sb[48..56].copy_from_slice(&u64::MAX.to_le_bytes()); // driver info
    sb[56..64].copy_from_slice(&0u64.to_le_bytes()); // root link name
    sb[64..72].copy_from_slice(&root_addr.to_le_bytes());
    sb[72..96].fill(0); // cache type, reserved, scratch

    img.buf
}

/// Write a file image to a temp file.
pub fn write_temp(image: &[u8]) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(image).unwrap();
    f.flush().unwrap();
    f
}

fn write_node(img: &mut Image, spec: Spec) -> u64 {
    match spec {
        Spec::Group(children) => write_group(img, children),
        Spec::Dataset(ds) => write_dataset(img, ds),
        Spec::SoftLink(_) => unreachable!("soft links live in the parent's symbol table"),
    }
}

fn write_group(img: &mut Image, mut children: Vec<(String, Spec)>) -> u64 {
    children.sort_by(|a, b| a.0.cmp(&b.0));

    // Hard children are whole objects; soft links only occupy the heap
    // and symbol table.
    enum Entry {
        Hard { name_off: u64, addr: u64 },
        Soft { name_off: u64, target_off: u64 },
    }

    let mut heap_data = vec![0u8]; // offset zero holds the empty name
    let mut entries = Vec::new();
    for (name, spec) in children {
        let name_off = heap_data.len() as u64;
        heap_data.extend_from_slice(name.as_bytes());
        heap_data.push(0);
        match spec {
            Spec::SoftLink(target) => {
                let target_off = heap_data.len() as u64;
                heap_data.extend_from_slice(target.as_bytes());
                heap_data.push(0);
                entries.push(Entry::Soft {
                    name_off,
                    target_off,
                });
            }
            other => {
                let addr = write_node(img, other);
                entries.push(Entry::Hard { name_off, addr });
            }
        }
    }

    let heap_data_addr = img.alloc(&heap_data);
    let mut heap_header = Vec::new();
    heap_header.extend_from_slice(b"HEAP");
    heap_header.extend_from_slice(&[0, 0, 0, 0]);
    heap_header.extend_from_slice(&(heap_data.len() as u64).to_le_bytes());
    heap_header.extend_from_slice(&u64::MAX.to_le_bytes()); // free list
    heap_header.extend_from_slice(&heap_data_addr.to_le_bytes());
    let heap_addr = img.alloc(&heap_header);

    let mut snod = Vec::new();
    snod.extend_from_slice(b"SNOD");
    snod.push(1);
    snod.push(0);
    snod.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for entry in &entries {
        match entry {
            Entry::Hard { name_off, addr } => {
                snod.extend_from_slice(&name_off.to_le_bytes());
                snod.extend_from_slice(&addr.to_le_bytes());
                snod.extend_from_slice(&0u32.to_le_bytes()); // nothing cached
                snod.extend_from_slice(&0u32.to_le_bytes());
                snod.extend_from_slice(&[0u8; 16]);
            }
            Entry::Soft {
                name_off,
                target_off,
            } => {
                snod.extend_from_slice(&name_off.to_le_bytes());
                snod.extend_from_slice(&u64::MAX.to_le_bytes());
                snod.extend_from_slice(&2u32.to_le_bytes()); // soft link
                snod.extend_from_slice(&0u32.to_le_bytes());
                let mut scratch = [0u8; 16];
                scratch[..4].copy_from_slice(&(*target_off as u32).to_le_bytes());
                snod.extend_from_slice(&scratch);
            }
        }
    }
    let snod_addr = img.alloc(&snod);

    let mut btree = Vec::new();
    btree.extend_from_slice(b"TREE");
    btree.push(0); // group node
    btree.push(0); // leaf
    btree.extend_from_slice(&1u16.to_le_bytes());
    btree.extend_from_slice(&u64::MAX.to_le_bytes());
    btree.extend_from_slice(&u64::MAX.to_le_bytes());
    btree.extend_from_slice(&0u64.to_le_bytes()); // left key
    btree.extend_from_slice(&snod_addr.to_le_bytes());
    btree.extend_from_slice(&(heap_data.len() as u64).to_le_bytes()); // right key
    let btree_addr = img.alloc(&btree);

    let mut symbol_table = Vec::new();
    symbol_table.extend_from_slice(&btree_addr.to_le_bytes());
    symbol_table.extend_from_slice(&heap_addr.to_le_bytes());
    let header = object_header(&[(0x11, symbol_table)]);
    img.alloc(&header)
}

fn write_dataset(img: &mut Image, ds: DatasetSpec) -> u64 {
    let mut messages: Vec<(u16, Vec<u8>)> = Vec::new();
    messages.push((0x1, dataspace_body(&ds.dims)));
    messages.push((0x3, datatype_body(&ds.dtype)));

    if let Some(fill) = &ds.fill {
        let mut body = vec![2u8, 2, 0, 1];
        body.extend_from_slice(&(fill.len() as u32).to_le_bytes());
        body.extend_from_slice(fill);
        messages.push((0x5, body));
    }

    match ds.layout {
        Layout::Contiguous(data) => {
            let addr = img.alloc(&data);
            let mut body = vec![3u8, 1];
            body.extend_from_slice(&addr.to_le_bytes());
            body.extend_from_slice(&(data.len() as u64).to_le_bytes());
            messages.push((0x8, body));
        }
        Layout::Chunked {
            chunk_dims,
            chunks,
            deflate,
        } => {
            let rank = chunk_dims.len();
            let mut records = Vec::new();
            for (origin, raw) in chunks {
                let stored = if deflate { zlib_compress(&raw) } else { raw };
                let addr = img.alloc(&stored);
                records.push((origin, stored.len() as u32, addr));
            }

            let mut btree = Vec::new();
            btree.extend_from_slice(b"TREE");
            btree.push(1); // chunk node
            btree.push(0); // leaf
            btree.extend_from_slice(&(records.len() as u16).to_le_bytes());
            btree.extend_from_slice(&u64::MAX.to_le_bytes());
            btree.extend_from_slice(&u64::MAX.to_le_bytes());
            for (origin, size, addr) in &records {
                btree.extend_from_slice(&size.to_le_bytes());
                btree.extend_from_slice(&0u32.to_le_bytes()); // filter mask
                for o in origin {
                    btree.extend_from_slice(&o.to_le_bytes());
                }
                btree.extend_from_slice(&0u64.to_le_bytes()); // element offset
                btree.extend_from_slice(&addr.to_le_bytes());
            }
            btree.extend_from_slice(&vec![0u8; 8 + 8 * (rank + 1)]); // final key
            let btree_addr = img.alloc(&btree);

            let mut body = vec![3u8, 2, rank as u8 + 1];
            body.extend_from_slice(&btree_addr.to_le_bytes());
            for d in &chunk_dims {
                body.extend_from_slice(&(*d as u32).to_le_bytes());
            }
            body.extend_from_slice(&ds.dtype.size.to_le_bytes());
            messages.push((0x8, body));

            if deflate {
                let mut body = vec![1u8, 1, 0, 0, 0, 0, 0, 0];
                body.extend_from_slice(&1u16.to_le_bytes()); // deflate
                body.extend_from_slice(&0u16.to_le_bytes()); // no name
                body.extend_from_slice(&0u16.to_le_bytes()); // flags
                body.extend_from_slice(&0u16.to_le_bytes()); // no client data
                messages.push((0xB, body));
            }
        }
    }

    for (name, value) in &ds.attrs {
        messages.push((0xC, attribute_body(name, value)));
    }

    let header = object_header(&messages);
    img.alloc(&header)
}

fn pad8(n: usize) -> usize {
    n.div_ceil(8) * 8
}

fn object_header(messages: &[(u16, Vec<u8>)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (kind, msg) in messages {
        let padded = pad8(msg.len());
        body.extend_from_slice(&kind.to_le_bytes());
        body.extend_from_slice(&(padded as u16).to_le_bytes());
        body.extend_from_slice(&[0, 0, 0, 0]); // flags + reserved
        body.extend_from_slice(msg);
        body.resize(body.len() + padded - msg.len(), 0);
    }
    let mut header = vec![1u8, 0];
    header.extend_from_slice(&(messages.len() as u16).to_le_bytes());
    header.extend_from_slice(&1u32.to_le_bytes());
    header.extend_from_slice(&(body.len() as u32).to_le_bytes());
    header.extend_from_slice(&[0u8; 4]); // alignment
    header.extend_from_slice(&body);
    header
}

fn dataspace_body(dims: &[u64]) -> Vec<u8> {
    let mut body = vec![1u8, dims.len() as u8, 0, 0, 0, 0, 0, 0];
    for d in dims {
        body.extend_from_slice(&d.to_le_bytes());
    }
    body
}

fn datatype_body(dtype: &Dtype) -> Vec<u8> {
    let mut body = vec![dtype.class_and_version];
    body.extend_from_slice(&dtype.bits);
    body.extend_from_slice(&dtype.size.to_le_bytes());
    body.extend_from_slice(&dtype.props);
    body
}

fn attribute_body(name: &str, value: &str) -> Vec<u8> {
    let dtype = datatype_body(&dtype_string(value.len() as u32));
    let dspace = vec![1u8, 0, 0, 0, 0, 0, 0, 0]; // scalar
    let name_len = name.len() + 1;

    let mut body = vec![1u8, 0];
    body.extend_from_slice(&(name_len as u16).to_le_bytes());
    body.extend_from_slice(&(dtype.len() as u16).to_le_bytes());
    body.extend_from_slice(&(dspace.len() as u16).to_le_bytes());
    body.extend_from_slice(name.as_bytes());
    body.push(0);
    body.resize(8 + pad8(name_len), 0);
    let at = body.len();
    body.extend_from_slice(&dtype);
    body.resize(at + pad8(dtype.len()), 0);
    let at = body.len();
    body.extend_from_slice(&dspace);
    body.resize(at + pad8(dspace.len()), 0);
    body.extend_from_slice(value.as_bytes());
    body
}

fn zlib_compress(raw: &[u8]) -> Vec<u8> {
    let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(raw).unwrap();
    enc.finish().unwrap()
}

pub fn le_i32s(values: impl IntoIterator<Item = i32>) -> Vec<u8> {
    values.into_iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn le_f64s(values: impl IntoIterator<Item = f64>) -> Vec<u8> {
    values.into_iter().flat_map(|v| v.to_le_bytes()).collect()
}
