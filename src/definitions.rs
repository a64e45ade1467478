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
#![allow(dead_code)]

pub const HDF5_SIGNATURE: [u8; 8] = *b"\x89HDF\r\n\x1a\n"; // file signature
pub const OHDR_MAGIC: [u8; 4] = *b"OHDR"; // Version 2 Object Header
pub const OCHK_MAGIC: [u8; 4] = *b"OCHK"; // Version 2 Object Header Continuation
pub const TREE_MAGIC: [u8; 4] = *b"TREE"; // Version 1 B-tree Node
pub const BTHD_MAGIC: [u8; 4] = *b"BTHD"; // Version 2 B-tree Header
pub const BTIN_MAGIC: [u8; 4] = *b"BTIN"; // Version 2 B-tree Internal Node
pub const BTLF_MAGIC: [u8; 4] = *b"BTLF"; // Version 2 B-tree Leaf Node
pub const FRHP_MAGIC: [u8; 4] = *b"FRHP"; // Fractal Heap Header
pub const FHDB_MAGIC: [u8; 4] = *b"FHDB"; // Fractal Heap Direct Block
pub const FHIB_MAGIC: [u8; 4] = *b"FHIB"; // Fractal Heap Indirect Block
pub const HEAP_MAGIC: [u8; 4] = *b"HEAP"; // Local Heap
pub const GCOL_MAGIC: [u8; 4] = *b"GCOL"; // Global Heap Collection
pub const SNOD_MAGIC: [u8; 4] = *b"SNOD"; // Symbol Table Node

pub type HdfAddress = u64; // file byte offset, relative to the superblock base
pub type HdfLength = u64; // byte length of an on-disk region
pub type HdfDim = u64; // element count along one dataspace axis

/// The farthest offset at which the file signature is searched for.
pub const SIGNATURE_SCAN_LIMIT: u64 = 8 * 1024 * 1024;

/// Returns the all-ones "undefined address" sentinel for the given field
/// width in bytes.
pub const fn undefined_address(width: u8) -> HdfAddress {
    if width >= 8 {
        u64::MAX
    } else {
        (1u64 << (8 * width as u32)) - 1
    }
}

/// True if `address` is the undefined sentinel for an `width`-byte field.
pub fn is_undefined(address: HdfAddress, width: u8) -> bool {
    address == undefined_address(width)
}
