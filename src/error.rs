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
use std::sync::Arc;

use thiserror::Error;

use crate::definitions::HdfAddress;

/// Every failure the library can produce.
///
/// Errors are cheap to clone so that lazily-initialized values can cache a
/// failure and re-raise it on every later access to the same handle.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("i/o error at byte {offset}: {source}")]
    Io {
        offset: u64,
        source: Arc<std::io::Error>,
    },

    #[error("not an HDF5 file: no signature found")]
    NotHdf5,

    #[error("unsupported {what} version {version}")]
    UnsupportedVersion { what: &'static str, version: u8 },

    #[error("corrupt object header at {address:#x}: {detail}")]
    CorruptHeader { address: HdfAddress, detail: String },

    #[error("corrupt message of type {kind:#x}: {detail}")]
    CorruptMessage { kind: u16, detail: String },

    #[error("corrupt b-tree node at {address:#x}: {detail}")]
    CorruptBtree { address: HdfAddress, detail: String },

    #[error("checksum mismatch in block at {address:#x}")]
    ChecksumMismatch { address: HdfAddress },

    #[error("filter {id} is not supported")]
    UnsupportedFilter { id: u16 },

    #[error("unsupported data layout")]
    UnsupportedLayout,

    #[error("unsupported datatype: {0}")]
    UnsupportedDatatype(String),

    #[error("file is closed")]
    Closed,

    #[error("no such node: {0}")]
    NotFound(String),
}

impl Error {
    pub(crate) fn io_at(offset: u64, source: std::io::Error) -> Self {
        Error::Io {
            offset,
            source: Arc::new(source),
        }
    }

    /// Read past the mapped end of the file.
    pub(crate) fn out_of_bounds(offset: u64, len: u64, size: u64) -> Self {
        Error::io_at(
            offset,
            std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("read of {len} bytes at {offset:#x} exceeds file size {size:#x}"),
            ),
        )
    }

    pub(crate) fn corrupt_header(address: HdfAddress, detail: impl Into<String>) -> Self {
        Error::CorruptHeader {
            address,
            detail: detail.into(),
        }
    }

    pub(crate) fn corrupt_message(kind: u16, detail: impl Into<String>) -> Self {
        Error::CorruptMessage {
            kind,
            detail: detail.into(),
        }
    }

    pub(crate) fn corrupt_btree(address: HdfAddress, detail: impl Into<String>) -> Self {
        Error::CorruptBtree {
            address,
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
