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
use std::fs::File;
use std::path::Path;
use std::sync::OnceLock;

use memmap2::Mmap;
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use tracing::debug;

use crate::error::{Error, Result};
use crate::sb::Superblock;

/// A zero-copy view into the mapped file, held for at most the duration of
/// one decode step.  The read guard keeps `close()` from tearing the
/// mapping down underneath it.
pub type MappedSlice<'a> = MappedRwLockReadGuard<'a, [u8]>;

/// Owner of the open file.  All byte access in the crate funnels through
/// here, which is what makes `close()` airtight: once the mapping is taken,
/// every later read on any derived handle fails with [`Error::Closed`].
#[derive(Debug)]
pub struct FileChannel {
    map: RwLock<Option<Mmap>>,
    size: u64,
    superblock: OnceLock<Superblock>,
}

impl FileChannel {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(|e| Error::io_at(0, e))?;
        let md = file.metadata().map_err(|e| Error::io_at(0, e))?;
        if md.len() == 0 {
            // An empty file cannot carry the signature, and zero-length
            // mappings are rejected by the OS anyway.
            return Err(Error::NotHdf5);
        }
        let map = unsafe { Mmap::map(&file) }.map_err(|e| Error::io_at(0, e))?;
        let size = map.len() as u64;
        debug!(size, "mapped file");
        Ok(FileChannel {
            map: RwLock::new(Some(map)),
            size,
            superblock: OnceLock::new(),
        })
    }

    /// Total mapped length in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn set_superblock(&self, sb: Superblock) {
        // Only called once, from open().
        let _ = self.superblock.set(sb);
    }

    pub fn superblock(&self) -> Result<Superblock> {
        self.ensure_open()?;
        self.superblock.get().cloned().ok_or(Error::NotHdf5)
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.map.read().is_some() {
            Ok(())
        } else {
            Err(Error::Closed)
        }
    }

    /// Borrow `len` bytes at `offset` straight out of the mapping.
    pub fn map_range(&self, offset: u64, len: u64) -> Result<MappedSlice<'_>> {
        let end = self.check_range(offset, len)?;
        let guard = self.map.read();
        RwLockReadGuard::try_map(guard, |m| {
            m.as_ref().map(|m| &m[offset as usize..end as usize])
        })
        .map_err(|_| Error::Closed)
    }

    /// Copy `len` bytes at `offset` out of the mapping.
    pub fn read_at(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        Ok(self.map_range(offset, len)?.to_vec())
    }

    /// Tear down the mapping.  Idempotent.
    pub fn close(&self) {
        let mut guard = self.map.write();
        if guard.take().is_some() {
            debug!("closed file");
        }
    }

    fn check_range(&self, offset: u64, len: u64) -> Result<u64> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| Error::out_of_bounds(offset, len, self.size))?;
        if end > self.size {
            return Err(Error::out_of_bounds(offset, len, self.size));
        }
        Ok(end)
    }
}
