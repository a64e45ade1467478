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

//! Read-only access to HDF5 files.
//!
//! The file is memory-mapped and its hierarchy of groups, datasets, and
//! links is materialized lazily while navigating.  Dataset payloads come
//! back as dense little-endian byte buffers; chunked datasets are
//! assembled through a per-dataset decoded-chunk cache.
//!
//! ```no_run
//! use hdf5_read::NodeOps;
//!
//! let file = hdf5_read::open("measurements.h5")?;
//! for child in file.root_group().children()? {
//!     println!("{}", child.path());
//! }
//! if let Some(ds) = file.node_at("/nested/float64")?.as_dataset() {
//!     let shape = ds.dimensions()?;
//!     let bytes = ds.read_raw()?;
//!     assert_eq!(bytes.len() as u64, shape.iter().product::<u64>() * 8);
//! }
//! # Ok::<(), hdf5_read::Error>(())
//! ```

use std::path::Path;
use std::sync::Arc;

extern crate bincode_next as bincode;

mod btree_v1;
mod btree_v2;
mod channel;
mod checksum;
mod dataset;
mod dataspace;
mod datatype;
mod definitions;
mod error;
mod filter;
mod fractal_heap;
mod global_heap;
mod layout;
mod lazy;
mod local_heap;
mod message;
mod node;
mod object_header;
mod sb;
mod utils;

pub use crate::dataset::{Chunk, ChunkKey, Dataset};
pub use crate::dataspace::Dataspace;
pub use crate::datatype::{ByteOrder, Datatype, StringPadding};
pub use crate::definitions::{HdfAddress, HdfDim, HdfLength};
pub use crate::error::{Error, Result};
pub use crate::filter::{Filter, FilterDescriptor, FilterPipeline};
pub use crate::global_heap::GlobalHeapId;
pub use crate::layout::DataLayout;
pub use crate::message::MessageType;
pub use crate::node::{Attribute, AttributeMap, ExternalLink, Group, Node, NodeOps, SoftLink};
pub use crate::object_header::{HeaderMessage, MessageFlags, ObjectHeader};
pub use crate::sb::Superblock;

use crate::channel::FileChannel;
use crate::node::join_path;

/// Convenience for [`Hdf5File::open`].
pub fn open<P: AsRef<Path>>(path: P) -> Result<Hdf5File> {
    Hdf5File::open(path)
}

pub(crate) struct FileInner {
    pub(crate) channel: FileChannel,
    pub(crate) sb: Superblock,
    pub(crate) verify_checksums: bool,
}

impl FileInner {
    pub(crate) fn ensure_open(&self) -> Result<()> {
        self.channel.ensure_open()
    }
}

/// How to open a file.
#[derive(Clone, Debug)]
pub struct OpenOptions {
    verify_checksums: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            verify_checksums: true,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verify the Jenkins lookup3 checksums carried by v2 metadata blocks
    /// and fractal heaps.  On by default; disabling trades integrity
    /// checking for a little speed on trusted files.
    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    pub fn open<P: AsRef<Path>>(&self, path: P) -> Result<Hdf5File> {
        let channel = FileChannel::open(path)?;
        let sb = Superblock::locate(&channel, self.verify_checksums)?;
        channel.set_superblock(sb);
        let inner = Arc::new(FileInner {
            channel,
            sb,
            verify_checksums: self.verify_checksums,
        });
        let root = Group::root(inner.clone());
        Ok(Hdf5File { inner, root })
    }
}

/// An open HDF5 file.
///
/// Handles derived from it (groups, datasets, attributes) stay valid
/// until [`close`](Hdf5File::close); afterwards every operation on them
/// fails with [`Error::Closed`].
pub struct Hdf5File {
    inner: Arc<FileInner>,
    root: Group,
}

impl Hdf5File {
    /// Open with default options.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        OpenOptions::new().open(path)
    }

    pub fn superblock(&self) -> &Superblock {
        &self.inner.sb
    }

    pub fn root_group(&self) -> Group {
        self.root.clone()
    }

    /// Resolve an absolute path to a node.
    pub fn node_at(&self, path: &str) -> Result<Node> {
        let mut current = Node::Group(self.root.clone());
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let group = current
                .as_group()
                .cloned()
                .ok_or_else(|| Error::NotFound(join_path(current.path(), segment)))?;
            current = group.child(segment)?;
        }
        Ok(current)
    }

    /// Fetch a variable-length payload referenced from dataset bytes.
    pub fn global_heap_object(&self, id: GlobalHeapId) -> Result<Vec<u8>> {
        self.inner.ensure_open()?;
        global_heap::read_object(&self.inner.channel, &self.inner.sb, id)
    }

    /// Release the mapping.  Every node handle derived from this file
    /// returns [`Error::Closed`] from then on.
    pub fn close(self) {
        self.inner.channel.close();
    }
}

impl std::fmt::Debug for Hdf5File {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Hdf5File")
            .field("superblock", &self.inner.sb)
            .finish()
    }
}
