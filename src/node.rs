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

//! The navigable hierarchy: groups, datasets, and links, materialized
//! lazily from object headers.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use enum_dispatch::enum_dispatch;
use tracing::debug;

use crate::btree_v1;
use crate::btree_v2::{BtreeV2, RecordV2};
use crate::dataset::Dataset;
use crate::dataspace::Dataspace;
use crate::datatype::{Datatype, StringPadding};
use crate::definitions::HdfAddress;
use crate::error::{Error, Result};
use crate::fractal_heap::FractalHeap;
use crate::lazy::Lazy;
use crate::local_heap::LocalHeap;
use crate::message::{decode_attribute, decode_link, AttributeMessage, LinkTarget};
use crate::object_header::ObjectHeader;
use crate::FileInner;

/// A named value attached to a node.
#[derive(Clone, Debug)]
pub struct Attribute {
    name: String,
    datatype: Datatype,
    dataspace: Dataspace,
    data: Vec<u8>,
}

impl Attribute {
    pub(crate) fn from_message(msg: AttributeMessage) -> Self {
        Attribute {
            name: msg.name,
            datatype: msg.datatype,
            dataspace: msg.dataspace,
            data: msg.data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn datatype(&self) -> &Datatype {
        &self.datatype
    }

    pub fn dataspace(&self) -> &Dataspace {
        &self.dataspace
    }

    /// The raw little-endian payload.
    pub fn value(&self) -> &[u8] {
        &self.data
    }

    /// The payload as text, for fixed-size string attributes.
    pub fn as_str(&self) -> Option<&str> {
        let Datatype::String { padding, .. } = &self.datatype else {
            return None;
        };
        let trimmed = match *padding {
            StringPadding::NullTerminate | StringPadding::NullPad => {
                let end = self.data.iter().position(|b| *b == 0).unwrap_or(self.data.len());
                &self.data[..end]
            }
            StringPadding::SpacePad => {
                let end = self
                    .data
                    .iter()
                    .rposition(|b| *b != b' ')
                    .map_or(0, |p| p + 1);
                &self.data[..end]
            }
        };
        std::str::from_utf8(trimmed).ok()
    }
}

/// Shared, immutable name-to-attribute map of one node.
pub type AttributeMap = Arc<BTreeMap<String, Attribute>>;

/// State common to every node variant.
pub(crate) struct NodeShared {
    pub(crate) file: Arc<FileInner>,
    pub(crate) address: HdfAddress,
    pub(crate) name: String,
    pub(crate) path: String,
    pub(crate) parent: Option<Weak<GroupInner>>,
    header: Lazy<Arc<ObjectHeader>>,
    attributes: Lazy<AttributeMap>,
}

impl NodeShared {
    fn new(
        file: Arc<FileInner>,
        address: HdfAddress,
        name: String,
        path: String,
        parent: Option<Weak<GroupInner>>,
    ) -> Self {
        NodeShared {
            file,
            address,
            name,
            path,
            parent,
            header: Lazy::new(),
            attributes: Lazy::new(),
        }
    }

    pub(crate) fn header(&self) -> Result<Arc<ObjectHeader>> {
        self.file.ensure_open()?;
        self.header.get_or_try(|| {
            ObjectHeader::read(
                &self.file.channel,
                &self.file.sb,
                self.address,
                self.file.verify_checksums,
            )
            .map(Arc::new)
        })
    }

    fn parent_group(&self) -> Option<Group> {
        self.parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(Group)
    }

    /// Inline attribute messages plus, when present, the dense store
    /// behind the attribute-info message.
    pub(crate) fn attribute_map(&self) -> Result<AttributeMap> {
        self.file.ensure_open()?;
        self.attributes.get_or_try(|| {
            let file = &self.file;
            let header = self.header()?;
            let mut map = BTreeMap::new();
            for msg in header.inline_attributes() {
                let attr = Attribute::from_message(msg.clone());
                map.insert(attr.name.clone(), attr);
            }
            if let Some(info) = header.attribute_info() {
                if info.fractal_heap_address != u64::MAX {
                    let heap = FractalHeap::read(
                        &file.channel,
                        &file.sb,
                        info.fractal_heap_address,
                        file.verify_checksums,
                    )?;
                    let btree_address = if info.name_btree_address != u64::MAX {
                        info.name_btree_address
                    } else {
                        info.creation_order_btree_address
                    };
                    if btree_address != u64::MAX {
                        let tree = BtreeV2::read(
                            &file.channel,
                            &file.sb,
                            btree_address,
                            file.verify_checksums,
                        )?;
                        for record in tree.records(&file.channel, &file.sb, file.verify_checksums)? {
                            if let RecordV2::AttributeName { heap_id, .. } = record {
                                let body = heap.get(
                                    &file.channel,
                                    &file.sb,
                                    &heap_id,
                                    file.verify_checksums,
                                )?;
                                let attr =
                                    Attribute::from_message(decode_attribute(&body, &file.sb)?);
                                map.insert(attr.name.clone(), attr);
                            }
                        }
                    }
                }
            }
            Ok(Arc::new(map))
        })
    }
}

/// Behavior shared by every node variant.
#[enum_dispatch]
pub trait NodeOps {
    /// Link name; empty for the root group.
    fn name(&self) -> &str;
    /// Absolute path, `/` for the root group.
    fn path(&self) -> &str;
    /// Object header address; undefined for soft and external links.
    fn address(&self) -> HdfAddress;
    /// The owning group; `None` only for the root.
    fn parent(&self) -> Option<Group>;
    fn attributes(&self) -> Result<AttributeMap>;
    fn attribute(&self, name: &str) -> Result<Option<Attribute>>;
}

/// A node in the file hierarchy.
#[enum_dispatch(NodeOps)]
#[derive(Clone)]
pub enum Node {
    Group(Group),
    Dataset(Dataset),
    SoftLink(SoftLink),
    ExternalLink(ExternalLink),
}

impl Node {
    pub fn as_group(&self) -> Option<&Group> {
        match self {
            Node::Group(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_dataset(&self) -> Option<&Dataset> {
        match self {
            Node::Dataset(d) => Some(d),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let kind = match self {
            Node::Group(_) => "Group",
            Node::Dataset(_) => "Dataset",
            Node::SoftLink(_) => "SoftLink",
            Node::ExternalLink(_) => "ExternalLink",
        };
        write!(f, "{kind}({})", self.path())
    }
}

pub(crate) struct GroupInner {
    shared: NodeShared,
    children: Lazy<Arc<ChildSet>>,
}

struct ChildSet {
    order: Vec<String>,
    map: BTreeMap<String, Node>,
}

/// A group: an interior node whose children are discovered through link
/// messages, a dense link index, or a legacy symbol table.
#[derive(Clone)]
pub struct Group(pub(crate) Arc<GroupInner>);

impl Group {
    pub(crate) fn root(file: Arc<FileInner>) -> Group {
        let address = file.sb.root_header_address;
        Group(Arc::new(GroupInner {
            shared: NodeShared::new(file, address, String::new(), "/".into(), None),
            children: Lazy::new(),
        }))
    }

    /// Children ordered by link creation order when every link carries
    /// one, otherwise by name.
    pub fn children(&self) -> Result<Vec<Node>> {
        let set = self.child_set()?;
        Ok(set.order.iter().map(|name| set.map[name].clone()).collect())
    }

    pub fn child(&self, name: &str) -> Result<Node> {
        let set = self.child_set()?;
        set.map
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(join_path(self.path(), name)))
    }

    fn child_set(&self) -> Result<Arc<ChildSet>> {
        self.0.shared.file.ensure_open()?;
        let inner = &self.0;
        inner.children.get_or_try(|| build_children(inner))
    }

    /// Unix timestamp of the last modification, when the writer recorded
    /// one.
    pub fn modification_time(&self) -> Result<Option<u32>> {
        Ok(self.0.shared.header()?.modification_time())
    }
}

impl NodeOps for Group {
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
        self.0.shared.parent_group()
    }

    fn attributes(&self) -> Result<AttributeMap> {
        self.0.shared.attribute_map()
    }

    fn attribute(&self, name: &str) -> Result<Option<Attribute>> {
        Ok(self.0.shared.attribute_map()?.get(name).cloned())
    }
}

/// A link that stores a path instead of an address.
#[derive(Clone)]
pub struct SoftLink(Arc<LinkInner>);

impl SoftLink {
    /// The stored target path.  Resolution is the caller's concern.
    pub fn target(&self) -> &str {
        &self.0.target
    }
}

/// A link into another file.
#[derive(Clone)]
pub struct ExternalLink(Arc<LinkInner>);

impl ExternalLink {
    /// The target file name.
    pub fn file(&self) -> &str {
        &self.0.file_name
    }

    /// The object path within the target file.
    pub fn target(&self) -> &str {
        &self.0.target
    }
}

struct LinkInner {
    name: String,
    path: String,
    parent: Weak<GroupInner>,
    file_name: String,
    target: String,
}

macro_rules! link_node_ops {
    ($ty:ty) => {
        impl NodeOps for $ty {
            fn name(&self) -> &str {
                &self.0.name
            }

            fn path(&self) -> &str {
                &self.0.path
            }

            fn address(&self) -> HdfAddress {
                u64::MAX
            }

            fn parent(&self) -> Option<Group> {
                self.0.parent.upgrade().map(Group)
            }

            fn attributes(&self) -> Result<AttributeMap> {
                Ok(Arc::new(BTreeMap::new()))
            }

            fn attribute(&self, _name: &str) -> Result<Option<Attribute>> {
                Ok(None)
            }
        }
    };
}

link_node_ops!(SoftLink);
link_node_ops!(ExternalLink);

pub(crate) fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

struct PendingChild {
    name: String,
    creation_order: Option<u64>,
    target: LinkTarget,
}

fn build_children(group: &Arc<GroupInner>) -> Result<Arc<ChildSet>> {
    let shared = &group.shared;
    let file = &shared.file;
    let header = shared.header()?;
    let mut pending = Vec::new();

    // Modern compact form: link messages inline in the header.
    for link in header.links() {
        pending.push(PendingChild {
            name: link.name.clone(),
            creation_order: link.creation_order,
            target: link.target.clone(),
        });
    }

    // Modern dense form: links indexed through a v2 B-tree whose records
    // point into a fractal heap.
    if let Some(info) = header.link_info() {
        if info.fractal_heap_address != u64::MAX {
            let heap = FractalHeap::read(
                &file.channel,
                &file.sb,
                info.fractal_heap_address,
                file.verify_checksums,
            )?;
            let btree_address = if info.name_index_btree_address != u64::MAX {
                info.name_index_btree_address
            } else {
                info.creation_order_btree_address
            };
            if btree_address != u64::MAX {
                let tree =
                    BtreeV2::read(&file.channel, &file.sb, btree_address, file.verify_checksums)?;
                for record in tree.records(&file.channel, &file.sb, file.verify_checksums)? {
                    let heap_id = match record {
                        RecordV2::LinkName { heap_id, .. } => heap_id,
                        RecordV2::LinkCreationOrder { heap_id, .. } => heap_id,
                        _ => continue,
                    };
                    let body =
                        heap.get(&file.channel, &file.sb, &heap_id, file.verify_checksums)?;
                    let link = decode_link(&body, &file.sb)?;
                    pending.push(PendingChild {
                        name: link.name,
                        creation_order: link.creation_order,
                        target: link.target,
                    });
                }
            }
        }
    }

    // Legacy form: a v1 B-tree over symbol table nodes, names in the
    // local heap.
    if let Some(st) = header.symbol_table() {
        let heap = LocalHeap::read(&file.channel, &file.sb, st.local_heap_address)?;
        for snod_address in
            btree_v1::group_leaf_entries(&file.channel, &file.sb, st.btree_address)?
        {
            for entry in btree_v1::read_symbol_table_node(&file.channel, &file.sb, snod_address)? {
                let name = heap.get(&file.channel, entry.link_name_offset)?;
                let target = if entry.cache_type == 2 {
                    let offset = u32::from_le_bytes(entry.scratch[..4].try_into().unwrap());
                    LinkTarget::Soft(heap.get(&file.channel, u64::from(offset))?)
                } else {
                    LinkTarget::Hard(entry.object_header_address)
                };
                pending.push(PendingChild {
                    name,
                    creation_order: None,
                    target,
                });
            }
        }
    }

    if !pending.is_empty() && pending.iter().all(|p| p.creation_order.is_some()) {
        pending.sort_by_key(|p| p.creation_order);
    } else {
        pending.sort_by(|a, b| a.name.cmp(&b.name));
    }

    debug!(path = %shared.path, children = pending.len(), "materialized group");

    let mut order = Vec::with_capacity(pending.len());
    let mut map = BTreeMap::new();
    for child in pending {
        let node = make_child(group, &child)?;
        order.push(child.name.clone());
        map.insert(child.name, node);
    }
    Ok(Arc::new(ChildSet { order, map }))
}

fn make_child(parent: &Arc<GroupInner>, child: &PendingChild) -> Result<Node> {
    let shared = &parent.shared;
    let path = join_path(&shared.path, &child.name);
    match &child.target {
        LinkTarget::Hard(address) => {
            let node_shared = NodeShared::new(
                shared.file.clone(),
                *address,
                child.name.clone(),
                path,
                Some(Arc::downgrade(parent)),
            );
            // Peek at the header once to decide the variant; the handle
            // keeps it for later accesses.
            let header = node_shared.header()?;
            if header.layout().is_some() || header.datatype().is_some() {
                Ok(Node::Dataset(Dataset::from_shared(node_shared)))
            } else {
                Ok(Node::Group(Group(Arc::new(GroupInner {
                    shared: node_shared,
                    children: Lazy::new(),
                }))))
            }
        }
        LinkTarget::Soft(target) => Ok(Node::SoftLink(SoftLink(Arc::new(LinkInner {
            name: child.name.clone(),
            path,
            parent: Arc::downgrade(parent),
            file_name: String::new(),
            target: target.clone(),
        })))),
        LinkTarget::External { file, path: target } => {
            Ok(Node::ExternalLink(ExternalLink(Arc::new(LinkInner {
                name: child.name.clone(),
                path,
                parent: Arc::downgrade(parent),
                file_name: file.clone(),
                target: target.clone(),
            }))))
        }
    }
}
