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
mod util;

use std::collections::BTreeSet;

use hdf5_read::{Error, Node, NodeOps};
use rstest::rstest;

use util::{
    build_file, dtype_f64, dtype_i32, le_f64s, le_i32s, write_temp, DatasetSpec, Layout, Spec,
};

/// The shared fixture: datasets "int32" (shape [10], values 0..9, with a
/// "units" attribute) and "nested/float64" (shape [2,3], values 0.0..5.0).
fn test_file_image() -> Vec<u8> {
    let mut int32 =
        DatasetSpec::contiguous(vec![10], dtype_i32(), le_i32s(0..10));
    int32.attrs.push(("units".into(), "meters".into()));

    let float64 = DatasetSpec::contiguous(
        vec![2, 3],
        dtype_f64(),
        le_f64s([0.0, 1.0, 2.0, 3.0, 4.0, 5.0]),
    );

    build_file(vec![
        ("int32".into(), Spec::Dataset(int32)),
        (
            "nested".into(),
            Spec::Group(vec![("float64".into(), Spec::Dataset(float64))]),
        ),
    ])
}

/// 4x4 int32 in 2x2 chunks, values row*4+col, optionally deflated.
fn chunked_image(deflate: bool) -> Vec<u8> {
    let chunk = |origin: [u64; 2]| -> (Vec<u64>, Vec<u8>) {
        let values: Vec<i32> = (0..2)
            .flat_map(|r| (0..2).map(move |c| ((origin[0] + r) * 4 + origin[1] + c) as i32))
            .collect();
        (origin.to_vec(), le_i32s(values))
    };
    let ds = DatasetSpec {
        dims: vec![4, 4],
        dtype: dtype_i32(),
        layout: Layout::Chunked {
            chunk_dims: vec![2, 2],
            chunks: vec![chunk([0, 0]), chunk([0, 2]), chunk([2, 0]), chunk([2, 2])],
            deflate,
        },
        attrs: Vec::new(),
        fill: None,
    };
    build_file(vec![("chunked".into(), Spec::Dataset(ds))])
}

fn collect_paths(node: &Node, out: &mut Vec<String>) {
    out.push(node.path().to_string());
    if let Some(group) = node.as_group() {
        for child in group.children().unwrap() {
            collect_paths(&child, out);
        }
    }
}

#[test]
fn e1_not_an_hdf5_file() {
    let f = write_temp(b"\x00\x00\x00");
    assert!(matches!(hdf5_read::open(f.path()), Err(Error::NotHdf5)));
}

#[test]
fn e2_tree_and_values() {
    let f = write_temp(&test_file_image());
    let file = hdf5_read::open(f.path()).unwrap();
    let root = file.root_group();
    assert_eq!(root.path(), "/");

    let names: BTreeSet<String> = root
        .children()
        .unwrap()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    assert_eq!(
        names,
        BTreeSet::from(["int32".to_string(), "nested".to_string()])
    );

    let nested = root.child("nested").unwrap();
    let float64 = nested.as_group().unwrap().child("float64").unwrap();
    let ds = float64.as_dataset().unwrap();
    assert_eq!(ds.dimensions().unwrap(), vec![2, 3]);
    assert_eq!(
        ds.read_raw().unwrap(),
        le_f64s([0.0, 1.0, 2.0, 3.0, 4.0, 5.0])
    );

    let int32 = root.child("int32").unwrap();
    let ds = int32.as_dataset().unwrap();
    assert_eq!(ds.dimensions().unwrap(), vec![10]);
    assert_eq!(ds.read_raw().unwrap(), le_i32s(0..10));
}

/// Round-trip law: traversal matches the golden path list, and payload
/// length is the product of the dimensions times the element size.
#[rstest]
#[case("/int32", vec![10], 4)]
#[case("/nested/float64", vec![2, 3], 8)]
fn golden_shapes(#[case] path: &str, #[case] dims: Vec<u64>, #[case] elem: u64) {
    let f = write_temp(&test_file_image());
    let file = hdf5_read::open(f.path()).unwrap();

    let mut paths = Vec::new();
    collect_paths(&Node::Group(file.root_group()), &mut paths);
    assert_eq!(paths, vec!["/", "/int32", "/nested", "/nested/float64"]);

    let node = file.node_at(path).unwrap();
    let ds = node.as_dataset().unwrap();
    assert_eq!(ds.dimensions().unwrap(), dims);
    assert_eq!(
        ds.read_raw().unwrap().len() as u64,
        dims.iter().product::<u64>() * elem
    );
    assert_eq!(u64::from(ds.elem_size().unwrap()), elem);
}

/// Path law: `node.path()` is the parent's path joined with the name.
#[test]
fn path_law() {
    let f = write_temp(&test_file_image());
    let file = hdf5_read::open(f.path()).unwrap();

    fn check(node: &Node) {
        if let Some(parent) = node.parent() {
            let expect = if parent.path() == "/" {
                format!("/{}", node.name())
            } else {
                format!("{}/{}", parent.path(), node.name())
            };
            assert_eq!(node.path(), expect);
        } else {
            assert_eq!(node.path(), "/");
        }
        if let Some(group) = node.as_group() {
            for child in group.children().unwrap() {
                check(&child);
            }
        }
    }
    check(&Node::Group(file.root_group()));
}

/// Attribute names are unique per node.
#[test]
fn attribute_uniqueness() {
    let f = write_temp(&test_file_image());
    let file = hdf5_read::open(f.path()).unwrap();
    let ds = file.node_at("/int32").unwrap();
    let attrs = ds.attributes().unwrap();
    let names: BTreeSet<&str> = attrs.keys().map(String::as_str).collect();
    assert_eq!(names.len(), attrs.len());
}

#[test]
fn e3_chunked_scatter() {
    let f = write_temp(&chunked_image(false));
    let file = hdf5_read::open(f.path()).unwrap();
    let node = file.node_at("/chunked").unwrap();
    let ds = node.as_dataset().unwrap();
    assert_eq!(ds.read_raw().unwrap(), le_i32s(0..16));
}

#[test]
fn e4_deflate_and_cache_contents() {
    let f = write_temp(&chunked_image(true));
    let file = hdf5_read::open(f.path()).unwrap();
    let node = file.node_at("/chunked").unwrap();
    let ds = node.as_dataset().unwrap();

    assert!(ds.decoded_chunks().is_empty());
    assert_eq!(ds.read_raw().unwrap(), le_i32s(0..16));

    let origins: BTreeSet<Vec<u64>> = ds.decoded_chunks().into_iter().collect();
    assert_eq!(
        origins,
        BTreeSet::from([vec![0, 0], vec![0, 2], vec![2, 0], vec![2, 2]])
    );

    // A second read hits the cache and returns the same bytes.
    assert_eq!(ds.read_raw().unwrap(), le_i32s(0..16));
    assert_eq!(ds.decoded_chunks().len(), 4);
}

#[test]
fn e5_string_attribute() {
    let f = write_temp(&test_file_image());
    let file = hdf5_read::open(f.path()).unwrap();
    let ds = file.node_at("/int32").unwrap();
    let attr = ds.attribute("units").unwrap().expect("units attribute");
    assert_eq!(attr.value(), b"meters");
    assert_eq!(attr.as_str(), Some("meters"));
    assert!(ds.attribute("missing").unwrap().is_none());
}

#[test]
fn e6_closed_handles() {
    let f = write_temp(&test_file_image());
    let file = hdf5_read::open(f.path()).unwrap();
    let root = file.root_group();
    let node = file.node_at("/int32").unwrap();
    let ds = node.as_dataset().unwrap().clone();

    file.close();
    assert!(matches!(ds.read_raw(), Err(Error::Closed)));
    assert!(matches!(ds.attributes(), Err(Error::Closed)));
    assert!(matches!(root.children(), Err(Error::Closed)));
}

/// A chunk missing from the B-tree reads back as the fill value across
/// its whole footprint.
#[test]
fn missing_chunk_yields_fill() {
    let chunk = |origin: [u64; 2]| -> (Vec<u64>, Vec<u8>) {
        let values: Vec<i32> = (0..2)
            .flat_map(|r| (0..2).map(move |c| ((origin[0] + r) * 4 + origin[1] + c) as i32))
            .collect();
        (origin.to_vec(), le_i32s(values))
    };
    let ds = DatasetSpec {
        dims: vec![4, 4],
        dtype: dtype_i32(),
        layout: Layout::Chunked {
            chunk_dims: vec![2, 2],
            // Chunk (2,2) was never written.
            chunks: vec![chunk([0, 0]), chunk([0, 2]), chunk([2, 0])],
            deflate: false,
        },
        attrs: Vec::new(),
        fill: Some(7i32.to_le_bytes().to_vec()),
    };
    let f = write_temp(&build_file(vec![("sparse".into(), Spec::Dataset(ds))]));
    let file = hdf5_read::open(f.path()).unwrap();
    let node = file.node_at("/sparse").unwrap();
    let ds = node.as_dataset().unwrap();
    assert_eq!(ds.fill_value().unwrap(), Some(7i32.to_le_bytes().to_vec()));

    let raw = ds.read_raw().unwrap();
    let values: Vec<i32> = raw
        .chunks_exact(4)
        .map(|b| i32::from_le_bytes(b.try_into().unwrap()))
        .collect();
    let expect = vec![
        0, 1, 2, 3, //
        4, 5, 6, 7, //
        8, 9, 7, 7, //
        12, 13, 7, 7,
    ];
    assert_eq!(values, expect);
}

#[test]
fn node_lookup_errors() {
    let f = write_temp(&test_file_image());
    let file = hdf5_read::open(f.path()).unwrap();
    assert!(file.node_at("/nested/float64").is_ok());
    assert!(matches!(
        file.node_at("/nope"),
        Err(Error::NotFound(path)) if path == "/nope"
    ));
    assert!(matches!(
        file.node_at("/int32/deeper"),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn soft_links_surface_their_target() {
    let ds = DatasetSpec::contiguous(vec![4], dtype_i32(), le_i32s(0..4));
    let image = build_file(vec![
        ("data".into(), Spec::Dataset(ds)),
        ("alias".into(), Spec::SoftLink("/data".into())),
    ]);
    let f = write_temp(&image);
    let file = hdf5_read::open(f.path()).unwrap();
    let node = file.node_at("/alias").unwrap();
    match &node {
        Node::SoftLink(link) => assert_eq!(link.target(), "/data"),
        other => panic!("expected a soft link, found {other:?}"),
    }
    assert_eq!(node.parent().unwrap().path(), "/");
}

/// Concurrent whole-dataset reads agree and decode each chunk once.
#[test]
fn concurrent_reads_share_chunks() {
    let f = write_temp(&chunked_image(true));
    let file = hdf5_read::open(f.path()).unwrap();
    let node = file.node_at("/chunked").unwrap();
    let ds = node.as_dataset().unwrap().clone();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let ds = ds.clone();
            std::thread::spawn(move || ds.read_raw().unwrap())
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap(), le_i32s(0..16));
    }
    assert_eq!(ds.decoded_chunks().len(), 4);
}
