//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use plytable::{Ply, ReadOptions};

/// A single tetrahedron with colored faces, ASCII encoded.
pub const TET_ASCII: &str = "\
ply
format ascii 1.0
comment single tetrahedron with colored faces
element vertex 4
comment tetrahedron vertices
property float x
property float y
property float z
element face 4
property list uchar int vertex_indices
property uchar red
property uchar green
property uchar blue
end_header
0 0 0
0 1 1
1 0 1
1 1 0
3 0 1 2 255 255 255
3 0 2 3 255 0 0
3 0 1 3 0 255 0
3 1 2 3 0 0 255
";

pub fn tet_ply() -> Ply {
    Ply::read(TET_ASCII.as_bytes(), ReadOptions::new()).unwrap()
}

/// Asserts that two containers hold the same tables: same element order,
/// schemas and cell values. Comments and encodings may differ.
pub fn assert_same_data(a: &Ply, b: &Ply) {
    assert_eq!(a.len(), b.len());
    for (ea, eb) in a.iter().zip(b.iter()) {
        assert!(
            ea.def().same_layout(eb.def()),
            "schema mismatch for element '{}'",
            ea.name(),
        );
        for prop in ea.properties() {
            assert_eq!(
                ea.column(prop.name()).unwrap(),
                eb.column(prop.name()).unwrap(),
                "column '{}' of element '{}' differs",
                prop.name(),
                ea.name(),
            );
        }
    }
}
