//! End-to-end scenarios on the tetrahedron fixture.

mod common;

use plytable::{
    Backing, ByteOrder, Column, Encoding, ListCell, MmapMode, Ply, ReadOptions, Value,
};
use smallvec::smallvec;

use common::{assert_same_data, tet_ply, TET_ASCII};

#[test]
fn tetrahedron_ascii() {
    let ply = tet_ply();
    assert_eq!(ply.len(), 2);
    assert_eq!(ply.encoding(), Encoding::Ascii);
    assert!(ply.text());
    assert_eq!(ply.comments(), ["single tetrahedron with colored faces"]);

    let vertex = ply.element("vertex").unwrap();
    assert_eq!(vertex.len(), 4);
    assert_eq!(vertex.comments(), ["tetrahedron vertices"]);
    assert_eq!(
        vertex.column("x").unwrap().as_slice::<f32>(),
        Some(&[0.0, 0.0, 1.0, 1.0][..]),
    );

    let face = ply.element("face").unwrap();
    assert_eq!(face.len(), 4);
    assert_eq!(
        face.value(0, "vertex_indices").unwrap(),
        Value::IntList(smallvec![0, 1, 2]),
    );
    assert_eq!(
        face.column("red").unwrap().as_slice::<u8>(),
        Some(&[255, 255, 0, 0][..]),
    );
}

#[test]
fn format_switch_to_binary() {
    let mut ply = tet_ply();
    ply.set_text(false);
    ply.set_byte_order(ByteOrder::Little);

    let mut sink = Vec::new();
    ply.write(&mut sink).unwrap();

    let again = Ply::read(&sink[..], ReadOptions::new()).unwrap();
    assert_eq!(again.encoding(), Encoding::BinaryLittleEndian);
    assert!(!again.text());
    assert_eq!(again.byte_order(), ByteOrder::Little);
    assert_same_data(&ply, &again);
}

#[test]
fn short_ascii_row() {
    let input = TET_ASCII.replace("3 0 1 2 255 255 255", "3 0 1 2 255 255");
    let err = Ply::read(input.as_bytes(), ReadOptions::new()).unwrap_err();
    assert_eq!(err.element(), Some("face"));
    assert_eq!(err.row(), Some(0));
    assert_eq!(err.property(), Some("blue"));
    assert_eq!(err.message(), "early end-of-line");
    assert_eq!(
        err.to_string(),
        "element 'face': row 0: property 'blue': early end-of-line",
    );
}

#[test]
fn known_list_len_mismatch() {
    let mut ply = tet_ply();
    // One face with four indices instead of three.
    let lists: Vec<ListCell<i32>> = vec![
        smallvec![0, 1, 2],
        smallvec![0, 2, 3],
        smallvec![0, 1, 3, 2],
        smallvec![1, 2, 3],
    ];
    ply.element_mut("face")
        .unwrap()
        .set_column("vertex_indices", Column::from(lists))
        .unwrap();
    ply.set_text(false);
    ply.set_byte_order(ByteOrder::Native);

    let file = tempfile::NamedTempFile::new().unwrap();
    ply.save(file.path()).unwrap();

    let options = ReadOptions::new()
        .memory_map(MmapMode::ReadOnly)
        .known_list_len("face", "vertex_indices", 3);
    let err = Ply::open(file.path(), options).unwrap_err();
    assert_eq!(err.message(), "unexpected list length");
    assert_eq!(err.element(), Some("face"));
    assert_eq!(err.row(), Some(2));
    assert_eq!(err.property(), Some("vertex_indices"));
}

#[test]
fn known_list_len_partial_cover_is_skipped() {
    // Two list properties, only one covered: the optimization is skipped
    // silently and the element comes back owned and intact.
    let mut ply = tet_ply();
    let other: Vec<ListCell<u8>> = vec![smallvec![1]; 4];
    ply.element_mut("face")
        .unwrap()
        .set_column("extra_list", Column::from(other))
        .unwrap();
    let mut defs = ply.element("face").unwrap().properties().to_vec();
    defs.push(
        plytable::PropertyDef::new(
            "extra_list",
            plytable::PropertyType::list(
                plytable::ScalarType::UChar,
                plytable::ScalarType::UChar,
            )
            .unwrap(),
        )
        .unwrap(),
    );
    ply.element_mut("face").unwrap().set_properties(defs).unwrap();
    ply.set_text(false);
    ply.set_byte_order(ByteOrder::Native);

    let file = tempfile::NamedTempFile::new().unwrap();
    ply.save(file.path()).unwrap();

    let options = ReadOptions::new()
        .memory_map(MmapMode::ReadOnly)
        .known_list_len("face", "vertex_indices", 3);
    let again = Ply::open(file.path(), options).unwrap();
    assert_eq!(again.element("face").unwrap().backing(), Backing::Owned);
    assert_same_data(&ply, &again);
}

#[test]
fn comment_before_format_moves_to_canonical_place() {
    let input = TET_ASCII.replacen("ply\n", "ply\ncomment banner\n", 1);
    let ply = Ply::read(input.as_bytes(), ReadOptions::new()).unwrap();
    assert_eq!(
        ply.comments(),
        ["banner", "single tetrahedron with colored faces"],
    );

    let mut out = Vec::new();
    ply.write(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    let format_at = text.find("format ascii").unwrap();
    let banner_at = text.find("comment banner").unwrap();
    assert!(format_at < banner_at);
}

#[test]
fn carriage_return_header() {
    let input = TET_ASCII.replace('\n', "\r");
    let ply = Ply::read(input.as_bytes(), ReadOptions::new()).unwrap();
    assert_same_data(&tet_ply(), &ply);

    let mut out = Vec::new();
    ply.write(&mut out).unwrap();
    assert!(!out.contains(&b'\r'));
}

#[test]
fn crlf_everywhere() {
    let input = TET_ASCII.replace('\n', "\r\n");
    let ply = Ply::read(input.as_bytes(), ReadOptions::new()).unwrap();
    assert_same_data(&tet_ply(), &ply);
}

#[test]
fn cloned_owned_element_is_independent_storage() {
    let mut a = tet_ply();
    let vertex = a.element("vertex").unwrap().clone();
    let b = Ply::new(vec![vertex]).unwrap();

    a.element_mut("vertex").unwrap().set(0, "x", 9.0f32).unwrap();
    assert_eq!(a.element("vertex").unwrap().get::<f32>(0, "x").unwrap(), 9.0);
    assert_eq!(b.element("vertex").unwrap().get::<f32>(0, "x").unwrap(), 0.0);
}
