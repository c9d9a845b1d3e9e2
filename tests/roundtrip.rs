//! Round-trip invariants across formats, byte orders and backings.

mod common;

use plytable::{
    Backing, ByteOrder, Column, Element, Encoding, ListCell, MmapMode, Ply, ReadOptions,
};
use smallvec::smallvec;

use common::{assert_same_data, tet_ply, TET_ASCII};

fn write_to_vec(ply: &Ply) -> Vec<u8> {
    let mut out = Vec::new();
    ply.write(&mut out).unwrap();
    out
}

fn read_back(bytes: &[u8]) -> Ply {
    Ply::read(bytes, ReadOptions::new()).unwrap()
}

#[test]
fn normalization_is_idempotent() {
    // write(read(F)) normalizes F; normalizing again changes nothing.
    let first = write_to_vec(&tet_ply());
    let second = write_to_vec(&read_back(&first));
    assert_eq!(first, second);
    // The normalized form uses explicit type spellings.
    let text = String::from_utf8(first).unwrap();
    assert!(text.contains("property float32 x\n"));
    assert!(text.contains("property list uint8 int32 vertex_indices\n"));
}

#[test]
fn cross_format_round_trip() {
    let original = tet_ply();
    for encoding in [
        Encoding::Ascii,
        Encoding::BinaryLittleEndian,
        Encoding::BinaryBigEndian,
    ] {
        let mut ply = tet_ply();
        ply.set_encoding(encoding);
        let bytes = write_to_vec(&ply);
        let mut again = read_back(&bytes);
        assert_eq!(again.encoding(), encoding);

        // Switch back to ASCII and once more through a write/read cycle.
        again.set_encoding(Encoding::Ascii);
        let home = read_back(&write_to_vec(&again));
        assert_same_data(&original, &home);
    }
}

#[test]
fn endianness_swap_image() {
    // For a fixed-layout element, the big-endian body is the per-field
    // byte-swapped image of the little-endian body.
    let element = Element::describe(
        "sample",
        vec![
            ("a", Column::from(vec![0x0102u16, 0x0304])),
            ("b", Column::from(vec![0x05060708u32, 0x090a0b0c])),
        ],
    )
    .unwrap();
    let mut ply = Ply::new(vec![element]).unwrap();

    ply.set_byte_order(ByteOrder::Little);
    let le = write_to_vec(&ply);
    ply.set_byte_order(ByteOrder::Big);
    let be = write_to_vec(&ply);

    let body_of = |bytes: &[u8]| {
        let text_end = bytes
            .windows(11)
            .position(|w| w == b"end_header\n")
            .unwrap();
        bytes[text_end + 11..].to_vec()
    };
    let le_body = body_of(&le);
    let be_body = body_of(&be);
    assert_eq!(le_body.len(), 12);

    let mut swapped = Vec::new();
    for row in be_body.chunks(6) {
        swapped.extend(row[..2].iter().rev());
        swapped.extend(row[2..].iter().rev());
    }
    assert_eq!(le_body, swapped);

    // And both read back to the same numbers.
    assert_same_data(&read_back(&le), &read_back(&be));
}

#[test]
fn ragged_lists_survive_round_trips() {
    let lists: Vec<ListCell<i16>> = vec![
        smallvec![7],
        smallvec![1, 2],
        smallvec![],
        smallvec![3, 4, 5, 6],
    ];
    let element = Element::describe("runs", vec![("values", Column::from(lists))]).unwrap();
    let mut ply = Ply::new(vec![element]).unwrap();

    for encoding in [
        Encoding::Ascii,
        Encoding::BinaryLittleEndian,
        Encoding::BinaryBigEndian,
    ] {
        ply.set_encoding(encoding);
        let again = read_back(&write_to_vec(&ply));
        let col = again.element("runs").unwrap().column("values").unwrap();
        let rows = col.as_lists::<i16>().unwrap();
        assert_eq!(rows.len(), 4);
        let lens: Vec<usize> = rows.iter().map(|r| r.len()).collect();
        assert_eq!(lens, [1, 2, 0, 4]);
        assert_eq!(&rows[3][..], [3, 4, 5, 6]);
    }
}

#[test]
fn schema_fidelity() {
    let original = tet_ply();
    for encoding in [
        Encoding::Ascii,
        Encoding::BinaryLittleEndian,
        Encoding::BinaryBigEndian,
    ] {
        let mut ply = tet_ply();
        ply.set_encoding(encoding);
        let again = read_back(&write_to_vec(&ply));
        for (a, b) in original.iter().zip(again.iter()) {
            assert!(a.def().same_layout(b.def()));
        }
    }
}

#[test]
fn known_list_len_equivalence() {
    // Every list in the tetrahedron has length 3, so reading with the
    // promise must equal reading without it.
    let mut ply = tet_ply();
    ply.set_text(false);
    ply.set_byte_order(ByteOrder::Native);
    let file = tempfile::NamedTempFile::new().unwrap();
    ply.save(file.path()).unwrap();

    let plain = Ply::open(file.path(), ReadOptions::new()).unwrap();
    let mapped = Ply::open(
        file.path(),
        ReadOptions::new()
            .memory_map(MmapMode::ReadOnly)
            .known_list_len("face", "vertex_indices", 3),
    )
    .unwrap();

    assert_eq!(plain.element("face").unwrap().backing(), Backing::Owned);
    assert_eq!(
        mapped.element("face").unwrap().backing(),
        Backing::MappedReadOnly,
    );
    assert_same_data(&plain, &mapped);
}

#[test]
fn memory_map_transparency() {
    let mut ply = tet_ply();
    ply.set_text(false);
    ply.set_byte_order(ByteOrder::Native);
    let file = tempfile::NamedTempFile::new().unwrap();
    ply.save(file.path()).unwrap();

    let copied = Ply::open(file.path(), ReadOptions::new()).unwrap();
    let mapped = Ply::open(
        file.path(),
        ReadOptions::new().memory_map(MmapMode::ReadOnly),
    )
    .unwrap();

    // The fixed-layout element is mapped; the ragged one falls back.
    assert_eq!(
        mapped.element("vertex").unwrap().backing(),
        Backing::MappedReadOnly,
    );
    assert_eq!(mapped.element("face").unwrap().backing(), Backing::Owned);
    assert_same_data(&copied, &mapped);

    // Row views and cell reads see the same numbers too.
    let mv = mapped.element("vertex").unwrap();
    let cv = copied.element("vertex").unwrap();
    for row in 0..mv.len() {
        assert_eq!(mv.row(row).unwrap().values(), cv.row(row).unwrap().values());
    }
}

#[test]
fn read_write_mapping_flushes_to_disk() {
    let mut ply = tet_ply();
    ply.set_text(false);
    ply.set_byte_order(ByteOrder::Native);
    let file = tempfile::NamedTempFile::new().unwrap();
    ply.save(file.path()).unwrap();

    {
        let mut mapped = Ply::open(
            file.path(),
            ReadOptions::new().memory_map(MmapMode::ReadWrite),
        )
        .unwrap();
        let vertex = mapped.element_mut("vertex").unwrap();
        assert_eq!(vertex.backing(), Backing::MappedReadWrite);
        vertex.set(1, "x", 42.0f32).unwrap();
        mapped.flush().unwrap();
    }

    let again = Ply::open(file.path(), ReadOptions::new()).unwrap();
    assert_eq!(again.element("vertex").unwrap().get::<f32>(1, "x").unwrap(), 42.0);
}

#[test]
fn read_only_mapping_rejects_writes() {
    let mut ply = tet_ply();
    ply.set_text(false);
    ply.set_byte_order(ByteOrder::Native);
    let file = tempfile::NamedTempFile::new().unwrap();
    ply.save(file.path()).unwrap();

    let mut mapped = Ply::open(
        file.path(),
        ReadOptions::new().memory_map(MmapMode::ReadOnly),
    )
    .unwrap();
    let err = mapped
        .element_mut("vertex")
        .unwrap()
        .set(0, "x", 1.0f32)
        .unwrap_err();
    assert!(err.message().contains("read-only"));
}

#[test]
fn mapped_element_outlives_container() {
    let mut ply = tet_ply();
    ply.set_text(false);
    ply.set_byte_order(ByteOrder::Native);
    let file = tempfile::NamedTempFile::new().unwrap();
    ply.save(file.path()).unwrap();

    let vertex = {
        let mapped = Ply::open(
            file.path(),
            ReadOptions::new().memory_map(MmapMode::ReadOnly),
        )
        .unwrap();
        mapped.element("vertex").unwrap().clone()
        // `mapped` is dropped here; the element keeps the mapping alive.
    };
    assert_eq!(vertex.backing(), Backing::MappedReadOnly);
    assert_eq!(vertex.get::<f32>(2, "x").unwrap(), 1.0);
}

#[test]
fn make_owned_detaches_from_mapping() {
    let mut ply = tet_ply();
    ply.set_text(false);
    ply.set_byte_order(ByteOrder::Native);
    let file = tempfile::NamedTempFile::new().unwrap();
    ply.save(file.path()).unwrap();

    let mut mapped = Ply::open(
        file.path(),
        ReadOptions::new().memory_map(MmapMode::ReadOnly),
    )
    .unwrap();
    let vertex = mapped.element_mut("vertex").unwrap();
    let before = vertex.column("x").unwrap().into_owned();
    vertex.make_owned();
    assert_eq!(vertex.backing(), Backing::Owned);
    assert_eq!(vertex.column("x").unwrap().as_ref(), &before);
    vertex.set(0, "x", -1.0f32).unwrap();
    assert_eq!(vertex.get::<f32>(0, "x").unwrap(), -1.0);
}

#[test]
fn non_native_order_is_never_mapped() {
    let mut ply = tet_ply();
    ply.set_text(false);
    ply.set_byte_order(if cfg!(target_endian = "big") {
        ByteOrder::Little
    } else {
        ByteOrder::Big
    });
    let file = tempfile::NamedTempFile::new().unwrap();
    ply.save(file.path()).unwrap();

    let mapped = Ply::open(
        file.path(),
        ReadOptions::new().memory_map(MmapMode::ReadOnly),
    )
    .unwrap();
    assert_eq!(mapped.element("vertex").unwrap().backing(), Backing::Owned);
    assert_same_data(&tet_ply(), &mapped);
}

#[test]
fn ascii_file_via_open_with_mapping_enabled() {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), TET_ASCII).unwrap();
    let ply = Ply::open(
        file.path(),
        ReadOptions::new().memory_map(MmapMode::ReadOnly),
    )
    .unwrap();
    assert_eq!(ply.element("vertex").unwrap().backing(), Backing::Owned);
    assert_same_data(&tet_ply(), &ply);
}
