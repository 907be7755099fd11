//! Tagged value classification against the fixture layout

mod common;

use otter_v8dbg::{HeapInspector, TagLayout, TaggedKind, TaggedValue};

fn tags() -> TagLayout {
    common::layout().tags
}

#[test]
fn test_smi_roundtrip_across_range() {
    let tags = tags();
    let (min, max) = tags.smi_range();
    for n in [min, min + 1, -1_000_000, -1, 0, 1, 7, 1 << 20, max - 1, max] {
        let raw = tags.from_small_int(n);
        assert!(tags.is_smi(raw), "{n} should encode as a SMI");
        assert_eq!(tags.classify(raw), TaggedKind::SmallInt(n));
    }
}

#[test]
fn test_smi_roundtrip_ia32() {
    let tags = TagLayout {
        pointer_size: 4,
        smi_shift_size: 0,
        ..tags()
    };
    let (min, max) = tags.smi_range();
    assert_eq!((min, max), (-(1 << 30), (1 << 30) - 1));
    for n in [min, -5, 0, 5, max] {
        let raw = tags.from_small_int(n);
        assert!(raw.raw() <= u32::MAX as u64);
        assert_eq!(tags.to_small_int(raw), n);
    }
}

#[test]
fn test_classification_is_exclusive() {
    let tags = tags();
    for raw in [0u64, 1, 2, 3, 0x1000_0001, 0x1000_0003, u64::MAX] {
        let value = TaggedValue::from_raw(raw);
        let matches = [tags.is_smi(value), tags.is_heap_object(value)]
            .iter()
            .filter(|&&m| m)
            .count();
        assert!(matches <= 1, "{raw:#x} classified twice");
        match tags.classify(value) {
            TaggedKind::SmallInt(_) => assert!(tags.is_smi(value)),
            TaggedKind::HeapPointer { address, tag } => {
                assert!(tags.is_heap_object(value));
                assert_eq!(address + tag, raw);
            }
            TaggedKind::Failure => {
                assert!(!tags.is_smi(value) && !tags.is_heap_object(value));
            }
        }
    }
}

#[test]
fn test_failure_marker() {
    let tags = tags();
    let value = TaggedValue::from_raw(0x0bad_0003);
    assert!(tags.is_failure(value));
    assert_eq!(tags.classify(value), TaggedKind::Failure);
    assert_eq!(tags.heap_address(value), None);
}

#[test]
fn test_inspector_rejects_non_pointers() {
    common::init_tracing();
    let builder = common::HeapBuilder::new();
    let smi = builder.smi(12);
    let (image, layout) = builder.build();
    let heap = HeapInspector::new(&image, layout);

    assert!(matches!(
        heap.heap_address(smi),
        Err(otter_v8dbg::DecodeError::NotHeapPointer { .. })
    ));
    assert_eq!(heap.classify(smi), TaggedKind::SmallInt(12));
}
