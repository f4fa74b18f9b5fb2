//! Slot and element storage tests

use otter_objects::{
    ClassFlags, ClassId, ObjectClass, ObjectError, ObjectFlags, ObjectKind, ObjectOps,
    PrimitiveTypes, PropertyAttributes, PropertyKey, PropertySpec, Runtime, RuntimeConfig,
    TypeFlags, Value, ValueType,
};
use proptest::prelude::*;

static HOST_CLASS: ObjectClass = ObjectClass {
    name: "Host",
    kind: ObjectKind::Host,
    fixed_slots: 2,
    reserved_slots: 2,
    flags: ClassFlags::HAS_PRIVATE,
    ops: ObjectOps::NONE,
};

fn runtime() -> Runtime {
    Runtime::new(RuntimeConfig::default())
}

#[test]
fn test_initialized_length_growth_leaves_holes() {
    let mut rt = runtime();
    let arr = rt.new_array(8).unwrap();
    rt.set_initialized_length(arr, 3);
    rt.init_elements(arr, 0, &[Value::Int32(1), Value::Int32(2), Value::Int32(3)]);
    rt.set_elements_length(arr, 3).unwrap();
    assert_eq!(rt.element_capacity(arr), 8);
    assert!(!rt.type_flags_of(arr).contains(TypeFlags::NON_PACKED_ARRAY));

    rt.set_initialized_length(arr, 6);
    rt.init_element(arr, 5, Value::Int32(6));
    rt.set_elements_length(arr, 6).unwrap();

    for index in [3, 4] {
        assert!(!rt.has_dense_element(arr, index));
        assert_eq!(rt.get_element(arr, index), Value::Undefined);
    }
    assert_eq!(rt.get_element(arr, 5), Value::Int32(6));
    assert_eq!(rt.array_length(arr), 6);
    assert!(rt.type_flags_of(arr).contains(TypeFlags::NON_PACKED_ARRAY));
}

#[test]
fn test_array_from_values_stays_packed() {
    let mut rt = runtime();
    let arr = rt
        .new_array_from(&[Value::Int32(1), Value::Int32(2), Value::Int32(3)])
        .unwrap();
    assert_eq!(rt.initialized_length(arr), 3);
    assert_eq!(rt.array_length(arr), 3);
    assert!(!rt.type_flags_of(arr).contains(TypeFlags::NON_PACKED_ARRAY));

    let other = rt.new_array_from(&[Value::Int32(4)]).unwrap();
    assert_eq!(rt.get_type(other), rt.get_type(arr));
    assert!(!rt.type_flags_of(other).contains(TypeFlags::NON_PACKED_ARRAY));
}

#[test]
fn test_element_writes_valid_after_initialized_length_grows() {
    let mut rt = runtime();
    let arr = rt.new_array(4).unwrap();
    assert_eq!(rt.initialized_length(arr), 0);
    rt.set_initialized_length(arr, 2);
    rt.init_element(arr, 0, Value::Int32(1));
    rt.init_element(arr, 1, Value::Int32(2));
    rt.set_element(arr, 1, Value::Int32(3));
    assert_eq!(rt.get_element(arr, 0), Value::Int32(1));
    assert_eq!(rt.get_element(arr, 1), Value::Int32(3));
    assert_eq!(rt.get_element(arr, 2), Value::Undefined);
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "past initialized length")]
fn test_set_element_past_initialized_length_panics() {
    let mut rt = runtime();
    let arr = rt.new_array(4).unwrap();
    rt.set_element(arr, 0, Value::Int32(1));
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "past initialized length")]
fn test_init_element_past_initialized_length_panics() {
    let mut rt = runtime();
    let arr = rt.new_array_from(&[Value::Int32(1)]).unwrap();
    rt.init_element(arr, 1, Value::Int32(2));
}

#[test]
fn test_huge_length_records_double_length_type() {
    let mut rt = runtime();
    let arr = rt.new_array(0).unwrap();
    let length = PropertyKey::string("length");
    rt.set_elements_length(arr, i32::MAX as u32).unwrap();
    let double = ValueType::Primitive(PrimitiveTypes::DOUBLE);
    assert!(
        rt.property_types(arr, &length)
            .is_none_or(|types| !types.contains(double))
    );

    rt.set_elements_length(arr, i32::MAX as u32 + 1).unwrap();
    let types = rt.property_types(arr, &length).unwrap();
    assert!(types.contains(double));
    let flags = rt.type_flags_of(arr);
    assert!(flags.contains(TypeFlags::NON_DENSE_ARRAY | TypeFlags::NON_PACKED_ARRAY));
    assert_eq!(rt.array_length(arr), i32::MAX as u32 + 1);
}

#[test]
fn test_move_elements_during_mark_runs_pre_barrier() {
    let mut rt = runtime();
    let objs: Vec<Value> = (0..3)
        .map(|_| Value::Object(rt.new_plain_object().unwrap()))
        .collect();
    let arr = rt.new_array_from(&objs).unwrap();
    rt.add_root(arr);

    rt.start_incremental_gc();
    assert!(rt.heap().not_marking().is_none());
    let hits = rt.gc_stats().pre_barrier_hits;
    rt.move_elements(arr, 0, 1, 2);
    assert!(rt.gc_stats().pre_barrier_hits > hits);
    assert!(rt.heap().remembered_set().is_empty());
    rt.finish_incremental_gc();

    let read: Vec<Value> = (0..3).map(|i| rt.get_element(arr, i)).collect();
    assert_eq!(read, vec![objs[1].clone(), objs[2].clone(), objs[2].clone()]);
}

#[test]
fn test_reads_past_initialized_length_are_undefined() {
    let mut rt = runtime();
    let arr = rt.new_array_from(&[Value::Int32(1)]).unwrap();
    rt.set_elements_length(arr, 10).unwrap();
    assert_eq!(rt.initialized_length(arr), 1);
    assert_eq!(rt.get_element(arr, 9), Value::Undefined);
    assert_eq!(
        rt.get_property(arr, &PropertyKey::Index(9)).unwrap(),
        Value::Undefined
    );
}

#[test]
fn test_prepare_element_range_leaves_holes() {
    let mut rt = runtime();
    let values: Vec<Value> = (0..4).map(Value::Int32).collect();
    let arr = rt.new_array_from(&values).unwrap();
    rt.prepare_element_range_for_overwrite(arr, 1, 3);
    assert!(rt.has_dense_element(arr, 0));
    assert!(!rt.has_dense_element(arr, 1));
    assert!(!rt.has_dense_element(arr, 2));
    assert!(rt.has_dense_element(arr, 3));
}

#[test]
fn test_element_growth_out_of_memory_leaves_buffer() {
    let mut rt = Runtime::new(RuntimeConfig::default().with_memory_limit(64 * 1024));
    let arr = rt.new_array_from(&[Value::Int32(7)]).unwrap();
    let capacity = rt.element_capacity(arr);

    let err = rt.ensure_elements(arr, 1_000_000).unwrap_err();
    assert_eq!(err, ObjectError::OutOfMemory);
    assert_eq!(rt.element_capacity(arr), capacity);
    assert_eq!(rt.get_element(arr, 0), Value::Int32(7));
}

#[test]
fn test_property_add_out_of_memory_leaves_object() {
    let limit = 64 * 1024;
    let mut rt = Runtime::new(RuntimeConfig::default().with_memory_limit(limit));
    let obj = rt.new_plain_object().unwrap();
    for i in 0..4 {
        rt.set_property(obj, &PropertyKey::string(&format!("p{i}")), Value::Int32(i), true)
            .unwrap();
    }
    let layout = rt.layout_of(obj);

    let filler = limit - rt.memory().allocated() - 8;
    rt.memory().alloc(filler).unwrap();
    let err = rt
        .set_property(obj, &"p4".into(), Value::Int32(4), true)
        .unwrap_err();
    assert_eq!(err, ObjectError::OutOfMemory);
    assert_eq!(rt.layout_of(obj), layout);
    assert_eq!(rt.slot_span(obj), 4);
    assert_eq!(rt.dynamic_slot_capacity(obj), 0);
    assert_eq!(rt.get_property(obj, &"p3".into()).unwrap(), Value::Int32(3));

    rt.memory().free(filler);
    rt.set_property(obj, &"p4".into(), Value::Int32(4), true)
        .unwrap();
    assert_eq!(rt.num_dynamic_slots(obj), 1);
}

#[test]
fn test_indexed_add_out_of_memory_restores_layout() {
    let limit = 64 * 1024;
    let mut rt = Runtime::new(RuntimeConfig::default().with_memory_limit(limit));
    let far = PropertyKey::Index(1000);
    let names: Vec<PropertyKey> = (0..4).map(|i| PropertyKey::string(&format!("p{i}"))).collect();

    let warm = rt.new_plain_object().unwrap();
    let obj = rt.new_plain_object().unwrap();
    for (i, name) in names.iter().enumerate() {
        rt.set_property(warm, name, Value::Int32(i as i32), true).unwrap();
        rt.set_property(obj, name, Value::Int32(i as i32), true).unwrap();
    }
    rt.set_property(warm, &far, Value::Int32(9), true).unwrap();
    assert!(rt.object_flags(warm).contains(ObjectFlags::INDEXED));

    let layout = rt.layout_of(obj);
    let flags = rt.object_flags(obj);
    let filler = limit - rt.memory().allocated();
    rt.memory().alloc(filler).unwrap();
    let err = rt.set_property(obj, &far, Value::Int32(9), true).unwrap_err();
    assert_eq!(err, ObjectError::OutOfMemory);
    assert_eq!(rt.layout_of(obj), layout);
    assert_eq!(rt.object_flags(obj), flags);
    assert!(!rt.object_flags(obj).contains(ObjectFlags::INDEXED));
    assert!(!rt.has_own_property(obj, &far));

    rt.memory().free(filler);
    rt.set_property(obj, &far, Value::Int32(9), true).unwrap();
    assert_eq!(rt.layout_of(obj), rt.layout_of(warm));
    assert_eq!(rt.get_property(obj, &far).unwrap(), Value::Int32(9));
}

#[test]
fn test_overflow_shrinks_with_layout() {
    let mut rt = runtime();
    let obj = rt.new_plain_object().unwrap();
    let names: Vec<String> = (0..10).map(|i| format!("p{i}")).collect();
    for name in &names {
        rt.add_property(
            obj,
            PropertyKey::string(name),
            PropertySpec::data(PropertyAttributes::data()),
        )
        .unwrap();
    }
    assert_eq!(rt.num_dynamic_slots(obj), 6);
    assert_eq!(rt.dynamic_slot_capacity(obj), 8);

    for name in names.iter().rev().take(6) {
        rt.remove_property(obj, &PropertyKey::string(name)).unwrap();
    }
    assert!(!rt.in_dictionary_mode(obj));
    assert_eq!(rt.slot_span(obj), 4);
    assert_eq!(rt.num_dynamic_slots(obj), 0);
    assert_eq!(rt.dynamic_slot_capacity(obj), 0);
}

#[test]
fn test_reserved_slots_precede_properties() {
    let mut rt = runtime();
    let host = rt.register_class(&HOST_CLASS);
    let obj = rt.new_object(host, None).unwrap();
    assert_eq!(rt.slot_span(obj), 2);

    rt.init_reserved_slot(obj, 1, Value::string("tag"));
    rt.set_property(obj, &"named".into(), Value::Int32(1), true)
        .unwrap();
    assert_eq!(rt.lookup_own(obj, &"named".into()).unwrap().slot, Some(2));
    assert_eq!(rt.reserved_slot(obj, 1), Value::string("tag"));
    assert_eq!(rt.reserved_slot(obj, 0), Value::Undefined);
    assert_eq!(rt.num_dynamic_slots(obj), 1);
}

#[test]
fn test_private_payload_round_trip() {
    let mut rt = runtime();
    let host = rt.register_class(&HOST_CLASS);
    let obj = rt.new_object(host, None).unwrap();
    rt.set_private(obj, Box::new(vec![1u8, 2, 3])).unwrap();
    rt.private_mut::<Vec<u8>>(obj).unwrap().push(4);
    assert_eq!(rt.private::<Vec<u8>>(obj).unwrap(), &vec![1, 2, 3, 4]);
    assert!(rt.private::<String>(obj).is_none());
}

#[test]
fn test_copy_initializer_object_shares_layout() {
    let mut rt = runtime();
    let template = rt.new_plain_object().unwrap();
    rt.set_property(template, &"a".into(), Value::Int32(1), true)
        .unwrap();
    rt.set_property(template, &"b".into(), Value::Int32(2), true)
        .unwrap();

    let copy = rt.copy_initializer_object(template).unwrap();
    assert_eq!(rt.layout_of(copy), rt.layout_of(template));
    assert_eq!(rt.get_type(copy), rt.get_type(template));
    assert_eq!(rt.get_slot(copy, 0), Value::Undefined);
    assert_eq!(rt.get_slot(copy, 1), Value::Undefined);
}

#[test]
fn test_copy_initializer_rejects_dictionary_template() {
    let mut rt = runtime();
    let template = rt.new_object(ClassId::PLAIN, None).unwrap();
    rt.set_property(template, &"a".into(), Value::Int32(1), true)
        .unwrap();
    rt.set_property(template, &"b".into(), Value::Int32(2), true)
        .unwrap();
    rt.delete_property(template, &"a".into(), true).unwrap();
    assert!(matches!(
        rt.copy_initializer_object(template),
        Err(ObjectError::InternalError(_))
    ));
}

proptest! {
    #[test]
    fn prop_growth_preserves_initialized_entries(
        values in prop::collection::vec(any::<i32>(), 0..32),
        extra in 0u32..64,
    ) {
        let mut rt = runtime();
        let obj = rt.new_plain_object().unwrap();
        let n = values.len() as u32;
        rt.ensure_elements(obj, n).unwrap();
        rt.set_initialized_length(obj, n);
        let values: Vec<Value> = values.into_iter().map(Value::Int32).collect();
        rt.init_elements(obj, 0, &values);

        rt.ensure_elements(obj, n + extra).unwrap();
        prop_assert!(rt.element_capacity(obj) >= n + extra);
        prop_assert_eq!(rt.initialized_length(obj), n);
        for (i, value) in values.iter().enumerate() {
            prop_assert_eq!(&rt.get_element(obj, i as u32), value);
        }
    }

    #[test]
    fn prop_shrinking_keeps_prefix(
        values in prop::collection::vec(any::<i32>(), 1..32),
        keep in 0usize..32,
    ) {
        let mut rt = runtime();
        let obj = rt.new_plain_object().unwrap();
        let n = values.len() as u32;
        let keep = keep.min(values.len()) as u32;
        rt.ensure_elements(obj, n).unwrap();
        rt.set_initialized_length(obj, n);
        let values: Vec<Value> = values.into_iter().map(Value::Int32).collect();
        rt.init_elements(obj, 0, &values);

        rt.set_initialized_length(obj, keep);
        prop_assert_eq!(rt.initialized_length(obj), keep);
        for i in 0..keep {
            prop_assert_eq!(&rt.get_element(obj, i), &values[i as usize]);
        }
        for i in keep..n {
            prop_assert_eq!(rt.get_element(obj, i), Value::Undefined);
        }
    }
}
