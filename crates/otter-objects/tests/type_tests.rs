//! Type record, singleton and prototype tests

use otter_objects::{
    ClassId, ObjectError, ObjectFlags, PrimitiveTypes, PropertyKey, Runtime, RuntimeConfig,
    TypeFlags, Value, ValueType,
};
use proptest::prelude::*;

fn runtime() -> Runtime {
    Runtime::new(RuntimeConfig::default())
}

#[test]
fn test_lineage_shared_per_class_and_proto() {
    let mut rt = runtime();
    let proto = rt.new_plain_object().unwrap();
    let a = rt.new_object(ClassId::PLAIN, Some(proto)).unwrap();
    let b = rt.new_object(ClassId::PLAIN, Some(proto)).unwrap();
    let c = rt.new_plain_object().unwrap();
    assert_eq!(rt.get_type(a), rt.get_type(b));
    assert_ne!(rt.get_type(a), rt.get_type(c));
    assert_eq!(rt.types().record(rt.get_type(a)).proto(), Some(proto));
}

#[test]
fn test_property_types_widen_across_lineage() {
    let mut rt = runtime();
    let a = rt.new_plain_object().unwrap();
    let b = rt.new_plain_object().unwrap();
    let key = PropertyKey::string("x");
    rt.set_property(a, &key, Value::Int32(1), true).unwrap();
    rt.set_property(b, &key, Value::string("s"), true).unwrap();

    let types = rt.property_types(a, &key).unwrap();
    assert!(types.contains(ValueType::Primitive(PrimitiveTypes::INT32)));
    assert!(types.contains(ValueType::Primitive(PrimitiveTypes::STRING)));
    assert!(!types.contains(ValueType::Primitive(PrimitiveTypes::DOUBLE)));
}

#[test]
fn test_object_values_record_their_lineage() {
    let mut rt = runtime();
    let holder = rt.new_plain_object().unwrap();
    let arr = rt.new_array(0).unwrap();
    rt.set_property(holder, &"list".into(), Value::Object(arr), true)
        .unwrap();
    let types = rt.property_types(holder, &"list".into()).unwrap();
    assert_eq!(types.object_types(), &[rt.get_type(arr)]);
}

#[test]
fn test_delete_widens_with_undefined_and_marks_configured() {
    let mut rt = runtime();
    let obj = rt.new_plain_object().unwrap();
    rt.set_property(obj, &"x".into(), Value::Int32(1), true)
        .unwrap();
    assert!(!rt.is_property_configured(obj, &"x".into()));
    rt.delete_property(obj, &"x".into(), true).unwrap();

    let types = rt.property_types(obj, &"x".into()).unwrap();
    assert!(types.contains(ValueType::Primitive(PrimitiveTypes::UNDEFINED)));
    assert!(rt.is_property_configured(obj, &"x".into()));
}

#[test]
fn test_singleton_gets_private_record() {
    let mut rt = runtime();
    let a = rt.new_plain_object().unwrap();
    let b = rt.new_plain_object().unwrap();
    let shared = rt.get_type(a);
    rt.set_singleton_type(a).unwrap();

    assert!(rt.has_singleton_type(a));
    assert_ne!(rt.get_type(a), shared);
    assert_eq!(rt.get_type(b), shared);
    assert_eq!(rt.types().record(rt.get_type(a)).singleton(), Some(a));
    assert!(rt.type_flags_of(a).contains(TypeFlags::SINGLETON));

    let singleton = rt.get_type(a);
    rt.set_singleton_type(a).unwrap();
    assert_eq!(rt.get_type(a), singleton);
}

#[test]
fn test_singleton_requires_own_lineage() {
    let mut rt = runtime();
    let obj = rt.new_plain_object().unwrap();
    let arr = rt.new_array(0).unwrap();
    rt.set_type(obj, rt.get_type(arr)).unwrap();
    assert!(matches!(
        rt.set_singleton_type(obj),
        Err(ObjectError::InternalError(_))
    ));
    assert!(!rt.has_singleton_type(obj));
}

#[test]
fn test_singleton_type_cannot_be_shared_or_cleared() {
    let mut rt = runtime();
    let a = rt.new_plain_object().unwrap();
    let b = rt.new_plain_object().unwrap();
    rt.set_singleton_type(a).unwrap();
    let singleton = rt.get_type(a);
    assert!(rt.set_type(b, singleton).is_err());
    assert!(rt.clear_type(a).is_err());
}

#[test]
fn test_set_proto_moves_lineage() {
    let mut rt = runtime();
    let proto = rt.new_plain_object().unwrap();
    let obj = rt.new_plain_object().unwrap();
    let before = rt.get_type(obj);
    rt.set_proto(obj, Some(proto)).unwrap();
    assert_ne!(rt.get_type(obj), before);
    assert_eq!(rt.get_proto(obj), Some(proto));

    let sibling = rt.new_object(ClassId::PLAIN, Some(proto)).unwrap();
    assert_eq!(rt.get_type(sibling), rt.get_type(obj));

    rt.clear_type(obj).unwrap();
    assert_eq!(rt.get_proto(obj), None);
    assert_eq!(rt.get_type(obj), before);
}

#[test]
fn test_set_proto_rejects_cycles() {
    let mut rt = runtime();
    let a = rt.new_plain_object().unwrap();
    let b = rt.new_object(ClassId::PLAIN, Some(a)).unwrap();
    let err = rt.set_proto(a, Some(b)).unwrap_err();
    assert!(matches!(err, ObjectError::TypeError(_)));
    assert_eq!(rt.get_proto(a), None);
    assert!(rt.set_proto(a, Some(a)).is_err());
}

#[test]
fn test_set_proto_on_non_extensible_fails() {
    let mut rt = runtime();
    let proto = rt.new_plain_object().unwrap();
    let obj = rt.new_plain_object().unwrap();
    rt.prevent_extensions(obj).unwrap();
    assert!(rt.set_proto(obj, Some(proto)).is_err());
    assert!(rt.set_proto(obj, None).is_ok());
}

#[test]
fn test_singleton_proto_changes_in_place() {
    let mut rt = runtime();
    let global = rt.new_global().unwrap();
    let proto = rt.new_plain_object().unwrap();
    let record = rt.get_type(global);
    rt.set_proto(global, Some(proto)).unwrap();
    assert_eq!(rt.get_type(global), record);
    assert_eq!(rt.get_proto(global), Some(proto));
    assert!(rt.object_flags(proto).contains(ObjectFlags::DELEGATE));
}

#[test]
fn test_enumeration_marks_iterated() {
    let mut rt = runtime();
    let obj = rt.new_plain_object().unwrap();
    rt.enumerate(obj).unwrap();
    assert!(rt.type_flags_of(obj).contains(TypeFlags::ITERATED));

    let global = rt.new_global().unwrap();
    rt.enumerate(global).unwrap();
    assert!(rt.object_flags(global).contains(ObjectFlags::ITERATED_SINGLETON));
}

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Undefined),
        Just(Value::Null),
        any::<bool>().prop_map(Value::Boolean),
        any::<i32>().prop_map(Value::Int32),
        (0.5f64..1.0e6).prop_map(Value::Double),
        "[a-z]{0,4}".prop_map(|s| Value::string(&s)),
    ]
}

proptest! {
    #[test]
    fn prop_property_types_only_grow(values in prop::collection::vec(arb_value(), 1..24)) {
        let mut rt = runtime();
        let obj = rt.new_plain_object().unwrap();
        let key = PropertyKey::string("p");
        let mut previous = None;
        for value in &values {
            rt.set_property(obj, &key, value.clone(), true).unwrap();
            let current = rt.property_types(obj, &key).unwrap();
            let kind = rt.value_type(value).unwrap();
            prop_assert!(current.contains(kind));
            if let Some(previous) = &previous {
                prop_assert!(current.is_superset_of(previous));
            }
            previous = Some(current);
        }
    }
}
