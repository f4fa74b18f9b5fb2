//! Collector integration: roots, barriers, sweeping and finalization

use otter_heap::{Edge, HeapConfig, Region};
use otter_objects::{
    ClassFlags, ClassId, DictionaryReason, ObjectClass, ObjectKind, ObjectOps, ObjectStorage,
    PropertyDescriptor, PropertyKey, Runtime, RuntimeConfig, Value,
};
use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing_subscriber::filter::EnvFilter;

static LOGGING: Once = Once::new();

/// `RUST_LOG=otter=debug` shows sweep summaries
fn init_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn runtime() -> Runtime {
    init_logging();
    Runtime::new(RuntimeConfig::default())
}

#[test]
fn test_unrooted_objects_are_collected() {
    let mut rt = runtime();
    let keep = rt.new_plain_object().unwrap();
    rt.add_root(keep);
    let garbage: Vec<_> = (0..10).map(|_| rt.new_plain_object().unwrap()).collect();
    assert_eq!(rt.object_count(), 11);

    let freed = rt.collect_garbage();
    assert!(freed >= 10);
    assert_eq!(rt.object_count(), 1);
    assert!(rt.is_alive(keep));
    assert!(garbage.iter().all(|&obj| !rt.is_alive(obj)));
    assert_eq!(rt.classes().live_count(ClassId::PLAIN), 1);
}

#[test]
fn test_reachable_graph_survives() {
    let mut rt = runtime();
    let root = rt.new_plain_object().unwrap();
    rt.add_root(root);
    let child = rt.new_plain_object().unwrap();
    let arr = rt.new_array_from(&[Value::Object(child)]).unwrap();
    rt.set_property(root, &"list".into(), Value::Object(arr), true)
        .unwrap();
    let proto = rt.new_plain_object().unwrap();
    let derived = rt.new_object(ClassId::PLAIN, Some(proto)).unwrap();
    rt.set_property(child, &"derived".into(), Value::Object(derived), true)
        .unwrap();

    rt.collect_garbage();
    for obj in [root, child, arr, proto, derived] {
        assert!(rt.is_alive(obj));
    }
    assert_eq!(rt.get_element(arr, 0), Value::Object(child));

    rt.remove_root(root);
    rt.collect_garbage();
    assert_eq!(rt.object_count(), 0);
}

#[test]
fn test_overwrite_during_mark_keeps_old_value() {
    let mut rt = runtime();
    let holder = rt.new_plain_object().unwrap();
    rt.add_root(holder);
    let value = rt.new_plain_object().unwrap();
    rt.set_property(holder, &"x".into(), Value::Object(value), true)
        .unwrap();

    rt.start_incremental_gc();
    rt.set_property(holder, &"x".into(), Value::Undefined, true)
        .unwrap();
    assert!(rt.gc_stats().pre_barrier_hits >= 1);
    while !rt.incremental_gc_step() {}
    rt.finish_incremental_gc();
    assert!(rt.is_alive(value));

    rt.collect_garbage();
    assert!(!rt.is_alive(value));
}

#[test]
fn test_element_truncation_during_mark_keeps_old_value() {
    let mut rt = runtime();
    let value = rt.new_plain_object().unwrap();
    let arr = rt.new_array_from(&[Value::Object(value)]).unwrap();
    rt.add_root(arr);

    rt.start_incremental_gc();
    rt.set_array_length(arr, 0).unwrap();
    rt.finish_incremental_gc();
    assert!(rt.is_alive(value));

    rt.collect_garbage();
    assert!(!rt.is_alive(value));
}

#[test]
fn test_dictionary_regeneration_during_mark() {
    let mut rt = runtime();
    let obj = rt.new_plain_object().unwrap();
    rt.add_root(obj);
    let getter = rt.new_native_function("g", |_, _, _| Ok(Value::Null)).unwrap();
    rt.define_property(
        obj,
        &"g".into(),
        PropertyDescriptor::accessor(Some(getter), None),
    )
    .unwrap();
    rt.convert_to_dictionary(obj, DictionaryReason::Explicit)
        .unwrap();

    rt.start_incremental_gc();
    let before = rt.layout_of(obj);
    rt.delete_property(obj, &"g".into(), true).unwrap();
    assert_ne!(rt.layout_of(obj), before);
    rt.finish_incremental_gc();
    assert!(rt.is_alive(getter));
    assert!(rt.in_dictionary_mode(obj));

    rt.collect_garbage();
    assert!(!rt.is_alive(getter));
}

#[test]
fn test_allocation_during_mark_survives_cycle() {
    let mut rt = runtime();
    let root = rt.new_plain_object().unwrap();
    rt.add_root(root);

    rt.start_incremental_gc();
    let fresh = rt.new_plain_object().unwrap();
    rt.set_property(fresh, &"k".into(), Value::Int32(1), true)
        .unwrap();
    rt.finish_incremental_gc();
    assert!(rt.is_alive(fresh));
    assert_eq!(rt.get_property(fresh, &"k".into()).unwrap(), Value::Int32(1));

    rt.collect_garbage();
    assert!(!rt.is_alive(fresh));
}

#[test]
fn test_minor_gc_follows_old_to_young_slot() {
    let mut rt = runtime();
    let holder = rt.new_plain_object().unwrap();
    rt.add_root(holder);
    rt.collect_garbage();

    let young = rt.new_plain_object().unwrap();
    let unreachable = rt.new_plain_object().unwrap();
    rt.set_property(holder, &"child".into(), Value::Object(young), true)
        .unwrap();
    assert!(!rt.heap().remembered_set().is_empty());

    rt.minor_gc();
    assert!(rt.is_alive(young));
    assert!(!rt.is_alive(unreachable));
    assert_eq!(rt.gc_stats().minor_collections, 1);
    assert!(rt.heap().remembered_set().is_empty());
}

#[test]
fn test_unbarriered_move_registers_range() {
    let mut rt = runtime();
    let arr = rt
        .new_array_from(&[Value::Undefined, Value::Undefined, Value::Undefined])
        .unwrap();
    rt.add_root(arr);
    rt.collect_garbage();

    let young = rt.new_plain_object().unwrap();
    rt.set_element(arr, 0, Value::Object(young));
    let token = rt.heap().not_marking().unwrap();
    rt.move_elements_unbarriered(token, arr, 2, 0, 1);
    rt.set_element(arr, 0, Value::Undefined);

    let edges = rt.heap().remembered_set().edges();
    assert!(edges.iter().any(|edge| matches!(
        edge,
        Edge::Range {
            region: Region::Elements,
            start: 2,
            count: 1,
            ..
        }
    )));

    rt.minor_gc();
    assert!(rt.is_alive(young));
    assert_eq!(rt.get_element(arr, 2), Value::Object(young));
}

#[test]
fn test_move_elements_during_mark_goes_through_barriers() {
    let mut rt = runtime();
    let a = rt.new_plain_object().unwrap();
    let b = rt.new_plain_object().unwrap();
    let arr = rt
        .new_array_from(&[Value::Object(a), Value::Object(b)])
        .unwrap();
    rt.add_root(arr);

    rt.start_incremental_gc();
    assert!(rt.heap().not_marking().is_none());
    rt.move_elements(arr, 0, 1, 1);
    rt.finish_incremental_gc();
    assert!(rt.is_alive(a));
    assert_eq!(rt.get_element(arr, 0), Value::Object(b));

    rt.collect_garbage();
    assert!(!rt.is_alive(a));
    assert!(rt.is_alive(b));
}

#[test]
fn test_barriered_move_keeps_moved_referents() {
    let mut rt = runtime();
    let objs: Vec<_> = (0..4).map(|_| rt.new_plain_object().unwrap()).collect();
    let values: Vec<Value> = objs.iter().copied().map(Value::Object).collect();
    let arr = rt.new_array_from(&values).unwrap();
    rt.add_root(arr);
    rt.collect_garbage();

    rt.start_incremental_gc();
    rt.move_elements(arr, 0, 2, 2);
    rt.set_array_length(arr, 2).unwrap();
    rt.finish_incremental_gc();
    assert!(objs.iter().all(|&obj| rt.is_alive(obj)));
    assert_eq!(rt.get_element(arr, 0), Value::Object(objs[2]));
    assert_eq!(rt.get_element(arr, 1), Value::Object(objs[3]));

    rt.collect_garbage();
    assert!(!rt.is_alive(objs[0]));
    assert!(!rt.is_alive(objs[1]));
    assert!(rt.is_alive(objs[2]));
    assert!(rt.is_alive(objs[3]));
}

static BACKGROUND_RUNS: AtomicUsize = AtomicUsize::new(0);
static FOREGROUND_RUNS: AtomicUsize = AtomicUsize::new(0);

fn count_background(storage: &mut ObjectStorage) {
    storage.private.take();
    BACKGROUND_RUNS.fetch_add(1, Ordering::SeqCst);
}

fn count_foreground(_: &mut ObjectStorage) {
    FOREGROUND_RUNS.fetch_add(1, Ordering::SeqCst);
}

static BACKGROUND_CLASS: ObjectClass = ObjectClass {
    name: "Buffer",
    kind: ObjectKind::Host,
    fixed_slots: 0,
    reserved_slots: 0,
    flags: ClassFlags::HAS_PRIVATE.union(ClassFlags::BACKGROUND_FINALIZE),
    ops: ObjectOps {
        finalize: Some(count_background),
        ..ObjectOps::NONE
    },
};

static FOREGROUND_CLASS: ObjectClass = ObjectClass {
    name: "Handle",
    kind: ObjectKind::Host,
    fixed_slots: 0,
    reserved_slots: 0,
    flags: ClassFlags::empty(),
    ops: ObjectOps {
        finalize: Some(count_foreground),
        ..ObjectOps::NONE
    },
};

#[test]
fn test_background_finalization() {
    let mut rt = runtime();
    let class = rt.register_class(&BACKGROUND_CLASS);
    for i in 0..5 {
        let obj = rt.new_object(class, None).unwrap();
        rt.set_private(obj, Box::new(vec![i as u8; 64])).unwrap();
    }
    assert_eq!(rt.classes().live_count(class), 5);

    rt.collect_garbage();
    rt.flush_finalization();
    assert_eq!(BACKGROUND_RUNS.load(Ordering::SeqCst), 5);
    assert!(rt.heap().background_finalized() >= 5);
    assert_eq!(rt.classes().live_count(class), 0);
}

#[test]
fn test_foreground_finalizer_runs_during_sweep() {
    let mut rt = runtime();
    let class = rt.register_class(&FOREGROUND_CLASS);
    rt.new_object(class, None).unwrap();
    rt.new_object(class, None).unwrap();

    rt.collect_garbage();
    assert_eq!(FOREGROUND_RUNS.load(Ordering::SeqCst), 2);
    assert_eq!(rt.heap().background_finalized(), 0);
}

#[test]
fn test_inline_finalization_when_disabled() {
    let config = RuntimeConfig::default()
        .with_heap(HeapConfig::default().with_background_finalization(false));
    init_logging();
    let mut rt = Runtime::new(config);
    let obj = rt.new_array_from(&[Value::Int32(1)]).unwrap();
    rt.set_property(obj, &PropertyKey::Index(1), Value::Int32(2), true)
        .unwrap();
    rt.collect_garbage();
    assert!(!rt.is_alive(obj));
    assert_eq!(rt.heap().background_finalized(), 0);
}

#[test]
fn test_sweep_releases_memory() {
    let mut rt = runtime();
    rt.collect_garbage();
    let baseline = rt.memory().allocated();

    for i in 0..20 {
        let obj = rt.new_plain_object().unwrap();
        for j in 0..12 {
            rt.set_property(obj, &PropertyKey::string(&format!("p{j}")), Value::Int32(i), true)
                .unwrap();
        }
        rt.ensure_elements(obj, 64).unwrap();
    }
    assert!(rt.memory().allocated() > baseline);

    rt.collect_garbage();
    rt.flush_finalization();
    assert_eq!(rt.object_count(), 0);
    assert_eq!(rt.layouts().len(), 0);
    assert_eq!(rt.types().len(), 0);
    assert!(rt.memory().allocated() <= baseline);
}
