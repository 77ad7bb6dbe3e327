mod common;

use common::check;
use vlox_bytecode::Opcode;
use vlox_vm::Vm;
use vlox_vm::builder::FunctionBuilder;
use vlox_vm::config::VmConfig;
use vlox_vm::value::Value;

/// fun makeCounter() {
///   var i = 0;
///   fun count() { i = i + 1; print i; }
///   return count;
/// }
/// var counter = makeCounter();
fn define_counter(vm: &mut Vm) {
    let heap = vm.heap_mut();
    let mut count = FunctionBuilder::function(heap, "count", 0);
    let i = count.capture(1, true).unwrap();
    count.get_upvalue(i).number(1.0).unwrap().emit(Opcode::Add);
    count.set_upvalue(i).emit(Opcode::Pop);
    count.get_upvalue(i).emit(Opcode::Print);
    let count = count.finish(heap);

    let mut make = FunctionBuilder::function(heap, "makeCounter", 0);
    make.number(0.0).unwrap();
    make.closure(count).unwrap().emit(Opcode::Return);
    let make = make.finish(heap);

    let mut script = FunctionBuilder::script();
    script.closure(make).unwrap().call(0);
    script.define_global(heap, "counter").unwrap();
    let function = script.finish(heap);
    check(vm, function, "");
}

/// counter(); counter();
fn call_counter_twice(vm: &mut Vm) {
    let heap = vm.heap_mut();
    let mut script = FunctionBuilder::script();
    for _ in 0..2 {
        script.get_global(heap, "counter").unwrap().call(0).emit(Opcode::Pop);
    }
    let function = script.finish(heap);
    check(vm, function, "1\n2\n");
}

#[test]
fn closure_in_global_survives_collections() {
    let mut vm = Vm::default();
    define_counter(&mut vm);
    for _ in 0..5 {
        vm.collect_garbage().unwrap();
    }
    call_counter_twice(&mut vm);
}

#[test]
fn closure_in_global_survives_stress() {
    let mut vm = Vm::new(VmConfig::default().with_stress_gc(true));
    define_counter(&mut vm);
    call_counter_twice(&mut vm);
}

#[test]
fn globals_and_natives_survive_collections() {
    let mut vm = Vm::default();
    let clock = vm.global("clock").unwrap();
    for _ in 0..3 {
        let stats = vm.collect_garbage().unwrap();
        assert_eq!(stats.freed_objects, 0);
    }
    assert_eq!(vm.global("clock"), Some(clock));
    assert!(vm.heap().find_interned("clock").is_some());

    // print clock() >= 0;
    let heap = vm.heap_mut();
    let mut script = FunctionBuilder::script();
    script.get_global(heap, "clock").unwrap().call(0);
    script.number(0.0).unwrap().emit(Opcode::Ge).emit(Opcode::Print);
    let function = script.finish(heap);
    check(&mut vm, function, "true\n");
    vm.collect_garbage().unwrap();
}

#[test]
fn unreachable_objects_are_reclaimed() {
    let mut vm = Vm::default();
    // The clock native and its name.
    let baseline = vm.heap().object_count();

    let heap = vm.heap_mut();
    let garbage = FunctionBuilder::function(heap, "garbage", 0).finish(heap);
    let mut script = FunctionBuilder::script();
    script.closure(garbage).unwrap().emit(Opcode::Pop);
    script.string(heap, "temporary").unwrap().emit(Opcode::Pop);
    let function = script.finish(heap);
    check(&mut vm, function, "");
    assert!(vm.heap().object_count() > baseline);
    assert_eq!(vm.heap().closure_count(), 2);

    let stats = vm.collect_garbage().unwrap();
    assert!(stats.freed_objects > 0);
    assert!(stats.bytes_after < stats.bytes_before);
    assert_eq!(stats.bytes_after, vm.heap().bytes_allocated());
    assert_eq!(vm.heap().object_count(), baseline);
    assert_eq!(vm.heap().closure_count(), 0);
    assert!(vm.heap().find_interned("temporary").is_none());
    assert!(vm.global("clock").is_some());
}

#[test]
fn interned_only_strings_are_swept() {
    let mut vm = Vm::default();
    let lonely = vm.heap_mut().intern("lonely");
    assert_eq!(vm.heap().find_interned("lonely"), Some(lonely));
    let interned = vm.heap().interned_count();

    vm.collect_garbage().unwrap();
    assert!(vm.heap().find_interned("lonely").is_none());
    assert_eq!(vm.heap().interned_count(), interned - 1);
    assert!(vm.heap().resolve_string(lonely).is_err());
}

#[test]
fn reachable_strings_keep_their_handle() {
    // var kept = "ab" + "c";
    let mut vm = Vm::default();
    let heap = vm.heap_mut();
    let mut script = FunctionBuilder::script();
    script.string(heap, "ab").unwrap().string(heap, "c").unwrap();
    script.emit(Opcode::Add);
    script.define_global(heap, "kept").unwrap();
    let function = script.finish(heap);
    check(&mut vm, function, "");

    let before = vm.heap().find_interned("abc").unwrap();
    vm.collect_garbage().unwrap();
    vm.collect_garbage().unwrap();
    assert_eq!(vm.heap().find_interned("abc"), Some(before));
    assert_eq!(vm.global("kept"), Some(Value::String(before)));
    assert_eq!(vm.heap().resolve_string(before).unwrap(), "abc");
    assert!(vm.heap().find_interned("ab").is_none());
}

#[test]
fn intermediate_strings_are_reclaimed_under_stress() {
    // var s = "";
    // var i = 0;
    // while (i < 3) {
    //   s = s + "x";
    //   i = i + 1;
    // }
    // print s;
    let mut vm = Vm::new(VmConfig::default().with_stress_gc(true));
    let heap = vm.heap_mut();
    let mut script = FunctionBuilder::script();
    script.string(heap, "").unwrap();
    script.define_global(heap, "s").unwrap();
    script.number(0.0).unwrap();
    script.define_global(heap, "i").unwrap();
    let start = script.current_offset();
    script.get_global(heap, "i").unwrap().number(3.0).unwrap();
    script.emit(Opcode::Lt);
    let exit = script.jump_if_false();
    script.emit(Opcode::Pop);
    script.get_global(heap, "s").unwrap().string(heap, "x").unwrap();
    script.emit(Opcode::Add);
    script.set_global(heap, "s").unwrap().emit(Opcode::Pop);
    script.get_global(heap, "i").unwrap().number(1.0).unwrap();
    script.emit(Opcode::Add);
    script.set_global(heap, "i").unwrap().emit(Opcode::Pop);
    script.emit_loop(start).unwrap();
    script.bind(exit).unwrap();
    script.emit(Opcode::Pop);
    script.get_global(heap, "s").unwrap().emit(Opcode::Print);
    let function = script.finish(heap);

    check(&mut vm, function, "xxx\n");
    vm.collect_garbage().unwrap();
    assert!(vm.heap().find_interned("xx").is_none());
    assert!(vm.heap().find_interned("xxx").is_some());
}

#[test]
fn threshold_follows_live_bytes() {
    let config = VmConfig::default().with_initial_gc_threshold(64);
    let mut vm = Vm::new(config);
    define_counter(&mut vm);

    let stats = vm.collect_garbage().unwrap();
    assert_eq!(
        stats.next_gc,
        (stats.bytes_after * config.gc_growth_factor).max(config.initial_gc_threshold)
    );
    assert_eq!(vm.heap().next_gc(), stats.next_gc);
    call_counter_twice(&mut vm);
}

#[test]
fn interning_is_unique() {
    let mut vm = Vm::default();
    let heap = vm.heap_mut();
    let first = heap.intern("same");
    let second = heap.intern("same");
    let other = heap.intern("different");
    assert_eq!(first, second);
    assert_ne!(first, other);
    assert_eq!(heap.find_interned("same"), Some(first));
}
