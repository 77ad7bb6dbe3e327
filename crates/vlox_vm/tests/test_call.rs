mod common;

use common::{check, run};
use vlox_bytecode::Opcode;
use vlox_vm::Vm;
use vlox_vm::builder::FunctionBuilder;
use vlox_vm::config::VmConfig;
use vlox_vm::error::RuntimeErrorKind;
use vlox_vm::gc::{ArenaIndex, Heap};
use vlox_vm::io::BufferContext;
use vlox_vm::object::Function;

/// fun add(a, b) { return a + b; }
fn define_add(heap: &mut Heap, script: &mut FunctionBuilder) {
    let mut add = FunctionBuilder::function(heap, "add", 2);
    add.get_local(1).get_local(2).emit(Opcode::Add).emit(Opcode::Return);
    let add = add.finish(heap);
    script.closure(add).unwrap();
    script.define_global(heap, "add").unwrap();
}

/// Call `add` with the numbers `1..=argc`.
fn call_add(vm: &mut Vm, argc: u8) -> ArenaIndex<Function> {
    let heap = vm.heap_mut();
    let mut script = FunctionBuilder::script();
    define_add(heap, &mut script);
    script.get_global(heap, "add").unwrap();
    for arg in 1..=argc {
        script.number(f64::from(arg)).unwrap();
    }
    script.call(argc).emit(Opcode::Print);
    script.finish(heap)
}

#[test]
fn call_function() {
    let mut vm = Vm::default();
    let function = call_add(&mut vm, 2);
    check(&mut vm, function, "3\n");
}

#[test]
fn too_few_arguments() {
    let mut vm = Vm::default();
    let function = call_add(&mut vm, 1);
    check(
        &mut vm,
        function,
        "Expected 2 arguments but got 1.\n[line 1] in script\n",
    );
}

#[test]
fn too_many_arguments() {
    let mut vm = Vm::default();
    let function = call_add(&mut vm, 3);
    check(
        &mut vm,
        function,
        "Expected 2 arguments but got 3.\n[line 1] in script\n",
    );
}

#[test]
fn print_function() {
    let mut vm = Vm::default();
    let heap = vm.heap_mut();
    let mut script = FunctionBuilder::script();
    define_add(heap, &mut script);
    script.get_global(heap, "add").unwrap().emit(Opcode::Print);
    let function = script.finish(heap);
    check(&mut vm, function, "<fn add>\n");
}

#[test]
fn recursion() {
    // fun fib(n) {
    //   if (n < 2) return n;
    //   return fib(n - 1) + fib(n - 2);
    // }
    // print fib(10);
    let mut vm = Vm::default();
    let heap = vm.heap_mut();

    let mut fib = FunctionBuilder::function(heap, "fib", 1);
    fib.get_local(1).number(2.0).unwrap().emit(Opcode::Lt);
    let recurse = fib.jump_if_false();
    fib.emit(Opcode::Pop).get_local(1).emit(Opcode::Return);
    fib.bind(recurse).unwrap();
    fib.emit(Opcode::Pop);
    for distance in [1.0, 2.0] {
        fib.get_global(heap, "fib").unwrap();
        fib.get_local(1).number(distance).unwrap().emit(Opcode::Sub);
        fib.call(1);
    }
    fib.emit(Opcode::Add).emit(Opcode::Return);
    let fib = fib.finish(heap);

    let mut script = FunctionBuilder::script();
    script.closure(fib).unwrap();
    script.define_global(heap, "fib").unwrap();
    script.get_global(heap, "fib").unwrap().number(10.0).unwrap();
    script.call(1).emit(Opcode::Print);
    let function = script.finish(heap);

    check(&mut vm, function, "55\n");
}

#[test]
fn not_callable() {
    // "not a function"();
    let mut vm = Vm::default();
    let heap = vm.heap_mut();
    let mut script = FunctionBuilder::script();
    script.string(heap, "not a function").unwrap().call(0);
    let function = script.finish(heap);

    check(
        &mut vm,
        function,
        "Can only call functions and classes, got string.\n[line 1] in script\n",
    );
}

#[test]
fn native_clock() {
    // print clock() > 0;
    let mut vm = Vm::default();
    let heap = vm.heap_mut();
    let mut script = FunctionBuilder::script();
    script.get_global(heap, "clock").unwrap().call(0);
    script.number(0.0).unwrap().emit(Opcode::Gt).emit(Opcode::Print);
    let function = script.finish(heap);

    check(&mut vm, function, "true\n");
}

#[test]
fn native_arity() {
    // clock(1);
    let mut vm = Vm::default();
    let heap = vm.heap_mut();
    let mut script = FunctionBuilder::script();
    script.get_global(heap, "clock").unwrap().number(1.0).unwrap().call(1);
    let function = script.finish(heap);

    check(
        &mut vm,
        function,
        "Expected 0 arguments but got 1.\n[line 1] in script\n",
    );
}

#[test]
fn error_trace_lists_every_frame() {
    // 1 | fun inner() {
    // 2 |   return nil + 1;
    // 3 | }
    // 4 | fun outer() {
    // 5 |   inner();
    // 6 | }
    // 7 | outer();
    let mut vm = Vm::default();
    let heap = vm.heap_mut();

    let mut inner = FunctionBuilder::function(heap, "inner", 0);
    inner.line(2);
    inner.emit(Opcode::Nil).number(1.0).unwrap();
    inner.emit(Opcode::Add).emit(Opcode::Return);
    let inner = inner.finish(heap);

    let mut outer = FunctionBuilder::function(heap, "outer", 0);
    outer.line(5);
    outer.get_global(heap, "inner").unwrap().call(0).emit(Opcode::Pop);
    let outer = outer.finish(heap);

    let mut script = FunctionBuilder::script();
    script.closure(inner).unwrap();
    script.define_global(heap, "inner").unwrap();
    script.line(4);
    script.closure(outer).unwrap();
    script.define_global(heap, "outer").unwrap();
    script.line(7);
    script.get_global(heap, "outer").unwrap().call(0).emit(Opcode::Pop);
    let function = script.finish(heap);

    check(
        &mut vm,
        function,
        "Operands must be two numbers or two strings, got nil and number.\n\
         [line 2] in inner()\n\
         [line 5] in outer()\n\
         [line 7] in script\n",
    );
}

/// fun f() { f(); } f();
fn unbounded_recursion(vm: &mut Vm) -> ArenaIndex<Function> {
    let heap = vm.heap_mut();
    let mut recurse = FunctionBuilder::function(heap, "f", 0);
    recurse.get_global(heap, "f").unwrap().call(0).emit(Opcode::Pop);
    let recurse = recurse.finish(heap);

    let mut script = FunctionBuilder::script();
    script.closure(recurse).unwrap();
    script.define_global(heap, "f").unwrap();
    script.get_global(heap, "f").unwrap().call(0).emit(Opcode::Pop);
    script.finish(heap)
}

#[test]
fn stack_overflow() {
    let mut vm = Vm::default();
    let function = unbounded_recursion(&mut vm);

    let mut context = BufferContext::new();
    let err = vm.run_function(&mut context, function).unwrap_err();
    assert_eq!(err.kind, RuntimeErrorKind::StackOverflow);
    assert_eq!(err.trace.len(), 64);
    assert_eq!(err.trace.last().unwrap().function, None);
    assert_eq!(err.trace[0].function.as_deref(), Some("f"));
    assert_eq!(vm.stack_len(), 0);
    assert_eq!(vm.frame_depth(), 0);
}

#[test]
fn stack_overflow_respects_configured_depth() {
    let mut vm = Vm::new(VmConfig::default().with_max_frames(8));
    let function = unbounded_recursion(&mut vm);

    let output = run(&mut vm, function);
    assert!(output.starts_with("Stack overflow.\n[line 1] in f()\n"));
    assert_eq!(output.matches("in f()").count(), 7);
    assert!(output.ends_with("[line 1] in script\n"));
}

#[test]
fn value_stack_is_bounded() {
    // One frame leaves room for 256 values, the script closure included.
    let mut vm = Vm::new(VmConfig::default().with_max_frames(1));
    let heap = vm.heap_mut();
    let mut script = FunctionBuilder::script();
    for _ in 0..300 {
        script.emit(Opcode::Nil);
    }
    let function = script.finish(heap);

    let mut context = BufferContext::new();
    let err = vm.run_function(&mut context, function).unwrap_err();
    assert_eq!(err.kind, RuntimeErrorKind::StackOverflow);
    assert_eq!(err.to_string(), "Stack overflow.\n[line 1] in script");
    assert_eq!(vm.stack_len(), 0);
    assert_eq!(vm.frame_depth(), 0);
}

#[test]
fn value_stack_fills_to_its_limit() {
    // The closure, 254 values and the implicit return's nil fill all 256 slots.
    let mut vm = Vm::new(VmConfig::default().with_max_frames(1));
    let heap = vm.heap_mut();
    let mut script = FunctionBuilder::script();
    for _ in 0..254 {
        script.emit(Opcode::Nil);
    }
    let function = script.finish(heap);

    check(&mut vm, function, "");
}
