use vlox_bytecode::Opcode;
use vlox_vm::Vm;
use vlox_vm::builder::FunctionBuilder;

#[test]
fn disassemble_function() {
    let mut vm = Vm::default();
    let heap = vm.heap_mut();
    let mut script = FunctionBuilder::script();
    script.string(heap, "hi").unwrap().emit(Opcode::Print);
    script.line(2);
    script.get_local(1);
    let function = script.finish(heap);

    let mut buffer = String::new();
    vm.heap().disassemble(function, &mut buffer).unwrap();
    let expected = "\
== script ==
0000    1 constant            0 'hi'
0002    | print
0003    2 get_local           1
0005    | nil
0006    | return
";
    assert_eq!(buffer, expected);
}

#[test]
fn dump_lists_objects_by_kind() {
    let mut vm = Vm::default();
    let heap = vm.heap_mut();
    let _named = FunctionBuilder::function(heap, "named", 2).finish(heap);

    let mut buffer = String::new();
    vm.heap().dump(&mut buffer).unwrap();
    assert!(buffer.contains("Strings: 2\n"));
    assert!(buffer.contains("\"clock\""));
    assert!(buffer.contains("\"named\""));
    assert!(buffer.contains("Functions: 1\n"));
    assert!(buffer.contains("<fn named> arity 2 upvalues 0"));
    assert!(buffer.contains("Closures: 0\n"));
    assert!(buffer.contains("Natives: 1\n"));
}
