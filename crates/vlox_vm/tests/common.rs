use core::fmt::Write as _;
use vlox_vm::Vm;
use vlox_vm::gc::ArenaIndex;
use vlox_vm::io::BufferContext;
use vlox_vm::object::Function;

/// Route VM logs to the test harness. Filter with `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Run the function and return everything it printed followed by the error, if any.
#[expect(
    clippy::allow_attributes,
    reason = "clippy/rust-analzyer is confused with the test organisation."
)]
#[allow(unreachable_pub, dead_code, reason = "used by each test file.")]
pub fn run(vm: &mut Vm, function: ArenaIndex<Function>) -> String {
    init_tracing();
    let mut context = BufferContext::new();
    let result = vm.run_function(&mut context, function);
    let mut output = context.flush();
    if let Err(err) = result {
        writeln!(&mut output, "{err}").unwrap();
    }
    output
}

/// Run the function checking its output and that the VM is back to an empty stack.
///
/// # Panics
/// When the expected output and actual output differ.
#[expect(
    clippy::allow_attributes,
    reason = "clippy/rust-analzyer is confused with the test organisation."
)]
#[allow(unreachable_pub, dead_code, reason = "used by each test file.")]
pub fn check(vm: &mut Vm, function: ArenaIndex<Function>, expected: &str) {
    let output = run(vm, function);
    assert_eq!(expected, output, "check failed.");
    assert_eq!(vm.stack_len(), 0, "stack not unwound.");
    assert_eq!(vm.frame_depth(), 0, "call stack not unwound.");
}
