pub mod context;
pub mod error;
pub mod natives;
pub mod program;

use std::collections::BTreeMap;
use std::sync::Arc;

use compiler::CompiledFile;
use heap::{Heap, HeapCreateInfo, Value};

pub use context::{ContextId, ContextState, ExecutionContext, Fault, Frame};
pub use error::{RuntimeError, VmError};
pub use natives::{Native, NativeFn, NativeRegistry};
pub use program::{Callable, ClassLayout, Program};

#[derive(Debug, Clone, Copy)]
pub struct VmSettings {
    /// Call depth at which `call` faults.
    pub max_frames: usize,
    /// Operand stack values allowed per frame.
    pub max_operand_stack: usize,
}

impl Default for VmSettings {
    fn default() -> Self {
        Self {
            max_frames: 1024,
            max_operand_stack: 65536,
        }
    }
}

/// Owns a loaded program and the contexts running it.
pub struct Vm {
    program: Arc<Program>,
    heap: Heap,
    natives: Arc<NativeRegistry>,
    settings: VmSettings,
    contexts: BTreeMap<ContextId, ExecutionContext>,
    next_id: ContextId,
}

impl Vm {
    /// `natives` must be the registry whose signatures `file` was compiled
    /// against.
    pub fn new(file: &CompiledFile, natives: NativeRegistry, heap: Heap, settings: VmSettings) -> Self {
        Self {
            program: Arc::new(Program::load(file)),
            heap,
            natives: Arc::new(natives),
            settings,
            contexts: BTreeMap::new(),
            next_id: 0,
        }
    }

    pub fn with_defaults(file: &CompiledFile, natives: NativeRegistry) -> Self {
        Self::new(
            file,
            natives,
            Heap::new(HeapCreateInfo::default()),
            VmSettings::default(),
        )
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn settings(&self) -> &VmSettings {
        &self.settings
    }

    fn register(&mut self, entry: Frame) -> ContextId {
        let id = self.next_id;
        self.next_id += 1;
        let context = ExecutionContext::new(
            id,
            entry,
            self.program.clone(),
            self.heap.clone(),
            self.natives.clone(),
            self.settings,
        );
        self.contexts.insert(id, context);
        log::debug!("spawned context {id}");
        id
    }

    /// A context that runs the top-level code.
    pub fn spawn_top_level(&mut self) -> ContextId {
        let entry = ExecutionContext::top_level_frame(&self.program);
        self.register(entry)
    }

    /// A context that calls a free function with `args`.
    pub fn spawn_call(&mut self, name: &str, args: &[Value]) -> Result<ContextId, VmError> {
        let callable = self.program.function(name)?.clone();
        if callable.param_count != args.len() {
            return Err(VmError::ArityMismatch {
                name: callable.name.clone(),
                expected: callable.param_count,
                found: args.len(),
            });
        }
        let entry = ExecutionContext::call_frame(callable, args);
        Ok(self.register(entry))
    }

    pub fn context(&self, id: ContextId) -> Option<&ExecutionContext> {
        self.contexts.get(&id)
    }

    pub fn contexts(&self) -> impl Iterator<Item = &ExecutionContext> {
        self.contexts.values()
    }

    /// Run a registered context to completion on this thread.
    pub fn execute(&mut self, id: ContextId) -> Result<ContextState, VmError> {
        let context = self.contexts.get_mut(&id).ok_or(VmError::UnknownContext(id))?;
        Ok(context.execute())
    }

    /// Detach a context, e.g. to run it on another thread.
    pub fn take(&mut self, id: ContextId) -> Result<ExecutionContext, VmError> {
        self.contexts.remove(&id).ok_or(VmError::UnknownContext(id))
    }

    /// Re-attach a context detached with [`Vm::take`].
    pub fn restore(&mut self, context: ExecutionContext) {
        self.contexts.insert(context.id(), context);
    }

    /// Drop a context and its frames.
    pub fn discard(&mut self, id: ContextId) -> Option<ExecutionContext> {
        self.contexts.remove(&id)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use compiler::{compile, NativeSignature};
    use heap::HeapError;
    use parking_lot::Mutex;
    use syntax::build::*;
    use syntax::{AssignOp, BinaryOp, Stmt};

    use super::*;

    fn load(items: Vec<Stmt>, natives: NativeRegistry) -> Vm {
        let file = compile(&program(items), &natives.signatures()).unwrap();
        Vm::with_defaults(&file, natives)
    }

    fn run_top_level(vm: &mut Vm) -> ContextId {
        let id = vm.spawn_top_level();
        let state = vm.execute(id).unwrap();
        let context = vm.context(id).unwrap();
        assert_eq!(state, ContextState::HaltedNormal, "{:?}", context.exception());
        id
    }

    fn global(vm: &Vm, id: ContextId, name: &str) -> Value {
        vm.context(id).unwrap().global(name).unwrap()
    }

    fn divide() -> Stmt {
        function(
            "div",
            &[("int", "a"), ("int", "b")],
            "int",
            vec![ret(Some(binary(BinaryOp::Div, ident("a"), ident("b"))))],
        )
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn arithmetic_respects_precedence() {
        let mut vm = load(
            vec![var(
                "int",
                "a",
                Some(binary(BinaryOp::Add, int(2), binary(BinaryOp::Mul, int(3), int(4)))),
            )],
            NativeRegistry::new(),
        );
        let id = run_top_level(&mut vm);
        assert_eq!(global(&vm, id, "a"), Value::Integer(14));
    }

    #[test]
    fn for_loop_sums() {
        let mut vm = load(
            vec![
                var("int", "sum", Some(int(0))),
                for_loop(
                    Some(var("int", "i", Some(int(0)))),
                    Some(binary(BinaryOp::Lt, ident("i"), int(5))),
                    Some(assign(ident("i"), binary(BinaryOp::Add, ident("i"), int(1)))),
                    block(vec![expr(assign(
                        ident("sum"),
                        binary(BinaryOp::Add, ident("sum"), ident("i")),
                    ))]),
                ),
            ],
            NativeRegistry::new(),
        );
        let id = run_top_level(&mut vm);
        assert_eq!(global(&vm, id, "sum"), Value::Integer(10));
    }

    #[test]
    fn while_with_break_and_continue() {
        let mut vm = load(
            vec![
                var("int", "i", Some(int(0))),
                var("int", "odd", Some(int(0))),
                while_loop(
                    boolean(true),
                    block(vec![
                        expr(assign_op(AssignOp::Add, ident("i"), int(1))),
                        if_else(vec![(binary(BinaryOp::Gt, ident("i"), int(10)), break_())], None),
                        if_else(
                            vec![(
                                binary(BinaryOp::Eq, binary(BinaryOp::Mod, ident("i"), int(2)), int(0)),
                                continue_(),
                            )],
                            None,
                        ),
                        expr(assign_op(AssignOp::Add, ident("odd"), ident("i"))),
                    ]),
                ),
            ],
            NativeRegistry::new(),
        );
        let id = run_top_level(&mut vm);
        assert_eq!(global(&vm, id, "odd"), Value::Integer(25));
        assert_eq!(global(&vm, id, "i"), Value::Integer(11));
    }

    #[test]
    fn compound_property_assignment_evaluates_object_once() {
        let touched = Arc::new(AtomicUsize::new(0));
        let counter = touched.clone();
        let mut natives = NativeRegistry::new();
        natives.register(NativeSignature::new("touch", &["P"], "P"), move |args, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(args[0])
        });

        let mut vm = load(
            vec![
                class("P", vec![var("int", "x", Some(int(1)))]),
                var("P", "p", Some(new_object("P"))),
                expr(assign_op(
                    AssignOp::Add,
                    property(call("touch", vec![ident("p")]), "x"),
                    int(5),
                )),
                var("int", "r", Some(property(ident("p"), "x"))),
            ],
            natives,
        );
        let id = run_top_level(&mut vm);
        assert_eq!(touched.load(Ordering::SeqCst), 1);
        assert_eq!(global(&vm, id, "r"), Value::Integer(6));
    }

    #[test]
    fn stores_round_trip_each_kind() {
        let mut vm = load(
            vec![
                var("int", "i", Some(int(-70_000))),
                var("double", "d", Some(float(2.5))),
                var("string", "s", Some(string("hi"))),
                var("int", "i2", Some(ident("i"))),
                var("double", "d2", Some(ident("d"))),
                var("string", "s2", Some(ident("s"))),
            ],
            NativeRegistry::new(),
        );
        let id = run_top_level(&mut vm);
        assert_eq!(global(&vm, id, "i2"), Value::Integer(-70_000));
        assert_eq!(global(&vm, id, "d2"), Value::Float(2.5));
        let Value::StringRef(s) = global(&vm, id, "s2") else {
            panic!("s2 is not a string");
        };
        assert_eq!(vm.heap().string(s).unwrap(), "hi");
    }

    #[test]
    fn division_by_zero_halts_only_its_context() {
        let mut vm = load(vec![divide()], NativeRegistry::new());
        let failing = vm.spawn_call("div", &[Value::Integer(1), Value::Integer(0)]).unwrap();
        let healthy = vm.spawn_call("div", &[Value::Integer(6), Value::Integer(3)]).unwrap();

        assert_eq!(vm.execute(failing), Ok(ContextState::HaltedError));
        assert_eq!(vm.execute(healthy), Ok(ContextState::HaltedNormal));

        let fault = vm.context(failing).unwrap().exception().unwrap();
        assert_eq!(fault.error, RuntimeError::DivisionByZero);
        assert_eq!(fault.callable, "div(int,int)");
        assert_eq!(vm.context(healthy).unwrap().result(), Some(Value::Integer(2)));
    }

    #[test]
    fn halted_contexts_do_not_rerun() {
        let mut vm = load(vec![divide()], NativeRegistry::new());
        let id = vm.spawn_call("div", &[Value::Integer(9), Value::Integer(3)]).unwrap();
        assert_eq!(vm.execute(id), Ok(ContextState::HaltedNormal));
        assert_eq!(vm.execute(id), Ok(ContextState::HaltedNormal));
        assert_eq!(vm.context(id).unwrap().result(), Some(Value::Integer(3)));
    }

    #[test]
    fn recursion_through_forward_declaration() {
        let fib = function(
            "fib",
            &[("int", "n")],
            "int",
            vec![
                if_else(
                    vec![(binary(BinaryOp::Lt, ident("n"), int(2)), ret(Some(ident("n"))))],
                    None,
                ),
                ret(Some(binary(
                    BinaryOp::Add,
                    call("fib", vec![binary(BinaryOp::Sub, ident("n"), int(1))]),
                    call("fib", vec![binary(BinaryOp::Sub, ident("n"), int(2))]),
                ))),
            ],
        );
        let mut vm = load(
            vec![var("int", "r", Some(call("fib", vec![int(15)]))), fib],
            NativeRegistry::new(),
        );
        let id = run_top_level(&mut vm);
        assert_eq!(global(&vm, id, "r"), Value::Integer(610));
    }

    #[test]
    fn methods_update_members_through_this() {
        let counter = class(
            "Counter",
            vec![
                var("int", "count", Some(int(10))),
                function(
                    "bump",
                    &[("int", "by")],
                    "void",
                    vec![expr(assign_op(AssignOp::Add, ident("count"), ident("by")))],
                ),
                function("get", &[], "int", vec![ret(Some(property(this(), "count")))]),
            ],
        );
        let mut vm = load(
            vec![
                counter,
                var("Counter", "c", Some(new_object("Counter"))),
                expr(method_call(ident("c"), "bump", vec![int(5)])),
                expr(method_call(ident("c"), "bump", vec![int(2)])),
                var("int", "r", Some(method_call(ident("c"), "get", vec![]))),
            ],
            NativeRegistry::new(),
        );
        let id = run_top_level(&mut vm);
        assert_eq!(global(&vm, id, "r"), Value::Integer(17));
        assert_eq!(vm.heap().live_count(), 1);
    }

    #[test]
    fn strings_concat_compare_and_print() {
        let out = Captured::default();
        let mut vm = load(
            vec![
                var("string", "s", Some(binary(BinaryOp::Add, string("ab"), string("cd")))),
                var("bool", "same", Some(binary(BinaryOp::Eq, ident("s"), string("abcd")))),
                var("int", "n", Some(call("string_length", vec![ident("s")]))),
                expr(call("print", vec![ident("s")])),
                expr(call("print_int", vec![call("string_length", vec![ident("s")])])),
            ],
            NativeRegistry::with_builtins(out.clone()),
        );
        let id = run_top_level(&mut vm);
        assert_eq!(global(&vm, id, "same"), Value::TRUE);
        assert_eq!(global(&vm, id, "n"), Value::Integer(4));
        assert_eq!(String::from_utf8(out.0.lock().clone()).unwrap(), "abcd\n4\n");
    }

    #[test]
    fn logical_operators_short_circuit() {
        let faulting = || binary(BinaryOp::Eq, call("div", vec![int(1), int(0)]), int(0));
        let mut vm = load(
            vec![
                divide(),
                var("bool", "a", Some(binary(BinaryOp::And, boolean(false), faulting()))),
                var("bool", "b", Some(binary(BinaryOp::Or, boolean(true), faulting()))),
                var("bool", "c", Some(binary(BinaryOp::And, boolean(true), unary(syntax::UnaryOp::Not, boolean(false))))),
            ],
            NativeRegistry::new(),
        );
        let id = run_top_level(&mut vm);
        assert_eq!(global(&vm, id, "a"), Value::FALSE);
        assert_eq!(global(&vm, id, "b"), Value::TRUE);
        assert_eq!(global(&vm, id, "c"), Value::TRUE);
    }

    #[test]
    fn conversions_follow_casts() {
        let mut vm = load(
            vec![
                var("double", "half", Some(binary(BinaryOp::Div, cast("double", int(7)), float(2.0)))),
                var("int", "t", Some(cast("int", float(3.9)))),
                var("double", "w", Some(binary(BinaryOp::Div, int(7), int(2)))),
            ],
            NativeRegistry::new(),
        );
        let id = run_top_level(&mut vm);
        assert_eq!(global(&vm, id, "half"), Value::Float(3.5));
        assert_eq!(global(&vm, id, "t"), Value::Integer(3));
        assert_eq!(global(&vm, id, "w"), Value::Float(3.0));
    }

    #[test]
    fn use_after_delete_is_a_fault() {
        let mut vm = load(
            vec![
                class("Box", vec![var("int", "v", Some(int(1)))]),
                var("Box", "b", Some(new_object("Box"))),
                delete(ident("b")),
                var("int", "v", Some(property(ident("b"), "v"))),
            ],
            NativeRegistry::new(),
        );
        let id = vm.spawn_top_level();
        assert_eq!(vm.execute(id), Ok(ContextState::HaltedError));
        let fault = vm.context(id).unwrap().exception().unwrap();
        assert!(matches!(fault.error, RuntimeError::Heap(HeapError::Freed(_))));
        assert_eq!(vm.heap().live_count(), 0);
    }

    #[test]
    fn loop_declared_string_starts_void_each_pass() {
        let mut vm = load(
            vec![
                var("bool", "seen", Some(boolean(true))),
                for_loop(
                    Some(var("int", "i", Some(int(0)))),
                    Some(binary(BinaryOp::Lt, ident("i"), int(2))),
                    Some(assign(ident("i"), binary(BinaryOp::Add, ident("i"), int(1)))),
                    block(vec![
                        var("string", "s", None),
                        if_else(
                            vec![(
                                binary(BinaryOp::Eq, ident("i"), int(0)),
                                expr(assign(ident("s"), string("a"))),
                            )],
                            Some(expr(assign(
                                ident("seen"),
                                binary(BinaryOp::Eq, ident("s"), string("a")),
                            ))),
                        ),
                    ]),
                ),
            ],
            NativeRegistry::new(),
        );
        let id = run_top_level(&mut vm);
        assert_eq!(global(&vm, id, "seen"), Value::FALSE);
    }

    #[test]
    fn value_function_without_return_faults() {
        let mut vm = load(
            vec![
                function("f", &[("int", "n")], "int", vec![var("int", "x", Some(ident("n")))]),
                var("int", "r", Some(call("f", vec![int(3)]))),
            ],
            NativeRegistry::new(),
        );
        let id = vm.spawn_top_level();
        assert_eq!(vm.execute(id), Ok(ContextState::HaltedError));
        let fault = vm.context(id).unwrap().exception().unwrap();
        assert_eq!(fault.error, RuntimeError::MissingReturn("f(int)".into()));
    }

    #[test]
    fn arrays_fill_update_and_sum() {
        let counted = |body: Stmt| {
            for_loop(
                Some(var("int", "i", Some(int(0)))),
                Some(binary(BinaryOp::Lt, ident("i"), property(ident("a"), "length"))),
                Some(assign(ident("i"), binary(BinaryOp::Add, ident("i"), int(1)))),
                body,
            )
        };
        let mut vm = load(
            vec![
                var_typed(array_of("int"), "a", Some(new_array("int", int(4)))),
                counted(expr(assign(
                    index(ident("a"), ident("i")),
                    binary(BinaryOp::Mul, ident("i"), ident("i")),
                ))),
                expr(assign_op(AssignOp::Add, index(ident("a"), int(2)), int(10))),
                var("int", "sum", Some(int(0))),
                counted(expr(assign_op(AssignOp::Add, ident("sum"), index(ident("a"), ident("i"))))),
                var("int", "n", Some(property(ident("a"), "length"))),
                var_typed(array_of("string"), "names", Some(new_array("string", int(2)))),
                var("bool", "empty", Some(binary(BinaryOp::Eq, index(ident("names"), int(1)), string("")))),
            ],
            NativeRegistry::new(),
        );
        let id = run_top_level(&mut vm);
        assert_eq!(global(&vm, id, "sum"), Value::Integer(24));
        assert_eq!(global(&vm, id, "n"), Value::Integer(4));
        // Reference elements start out void.
        assert_eq!(global(&vm, id, "empty"), Value::FALSE);
    }

    #[test]
    fn negative_array_index_faults() {
        let mut vm = load(
            vec![
                var_typed(array_of("double"), "a", Some(new_array("double", int(2)))),
                var("double", "d", Some(index(ident("a"), unary(syntax::UnaryOp::Neg, int(1))))),
            ],
            NativeRegistry::new(),
        );
        let id = vm.spawn_top_level();
        assert_eq!(vm.execute(id), Ok(ContextState::HaltedError));
        let fault = vm.context(id).unwrap().exception().unwrap();
        assert_eq!(fault.error, RuntimeError::NegativeIndex(-1));

        let mut vm = load(
            vec![var_typed(array_of("int"), "a", Some(new_array("int", int(-3))))],
            NativeRegistry::new(),
        );
        let id = vm.spawn_top_level();
        assert_eq!(vm.execute(id), Ok(ContextState::HaltedError));
        let fault = vm.context(id).unwrap().exception().unwrap();
        assert_eq!(fault.error, RuntimeError::NegativeLength(-3));
    }

    #[test]
    fn runaway_recursion_overflows_frames() {
        let forever = function(
            "forever",
            &[("int", "n")],
            "int",
            vec![ret(Some(call("forever", vec![binary(BinaryOp::Add, ident("n"), int(1))])))],
        );
        let file = compile(&program(vec![forever]), &[]).unwrap();
        let settings = VmSettings {
            max_frames: 64,
            ..VmSettings::default()
        };
        let mut vm = Vm::new(&file, NativeRegistry::new(), Heap::new(HeapCreateInfo::default()), settings);
        let id = vm.spawn_call("forever", &[Value::Integer(0)]).unwrap();
        assert_eq!(vm.execute(id), Ok(ContextState::HaltedError));
        let context = vm.context(id).unwrap();
        assert_eq!(context.exception().unwrap().error, RuntimeError::FrameOverflow(64));
        assert_eq!(context.frames().len(), 64);
    }

    #[test]
    fn contexts_run_on_other_threads() {
        let mut vm = load(vec![divide()], NativeRegistry::new());
        let ids: Vec<ContextId> = (1..=4)
            .map(|n| vm.spawn_call("div", &[Value::Integer(n * 10), Value::Integer(n)]).unwrap())
            .collect();

        let handles: Vec<_> = ids
            .iter()
            .map(|&id| {
                let mut context = vm.take(id).unwrap();
                std::thread::spawn(move || {
                    context.execute();
                    context
                })
            })
            .collect();
        for handle in handles {
            vm.restore(handle.join().unwrap());
        }

        for id in ids {
            assert_eq!(vm.context(id).unwrap().result(), Some(Value::Integer(10)));
        }
    }

    #[test]
    fn spawn_call_checks_name_and_arity() {
        let mut vm = load(vec![divide()], NativeRegistry::new());
        assert_eq!(
            vm.spawn_call("nope", &[]),
            Err(VmError::UnknownFunction("nope".into()))
        );
        assert_eq!(
            vm.spawn_call("div", &[Value::Integer(1)]),
            Err(VmError::ArityMismatch {
                name: "div(int,int)".into(),
                expected: 2,
                found: 1
            })
        );
        assert_eq!(vm.execute(99), Err(VmError::UnknownContext(99)));
    }
}
