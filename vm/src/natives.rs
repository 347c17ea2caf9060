//! Host functions callable through `call_native`.

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use compiler::NativeSignature;
use heap::{Heap, Value};
use parking_lot::Mutex;

/// Receives the arguments in declaration order.
pub type NativeFn = Arc<dyn Fn(&[Value], &Heap) -> Result<Value, String> + Send + Sync>;

#[derive(Clone)]
pub struct Native {
    pub signature: NativeSignature,
    pub function: NativeFn,
}

impl fmt::Debug for Native {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Native")
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// Ordered table of natives; a native's index is its `call_native`
/// operand, so the same registry must be used to compile and to run.
#[derive(Debug, Clone, Default)]
pub struct NativeRegistry {
    natives: Vec<Native>,
}

fn string_arg(args: &[Value], heap: &Heap, index: usize) -> Result<String, String> {
    match args.get(index) {
        Some(Value::StringRef(id)) => heap.string(*id).map_err(|err| err.to_string()),
        Some(other) => Err(format!("argument {} is {}, expected string", index + 1, other.type_name())),
        None => Err(format!("missing argument {}", index + 1)),
    }
}

fn int_arg(args: &[Value], index: usize) -> Result<i64, String> {
    args.get(index)
        .and_then(Value::as_integer)
        .ok_or_else(|| format!("argument {} is not an integer", index + 1))
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `print`, `print_int`, `print_float`, `int_to_string` and
    /// `string_length`, printing to `out`.
    pub fn with_builtins(out: impl Write + Send + 'static) -> Self {
        let out = Arc::new(Mutex::new(out));
        let mut registry = Self::new();

        let sink = out.clone();
        registry.register(NativeSignature::new("print", &["string"], "void"), move |args, heap| {
            let text = string_arg(args, heap, 0)?;
            writeln!(sink.lock(), "{text}").map_err(|err| err.to_string())?;
            Ok(Value::Void)
        });
        let sink = out.clone();
        registry.register(NativeSignature::new("print_int", &["int"], "void"), move |args, _| {
            let value = int_arg(args, 0)?;
            writeln!(sink.lock(), "{value}").map_err(|err| err.to_string())?;
            Ok(Value::Void)
        });
        let sink = out;
        registry.register(NativeSignature::new("print_float", &["double"], "void"), move |args, _| {
            let value = args
                .first()
                .and_then(Value::as_float)
                .ok_or("argument 1 is not a float")?;
            writeln!(sink.lock(), "{value}").map_err(|err| err.to_string())?;
            Ok(Value::Void)
        });
        registry.register(NativeSignature::new("int_to_string", &["int"], "string"), |args, heap| {
            let value = int_arg(args, 0)?;
            let id = heap.create_string(value.to_string()).map_err(|err| err.to_string())?;
            Ok(Value::StringRef(id))
        });
        registry.register(NativeSignature::new("string_length", &["string"], "int"), |args, heap| {
            let text = string_arg(args, heap, 0)?;
            Ok(Value::Integer(text.chars().count() as i64))
        });
        registry
    }

    /// Append a native and return its index.
    pub fn register<F>(&mut self, signature: NativeSignature, function: F) -> u16
    where
        F: Fn(&[Value], &Heap) -> Result<Value, String> + Send + Sync + 'static,
    {
        log::debug!("registering native {}", signature.name);
        self.natives.push(Native {
            signature,
            function: Arc::new(function),
        });
        (self.natives.len() - 1) as u16
    }

    pub fn get(&self, idx: u16) -> Option<&Native> {
        self.natives.get(idx as usize)
    }

    pub fn len(&self) -> usize {
        self.natives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.natives.is_empty()
    }

    /// Signatures in index order, for the compiler.
    pub fn signatures(&self) -> Vec<NativeSignature> {
        self.natives.iter().map(|n| n.signature.clone()).collect()
    }
}
