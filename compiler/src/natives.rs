/// Declared shape of a host function the compiler may call with
/// `call_native`. Types are named as in source and resolved at the call
/// site; the call operand is the signature's index in the slice handed to
/// the compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeSignature {
    pub name: String,
    pub params: Vec<String>,
    pub ret: String,
}

impl NativeSignature {
    pub fn new(name: &str, params: &[&str], ret: &str) -> Self {
        Self {
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            ret: ret.to_string(),
        }
    }
}
