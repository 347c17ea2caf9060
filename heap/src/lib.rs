mod heap;
mod value;

pub use heap::{
    Heap, HeapCreateInfo, HeapEntry, HeapError, HeapId, HeapPayload, HeapSettings, HeapTag,
};
pub use value::Value;
