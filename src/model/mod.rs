//! Model capabilities: the causal-model contract, the supported
//! architectures, and the key-value cache threaded between forward passes.

mod base;
mod kv_cache;
mod llama;
mod phi2;

pub use base::{CausalModel, Model};
pub use kv_cache::KvCache;
pub use llama::Llama;
pub use phi2::Phi2;
