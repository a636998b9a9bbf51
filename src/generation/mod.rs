//! Text generation: cutoff truncation sampling, the token stream, and the
//! end-to-end driver.

mod config;
mod generate;
mod sampler;
mod stream;

pub use config::GenerationConfig;
pub use generate::{generate, generate_with_output};
pub use sampler::{SampledToken, Sampler};
pub use stream::TokenStream;
