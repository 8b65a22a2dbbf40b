//! Model assembly and generation.

pub mod family;
pub mod loader;
pub mod runtime;
pub mod tokenizer;

pub use family::{ModelFamily, ModelKind, TokenOverrides};
pub use loader::{LoadedModel, ModelArch};
pub use runtime::Generator;
pub use tokenizer::PromptTokenizer;
