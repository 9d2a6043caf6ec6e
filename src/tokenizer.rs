//! Token counting used as the dataset size gate.

use tiktoken_rs::CoreBPE;

use crate::error::{Error, Result};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// BPE encoder of one model. Loading the encoding table is the expensive
/// part, so one instance is built at startup and shared.
pub struct Tokenizer {
    model: String,
    bpe: CoreBPE,
}

impl Tokenizer {
    /// Fails with [`Error::Config`] when no encoding is known for `model`.
    pub fn for_model(model: &str) -> Result<Self> {
        let bpe = tiktoken_rs::get_bpe_from_model(model).map_err(|err| {
            Error::Config(format!("no tokenizer encoding for model {model:?}: {err}"))
        })?;
        tracing::debug!(model, "loaded tokenizer");
        Ok(Self {
            model: model.to_string(),
            bpe,
        })
    }

    /// Special-token markup in `text` is counted as ordinary text.
    pub fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// One-shot count; prefer a shared [`Tokenizer`] on hot paths.
pub fn count_tokens(text: &str, model: &str) -> Result<usize> {
    Ok(Tokenizer::for_model(model)?.count_tokens(text))
}
