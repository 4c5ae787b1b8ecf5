//! # Cache Module
//!
//! Content-addressed disk cache for audio streams that are expensive to produce
//! (speech synthesis, remote downloads).
//!
//! Entries live at `<root>/<namespace>/<sha1(identifier)>`. A miss tees the
//! producer's stream into the cache while it is being played, so the first
//! listener and the cached copy come from a single upstream read.
//!
//! ## Namespaces
//!
//! - **speech**: keyed by the raw text; invalidated as a whole when the
//!   pronunciation lexicon changes
//! - **url**: keyed by the remote URL as given by the user
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use voice_herald::cache::{Namespace, StreamCache};
//!
//! # async fn example(synth: impl Fn() -> voice_herald::sources::AudioStream) -> anyhow::Result<()> {
//! let cache = StreamCache::open("./data").await?;
//! let stream = cache
//!     .cache_stream(Namespace::Speech, "hello there", || async { Ok(synth()) })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod stream_cache;

pub use stream_cache::StreamCache;

use std::fmt;

/// Partición lógica del caché; evita colisiones entre tipos de contenido.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Speech,
    Url,
}

impl Namespace {
    pub const ALL: [Namespace; 2] = [Namespace::Speech, Namespace::Url];

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Speech => "speech",
            Namespace::Url => "url",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
