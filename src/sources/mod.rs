//! # Sources Module
//!
//! Turns a queued [`Source`] into a raw encoded audio stream.
//!
//! - **local**: files under the sounds directory (never cached)
//! - **remote**: arbitrary URLs resolved through `yt-dlp` and fetched over HTTP
//! - **speech**: text-to-speech through an HTTP provider
//!
//! Remote and speech streams go through the [`StreamCache`], so repeated
//! requests are served from disk.

pub mod local;
pub mod remote;
pub mod speech;

pub use local::LocalSounds;
pub use remote::{MediaResolver, RemoteSource, YtDlpResolver};
pub use speech::{HttpSpeechProvider, Lexicon, SpeechProvider, SpeechSource};

use tokio::io::AsyncRead;
use tracing::{debug, info, warn};

use crate::{
    audio::queue::Source,
    cache::{Namespace, StreamCache},
    error::AudioResult,
};

/// Audio codificado (cualquier formato que ffmpeg entienda).
pub type AudioStream = Box<dyn AsyncRead + Send + Unpin>;

/// Punto único de resolución de fuentes para el reproductor.
#[derive(Clone)]
pub struct SourceResolver {
    local: LocalSounds,
    remote: RemoteSource,
    speech: SpeechSource,
    cache: StreamCache,
}

impl SourceResolver {
    pub fn new(
        local: LocalSounds,
        remote: RemoteSource,
        speech: SpeechSource,
        cache: StreamCache,
    ) -> Self {
        Self {
            local,
            remote,
            speech,
            cache,
        }
    }

    #[cfg(test)]
    pub fn cache(&self) -> &StreamCache {
        &self.cache
    }

    /// Una ubicación sin clasificar es local sólo si es un nombre simple que existe
    /// en el directorio de sonidos; cualquier otra cosa es remota.
    pub async fn classify(&self, location: &str) -> Source {
        match self.local.named(location) {
            Some(path) if self.local.exists(&path).await => {
                info!("📂 local: {}", location);
                Source::Local(path)
            }
            _ => {
                info!("🌐 remote: {}", location);
                Source::Remote(location.to_string())
            }
        }
    }

    pub async fn resolve(&self, source: &Source) -> AudioResult<AudioStream> {
        debug!("🔎 Resolviendo fuente {}", source);

        match source {
            Source::Local(path) => self.local.open(path).await,
            Source::Remote(url) => self.open_remote(url).await,
            Source::Speech(text) => {
                self.cache
                    .cache_stream(Namespace::Speech, text, || self.speech.synthesize(text))
                    .await
            }
            Source::Location(location) => {
                let classified = self.classify(location).await;
                self.open_location(location, classified).await
            }
        }
    }

    async fn open_remote(&self, url: &str) -> AudioResult<AudioStream> {
        self.cache
            .cache_stream(Namespace::Url, url, || self.remote.open(url))
            .await
    }

    /// Abre una ubicación ya clasificada. Si el archivo local desapareció tras el
    /// sondeo, se trata como remota.
    async fn open_location(&self, location: &str, classified: Source) -> AudioResult<AudioStream> {
        match classified {
            Source::Local(path) => match self.local.open(&path).await {
                Err(e) if e.is_not_found() => {
                    warn!("📂 {} ya no existe, se intenta como remoto", location);
                    self.open_remote(location).await
                }
                opened => opened,
            },
            _ => self.open_remote(location).await,
        }
    }
}
