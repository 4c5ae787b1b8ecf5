//! Output seam between the scheduler and the chat platform.
//!
//! The scheduler never talks to Discord directly: it asks a [`VoiceConnector`] for a
//! [`VoiceSink`] per target and hands it a [`PcmStream`]. The returned
//! [`Dispatcher`] carries the transport controls plus a completion signal that
//! resolves when the track ends or fails.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::oneshot;

use super::{queue::Target, PcmStream};
use crate::error::{AudioError, AudioResult};

/// Proveedor de conexiones de voz por canal destino.
#[async_trait]
pub trait VoiceConnector: Send + Sync {
    /// `false` mientras el cliente de chat no está listo para conectar.
    fn is_ready(&self) -> bool;

    /// Comprueba que el canal destino siga existiendo.
    async fn target_available(&self, target: &Target) -> bool;

    /// Une (o reutiliza) la conexión de voz del destino.
    async fn connect(&self, target: &Target) -> AudioResult<Arc<dyn VoiceSink>>;
}

/// Conexión de voz capaz de reproducir PCM ya convertido.
#[async_trait]
pub trait VoiceSink: Send + Sync {
    async fn play_pcm(&self, pcm: PcmStream) -> AudioResult<Dispatcher>;
}

/// Controles de transporte del track activo.
pub trait PlaybackControl: Send + Sync {
    fn pause(&self) -> AudioResult<()>;
    fn resume(&self) -> AudioResult<()>;
    /// Termina el track; el sink debe completar la señal de fin.
    fn end(&self) -> AudioResult<()>;
}

/// Lado del sink que notifica el fin (o error) del track.
pub type CompletionSender = oneshot::Sender<AudioResult<()>>;

/// Handle vivo del track en reproducción.
pub struct Dispatcher {
    control: Arc<dyn PlaybackControl>,
    finished: oneshot::Receiver<AudioResult<()>>,
}

impl Dispatcher {
    /// Crea el dispatcher y el emisor que el sink usará para señalar el fin.
    pub fn new(control: Arc<dyn PlaybackControl>) -> (Self, CompletionSender) {
        let (tx, finished) = oneshot::channel();
        (Self { control, finished }, tx)
    }

    pub fn control(&self) -> Arc<dyn PlaybackControl> {
        self.control.clone()
    }

    /// Espera el fin del track. Un emisor descartado sin señal cuenta como fin normal.
    pub async fn finished(self) -> AudioResult<()> {
        match self.finished.await {
            Ok(result) => result,
            Err(_) => Ok(()),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

/// Convierte cualquier error del transporte en [`AudioError::Sink`].
pub fn sink_error(error: impl std::fmt::Display) -> AudioError {
    AudioError::Sink(error.to_string())
}
