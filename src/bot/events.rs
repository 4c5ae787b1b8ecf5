use parking_lot::Mutex;
use serenity::async_trait;
use songbird::{Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler};
use std::sync::Arc;
use tracing::{debug, error};

use crate::audio::sink::{sink_error, CompletionSender};

/// Handler para el fin (o error) de un track: completa la señal del dispatcher.
///
/// Los handlers de `End` y `Error` comparten el mismo emisor; el primero que
/// dispara gana y el otro queda sin efecto.
pub struct TrackCompletion {
    done: Arc<Mutex<Option<CompletionSender>>>,
    failed: bool,
}

impl TrackCompletion {
    pub fn new(done: Arc<Mutex<Option<CompletionSender>>>, failed: bool) -> Self {
        Self { done, failed }
    }

    pub fn complete(&self, detail: Option<String>) {
        let Some(tx) = self.done.lock().take() else {
            return;
        };

        let result = if self.failed {
            let detail = detail.unwrap_or_else(|| "error de track".to_string());
            error!("❌ Error en track: {}", detail);
            Err(sink_error(detail))
        } else {
            debug!("🎵 Track terminado");
            Ok(())
        };
        let _ = tx.send(result);
    }
}

#[async_trait]
impl VoiceEventHandler for TrackCompletion {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        let detail = match ctx {
            EventContext::Track(tracks) => tracks
                .first()
                .map(|(state, _handle)| format!("{:?}", state.playing)),
            _ => None,
        };
        self.complete(detail);

        Some(VoiceEvent::Cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AudioError;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn first_completion_wins() {
        let (tx, rx) = oneshot::channel();
        let done = Arc::new(Mutex::new(Some(tx)));

        TrackCompletion::new(done.clone(), true).complete(Some("Errored(decode)".into()));
        TrackCompletion::new(done, false).complete(None);

        let result = rx.await.unwrap();
        assert!(matches!(result, Err(AudioError::Sink(msg)) if msg == "Errored(decode)"));
    }

    #[tokio::test]
    async fn end_completes_ok() {
        let (tx, rx) = oneshot::channel();
        TrackCompletion::new(Arc::new(Mutex::new(Some(tx))), false).complete(None);
        assert!(rx.await.unwrap().is_ok());
    }
}
