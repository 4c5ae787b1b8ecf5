//! Songbird implementation of the playback output traits.
//!
//! [`DiscordVoice`] stays "not ready" until the gateway `ready` event installs the
//! songbird manager and the serenity cache. PCM produced by the transcoder is fed to
//! songbird through its raw adapter, which expects interleaved `f32` samples.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serenity::{
    all::{ChannelId, ChannelType, GuildId},
    cache::Cache,
};
use songbird::{
    input::{Input, RawAdapter},
    tracks::TrackHandle,
    Call, Event, Songbird, TrackEvent,
};
use std::{
    io::{self, Read, Seek, SeekFrom},
    sync::Arc,
};
use symphonia::core::io::MediaSource;
use tokio_util::io::SyncIoBridge;
use tracing::{debug, info, warn};

use super::events::TrackCompletion;
use crate::{
    audio::{
        queue::Target,
        sink::{sink_error, Dispatcher, PlaybackControl, VoiceConnector, VoiceSink},
        PcmStream, CHANNELS, FREQUENCY,
    },
    error::{AudioError, AudioResult},
};

/// Piezas del cliente de Discord disponibles tras `ready`.
#[derive(Clone)]
pub struct VoiceContext {
    pub songbird: Arc<Songbird>,
    pub cache: Arc<Cache>,
}

/// Conector de voz sobre songbird.
#[derive(Default)]
pub struct DiscordVoice {
    context: RwLock<Option<VoiceContext>>,
}

impl DiscordVoice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, context: VoiceContext) {
        *self.context.write() = Some(context);
        info!("🔊 Conector de voz listo");
    }

    fn context(&self) -> Option<VoiceContext> {
        self.context.read().clone()
    }
}

/// IDs de Discord del destino; `None` si alguno es 0.
fn discord_ids(target: &Target) -> Option<(GuildId, ChannelId)> {
    if target.guild_id == 0 || target.channel_id == 0 {
        return None;
    }
    Some((GuildId::new(target.guild_id), ChannelId::new(target.channel_id)))
}

#[async_trait]
impl VoiceConnector for DiscordVoice {
    fn is_ready(&self) -> bool {
        self.context.read().is_some()
    }

    async fn target_available(&self, target: &Target) -> bool {
        let (Some(context), Some((guild_id, channel_id))) = (self.context(), discord_ids(target))
        else {
            return false;
        };

        let available = context.cache.guild(guild_id).is_some_and(|guild| {
            guild
                .channels
                .get(&channel_id)
                .is_some_and(|channel| matches!(channel.kind, ChannelType::Voice | ChannelType::Stage))
        });

        if !available {
            debug!("Canal {} ya no existe", target);
        }
        available
    }

    async fn connect(&self, target: &Target) -> AudioResult<Arc<dyn VoiceSink>> {
        let context = self
            .context()
            .ok_or_else(|| sink_error("conector de voz no inicializado"))?;
        let (guild_id, channel_id) = discord_ids(target).ok_or(AudioError::InvalidTarget)?;

        if let Some(call) = context.songbird.get(guild_id) {
            let current = call.lock().await.current_channel();
            if current == Some(channel_id.into()) {
                debug!("♻️ Reutilizando conexión de voz en {}", target);
                return Ok(Arc::new(SongbirdSink { call }));
            }
        }

        let call = context
            .songbird
            .join(guild_id, channel_id)
            .await
            .map_err(sink_error)?;
        info!("🔊 Conectado al canal de voz {}", target);

        Ok(Arc::new(SongbirdSink { call }))
    }
}

/// Conexión de voz activa de un guild.
pub struct SongbirdSink {
    call: Arc<tokio::sync::Mutex<Call>>,
}

#[async_trait]
impl VoiceSink for SongbirdSink {
    async fn play_pcm(&self, pcm: PcmStream) -> AudioResult<Dispatcher> {
        let source = PcmMediaSource::new(SyncIoBridge::new(pcm));
        let input: Input = RawAdapter::new(source, FREQUENCY, CHANNELS as u32).into();

        let handle = self.call.lock().await.play_input(input);
        let (dispatcher, done) = Dispatcher::new(Arc::new(TrackControl {
            handle: handle.clone(),
        }));

        let done = Arc::new(Mutex::new(Some(done)));
        for (event, failed) in [(TrackEvent::End, false), (TrackEvent::Error, true)] {
            let completion = TrackCompletion::new(done.clone(), failed);
            if let Err(e) = handle.add_event(Event::Track(event), completion) {
                // El track ya terminó antes de registrar el evento
                debug!("Track {} finalizado antes de registrar eventos: {}", handle.uuid(), e);
                TrackCompletion::new(done.clone(), false).complete(None);
            }
        }

        Ok(dispatcher)
    }
}

/// Controles de transporte sobre un `TrackHandle`.
pub struct TrackControl {
    handle: TrackHandle,
}

impl PlaybackControl for TrackControl {
    fn pause(&self) -> AudioResult<()> {
        self.handle.pause().map_err(sink_error)
    }

    fn resume(&self) -> AudioResult<()> {
        self.handle.play().map_err(sink_error)
    }

    fn end(&self) -> AudioResult<()> {
        self.handle.stop().map_err(sink_error)
    }
}

/// Adapta PCM s16le a las muestras `f32` que espera el adaptador raw de songbird.
///
/// Sin soporte de seek: el stream es en vivo.
pub struct PcmMediaSource<R> {
    inner: R,
    scratch: Vec<u8>,
    carry: Option<u8>,
}

impl<R: Read> PcmMediaSource<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            scratch: Vec::new(),
            carry: None,
        }
    }
}

impl<R: Read> Read for PcmMediaSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let samples = buf.len() / 4;
        if samples == 0 {
            return Ok(0);
        }

        self.scratch.resize(samples * 2, 0);
        let mut filled = 0;
        if let Some(byte) = self.carry.take() {
            self.scratch[0] = byte;
            filled = 1;
        }

        while filled < 2 {
            let read = self.inner.read(&mut self.scratch[filled..])?;
            if read == 0 {
                if filled == 1 {
                    warn!("PCM truncado: byte suelto al final del stream");
                }
                return Ok(0);
            }
            filled += read;
        }

        let whole = filled & !1;
        if filled != whole {
            self.carry = Some(self.scratch[whole]);
        }

        for (i, pair) in self.scratch[..whole].chunks_exact(2).enumerate() {
            let sample = f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0;
            buf[i * 4..i * 4 + 4].copy_from_slice(&sample.to_le_bytes());
        }

        Ok(whole * 2)
    }
}

impl<R> Seek for PcmMediaSource<R> {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "stream PCM en vivo"))
    }
}

impl<R: Read + Send + Sync> MediaSource for PcmMediaSource<R> {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn read_samples(source: &mut impl Read, buf_len: usize) -> Vec<f32> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; buf_len];
        loop {
            let n = source.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            assert_eq!(n % 4, 0);
            out.extend(
                buf[..n]
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            );
        }
        out
    }

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn converts_s16le_to_f32() {
        let mut source = PcmMediaSource::new(Cursor::new(pcm(&[0, i16::MIN, 16384, -16384])));
        assert_eq!(read_samples(&mut source, 64), vec![0.0, -1.0, 0.5, -0.5]);
    }

    /// Lector que entrega un byte por llamada.
    struct Trickle(Cursor<Vec<u8>>);

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let len = buf.len().min(1);
            self.0.read(&mut buf[..len])
        }
    }

    #[test]
    fn odd_reads_keep_sample_alignment() {
        let bytes = pcm(&[1000, -1000, 32767]);
        let mut source = PcmMediaSource::new(Trickle(Cursor::new(bytes)));
        let expected: Vec<f32> = [1000i16, -1000, 32767]
            .iter()
            .map(|s| f32::from(*s) / 32768.0)
            .collect();
        assert_eq!(read_samples(&mut source, 12), expected);
    }

    #[test]
    fn is_not_seekable() {
        let mut source = PcmMediaSource::new(Cursor::new(Vec::<u8>::new()));
        assert!(!source.is_seekable());
        assert_eq!(source.byte_len(), None);
        assert!(source.seek(SeekFrom::Start(0)).is_err());
    }

    #[test]
    fn zero_ids_are_not_discord_targets() {
        assert!(discord_ids(&Target::new(0, 5)).is_none());
        assert!(discord_ids(&Target::new(1, 5)).is_some());
    }

    #[tokio::test]
    async fn uninstalled_connector_is_not_ready() {
        let voice = DiscordVoice::new();
        assert!(!voice.is_ready());
        assert!(!voice.target_available(&Target::new(1, 2)).await);
        assert!(voice.connect(&Target::new(1, 2)).await.is_err());
    }
}
