//! # Audio Module
//!
//! Sequential playback core of the herald bot.
//!
//! Jobs (speech, local sounds, remote audio) are queued by any number of producers
//! and played back-to-back on a single voice connection:
//!
//! ### [`player`] - Scheduler
//! - Owns the queue inside a single actor task (no shared mutable state)
//! - Drives every job through resolve → cache → transcode → play
//! - Exposes pause/resume/skip/stop
//!
//! ### [`queue`] - Jobs
//! - Job, target and source descriptors
//! - Strict FIFO pending queue
//!
//! ### [`sink`] - Output seam
//! - Traits the chat adapter implements to provide a voice connection
//!
//! ### [`transcoder`] - PCM conversion
//! - Any input format to s16le / 48 kHz / stereo through `ffmpeg`
//!
//! ## Audio Format
//!
//! - **Sample Rate**: 48kHz (Discord standard)
//! - **Bit Depth**: 16-bit signed little-endian
//! - **Channels**: Stereo (2 channels)
//! - **Buffer**: 20 frames of 1920 samples per channel pair (76800 bytes)

pub mod player;
pub mod queue;
pub mod sink;
pub mod transcoder;

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use tokio::io::{AsyncRead, DuplexStream, ReadBuf};

pub const FREQUENCY: u32 = 48_000;
pub const FRAME_SIZE: usize = 1920;
pub const CHANNELS: usize = 2;
pub const FRAMES: usize = 20;
/// Tamaño del buffer con backpressure entre decodificación y consumo.
pub const WATER_MARK: usize = FRAME_SIZE * CHANNELS * FRAMES;

/// Stream PCM s16le / 48kHz / estéreo listo para el sink.
///
/// Siempre está respaldado por un buffer acotado a [`WATER_MARK`] bytes, de modo
/// que el productor se bloquea cuando el consumidor va atrasado.
#[derive(Debug)]
pub struct PcmStream {
    inner: DuplexStream,
}

impl PcmStream {
    /// Crea un par (escritor, stream) unido por un buffer de [`WATER_MARK`] bytes.
    pub fn channel() -> (DuplexStream, PcmStream) {
        let (writer, reader) = tokio::io::duplex(WATER_MARK);
        (writer, PcmStream { inner: reader })
    }
}

impl AsyncRead for PcmStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}
