use std::{path::PathBuf, process::Stdio};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    process::Command,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{PcmStream, CHANNELS, FREQUENCY};
use crate::{
    error::{AudioError, AudioResult},
    sources::AudioStream,
};

/// Convierte un stream de audio arbitrario a PCM s16le / 48kHz / estéreo.
pub trait Transcoder: Send + Sync {
    fn to_pcm(&self, input: AudioStream) -> AudioResult<PcmStream>;
}

/// Transcodificador basado en un proceso `ffmpeg`.
///
/// El stream de entrada se escribe en el stdin del proceso y su stdout se bombea
/// al buffer acotado del [`PcmStream`]. Si el consumidor abandona el stream el
/// proceso se mata en cuanto falla la escritura y la entrada se suelta.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    binary: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Argumentos de la invocación: entrada por stdin, PCM crudo por stdout.
    pub fn args() -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            "pipe:0".into(),
            "-f".into(),
            "s16le".into(),
            "-ar".into(),
            FREQUENCY.to_string(),
            "-ac".into(),
            CHANNELS.to_string(),
            "pipe:1".into(),
        ]
    }

    pub fn command_line(&self) -> String {
        let mut parts = vec![self.binary.display().to_string()];
        parts.extend(Self::args());
        parts.join(" ")
    }
}

impl Transcoder for FfmpegTranscoder {
    fn to_pcm(&self, mut input: AudioStream) -> AudioResult<PcmStream> {
        let command_line = self.command_line();

        let mut child = Command::new(&self.binary)
            .args(Self::args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                warn!("[ffmpeg]: no se pudo iniciar `{}`: {}", command_line, e);
                AudioError::Transcode(format!("no se pudo iniciar ffmpeg: {}", e))
            })?;

        info!(command = %command_line, "[ffmpeg]: transcode start");

        let (mut stdin, mut stdout, mut stderr) =
            match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
                (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
                _ => return Err(AudioError::Transcode("pipes de ffmpeg no disponibles".into())),
            };

        // Se cancela cuando ffmpeg ya no necesita la entrada
        let release_input = CancellationToken::new();

        // Alimentar ffmpeg con la entrada
        let feeder_release = release_input.clone();
        tokio::spawn(async move {
            tokio::select! {
                copied = tokio::io::copy(&mut input, &mut stdin) => match copied {
                    Ok(bytes) => debug!("[ffmpeg]: {} bytes de entrada enviados", bytes),
                    Err(e) => debug!("[ffmpeg]: entrada interrumpida: {}", e),
                },
                _ = feeder_release.cancelled() => {
                    debug!("[ffmpeg]: entrada soltada");
                    return;
                }
            }
            let _ = stdin.shutdown().await;
        });

        // stderr en su propia tarea para no bloquear el bombeo
        let diagnostics = tokio::spawn(async move {
            let mut text = String::new();
            if let Err(e) = stderr.read_to_string(&mut text).await {
                debug!("[ffmpeg]: stderr ilegible: {}", e);
            }
            text
        });

        let (mut writer, pcm) = PcmStream::channel();

        // Bombear la salida al buffer con backpressure
        tokio::spawn(async move {
            match tokio::io::copy(&mut stdout, &mut writer).await {
                Ok(bytes) => {
                    let _ = writer.shutdown().await;
                    let status = child.wait().await;
                    release_input.cancel();
                    let diagnostics = diagnostics.await.unwrap_or_default();
                    match status {
                        Ok(status) if status.success() => {
                            info!(bytes, "[ffmpeg]: transcode end");
                        }
                        Ok(status) => {
                            warn!(
                                %status,
                                "[ffmpeg]: transcode error: {}",
                                diagnostics.trim()
                            );
                        }
                        Err(e) => warn!("[ffmpeg]: transcode error: {}", e),
                    }
                }
                Err(e) => {
                    // Consumidor abandonado (skip/stop): matar antes de esperar stderr
                    warn!("[ffmpeg]: transcode error: stream cortado: {}", e);
                    release_input.cancel();
                    drop(stdout);
                    if let Err(e) = child.kill().await {
                        debug!("[ffmpeg]: kill falló: {}", e);
                    }
                    diagnostics.abort();
                }
            }
        });

        Ok(pcm)
    }
}

/// Copia la entrada tal cual al buffer PCM; la usan las pruebas del scheduler.
#[cfg(test)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughTranscoder;

#[cfg(test)]
impl Transcoder for PassthroughTranscoder {
    fn to_pcm(&self, input: AudioStream) -> AudioResult<PcmStream> {
        let (writer, pcm) = PcmStream::channel();
        tokio::spawn(pump(input, writer));
        Ok(pcm)
    }
}

#[cfg(test)]
async fn pump(mut input: impl tokio::io::AsyncRead + Unpin, mut writer: tokio::io::DuplexStream) {
    if let Err(e) = tokio::io::copy(&mut input, &mut writer).await {
        debug!("passthrough interrumpido: {}", e);
    }
    let _ = writer.shutdown().await;
}
