use async_trait::async_trait;
use futures::TryStreamExt;
use std::{path::PathBuf, process::Stdio, sync::Arc};
use tokio::process::Command;
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};
use url::Url;

use super::AudioStream;
use crate::error::{AudioError, AudioResult};

/// Resultado de resolver una URL arbitraria a un stream de audio directo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMedia {
    pub title: String,
    pub stream_url: String,
}

/// Resolvedor externo de medios (título + URL directa del mejor audio).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> AudioResult<RemoteMedia>;
}

/// Resolvedor basado en `yt-dlp`.
#[derive(Debug, Clone)]
pub struct YtDlpResolver {
    binary: PathBuf,
}

impl YtDlpResolver {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn args(url: &str) -> Vec<String> {
        vec![
            "--get-title".into(),
            "--get-url".into(),
            "--format".into(),
            "bestaudio".into(),
            "--no-playlist".into(),
            "--no-warnings".into(),
            url.into(),
        ]
    }

    /// Espera exactamente dos campos separados por salto de línea: título y URL.
    pub fn parse_output(stdout: &str) -> AudioResult<RemoteMedia> {
        let fields: Vec<&str> = stdout.trim().lines().map(str::trim).collect();

        match fields.as_slice() {
            [title, stream_url] if !title.is_empty() && !stream_url.is_empty() => {
                Url::parse(stream_url).map_err(|e| {
                    AudioError::Resolution(format!("URL de stream inválida '{}': {}", stream_url, e))
                })?;
                Ok(RemoteMedia {
                    title: title.to_string(),
                    stream_url: stream_url.to_string(),
                })
            }
            _ => Err(AudioError::Resolution(format!(
                "salida inesperada de yt-dlp ({} campos)",
                fields.len()
            ))),
        }
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    async fn resolve(&self, url: &str) -> AudioResult<RemoteMedia> {
        debug!("🔍 Resolviendo audio remoto: {}", url);

        let output = Command::new(&self.binary)
            .args(Self::args(url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| AudioError::Resolution(format!("no se pudo ejecutar yt-dlp: {}", e)))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            warn!("❌ yt-dlp falló para {}: {}", url, error.trim());
            return Err(AudioError::Resolution(format!("yt-dlp error: {}", error.trim())));
        }

        Self::parse_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Audio remoto: resolución externa seguida de un GET en streaming.
#[derive(Clone)]
pub struct RemoteSource {
    resolver: Arc<dyn MediaResolver>,
    http: reqwest::Client,
}

impl RemoteSource {
    pub fn new(resolver: Arc<dyn MediaResolver>, http: reqwest::Client) -> Self {
        Self { resolver, http }
    }

    pub async fn open(&self, url: &str) -> AudioResult<AudioStream> {
        let media = self.resolver.resolve(url).await?;
        info!("🎵 Remoto: {} ({})", media.title, url);

        let response = self
            .http
            .get(&media.stream_url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| AudioError::Resolution(format!("GET {} falló: {}", media.title, e)))?;

        let body = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::new(StreamReader::new(Box::pin(body))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_title_and_url() {
        let media = YtDlpResolver::parse_output(
            "Never Gonna Give You Up\nhttps://rr1.example.com/videoplayback?id=1\n",
        )
        .unwrap();
        assert_eq!(
            media,
            RemoteMedia {
                title: "Never Gonna Give You Up".into(),
                stream_url: "https://rr1.example.com/videoplayback?id=1".into(),
            }
        );
    }

    #[test]
    fn rejects_wrong_field_count() {
        for output in ["", "solo título", "a\nhttps://x.example\nextra"] {
            let result = YtDlpResolver::parse_output(output);
            assert!(matches!(result, Err(AudioError::Resolution(_))), "{:?}", output);
        }
    }

    #[test]
    fn rejects_unparseable_stream_url() {
        let result = YtDlpResolver::parse_output("Título\nno es una url");
        assert!(matches!(result, Err(AudioError::Resolution(_))));
    }

    #[test]
    fn asks_for_best_audio() {
        let args = YtDlpResolver::args("https://youtu.be/x");
        assert_eq!(&args[..4], &["--get-title", "--get-url", "--format", "bestaudio"]);
        assert_eq!(args.last().map(String::as_str), Some("https://youtu.be/x"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_resolution_error() {
        let resolver = YtDlpResolver::new("/nonexistent/yt-dlp-binary");
        let result = resolver.resolve("https://example.com").await;
        assert!(matches!(result, Err(AudioError::Resolution(_))));
    }

    #[tokio::test]
    async fn resolver_failure_stops_before_http() {
        let mut resolver = MockMediaResolver::new();
        resolver
            .expect_resolve()
            .times(1)
            .returning(|_| Err(AudioError::Resolution("sin formatos".into())));

        let remote = RemoteSource::new(Arc::new(resolver), reqwest::Client::new());
        let result = remote.open("https://example.com/video").await;
        assert!(matches!(result, Err(AudioError::Resolution(msg)) if msg == "sin formatos"));
    }
}
