use anyhow::Context;
use async_trait::async_trait;
use futures::TryStreamExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::{path::Path, sync::Arc};
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};
use url::Url;

use super::AudioStream;
use crate::error::{AudioError, AudioResult};

/// Regla de pronunciación: `grapheme` se lee como `alias`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LexiconEntry {
    pub grapheme: String,
    pub alias: String,
}

/// Léxico de pronunciación aplicado antes de sintetizar.
///
/// El caché de voz se indexa por el texto crudo, así que cualquier cambio del
/// léxico invalida el namespace completo (ver [`Lexicon::fingerprint`]).
#[derive(Debug, Clone, Default)]
pub struct Lexicon {
    entries: Vec<LexiconEntry>,
    rules: Vec<(Regex, String)>,
}

impl Lexicon {
    pub fn new(entries: Vec<LexiconEntry>) -> Self {
        let rules = entries
            .iter()
            .filter(|entry| !entry.grapheme.is_empty())
            .filter_map(|entry| match Regex::new(&word_pattern(&entry.grapheme)) {
                Ok(regex) => Some((regex, entry.alias.clone())),
                Err(e) => {
                    warn!("⚠️ Regla de léxico ignorada '{}': {}", entry.grapheme, e);
                    None
                }
            })
            .collect();

        Self { entries, rules }
    }

    /// Carga un léxico desde un archivo JSON con una lista de entradas.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("no se pudo leer el léxico {}", path.display()))?;
        let entries: Vec<LexiconEntry> =
            serde_json::from_str(&raw).context("léxico con formato inválido")?;

        info!("📖 Léxico cargado: {} entradas", entries.len());
        Ok(Self::new(entries))
    }

    #[cfg(test)]
    pub fn entries(&self) -> &[LexiconEntry] {
        &self.entries
    }

    /// Sustituye cada grafema (palabra completa) por su alias.
    pub fn apply(&self, text: &str) -> String {
        self.rules
            .iter()
            .fold(text.to_string(), |acc, (regex, alias)| {
                regex.replace_all(&acc, regex::NoExpand(alias)).into_owned()
            })
    }

    /// Huella SHA-1 del contenido del léxico.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(&self.entries).unwrap_or_default();
        format!("{:x}", Sha1::digest(&canonical))
    }
}

/// `\b` sólo en los bordes que son caracteres de palabra.
fn word_pattern(grapheme: &str) -> String {
    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');
    let start = if is_word(grapheme.chars().next()) { r"\b" } else { "" };
    let end = if is_word(grapheme.chars().last()) { r"\b" } else { "" };
    format!("{}{}{}", start, regex::escape(grapheme), end)
}

/// Proveedor de texto a voz.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    async fn synthesize(&self, text: &str, lexicon: &Lexicon) -> AudioResult<AudioStream>;
}

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    voice: &'a str,
}

/// Proveedor HTTP: `POST {text, voice}` y el cuerpo de la respuesta es el audio.
#[derive(Debug, Clone)]
pub struct HttpSpeechProvider {
    http: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
    voice: String,
}

impl HttpSpeechProvider {
    pub fn new(http: reqwest::Client, endpoint: Url, api_key: Option<String>, voice: String) -> Self {
        Self {
            http,
            endpoint,
            api_key,
            voice,
        }
    }
}

#[async_trait]
impl SpeechProvider for HttpSpeechProvider {
    async fn synthesize(&self, text: &str, lexicon: &Lexicon) -> AudioResult<AudioStream> {
        let prepared = lexicon.apply(text);
        debug!("🗣️ Sintetizando {} caracteres con voz {}", prepared.len(), self.voice);

        let mut request = self.http.post(self.endpoint.clone()).json(&SynthesisRequest {
            text: &prepared,
            voice: &self.voice,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| AudioError::Synthesis(e.to_string()))?;

        let body = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::new(StreamReader::new(Box::pin(body))))
    }
}

/// Síntesis con el léxico fijo del bot.
#[derive(Clone)]
pub struct SpeechSource {
    provider: Arc<dyn SpeechProvider>,
    lexicon: Arc<Lexicon>,
}

impl SpeechSource {
    pub fn new(provider: Arc<dyn SpeechProvider>, lexicon: Arc<Lexicon>) -> Self {
        Self { provider, lexicon }
    }

    pub async fn synthesize(&self, text: &str) -> AudioResult<AudioStream> {
        self.provider
            .synthesize(text, &self.lexicon)
            .await
            .map_err(|e| match e {
                AudioError::Synthesis(_) => e,
                other => AudioError::Synthesis(other.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(grapheme: &str, alias: &str) -> LexiconEntry {
        LexiconEntry {
            grapheme: grapheme.into(),
            alias: alias.into(),
        }
    }

    #[test]
    fn replaces_whole_words_only() {
        let lexicon = Lexicon::new(vec![entry("gg", "good game"), entry("C++", "C plus plus")]);

        assert_eq!(lexicon.apply("gg everyone"), "good game everyone");
        assert_eq!(lexicon.apply("eggs"), "eggs");
        assert_eq!(lexicon.apply("I write C++ daily"), "I write C plus plus daily");
    }

    #[test]
    fn alias_is_not_a_replacement_template() {
        let lexicon = Lexicon::new(vec![entry("usd", "$1 dollars")]);
        assert_eq!(lexicon.apply("5 usd"), "5 $1 dollars");
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = Lexicon::new(vec![entry("gg", "good game")]);
        let b = Lexicon::new(vec![entry("gg", "good game")]);
        let c = Lexicon::new(vec![entry("gg", "get good")]);

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_ne!(a.fingerprint(), Lexicon::default().fingerprint());
    }

    #[tokio::test]
    async fn loads_json_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lexicon.json");
        tokio::fs::write(&path, r#"[{"grapheme": "brb", "alias": "be right back"}]"#)
            .await
            .unwrap();

        let lexicon = Lexicon::load(&path).await.unwrap();
        assert_eq!(lexicon.entries(), &[entry("brb", "be right back")]);
        assert_eq!(lexicon.apply("brb"), "be right back");
    }

    #[tokio::test]
    async fn provider_failures_become_synthesis_errors() {
        let mut provider = MockSpeechProvider::new();
        provider
            .expect_synthesize()
            .times(1)
            .returning(|_, _| Err(AudioError::Sink("timeout".into())));

        let speech = SpeechSource::new(Arc::new(provider), Arc::new(Lexicon::default()));
        let result = speech.synthesize("hola").await;
        assert!(matches!(result, Err(AudioError::Synthesis(msg)) if msg.contains("timeout")));
    }

    #[tokio::test]
    async fn provider_receives_the_lexicon() {
        let mut provider = MockSpeechProvider::new();
        provider
            .expect_synthesize()
            .withf(|text, lexicon| text.to_string() == "gg" && lexicon.entries().len() == 1)
            .times(1)
            .returning(|_, _| Ok(Box::new(std::io::Cursor::new(b"audio".to_vec()))));

        let lexicon = Arc::new(Lexicon::new(vec![entry("gg", "good game")]));
        let speech = SpeechSource::new(Arc::new(provider), lexicon);
        assert!(speech.synthesize("gg").await.is_ok());
    }
}
