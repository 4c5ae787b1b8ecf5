use sha1::{Digest, Sha1};
use std::{
    future::Future,
    io,
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt, BufWriter, DuplexStream},
};
use tracing::{debug, info, warn};

use super::Namespace;
use crate::{audio::WATER_MARK, error::AudioResult, sources::AudioStream};

const TEE_CHUNK: usize = 16 * 1024;
const FINGERPRINT_FILE: &str = ".fingerprint";

/// Caché de streams en disco, direccionado por contenido.
#[derive(Debug, Clone)]
pub struct StreamCache {
    root: PathBuf,
}

impl StreamCache {
    /// Abre el caché en `root` creando los directorios de cada namespace.
    pub async fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        for namespace in Namespace::ALL {
            fs::create_dir_all(root.join(namespace.as_str())).await?;
        }
        info!("💾 Caché de audio en: {}", root.display());
        Ok(Self { root })
    }

    /// SHA-1 en hexadecimal del identificador.
    pub fn digest(identifier: &str) -> String {
        format!("{:x}", Sha1::digest(identifier.as_bytes()))
    }

    pub fn namespace_dir(&self, namespace: Namespace) -> PathBuf {
        self.root.join(namespace.as_str())
    }

    #[cfg(test)]
    pub fn entry_path(&self, namespace: Namespace, identifier: &str) -> PathBuf {
        self.namespace_dir(namespace).join(Self::digest(identifier))
    }

    /// Devuelve el stream cacheado o, si no existe, el del productor mientras se
    /// guarda una copia.
    ///
    /// En un miss la lectura del productor se reparte entre el consumidor y un
    /// archivo parcial; al terminar el upstream el archivo se renombra de forma
    /// atómica a su ruta definitiva antes de que el consumidor vea EOF. Si el
    /// upstream falla o el consumidor abandona el stream, el parcial se descarta.
    pub async fn cache_stream<F, Fut>(
        &self,
        namespace: Namespace,
        identifier: &str,
        producer: F,
    ) -> AudioResult<AudioStream>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AudioResult<AudioStream>>,
    {
        let digest = Self::digest(identifier);
        let path = self.namespace_dir(namespace).join(&digest);

        match File::open(&path).await {
            Ok(file) => {
                info!("💾 Reproduciendo desde caché: {}/{}", namespace, digest);
                return Ok(Box::new(file));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        info!("📥 Cacheando {}/{}", namespace, digest);
        let upstream = producer().await?;

        let partial = self
            .namespace_dir(namespace)
            .join(format!(".{}.{:016x}.partial", digest, fastrand::u64(..)));
        let entry = match File::create(&partial).await {
            Ok(file) => Some(PendingEntry {
                writer: BufWriter::new(file),
                partial,
                path,
            }),
            Err(e) => {
                warn!("⚠️ No se pudo crear la entrada de caché, se reproduce sin cachear: {}", e);
                None
            }
        };

        let (consumer, reader) = tokio::io::duplex(WATER_MARK);
        tokio::spawn(tee(upstream, entry, consumer));

        Ok(Box::new(reader))
    }

    /// Borra todas las entradas de un namespace y lo deja vacío.
    pub async fn invalidate(&self, namespace: Namespace) -> io::Result<()> {
        let dir = self.namespace_dir(namespace);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        fs::create_dir_all(&dir).await?;
        info!("🧹 Caché '{}' invalidado", namespace);
        Ok(())
    }

    /// Invalida el namespace si su huella guardada difiere de `fingerprint`.
    ///
    /// Devuelve `true` cuando hubo invalidación.
    pub async fn sync_fingerprint(&self, namespace: Namespace, fingerprint: &str) -> io::Result<bool> {
        let marker = self.namespace_dir(namespace).join(FINGERPRINT_FILE);
        let stored = match fs::read_to_string(&marker).await {
            Ok(stored) => Some(stored),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };

        if stored.as_deref().map(str::trim) == Some(fingerprint) {
            debug!("Huella de '{}' sin cambios", namespace);
            return Ok(false);
        }

        info!("🔄 La huella de '{}' cambió, invalidando entradas", namespace);
        self.invalidate(namespace).await?;
        fs::write(&marker, fingerprint).await?;
        Ok(true)
    }

    /// Número de entradas confirmadas (sin parciales ni archivos ocultos).
    pub async fn entry_count(&self, namespace: Namespace) -> io::Result<usize> {
        let mut entries = fs::read_dir(self.namespace_dir(namespace)).await?;
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if !hidden && entry.file_type().await?.is_file() {
                count += 1;
            }
        }
        Ok(count)
    }
}

/// Entrada en escritura; sólo se vuelve visible al confirmarse.
struct PendingEntry {
    writer: BufWriter<File>,
    partial: PathBuf,
    path: PathBuf,
}

impl PendingEntry {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.writer.write_all(chunk).await
    }

    async fn commit(mut self) {
        let result = async {
            self.writer.flush().await?;
            self.writer.get_mut().sync_all().await?;
            fs::rename(&self.partial, &self.path).await
        }
        .await;

        match result {
            Ok(()) => debug!("💾 Entrada confirmada: {}", self.path.display()),
            Err(e) => {
                warn!("⚠️ No se pudo confirmar {}: {}", self.path.display(), e);
                remove_quietly(&self.partial).await;
            }
        }
    }

    async fn discard(self) {
        drop(self.writer);
        remove_quietly(&self.partial).await;
        debug!("🗑️ Entrada parcial descartada: {}", self.partial.display());
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("⚠️ No se pudo borrar {}: {}", path.display(), e);
        }
    }
}

/// Lee una vez del upstream y escribe en el caché y en el consumidor.
///
/// Las escrituras son secuenciales, así que el lado más lento marca el ritmo.
async fn tee(mut upstream: AudioStream, mut entry: Option<PendingEntry>, mut consumer: DuplexStream) {
    let mut buf = vec![0u8; TEE_CHUNK];

    loop {
        let n = match upstream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("⚠️ El upstream falló durante el cacheo: {}", e);
                if let Some(pending) = entry.take() {
                    pending.discard().await;
                }
                return;
            }
        };

        let cache_failure = match entry.as_mut() {
            Some(pending) => pending.write(&buf[..n]).await.err(),
            None => None,
        };
        if let Some(e) = cache_failure {
            warn!("⚠️ Escritura de caché fallida, se continúa sin cachear: {}", e);
            if let Some(pending) = entry.take() {
                pending.discard().await;
            }
        }

        if let Err(e) = consumer.write_all(&buf[..n]).await {
            debug!("El consumidor abandonó el stream: {}", e);
            if let Some(pending) = entry.take() {
                pending.discard().await;
            }
            return;
        }
    }

    if let Some(pending) = entry.take() {
        pending.commit().await;
    }
    let _ = consumer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AudioError;
    use pretty_assertions::assert_eq;
    use std::{
        io::Cursor,
        pin::Pin,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        task::{Context, Poll},
        time::Duration,
    };
    use tokio::io::{AsyncRead, ReadBuf};

    fn bytes_stream(data: &[u8]) -> AudioStream {
        Box::new(Cursor::new(data.to_vec()))
    }

    async fn read_all(mut stream: AudioStream) -> Vec<u8> {
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        out
    }

    async fn partial_files(dir: &Path) -> usize {
        let mut entries = fs::read_dir(dir).await.unwrap();
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await.unwrap() {
            if entry.file_name().to_string_lossy().ends_with(".partial") {
                count += 1;
            }
        }
        count
    }

    async fn wait_for_no_partials(dir: &Path) {
        for _ in 0..200 {
            if partial_files(dir).await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("quedaron archivos parciales en {}", dir.display());
    }

    /// Entrega unos bytes y luego falla.
    struct FailingReader {
        sent: bool,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.sent {
                Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")))
            } else {
                self.sent = true;
                buf.put_slice(b"half");
                Poll::Ready(Ok(()))
            }
        }
    }

    #[test]
    fn digest_is_sha1_hex() {
        assert_eq!(
            StreamCache::digest("abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[tokio::test]
    async fn namespaces_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let cache = StreamCache::open(dir.path()).await.unwrap();

        let speech = cache.entry_path(Namespace::Speech, "same");
        let url = cache.entry_path(Namespace::Url, "same");
        assert_ne!(speech, url);
        assert_eq!(speech.file_name(), url.file_name());
    }

    #[tokio::test]
    async fn second_call_is_a_pure_cache_hit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = StreamCache::open(dir.path()).await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let produce = |calls: Arc<AtomicUsize>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(bytes_stream(b"synthesized audio"))
            }
        };

        let first = cache
            .cache_stream(Namespace::Speech, "hola", produce(calls.clone()))
            .await
            .unwrap();
        let first = read_all(first).await;

        let second = cache
            .cache_stream(Namespace::Speech, "hola", produce(calls.clone()))
            .await
            .unwrap();
        let second = read_all(second).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, b"synthesized audio".to_vec());
        assert_eq!(first, second);
        assert_eq!(cache.entry_count(Namespace::Speech).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn large_stream_passes_through_backpressure() {
        let dir = tempfile::tempdir().unwrap();
        let cache = StreamCache::open(dir.path()).await.unwrap();
        let data: Vec<u8> = (0..WATER_MARK * 3).map(|i| (i % 251) as u8).collect();
        let upstream = data.clone();

        let stream = cache
            .cache_stream(Namespace::Url, "https://example.com/a.ogg", move || async move {
                Ok::<AudioStream, AudioError>(Box::new(Cursor::new(upstream)))
            })
            .await
            .unwrap();

        assert_eq!(read_all(stream).await, data);
        let cached = fs::read(cache.entry_path(Namespace::Url, "https://example.com/a.ogg"))
            .await
            .unwrap();
        assert_eq!(cached, data);
    }

    #[tokio::test]
    async fn producer_error_propagates_and_caches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = StreamCache::open(dir.path()).await.unwrap();

        let result = cache
            .cache_stream(Namespace::Speech, "roto", || async {
                Err(AudioError::Synthesis("proveedor caído".into()))
            })
            .await;

        assert!(matches!(result, Err(AudioError::Synthesis(_))));
        assert_eq!(cache.entry_count(Namespace::Speech).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_upstream_leaves_no_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = StreamCache::open(dir.path()).await.unwrap();

        let stream = cache
            .cache_stream(Namespace::Url, "https://example.com/flaky", || async {
                Ok::<AudioStream, AudioError>(Box::new(FailingReader { sent: false }))
            })
            .await
            .unwrap();

        assert_eq!(read_all(stream).await, b"half".to_vec());
        wait_for_no_partials(&cache.namespace_dir(Namespace::Url)).await;
        assert!(!cache.entry_path(Namespace::Url, "https://example.com/flaky").exists());
    }

    #[tokio::test]
    async fn abandoned_consumer_discards_partial_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = StreamCache::open(dir.path()).await.unwrap();
        let data = vec![7u8; WATER_MARK * 4];

        let mut stream = cache
            .cache_stream(Namespace::Url, "https://example.com/long", move || async move {
                Ok::<AudioStream, AudioError>(Box::new(Cursor::new(data)))
            })
            .await
            .unwrap();

        let mut head = [0u8; 1024];
        stream.read_exact(&mut head).await.unwrap();
        drop(stream);

        wait_for_no_partials(&cache.namespace_dir(Namespace::Url)).await;
        assert_eq!(cache.entry_count(Namespace::Url).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn invalidate_empties_only_that_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let cache = StreamCache::open(dir.path()).await.unwrap();

        for (namespace, id) in [(Namespace::Speech, "uno"), (Namespace::Url, "dos")] {
            let stream = cache
                .cache_stream(namespace, id, || async { Ok(bytes_stream(b"x")) })
                .await
                .unwrap();
            read_all(stream).await;
        }

        cache.invalidate(Namespace::Speech).await.unwrap();

        assert!(cache.namespace_dir(Namespace::Speech).is_dir());
        assert_eq!(cache.entry_count(Namespace::Speech).await.unwrap(), 0);
        assert_eq!(cache.entry_count(Namespace::Url).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn fingerprint_change_invalidates_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let cache = StreamCache::open(dir.path()).await.unwrap();

        assert!(cache.sync_fingerprint(Namespace::Speech, "v1").await.unwrap());

        let stream = cache
            .cache_stream(Namespace::Speech, "hola", || async { Ok(bytes_stream(b"x")) })
            .await
            .unwrap();
        read_all(stream).await;

        assert!(!cache.sync_fingerprint(Namespace::Speech, "v1").await.unwrap());
        assert_eq!(cache.entry_count(Namespace::Speech).await.unwrap(), 1);

        assert!(cache.sync_fingerprint(Namespace::Speech, "v2").await.unwrap());
        assert_eq!(cache.entry_count(Namespace::Speech).await.unwrap(), 0);
    }
}
