use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, File};
use tracing::debug;

use super::AudioStream;
use crate::error::{AudioError, AudioResult};

/// Sonidos guardados en disco.
#[derive(Debug, Clone)]
pub struct LocalSounds {
    dir: PathBuf,
}

impl LocalSounds {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Un nombre sin componente de directorio se busca en el directorio de sonidos;
    /// cualquier otra ruta se usa tal cual.
    pub fn resolve_path(&self, location: &Path) -> PathBuf {
        let bare = location
            .parent()
            .map_or(true, |parent| parent.as_os_str().is_empty());

        if bare && location.is_relative() {
            self.dir.join(location)
        } else {
            location.to_path_buf()
        }
    }

    /// Ruta en el directorio de sonidos para un nombre simple; `None` si el
    /// nombre trae directorios, `..` o es absoluto.
    pub fn named(&self, name: &str) -> Option<PathBuf> {
        is_bare_name(name).then(|| self.dir.join(name))
    }

    /// Sondeo no bloqueante de existencia.
    pub async fn exists(&self, location: &Path) -> bool {
        fs::metadata(self.resolve_path(location))
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    pub async fn open(&self, location: &Path) -> AudioResult<AudioStream> {
        let path = self.resolve_path(location);
        debug!("📂 Abriendo sonido local: {}", path.display());

        match File::open(&path).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AudioError::NotFound(path)),
            Err(e) => Err(e.into()),
        }
    }
}

/// Un único componente normal: `airhorn.mp3` sí, `../x`, `a/b` o `/x` no.
pub fn is_bare_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::io::AsyncReadExt;

    #[test]
    fn bare_names_resolve_into_sounds_dir() {
        let sounds = LocalSounds::new("/srv/sounds");
        assert_eq!(
            sounds.resolve_path(Path::new("airhorn.mp3")),
            PathBuf::from("/srv/sounds/airhorn.mp3")
        );
        assert_eq!(
            sounds.resolve_path(Path::new("clips/airhorn.mp3")),
            PathBuf::from("clips/airhorn.mp3")
        );
        assert_eq!(
            sounds.resolve_path(Path::new("/tmp/airhorn.mp3")),
            PathBuf::from("/tmp/airhorn.mp3")
        );
    }

    #[test]
    fn only_bare_names_map_into_sounds_dir() {
        let sounds = LocalSounds::new("/srv/sounds");
        assert_eq!(
            sounds.named("airhorn.mp3"),
            Some(PathBuf::from("/srv/sounds/airhorn.mp3"))
        );
        assert_eq!(sounds.named("../secrets.env"), None);
        assert_eq!(sounds.named("clips/airhorn.mp3"), None);
        assert_eq!(sounds.named("/etc/passwd"), None);
        assert_eq!(sounds.named(".."), None);
        assert_eq!(sounds.named(""), None);
    }

    #[tokio::test]
    async fn opens_existing_sound() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("beep.raw"), b"beep").await.unwrap();
        let sounds = LocalSounds::new(dir.path());

        assert!(sounds.exists(Path::new("beep.raw")).await);
        let mut stream = sounds.open(Path::new("beep.raw")).await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"beep".to_vec());
    }

    #[tokio::test]
    async fn missing_sound_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let sounds = LocalSounds::new(dir.path());

        assert!(!sounds.exists(Path::new("nope.mp3")).await);
        let error = sounds.open(Path::new("nope.mp3")).await.err().unwrap();
        assert!(error.is_not_found());
        assert!(matches!(error, AudioError::NotFound(path) if path == dir.path().join("nope.mp3")));
    }
}
