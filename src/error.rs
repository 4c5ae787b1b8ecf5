use std::path::PathBuf;

use thiserror::Error;

/// Errores del núcleo de reproducción.
///
/// Cada variante corresponde a una etapa del pipeline de un job. Ninguna de ellas
/// detiene la cola: el scheduler las registra y avanza al siguiente job.
#[derive(Debug, Error)]
pub enum AudioError {
    /// El sonido local no existe en disco.
    #[error("sonido local no encontrado: {}", .0.display())]
    NotFound(PathBuf),

    /// El resolvedor externo no pudo extraer título/URL del audio remoto.
    #[error("no se pudo resolver el audio remoto: {0}")]
    Resolution(String),

    /// El proveedor de texto a voz falló.
    #[error("fallo de síntesis de voz: {0}")]
    Synthesis(String),

    /// Fallo del transporte de reproducción (conexión de voz, track, etc.).
    #[error("error del sink de reproducción: {0}")]
    Sink(String),

    /// El canal destino del job ya no existe.
    #[error("canal destino inválido")]
    InvalidTarget,

    #[error("error de transcodificación: {0}")]
    Transcode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AudioError {
    /// `true` si el error indica que el recurso local no existe.
    pub fn is_not_found(&self) -> bool {
        match self {
            AudioError::NotFound(_) => true,
            AudioError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

pub type AudioResult<T> = Result<T, AudioError>;
