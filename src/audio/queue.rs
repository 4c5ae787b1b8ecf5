use chrono::{DateTime, Utc};
use std::{collections::VecDeque, fmt, path::PathBuf, time::Duration};
use tracing::{debug, info};

/// Identificador de un job dentro de la cola.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Canal de voz destino de un job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Target {
    pub guild_id: u64,
    pub channel_id: u64,
}

impl Target {
    pub fn new(guild_id: u64, channel_id: u64) -> Self {
        Self {
            guild_id,
            channel_id,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.guild_id, self.channel_id)
    }
}

/// Origen del audio de un job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Archivo local; un nombre sin directorio se busca en el directorio de sonidos.
    Local(PathBuf),
    /// URL arbitraria resuelta con el resolvedor externo.
    Remote(String),
    /// Texto a sintetizar.
    Speech(String),
    /// Ubicación sin clasificar: se decide local o remota al momento de reproducir.
    Location(String),
}

impl Source {
    pub fn kind(&self) -> &'static str {
        match self {
            Source::Local(_) => "local",
            Source::Remote(_) => "remote",
            Source::Speech(_) => "speech",
            Source::Location(_) => "location",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Local(path) => write!(f, "local:{}", path.display()),
            Source::Remote(url) => write!(f, "remote:{}", url),
            Source::Speech(text) => write!(f, "speech:{:?}", text),
            Source::Location(location) => write!(f, "location:{}", location),
        }
    }
}

/// Trabajo de reproducción.
///
/// `id` y `created_at` se asignan al encolar; después el job es inmutable.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub target: Option<Target>,
    pub source: Source,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(target: Option<Target>, source: Source) -> Self {
        Self {
            id: JobId::default(),
            target,
            source,
            created_at: Utc::now(),
        }
    }

    /// Tiempo transcurrido desde que el job fue encolado.
    pub fn age(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.created_at)
            .to_std()
            .unwrap_or_default()
    }
}

/// Cola FIFO estricta de jobs pendientes.
///
/// Sólo el actor del scheduler la muta; no hay prioridades ni reordenamiento.
#[derive(Debug, Default)]
pub struct PendingQueue {
    items: VecDeque<Job>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, job: Job) {
        debug!("➕ Job {} encolado ({})", job.id, job.source.kind());
        self.items.push_back(job);
    }

    pub fn pop(&mut self) -> Option<Job> {
        let next = self.items.pop_front();
        if let Some(ref job) = next {
            debug!("➡️ Siguiente job (FIFO): {}, quedan {}", job.id, self.items.len());
        }
        next
    }

    /// Vacía la cola y devuelve cuántos jobs fueron descartados.
    pub fn clear(&mut self) -> usize {
        let cleared = self.items.len();
        self.items.clear();
        if cleared > 0 {
            info!("🗑️ Cola limpiada: {} jobs descartados", cleared);
        }
        cleared
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn job(id: u64, text: &str) -> Job {
        let mut job = Job::new(Some(Target::new(1, 2)), Source::Speech(text.to_string()));
        job.id = JobId(id);
        job
    }

    #[test]
    fn pops_in_insertion_order() {
        let mut queue = PendingQueue::new();
        queue.push(job(1, "a"));
        queue.push(job(2, "b"));
        queue.push(job(3, "c"));

        let order: Vec<u64> = std::iter::from_fn(|| queue.pop()).map(|j| j.id.0).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn clear_reports_discarded_jobs() {
        let mut queue = PendingQueue::new();
        queue.push(job(1, "a"));
        queue.push(job(2, "b"));

        assert_eq!(queue.clear(), 2);
        assert_eq!(queue.len(), 0);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn age_grows_from_creation() {
        let mut job = job(1, "a");
        job.created_at = Utc::now() - chrono::Duration::seconds(90);
        assert!(job.age() >= Duration::from_secs(89));
    }

    #[test]
    fn source_display_names_the_origin() {
        assert_eq!(Source::Remote("http://x".into()).to_string(), "remote:http://x");
        assert_eq!(Source::Speech("hola".into()).to_string(), "speech:\"hola\"");
        assert_eq!(Source::Location("beep.mp3".into()).kind(), "location");
    }
}
