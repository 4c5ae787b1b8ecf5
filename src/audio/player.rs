use chrono::Utc;
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        queue::{Job, JobId, PendingQueue, Source, Target},
        sink::{PlaybackControl, VoiceConnector},
        transcoder::Transcoder,
    },
    error::AudioError,
    sources::SourceResolver,
};

/// Tiempo máximo que se espera a que el sink confirme el fin tras `end()`.
const END_GRACE: Duration = Duration::from_secs(5);

/// Ajustes del scheduler.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Un job que esperó más que esto en cola se registra con `warn!`.
    pub backlog_warning: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            backlog_warning: Duration::from_secs(60),
        }
    }
}

/// Colaboradores que el scheduler usa para reproducir cada job.
pub struct Pipeline {
    pub connector: Arc<dyn VoiceConnector>,
    pub resolver: SourceResolver,
    pub transcoder: Arc<dyn Transcoder>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Playing,
}

/// Job en vuelo, tal como lo ve `status()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentJob {
    pub id: JobId,
    pub source: Source,
    /// `true` una vez que el sink empezó a reproducir.
    pub dispatching: bool,
}

/// Foto del estado del scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatus {
    pub state: PlayerState,
    pub pending: usize,
    pub current: Option<CurrentJob>,
}

/// Resultado final de un job.
#[derive(Debug)]
pub enum JobOutcome {
    Completed,
    Cancelled,
    /// Destino inexistente; se descarta en silencio.
    Dropped,
    Failed(AudioError),
}

enum Command {
    Enqueue(Job),
    Pause,
    Resume,
    Skip,
    Stop,
    Wake,
    Status(oneshot::Sender<QueueStatus>),
}

/// Mensajes internos: continuaciones diferidas, nunca llamadas recursivas.
enum Event {
    Drain,
    Dispatching {
        id: JobId,
        control: Arc<dyn PlaybackControl>,
    },
    Finished {
        id: JobId,
        outcome: JobOutcome,
    },
}

/// Handle clonable de la cola de reproducción.
///
/// Todas las operaciones son no bloqueantes: envían un comando al actor que posee
/// la cola y el estado. Se puede clonar libremente entre productores.
#[derive(Clone)]
pub struct SoundQueue {
    commands: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
}

impl SoundQueue {
    /// Lanza el actor del scheduler y devuelve su handle.
    pub fn spawn(pipeline: Pipeline, settings: QueueSettings) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();

        let actor = QueueActor {
            pipeline: Arc::new(pipeline),
            settings,
            queue: PendingQueue::new(),
            state: State::Idle,
            events,
        };
        tokio::spawn(actor.run(command_rx, event_rx));

        info!("🎶 Cola de reproducción iniciada");
        Self {
            commands,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Encola un job al final. Asigna id y sello de tiempo.
    pub fn enqueue(&self, mut job: Job) -> JobId {
        job.id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        job.created_at = Utc::now();
        let id = job.id;
        self.send(Command::Enqueue(job));
        id
    }

    pub fn speak(&self, text: impl Into<String>, target: Target) -> JobId {
        self.enqueue(Job::new(Some(target), Source::Speech(text.into())))
    }

    /// Local si existe en el directorio de sonidos; si no, remoto. Se decide al reproducir.
    pub fn play(&self, location: impl Into<String>, target: Target) -> JobId {
        self.enqueue(Job::new(Some(target), Source::Location(location.into())))
    }

    pub fn play_local(&self, path: impl Into<PathBuf>, target: Target) -> JobId {
        self.enqueue(Job::new(Some(target), Source::Local(path.into())))
    }

    pub fn play_remote(&self, url: impl Into<String>, target: Target) -> JobId {
        self.enqueue(Job::new(Some(target), Source::Remote(url.into())))
    }

    pub fn pause(&self) {
        self.send(Command::Pause);
    }

    pub fn resume(&self) {
        self.send(Command::Resume);
    }

    /// Termina sólo el job actual; la cola avanza sola.
    pub fn skip(&self) {
        self.send(Command::Skip);
    }

    /// Termina el job actual y descarta todos los pendientes.
    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    /// Pide un paso de drenado, p. ej. cuando la conexión de voz queda lista.
    pub fn wake(&self) {
        self.send(Command::Wake);
    }

    /// `None` si el actor ya no existe.
    pub async fn status(&self) -> Option<QueueStatus> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Status(tx));
        rx.await.ok()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("⚠️ La cola de reproducción ya no está activa");
        }
    }
}

struct InFlight {
    id: JobId,
    source: Source,
    cancel: CancellationToken,
    control: Option<Arc<dyn PlaybackControl>>,
}

enum State {
    Idle,
    Playing(InFlight),
}

struct QueueActor {
    pipeline: Arc<Pipeline>,
    settings: QueueSettings,
    queue: PendingQueue,
    state: State,
    events: mpsc::UnboundedSender<Event>,
}

impl QueueActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        loop {
            tokio::select! {
                biased;
                Some(event) = events.recv() => self.handle_event(event),
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
            }
        }

        self.queue.clear();
        if let State::Playing(ref current) = self.state {
            current.cancel.cancel();
        }
        debug!("🛑 Actor de la cola terminado");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Enqueue(job) => {
                self.queue.push(job);
                if matches!(self.state, State::Idle) {
                    self.process_next();
                }
            }
            Command::Pause => self.with_control("pausa", |control| control.pause()),
            Command::Resume => self.with_control("reanudar", |control| control.resume()),
            Command::Skip => match &self.state {
                State::Playing(current) => {
                    info!("⏭️ Saltando job {}", current.id);
                    current.cancel.cancel();
                }
                State::Idle => debug!("skip sin job activo"),
            },
            Command::Stop => {
                self.queue.clear();
                if let State::Playing(current) = &self.state {
                    info!("⏹️ Deteniendo job {}", current.id);
                    current.cancel.cancel();
                }
            }
            Command::Wake => self.process_next(),
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Drain => self.process_next(),
            Event::Dispatching { id, control } => {
                if let State::Playing(current) = &mut self.state {
                    if current.id == id {
                        current.control = Some(control);
                    }
                }
            }
            Event::Finished { id, outcome } => {
                match &outcome {
                    JobOutcome::Completed => info!("✅ Job {} terminado", id),
                    JobOutcome::Cancelled => info!("⏹️ Job {} cancelado", id),
                    JobOutcome::Dropped => debug!("Job {} descartado: destino inexistente", id),
                    JobOutcome::Failed(e) => error!("❌ Job {} falló: {}", id, e),
                }

                let matches_current =
                    matches!(&self.state, State::Playing(current) if current.id == id);
                if matches_current {
                    self.state = State::Idle;
                    self.post(Event::Drain);
                }
            }
        }
    }

    /// Paso de drenado: como mucho arranca un job.
    fn process_next(&mut self) {
        if matches!(self.state, State::Playing(_)) {
            return;
        }

        if !self.pipeline.connector.is_ready() {
            if !self.queue.is_empty() {
                debug!("🔇 Voz no lista, {} jobs en espera", self.queue.len());
            }
            return;
        }

        let Some(job) = self.queue.pop() else {
            return;
        };

        let Some(target) = job.target else {
            debug!("Job {} sin destino, descartado", job.id);
            self.post(Event::Drain);
            return;
        };

        let waited = job.age();
        if waited > self.settings.backlog_warning {
            warn!(
                "⏳ Job {} esperó {} en cola",
                job.id,
                humantime::format_duration(Duration::from_secs(waited.as_secs()))
            );
        }

        info!("🎵 Reproduciendo job {} ({}) en {}", job.id, job.source, target);

        let cancel = CancellationToken::new();
        self.state = State::Playing(InFlight {
            id: job.id,
            source: job.source.clone(),
            cancel: cancel.clone(),
            control: None,
        });

        let pipeline = self.pipeline.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let id = job.id;
            let outcome = play_job(&pipeline, &job, target, &cancel, &events).await;
            let _ = events.send(Event::Finished { id, outcome });
        });
    }

    fn with_control(&self, action: &str, apply: impl FnOnce(&dyn PlaybackControl) -> Result<(), AudioError>) {
        match &self.state {
            State::Playing(InFlight {
                control: Some(control),
                ..
            }) => {
                if let Err(e) = apply(control.as_ref()) {
                    warn!("⚠️ No se pudo aplicar {}: {}", action, e);
                }
            }
            _ => debug!("{} sin reproducción activa", action),
        }
    }

    fn status(&self) -> QueueStatus {
        let (state, current) = match &self.state {
            State::Idle => (PlayerState::Idle, None),
            State::Playing(current) => (
                PlayerState::Playing,
                Some(CurrentJob {
                    id: current.id,
                    source: current.source.clone(),
                    dispatching: current.control.is_some(),
                }),
            ),
        };

        QueueStatus {
            state,
            pending: self.queue.len(),
            current,
        }
    }

    fn post(&self, event: Event) {
        let _ = self.events.send(event);
    }
}

/// Pipeline de un job: destino → (conexión ‖ fuente) → PCM → sink → fin.
async fn play_job(
    pipeline: &Pipeline,
    job: &Job,
    target: Target,
    cancel: &CancellationToken,
    events: &mpsc::UnboundedSender<Event>,
) -> JobOutcome {
    if !pipeline.connector.target_available(&target).await {
        return JobOutcome::Dropped;
    }

    let prepared = tokio::select! {
        _ = cancel.cancelled() => return JobOutcome::Cancelled,
        prepared = async {
            tokio::try_join!(
                pipeline.connector.connect(&target),
                pipeline.resolver.resolve(&job.source),
            )
        } => prepared,
    };

    let (sink, stream) = match prepared {
        Ok(prepared) => prepared,
        Err(e) => return JobOutcome::Failed(e),
    };

    let pcm = match pipeline.transcoder.to_pcm(stream) {
        Ok(pcm) => pcm,
        Err(e) => return JobOutcome::Failed(e),
    };

    if cancel.is_cancelled() {
        return JobOutcome::Cancelled;
    }

    let dispatcher = match sink.play_pcm(pcm).await {
        Ok(dispatcher) => dispatcher,
        Err(e) => return JobOutcome::Failed(e),
    };

    let control = dispatcher.control();
    let _ = events.send(Event::Dispatching {
        id: job.id,
        control: control.clone(),
    });

    let finished = dispatcher.finished();
    tokio::pin!(finished);

    tokio::select! {
        result = &mut finished => match result {
            Ok(()) => JobOutcome::Completed,
            Err(e) => JobOutcome::Failed(e),
        },
        _ = cancel.cancelled() => {
            if let Err(e) = control.end() {
                warn!("⚠️ No se pudo terminar el track del job {}: {}", job.id, e);
            }
            if tokio::time::timeout(END_GRACE, &mut finished).await.is_err() {
                warn!("⚠️ El sink no confirmó el fin del job {}", job.id);
            }
            JobOutcome::Cancelled
        }
    }
}
