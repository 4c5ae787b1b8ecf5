use anyhow::{Context as _, Result};
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::SerenityInit;
use std::sync::Arc;
use tracing::{error, info, warn};

mod audio;
mod bot;
mod cache;
mod config;
mod error;
mod sources;

use crate::audio::player::{Pipeline, QueueSettings, SoundQueue};
use crate::audio::transcoder::FfmpegTranscoder;
use crate::bot::{voice::DiscordVoice, HeraldBot};
use crate::cache::{Namespace, StreamCache};
use crate::config::Config;
use crate::sources::{
    HttpSpeechProvider, Lexicon, LocalSounds, RemoteSource, SourceResolver, SpeechSource,
    YtDlpResolver,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("voice_herald=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("📢 Iniciando Voice Herald v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    info!("{}", config.summary());

    // Caché de audio (voz y URLs)
    let cache = StreamCache::open(&config.cache_dir).await?;

    // Léxico de pronunciación; si cambió, el caché de voz queda obsoleto
    let lexicon = match &config.lexicon_path {
        Some(path) => Lexicon::load(path).await?,
        None => Lexicon::default(),
    };
    if cache
        .sync_fingerprint(Namespace::Speech, &lexicon.fingerprint())
        .await?
    {
        info!("📖 Léxico nuevo o modificado: caché de voz invalidado");
    }
    for namespace in Namespace::ALL {
        info!(
            "💾 {} entradas en caché '{}'",
            cache.entry_count(namespace).await?,
            namespace
        );
    }

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout())
        .build()
        .context("no se pudo crear el cliente HTTP")?;

    let endpoint = url::Url::parse(&config.tts_endpoint)?;
    let speech = HttpSpeechProvider::new(
        http.clone(),
        endpoint,
        config.tts_api_key.clone(),
        config.tts_voice.clone(),
    );

    let resolver = SourceResolver::new(
        LocalSounds::new(&config.sounds_dir),
        RemoteSource::new(Arc::new(YtDlpResolver::new(&config.ytdlp_path)), http),
        SpeechSource::new(Arc::new(speech), Arc::new(lexicon)),
        cache,
    );

    // Cola de reproducción
    let voice = Arc::new(DiscordVoice::new());
    let queue = SoundQueue::spawn(
        Pipeline {
            connector: voice.clone(),
            resolver,
            transcoder: Arc::new(FfmpegTranscoder::new(&config.ffmpeg_path)),
        },
        QueueSettings {
            backlog_warning: config.backlog_warning(),
        },
    );

    // Intents: voz, mensajes con contenido y miembros (saludos)
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_MEMBERS;

    let token = config.discord_token.clone();
    let handler = HeraldBot::new(config, queue, voice);

    // Construir cliente
    let mut client = Client::builder(&token, intents)
        .event_handler(handler)
        .register_songbird()
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("⚠️ No se pudo registrar Ctrl+C: {}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check(config: &Config) -> Result<()> {
    // Verificar dependencias críticas
    let yt_dlp = tokio::process::Command::new(&config.ytdlp_path)
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = tokio::process::Command::new(&config.ffmpeg_path)
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes");
    }
}
