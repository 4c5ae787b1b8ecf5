use anyhow::Result;
use serenity::all::{ChannelId, Context, Message};
use tracing::{debug, info};
use url::Url;

use super::HeraldBot;
use crate::{
    audio::{
        player::{PlayerState, QueueStatus},
        queue::Target,
    },
    sources::local::is_bare_name,
};

const PLAY_USAGE: &str = "play <sound name or http(s) url>";

/// Comandos de texto reconocidos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    /// Sólo el dueño del bot; responde `pong`.
    Ping,
    Say(String),
    Play(String),
    Skip,
    Stop,
    Pause,
    Resume,
    Queue,
    /// Comando conocido con argumentos inválidos.
    Usage(&'static str),
}

/// Interpreta un mensaje como comando; `None` si no lleva el prefijo o no se reconoce.
pub fn parse_command(content: &str, prefix: &str) -> Option<BotCommand> {
    let body = content.trim().strip_prefix(prefix)?;
    let (name, args) = match body.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (body, ""),
    };

    let command = match name.to_lowercase().as_str() {
        "ping" => BotCommand::Ping,
        "say" if args.is_empty() => BotCommand::Usage("say <text>"),
        "say" => BotCommand::Say(args.to_string()),
        "play" if !is_playable_location(args) => BotCommand::Usage(PLAY_USAGE),
        "play" => BotCommand::Play(args.to_string()),
        "skip" => BotCommand::Skip,
        "stop" => BotCommand::Stop,
        "pause" => BotCommand::Pause,
        "resume" => BotCommand::Resume,
        "queue" => BotCommand::Queue,
        _ => return None,
    };
    Some(command)
}

/// Desde el chat sólo se aceptan nombres del directorio de sonidos o URLs http(s).
pub fn is_playable_location(location: &str) -> bool {
    if is_bare_name(location) {
        return true;
    }
    Url::parse(location).is_ok_and(|url| matches!(url.scheme(), "http" | "https"))
}

/// Texto de respuesta para `queue`.
pub fn describe_status(status: &QueueStatus) -> String {
    match (&status.state, &status.current) {
        (PlayerState::Playing, Some(current)) => format!(
            "{} {} ({}), {} pending",
            if current.dispatching { "Playing" } else { "Preparing" },
            current.id,
            current.source,
            status.pending
        ),
        _ => format!("Idle, {} pending", status.pending),
    }
}

/// Canal de voz actual del autor del mensaje.
fn author_voice_target(ctx: &Context, msg: &Message) -> Option<Target> {
    let guild_id = msg.guild_id?;
    let guild = ctx.cache.guild(guild_id)?;
    let channel_id = guild.voice_states.get(&msg.author.id)?.channel_id?;
    Some(Target::new(guild_id.get(), channel_id.get()))
}

async fn reply(ctx: &Context, channel_id: ChannelId, text: impl Into<String>) -> Result<()> {
    channel_id.say(&ctx.http, text).await?;
    Ok(())
}

/// Ejecuta un comando ya interpretado.
pub async fn execute(bot: &HeraldBot, ctx: &Context, msg: &Message, command: BotCommand) -> Result<()> {
    debug!("⌨️ Comando {:?} de {}", command, msg.author.name);
    let queue = bot.queue();

    match command {
        BotCommand::Ping => {
            if bot.is_owner(msg.author.id.get()) {
                reply(ctx, msg.channel_id, "pong").await?;
            }
        }
        BotCommand::Say(text) => match author_voice_target(ctx, msg) {
            Some(target) => {
                let id = queue.speak(text, target);
                info!("🗣️ Job {} encolado por {}", id, msg.author.name);
            }
            None => reply(ctx, msg.channel_id, "Join a voice channel first.").await?,
        },
        BotCommand::Play(location) => match author_voice_target(ctx, msg) {
            Some(target) => {
                let id = queue.play(location, target);
                info!("🎵 Job {} encolado por {}", id, msg.author.name);
            }
            None => reply(ctx, msg.channel_id, "Join a voice channel first.").await?,
        },
        BotCommand::Skip => queue.skip(),
        BotCommand::Stop => queue.stop(),
        BotCommand::Pause => queue.pause(),
        BotCommand::Resume => queue.resume(),
        BotCommand::Queue => {
            let text = match queue.status().await {
                Some(status) => describe_status(&status),
                None => "Queue is not running.".to_string(),
            };
            reply(ctx, msg.channel_id, text).await?;
        }
        BotCommand::Usage(usage) => {
            let text = format!("Usage: {}{}", bot.prefix(), usage);
            reply(ctx, msg.channel_id, text).await?;
        }
    }

    Ok(())
}
