//! # Bot Module
//!
//! Discord glue for the herald bot.
//!
//! The [`HeraldBot`] implements Serenity's [`EventHandler`] trait and turns gateway
//! events into jobs on the shared [`SoundQueue`]:
//!
//! - **ready**: installs the songbird manager into [`DiscordVoice`] and wakes the queue
//! - **voice state updates**: announces users leaving/joining voice channels
//! - **new members**: greets them in the guild's system channel
//! - **messages**: prefixed text commands (see [`commands`])
//!
//! ## Example
//!
//! ```rust,no_run
//! let voice = Arc::new(DiscordVoice::new());
//! let queue = SoundQueue::spawn(pipeline, QueueSettings::default());
//! let bot = HeraldBot::new(config, queue, voice);
//! ```

use serenity::{
    all::{Context, EventHandler, GuildId, Member, Message, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod events;
pub mod voice;

use crate::{
    audio::{player::SoundQueue, queue::Target},
    config::Config,
};
use voice::{DiscordVoice, VoiceContext};

/// Main Discord event handler.
pub struct HeraldBot {
    /// Bot configuration loaded from environment variables
    config: Arc<Config>,
    /// Shared playback queue
    queue: SoundQueue,
    /// Voice connector used by the queue; installed on `ready`
    voice: Arc<DiscordVoice>,
}

impl HeraldBot {
    pub fn new(config: Config, queue: SoundQueue, voice: Arc<DiscordVoice>) -> Self {
        Self {
            config: Arc::new(config),
            queue,
            voice,
        }
    }

    pub fn queue(&self) -> &SoundQueue {
        &self.queue
    }

    pub fn prefix(&self) -> &str {
        &self.config.command_prefix
    }

    pub fn is_owner(&self, user_id: u64) -> bool {
        self.config.bot_owner == Some(user_id)
    }
}

/// Anuncios a emitir para un cambio de canal de voz: (canal, texto).
pub fn voice_announcements(
    name: &str,
    old_channel: Option<u64>,
    new_channel: Option<u64>,
) -> Vec<(u64, String)> {
    if old_channel == new_channel {
        return Vec::new();
    }

    let mut announcements = Vec::new();
    if let Some(channel) = old_channel {
        announcements.push((channel, format!("{} has left the channel.", name)));
    }
    if let Some(channel) = new_channel {
        announcements.push((channel, format!("{} has joined the channel.", name)));
    }
    announcements
}

#[async_trait]
impl EventHandler for HeraldBot {
    /// Installs the voice context and drains anything queued before the gateway was ready.
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        match songbird::get(&ctx).await {
            Some(songbird) => {
                self.voice.install(VoiceContext {
                    songbird,
                    cache: ctx.cache.clone(),
                });
                self.queue.wake();
            }
            None => error!("❌ Songbird no inicializado"),
        }
    }

    /// Announces channel changes of other users after a short grace period.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        if new.user_id == ctx.cache.current_user().id {
            return;
        }

        let Some(guild_id) = new.guild_id.or_else(|| old.as_ref().and_then(|s| s.guild_id)) else {
            return;
        };

        let old_channel = old.and_then(|state| state.channel_id).map(|id| id.get());
        let new_channel = new.channel_id.map(|id| id.get());

        let name = match &new.member {
            Some(member) => member.display_name().to_string(),
            None => match new.user_id.to_user(&ctx).await {
                Ok(user) => user.name,
                Err(e) => {
                    warn!("⚠️ No se pudo obtener el usuario {}: {}", new.user_id, e);
                    return;
                }
            },
        };

        let announcements = voice_announcements(&name, old_channel, new_channel);
        if announcements.is_empty() {
            return;
        }

        let queue = self.queue.clone();
        let grace = self.config.announce_grace();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            for (channel, text) in announcements {
                debug!("📢 {}", text);
                queue.speak(text, Target::new(guild_id.get(), channel));
            }
        });
    }

    /// Greets new members in the guild's system channel.
    async fn guild_member_addition(&self, ctx: Context, new_member: Member) {
        let guild_id: GuildId = new_member.guild_id;
        let system_channel = ctx
            .cache
            .guild(guild_id)
            .and_then(|guild| guild.system_channel_id);

        let Some(channel_id) = system_channel else {
            debug!("Guild {} sin canal de sistema", guild_id);
            return;
        };

        let text = format!("{} has joined this server", new_member.display_name());
        if let Err(e) = channel_id.say(&ctx.http, text).await {
            error!("Error al saludar nuevo miembro: {:?}", e);
        }
    }

    /// Dispatches prefixed text commands.
    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }

        let Some(command) = commands::parse_command(&msg.content, self.prefix()) else {
            return;
        };

        if let Err(e) = commands::execute(self, &ctx, &msg, command).await {
            error!("Error manejando comando: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn moving_between_channels_announces_both() {
        assert_eq!(
            voice_announcements("ana", Some(1), Some(2)),
            vec![
                (1, "ana has left the channel.".to_string()),
                (2, "ana has joined the channel.".to_string()),
            ]
        );
    }

    #[test]
    fn joining_and_leaving() {
        assert_eq!(
            voice_announcements("bo", None, Some(3)),
            vec![(3, "bo has joined the channel.".to_string())]
        );
        assert_eq!(
            voice_announcements("bo", Some(3), None),
            vec![(3, "bo has left the channel.".to_string())]
        );
    }

    #[test]
    fn mute_or_deafen_is_silent() {
        assert!(voice_announcements("cy", Some(4), Some(4)).is_empty());
    }
}
