//! Discord gateway handler: message ingestion, slash-command surface,
//! and the context-menu translate command.

use crate::impersonate::ImpersonationManager;
use crate::policy::{ChannelMode, OutputStyle, PolicyStore, Scope};
use crate::relay::RelayDispatcher;
use crate::sanitize;
use crate::translate::Translator;
use crate::{Author, CardAuthor, CardField, CardFooter, Persona, RawMessage, RichCard};

use serenity::all::{
    Command, CommandDataOption, CommandDataOptionValue, CommandInteraction, CommandOptionType,
    CommandType, Context, CreateCommand, CreateCommandOption, CreateInteractionResponse,
    CreateInteractionResponseFollowup, CreateInteractionResponseMessage, EventHandler,
    GatewayIntents, Interaction, Message, Permissions, Ready, ResolvedTarget,
};
use serenity::async_trait;
use std::sync::Arc;

/// Gateway event handler wiring Discord events into the relay pipeline.
pub struct Handler {
    dispatcher: Arc<RelayDispatcher>,
    policies: Arc<PolicyStore>,
    translator: Arc<Translator>,
    webhooks: Arc<ImpersonationManager>,
}

impl Handler {
    pub fn new(
        dispatcher: Arc<RelayDispatcher>,
        policies: Arc<PolicyStore>,
        translator: Arc<Translator>,
        webhooks: Arc<ImpersonationManager>,
    ) -> Self {
        Self {
            dispatcher,
            policies,
            translator,
            webhooks,
        }
    }

    /// Required gateway intents.
    pub fn intents() -> GatewayIntents {
        GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT
    }

    async fn raw_message(&self, msg: &Message) -> RawMessage {
        let via_own_impersonation = match msg.webhook_id {
            Some(webhook_id) => self.webhooks.is_own_webhook(webhook_id.get()).await,
            None => false,
        };

        RawMessage {
            channel_id: msg.channel_id.get(),
            message_id: msg.id.get(),
            author: Author {
                id: msg.author.id.get(),
                display_name: msg
                    .author
                    .global_name
                    .clone()
                    .unwrap_or_else(|| msg.author.name.clone()),
                avatar_url: msg.author.avatar_url(),
                is_bot: msg.author.bot,
            },
            body: msg.content.clone(),
            cards: msg.embeds.iter().map(embed_to_card).collect(),
            attachment_urls: msg
                .attachments
                .iter()
                .map(|attachment| attachment.url.clone())
                .collect(),
            via_own_impersonation,
        }
    }

    async fn handle_command(&self, ctx: &Context, command: &CommandInteraction) {
        match command.data.name.as_str() {
            "relay" => self.handle_relay_command(ctx, command).await,
            "Translate Message" => self.handle_translate_menu(ctx, command).await,
            other => {
                tracing::debug!(command = other, "ignoring unknown command");
            }
        }
    }

    async fn handle_relay_command(&self, ctx: &Context, command: &CommandInteraction) {
        let channel_id = command.channel_id.get();
        let Some(subcommand) = command.data.options.first() else {
            respond_ephemeral(ctx, command, "missing subcommand".into()).await;
            return;
        };
        let options = sub_options(subcommand);

        let reply = match subcommand.name.as_str() {
            "mode" => {
                let mode = match str_option(options, "mode").as_deref() {
                    Some("off") => ChannelMode::Off,
                    Some("replace") => ChannelMode::Replace,
                    Some("reply") => ChannelMode::Reply,
                    _ => {
                        respond_ephemeral(ctx, command, "unknown mode".into()).await;
                        return;
                    }
                };
                self.apply_policy(channel_id, move |p| p.mode = mode)
            }
            "style" => {
                let style = match str_option(options, "style").as_deref() {
                    Some("auto") => OutputStyle::Auto,
                    Some("flat") => OutputStyle::Flat,
                    Some("card") => OutputStyle::Card,
                    _ => {
                        respond_ephemeral(ctx, command, "unknown style".into()).await;
                        return;
                    }
                };
                self.apply_policy(channel_id, move |p| p.style = style)
            }
            "scope" => {
                let scope = match str_option(options, "scope").as_deref() {
                    Some("translated") => Scope::TranslateOnly,
                    Some("all") => Scope::AllMessages,
                    _ => {
                        respond_ephemeral(ctx, command, "unknown scope".into()).await;
                        return;
                    }
                };
                self.apply_policy(channel_id, move |p| p.scope = scope)
            }
            "cardfix" => {
                let enabled = bool_option(options, "enabled").unwrap_or(false);
                self.apply_policy(channel_id, move |p| p.relay_untranslated_cards = enabled)
            }
            "status" => Ok(summarize(&self.policies.get(channel_id))),
            "persona" => {
                let Some(action) = options.first() else {
                    respond_ephemeral(ctx, command, "missing persona action".into()).await;
                    return;
                };
                let action_options = sub_options(action);
                let Some(target) = str_option(action_options, "target") else {
                    respond_ephemeral(ctx, command, "missing target".into()).await;
                    return;
                };
                match action.name.as_str() {
                    "set" => {
                        let Some(display_name) = str_option(action_options, "name") else {
                            respond_ephemeral(ctx, command, "missing name".into()).await;
                            return;
                        };
                        let avatar_url = str_option(action_options, "avatar");
                        self.apply_policy(channel_id, move |p| {
                            p.personas.insert(
                                target,
                                Persona {
                                    display_name,
                                    avatar_url,
                                },
                            );
                        })
                    }
                    "clear" => self.apply_policy(channel_id, move |p| {
                        p.personas.remove(&target);
                    }),
                    other => {
                        tracing::debug!(action = other, "unknown persona action");
                        return;
                    }
                }
            }
            other => {
                tracing::debug!(subcommand = other, "unknown relay subcommand");
                return;
            }
        };

        let text = match reply {
            Ok(text) => text,
            Err(error) => {
                tracing::error!(channel_id, %error, "failed to persist policy change");
                "failed to save the policy change, nothing was applied".into()
            }
        };
        respond_ephemeral(ctx, command, text).await;
    }

    /// Mutate-and-persist, acknowledging with the resulting policy
    /// summary only after the store has written it out.
    fn apply_policy<F>(&self, channel_id: u64, mutate: F) -> crate::Result<String>
    where
        F: FnOnce(&mut crate::policy::ChannelPolicy),
    {
        let updated = self.policies.update(channel_id, mutate)?;
        Ok(summarize(&updated))
    }

    /// Context-menu translation: ephemeral, visible only to the invoking
    /// user, and deliberately ignores the channel policy.
    async fn handle_translate_menu(&self, ctx: &Context, command: &CommandInteraction) {
        let Some(ResolvedTarget::Message(message)) = command.data.target() else {
            respond_ephemeral(ctx, command, "no message selected".into()).await;
            return;
        };

        if message.author.bot {
            respond_ephemeral(ctx, command, "cannot translate bot messages".into()).await;
            return;
        }

        // Translation can exceed the 3s interaction deadline; defer first.
        if let Err(error) = command.defer_ephemeral(&ctx.http).await {
            tracing::warn!(%error, "failed to defer translate interaction");
            return;
        }

        let (protected, table) = sanitize::sanitize(&message.content);
        let result = self.translator.translate(&protected).await;
        let text = if result.changed {
            format!("translation: {}", sanitize::restore(&result.text, &table))
        } else {
            "nothing to translate (already in the target language, or too short)".into()
        };

        let followup = CreateInteractionResponseFollowup::new()
            .content(text)
            .ephemeral(true);
        if let Err(error) = command.create_followup(&ctx.http, followup).await {
            tracing::warn!(%error, "failed to send translate follow-up");
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        tracing::info!(
            bot_name = %ready.user.name,
            guilds = ready.guilds.len(),
            "discord gateway ready"
        );
        self.dispatcher.set_self_user(ready.user.id.get());

        if let Err(error) =
            Command::set_global_commands(&ctx.http, vec![relay_command(), translate_menu_command()])
                .await
        {
            tracing::error!(%error, "failed to register slash commands");
        }
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        // DMs have no relay policy surface.
        if msg.guild_id.is_none() {
            return;
        }

        let raw = self.raw_message(&msg).await;
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            match dispatcher.handle_message(&raw).await {
                Ok(outcome) => {
                    tracing::debug!(
                        channel_id = raw.channel_id,
                        message_id = raw.message_id,
                        ?outcome,
                        "message processed"
                    );
                }
                Err(error) => {
                    tracing::warn!(
                        channel_id = raw.channel_id,
                        message_id = raw.message_id,
                        %error,
                        "message relay abandoned"
                    );
                }
            }
        });
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            self.handle_command(&ctx, &command).await;
        }
    }
}

fn embed_to_card(embed: &serenity::model::channel::Embed) -> RichCard {
    RichCard {
        title: embed.title.clone(),
        description: embed.description.clone(),
        color: embed.colour.map(|colour| colour.0),
        url: embed.url.clone(),
        timestamp: embed.timestamp.as_ref().map(|ts| ts.to_string()),
        author: embed.author.as_ref().map(|author| CardAuthor {
            name: author.name.clone(),
            icon_url: author.icon_url.clone(),
        }),
        footer: embed.footer.as_ref().map(|footer| CardFooter {
            text: footer.text.clone(),
            icon_url: footer.icon_url.clone(),
        }),
        image: embed.image.as_ref().map(|image| image.url.clone()),
        thumbnail: embed.thumbnail.as_ref().map(|thumb| thumb.url.clone()),
        fields: embed
            .fields
            .iter()
            .map(|field| CardField {
                name: field.name.clone(),
                value: field.value.clone(),
                inline: field.inline,
            })
            .collect(),
    }
}

fn sub_options(option: &CommandDataOption) -> &[CommandDataOption] {
    match &option.value {
        CommandDataOptionValue::SubCommand(options)
        | CommandDataOptionValue::SubCommandGroup(options) => options,
        _ => &[],
    }
}

fn str_option(options: &[CommandDataOption], name: &str) -> Option<String> {
    options.iter().find(|option| option.name == name).and_then(
        |option| match &option.value {
            CommandDataOptionValue::String(value) => Some(value.clone()),
            _ => None,
        },
    )
}

fn bool_option(options: &[CommandDataOption], name: &str) -> Option<bool> {
    options.iter().find(|option| option.name == name).and_then(
        |option| match &option.value {
            CommandDataOptionValue::Boolean(value) => Some(*value),
            _ => None,
        },
    )
}

fn summarize(policy: &crate::policy::ChannelPolicy) -> String {
    format!(
        "mode: {:?}\nstyle: {:?}\nscope: {:?}\ncardfix: {}\npersonas: {}",
        policy.mode,
        policy.style,
        policy.scope,
        if policy.relay_untranslated_cards {
            "on"
        } else {
            "off"
        },
        policy.personas.len()
    )
}

async fn respond_ephemeral(ctx: &Context, command: &CommandInteraction, text: String) {
    let response = CreateInteractionResponse::Message(
        CreateInteractionResponseMessage::new()
            .content(text)
            .ephemeral(true),
    );
    if let Err(error) = command.create_response(&ctx.http, response).await {
        tracing::warn!(%error, "failed to respond to interaction");
    }
}

fn relay_command() -> CreateCommand {
    CreateCommand::new("relay")
        .description("Configure translation relay for this channel")
        .default_member_permissions(Permissions::MANAGE_CHANNELS)
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::SubCommand,
                "mode",
                "Whether this channel is relayed, and how",
            )
            .add_sub_option(
                CreateCommandOption::new(CommandOptionType::String, "mode", "Relay mode")
                    .add_string_choice("Off", "off")
                    .add_string_choice("Replace the original", "replace")
                    .add_string_choice("Reply below the original", "reply")
                    .required(true),
            ),
        )
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::SubCommand,
                "style",
                "How translated messages are rendered",
            )
            .add_sub_option(
                CreateCommandOption::new(CommandOptionType::String, "style", "Output style")
                    .add_string_choice("Keep original shape", "auto")
                    .add_string_choice("Flatten to text", "flat")
                    .add_string_choice("Force a card", "card")
                    .required(true),
            ),
        )
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::SubCommand,
                "scope",
                "Which messages are relayed",
            )
            .add_sub_option(
                CreateCommandOption::new(CommandOptionType::String, "scope", "Processing scope")
                    .add_string_choice("Only translated messages", "translated")
                    .add_string_choice("All messages", "all")
                    .required(true),
            ),
        )
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::SubCommand,
                "cardfix",
                "Relay untranslated card/attachment messages too",
            )
            .add_sub_option(
                CreateCommandOption::new(CommandOptionType::Boolean, "enabled", "Enable")
                    .required(true),
            ),
        )
        .add_option(CreateCommandOption::new(
            CommandOptionType::SubCommand,
            "status",
            "Show this channel's relay policy",
        ))
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::SubCommandGroup,
                "persona",
                "Per-author display overrides",
            )
            .add_sub_option(
                CreateCommandOption::new(
                    CommandOptionType::SubCommand,
                    "set",
                    "Set a persona override for an author",
                )
                .add_sub_option(
                    CreateCommandOption::new(
                        CommandOptionType::String,
                        "target",
                        "Author id or display name",
                    )
                    .required(true),
                )
                .add_sub_option(
                    CreateCommandOption::new(
                        CommandOptionType::String,
                        "name",
                        "Replacement display name",
                    )
                    .required(true),
                )
                .add_sub_option(CreateCommandOption::new(
                    CommandOptionType::String,
                    "avatar",
                    "Replacement avatar URL",
                )),
            )
            .add_sub_option(
                CreateCommandOption::new(
                    CommandOptionType::SubCommand,
                    "clear",
                    "Remove a persona override",
                )
                .add_sub_option(
                    CreateCommandOption::new(
                        CommandOptionType::String,
                        "target",
                        "Author id or display name",
                    )
                    .required(true),
                ),
            ),
        )
}

fn translate_menu_command() -> CreateCommand {
    CreateCommand::new("Translate Message").kind(CommandType::Message)
}
