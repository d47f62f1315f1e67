//! Sending and reading messages, and reactions.

use cordproto::{encode_emoji, Message, RestRequest};
use serde_json::{json, Value};
use tracing::debug;

use super::channel_id_param;
use crate::context::OpContext;
use crate::error::{ErrorKind, OpError};
use crate::registry::{Capability, OpResult, OperationSpec, SideEffect};
use crate::schema::{FieldViolation, Param, ParamKind, ValidatedArgs};

/// Discord's message length limit.
const CONTENT_MAX: usize = 2000;
/// Discord allows 20 distinct reactions per message.
const REACTIONS_MAX: usize = 20;

pub(super) fn specs() -> Vec<OperationSpec> {
    vec![
        OperationSpec::new(
            "send_message",
            "Send a message to a specific channel",
            SideEffect::Mutating,
            send_message,
        )
        .param(channel_id_param("Discord channel ID"))
        .param(Param::optional(
            "content",
            ParamKind::text_max(CONTENT_MAX),
            "Message content",
        ))
        .param(Param::optional(
            "embed",
            ParamKind::Object,
            "Embed object (title, description, fields, color, ...)",
        )),
        OperationSpec::new(
            "read_messages",
            "Read recent messages from a channel",
            SideEffect::ReadOnly,
            read_messages,
        )
        .param(channel_id_param("Discord channel ID"))
        .param(
            Param::optional(
                "limit",
                ParamKind::Integer { min: 1, max: 100 },
                "Number of messages to fetch (max 100)",
            )
            .with_default(json!(10)),
        )
        .requires(Capability::MessageContent),
        OperationSpec::new(
            "add_reaction",
            "Add a reaction to a message",
            SideEffect::Mutating,
            add_reaction,
        )
        .param(channel_id_param("Channel containing the message"))
        .param(message_id_param("Message to react to"))
        .param(Param::required(
            "emoji",
            ParamKind::text_max(100),
            "Emoji to react with (Unicode or <:name:id>)",
        )),
        OperationSpec::new(
            "add_multiple_reactions",
            "Add several reactions to a message, in order",
            SideEffect::Mutating,
            add_multiple_reactions,
        )
        .param(channel_id_param("Channel containing the message"))
        .param(message_id_param("Message to react to"))
        .param(Param::required(
            "emojis",
            ParamKind::TextList {
                max_items: REACTIONS_MAX,
            },
            "Emojis to react with (Unicode or <:name:id>)",
        )),
        OperationSpec::new(
            "remove_reaction",
            "Remove the bot's reaction from a message",
            SideEffect::Mutating,
            remove_reaction,
        )
        .param(channel_id_param("Channel containing the message"))
        .param(message_id_param("Message to remove reaction from"))
        .param(Param::required(
            "emoji",
            ParamKind::text_max(100),
            "Emoji to remove (Unicode or <:name:id>)",
        )),
    ]
}

fn message_id_param(description: &'static str) -> Param {
    Param::required("message_id", ParamKind::Snowflake, description)
}

async fn send_message(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    let channel_id = args.require_snowflake("channel_id")?;

    let mut body = json!({});
    if let Some(content) = args.text("content") {
        body["content"] = json!(content);
    }
    if let Some(embed) = args.object("embed") {
        body["embeds"] = json!([embed]);
    }
    if body.as_object().is_some_and(|b| b.is_empty()) {
        return Err(OpError::invalid_arguments(vec![FieldViolation::new(
            "",
            "give content, embed, or both",
        )]));
    }

    let message: Message = ctx
        .call_as(&RestRequest::post("/channels/{}/messages", &[&channel_id]).json(body))
        .await?;

    Ok(json!({
        "message_id": message.id,
        "channel_id": message.channel_id,
        "timestamp": message.timestamp,
    }))
}

fn message_summary(message: &Message) -> Value {
    let reactions: Vec<_> = message
        .reactions
        .iter()
        .map(|r| json!({ "emoji": r.emoji.display(), "count": r.count }))
        .collect();
    json!({
        "id": message.id,
        "author": {
            "id": message.author.id,
            "username": message.author.username,
            "bot": message.author.bot,
        },
        "content": message.content,
        "timestamp": message.timestamp,
        "edited_timestamp": message.edited_timestamp,
        "reactions": reactions,
        "embeds": message.embeds.len(),
    })
}

async fn read_messages(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    let channel_id = args.require_snowflake("channel_id")?;
    let limit = args.require_integer("limit")?;

    let messages: Vec<Message> = ctx
        .call_as(&RestRequest::get("/channels/{}/messages", &[&channel_id]).query("limit", limit))
        .await?;

    let messages: Vec<_> = messages.iter().map(message_summary).collect();
    Ok(json!({
        "channel_id": channel_id,
        "count": messages.len(),
        "messages": messages,
    }))
}

fn reaction_request(args: &ValidatedArgs, emoji: &str, remove: bool) -> Result<RestRequest, OpError> {
    let channel_id = args.require_snowflake("channel_id")?;
    let message_id = args.require_snowflake("message_id")?;
    let encoded = encode_emoji(emoji);
    let params: [&(dyn std::fmt::Display + Sync); 3] = [&channel_id, &message_id, &encoded];
    let template = "/channels/{}/messages/{}/reactions/{}/@me";
    Ok(if remove {
        RestRequest::delete(template, &params)
    } else {
        RestRequest::put(template, &params)
    })
}

async fn add_reaction(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    let emoji = args.require_text("emoji")?;
    ctx.call(&reaction_request(&args, emoji, false)?).await?;
    Ok(json!({ "added": true, "emoji": emoji }))
}

async fn remove_reaction(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    let emoji = args.require_text("emoji")?;
    ctx.call(&reaction_request(&args, emoji, true)?).await?;
    Ok(json!({ "removed": true, "emoji": emoji }))
}

/// One PUT per emoji, in order. A failed emoji does not stop the rest.
/// When every one fails for the same reason the invocation fails with that
/// kind; mixed reasons with nothing added are a `PartialFailure`.
async fn add_multiple_reactions(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    let emojis = args.require_list("emojis")?;

    let mut results = Vec::with_capacity(emojis.len());
    let mut errors: Vec<OpError> = Vec::new();
    for emoji in emojis {
        match ctx.call(&reaction_request(&args, emoji, false)?).await {
            Ok(_) => results.push(json!({ "emoji": emoji, "ok": true })),
            Err(err) => {
                debug!(%emoji, error = %err, "reaction failed");
                results.push(json!({ "emoji": emoji, "ok": false, "error": err }));
                errors.push(err);
            }
        }
    }

    let failed = errors.len();
    let added = emojis.len() - failed;
    let report = json!({
        "added": added,
        "failed": failed,
        "results": results,
    });
    if added > 0 {
        return Ok(report);
    }

    let Some(first) = errors.first() else {
        return Ok(report);
    };
    if errors.iter().all(|e| e.kind == first.kind) {
        return Err(OpError::new(
            first.kind,
            format!("all {failed} reactions failed: {}", first.message),
        )
        .with_details(report));
    }
    Err(OpError::new(
        ErrorKind::PartialFailure,
        format!("none of the {failed} reactions could be added"),
    )
    .with_details(report))
}
