//! Channel listing and management.

use cordproto::{CacheUpdate, Channel, RestRequest};
use serde_json::{json, Map, Value};

use super::{channel_id_param, created_at, reason_param, server_id_param};
use crate::context::OpContext;
use crate::error::OpError;
use crate::registry::{OpResult, OperationSpec, SideEffect};
use crate::schema::{FieldViolation, Param, ParamKind, ValidatedArgs};

const NAME_MAX: usize = 100;
const TOPIC_MAX: usize = 1024;

pub(super) fn specs() -> Vec<OperationSpec> {
    vec![
        OperationSpec::new(
            "list_all_channels",
            "List every channel in a server, threads excluded",
            SideEffect::ReadOnly,
            list_all_channels,
        )
        .param(server_id_param()),
        OperationSpec::new(
            "get_channel_info",
            "Get information about a channel",
            SideEffect::ReadOnly,
            get_channel_info,
        )
        .param(channel_id_param("Discord channel ID")),
        OperationSpec::new(
            "edit_channel",
            "Change a channel's name, topic, position, or category",
            SideEffect::Mutating,
            edit_channel,
        )
        .param(channel_id_param("Channel to edit"))
        .param(Param::optional("name", ParamKind::text_max(NAME_MAX), "New channel name"))
        .param(Param::optional("topic", ParamKind::text_max(TOPIC_MAX), "New channel topic"))
        .param(Param::optional(
            "position",
            ParamKind::Integer { min: 0, max: 10_000 },
            "New sort position",
        ))
        .param(Param::optional("category_id", ParamKind::Snowflake, "Category to move the channel under"))
        .param(reason_param()),
        OperationSpec::new(
            "create_text_channel",
            "Create a new text channel",
            SideEffect::Mutating,
            create_text_channel,
        )
        .param(server_id_param())
        .param(Param::required("name", ParamKind::text_max(NAME_MAX), "Channel name"))
        .param(Param::optional("category_id", ParamKind::Snowflake, "Optional category ID to place channel in"))
        .param(Param::optional("topic", ParamKind::text_max(TOPIC_MAX), "Optional channel topic"))
        .param(reason_param()),
        OperationSpec::new(
            "delete_channel",
            "Delete a channel",
            SideEffect::Destructive,
            delete_channel,
        )
        .param(channel_id_param("ID of channel to delete"))
        .param(reason_param()),
    ]
}

/// The fields every channel listing shows.
pub(super) fn channel_summary(channel: &Channel) -> Value {
    json!({
        "id": channel.id,
        "name": channel.display_name(),
        "type": channel.kind.as_str(),
        "position": channel.position,
        "parent_id": channel.parent_id,
    })
}

async fn list_all_channels(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    let server_id = args.require_snowflake("server_id")?;
    let channels = ctx
        .session()
        .resolve_channels(server_id, ctx.deadline())
        .await?;

    let channels: Vec<_> = channels
        .iter()
        .filter(|c| !c.kind.is_thread())
        .map(|c| channel_summary(c))
        .collect();
    Ok(json!({
        "server_id": server_id,
        "count": channels.len(),
        "channels": channels,
    }))
}

async fn get_channel_info(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    let channel_id = args.require_snowflake("channel_id")?;
    let channel: Channel = ctx
        .call_as(&RestRequest::get("/channels/{}", &[&channel_id]))
        .await?;

    Ok(json!({
        "id": channel.id,
        "name": channel.display_name(),
        "type": channel.kind.as_str(),
        "server_id": channel.guild_id,
        "topic": channel.topic,
        "position": channel.position,
        "parent_id": channel.parent_id,
        "nsfw": channel.nsfw,
        "created_at": created_at(channel.id),
    }))
}

async fn edit_channel(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    let channel_id = args.require_snowflake("channel_id")?;

    let mut body = Map::new();
    if let Some(name) = args.text("name") {
        body.insert("name".into(), json!(name));
    }
    if let Some(topic) = args.text("topic") {
        body.insert("topic".into(), json!(topic));
    }
    if let Some(position) = args.integer("position") {
        body.insert("position".into(), json!(position));
    }
    if let Some(category) = args.snowflake("category_id") {
        body.insert("parent_id".into(), json!(category));
    }
    if body.is_empty() {
        return Err(OpError::invalid_arguments(vec![FieldViolation::new(
            "",
            "give at least one of name, topic, position, category_id",
        )]));
    }
    let changed: Vec<_> = body.keys().cloned().collect();

    let channel: Channel = ctx
        .call_as(
            &RestRequest::patch("/channels/{}", &[&channel_id])
                .json(Value::Object(body))
                .reason(args.text("reason")),
        )
        .await?;
    ctx.reflect(CacheUpdate::UpsertChannel(Box::new(channel.clone())));

    Ok(json!({
        "channel": channel_summary(&channel),
        "changed": changed,
    }))
}

async fn create_text_channel(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    let server_id = args.require_snowflake("server_id")?;

    let mut body = json!({
        "name": args.require_text("name")?,
        "type": 0,
    });
    if let Some(category) = args.snowflake("category_id") {
        body["parent_id"] = json!(category);
    }
    if let Some(topic) = args.text("topic") {
        body["topic"] = json!(topic);
    }

    let mut channel: Channel = ctx
        .call_as(
            &RestRequest::post("/guilds/{}/channels", &[&server_id])
                .json(body)
                .reason(args.text("reason")),
        )
        .await?;
    channel.guild_id.get_or_insert(server_id);
    ctx.reflect(CacheUpdate::UpsertChannel(Box::new(channel.clone())));

    Ok(json!({
        "created": true,
        "channel": channel_summary(&channel),
    }))
}

async fn delete_channel(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    let channel_id = args.require_snowflake("channel_id")?;

    let channel: Channel = ctx
        .call_as(&RestRequest::delete("/channels/{}", &[&channel_id]).reason(args.text("reason")))
        .await?;
    ctx.reflect(CacheUpdate::RemoveChannel(channel_id));

    Ok(json!({
        "deleted": true,
        "id": channel_id,
        "name": channel.display_name(),
    }))
}
