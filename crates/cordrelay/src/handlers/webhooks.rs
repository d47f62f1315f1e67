//! Webhook management and webhook posting.

use cordproto::{Message, RestRequest, Webhook};
use serde_json::{json, Map, Value};

use super::{channel_id_param, reason_param};
use crate::context::OpContext;
use crate::error::OpError;
use crate::registry::{OpResult, OperationSpec, SideEffect};
use crate::schema::{FieldViolation, Param, ParamKind, ValidatedArgs};

const NAME_MAX: usize = 80;

pub(super) fn specs() -> Vec<OperationSpec> {
    vec![
        OperationSpec::new(
            "create_webhook",
            "Create a webhook in a channel",
            SideEffect::Mutating,
            create_webhook,
        )
        .param(channel_id_param("Channel to create the webhook in"))
        .param(Param::required("name", ParamKind::text_max(NAME_MAX), "Webhook name"))
        .param(reason_param()),
        OperationSpec::new(
            "list_webhooks",
            "List the webhooks in a channel",
            SideEffect::ReadOnly,
            list_webhooks,
        )
        .param(channel_id_param("Channel to list webhooks for")),
        OperationSpec::new(
            "send_webhook_message",
            "Post a message through a webhook",
            SideEffect::Mutating,
            send_webhook_message,
        )
        .param(webhook_id_param())
        .param(Param::required("webhook_token", ParamKind::text(), "Webhook token"))
        .param(Param::required("content", ParamKind::text_max(2000), "Message content"))
        .param(Param::optional(
            "username",
            ParamKind::text_max(NAME_MAX),
            "Override the webhook's display name",
        ))
        .param(Param::optional(
            "avatar_url",
            ParamKind::text(),
            "Override the webhook's avatar",
        )),
        OperationSpec::new(
            "edit_webhook",
            "Rename a webhook or move it to another channel",
            SideEffect::Mutating,
            edit_webhook,
        )
        .param(webhook_id_param())
        .param(Param::optional("name", ParamKind::text_max(NAME_MAX), "New webhook name"))
        .param(Param::optional(
            "channel_id",
            ParamKind::Snowflake,
            "Channel to move the webhook to",
        ))
        .param(reason_param()),
        OperationSpec::new(
            "delete_webhook",
            "Delete a webhook",
            SideEffect::Destructive,
            delete_webhook,
        )
        .param(webhook_id_param())
        .param(reason_param()),
    ]
}

fn webhook_id_param() -> Param {
    Param::required("webhook_id", ParamKind::Snowflake, "Webhook ID")
}

/// Tokens are left out; only `create_webhook` hands one back.
fn webhook_summary(webhook: &Webhook) -> Value {
    json!({
        "id": webhook.id,
        "name": webhook.name,
        "channel_id": webhook.channel_id,
        "server_id": webhook.guild_id,
    })
}

async fn create_webhook(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    let channel_id = args.require_snowflake("channel_id")?;

    let webhook: Webhook = ctx
        .call_as(
            &RestRequest::post("/channels/{}/webhooks", &[&channel_id])
                .json(json!({ "name": args.require_text("name")? }))
                .reason(args.text("reason")),
        )
        .await?;

    let mut out = webhook_summary(&webhook);
    out["token"] = json!(webhook.token);
    out["url"] = json!(webhook.url);
    Ok(out)
}

async fn list_webhooks(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    let channel_id = args.require_snowflake("channel_id")?;
    let webhooks: Vec<Webhook> = ctx
        .call_as(&RestRequest::get("/channels/{}/webhooks", &[&channel_id]))
        .await?;

    let webhooks: Vec<_> = webhooks.iter().map(webhook_summary).collect();
    Ok(json!({
        "channel_id": channel_id,
        "count": webhooks.len(),
        "webhooks": webhooks,
    }))
}

async fn send_webhook_message(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    let webhook_id = args.require_snowflake("webhook_id")?;
    let token = args.require_text("webhook_token")?;
    if !token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(OpError::invalid_arguments(vec![FieldViolation::new(
            "webhook_token",
            "not a webhook token",
        )]));
    }

    let mut body = json!({ "content": args.require_text("content")? });
    if let Some(username) = args.text("username") {
        body["username"] = json!(username);
    }
    if let Some(avatar) = args.text("avatar_url") {
        body["avatar_url"] = json!(avatar);
    }

    let message: Message = ctx
        .call_as(
            &RestRequest::post("/webhooks/{}/{}", &[&webhook_id, &token])
                .query("wait", "true")
                .json(body),
        )
        .await?;

    Ok(json!({
        "message_id": message.id,
        "channel_id": message.channel_id,
        "webhook_id": webhook_id,
    }))
}

async fn edit_webhook(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    let webhook_id = args.require_snowflake("webhook_id")?;

    let mut body = Map::new();
    if let Some(name) = args.text("name") {
        body.insert("name".into(), json!(name));
    }
    if let Some(channel) = args.snowflake("channel_id") {
        body.insert("channel_id".into(), json!(channel));
    }
    if body.is_empty() {
        return Err(OpError::invalid_arguments(vec![FieldViolation::new(
            "",
            "give at least one of name, channel_id",
        )]));
    }

    let webhook: Webhook = ctx
        .call_as(
            &RestRequest::patch("/webhooks/{}", &[&webhook_id])
                .json(Value::Object(body))
                .reason(args.text("reason")),
        )
        .await?;

    Ok(json!({ "webhook": webhook_summary(&webhook) }))
}

async fn delete_webhook(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    let webhook_id = args.require_snowflake("webhook_id")?;

    ctx.call(&RestRequest::delete("/webhooks/{}", &[&webhook_id]).reason(args.text("reason")))
        .await?;

    Ok(json!({
        "deleted": true,
        "id": webhook_id,
    }))
}
