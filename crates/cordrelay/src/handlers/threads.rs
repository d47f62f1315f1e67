//! Thread creation and thread state changes.

use std::sync::Arc;

use cordproto::{CacheUpdate, Channel, ChannelKind, RestRequest, Snowflake};
use serde_json::json;

use super::{channel_id_param, reason_param};
use crate::context::OpContext;
use crate::error::OpError;
use crate::registry::{OpResult, OperationSpec, SideEffect};
use crate::schema::{FieldViolation, Param, ParamKind, ValidatedArgs};

/// Minutes of inactivity Discord allows before auto-archiving.
const ARCHIVE_DURATIONS: &[i64] = &[60, 1440, 4320, 10080];

pub(super) fn specs() -> Vec<OperationSpec> {
    vec![
        OperationSpec::new(
            "create_thread",
            "Create a thread in a channel, optionally from an existing message",
            SideEffect::Mutating,
            create_thread,
        )
        .param(channel_id_param("Channel (text, announcement, or forum) to create the thread in"))
        .param(Param::required("name", ParamKind::text_max(100), "Thread name"))
        .param(Param::optional(
            "message_id",
            ParamKind::Snowflake,
            "Start the thread from this message",
        ))
        .param(Param::optional(
            "content",
            ParamKind::text_max(2000),
            "Opening post; required for forum channels",
        ))
        .param(
            Param::optional(
                "auto_archive_duration",
                ParamKind::IntChoice(ARCHIVE_DURATIONS),
                "Minutes of inactivity before the thread archives",
            )
            .with_default(json!(1440)),
        )
        .param(reason_param()),
        OperationSpec::new(
            "delete_thread",
            "Delete a thread",
            SideEffect::Destructive,
            delete_thread,
        )
        .param(thread_id_param())
        .param(reason_param()),
        OperationSpec::new(
            "archive_thread",
            "Archive a thread",
            SideEffect::Mutating,
            archive_thread,
        )
        .param(thread_id_param())
        .param(reason_param()),
        OperationSpec::new(
            "unarchive_thread",
            "Unarchive a thread",
            SideEffect::Mutating,
            unarchive_thread,
        )
        .param(thread_id_param())
        .param(reason_param()),
    ]
}

fn thread_id_param() -> Param {
    Param::required("thread_id", ParamKind::Snowflake, "Discord thread ID")
}

fn thread_summary(thread: &Channel) -> serde_json::Value {
    json!({
        "id": thread.id,
        "name": thread.display_name(),
        "type": thread.kind.as_str(),
        "parent_id": thread.parent_id,
        "archived": thread.thread_metadata.as_ref().map(|m| m.archived),
        "auto_archive_duration": thread.thread_metadata.as_ref().map(|m| m.auto_archive_duration),
    })
}

async fn create_thread(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    let channel_id = args.require_snowflake("channel_id")?;
    let name = args.require_text("name")?;
    let archive = args.require_integer("auto_archive_duration")?;
    let reason = args.text("reason");

    let request = match args.snowflake("message_id") {
        Some(message_id) => RestRequest::post(
            "/channels/{}/messages/{}/threads",
            &[&channel_id, &message_id],
        )
        .json(json!({ "name": name, "auto_archive_duration": archive })),
        None => {
            let parent = ctx.resolve_channel(channel_id).await?;
            let body = match parent.kind {
                ChannelKind::Forum | ChannelKind::Media => {
                    let Some(content) = args.text("content") else {
                        return Err(OpError::invalid_arguments(vec![FieldViolation::new(
                            "content",
                            "required when creating a post in a forum channel",
                        )]));
                    };
                    json!({
                        "name": name,
                        "auto_archive_duration": archive,
                        "message": { "content": content },
                    })
                }
                ChannelKind::Text => json!({
                    "name": name,
                    "auto_archive_duration": archive,
                    "type": u8::from(ChannelKind::PublicThread),
                }),
                ChannelKind::Announcement => json!({
                    "name": name,
                    "auto_archive_duration": archive,
                    "type": u8::from(ChannelKind::AnnouncementThread),
                }),
                other => {
                    return Err(OpError::invalid_argument(format!(
                        "cannot create threads in a {} channel",
                        other.as_str()
                    )))
                }
            };
            RestRequest::post("/channels/{}/threads", &[&channel_id]).json(body)
        }
    };

    let mut thread: Channel = ctx.call_as(&request.reason(reason)).await?;
    thread.parent_id.get_or_insert(channel_id);
    ctx.reflect(CacheUpdate::UpsertChannel(Box::new(thread.clone())));

    Ok(json!({
        "created": true,
        "thread": thread_summary(&thread),
    }))
}

/// Resolve `thread_id` and make sure it really is a thread.
async fn resolve_thread(ctx: &OpContext, thread_id: Snowflake) -> Result<Arc<Channel>, OpError> {
    let channel = ctx.resolve_channel(thread_id).await?;
    if !channel.kind.is_thread() {
        return Err(OpError::invalid_argument(format!(
            "{} is a {} channel, not a thread",
            thread_id,
            channel.kind.as_str()
        )));
    }
    Ok(channel)
}

async fn delete_thread(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    let thread_id = args.require_snowflake("thread_id")?;
    let thread = resolve_thread(&ctx, thread_id).await?;

    ctx.call(&RestRequest::delete("/channels/{}", &[&thread_id]).reason(args.text("reason")))
        .await?;
    ctx.reflect(CacheUpdate::RemoveChannel(thread_id));

    Ok(json!({
        "deleted": true,
        "id": thread_id,
        "name": thread.display_name(),
    }))
}

async fn set_archived(ctx: OpContext, args: ValidatedArgs, archived: bool) -> OpResult {
    let thread_id = args.require_snowflake("thread_id")?;
    resolve_thread(&ctx, thread_id).await?;

    let thread: Channel = ctx
        .call_as(
            &RestRequest::patch("/channels/{}", &[&thread_id])
                .json(json!({ "archived": archived }))
                .reason(args.text("reason")),
        )
        .await?;
    ctx.reflect(CacheUpdate::UpsertChannel(Box::new(thread.clone())));

    Ok(json!({ "thread": thread_summary(&thread) }))
}

async fn archive_thread(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    set_archived(ctx, args, true).await
}

async fn unarchive_thread(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    set_archived(ctx, args, false).await
}
