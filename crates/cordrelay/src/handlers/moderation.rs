//! Moderation: message removal and member timeouts.

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use cordproto::{CacheUpdate, Member, Message, RestRequest, Snowflake};
use serde_json::json;
use tracing::warn;

use super::{channel_id_param, reason_param, server_id_param, REASON_MAX};
use crate::context::OpContext;
use crate::error::{ErrorKind, OpError};
use crate::registry::{OpResult, OperationSpec, SideEffect};
use crate::schema::{Param, ParamKind, ValidatedArgs};

/// Discord's longest communication timeout.
const MAX_TIMEOUT_SECS: i64 = 28 * 24 * 60 * 60;
const MAX_TIMEOUT_MINUTES: i64 = MAX_TIMEOUT_SECS / 60;

const UNITS: &[&str] = &["seconds", "minutes", "hours", "days"];

pub(super) fn specs() -> Vec<OperationSpec> {
    vec![
        OperationSpec::new(
            "moderate_message",
            "Delete a message and optionally time out its author",
            SideEffect::Destructive,
            moderate_message,
        )
        .param(channel_id_param("Channel ID containing the message"))
        .param(Param::required("message_id", ParamKind::Snowflake, "ID of message to moderate"))
        .param(Param::required(
            "reason",
            ParamKind::text_max(REASON_MAX),
            "Reason for moderation",
        ))
        .param(
            Param::optional(
                "timeout_minutes",
                ParamKind::Integer {
                    min: 0,
                    max: MAX_TIMEOUT_MINUTES,
                },
                "Optional timeout duration in minutes",
            )
            .with_default(json!(0)),
        ),
        OperationSpec::new(
            "timeout_member",
            "Time out a member, or clear their timeout with a duration of 0",
            SideEffect::Destructive,
            timeout_member,
        )
        .param(server_id_param())
        .param(Param::required("user_id", ParamKind::Snowflake, "Member to time out"))
        .param(Param::required(
            "duration",
            ParamKind::Integer {
                min: 0,
                max: MAX_TIMEOUT_SECS,
            },
            "How long, in `unit`s; 0 clears an existing timeout",
        ))
        .param(
            Param::optional("unit", ParamKind::Choice(UNITS), "Unit of `duration`")
                .with_default(json!("minutes")),
        )
        .param(reason_param()),
    ]
}

/// Seconds in `amount` of `unit`, rejecting anything past 28 days.
fn timeout_secs(amount: i64, unit: &str) -> Result<i64, OpError> {
    let per_unit = match unit {
        "seconds" => 1,
        "minutes" => 60,
        "hours" => 60 * 60,
        "days" => 24 * 60 * 60,
        other => return Err(OpError::invalid_argument(format!("unknown unit '{other}'"))),
    };
    match amount.checked_mul(per_unit) {
        Some(secs) if secs <= MAX_TIMEOUT_SECS => Ok(secs),
        _ => Err(OpError::invalid_argument(format!(
            "timeout of {amount} {unit} is longer than Discord's 28 day maximum"
        ))
        .with_details(json!({ "max_seconds": MAX_TIMEOUT_SECS }))),
    }
}

fn timeout_until(now: DateTime<Utc>, secs: i64) -> String {
    (now + TimeDelta::seconds(secs)).to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// PATCH the member's timeout; `None` clears it.
async fn set_timeout(
    ctx: &OpContext,
    server_id: Snowflake,
    user_id: Snowflake,
    until: Option<&str>,
    reason: Option<&str>,
) -> Result<(), OpError> {
    let mut member: Member = ctx
        .call_as(
            &RestRequest::patch("/guilds/{}/members/{}", &[&server_id, &user_id])
                .json(json!({ "communication_disabled_until": until }))
                .reason(reason),
        )
        .await?;
    member.guild_id.get_or_insert(server_id);
    ctx.reflect(CacheUpdate::UpsertMember {
        guild_id: server_id,
        member: Box::new(member),
    });
    Ok(())
}

async fn moderate_message(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    let channel_id = args.require_snowflake("channel_id")?;
    let message_id = args.require_snowflake("message_id")?;
    let reason = args.require_text("reason")?;
    let minutes = args.require_integer("timeout_minutes")?;

    let message: Message = ctx
        .call_as(&RestRequest::get(
            "/channels/{}/messages/{}",
            &[&channel_id, &message_id],
        ))
        .await?;
    let author = message.author.id;

    ctx.call(
        &RestRequest::delete("/channels/{}/messages/{}", &[&channel_id, &message_id])
            .reason(Some(reason)),
    )
    .await?;

    let mut outcome = json!({
        "deleted": true,
        "message_id": message_id,
        "author_id": author,
    });
    if minutes == 0 {
        return Ok(outcome);
    }

    let until = timeout_until(Utc::now(), minutes * 60);
    let timed_out = async {
        let server_id = match message.guild_id {
            Some(id) => id,
            None => ctx
                .resolve_channel(channel_id)
                .await?
                .guild_id
                .ok_or_else(|| OpError::invalid_argument("channel is not in a server"))?,
        };
        set_timeout(&ctx, server_id, author, Some(&until), Some(reason)).await
    }
    .await;

    match timed_out {
        Ok(()) => {
            outcome["timeout_until"] = json!(until);
            Ok(outcome)
        }
        Err(err) => {
            warn!(%message_id, error = %err, "message deleted but timeout failed");
            Err(OpError::new(
                ErrorKind::PartialFailure,
                format!("message deleted, but the author could not be timed out: {}", err.message),
            )
            .with_details(json!({
                "deleted": true,
                "message_id": message_id,
                "author_id": author,
                "timeout_error": err,
            })))
        }
    }
}

async fn timeout_member(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    let server_id = args.require_snowflake("server_id")?;
    let user_id = args.require_snowflake("user_id")?;
    let duration = args.require_integer("duration")?;
    let unit = args.require_text("unit")?;
    let secs = timeout_secs(duration, unit)?;
    let reason = args.text("reason");

    if secs == 0 {
        set_timeout(&ctx, server_id, user_id, None, reason).await?;
        return Ok(json!({
            "user_id": user_id,
            "timed_out": false,
        }));
    }

    let until = timeout_until(Utc::now(), secs);
    set_timeout(&ctx, server_id, user_id, Some(&until), reason).await?;
    Ok(json!({
        "user_id": user_id,
        "timed_out": true,
        "until": until,
        "seconds": secs,
    }))
}
