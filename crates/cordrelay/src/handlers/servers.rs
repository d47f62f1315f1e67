//! Server (guild), member, and user queries.

use cordproto::{Guild, Member, RestRequest, User};
use serde_json::json;

use super::{created_at, server_id_param};
use crate::context::OpContext;
use crate::registry::{Capability, OpResult, OperationSpec, SideEffect};
use crate::schema::{Param, ParamKind, ValidatedArgs};

pub(super) fn specs() -> Vec<OperationSpec> {
    vec![
        OperationSpec::new(
            "get_server_info",
            "Get information about a Discord server",
            SideEffect::ReadOnly,
            get_server_info,
        )
        .param(server_id_param()),
        OperationSpec::new(
            "list_members",
            "Get a list of members in a server",
            SideEffect::ReadOnly,
            list_members,
        )
        .param(server_id_param())
        .param(
            Param::optional(
                "limit",
                ParamKind::Integer { min: 1, max: 1000 },
                "Maximum number of members to fetch",
            )
            .with_default(json!(100)),
        )
        .requires(Capability::Members),
        OperationSpec::new(
            "get_user_info",
            "Get information about a Discord user",
            SideEffect::ReadOnly,
            get_user_info,
        )
        .param(Param::required("user_id", ParamKind::Snowflake, "Discord user ID")),
    ]
}

async fn get_server_info(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    let server_id = args.require_snowflake("server_id")?;
    let guild: Guild = ctx
        .call_as(&RestRequest::get("/guilds/{}", &[&server_id]).query("with_counts", "true"))
        .await?;

    Ok(json!({
        "id": guild.id,
        "name": guild.name,
        "owner_id": guild.owner_id,
        "description": guild.description,
        "member_count": guild.known_member_count(),
        "online_count": guild.approximate_presence_count,
        "premium_tier": guild.premium_tier,
        "role_count": guild.roles.len(),
        "created_at": created_at(guild.id),
    }))
}

async fn list_members(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    let server_id = args.require_snowflake("server_id")?;
    let limit = args.require_integer("limit")?;

    // One page holds up to 1000, which is also our ceiling
    let members: Vec<Member> = ctx
        .call_as(&RestRequest::get("/guilds/{}/members", &[&server_id]).query("limit", limit))
        .await?;

    let members: Vec<_> = members.iter().map(member_summary).collect();
    Ok(json!({
        "server_id": server_id,
        "count": members.len(),
        "members": members,
    }))
}

fn member_summary(member: &Member) -> serde_json::Value {
    let user = member.user.as_ref();
    json!({
        "id": user.map(|u| u.id),
        "username": user.map(|u| u.username.as_str()),
        "display_name": member
            .nick
            .as_deref()
            .or_else(|| user.and_then(|u| u.global_name.as_deref()))
            .or_else(|| user.map(|u| u.username.as_str())),
        "nick": member.nick,
        "joined_at": member.joined_at,
        "roles": member.roles,
        "bot": user.is_some_and(|u| u.bot),
    })
}

async fn get_user_info(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    let user_id = args.require_snowflake("user_id")?;
    let user: User = ctx.call_as(&RestRequest::get("/users/{}", &[&user_id])).await?;

    Ok(json!({
        "id": user.id,
        "username": user.username,
        "global_name": user.global_name,
        "tag": user.tag(),
        "bot": user.bot,
        "created_at": created_at(user.id),
    }))
}
