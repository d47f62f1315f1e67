//! Role listing, role management, and member role grants.

use cordproto::{CacheUpdate, RestRequest, Role};
use serde_json::{json, Map, Value};

use super::{hex_color, reason_param, server_id_param};
use crate::context::OpContext;
use crate::error::OpError;
use crate::registry::{OpResult, OperationSpec, SideEffect};
use crate::schema::{FieldViolation, Param, ParamKind, ValidatedArgs};

const NAME_MAX: usize = 100;

pub(super) fn specs() -> Vec<OperationSpec> {
    vec![
        OperationSpec::new(
            "list_roles",
            "List a server's roles, highest first",
            SideEffect::ReadOnly,
            list_roles,
        )
        .param(server_id_param()),
        OperationSpec::new(
            "create_role",
            "Create a role",
            SideEffect::Mutating,
            create_role,
        )
        .param(server_id_param())
        .param(Param::required("name", ParamKind::text_max(NAME_MAX), "Role name"))
        .param(Param::optional("color", ParamKind::Color, "Role color as #RRGGBB"))
        .param(Param::optional("hoist", ParamKind::Bool, "Show members separately in the sidebar"))
        .param(Param::optional("mentionable", ParamKind::Bool, "Allow anyone to @mention the role"))
        .param(reason_param()),
        OperationSpec::new(
            "edit_role",
            "Change a role's name, color, or display flags",
            SideEffect::Mutating,
            edit_role,
        )
        .param(server_id_param())
        .param(role_id_param())
        .param(Param::optional("name", ParamKind::text_max(NAME_MAX), "New role name"))
        .param(Param::optional("color", ParamKind::Color, "New color as #RRGGBB"))
        .param(Param::optional("hoist", ParamKind::Bool, "Show members separately in the sidebar"))
        .param(Param::optional("mentionable", ParamKind::Bool, "Allow anyone to @mention the role"))
        .param(reason_param()),
        OperationSpec::new(
            "delete_role",
            "Delete a role",
            SideEffect::Destructive,
            delete_role,
        )
        .param(server_id_param())
        .param(role_id_param())
        .param(reason_param()),
        OperationSpec::new(
            "add_role",
            "Add a role to a user",
            SideEffect::Mutating,
            add_role,
        )
        .param(server_id_param())
        .param(user_id_param())
        .param(role_id_param())
        .param(reason_param()),
        OperationSpec::new(
            "remove_role",
            "Remove a role from a user",
            SideEffect::Mutating,
            remove_role,
        )
        .param(server_id_param())
        .param(user_id_param())
        .param(role_id_param())
        .param(reason_param()),
    ]
}

fn role_id_param() -> Param {
    Param::required("role_id", ParamKind::Snowflake, "Role ID")
}

fn user_id_param() -> Param {
    Param::required("user_id", ParamKind::Snowflake, "User ID")
}

fn role_summary(role: &Role) -> Value {
    json!({
        "id": role.id,
        "name": role.name,
        "color": hex_color(role.color),
        "position": role.position,
        "hoist": role.hoist,
        "mentionable": role.mentionable,
        "managed": role.managed,
    })
}

/// Body fields shared by create and edit; only what was given.
fn role_fields(args: &ValidatedArgs) -> Map<String, Value> {
    let mut body = Map::new();
    if let Some(name) = args.text("name") {
        body.insert("name".into(), json!(name));
    }
    if let Some(color) = args.color("color") {
        body.insert("color".into(), json!(color));
    }
    if let Some(hoist) = args.bool("hoist") {
        body.insert("hoist".into(), json!(hoist));
    }
    if let Some(mentionable) = args.bool("mentionable") {
        body.insert("mentionable".into(), json!(mentionable));
    }
    body
}

async fn list_roles(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    let server_id = args.require_snowflake("server_id")?;
    let roles = ctx.session().resolve_roles(server_id, ctx.deadline()).await?;

    // @everyone shares the guild's id
    let roles: Vec<_> = roles
        .iter()
        .filter(|r| r.id != server_id)
        .map(|r| role_summary(r))
        .collect();
    Ok(json!({
        "server_id": server_id,
        "count": roles.len(),
        "roles": roles,
    }))
}

async fn create_role(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    let server_id = args.require_snowflake("server_id")?;

    let role: Role = ctx
        .call_as(
            &RestRequest::post("/guilds/{}/roles", &[&server_id])
                .json(Value::Object(role_fields(&args)))
                .reason(args.text("reason")),
        )
        .await?;
    ctx.reflect(CacheUpdate::UpsertRole {
        guild_id: server_id,
        role: role.clone(),
    });

    Ok(json!({
        "created": true,
        "role": role_summary(&role),
    }))
}

async fn edit_role(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    let server_id = args.require_snowflake("server_id")?;
    let role_id = args.require_snowflake("role_id")?;

    let body = role_fields(&args);
    if body.is_empty() {
        return Err(OpError::invalid_arguments(vec![FieldViolation::new(
            "",
            "give at least one of name, color, hoist, mentionable",
        )]));
    }

    let role: Role = ctx
        .call_as(
            &RestRequest::patch("/guilds/{}/roles/{}", &[&server_id, &role_id])
                .json(Value::Object(body))
                .reason(args.text("reason")),
        )
        .await?;
    ctx.reflect(CacheUpdate::UpsertRole {
        guild_id: server_id,
        role: role.clone(),
    });

    Ok(json!({ "role": role_summary(&role) }))
}

async fn delete_role(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    let server_id = args.require_snowflake("server_id")?;
    let role_id = args.require_snowflake("role_id")?;
    let name = ctx.session().role(role_id).map(|r| r.name.clone());

    ctx.call(
        &RestRequest::delete("/guilds/{}/roles/{}", &[&server_id, &role_id])
            .reason(args.text("reason")),
    )
    .await?;
    ctx.reflect(CacheUpdate::RemoveRole {
        guild_id: server_id,
        role_id,
    });

    Ok(json!({
        "deleted": true,
        "id": role_id,
        "name": name,
    }))
}

async fn add_role(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    let server_id = args.require_snowflake("server_id")?;
    let user_id = args.require_snowflake("user_id")?;
    let role_id = args.require_snowflake("role_id")?;

    ctx.call(
        &RestRequest::put(
            "/guilds/{}/members/{}/roles/{}",
            &[&server_id, &user_id, &role_id],
        )
        .reason(args.text("reason")),
    )
    .await?;
    ctx.reflect(CacheUpdate::MemberRoleAdded {
        guild_id: server_id,
        user_id,
        role_id,
    });

    Ok(json!({
        "added": true,
        "server_id": server_id,
        "user_id": user_id,
        "role_id": role_id,
    }))
}

async fn remove_role(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    let server_id = args.require_snowflake("server_id")?;
    let user_id = args.require_snowflake("user_id")?;
    let role_id = args.require_snowflake("role_id")?;

    ctx.call(
        &RestRequest::delete(
            "/guilds/{}/members/{}/roles/{}",
            &[&server_id, &user_id, &role_id],
        )
        .reason(args.text("reason")),
    )
    .await?;
    ctx.reflect(CacheUpdate::MemberRoleRemoved {
        guild_id: server_id,
        user_id,
        role_id,
    });

    Ok(json!({
        "removed": true,
        "server_id": server_id,
        "user_id": user_id,
        "role_id": role_id,
    }))
}
