//! Application (slash) command listings.

use cordproto::{ApplicationCommand, RestRequest};
use serde_json::{json, Value};

use super::server_id_param;
use crate::context::OpContext;
use crate::registry::{OpResult, OperationSpec, SideEffect};
use crate::schema::ValidatedArgs;

pub(super) fn specs() -> Vec<OperationSpec> {
    vec![
        OperationSpec::new(
            "list_global_commands",
            "List the bot's global application commands",
            SideEffect::ReadOnly,
            list_global_commands,
        ),
        OperationSpec::new(
            "list_guild_commands",
            "List the bot's application commands registered in one server",
            SideEffect::ReadOnly,
            list_guild_commands,
        )
        .param(server_id_param()),
    ]
}

fn command_summary(command: &ApplicationCommand) -> Value {
    let kind = match command.kind {
        1 => "chat_input",
        2 => "user",
        3 => "message",
        4 => "primary_entry_point",
        _ => "unknown",
    };
    json!({
        "id": command.id,
        "name": command.name,
        "description": command.description,
        "type": kind,
        "options": command.options.len(),
    })
}

fn listing(commands: &[ApplicationCommand]) -> Value {
    let commands: Vec<_> = commands.iter().map(command_summary).collect();
    json!({
        "count": commands.len(),
        "commands": commands,
    })
}

async fn list_global_commands(ctx: OpContext, _args: ValidatedArgs) -> OpResult {
    let app = ctx.application_id().await?;
    let commands: Vec<ApplicationCommand> = ctx
        .call_as(&RestRequest::get("/applications/{}/commands", &[&app]))
        .await?;

    let mut out = listing(&commands);
    out["application_id"] = json!(app);
    Ok(out)
}

async fn list_guild_commands(ctx: OpContext, args: ValidatedArgs) -> OpResult {
    let server_id = args.require_snowflake("server_id")?;
    let app = ctx.application_id().await?;
    let commands: Vec<ApplicationCommand> = ctx
        .call_as(&RestRequest::get(
            "/applications/{}/guilds/{}/commands",
            &[&app, &server_id],
        ))
        .await?;

    let mut out = listing(&commands);
    out["application_id"] = json!(app);
    out["server_id"] = json!(server_id);
    Ok(out)
}
