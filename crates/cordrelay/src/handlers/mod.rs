//! Operation handlers, grouped by what they touch.
//!
//! Each handler is an `async fn(OpContext, ValidatedArgs) -> OpResult` that
//! makes its remote calls through the context and returns a plain JSON
//! object shaped for the caller, never a raw Discord payload.

use chrono::{DateTime, SecondsFormat, Utc};
use cordproto::Snowflake;

use crate::registry::{OperationRegistry, RegistryBuilder, RegistryError};
use crate::schema::{Param, ParamKind};

mod channels;
mod commands;
mod messages;
mod moderation;
mod roles;
mod servers;
mod threads;
mod webhooks;

/// Every Discord operation this server exposes.
pub fn registry() -> Result<OperationRegistry, RegistryError> {
    RegistryBuilder::new()
        .register_all(servers::specs())
        .register_all(channels::specs())
        .register_all(threads::specs())
        .register_all(roles::specs())
        .register_all(messages::specs())
        .register_all(moderation::specs())
        .register_all(webhooks::specs())
        .register_all(commands::specs())
        .build()
}

/// Discord caps audit log reasons at 512 characters.
const REASON_MAX: usize = 512;

fn reason_param() -> Param {
    Param::optional(
        "reason",
        ParamKind::text_max(REASON_MAX),
        "Reason recorded in the server's audit log",
    )
}

fn server_id_param() -> Param {
    Param::required("server_id", ParamKind::Snowflake, "Discord server (guild) ID")
}

fn channel_id_param(description: &'static str) -> Param {
    Param::required("channel_id", ParamKind::Snowflake, description)
}

/// RFC 3339 creation time encoded in a snowflake.
fn created_at(id: Snowflake) -> Option<String> {
    let ms = i64::try_from(id.created_at_ms()).ok()?;
    DateTime::<Utc>::from_timestamp_millis(ms).map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// `#RRGGBB`, the way Discord's client shows role colors.
fn hex_color(color: u32) -> String {
    format!("#{color:06X}")
}
