//! Each operation group against scripted Discord responses: request shape,
//! result shape, and what the local cache looks like afterwards.

mod common;

use common::{harness, Harness, ALICE, FORUM, GENERAL, GUILD, MOD_ROLE, THREAD};
use cordproto::testing::{member, message_json};
use cordproto::{Method, Snowflake};
use cordrelay::ErrorKind;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn role_json(id: u64, name: &str, color: u32, position: i64) -> Value {
    json!({
        "id": id.to_string(),
        "name": name,
        "color": color,
        "hoist": false,
        "position": position,
        "permissions": "0",
        "managed": false,
        "mentionable": false,
    })
}

fn body_of(h: &Harness, method: Method, path: &str) -> Value {
    let calls = h.rest.calls_to(method, path);
    assert_eq!(calls.len(), 1, "expected one {method} {path}");
    calls[0].body.clone().unwrap_or(Value::Null)
}

fn query_of(h: &Harness, method: Method, path: &str) -> Vec<(String, String)> {
    h.rest.calls_to(method, path)[0].query.clone()
}

// === Servers and users ===

#[tokio::test(start_paused = true)]
async fn server_info_uses_counts() {
    let h = harness().await;
    h.rest.respond(
        Method::Get,
        "/guilds/1",
        200,
        json!({
            "id": "1",
            "name": "Test Guild",
            "owner_id": "1",
            "approximate_member_count": 42,
            "approximate_presence_count": 7,
            "premium_tier": 2,
            "roles": [role_json(1, "@everyone", 0, 0), role_json(40, "Moderators", 0, 1)],
        }),
    );

    let response = h.call("get_server_info", json!({ "server_id": "1" })).await;

    let content = response.content.unwrap();
    assert_eq!(content["name"], "Test Guild");
    assert_eq!(content["member_count"], 42);
    assert_eq!(content["online_count"], 7);
    assert_eq!(content["premium_tier"], 2);
    assert_eq!(content["role_count"], 2);
    assert_eq!(content["owner_id"], "1");
    assert!(content["created_at"].as_str().unwrap().starts_with("2015-01-01T"));
    assert_eq!(
        query_of(&h, Method::Get, "/guilds/1"),
        vec![("with_counts".to_string(), "true".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn repeated_reads_agree() {
    let h = harness().await;
    h.rest.respond(Method::Get, "/guilds/1", 200, json!({ "id": "1", "name": "Test Guild" }));

    let first = h.call("get_server_info", json!({ "server_id": "1" })).await;
    let second = h.call("get_server_info", json!({ "server_id": 1 })).await;

    assert!(first.success);
    assert_eq!(first.content, second.content);
    assert_ne!(first.correlation_id, second.correlation_id);
}

#[tokio::test(start_paused = true)]
async fn members_are_listed_with_display_names() {
    let h = harness().await;
    let mut bob = member(51, "bob", &[MOD_ROLE]);
    bob.nick = Some("Bobby".into());
    h.rest.respond(
        Method::Get,
        "/guilds/1/members",
        200,
        json!([member(ALICE, "alice", &[]), bob]),
    );

    let response = h
        .call("list_members", json!({ "server_id": "1", "limit": "2" }))
        .await;

    let content = response.content.unwrap();
    assert_eq!(content["count"], 2);
    assert_eq!(content["members"][0]["display_name"], "alice");
    assert_eq!(content["members"][1]["display_name"], "Bobby");
    assert_eq!(content["members"][1]["roles"], json!(["40"]));
    assert_eq!(
        query_of(&h, Method::Get, "/guilds/1/members"),
        vec![("limit".to_string(), "2".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn member_limit_is_bounded() {
    let h = harness().await;

    let response = h
        .call("list_members", json!({ "server_id": "1", "limit": 1001 }))
        .await;

    assert_eq!(response.error_kind(), Some(ErrorKind::InvalidArgument));
    assert_eq!(h.rest.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn user_info() {
    let h = harness().await;
    h.rest.respond(
        Method::Get,
        "/users/50",
        200,
        json!({ "id": "50", "username": "alice", "global_name": "Alice", "discriminator": "0" }),
    );

    let content = h
        .call("get_user_info", json!({ "user_id": "50" }))
        .await
        .content
        .unwrap();

    assert_eq!(content["username"], "alice");
    assert_eq!(content["global_name"], "Alice");
    assert_eq!(content["bot"], false);
}

// === Channels ===

#[tokio::test(start_paused = true)]
async fn channel_listing_comes_from_the_cache_without_threads() {
    let h = harness().await;

    let content = h
        .call("list_all_channels", json!({ "server_id": "1" }))
        .await
        .content
        .unwrap();

    assert_eq!(content["count"], 2);
    let names: Vec<_> = content["channels"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["general", "ideas"]);
    assert_eq!(content["channels"][1]["type"], "forum");
    assert_eq!(h.rest.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn edit_channel_needs_a_change() {
    let h = harness().await;

    let response = h.call("edit_channel", json!({ "channel_id": "20" })).await;

    assert_eq!(response.error_kind(), Some(ErrorKind::InvalidArgument));
    assert_eq!(h.rest.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn edit_channel_patches_and_updates_the_cache() {
    let h = harness().await;
    h.rest.respond(
        Method::Patch,
        "/channels/20",
        200,
        json!({ "id": "20", "type": 0, "guild_id": "1", "name": "general", "topic": "Say hi" }),
    );

    let response = h
        .call(
            "edit_channel",
            json!({ "channel_id": "20", "topic": "Say hi", "reason": "welcome" }),
        )
        .await;

    let content = response.content.unwrap();
    assert_eq!(content["changed"], json!(["topic"]));
    assert_eq!(body_of(&h, Method::Patch, "/channels/20"), json!({ "topic": "Say hi" }));
    assert_eq!(
        h.rest.calls_to(Method::Patch, "/channels/20")[0].reason.as_deref(),
        Some("welcome")
    );

    h.settle().await;
    let cached = h.session.channel(Snowflake(GENERAL)).unwrap();
    assert_eq!(cached.topic.as_deref(), Some("Say hi"));
}

#[tokio::test(start_paused = true)]
async fn created_channel_is_cached() {
    let h = harness().await;
    h.rest.respond(
        Method::Post,
        "/guilds/1/channels",
        201,
        json!({ "id": "60", "type": 0, "name": "new-room", "parent_id": "5", "position": 2 }),
    );

    let response = h
        .call(
            "create_text_channel",
            json!({ "server_id": "1", "name": "new-room", "category_id": "5", "topic": "fresh" }),
        )
        .await;

    let content = response.content.unwrap();
    assert_eq!(content["created"], true);
    assert_eq!(content["channel"]["id"], "60");
    assert_eq!(
        body_of(&h, Method::Post, "/guilds/1/channels"),
        json!({ "name": "new-room", "type": 0, "parent_id": "5", "topic": "fresh" })
    );

    h.settle().await;
    let cached = h.session.channel(Snowflake(60)).unwrap();
    assert_eq!(cached.guild_id, Some(Snowflake(GUILD)));
}

#[tokio::test(start_paused = true)]
async fn deleting_a_channel_drops_it_and_its_threads() {
    let h = harness().await;
    h.rest.respond(
        Method::Delete,
        "/channels/20",
        200,
        json!({ "id": "20", "type": 0, "guild_id": "1", "name": "general" }),
    );

    let content = h
        .call("delete_channel", json!({ "channel_id": "20" }))
        .await
        .content
        .unwrap();

    assert_eq!(content, json!({ "deleted": true, "id": "20", "name": "general" }));
    h.settle().await;
    assert!(h.session.channel(Snowflake(GENERAL)).is_none());
    assert!(h.session.channel(Snowflake(THREAD)).is_none());
    assert!(h.session.channel(Snowflake(FORUM)).is_some());
}

// === Threads ===

fn thread_json(id: u64, parent: u64, name: &str, archived: bool) -> Value {
    json!({
        "id": id.to_string(),
        "type": 11,
        "guild_id": "1",
        "parent_id": parent.to_string(),
        "name": name,
        "thread_metadata": { "archived": archived, "auto_archive_duration": 1440, "locked": false },
    })
}

#[tokio::test(start_paused = true)]
async fn forum_posts_need_content() {
    let h = harness().await;

    let response = h
        .call("create_thread", json!({ "channel_id": "21", "name": "Idea" }))
        .await;

    let error = response.error.unwrap();
    assert_eq!(error.kind, ErrorKind::InvalidArgument);
    assert_eq!(error.details.unwrap()["violations"][0]["field"], "content");
    assert_eq!(h.rest.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn forum_post_carries_its_opening_message() {
    let h = harness().await;
    h.rest.respond(Method::Post, "/channels/21/threads", 201, thread_json(70, FORUM, "Idea", false));

    let response = h
        .call(
            "create_thread",
            json!({ "channel_id": "21", "name": "Idea", "content": "What if..." }),
        )
        .await;

    assert!(response.success, "{response:?}");
    assert_eq!(
        body_of(&h, Method::Post, "/channels/21/threads"),
        json!({ "name": "Idea", "auto_archive_duration": 1440, "message": { "content": "What if..." } })
    );
}

#[tokio::test(start_paused = true)]
async fn text_channel_threads_are_public() {
    let h = harness().await;
    h.rest.respond(Method::Post, "/channels/20/threads", 201, thread_json(71, GENERAL, "Plans", false));

    let content = h
        .call(
            "create_thread",
            json!({ "channel_id": "20", "name": "Plans", "auto_archive_duration": 60 }),
        )
        .await
        .content
        .unwrap();

    assert_eq!(content["thread"]["type"], "public_thread");
    assert_eq!(
        body_of(&h, Method::Post, "/channels/20/threads"),
        json!({ "name": "Plans", "auto_archive_duration": 60, "type": 11 })
    );
    h.settle().await;
    assert!(h.session.channel(Snowflake(71)).is_some());
}

#[tokio::test(start_paused = true)]
async fn thread_from_a_message() {
    let h = harness().await;
    h.rest.respond(
        Method::Post,
        "/channels/20/messages/30/threads",
        201,
        thread_json(72, GENERAL, "Reply", false),
    );

    let response = h
        .call(
            "create_thread",
            json!({ "channel_id": "20", "name": "Reply", "message_id": "30" }),
        )
        .await;

    assert!(response.success, "{response:?}");
    assert_eq!(h.rest.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn archive_duration_must_be_a_known_value() {
    let h = harness().await;

    let response = h
        .call(
            "create_thread",
            json!({ "channel_id": "20", "name": "Plans", "auto_archive_duration": 90 }),
        )
        .await;

    assert_eq!(response.error_kind(), Some(ErrorKind::InvalidArgument));
}

#[tokio::test(start_paused = true)]
async fn thread_operations_refuse_plain_channels() {
    let h = harness().await;

    for op in ["delete_thread", "archive_thread", "unarchive_thread"] {
        let response = h.call(op, json!({ "thread_id": "20" })).await;
        assert_eq!(response.error_kind(), Some(ErrorKind::InvalidArgument), "{op}");
    }
    assert_eq!(h.rest.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn archive_and_unarchive() {
    let h = harness().await;
    h.rest.respond_once(
        Method::Patch,
        "/channels/22",
        cordproto::RestResponse::json(200, thread_json(THREAD, GENERAL, "release-plan", true)),
    );
    h.rest.respond(
        Method::Patch,
        "/channels/22",
        200,
        thread_json(THREAD, GENERAL, "release-plan", false),
    );

    let archived = h.call("archive_thread", json!({ "thread_id": "22" })).await;
    let unarchived = h.call("unarchive_thread", json!({ "thread_id": "22" })).await;

    assert_eq!(archived.content.unwrap()["thread"]["archived"], true);
    assert_eq!(unarchived.content.unwrap()["thread"]["archived"], false);
    let bodies: Vec<_> = h
        .rest
        .calls_to(Method::Patch, "/channels/22")
        .into_iter()
        .map(|c| c.body.unwrap())
        .collect();
    assert_eq!(bodies, vec![json!({ "archived": true }), json!({ "archived": false })]);
}

#[tokio::test(start_paused = true)]
async fn delete_thread() {
    let h = harness().await;
    h.rest.respond(Method::Delete, "/channels/22", 200, thread_json(THREAD, GENERAL, "release-plan", false));

    let content = h
        .call("delete_thread", json!({ "thread_id": "22", "reason": "done" }))
        .await
        .content
        .unwrap();

    assert_eq!(content, json!({ "deleted": true, "id": "22", "name": "release-plan" }));
    h.settle().await;
    assert!(h.session.channel(Snowflake(THREAD)).is_none());
}

// === Roles ===

#[tokio::test(start_paused = true)]
async fn roles_hide_everyone() {
    let h = harness().await;

    let content = h
        .call("list_roles", json!({ "server_id": "1" }))
        .await
        .content
        .unwrap();

    assert_eq!(content["count"], 1);
    assert_eq!(content["roles"][0]["name"], "Moderators");
    assert_eq!(content["roles"][0]["color"], "#3498DB");
    assert_eq!(h.rest.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn create_role_sends_numeric_color() {
    let h = harness().await;
    h.rest.respond(
        Method::Post,
        "/guilds/1/roles",
        200,
        role_json(41, "Helpers", 0xFF0000, 2),
    );

    let content = h
        .call(
            "create_role",
            json!({ "server_id": "1", "name": "Helpers", "color": "#FF0000", "hoist": true }),
        )
        .await
        .content
        .unwrap();

    assert_eq!(content["role"]["color"], "#FF0000");
    assert_eq!(
        body_of(&h, Method::Post, "/guilds/1/roles"),
        json!({ "name": "Helpers", "color": 0xFF0000, "hoist": true })
    );
    h.settle().await;
    assert_eq!(h.session.role(Snowflake(41)).unwrap().name, "Helpers");
}

#[tokio::test(start_paused = true)]
async fn bad_color_is_rejected() {
    let h = harness().await;

    let response = h
        .call("create_role", json!({ "server_id": "1", "name": "x", "color": "red" }))
        .await;

    assert_eq!(response.error_kind(), Some(ErrorKind::InvalidArgument));
    assert_eq!(h.rest.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn delete_role_reports_the_cached_name() {
    let h = harness().await;
    h.rest.respond(Method::Delete, "/guilds/1/roles/40", 204, Value::Null);

    let content = h
        .call("delete_role", json!({ "server_id": "1", "role_id": "40" }))
        .await
        .content
        .unwrap();

    assert_eq!(content["name"], "Moderators");
    h.settle().await;
    assert!(h.session.role(Snowflake(MOD_ROLE)).is_none());
}

#[tokio::test(start_paused = true)]
async fn role_assignment_is_reflected_on_the_member() {
    let h = harness().await;
    let path = "/guilds/1/members/50/roles/40";
    h.rest.respond(Method::Put, path, 204, Value::Null);
    h.rest.respond(Method::Delete, path, 204, Value::Null);
    let args = json!({ "server_id": "1", "user_id": "50", "role_id": "40" });

    let added = h.call("add_role", args.clone()).await;
    assert_eq!(added.content.unwrap()["added"], true);
    h.settle().await;
    let alice = h.session.member(Snowflake(GUILD), Snowflake(ALICE)).unwrap();
    assert_eq!(alice.roles, vec![Snowflake(MOD_ROLE)]);

    let removed = h.call("remove_role", args).await;
    assert_eq!(removed.content.unwrap()["removed"], true);
    h.settle().await;
    let alice = h.session.member(Snowflake(GUILD), Snowflake(ALICE)).unwrap();
    assert!(alice.roles.is_empty());
}

// === Messages ===

#[tokio::test(start_paused = true)]
async fn send_message_returns_ids() {
    let h = harness().await;
    h.rest.respond(
        Method::Post,
        "/channels/20/messages",
        200,
        message_json(30, GENERAL, 1, "hello"),
    );

    let content = h
        .call("send_message", json!({ "channel_id": "20", "content": "hello" }))
        .await
        .content
        .unwrap();

    assert_eq!(content["message_id"], "30");
    assert_eq!(content["channel_id"], "20");
    assert_eq!(body_of(&h, Method::Post, "/channels/20/messages"), json!({ "content": "hello" }));
}

#[tokio::test(start_paused = true)]
async fn send_message_with_only_an_embed() {
    let h = harness().await;
    h.rest.respond(Method::Post, "/channels/20/messages", 200, message_json(31, GENERAL, 1, ""));
    let embed = json!({ "title": "Release", "color": 3447003 });

    let response = h
        .call("send_message", json!({ "channel_id": "20", "embed": embed }))
        .await;

    assert!(response.success);
    assert_eq!(
        body_of(&h, Method::Post, "/channels/20/messages"),
        json!({ "embeds": [embed] })
    );
}

#[tokio::test(start_paused = true)]
async fn send_message_needs_something_to_send() {
    let h = harness().await;

    let response = h.call("send_message", json!({ "channel_id": "20" })).await;

    assert_eq!(response.error_kind(), Some(ErrorKind::InvalidArgument));
    assert_eq!(h.rest.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn read_messages_summarizes() {
    let h = harness().await;
    let mut first = message_json(30, GENERAL, 50, "first");
    first["reactions"] = json!([{ "count": 3, "me": false, "emoji": { "name": "👍" } }]);
    first["embeds"] = json!([{ "title": "x" }]);
    h.rest.respond(
        Method::Get,
        "/channels/20/messages",
        200,
        json!([first, message_json(29, GENERAL, 1, "second")]),
    );

    let content = h
        .call("read_messages", json!({ "channel_id": "20" }))
        .await
        .content
        .unwrap();

    assert_eq!(content["count"], 2);
    assert_eq!(content["messages"][0]["author"]["id"], "50");
    assert_eq!(content["messages"][0]["reactions"], json!([{ "emoji": "👍", "count": 3 }]));
    assert_eq!(content["messages"][0]["embeds"], 1);
    assert_eq!(
        query_of(&h, Method::Get, "/channels/20/messages"),
        vec![("limit".to_string(), "10".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn custom_emoji_reaction_path() {
    let h = harness().await;
    let path = format!(
        "/channels/20/messages/30/reactions/{}/@me",
        cordproto::encode_emoji("<:party:123>")
    );
    h.rest.respond(Method::Put, &path, 204, Value::Null);
    h.rest.respond(Method::Delete, &path, 204, Value::Null);
    let args = json!({ "channel_id": "20", "message_id": "30", "emoji": "<:party:123>" });

    let added = h.call("add_reaction", args.clone()).await;
    let removed = h.call("remove_reaction", args).await;

    assert_eq!(added.content.unwrap(), json!({ "added": true, "emoji": "<:party:123>" }));
    assert_eq!(removed.content.unwrap(), json!({ "removed": true, "emoji": "<:party:123>" }));
}

#[tokio::test(start_paused = true)]
async fn too_many_reactions_are_rejected() {
    let h = harness().await;
    let emojis: Vec<String> = (0..21).map(|i| format!("<:e{i}:{i}>")).collect();

    let response = h
        .call(
            "add_multiple_reactions",
            json!({ "channel_id": "20", "message_id": "30", "emojis": emojis }),
        )
        .await;

    assert_eq!(response.error_kind(), Some(ErrorKind::InvalidArgument));
    assert_eq!(h.rest.call_count(), 0);
}

// === Moderation ===

#[tokio::test(start_paused = true)]
async fn moderate_deletes_and_times_out() {
    let h = harness().await;
    h.rest.respond(Method::Get, "/channels/20/messages/30", 200, message_json(30, GENERAL, ALICE, "spam"));
    h.rest.respond(Method::Delete, "/channels/20/messages/30", 204, Value::Null);
    h.rest.respond_with(Method::Patch, "/guilds/1/members/50", |request| {
        let mut alice = serde_json::to_value(member(ALICE, "alice", &[])).unwrap();
        alice["communication_disabled_until"] =
            request.body.as_ref().unwrap()["communication_disabled_until"].clone();
        cordproto::RestResponse::json(200, alice)
    });

    let response = h
        .call(
            "moderate_message",
            json!({ "channel_id": "20", "message_id": "30", "reason": "spam", "timeout_minutes": 10 }),
        )
        .await;

    let content = response.content.unwrap();
    assert_eq!(content["deleted"], true);
    assert_eq!(content["author_id"], "50");
    let until = content["timeout_until"].as_str().unwrap().to_string();
    assert!(until.ends_with('Z'));

    let delete = &h.rest.calls_to(Method::Delete, "/channels/20/messages/30")[0];
    assert_eq!(delete.reason.as_deref(), Some("spam"));
    assert_eq!(
        body_of(&h, Method::Patch, "/guilds/1/members/50"),
        json!({ "communication_disabled_until": until })
    );

    h.settle().await;
    let alice = h.session.member(Snowflake(GUILD), Snowflake(ALICE)).unwrap();
    assert_eq!(alice.communication_disabled_until.as_deref(), Some(until.as_str()));
}

#[tokio::test(start_paused = true)]
async fn moderate_without_timeout_only_deletes() {
    let h = harness().await;
    h.rest.respond(Method::Get, "/channels/20/messages/30", 200, message_json(30, GENERAL, ALICE, "spam"));
    h.rest.respond(Method::Delete, "/channels/20/messages/30", 204, Value::Null);

    let response = h
        .call(
            "moderate_message",
            json!({ "channel_id": "20", "message_id": "30", "reason": "spam" }),
        )
        .await;

    assert!(response.success);
    assert!(response.content.unwrap().get("timeout_until").is_none());
    assert_eq!(h.rest.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn moderate_reports_a_failed_timeout_after_deleting() {
    let h = harness().await;
    h.rest.respond(Method::Get, "/channels/20/messages/30", 200, message_json(30, GENERAL, ALICE, "spam"));
    h.rest.respond(Method::Delete, "/channels/20/messages/30", 204, Value::Null);
    h.rest.respond(
        Method::Patch,
        "/guilds/1/members/50",
        403,
        json!({ "code": 50013, "message": "Missing Permissions" }),
    );

    let response = h
        .call(
            "moderate_message",
            json!({ "channel_id": "20", "message_id": "30", "reason": "spam", "timeout_minutes": 5 }),
        )
        .await;

    let error = response.error.unwrap();
    assert_eq!(error.kind, ErrorKind::PartialFailure);
    let details = error.details.unwrap();
    assert_eq!(details["deleted"], true);
    assert_eq!(details["timeout_error"]["kind"], "RemotePermission");
}

#[tokio::test(start_paused = true)]
async fn moderate_needs_a_reason() {
    let h = harness().await;

    let response = h
        .call("moderate_message", json!({ "channel_id": "20", "message_id": "30" }))
        .await;

    assert_eq!(response.error_kind(), Some(ErrorKind::InvalidArgument));
    assert_eq!(h.rest.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn timeout_member_converts_units() {
    let h = harness().await;
    h.rest.respond(
        Method::Patch,
        "/guilds/1/members/50",
        200,
        serde_json::to_value(member(ALICE, "alice", &[])).unwrap(),
    );

    let content = h
        .call(
            "timeout_member",
            json!({ "server_id": "1", "user_id": "50", "duration": 2, "unit": "Hours" }),
        )
        .await
        .content
        .unwrap();

    assert_eq!(content["timed_out"], true);
    assert_eq!(content["seconds"], 7200);
    assert!(content["until"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test(start_paused = true)]
async fn zero_duration_clears_the_timeout() {
    let h = harness().await;
    h.rest.respond(
        Method::Patch,
        "/guilds/1/members/50",
        200,
        serde_json::to_value(member(ALICE, "alice", &[])).unwrap(),
    );

    let content = h
        .call(
            "timeout_member",
            json!({ "server_id": "1", "user_id": "50", "duration": 0 }),
        )
        .await
        .content
        .unwrap();

    assert_eq!(content, json!({ "user_id": "50", "timed_out": false }));
    assert_eq!(
        body_of(&h, Method::Patch, "/guilds/1/members/50"),
        json!({ "communication_disabled_until": null })
    );
}

#[tokio::test(start_paused = true)]
async fn timeouts_past_28_days_are_rejected() {
    let h = harness().await;

    let response = h
        .call(
            "timeout_member",
            json!({ "server_id": "1", "user_id": "50", "duration": 29, "unit": "days" }),
        )
        .await;

    let error = response.error.unwrap();
    assert_eq!(error.kind, ErrorKind::InvalidArgument);
    assert_eq!(error.details.unwrap()["max_seconds"], 2_419_200);
    assert_eq!(h.rest.call_count(), 0);
}

// === Webhooks ===

#[tokio::test(start_paused = true)]
async fn created_webhook_includes_its_token_but_listings_do_not() {
    let h = harness().await;
    let webhook = json!({
        "id": "80",
        "type": 1,
        "guild_id": "1",
        "channel_id": "20",
        "name": "Deploys",
        "token": "abc_DEF-123",
        "url": "https://discord.com/api/webhooks/80/abc_DEF-123",
    });
    h.rest.respond(Method::Post, "/channels/20/webhooks", 200, webhook.clone());
    h.rest.respond(Method::Get, "/channels/20/webhooks", 200, json!([webhook]));

    let created = h
        .call("create_webhook", json!({ "channel_id": "20", "name": "Deploys" }))
        .await
        .content
        .unwrap();
    let listed = h
        .call("list_webhooks", json!({ "channel_id": "20" }))
        .await
        .content
        .unwrap();

    assert_eq!(created["token"], "abc_DEF-123");
    assert_eq!(listed["count"], 1);
    assert!(listed["webhooks"][0].get("token").is_none());
    assert_eq!(listed["webhooks"][0]["name"], "Deploys");
}

#[tokio::test(start_paused = true)]
async fn webhook_messages_wait_for_the_message() {
    let h = harness().await;
    h.rest.respond(
        Method::Post,
        "/webhooks/80/abc_DEF-123",
        200,
        message_json(90, GENERAL, 80, "deployed"),
    );

    let content = h
        .call(
            "send_webhook_message",
            json!({
                "webhook_id": "80",
                "webhook_token": "abc_DEF-123",
                "content": "deployed",
                "username": "CI",
            }),
        )
        .await
        .content
        .unwrap();

    assert_eq!(content, json!({ "message_id": "90", "channel_id": "20", "webhook_id": "80" }));
    assert_eq!(
        query_of(&h, Method::Post, "/webhooks/80/abc_DEF-123"),
        vec![("wait".to_string(), "true".to_string())]
    );
    assert_eq!(
        body_of(&h, Method::Post, "/webhooks/80/abc_DEF-123"),
        json!({ "content": "deployed", "username": "CI" })
    );
}

#[tokio::test(start_paused = true)]
async fn webhook_tokens_cannot_escape_the_path() {
    let h = harness().await;

    let response = h
        .call(
            "send_webhook_message",
            json!({ "webhook_id": "80", "webhook_token": "../../users/@me", "content": "x" }),
        )
        .await;

    assert_eq!(response.error_kind(), Some(ErrorKind::InvalidArgument));
    assert_eq!(h.rest.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn edit_and_delete_webhook() {
    let h = harness().await;
    h.rest.respond(
        Method::Patch,
        "/webhooks/80",
        200,
        json!({ "id": "80", "channel_id": "20", "name": "Releases" }),
    );
    h.rest.respond(Method::Delete, "/webhooks/80", 204, Value::Null);

    let empty = h.call("edit_webhook", json!({ "webhook_id": "80" })).await;
    let edited = h
        .call("edit_webhook", json!({ "webhook_id": "80", "name": "Releases" }))
        .await;
    let deleted = h.call("delete_webhook", json!({ "webhook_id": "80" })).await;

    assert_eq!(empty.error_kind(), Some(ErrorKind::InvalidArgument));
    assert_eq!(edited.content.unwrap()["webhook"]["name"], "Releases");
    assert_eq!(deleted.content.unwrap(), json!({ "deleted": true, "id": "80" }));
}

// === Application commands ===

#[tokio::test(start_paused = true)]
async fn commands_use_the_application_from_ready() {
    let h = harness().await;
    let command = json!({
        "id": "900",
        "application_id": "777",
        "name": "ping",
        "description": "Replies with pong",
        "type": 1,
        "options": [{ "name": "loud", "type": 5 }],
    });
    h.rest.respond(Method::Get, "/applications/777/commands", 200, json!([command]));
    h.rest.respond(Method::Get, "/applications/777/guilds/1/commands", 200, json!([]));

    let global = h
        .call("list_global_commands", json!({}))
        .await
        .content
        .unwrap();
    let guild = h
        .call("list_guild_commands", json!({ "server_id": "1" }))
        .await
        .content
        .unwrap();

    assert_eq!(global["application_id"], "777");
    assert_eq!(
        global["commands"][0],
        json!({ "id": "900", "name": "ping", "description": "Replies with pong", "type": "chat_input", "options": 1 })
    );
    assert_eq!(guild["count"], 0);
    assert_eq!(guild["server_id"], "1");
}
