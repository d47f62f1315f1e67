//! Outbound REST requests and their rate-limit route keys.

use std::fmt;

use serde_json::Value;

use crate::ids::Snowflake;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a rate-limit window: method, path template, and the major
/// parameter (channel, guild, or webhook id) Discord partitions buckets by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub method: Method,
    pub template: &'static str,
    pub major: Option<String>,
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.major {
            Some(major) => write!(f, "{} {} [{}]", self.method, self.template, major),
            None => write!(f, "{} {}", self.method, self.template),
        }
    }
}

/// Top-level path segments whose first parameter is a major parameter.
const MAJOR_ROOTS: [&str; 3] = ["/channels/{}", "/guilds/{}", "/webhooks/{}"];

/// One REST call. Build with [`RestRequest::new`], then chain the options.
#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
    pub method: Method,
    pub path: String,
    pub route: RouteKey,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Audit log reason; URL-encoded by the transport.
    pub reason: Option<String>,
}

impl RestRequest {
    /// Fill each `{}` in `template` with the next parameter.
    ///
    /// Parameters must already be path-safe; reaction emoji go through
    /// [`encode_emoji`] first.
    pub fn new(method: Method, template: &'static str, params: &[&(dyn fmt::Display + Sync)]) -> Self {
        let mut path = String::with_capacity(template.len() + params.len() * 20);
        let mut rest = template;
        let mut params_iter = params.iter();
        while let Some(idx) = rest.find("{}") {
            path.push_str(&rest[..idx]);
            if let Some(p) = params_iter.next() {
                path.push_str(&p.to_string());
            }
            rest = &rest[idx + 2..];
        }
        path.push_str(rest);

        let major = if MAJOR_ROOTS.iter().any(|root| template.starts_with(root)) {
            params.first().map(|p| p.to_string())
        } else {
            None
        };

        Self {
            method,
            path,
            route: RouteKey {
                method,
                template,
                major,
            },
            query: Vec::new(),
            body: None,
            reason: None,
        }
    }

    pub fn get(template: &'static str, params: &[&(dyn fmt::Display + Sync)]) -> Self {
        Self::new(Method::Get, template, params)
    }

    pub fn post(template: &'static str, params: &[&(dyn fmt::Display + Sync)]) -> Self {
        Self::new(Method::Post, template, params)
    }

    pub fn put(template: &'static str, params: &[&(dyn fmt::Display + Sync)]) -> Self {
        Self::new(Method::Put, template, params)
    }

    pub fn patch(template: &'static str, params: &[&(dyn fmt::Display + Sync)]) -> Self {
        Self::new(Method::Patch, template, params)
    }

    pub fn delete(template: &'static str, params: &[&(dyn fmt::Display + Sync)]) -> Self {
        Self::new(Method::Delete, template, params)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn reason(mut self, reason: Option<&str>) -> Self {
        self.reason = reason.filter(|r| !r.is_empty()).map(str::to_string);
        self
    }

    /// The major parameter parsed back as an id, when it is one.
    pub fn major_id(&self) -> Option<Snowflake> {
        self.route.major.as_deref().and_then(|m| m.parse().ok())
    }
}

/// Encode an emoji for a reaction path.
///
/// Unicode emoji are percent-encoded; custom emoji arrive as `<:name:id>` or
/// `name:id` and travel as `name:id`.
pub fn encode_emoji(emoji: &str) -> String {
    let trimmed = emoji.trim();
    let custom = trimmed
        .strip_prefix("<a:")
        .or_else(|| trimmed.strip_prefix("<:"))
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(trimmed);

    urlencoding::encode(custom).into_owned()
}
