//! Matching language shared by selectors and filters.
//!
//! A [`Query`] is an ordered list of sub-queries reduced with `OR` (default)
//! or `AND`. Each sub-query holds either a single predicate or a nested
//! group, and may be negated before reduction. Inside one predicate every
//! field that is set must hold.

use cellar_core::{Node, NodeType, User};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::message::{ActionOutput, TriggerEvent};

/// Something a predicate can be evaluated against.
pub trait Predicate<T: ?Sized> {
    fn matches(&self, target: &T) -> bool;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    #[default]
    Or,
    And,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query<P> {
    #[serde(default = "Vec::new")]
    pub sub_queries: Vec<SubQuery<P>>,
    #[serde(default)]
    pub operation: Operation,
}

impl<P> Default for Query<P> {
    fn default() -> Self {
        Self {
            sub_queries: Vec::new(),
            operation: Operation::Or,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuery<P> {
    #[serde(default)]
    pub not: bool,
    #[serde(flatten)]
    pub clause: Clause<P>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Clause<P> {
    Match(P),
    Group(Query<P>),
}

impl<P> Query<P> {
    /// Query of a single predicate.
    pub fn single(predicate: P) -> Self {
        Self::default().or(predicate)
    }

    pub fn all_of(predicates: impl IntoIterator<Item = P>) -> Self {
        let mut query = Self {
            operation: Operation::And,
            ..Self::default()
        };
        for p in predicates {
            query = query.or(p);
        }
        query
    }

    /// Append a predicate. The name refers to the default reduction only.
    pub fn or(mut self, predicate: P) -> Self {
        self.sub_queries.push(SubQuery {
            not: false,
            clause: Clause::Match(predicate),
        });
        self
    }

    pub fn not(mut self, predicate: P) -> Self {
        self.sub_queries.push(SubQuery {
            not: true,
            clause: Clause::Match(predicate),
        });
        self
    }

    pub fn group(mut self, query: Query<P>) -> Self {
        self.sub_queries.push(SubQuery {
            not: false,
            clause: Clause::Group(query),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sub_queries.is_empty()
    }

    /// Evaluate against `target`. An empty query matches everything.
    pub fn matches<T: ?Sized>(&self, target: &T) -> bool
    where
        P: Predicate<T>,
    {
        if self.sub_queries.is_empty() {
            return true;
        }
        let mut results = self.sub_queries.iter().map(|sq| {
            let hit = match &sq.clause {
                Clause::Match(p) => p.matches(target),
                Clause::Group(q) => q.matches(target),
            };
            hit != sq.not
        });
        match self.operation {
            Operation::And => results.all(|r| r),
            Operation::Or => results.any(|r| r),
        }
    }
}

/// Glob with leading and/or trailing `*`; anything else is exact equality.
pub fn glob_match(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let starts = pattern.starts_with('*');
    let ends = pattern.len() > 1 && pattern.ends_with('*');
    let core = pattern.trim_start_matches('*').trim_end_matches('*');
    match (starts, ends) {
        (true, true) => value.contains(core),
        (true, false) => value.ends_with(core),
        (false, true) => value.starts_with(core),
        (false, false) => value == pattern,
    }
}

fn in_range(value: i64, min: i64, max: i64) -> bool {
    (min == 0 || value >= min) && (max == 0 || value <= max)
}

/// Single-node predicate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMatch {
    /// Exact paths.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
    /// Any of these prefixes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path_prefix: Vec<String>,
    /// Glob on the last path segment.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_name: String,
    /// Comma-separated, case-insensitive.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub extension: String,
    #[serde(default)]
    pub min_size: i64,
    #[serde(default)]
    pub max_size: i64,
    #[serde(default)]
    pub min_date: i64,
    #[serde(default)]
    pub max_date: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<NodeType>,
}

impl NodeMatch {
    pub fn min_size(min: i64) -> Self {
        Self {
            min_size: min,
            ..Default::default()
        }
    }

    pub fn extension(list: &str) -> Self {
        Self {
            extension: list.to_string(),
            ..Default::default()
        }
    }

    pub fn prefix(prefix: &str) -> Self {
        Self {
            path_prefix: vec![prefix.to_string()],
            ..Default::default()
        }
    }
}

impl Predicate<Node> for NodeMatch {
    fn matches(&self, node: &Node) -> bool {
        if !self.paths.is_empty() && !self.paths.iter().any(|p| *p == node.path) {
            return false;
        }
        if !self.path_prefix.is_empty()
            && !self.path_prefix.iter().any(|p| node.path.starts_with(p.as_str()))
        {
            return false;
        }
        if !self.file_name.is_empty() && !glob_match(&self.file_name, node.name()) {
            return false;
        }
        if !self.extension.is_empty() {
            let Some(ext) = node.extension() else {
                return false;
            };
            let wanted = self
                .extension
                .split(',')
                .map(|e| e.trim().trim_start_matches('.'))
                .filter(|e| !e.is_empty());
            if !wanted.into_iter().any(|e| e.eq_ignore_ascii_case(ext)) {
                return false;
            }
        }
        if let Some(t) = self.node_type {
            if t != NodeType::Unknown && node.node_type != t {
                return false;
            }
        }
        in_range(node.size, self.min_size, self.max_size)
            && in_range(node.mtime, self.min_date, self.max_date)
    }
}

/// Single-user predicate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserMatch {
    /// Glob on the login.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub login: String,
    /// Prefix of the group path.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub profile: String,
    /// Any of these roles.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

impl UserMatch {
    pub fn login(pattern: &str) -> Self {
        Self {
            login: pattern.to_string(),
            ..Default::default()
        }
    }
}

impl Predicate<User> for UserMatch {
    fn matches(&self, user: &User) -> bool {
        (self.login.is_empty() || glob_match(&self.login, &user.login))
            && (self.group_path.is_empty() || user.group_path.starts_with(&self.group_path))
            && (self.profile.is_empty() || user.profile == self.profile)
            && (self.roles.is_empty() || self.roles.iter().any(|r| user.roles.contains(r)))
    }
}

/// What a [`SourceMatch`] is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct SourceContext<'a> {
    pub event: Option<&'a TriggerEvent>,
    pub last_output: Option<&'a ActionOutput>,
}

/// Predicate over the triggering request and the upstream output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMatch {
    /// Single address or CIDR block, e.g. `192.168.0.0/16`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip_mask: String,
    /// Glob on the user agent.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_agent: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub workspace_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_login: String,
    /// Required success flag of the last upstream output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_success: Option<bool>,
    /// Glob on the last upstream output's string body.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output_body: String,
}

impl Predicate<SourceContext<'_>> for SourceMatch {
    fn matches(&self, ctx: &SourceContext<'_>) -> bool {
        let meta = |key: &str| ctx.event.and_then(|ev| ev.metadata(key)).unwrap_or("");
        use cellar_core::events::metadata;

        if !self.ip_mask.is_empty() && !ip_in_mask(meta(metadata::REMOTE_ADDRESS), &self.ip_mask) {
            return false;
        }
        if !self.user_agent.is_empty() && !glob_match(&self.user_agent, meta(metadata::USER_AGENT))
        {
            return false;
        }
        if !self.workspace_id.is_empty() && meta(metadata::WORKSPACE_ID) != self.workspace_id {
            return false;
        }
        if !self.user_login.is_empty() && meta(metadata::USER_LOGIN) != self.user_login {
            return false;
        }
        if let Some(wanted) = self.output_success {
            if ctx.last_output.map(|o| o.success) != Some(wanted) {
                return false;
            }
        }
        if !self.output_body.is_empty() {
            let body = ctx.last_output.map(|o| o.string_body.as_str()).unwrap_or("");
            if !glob_match(&self.output_body, body) {
                return false;
            }
        }
        true
    }
}

/// Whether `addr` (optionally `host:port`) falls inside `mask`.
fn ip_in_mask(addr: &str, mask: &str) -> bool {
    let Some(ip) = parse_ip(addr) else {
        return false;
    };
    let (net, bits) = match mask.split_once('/') {
        Some((net, bits)) => match bits.parse::<u32>() {
            Ok(b) => (net, Some(b)),
            Err(_) => return false,
        },
        None => (mask, None),
    };
    let Ok(net) = net.parse::<IpAddr>() else {
        return false;
    };
    match (ip, net) {
        (IpAddr::V4(a), IpAddr::V4(n)) => {
            prefix_eq(u32::from(a) as u128, u32::from(n) as u128, bits.unwrap_or(32), 32)
        }
        (IpAddr::V6(a), IpAddr::V6(n)) => {
            prefix_eq(u128::from(a), u128::from(n), bits.unwrap_or(128), 128)
        }
        _ => false,
    }
}

fn prefix_eq(a: u128, b: u128, bits: u32, width: u32) -> bool {
    if bits > width {
        return false;
    }
    if bits == 0 {
        return true;
    }
    let shift = width - bits;
    (a >> shift) == (b >> shift)
}

fn parse_ip(addr: &str) -> Option<IpAddr> {
    if let Ok(ip) = addr.parse::<IpAddr>() {
        return Some(ip);
    }
    addr.parse::<std::net::SocketAddr>().ok().map(|s| s.ip())
}
