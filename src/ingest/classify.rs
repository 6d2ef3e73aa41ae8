//! Query classification
//!
//! Pure tagging functions over a row's query text. All matching is
//! case-insensitive.

use regex::{Regex, RegexSet};
use std::fmt;
use std::sync::LazyLock;

use super::LogRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueryType {
    Select,
    Insert,
    Truncate,
    Update,
    Delete,
    Drop,
    Create,
    Alter,
    Other,
    Unknown,
}

/// Checked in order; the first keyword found anywhere in the text wins.
const QUERY_TYPE_PRIORITY: &[(&str, QueryType)] = &[
    ("select", QueryType::Select),
    ("insert", QueryType::Insert),
    ("truncate", QueryType::Truncate),
    ("update", QueryType::Update),
    ("delete", QueryType::Delete),
    ("drop", QueryType::Drop),
    ("create", QueryType::Create),
    ("alter", QueryType::Alter),
];

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Select => "SELECT",
            QueryType::Insert => "INSERT",
            QueryType::Truncate => "TRUNCATE",
            QueryType::Update => "UPDATE",
            QueryType::Delete => "DELETE",
            QueryType::Drop => "DROP",
            QueryType::Create => "CREATE",
            QueryType::Alter => "ALTER",
            QueryType::Other => "OTHER",
            QueryType::Unknown => "UNKNOWN",
        }
    }

    pub fn family(&self) -> Option<ActivityFamily> {
        match self {
            QueryType::Select | QueryType::Insert | QueryType::Update | QueryType::Delete => {
                Some(ActivityFamily::Dml)
            }
            QueryType::Create | QueryType::Alter | QueryType::Drop | QueryType::Truncate => {
                Some(ActivityFamily::Ddl)
            }
            QueryType::Other | QueryType::Unknown => None,
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityFamily {
    Dml,
    Ddl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SecurityEventType {
    PasswordChange,
    FailedLogon,
    RoleCreated,
    RoleDeleted,
    UserCreated,
    PermissionRevoked,
    PermissionGranted,
    Shutdown,
}

/// Categories overlap, so order matters: first match wins.
const SECURITY_KEYWORDS: &[(SecurityEventType, &[&str])] = &[
    (SecurityEventType::PasswordChange, &["alter user", "set password"]),
    (SecurityEventType::FailedLogon, &["failed login"]),
    (SecurityEventType::RoleCreated, &["create role"]),
    (SecurityEventType::RoleDeleted, &["drop role"]),
    (SecurityEventType::UserCreated, &["create user"]),
    (SecurityEventType::PermissionRevoked, &["revoke"]),
    (SecurityEventType::PermissionGranted, &["grant"]),
    (SecurityEventType::Shutdown, &["shutdown"]),
];

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventType::PasswordChange => "PASSWORD_CHANGE",
            SecurityEventType::FailedLogon => "FAILED_LOGON",
            SecurityEventType::RoleCreated => "ROLE_CREATED",
            SecurityEventType::RoleDeleted => "ROLE_DELETED",
            SecurityEventType::UserCreated => "USER_CREATED",
            SecurityEventType::PermissionRevoked => "PERMISSION_REVOKED",
            SecurityEventType::PermissionGranted => "PERMISSION_GRANTED",
            SecurityEventType::Shutdown => "SHUTDOWN",
        }
    }
}

impl fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// High-risk patterns. These are regexes, hence the escaped parentheses.
const SUSPICIOUS_PATTERNS: &[&str] = &[
    "truncate",
    "drop",
    "delete",
    "xp_cmdshell",
    "sp_executesql",
    "insert bulk",
    r"with\(nolock\)",
];

static SUSPICIOUS_SET: LazyLock<RegexSet> = LazyLock::new(|| {
    let patterns = SUSPICIOUS_PATTERNS.iter().map(|p| format!("(?i){p}"));
    RegexSet::new(patterns).expect("static suspicious patterns compile")
});

// Longer keywords come first so `delete from x` is not read as `from x`.
static OBJECT_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\b(?:delete\s+from|truncate\s+table|create\s+table|drop\s+table|from|into|update|table|join)\s+([\w\[\]"`'.$#@]+)"#,
    )
    .expect("static object name pattern compiles")
});

const QUOTE_CHARS: &[char] = &['[', ']', '"', '`', '\''];

pub fn query_type(query: Option<&str>) -> QueryType {
    let Some(query) = query.filter(|q| !q.trim().is_empty()) else {
        return QueryType::Unknown;
    };
    let lowered = query.to_lowercase();
    QUERY_TYPE_PRIORITY
        .iter()
        .find(|(keyword, _)| lowered.contains(keyword))
        .map(|(_, kind)| *kind)
        .unwrap_or(QueryType::Other)
}

pub fn is_suspicious(query: Option<&str>) -> bool {
    query.is_some_and(|q| SUSPICIOUS_SET.is_match(q))
}

pub fn security_event(query: Option<&str>) -> Option<SecurityEventType> {
    let lowered = query?.to_lowercase();
    SECURITY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(kind, _)| *kind)
}

/// Best-effort name of the table or object a statement touches. Complex SQL
/// (subqueries, CTEs) can yield the wrong identifier.
pub fn object_name(query: Option<&str>) -> Option<String> {
    let caps = OBJECT_NAME_RE.captures(query?)?;
    let name: String = caps[1].chars().filter(|c| !QUOTE_CHARS.contains(c)).collect();
    (!name.is_empty()).then_some(name)
}

/// All tags for one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub query_type: QueryType,
    pub suspicious: bool,
    pub security_event: Option<SecurityEventType>,
    pub object_name: Option<String>,
}

impl Classification {
    pub fn family(&self) -> Option<ActivityFamily> {
        self.query_type.family()
    }
}

pub fn classify(row: &LogRow) -> Classification {
    let query = row.query.as_deref();
    Classification {
        query_type: query_type(query),
        suspicious: is_suspicious(query),
        security_event: security_event(query),
        object_name: object_name(query),
    }
}
