//! Token scopes, principal roles, and the tables that relate them.
//!
//! A capability is available for an entity when at least one of the viewer's
//! roles on that entity allows the scope, and the token actually carries it.
//! Token scopes are closed under implication once, at parse time (holding
//! `repo` means holding `public_repo`, and so on).

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Classic personal access token scopes.
pub mod scope {
    pub const REPO: &str = "repo";
    pub const REPO_STATUS: &str = "repo:status";
    pub const REPO_DEPLOYMENT: &str = "repo_deployment";
    pub const PUBLIC_REPO: &str = "public_repo";
    pub const REPO_INVITE: &str = "repo:invite";
    pub const SECURITY_EVENTS: &str = "security_events";
    pub const DELETE_REPO: &str = "delete_repo";

    pub const WORKFLOW: &str = "workflow";

    pub const WRITE_PACKAGES: &str = "write:packages";
    pub const READ_PACKAGES: &str = "read:packages";
    pub const DELETE_PACKAGES: &str = "delete:packages";

    pub const ADMIN_ORG: &str = "admin:org";
    pub const WRITE_ORG: &str = "write:org";
    pub const READ_ORG: &str = "read:org";

    pub const ADMIN_PUBLIC_KEY: &str = "admin:public_key";
    pub const WRITE_PUBLIC_KEY: &str = "write:public_key";
    pub const READ_PUBLIC_KEY: &str = "read:public_key";

    pub const ADMIN_ORG_HOOK: &str = "admin:org_hook";
    pub const ADMIN_REPO_HOOK: &str = "admin:repo_hook";
    pub const WRITE_REPO_HOOK: &str = "write:repo_hook";
    pub const READ_REPO_HOOK: &str = "read:repo_hook";

    pub const GIST: &str = "gist";
    pub const NOTIFICATIONS: &str = "notifications";

    pub const USER: &str = "user";
    pub const READ_USER: &str = "read:user";
    pub const READ_EMAIL: &str = "read:email";
    pub const USER_FOLLOW: &str = "user:follow";

    pub const WRITE_DISCUSSION: &str = "write:discussion";
    pub const READ_DISCUSSION: &str = "read:discussion";

    pub const ADMIN_ENTERPRISE: &str = "admin:enterprise";
    pub const MANAGE_RUNNERS_ENTERPRISE: &str = "manage_runners:enterprise";
    pub const MANAGE_BILLING_ENTERPRISE: &str = "manage_billing:enterprise";
    pub const READ_ENTERPRISE: &str = "read:enterprise";

    pub const PROJECT: &str = "project";
    pub const READ_PROJECT: &str = "read:project";

    pub const ADMIN_GPG_KEY: &str = "admin:gpg_key";
    pub const WRITE_GPG_KEY: &str = "write:gpg_key";
    pub const READ_GPG_KEY: &str = "read:gpg_key";

    /// Every known scope.
    pub const ALL: &[&str] = &[
        REPO,
        REPO_STATUS,
        REPO_DEPLOYMENT,
        PUBLIC_REPO,
        REPO_INVITE,
        SECURITY_EVENTS,
        DELETE_REPO,
        WORKFLOW,
        WRITE_PACKAGES,
        READ_PACKAGES,
        DELETE_PACKAGES,
        ADMIN_ORG,
        WRITE_ORG,
        READ_ORG,
        ADMIN_PUBLIC_KEY,
        WRITE_PUBLIC_KEY,
        READ_PUBLIC_KEY,
        ADMIN_ORG_HOOK,
        ADMIN_REPO_HOOK,
        WRITE_REPO_HOOK,
        READ_REPO_HOOK,
        GIST,
        NOTIFICATIONS,
        USER,
        READ_USER,
        READ_EMAIL,
        USER_FOLLOW,
        WRITE_DISCUSSION,
        READ_DISCUSSION,
        ADMIN_ENTERPRISE,
        MANAGE_RUNNERS_ENTERPRISE,
        MANAGE_BILLING_ENTERPRISE,
        READ_ENTERPRISE,
        PROJECT,
        READ_PROJECT,
        ADMIN_GPG_KEY,
        WRITE_GPG_KEY,
        READ_GPG_KEY,
    ];
}

use scope::*;

/// Broad scope → narrower scopes it grants.
///
/// Some edges (`repo` → `admin:repo_hook`, `admin:org` → `admin:org_hook`, ...)
/// aren't listed in GitHub's UI but hold in practice.
const IMPLICATIONS: &[(&str, &[&str])] = &[
    (
        REPO,
        &[
            REPO_STATUS,
            REPO_DEPLOYMENT,
            PUBLIC_REPO,
            REPO_INVITE,
            SECURITY_EVENTS,
            DELETE_REPO,
            ADMIN_REPO_HOOK,
            WORKFLOW,
        ],
    ),
    (ADMIN_REPO_HOOK, &[WRITE_REPO_HOOK]),
    (WRITE_REPO_HOOK, &[READ_REPO_HOOK]),
    (
        ADMIN_ORG,
        &[
            WRITE_ORG,
            READ_ORG,
            ADMIN_ORG_HOOK,
            PROJECT,
            WRITE_PACKAGES,
            DELETE_PACKAGES,
            WRITE_DISCUSSION,
        ],
    ),
    (
        USER,
        &[
            READ_EMAIL,
            USER_FOLLOW,
            READ_USER,
            ADMIN_PUBLIC_KEY,
            ADMIN_GPG_KEY,
            NOTIFICATIONS,
            GIST,
        ],
    ),
    (WRITE_PACKAGES, &[READ_PACKAGES]),
    (ADMIN_PUBLIC_KEY, &[WRITE_PUBLIC_KEY]),
    (WRITE_PUBLIC_KEY, &[READ_PUBLIC_KEY]),
    (ADMIN_GPG_KEY, &[WRITE_GPG_KEY, READ_GPG_KEY]),
    (WRITE_GPG_KEY, &[READ_GPG_KEY]),
    (WRITE_DISCUSSION, &[READ_DISCUSSION]),
    (
        ADMIN_ENTERPRISE,
        &[
            MANAGE_BILLING_ENTERPRISE,
            MANAGE_RUNNERS_ENTERPRISE,
            READ_ENTERPRISE,
        ],
    ),
    (PROJECT, &[READ_PROJECT]),
];

/// Scopes a token holds, closed under [`IMPLICATIONS`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenScopes(BTreeSet<String>);

impl TokenScopes {
    /// Parse a scope list and apply the implication closure.
    pub fn parse<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let raw = scopes
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Self(close(raw))
    }

    /// Parse the `X-OAuth-Scopes` response header (`"repo, read:org"`).
    pub fn from_header(value: &str) -> Self {
        Self::parse(value.split(','))
    }

    #[must_use]
    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    /// Re-apply the implication closure. Always a no-op on parsed scopes.
    #[must_use]
    pub fn closed(self) -> Self {
        Self(close(self.0))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

fn close(mut scopes: BTreeSet<String>) -> BTreeSet<String> {
    loop {
        let before = scopes.len();
        for (broad, narrower) in IMPLICATIONS {
            if scopes.contains(*broad) {
                scopes.extend(narrower.iter().map(|s| s.to_string()));
            }
        }
        if scopes.len() == before {
            return scopes;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OrgRole {
    Owner,
    Member,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RepoRole {
    Admin,
    Maintain,
    Write,
    Triage,
    Read,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EnterpriseRole {
    Admin,
    ManageBilling,
    ManageRunners,
    Read,
}

/// A viewer's relationship to one entity.
///
/// The three taxonomies never share a wire string, so a role string parses
/// into exactly one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Org(OrgRole),
    Repo(RepoRole),
    Enterprise(EnterpriseRole),
}

impl Role {
    pub const ORG_OWNER: Role = Role::Org(OrgRole::Owner);
    pub const ORG_MEMBER: Role = Role::Org(OrgRole::Member);
    pub const ENTERPRISE_ADMIN: Role = Role::Enterprise(EnterpriseRole::Admin);

    /// Organization role from the membership API's `can administer` bit.
    ///
    /// Only organizations the viewer belongs to are listed, so anything short
    /// of administration is plain membership.
    #[must_use]
    pub fn org(can_administer: bool) -> Self {
        if can_administer {
            Role::ORG_OWNER
        } else {
            Role::ORG_MEMBER
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Org(OrgRole::Owner) => "OWNER",
            Role::Org(OrgRole::Member) => "MEMBER",
            Role::Repo(RepoRole::Admin) => "ADMIN",
            Role::Repo(RepoRole::Maintain) => "MAINTAIN",
            Role::Repo(RepoRole::Write) => "WRITE",
            Role::Repo(RepoRole::Triage) => "TRIAGE",
            Role::Repo(RepoRole::Read) => "READ",
            Role::Enterprise(EnterpriseRole::Admin) => ADMIN_ENTERPRISE,
            Role::Enterprise(EnterpriseRole::ManageBilling) => MANAGE_BILLING_ENTERPRISE,
            Role::Enterprise(EnterpriseRole::ManageRunners) => MANAGE_RUNNERS_ENTERPRISE,
            Role::Enterprise(EnterpriseRole::Read) => READ_ENTERPRISE,
        }
    }

    /// Parse a wire role string; `None` for unknown roles (including `NONE`).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let role = match value {
            "OWNER" => Role::Org(OrgRole::Owner),
            "MEMBER" => Role::Org(OrgRole::Member),
            "ADMIN" => Role::Repo(RepoRole::Admin),
            "MAINTAIN" => Role::Repo(RepoRole::Maintain),
            "WRITE" => Role::Repo(RepoRole::Write),
            "TRIAGE" => Role::Repo(RepoRole::Triage),
            "READ" => Role::Repo(RepoRole::Read),
            ADMIN_ENTERPRISE => Role::Enterprise(EnterpriseRole::Admin),
            MANAGE_BILLING_ENTERPRISE => Role::Enterprise(EnterpriseRole::ManageBilling),
            MANAGE_RUNNERS_ENTERPRISE => Role::Enterprise(EnterpriseRole::ManageRunners),
            READ_ENTERPRISE => Role::Enterprise(EnterpriseRole::Read),
            _ => return None,
        };
        Some(role)
    }

    /// Whether this role's table allows `scope`, ignoring what the token holds.
    fn allows(&self, scope: &str) -> bool {
        match self {
            Role::Org(OrgRole::Owner) => true,
            Role::Org(OrgRole::Member) => ORG_MEMBER_SCOPES.contains(&scope),
            Role::Repo(RepoRole::Admin) => REPO_ADMIN_SCOPES.contains(&scope),
            Role::Repo(RepoRole::Maintain | RepoRole::Write | RepoRole::Triage) => {
                REPO_NON_ADMIN_SCOPES.contains(&scope)
            }
            Role::Repo(RepoRole::Read) => REPO_READ_SCOPES.contains(&scope),
            Role::Enterprise(EnterpriseRole::Admin) => scope == ADMIN_ENTERPRISE,
            Role::Enterprise(_) => false,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::parse(s).ok_or_else(|| UnknownRole(s.to_string()))
    }
}

impl Serialize for Role {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

const ORG_MEMBER_SCOPES: &[&str] = &[
    READ_PACKAGES,
    READ_ORG,
    ADMIN_PUBLIC_KEY,
    WRITE_PUBLIC_KEY,
    READ_PUBLIC_KEY,
    GIST,
    NOTIFICATIONS,
    USER,
    READ_USER,
    READ_EMAIL,
    USER_FOLLOW,
    WRITE_DISCUSSION,
    READ_DISCUSSION,
    PROJECT,
    READ_PROJECT,
    ADMIN_GPG_KEY,
    WRITE_GPG_KEY,
    READ_GPG_KEY,
];

const REPO_ADMIN_SCOPES: &[&str] = &[
    REPO,
    REPO_STATUS,
    REPO_DEPLOYMENT,
    PUBLIC_REPO,
    REPO_INVITE,
    SECURITY_EVENTS,
    DELETE_REPO,
    WORKFLOW,
    WRITE_PACKAGES,
    READ_PACKAGES,
    DELETE_PACKAGES,
    ADMIN_PUBLIC_KEY,
    WRITE_PUBLIC_KEY,
    READ_PUBLIC_KEY,
    ADMIN_REPO_HOOK,
    WRITE_REPO_HOOK,
    READ_REPO_HOOK,
    GIST,
    NOTIFICATIONS,
    USER,
    READ_USER,
    READ_EMAIL,
    USER_FOLLOW,
    WRITE_DISCUSSION,
    READ_DISCUSSION,
    PROJECT,
    READ_PROJECT,
    ADMIN_GPG_KEY,
    WRITE_GPG_KEY,
    READ_GPG_KEY,
];

/// Maintain, write and triage share one table.
const REPO_NON_ADMIN_SCOPES: &[&str] = &[
    REPO_STATUS,
    REPO_DEPLOYMENT,
    PUBLIC_REPO,
    WORKFLOW,
    WRITE_PACKAGES,
    READ_PACKAGES,
    DELETE_PACKAGES,
    ADMIN_PUBLIC_KEY,
    WRITE_PUBLIC_KEY,
    READ_PUBLIC_KEY,
    ADMIN_REPO_HOOK,
    WRITE_REPO_HOOK,
    READ_REPO_HOOK,
    GIST,
    NOTIFICATIONS,
    USER,
    READ_USER,
    READ_EMAIL,
    USER_FOLLOW,
    WRITE_DISCUSSION,
    READ_DISCUSSION,
    READ_PROJECT,
    ADMIN_GPG_KEY,
    WRITE_GPG_KEY,
    READ_GPG_KEY,
];

const REPO_READ_SCOPES: &[&str] = &[
    REPO_STATUS,
    PUBLIC_REPO,
    READ_PACKAGES,
    READ_ORG,
    READ_PUBLIC_KEY,
    ADMIN_REPO_HOOK,
    WRITE_REPO_HOOK,
    READ_REPO_HOOK,
    GIST,
    NOTIFICATIONS,
    USER,
    READ_USER,
    READ_EMAIL,
    USER_FOLLOW,
    READ_DISCUSSION,
    READ_PROJECT,
    ADMIN_GPG_KEY,
    WRITE_GPG_KEY,
    READ_GPG_KEY,
];

/// Whether any of `roles` lets the token use `required`.
///
/// Both conditions must hold: the token carries the scope (after
/// implication), and the viewer's role on the entity grants it. An org
/// member holding `admin:org` still can't read org webhooks.
///
/// # Arguments
///
/// * `required` - A scope name from [`scope`]
/// * `available` - The token's scopes, already closed under implication
/// * `roles` - The viewer's roles on the entity being evaluated
///
/// # Example
///
/// ```
/// use warden::permissions::{Role, TokenScopes, has_scope, scope};
///
/// let token = TokenScopes::from_header("admin:org");
/// assert!(has_scope(scope::ADMIN_ORG_HOOK, &token, &[Role::ORG_OWNER]));
/// assert!(!has_scope(scope::ADMIN_ORG_HOOK, &token, &[Role::ORG_MEMBER]));
/// assert!(!has_scope(scope::REPO, &token, &[Role::ORG_OWNER]));
/// ```
#[must_use]
pub fn has_scope(required: &str, available: &TokenScopes, roles: &[Role]) -> bool {
    available.contains(required) && roles.iter().any(|role| role.allows(required))
}
