//! Repository visibility rules for ticket queries.

use serde::Serialize;

/// Who is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal {
    Anonymous,
    User { id: i64, is_admin: bool },
}

/// Repository visibility level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Visible to everyone, including anonymous callers.
    Public,
    /// Visible to any signed-in user.
    Limited,
    /// Visible to the owner and to users with an explicit grant.
    Private,
}

impl Visibility {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Limited => "limited",
            Self::Private => "private",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "public" => Some(Self::Public),
            "limited" => Some(Self::Limited),
            "private" => Some(Self::Private),
            _ => None,
        }
    }
}

/// The set of repositories a principal may read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessScope {
    All,
    PublicOnly,
    /// Public + limited, owned, and explicitly granted repositories.
    SignedIn { user_id: i64 },
}

impl AccessScope {
    #[must_use]
    pub const fn for_principal(principal: &Principal) -> Self {
        match *principal {
            Principal::Anonymous => Self::PublicOnly,
            Principal::User { is_admin: true, .. } => Self::All,
            Principal::User { id, .. } => Self::SignedIn { user_id: id },
        }
    }

    /// SQL predicate over `column`, plus its positional parameters.
    #[must_use]
    pub fn repo_predicate(&self, column: &str) -> (String, Vec<i64>) {
        match self {
            Self::All => ("1 = 1".to_string(), Vec::new()),
            Self::PublicOnly => (
                format!("{column} IN (SELECT id FROM repositories WHERE visibility = 'public')"),
                Vec::new(),
            ),
            Self::SignedIn { user_id } => (
                format!(
                    "{column} IN (
                        SELECT id FROM repositories
                        WHERE visibility IN ('public', 'limited')
                           OR owner_id = ?
                           OR id IN (SELECT repo_id FROM repo_access WHERE user_id = ?)
                    )"
                ),
                vec![*user_id, *user_id],
            ),
        }
    }
}
