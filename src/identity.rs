//! Deterministic role naming for tenant databases and schemas.
//!
//! Every role the provisioner creates is named `{prefix}{purpose}{kind}` where the
//! prefix is the tenant key (database owner) or `{tenant}_{schema}` (schema roles).
//! Names are interpolated into DDL, so every component is validated here and
//! emitted double-quoted.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ProvisionError;

/// PostgreSQL truncates identifiers longer than NAMEDATALEN - 1 bytes
pub const MAX_IDENTIFIER_LEN: usize = 63;

const OWNER_SUFFIX: &str = "_owner";
const GROUP_SUFFIX: &str = "_grp";
const USER_SUFFIX: &str = "_usr";

/// A validated SQL identifier: `[A-Za-z0-9_]+`, at most 63 bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(value: impl Into<String>) -> Result<Self, ProvisionError> {
        let value = value.into();

        if value.is_empty() {
            return Err(ProvisionError::InvalidIdentifier {
                value,
                reason: "must not be empty",
            });
        }

        if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ProvisionError::InvalidIdentifier {
                value,
                reason: "may only contain ASCII letters, digits and underscores",
            });
        }

        if value.len() > MAX_IDENTIFIER_LEN {
            return Err(ProvisionError::InvalidIdentifier {
                value,
                reason: "exceeds the 63-byte identifier limit",
            });
        }

        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form for DDL
    pub fn quoted(&self) -> String {
        quote_identifier(&self.0)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Quote SQL identifier to prevent injection. Used for names that bypass validation,
/// such as the operator's own role.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Access tiers of a tenant schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Admin,
    ReadWrite,
    ReadOnly,
}

impl Tier {
    /// Provisioning order
    pub const ALL: [Tier; 3] = [Tier::Admin, Tier::ReadWrite, Tier::ReadOnly];

    /// Teardown order: least privileged first
    pub const TEARDOWN: [Tier; 3] = [Tier::ReadOnly, Tier::ReadWrite, Tier::Admin];

    pub fn purpose_suffix(self) -> &'static str {
        match self {
            Tier::Admin => "_schadm",
            Tier::ReadWrite => "_rw",
            Tier::ReadOnly => "_ro",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Tier::Admin => "admin",
            Tier::ReadWrite => "readwrite",
            Tier::ReadOnly => "readonly",
        }
    }
}

/// One value per access tier. Serializes as `{"admin", "readonly", "readwrite"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierMap<T> {
    pub admin: T,
    #[serde(rename = "readonly")]
    pub read_only: T,
    #[serde(rename = "readwrite")]
    pub read_write: T,
}

impl<T> TierMap<T> {
    pub fn from_fn(mut f: impl FnMut(Tier) -> T) -> Self {
        let admin = f(Tier::Admin);
        let read_write = f(Tier::ReadWrite);
        let read_only = f(Tier::ReadOnly);
        Self { admin, read_only, read_write }
    }

    pub fn try_from_fn<E>(mut f: impl FnMut(Tier) -> Result<T, E>) -> Result<Self, E> {
        let admin = f(Tier::Admin)?;
        let read_write = f(Tier::ReadWrite)?;
        let read_only = f(Tier::ReadOnly)?;
        Ok(Self { admin, read_only, read_write })
    }

    pub fn get(&self, tier: Tier) -> &T {
        match tier {
            Tier::Admin => &self.admin,
            Tier::ReadWrite => &self.read_write,
            Tier::ReadOnly => &self.read_only,
        }
    }

    pub fn get_mut(&mut self, tier: Tier) -> &mut T {
        match tier {
            Tier::Admin => &mut self.admin,
            Tier::ReadWrite => &mut self.read_write,
            Tier::ReadOnly => &mut self.read_only,
        }
    }

    /// Entries in provisioning order
    pub fn iter(&self) -> impl Iterator<Item = (Tier, &T)> {
        Tier::ALL.into_iter().map(move |tier| (tier, self.get(tier)))
    }
}

/// Admin, read-write and read-only role names of one schema
pub type SchemaRoleSet = TierMap<Identifier>;

/// The tenant key falls back to the database name when none is given
pub fn resolve_tenant_key<'a>(tenant: Option<&'a str>, database: &'a str) -> &'a str {
    tenant.filter(|t| !t.is_empty()).unwrap_or(database)
}

/// Names owned by a tenant at database level
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantNames {
    pub tenant: Identifier,
    pub owner: Identifier,
}

impl TenantNames {
    pub fn derive(tenant_key: &str) -> Result<Self, ProvisionError> {
        let tenant = Identifier::new(tenant_key)?;
        let owner = Identifier::new(format!("{tenant}{OWNER_SUFFIX}"))?;
        Ok(Self { tenant, owner })
    }
}

/// Every role name derived for one tenant schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaNames {
    pub tenant: Identifier,
    pub schema: Identifier,
    pub prefix: String,
    pub owner: Identifier,
    pub groups: SchemaRoleSet,
    pub users: SchemaRoleSet,
}

/// Derive the owner, group and login role names for `tenant_key`/`schema_name`.
///
/// Pure and deterministic. Fails only when an input is not a valid identifier or a
/// derived name would exceed [`MAX_IDENTIFIER_LEN`]. Distinct tenant keys are the
/// caller's responsibility.
pub fn derive_names(tenant_key: &str, schema_name: &str) -> Result<SchemaNames, ProvisionError> {
    let TenantNames { tenant, owner } = TenantNames::derive(tenant_key)?;
    let schema = Identifier::new(schema_name)?;
    let prefix = format!("{tenant}_{schema}");

    let groups = TierMap::try_from_fn(|tier| {
        Identifier::new(format!("{prefix}{}{GROUP_SUFFIX}", tier.purpose_suffix()))
    })?;
    let users = TierMap::try_from_fn(|tier| {
        Identifier::new(format!("{prefix}{}{USER_SUFFIX}", tier.purpose_suffix()))
    })?;

    Ok(SchemaNames {
        tenant,
        schema,
        prefix,
        owner,
        groups,
        users,
    })
}
