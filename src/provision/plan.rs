//! Statement tables for each provisioning phase.
//!
//! Pure builders: each returns the steps of one phase with their failure policy
//! declared alongside the SQL.

use crate::credentials::Credential;
use crate::database::executor::Step;
use crate::identity::{Identifier, SchemaRoleSet};

/// Quote a string literal, doubling embedded single quotes
fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn role_list(roles: &[&Identifier]) -> String {
    roles.iter().map(|r| r.quoted()).collect::<Vec<_>>().join(", ")
}

pub fn create_owner(owner: &Identifier) -> Step {
    Step::critical("create owner role", format!("CREATE ROLE {} WITH NOLOGIN;", owner.quoted()))
}

pub fn create_database(database: &Identifier) -> Step {
    Step::critical("create database", format!("CREATE DATABASE {};", database.quoted()))
}

pub fn set_database_owner(database: &Identifier, owner: &Identifier) -> Step {
    Step::critical(
        "set database owner",
        format!("ALTER DATABASE {} OWNER TO {};", database.quoted(), owner.quoted()),
    )
}

pub fn revoke_database_public(database: &Identifier) -> Step {
    Step::advisory(
        "revoke public database privileges",
        format!("REVOKE ALL ON DATABASE {} FROM PUBLIC;", database.quoted()),
    )
}

/// Runs inside the tenant database
pub fn revoke_public_schema_create() -> Step {
    Step::advisory("revoke public schema create", "REVOKE CREATE ON SCHEMA public FROM PUBLIC;")
}

/// Drop, recreate and lock down the tenant schema
pub fn schema(schema: &Identifier) -> Vec<Step> {
    let schema = schema.quoted();
    vec![
        Step::advisory("drop schema", format!("DROP SCHEMA IF EXISTS {schema} CASCADE;")),
        Step::critical("create schema", format!("CREATE SCHEMA {schema};")),
        Step::advisory(
            "revoke public schema create",
            format!("REVOKE CREATE ON SCHEMA {schema} FROM PUBLIC;"),
        ),
    ]
}

pub fn create_group(group: &Identifier) -> Step {
    Step::advisory("create group role", format!("CREATE ROLE {} WITH NOLOGIN;", group.quoted()))
}

/// Cluster-level: all three tiers may connect to the tenant database
pub fn database_access(database: &Identifier, groups: &SchemaRoleSet) -> Step {
    Step::advisory(
        "grant database access",
        format!(
            "GRANT CONNECT, TEMPORARY ON DATABASE {} TO {};",
            database.quoted(),
            role_list(&[&groups.admin, &groups.read_write, &groups.read_only])
        ),
    )
}

/// Grants on existing objects plus default privileges for objects created later
pub fn schema_grants(schema: &Identifier, groups: &SchemaRoleSet) -> Vec<Step> {
    let schema = schema.quoted();
    let admin = groups.admin.quoted();
    let read_write = groups.read_write.quoted();
    let read_only = groups.read_only.quoted();
    let readers = role_list(&[&groups.read_write, &groups.read_only]);
    let defaults = format!("ALTER DEFAULT PRIVILEGES IN SCHEMA {schema}");

    vec![
        Step::advisory(
            "grant admin schema usage",
            format!("GRANT USAGE, CREATE ON SCHEMA {schema} TO {admin};"),
        ),
        Step::advisory(
            "grant admin tables",
            format!("GRANT ALL ON ALL TABLES IN SCHEMA {schema} TO {admin};"),
        ),
        Step::advisory(
            "grant admin sequences",
            format!("GRANT ALL ON ALL SEQUENCES IN SCHEMA {schema} TO {admin};"),
        ),
        Step::advisory(
            "grant schema usage",
            format!("GRANT USAGE ON SCHEMA {schema} TO {readers};"),
        ),
        Step::advisory(
            "grant table read",
            format!("GRANT SELECT ON ALL TABLES IN SCHEMA {schema} TO {readers};"),
        ),
        Step::advisory(
            "grant sequence read",
            format!("GRANT USAGE, SELECT ON ALL SEQUENCES IN SCHEMA {schema} TO {readers};"),
        ),
        Step::advisory(
            "default sequence read",
            format!("{defaults} GRANT USAGE, SELECT ON SEQUENCES TO {readers};"),
        ),
        Step::advisory(
            "default sequence write",
            format!("{defaults} GRANT UPDATE ON SEQUENCES TO {read_write};"),
        ),
        Step::advisory(
            "default table read",
            format!("{defaults} GRANT SELECT ON TABLES TO {read_only};"),
        ),
        Step::advisory(
            "default table read-write",
            format!("{defaults} GRANT SELECT, INSERT, UPDATE, DELETE ON TABLES TO {read_write};"),
        ),
    ]
}

pub fn create_user(user: &Identifier, credential: &Credential) -> Step {
    Step::advisory(
        "create login role",
        format!(
            "CREATE ROLE {} WITH LOGIN PASSWORD {};",
            user.quoted(),
            quote_literal(&credential.password)
        ),
    )
}

pub fn grant_membership(group: &Identifier, user: &Identifier) -> Step {
    Step::advisory("grant group membership", format!("GRANT {} TO {};", group.quoted(), user.quoted()))
}
