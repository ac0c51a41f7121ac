//! Tenant provisioning orchestrator.
//!
//! Database path: teardown -> owner role -> database -> ownership -> PUBLIC revokes.
//! Schema path: schema -> release tenant-database ownership -> group roles -> grants
//! -> login users -> credential emission.
//! Every phase re-queries the server before dropping anything, so a run can be
//! repeated against a partially provisioned cluster.

pub mod plan;

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::credentials::{Credential, CredentialSink, PasswordConfig, TenantCredentialSet};
use crate::database::audit::AuditLog;
use crate::database::executor::{Criticality, Journal, StatementExecutor, Step};
use crate::database::session::{Cluster, Connection, SessionScope};
use crate::database::teardown;
use crate::error::ProvisionError;
use crate::identity::{
    derive_names, resolve_tenant_key, Identifier, SchemaNames, TenantNames, Tier, TierMap,
};

/// Explicit run options, in place of ambient environment toggles
#[derive(Default)]
pub struct ProvisionOptions {
    pub halt_on_error: bool,
    pub audit: Option<Arc<AuditLog>>,
    pub credentials: Option<Box<dyn CredentialSink>>,
    pub password: PasswordConfig,
}

/// Inputs of "provision tenant schema"
#[derive(Debug, Clone, Copy)]
pub struct SchemaRequest<'a> {
    pub schema: &'a str,
    pub database: &'a str,
    /// Defaults to the database name
    pub tenant: Option<&'a str>,
    /// Role to act as inside the database; defaults to the tenant owner
    pub role: Option<&'a str>,
}

/// An advisory step that failed and was skipped
#[derive(Debug, Clone, Serialize)]
pub struct SkippedStep {
    pub step: String,
    pub error: String,
}

impl From<ProvisionError> for SkippedStep {
    fn from(err: ProvisionError) -> Self {
        let step = match &err {
            ProvisionError::Statement { step, .. } => *step,
            ProvisionError::Probe { .. } => "existence check",
            ProvisionError::CredentialSink(_) => "credential emission",
            _ => "provisioning",
        };
        Self {
            step: step.to_string(),
            error: err.to_string(),
        }
    }
}

fn skipped_steps(journal: Journal) -> Vec<SkippedStep> {
    journal.into_skipped().into_iter().map(SkippedStep::from).collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseReport {
    pub database: Identifier,
    pub tenant: Identifier,
    pub owner: Identifier,
    pub skipped: Vec<SkippedStep>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaReport {
    pub database: Identifier,
    pub acting_role: Identifier,
    pub names: SchemaNames,
    pub credentials_written: bool,
    /// Login roles that could not be recreated; they keep their previous password
    pub unissued: Vec<Identifier>,
    pub skipped: Vec<SkippedStep>,
}

pub struct Provisioner<'c, C: Cluster> {
    cluster: &'c C,
    executor: StatementExecutor,
    credentials: Option<Box<dyn CredentialSink>>,
    password: PasswordConfig,
}

impl<'c, C: Cluster> Provisioner<'c, C> {
    pub fn new(cluster: &'c C, options: ProvisionOptions) -> Self {
        Self {
            cluster,
            executor: StatementExecutor::new(options.halt_on_error, options.audit),
            credentials: options.credentials,
            password: options.password,
        }
    }

    fn operator(&self) -> &str {
        self.cluster.operator_role()
    }

    async fn apply(
        &self,
        conn: &mut C::Conn,
        step: &Step,
        journal: &mut Journal,
    ) -> Result<bool, ProvisionError> {
        Ok(journal.record(self.executor.run(conn, step).await?))
    }

    /// Create (or recreate) a tenant database owned by a fresh `{tenant}_owner` role
    pub async fn provision_database(
        &self,
        database: &str,
        tenant: Option<&str>,
    ) -> Result<DatabaseReport, ProvisionError> {
        let db = Identifier::new(database)?;
        let names = TenantNames::derive(resolve_tenant_key(tenant, database))?;
        let mut journal = Journal::default();

        info!("Provisioning tenant database {} owned by {}", db, names.owner);

        let mut root = self.cluster.open(&SessionScope::root()).await?;
        let result = self.database_phase(&mut root, &db, &names.owner, &mut journal).await;
        root.release().await;
        result?;

        let mut conn = self.cluster.open(&SessionScope::database(db.clone())).await?;
        let result = self
            .apply(&mut conn, &plan::revoke_public_schema_create(), &mut journal)
            .await;
        conn.release().await;
        result?;

        info!("Tenant database {} ready", db);

        Ok(DatabaseReport {
            database: db,
            tenant: names.tenant,
            owner: names.owner,
            skipped: skipped_steps(journal),
        })
    }

    async fn database_phase(
        &self,
        conn: &mut C::Conn,
        db: &Identifier,
        owner: &Identifier,
        journal: &mut Journal,
    ) -> Result<(), ProvisionError> {
        teardown::drop_database(&self.executor, conn, self.operator(), db, journal).await?;
        teardown::drop_role(&self.executor, conn, self.operator(), owner, journal).await?;

        self.apply(conn, &plan::create_owner(owner), journal).await?;

        if let Err(err) = self.apply(conn, &plan::create_database(db), journal).await {
            self.cleanup(conn, None, owner).await;
            return Err(err);
        }

        if let Err(err) = self.apply(conn, &plan::set_database_owner(db, owner), journal).await {
            self.cleanup(conn, Some(db), owner).await;
            return Err(err);
        }

        self.apply(conn, &plan::revoke_database_public(db), journal).await?;
        Ok(())
    }

    /// Best-effort removal of what a failed database phase just created
    async fn cleanup(&self, conn: &mut C::Conn, db: Option<&Identifier>, owner: &Identifier) {
        let executor = self.executor.lenient();
        let mut scratch = Journal::default();

        if let Some(db) = db {
            if let Err(e) = teardown::drop_database(&executor, conn, self.operator(), db, &mut scratch).await {
                warn!("Cleanup of database {} failed: {}", db, e);
            }
        }
        if let Err(e) = teardown::drop_role(&executor, conn, self.operator(), owner, &mut scratch).await {
            warn!("Cleanup of role {} failed: {}", owner, e);
        }
        for err in scratch.skipped() {
            warn!("Cleanup step skipped: {}", err);
        }
    }

    /// Create (or recreate) a tenant schema with its three access tiers and login users
    pub async fn provision_schema(
        &self,
        request: SchemaRequest<'_>,
    ) -> Result<SchemaReport, ProvisionError> {
        let db = Identifier::new(request.database)?;
        let names = derive_names(resolve_tenant_key(request.tenant, request.database), request.schema)?;
        let acting_role = match request.role.filter(|r| !r.is_empty()) {
            Some(role) => Identifier::new(role)?,
            None => names.owner.clone(),
        };
        let scope = SessionScope::database(db.clone()).acting_as(acting_role.clone());
        let mut journal = Journal::default();

        info!(
            "Provisioning schema {} in database {} as {}",
            names.schema, db, acting_role
        );

        let mut conn = self.cluster.open(&scope).await?;
        let result = self.schema_phase(&mut conn, &names, &mut journal).await;
        conn.release().await;
        result?;

        // REASSIGN/DROP OWNED only reach the connected database
        let mut conn = self.cluster.open(&SessionScope::database(db.clone())).await?;
        let result = self.disown_phase(&mut conn, &names, &mut journal).await;
        conn.release().await;
        result?;

        let mut root = self.cluster.open(&SessionScope::root()).await?;
        let result = self.group_phase(&mut root, &db, &names, &mut journal).await;
        root.release().await;
        result?;

        let mut conn = self.cluster.open(&scope).await?;
        let result = self.grant_phase(&mut conn, &names, &mut journal).await;
        conn.release().await;
        result?;

        let mut root = self.cluster.open(&SessionScope::root()).await?;
        let result = self.user_phase(&mut root, &names, &mut journal).await;
        root.release().await;
        let credentials = result?;
        let unissued: Vec<Identifier> = credentials
            .iter()
            .filter(|(_, credential)| credential.is_none())
            .map(|(tier, _)| names.users.get(tier).clone())
            .collect();
        if !unissued.is_empty() {
            let list: Vec<&str> = unissued.iter().map(Identifier::as_str).collect();
            warn!("Login roles not recreated, credentials withheld: {}", list.join(", "));
        }

        let credentials_written = self.emit(&credentials, &mut journal)?;

        info!("Schema {} ready in database {}", names.schema, db);

        Ok(SchemaReport {
            database: db,
            acting_role,
            names,
            credentials_written,
            unissued,
            skipped: skipped_steps(journal),
        })
    }

    async fn schema_phase(
        &self,
        conn: &mut C::Conn,
        names: &SchemaNames,
        journal: &mut Journal,
    ) -> Result<(), ProvisionError> {
        for step in plan::schema(&names.schema) {
            self.apply(conn, &step, journal).await?;
        }
        Ok(())
    }

    async fn disown_phase(
        &self,
        conn: &mut C::Conn,
        names: &SchemaNames,
        journal: &mut Journal,
    ) -> Result<(), ProvisionError> {
        for roles in [&names.users, &names.groups] {
            for tier in Tier::TEARDOWN {
                teardown::disown_role(&self.executor, conn, self.operator(), roles.get(tier), journal)
                    .await?;
            }
        }
        Ok(())
    }

    async fn drop_users(
        &self,
        conn: &mut C::Conn,
        names: &SchemaNames,
        journal: &mut Journal,
    ) -> Result<(), ProvisionError> {
        for tier in Tier::TEARDOWN {
            teardown::drop_role(&self.executor, conn, self.operator(), names.users.get(tier), journal)
                .await?;
        }
        Ok(())
    }

    async fn group_phase(
        &self,
        conn: &mut C::Conn,
        db: &Identifier,
        names: &SchemaNames,
        journal: &mut Journal,
    ) -> Result<(), ProvisionError> {
        // Users are members of the groups, so they go first
        self.drop_users(conn, names, journal).await?;
        for tier in Tier::TEARDOWN {
            teardown::drop_role(&self.executor, conn, self.operator(), names.groups.get(tier), journal)
                .await?;
        }

        for (_, group) in names.groups.iter() {
            if self.apply(conn, &plan::create_group(group), journal).await? {
                info!("Created group role {}", group);
            }
        }

        self.apply(conn, &plan::database_access(db, &names.groups), journal).await?;
        Ok(())
    }

    async fn grant_phase(
        &self,
        conn: &mut C::Conn,
        names: &SchemaNames,
        journal: &mut Journal,
    ) -> Result<(), ProvisionError> {
        for step in plan::schema_grants(&names.schema, &names.groups) {
            self.apply(conn, &step, journal).await?;
        }
        Ok(())
    }

    async fn user_phase(
        &self,
        conn: &mut C::Conn,
        names: &SchemaNames,
        journal: &mut Journal,
    ) -> Result<TenantCredentialSet, ProvisionError> {
        self.drop_users(conn, names, journal).await?;

        let issued =
            TierMap::try_from_fn(|tier| Credential::issue(names.users.get(tier), &self.password))?;
        let mut created = TierMap::from_fn(|_| false);

        for (tier, user) in names.users.iter() {
            let group = names.groups.get(tier);
            if self.apply(conn, &plan::create_user(user, issued.get(tier)), journal).await? {
                info!("Created login role {}", user);
                *created.get_mut(tier) = true;
            }
            self.apply(conn, &plan::grant_membership(group, user), journal).await?;
        }

        // A password only reaches the sink if its role was created with it
        Ok(TierMap::from_fn(|tier| {
            (*created.get(tier)).then(|| issued.get(tier).clone())
        }))
    }

    /// Hand the credentials to the sink, if any. Returns whether they were written.
    fn emit(
        &self,
        credentials: &TenantCredentialSet,
        journal: &mut Journal,
    ) -> Result<bool, ProvisionError> {
        let Some(sink) = &self.credentials else {
            info!("No credentials sink configured; generated passwords are discarded");
            return Ok(false);
        };

        match sink.emit(credentials) {
            Ok(()) => Ok(true),
            Err(err) => {
                journal.record(self.executor.settle(Criticality::Advisory, err.into())?);
                Ok(false)
            }
        }
    }
}
