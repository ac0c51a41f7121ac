//! Idempotent removal of roles and databases.
//!
//! A role is never dropped while it still owns something: its objects are first
//! reassigned to the operator, whatever remains (privileges, default ACLs) is
//! dropped while acting as the role, and only then is the role itself removed.

use tracing::{debug, info, warn};

use crate::database::executor::{Criticality, Journal, StatementExecutor, Step};
use crate::database::oracle;
use crate::database::session::Connection;
use crate::error::ProvisionError;
use crate::identity::{quote_identifier, Identifier};

/// Drop `role` if it exists, re-parenting everything it owns to `operator` first.
///
/// Ownership is only released in the connection's database; use [`disown_role`]
/// on other databases the role may own objects in beforehand.
pub async fn drop_role<C: Connection>(
    executor: &StatementExecutor,
    conn: &mut C,
    operator: &str,
    role: &Identifier,
    journal: &mut Journal,
) -> Result<(), ProvisionError> {
    if !role_present(executor, conn, role, journal).await? {
        return Ok(());
    }

    if !release_owned(executor, conn, operator, role, journal).await? {
        warn!("Keeping role {}: its objects could not be reassigned", role);
        return Ok(());
    }

    let drop = Step::advisory("drop role", format!("DROP ROLE IF EXISTS {};", role.quoted()));
    if journal.record(executor.run(conn, &drop).await?) {
        info!("Dropped role {}", role);
    } else {
        warn!("Role {} could not be dropped", role);
    }

    Ok(())
}

/// Re-parent what `role` owns in the connection's database without dropping the role
pub async fn disown_role<C: Connection>(
    executor: &StatementExecutor,
    conn: &mut C,
    operator: &str,
    role: &Identifier,
    journal: &mut Journal,
) -> Result<(), ProvisionError> {
    if role_present(executor, conn, role, journal).await? {
        release_owned(executor, conn, operator, role, journal).await?;
    }
    Ok(())
}

/// Whether teardown of `role` should proceed; a failed existence check counts as advisory
async fn role_present<C: Connection>(
    executor: &StatementExecutor,
    conn: &mut C,
    role: &Identifier,
    journal: &mut Journal,
) -> Result<bool, ProvisionError> {
    match oracle::role_exists(conn, role.as_str()).await {
        Ok(true) => Ok(true),
        Ok(false) => {
            debug!("Role {} does not exist, nothing to drop", role);
            Ok(false)
        }
        Err(err) => {
            journal.record(executor.settle(Criticality::Advisory, err)?);
            Ok(false)
        }
    }
}

/// Reassign, then drop what is left while acting as the role.
///
/// Nothing is dropped unless the reassignment went through. Returns whether it did.
async fn release_owned<C: Connection>(
    executor: &StatementExecutor,
    conn: &mut C,
    operator: &str,
    role: &Identifier,
    journal: &mut Journal,
) -> Result<bool, ProvisionError> {
    let role_sql = role.quoted();
    let operator_sql = quote_identifier(operator);

    let reassign = Step::advisory(
        "reassign owned objects",
        format!("REASSIGN OWNED BY {role_sql} TO {operator_sql};"),
    );
    if !journal.record(executor.run(conn, &reassign).await?) {
        return Ok(false);
    }

    let assume = Step::advisory("assume role", format!("SET ROLE {role_sql};"));
    let drop_owned = Step::advisory("drop owned objects", format!("DROP OWNED BY {role_sql};"));
    let dropped_owned = async {
        if journal.record(executor.run(conn, &assume).await?) {
            journal.record(executor.run(conn, &drop_owned).await?);
        }
        Ok::<(), ProvisionError>(())
    }
    .await;

    // The connection must never keep the assumed role, even when the drop failed
    let reset = Step::advisory("reset role", "RESET ROLE;");
    let reset_result = executor.run(conn, &reset).await;
    dropped_owned?;
    journal.record(reset_result?);

    Ok(true)
}

/// Drop `database` if it exists, taking ownership first and terminating other sessions
pub async fn drop_database<C: Connection>(
    executor: &StatementExecutor,
    conn: &mut C,
    operator: &str,
    database: &Identifier,
    journal: &mut Journal,
) -> Result<(), ProvisionError> {
    let exists = match oracle::database_exists(conn, database.as_str()).await {
        Ok(exists) => exists,
        Err(err) => {
            journal.record(executor.settle(Criticality::Advisory, err)?);
            return Ok(());
        }
    };

    if !exists {
        debug!("Database {} does not exist, nothing to drop", database);
        return Ok(());
    }

    let db_sql = database.quoted();

    let take_ownership = Step::advisory(
        "take database ownership",
        format!("ALTER DATABASE {db_sql} OWNER TO {};", quote_identifier(operator)),
    );
    journal.record(executor.run(conn, &take_ownership).await?);

    let drop = Step::advisory(
        "drop database",
        format!("DROP DATABASE IF EXISTS {db_sql} WITH (FORCE);"),
    );
    if journal.record(executor.run(conn, &drop).await?) {
        info!("Dropped database {}", database);
    }

    Ok(())
}
