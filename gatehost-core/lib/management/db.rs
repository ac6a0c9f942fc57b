//! Registry access for gatehost.
//!
//! The registry is a SQLite database holding the durable state shared by the
//! supervisor and the router synchronizer: instance records and their derived
//! routes. Each function here is a single statement, serialized by SQLite's
//! per-statement atomicity; multi-statement sequences are composed by the
//! callers in `management::instance`.

use std::path::Path;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Sqlite,
};

use crate::{
    models::{Instance, InstanceStatus, Route},
    GatehostResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Maximum number of connections the registry pool hands out.
const MAX_POOL_CONNECTIONS: u32 = 5;

/// Idempotent schema statements for the registry.
const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS instances (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        uuid TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL UNIQUE,
        domain TEXT NOT NULL,
        port INTEGER NOT NULL UNIQUE,
        jar_file TEXT NOT NULL,
        start_command TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'stopped',
        pid INTEGER,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS routes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_domain TEXT NOT NULL,
        listening_port INTEGER NOT NULL,
        dest_host TEXT NOT NULL,
        dest_port INTEGER NOT NULL UNIQUE,
        description TEXT NOT NULL DEFAULT ''
    )
    "#,
];

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Opens (creating if missing) the registry database at the given path and
/// applies the schema.
pub async fn get_or_create_pool(db_path: &Path) -> GatehostResult<Pool<Sqlite>> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_POOL_CONNECTIONS)
        .connect_with(options)
        .await?;

    for statement in MIGRATIONS {
        sqlx::query(statement).execute(&pool).await?;
    }

    Ok(pool)
}

//--------------------------------------------------------------------------------------------------
// Functions: Instances
//--------------------------------------------------------------------------------------------------

/// Inserts a new instance row and returns its internal key.
pub async fn insert_instance(
    pool: &Pool<Sqlite>,
    uuid: &str,
    name: &str,
    domain: &str,
    port: u16,
    jar_file: &str,
    start_command: &str,
) -> GatehostResult<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO instances (uuid, name, domain, port, jar_file, start_command, status)
        VALUES (?, ?, ?, ?, ?, ?, 'stopped')
        "#,
    )
    .bind(uuid)
    .bind(name)
    .bind(domain)
    .bind(port as i64)
    .bind(jar_file)
    .bind(start_command)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Fetches an instance by its opaque public identifier.
pub async fn get_instance(pool: &Pool<Sqlite>, uuid: &str) -> GatehostResult<Option<Instance>> {
    let instance = sqlx::query_as::<_, Instance>("SELECT * FROM instances WHERE uuid = ?")
        .bind(uuid)
        .fetch_optional(pool)
        .await?;

    Ok(instance)
}

/// Fetches an instance by its unique name.
pub async fn get_instance_by_name(
    pool: &Pool<Sqlite>,
    name: &str,
) -> GatehostResult<Option<Instance>> {
    let instance = sqlx::query_as::<_, Instance>("SELECT * FROM instances WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;

    Ok(instance)
}

/// Lists all registered instances, oldest first.
pub async fn list_instances(pool: &Pool<Sqlite>) -> GatehostResult<Vec<Instance>> {
    let instances = sqlx::query_as::<_, Instance>("SELECT * FROM instances ORDER BY id")
        .fetch_all(pool)
        .await?;

    Ok(instances)
}

/// Returns every port currently allocated to an instance.
pub async fn list_allocated_ports(pool: &Pool<Sqlite>) -> GatehostResult<Vec<u16>> {
    let ports = sqlx::query_scalar::<_, i64>("SELECT port FROM instances")
        .fetch_all(pool)
        .await?;

    Ok(ports.into_iter().map(|port| port as u16).collect())
}

/// Persists a status transition, together with the worker pid when running.
pub async fn update_instance_status(
    pool: &Pool<Sqlite>,
    uuid: &str,
    status: InstanceStatus,
    pid: Option<u32>,
) -> GatehostResult<()> {
    sqlx::query("UPDATE instances SET status = ?, pid = ? WHERE uuid = ?")
        .bind(status)
        .bind(pid.map(|pid| pid as i64))
        .bind(uuid)
        .execute(pool)
        .await?;

    Ok(())
}

/// Persists updated instance settings.
pub async fn update_instance_settings(
    pool: &Pool<Sqlite>,
    uuid: &str,
    domain: &str,
    start_command: &str,
) -> GatehostResult<()> {
    sqlx::query("UPDATE instances SET domain = ?, start_command = ? WHERE uuid = ?")
        .bind(domain)
        .bind(start_command)
        .bind(uuid)
        .execute(pool)
        .await?;

    Ok(())
}

/// Deletes an instance row.
pub async fn delete_instance(pool: &Pool<Sqlite>, uuid: &str) -> GatehostResult<()> {
    sqlx::query("DELETE FROM instances WHERE uuid = ?")
        .bind(uuid)
        .execute(pool)
        .await?;

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: Routes
//--------------------------------------------------------------------------------------------------

/// Inserts the route derived from an instance.
pub async fn insert_route(
    pool: &Pool<Sqlite>,
    source_domain: &str,
    listening_port: u16,
    dest_host: &str,
    dest_port: u16,
    description: &str,
) -> GatehostResult<()> {
    sqlx::query(
        r#"
        INSERT INTO routes (source_domain, listening_port, dest_host, dest_port, description)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(source_domain)
    .bind(listening_port as i64)
    .bind(dest_host)
    .bind(dest_port as i64)
    .bind(description)
    .execute(pool)
    .await?;

    Ok(())
}

/// Lists every route in the registry.
pub async fn list_routes(pool: &Pool<Sqlite>) -> GatehostResult<Vec<Route>> {
    let routes = sqlx::query_as::<_, Route>("SELECT * FROM routes ORDER BY id")
        .fetch_all(pool)
        .await?;

    Ok(routes)
}

/// Rewrites the domain of the route whose backend is the given port.
pub async fn update_route_domain(
    pool: &Pool<Sqlite>,
    dest_port: u16,
    source_domain: &str,
) -> GatehostResult<()> {
    sqlx::query("UPDATE routes SET source_domain = ? WHERE dest_port = ?")
        .bind(source_domain)
        .bind(dest_port as i64)
        .execute(pool)
        .await?;

    Ok(())
}

/// Deletes the route whose backend is the given port.
pub async fn delete_route_by_dest_port(pool: &Pool<Sqlite>, dest_port: u16) -> GatehostResult<()> {
    sqlx::query("DELETE FROM routes WHERE dest_port = ?")
        .bind(dest_port as i64)
        .execute(pool)
        .await?;

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
