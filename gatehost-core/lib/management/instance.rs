//! Instance lifecycle management.
//!
//! Instances are created, reconfigured, and destroyed here. Every mutation
//! first updates the registry and then hands off to the router synchronizer,
//! so the external router's view of the domain mapping converges within one
//! restart cycle. Failed creations attempt compensating cleanup so no
//! partial registry state is left behind.

use gatehost_utils::{DEFAULT_START_COMMAND, EULA_FILENAME, PROPERTIES_FILENAME};
use sqlx::{Pool, Sqlite};
use tokio::fs;
use uuid::Uuid;

use crate::{
    management::{
        db, files,
        home::GatehostHome,
        router::RouterSync,
        supervisor::Supervisor,
    },
    models::{Download, Instance, StagedFile},
    GatehostError, GatehostResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The loopback address workers bind on; the router forwards here.
const BACKEND_HOST: &str = "127.0.0.1";

/// Directories that make up a worker's world state.
const WORLD_DIRS: &[&str] = &["world", "world_nether", "world_the_end"];

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Parameters for creating an instance.
#[derive(Debug, Clone)]
pub struct CreateInstance {
    /// Unique human-readable name; doubles as the directory name.
    pub name: String,

    /// Public domain the router should map to this instance.
    pub domain: String,

    /// Start-command template override; the default is used when absent.
    pub start_command: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an instance: allocates a port, lays down the instance directory
/// with its executable and bootstrap files, inserts the instance and its
/// derived route into the registry, and synchronizes the router.
pub async fn create(
    pool: &Pool<Sqlite>,
    home: &GatehostHome,
    router: &RouterSync,
    spec: CreateInstance,
    staged_jar: StagedFile,
) -> GatehostResult<Instance> {
    if db::get_instance_by_name(pool, &spec.name).await?.is_some() {
        return Err(GatehostError::NameTaken(spec.name));
    }

    let router_port = gatehost_utils::get_router_port();
    let allocated = db::list_allocated_ports(pool).await?;
    let port = allocate_port(&allocated, router_port);

    let instance_dir = home.instance_dir(&spec.name);
    fs::create_dir_all(&instance_dir).await?;
    files::move_file(&staged_jar.path, &instance_dir.join(&staged_jar.name)).await?;
    fs::write(instance_dir.join(EULA_FILENAME), "eula=true").await?;
    fs::write(instance_dir.join(PROPERTIES_FILENAME), seed_properties(port)).await?;

    let uuid = Uuid::new_v4().to_string();
    let start_command = spec
        .start_command
        .filter(|command| !command.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_START_COMMAND.to_string());

    if let Err(e) = db::insert_instance(
        pool,
        &uuid,
        &spec.name,
        &spec.domain,
        port,
        &staged_jar.name,
        &start_command,
    )
    .await
    {
        let _ = fs::remove_dir_all(&instance_dir).await;
        return Err(map_insert_error(e, &spec.name, port));
    }

    if let Err(e) = db::insert_route(
        pool,
        &spec.domain,
        router_port,
        BACKEND_HOST,
        port,
        &format!("Auto-generated for {}", spec.name),
    )
    .await
    {
        let _ = db::delete_instance(pool, &uuid).await;
        let _ = fs::remove_dir_all(&instance_dir).await;
        return Err(e);
    }

    // The registry is the source of truth; a failed router sync leaves the
    // route set intact and a later sync converges, so it never unwinds a
    // committed create.
    if let Err(e) = router.sync_and_restart().await {
        tracing::warn!("router sync failed after creating {}: {}", spec.name, e);
    }

    tracing::info!(
        "created instance {} (uuid: {}) on port {} for domain {}",
        spec.name,
        uuid,
        port,
        spec.domain
    );

    db::get_instance(pool, &uuid)
        .await?
        .ok_or(GatehostError::InstanceNotFound(uuid))
}

/// Destroys an instance: stops its worker, removes the on-disk tree, deletes
/// the route and instance rows, and synchronizes the router.
pub async fn delete(
    pool: &Pool<Sqlite>,
    home: &GatehostHome,
    supervisor: &Supervisor,
    router: &RouterSync,
    uuid: &str,
) -> GatehostResult<()> {
    let instance = db::get_instance(pool, uuid)
        .await?
        .ok_or_else(|| GatehostError::InstanceNotFound(uuid.to_string()))?;

    supervisor.stop_and_wait(uuid).await?;

    let instance_dir = home.instance_dir(&instance.name);
    if instance_dir.exists() {
        fs::remove_dir_all(&instance_dir).await?;
    }

    db::delete_route_by_dest_port(pool, instance.port as u16).await?;
    db::delete_instance(pool, uuid).await?;
    let _ = fs::remove_file(home.instance_log(uuid)).await;

    if let Err(e) = router.sync_and_restart().await {
        tracing::warn!("router sync failed after deleting {}: {}", instance.name, e);
    }

    tracing::info!("deleted instance {} (uuid: {})", instance.name, uuid);

    Ok(())
}

/// Updates an instance's domain and/or start command, rewrites its route,
/// and synchronizes the router.
pub async fn update_settings(
    pool: &Pool<Sqlite>,
    router: &RouterSync,
    uuid: &str,
    domain: Option<String>,
    start_command: Option<String>,
) -> GatehostResult<Instance> {
    let instance = db::get_instance(pool, uuid)
        .await?
        .ok_or_else(|| GatehostError::InstanceNotFound(uuid.to_string()))?;

    let domain = domain.unwrap_or(instance.domain);
    let start_command = start_command.unwrap_or(instance.start_command);

    db::update_instance_settings(pool, uuid, &domain, &start_command).await?;
    db::update_route_domain(pool, instance.port as u16, &domain).await?;

    if let Err(e) = router.sync_and_restart().await {
        tracing::warn!("router sync failed after updating {}: {}", instance.name, e);
    }

    db::get_instance(pool, uuid)
        .await?
        .ok_or_else(|| GatehostError::InstanceNotFound(uuid.to_string()))
}

/// Reads the instance's properties file.
pub async fn properties(
    pool: &Pool<Sqlite>,
    home: &GatehostHome,
    uuid: &str,
) -> GatehostResult<String> {
    files::read_file(pool, home, uuid, PROPERTIES_FILENAME).await
}

/// Writes the instance's properties file, with the port directive forced
/// back to the registry-allocated port so a caller cannot redirect the
/// worker away from it.
pub async fn save_properties(
    pool: &Pool<Sqlite>,
    home: &GatehostHome,
    uuid: &str,
    content: &str,
) -> GatehostResult<()> {
    let instance = db::get_instance(pool, uuid)
        .await?
        .ok_or_else(|| GatehostError::InstanceNotFound(uuid.to_string()))?;

    let enforced = enforce_port(content, instance.port as u16);
    files::write_file(pool, home, uuid, PROPERTIES_FILENAME, &enforced).await
}

//--------------------------------------------------------------------------------------------------
// Functions: World Manager
//--------------------------------------------------------------------------------------------------

/// Packages the instance's world directory as a transient archive.
pub async fn world_archive(
    pool: &Pool<Sqlite>,
    home: &GatehostHome,
    uuid: &str,
) -> GatehostResult<Download> {
    files::downloadable(pool, home, uuid, WORLD_DIRS[0]).await
}

/// Replaces the instance's world with the contents of a staged archive.
/// The worker is fully stopped before its files are touched.
pub async fn restore_world(
    pool: &Pool<Sqlite>,
    home: &GatehostHome,
    supervisor: &Supervisor,
    uuid: &str,
    staged: StagedFile,
) -> GatehostResult<()> {
    let instance = db::get_instance(pool, uuid)
        .await?
        .ok_or_else(|| GatehostError::InstanceNotFound(uuid.to_string()))?;

    supervisor.stop_and_wait(uuid).await?;

    let instance_dir = home.instance_dir(&instance.name);
    remove_world_dirs(&instance_dir).await?;

    let world_dir = instance_dir.join(WORLD_DIRS[0]);
    fs::create_dir_all(&world_dir).await?;
    files::unpack_archive(&staged.path, &world_dir).await?;
    let _ = fs::remove_file(&staged.path).await;

    tracing::info!("restored world of instance {} (uuid: {})", instance.name, uuid);

    Ok(())
}

/// Deletes the instance's world directories so the worker regenerates a
/// fresh world on its next start.
pub async fn reset_world(
    pool: &Pool<Sqlite>,
    home: &GatehostHome,
    supervisor: &Supervisor,
    uuid: &str,
) -> GatehostResult<()> {
    let instance = db::get_instance(pool, uuid)
        .await?
        .ok_or_else(|| GatehostError::InstanceNotFound(uuid.to_string()))?;

    supervisor.stop_and_wait(uuid).await?;
    remove_world_dirs(&home.instance_dir(&instance.name)).await?;

    tracing::info!("reset world of instance {} (uuid: {})", instance.name, uuid);

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Picks the smallest free port at or above the base, skipping the router's
/// own listening port.
pub fn allocate_port(allocated: &[u16], router_port: u16) -> u16 {
    let mut port = gatehost_utils::BASE_INSTANCE_PORT;
    while port == router_port || allocated.contains(&port) {
        port += 1;
    }
    port
}

/// Seeds a fresh properties file: the allocated port, offline session mode,
/// and the query protocol enabled on the same port.
fn seed_properties(port: u16) -> String {
    format!(
        "server-port={port}\nonline-mode=false\nenable-query=true\nquery.port={port}\n"
    )
}

/// Overwrites any `server-port=` directive with the allocated port,
/// appending one when the content carries none.
fn enforce_port(content: &str, port: u16) -> String {
    let directive = format!("server-port={}", port);
    let mut found = false;

    let mut lines: Vec<String> = content
        .lines()
        .map(|line| {
            if line.trim_start().starts_with("server-port=") {
                found = true;
                directive.clone()
            } else {
                line.to_string()
            }
        })
        .collect();

    if !found {
        lines.push(directive);
    }

    let mut enforced = lines.join("\n");
    enforced.push('\n');
    enforced
}

async fn remove_world_dirs(instance_dir: &std::path::Path) -> GatehostResult<()> {
    for world_dir in WORLD_DIRS {
        let path = instance_dir.join(world_dir);
        if path.exists() {
            fs::remove_dir_all(&path).await?;
        }
    }
    Ok(())
}

/// Maps unique-constraint violations from an instance insert onto the
/// lifecycle error kinds callers can act on.
fn map_insert_error(err: GatehostError, name: &str, port: u16) -> GatehostError {
    if let GatehostError::Db(sqlx::Error::Database(ref db_err)) = err {
        let message = db_err.message();
        if message.contains("instances.port") {
            return GatehostError::ConflictingPort(port);
        }
        if message.contains("instances.name") {
            return GatehostError::NameTaken(name.to_string());
        }
    }
    err
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use gatehost_utils::ROUTER_EXE_ENV_VAR;

    async fn setup() -> (tempfile::TempDir, Pool<Sqlite>, GatehostHome, RouterSync) {
        // Point the router at a no-op binary so syncs run end to end.
        std::env::set_var(ROUTER_EXE_ENV_VAR, "true");

        let dir = tempfile::tempdir().expect("tempdir");
        let home = GatehostHome::new(dir.path());
        home.ensure().await.expect("home");

        let pool = db::get_or_create_pool(&home.db_path()).await.expect("pool");
        let router = RouterSync::new(pool.clone(), home.router_config_path(), 25565);

        (dir, pool, home, router)
    }

    async fn stage_jar(home: &GatehostHome, name: &str) -> StagedFile {
        let path = home.staging_dir().join(format!("staged-{}", name));
        fs::write(&path, "jar bytes").await.expect("stage");
        StagedFile {
            path,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_allocate_port() {
        assert_eq!(allocate_port(&[], 25565), 25566);
        assert_eq!(allocate_port(&[25566], 25565), 25567);
        assert_eq!(allocate_port(&[25566, 25567], 25565), 25568);
        // The router's own port is never handed out.
        assert_eq!(allocate_port(&[], 25566), 25567);
        assert_eq!(allocate_port(&[25566, 25568], 25565), 25567);
    }

    #[test]
    fn test_enforce_port() {
        let enforced = enforce_port("motd=hi\nserver-port=9999\nonline-mode=false", 25566);
        assert!(enforced.contains("server-port=25566\n"));
        assert!(!enforced.contains("9999"));

        let appended = enforce_port("motd=hi", 25566);
        assert!(appended.ends_with("server-port=25566\n"));
    }

    #[tokio::test]
    async fn test_create_allocates_first_port_and_route() {
        let (_dir, pool, home, router) = setup().await;

        let jar = stage_jar(&home, "server.jar").await;
        let instance = create(
            &pool,
            &home,
            &router,
            CreateInstance {
                name: "alpha".to_string(),
                domain: "alpha.example.com".to_string(),
                start_command: None,
            },
            jar,
        )
        .await
        .expect("create");
        router.shutdown().await;

        assert_eq!(instance.port, 25566);
        assert_eq!(instance.start_command, DEFAULT_START_COMMAND);

        let routes = db::list_routes(&pool).await.expect("routes");
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].source_domain, "alpha.example.com");
        assert_eq!(routes[0].dest_host, BACKEND_HOST);
        assert_eq!(routes[0].dest_port, 25566);

        let instance_dir = home.instance_dir("alpha");
        assert!(instance_dir.join("server.jar").exists());
        assert_eq!(
            fs::read_to_string(instance_dir.join(EULA_FILENAME))
                .await
                .expect("eula"),
            "eula=true"
        );
        let properties = fs::read_to_string(instance_dir.join(PROPERTIES_FILENAME))
            .await
            .expect("properties");
        assert!(properties.contains("server-port=25566"));
        assert!(properties.contains("enable-query=true"));

        // The generated router config mirrors the route set.
        let config = fs::read_to_string(home.router_config_path())
            .await
            .expect("config");
        assert!(config.contains("alpha.example.com"));
        assert!(config.contains("127.0.0.1:25566"));
    }

    #[tokio::test]
    async fn test_create_survives_router_sync_failure() {
        let (_dir, pool, home, _router) = setup().await;

        // A config path with a missing parent makes the sync fail; the
        // committed instance and route must survive it.
        let broken = RouterSync::new(
            pool.clone(),
            home.root().join("missing-dir/router-config.json"),
            25565,
        );

        let jar = stage_jar(&home, "server.jar").await;
        let instance = create(
            &pool,
            &home,
            &broken,
            CreateInstance {
                name: "alpha".to_string(),
                domain: "alpha.example.com".to_string(),
                start_command: None,
            },
            jar,
        )
        .await
        .expect("create");

        assert_eq!(instance.port, 25566);
        assert!(db::get_instance(&pool, &instance.uuid)
            .await
            .expect("get")
            .is_some());
        assert_eq!(db::list_routes(&pool).await.expect("routes").len(), 1);
        assert!(home.instance_dir("alpha").exists());
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_name() {
        let (_dir, pool, home, router) = setup().await;

        let jar = stage_jar(&home, "server.jar").await;
        create(
            &pool,
            &home,
            &router,
            CreateInstance {
                name: "alpha".to_string(),
                domain: "alpha.example.com".to_string(),
                start_command: None,
            },
            jar,
        )
        .await
        .expect("create");

        let jar = stage_jar(&home, "other.jar").await;
        let err = create(
            &pool,
            &home,
            &router,
            CreateInstance {
                name: "alpha".to_string(),
                domain: "other.example.com".to_string(),
                start_command: None,
            },
            jar,
        )
        .await
        .unwrap_err();
        router.shutdown().await;

        assert!(matches!(err, GatehostError::NameTaken(_)));
    }

    #[tokio::test]
    async fn test_delete_removes_rows_and_tree() {
        let (_dir, pool, home, router) = setup().await;

        let jar = stage_jar(&home, "server.jar").await;
        let instance = create(
            &pool,
            &home,
            &router,
            CreateInstance {
                name: "alpha".to_string(),
                domain: "alpha.example.com".to_string(),
                start_command: None,
            },
            jar,
        )
        .await
        .expect("create");

        let supervisor = Supervisor::new(pool.clone(), home.clone());
        delete(&pool, &home, &supervisor, &router, &instance.uuid)
            .await
            .expect("delete");
        router.shutdown().await;

        assert!(db::get_instance(&pool, &instance.uuid)
            .await
            .expect("get")
            .is_none());
        assert!(db::list_routes(&pool).await.expect("routes").is_empty());
        assert!(!home.instance_dir("alpha").exists());
    }

    #[tokio::test]
    async fn test_update_settings_rewrites_route() {
        let (_dir, pool, home, router) = setup().await;

        let jar = stage_jar(&home, "server.jar").await;
        let instance = create(
            &pool,
            &home,
            &router,
            CreateInstance {
                name: "alpha".to_string(),
                domain: "alpha.example.com".to_string(),
                start_command: None,
            },
            jar,
        )
        .await
        .expect("create");

        let updated = update_settings(
            &pool,
            &router,
            &instance.uuid,
            Some("renamed.example.com".to_string()),
            Some("java -Xmx2G -jar {jar} nogui".to_string()),
        )
        .await
        .expect("update");
        router.shutdown().await;

        assert_eq!(updated.domain, "renamed.example.com");
        assert_eq!(updated.start_command, "java -Xmx2G -jar {jar} nogui");

        let routes = db::list_routes(&pool).await.expect("routes");
        assert_eq!(routes[0].source_domain, "renamed.example.com");
        assert_eq!(routes[0].dest_port, instance.port);
    }

    #[tokio::test]
    async fn test_save_properties_enforces_allocated_port() {
        let (_dir, pool, home, router) = setup().await;

        let jar = stage_jar(&home, "server.jar").await;
        let instance = create(
            &pool,
            &home,
            &router,
            CreateInstance {
                name: "alpha".to_string(),
                domain: "alpha.example.com".to_string(),
                start_command: None,
            },
            jar,
        )
        .await
        .expect("create");
        router.shutdown().await;

        save_properties(
            &pool,
            &home,
            &instance.uuid,
            "motd=hacked\nserver-port=1337\n",
        )
        .await
        .expect("save");

        let content = properties(&pool, &home, &instance.uuid)
            .await
            .expect("read");
        assert!(content.contains("motd=hacked"));
        assert!(content.contains(&format!("server-port={}", instance.port)));
        assert!(!content.contains("1337"));
    }

    #[tokio::test]
    async fn test_world_reset_clears_world_dirs() {
        let (_dir, pool, home, router) = setup().await;

        let jar = stage_jar(&home, "server.jar").await;
        let instance = create(
            &pool,
            &home,
            &router,
            CreateInstance {
                name: "alpha".to_string(),
                domain: "alpha.example.com".to_string(),
                start_command: None,
            },
            jar,
        )
        .await
        .expect("create");
        router.shutdown().await;

        let instance_dir = home.instance_dir("alpha");
        for world_dir in WORLD_DIRS {
            fs::create_dir_all(instance_dir.join(world_dir).join("region"))
                .await
                .expect("world dirs");
        }

        let supervisor = Supervisor::new(pool.clone(), home.clone());
        reset_world(&pool, &home, &supervisor, &instance.uuid)
            .await
            .expect("reset");

        for world_dir in WORLD_DIRS {
            assert!(!instance_dir.join(world_dir).exists());
        }
        assert!(instance_dir.join(PROPERTIES_FILENAME).exists());
    }
}
