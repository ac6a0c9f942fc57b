use clap::Parser;
use gatehost_core::{
    cli::{GatehostArgs, GatehostSubcommand},
    management::{db, home::GatehostHome, instance, router::RouterSync, supervisor::Supervisor},
    models::{InstanceStatus, StagedFile},
    GatehostResult,
};
use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> GatehostResult<()> {
    tracing_subscriber::fmt::init();

    let args = GatehostArgs::parse();

    let home = GatehostHome::from_env();
    home.ensure().await?;
    let pool = db::get_or_create_pool(&home.db_path()).await?;
    let router = RouterSync::new(
        pool.clone(),
        home.router_config_path(),
        gatehost_utils::get_router_port(),
    );

    match args.subcommand {
        GatehostSubcommand::Create {
            name,
            domain,
            jar,
            start_command,
        } => {
            // Stage the artifact inside the home so the move into the
            // instance directory stays on one filesystem.
            let jar_name = jar
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "server.jar".to_string());
            let staged_path = home.staging_dir().join(format!("create-{}", jar_name));
            tokio::fs::copy(&jar, &staged_path).await?;

            let created = instance::create(
                &pool,
                &home,
                &router,
                instance::CreateInstance {
                    name,
                    domain,
                    start_command,
                },
                StagedFile {
                    path: staged_path,
                    name: jar_name,
                },
            )
            .await?;

            println!(
                "Created instance {} (uuid: {}) on port {}",
                created.name, created.uuid, created.port
            );
        }
        GatehostSubcommand::List => {
            let instances = db::list_instances(&pool).await?;
            println!(
                "{:<38} {:<16} {:<26} {:<8} {:<10}",
                "UUID", "NAME", "DOMAIN", "PORT", "STATUS"
            );
            for entry in instances {
                println!(
                    "{:<38} {:<16} {:<26} {:<8} {:<10}",
                    entry.uuid,
                    entry.name,
                    entry.domain,
                    entry.port,
                    format!("{:?}", entry.status).to_lowercase()
                );
            }
        }
        GatehostSubcommand::Up { uuids } => {
            up(pool.clone(), home.clone(), router, uuids).await?;
        }
        GatehostSubcommand::Stop { uuid } => {
            // One-shot mode has no live handle for the worker; signal the
            // registry-recorded pid instead, the way a supervising `up`
            // process would.
            let entry = db::get_instance(&pool, &uuid)
                .await?
                .ok_or(gatehost_core::GatehostError::InstanceNotFound(uuid.clone()))?;
            match entry.pid.filter(|_| entry.status == InstanceStatus::Running) {
                Some(pid) => {
                    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                        Ok(()) | Err(Errno::ESRCH) => {}
                        Err(e) => tracing::warn!("failed to signal pid {}: {}", pid, e),
                    }
                    println!("Sent stop signal to instance {} (pid: {})", entry.name, pid);
                }
                None => println!("Instance {} is not running", entry.name),
            }
        }
        GatehostSubcommand::Delete { uuid } => {
            let supervisor = Supervisor::new(pool.clone(), home.clone());
            instance::delete(&pool, &home, &supervisor, &router, &uuid).await?;
            println!("Deleted instance {}", uuid);
        }
        GatehostSubcommand::Logs { uuid } => {
            let supervisor = Supervisor::new(pool.clone(), home.clone());
            print!("{}", supervisor.logs(&uuid).await?);
        }
        GatehostSubcommand::Sync => {
            router.sync_and_restart().await?;
            println!("Router synchronized");
        }
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Starts the router and the selected instances, supervises them until a
/// termination signal arrives, then stops everything gracefully.
async fn up(
    pool: sqlx::Pool<sqlx::Sqlite>,
    home: GatehostHome,
    router: RouterSync,
    uuids: Vec<String>,
) -> GatehostResult<()> {
    let supervisor = Supervisor::new(pool.clone(), home);

    router.sync_and_restart().await?;

    let instances = db::list_instances(&pool).await?;
    for entry in &instances {
        if uuids.is_empty() || uuids.contains(&entry.uuid) {
            match supervisor.start(&entry.uuid).await {
                Ok(pid) => tracing::info!("instance {} up with pid {}", entry.name, pid),
                Err(e) => tracing::error!("failed to start instance {}: {}", entry.name, e),
            }
        }
    }

    wait_for_shutdown_signal().await?;
    tracing::info!("shutting down");

    shutdown(&supervisor).await;
    router.shutdown().await;

    Ok(())
}

async fn wait_for_shutdown_signal() -> GatehostResult<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM signal"),
        _ = sigint.recv() => tracing::info!("received SIGINT signal"),
    }

    Ok(())
}

async fn shutdown(supervisor: &Supervisor) {
    for uuid in supervisor.running_instances().await {
        if let Err(e) = supervisor.stop_and_wait(&uuid).await {
            tracing::error!("failed to stop instance {}: {}", uuid, e);
        }
    }
}
