//! Sandboxed file access scoped to one instance's directory tree.
//!
//! Every operation here goes through [`resolve`] first. Resolution joins the
//! instance root with the caller-supplied relative path, normalizes the
//! result without touching the filesystem, and rejects anything that is not
//! the root itself or a descendant of it. This is the sole boundary keeping
//! directory-traversal input (`..` segments, absolute-path injection) away
//! from the filesystem.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use gatehost_utils::{normalize_path, path_is_within, SupportedPathType};
use sqlx::{Pool, Sqlite};
use tokio::fs;

use crate::{
    management::{db, home::GatehostHome},
    models::{Download, FileEntry, StagedFile},
    GatehostError, GatehostResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A caller-supplied path resolved and validated against an instance root.
#[derive(Debug, Clone)]
pub struct Resolved {
    /// The validated absolute path, equal to or below `root`.
    pub full: PathBuf,

    /// The instance's sandbox root.
    pub root: PathBuf,

    /// The instance's name, which doubles as its directory name.
    pub instance_name: String,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Resolves a caller-supplied relative path against an instance's root.
///
/// An empty path resolves to the root itself. Fails with
/// [`GatehostError::InstanceNotFound`] for an unknown instance and
/// [`GatehostError::AccessDenied`] when the normalized result escapes the
/// root.
pub async fn resolve(
    pool: &Pool<Sqlite>,
    home: &GatehostHome,
    uuid: &str,
    rel: &str,
) -> GatehostResult<Resolved> {
    let instance = db::get_instance(pool, uuid)
        .await?
        .ok_or_else(|| GatehostError::InstanceNotFound(uuid.to_string()))?;

    let root = normalize_path(home.instance_dir(&instance.name), SupportedPathType::Any)?;

    // `join` replaces the base entirely for absolute inputs, which the
    // containment check below then rejects.
    let candidate = if rel.is_empty() {
        root.clone()
    } else {
        root.join(rel)
    };

    let full = normalize_path(&candidate, SupportedPathType::Any)
        .map_err(|_| GatehostError::AccessDenied(candidate.clone()))?;

    if !path_is_within(&full, &root) {
        return Err(GatehostError::AccessDenied(full));
    }

    Ok(Resolved {
        full,
        root,
        instance_name: instance.name,
    })
}

/// Lists a directory inside an instance's tree.
///
/// Directories sort before files, each group lexicographically. A missing or
/// non-directory target yields an empty listing rather than an error.
pub async fn list(
    pool: &Pool<Sqlite>,
    home: &GatehostHome,
    uuid: &str,
    rel: &str,
) -> GatehostResult<Vec<FileEntry>> {
    let resolved = resolve(pool, home, uuid, rel).await?;

    match fs::metadata(&resolved.full).await {
        Ok(metadata) if metadata.is_dir() => {}
        _ => return Ok(Vec::new()),
    }

    let mut entries = Vec::new();
    let mut reader = fs::read_dir(&resolved.full).await?;
    while let Some(entry) = reader.next_entry().await? {
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };

        entries.push(FileEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir: metadata.is_dir(),
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        });
    }

    entries.sort_by(|a, b| {
        b.is_dir
            .cmp(&a.is_dir)
            .then_with(|| a.name.cmp(&b.name))
    });

    Ok(entries)
}

/// Reads a whole file inside an instance's tree as text.
pub async fn read_file(
    pool: &Pool<Sqlite>,
    home: &GatehostHome,
    uuid: &str,
    rel: &str,
) -> GatehostResult<String> {
    let resolved = resolve(pool, home, uuid, rel).await?;
    fs::read_to_string(&resolved.full)
        .await
        .map_err(|e| not_found_or_io(e, resolved.full))
}

/// Writes a whole file inside an instance's tree.
pub async fn write_file(
    pool: &Pool<Sqlite>,
    home: &GatehostHome,
    uuid: &str,
    rel: &str,
    content: &str,
) -> GatehostResult<()> {
    let resolved = resolve(pool, home, uuid, rel).await?;
    fs::write(&resolved.full, content).await?;
    Ok(())
}

/// Creates a directory (and any missing parents) inside an instance's tree.
pub async fn make_dir(
    pool: &Pool<Sqlite>,
    home: &GatehostHome,
    uuid: &str,
    rel: &str,
) -> GatehostResult<()> {
    let resolved = resolve(pool, home, uuid, rel).await?;
    fs::create_dir_all(&resolved.full).await?;
    Ok(())
}

/// Removes a file or directory inside an instance's tree. The instance root
/// itself cannot be removed.
pub async fn remove(
    pool: &Pool<Sqlite>,
    home: &GatehostHome,
    uuid: &str,
    rel: &str,
) -> GatehostResult<()> {
    let resolved = resolve(pool, home, uuid, rel).await?;
    if resolved.full == resolved.root {
        return Err(GatehostError::AccessDenied(resolved.full));
    }

    let metadata = fs::metadata(&resolved.full)
        .await
        .map_err(|e| not_found_or_io(e, resolved.full.clone()))?;

    if metadata.is_dir() {
        fs::remove_dir_all(&resolved.full).await?;
    } else {
        fs::remove_file(&resolved.full).await?;
    }

    Ok(())
}

/// Renames (or moves) an entry inside an instance's tree, creating the
/// destination's parent directory first.
pub async fn rename(
    pool: &Pool<Sqlite>,
    home: &GatehostHome,
    uuid: &str,
    from: &str,
    to: &str,
) -> GatehostResult<()> {
    let from = resolve(pool, home, uuid, from).await?;
    let to = resolve(pool, home, uuid, to).await?;

    if let Some(parent) = to.full.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::rename(&from.full, &to.full)
        .await
        .map_err(|e| not_found_or_io(e, from.full))?;

    Ok(())
}

/// Moves a caller-staged file into a directory of an instance's tree,
/// keeping its original filename and overwriting on collision.
///
/// When the resolved target is an existing file, the staged file lands in
/// that file's parent directory instead.
pub async fn upload_into(
    pool: &Pool<Sqlite>,
    home: &GatehostHome,
    uuid: &str,
    rel: &str,
    staged: StagedFile,
) -> GatehostResult<()> {
    let resolved = resolve(pool, home, uuid, rel).await?;

    let target_dir = match fs::metadata(&resolved.full).await {
        Ok(metadata) if metadata.is_file() => resolved
            .full
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or(resolved.root),
        _ => resolved.full,
    };

    fs::create_dir_all(&target_dir).await?;
    move_file(&staged.path, &target_dir.join(&staged.name)).await?;

    Ok(())
}

/// Returns something the caller can transfer for the given path: the file
/// itself, or a transient archive when the path names a directory.
pub async fn downloadable(
    pool: &Pool<Sqlite>,
    home: &GatehostHome,
    uuid: &str,
    rel: &str,
) -> GatehostResult<Download> {
    let resolved = resolve(pool, home, uuid, rel).await?;

    let metadata = fs::metadata(&resolved.full)
        .await
        .map_err(|e| not_found_or_io(e, resolved.full.clone()))?;

    let basename = resolved
        .full
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| resolved.instance_name.clone());

    if metadata.is_file() {
        return Ok(Download {
            path: resolved.full,
            name: basename,
            transient: false,
        });
    }

    let archive_name = format!("{}.tar.gz", basename);
    let archive_path = home.staging_dir().join(format!(
        "{}_{}_{}",
        resolved.instance_name,
        Utc::now().timestamp_millis(),
        archive_name
    ));

    archive_dir(&resolved.full, &archive_path).await?;

    Ok(Download {
        path: archive_path,
        name: archive_name,
        transient: true,
    })
}

//--------------------------------------------------------------------------------------------------
// Functions: Archives
//--------------------------------------------------------------------------------------------------

/// Packs the contents of a directory into a gzipped tar archive.
pub async fn archive_dir(src: &Path, dest: &Path) -> GatehostResult<()> {
    let src = src.to_path_buf();
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || -> GatehostResult<()> {
        let file = std::fs::File::create(&dest)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.append_dir_all(".", &src)?;
        builder.into_inner()?.finish()?;
        Ok(())
    })
    .await
    .map_err(|e| GatehostError::Io(std::io::Error::other(e)))?
}

/// Unpacks a gzipped tar archive into a directory. Entry paths are
/// sanitized by the unpacker, so a crafted archive cannot write outside
/// `dest`.
pub async fn unpack_archive(src: &Path, dest: &Path) -> GatehostResult<()> {
    let src = src.to_path_buf();
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || -> GatehostResult<()> {
        let file = std::fs::File::open(&src)?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        archive.unpack(&dest)?;
        Ok(())
    })
    .await
    .map_err(|e| GatehostError::Io(std::io::Error::other(e)))?
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Moves a file, falling back to copy-and-remove when the rename crosses a
/// filesystem boundary.
pub(crate) async fn move_file(from: &Path, to: &Path) -> GatehostResult<()> {
    match fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to).await?;
            fs::remove_file(from).await?;
            Ok(())
        }
    }
}

fn not_found_or_io(e: std::io::Error, path: PathBuf) -> GatehostError {
    if e.kind() == std::io::ErrorKind::NotFound {
        GatehostError::PathNotFound(path)
    } else {
        GatehostError::Io(e)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "uuid-alpha";

    async fn setup() -> (tempfile::TempDir, Pool<Sqlite>, GatehostHome) {
        let dir = tempfile::tempdir().expect("tempdir");
        let home = GatehostHome::new(dir.path());
        home.ensure().await.expect("home");

        let pool = db::get_or_create_pool(&home.db_path()).await.expect("pool");
        db::insert_instance(
            &pool,
            UUID,
            "alpha",
            "alpha.example.com",
            25566,
            "server.jar",
            "java -jar {jar}",
        )
        .await
        .expect("insert");
        fs::create_dir_all(home.instance_dir("alpha"))
            .await
            .expect("instance dir");

        (dir, pool, home)
    }

    #[tokio::test]
    async fn test_resolve_rejects_traversal_and_absolute_injection() {
        let (_dir, pool, home) = setup().await;

        for escape in ["../../etc/passwd", "/etc/passwd", "world/../../other"] {
            let err = resolve(&pool, &home, UUID, escape).await.unwrap_err();
            assert!(err.is_access_denied(), "{} must be denied", escape);
        }
    }

    #[tokio::test]
    async fn test_resolve_empty_path_is_root() {
        let (_dir, pool, home) = setup().await;

        let resolved = resolve(&pool, &home, UUID, "").await.expect("resolve");
        assert_eq!(resolved.full, resolved.root);

        // `..` segments that stay inside the tree are fine.
        let resolved = resolve(&pool, &home, UUID, "world/../configs")
            .await
            .expect("resolve");
        assert_eq!(resolved.full, resolved.root.join("configs"));
    }

    #[tokio::test]
    async fn test_resolve_unknown_instance_fails() {
        let (_dir, pool, home) = setup().await;

        let err = resolve(&pool, &home, "uuid-ghost", "").await.unwrap_err();
        assert!(matches!(err, GatehostError::InstanceNotFound(_)));
    }

    #[tokio::test]
    async fn test_list_sorts_directories_first() {
        let (_dir, pool, home) = setup().await;
        let root = home.instance_dir("alpha");

        fs::create_dir(root.join("world")).await.expect("mkdir");
        fs::create_dir(root.join("configs")).await.expect("mkdir");
        fs::write(root.join("zebra.txt"), "z").await.expect("write");
        fs::write(root.join("apple.txt"), "a").await.expect("write");

        let entries = list(&pool, &home, UUID, "").await.expect("list");
        let names: Vec<&str> = entries.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, vec!["configs", "world", "apple.txt", "zebra.txt"]);
        assert!(entries[0].is_dir);
        assert!(!entries[3].is_dir);
    }

    #[tokio::test]
    async fn test_list_of_missing_or_file_target_is_empty() {
        let (_dir, pool, home) = setup().await;
        fs::write(home.instance_dir("alpha").join("note.txt"), "hi")
            .await
            .expect("write");

        assert!(list(&pool, &home, UUID, "missing").await.expect("list").is_empty());
        assert!(list(&pool, &home, UUID, "note.txt").await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn test_read_write_round_trip() {
        let (_dir, pool, home) = setup().await;

        write_file(&pool, &home, UUID, "server.properties", "motd=hello")
            .await
            .expect("write");
        let content = read_file(&pool, &home, UUID, "server.properties")
            .await
            .expect("read");
        assert_eq!(content, "motd=hello");

        let err = read_file(&pool, &home, UUID, "missing.txt").await.unwrap_err();
        assert!(matches!(err, GatehostError::PathNotFound(_)));
    }

    #[tokio::test]
    async fn test_remove_refuses_instance_root() {
        let (_dir, pool, home) = setup().await;

        let err = remove(&pool, &home, UUID, "").await.unwrap_err();
        assert!(err.is_access_denied());
        assert!(home.instance_dir("alpha").exists());

        fs::write(home.instance_dir("alpha").join("junk.txt"), "x")
            .await
            .expect("write");
        remove(&pool, &home, UUID, "junk.txt").await.expect("remove");
        assert!(!home.instance_dir("alpha").join("junk.txt").exists());
    }

    #[tokio::test]
    async fn test_rename_round_trip_restores_listing() {
        let (_dir, pool, home) = setup().await;

        write_file(&pool, &home, UUID, "a.txt", "content")
            .await
            .expect("write");
        let before: Vec<String> = list(&pool, &home, UUID, "")
            .await
            .expect("list")
            .into_iter()
            .map(|entry| entry.name)
            .collect();

        rename(&pool, &home, UUID, "a.txt", "sub/b.txt")
            .await
            .expect("rename");
        assert!(home.instance_dir("alpha").join("sub/b.txt").exists());

        rename(&pool, &home, UUID, "sub/b.txt", "a.txt")
            .await
            .expect("rename back");
        remove(&pool, &home, UUID, "sub").await.expect("cleanup");

        let after: Vec<String> = list(&pool, &home, UUID, "")
            .await
            .expect("list")
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        assert_eq!(before, after);
        assert_eq!(
            read_file(&pool, &home, UUID, "a.txt").await.expect("read"),
            "content"
        );
    }

    #[tokio::test]
    async fn test_upload_into_directory_and_file_target() {
        let (_dir, pool, home) = setup().await;
        let root = home.instance_dir("alpha");

        let staged = home.staging_dir().join("upload-1");
        fs::write(&staged, "plugin bytes").await.expect("stage");
        upload_into(
            &pool,
            &home,
            UUID,
            "plugins",
            StagedFile {
                path: staged,
                name: "worldedit.jar".to_string(),
            },
        )
        .await
        .expect("upload");
        assert!(root.join("plugins/worldedit.jar").exists());

        // A file target redirects the upload to its parent directory.
        let staged = home.staging_dir().join("upload-2");
        fs::write(&staged, "replacement").await.expect("stage");
        upload_into(
            &pool,
            &home,
            UUID,
            "plugins/worldedit.jar",
            StagedFile {
                path: staged,
                name: "worldedit.jar".to_string(),
            },
        )
        .await
        .expect("upload over");
        let content = read_file(&pool, &home, UUID, "plugins/worldedit.jar")
            .await
            .expect("read");
        assert_eq!(content, "replacement");
    }

    #[tokio::test]
    async fn test_downloadable_file_is_direct() {
        let (_dir, pool, home) = setup().await;

        write_file(&pool, &home, UUID, "note.txt", "hi")
            .await
            .expect("write");
        let download = downloadable(&pool, &home, UUID, "note.txt")
            .await
            .expect("download");
        assert!(!download.transient);
        assert_eq!(download.name, "note.txt");
        assert_eq!(download.path, home.instance_dir("alpha").join("note.txt"));
    }

    #[tokio::test]
    async fn test_downloadable_directory_is_transient_archive() {
        let (_dir, pool, home) = setup().await;

        make_dir(&pool, &home, UUID, "backups").await.expect("mkdir");
        for name in ["one.txt", "two.txt", "three.txt"] {
            write_file(&pool, &home, UUID, &format!("backups/{}", name), name)
                .await
                .expect("write");
        }

        let download = downloadable(&pool, &home, UUID, "backups")
            .await
            .expect("download");
        assert!(download.transient);
        assert_eq!(download.name, "backups.tar.gz");

        let file = std::fs::File::open(&download.path).expect("open archive");
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        let files = archive
            .entries()
            .expect("entries")
            .filter_map(Result::ok)
            .filter(|entry| entry.header().entry_type().is_file())
            .count();
        assert_eq!(files, 3);

        // Transient archives are the caller's to delete after the transfer.
        fs::remove_file(&download.path).await.expect("cleanup");
    }
}
