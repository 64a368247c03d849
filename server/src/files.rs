use futures_util::StreamExt as _;
use std::{
    io,
    path::{Component, Path, PathBuf},
};

use actix_web::web;
use common::hash_file;
use tokio::{
    fs::{create_dir_all, read, remove_file, File},
    io::AsyncWriteExt,
    task::spawn_blocking,
};

/// Resolves a storage path like `user/1700000000000_report.pdf` under `dir`.
/// Anything that could climb out of the directory is refused.
pub fn object_path(dir: &Path, path: &str) -> io::Result<PathBuf> {
    let relative = Path::new(path);
    let clean = !path.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !clean {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid storage path {path:?}"),
        ));
    }
    Ok(dir.join(relative))
}

/// Streams the body to disk and returns its SHA-256.
/// The object is removed again if it grows past `max_size` or the body fails.
pub async fn write_object(
    dir: &Path,
    path: &str,
    max_size: u64,
    mut body: web::Payload,
) -> io::Result<String> {
    let full = object_path(dir, path)?;
    if let Some(parent) = full.parent() {
        create_dir_all(parent).await?;
    }
    let mut file = File::create(&full).await?;
    let mut written: u64 = 0;
    while let Some(chunk) = body.next().await {
        let result = match chunk {
            Ok(chunk) if written + chunk.len() as u64 > max_size => {
                Err(io::Error::other("Exceeded maximum object size"))
            }
            Ok(chunk) => {
                written += chunk.len() as u64;
                file.write_all(&chunk).await
            }
            Err(e) => Err(io::Error::other(format!("Chunk read failed: {e}"))),
        };
        if let Err(e) = result {
            drop(file);
            let _ = remove_file(&full).await;
            return Err(e);
        }
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    let std_file = std::fs::File::open(&full)?;
    spawn_blocking(move || hash_file(std_file))
        .await
        .map_err(io::Error::other)?
}

pub async fn read_object(dir: &Path, path: &str) -> io::Result<Vec<u8>> {
    read(object_path(dir, path)?).await
}

pub async fn delete_object(dir: &Path, path: &str) -> io::Result<()> {
    match remove_file(object_path(dir, path)?).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
