//! Subcommand implementations.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tbloader_kernel::{CopyOptions, DeviceContext, DeviceInfo, FileHandle, ZipOptions};
use tbloader_srn::{
    HttpReservationAuthority, JsonFileStore, Reservation, ReservationAuthority, SrnAllocator,
    SrnError, SrnResult, SrnStore,
};

use crate::config::Config;

pub async fn copy(src: &Path, dst: &Path, sync: bool, keep_extra: bool) -> Result<()> {
    let mut options = if sync {
        CopyOptions::mirror()
    } else {
        CopyOptions::default()
    };
    if keep_extra {
        options = options.preserving_extra_files();
    }

    let stats = tbloader_kernel::copy_dir(&FileHandle::local(src), &FileHandle::local(dst), &options)
        .await
        .with_context(|| format!("copying {} to {}", src.display(), dst.display()))?;

    println!(
        "copied {} files ({} bytes), skipped {}, created {} directories, pruned {}",
        stats.files_copied, stats.bytes_copied, stats.files_skipped, stats.dirs_created, stats.paths_pruned
    );
    Ok(())
}

pub async fn zip(dir: PathBuf, out: PathBuf, include_base: bool, subdirs: Vec<String>) -> Result<()> {
    let mut options = ZipOptions::default();
    if include_base {
        options = options.with_base_dir();
    }
    if !subdirs.is_empty() {
        options = options.with_subdirs(subdirs);
    }

    // The zip encoder writes synchronously; keep it off the runtime workers.
    let runtime = tokio::runtime::Handle::current();
    let target = out.display().to_string();
    let summary = tokio::task::spawn_blocking(move || {
        runtime
            .block_on(tbloader_kernel::zip_dir(&FileHandle::local(&dir), &out, &options))
            .with_context(|| format!("packing {}", dir.display()))
    })
    .await??;
    println!("wrote {} entries to {target}", summary.entries);
    Ok(())
}

pub async fn unzip(archive: PathBuf, out: PathBuf) -> Result<()> {
    let summary = tokio::task::spawn_blocking(move || {
        let mut last_tenth = None;
        let listener: &mut dyn FnMut(u64, u64) -> bool = &mut |done, total| {
            let tenth = (done * 10).checked_div(total).unwrap_or(10);
            if last_tenth != Some(tenth) {
                last_tenth = Some(tenth);
                tracing::info!(done, total, "extracting");
            }
            true
        };
        tbloader_kernel::unzip(&archive, &out, Some(listener))
            .with_context(|| format!("extracting {} to {}", archive.display(), out.display()))
    })
    .await??;
    println!("extracted {} entries", summary.entries);
    Ok(())
}

pub async fn probe(
    config: &Config,
    root: &Path,
    label: String,
    fallback_project: Option<&str>,
    json: bool,
) -> Result<()> {
    let context = DeviceContext::default().with_srn_prefix(config.device.srn_prefix.clone());
    let mut device = DeviceInfo::probe(FileHandle::local(root), label, context).await;

    let Some(info) = device.deployment_info(fallback_project).await else {
        bail!("no device at {}", root.display());
    };
    if json {
        let value = serde_json::json!({
            "generation": device.generation().to_string(),
            "needs_serial_number": device.new_serial_number_needed().await,
            "deployment": info,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{} [{}]", info, device.generation());
        if device.new_serial_number_needed().await {
            println!("device needs a new serial number");
        }
    }
    Ok(())
}

/// Stands in for the reservation service when none is configured.
struct Unconfigured;

#[async_trait]
impl ReservationAuthority for Unconfigured {
    async fn reserve(&self, _count: u32) -> SrnResult<Reservation> {
        Err(SrnError::reservation("no reservation endpoint configured"))
    }
}

fn open_store(config: &Config) -> Result<JsonFileStore> {
    let path = config
        .srn
        .store_path
        .clone()
        .or_else(JsonFileStore::default_path)
        .ok_or_else(|| anyhow!("no data directory; set srn.store_path"))?;
    Ok(JsonFileStore::new(path))
}

pub async fn srn_allocate(config: &Config, identity: &str, count: u32, token: Option<String>) -> Result<()> {
    let store = Arc::new(open_store(config)?);
    let authority: Arc<dyn ReservationAuthority> = match &config.srn.endpoint {
        Some(endpoint) => {
            let mut http = HttpReservationAuthority::new(endpoint.clone());
            if let Some(token) = token {
                http = http.with_token(token);
            }
            Arc::new(http)
        }
        None => Arc::new(Unconfigured),
    };

    let mut allocator = SrnAllocator::new(config.srn.clone(), store, authority);
    let available = allocator
        .prepare(identity)
        .await
        .with_context(|| format!("preparing allocation for {identity}"))?;
    if allocator.is_borrowed() {
        tracing::warn!(lender = allocator.owner().unwrap_or_default(), "using another identity's numbers");
    }
    tracing::info!(identity, available, "allocating");

    for _ in 0..count {
        let srn = allocator.allocate_next().await.context("allocating serial number")?;
        println!("{}", srn.to_uppercase());
    }
    Ok(())
}

pub async fn srn_status(config: &Config, identity: &str) -> Result<()> {
    let store = open_store(config)?;
    let Some(record) = store.load(identity).await? else {
        println!("{identity}: no serial numbers held");
        return Ok(());
    };
    println!(
        "{identity}: id {} available {} next {:#06x} primary {:#06x}..{:#06x} backup {:#06x}..{:#06x}",
        record.allocator_id_hex.as_deref().unwrap_or("-"),
        record.available(),
        record.next_srn,
        record.primary_begin,
        record.primary_end,
        record.backup_begin,
        record.backup_end
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_status_without_record() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.srn.store_path = Some(dir.path().join("store.json"));
        srn_status(&config, "amy@example.org").await.unwrap();
    }

    #[tokio::test]
    async fn test_allocate_without_endpoint_fails() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.srn.store_path = Some(dir.path().join("store.json"));
        assert!(srn_allocate(&config, "amy@example.org", 1, None).await.is_err());
    }

    #[tokio::test]
    async fn test_probe_missing_device() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nothing");
        assert!(probe(&Config::default(), &missing, String::new(), None, false).await.is_err());
    }

    #[tokio::test]
    async fn test_copy_and_zip() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("system")).unwrap();
        std::fs::write(src.join("system/config.txt"), b"cfg").unwrap();

        let dst = dir.path().join("staging/dst");
        copy(&src, &dst, true, false).await.unwrap();
        assert_eq!(std::fs::read(dst.join("system/config.txt")).unwrap(), b"cfg");

        let archive = dir.path().join("out.zip");
        zip(dst.clone(), archive.clone(), true, Vec::new()).await.unwrap();
        unzip(archive, dir.path().join("restored")).await.unwrap();
        assert!(dir.path().join("restored/dst/system/config.txt").exists());
        assert!(!dir.path().join("restored/system").exists());
    }
}
