//! Idempotent base-image management. Ensures the kernel and a
//! decompressed, resized base disk exist in the work directory before the
//! first instance ever boots.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use sha2::{Digest, Sha256};

use mvm_core::Config;

use crate::host_tools;

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ImagePaths {
    pub kernel: PathBuf,
    pub disk_decompressed: PathBuf,
}

pub struct ImageStore<'a> {
    config: &'a Config,
}

impl<'a> ImageStore<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Removes and recreates the work subdirectory (`.instance_data`, mode
    /// `0700`). Only ever called under the prebuild barrier — no instance
    /// may exist at this point, so losing prior per-instance files is
    /// intentional.
    pub async fn prepare_workdir(&self) -> Result<()> {
        let dir = self.config.instance_data_dir();
        if dir.exists() {
            tokio::fs::remove_dir_all(&dir)
                .await
                .with_context(|| format!("removing stale work directory {}", dir.display()))?;
        }
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating work directory {}", dir.display()))?;
        set_mode_0700(&dir)?;
        Ok(())
    }

    /// Idempotent: for each of {kernel, disk image}, downloads the upstream
    /// `SHA256SUMS`, matches by filename suffix `" *<name>"`, compares
    /// against the local file's SHA256, and skips re-download on match.
    /// After (re)download, unconditionally decompresses and resizes the
    /// disk to the configured size. No retries — any failure is fatal to
    /// the caller and surfaces as `FleetingError::ImagePrep`.
    pub async fn ensure_images(&self) -> Result<ImagePaths> {
        let dir = &self.config.vm_disk_directory;
        tokio::fs::create_dir_all(dir).await?;

        let kernel_name = basename(&self.config.kernel_url)?;
        let disk_name = basename(&self.config.disk_image_url)?;

        let kernel_path = dir.join(&kernel_name);
        let disk_path = dir.join(&disk_name);

        let sums = fetch_sha256sums(&self.config.checksum_url).await?;

        ensure_asset(&self.config.kernel_url, &kernel_path, &kernel_name, &sums).await?;
        ensure_asset(&self.config.disk_image_url, &disk_path, &disk_name, &sums).await?;

        tokio::fs::write(dir.join(format!("{kernel_name}_kernel.sha256")), &sums).await?;
        tokio::fs::write(dir.join(format!("{disk_name}_image.sha256")), &sums).await?;

        let decompressed = dir.join(format!("{disk_name}_decompressed.qcow2"));
        host_tools::disk_convert(&disk_path, &decompressed).await?;
        host_tools::disk_resize(&decompressed, self.config.vm_disk_size_gb).await?;

        Ok(ImagePaths {
            kernel: kernel_path,
            disk_decompressed: decompressed,
        })
    }
}

fn basename(url: &str) -> Result<String> {
    url.rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .with_context(|| format!("could not derive a filename from url {url:?}"))
}

async fn fetch_sha256sums(url: &str) -> Result<String> {
    let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
    let resp = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("fetching SHA256SUMS from {url}"))?
        .error_for_status()
        .with_context(|| format!("SHA256SUMS request to {url} returned an error status"))?;
    Ok(resp.text().await?)
}

/// Returns the hex digest for `name` from a `sha256sum -b` style listing,
/// matching lines that end in `" *<name>"`.
fn expected_hash<'s>(sums: &'s str, name: &str) -> Option<&'s str> {
    let suffix = format!(" *{name}");
    sums.lines()
        .find(|line| line.ends_with(&suffix))
        .and_then(|line| line.split_whitespace().next())
}

async fn local_sha256(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

async fn ensure_asset(url: &str, path: &Path, name: &str, sums: &str) -> Result<()> {
    let expected = expected_hash(sums, name)
        .with_context(|| format!("{name:?} not found in upstream SHA256SUMS"))?;

    if path.exists() {
        if let Ok(actual) = local_sha256(path).await {
            if actual == expected {
                return Ok(());
            }
        }
    }

    download(url, path).await
}

async fn download(url: &str, dest: &Path) -> Result<()> {
    let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
    let resp = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("downloading {url}"))?
        .error_for_status()
        .with_context(|| format!("download of {url} returned an error status"))?;
    let bytes = resp.bytes().await?;
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(dest, &bytes)
        .await
        .with_context(|| format!("writing downloaded asset to {}", dest.display()))?;
    Ok(())
}

#[cfg(unix)]
fn set_mode_0700(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
        .with_context(|| format!("setting mode 0700 on {}", dir.display()))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode_0700(_dir: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_hash_matches_binary_mode_suffix() {
        let sums = "aaaa111  other-file\nbbbb222 *vmlinux-5.10.bin\n";
        assert_eq!(
            expected_hash(sums, "vmlinux-5.10.bin"),
            Some("bbbb222")
        );
    }

    #[test]
    fn expected_hash_missing_name_returns_none() {
        let sums = "aaaa111 *other-file\n";
        assert_eq!(expected_hash(sums, "vmlinux-5.10.bin"), None);
    }

    #[test]
    fn basename_extracts_trailing_path_segment() {
        assert_eq!(
            basename("https://example.com/a/b/vmlinux-5.10.bin").unwrap(),
            "vmlinux-5.10.bin"
        );
    }
}
