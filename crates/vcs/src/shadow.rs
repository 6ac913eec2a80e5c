//! Plain file copies of a repository tree for the shadow-copy workspace mode.
//!
//! `.git` is skipped at every depth, so a shadow workspace never carries
//! version-control metadata. Additional names can be excluded at the top level
//! of the copied tree.

use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, VcsError};
use crate::git::path_str;

pub(crate) const VCS_METADATA_DIR: &str = ".git";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMethod {
    Rsync,
    Recursive,
}

/// Mirror `src` into `dst`, preferring `rsync` when it is on `PATH`.
pub async fn shadow_copy(src: &Path, dst: &Path, excludes: &[String]) -> Result<CopyMethod> {
    match which::which("rsync") {
        Ok(rsync) => {
            rsync_copy(&rsync, src, dst, excludes).await?;
            Ok(CopyMethod::Rsync)
        }
        Err(_) => {
            debug!("rsync not found, using recursive copy");
            recursive_copy(src, dst, excludes).await?;
            Ok(CopyMethod::Recursive)
        }
    }
}

async fn rsync_copy(rsync: &Path, src: &Path, dst: &Path, excludes: &[String]) -> Result<()> {
    let mut args = vec!["-a".to_string(), format!("--exclude={}", VCS_METADATA_DIR)];
    args.extend(excludes.iter().map(|name| format!("--exclude=/{}", name)));
    // Trailing slash copies the contents of src rather than src itself.
    args.push(format!("{}/", path_str(src)?.trim_end_matches('/')));
    args.push(path_str(dst)?.to_string());

    debug!("Running rsync {:?}", args);
    let output = Command::new(rsync).args(&args).output().await?;
    if !output.status.success() {
        return Err(VcsError::command_failed(
            format!("rsync {}", args.join(" ")),
            &output.stderr,
        ));
    }
    Ok(())
}

/// Portable fallback used when no mirroring tool is available.
pub async fn recursive_copy(src: &Path, dst: &Path, excludes: &[String]) -> Result<()> {
    let src = src.to_path_buf();
    let dst = dst.to_path_buf();
    let excludes = excludes.to_vec();

    tokio::task::spawn_blocking(move || copy_tree(&src, &dst, excludes))
        .await
        .map_err(|e| VcsError::CopyFailed(format!("copy task aborted: {}", e)))?
}

fn copy_tree(src: &Path, dst: &Path, excludes: Vec<String>) -> Result<()> {
    std::fs::create_dir_all(dst)?;

    let walker = WalkBuilder::new(src)
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(move |entry| {
            let name = entry.file_name().to_string_lossy();
            if name == VCS_METADATA_DIR {
                return false;
            }
            !(entry.depth() == 1 && excludes.iter().any(|e| name == e.as_str()))
        })
        .build();

    for entry in walker {
        let entry = entry.map_err(|e| VcsError::CopyFailed(e.to_string()))?;
        if entry.depth() == 0 {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| VcsError::CopyFailed(e.to_string()))?;
        let target: PathBuf = dst.join(relative);

        let Some(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let link = std::fs::read_link(src)?;
    std::os::unix::fs::symlink(link, dst)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    if src.is_file() {
        std::fs::copy(src, dst)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join(".git/objects")).unwrap();
        std::fs::write(root.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
        std::fs::create_dir_all(root.join("src/nested")).unwrap();
        std::fs::write(root.join("src/lib.rs"), "pub fn f() {}\n").unwrap();
        std::fs::write(root.join("src/nested/mod.rs"), "// nested\n").unwrap();
        std::fs::write(root.join(".env"), "KEY=1\n").unwrap();
        std::fs::create_dir_all(root.join("vendor/dep/.git")).unwrap();
        std::fs::write(root.join("vendor/dep/file.txt"), "dep\n").unwrap();
        std::fs::create_dir_all(root.join(".fleet/runs")).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_recursive_copy_skips_git_metadata() {
        let src = sample_tree();
        let out = TempDir::new().unwrap();
        let dst = out.path().join("copy");

        recursive_copy(src.path(), &dst, &[".fleet".to_string()])
            .await
            .unwrap();

        assert!(dst.join("src/lib.rs").exists());
        assert!(dst.join("src/nested/mod.rs").exists());
        assert!(dst.join(".env").exists());
        assert!(dst.join("vendor/dep/file.txt").exists());
        assert!(!dst.join(".git").exists());
        assert!(!dst.join("vendor/dep/.git").exists());
        assert!(!dst.join(".fleet").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_recursive_copy_preserves_symlinks() {
        let src = sample_tree();
        std::os::unix::fs::symlink("src/lib.rs", src.path().join("link.rs")).unwrap();
        let out = TempDir::new().unwrap();
        let dst = out.path().join("copy");

        recursive_copy(src.path(), &dst, &[]).await.unwrap();

        let link = std::fs::read_link(dst.join("link.rs")).unwrap();
        assert_eq!(link, PathBuf::from("src/lib.rs"));
    }

    #[tokio::test]
    async fn test_shadow_copy_never_copies_git() {
        let src = sample_tree();
        let out = TempDir::new().unwrap();
        let dst = out.path().join("copy");
        std::fs::create_dir_all(&dst).unwrap();

        shadow_copy(src.path(), &dst, &[]).await.unwrap();

        assert!(dst.join("src/lib.rs").exists());
        assert!(!dst.join(".git").exists());
        assert!(!dst.join("vendor/dep/.git").exists());
    }
}
