use std::path::Path;
use std::process::Command;
use tempfile::TempDir;
use vcs::{GitVcs, ProvisionRequest, Provisioner, RemoveOutcome, VcsError, WorkspaceMode};

const BRANCH: &str = "codegen/T-1-add-login-form";

fn git(args: &[&str], cwd: &Path) {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

fn create_temp_git_repo() -> TempDir {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let root = temp_dir.path();

    git(&["init", "--initial-branch=main"], root);
    git(&["config", "user.email", "test@test.com"], root);
    git(&["config", "user.name", "Test User"], root);

    std::fs::write(root.join("README.md"), "# Test\n").expect("Failed to write README");
    std::fs::create_dir_all(root.join("src")).unwrap();
    std::fs::write(root.join("src/main.rs"), "fn main() {}\n").unwrap();

    git(&["add", "."], root);
    git(&["commit", "-m", "Initial commit"], root);

    temp_dir
}

fn request(repo: &TempDir, base: &TempDir, mode: WorkspaceMode) -> ProvisionRequest {
    ProvisionRequest::new(repo.path(), base.path(), BRANCH, "T-1", mode)
}

async fn branch_of(path: &Path) -> String {
    GitVcs::new(path).current_branch(path).await.unwrap()
}

#[tokio::test]
async fn test_worktree_checked_out_on_branch() {
    let repo = create_temp_git_repo();
    let base = TempDir::new().unwrap();

    let ws = Provisioner::new()
        .provision(&request(&repo, &base, WorkspaceMode::IsolatedWorktree))
        .await
        .unwrap();

    assert!(ws.path.ends_with("T-1"));
    assert!(ws.path.join("README.md").exists());
    assert!(ws.path.join(".git").is_file());
    assert_eq!(ws.branch.as_deref(), Some(BRANCH));
    assert_eq!(branch_of(&ws.path).await, BRANCH);
}

#[tokio::test]
async fn test_worktree_reprovision_recreates_cleanly() {
    let repo = create_temp_git_repo();
    let base = TempDir::new().unwrap();
    let provisioner = Provisioner::new();
    let req = request(&repo, &base, WorkspaceMode::IsolatedWorktree);

    let first = provisioner.provision(&req).await.unwrap();
    std::fs::write(first.path.join("scratch.txt"), "left over").unwrap();

    let second = provisioner.provision(&req).await.unwrap();

    assert_eq!(first.path, second.path);
    assert!(!second.path.join("scratch.txt").exists());
    assert_eq!(branch_of(&second.path).await, BRANCH);
}

#[tokio::test]
async fn test_full_clone_has_independent_metadata() {
    let repo = create_temp_git_repo();
    let base = TempDir::new().unwrap();

    let ws = Provisioner::new()
        .provision(&request(&repo, &base, WorkspaceMode::FullClone))
        .await
        .unwrap();

    assert!(ws.path.join(".git").is_dir());
    assert!(ws.path.join("src/main.rs").exists());
    assert_eq!(branch_of(&ws.path).await, BRANCH);
    // The primary checkout is untouched.
    assert_eq!(branch_of(repo.path()).await, "main");
}

#[tokio::test]
async fn test_shadow_copy_has_no_vcs_metadata() {
    let repo = create_temp_git_repo();
    let base = TempDir::new().unwrap();

    let ws = Provisioner::new()
        .provision(&request(&repo, &base, WorkspaceMode::ShadowCopy))
        .await
        .unwrap();

    assert!(ws.path.join("README.md").exists());
    assert!(ws.path.join("src/main.rs").exists());
    assert!(!ws.path.join(".git").exists());
    assert!(ws.branch.is_none());
}

#[tokio::test]
async fn test_shadow_copy_with_base_dir_inside_repo() {
    let repo = create_temp_git_repo();
    let req = ProvisionRequest::new(
        repo.path(),
        ".workspaces",
        BRANCH,
        "T-1",
        WorkspaceMode::ShadowCopy,
    );

    let ws = Provisioner::new().provision(&req).await.unwrap();

    assert!(ws.path.join("README.md").exists());
    assert!(!ws.path.join(".workspaces").exists());
}

#[tokio::test]
async fn test_path_is_base_dir_and_key_for_every_mode() {
    let repo = create_temp_git_repo();

    for mode in WorkspaceMode::ALL {
        let base = TempDir::new().unwrap();
        let ws = Provisioner::new()
            .provision(&request(&repo, &base, mode))
            .await
            .unwrap();

        let expected = std::fs::canonicalize(base.path()).unwrap().join("T-1");
        assert_eq!(std::fs::canonicalize(&ws.path).unwrap(), expected);
        Provisioner::new().remove(repo.path(), &ws).await.unwrap();
    }
}

#[tokio::test]
async fn test_not_a_repository() {
    let plain = TempDir::new().unwrap();
    let base = TempDir::new().unwrap();
    let nested = base.path().join("nested");
    let req = ProvisionRequest::new(
        plain.path(),
        &nested,
        BRANCH,
        "T-1",
        WorkspaceMode::FullClone,
    );

    let err = Provisioner::new().provision(&req).await.unwrap_err();

    assert!(matches!(err, VcsError::NotARepository(_)));
    assert!(!nested.exists());
}

#[tokio::test]
async fn test_invalid_branch_reports_tool_diagnostics() {
    let repo = create_temp_git_repo();
    let base = TempDir::new().unwrap();
    let req = ProvisionRequest::new(
        repo.path(),
        base.path(),
        "bad..branch/T-1",
        "T-1",
        WorkspaceMode::IsolatedWorktree,
    );

    let err = Provisioner::new().provision(&req).await.unwrap_err();

    match err {
        VcsError::CommandFailed { command, diagnostics } => {
            assert!(command.starts_with("git worktree add"));
            assert!(!diagnostics.is_empty());
        }
        other => panic!("expected CommandFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_remove_is_mode_aware_and_idempotent() {
    let repo = create_temp_git_repo();

    for mode in WorkspaceMode::ALL {
        let base = TempDir::new().unwrap();
        let provisioner = Provisioner::new();
        let ws = provisioner
            .provision(&request(&repo, &base, mode))
            .await
            .unwrap();

        let first = provisioner.remove(repo.path(), &ws).await.unwrap();
        assert_eq!(first, RemoveOutcome::Removed);
        assert!(!ws.path.exists());

        let second = provisioner.remove(repo.path(), &ws).await.unwrap();
        assert_eq!(second, RemoveOutcome::AlreadyGone);
    }

    // The worktree registration is gone, so the branch can be checked out again.
    let list = GitVcs::new(repo.path())
        .run_git(&["worktree", "list", "--porcelain"], repo.path())
        .await
        .unwrap();
    assert!(!list.contains(BRANCH));
}
