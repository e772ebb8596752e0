use std::path::{Path, PathBuf};

use git2::build::CheckoutBuilder;
use git2::{BranchType, ErrorCode, IndexAddOption, Repository, ResetType, Signature};

use crate::{flog_debug, flog_warn, Result};

/// Git operations for one repository path.
///
/// Used both against the shared mainline (worktree and branch management)
/// and against disposable merge clones (fetch, fast-forward, push).
pub struct GitOps {
    repo_path: PathBuf,
}

impl GitOps {
    pub fn new(repo_path: &Path) -> Result<Self> {
        flog_debug!("GitOps::new path={}", repo_path.display());
        let _ = Repository::discover(repo_path)?;
        Ok(Self {
            repo_path: repo_path.to_path_buf(),
        })
    }

    fn repo(&self) -> Result<Repository> {
        Ok(Repository::discover(&self.repo_path)?)
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Create `branch` at the tip of `mainline` and attach a worktree for
    /// it at `worktree_path`. A stale branch from a previous failed run is
    /// overwritten.
    pub fn create_workspace(&self, branch: &str, worktree_path: &Path, mainline: &str) -> Result<()> {
        flog_debug!(
            "GitOps::create_workspace branch={} path={} mainline={}",
            branch,
            worktree_path.display(),
            mainline
        );
        let repo = self.repo()?;
        let tip = repo
            .find_branch(mainline, BranchType::Local)?
            .get()
            .peel_to_commit()?;
        let branch_obj = repo.branch(branch, &tip, true)?;
        let branch_ref = branch_obj.into_reference();
        let mut opts = git2::WorktreeAddOptions::new();
        opts.reference(Some(&branch_ref));
        // Worktree names cannot contain slashes, so use the folder name
        let worktree_name = worktree_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(branch);
        repo.worktree(worktree_name, worktree_path, Some(&opts))?;
        Ok(())
    }

    /// Remove a worktree directory and its git bookkeeping. The branch the
    /// worktree was on is left alone.
    ///
    /// The admin directory under .git/worktrees must go too, otherwise git
    /// keeps treating the branch as checked out.
    pub fn remove_worktree(&self, worktree_path: &Path) -> Result<()> {
        flog_debug!("GitOps::remove_worktree path={}", worktree_path.display());
        let repo = self.repo()?;

        let folder_name = worktree_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|s| s.to_string());

        let worktree_name: Option<String> = repo
            .worktrees()?
            .iter()
            .flatten()
            .find(|name| {
                repo.find_worktree(name)
                    .map(|wt| wt.path() == worktree_path)
                    .unwrap_or(false)
                    || Some(*name) == folder_name.as_deref()
            })
            .map(|s| s.to_string());

        if let Some(ref name) = worktree_name {
            if let Ok(worktree) = repo.find_worktree(name) {
                let _ = worktree.unlock();
                let prune_result = worktree.prune(Some(
                    git2::WorktreePruneOptions::new()
                        .valid(true)
                        .working_tree(true)
                        .locked(true),
                ));
                if let Err(e) = prune_result {
                    flog_warn!("worktree prune failed for '{}': {}", name, e);
                }
            }
        }

        if worktree_path.exists() {
            std::fs::remove_dir_all(worktree_path)?;
        }

        for name in [worktree_name.as_ref(), folder_name.as_ref()].into_iter().flatten() {
            let admin_dir = repo.path().join("worktrees").join(name);
            if admin_dir.exists() {
                let _ = std::fs::remove_dir_all(&admin_dir);
            }
        }

        Ok(())
    }

    /// Whether the working tree at `path` has staged or unstaged changes.
    pub fn is_dirty(&self, path: &Path) -> Result<bool> {
        let repo = Repository::open(path)?;
        let statuses = repo.statuses(None)?;
        Ok(!statuses.is_empty())
    }

    /// Stage everything under `path` and commit it.
    pub fn commit_all(&self, path: &Path, message: &str) -> Result<String> {
        flog_debug!("GitOps::commit_all path={} message={}", path.display(), message);
        let repo = Repository::open(path)?;
        let mut index = repo.index()?;
        index.add_all(["."].iter(), IndexAddOption::DEFAULT, None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let sig = repo
            .signature()
            .or_else(|_| Signature::now("Foreman", "foreman@localhost"))?;

        let parent = match repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(e) if e.code() == ErrorCode::UnbornBranch => None,
            Err(e) => return Err(e.into()),
        };

        let parents: Vec<&git2::Commit> = parent.iter().collect();
        let commit_id = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        Ok(commit_id.to_string())
    }

    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let repo = self.repo()?;
        let result = match repo.find_branch(branch, BranchType::Local) {
            Ok(_) => Ok(true),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        };
        result
    }

    /// Commit id a local branch points at.
    pub fn branch_tip(&self, branch: &str) -> Result<String> {
        let repo = self.repo()?;
        let commit = repo
            .find_branch(branch, BranchType::Local)?
            .get()
            .peel_to_commit()?;
        Ok(commit.id().to_string())
    }

    /// Clone this repository into `target` (an empty directory).
    pub fn clone_to(&self, target: &Path) -> Result<()> {
        flog_debug!(
            "GitOps::clone_to source={} target={}",
            self.repo_path.display(),
            target.display()
        );
        let url = self
            .repo_path
            .to_str()
            .ok_or_else(|| crate::Error::Validation("repository path is not UTF-8".to_string()))?;
        Repository::clone(url, target)?;
        Ok(())
    }

    /// Fetch `branch` from origin into its remote-tracking ref.
    pub fn fetch_branch(&self, branch: &str) -> Result<()> {
        let repo = self.repo()?;
        let mut remote = repo.find_remote("origin")?;
        let refspec = format!("refs/heads/{branch}:refs/remotes/origin/{branch}");
        remote.fetch(&[refspec.as_str()], None, None)?;
        Ok(())
    }

    /// Check out a local `mainline` branch pinned to origin's tip.
    ///
    /// Merge clones may come up with some other branch as HEAD; all merge
    /// work happens on the mainline, so force it into place first.
    pub fn checkout_mainline(&self, mainline: &str) -> Result<()> {
        let repo = self.repo()?;
        let origin_tip = repo
            .find_reference(&format!("refs/remotes/origin/{mainline}"))?
            .peel_to_commit()?;
        let refname = format!("refs/heads/{mainline}");
        repo.reference(&refname, origin_tip.id(), true, "pin mainline to origin")?;
        repo.set_head(&refname)?;
        repo.checkout_head(Some(CheckoutBuilder::default().force()))?;
        Ok(())
    }

    /// Fast-forward the local `mainline` to the fetched `branch`.
    ///
    /// Returns false when the histories have diverged and a fast-forward
    /// is not possible; true when the mainline now contains the branch.
    pub fn fast_forward(&self, branch: &str, mainline: &str) -> Result<bool> {
        let repo = self.repo()?;
        let their_ref = repo.find_reference(&format!("refs/remotes/origin/{branch}"))?;
        let their_commit = their_ref.peel_to_commit()?;
        let their_annotated = repo.reference_to_annotated_commit(&their_ref)?;

        let (analysis, _preference) = repo.merge_analysis(&[&their_annotated])?;

        if analysis.is_up_to_date() {
            return Ok(true);
        }

        if analysis.is_fast_forward() {
            let refname = format!("refs/heads/{mainline}");
            repo.reference(
                &refname,
                their_commit.id(),
                true,
                &format!("fast-forward to {branch}"),
            )?;
            repo.set_head(&refname)?;
            repo.checkout_head(Some(CheckoutBuilder::default().force()))?;
            return Ok(true);
        }

        Ok(false)
    }

    /// Hard-reset the checkout to origin's `mainline` tip and drop
    /// untracked files, discarding whatever a failed merge attempt left.
    pub fn reset_to_remote(&self, mainline: &str) -> Result<()> {
        let repo = self.repo()?;
        let origin_tip = repo
            .find_reference(&format!("refs/remotes/origin/{mainline}"))?
            .peel_to_commit()?;
        let mut checkout = CheckoutBuilder::new();
        checkout.force().remove_untracked(true);
        repo.reset(origin_tip.as_object(), ResetType::Hard, Some(&mut checkout))?;
        Ok(())
    }

    /// Push the local `mainline` branch back to origin.
    pub fn push_mainline(&self, mainline: &str) -> Result<()> {
        flog_debug!("GitOps::push_mainline mainline={}", mainline);
        let repo = self.repo()?;
        let mut remote = repo.find_remote("origin")?;
        let refspec = format!("refs/heads/{mainline}:refs/heads/{mainline}");
        remote.push(&[refspec.as_str()], None)?;
        Ok(())
    }
}
