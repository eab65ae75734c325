//! Working tree access built on top of libgit2.

use std::fmt;
use std::path::{Path, PathBuf};

use git2::{
    build::CheckoutBuilder, DescribeOptions, ErrorClass, ErrorCode, Oid,
    Repository as GitRepository, Signature, StashFlags, Status, StatusOptions,
};
use kiff_api::RevisionRef;

use crate::{Error, Result};

const STASH_MESSAGE: &str = "kiff: set aside local changes";

/// Version-control primitives consumed by the snapshot manager.
///
/// Each call is one blocking operation; failures are surfaced as errors and
/// never retried.
pub trait VersionControl {
    /// Whether tracked files differ from the last commit. Untracked files
    /// are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the status cannot be queried.
    fn has_local_modifications(&self) -> Result<bool>;

    /// Stable descriptor of the checked-out commit (tag based, falling back
    /// to the abbreviated id). Does not include a dirty marker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VcsDescribe`] when no descriptor exists.
    fn describe(&self) -> Result<String>;

    /// Set tracked modifications aside, leaving the tree at the last commit.
    ///
    /// # Errors
    ///
    /// Returns an error if stashing fails.
    fn stash(&mut self) -> Result<()>;

    /// Re-apply and drop the most recent stash.
    ///
    /// # Errors
    ///
    /// Returns an error if the stash cannot be applied cleanly.
    fn stash_pop(&mut self) -> Result<()>;

    /// Check out `revision`, remembering the current position.
    ///
    /// # Errors
    ///
    /// Returns an error if the revision cannot be resolved or checked out.
    fn checkout(&mut self, revision: &RevisionRef) -> Result<()>;

    /// Return to the position recorded by the last [`VersionControl::checkout`].
    ///
    /// # Errors
    ///
    /// Returns an error if nothing was recorded or the checkout fails.
    fn checkout_previous(&mut self) -> Result<()>;
}

/// Where `HEAD` pointed before a checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
enum HeadPosition {
    Branch(String),
    Detached(Oid),
}

/// Git working tree that kiff switches between revisions.
pub struct Repository {
    inner: GitRepository,
    root: PathBuf,
    previous: Option<HeadPosition>,
}

impl Repository {
    /// Open the repository containing `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VcsUnavailable`] if the path is not inside a git
    /// repository with a working tree, and [`Error::Io`] if the path cannot
    /// be canonicalized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let original = path.as_ref();
        let canonical = std::fs::canonicalize(original).map_err(|source| Error::Io {
            path: display_path(original),
            source,
        })?;

        let repo = match GitRepository::discover(&canonical) {
            Ok(repo) => repo,
            Err(err)
                if err.class() == ErrorClass::Repository && err.code() == ErrorCode::NotFound =>
            {
                return Err(Error::VcsUnavailable {
                    path: display_path(&canonical),
                })
            }
            Err(err) => return Err(Error::from(err)),
        };

        let root = repo
            .workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::VcsUnavailable {
                path: display_path(&canonical),
            })?;

        Ok(Self {
            inner: repo,
            root,
            previous: None,
        })
    }

    /// Returns the absolute path to the working tree root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn head_position(&self) -> Result<HeadPosition> {
        let head = self.inner.head().map_err(|err| vcs_error("git rev-parse HEAD", &err))?;
        if head.is_branch() {
            if let Some(name) = head.name() {
                return Ok(HeadPosition::Branch(name.to_owned()));
            }
        }
        Ok(HeadPosition::Detached(head.peel_to_commit()?.id()))
    }

    fn move_head(&self, position: &HeadPosition, operation: &'static str) -> Result<()> {
        let commit = match position {
            HeadPosition::Branch(name) => self.inner.find_reference(name)?.peel_to_commit()?,
            HeadPosition::Detached(oid) => self.inner.find_commit(*oid)?,
        };

        let mut builder = CheckoutBuilder::new();
        builder.safe();
        self.inner
            .checkout_tree(commit.as_object(), Some(&mut builder))
            .map_err(|err| vcs_error(operation, &err))?;

        let moved = match position {
            HeadPosition::Branch(name) => self.inner.set_head(name),
            HeadPosition::Detached(oid) => self.inner.set_head_detached(*oid),
        };
        moved.map_err(|err| vcs_error(operation, &err))
    }

    fn stash_signature(&self) -> Result<Signature<'static>> {
        match self.inner.signature() {
            Ok(signature) => Ok(signature),
            Err(_) => Ok(Signature::now("kiff", "kiff@localhost")?),
        }
    }
}

impl VersionControl for Repository {
    fn has_local_modifications(&self) -> Result<bool> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(false)
            .include_ignored(false)
            .renames_head_to_index(true);

        let statuses = self
            .inner
            .statuses(Some(&mut opts))
            .map_err(|err| vcs_error("git status", &err))?;
        Ok(statuses
            .iter()
            .any(|entry| entry.status() != Status::CURRENT))
    }

    fn describe(&self) -> Result<String> {
        let head = self.inner.head().map_err(|err| Error::VcsDescribe {
            reason: err.message().to_owned(),
        })?;
        let commit = head.peel_to_commit().map_err(|err| Error::VcsDescribe {
            reason: err.message().to_owned(),
        })?;

        let mut opts = DescribeOptions::new();
        opts.show_commit_oid_as_fallback(true);
        commit
            .as_object()
            .describe(&opts)
            .and_then(|description| description.format(None))
            .map_err(|err| Error::VcsDescribe {
                reason: err.message().to_owned(),
            })
    }

    fn stash(&mut self) -> Result<()> {
        tracing::info!("$ git stash");
        let signature = self.stash_signature()?;
        self.inner
            .stash_save(&signature, STASH_MESSAGE, Some(StashFlags::DEFAULT))
            .map_err(|err| vcs_error("git stash", &err))?;
        Ok(())
    }

    fn stash_pop(&mut self) -> Result<()> {
        tracing::info!("$ git stash pop");
        self.inner
            .stash_pop(0, None)
            .map_err(|err| vcs_error("git stash pop", &err))
    }

    fn checkout(&mut self, revision: &RevisionRef) -> Result<()> {
        tracing::info!("$ git checkout {revision}");
        let origin = self.head_position()?;

        let (object, reference) = self
            .inner
            .revparse_ext(revision.as_str())
            .map_err(|err| vcs_error("git checkout", &err))?;
        let commit = object
            .peel_to_commit()
            .map_err(|err| vcs_error("git checkout", &err))?;
        let target = match reference {
            Some(reference) if reference.is_branch() => reference
                .name()
                .map_or(HeadPosition::Detached(commit.id()), |name| {
                    HeadPosition::Branch(name.to_owned())
                }),
            _ => HeadPosition::Detached(commit.id()),
        };

        self.move_head(&target, "git checkout")?;
        self.previous = Some(origin);
        Ok(())
    }

    fn checkout_previous(&mut self) -> Result<()> {
        tracing::info!("$ git checkout -");
        let previous = self.previous.take().ok_or_else(|| Error::Vcs {
            operation: "git checkout -",
            message: "no previous checkout recorded".into(),
        })?;
        if let Err(err) = self.move_head(&previous, "git checkout -") {
            self.previous = Some(previous);
            return Err(err);
        }
        Ok(())
    }
}

fn vcs_error(operation: &'static str, err: &git2::Error) -> Error {
    Error::Vcs {
        operation,
        message: err.message().to_owned(),
    }
}

fn display_path(path: &Path) -> String {
    path.to_path_buf()
        .into_os_string()
        .to_string_lossy()
        .into_owned()
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{IndexAddOption, Repository as GitRepository};
    use tempfile::TempDir;

    #[test]
    fn untracked_files_are_not_modifications() -> Result<()> {
        let temp = TempDir::new().expect("tempdir");
        let git_repo = GitRepository::init(temp.path())?;
        write_file(temp.path().join("board.kicad_pcb"), "(kicad_pcb)\n");
        stage_and_commit(&git_repo, "Initial commit")?;

        write_file(temp.path().join("notes.txt"), "scratch\n");
        let repo = Repository::open(temp.path())?;
        assert!(!repo.has_local_modifications()?);

        write_file(temp.path().join("board.kicad_pcb"), "(kicad_pcb (edited))\n");
        assert!(repo.has_local_modifications()?);
        Ok(())
    }

    #[test]
    fn describe_prefers_annotated_tags() -> Result<()> {
        let temp = TempDir::new().expect("tempdir");
        let git_repo = GitRepository::init(temp.path())?;
        write_file(temp.path().join("board.kicad_pcb"), "one\n");
        let first = stage_and_commit(&git_repo, "Initial commit")?;

        let repo = Repository::open(temp.path())?;
        let untagged = repo.describe()?;
        assert!(first.to_string().starts_with(&untagged));

        let signature = git2::Signature::now("Test User", "test@example.com")?;
        let object = git_repo.find_object(first, None)?;
        git_repo.tag("v1.0", &object, &signature, "release", false)?;
        assert_eq!(repo.describe()?, "v1.0");

        write_file(temp.path().join("board.kicad_pcb"), "two\n");
        stage_and_commit(&git_repo, "Second commit")?;
        assert!(repo.describe()?.starts_with("v1.0-1-g"));
        Ok(())
    }

    #[test]
    fn describe_without_commits_fails() -> Result<()> {
        let temp = TempDir::new().expect("tempdir");
        GitRepository::init(temp.path())?;
        let repo = Repository::open(temp.path())?;
        assert!(matches!(repo.describe(), Err(Error::VcsDescribe { .. })));
        Ok(())
    }

    #[test]
    fn stash_and_pop_restore_modifications() -> Result<()> {
        let temp = TempDir::new().expect("tempdir");
        let git_repo = GitRepository::init(temp.path())?;
        let board = temp.path().join("board.kicad_pcb");
        write_file(board.clone(), "committed\n");
        stage_and_commit(&git_repo, "Initial commit")?;
        write_file(board.clone(), "edited\n");

        let mut repo = Repository::open(temp.path())?;
        repo.stash()?;
        assert!(!repo.has_local_modifications()?);
        assert_eq!(read_file(&board), "committed\n");

        repo.stash_pop()?;
        assert!(repo.has_local_modifications()?);
        assert_eq!(read_file(&board), "edited\n");
        Ok(())
    }

    #[test]
    fn checkout_previous_returns_to_branch() -> Result<()> {
        let temp = TempDir::new().expect("tempdir");
        let git_repo = GitRepository::init(temp.path())?;
        let board = temp.path().join("board.kicad_pcb");
        write_file(board.clone(), "first\n");
        stage_and_commit(&git_repo, "Initial commit")?;
        write_file(board.clone(), "second\n");
        stage_and_commit(&git_repo, "Second commit")?;
        let branch = git_repo.head()?.name().map(str::to_owned);

        let mut repo = Repository::open(temp.path())?;
        repo.checkout(&RevisionRef::parse("HEAD~1"))?;
        assert_eq!(read_file(&board), "first\n");
        assert!(git_repo.head_detached()?);

        repo.checkout_previous()?;
        assert_eq!(read_file(&board), "second\n");
        assert_eq!(git_repo.head()?.name().map(str::to_owned), branch);
        Ok(())
    }

    #[test]
    fn checkout_previous_without_checkout_fails() -> Result<()> {
        let temp = TempDir::new().expect("tempdir");
        let git_repo = GitRepository::init(temp.path())?;
        write_file(temp.path().join("board.kicad_pcb"), "first\n");
        stage_and_commit(&git_repo, "Initial commit")?;

        let mut repo = Repository::open(temp.path())?;
        assert!(matches!(repo.checkout_previous(), Err(Error::Vcs { .. })));
        Ok(())
    }

    #[test]
    fn open_non_repository_returns_error() {
        let temp = TempDir::new().expect("tempdir");
        let err = Repository::open(temp.path());
        assert!(matches!(err, Err(Error::VcsUnavailable { .. })));
    }

    fn write_file(path: std::path::PathBuf, contents: &str) {
        std::fs::write(path, contents).expect("write file");
    }

    fn read_file(path: &Path) -> String {
        std::fs::read_to_string(path).expect("read file")
    }

    fn stage_and_commit(repo: &GitRepository, message: &str) -> Result<Oid> {
        let mut index = repo.index()?;
        index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
        index.write()?;
        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let signature = git2::Signature::now("Test User", "test@example.com")?;

        let parents = match repo.head() {
            Ok(head) => head
                .peel_to_commit()
                .map_or_else(|_| Vec::new(), |parent| vec![parent]),
            Err(err)
                if matches!(
                    (err.class(), err.code()),
                    (
                        ErrorClass::Reference,
                        ErrorCode::NotFound | ErrorCode::UnbornBranch
                    )
                ) =>
            {
                Vec::new()
            }
            Err(err) => return Err(Error::from(err)),
        };

        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
        Ok(repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &parent_refs,
        )?)
    }
}
