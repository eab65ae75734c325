//! Switching the working tree between the current and target states.
//!
//! A comparison walks
//! `Initial → SavedCurrent → Stashed? → CheckedOutTarget? → RenderedTarget →
//! RestoredCheckout? → Unstashed? → Done`.
//! Every stash and checkout performed on the way in is undone on the way
//! out, in reverse order, whether or not the target render succeeded.

use kiff_api::{RevisionRef, WorkingTreeState};

use crate::repository::VersionControl;
use crate::{Error, RenderStage, RestoreStep, Result};

const DIRTY_SUFFIX: &str = "-dirty";

/// Progress marker of a comparison, logged at each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing touched yet.
    Initial,
    /// The working tree as found has been rendered.
    SavedCurrent,
    /// Local modifications are in the stash.
    Stashed,
    /// The target revision is checked out.
    CheckedOutTarget,
    /// The target state has been rendered (or failed to).
    RenderedTarget,
    /// The original revision is checked out again.
    RestoredCheckout,
    /// Local modifications are back in the working tree.
    Unstashed,
    /// Working tree is in its original state.
    Done,
}

/// Render produced for one state, keyed by that state's identity.
#[derive(Debug, Clone, PartialEq)]
pub struct StateRender<T> {
    /// Identity of the state at render time.
    pub identity: String,
    /// Whatever the render callback returned.
    pub output: T,
}

/// Both renders of a completed comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison<T> {
    /// Render of the working tree as found.
    pub current: StateRender<T>,
    /// Render of the target state.
    pub target: StateRender<T>,
    /// Working tree state sampled before anything was touched.
    pub initial_state: WorkingTreeState,
}

#[derive(Debug, Default, Clone, Copy)]
struct Undo {
    stashed: bool,
    checked_out: bool,
}

/// Produces renders of two states of the working tree and guarantees the
/// original state is restored before returning.
#[derive(Debug)]
pub struct SnapshotManager<'vcs, V: VersionControl> {
    vcs: &'vcs mut V,
    phase: Phase,
}

impl<'vcs, V: VersionControl> SnapshotManager<'vcs, V> {
    /// Wrap a version-control handle.
    pub fn new(vcs: &'vcs mut V) -> Self {
        Self {
            vcs,
            phase: Phase::Initial,
        }
    }

    /// Last phase reached by [`SnapshotManager::run_comparison`].
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether tracked files differ from the last commit.
    ///
    /// # Errors
    ///
    /// Propagates version-control failures.
    pub fn detect_local_modifications(&self) -> Result<bool> {
        self.vcs.has_local_modifications()
    }

    /// Descriptor of the current state, `-dirty` suffixed when modified.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VcsDescribe`] when the state has no descriptor.
    pub fn resolve_identity(&self) -> Result<String> {
        Ok(self.working_tree_state()?.identity)
    }

    /// Sample identity and dirtiness together.
    ///
    /// # Errors
    ///
    /// Propagates version-control failures.
    pub fn working_tree_state(&self) -> Result<WorkingTreeState> {
        self.described(self.vcs.has_local_modifications()?)
    }

    fn described(&self, dirty: bool) -> Result<WorkingTreeState> {
        let mut identity = self.vcs.describe()?;
        if dirty {
            identity.push_str(DIRTY_SUFFIX);
        }
        Ok(WorkingTreeState { identity, dirty })
    }

    /// Render the current state, switch to `target`, render it, and switch
    /// back.
    ///
    /// `render` is called exactly twice on success: first with
    /// [`RenderStage::Current`], then with [`RenderStage::Target`], each time
    /// with the identity of the state on disk.
    ///
    /// # Errors
    ///
    /// - [`Error::NothingToCompare`] when `target` is `HEAD` and the tree is clean.
    /// - Any error returned by `render` or by the version-control layer.
    /// - [`Error::WorkingTreeNotRestored`] when undoing a stash or checkout
    ///   failed; it carries the render error that was pending, if any.
    pub fn run_comparison<T, F>(
        &mut self,
        target: &RevisionRef,
        mut render: F,
    ) -> Result<Comparison<T>>
    where
        F: FnMut(RenderStage, &str) -> Result<T>,
    {
        self.advance(Phase::Initial);
        let dirty = self.vcs.has_local_modifications()?;
        if target.is_head() && !dirty {
            return Err(Error::NothingToCompare);
        }
        let initial_state = self.described(dirty)?;

        let current = render(RenderStage::Current, &initial_state.identity)?;
        self.advance(Phase::SavedCurrent);

        let mut undo = Undo::default();
        let visited = self.visit_target(target, initial_state.dirty, &mut undo, &mut render);
        self.advance(Phase::RenderedTarget);

        let restored = self.restore(undo);
        let rendered_target = match (visited, restored) {
            (Ok(rendered), Ok(())) => rendered,
            (Err(err), Ok(())) => return Err(err),
            (visited, Err((step, cause))) => {
                return Err(Error::WorkingTreeNotRestored {
                    step,
                    cause: Box::new(cause),
                    pending: visited.err().map(Box::new),
                })
            }
        };
        self.advance(Phase::Done);
        self.verify_restored(&initial_state);

        Ok(Comparison {
            current: StateRender {
                identity: initial_state.identity.clone(),
                output: current,
            },
            target: rendered_target,
            initial_state,
        })
    }

    fn visit_target<T, F>(
        &mut self,
        target: &RevisionRef,
        modified: bool,
        undo: &mut Undo,
        render: &mut F,
    ) -> Result<StateRender<T>>
    where
        F: FnMut(RenderStage, &str) -> Result<T>,
    {
        if modified {
            self.vcs.stash()?;
            undo.stashed = true;
            self.advance(Phase::Stashed);
        }

        if !target.is_head() {
            self.vcs.checkout(target)?;
            undo.checked_out = true;
            self.advance(Phase::CheckedOutTarget);
        }

        let identity = self.resolve_identity()?;
        let output = render(RenderStage::Target, &identity)?;
        Ok(StateRender { identity, output })
    }

    fn restore(&mut self, undo: Undo) -> std::result::Result<(), (RestoreStep, Error)> {
        if undo.checked_out {
            if let Err(cause) = self.vcs.checkout_previous() {
                tracing::error!(error = %cause, "failed to check out the original revision");
                if undo.stashed {
                    tracing::error!(
                        "local changes are still stashed; \
                         check out the original revision and run `git stash pop`"
                    );
                }
                return Err((RestoreStep::CheckoutBack, cause));
            }
            self.advance(Phase::RestoredCheckout);
        }

        if undo.stashed {
            if let Err(cause) = self.vcs.stash_pop() {
                tracing::error!(error = %cause, "failed to restore stashed local changes");
                return Err((RestoreStep::Unstash, cause));
            }
            self.advance(Phase::Unstashed);
        }

        Ok(())
    }

    fn verify_restored(&self, initial: &WorkingTreeState) {
        match self.working_tree_state() {
            Ok(state) if state == *initial => {}
            Ok(state) => tracing::warn!(
                before = %initial.identity,
                after = %state.identity,
                "working tree state differs after restoration"
            ),
            Err(err) => tracing::warn!(error = %err, "could not re-sample working tree state"),
        }
    }

    fn advance(&mut self, phase: Phase) {
        tracing::debug!(from = ?self.phase, to = ?phase, "snapshot transition");
        self.phase = phase;
    }
}
