//! Render decisions for protected content.
//!
//! The guard never grants while state is unknown: `Loading` renders the
//! loading placeholder, `Error` renders the fallback.

use std::sync::Arc;

use gatehouse_core::{PermissionError, Snapshot, evaluate};

/// Where a permission session stands for its current identity.
#[derive(Debug, Clone)]
pub enum GuardState {
    /// A fetch is in flight and there is no usable snapshot yet.
    Loading,
    Ready(Arc<Snapshot>),
    /// The last fetch failed, or nobody is signed in.
    Error(PermissionError),
}

impl GuardState {
    pub fn snapshot(&self) -> Option<&Snapshot> {
        match self {
            GuardState::Ready(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&PermissionError> {
        match self {
            GuardState::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, GuardState::Loading)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderDecision {
    Content,
    Fallback,
    Loading,
}

/// What a guarded region requires of the current snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Permission { resource: String, action: String },
    Admin,
    /// Membership in the named group. Administrators always pass.
    Group(String),
    /// At least one. Empty denies.
    AnyOf(Vec<Requirement>),
    /// Every one. Empty allows.
    AllOf(Vec<Requirement>),
}

impl Requirement {
    pub fn permission(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Requirement::Permission {
            resource: resource.into(),
            action: action.into(),
        }
    }

    pub fn group(name: impl Into<String>) -> Self {
        Requirement::Group(name.into())
    }

    pub fn is_met(&self, snapshot: &Snapshot) -> bool {
        match self {
            Requirement::Permission { resource, action } => {
                evaluate(Some(snapshot), resource, action)
            }
            Requirement::Admin => snapshot.is_admin(),
            Requirement::Group(name) => snapshot.is_admin() || snapshot.in_group(name),
            Requirement::AnyOf(reqs) => reqs.iter().any(|r| r.is_met(snapshot)),
            Requirement::AllOf(reqs) => reqs.iter().all(|r| r.is_met(snapshot)),
        }
    }
}

/// Decide what to render for `(resource, action)` in `state`.
pub fn decide(state: &GuardState, resource: &str, action: &str) -> RenderDecision {
    decide_requirement(state, &Requirement::permission(resource, action))
}

pub fn decide_requirement(state: &GuardState, requirement: &Requirement) -> RenderDecision {
    match state {
        GuardState::Loading => RenderDecision::Loading,
        GuardState::Error(_) => RenderDecision::Fallback,
        GuardState::Ready(snapshot) if requirement.is_met(snapshot) => RenderDecision::Content,
        GuardState::Ready(_) => RenderDecision::Fallback,
    }
}

type ErrorRenderer<'a, T> = Box<dyn FnOnce(&PermissionError) -> T + 'a>;

/// Wraps content behind a requirement, with optional fallback and loading output.
///
/// ```
/// use gatehouse_auth::guard::{GuardState, PermissionGuard};
///
/// let html = PermissionGuard::new("expressions", "edit")
///     .fallback("<p>No permission</p>")
///     .render(&GuardState::Loading, false, || "<form>…</form>");
/// assert_eq!(html, None);
/// ```
pub struct PermissionGuard<'a, T> {
    requirement: Requirement,
    fallback: Option<T>,
    loading: Option<T>,
    on_error: Option<ErrorRenderer<'a, T>>,
}

impl<'a, T> PermissionGuard<'a, T> {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self::requiring(Requirement::permission(resource, action))
    }

    pub fn requiring(requirement: Requirement) -> Self {
        Self {
            requirement,
            fallback: None,
            loading: None,
            on_error: None,
        }
    }

    pub fn fallback(mut self, fallback: T) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn loading_fallback(mut self, loading: T) -> Self {
        self.loading = Some(loading);
        self
    }

    /// Diagnostic output for the error state, used only in debug mode.
    pub fn on_error(mut self, render: impl FnOnce(&PermissionError) -> T + 'a) -> Self {
        self.on_error = Some(Box::new(render));
        self
    }

    pub fn requirement(&self) -> &Requirement {
        &self.requirement
    }

    /// `None` means render nothing.
    pub fn render(
        self,
        state: &GuardState,
        debug_errors: bool,
        content: impl FnOnce() -> T,
    ) -> Option<T> {
        match decide_requirement(state, &self.requirement) {
            RenderDecision::Content => Some(content()),
            RenderDecision::Loading => self.loading,
            RenderDecision::Fallback => match (state.error(), self.on_error) {
                (Some(e), Some(render)) if debug_errors => Some(render(e)),
                _ => self.fallback,
            },
        }
    }
}
