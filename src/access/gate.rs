//! Request-time permission check.
//!
//! A [`PermissionGate`] is configured with the permission tokens a route needs
//! and a `check_admin` flag, then mounted with
//! `axum::middleware::from_fn_with_state(gate, enforce)`.
//!
//! The default [`DecisionRule::Literal`] reproduces the historical check
//! verbatim: moderators pass when they are *missing* at least one required
//! token, and admins pass only through `check_admin`. The corrected reading is
//! available as [`DecisionRule::RequireAll`] and must be selected explicitly.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use super::{Actor, Permission, Role};
use crate::error::AppError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecisionRule {
    /// `(check_admin && admin) || (any required token absent && moderator)`.
    #[default]
    Literal,
    /// `(check_admin && admin) || (every required token present && moderator)`.
    RequireAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// No actor was attached to the request.
    MissingActor,
    /// The actor's role/permissions do not satisfy the rule.
    Insufficient,
}

#[derive(Debug, Clone)]
pub struct PermissionGate {
    required: Arc<[Permission]>,
    check_admin: bool,
    rule: DecisionRule,
}

impl PermissionGate {
    /// Gate requiring `required` (one token or several).
    pub fn new<I>(required: I, check_admin: bool) -> Self
    where
        I: IntoIterator<Item = Permission>,
    {
        Self {
            required: required.into_iter().collect(),
            check_admin,
            rule: DecisionRule::Literal,
        }
    }

    pub fn single(required: Permission, check_admin: bool) -> Self {
        Self::new([required], check_admin)
    }

    pub fn with_rule(mut self, rule: DecisionRule) -> Self {
        self.rule = rule;
        self
    }

    pub fn required(&self) -> &[Permission] {
        &self.required
    }

    pub fn check_admin(&self) -> bool {
        self.check_admin
    }

    pub fn rule(&self) -> DecisionRule {
        self.rule
    }

    pub fn decide(&self, actor: Option<&Actor>) -> Decision {
        let Some(actor) = actor else {
            return Decision::Deny(DenyReason::MissingActor);
        };

        let admin_pass = self.check_admin && actor.role == Role::Admin;
        let moderator_pass = actor.role == Role::Moderator
            && match self.rule {
                DecisionRule::Literal => self
                    .required
                    .iter()
                    .any(|p| !actor.permissions.contains(*p)),
                DecisionRule::RequireAll => self
                    .required
                    .iter()
                    .all(|p| actor.permissions.contains(*p)),
            };

        if admin_pass || moderator_pass {
            Decision::Allow
        } else {
            Decision::Deny(DenyReason::Insufficient)
        }
    }
}

/// Middleware entry point: forwards the request on allow, answers 403 otherwise.
pub async fn enforce(State(gate): State<PermissionGate>, req: Request, next: Next) -> Response {
    let actor = req.extensions().get::<Actor>();
    match gate.decide(actor) {
        Decision::Allow => {
            if let Some(actor) = actor {
                debug!(user_id = %actor.user_id, role = %actor.role, "permission granted");
            }
        }
        Decision::Deny(reason) => {
            warn!(
                ?reason,
                role = actor.map(|a| a.role.as_str()),
                required = ?gate.required(),
                check_admin = gate.check_admin(),
                "permission denied"
            );
            return AppError::Forbidden.into_response();
        }
    }
    next.run(req).await
}
