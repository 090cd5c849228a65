//! Target Selection
//!
//! Pure decision logic: given a service's spec, its runtime state and the
//! outcome of the latest probe, compute the upstream it should point at.

use crate::domain::entities::{ServiceRuntimeState, ServiceSpec, UpstreamTarget};

/// Target selector.
pub struct TargetSelector;

impl TargetSelector {
    /// Compute the desired upstream target.
    ///
    /// Healthy services go to the explicit `if_success` target when configured,
    /// otherwise back to the original captured from the record. Unhealthy
    /// services go to `if_failed`. A missing scheme is taken from the target
    /// currently applied.
    ///
    /// Returns `None` when healthy but neither an explicit success target nor
    /// a captured original exists.
    pub fn desired_target(
        spec: &ServiceSpec,
        state: &ServiceRuntimeState,
        probe_succeeded: bool,
    ) -> Option<UpstreamTarget> {
        let applied_scheme = state
            .applied
            .as_ref()
            .map(|t| t.scheme)
            .unwrap_or_default();

        if !probe_succeeded {
            return Some(spec.if_failed.resolve(applied_scheme));
        }

        match (&spec.if_success, &state.original) {
            (Some(explicit), original) => {
                let scheme = original.as_ref().map(|t| t.scheme).unwrap_or(applied_scheme);
                Some(explicit.resolve(scheme))
            }
            (None, Some(original)) => Some(original.clone()),
            (None, None) => None,
        }
    }
}
