//! Feature readiness bookkeeping.
//!
//! A feature is introspected once every feature it depends on is satisfied,
//! and completes as missing when a dependency or a required interface is
//! unavailable. Each `become_ready` request finishes once all of its features
//! (and their dependencies) have completed one way or the other.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use tracing::{debug, warn};

use crate::{error::TpError, protocol::OpId};

/// Status used by proxies that do not track a status of their own.
pub const DEFAULT_STATUS: u32 = 0;

/// Named unit of optional functionality on a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Feature {
    class: &'static str,
    id: u32,
    critical: bool,
}

impl Feature {
    pub const fn new(class: &'static str, id: u32, critical: bool) -> Self {
        Self {
            class,
            id,
            critical,
        }
    }

    pub fn class(&self) -> &'static str {
        self.class
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Critical features only count as ready when satisfied; others also when missing.
    pub fn is_critical(&self) -> bool {
        self.critical
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.class, self.id)
    }
}

/// Registration data for one feature. `step` is handed back when the feature must start.
#[derive(Debug, Clone)]
pub struct Introspectable<T> {
    pub makes_sense_for_statuses: BTreeSet<u32>,
    pub depends_on_features: BTreeSet<Feature>,
    pub depends_on_interfaces: BTreeSet<String>,
    pub step: T,
}

impl<T> Introspectable<T> {
    /// Introspectable valid for [`DEFAULT_STATUS`] only.
    pub fn new(step: T) -> Self {
        Self {
            makes_sense_for_statuses: BTreeSet::from([DEFAULT_STATUS]),
            depends_on_features: BTreeSet::new(),
            depends_on_interfaces: BTreeSet::new(),
            step,
        }
    }

    pub fn depends_on_feature(mut self, feature: Feature) -> Self {
        self.depends_on_features.insert(feature);
        self
    }

    pub fn depends_on_interface(mut self, interface: impl Into<String>) -> Self {
        self.depends_on_interfaces.insert(interface.into());
        self
    }
}

#[derive(Debug, Clone)]
struct PendingReady {
    op: OpId,
    features: BTreeSet<Feature>,
}

#[derive(Debug, Clone)]
pub struct ReadinessTracker<T> {
    current_status: u32,
    pending_status: Option<u32>,
    interfaces: BTreeSet<String>,
    introspectables: BTreeMap<Feature, Introspectable<T>>,
    requested: BTreeSet<Feature>,
    pending: BTreeSet<Feature>,
    in_flight: BTreeSet<Feature>,
    satisfied: BTreeSet<Feature>,
    missing: BTreeMap<Feature, TpError>,
    pending_ops: Vec<PendingReady>,
    finished: Vec<(OpId, Result<(), TpError>)>,
    invalidation: Option<TpError>,
}

impl<T> Default for ReadinessTracker<T> {
    fn default() -> Self {
        Self {
            current_status: DEFAULT_STATUS,
            pending_status: None,
            interfaces: BTreeSet::new(),
            introspectables: BTreeMap::new(),
            requested: BTreeSet::new(),
            pending: BTreeSet::new(),
            in_flight: BTreeSet::new(),
            satisfied: BTreeSet::new(),
            missing: BTreeMap::new(),
            pending_ops: Vec::new(),
            finished: Vec::new(),
            invalidation: None,
        }
    }
}

impl<T: Clone> ReadinessTracker<T> {
    pub fn add_feature(&mut self, feature: Feature, introspectable: Introspectable<T>) {
        if self.introspectables.insert(feature, introspectable).is_some() {
            warn!(%feature, "feature registered twice, keeping the latest registration");
        }
    }

    pub fn supports(&self, feature: &Feature) -> bool {
        self.introspectables.contains_key(feature)
    }

    pub fn current_status(&self) -> u32 {
        self.current_status
    }

    pub fn interfaces(&self) -> &BTreeSet<String> {
        &self.interfaces
    }

    pub fn set_interfaces<I, S>(&mut self, interfaces: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interfaces = interfaces.into_iter().map(Into::into).collect();
    }

    pub fn requested_features(&self) -> &BTreeSet<Feature> {
        &self.requested
    }

    pub fn satisfied_features(&self) -> &BTreeSet<Feature> {
        &self.satisfied
    }

    pub fn missing_features(&self) -> impl Iterator<Item = &Feature> {
        self.missing.keys()
    }

    pub fn is_in_flight(&self, feature: &Feature) -> bool {
        self.in_flight.contains(feature)
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidation.is_some()
    }

    pub fn is_ready(&self, feature: &Feature) -> bool {
        self.check_ready(std::iter::once(feature)).is_ok()
    }

    /// `Ok` when every feature is ready, else the first reason one is not.
    pub fn check_ready<'a, I>(&self, features: I) -> Result<(), TpError>
    where
        I: IntoIterator<Item = &'a Feature>,
    {
        if let Some(err) = &self.invalidation {
            return Err(err.clone());
        }
        for feature in features {
            if self.satisfied.contains(feature) {
                continue;
            }
            match self.missing.get(feature) {
                Some(_) if !feature.is_critical() => continue,
                Some(err) => return Err(err.clone()),
                None => {
                    return Err(TpError::not_available(format!(
                        "Feature {feature} is not ready yet"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Record a request for `features`; completion is reported through [`take_finished`].
    ///
    /// [`take_finished`]: Self::take_finished
    pub fn become_ready(&mut self, op: OpId, features: &[Feature]) {
        if let Some(err) = &self.invalidation {
            self.finished.push((op, Err(err.clone())));
            return;
        }
        if let Some(unsupported) = features.iter().find(|f| !self.supports(f)) {
            warn!(feature = %unsupported, "requested unsupported feature");
            self.finished.push((
                op,
                Err(TpError::invalid_argument(
                    "Requested features contains unsupported feature",
                )),
            ));
            return;
        }

        let with_deps = self.with_dependencies(features);
        for feature in &with_deps {
            if self.requested.insert(*feature) {
                debug!(%feature, "feature requested");
            }
            if !self.satisfied.contains(feature) && !self.missing.contains_key(feature) {
                self.pending.insert(*feature);
            }
        }
        self.pending_ops.push(PendingReady {
            op,
            features: features.iter().copied().collect(),
        });
    }

    /// Mark `feature` as completed and whether it succeeded.
    pub fn set_introspect_completed(&mut self, feature: Feature, result: Result<(), TpError>) {
        if self.invalidation.is_some() {
            return;
        }
        if !self.in_flight.remove(&feature) && !self.pending.contains(&feature) {
            warn!(%feature, "completion reported for a feature that is not being introspected");
            return;
        }

        if let Some(status) = self.pending_status {
            if self.in_flight.is_empty() {
                self.apply_status(status);
            }
            return;
        }

        self.pending.remove(&feature);
        match result {
            Ok(()) => {
                debug!(%feature, "feature satisfied");
                self.satisfied.insert(feature);
            }
            Err(err) => {
                debug!(%feature, error = %err, "feature missing");
                self.missing.insert(feature, err);
            }
        }
    }

    /// Switch to a new status, re-arming every requested feature.
    pub fn set_current_status(&mut self, status: u32) {
        if self.current_status == status && self.pending_status.is_none() {
            return;
        }
        if self.in_flight.is_empty() {
            self.apply_status(status);
        } else {
            self.pending_status = Some(status);
        }
    }

    /// Advance introspection; returns the steps of features that must start now.
    pub fn iterate(&mut self) -> Vec<T> {
        let mut started = Vec::new();
        if self.invalidation.is_some() || self.pending_status.is_some() {
            return started;
        }

        loop {
            self.propagate_missing_dependencies();
            self.finish_completed_ops();
            if self.requested.iter().all(|f| self.is_completed(f)) {
                return started;
            }

            self.pending
                .retain(|f| !self.satisfied.contains(f) && !self.missing.contains_key(f));

            let ready_to_start: Vec<Feature> = self
                .pending
                .iter()
                .filter(|f| !self.in_flight.contains(*f))
                .filter(|f| self.dependencies_satisfied(f))
                .copied()
                .collect();

            let mut completed_inline = false;
            for feature in ready_to_start {
                let Some(introspectable) = self.introspectables.get(&feature) else {
                    continue;
                };
                if !introspectable
                    .makes_sense_for_statuses
                    .contains(&self.current_status)
                {
                    self.pending.remove(&feature);
                    self.satisfied.insert(feature);
                    completed_inline = true;
                    continue;
                }
                if let Some(interface) = introspectable
                    .depends_on_interfaces
                    .iter()
                    .find(|iface| !self.interfaces.contains(*iface))
                {
                    debug!(%feature, %interface, "feature depends on an absent interface");
                    self.pending.remove(&feature);
                    self.missing.insert(
                        feature,
                        TpError::not_available(
                            "Feature depend on interfaces that are not available",
                        ),
                    );
                    completed_inline = true;
                    continue;
                }

                self.in_flight.insert(feature);
                started.push(introspectable.step.clone());
            }

            if !completed_inline {
                return started;
            }
        }
    }

    /// Operations that finished since the last call.
    pub fn take_finished(&mut self) -> Vec<(OpId, Result<(), TpError>)> {
        std::mem::take(&mut self.finished)
    }

    /// The object became permanently unusable.
    pub fn invalidate(&mut self, error: TpError) {
        if self.invalidation.is_some() {
            return;
        }
        self.satisfied.clear();
        self.missing.clear();
        self.pending.clear();
        self.in_flight.clear();
        for pending in self.pending_ops.drain(..) {
            self.finished.push((pending.op, Err(error.clone())));
        }
        self.invalidation = Some(error);
    }

    fn apply_status(&mut self, status: u32) {
        debug!(from = self.current_status, to = status, "readiness status changed");
        self.current_status = status;
        self.pending_status = None;
        self.satisfied.clear();
        self.missing.clear();
        self.pending = self.requested.clone();
    }

    fn is_completed(&self, feature: &Feature) -> bool {
        self.satisfied.contains(feature) || self.missing.contains_key(feature)
    }

    fn dependencies_satisfied(&self, feature: &Feature) -> bool {
        self.introspectables.get(feature).is_some_and(|i| {
            i.depends_on_features
                .iter()
                .all(|dep| self.satisfied.contains(dep))
        })
    }

    fn propagate_missing_dependencies(&mut self) {
        loop {
            let newly_missing: Vec<Feature> = self
                .pending
                .iter()
                .filter(|f| !self.missing.contains_key(*f))
                .filter(|f| {
                    self.introspectables.get(*f).is_some_and(|i| {
                        i.depends_on_features
                            .iter()
                            .any(|dep| self.missing.contains_key(dep))
                    })
                })
                .copied()
                .collect();
            if newly_missing.is_empty() {
                return;
            }
            for feature in newly_missing {
                self.in_flight.remove(&feature);
                self.missing.insert(
                    feature,
                    TpError::not_available(
                        "Feature depends on other features that are not available",
                    ),
                );
            }
        }
    }

    fn finish_completed_ops(&mut self) {
        let mut still_pending = Vec::with_capacity(self.pending_ops.len());
        for pending in std::mem::take(&mut self.pending_ops) {
            if pending.features.iter().all(|f| self.is_completed(f)) {
                let result = self.check_ready(pending.features.iter());
                self.finished.push((pending.op, result));
            } else {
                still_pending.push(pending);
            }
        }
        self.pending_ops = still_pending;
    }

    fn with_dependencies(&self, features: &[Feature]) -> BTreeSet<Feature> {
        let mut out = BTreeSet::new();
        let mut stack: Vec<Feature> = features.to_vec();
        while let Some(feature) = stack.pop() {
            if !out.insert(feature) {
                continue;
            }
            if let Some(introspectable) = self.introspectables.get(&feature) {
                stack.extend(introspectable.depends_on_features.iter().copied());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, names};

    const CORE: Feature = Feature::new("Test", 0, true);
    const EXTRA: Feature = Feature::new("Test", 1, true);
    const OPTIONAL: Feature = Feature::new("Test", 2, false);
    const UNREGISTERED: Feature = Feature::new("Test", 9, true);

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Step {
        Core,
        Extra,
        Optional,
    }

    fn tracker() -> ReadinessTracker<Step> {
        let mut tracker = ReadinessTracker::default();
        tracker.add_feature(CORE, Introspectable::new(Step::Core));
        tracker.add_feature(
            EXTRA,
            Introspectable::new(Step::Extra)
                .depends_on_feature(CORE)
                .depends_on_interface("com.example.Extra"),
        );
        tracker.add_feature(
            OPTIONAL,
            Introspectable::new(Step::Optional).depends_on_feature(CORE),
        );
        tracker
    }

    #[test]
    fn dependencies_are_introspected_first() {
        let mut tracker = tracker();
        tracker.become_ready(OpId(1), &[EXTRA]);

        assert_eq!(tracker.iterate(), vec![Step::Core]);
        assert!(tracker.iterate().is_empty(), "core is already in flight");

        tracker.set_interfaces(["com.example.Extra"]);
        tracker.set_introspect_completed(CORE, Ok(()));
        assert_eq!(tracker.iterate(), vec![Step::Extra]);
        assert!(tracker.take_finished().is_empty());

        tracker.set_introspect_completed(EXTRA, Ok(()));
        assert!(tracker.iterate().is_empty());
        assert_eq!(tracker.take_finished(), vec![(OpId(1), Ok(()))]);
        assert!(tracker.is_ready(&EXTRA));
    }

    #[test]
    fn missing_interface_fails_the_dependent_feature() {
        let mut tracker = tracker();
        tracker.become_ready(OpId(1), &[EXTRA]);
        tracker.iterate();
        tracker.set_introspect_completed(CORE, Ok(()));
        assert!(tracker.iterate().is_empty());

        let finished = tracker.take_finished();
        assert_eq!(finished.len(), 1);
        let err = finished[0].1.clone().expect_err("extra must be missing");
        assert_eq!(err.name, names::NOT_AVAILABLE);
        assert_eq!(
            err.message,
            "Feature depend on interfaces that are not available"
        );
        assert!(tracker.is_ready(&CORE));
        assert!(!tracker.is_ready(&EXTRA));
    }

    #[test]
    fn failed_dependency_marks_dependents_missing() {
        let mut tracker = tracker();
        tracker.become_ready(OpId(7), &[CORE, OPTIONAL]);
        tracker.iterate();
        tracker.set_introspect_completed(CORE, Err(TpError::remote("com.example.Boom", "boom")));
        assert!(tracker.iterate().is_empty());

        let finished = tracker.take_finished();
        let err = finished[0].1.clone().expect_err("core is critical");
        assert_eq!(err.name, "com.example.Boom");
        assert!(tracker.missing_features().any(|f| *f == OPTIONAL));
    }

    #[test]
    fn non_critical_features_count_as_ready_when_missing() {
        let mut tracker = tracker();
        tracker.become_ready(OpId(1), &[OPTIONAL]);
        tracker.iterate();
        tracker.set_introspect_completed(CORE, Ok(()));
        assert_eq!(tracker.iterate(), vec![Step::Optional]);
        tracker.set_introspect_completed(OPTIONAL, Err(TpError::not_available("nope")));
        tracker.iterate();
        assert_eq!(tracker.take_finished(), vec![(OpId(1), Ok(()))]);
        assert!(tracker.is_ready(&OPTIONAL));
    }

    #[test]
    fn unsupported_feature_is_rejected() {
        let mut tracker = tracker();
        tracker.become_ready(OpId(3), &[UNREGISTERED]);
        let finished = tracker.take_finished();
        let err = finished[0].1.clone().expect_err("must be rejected");
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn already_ready_features_finish_on_next_iteration() {
        let mut tracker = tracker();
        tracker.become_ready(OpId(1), &[CORE]);
        tracker.iterate();
        tracker.set_introspect_completed(CORE, Ok(()));
        tracker.iterate();
        tracker.take_finished();

        tracker.become_ready(OpId(2), &[CORE]);
        assert!(tracker.iterate().is_empty());
        assert_eq!(tracker.take_finished(), vec![(OpId(2), Ok(()))]);
    }

    #[test]
    fn invalidation_fails_pending_requests_and_later_ones() {
        let mut tracker = tracker();
        tracker.become_ready(OpId(1), &[CORE]);
        tracker.iterate();

        let error = TpError::remote(names::ORPHANED, "gone");
        tracker.invalidate(error.clone());
        assert_eq!(tracker.take_finished(), vec![(OpId(1), Err(error.clone()))]);

        tracker.become_ready(OpId(2), &[CORE]);
        assert_eq!(tracker.take_finished(), vec![(OpId(2), Err(error))]);
        assert!(!tracker.is_ready(&CORE));
    }

    #[test]
    fn features_irrelevant_to_the_status_are_satisfied_without_work() {
        let mut tracker: ReadinessTracker<Step> = ReadinessTracker::default();
        let mut only_online = Introspectable::new(Step::Core);
        only_online.makes_sense_for_statuses = BTreeSet::from([1]);
        tracker.add_feature(CORE, only_online);

        tracker.become_ready(OpId(1), &[CORE]);
        assert!(tracker.iterate().is_empty());
        assert_eq!(tracker.take_finished(), vec![(OpId(1), Ok(()))]);

        tracker.set_current_status(1);
        assert_eq!(tracker.iterate(), vec![Step::Core]);
    }

    #[test]
    fn status_change_waits_for_in_flight_introspection() {
        let mut tracker = tracker();
        tracker.become_ready(OpId(1), &[CORE]);
        assert_eq!(tracker.iterate(), vec![Step::Core]);

        tracker.set_current_status(5);
        assert_eq!(tracker.current_status(), DEFAULT_STATUS);
        assert!(tracker.iterate().is_empty());

        tracker.set_introspect_completed(CORE, Ok(()));
        assert_eq!(tracker.current_status(), 5);
        assert!(!tracker.is_ready(&CORE));
    }
}
