//! Trigger adapters: map change notifications to the trial to reconcile.

use crate::meta::{ObjectKey, LABEL_TRIAL};
use crate::store::ChangeEvent;
use crate::trial::Trial;
use crate::workload::Workload;

/// A changed trial reconciles itself.
#[must_use]
pub fn trial_trigger(trial: &Trial) -> Option<ObjectKey> {
    Some(trial.key())
}

/// A changed workload reconciles its owning trial.
///
/// The controller owner reference wins; workloads created by other
/// collaborators fall back to the trial label. Unrelated workloads map to
/// nothing.
#[must_use]
pub fn workload_trigger(workload: &Workload) -> Option<ObjectKey> {
    let namespace = &workload.metadata.namespace;
    if let Some(owner) = workload.metadata.controller_owner("Trial") {
        return Some(ObjectKey::new(namespace.clone(), owner.name.clone()));
    }
    workload
        .metadata
        .label(LABEL_TRIAL)
        .filter(|name| !name.is_empty())
        .map(|name| ObjectKey::new(namespace.clone(), name))
}

/// Map a store notification to a trial key.
#[must_use]
pub fn event_trigger(event: &ChangeEvent) -> Option<ObjectKey> {
    match event {
        ChangeEvent::Trial(key) => Some(key.clone()),
        ChangeEvent::Workload(workload) => workload_trigger(workload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::ObjectMeta;
    use crate::workload::{new_run_workload, WorkloadDefaults, WorkloadSpec, WorkloadStatus};

    fn bare_workload(meta: ObjectMeta) -> Workload {
        Workload {
            metadata: meta,
            spec: WorkloadSpec::default(),
            status: WorkloadStatus::default(),
        }
    }

    #[test]
    fn test_run_workload_maps_to_owner() {
        let trial = Trial::builder("ns", "t1").experiment("exp").build();
        let workload = new_run_workload(&trial, &WorkloadDefaults::default());
        assert_eq!(workload_trigger(&workload), Some(trial.key()));
        assert_eq!(trial_trigger(&trial), Some(trial.key()));
    }

    #[test]
    fn test_setup_workload_maps_by_label() {
        let mut meta = ObjectMeta::new("ns", "t1-create");
        meta.labels.insert(LABEL_TRIAL.to_string(), "t1".to_string());
        assert_eq!(
            workload_trigger(&bare_workload(meta)),
            Some(ObjectKey::new("ns", "t1"))
        );
    }

    #[test]
    fn test_unrelated_workload_maps_to_nothing() {
        let workload = bare_workload(ObjectMeta::new("ns", "batch"));
        assert_eq!(workload_trigger(&workload), None);
        assert_eq!(
            event_trigger(&ChangeEvent::Workload(Box::new(workload))),
            None
        );
    }
}
