//! Merging of conditions into a ClusterResourceOverride status.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

use crate::resources::clusterresourceoverrides::{
    condition_types, reasons, ClusterResourceOverrideCondition, ClusterResourceOverrideStatus,
};
use crate::runtime::Clock;
use crate::Error;

pub const TRUE: &str = "True";
pub const FALSE: &str = "False";

pub fn find<'a>(
    status: &'a ClusterResourceOverrideStatus,
    condition_type: &str,
) -> Option<&'a ClusterResourceOverrideCondition> {
    status
        .conditions
        .iter()
        .find(|condition| condition.r#type == condition_type)
}

/// Conditions are equal when they only differ in their transition time.
pub fn equal(this: &ClusterResourceOverrideCondition, that: &ClusterResourceOverrideCondition) -> bool {
    this.r#type == that.r#type
        && this.status == that.status
        && this.reason == that.reason
        && this.message == that.message
}

/// Condition reporting `err`. Errors outside the install readiness and availability
/// kinds are reported as an internal install readiness failure.
pub fn from_error(err: &Error, time: Time) -> ClusterResourceOverrideCondition {
    let (condition_type, status, reason) = match err {
        Error::InstallReadiness { reason, .. } => {
            (condition_types::INSTALL_READINESS_FAILURE, TRUE, *reason)
        }
        Error::Unavailable { reason, .. } => (condition_types::AVAILABLE, FALSE, *reason),
        _ => (
            condition_types::INSTALL_READINESS_FAILURE,
            TRUE,
            reasons::INTERNAL_ERROR,
        ),
    };
    ClusterResourceOverrideCondition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        reason: Some(reason.to_string()),
        message: Some(err.to_string()),
        last_transition_time: Some(time),
    }
}

pub struct Builder<'a> {
    clock: &'a dyn Clock,
    status: &'a mut ClusterResourceOverrideStatus,
}

impl<'a> Builder<'a> {
    pub fn new(status: &'a mut ClusterResourceOverrideStatus, clock: &'a dyn Clock) -> Self {
        Self { clock, status }
    }

    fn now(&self) -> Time {
        Time(self.clock.now())
    }

    pub fn with_error(&mut self, err: &Error) -> &mut Self {
        let desired = from_error(err, self.now());
        self.with_condition(desired);
        self
    }

    pub fn with_install_ready(&mut self) -> &mut Self {
        let desired = ClusterResourceOverrideCondition {
            r#type: condition_types::INSTALL_READINESS_FAILURE.to_string(),
            status: FALSE.to_string(),
            reason: None,
            message: None,
            last_transition_time: Some(self.now()),
        };
        self.with_condition(desired);
        self
    }

    pub fn with_available(&mut self, status: &str, message: &str) -> &mut Self {
        let desired = ClusterResourceOverrideCondition {
            r#type: condition_types::AVAILABLE.to_string(),
            status: status.to_string(),
            reason: None,
            message: (!message.is_empty()).then(|| message.to_string()),
            last_transition_time: Some(self.now()),
        };
        self.with_condition(desired);
        self
    }

    /// Append `desired`, or overwrite the condition of the same type unless it is already equal.
    pub fn with_condition(&mut self, desired: ClusterResourceOverrideCondition) {
        let Some(current) = self
            .status
            .conditions
            .iter_mut()
            .find(|condition| condition.r#type == desired.r#type)
        else {
            self.status.conditions.push(desired);
            return;
        };

        if equal(current, &desired) {
            return;
        }
        current.reason = desired.reason;
        current.message = desired.message;
        current.status = desired.status;
        current.last_transition_time = desired.last_transition_time;
    }
}
