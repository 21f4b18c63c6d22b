use crate::domain::value_objects::InstanceIdentity;
use serde::{Deserialize, Serialize};

/// Durable record of how many launch attempts this incarnation has consumed.
///
/// Written to the coordination store after every failed recovery attempt and
/// deleted after a successful install+launch, so a healthy restart of the
/// whole agent starts from a clean slate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub application: String,
    pub service: String,
    pub instance_id: u32,
    pub container_pid: u32,
    pub attempt_number: u32,
}

impl AttemptRecord {
    pub fn first(identity: &InstanceIdentity) -> Self {
        AttemptRecord {
            application: identity.application.clone(),
            service: identity.service.clone(),
            instance_id: identity.instance_id,
            container_pid: identity.container_pid,
            attempt_number: 1,
        }
    }
}

/// What to do after a failed launch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryDecision {
    Retry,
    Fail,
}

/// Self-healing policy for a service instance.
///
/// `retry_limit` of `-1` means retry forever; a non-negative limit allows
/// retries while the current attempt number is within the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelfHealingPolicy {
    pub enabled: bool,
    pub retry_limit: i64,
}

impl SelfHealingPolicy {
    pub fn decide(&self, attempt_number: u32) -> RecoveryDecision {
        if !self.enabled {
            return RecoveryDecision::Fail;
        }
        if self.retry_limit < 0 {
            return RecoveryDecision::Retry;
        }
        if i64::from(attempt_number) <= self.retry_limit {
            RecoveryDecision::Retry
        } else {
            RecoveryDecision::Fail
        }
    }
}

impl Default for SelfHealingPolicy {
    fn default() -> Self {
        SelfHealingPolicy {
            enabled: true,
            retry_limit: -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_policy_always_fails() {
        let policy = SelfHealingPolicy {
            enabled: false,
            retry_limit: -1,
        };
        assert_eq!(policy.decide(1), RecoveryDecision::Fail);
        assert_eq!(policy.decide(100), RecoveryDecision::Fail);
    }

    #[test]
    fn test_unlimited_retries() {
        let policy = SelfHealingPolicy {
            enabled: true,
            retry_limit: -1,
        };
        assert_eq!(policy.decide(1), RecoveryDecision::Retry);
        assert_eq!(policy.decide(u32::MAX), RecoveryDecision::Retry);
    }

    #[test]
    fn test_bounded_retries_exhaust_at_limit() {
        let policy = SelfHealingPolicy {
            enabled: true,
            retry_limit: 3,
        };
        assert_eq!(policy.decide(1), RecoveryDecision::Retry);
        assert_eq!(policy.decide(3), RecoveryDecision::Retry);
        assert_eq!(policy.decide(4), RecoveryDecision::Fail);
    }

    #[test]
    fn test_zero_limit_allows_no_retry_beyond_first_attempt() {
        let policy = SelfHealingPolicy {
            enabled: true,
            retry_limit: 0,
        };
        assert_eq!(policy.decide(1), RecoveryDecision::Fail);
    }

    #[test]
    fn test_attempt_record_round_trip() {
        let identity = InstanceIdentity::new("app", "svc", 3);
        let record = AttemptRecord::first(&identity);
        assert_eq!(record.attempt_number, 1);
        let json = serde_json::to_string(&record).unwrap();
        let back: AttemptRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
