//! # Error Code Classification
//!
//! Maps provider and component error text to [`ErrorCode`]s.
//!
//! Classification is best effort: text that matches no pattern yields no
//! codes, the message itself is always kept by the caller.

use crate::crd::ErrorCode;
use regex::Regex;
use std::sync::LazyLock;

static UNAUTHORIZED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(Unauthorized|InvalidClientTokenId|SignatureDoesNotMatch|Authentication failed|AuthFailure|AuthorizationFailed|invalid character|invalid_grant|invalid_client|Authorization Profile was not found|cannot fetch token|no active subscriptions|InvalidAccessKeyId|InvalidSecretAccessKey|query returned no results)",
    )
    .expect("Failed to compile UNAUTHORIZED regex - this should never happen")
});

static QUOTA_EXCEEDED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(LimitExceeded|Quota|Throttling|Too many requests)")
        .expect("Failed to compile QUOTA_EXCEEDED regex - this should never happen")
});

static INSUFFICIENT_PRIVILEGES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(AccessDenied|Forbidden|deny|denied)")
        .expect("Failed to compile INSUFFICIENT_PRIVILEGES regex - this should never happen")
});

static DEPENDENCIES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(PendingVerification|Access Not Configured|accessNotConfigured|DependencyViolation|OptInRequired|DeleteConflict|Conflict|inactive billing state|ReadOnlyDisabledSubscription|is already being used|InUseSubnetCannotBeDeleted|VnetInUse|InUseRouteTableCannotBeDeleted|timeout while waiting for state to become|InvalidCidrBlock|already busy for|InsufficientFreeAddressesInSubnet|InternalServerError|RetryableError|internal server error|A resource with the ID|VnetAddressSpaceCannotChangeDueToPeerings)",
    )
    .expect("Failed to compile DEPENDENCIES regex - this should never happen")
});

static RESOURCES_DEPLETED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(not available in the current hardware cluster|InsufficientInstanceCapacity|SkuNotAvailable|ZonalAllocationFailed|out of stock)",
    )
    .expect("Failed to compile RESOURCES_DEPLETED regex - this should never happen")
});

static CONFIGURATION_PROBLEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(AzureBastionSubnet|not supported|InvalidParameterValue|InvalidParameterCombination|InvalidVpcID|UnsupportedAvailabilityZone|KubeletHasDiskPressure|KubeletHasInsufficientMemory|KubeletHasInsufficientPID|NetworkUnavailable)",
    )
    .expect("Failed to compile CONFIGURATION_PROBLEM regex - this should never happen")
});

/// Ordered pattern table used for classification
#[derive(Debug, Clone)]
pub struct ErrorCodeClassifier {
    rules: Vec<(ErrorCode, &'static Regex)>,
}

impl Default for ErrorCodeClassifier {
    fn default() -> Self {
        Self {
            rules: vec![
                (ErrorCode::InfraUnauthorized, &*UNAUTHORIZED),
                (ErrorCode::InfraQuotaExceeded, &*QUOTA_EXCEEDED),
                (ErrorCode::InfraInsufficientPrivileges, &*INSUFFICIENT_PRIVILEGES),
                (ErrorCode::InfraDependencies, &*DEPENDENCIES),
                (ErrorCode::InfraResourcesDepleted, &*RESOURCES_DEPLETED),
                (ErrorCode::ConfigurationProblem, &*CONFIGURATION_PROBLEM),
            ],
        }
    }
}

impl ErrorCodeClassifier {
    /// All codes whose pattern matches, in table order, without duplicates
    pub fn classify(&self, text: &str) -> Vec<ErrorCode> {
        if text.is_empty() {
            return Vec::new();
        }
        self.rules
            .iter()
            .filter(|(_, pattern)| pattern.is_match(text))
            .map(|(code, _)| *code)
            .collect()
    }
}

/// Classify error text with the default pattern table
pub fn determine_error_codes(text: &str) -> Vec<ErrorCode> {
    static CLASSIFIER: LazyLock<ErrorCodeClassifier> = LazyLock::new(ErrorCodeClassifier::default);
    CLASSIFIER.classify(text)
}
