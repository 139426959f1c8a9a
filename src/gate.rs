//! The compatibility gate decides, before anything touches the cluster,
//! whether a recipe can meaningfully run in the current environment.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    context::Context,
    version::{Version, VersionError},
};

/// Why a case was not run. A skip is not a failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The resource declares a version newer than the stack under test.
    StackIncompatible { resource: Version, stack: Version },
    /// The provider is known not to work with this recipe class.
    ExcludedProvider {
        provider: String,
        class: String,
        reason: String,
    },
    /// The provider/platform pair lacks a capability the class needs.
    MissingCapability {
        provider: String,
        platform_version: String,
        capability: String,
    },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StackIncompatible { resource, stack } => write!(
                f,
                "resource version {resource} is newer than stack version {stack}"
            ),
            Self::ExcludedProvider {
                provider,
                class,
                reason,
            } => write!(f, "provider {provider:?} is excluded for {class}: {reason}"),
            Self::MissingCapability {
                provider,
                platform_version,
                capability,
            } => write!(
                f,
                "provider {provider:?} on platform {platform_version} lacks {capability}"
            ),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProviderExclusion {
    pub provider: String,
    pub reason: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct CapabilityGap {
    pub provider: String,
    /// `MAJOR.MINOR` matches every patch release; a full version matches
    /// exactly.
    pub platform_version: String,
    pub capability: String,
}

/// Skip policy for one class of recipes.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct GatePolicy {
    pub class: String,
    #[serde(default)]
    pub excluded_providers: Vec<ProviderExclusion>,
    #[serde(default)]
    pub capability_gaps: Vec<CapabilityGap>,
}

impl GatePolicy {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn exclude_provider(mut self, provider: impl Into<String>, reason: impl Into<String>) -> Self {
        self.excluded_providers.push(ProviderExclusion {
            provider: provider.into(),
            reason: reason.into(),
        });
        self
    }

    #[must_use]
    pub fn capability_gap(
        mut self,
        provider: impl Into<String>,
        platform_version: impl Into<String>,
        capability: impl Into<String>,
    ) -> Self {
        self.capability_gaps.push(CapabilityGap {
            provider: provider.into(),
            platform_version: platform_version.into(),
            capability: capability.into(),
        });
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Run,
    Skip(SkipReason),
}

impl Decision {
    pub const fn is_skip(&self) -> bool {
        matches!(self, Self::Skip(_))
    }
}

/// Evaluates `policy` for a resource declaring `resource_version`.
///
/// A malformed resource or stack version is an authoring bug and is returned
/// as an error rather than turned into a skip.
pub fn check(
    resource_version: &str,
    policy: &GatePolicy,
    context: &Context,
) -> Result<Decision, VersionError> {
    let resource = Version::parse(resource_version)?;
    let stack = Version::parse(&context.stack_version)?;
    if resource.is_after(&stack) {
        return Ok(Decision::Skip(SkipReason::StackIncompatible { resource, stack }));
    }

    if let Some(exclusion) = policy
        .excluded_providers
        .iter()
        .find(|exclusion| exclusion.provider == context.provider)
    {
        return Ok(Decision::Skip(SkipReason::ExcludedProvider {
            provider: exclusion.provider.clone(),
            class: policy.class.clone(),
            reason: exclusion.reason.clone(),
        }));
    }

    if let Some(gap) = policy.capability_gaps.iter().find(|gap| {
        gap.provider == context.provider
            && platform_matches(&gap.platform_version, &context.kubernetes_version)
    }) {
        return Ok(Decision::Skip(SkipReason::MissingCapability {
            provider: gap.provider.clone(),
            platform_version: context.kubernetes_version.clone(),
            capability: gap.capability.clone(),
        }));
    }

    Ok(Decision::Run)
}

pub fn should_skip(
    resource_version: &str,
    policy: &GatePolicy,
    context: &Context,
) -> Result<bool, VersionError> {
    check(resource_version, policy, context).map(|decision| decision.is_skip())
}

fn platform_matches(listed: &str, actual: &str) -> bool {
    match (Version::parse(listed), Version::parse(actual)) {
        (Ok(listed_version), Ok(actual_version)) if listed.trim().matches('.').count() == 1 => {
            listed_version.major() == actual_version.major()
                && listed_version.minor() == actual_version.minor()
        }
        (Ok(listed_version), Ok(actual_version)) => listed_version.equal(&actual_version),
        _ => listed.trim() == actual.trim(),
    }
}
