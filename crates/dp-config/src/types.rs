use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::package::PackageDescription;

/// Network reachability a deployment asks for.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum InstanceAccessibility {
    #[default]
    DoesNotMatter,
    Private,
    Public,
}

impl InstanceAccessibility {
    pub fn is_explicit(&self) -> bool {
        !matches!(self, Self::DoesNotMatter)
    }

    /// Private unless something explicitly asked for public.
    pub fn resolved(&self) -> Self {
        match self {
            Self::DoesNotMatter => Self::Private,
            other => *other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DoesNotMatter => "DoesNotMatter",
            Self::Private => "Private",
            Self::Public => "Public",
        }
    }
}

impl fmt::Display for InstanceAccessibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operating-system / database edition tier.
///
/// Ordering of the variants is declaration order; use [`WindowsSku::rank`]
/// when merging, which treats `SpecificImageSupplied` as an outright winner.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum WindowsSku {
    #[default]
    DoesNotMatter,
    Core,
    Base,
    SqlWeb,
    SqlStandard,
    SqlEnterprise,
    SpecificImageSupplied,
}

impl WindowsSku {
    pub fn rank(&self) -> u8 {
        match self {
            Self::DoesNotMatter => 0,
            Self::Core => 1,
            Self::Base => 2,
            Self::SqlWeb => 3,
            Self::SqlStandard => 4,
            Self::SqlEnterprise => 5,
            Self::SpecificImageSupplied => u8::MAX,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DoesNotMatter => "DoesNotMatter",
            Self::Core => "Core",
            Self::Base => "Base",
            Self::SqlWeb => "SqlWeb",
            Self::SqlStandard => "SqlStandard",
            Self::SqlEnterprise => "SqlEnterprise",
            Self::SpecificImageSupplied => "SpecificImageSupplied",
        }
    }
}

impl fmt::Display for WindowsSku {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WindowsSku {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s {
            "DoesNotMatter" => Ok(Self::DoesNotMatter),
            "Core" => Ok(Self::Core),
            "Base" => Ok(Self::Base),
            "SqlWeb" => Ok(Self::SqlWeb),
            "SqlStandard" => Ok(Self::SqlStandard),
            "SqlEnterprise" => Ok(Self::SqlEnterprise),
            "SpecificImageSupplied" => Ok(Self::SpecificImageSupplied),
            other => Err(format!("unknown windows sku: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolumeType {
    #[default]
    DoesNotMatter,
    LowPerformance,
    Standard,
    HighPerformance,
}

impl VolumeType {
    pub fn resolved(&self) -> Self {
        match self {
            Self::DoesNotMatter => Self::Standard,
            other => *other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub drive_letter: String,
    pub size_in_gb: u32,
    #[serde(default)]
    pub volume_type: VolumeType,
}

impl Volume {
    pub fn new(drive_letter: impl Into<String>, size_in_gb: u32) -> Self {
        Self {
            drive_letter: drive_letter.into(),
            size_in_gb,
            volume_type: VolumeType::DoesNotMatter,
        }
    }

    pub fn same_drive(&self, other: &Volume) -> bool {
        self.drive_letter.eq_ignore_ascii_case(&other.drive_letter)
    }
}

/// Machine sizing. Every field is optional so fragments can state only what
/// they care about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceType {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_cores: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ram_in_gb: Option<f64>,
    #[serde(default)]
    pub windows_sku: WindowsSku,
    /// Image id, only meaningful with [`WindowsSku::SpecificImageSupplied`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specific_image_system_id: Option<String>,
    /// Provider instance-type id that bypasses core/RAM based selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specific_instance_type_system_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStrategy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_instance_initialization_script: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_setup_steps: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostDeploymentStrategy {
    pub turn_off_instance: bool,
}

/// What a machine needs. Unset means: empty collections, `None`,
/// `DoesNotMatter`, and an instance count of zero or less.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<InstanceType>,
    #[serde(default)]
    pub instance_accessibility: InstanceAccessibility,
    #[serde(default)]
    pub instance_count: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chocolatey_packages: Vec<PackageDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_strategy: Option<DeploymentStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_deployment_strategy: Option<PostDeploymentStrategy>,
}

impl DeploymentConfiguration {
    pub fn windows_sku(&self) -> WindowsSku {
        self.instance_type
            .as_ref()
            .map(|t| t.windows_sku)
            .unwrap_or_default()
    }
}
