//! The per-environment ledger of machines and the containers they live in.

use std::collections::{BTreeMap, HashSet};
use std::net::Ipv4Addr;

use dp_config::{
    DeploymentConfiguration, InstanceAccessibility, PackageDescription, WindowsSku,
};
use serde::{Deserialize, Serialize};

use crate::certs::CertificateLocator;
use crate::{Error, Result};

const DEFAULT_DRIVE_TYPE: &str = "gp2";
const IMAGE_OWNER_ALIAS: &str = "amazon";

// ── Instances ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageDeploymentStatus {
    #[default]
    Unknown,
    NotYetDeployed,
    DeployedSuccessfully,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDescriptionWithDeploymentStatus {
    pub package: PackageDescription,
    pub deployment_status: PackageDeploymentStatus,
}

/// What the cloud knows about a machine. `id` stays `None` until the
/// provider confirms creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub environment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computer_name: Option<String>,
    #[serde(default)]
    pub location: String,
    pub private_ip_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_dns: Option<String>,
    #[serde(default)]
    pub deployed_packages: Vec<PackageDescriptionWithDeploymentStatus>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl InstanceDescription {
    pub fn has_package(&self, package: &PackageDescription) -> bool {
        self.deployed_packages
            .iter()
            .any(|p| p.package.same_id(package))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_system_id: Option<String>,
    pub should_have_single_match: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDetails {
    pub container_id: String,
    pub container_location: String,
}

/// Everything reserved for a machine before it exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceCreationDetails {
    pub location: String,
    pub default_drive_type: String,
    pub image_details: ImageDetails,
    pub private_ip_address: String,
    pub key_name: String,
    pub security_group_id: String,
    pub container_details: ContainerDetails,
}

/// One tracked machine across its lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployedInstance {
    pub instance_description: InstanceDescription,
    pub instance_creation_details: InstanceCreationDetails,
    pub deployment_configuration: DeploymentConfiguration,
}

impl DeployedInstance {
    /// Reserved machines have no system id yet.
    pub fn is_reserved(&self) -> bool {
        self.instance_description.id.is_none()
    }

    pub fn has_system_id(&self, system_id: &str) -> bool {
        self.instance_description.id.as_deref() == Some(system_id)
    }
}

// ── Containers ──────────────────────────────────────────────────────

/// A subnet-like grouping; every instance references exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputingContainer {
    pub container_id: String,
    pub container_location: String,
    pub instance_accessibility: InstanceAccessibility,
    /// IPv4 block instances are addressed from, e.g. `10.31.0.0/24`.
    pub cidr: String,
    /// Host offsets at the start of the block kept back for infrastructure.
    #[serde(default)]
    pub start_ips_after: u32,
    pub key_name: String,
    pub private_key: String,
    pub security_group_id: String,
    pub encrypting_certificate_locator: CertificateLocator,
}

impl ComputingContainer {
    /// Usable host addresses, in order.
    fn host_addresses(&self) -> Result<impl Iterator<Item = Ipv4Addr>> {
        let (addr, prefix) = self.cidr.split_once('/').ok_or_else(|| {
            Error::UnsupportedConfiguration(format!("malformed cidr: {}", self.cidr))
        })?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| {
            Error::UnsupportedConfiguration(format!("malformed cidr: {}", self.cidr))
        })?;
        let prefix: u32 = prefix
            .parse()
            .ok()
            .filter(|p| (1..=30).contains(p))
            .ok_or_else(|| {
                Error::UnsupportedConfiguration(format!("unusable cidr prefix: {}", self.cidr))
            })?;

        let mask = u32::MAX << (32 - prefix);
        let network = u32::from(addr) & mask;
        let broadcast = network | !mask;
        let first = network.saturating_add(1).saturating_add(self.start_ips_after);

        Ok((first..broadcast).map(Ipv4Addr::from))
    }
}

// ── Arcology ────────────────────────────────────────────────────────

/// Environment-wide settings: everything except the instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArcologyInfo {
    pub environment: String,
    pub location: String,
    #[serde(default)]
    pub computing_containers: Vec<ComputingContainer>,
    #[serde(default)]
    pub root_domain_hosting_id_map: BTreeMap<String, String>,
    #[serde(default)]
    pub windows_sku_search_pattern_map: BTreeMap<WindowsSku, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_private_dns_root_domain: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arcology {
    #[serde(flatten)]
    pub info: ArcologyInfo,
    #[serde(default)]
    pub instances: Vec<DeployedInstance>,
}

impl Arcology {
    pub fn new(info: ArcologyInfo) -> Self {
        Self {
            info,
            instances: Vec::new(),
        }
    }

    pub fn environment(&self) -> &str {
        &self.info.environment
    }

    pub fn container(&self, container_id: &str) -> Option<&ComputingContainer> {
        self.info
            .computing_containers
            .iter()
            .find(|c| c.container_id == container_id)
    }

    /// Every instance must point at a container of this arcology.
    pub fn check_container_references(&self) -> Result<()> {
        for instance in &self.instances {
            let container_id = &instance.instance_creation_details.container_details.container_id;
            if self.container(container_id).is_none() {
                return Err(Error::AllocationConsistency(format!(
                    "instance {} references unknown container {container_id}",
                    instance.instance_creation_details.private_ip_address
                )));
            }
        }
        Ok(())
    }

    /// Distinct encrypting locators across all containers.
    pub fn encrypting_certificate_locators(&self) -> Vec<&CertificateLocator> {
        let mut locators: Vec<&CertificateLocator> = Vec::new();
        for container in &self.info.computing_containers {
            let locator = &container.encrypting_certificate_locator;
            if !locators.iter().any(|l| l.same_key(locator)) {
                locators.push(locator);
            }
        }
        locators
    }

    fn container_for(&self, accessibility: InstanceAccessibility) -> Result<&ComputingContainer> {
        let wanted = accessibility.resolved();
        self.info
            .computing_containers
            .iter()
            .find(|c| c.instance_accessibility.resolved() == wanted)
            .ok_or_else(|| {
                Error::UnsupportedConfiguration(format!(
                    "no computing container with accessibility {wanted} in {}",
                    self.info.environment
                ))
            })
    }

    fn ips_in_use(&self) -> HashSet<&str> {
        self.instances
            .iter()
            .flat_map(|i| {
                [
                    i.instance_creation_details.private_ip_address.as_str(),
                    i.instance_description.private_ip_address.as_str(),
                ]
            })
            .collect()
    }

    fn next_private_ip(&self, container: &ComputingContainer) -> Result<String> {
        let in_use = self.ips_in_use();
        container
            .host_addresses()?
            .map(|ip| ip.to_string())
            .find(|ip| !in_use.contains(ip.as_str()))
            .ok_or_else(|| Error::AddressSpaceExhausted(container.cidr.clone()))
    }

    fn image_details(&self, config: &DeploymentConfiguration) -> Result<ImageDetails> {
        let sku = config.windows_sku();
        if sku == WindowsSku::SpecificImageSupplied {
            let image_id = config
                .instance_type
                .as_ref()
                .and_then(|t| t.specific_image_system_id.clone())
                .ok_or_else(|| {
                    Error::UnsupportedConfiguration(
                        "SpecificImageSupplied requires a specific image system id".into(),
                    )
                })?;
            return Ok(ImageDetails {
                owner_alias: None,
                search_pattern: None,
                image_system_id: Some(image_id),
                should_have_single_match: true,
            });
        }

        let sku = if sku == WindowsSku::DoesNotMatter {
            WindowsSku::Base
        } else {
            sku
        };
        let pattern = self
            .info
            .windows_sku_search_pattern_map
            .get(&sku)
            .ok_or_else(|| {
                Error::UnsupportedConfiguration(format!("no image search pattern for sku {sku}"))
            })?;

        Ok(ImageDetails {
            owner_alias: Some(IMAGE_OWNER_ALIAS.into()),
            search_pattern: Some(pattern.clone()),
            image_system_id: None,
            should_have_single_match: false,
        })
    }

    // ── Mutations ───────────────────────────────────────────────────

    /// Reserve a private IP and the rest of the creation details, appending a
    /// reserved instance that records `intended_packages` as not yet deployed.
    pub fn reserve_instance(
        &mut self,
        config: &DeploymentConfiguration,
        intended_packages: &[PackageDescription],
    ) -> Result<InstanceCreationDetails> {
        let container = self.container_for(config.instance_accessibility)?;
        let details = InstanceCreationDetails {
            location: self.info.location.clone(),
            default_drive_type: DEFAULT_DRIVE_TYPE.into(),
            image_details: self.image_details(config)?,
            private_ip_address: self.next_private_ip(container)?,
            key_name: container.key_name.clone(),
            security_group_id: container.security_group_id.clone(),
            container_details: ContainerDetails {
                container_id: container.container_id.clone(),
                container_location: container.container_location.clone(),
            },
        };

        let description = InstanceDescription {
            environment: self.info.environment.clone(),
            location: details.location.clone(),
            private_ip_address: details.private_ip_address.clone(),
            deployed_packages: intended_packages
                .iter()
                .map(|package| PackageDescriptionWithDeploymentStatus {
                    package: package.clone(),
                    deployment_status: PackageDeploymentStatus::NotYetDeployed,
                })
                .collect(),
            ..Default::default()
        };

        self.instances.push(DeployedInstance {
            instance_description: description,
            instance_creation_details: details.clone(),
            deployment_configuration: config.clone(),
        });
        Ok(details)
    }

    /// Reserved → confirmed. Matches on the reserved private IP.
    ///
    /// Package entries already tracked are kept when the incoming
    /// description carries none.
    pub fn confirm_instance(&mut self, description: InstanceDescription) -> Result<()> {
        let instance = self
            .instances
            .iter_mut()
            .find(|i| i.instance_creation_details.private_ip_address == description.private_ip_address)
            .ok_or_else(|| {
                Error::AllocationConsistency(format!(
                    "Expected to find a tracked instance (pre-creation) with private IP: {}",
                    description.private_ip_address
                ))
            })?;

        let mut description = description;
        if description.deployed_packages.is_empty() {
            description.deployed_packages =
                std::mem::take(&mut instance.instance_description.deployed_packages);
        }
        instance.instance_description = description;
        Ok(())
    }

    pub fn record_deployed_package(
        &mut self,
        system_id: &str,
        package: &PackageDescription,
    ) -> Result<()> {
        let instance = self
            .instances
            .iter_mut()
            .find(|i| i.has_system_id(system_id))
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "Expected to find a tracked instance (post-creation) with system ID: {system_id}"
                ))
            })?;

        let packages = &mut instance.instance_description.deployed_packages;
        match packages.iter_mut().find(|p| p.package.same_id(package)) {
            Some(existing) => {
                existing.package = package.clone();
                existing.deployment_status = PackageDeploymentStatus::DeployedSuccessfully;
            }
            None => packages.push(PackageDescriptionWithDeploymentStatus {
                package: package.clone(),
                deployment_status: PackageDeploymentStatus::DeployedSuccessfully,
            }),
        }
        Ok(())
    }

    /// Returns whether anything was removed.
    pub fn remove_instance(&mut self, system_id: &str) -> bool {
        let before = self.instances.len();
        self.instances.retain(|i| !i.has_system_id(system_id));
        self.instances.len() != before
    }

    // ── Lookups ─────────────────────────────────────────────────────

    pub fn instance_by_id(&self, system_id: &str) -> Option<&DeployedInstance> {
        self.instances.iter().find(|i| i.has_system_id(system_id))
    }

    pub fn instances_by_deployed_packages(
        &self,
        packages: &[PackageDescription],
    ) -> Vec<InstanceDescription> {
        self.instances
            .iter()
            .map(|i| &i.instance_description)
            .filter(|d| packages.iter().any(|p| d.has_package(p)))
            .cloned()
            .collect()
    }

    pub fn instance_id_by_name(&self, name: &str) -> Option<String> {
        self.instances
            .iter()
            .map(|i| &i.instance_description)
            .find(|d| d.name.as_deref() == Some(name))
            .and_then(|d| d.id.clone())
    }

    /// `None` for unknown instances; a dangling container reference is an
    /// error.
    pub fn private_key_of_instance_by_id(&self, system_id: &str) -> Result<Option<String>> {
        let Some(instance) = self.instance_by_id(system_id) else {
            return Ok(None);
        };
        let container_id = &instance.instance_creation_details.container_details.container_id;
        let container = self
            .container(container_id)
            .ok_or_else(|| Error::NotFound(format!("Could not find Container: {container_id}")))?;
        Ok(Some(container.private_key.clone()))
    }

    pub fn domain_zone_id(&self, domain: &str) -> Result<String> {
        self.info
            .root_domain_hosting_id_map
            .get(domain)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no hosting zone for domain {domain}")))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use dp_config::InstanceType;

    fn public_config() -> DeploymentConfiguration {
        DeploymentConfiguration {
            instance_accessibility: InstanceAccessibility::Public,
            ..Default::default()
        }
    }

    #[test]
    fn reservation_picks_container_by_accessibility() {
        let mut arcology = arcology("dev");

        let private = arcology
            .reserve_instance(&DeploymentConfiguration::default(), &[])
            .unwrap();
        assert_eq!(private.container_details.container_id, "private-a");
        assert_eq!(private.private_ip_address, "10.0.1.4");
        assert_eq!(private.key_name, "private-a-key");
        assert_eq!(private.default_drive_type, "gp2");
        assert_eq!(
            private.image_details.search_pattern.as_deref(),
            Some("Windows_Server-2019-English-Full-Base-*")
        );

        let public = arcology.reserve_instance(&public_config(), &[]).unwrap();
        assert_eq!(public.container_details.container_id, "public-a");
        assert_eq!(public.private_ip_address, "10.0.2.4");
        assert!(arcology.instances.iter().all(DeployedInstance::is_reserved));
    }

    #[test]
    fn reserved_ips_are_never_handed_out_twice() {
        let mut arcology = arcology("dev");
        let config = DeploymentConfiguration::default();
        let ips: Vec<String> = (0..3)
            .map(|_| arcology.reserve_instance(&config, &[]).unwrap().private_ip_address)
            .collect();
        assert_eq!(ips, ["10.0.1.4", "10.0.1.5", "10.0.1.6"]);
    }

    #[test]
    fn terminated_ip_is_reused() {
        let mut arcology = arcology("dev");
        let config = DeploymentConfiguration::default();
        let first = arcology.reserve_instance(&config, &[]).unwrap();
        arcology
            .confirm_instance(InstanceDescription {
                id: Some("i-1".into()),
                private_ip_address: first.private_ip_address.clone(),
                ..Default::default()
            })
            .unwrap();
        assert!(arcology.remove_instance("i-1"));
        assert!(!arcology.remove_instance("i-1"));

        let again = arcology.reserve_instance(&config, &[]).unwrap();
        assert_eq!(again.private_ip_address, first.private_ip_address);
    }

    #[test]
    fn exhausted_block_is_an_error() {
        let mut arcology = arcology("dev");
        arcology.info.computing_containers[0].cidr = "10.0.1.0/29".into();
        let config = DeploymentConfiguration::default();
        // /29 has hosts .1-.6, three held back.
        for _ in 0..3 {
            arcology.reserve_instance(&config, &[]).unwrap();
        }
        assert!(matches!(
            arcology.reserve_instance(&config, &[]),
            Err(Error::AddressSpaceExhausted(_))
        ));
    }

    #[test]
    fn unusable_prefixes_are_rejected() {
        for cidr in ["10.0.0.0/0", "10.0.1.0/31", "10.0.1.0/33", "10.0.1.0"] {
            let mut arcology = arcology("dev");
            arcology.info.computing_containers[0].cidr = cidr.into();
            assert!(
                matches!(
                    arcology.reserve_instance(&DeploymentConfiguration::default(), &[]),
                    Err(Error::UnsupportedConfiguration(_))
                ),
                "{cidr}"
            );
        }
    }

    #[test]
    fn image_follows_sku() {
        let mut arcology = arcology("dev");
        let sku = |sku: WindowsSku, image: Option<&str>| DeploymentConfiguration {
            instance_type: Some(InstanceType {
                windows_sku: sku,
                specific_image_system_id: image.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        };

        let web = arcology.reserve_instance(&sku(WindowsSku::SqlWeb, None), &[]).unwrap();
        assert!(web.image_details.search_pattern.unwrap().contains("SQL_2017_Web"));

        let specific = arcology
            .reserve_instance(&sku(WindowsSku::SpecificImageSupplied, Some("ami-42")), &[])
            .unwrap();
        assert_eq!(specific.image_details.image_system_id.as_deref(), Some("ami-42"));
        assert!(specific.image_details.should_have_single_match);

        assert!(matches!(
            arcology.reserve_instance(&sku(WindowsSku::SqlEnterprise, None), &[]),
            Err(Error::UnsupportedConfiguration(_))
        ));
        assert!(matches!(
            arcology.reserve_instance(&sku(WindowsSku::SpecificImageSupplied, None), &[]),
            Err(Error::UnsupportedConfiguration(_))
        ));
    }

    #[test]
    fn confirmation_requires_a_reservation() {
        let mut arcology = arcology("dev");
        let err = arcology
            .confirm_instance(InstanceDescription {
                id: Some("i-9".into()),
                private_ip_address: "10.0.1.200".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, Error::AllocationConsistency(msg) if msg.contains("10.0.1.200")));
    }

    #[test]
    fn deployed_packages_move_from_intended_to_deployed() {
        let mut arcology = arcology("dev");
        let web = PackageDescription::new("Shop.Web");
        let details = arcology
            .reserve_instance(&DeploymentConfiguration::default(), std::slice::from_ref(&web))
            .unwrap();
        arcology
            .confirm_instance(InstanceDescription {
                id: Some("i-1".into()),
                name: Some("web-1".into()),
                private_ip_address: details.private_ip_address,
                ..Default::default()
            })
            .unwrap();

        let intended = &arcology.instances[0].instance_description.deployed_packages;
        assert_eq!(intended[0].deployment_status, PackageDeploymentStatus::NotYetDeployed);

        arcology
            .record_deployed_package("i-1", &web.clone().with_version("1.2.0"))
            .unwrap();
        arcology
            .record_deployed_package("i-1", &PackageDescription::new("Shop.Agent"))
            .unwrap();

        let packages = &arcology.instances[0].instance_description.deployed_packages;
        assert_eq!(packages.len(), 2);
        assert!(packages
            .iter()
            .all(|p| p.deployment_status == PackageDeploymentStatus::DeployedSuccessfully));
        assert_eq!(packages[0].package.version.as_deref(), Some("1.2.0"));

        assert_eq!(arcology.instances_by_deployed_packages(&[web]).len(), 1);
        assert_eq!(arcology.instance_id_by_name("web-1").as_deref(), Some("i-1"));
        assert!(matches!(
            arcology.record_deployed_package("i-404", &PackageDescription::new("x")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn private_key_resolves_through_container() {
        let mut arcology = arcology("dev");
        let details = arcology
            .reserve_instance(&DeploymentConfiguration::default(), &[])
            .unwrap();
        arcology
            .confirm_instance(InstanceDescription {
                id: Some("i-1".into()),
                private_ip_address: details.private_ip_address,
                ..Default::default()
            })
            .unwrap();

        assert_eq!(
            arcology.private_key_of_instance_by_id("i-1").unwrap().as_deref(),
            Some("private-a-private-key")
        );
        assert_eq!(arcology.private_key_of_instance_by_id("i-2").unwrap(), None);

        arcology.info.computing_containers.clear();
        assert!(arcology.private_key_of_instance_by_id("i-1").is_err());
        assert!(arcology.check_container_references().is_err());
    }

    #[test]
    fn domain_zone_lookup() {
        let arcology = arcology("dev");
        assert_eq!(arcology.domain_zone_id("example.com").unwrap(), "Z123");
        assert!(matches!(arcology.domain_zone_id("example.org"), Err(Error::NotFound(_))));
    }

    #[test]
    fn json_round_trip_is_lossless() {
        let mut arcology = arcology("dev");
        arcology
            .reserve_instance(&public_config(), &[PackageDescription::new("Shop.Web")])
            .unwrap();
        let json = serde_json::to_string(&arcology).unwrap();
        let back: Arcology = serde_json::from_str(&json).unwrap();
        assert_eq!(back, arcology);
    }
}
