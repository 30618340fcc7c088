use std::sync::Arc;

use dp_config::{DeploymentConfiguration, PackageDescription};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::arcology::{Arcology, InstanceCreationDetails, InstanceDescription};
use crate::certs::{CertificateDescriptionWithClearPfx, CertificateStore};
use crate::store::StateStore;
use crate::{Error, Result};

/// Ledger of machines per environment.
///
/// Every operation holds one mutex across load, mutate and save, so calls
/// through the same tracker are linearizable. Nothing coordinates separate
/// processes sharing a backend; they can race.
pub struct InfrastructureTracker {
    store: Arc<dyn StateStore>,
    certificates: Arc<dyn CertificateStore>,
    lock: Mutex<()>,
}

impl InfrastructureTracker {
    pub fn new(store: Arc<dyn StateStore>, certificates: Arc<dyn CertificateStore>) -> Self {
        Self {
            store,
            certificates,
            lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn certificates(&self) -> &Arc<dyn CertificateStore> {
        &self.certificates
    }

    async fn mutate<T>(
        &self,
        environment: &str,
        f: impl FnOnce(&mut Arcology) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.lock.lock().await;
        let mut arcology = self.store.load(environment).await?;
        let out = f(&mut arcology)?;
        self.store.save(&arcology).await?;
        Ok(out)
    }

    async fn read<T>(&self, environment: &str, f: impl FnOnce(&Arcology) -> T) -> Result<T> {
        let _guard = self.lock.lock().await;
        let arcology = self.store.load(environment).await?;
        Ok(f(&arcology))
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Reserve a private IP and creation details for a new machine.
    pub async fn get_new_instance_creation_details(
        &self,
        environment: &str,
        config: &DeploymentConfiguration,
        intended_packages: &[PackageDescription],
    ) -> Result<InstanceCreationDetails> {
        let details = self
            .mutate(environment, |arcology| {
                arcology.reserve_instance(config, intended_packages)
            })
            .await?;
        info!(
            environment,
            private_ip = %details.private_ip_address,
            container = %details.container_details.container_id,
            "tracker: instance reserved"
        );
        Ok(details)
    }

    pub async fn process_instance_creation(
        &self,
        environment: &str,
        description: InstanceDescription,
    ) -> Result<()> {
        let private_ip = description.private_ip_address.clone();
        let system_id = description.id.clone().unwrap_or_default();
        self.mutate(environment, |arcology| arcology.confirm_instance(description))
            .await?;
        info!(environment, private_ip = %private_ip, system_id = %system_id, "tracker: instance confirmed");
        Ok(())
    }

    pub async fn process_deployed_package(
        &self,
        environment: &str,
        system_id: &str,
        package: &PackageDescription,
    ) -> Result<()> {
        self.mutate(environment, |arcology| {
            arcology.record_deployed_package(system_id, package)
        })
        .await?;
        info!(environment, system_id, package = %package.id, "tracker: package deployed");
        Ok(())
    }

    /// Removing an untracked instance is a no-op.
    pub async fn process_instance_termination(
        &self,
        environment: &str,
        system_id: &str,
    ) -> Result<()> {
        let removed = self
            .mutate(environment, |arcology| Ok(arcology.remove_instance(system_id)))
            .await?;
        if removed {
            info!(environment, system_id, "tracker: instance terminated");
        } else {
            warn!(environment, system_id, "tracker: terminated instance was not tracked");
        }
        Ok(())
    }

    // ── Lookups ─────────────────────────────────────────────────────

    pub async fn get_instances_by_deployed_packages(
        &self,
        environment: &str,
        packages: &[PackageDescription],
    ) -> Result<Vec<InstanceDescription>> {
        self.read(environment, |arcology| {
            arcology.instances_by_deployed_packages(packages)
        })
        .await
    }

    pub async fn get_instance_description_by_id(
        &self,
        environment: &str,
        system_id: &str,
    ) -> Result<Option<InstanceDescription>> {
        self.read(environment, |arcology| {
            arcology
                .instance_by_id(system_id)
                .map(|i| i.instance_description.clone())
        })
        .await
    }

    pub async fn get_instance_id_by_name(
        &self,
        environment: &str,
        name: &str,
    ) -> Result<Option<String>> {
        self.read(environment, |arcology| arcology.instance_id_by_name(name))
            .await
    }

    pub async fn get_private_key_of_instance_by_id(
        &self,
        environment: &str,
        system_id: &str,
    ) -> Result<Option<String>> {
        self.read(environment, |arcology| {
            arcology.private_key_of_instance_by_id(system_id)
        })
        .await?
    }

    pub async fn get_domain_zone_id(&self, environment: &str, domain: &str) -> Result<String> {
        self.read(environment, |arcology| arcology.domain_zone_id(domain))
            .await?
    }

    pub async fn get_instance_private_dns_root_domain(
        &self,
        environment: &str,
    ) -> Result<Option<String>> {
        self.read(environment, |arcology| {
            arcology.info.instance_private_dns_root_domain.clone()
        })
        .await
    }

    pub async fn get_certificate_by_name(
        &self,
        name: &str,
    ) -> Result<CertificateDescriptionWithClearPfx> {
        let _guard = self.lock.lock().await;
        self.certificates
            .get_certificate_by_name(name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("no certificate named {name}")))
    }
}
