use tracing::{info, warn};

use crate::certs::CertificateStore;
use crate::store::{StateStore, already_exists};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub instances: usize,
    pub containers: usize,
    pub certificates: usize,
}

/// Copy an environment's arcology and every certificate from one backend to
/// another, re-encrypting certificates under the containers' shared key.
///
/// Everything is read and checked before the first write. Certificates are
/// copied before the arcology, so an interrupted migration leaves no
/// arcology at `destination` and can simply be run again.
pub async fn migrate_arcology(
    environment: &str,
    source: &dyn StateStore,
    source_certificates: &dyn CertificateStore,
    destination: &dyn StateStore,
    destination_certificates: &dyn CertificateStore,
) -> Result<MigrationReport> {
    let arcology = source.load(environment).await?;
    arcology.check_container_references()?;

    let locators = arcology.encrypting_certificate_locators();
    let [locator] = locators.as_slice() else {
        return Err(Error::UnsupportedConfiguration(format!(
            "Different encrypting certificates for different containers is not supported \
             ({} distinct found in {environment}).",
            locators.len()
        )));
    };
    let locator = (*locator).clone();

    match destination.load(environment).await {
        Ok(_) => return Err(already_exists(environment)),
        Err(Error::NotFound(_)) => {}
        Err(e) => return Err(e),
    }

    let names = source_certificates.get_all_certificate_names().await?;
    let mut certificates = Vec::with_capacity(names.len());
    for name in &names {
        let certificate = source_certificates
            .get_certificate_by_name(name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("certificate {name} vanished during migration")))?;
        certificates.push(certificate);
    }

    for (copied, certificate) in certificates.iter().enumerate() {
        if let Err(e) = destination_certificates
            .persist_certificate(certificate, &locator)
            .await
        {
            warn!(
                environment,
                error = %e,
                not_copied = ?&names[copied..],
                "migrate: certificate copy failed, arcology not created"
            );
            return Err(e);
        }
    }
    info!(environment, certificates = names.len(), "migrate: certificates copied");

    destination.create(&arcology).await?;
    info!(
        environment,
        from = %source.kind(),
        to = %destination.kind(),
        instances = arcology.instances.len(),
        "migrate: arcology copied"
    );

    Ok(MigrationReport {
        instances: arcology.instances.len(),
        containers: arcology.info.computing_containers.len(),
        certificates: names.len(),
    })
}
