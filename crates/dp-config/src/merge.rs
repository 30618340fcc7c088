//! Flatten / apply-defaults / apply-overrides.
//!
//! Planner order: package defaults, package overrides, [`flatten`] across the
//! packages for one machine, environment defaults, environment overrides.

use tracing::debug;

use crate::package::PackageDescription;
use crate::types::{
    DeploymentConfiguration, DeploymentStrategy, InstanceAccessibility, InstanceType, Volume,
    WindowsSku,
};
use crate::{Error, Result};

/// Merge the configurations of every package destined for one machine.
pub fn flatten(configs: &[DeploymentConfiguration]) -> Result<DeploymentConfiguration> {
    let flattened = DeploymentConfiguration {
        instance_type: flatten_instance_type(configs)?,
        instance_accessibility: flatten_accessibility(configs)?,
        instance_count: configs
            .iter()
            .map(|c| c.instance_count)
            .filter(|count| *count > 0)
            .max()
            .unwrap_or(0),
        volumes: flatten_volumes(configs)?,
        chocolatey_packages: {
            let mut packages: Vec<PackageDescription> = Vec::new();
            for package in configs.iter().flat_map(|c| &c.chocolatey_packages) {
                if !packages.iter().any(|p| p.same_id(package)) {
                    packages.push(package.clone());
                }
            }
            packages
        },
        deployment_strategy: flatten_deployment_strategy(configs)?,
        post_deployment_strategy: configs
            .iter()
            .rev()
            .find_map(|c| c.post_deployment_strategy),
    };

    debug!(
        inputs = configs.len(),
        instance_count = flattened.instance_count,
        sku = %flattened.windows_sku(),
        "merge: flattened configurations"
    );
    Ok(flattened)
}

fn flatten_accessibility(configs: &[DeploymentConfiguration]) -> Result<InstanceAccessibility> {
    let mut stated = InstanceAccessibility::DoesNotMatter;
    for accessibility in configs.iter().map(|c| c.instance_accessibility) {
        if !accessibility.is_explicit() {
            continue;
        }
        if stated.is_explicit() && stated != accessibility {
            return Err(Error::Conflict(
                "Cannot deploy packages with differing requirements of accessibility.".into(),
            ));
        }
        stated = accessibility;
    }
    Ok(stated)
}

fn flatten_instance_type(configs: &[DeploymentConfiguration]) -> Result<Option<InstanceType>> {
    let types: Vec<&InstanceType> = configs.iter().filter_map(|c| c.instance_type.as_ref()).collect();
    if types.is_empty() {
        return Ok(None);
    }

    let virtual_cores = types.iter().filter_map(|t| t.virtual_cores).max();
    let ram_in_gb = types
        .iter()
        .filter_map(|t| t.ram_in_gb)
        .fold(None, |max: Option<f64>, ram| Some(max.map_or(ram, |m| m.max(ram))));
    let windows_sku = types
        .iter()
        .map(|t| t.windows_sku)
        .max_by_key(|sku| sku.rank())
        .unwrap_or_default();

    let specific_image_system_id = agreed(
        types.iter().filter_map(|t| t.specific_image_system_id.clone()),
        "Cannot have competing specific image ids.",
    )?;
    let specific_instance_type_system_id = agreed(
        types
            .iter()
            .filter_map(|t| t.specific_instance_type_system_id.clone()),
        "Cannot have competing specific instance types.",
    )?;

    Ok(Some(InstanceType {
        virtual_cores,
        ram_in_gb,
        windows_sku,
        specific_image_system_id,
        specific_instance_type_system_id,
    }))
}

fn flatten_volumes(configs: &[DeploymentConfiguration]) -> Result<Vec<Volume>> {
    for config in configs {
        for (i, volume) in config.volumes.iter().enumerate() {
            if config.volumes[..i].iter().any(|v| v.same_drive(volume)) {
                return Err(Error::Conflict(
                    "Can't have two volumes with the same drive letter.".into(),
                ));
            }
        }
    }

    let mut merged: Vec<Volume> = Vec::new();
    for volume in configs.iter().flat_map(|c| &c.volumes) {
        let volume_type = volume.volume_type.resolved();
        match merged.iter_mut().find(|v| v.same_drive(volume)) {
            Some(existing) => {
                if existing.volume_type != volume_type {
                    return Err(Error::Conflict(format!(
                        "Cannot have competing volume types for drive {}.",
                        existing.drive_letter
                    )));
                }
                existing.size_in_gb = existing.size_in_gb.max(volume.size_in_gb);
            }
            None => merged.push(Volume {
                volume_type,
                ..volume.clone()
            }),
        }
    }
    Ok(merged)
}

fn flatten_deployment_strategy(
    configs: &[DeploymentConfiguration],
) -> Result<Option<DeploymentStrategy>> {
    let strategies: Vec<DeploymentStrategy> =
        configs.iter().filter_map(|c| c.deployment_strategy).collect();
    if strategies.is_empty() {
        return Ok(None);
    }

    let include_instance_initialization_script = agreed(
        strategies
            .iter()
            .filter_map(|s| s.include_instance_initialization_script),
        "Cannot have competing IncludeInstanceInitializationScript values.",
    )?;
    let run_setup_steps = agreed(
        strategies.iter().filter_map(|s| s.run_setup_steps),
        "Cannot have competing RunSetupSteps values.",
    )?;

    Ok(Some(DeploymentStrategy {
        include_instance_initialization_script,
        run_setup_steps,
    }))
}

/// The one value every input that states something agrees on.
fn agreed<T: PartialEq>(values: impl Iterator<Item = T>, conflict: &str) -> Result<Option<T>> {
    let mut found: Option<T> = None;
    for value in values {
        match &found {
            Some(existing) if *existing != value => return Err(Error::Conflict(conflict.into())),
            Some(_) => {}
            None => found = Some(value),
        }
    }
    Ok(found)
}

impl DeploymentConfiguration {
    /// Fill every unset field of `self` from `defaults`.
    ///
    /// The result always has a positive instance count, a concrete
    /// accessibility and concrete volume types.
    pub fn apply_defaults(&self, defaults: &DeploymentConfiguration) -> DeploymentConfiguration {
        let instance_type = match (&self.instance_type, &defaults.instance_type) {
            (Some(base), Some(fallback)) => Some(InstanceType {
                virtual_cores: base.virtual_cores.or(fallback.virtual_cores),
                ram_in_gb: base.ram_in_gb.or(fallback.ram_in_gb),
                windows_sku: if base.windows_sku == WindowsSku::DoesNotMatter {
                    fallback.windows_sku
                } else {
                    base.windows_sku
                },
                specific_image_system_id: base
                    .specific_image_system_id
                    .clone()
                    .or_else(|| fallback.specific_image_system_id.clone()),
                specific_instance_type_system_id: base
                    .specific_instance_type_system_id
                    .clone()
                    .or_else(|| fallback.specific_instance_type_system_id.clone()),
            }),
            (base, fallback) => base.clone().or_else(|| fallback.clone()),
        };

        let instance_accessibility = if self.instance_accessibility.is_explicit() {
            self.instance_accessibility
        } else {
            defaults.instance_accessibility
        }
        .resolved();

        let instance_count = if self.instance_count > 0 {
            self.instance_count
        } else {
            defaults.instance_count.max(1)
        };

        let volumes = if self.volumes.is_empty() {
            &defaults.volumes
        } else {
            &self.volumes
        }
        .iter()
        .map(|v| Volume {
            volume_type: v.volume_type.resolved(),
            ..v.clone()
        })
        .collect();

        let chocolatey_packages = if self.chocolatey_packages.is_empty() {
            defaults.chocolatey_packages.clone()
        } else {
            self.chocolatey_packages.clone()
        };

        let deployment_strategy = match (self.deployment_strategy, defaults.deployment_strategy) {
            (Some(base), Some(fallback)) => Some(DeploymentStrategy {
                include_instance_initialization_script: base
                    .include_instance_initialization_script
                    .or(fallback.include_instance_initialization_script),
                run_setup_steps: base.run_setup_steps.or(fallback.run_setup_steps),
            }),
            (base, fallback) => base.or(fallback),
        };

        DeploymentConfiguration {
            instance_type,
            instance_accessibility,
            instance_count,
            volumes,
            chocolatey_packages,
            deployment_strategy,
            post_deployment_strategy: self
                .post_deployment_strategy
                .or(defaults.post_deployment_strategy),
        }
    }

    /// Replace every field that `overrides` sets, wholesale.
    pub fn apply_overrides(&self, overrides: &DeploymentConfiguration) -> DeploymentConfiguration {
        DeploymentConfiguration {
            instance_type: overrides
                .instance_type
                .clone()
                .or_else(|| self.instance_type.clone()),
            instance_accessibility: if overrides.instance_accessibility.is_explicit() {
                overrides.instance_accessibility
            } else {
                self.instance_accessibility
            },
            instance_count: if overrides.instance_count > 0 {
                overrides.instance_count
            } else {
                self.instance_count
            },
            volumes: if overrides.volumes.is_empty() {
                self.volumes.clone()
            } else {
                overrides.volumes.clone()
            },
            chocolatey_packages: if overrides.chocolatey_packages.is_empty() {
                self.chocolatey_packages.clone()
            } else {
                overrides.chocolatey_packages.clone()
            },
            deployment_strategy: overrides.deployment_strategy.or(self.deployment_strategy),
            post_deployment_strategy: overrides
                .post_deployment_strategy
                .or(self.post_deployment_strategy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PostDeploymentStrategy, VolumeType};

    fn with_volumes(volumes: Vec<Volume>) -> DeploymentConfiguration {
        DeploymentConfiguration {
            volumes,
            ..Default::default()
        }
    }

    fn with_sku(sku: WindowsSku) -> DeploymentConfiguration {
        DeploymentConfiguration {
            instance_type: Some(InstanceType {
                windows_sku: sku,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn with_accessibility(accessibility: InstanceAccessibility) -> DeploymentConfiguration {
        DeploymentConfiguration {
            instance_accessibility: accessibility,
            ..Default::default()
        }
    }

    fn with_strategy(init: Option<bool>, setup: Option<bool>) -> DeploymentConfiguration {
        DeploymentConfiguration {
            deployment_strategy: Some(DeploymentStrategy {
                include_instance_initialization_script: init,
                run_setup_steps: setup,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn instance_count_takes_max_and_ignores_non_positive() {
        let configs = [
            DeploymentConfiguration { instance_count: 1, ..Default::default() },
            DeploymentConfiguration { instance_count: -4, ..Default::default() },
            DeploymentConfiguration { instance_count: 2, ..Default::default() },
        ];
        assert_eq!(flatten(&configs).unwrap().instance_count, 2);

        let unset = [DeploymentConfiguration { instance_count: 0, ..Default::default() }];
        let flattened = flatten(&unset).unwrap();
        assert_eq!(flattened.instance_count, 0);
        assert_eq!(flattened.apply_defaults(&DeploymentConfiguration::default()).instance_count, 1);
    }

    #[test]
    fn duplicate_drive_letter_within_one_config_conflicts() {
        let config = with_volumes(vec![Volume::new("C", 50), Volume::new("C", 100)]);
        let err = flatten(&[config]).unwrap_err();
        assert_eq!(
            err,
            Error::Conflict("Can't have two volumes with the same drive letter.".into())
        );
    }

    #[test]
    fn same_drive_across_configs_keeps_largest() {
        let first = with_volumes(vec![Volume::new("C", 50)]);
        let second = with_volumes(vec![Volume::new("C", 100)]);
        let flattened = flatten(&[first, second]).unwrap();
        assert_eq!(flattened.volumes.len(), 1);
        assert_eq!(flattened.volumes[0].drive_letter, "C");
        assert_eq!(flattened.volumes[0].size_in_gb, 100);
        assert_eq!(flattened.volumes[0].volume_type, VolumeType::Standard);
    }

    #[test]
    fn volume_types_must_agree_after_normalization() {
        let unspecified = with_volumes(vec![Volume::new("D", 10)]);
        let standard = with_volumes(vec![Volume {
            volume_type: VolumeType::Standard,
            ..Volume::new("D", 20)
        }]);
        assert!(flatten(&[unspecified.clone(), standard]).is_ok());

        let fast = with_volumes(vec![Volume {
            volume_type: VolumeType::HighPerformance,
            ..Volume::new("D", 20)
        }]);
        assert!(matches!(flatten(&[unspecified, fast]), Err(Error::Conflict(_))));
    }

    #[test]
    fn single_config_keeps_instance_type() {
        let config = DeploymentConfiguration {
            instance_type: Some(InstanceType {
                virtual_cores: Some(4),
                ram_in_gb: Some(8.0),
                windows_sku: WindowsSku::SqlWeb,
                ..Default::default()
            }),
            ..Default::default()
        };
        let flattened = flatten(std::slice::from_ref(&config)).unwrap();
        assert_eq!(flattened.instance_type, config.instance_type);
    }

    #[test]
    fn competing_strategy_flags_conflict_by_name() {
        let err = flatten(&[with_strategy(Some(true), None), with_strategy(Some(false), None)])
            .unwrap_err();
        assert_eq!(
            err,
            Error::Conflict("Cannot have competing IncludeInstanceInitializationScript values.".into())
        );

        let err = flatten(&[with_strategy(None, Some(true)), with_strategy(None, Some(false))])
            .unwrap_err();
        assert_eq!(err, Error::Conflict("Cannot have competing RunSetupSteps values.".into()));
    }

    #[test]
    fn strategy_flags_from_different_inputs_combine() {
        let flattened =
            flatten(&[with_strategy(Some(true), None), with_strategy(None, Some(true))]).unwrap();
        let strategy = flattened.deployment_strategy.unwrap();
        assert_eq!(strategy.include_instance_initialization_script, Some(true));
        assert_eq!(strategy.run_setup_steps, Some(true));
    }

    #[test]
    fn differing_accessibility_conflicts() {
        let result = flatten(&[
            with_accessibility(InstanceAccessibility::Public),
            with_accessibility(InstanceAccessibility::Private),
        ]);
        assert!(matches!(result, Err(Error::Conflict(msg)) if msg.contains("accessibility")));
    }

    #[test]
    fn does_not_matter_never_overrides_explicit_accessibility() {
        let flattened = flatten(&[
            with_accessibility(InstanceAccessibility::DoesNotMatter),
            with_accessibility(InstanceAccessibility::Public),
            with_accessibility(InstanceAccessibility::DoesNotMatter),
        ])
        .unwrap();
        assert_eq!(flattened.instance_accessibility, InstanceAccessibility::Public);
    }

    #[test]
    fn largest_sku_wins_in_either_order() {
        let ladder = [
            WindowsSku::DoesNotMatter,
            WindowsSku::Core,
            WindowsSku::Base,
            WindowsSku::SqlWeb,
            WindowsSku::SqlStandard,
            WindowsSku::SqlEnterprise,
            WindowsSku::SpecificImageSupplied,
        ];
        for (i, smaller) in ladder.iter().enumerate() {
            for larger in &ladder[i..] {
                let forward = flatten(&[with_sku(*smaller), with_sku(*larger)]).unwrap();
                let backward = flatten(&[with_sku(*larger), with_sku(*smaller)]).unwrap();
                assert_eq!(forward.windows_sku(), *larger);
                assert_eq!(backward.windows_sku(), *larger);
            }
        }
    }

    #[test]
    fn competing_specific_images_conflict() {
        let image = |id: &str| DeploymentConfiguration {
            instance_type: Some(InstanceType {
                windows_sku: WindowsSku::SpecificImageSupplied,
                specific_image_system_id: Some(id.into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(flatten(&[image("ami-1"), image("ami-1")]).is_ok());
        assert!(flatten(&[image("ami-1"), image("ami-2")]).is_err());
    }

    #[test]
    fn chocolatey_packages_merge_distinctly_in_first_seen_order() {
        let a = DeploymentConfiguration {
            chocolatey_packages: vec![
                PackageDescription::new("Monkeys"),
                PackageDescription::new("PandaBears"),
            ],
            ..Default::default()
        };
        let b = DeploymentConfiguration {
            chocolatey_packages: vec![PackageDescription::new("PandaBears")],
            ..Default::default()
        };
        let flattened = flatten(&[a, b]).unwrap();
        let ids: Vec<&str> = flattened.chocolatey_packages.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["Monkeys", "PandaBears"]);
    }

    #[test]
    fn last_post_deployment_strategy_wins() {
        let on = DeploymentConfiguration {
            post_deployment_strategy: Some(PostDeploymentStrategy { turn_off_instance: true }),
            ..Default::default()
        };
        let off = DeploymentConfiguration {
            post_deployment_strategy: Some(PostDeploymentStrategy { turn_off_instance: false }),
            ..Default::default()
        };
        let flattened = flatten(&[on, off, DeploymentConfiguration::default()]).unwrap();
        assert_eq!(
            flattened.post_deployment_strategy,
            Some(PostDeploymentStrategy { turn_off_instance: false })
        );
    }

    #[test]
    fn zero_or_negative_default_count_becomes_one() {
        let base = DeploymentConfiguration::default();
        for count in [0, -1] {
            let defaults = DeploymentConfiguration { instance_count: count, ..Default::default() };
            assert_eq!(base.apply_defaults(&defaults).instance_count, 1);
        }
    }

    #[test]
    fn unset_values_become_defaults() {
        let base = DeploymentConfiguration {
            instance_type: Some(InstanceType { virtual_cores: Some(2), ..Default::default() }),
            deployment_strategy: Some(DeploymentStrategy::default()),
            ..Default::default()
        };
        let defaults = DeploymentConfiguration {
            instance_accessibility: InstanceAccessibility::Public,
            instance_type: Some(InstanceType {
                virtual_cores: Some(8),
                ram_in_gb: Some(16.0),
                windows_sku: WindowsSku::SqlStandard,
                ..Default::default()
            }),
            volumes: vec![Volume::new("C", 50)],
            chocolatey_packages: vec![PackageDescription::new("Monkeys")],
            deployment_strategy: Some(DeploymentStrategy {
                include_instance_initialization_script: Some(true),
                run_setup_steps: Some(true),
            }),
            ..Default::default()
        };

        let applied = base.apply_defaults(&defaults);
        assert_eq!(applied.instance_accessibility, InstanceAccessibility::Public);
        let instance_type = applied.instance_type.unwrap();
        assert_eq!(instance_type.virtual_cores, Some(2));
        assert_eq!(instance_type.ram_in_gb, Some(16.0));
        assert_eq!(instance_type.windows_sku, WindowsSku::SqlStandard);
        assert_eq!(applied.volumes, vec![Volume {
            volume_type: VolumeType::Standard,
            ..Volume::new("C", 50)
        }]);
        assert_eq!(applied.chocolatey_packages[0].id, "Monkeys");
        let strategy = applied.deployment_strategy.unwrap();
        assert_eq!(strategy.include_instance_initialization_script, Some(true));
        assert_eq!(strategy.run_setup_steps, Some(true));
    }

    #[test]
    fn unspecified_accessibility_defaults_to_private() {
        let base = DeploymentConfiguration::default();
        let applied = base.apply_defaults(&DeploymentConfiguration::default());
        assert_eq!(applied.instance_accessibility, InstanceAccessibility::Private);

        let applied =
            base.apply_defaults(&with_accessibility(InstanceAccessibility::DoesNotMatter));
        assert_eq!(applied.instance_accessibility, InstanceAccessibility::Private);
    }

    #[test]
    fn unset_overrides_leave_base_untouched() {
        let base = DeploymentConfiguration {
            instance_accessibility: InstanceAccessibility::Public,
            instance_count: 3,
            instance_type: Some(InstanceType {
                virtual_cores: Some(2),
                ram_in_gb: Some(4.0),
                windows_sku: WindowsSku::SqlWeb,
                ..Default::default()
            }),
            volumes: vec![Volume::new("C", 50)],
            chocolatey_packages: vec![PackageDescription::new("Monkeys")],
            deployment_strategy: Some(DeploymentStrategy {
                include_instance_initialization_script: Some(true),
                run_setup_steps: Some(false),
            }),
            ..Default::default()
        };
        let applied = base.apply_overrides(&DeploymentConfiguration::default());
        assert_eq!(applied, base);
    }

    #[test]
    fn overrides_replace_instance_type_wholesale() {
        let base = DeploymentConfiguration {
            instance_type: Some(InstanceType {
                virtual_cores: Some(2),
                ram_in_gb: Some(4.0),
                windows_sku: WindowsSku::SqlWeb,
                ..Default::default()
            }),
            volumes: vec![Volume::new("C", 50)],
            ..Default::default()
        };
        let overrides = DeploymentConfiguration {
            instance_type: Some(InstanceType { virtual_cores: Some(16), ..Default::default() }),
            instance_count: 4,
            instance_accessibility: InstanceAccessibility::Private,
            volumes: vec![Volume::new("D", 500)],
            ..Default::default()
        };

        let applied = base.apply_overrides(&overrides);
        assert_eq!(applied.instance_type, overrides.instance_type);
        assert_eq!(applied.instance_count, 4);
        assert_eq!(applied.instance_accessibility, InstanceAccessibility::Private);
        assert_eq!(applied.volumes, overrides.volumes);
    }
}
