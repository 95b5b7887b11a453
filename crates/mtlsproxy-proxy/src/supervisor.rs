//! Reconciliation of the declared profile set against running instances.

use std::collections::{HashMap, HashSet};

use tracing::{info, warn};

use mtlsproxy_config::{ConfigSource, Profile};

use crate::instance::Instance;

/// Owns at most one [`Instance`] per profile name and applies reload
/// diffs against the running set.
#[derive(Default)]
pub struct Supervisor {
    instances: HashMap<String, Instance>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of running instances.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Whether an instance with this profile name is running.
    pub fn contains(&self, name: &str) -> bool {
        self.instances.contains_key(name)
    }

    /// Run one reload cycle: snapshot, resolve, diff, apply.
    ///
    /// A snapshot failure or any single credential-resolution failure
    /// aborts the whole cycle and leaves the running set untouched, so a
    /// transient file error never causes a partial reconfiguration.
    pub async fn reload(&mut self, source: &ConfigSource) {
        let mut profiles = match source.snapshot() {
            Ok(profiles) => profiles,
            Err(e) => {
                warn!(error = %e, "reload aborted: snapshot failed");
                return;
            }
        };

        for profile in &mut profiles {
            if let Err(e) = profile.resolve() {
                warn!(profile = %profile.name, error = %e, "reload aborted: credential resolution failed");
                return;
            }
        }

        self.apply(profiles).await;
    }

    /// Diff the declared profiles against the running instances and apply
    /// removes, then modifies, then adds. Adapt and construction errors
    /// are logged; an adapt error keeps the instance on its previous
    /// profile, a construction error discards the new instance.
    pub async fn apply(&mut self, profiles: Vec<Profile>) {
        let declared: HashSet<&str> = profiles.iter().map(|p| p.name.as_str()).collect();

        let removed: Vec<String> = self
            .instances
            .keys()
            .filter(|name| !declared.contains(name.as_str()))
            .cloned()
            .collect();
        for name in removed {
            if let Some(inst) = self.instances.remove(&name) {
                inst.stop().await;
                info!(profile = %name, "profile removed");
            }
        }

        let mut added: Vec<Profile> = Vec::new();
        for profile in profiles {
            match self.instances.get(&profile.name) {
                Some(inst) => {
                    let name = profile.name.clone();
                    match inst.adapt_to(profile).await {
                        Ok(()) => info!(profile = %name, "profile adapted"),
                        Err(e) => warn!(profile = %name, error = %e, "error adapting profile"),
                    }
                }
                None => added.push(profile),
            }
        }

        for profile in added {
            let name = profile.name.clone();
            match Instance::new(profile).await {
                Ok(inst) => {
                    self.instances.insert(name.clone(), inst);
                    info!(profile = %name, "profile added");
                }
                Err(e) => warn!(profile = %name, error = %e, "error starting profile"),
            }
        }
    }

    /// Stop every instance.
    pub async fn shutdown(&mut self) {
        for (name, inst) in self.instances.drain() {
            inst.stop().await;
            info!(profile = %name, "profile stopped");
        }
    }
}
