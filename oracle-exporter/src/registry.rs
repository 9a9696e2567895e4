//! Process-lifetime table of metric families.
//!
//! Families declared by probes at startup are registered eagerly; families
//! whose names come from row content are created on first sight and cached.
//! Either way a fully-qualified name maps to exactly one label schema and one
//! type for the life of the process. The exporter's own families are
//! reserved, and no probe can emit into them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error};

use crate::error::RegistryError;
use crate::metric::{MetricDescriptor, MetricKind, is_valid_label_name, is_valid_metric_name};

#[derive(Debug)]
struct Family {
    descriptor: Arc<MetricDescriptor>,
    /// Owned by the exporter itself; probes may not emit into it.
    reserved: bool,
}

/// Thread-safe metric family registry.
#[derive(Debug)]
pub struct MetricRegistry {
    namespace: String,
    families: RwLock<HashMap<String, Family>>,
}

impl MetricRegistry {
    /// Create an empty registry for the given namespace.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            families: RwLock::new(HashMap::new()),
        }
    }

    /// Return the descriptor for `(subsystem, name)`, creating it if needed.
    ///
    /// Fails with [`RegistryError::Conflict`] or [`RegistryError::KindConflict`]
    /// when the family already exists with a different schema, and with
    /// [`RegistryError::Reserved`] when it is one of the exporter's own
    /// families. The existing entry is left untouched.
    pub fn get_or_create(
        &self,
        subsystem: &str,
        name: &str,
        help: &str,
        kind: MetricKind,
        label_names: &[String],
    ) -> Result<Arc<MetricDescriptor>, RegistryError> {
        self.register(subsystem, name, help, kind, label_names, false)
    }

    /// Register a family owned by the exporter.
    ///
    /// Reserving the same family twice with the same schema returns the
    /// existing descriptor. Later [`get_or_create`](Self::get_or_create)
    /// calls for it fail.
    pub fn reserve(
        &self,
        subsystem: &str,
        name: &str,
        help: &str,
        kind: MetricKind,
        label_names: &[String],
    ) -> Result<Arc<MetricDescriptor>, RegistryError> {
        self.register(subsystem, name, help, kind, label_names, true)
    }

    fn register(
        &self,
        subsystem: &str,
        name: &str,
        help: &str,
        kind: MetricKind,
        label_names: &[String],
        reserved: bool,
    ) -> Result<Arc<MetricDescriptor>, RegistryError> {
        let descriptor = MetricDescriptor::new(
            &self.namespace,
            subsystem,
            name,
            help,
            kind,
            label_names.to_vec(),
        );

        if let Some(existing) = self.families.read().get(descriptor.fq_name()) {
            return check_schema(existing, &descriptor, reserved);
        }

        validate(&descriptor)?;

        let mut families = self.families.write();
        // Another scrape may have inserted it between the two locks.
        if let Some(existing) = families.get(descriptor.fq_name()) {
            return check_schema(existing, &descriptor, reserved);
        }

        debug!(
            metric = %descriptor.fq_name(),
            labels = ?descriptor.label_names(),
            reserved,
            "Registered metric family"
        );
        let descriptor = Arc::new(descriptor);
        families.insert(
            descriptor.fq_name().to_string(),
            Family {
                descriptor: descriptor.clone(),
                reserved,
            },
        );
        Ok(descriptor)
    }

    /// Look up a family by its fully-qualified name.
    pub fn get(&self, fq_name: &str) -> Option<Arc<MetricDescriptor>> {
        self.families
            .read()
            .get(fq_name)
            .map(|family| family.descriptor.clone())
    }

    /// Number of registered families.
    pub fn len(&self) -> usize {
        self.families.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.families.read().is_empty()
    }
}

fn check_schema(
    existing: &Family,
    requested: &MetricDescriptor,
    reserved: bool,
) -> Result<Arc<MetricDescriptor>, RegistryError> {
    let current = &existing.descriptor;

    if existing.reserved != reserved {
        error!(
            metric = %current.fq_name(),
            "Metric family collides with an exporter self-metric"
        );
        return Err(RegistryError::Reserved(current.fq_name().to_string()));
    }

    if current.label_names() != requested.label_names() {
        error!(
            metric = %current.fq_name(),
            existing = ?current.label_names(),
            requested = ?requested.label_names(),
            "Metric family re-declared with a different label schema"
        );
        return Err(RegistryError::Conflict {
            name: current.fq_name().to_string(),
            existing: current.label_names().to_vec(),
            requested: requested.label_names().to_vec(),
        });
    }

    if current.kind() != requested.kind() {
        error!(
            metric = %current.fq_name(),
            existing = current.kind().as_str(),
            requested = requested.kind().as_str(),
            "Metric family re-declared with a different type"
        );
        return Err(RegistryError::KindConflict {
            name: current.fq_name().to_string(),
            existing: current.kind().as_str(),
            requested: requested.kind().as_str(),
        });
    }

    Ok(current.clone())
}

fn validate(descriptor: &MetricDescriptor) -> Result<(), RegistryError> {
    if !is_valid_metric_name(descriptor.fq_name()) {
        return Err(RegistryError::InvalidName(descriptor.fq_name().to_string()));
    }
    if let Some(bad) = descriptor
        .label_names()
        .iter()
        .find(|l| !is_valid_label_name(l))
    {
        return Err(RegistryError::InvalidName(format!(
            "{}{{{}}}",
            descriptor.fq_name(),
            bad
        )));
    }
    Ok(())
}
