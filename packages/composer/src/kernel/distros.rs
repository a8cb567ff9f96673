//! Registry of supported distribution / architecture / image-type
//! combinations, consulted during compose request validation.

use std::collections::HashMap;

use crate::domains::composes::request::ImageType;
use crate::domains::composes::request::ImageType::*;

const ALL_X86_64: &[ImageType] = &[
    Aws,
    AwsRhui,
    AwsHaRhui,
    AwsSapRhui,
    Azure,
    EdgeCommit,
    EdgeContainer,
    EdgeInstaller,
    Gcp,
    GuestImage,
    ImageInstaller,
    Vsphere,
];

const ALL_AARCH64: &[ImageType] = &[
    Aws,
    EdgeCommit,
    EdgeContainer,
    EdgeInstaller,
    GuestImage,
    ImageInstaller,
];

const FEDORA_X86_64: &[ImageType] = &[
    Aws,
    EdgeCommit,
    EdgeContainer,
    EdgeInstaller,
    Gcp,
    GuestImage,
    ImageInstaller,
    Vsphere,
];

/// Supported build targets, keyed by distribution then architecture.
#[derive(Debug, Clone, Default)]
pub struct DistroRegistry {
    distros: HashMap<String, HashMap<String, Vec<ImageType>>>,
}

impl DistroRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The targets this service builds out of the box.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for distribution in ["rhel-8", "rhel-9", "centos-8", "centos-9"] {
            registry.register(distribution, "x86_64", ALL_X86_64);
            registry.register(distribution, "aarch64", ALL_AARCH64);
        }
        for distribution in ["fedora-37", "fedora-38"] {
            registry.register(distribution, "x86_64", FEDORA_X86_64);
            registry.register(distribution, "aarch64", ALL_AARCH64);
        }
        registry
    }

    pub fn register(&mut self, distribution: &str, architecture: &str, image_types: &[ImageType]) {
        self.distros
            .entry(distribution.to_string())
            .or_default()
            .insert(architecture.to_string(), image_types.to_vec());
    }

    pub fn supports_distribution(&self, distribution: &str) -> bool {
        self.distros.contains_key(distribution)
    }

    pub fn supports_architecture(&self, distribution: &str, architecture: &str) -> bool {
        self.distros
            .get(distribution)
            .map(|arches| arches.contains_key(architecture))
            .unwrap_or(false)
    }

    pub fn supports_image_type(
        &self,
        distribution: &str,
        architecture: &str,
        image_type: ImageType,
    ) -> bool {
        self.distros
            .get(distribution)
            .and_then(|arches| arches.get(architecture))
            .map(|types| types.contains(&image_type))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_the_documented_targets() {
        let registry = DistroRegistry::with_defaults();
        assert!(registry.supports_distribution("rhel-8"));
        assert!(!registry.supports_distribution("rhel-7"));
        assert!(registry.supports_architecture("rhel-8", "aarch64"));
        assert!(!registry.supports_architecture("rhel-8", "s390x"));
        assert!(registry.supports_image_type("rhel-8", "x86_64", ImageType::AwsSapRhui));
        assert!(!registry.supports_image_type("rhel-8", "aarch64", ImageType::AwsSapRhui));
        assert!(!registry.supports_image_type("fedora-38", "x86_64", ImageType::AwsSapRhui));
    }

    #[test]
    fn registering_extends_the_table() {
        let mut registry = DistroRegistry::new();
        assert!(!registry.supports_distribution("rhel-8"));
        registry.register("rhel-8", "x86_64", &[ImageType::GuestImage]);
        assert!(registry.supports_image_type("rhel-8", "x86_64", ImageType::GuestImage));
        assert!(!registry.supports_image_type("rhel-8", "x86_64", ImageType::Aws));
    }
}
