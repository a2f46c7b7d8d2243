//! Weaver configuration.
//!
//! The configuration is passed into the weaver explicitly; nothing about how a module is
//! woven or reported is held in global state.

use crate::metadata::{runtime::names, signature::TypeName};

/// Configuration for weaving a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeaverConfig {
    /// Base type every decorator attribute derives from
    pub marker_base: TypeName,

    /// Weave distinct methods on the rayon thread pool
    pub parallel: bool,

    /// Run structural verification on every woven body
    /// A body that fails verification is reported as a failed method
    pub verify: bool,

    /// Record informational diagnostics (one per woven method, discovery summaries)
    /// Warnings and errors are always recorded
    pub report_info: bool,
}

impl Default for WeaverConfig {
    fn default() -> Self {
        Self {
            marker_base: TypeName::parse(names::DECORATOR_ATTRIBUTE),
            parallel: true,
            verify: true,
            report_info: true,
        }
    }
}

impl WeaverConfig {
    /// Quiet configuration: no verification, no informational diagnostics
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            verify: false,
            report_info: false,
            ..Self::default()
        }
    }

    /// Sequential, verified weaving with full reporting.
    ///
    /// Diagnostics then appear in discovery order, which makes runs reproducible.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            parallel: false,
            ..Self::default()
        }
    }

    /// Uses a different decorator base type
    #[must_use]
    pub fn with_marker_base(mut self, full_name: &str) -> Self {
        self.marker_base = TypeName::parse(full_name);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets() {
        let default = WeaverConfig::default();
        assert!(default.parallel && default.verify && default.report_info);
        assert_eq!(
            default.marker_base.full_name(),
            "MethodDecorator.Attributes.DecoratorAttribute"
        );

        let minimal = WeaverConfig::minimal();
        assert!(!minimal.verify && !minimal.report_info);

        let strict = WeaverConfig::strict();
        assert!(!strict.parallel && strict.verify);
    }

    #[test]
    fn custom_marker_base() {
        let config = WeaverConfig::default().with_marker_base("Acme.Aspects.AspectAttribute");
        assert_eq!(config.marker_base.namespace, "Acme.Aspects");
        assert_eq!(config.marker_base.name, "AspectAttribute");
    }
}
