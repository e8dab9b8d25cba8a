//! Tuning parameters for [`crate::memory::ObjectMemory`].

/// Configuration for an [`crate::memory::ObjectMemory`] instance.
///
/// Supplied once at construction via `ObjectMemory::with_config`; it is not
/// hot-reloaded mid-cycle.
///
/// # Examples
///
/// ```rust
/// use object_memory::ObjectMemoryConfig;
///
/// let config = ObjectMemoryConfig {
///     audit_every_gc: true,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct ObjectMemoryConfig {
    /// Number of OTEs committed at startup.
    ///
    /// Default: 4096
    pub initial_ot_capacity: usize,

    /// Number of additional OTEs committed when the free list runs dry.
    ///
    /// Default: 1024
    pub ot_growth_size: usize,

    /// Number of entries reserved at the head of the table for VM-known
    /// permanent singletons (`[0, NumPermanent)`). These are sticky and are
    /// never placed on the free list.
    ///
    /// Default: 64
    pub num_permanent: usize,

    /// Run the debug reference-count auditor automatically around every GC
    /// cycle (before and after). Expensive — intended for debug builds and
    /// tests, not routine production use.
    ///
    /// Default: false
    pub audit_every_gc: bool,

    /// Whether asynchronous GC is enabled. When disabled, the host is
    /// expected to drive `async_gc` only from safe points it controls
    /// itself; the auditor treats "too large" refcount mismatches as
    /// expected transient noise in that mode.
    ///
    /// Default: true
    pub async_gc_enabled: bool,

    /// Warn when a single weak bereavement scan nils more than this many
    /// slots in one GC cycle.
    ///
    /// Default: 10_000
    pub bereavement_warn_threshold: u32,
}

impl Default for ObjectMemoryConfig {
    fn default() -> Self {
        Self {
            initial_ot_capacity: 4096,
            ot_growth_size: 1024,
            num_permanent: 64,
            audit_every_gc: false,
            async_gc_enabled: true,
            bereavement_warn_threshold: 10_000,
        }
    }
}

impl ObjectMemoryConfig {
    /// Start building a config from the defaults.
    pub fn builder() -> ObjectMemoryConfigBuilder {
        ObjectMemoryConfigBuilder::default()
    }
}

/// Builder for [`ObjectMemoryConfig`].
#[derive(Debug, Default, Clone)]
pub struct ObjectMemoryConfigBuilder {
    config: ObjectMemoryConfigInner,
}

// Kept as a thin newtype so `ObjectMemoryConfigBuilder::default()` can reuse
// `ObjectMemoryConfig::default()` without requiring every field to be `Option`.
#[derive(Debug, Default, Clone)]
struct ObjectMemoryConfigInner(ObjectMemoryConfig);

impl ObjectMemoryConfigBuilder {
    pub fn initial_ot_capacity(mut self, capacity: usize) -> Self {
        self.config.0.initial_ot_capacity = capacity;
        self
    }

    pub fn ot_growth_size(mut self, size: usize) -> Self {
        self.config.0.ot_growth_size = size;
        self
    }

    pub fn num_permanent(mut self, count: usize) -> Self {
        self.config.0.num_permanent = count;
        self
    }

    pub fn audit_every_gc(mut self, enabled: bool) -> Self {
        self.config.0.audit_every_gc = enabled;
        self
    }

    pub fn async_gc_enabled(mut self, enabled: bool) -> Self {
        self.config.0.async_gc_enabled = enabled;
        self
    }

    pub fn bereavement_warn_threshold(mut self, threshold: u32) -> Self {
        self.config.0.bereavement_warn_threshold = threshold;
        self
    }

    pub fn build(self) -> ObjectMemoryConfig {
        self.config.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_reference_constants() {
        let config = ObjectMemoryConfig::default();
        assert_eq!(config.initial_ot_capacity, 4096);
        assert_eq!(config.num_permanent, 64);
        assert!(config.async_gc_enabled);
        assert!(!config.audit_every_gc);
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = ObjectMemoryConfig::builder()
            .initial_ot_capacity(128)
            .audit_every_gc(true)
            .build();
        assert_eq!(config.initial_ot_capacity, 128);
        assert!(config.audit_every_gc);
        assert_eq!(config.num_permanent, 64);
    }
}
