// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
// (none for this module)

// Layer 3: Internal module imports
// (none)

/// A user-installed background component hosted by the environment.
///
/// Layers are the very first startup stage: every layer's `start` runs
/// before any runtime service thread exists, in installation order. A
/// failure stops the already-started layers in reverse order and
/// aborts the launch. Shutdown mirrors startup: layers are stopped
/// last, after every other environment stage is down, again in reverse
/// installation order.
///
/// Because layers start before the runtime is up, `start` receives no
/// environment handle; a layer that needs one captures it later, for
/// example from the init callback.
///
/// # Example
/// ```rust,ignore
/// struct AuditLog {
///     file: Mutex<Option<File>>,
/// }
///
/// impl Layer for AuditLog {
///     fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
///         *self.file.lock() = Some(File::create("audit.log")?);
///         Ok(())
///     }
///
///     fn stop(&self) {
///         *self.file.lock() = None;
///     }
/// }
///
/// let params = EnvParams::new().add_layer(Arc::new(AuditLog::default()));
/// ```
pub trait Layer: Send + Sync {
    /// Bring the layer up. An error aborts the environment launch.
    fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Tear the layer down. Runs during environment shutdown and during
    /// the rollback of a failed launch; must not fail.
    fn stop(&self);
}
