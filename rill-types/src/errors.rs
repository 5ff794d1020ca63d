pub mod internal {
    /// The error type user code (node hooks, factories) reports with.
    ///
    /// The framework treats these as node-local and recoverable: they are
    /// logged against the failing node and the worker keeps running.
    pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;
}
