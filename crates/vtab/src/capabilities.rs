use bitflags::bitflags;

bitflags! {
    /// What a module's tables support, reported once per module rather
    /// than probed per table. The planner and coordinator consult this
    /// before attempting an operation a module can't honor (e.g. a
    /// savepoint against a module with no transaction support) instead of
    /// discovering it via a failed call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        /// Tables from this module give each connection its own
        /// snapshot-isolated read layer.
        const SUPPORTS_ISOLATION = 0b0000_0001;
        /// `savepoint`/`release`/`rollback_to` are implemented.
        const SUPPORTS_SAVEPOINTS = 0b0000_0010;
        /// `create_index`/`drop_index` are implemented.
        const SUPPORTS_SECONDARY_INDEXES = 0b0000_0100;
    }
}
