use objectstore_core::TableOptions;

/// Configuration for the storage engine and the object store built on it.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Application identity presented to the key-value engine.
    pub app_id: String,
    /// User identity presented to the key-value engine.
    pub user_id: String,
    /// Options used when opening a session table.
    pub table_options: TableOptions,
    /// Enable automatic replication on every table after it is opened.
    pub auto_sync: bool,
    /// Number of entries fetched per page when scanning a table.
    pub scan_page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            app_id: "objectstore".to_string(),
            user_id: "user0".to_string(),
            table_options: TableOptions::default(),
            auto_sync: true,
            scan_page_size: 128,
        }
    }
}
