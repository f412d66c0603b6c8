/// Configuration file names and locations
pub mod paths {
    pub const CONFIG_FILE_NAME: &str = "toolhub.toml";
    pub const DOT_DIR: &str = ".toolhub";
    pub const DEFAULT_DESCRIPTOR_DIR: &str = "tools";
    pub const DEFAULT_SEARCH_DATA_DIR: &str = ".toolhub/search";
    pub const DOCUMENTS_FILE: &str = "documents.json";
    pub const INDEX_DIR: &str = "indexes";
}

/// Names of the builtin tool implementation types
pub mod tool_types {
    pub const ECHO: &str = "echo";
    pub const HTTP_REQUEST: &str = "http_request";
    pub const TEXT_TRUNCATE: &str = "text_truncate";

    // Special wildcard matching every tool name in hook patterns
    pub const WILDCARD_ALL: &str = "*";
}

/// Execution pipeline defaults
pub mod execution {
    /// Key under which hook annotations are attached to a result
    pub const HOOK_ANNOTATION_KEY: &str = "_hook";
    pub const DEFAULT_WRITE_QUEUE_CAPACITY: usize = 256;
}

/// Hook manager defaults
pub mod hooks {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
    pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 1;
}

/// Search and embedding defaults
pub mod search {
    pub const DEFAULT_ALPHA: f64 = 0.5;
    pub const DEFAULT_EMBEDDING_MODEL: &str = "hashing-v1";
    pub const DEFAULT_DIMENSIONS: usize = 256;
    pub const OPENAI_EMBEDDING_MODEL: &str = "text-embedding-3-small";
    pub const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
    pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

    // BM25 parameters
    pub const BM25_K1: f64 = 1.2;
    pub const BM25_B: f64 = 0.75;
}

/// Tool finder defaults
pub mod finder {
    pub const DEFAULT_COLLECTION: &str = "tools";
    pub const COLLECTION_DESCRIPTION: &str = "Searchable tool descriptors";
    pub const DEFAULT_LIMIT: usize = 10;
}

/// Session memory defaults
pub mod session {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30 * 60;
}
