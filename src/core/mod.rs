pub mod credentials;
pub mod realtime;
pub mod search;

// Re-export commonly used types for convenience
pub use credentials::{
    ClientCredentialsTokenProvider, CredentialError, ServiceCredential, StaticTokenProvider,
    TokenProvider,
};

pub use realtime::{
    DuplexForwarder, MessageBuffer, ProcessorResult, RealtimeEnvelope, RelayDefaults, RelayError,
    RelayResult, SessionProcessor, Tool, ToolDestination, ToolRegistry, UpstreamConnector,
    message_type,
};

pub use search::{SearchService, SearchSettings, knowledge_base_tools};
