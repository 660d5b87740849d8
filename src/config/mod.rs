pub mod connector;
pub mod paths;
pub mod settings;

pub use connector::{AuthType, ConnectorConfig, ConnectorKind};
pub use settings::{ExecSettings, RegistrySettings, Settings, SftpLimits, SshSettings};
