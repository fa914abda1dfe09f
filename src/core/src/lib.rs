mod backup;
mod dest;
mod error;
mod paths;
mod server;
mod sites;
mod storage;
mod sync;
mod vault_config;

pub use backup::{BackupOutcome, BackupService, RemoteBackup, RestoreOutcome, UploadReport};
pub use dest::{BackupEntry, Destination, DestinationKind, R2Destination, WebDavDestination};
pub use error::BackupError;
pub use paths::{chatvault_home_dir, config_file_path, default_db_path};
pub use server::build_router;
pub use sites::{
    ConversationList, HttpSiteApi, ListEntry, PeerInfo, SiteApi, SiteDescriptor, Thread,
    ThreadMessage, UserIdStrategy, SITES,
};
pub use storage::{last_backup_key, ChatRecord, SqliteStore, Store};
pub use sync::{SyncReport, SyncRunner, ThreadSyncReport};
pub use vault_config::{
    R2Config, RetentionConfig, ServerConfig, SiteConfig, SyncConfig, VaultConfig, WebdavConfig,
};
