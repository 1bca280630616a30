#![forbid(unsafe_code)]

pub mod activity;
pub mod app_services;
pub mod config;
pub mod controller;
pub mod error;
pub mod persistence;
pub mod remote;
pub mod sessions;

pub use exam_core::Clock;

pub use activity::{ActivityMonitor, Visibility};
pub use app_services::AppServices;
pub use config::{EngineConfig, RemoteSyncConfig};
pub use controller::{
    Recovery, ResumeSummary, SessionController, SharedController, spawn_liveness_driver,
};
pub use error::{AppServicesError, SessionError, SyncError};
pub use persistence::{PersistenceOrchestrator, PersistenceStatus, SaveMode, SnapshotSink};
pub use remote::{HttpRemoteSync, InMemoryRemote, RemoteSessionSync};
pub use sessions::{SessionEvent, SessionStateMachine};
