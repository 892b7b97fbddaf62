//! purevision-core
//!
//! Device orchestration runtime for embedded vision boards.
//! Composes independently loadable device modules (cameras, GPIO, displays,
//! sensors) through an event bus and staged processing pipelines.
//!
//! ## Architecture
//!
//! The crate never talks to hardware itself. Concrete devices implement
//! [`DeviceBackend`] and are linked in as factories; the runtime provides the
//! scaffolding around them.
//!
//! ### Modules
//!
//! - `events`: Topic-based publish/subscribe with a single FIFO dispatch task
//! - `modules`: Manifest discovery, capability validation, versioned blueprints
//! - `device`: Backend contract and the lifecycle state machine
//! - `manager`: Live device registry, creation, removal and shutdown
//! - `pipeline`: Ordered stages with rolling performance counters
//! - `payload`: Frames and values passed between devices and stages
//! - `config`, `logging`, `error`: Runtime settings, tracing setup, error types
//!
//! ## Example
//!
//! ```rust
//! use purevision_core::{DeviceManager, EventBus, FactoryRegistry, ModuleLoader, Payload, Pipeline};
//! use std::sync::Arc;
//!
//! # async fn example() -> purevision_core::Result<()> {
//! let bus = EventBus::new();
//! let loader = Arc::new(ModuleLoader::new(vec!["modules".into()], FactoryRegistry::with_builtins()));
//! let manager = DeviceManager::new(loader, Arc::clone(&bus));
//!
//! let echo = manager.create_device("passthrough", "echo0", Default::default()).await?;
//! echo.start().await?;
//!
//! let mut pipeline = Pipeline::new("main").with_event_bus(Arc::clone(&bus));
//! pipeline.add_device_stage("echo", echo)?;
//! pipeline.process_frame(Payload::Empty).await?;
//!
//! manager.shutdown_all().await?;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used types
pub use config::{DeviceConfig, OrchestratorConfig};
pub use device::{Device, DeviceBackend, DeviceStatus};
pub use error::{OrchestratorError, Result};
pub use events::{Event, EventBus, SubscriptionHandle};
pub use manager::DeviceManager;
pub use modules::{Blueprint, BlueprintDescriptor, FactoryRegistry, ModuleLoader};
pub use payload::{Frame, Payload, PixelFormat};
pub use pipeline::{Pipeline, PipelineStats};

// Public modules
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod logging;
pub mod manager;
pub mod modules;
pub mod payload;
pub mod pipeline;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
