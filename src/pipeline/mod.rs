//! Processing pipelines
//!
//! A [`Pipeline`] threads a [`Payload`](crate::payload::Payload) through an
//! ordered list of named stages. A stage is anything implementing
//! [`StageProcessor`]: a plain function, a running device, or a custom type.
//!
//! `process_frame` runs on the caller's task. A continuous
//! capture → process → display loop should be driven from its own task,
//! never from inside an event bus subscriber.
//!
//! ## Example
//!
//! ```rust
//! use purevision_core::payload::Payload;
//! use purevision_core::pipeline::Pipeline;
//! use serde_json::json;
//!
//! # async fn example() -> purevision_core::error::Result<()> {
//! let mut pipeline = Pipeline::new("preview");
//! pipeline.add_fn_stage("identity", Ok)?;
//! pipeline.add_fn_stage("tag", |p: Payload| Ok(Payload::Value(json!({ "seen": p.kind() }))))?;
//!
//! let out = pipeline.process_frame(Payload::Empty).await?;
//! println!("{:?} at {:.1} fps", out, pipeline.get_stats().rolling_fps);
//! # Ok(())
//! # }
//! ```

mod engine;
mod stage;
mod stats;

pub use engine::Pipeline;
pub use stage::{fn_stage, DeviceStage, FnStage, StageProcessor};
pub use stats::{PipelineStats, StageStats};
