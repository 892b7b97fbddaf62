//! Event system
//!
//! Decoupled communication between devices, the manager, pipelines and
//! observers. Components publish events instead of holding references to
//! each other.
//!
//! ## Components
//!
//! - [`EventBus`](struct@EventBus) - Asynchronous topic-based publish/subscribe
//! - [`Event`](struct@Event) - Topic, JSON payload and publish time
//! - [`topics`] - Stable topic names used by the orchestrator
//!
//! ## Example
//!
//! ```rust
//! use purevision_core::events::{topics, Event, EventBus};
//!
//! # async fn example() {
//! let bus = EventBus::new();
//!
//! let handle = bus.subscribe(topics::DEVICE_CREATED, |event| {
//!     println!("new device: {:?}", event.device_id());
//!     Ok(())
//! });
//!
//! bus.publish_event(Event::device_created("cam0", "camera"));
//! bus.flush().await;
//!
//! bus.unsubscribe(&handle);
//! # }
//! ```

mod bus;
mod event;

pub use bus::{EventBus, EventCallback, SubscriptionHandle};
pub use event::{topics, Event};
