//! # Framelink
//!
//! Host-side runtime for typed message pipelines partially executed on a
//! remote vision-accelerator device.
//!
//! The host declares a pipeline of named streams, starts a
//! [`DeviceSession`](session::DeviceSession) over a
//! [`Transport`](transport::Transport), and exchanges typed
//! [`Message`](message::Message)s with the device through named,
//! independently flow-controlled queues.
//!
//! ## Features
//!
//! - **Typed messages**: every message carries a tag from a closed
//!   datatype DAG with subclass queries for link compatibility
//! - **Named queues**: bounded/unbounded FIFOs with block-producer or
//!   drop-oldest policies, blocking and non-blocking pops, and arrival
//!   callbacks
//! - **Event multiplexer**: block on "which stream has new data" across
//!   many queues without polling
//! - **Recording**: per-stream background capture of live traffic to
//!   files, with crash-safe shutdown
//!
//! ## Quick Start
//!
//! ```rust
//! use framelink::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # fn main() -> framelink::Result<()> {
//! let pipeline = PipelineDescription::new()
//!     .input("control", 1024)
//!     .output("preview");
//!
//! let transport = Arc::new(LoopbackTransport::new("dev0"));
//! let session = DeviceSession::start(transport, &pipeline, &SessionConfig::new())?;
//!
//! let preview = session.output_queue("preview")?;
//! if let Some(name) = session.queue_event_any(Some(Duration::from_millis(10)))? {
//!     let message = preview.pop()?;
//!     println!("got {:?} on {}", message.datatype(), name);
//! }
//! session.close();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod datatype;
pub mod error;
pub mod message;
pub mod observability;
pub mod pipeline;
pub mod queue;
pub mod record;
pub mod session;
pub mod transport;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::SessionConfig;
    pub use crate::datatype::{is_subclass_of, Datatype};
    pub use crate::error::{Error, Result};
    pub use crate::message::{Message, MessageCodec, RawCodec};
    pub use crate::pipeline::PipelineDescription;
    pub use crate::queue::{InputQueue, MessageQueue, OutputQueue};
    pub use crate::record::RecordState;
    pub use crate::session::DeviceSession;
    pub use crate::transport::{LoopbackTransport, Transport};
}

pub use error::{Error, Result};
