//! Sensor Mesh - hierarchical sensor monitoring network
//!
//! Readings flow upward through three tiers of nodes:
//! - Collectors sample their sensors and forward readings to an aggregator
//! - Aggregators keep a registry of live collectors, filter and forward
//! - The bridge sits at the top and delivers to event subscribers
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                      Bridge                          │
//! │   Registry  │  Filters  │  Event stream (WebSocket)  │
//! └────────────────────▲────────────────────────────────┘
//!                      │ register / heartbeat / readings
//! ┌────────────────────┴────────────────────────────────┐
//! │                    Aggregators                       │
//! │   Registry  │  Sweeper  │  Filters  │  Warning poll  │
//! └────────────────────▲────────────────────────────────┘
//!                      │ register / heartbeat / readings
//! ┌────────────────────┴────────────────────────────────┐
//! │                    Collectors                        │
//! │   Sensor drivers  │  Sampling workers  │  Filters    │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod drivers;
pub mod error;
pub mod events;
pub mod filter;
pub mod gateway;
pub mod liveness;
pub mod manager;
pub mod reading;
pub mod registry;
pub mod sampling;
pub mod tier;
pub mod transport;

pub use config::settings::MonitorSettings;
pub use config::{
    Comparator, EndpointDescriptor, FilterRule, ParentEndpoint, SensorSpec, TierConfig, TierRole,
    WarningBand,
};
pub use drivers::{DriverRegistry, SensorDriver};
pub use error::{Error, ErrorKind, Result};
pub use events::{EventHub, MeshEvent};
pub use gateway::{Disposition, ForwardingGateway};
pub use liveness::{ChildRegistry, LinkState, ParentLink, Sweeper};
pub use manager::{ApplyOutcome, ConfigManager, ManagerDeps};
pub use reading::{Reading, Warning};
pub use registry::{Registry, RegistryEntry};
pub use tier::Tier;
pub use transport::{Downstream, HttpTransport, Liveness, Upstream};
