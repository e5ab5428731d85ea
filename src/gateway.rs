//! Forwarding gateway: filter a reading, then hand it to the next tier up

use std::sync::Arc;

use crate::config::{FilterRule, ParentEndpoint, TierConfig};
use crate::events::{EventHub, MeshEvent};
use crate::filter;
use crate::reading::{Reading, Warning};
use crate::transport::Upstream;
use crate::{Error, Result};

/// What happened to a submitted reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum Disposition {
    /// Sent to the parent
    Forwarded,
    /// Dropped by the filter rule at this index
    Dropped { rule: usize },
    /// Published to local event subscribers
    Delivered { receivers: usize },
}

/// Next hop for kept readings
#[derive(Debug, Clone)]
pub enum Route {
    Parent {
        upstream: Arc<dyn Upstream>,
        parent: ParentEndpoint,
    },
    Hub(EventHub),
}

/// Filter chain plus next hop of one snapshot
#[derive(Debug, Clone)]
pub struct ForwardingGateway {
    filters: Vec<FilterRule>,
    route: Route,
}

impl ForwardingGateway {
    #[must_use]
    pub const fn new(filters: Vec<FilterRule>, route: Route) -> Self {
        Self { filters, route }
    }

    /// Build the gateway for `snapshot`
    ///
    /// Tiers with a parent forward to it; the top tier publishes to `hub`.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the snapshot has neither a parent nor a hub to deliver to
    pub fn for_snapshot(
        snapshot: &TierConfig,
        upstream: Arc<dyn Upstream>,
        hub: Option<&EventHub>,
    ) -> Result<Self> {
        let route = match (&snapshot.parent, hub) {
            (Some(parent), _) => Route::Parent {
                upstream,
                parent: parent.clone(),
            },
            (None, Some(hub)) => Route::Hub(hub.clone()),
            (None, None) => {
                return Err(Error::TypeMismatch(format!(
                    "snapshot '{}' has nowhere to forward readings",
                    snapshot.id
                )));
            }
        };
        Ok(Self::new(snapshot.filters.clone(), route))
    }

    #[must_use]
    pub fn filters(&self) -> &[FilterRule] {
        &self.filters
    }

    /// Filter `reading` and pass it on if kept
    ///
    /// # Errors
    ///
    /// Returns a transport error if the parent could not be reached
    pub async fn submit(&self, reading: &Reading) -> Result<Disposition> {
        if let Some(rule) = filter::first_drop(reading, &self.filters) {
            tracing::debug!(
                sensor_id = %reading.sensor_id,
                value = reading.raw_value,
                rule,
                "reading dropped by filter"
            );
            return Ok(Disposition::Dropped { rule });
        }

        match &self.route {
            Route::Parent { upstream, parent } => {
                upstream.forward_reading(parent, reading).await?;
                Ok(Disposition::Forwarded)
            }
            Route::Hub(hub) => {
                let receivers = hub.publish(MeshEvent::Reading(reading.clone()));
                Ok(Disposition::Delivered { receivers })
            }
        }
    }

    /// Pass a warning on unfiltered
    ///
    /// # Errors
    ///
    /// Returns a transport error if the parent could not be reached
    pub async fn relay_warning(&self, warning: &Warning) -> Result<Disposition> {
        match &self.route {
            Route::Parent { upstream, parent } => {
                upstream.forward_warning(parent, warning).await?;
                Ok(Disposition::Forwarded)
            }
            Route::Hub(hub) => {
                let receivers = hub.publish(MeshEvent::Warning(warning.clone()));
                Ok(Disposition::Delivered { receivers })
            }
        }
    }
}
