//! Per-sensor sampling workers on a collector

use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::{SensorSpec, WarningBand};
use crate::drivers::SensorDriver;
use crate::gateway::ForwardingGateway;
use crate::liveness::Worker;
use crate::reading::{Reading, Warning};
use crate::{Error, Result};

/// Latest reading and current warning of one sensor, readable by request handlers
#[derive(Debug, Clone, Default)]
pub struct SensorSlots {
    latest: Arc<RwLock<Option<Reading>>>,
    warning: Arc<RwLock<Option<Warning>>>,
}

impl SensorSlots {
    #[must_use]
    pub fn latest(&self) -> Option<Reading> {
        self.latest.read().clone()
    }

    /// Warning raised by the latest reading, if it was out of band
    #[must_use]
    pub fn warning(&self) -> Option<Warning> {
        self.warning.read().clone()
    }

    fn record(&self, reading: &Reading, band: Option<&WarningBand>) {
        let warning = band
            .and_then(|b| b.check(reading.raw_value))
            .map(|message| Warning {
                reading: reading.clone(),
                message,
            });

        if let Some(w) = &warning {
            tracing::debug!(
                sensor_id = %reading.sensor_id,
                message = %w.message,
                "sensor out of band"
            );
        }
        *self.latest.write() = Some(reading.clone());
        *self.warning.write() = warning;
    }
}

/// Running sampling loop for one sensor
#[derive(Debug)]
pub struct SamplingWorker {
    sensor_id: String,
    slots: SensorSlots,
    worker: Worker,
}

impl SamplingWorker {
    /// Open the driver, take a first sample and start sampling every interval
    ///
    /// # Errors
    ///
    /// Returns a driver error if the device cannot be opened or read; the driver
    /// is closed again before returning
    pub fn start(
        spec: &SensorSpec,
        mut driver: Box<dyn SensorDriver>,
        tier_id: &str,
        gateway: Arc<ForwardingGateway>,
    ) -> Result<Self> {
        let first = match driver.initialize().and_then(|()| driver.read()) {
            Ok(value) => value,
            Err(e) => {
                driver.close();
                return Err(Error::Driver(format!(
                    "sensor '{}' failed to start: {e}",
                    spec.id
                )));
            }
        };
        let reading = Reading::now(&spec.id, &spec.sensor_type, first).from_tier(tier_id);

        let slots = SensorSlots::default();
        slots.record(&reading, spec.warning.as_ref());

        let interval = spec.interval();
        let band = spec.warning;
        let sensor_id = spec.id.clone();
        let sensor_type = spec.sensor_type.clone();
        let origin = tier_id.to_string();
        let task_slots = slots.clone();

        let worker = Worker::spawn(format!("sampler:{}", spec.id), move |mut signal| async move {
            let mut pending = Some(reading);
            loop {
                if let Some(reading) = pending.take() {
                    if let Err(e) = gateway.submit(&reading).await {
                        tracing::warn!(sensor_id = %sensor_id, error = %e, "reading not forwarded");
                    }
                }

                if signal.sleep(interval).await {
                    break;
                }

                // Device reads may block, keep them off the runtime threads
                let sampled = tokio::task::spawn_blocking(move || {
                    let value = driver.read();
                    (driver, value)
                })
                .await;
                let value = match sampled {
                    Ok((returned, value)) => {
                        driver = returned;
                        value
                    }
                    Err(e) => {
                        tracing::error!(
                            sensor_id = %sensor_id,
                            error = %e,
                            "sensor read panicked"
                        );
                        return;
                    }
                };

                match value {
                    Ok(value) => {
                        let reading =
                            Reading::now(&sensor_id, &sensor_type, value).from_tier(&origin);
                        task_slots.record(&reading, band.as_ref());
                        pending = Some(reading);
                    }
                    Err(e) => {
                        tracing::warn!(sensor_id = %sensor_id, error = %e, "sensor read failed");
                    }
                }
            }

            driver.close();
            tracing::debug!(sensor_id = %sensor_id, "sensor closed");
        });

        tracing::info!(
            sensor_id = %spec.id,
            sensor_type = %spec.sensor_type,
            interval_secs = interval.as_secs_f64(),
            "sampling started"
        );

        Ok(Self {
            sensor_id: spec.id.clone(),
            slots,
            worker,
        })
    }

    #[must_use]
    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    /// Shared view of this sensor's latest state
    #[must_use]
    pub fn slots(&self) -> SensorSlots {
        self.slots.clone()
    }

    /// Stop sampling; the driver is closed when this returns
    pub async fn stop(self) {
        self.worker.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::events::{EventHub, MeshEvent};
    use crate::gateway::Route;

    struct Probe {
        value: f64,
        fail_init: bool,
        reads: Arc<AtomicU32>,
        closed: Arc<AtomicBool>,
    }

    impl SensorDriver for Probe {
        fn initialize(&mut self) -> Result<()> {
            if self.fail_init {
                return Err(Error::Driver("no such device".to_string()));
            }
            Ok(())
        }

        fn read(&mut self) -> Result<f64> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.value)
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn spec(interval: f64, warning: Option<WarningBand>) -> SensorSpec {
        SensorSpec {
            sensor_type: "probe".to_string(),
            id: "S1".to_string(),
            description: String::new(),
            config: serde_json::Map::new(),
            interval,
            warning,
        }
    }

    fn probe(value: f64, fail_init: bool) -> (Box<Probe>, Arc<AtomicU32>, Arc<AtomicBool>) {
        let reads = Arc::new(AtomicU32::new(0));
        let closed = Arc::new(AtomicBool::new(false));
        let driver = Box::new(Probe {
            value,
            fail_init,
            reads: reads.clone(),
            closed: closed.clone(),
        });
        (driver, reads, closed)
    }

    #[tokio::test(start_paused = true)]
    async fn samples_on_interval_and_closes_on_stop() {
        let hub = EventHub::new();
        let mut events = hub.subscribe("test");
        let gateway = Arc::new(ForwardingGateway::new(Vec::new(), Route::Hub(hub)));
        let (driver, reads, closed) = probe(7.0, false);

        let worker = SamplingWorker::start(&spec(5.0, None), driver, "N1", gateway).unwrap();
        assert_eq!(
            worker.slots().latest().unwrap().origin_tier_id.as_deref(),
            Some("N1")
        );

        tokio::time::sleep(Duration::from_secs(12)).await;
        worker.stop().await;

        assert_eq!(reads.load(Ordering::SeqCst), 3);
        assert!(closed.load(Ordering::SeqCst));
        assert!(matches!(events.recv().await, Some(MeshEvent::Reading(r)) if r.sensor_id == "S1"));
    }

    struct ThreadRecorder(Arc<parking_lot::Mutex<Vec<std::thread::ThreadId>>>);

    impl SensorDriver for ThreadRecorder {
        fn read(&mut self) -> Result<f64> {
            self.0.lock().push(std::thread::current().id());
            Ok(1.0)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_reads_run_on_blocking_pool() {
        let threads = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let gateway = Arc::new(ForwardingGateway::new(
            Vec::new(),
            Route::Hub(EventHub::new()),
        ));
        let driver = Box::new(ThreadRecorder(threads.clone()));

        let worker = SamplingWorker::start(&spec(5.0, None), driver, "N1", gateway).unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        worker.stop().await;

        // First sample inline, the next one on a blocking thread
        let here = std::thread::current().id();
        let threads = threads.lock().clone();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0], here);
        assert_ne!(threads[1], here);
    }

    #[tokio::test]
    async fn failed_initialize_closes_driver() {
        let gateway = Arc::new(ForwardingGateway::new(
            Vec::new(),
            Route::Hub(EventHub::new()),
        ));
        let (driver, reads, closed) = probe(1.0, true);

        let err = SamplingWorker::start(&spec(1.0, None), driver, "N1", gateway).unwrap_err();
        assert!(matches!(err, Error::Driver(msg) if msg.contains("S1")));
        assert_eq!(reads.load(Ordering::SeqCst), 0);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn out_of_band_reading_sets_warning() {
        let gateway = Arc::new(ForwardingGateway::new(
            Vec::new(),
            Route::Hub(EventHub::new()),
        ));
        let band = WarningBand {
            above: Some(90.0),
            below: None,
        };
        let (driver, _, _) = probe(95.0, false);

        let worker = SamplingWorker::start(&spec(60.0, Some(band)), driver, "N1", gateway).unwrap();
        let warning = worker.slots().warning().unwrap();
        assert!(warning.message.contains("above 90"));
        assert_eq!(warning.reading.sensor_id, "S1");
        worker.stop().await;
    }
}
