// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Driver registry and event dispatcher.
//!
//! [`Log`] owns the registered drivers and forwards every event to all of
//! them. Dispatch never waits on a driver and never stops at a failing one.
//!
//! Each driver is served by one worker task that takes commands off a
//! channel one at a time. Events therefore reach a driver in call order,
//! and a flush runs only after every event logged before it. Each command
//! carries a reply channel; [`Dispatch`] collects the replies and callers
//! are free to drop it.

use serde_json::Value;
use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::config::LogConfig;
use crate::context::ExecutionContext;
use crate::driver::console::{ConsoleDriver, Stream};
use crate::driver::error_tracking::{ErrorTrackingDriver, Variant};
use crate::driver::rum_queue::{RumQueueConfig, RumQueueDriver};
use crate::driver::{Ack, Driver};
use crate::error::Error;
use crate::level::Level;
use crate::message::{Context, Message};

const KNOWN_DRIVERS: &str = "[Console, Raven, Sentry, Rum]";

/// Result reported by one driver for one event or flush.
#[derive(Debug)]
pub struct DriverOutcome {
    pub driver: &'static str,
    pub result: Result<Option<Ack>, Error>,
}

type DriverResult = Result<Option<Ack>, Error>;

enum DriverCommand {
    Log {
        message: Arc<Message>,
        level: Level,
        context: Arc<Context>,
        response_tx: oneshot::Sender<DriverResult>,
    },
    Flush(oneshot::Sender<DriverResult>),
}

/// Pending replies for one event or flush, one per driver.
///
/// Dropping the handle does not cancel delivery.
#[derive(Debug, Default)]
#[must_use = "drop the Dispatch to fire and forget, or await outcomes()"]
pub struct Dispatch {
    replies: Vec<(&'static str, oneshot::Receiver<DriverResult>)>,
}

impl Dispatch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.replies.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.replies.is_empty()
    }

    /// Waits for every driver and returns their outcomes in registry order.
    pub async fn outcomes(self) -> Vec<DriverOutcome> {
        let mut outcomes = Vec::with_capacity(self.replies.len());
        for (driver, response_rx) in self.replies {
            let result = match response_rx.await {
                Ok(result) => result,
                Err(e) => Err(Error::DriverTask(format!(
                    "{driver} worker stopped before replying: {e}"
                ))),
            };
            outcomes.push(DriverOutcome { driver, result });
        }
        outcomes
    }
}

/// A registered driver and the channel to its worker, started on first use.
struct Registration {
    driver: Arc<dyn Driver>,
    worker: Mutex<Option<mpsc::UnboundedSender<DriverCommand>>>,
}

impl Registration {
    fn new(driver: Arc<dyn Driver>) -> Self {
        Registration {
            driver,
            worker: Mutex::new(None),
        }
    }

    /// Queues `command` behind everything sent before it. A worker whose
    /// runtime has shut down is replaced on `runtime`.
    fn submit(&self, runtime: &Handle, command: DriverCommand) {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if !matches!(worker.as_ref(), Some(tx) if !tx.is_closed()) {
            let (tx, rx) = mpsc::unbounded_channel();
            runtime.spawn(run_worker(Arc::clone(&self.driver), rx));
            *worker = Some(tx);
        }
        let sent = worker.as_ref().is_some_and(|tx| tx.send(command).is_ok());
        if !sent {
            error!("LOG | {} driver worker is gone, dropping command", self.driver.name());
        }
    }
}

async fn run_worker(driver: Arc<dyn Driver>, mut rx: mpsc::UnboundedReceiver<DriverCommand>) {
    debug!("LOG | {} driver worker started", driver.name());

    while let Some(command) = rx.recv().await {
        match command {
            DriverCommand::Log {
                message,
                level,
                context,
                response_tx,
            } => {
                let result = driver.log(&message, level, &context).await;
                if let Err(e) = &result {
                    error!("LOG | {} driver failed: {e}", driver.name());
                }
                // The caller may have dropped its Dispatch.
                let _ = response_tx.send(result);
            }
            DriverCommand::Flush(response_tx) => {
                let _ = response_tx.send(driver.flush().await);
            }
        }
    }

    debug!("LOG | {} driver worker stopped", driver.name());
}

/// Logging manager: a set of drivers that all receive every event.
pub struct Log {
    execution_context: ExecutionContext,
    drivers: Vec<Registration>,
}

impl Log {
    #[must_use]
    pub fn new(execution_context: ExecutionContext) -> Self {
        Log {
            execution_context,
            drivers: Vec::new(),
        }
    }

    /// Creates a manager and registers each `type name -> arguments` entry of
    /// `drivers`, a JSON object.
    pub fn with_drivers(execution_context: ExecutionContext, drivers: &Value) -> Result<Self, Error> {
        let mut log = Log::new(execution_context);
        log.register_all(drivers)?;
        Ok(log)
    }

    /// Builds a manager from environment-derived configuration.
    pub fn from_config(config: &LogConfig) -> Result<Self, Error> {
        config.validate()?;
        let mut log = Log::new(config.execution_context);

        if config.console {
            log.register(Arc::new(ConsoleDriver::new(config.console_stream)));
        }
        if let Some(dsn) = &config.sentry_dsn {
            let driver = ErrorTrackingDriver::new(dsn, log.error_tracking_variant())?;
            log.register(Arc::new(driver));
        }
        if let Some(queue_url) = &config.rum_queue_url {
            let mut rum = RumQueueConfig::new(queue_url.clone(), config.rum_enabled);
            rum.batch_size = config.rum_batch_size;
            rum.timeout = config.rum_timeout;
            rum.flush_failure_policy = config.rum_flush_failure_policy;
            rum.max_retained = config.rum_max_retained;
            rum.endpoint = config.rum_endpoint.clone();
            log.register(Arc::new(RumQueueDriver::new(rum, config.execution_context)?));
        }

        debug!("LOG | Configured {} drivers", log.len());
        Ok(log)
    }

    /// Registers the drivers listed in the kernel configuration.
    ///
    /// Drivers are read from `globals.logDrivers`, or from a top-level
    /// `logDrivers` when the document has no `globals` section. A missing
    /// map registers nothing.
    pub fn boot(&mut self, kernel_config: &Value) -> Result<(), Error> {
        let globals = kernel_config.get("globals").unwrap_or(kernel_config);
        match globals.get("logDrivers") {
            None | Some(Value::Null) => {
                debug!("LOG | No log drivers configured");
                Ok(())
            }
            Some(drivers) => {
                self.register_all(drivers)?;
                info!("LOG | Booted with {} drivers", self.len());
                Ok(())
            }
        }
    }

    fn register_all(&mut self, drivers: &Value) -> Result<(), Error> {
        let Value::Object(drivers) = drivers else {
            return Err(Error::InvalidConfig(format!(
                "log drivers must be an object of name to arguments, got {drivers}"
            )));
        };
        for (type_name, args) in drivers {
            self.register_type(type_name, args)?;
        }
        Ok(())
    }

    /// Builds a driver from its type name, case-insensitively.
    ///
    /// - `console`: optional `{"stream": "auto" | "stdout" | "stderr"}`
    /// - `raven`, `sentry`: `{"dsn": "..."}`; the browser variant in a
    ///   frontend context, the server variant otherwise
    /// - `rum`, `sqs`: see [`RumQueueConfig::from_args`]
    pub fn create(&self, type_name: &str, args: &Value) -> Result<Arc<dyn Driver>, Error> {
        let driver: Arc<dyn Driver> = match type_name.to_lowercase().as_str() {
            "console" => {
                let stream = match args.get("stream").and_then(Value::as_str) {
                    Some(stream) => stream
                        .parse::<Stream>()
                        .map_err(|e| Error::invalid_argument(e, "auto, stdout or stderr"))?,
                    None => Stream::default(),
                };
                Arc::new(ConsoleDriver::new(stream))
            }
            "raven" | "sentry" => {
                let dsn = args
                    .get("dsn")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::invalid_argument(args.to_string(), r#"{"dsn": <string>}"#))?;
                Arc::new(ErrorTrackingDriver::new(dsn, self.error_tracking_variant())?)
            }
            "rum" | "sqs" => Arc::new(RumQueueDriver::new(
                RumQueueConfig::from_args(args)?,
                self.execution_context,
            )?),
            _ => return Err(Error::invalid_argument(type_name, KNOWN_DRIVERS)),
        };
        Ok(driver)
    }

    /// Adds a driver. Registering the same instance twice has no effect.
    pub fn register(&mut self, driver: Arc<dyn Driver>) -> &mut Self {
        let already_registered = self.drivers.iter().any(|known| {
            Arc::as_ptr(&known.driver) as *const () == Arc::as_ptr(&driver) as *const ()
        });
        if !already_registered {
            self.drivers.push(Registration::new(driver));
        }
        self
    }

    /// Creates a driver with [`Log::create`] and registers it.
    pub fn register_type(&mut self, type_name: &str, args: &Value) -> Result<&mut Self, Error> {
        let driver = self.create(type_name, args)?;
        Ok(self.register(driver))
    }

    /// Registers a dynamically typed candidate, which must be an
    /// `Arc<dyn Driver>`.
    pub fn register_object(&mut self, candidate: Box<dyn Any + Send + Sync>) -> Result<&mut Self, Error> {
        match candidate.downcast::<Arc<dyn Driver>>() {
            Ok(driver) => Ok(self.register(*driver)),
            Err(_) => Err(Error::invalid_argument("object not implementing Driver", "Driver")),
        }
    }

    #[must_use]
    pub fn drivers(&self) -> impl Iterator<Item = &Arc<dyn Driver>> + '_ {
        self.drivers.iter().map(|registration| &registration.driver)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    #[must_use]
    pub fn execution_context(&self) -> ExecutionContext {
        self.execution_context
    }

    /// Sends one event to every registered driver and returns immediately.
    ///
    /// Must be called from within a Tokio runtime; otherwise no driver runs
    /// and the returned [`Dispatch`] is empty.
    pub fn log(&self, message: impl Into<Message>, level: Level, context: Context) -> Dispatch {
        let Ok(runtime) = Handle::try_current() else {
            error!("LOG | Dropping event: no async runtime to dispatch on");
            return Dispatch::default();
        };

        let message = Arc::new(message.into());
        let context = Arc::new(context);
        self.dispatch(&runtime, |response_tx| DriverCommand::Log {
            message: Arc::clone(&message),
            level,
            context: Arc::clone(&context),
            response_tx,
        })
    }

    /// [`Log::log`] at `info` level with an empty context.
    pub fn log_default(&self, message: impl Into<Message>) -> Dispatch {
        self.log(message, Level::default(), Context::new())
    }

    /// Flushes every driver and waits for all of them.
    ///
    /// Each driver flushes after handling every event logged before this
    /// call; drivers flush concurrently with each other.
    pub async fn flush(&self) -> Vec<DriverOutcome> {
        let Ok(runtime) = Handle::try_current() else {
            error!("LOG | Cannot flush: no async runtime to dispatch on");
            return Vec::new();
        };

        let outcomes = self.dispatch(&runtime, DriverCommand::Flush).outcomes().await;
        for outcome in &outcomes {
            if let Err(e) = &outcome.result {
                error!("LOG | Failed to flush {} driver: {e}", outcome.driver);
            }
        }
        outcomes
    }

    fn dispatch<F>(&self, runtime: &Handle, command: F) -> Dispatch
    where
        F: Fn(oneshot::Sender<DriverResult>) -> DriverCommand,
    {
        let replies = self
            .drivers
            .iter()
            .map(|registration| {
                let (response_tx, response_rx) = oneshot::channel();
                registration.submit(runtime, command(response_tx));
                (registration.driver.name(), response_rx)
            })
            .collect();
        Dispatch { replies }
    }

    fn error_tracking_variant(&self) -> Variant {
        if self.execution_context.is_frontend {
            Variant::Browser
        } else {
            Variant::Server
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    type Calls = Arc<Mutex<Vec<(Message, Level, Context)>>>;

    struct RecordingDriver {
        calls: Calls,
        fail: bool,
        flushes: Arc<Mutex<usize>>,
    }

    impl RecordingDriver {
        fn new(fail: bool) -> (Arc<Self>, Calls) {
            let calls = Calls::default();
            let driver = Arc::new(RecordingDriver {
                calls: Arc::clone(&calls),
                fail,
                flushes: Arc::default(),
            });
            (driver, calls)
        }
    }

    #[async_trait]
    impl Driver for RecordingDriver {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn log(
            &self,
            message: &Message,
            level: Level,
            context: &Context,
        ) -> Result<Option<Ack>, Error> {
            self.calls
                .lock()
                .unwrap()
                .push((message.clone(), level, context.clone()));
            if self.fail {
                return Err(Error::ErrorTracking("unreachable".to_string()));
            }
            Ok(None)
        }

        async fn flush(&self) -> Result<Option<Ack>, Error> {
            *self.flushes.lock().unwrap() += 1;
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_log_fans_out_to_every_driver() {
        let (failing, failing_calls) = RecordingDriver::new(true);
        let (healthy, healthy_calls) = RecordingDriver::new(false);

        let mut log = Log::new(ExecutionContext::backend());
        log.register(failing).register(healthy);

        let outcomes = log.log("x", Level::Error, Context::new()).outcomes().await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].result.is_err());
        assert!(outcomes[1].result.is_ok());

        let expected = vec![(Message::from("x"), Level::Error, Context::new())];
        assert_eq!(*failing_calls.lock().unwrap(), expected);
        assert_eq!(*healthy_calls.lock().unwrap(), expected);
    }

    #[derive(Default)]
    struct SequenceDriver {
        seen: Mutex<Vec<u64>>,
        seen_at_flush: Mutex<Option<usize>>,
    }

    #[async_trait]
    impl Driver for SequenceDriver {
        fn name(&self) -> &'static str {
            "sequence"
        }

        async fn log(
            &self,
            message: &Message,
            _level: Level,
            _context: &Context,
        ) -> Result<Option<Ack>, Error> {
            let Message::Text(text) = message else {
                return Err(Error::invalid_argument(format!("{message:?}"), "a number"));
            };
            let n: u64 = text.parse().map_err(|_| Error::invalid_argument(text, "a number"))?;
            for _ in 0..(n % 4) {
                tokio::task::yield_now().await;
            }
            self.seen.lock().unwrap().push(n);
            Ok(None)
        }

        async fn flush(&self) -> Result<Option<Ack>, Error> {
            *self.seen_at_flush.lock().unwrap() = Some(self.seen.lock().unwrap().len());
            Ok(None)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_events_reach_driver_in_call_order() {
        let driver = Arc::new(SequenceDriver::default());
        let mut log = Log::new(ExecutionContext::backend());
        log.register(Arc::clone(&driver) as Arc<dyn Driver>);

        for i in 0..50u64 {
            let _ = log.log(i.to_string(), Level::Info, Context::new());
        }
        let outcomes = log.flush().await;

        assert!(outcomes[0].result.is_ok());
        assert_eq!(*driver.seen.lock().unwrap(), (0..50).collect::<Vec<u64>>());
        assert_eq!(*driver.seen_at_flush.lock().unwrap(), Some(50));
    }

    #[test]
    fn test_worker_restarts_on_a_new_runtime() {
        let (driver, calls) = RecordingDriver::new(false);
        let mut log = Log::new(ExecutionContext::backend());
        log.register(driver);

        for _ in 0..2 {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();
            let outcomes = runtime.block_on(async { log.log_default("x").outcomes().await });
            assert!(outcomes[0].result.is_ok());
        }
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_log_default_uses_info_and_empty_context() {
        let (driver, calls) = RecordingDriver::new(false);
        let mut log = Log::new(ExecutionContext::default());
        log.register(driver);

        log.log_default(json!({"a": 1})).outcomes().await;

        let calls = calls.lock().unwrap();
        assert_eq!(calls[0].1, Level::Info);
        assert!(calls[0].2.is_empty());
        assert_eq!(calls[0].0, Message::Structured(json!({"a": 1})));
    }

    #[test]
    fn test_log_without_runtime_dispatches_nothing() {
        let (driver, calls) = RecordingDriver::new(false);
        let mut log = Log::new(ExecutionContext::backend());
        log.register(driver);

        let dispatch = log.log("x", Level::Info, Context::new());
        assert!(dispatch.is_empty());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_register_ignores_same_instance() {
        let (driver, _) = RecordingDriver::new(false);
        let (other, _) = RecordingDriver::new(false);

        let mut log = Log::new(ExecutionContext::backend());
        log.register(driver.clone())
            .register(driver)
            .register(other);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_register_object_requires_driver() {
        let mut log = Log::new(ExecutionContext::backend());

        let error = log
            .register_object(Box::new("not a driver".to_string()))
            .err()
            .unwrap();
        assert!(matches!(
            error,
            Error::InvalidArgument { ref expected, .. } if expected == "Driver"
        ));
        assert!(log.is_empty());

        let (driver, _) = RecordingDriver::new(false);
        let driver: Arc<dyn Driver> = driver;
        log.register_object(Box::new(driver)).unwrap();
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_create_unknown_type_lists_known_drivers() {
        let log = Log::new(ExecutionContext::backend());
        match log.create("syslog", &json!({})) {
            Err(Error::InvalidArgument { got, expected }) => {
                assert_eq!(got, "syslog");
                assert_eq!(expected, KNOWN_DRIVERS);
            }
            other => panic!("unexpected result {:?}", other.map(|d| d.name())),
        }
    }

    #[test]
    fn test_create_is_case_insensitive() {
        let log = Log::new(ExecutionContext::backend());
        assert_eq!(log.create("CONSOLE", &json!({})).unwrap().name(), "console");
        assert_eq!(
            log.create("Raven", &json!({"dsn": "https://key@sentry.example.com/1"}))
                .unwrap()
                .name(),
            "sentry"
        );
    }

    #[test]
    fn test_create_sentry_requires_dsn() {
        let log = Log::new(ExecutionContext::backend());
        assert!(matches!(
            log.create("sentry", &json!({})),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_error_tracking_variant_follows_context() {
        assert_eq!(
            Log::new(ExecutionContext::frontend()).error_tracking_variant(),
            Variant::Browser
        );
        assert_eq!(
            Log::new(ExecutionContext::backend()).error_tracking_variant(),
            Variant::Server
        );
    }

    #[test]
    fn test_create_rum_rejects_queue_url_without_region() {
        let log = Log::new(ExecutionContext::backend());
        assert!(matches!(
            log.create("rum", &json!({"queue_url": "http://localhost/q", "enabled": true})),
            Err(Error::InvalidQueueUrl { .. })
        ));
    }

    #[test]
    fn test_boot_reads_globals() {
        let mut log = Log::new(ExecutionContext::backend());
        log.boot(&json!({
            "globals": {
                "logDrivers": {
                    "console": {},
                    "sentry": {"dsn": "https://key@sentry.example.com/1"},
                    "rum": {
                        "queue_url": "https://sqs.us-east-1.amazonaws.com/1/rum",
                        "enabled": false
                    }
                }
            }
        }))
        .unwrap();
        let names: Vec<&str> = log.drivers().map(|d| d.name()).collect();
        assert_eq!(names.len(), 3);
        for name in ["console", "sentry", "rum"] {
            assert!(names.contains(&name));
        }
    }

    #[test]
    fn test_boot_without_globals_and_without_drivers() {
        let mut log = Log::new(ExecutionContext::backend());
        log.boot(&json!({"logDrivers": {"console": {}}})).unwrap();
        assert_eq!(log.len(), 1);

        let mut empty = Log::new(ExecutionContext::backend());
        empty.boot(&json!({"globals": {}})).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_boot_fails_fast_on_unknown_driver() {
        let mut log = Log::new(ExecutionContext::backend());
        assert!(log
            .boot(&json!({"logDrivers": {"carrier-pigeon": {}}}))
            .is_err());
        assert!(matches!(
            Log::with_drivers(ExecutionContext::backend(), &json!(["console"])),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_flush_reaches_every_driver() {
        let (first, _) = RecordingDriver::new(false);
        let (second, _) = RecordingDriver::new(false);
        let first_flushes = Arc::clone(&first.flushes);
        let second_flushes = Arc::clone(&second.flushes);

        let mut log = Log::new(ExecutionContext::backend());
        log.register(first).register(second);

        let outcomes = log.flush().await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(*first_flushes.lock().unwrap(), 1);
        assert_eq!(*second_flushes.lock().unwrap(), 1);
    }
}
