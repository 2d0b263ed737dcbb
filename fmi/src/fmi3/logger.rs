use std::sync::Arc;

use super::Fmi3Status;

/// Logger callback: `(instance_name, status, category, message)`.
pub type LoggerCallback = Arc<dyn Fn(&str, Fmi3Status, &str, &str) + Send + Sync>;

/// Completion sink for asynchronous steps: `(instance_name, status)`.
pub type StepFinishedCallback = Arc<dyn Fn(&str, Fmi3Status) + Send + Sync>;

/// Callbacks injected into a unit at instantiation (`fmi3CallbackFunctions`).
///
/// Memory management callbacks are not needed in Rust and are not part of the bundle.
#[derive(Clone)]
pub struct CallbackFunctions {
    /// Receives every log message the unit emits for an enabled category.
    pub logger: LoggerCallback,
    /// When present, the unit may run `do_step` asynchronously and calls this when done.
    pub step_finished: Option<StepFinishedCallback>,
}

impl Default for CallbackFunctions {
    fn default() -> Self {
        Self {
            logger: Arc::new(log_to_facade),
            step_finished: None,
        }
    }
}

impl std::fmt::Debug for CallbackFunctions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackFunctions")
            .field("step_finished", &self.step_finished.is_some())
            .finish_non_exhaustive()
    }
}

impl CallbackFunctions {
    /// Use a custom logger callback.
    pub fn with_logger<F>(mut self, logger: F) -> Self
    where
        F: Fn(&str, Fmi3Status, &str, &str) + Send + Sync + 'static,
    {
        self.logger = Arc::new(logger);
        self
    }

    /// Enable asynchronous steps, reporting completion to `step_finished`.
    pub fn with_step_finished<F>(mut self, step_finished: F) -> Self
    where
        F: Fn(&str, Fmi3Status) + Send + Sync + 'static,
    {
        self.step_finished = Some(Arc::new(step_finished));
        self
    }
}

/// Default logger, forwarding unit messages to the `log` facade with the category as target.
pub fn log_to_facade(instance_name: &str, status: Fmi3Status, category: &str, message: &str) {
    let level = match status {
        Fmi3Status::OK | Fmi3Status::Pending => log::Level::Info,
        Fmi3Status::Warning => log::Level::Warn,
        Fmi3Status::Discard => log::Level::Warn,
        Fmi3Status::Error => log::Level::Error,
        Fmi3Status::Fatal => log::Level::Error,
    };

    log::logger().log(
        &log::Record::builder()
            .args(format_args!("[{instance_name}] {message}"))
            .level(level)
            .module_path(Some("fmu"))
            .target(category)
            .build(),
    );
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test_log::test]
    fn custom_logger_receives_messages() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callbacks = CallbackFunctions::default().with_logger(move |inst, status, cat, msg| {
            sink.lock()
                .unwrap()
                .push(format!("{inst}:{status}:{cat}:{msg}"));
        });
        (callbacks.logger)("inst1", Fmi3Status::Warning, "logEvents", "hello");
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            ["inst1:Warning:logEvents:hello"]
        );
        assert!(callbacks.step_finished.is_none());

        // the default forwards to `log` and must not panic without a logger installed
        log_to_facade("inst1", Fmi3Status::Error, "logStatusError", "boom");
    }
}
