use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use fmi::fmi3::{Fmi3Error, Fmi3Status, LoggerCallback, ValueReference};

use crate::{
    fmi3::{traits::ModelLoggingCategory, UserModel},
    store::{Store, StoreError, StoreValue},
};

/// The environment a model computes in: the variable store, the experiment times and the
/// logger of the instance.
pub struct ModelContext<M: UserModel> {
    instance_name: String,
    /// Map of logging categories to their enabled state.
    logging_on: BTreeMap<M::LoggingCategory, bool>,
    /// Callback for logging messages.
    logger: LoggerCallback,
    /// Path to the resources directory.
    resource_path: Option<PathBuf>,
    start_time: f64,
    stop_time: Option<f64>,
    tolerance: Option<f64>,
    /// Current simulation time, mirrored in the store at value reference 0.
    time: f64,
    store: Store,
}

impl<M: UserModel> Clone for ModelContext<M> {
    fn clone(&self) -> Self {
        Self {
            instance_name: self.instance_name.clone(),
            logging_on: self.logging_on.clone(),
            logger: self.logger.clone(),
            resource_path: self.resource_path.clone(),
            start_time: self.start_time,
            stop_time: self.stop_time,
            tolerance: self.tolerance,
            time: self.time,
            store: self.store.clone(),
        }
    }
}

impl<M: UserModel> ModelContext<M> {
    pub(crate) fn new(
        instance_name: String,
        logging_on: bool,
        logger: LoggerCallback,
        resource_path: Option<PathBuf>,
        store: Store,
    ) -> Self {
        let logging_on = M::LoggingCategory::all_categories()
            .map(|category| (category, logging_on))
            .collect();
        Self {
            instance_name,
            logging_on,
            logger,
            resource_path,
            start_time: 0.0,
            stop_time: None,
            tolerance: None,
            time: 0.0,
            store,
        }
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub fn logging_on(&self, category: M::LoggingCategory) -> bool {
        matches!(self.logging_on.get(&category), Some(true))
    }

    pub(crate) fn set_logging(&mut self, category: M::LoggingCategory, enabled: bool) {
        self.logging_on.insert(category, enabled);
    }

    /// Log a message if the specified logging category is enabled.
    pub fn log(&self, status: impl Into<Fmi3Status>, category: M::LoggingCategory, args: std::fmt::Arguments<'_>) {
        if self.logging_on(category) {
            let message = args.to_string();
            (self.logger)(&self.instance_name, status.into(), &category.to_string(), &message);
        }
    }

    /// Get the path to the resources directory.
    pub fn resource_path(&self) -> Option<&Path> {
        self.resource_path.as_deref()
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn stop_time(&self) -> Option<f64> {
        self.stop_time
    }

    pub fn tolerance(&self) -> Option<f64> {
        self.tolerance
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub(crate) fn setup(&mut self, tolerance: Option<f64>, start_time: f64, stop_time: Option<f64>) {
        self.tolerance = tolerance;
        self.start_time = start_time;
        self.stop_time = stop_time;
        self.set_time(start_time);
    }

    pub(crate) fn set_time(&mut self, time: f64) {
        self.time = time;
        // value reference 0 is always the Float64 time variable
        let _ = self.store.set(0, time);
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    /// Take over time and variable values from `other`, keeping the logging setup.
    pub(crate) fn adopt_values(&mut self, other: ModelContext<M>) {
        self.time = other.time;
        self.store = other.store;
    }

    /// Restore values and experiment times captured in a snapshot.
    pub(crate) fn restore_values(
        &mut self,
        store: &Store,
        time: f64,
        start_time: f64,
        stop_time: Option<f64>,
        tolerance: Option<f64>,
    ) {
        self.store = store.clone();
        self.time = time;
        self.start_time = start_time;
        self.stop_time = stop_time;
        self.tolerance = tolerance;
    }

    /// Read the first element of a variable.
    pub fn get<T: StoreValue>(&self, vr: ValueReference) -> Result<T, Fmi3Error> {
        self.store.get(vr).map_err(|e| self.store_error(e))
    }

    /// Write the first element of a variable.
    pub fn set<T: StoreValue>(&mut self, vr: ValueReference, value: T) -> Result<(), Fmi3Error> {
        self.store.set(vr, value).map_err(|e| self.store_error(e))
    }

    /// All elements of an array variable.
    pub fn slice<T: StoreValue>(&self, vr: ValueReference) -> Result<&[T], Fmi3Error> {
        self.store.slice(vr).map_err(|e| self.store_error(e))
    }

    pub fn slice_mut<T: StoreValue>(&mut self, vr: ValueReference) -> Result<&mut [T], Fmi3Error> {
        if let Err(e) = self.store.slice::<T>(vr) {
            return Err(self.store_error(e));
        }
        self.store.slice_mut(vr).map_err(|_| Fmi3Error::Error)
    }

    pub(crate) fn store_error(&self, err: StoreError) -> Fmi3Error {
        self.log(
            Fmi3Error::Error,
            M::LoggingCategory::error_category(),
            format_args!("{err}"),
        );
        Fmi3Error::Error
    }
}
