//! Tracks which experiment is active, sends its parameters, starts and stops
//! runs, and routes telemetry frames into the data point buffers.
//!
//! ```text
//! Idle --set_experiment--> Configured --run_experiment--> Running
//!                               ^                            |
//!                               +------stop_experiment-------+
//! ```
//!
//! Inbound frames are dispatched on the connection's receive thread through
//! the [`FrameSink`] returned by [`ExperimentInteractor::frame_sink`]. The
//! dispatch table is behind a read-write lock; the receive thread only ever
//! reads it, and it is only replaced when an experiment or measurement is
//! loaded.

use crate::connection::{ConnectionError, FrameSender, FrameSink};
use crate::data_point_buffer::{DataPointBuffer, Sample};
use crate::experiment_file::ExperimentDefinition;
use crate::experiment_module::{DecodedFrame, ExperimentModule, ModuleRegistry, OrderedMap};
use crate::frame_codec::{EncodeError, Frame};

use log::{debug, info, trace, warn};
use std::{
    borrow::Cow,
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

/// Id of the frame that starts (`[1]`) and stops (`[0]`) a run on the bench.
pub const EXPERIMENT_CONTROL_ID: u8 = 1;

/// Default number of samples kept per data point.
pub const DEFAULT_INTERPOLATION_POINTS: usize = 10000;

/// Where the interactor is in the experiment lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractorState {
    /// No experiment selected.
    Idle,
    /// An experiment is selected but not running.
    Configured,
    /// Telemetry is being recorded.
    Running,
}

/// Problems with an experiment definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// The definition names a module nobody registered.
    UnknownModule(String),
    /// The definition lists the same module twice.
    DuplicateModule(String),
    /// Two modules of the definition declare the same data point.
    DuplicateDataPoint(String),
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigurationError::UnknownModule(name) => write!(f, "unknown module {:?}", name),
            ConfigurationError::DuplicateModule(name) => {
                write!(f, "module {:?} is listed more than once", name)
            }
            ConfigurationError::DuplicateDataPoint(name) => {
                write!(f, "data point {:?} is declared by more than one module", name)
            }
        }
    }
}

/// Everything the interactor can refuse to do.
#[derive(Debug)]
pub enum InteractorError {
    /// The experiment definition is not usable.
    Configuration(ConfigurationError),
    /// The operation is not allowed in the current state.
    InvalidState {
        /// What was attempted.
        operation: &'static str,
        /// The state it was attempted in.
        state: InteractorState,
    },
    /// The operation needs a connected link.
    NotConnected,
    /// There is no measurement with that index.
    NoMeasurement(usize),
    /// Fewer than two interpolation points were requested.
    InvalidInterpolationPoints(usize),
    /// A module could not build its parameter frame.
    Encode(EncodeError),
    /// The link failed while sending.
    Connection(ConnectionError),
}

impl fmt::Display for InteractorError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use InteractorError as IE;
        let msg = match self {
            IE::Configuration(e) => Cow::from(format!("invalid experiment: {}", e)),
            IE::InvalidState { operation, state } => {
                Cow::from(format!("cannot {} while {:?}", operation, state))
            }
            IE::NotConnected => Cow::from("no connected link"),
            IE::NoMeasurement(idx) => Cow::from(format!("no measurement #{}", idx)),
            IE::InvalidInterpolationPoints(n) => Cow::from(format!(
                "need at least 2 interpolation points, got {}",
                n
            )),
            IE::Encode(e) => Cow::from(format!("encoding parameters failed: {}", e)),
            IE::Connection(e) => Cow::from(format!("sending failed: {}", e)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for InteractorError {}

impl From<ConfigurationError> for InteractorError {
    fn from(e: ConfigurationError) -> Self {
        InteractorError::Configuration(e)
    }
}

impl From<EncodeError> for InteractorError {
    fn from(e: EncodeError) -> Self {
        InteractorError::Encode(e)
    }
}

impl From<ConnectionError> for InteractorError {
    fn from(e: ConnectionError) -> Self {
        match e {
            ConnectionError::NotConnected => InteractorError::NotConnected,
            other => InteractorError::Connection(other),
        }
    }
}

/// A finished run: the definition it ran with and what was recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// The experiment as it was configured for the run.
    pub definition: ExperimentDefinition,
    /// Samples per data point, in buffer order.
    pub data: OrderedMap<Vec<Sample>>,
}

/// One module and the buffers its frames feed.
struct Route {
    module: Arc<dyn ExperimentModule>,
    buffers: Vec<DataPointBuffer>,
}

/// The table the receive thread dispatches through.
#[derive(Default)]
struct Dispatch {
    routes: RwLock<Vec<Route>>,
}

impl Dispatch {
    fn replace(&self, routes: Vec<Route>) {
        *self.routes.write().unwrap_or_else(PoisonError::into_inner) = routes;
    }

    fn dispatch(&self, frame: &Frame) -> Option<DecodedFrame> {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        let Some(route) = routes.iter().find(|r| r.module.frame_id() == frame.id()) else {
            trace!("no module for frame id {}", frame.id());
            return None;
        };

        match route.module.decode_frame(frame.payload()) {
            Ok(decoded) => {
                for buffer in &route.buffers {
                    if let Some(&value) = decoded.points.get(buffer.name()) {
                        if !buffer.add_value(decoded.time, value) {
                            debug!(
                                "{}: dropping sample at {}s, older than the newest",
                                buffer.name(),
                                decoded.time
                            );
                        }
                    }
                }
                Some(decoded)
            }
            Err(e) => {
                warn!(
                    "{}: dropping frame {}: {}",
                    route.module.name(),
                    frame.id(),
                    e
                );
                None
            }
        }
    }
}

impl FrameSink for Dispatch {
    fn on_frame(&self, frame: &Frame) {
        self.dispatch(frame);
    }

    fn on_link_lost(&self, reason: &str) {
        warn!("no more telemetry, link lost: {}", reason);
    }
}

/// The experiment state machine. Owned by the control side; the receive
/// thread only sees the shared dispatch table.
pub struct ExperimentInteractor {
    registry: ModuleRegistry,
    state: InteractorState,
    active: Option<ExperimentDefinition>,
    modules: Vec<Arc<dyn ExperimentModule>>,
    buffers: Vec<DataPointBuffer>,
    dispatch: Arc<Dispatch>,
    link: Option<Arc<dyn FrameSender>>,
    interpolation_points: usize,
    measurements: Vec<Measurement>,
}

impl fmt::Debug for ExperimentInteractor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ExperimentInteractor")
            .field("state", &self.state)
            .field("active", &self.active.as_ref().map(|d| &d.name))
            .field("buffers", &self.buffers.len())
            .field("measurements", &self.measurements.len())
            .finish()
    }
}

impl Default for ExperimentInteractor {
    fn default() -> Self {
        Self::new(ModuleRegistry::with_builtin(), DEFAULT_INTERPOLATION_POINTS)
    }
}

impl ExperimentInteractor {
    /// An idle interactor choosing modules from `registry` and keeping
    /// `interpolation_points` samples per data point (at least 2).
    pub fn new(registry: ModuleRegistry, interpolation_points: usize) -> Self {
        ExperimentInteractor {
            registry,
            state: InteractorState::Idle,
            active: None,
            modules: Vec::new(),
            buffers: Vec::new(),
            dispatch: Arc::new(Dispatch::default()),
            link: None,
            interpolation_points: interpolation_points.max(2),
            measurements: Vec::new(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> InteractorState {
        self.state
    }

    /// The modules experiments can use.
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// The active experiment, settings normalized.
    pub fn active_experiment(&self) -> Option<&ExperimentDefinition> {
        self.active.as_ref()
    }

    /// Uses `link` for parameters and run control from now on. When a run
    /// is already going, the link's read gate is opened and the bench told
    /// to start, the same as [`ExperimentInteractor::run_experiment`] does.
    pub fn attach(&mut self, link: Arc<dyn FrameSender>) {
        let running = self.state == InteractorState::Running;
        link.set_do_read(running);
        self.link = Some(link);
        if running {
            self.send_control(true);
        }
    }

    /// Forgets the link, handing it back.
    pub fn detach(&mut self) -> Option<Arc<dyn FrameSender>> {
        self.link.take()
    }

    /// The callback to register with the connection so frames reach the
    /// buffers.
    pub fn frame_sink(&self) -> Arc<dyn FrameSink> {
        self.dispatch.clone()
    }

    fn require(
        &self,
        operation: &'static str,
        allowed: &[InteractorState],
    ) -> Result<(), InteractorError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(InteractorError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn resolve(
        &self,
        definition: &ExperimentDefinition,
    ) -> Result<Vec<Arc<dyn ExperimentModule>>, ConfigurationError> {
        let mut names: Vec<&str> = Vec::new();
        let mut points: Vec<String> = Vec::new();
        let mut modules = Vec::new();

        for name in definition.modules() {
            if names.contains(&name) {
                return Err(ConfigurationError::DuplicateModule(name.to_string()));
            }
            let module = self
                .registry
                .get(name)
                .ok_or_else(|| ConfigurationError::UnknownModule(name.to_string()))?;
            for point in module.data_points() {
                if points.contains(&point) {
                    return Err(ConfigurationError::DuplicateDataPoint(point));
                }
                points.push(point);
            }
            names.push(name);
            modules.push(module);
        }
        Ok(modules)
    }

    /// Makes `definition` the active experiment and sets up fresh buffers for
    /// its data points. Every module must be registered; if one is not, the
    /// current experiment stays as it was.
    pub fn set_experiment(&mut self, definition: &ExperimentDefinition) -> Result<(), InteractorError> {
        use InteractorState::*;
        self.require("change the experiment", &[Idle, Configured])?;

        let modules = self.resolve(definition)?;
        let normalized = ExperimentDefinition {
            name: definition.name.clone(),
            module_settings: modules
                .iter()
                .zip(definition.module_settings.values())
                .map(|(module, settings)| (module.name().to_string(), module.normalize_settings(settings)))
                .collect(),
        };

        self.install(normalized, modules, None);
        Ok(())
    }

    fn install(
        &mut self,
        definition: ExperimentDefinition,
        modules: Vec<Arc<dyn ExperimentModule>>,
        data: Option<&OrderedMap<Vec<Sample>>>,
    ) {
        let capacity = self.interpolation_points;
        let mut routes: Vec<Route> = Vec::with_capacity(modules.len());
        let mut buffers = Vec::new();

        for module in &modules {
            if let Some(earlier) = routes.iter().find(|r| r.module.frame_id() == module.frame_id()) {
                warn!(
                    "{} shares frame id {} with {}, which receives those frames",
                    module.name(),
                    module.frame_id(),
                    earlier.module.name()
                );
            }

            let own: Vec<_> = module
                .data_points()
                .iter()
                .map(|name| match data.and_then(|d| d.get(name)) {
                    Some(samples) => DataPointBuffer::from_samples(name, capacity, samples),
                    None => DataPointBuffer::new(name, capacity),
                })
                .collect();
            buffers.extend(own.iter().cloned());
            routes.push(Route {
                module: Arc::clone(module),
                buffers: own,
            });
        }

        self.dispatch.replace(routes);
        info!(
            "experiment {:?} configured with modules {:?}",
            definition.name,
            modules.iter().map(|m| m.name()).collect::<Vec<_>>()
        );
        self.buffers = buffers;
        self.modules = modules;
        self.active = Some(definition);
        self.state = InteractorState::Configured;
    }

    /// Names of the data points of the active experiment, `None` when idle.
    pub fn get_data_points(&self) -> Option<Vec<String>> {
        match self.state {
            InteractorState::Idle => None,
            _ => Some(self.buffers.iter().map(|b| b.name().to_string()).collect()),
        }
    }

    /// Buffers of the active experiment, in data point order.
    pub fn buffers(&self) -> &[DataPointBuffer] {
        &self.buffers
    }

    /// The buffer of one data point.
    pub fn buffer(&self, name: &str) -> Option<&DataPointBuffer> {
        self.buffers.iter().find(|b| b.name() == name)
    }

    fn connected_link(&self) -> Result<&Arc<dyn FrameSender>, InteractorError> {
        match &self.link {
            Some(link) if link.is_connected() => Ok(link),
            _ => Err(InteractorError::NotConnected),
        }
    }

    /// Encodes every module's settings and sends the resulting frames.
    pub fn send_parameter_experiment(&self) -> Result<(), InteractorError> {
        use InteractorState::*;
        self.require("send parameters", &[Configured, Running])?;
        let link = self.connected_link()?;
        let Some(definition) = &self.active else {
            return Err(InteractorError::InvalidState {
                operation: "send parameters",
                state: self.state,
            });
        };

        for (module, settings) in self.modules.iter().zip(definition.module_settings.values()) {
            let frame = module.encode_parameters(settings)?;
            link.send_frame(&frame)?;
            info!("{}: parameters sent as frame {}", module.name(), frame.id());
        }
        Ok(())
    }

    fn send_control(&self, run: bool) {
        let Some(link) = &self.link else {
            debug!("no link attached, not sending run control");
            return;
        };
        let sent = Frame::new(EXPERIMENT_CONTROL_ID, vec![run as u8])
            .map_err(InteractorError::from)
            .and_then(|frame| link.send_frame(&frame).map_err(InteractorError::from));
        if let Err(e) = sent {
            warn!("could not tell the bench to {}: {}", if run { "start" } else { "stop" }, e);
        }
    }

    /// Starts a run: clears the buffers, opens the read gate and tells the
    /// bench to start.
    pub fn run_experiment(&mut self) -> Result<(), InteractorError> {
        self.require("run", &[InteractorState::Configured])?;

        for buffer in &self.buffers {
            buffer.clear_buffer();
        }
        if let Some(link) = &self.link {
            link.set_do_read(true);
        }
        self.send_control(true);

        self.state = InteractorState::Running;
        info!("experiment running");
        Ok(())
    }

    /// Ends the run: closes the read gate, tells the bench to stop and keeps
    /// what was recorded as a [`Measurement`].
    pub fn stop_experiment(&mut self) -> Result<(), InteractorError> {
        self.require("stop", &[InteractorState::Running])?;

        if let Some(link) = &self.link {
            link.set_do_read(false);
        }
        self.send_control(false);
        if let Some(link) = &self.link {
            link.discard_pending();
        }

        if let Some(definition) = &self.active {
            self.measurements.push(Measurement {
                definition: definition.clone(),
                data: self
                    .buffers
                    .iter()
                    .map(|b| (b.name().to_string(), b.snapshot()))
                    .collect(),
            });
        }

        self.state = InteractorState::Configured;
        info!("experiment stopped, {} measurements kept", self.measurements.len());
        Ok(())
    }

    /// Routes one frame to the module that declared its id. Returns what the
    /// module decoded, or `None` for unknown ids and malformed payloads.
    pub fn handle_frame(&self, frame: &Frame) -> Option<DecodedFrame> {
        self.dispatch.dispatch(frame)
    }

    /// Runs recorded so far, oldest first.
    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    /// Makes a past measurement current again: its experiment becomes active
    /// and the buffers are replaced with its samples.
    pub fn load_measurement(&mut self, index: usize) -> Result<(), InteractorError> {
        use InteractorState::*;
        self.require("load a measurement", &[Idle, Configured])?;

        let measurement = self
            .measurements
            .get(index)
            .cloned()
            .ok_or(InteractorError::NoMeasurement(index))?;
        let modules = self.resolve(&measurement.definition)?;
        self.install(measurement.definition, modules, Some(&measurement.data));
        Ok(())
    }

    /// Samples kept per data point.
    pub fn interpolation_points(&self) -> usize {
        self.interpolation_points
    }

    /// Changes how many samples are kept per data point.
    pub fn set_interpolation_points(&mut self, points: usize) -> Result<(), InteractorError> {
        use InteractorState::*;
        self.require("change interpolation points", &[Idle, Configured])?;
        if points < 2 {
            return Err(InteractorError::InvalidInterpolationPoints(points));
        }

        self.interpolation_points = points;
        for buffer in &self.buffers {
            buffer.set_capacity(points);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment_module::{SettingValue, Settings};
    use crate::frame_codec::{
        decode, pack_fields, FieldKind, FieldValue, PayloadError, MAX_PAYLOAD,
    };
    use crate::test_module::TestModule;
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    };

    struct MockLink {
        sent: Mutex<Vec<Frame>>,
        connected: AtomicBool,
        reading: AtomicBool,
        discards: AtomicUsize,
    }

    impl MockLink {
        fn new() -> Arc<Self> {
            Arc::new(MockLink {
                sent: Mutex::new(Vec::new()),
                connected: AtomicBool::new(true),
                reading: AtomicBool::new(false),
                discards: AtomicUsize::new(0),
            })
        }

        fn sent(&self) -> Vec<Frame> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl FrameSender for MockLink {
        fn send(&self, bytes: &[u8]) -> Result<(), ConnectionError> {
            if !self.is_connected() {
                return Err(ConnectionError::NotConnected);
            }
            let (frame, _) = decode(bytes, MAX_PAYLOAD).unwrap();
            self.sent.lock().unwrap().push(frame.unwrap());
            Ok(())
        }

        fn set_do_read(&self, enabled: bool) {
            self.reading.store(enabled, Ordering::SeqCst);
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn discard_pending(&self) {
            self.discards.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// A second module with its own frame id and data point.
    struct Other;

    impl ExperimentModule for Other {
        fn name(&self) -> &str {
            "Other"
        }

        fn data_points(&self) -> Vec<String> {
            vec!["Other1".to_string()]
        }

        fn frame_id(&self) -> u8 {
            20
        }

        fn public_settings(&self) -> Settings {
            [("Gain", SettingValue::Int(1))].into_iter().collect()
        }

        fn encode_parameters(&self, settings: &Settings) -> Result<Frame, EncodeError> {
            let gain = settings.get("Gain").map_or(1, |v| v.as_i64());
            Frame::new(21, vec![gain as u8])
        }

        fn decode_frame(&self, payload: &[u8]) -> Result<DecodedFrame, PayloadError> {
            let value = *payload.first().ok_or(PayloadError::Short {
                needed: 1,
                found: 0,
            })?;
            Ok(DecodedFrame {
                time: 0.0,
                points: [("Other1".to_string(), value as f64)].into_iter().collect(),
            })
        }
    }

    fn registry() -> ModuleRegistry {
        let mut registry = ModuleRegistry::with_builtin();
        registry.register(Arc::new(Other));
        registry
    }

    fn test_experiment() -> ExperimentDefinition {
        ExperimentDefinition::new("Ramp").with_module(
            "Test",
            [("Value4", SettingValue::Int(260)), ("Value1", SettingValue::Float(1.5))]
                .into_iter()
                .collect(),
        )
    }

    fn telemetry(time_ms: i64, base: f64) -> Frame {
        let payload = pack_fields(&[
            (FieldKind::U32, FieldValue::Int(time_ms)),
            (FieldKind::F64, FieldValue::Float(base)),
            (FieldKind::F64, FieldValue::Float(base + 1.0)),
            (FieldKind::F64, FieldValue::Float(base + 2.0)),
            (FieldKind::F64, FieldValue::Float(base + 3.0)),
        ]);
        Frame::new(10, payload).unwrap()
    }

    #[test]
    fn unknown_module_keeps_current_experiment() {
        let mut interactor = ExperimentInteractor::new(registry(), 100);
        let foo = ExperimentDefinition::new("Broken").with_module("Foo", Settings::new());

        assert!(matches!(
            interactor.set_experiment(&foo),
            Err(InteractorError::Configuration(ConfigurationError::UnknownModule(ref m))) if m == "Foo"
        ));
        assert_eq!(interactor.state(), InteractorState::Idle);
        assert_eq!(interactor.get_data_points(), None);

        interactor.set_experiment(&test_experiment()).unwrap();
        assert!(interactor.set_experiment(&foo).is_err());
        assert_eq!(interactor.state(), InteractorState::Configured);
        assert_eq!(interactor.active_experiment().unwrap().name, "Ramp");
        assert_eq!(interactor.buffers().len(), 4);
    }

    /// Declares a data point the built-in module already has.
    struct Shadow;

    impl ExperimentModule for Shadow {
        fn name(&self) -> &str {
            "Shadow"
        }

        fn data_points(&self) -> Vec<String> {
            vec!["Value1".to_string()]
        }

        fn frame_id(&self) -> u8 {
            30
        }

        fn public_settings(&self) -> Settings {
            Settings::new()
        }

        fn encode_parameters(&self, _settings: &Settings) -> Result<Frame, EncodeError> {
            Frame::new(31, vec![])
        }

        fn decode_frame(&self, _payload: &[u8]) -> Result<DecodedFrame, PayloadError> {
            Ok(DecodedFrame {
                time: 0.0,
                points: Default::default(),
            })
        }
    }

    #[test]
    fn duplicate_modules_are_rejected() {
        let mut interactor = ExperimentInteractor::new(registry(), 100);
        interactor.set_experiment(&test_experiment()).unwrap();

        let twice: ExperimentDefinition = ron::from_str(
            r#"(name: "Dup", module_settings: [("Test", []), ("Test", [("Value1", 2.0)])])"#,
        )
        .unwrap();
        assert_eq!(twice.modules().count(), 2);
        assert!(matches!(
            interactor.set_experiment(&twice),
            Err(InteractorError::Configuration(ConfigurationError::DuplicateModule(ref m))) if m == "Test"
        ));
        assert_eq!(interactor.active_experiment().unwrap().name, "Ramp");
        assert_eq!(
            interactor.get_data_points().unwrap(),
            vec!["Value1", "Value2", "Value3", "Value4"]
        );
    }

    #[test]
    fn shared_data_point_names_are_rejected() {
        let mut registry = registry();
        registry.register(Arc::new(Shadow));
        let mut interactor = ExperimentInteractor::new(registry, 100);

        let clash = test_experiment().with_module("Shadow", Settings::new());
        assert!(matches!(
            interactor.set_experiment(&clash),
            Err(InteractorError::Configuration(ConfigurationError::DuplicateDataPoint(ref p))) if p == "Value1"
        ));
        assert_eq!(interactor.state(), InteractorState::Idle);
        assert!(interactor.buffers().is_empty());
    }

    #[test]
    fn settings_are_normalized() {
        let mut interactor = ExperimentInteractor::new(registry(), 100);
        interactor.set_experiment(&test_experiment()).unwrap();

        let settings = interactor
            .active_experiment()
            .unwrap()
            .module_settings
            .get("Test")
            .unwrap();
        assert_eq!(
            settings.keys().collect::<Vec<_>>(),
            vec!["Value1", "Value2", "Value3", "Value4"]
        );
        assert_eq!(settings.get("Value3"), Some(&SettingValue::Int(320)));
        assert_eq!(
            interactor.get_data_points().unwrap(),
            vec!["Value1", "Value2", "Value3", "Value4"]
        );
    }

    #[test]
    fn small_window_keeps_the_latest_samples() {
        let mut interactor = ExperimentInteractor::new(registry(), 3);
        interactor.set_experiment(&test_experiment()).unwrap();
        interactor.run_experiment().unwrap();

        for i in 0..5 {
            assert!(interactor.handle_frame(&telemetry(i * 100, i as f64)).is_some());
        }

        let value1 = interactor.buffer("Value1").unwrap();
        assert_eq!(value1.values(), vec![2.0, 3.0, 4.0]);
        assert_eq!(value1.times(), vec![0.2, 0.3, 0.4]);
    }

    #[test]
    fn frames_only_reach_their_module() {
        let mut interactor = ExperimentInteractor::new(registry(), 100);
        let both = test_experiment().with_module("Other", Settings::new());
        interactor.set_experiment(&both).unwrap();

        interactor.handle_frame(&telemetry(10, 1.0));
        assert!(interactor.buffer("Other1").unwrap().is_empty());
        assert_eq!(interactor.buffer("Value2").unwrap().len(), 1);

        let decoded = interactor
            .handle_frame(&Frame::new(20, vec![9]).unwrap())
            .unwrap();
        assert_eq!(decoded.points["Other1"], 9.0);
        assert_eq!(interactor.buffer("Value2").unwrap().len(), 1);

        // unknown id
        assert!(interactor
            .handle_frame(&Frame::new(33, vec![1, 2, 3]).unwrap())
            .is_none());
        // known id, short payload
        assert!(interactor
            .handle_frame(&Frame::new(10, vec![0; 8]).unwrap())
            .is_none());
        assert_eq!(interactor.buffer("Value1").unwrap().len(), 1);
    }

    #[test]
    fn parameters_go_out_per_module() {
        let mut interactor = ExperimentInteractor::new(registry(), 100);
        assert!(matches!(
            interactor.send_parameter_experiment(),
            Err(InteractorError::InvalidState { .. })
        ));

        let both = test_experiment().with_module("Other", Settings::new());
        interactor.set_experiment(&both).unwrap();
        assert!(matches!(
            interactor.send_parameter_experiment(),
            Err(InteractorError::NotConnected)
        ));

        let link = MockLink::new();
        interactor.attach(link.clone());
        interactor.send_parameter_experiment().unwrap();

        let sent = link.sent();
        assert_eq!(sent.iter().map(|f| f.id()).collect::<Vec<_>>(), vec![12, 21]);
        assert_eq!(
            sent[0],
            TestModule
                .encode_parameters(&both.module_settings.get("Test").unwrap().clone())
                .unwrap()
        );
        assert_eq!(sent[1].payload(), &[1]);

        link.connected.store(false, Ordering::SeqCst);
        assert!(matches!(
            interactor.send_parameter_experiment(),
            Err(InteractorError::NotConnected)
        ));
    }

    #[test]
    fn run_and_stop_drive_the_link() {
        let mut interactor = ExperimentInteractor::new(registry(), 100);
        let link = MockLink::new();
        interactor.attach(link.clone());

        assert!(interactor.run_experiment().is_err());
        interactor.set_experiment(&test_experiment()).unwrap();
        interactor.handle_frame(&telemetry(0, 5.0));

        interactor.run_experiment().unwrap();
        assert_eq!(interactor.state(), InteractorState::Running);
        assert!(link.reading.load(Ordering::SeqCst));
        assert!(interactor.buffer("Value1").unwrap().is_empty());
        assert!(matches!(
            interactor.set_experiment(&test_experiment()),
            Err(InteractorError::InvalidState { .. })
        ));
        assert!(interactor.set_interpolation_points(50).is_err());

        interactor.handle_frame(&telemetry(100, 1.0));
        interactor.handle_frame(&telemetry(200, 2.0));
        interactor.stop_experiment().unwrap();

        assert_eq!(interactor.state(), InteractorState::Configured);
        assert!(!link.reading.load(Ordering::SeqCst));
        assert_eq!(link.discards.load(Ordering::SeqCst), 1);
        let control: Vec<_> = link
            .sent()
            .into_iter()
            .filter(|f| f.id() == EXPERIMENT_CONTROL_ID)
            .map(|f| f.into_payload())
            .collect();
        assert_eq!(control, vec![vec![1], vec![0]]);
        assert!(interactor.stop_experiment().is_err());
    }

    #[test]
    fn run_without_link() {
        let mut interactor = ExperimentInteractor::new(registry(), 100);
        interactor.set_experiment(&test_experiment()).unwrap();
        interactor.run_experiment().unwrap();
        interactor.stop_experiment().unwrap();
        assert_eq!(interactor.measurements().len(), 1);
    }

    #[test]
    fn attaching_during_a_run_opens_the_gate() {
        let mut interactor = ExperimentInteractor::new(registry(), 100);
        interactor.set_experiment(&test_experiment()).unwrap();
        interactor.run_experiment().unwrap();

        let link = MockLink::new();
        interactor.attach(link.clone());
        assert!(link.reading.load(Ordering::SeqCst));
        let control: Vec<_> = link.sent().into_iter().map(|f| f.into_payload()).collect();
        assert_eq!(control, vec![vec![1]]);

        interactor.stop_experiment().unwrap();
        assert!(!link.reading.load(Ordering::SeqCst));

        // not running, the gate stays shut and nothing is sent
        let idle = MockLink::new();
        idle.reading.store(true, Ordering::SeqCst);
        interactor.attach(idle.clone());
        assert!(!idle.reading.load(Ordering::SeqCst));
        assert!(idle.sent().is_empty());
    }

    #[test]
    fn measurements_can_be_reloaded() {
        let mut interactor = ExperimentInteractor::new(registry(), 100);
        interactor.set_experiment(&test_experiment()).unwrap();

        interactor.run_experiment().unwrap();
        interactor.handle_frame(&telemetry(100, 1.0));
        interactor.handle_frame(&telemetry(200, 2.0));
        interactor.stop_experiment().unwrap();

        interactor.run_experiment().unwrap();
        interactor.handle_frame(&telemetry(100, 7.0));
        interactor.stop_experiment().unwrap();

        assert_eq!(interactor.measurements().len(), 2);
        assert_eq!(interactor.buffer("Value1").unwrap().values(), vec![7.0]);

        interactor.load_measurement(0).unwrap();
        assert_eq!(interactor.state(), InteractorState::Configured);
        assert_eq!(interactor.buffer("Value1").unwrap().values(), vec![1.0, 2.0]);
        assert_eq!(interactor.buffer("Value4").unwrap().values(), vec![4.0, 5.0]);

        // reloaded buffers are the ones frames go to
        interactor.handle_frame(&telemetry(300, 3.0));
        assert_eq!(interactor.buffer("Value1").unwrap().len(), 3);

        assert!(matches!(
            interactor.load_measurement(5),
            Err(InteractorError::NoMeasurement(5))
        ));
    }

    #[test]
    fn interpolation_points_resize_buffers() {
        let mut interactor = ExperimentInteractor::new(registry(), 100);
        interactor.set_experiment(&test_experiment()).unwrap();
        for i in 0..10 {
            interactor.handle_frame(&telemetry(i, 0.0));
        }

        assert!(matches!(
            interactor.set_interpolation_points(1),
            Err(InteractorError::InvalidInterpolationPoints(1))
        ));
        interactor.set_interpolation_points(4).unwrap();
        assert_eq!(interactor.buffer("Value1").unwrap().len(), 4);
        assert_eq!(interactor.interpolation_points(), 4);
    }

    #[test]
    fn frame_sink_feeds_the_buffers() {
        let mut interactor = ExperimentInteractor::new(registry(), 100);
        interactor.set_experiment(&test_experiment()).unwrap();
        let sink = interactor.frame_sink();

        let frame = telemetry(50, 3.0);
        std::thread::spawn(move || sink.on_frame(&frame))
            .join()
            .unwrap();
        assert_eq!(interactor.buffer("Value3").unwrap().latest().unwrap().value, 5.0);
    }
}
