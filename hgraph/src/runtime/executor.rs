//! The master run loop and its configuration surface.

use std::rc::Rc;

use crate::builder::GraphBuilder;
use crate::errors::EngineError;
use crate::logging::{EvaluationLifeCycleObserver, TraceObserver};
use crate::runtime::clock::{EngineEvaluationClock, EvaluationClock, RealTimeClock, SimulationClock};
use crate::runtime::engine::{EvaluationEngine, EvaluationMode, MasterEvaluationEngine};
use crate::runtime::global::GlobalState;
use crate::runtime::graph::GraphId;
use crate::runtime::record::{with_replay_sources, GraphRecorder, RecordingObserver};
use crate::time::{EngineTime, MAX_ET, MIN_ST};

/// The single configuration entry point for running a graph.
pub struct GraphConfiguration {
    pub run_mode: EvaluationMode,
    pub start_time: EngineTime,
    pub end_time: EngineTime,
    pub life_cycle_observers: Vec<Rc<dyn EvaluationLifeCycleObserver>>,
    /// The maximum level of engine-emitted diagnostics.
    pub default_log_level: tracing::Level,
    /// Bound on the traceback depth reported with node errors.
    pub trace_back_depth: usize,
    /// Capture failing nodes' input values into node errors.
    pub capture_values: bool,
    /// Recorder used in `Recording` mode and replayed in `Replay` mode.
    pub recorder: Option<Rc<dyn GraphRecorder>>,
    pub global_state: GlobalState,
}

impl Default for GraphConfiguration {
    fn default() -> Self {
        GraphConfiguration {
            run_mode: EvaluationMode::Simulation,
            start_time: MIN_ST,
            end_time: MAX_ET,
            life_cycle_observers: Vec::new(),
            default_log_level: tracing::Level::INFO,
            trace_back_depth: 8,
            capture_values: false,
            recorder: None,
            global_state: GlobalState::new(),
        }
    }
}

impl GraphConfiguration {
    /// A simulation run over `[start, end)`.
    pub fn simulation(start: EngineTime, end: EngineTime) -> Self {
        GraphConfiguration { start_time: start, end_time: end, ..Default::default() }
    }

    /// A real-time run over `[start, end)`.
    pub fn real_time(start: EngineTime, end: EngineTime) -> Self {
        GraphConfiguration {
            run_mode: EvaluationMode::RealTime,
            start_time: start,
            end_time: end,
            ..Default::default()
        }
    }

    /// Parses a configuration from command-line arguments.
    ///
    /// Recognised options: `--run-mode`, `--start-time`, `--end-time`
    /// (microseconds since the epoch, or `YYYY-MM-DD[ HH:MM:SS]`), and
    /// `--log-level`.
    #[cfg(feature = "getopts")]
    pub fn from_args<I: Iterator<Item = String>>(iter: I) -> Result<Self, EngineError> {
        let mut opts = getopts::Options::new();
        opts.optopt("m", "run-mode", "real_time, simulation, replay or recording", "MODE");
        opts.optopt("s", "start-time", "engine start time", "TIME");
        opts.optopt("e", "end-time", "engine end time", "TIME");
        opts.optopt("l", "log-level", "error, warn, info, debug or trace", "LEVEL");
        let matches = opts
            .parse(iter)
            .map_err(|e| EngineError::Configuration(e.to_string()))?;
        let mut config = GraphConfiguration::default();
        if let Some(mode) = matches.opt_str("run-mode") {
            config.run_mode = match mode.as_str() {
                "real_time" => EvaluationMode::RealTime,
                "simulation" => EvaluationMode::Simulation,
                "replay" => EvaluationMode::Replay,
                "recording" => EvaluationMode::Recording,
                other => {
                    return Err(EngineError::Configuration(format!("unknown run mode: {other}")))
                }
            };
        }
        if let Some(start) = matches.opt_str("start-time") {
            config.start_time = parse_time(&start)
                .ok_or_else(|| EngineError::Configuration(format!("bad start time: {start}")))?;
        }
        if let Some(end) = matches.opt_str("end-time") {
            config.end_time = parse_time(&end)
                .ok_or_else(|| EngineError::Configuration(format!("bad end time: {end}")))?;
        }
        if let Some(level) = matches.opt_str("log-level") {
            config.default_log_level = level
                .parse()
                .map_err(|_| EngineError::Configuration(format!("unknown log level: {level}")))?;
        }
        Ok(config)
    }
}

#[cfg(feature = "getopts")]
fn parse_time(text: &str) -> Option<EngineTime> {
    if let Ok(micros) = text.parse::<i64>() {
        return Some(EngineTime::from_micros(micros));
    }
    let (date, time) = match text.split_once([' ', 'T']) {
        Some((d, t)) => (d, Some(t)),
        None => (text, None),
    };
    let mut ymd = date.split('-');
    let year = ymd.next()?.parse().ok()?;
    let month = ymd.next()?.parse().ok()?;
    let day = ymd.next()?.parse().ok()?;
    let (hour, min, sec) = match time {
        None => (0, 0, 0),
        Some(t) => {
            let mut hms = t.split(':');
            (
                hms.next()?.parse().ok()?,
                hms.next().unwrap_or("0").parse().ok()?,
                hms.next().unwrap_or("0").parse().ok()?,
            )
        }
    };
    Some(EngineTime::from_ymd_hms(year, month, day, hour, min, sec))
}

/// Drives a graph from start time to end time under a configuration.
pub struct GraphExecutor {
    config: GraphConfiguration,
}

impl GraphExecutor {
    pub fn new(config: GraphConfiguration) -> Self {
        GraphExecutor { config }
    }

    pub fn config(&self) -> &GraphConfiguration {
        &self.config
    }

    /// Builds the graph and runs the master loop:
    /// initialise → start → (evaluate, advance)* → stop → dispose.
    pub fn run(&self, builder: &GraphBuilder) -> Result<(), EngineError> {
        let config = &self.config;
        if config.end_time <= config.start_time {
            return Err(EngineError::InvalidRunWindow {
                start: config.start_time,
                end: config.end_time,
            });
        }
        if config.start_time < MIN_ST || config.end_time > MAX_ET {
            return Err(EngineError::StartOutOfBounds { start: config.start_time });
        }

        let replayed;
        let builder = match (config.run_mode, &config.recorder) {
            (EvaluationMode::Replay, Some(recorder)) => {
                replayed = with_replay_sources(builder, recorder);
                &replayed
            }
            (EvaluationMode::Replay, None) => {
                return Err(EngineError::Configuration(
                    "replay mode requires a recorder".to_string(),
                ))
            }
            _ => builder,
        };

        let clock: Rc<dyn EngineEvaluationClock> = if config.run_mode.is_real_time() {
            Rc::new(RealTimeClock::new(config.start_time))
        } else {
            Rc::new(SimulationClock::new(config.start_time))
        };
        let engine = MasterEvaluationEngine::new(
            clock.clone(),
            config.run_mode,
            config.start_time,
            config.end_time,
            config.global_state.clone(),
            config.capture_values,
        );
        for observer in &config.life_cycle_observers {
            engine.add_life_cycle_observer(observer.clone());
        }
        if config.default_log_level >= tracing::Level::DEBUG {
            engine.add_life_cycle_observer(TraceObserver::new());
        }
        if config.run_mode == EvaluationMode::Recording {
            if let Some(recorder) = &config.recorder {
                engine.add_life_cycle_observer(RecordingObserver::new(recorder.clone()));
            }
        }

        let graph = builder.make_instance(GraphId::root(), None)?;
        graph.set_evaluation_engine(engine.clone() as Rc<dyn EvaluationEngine>);
        graph.initialise();

        let run_result = (|| -> Result<(), EngineError> {
            graph.start()?;
            while clock.evaluation_time() < config.end_time {
                engine.notify_before_evaluation();
                let cycle = graph.evaluate_graph();
                engine.notify_after_evaluation();
                cycle?;
                engine.advance_engine_time();
            }
            Ok(())
        })();

        graph.stop();
        // Stopping may enqueue after-evaluation work; drain it for a clean
        // shutdown.
        engine.notify_after_evaluation();
        graph.dispose();
        builder.release_instance(&graph);
        config.global_state.clear();
        run_result
    }
}

/// Runs a wired graph under `config`; the main entry point.
pub fn evaluate_graph(builder: &GraphBuilder, config: GraphConfiguration) -> Result<(), EngineError> {
    GraphExecutor::new(config).run(builder)
}
