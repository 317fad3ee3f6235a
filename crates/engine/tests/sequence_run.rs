//! End-to-end engine scenarios: sequences loaded from disk, executed over
//! real local transports or scripted fakes, with captured context and
//! cross-host coordination checked from the outside.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tempfile::TempDir;

use smelter_engine::executor::ExecError;
use smelter_engine::instance::ExecutionInstance;
use smelter_engine::loader::load_sequence;
use smelter_engine::runner::run_group;
use smelter_engine::transport::{CmdSession, LocalTransport, Transport, TransportError};
use smelter_types::{ApplyDefaults, Config, Store, Value};

fn write_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

fn default_config() -> Arc<Config> {
    let mut config = Config::default();
    config.apply_defaults();
    config.executor.ssh.delay_after_connection_failure = 0.0;
    Arc::new(config)
}

fn values_store(yaml: &str) -> Arc<Store> {
    if yaml.is_empty() {
        return Arc::new(Store::new());
    }
    let value: Value = serde_yaml::from_str(yaml).unwrap();
    let Value::Mapping(map) = value else {
        panic!("expected mapping");
    };
    Arc::new(Store::from_mapping(map))
}

fn local_instance(dir: &TempDir, sequence_file: &str, values_yaml: &str, host: &str) -> ExecutionInstance {
    let sequence = load_sequence(dir.path(), Path::new(sequence_file)).unwrap();
    ExecutionInstance::new(
        sequence,
        Box::new(LocalTransport::new()),
        default_config(),
        values_store(values_yaml),
        host,
    )
}

fn mapping_path<'a>(root: &'a smelter_types::Mapping, path: &[&str]) -> &'a Value {
    let mut current: &Value = &root[path[0]];
    for key in &path[1..] {
        let Value::Mapping(map) = current else {
            panic!("expected mapping at {key}");
        };
        current = &map[*key];
    }
    current
}

#[test]
fn iterate_over_literal_list_captures_each_stdout() {
    let dir = TempDir::new().unwrap();
    write_file(
        &dir,
        "seq.yaml",
        r#"
sequence:
  - description: echo each element
    iterate: .Values.xs
    action:
      name: i
      shell: "echo {{ .item }}"
"#,
    );

    let mut instance = local_instance(&dir, "seq.yaml", "xs: [1, 2, 3]\n", "local");
    let mut instances = vec![instance];
    run_group(&mut instances, false, 1);
    instance = instances.remove(0);

    assert!(instance.error().is_none(), "run failed: {:?}", instance.error());
    let context = instance.context_mapping();
    assert_eq!(
        mapping_path(&context, &["i", "stdout"]),
        &Value::String("3\n".into())
    );
    assert_eq!(mapping_path(&context, &["i", "exitCode"]), &Value::Number(0.0));
}

/// Counts transport activity so tests can assert nothing ran.
#[derive(Clone, Default)]
struct CountingState {
    sessions: Arc<AtomicU32>,
    executes: Arc<AtomicU32>,
    connects: Arc<AtomicU32>,
    failures_remaining: Arc<AtomicU32>,
}

struct CountingTransport {
    state: CountingState,
}

struct CountingSession {
    state: CountingState,
}

impl Transport for CountingTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {}

    fn new_cmd_session(&mut self) -> Result<Box<dyn CmdSession>, TransportError> {
        self.state.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingSession {
            state: self.state.clone(),
        }))
    }
}

impl CmdSession for CountingSession {
    fn execute(&mut self, _stdin: Option<&[u8]>, _argv: &[String]) -> Result<Vec<u8>, TransportError> {
        let failures = &self.state.failures_remaining;
        if failures.load(Ordering::SeqCst) > 0 {
            failures.fetch_sub(1, Ordering::SeqCst);
            return Err(TransportError::Session("connection dropped".into()));
        }
        self.state.executes.fetch_add(1, Ordering::SeqCst);
        Ok(b"attempt ok\n".to_vec())
    }
}

#[test]
fn when_false_skips_without_transport_calls_or_context() {
    let dir = TempDir::new().unwrap();
    write_file(
        &dir,
        "seq.yaml",
        r#"
sequence:
  - name: gated
    when: .Values.enabled == true
    shell: echo hi
"#,
    );

    let sequence = load_sequence(dir.path(), Path::new("seq.yaml")).unwrap();
    let state = CountingState::default();
    let mut instances = vec![ExecutionInstance::new(
        sequence,
        Box::new(CountingTransport { state: state.clone() }),
        default_config(),
        values_store("enabled: false\n"),
        "host-a",
    )];

    run_group(&mut instances, false, 1);

    assert!(instances[0].error().is_none());
    assert_eq!(state.sessions.load(Ordering::SeqCst), 0);
    assert_eq!(state.executes.load(Ordering::SeqCst), 0);
    assert!(instances[0].context_mapping().get("gated").is_none());
}

#[test]
fn until_exhausted_fails_after_exactly_max_attempts() {
    let dir = TempDir::new().unwrap();
    write_file(
        &dir,
        "seq.yaml",
        r#"
sequence:
  - name: probe
    shell: echo 0
    until:
      condition: .exitCode == 1
      maxAttempts: 3
      pauseInterval: 0
"#,
    );

    let mut instances = vec![local_instance(&dir, "seq.yaml", "", "local")];
    run_group(&mut instances, false, 1);

    assert!(matches!(instances[0].error(), Some(ExecError::UntilExhausted)));
}

#[test]
fn named_subsequence_context_promotes_into_parent() {
    let dir = TempDir::new().unwrap();
    write_file(
        &dir,
        "sub.yaml",
        r#"
sequence:
  - name: a
    shell: echo hi
"#,
    );
    write_file(
        &dir,
        "main.yaml",
        r#"
sequence:
  - name: s
    import:
      path: sub.yaml
"#,
    );

    let mut instances = vec![local_instance(&dir, "main.yaml", "", "local")];
    run_group(&mut instances, false, 1);

    assert!(instances[0].error().is_none(), "run failed: {:?}", instances[0].error());
    let context = instances[0].context_mapping();
    assert_eq!(
        mapping_path(&context, &["s", "a", "stdout"]),
        &Value::String("hi\n".into())
    );
}

/// Records wall-clock execution spans per command for barrier assertions.
struct TimedTransport {
    spans: Arc<Mutex<Vec<(Instant, Instant)>>>,
}

struct TimedSession {
    spans: Arc<Mutex<Vec<(Instant, Instant)>>>,
}

impl Transport for TimedTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn close(&mut self) {}

    fn new_cmd_session(&mut self) -> Result<Box<dyn CmdSession>, TransportError> {
        Ok(Box::new(TimedSession {
            spans: Arc::clone(&self.spans),
        }))
    }
}

impl CmdSession for TimedSession {
    fn execute(&mut self, _stdin: Option<&[u8]>, _argv: &[String]) -> Result<Vec<u8>, TransportError> {
        let start = Instant::now();
        std::thread::sleep(std::time::Duration::from_millis(20));
        self.spans.lock().unwrap().push((start, Instant::now()));
        Ok(Vec::new())
    }
}

#[test]
fn sync_mode_barrier_orders_steps_across_hosts() {
    let dir = TempDir::new().unwrap();
    write_file(
        &dir,
        "seq.yaml",
        r#"
sequence:
  - name: one
    shell: step
    pause: {before: 0.05}
  - name: two
    shell: step
  - name: three
    shell: step
"#,
    );
    let sequence = load_sequence(dir.path(), Path::new("seq.yaml")).unwrap();

    let mut config = Config::default();
    config.apply_defaults();
    config.executor.sync_execution_steps = true;
    let config = Arc::new(config);

    let spans_a = Arc::new(Mutex::new(Vec::new()));
    let spans_b = Arc::new(Mutex::new(Vec::new()));
    let mut instances = vec![
        ExecutionInstance::new(
            sequence.clone(),
            Box::new(TimedTransport { spans: Arc::clone(&spans_a) }),
            Arc::clone(&config),
            Arc::new(Store::new()),
            "host-a",
        ),
        ExecutionInstance::new(
            sequence,
            Box::new(TimedTransport { spans: Arc::clone(&spans_b) }),
            Arc::clone(&config),
            Arc::new(Store::new()),
            "host-b",
        ),
    ];

    run_group(&mut instances, true, 2);

    let spans_a = spans_a.lock().unwrap();
    let spans_b = spans_b.lock().unwrap();
    assert_eq!(spans_a.len(), 3);
    assert_eq!(spans_b.len(), 3);

    for step in 0..2 {
        let step_end = spans_a[step].1.max(spans_b[step].1);
        let next_start = spans_a[step + 1].0.min(spans_b[step + 1].0);
        assert!(
            next_start >= step_end,
            "step {} of some host began before step {step} finished everywhere",
            step + 1
        );
    }
}

#[test]
fn transport_retry_reconnects_and_captures_final_attempt() {
    let dir = TempDir::new().unwrap();
    write_file(
        &dir,
        "seq.yaml",
        r#"
sequence:
  - name: resilient
    shell: echo attempt
"#,
    );
    let sequence = load_sequence(dir.path(), Path::new("seq.yaml")).unwrap();

    let mut config = Config::default();
    config.apply_defaults();
    config.executor.ssh.max_connection_attempts = 3;
    config.executor.ssh.delay_after_connection_failure = 0.0;

    let state = CountingState::default();
    state.failures_remaining.store(2, Ordering::SeqCst);

    // The orchestration layer connects once before running.
    let mut transport = CountingTransport { state: state.clone() };
    transport.connect().unwrap();

    let mut instances = vec![ExecutionInstance::new(
        sequence,
        Box::new(transport),
        Arc::new(config),
        Arc::new(Store::new()),
        "flaky",
    )];

    run_group(&mut instances, false, 1);

    assert!(instances[0].error().is_none(), "run failed: {:?}", instances[0].error());
    let context = instances[0].context_mapping();
    assert_eq!(
        mapping_path(&context, &["resilient", "stdout"]),
        &Value::String("attempt ok\n".into())
    );
    assert_eq!(state.connects.load(Ordering::SeqCst), 3);
    assert_eq!(state.executes.load(Ordering::SeqCst), 1);
}
