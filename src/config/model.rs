// src/config/model.rs

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Top-level document as read from a `tasks.yaml` file.
///
/// ```yaml
/// apiVersion: kit/v1
/// kind: Tasks
/// metadata:
///   name: demo
/// spec:
///   tasks:
///     up:
///       dependencies: [api]
///     api:
///       command: cargo run
///       ports: ["8080"]
///       readinessProbe: http://localhost:8080/healthz
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TasksFile {
    #[serde(default)]
    pub api_version: String,

    #[serde(default)]
    pub kind: String,

    #[serde(default)]
    pub metadata: Metadata,

    #[serde(default)]
    pub spec: Spec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Spec {
    /// All tasks, keyed by name. Declaration order is preserved; it drives
    /// the status display and the stable iteration order of the graph.
    #[serde(default)]
    pub tasks: TaskMap,

    /// Named semaphore capacities, fixed for the lifetime of the run.
    #[serde(default)]
    pub semaphores: HashMap<String, usize>,

    /// Grace between SIGTERM and SIGKILL when stopping a task's process
    /// group. Defaults to 30s.
    #[serde(default)]
    pub termination_grace_period_seconds: Option<u64>,

    /// Volume declarations for container tasks. Parsed for schema
    /// compatibility; host-process tasks do not use them.
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

impl Spec {
    pub fn termination_grace_period(&self) -> Duration {
        Duration::from_secs(self.termination_grace_period_seconds.unwrap_or(30))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Volume {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub host_path: Option<HostPath>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostPath {
    pub path: PathBuf,
}

/// A single task entry under `spec.tasks`. Unknown keys are fatal, so a
/// typo'd field never silently disables what it was meant to configure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TaskSpec {
    /// Program and arguments, either as a list or a whitespace-split string.
    #[serde(default, skip_serializing_if = "Strings::is_empty")]
    pub command: Strings,

    /// Shell script, run via `sh -c`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sh: Option<String>,

    /// Container image. Requires a container runtime; rejected at startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Kubernetes manifests. Requires a cluster; rejected at startup.
    #[serde(default, skip_serializing_if = "Strings::is_empty")]
    pub manifests: Strings,

    /// Names of tasks that must be fulfilled before this one starts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    /// Files or directories that re-trigger this task when they change.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub watch: Vec<PathBuf>,

    /// Host port advertisements, `"N"` or `"HOST:CONTAINER"`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortSpec>,

    /// Extra environment, a map or a list of `K=V` strings.
    #[serde(default, skip_serializing_if = "EnvVars::is_empty")]
    pub env: EnvVars,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Named mutual-exclusion label shared across tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutex: Option<String>,

    /// Named counting-semaphore label; capacity comes from `spec.semaphores`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semaphore: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<RestartPolicy>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub task_type: Option<TaskType>,

    /// Output files; when all exist and none is older than the watched
    /// inputs, the task is skipped as already done.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<Probe>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<Probe>,

    /// Optional file that also receives this task's output lines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartPolicy {
    Always,
    OnFailure,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    Job,
    Service,
}

impl TaskSpec {
    /// Effective type: explicit, else Service when the task advertises ports
    /// or declares a probe, else Job.
    pub fn task_type(&self) -> TaskType {
        if let Some(t) = self.task_type {
            return t;
        }
        if !self.ports.is_empty() || self.readiness_probe.is_some() || self.liveness_probe.is_some()
        {
            TaskType::Service
        } else {
            TaskType::Job
        }
    }

    /// Effective restart policy: explicit, else Always for services and
    /// Never for jobs.
    pub fn restart_policy(&self) -> RestartPolicy {
        if let Some(p) = self.restart_policy {
            return p;
        }
        match self.task_type() {
            TaskType::Service => RestartPolicy::Always,
            TaskType::Job => RestartPolicy::Never,
        }
    }

    /// A background task is not expected to terminate; its downstream gates
    /// on `running` instead of `success`.
    pub fn is_background(&self) -> bool {
        self.task_type() == TaskType::Service || self.restart_policy() == RestartPolicy::Always
    }

    /// Whether a *successful* completion loops back into another run.
    pub fn restarts_after_success(&self) -> bool {
        self.restart_policy() == RestartPolicy::Always
    }

    pub fn host_ports(&self) -> Vec<u16> {
        self.ports.iter().map(|p| p.host).collect()
    }

    /// True when the task has something to execute. Pure aggregation nodes
    /// (dependencies only) are legal and complete immediately.
    pub fn has_activity(&self) -> bool {
        !self.command.is_empty()
            || self.sh.is_some()
            || self.image.is_some()
            || !self.manifests.is_empty()
    }

    pub fn activity_count(&self) -> usize {
        usize::from(!self.command.is_empty())
            + usize::from(self.sh.is_some())
            + usize::from(self.image.is_some())
            + usize::from(!self.manifests.is_empty())
    }
}

/// A string that may be written as a whitespace-joined scalar or a list.
///
/// `command: cargo run` and `command: ["cargo", "run"]` parse identically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Strings(pub Vec<String>);

impl Strings {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl From<Vec<String>> for Strings {
    fn from(v: Vec<String>) -> Self {
        Strings(v)
    }
}

impl<'de> Deserialize<'de> for Strings {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct StringsVisitor;

        impl<'de> Visitor<'de> for StringsVisitor {
            type Value = Strings;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string or a sequence of strings")
            }

            fn visit_str<E: de::Error>(self, s: &str) -> Result<Self::Value, E> {
                Ok(Strings(s.split_whitespace().map(str::to_string).collect()))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut out = Vec::new();
                while let Some(item) = seq.next_element::<String>()? {
                    out.push(item);
                }
                Ok(Strings(out))
            }
        }

        deserializer.deserialize_any(StringsVisitor)
    }
}

impl Serialize for Strings {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for item in &self.0 {
            seq.serialize_element(item)?;
        }
        seq.end()
    }
}

/// Host-port advertisement, `"N"`, `"HOST:CONTAINER"`, or a bare number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSpec {
    pub host: u16,
    pub container: u16,
}

impl FromStr for PortSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |p: &str| {
            p.parse::<u16>()
                .map_err(|_| format!("invalid port number {p:?}"))
        };
        match s.split_once(':') {
            Some((host, container)) => Ok(PortSpec {
                host: parse(host)?,
                container: parse(container)?,
            }),
            None => {
                let port = parse(s)?;
                Ok(PortSpec {
                    host: port,
                    container: port,
                })
            }
        }
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host == self.container {
            write!(f, "{}", self.host)
        } else {
            write!(f, "{}:{}", self.host, self.container)
        }
    }
}

impl<'de> Deserialize<'de> for PortSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PortVisitor;

        impl<'de> Visitor<'de> for PortVisitor {
            type Value = PortSpec;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a port number or a \"HOST:CONTAINER\" string")
            }

            fn visit_str<E: de::Error>(self, s: &str) -> Result<Self::Value, E> {
                s.parse().map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, n: u64) -> Result<Self::Value, E> {
                let port =
                    u16::try_from(n).map_err(|_| E::custom(format!("port {n} out of range")))?;
                Ok(PortSpec {
                    host: port,
                    container: port,
                })
            }
        }

        deserializer.deserialize_any(PortVisitor)
    }
}

impl Serialize for PortSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Environment variables, a mapping or a list of `K=V` strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvVars(pub Vec<(String, String)>);

impl EnvVars {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<'de> Deserialize<'de> for EnvVars {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EnvVisitor;

        impl<'de> Visitor<'de> for EnvVisitor {
            type Value = EnvVars;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping or a sequence of \"K=V\" strings")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut out = Vec::new();
                while let Some((k, v)) = map.next_entry::<String, String>()? {
                    out.push((k, v));
                }
                Ok(EnvVars(out))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut out = Vec::new();
                while let Some(item) = seq.next_element::<String>()? {
                    let (k, v) = item
                        .split_once('=')
                        .ok_or_else(|| de::Error::custom(format!("env entry {item:?} is not K=V")))?;
                    out.push((k.to_string(), v.to_string()));
                }
                Ok(EnvVars(out))
            }
        }

        deserializer.deserialize_any(EnvVisitor)
    }
}

impl Serialize for EnvVars {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Declaration-ordered task mapping.
///
/// YAML mappings carry their document order; a plain `BTreeMap` would throw
/// it away, and the status display promises declaration order.
#[derive(Debug, Clone, Default)]
pub struct TaskMap(pub Vec<(String, TaskSpec)>);

impl TaskMap {
    pub fn get(&self, name: &str) -> Option<&TaskSpec> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TaskSpec)> {
        self.0.iter().map(|(n, t)| (n.as_str(), t))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for TaskMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TaskMapVisitor;

        impl<'de> Visitor<'de> for TaskMapVisitor {
            type Value = TaskMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of task name to task")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut out = Vec::new();
                while let Some((name, task)) = map.next_entry::<String, TaskSpec>()? {
                    if out.iter().any(|(n, _)| *n == name) {
                        return Err(de::Error::custom(format!("duplicate task {name:?}")));
                    }
                    out.push((name, task));
                }
                Ok(TaskMap(out))
            }
        }

        deserializer.deserialize_map(TaskMapVisitor)
    }
}

impl Serialize for TaskMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, task) in &self.0 {
            map.serialize_entry(name, task)?;
        }
        map.end()
    }
}

/// Probe declaration: either a URL string or a structured spec.
///
/// String syntax:
/// `http[s]://host:port/path?failureThreshold=N&initialDelay=Xs&period=Ys&successThreshold=M`
/// or `tcp://host:port`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Probe {
    Url(String),
    Spec(ProbeSpec),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProbeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_socket: Option<TcpSocketAction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_get: Option<HttpGetAction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_delay_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_threshold: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TcpSocketAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpGetAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_accepts_scalar_and_list() {
        let scalar: TaskSpec = serde_yaml::from_str("command: cargo run --release").unwrap();
        assert_eq!(scalar.command.as_slice(), ["cargo", "run", "--release"]);

        let list: TaskSpec = serde_yaml::from_str("command: [cargo, run, --release]").unwrap();
        assert_eq!(list.command, scalar.command);
    }

    #[test]
    fn ports_accept_numbers_and_mappings() {
        let task: TaskSpec = serde_yaml::from_str("ports: [8080, \"80:8080\", \"9090\"]").unwrap();
        assert_eq!(
            task.ports,
            vec![
                PortSpec { host: 8080, container: 8080 },
                PortSpec { host: 80, container: 8080 },
                PortSpec { host: 9090, container: 9090 },
            ]
        );
        assert_eq!(task.host_ports(), vec![8080, 80, 9090]);
    }

    #[test]
    fn env_accepts_map_and_kv_list() {
        let map: TaskSpec = serde_yaml::from_str("env:\n  A: \"1\"\n  B: two\n").unwrap();
        let list: TaskSpec = serde_yaml::from_str("env: [\"A=1\", \"B=two\"]").unwrap();
        assert_eq!(map.env, list.env);

        let bad: Result<TaskSpec, _> = serde_yaml::from_str("env: [\"NOEQUALS\"]");
        assert!(bad.is_err());
    }

    #[test]
    fn type_and_restart_policy_are_derived() {
        let service: TaskSpec = serde_yaml::from_str("ports: [8080]").unwrap();
        assert_eq!(service.task_type(), TaskType::Service);
        assert_eq!(service.restart_policy(), RestartPolicy::Always);
        assert!(service.is_background());

        let job: TaskSpec = serde_yaml::from_str("command: make").unwrap();
        assert_eq!(job.task_type(), TaskType::Job);
        assert_eq!(job.restart_policy(), RestartPolicy::Never);
        assert!(!job.is_background());

        let pinned: TaskSpec =
            serde_yaml::from_str("command: worker\nrestartPolicy: Always").unwrap();
        assert!(pinned.is_background());
    }

    #[test]
    fn task_map_preserves_declaration_order() {
        let spec: Spec = serde_yaml::from_str(
            "tasks:\n  zulu:\n    command: z\n  alpha:\n    command: a\n  mike:\n    command: m\n",
        )
        .unwrap();
        let names: Vec<&str> = spec.tasks.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["zulu", "alpha", "mike"]);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let typo: Result<TaskSpec, _> = serde_yaml::from_str("command: make\nretries: 3\n");
        assert!(typo.is_err(), "stray task key must not be dropped");

        let header: Result<TasksFile, _> =
            serde_yaml::from_str("apiVersion: kit/v1\nkind: Tasks\nmetadta:\n  name: x\n");
        assert!(header.is_err(), "misspelled top-level key must fail");

        let probe: Result<ProbeSpec, _> =
            serde_yaml::from_str("tcpSocket:\n  port: 8080\ntimeoutSeconds: 3\n");
        assert!(probe.is_err(), "unknown probe key must fail");
    }

    #[test]
    fn task_map_rejects_duplicates() {
        // YAML itself allows duplicate keys; the model does not.
        let doc = "tasks:\n  a:\n    command: one\n  a:\n    command: two\n";
        let parsed: Result<Spec, _> = serde_yaml::from_str(doc);
        assert!(parsed.is_err());
    }

    #[test]
    fn probe_accepts_url_and_structured_forms() {
        let task: TaskSpec = serde_yaml::from_str(
            "readinessProbe: http://localhost:8080/healthz\nlivenessProbe:\n  tcpSocket:\n    port: 5432\n  failureThreshold: 3\n",
        )
        .unwrap();

        assert!(matches!(task.readiness_probe, Some(Probe::Url(_))));
        match task.liveness_probe {
            Some(Probe::Spec(ref spec)) => {
                assert_eq!(spec.tcp_socket.as_ref().unwrap().port, 5432);
                assert_eq!(spec.failure_threshold, Some(3));
            }
            ref other => panic!("unexpected probe: {other:?}"),
        }
    }

    #[test]
    fn full_document_round_trips() {
        let doc = r#"
apiVersion: kit/v1
kind: Tasks
metadata:
  name: demo
spec:
  terminationGracePeriodSeconds: 10
  semaphores:
    build: 2
  tasks:
    db:
      command: postgres
      ports: ["5432"]
      readinessProbe: tcp://localhost:5432
    api:
      sh: ./run-api.sh
      dependencies: [db]
      watch: [api]
      env:
        PORT: "8080"
      mutex: deploy
    up:
      dependencies: [api]
"#;
        let parsed: TasksFile = serde_yaml::from_str(doc).unwrap();
        let reparsed: TasksFile =
            serde_yaml::from_str(&serde_yaml::to_string(&parsed).unwrap()).unwrap();

        let names: Vec<&str> = reparsed.spec.tasks.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["db", "api", "up"]);
        assert_eq!(
            reparsed.spec.tasks.get("api").unwrap().dependencies,
            vec!["db".to_string()]
        );
        assert_eq!(reparsed.spec.semaphores.get("build"), Some(&2));
        assert_eq!(
            reparsed.spec.termination_grace_period(),
            Duration::from_secs(10)
        );
    }
}
