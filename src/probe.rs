// src/probe.rs

//! Readiness and liveness probing.
//!
//! [`ProbeParams`] is the resolved form of a probe declaration (URL string or
//! structured spec). [`probe_loop`] evaluates an attempt on a fixed period and
//! reports transitions once per threshold crossing; the attempt is injected so
//! tests can script outcomes without sockets.

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tokio::net::TcpStream;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::model::Probe;

const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_PERIOD: Duration = Duration::from_secs(5);
const DEFAULT_SUCCESS_THRESHOLD: u32 = 1;
const DEFAULT_FAILURE_THRESHOLD: u32 = 20;

/// What a single probe attempt does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeAction {
    TcpSocket { host: String, port: u16 },
    HttpGet { url: String },
}

/// Fully resolved probe parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeParams {
    pub action: ProbeAction,
    pub initial_delay: Duration,
    pub period: Duration,
    pub success_threshold: u32,
    pub failure_threshold: u32,
}

impl ProbeParams {
    /// Resolve a probe declaration from the config model.
    ///
    /// Zero thresholds are invalid; missing parameters assume the defaults
    /// (5s delay, 5s period, 1 success, 20 failures).
    pub fn from_config(probe: &Probe) -> Result<Self> {
        let params = match probe {
            Probe::Url(url) => parse_probe_url(url)?,
            Probe::Spec(spec) => {
                let action = match (&spec.tcp_socket, &spec.http_get) {
                    (Some(tcp), None) => ProbeAction::TcpSocket {
                        host: tcp.host.clone().unwrap_or_else(|| "localhost".to_string()),
                        port: tcp.port,
                    },
                    (None, Some(http)) => {
                        let scheme = http.scheme.as_deref().unwrap_or("http").to_lowercase();
                        if scheme != "http" && scheme != "https" {
                            bail!("httpGet.scheme must be http or https, got {scheme:?}");
                        }
                        let host = http.host.as_deref().unwrap_or("localhost");
                        let port = http
                            .port
                            .ok_or_else(|| anyhow!("httpGet.port is required"))?;
                        let path = normalize_path(http.path.as_deref());
                        ProbeAction::HttpGet {
                            url: format!("{scheme}://{host}:{port}{path}"),
                        }
                    }
                    (Some(_), Some(_)) => bail!("probe declares both tcpSocket and httpGet"),
                    (None, None) => bail!("probe declares neither tcpSocket nor httpGet"),
                };

                ProbeParams {
                    action,
                    initial_delay: spec
                        .initial_delay_seconds
                        .map(Duration::from_secs)
                        .unwrap_or(DEFAULT_INITIAL_DELAY),
                    period: spec
                        .period_seconds
                        .map(Duration::from_secs)
                        .unwrap_or(DEFAULT_PERIOD),
                    success_threshold: spec.success_threshold.unwrap_or(DEFAULT_SUCCESS_THRESHOLD),
                    failure_threshold: spec.failure_threshold.unwrap_or(DEFAULT_FAILURE_THRESHOLD),
                }
            }
        };

        if params.success_threshold == 0 {
            bail!("successThreshold must be at least 1");
        }
        if params.failure_threshold == 0 {
            bail!("failureThreshold must be at least 1");
        }
        if params.period.is_zero() {
            bail!("period must be non-zero");
        }

        Ok(params)
    }
}

/// Parse the URL probe syntax:
///
/// `http[s]://host:port/path?failureThreshold=N&initialDelay=Xs&period=Ys&successThreshold=M`
/// or `tcp://host:port`.
fn parse_probe_url(raw: &str) -> Result<ProbeParams> {
    let (base, query) = match raw.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (raw, None),
    };

    let (scheme, rest) = base
        .split_once("://")
        .ok_or_else(|| anyhow!("probe {raw:?} has no scheme"))?;

    let action = match scheme {
        "tcp" => {
            let (host, port) = split_host_port(rest)
                .with_context(|| format!("probe {raw:?}: expected tcp://host:port"))?;
            ProbeAction::TcpSocket { host, port }
        }
        "http" | "https" => {
            let (authority, path) = match rest.find('/') {
                Some(i) => (&rest[..i], &rest[i..]),
                None => (rest, ""),
            };
            let authority = if authority.starts_with(':') {
                // "http://:8080/x" means localhost.
                format!("localhost{authority}")
            } else {
                authority.to_string()
            };
            let path = normalize_path(Some(path));
            ProbeAction::HttpGet {
                url: format!("{scheme}://{authority}{path}"),
            }
        }
        other => bail!("unsupported probe scheme {other:?}"),
    };

    let mut params = ProbeParams {
        action,
        initial_delay: DEFAULT_INITIAL_DELAY,
        period: DEFAULT_PERIOD,
        success_threshold: DEFAULT_SUCCESS_THRESHOLD,
        failure_threshold: DEFAULT_FAILURE_THRESHOLD,
    };

    if let Some(query) = query {
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("probe query {pair:?} is not key=value"))?;
            match key {
                "initialDelay" | "initialDelaySeconds" => {
                    params.initial_delay = parse_duration(value)
                        .with_context(|| format!("initialDelay {value:?}"))?;
                }
                "period" | "periodSeconds" => {
                    params.period =
                        parse_duration(value).with_context(|| format!("period {value:?}"))?;
                }
                "successThreshold" => {
                    params.success_threshold = value
                        .parse()
                        .with_context(|| format!("successThreshold {value:?}"))?;
                }
                "failureThreshold" => {
                    params.failure_threshold = value
                        .parse()
                        .with_context(|| format!("failureThreshold {value:?}"))?;
                }
                other => bail!("unknown probe parameter {other:?}"),
            }
        }
    }

    Ok(params)
}

fn split_host_port(s: &str) -> Result<(String, u16)> {
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing port in {s:?}"))?;
    let host = if host.is_empty() { "localhost" } else { host };
    let port = port.parse().with_context(|| format!("port {port:?}"))?;
    Ok((host.to_string(), port))
}

fn normalize_path(path: Option<&str>) -> String {
    match path {
        None | Some("") => "/".to_string(),
        Some(p) if p.starts_with('/') => p.to_string(),
        Some(p) => format!("/{p}"),
    }
}

/// Parse a duration string like `"3s"`, `"250ms"`, `"1m"`; bare digits are
/// seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        bail!("empty duration string");
    }

    if s.chars().all(|c| c.is_ascii_digit()) {
        return Ok(Duration::from_secs(s.parse()?));
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| anyhow!("duration missing digits"))?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .with_context(|| format!("invalid duration number {num_part:?}"))?;

    match unit_part.trim().to_lowercase().as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        unit => bail!("unsupported duration unit {unit:?}; expected ms, s, m, or h"),
    }
}

/// Evaluate `attempt` on the probe's period, reporting threshold crossings.
///
/// After the initial delay, one attempt runs per period (with the period as
/// its timeout). Consecutive successes and failures are counted; reaching
/// `success_threshold` reports `true` once per transition to ready, reaching
/// `failure_threshold` reports `false` once per transition to unready, and
/// every transition resets the opposite counter. Returns when the token is
/// tripped.
pub async fn probe_loop<F, Fut, C>(
    params: &ProbeParams,
    token: &CancellationToken,
    mut attempt: F,
    mut report: C,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
    C: FnMut(bool, Option<anyhow::Error>),
{
    tokio::select! {
        _ = token.cancelled() => return,
        _ = sleep(params.initial_delay) => {}
    }

    let mut successes = 0u32;
    let mut failures = 0u32;
    let mut ready: Option<bool> = None;

    loop {
        if token.is_cancelled() {
            return;
        }

        let outcome = match tokio::time::timeout(params.period, attempt()).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!("probe attempt timed out after {:?}", params.period)),
        };

        match outcome {
            Ok(()) => {
                successes = successes.saturating_add(1);
                failures = 0;
                if successes >= params.success_threshold && ready != Some(true) {
                    ready = Some(true);
                    report(true, None);
                }
            }
            Err(err) => {
                failures = failures.saturating_add(1);
                successes = 0;
                if failures >= params.failure_threshold && ready != Some(false) {
                    ready = Some(false);
                    report(false, Some(err));
                }
            }
        }

        tokio::select! {
            _ = token.cancelled() => return,
            _ = sleep(params.period) => {}
        }
    }
}

/// Run the real probe loop for resolved params: TCP connects or HTTP GETs.
pub async fn run_probe<C>(params: ProbeParams, token: CancellationToken, report: C)
where
    C: FnMut(bool, Option<anyhow::Error>),
{
    let client = match reqwest::Client::builder().timeout(params.period).build() {
        Ok(client) => client,
        Err(err) => {
            debug!(error = %err, "failed to build probe HTTP client");
            return;
        }
    };

    let action = params.action.clone();
    probe_loop(
        &params,
        &token,
        move || {
            let action = action.clone();
            let client = client.clone();
            async move { attempt_once(&action, &client).await }
        },
        report,
    )
    .await;
}

async fn attempt_once(action: &ProbeAction, client: &reqwest::Client) -> Result<()> {
    match action {
        ProbeAction::TcpSocket { host, port } => {
            TcpStream::connect((host.as_str(), *port))
                .await
                .with_context(|| format!("connecting to {host}:{port}"))?;
            Ok(())
        }
        ProbeAction::HttpGet { url } => {
            let response = client
                .get(url)
                .send()
                .await
                .with_context(|| format!("GET {url}"))?;
            let status = response.status();
            if !status.is_success() {
                bail!("GET {url} returned {status}");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use crate::config::model::Probe;

    fn url_probe(s: &str) -> ProbeParams {
        ProbeParams::from_config(&Probe::Url(s.to_string())).unwrap()
    }

    #[test]
    fn url_with_all_parameters() {
        let p = url_probe(
            "http://localhost:8080/healthz?failureThreshold=3&initialDelay=1s&period=2s&successThreshold=2",
        );
        assert_eq!(
            p.action,
            ProbeAction::HttpGet {
                url: "http://localhost:8080/healthz".to_string()
            }
        );
        assert_eq!(p.initial_delay, Duration::from_secs(1));
        assert_eq!(p.period, Duration::from_secs(2));
        assert_eq!(p.success_threshold, 2);
        assert_eq!(p.failure_threshold, 3);
    }

    #[test]
    fn url_defaults() {
        let p = url_probe("http://localhost:8080");
        assert_eq!(p.initial_delay, Duration::from_secs(5));
        assert_eq!(p.period, Duration::from_secs(5));
        assert_eq!(p.success_threshold, 1);
        assert_eq!(p.failure_threshold, 20);
        assert_eq!(
            p.action,
            ProbeAction::HttpGet {
                url: "http://localhost:8080/".to_string()
            }
        );
    }

    #[test]
    fn tcp_url_with_empty_host_means_localhost() {
        let p = url_probe("tcp://:5432");
        assert_eq!(
            p.action,
            ProbeAction::TcpSocket {
                host: "localhost".to_string(),
                port: 5432
            }
        );
    }

    #[test]
    fn zero_thresholds_are_rejected() {
        let err = ProbeParams::from_config(&Probe::Url(
            "http://localhost:8080/?successThreshold=0".to_string(),
        ))
        .unwrap_err()
        .to_string();
        assert!(err.contains("successThreshold"), "{err}");

        let err = ProbeParams::from_config(&Probe::Url(
            "tcp://localhost:1234?failureThreshold=0".to_string(),
        ))
        .unwrap_err()
        .to_string();
        assert!(err.contains("failureThreshold"), "{err}");
    }

    #[test]
    fn unknown_query_keys_are_rejected() {
        let err = ProbeParams::from_config(&Probe::Url(
            "http://localhost:8080/?timeout=3s".to_string(),
        ))
        .unwrap_err()
        .to_string();
        assert!(err.contains("timeout"), "{err}");
    }

    #[test]
    fn durations_parse_with_and_without_suffix() {
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
        assert!(parse_duration("oops").is_err());
    }

    fn scripted(outcomes: &[bool]) -> (impl FnMut() -> futures::future::Ready<Result<()>>, Arc<Mutex<VecDeque<bool>>>) {
        let script = Arc::new(Mutex::new(outcomes.iter().copied().collect::<VecDeque<_>>()));
        let handle = script.clone();
        let attempt = move || {
            let ok = script.lock().unwrap().pop_front().unwrap_or(true);
            futures::future::ready(if ok { Ok(()) } else { Err(anyhow!("down")) })
        };
        (attempt, handle)
    }

    fn params(success: u32, failure: u32) -> ProbeParams {
        ProbeParams {
            action: ProbeAction::TcpSocket {
                host: "localhost".to_string(),
                port: 1,
            },
            initial_delay: Duration::from_millis(10),
            period: Duration::from_millis(10),
            success_threshold: success,
            failure_threshold: failure,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reports_ready_once_after_consecutive_successes() {
        let (attempt, _script) = scripted(&[false, true, true, true, true]);
        let token = CancellationToken::new();
        let reports = Arc::new(Mutex::new(Vec::new()));

        let sink = reports.clone();
        let cancel = token.clone();
        probe_loop(&params(2, 20), &token, attempt, move |ok, _err| {
            sink.lock().unwrap().push(ok);
            if sink.lock().unwrap().len() == 1 {
                cancel.cancel();
            }
        })
        .await;

        // One failure, then two consecutive successes reach the threshold;
        // further successes do not re-report.
        assert_eq!(*reports.lock().unwrap(), vec![true]);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_unready_after_failure_threshold_and_recovers() {
        let (attempt, _script) = scripted(&[false, false, false, true]);
        let token = CancellationToken::new();
        let reports = Arc::new(Mutex::new(Vec::new()));

        let sink = reports.clone();
        let cancel = token.clone();
        probe_loop(&params(1, 3), &token, attempt, move |ok, _err| {
            sink.lock().unwrap().push(ok);
            if ok {
                cancel.cancel();
            }
        })
        .await;

        // Three consecutive failures report unready; the next success
        // transitions back to ready.
        assert_eq!(*reports.lock().unwrap(), vec![false, true]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_during_initial_delay_reports_nothing() {
        let (attempt, _script) = scripted(&[true]);
        let token = CancellationToken::new();
        token.cancel();

        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();
        probe_loop(&params(1, 1), &token, attempt, move |ok, _err| {
            sink.lock().unwrap().push(ok)
        })
        .await;

        assert!(reports.lock().unwrap().is_empty());
    }
}
