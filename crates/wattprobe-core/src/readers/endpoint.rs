//! Pull-based scrape of a text metrics endpoint.
//!
//! The consumed contract is a single named time-series holding cumulative
//! process CPU seconds, optionally restricted to samples carrying a matching
//! `vm_name` label. The endpoint lives on another host in most deployments,
//! so the agent's connect/read timeouts are short and independent of the
//! tick interval: an unreachable endpoint costs a bounded slice of the tick
//! and degrades the external metric to absent, nothing more.

use std::time::Duration;

use log::{debug, warn};

/// Default metric consumed from the endpoint.
pub const DEFAULT_SERIES: &str = "kepler_process_cpu_seconds_total";

/// Default connect/read timeout for one scrape.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Scraper for one cumulative series on a metrics endpoint.
pub struct MetricsEndpoint {
    agent: ureq::Agent,
    url: String,
    series: String,
    vm_name: Option<String>,
    /// Whether the previous scrape succeeded, to log reachability
    /// transitions once instead of every tick.
    last_ok: std::cell::Cell<bool>,
}

impl MetricsEndpoint {
    pub fn new(url: &str, series: &str, vm_name: Option<&str>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .build();
        Self {
            agent,
            url: url.to_string(),
            series: series.to_string(),
            vm_name: vm_name.map(str::to_string),
            last_ok: std::cell::Cell::new(true),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Scrape once and return the summed cumulative value of the series,
    /// or `None` when the endpoint is unreachable or the series is absent.
    pub fn read(&self) -> Option<f64> {
        let body = match self.agent.get(&self.url).call() {
            Ok(resp) => resp.into_string().ok()?,
            Err(e) => {
                if self.last_ok.get() {
                    warn!("metrics endpoint {} unreachable: {e}", self.url);
                }
                self.last_ok.set(false);
                return None;
            }
        };
        if !self.last_ok.get() {
            debug!("metrics endpoint {} reachable again", self.url);
        }
        self.last_ok.set(true);
        parse_series_total(&body, &self.series, self.vm_name.as_deref())
    }
}

/// Sum all samples of `series` in a text exposition body, keeping only
/// samples whose `vm_name` label equals the filter when one is given.
/// `None` when no sample of the series parsed.
pub fn parse_series_total(body: &str, series: &str, vm_name: Option<&str>) -> Option<f64> {
    let mut total = 0.0;
    let mut seen = false;

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(rest) = line.strip_prefix(series) else {
            continue;
        };
        // The series name must end exactly here: at a label block or a value.
        let (labels, value_part) = match rest.as_bytes().first() {
            Some(b'{') => {
                let Some(close) = rest.find('}') else {
                    continue;
                };
                (&rest[1..close], rest[close + 1..].trim())
            }
            Some(b' ') | Some(b'\t') => ("", rest.trim()),
            _ => continue,
        };

        if let Some(wanted) = vm_name {
            if !label_matches(labels, "vm_name", wanted) {
                continue;
            }
        }

        let Some(value) = value_part
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<f64>().ok())
        else {
            continue;
        };
        if !value.is_finite() {
            continue;
        }
        total += value;
        seen = true;
    }

    seen.then_some(total)
}

/// Check a label block (`a="x",b="y"`) for `key="value"`.
fn label_matches(labels: &str, key: &str, value: &str) -> bool {
    labels.split(',').any(|pair| {
        pair.trim()
            .split_once('=')
            .is_some_and(|(k, v)| k.trim() == key && v.trim().trim_matches('"') == value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    const BODY: &str = "\
# HELP kepler_process_cpu_seconds_total CPU seconds per tracked process
# TYPE kepler_process_cpu_seconds_total counter
kepler_process_cpu_seconds_total{pid=\"100\",vm_name=\"fedora40\"} 12.5
kepler_process_cpu_seconds_total{pid=\"200\",vm_name=\"fedora40\"} 7.5
kepler_process_cpu_seconds_total{pid=\"300\",vm_name=\"debian12\"} 100.0
kepler_process_cpu_seconds_total_other{pid=\"1\"} 999.0
kepler_node_info{arch=\"x86_64\"} 1
";

    #[test]
    fn sums_all_samples_of_the_series() {
        let total = parse_series_total(BODY, "kepler_process_cpu_seconds_total", None).unwrap();
        assert!((total - 120.0).abs() < 1e-9);
    }

    #[test]
    fn vm_name_filter_restricts_samples() {
        let total =
            parse_series_total(BODY, "kepler_process_cpu_seconds_total", Some("fedora40")).unwrap();
        assert!((total - 20.0).abs() < 1e-9);
        assert!(parse_series_total(BODY, "kepler_process_cpu_seconds_total", Some("no-such")).is_none());
    }

    #[test]
    fn longer_metric_names_do_not_shadow_the_series() {
        // `..._total_other` shares the prefix but is a different series.
        let total = parse_series_total(
            "kepler_process_cpu_seconds_total_other 5.0\n",
            "kepler_process_cpu_seconds_total",
            None,
        );
        assert!(total.is_none());
    }

    #[test]
    fn absent_series_is_none_and_garbage_values_are_skipped() {
        assert!(parse_series_total("other_metric 1.0\n", "wanted", None).is_none());
        let mixed = "wanted not-a-number\nwanted 3.0\nwanted NaN\n";
        assert!((parse_series_total(mixed, "wanted", None).unwrap() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn bare_series_without_labels_parses() {
        let total = parse_series_total("wanted 4.25 1700000000\n", "wanted", None).unwrap();
        assert!((total - 4.25).abs() < 1e-9);
    }

    #[test]
    fn scrape_against_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let body = "wanted{vm_name=\"vm1\"} 2.5\nwanted{vm_name=\"vm2\"} 1.5\n";
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let handle = std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(response.as_bytes());
            }
        });

        let endpoint = MetricsEndpoint::new(
            &format!("http://{addr}/metrics"),
            "wanted",
            None,
            Duration::from_secs(2),
        );
        let total = endpoint.read().unwrap();
        assert!((total - 4.0).abs() < 1e-9);
        handle.join().unwrap();
    }

    #[test]
    fn unreachable_endpoint_reads_none() {
        // Reserve a port and close it so nothing is listening there.
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let endpoint = MetricsEndpoint::new(
            &format!("http://127.0.0.1:{port}/metrics"),
            "wanted",
            None,
            Duration::from_millis(200),
        );
        assert!(endpoint.read().is_none());
    }
}
