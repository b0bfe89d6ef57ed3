//! ICMP reachability probe via the system `ping`

use crate::backend::{CommandRunner, Prober, SystemRunner};
use crate::error::{Error, Result};
use regex::Regex;
use std::net::IpAddr;
use std::sync::LazyLock;
use std::time::Duration;

static RTT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time[=<]\s*([0-9]+(?:\.[0-9]+)?)\s*ms").expect("valid RTT pattern")
});

/// Sends a single echo request per probe
#[derive(Debug, Default)]
pub struct PingProber<R = SystemRunner> {
    runner: R,
}

impl PingProber<SystemRunner> {
    pub fn new() -> Self {
        Self::with_runner(SystemRunner)
    }
}

impl<R: CommandRunner> PingProber<R> {
    pub fn with_runner(runner: R) -> Self {
        Self { runner }
    }
}

impl<R: CommandRunner> Prober for PingProber<R> {
    fn probe_once(&self, target: IpAddr, timeout: Duration) -> Result<Duration> {
        // ping -W takes whole seconds
        let wait = timeout.as_secs().max(1).to_string();
        let target_str = target.to_string();
        let output = self
            .runner
            .run("ping", &["-n", "-c", "1", "-W", &wait, &target_str])?;

        if !output.success {
            let detail = output.stderr_str();
            let detail = if detail.trim().is_empty() {
                "no reply".to_string()
            } else {
                detail.trim().to_string()
            };
            return Err(Error::CommandFailed {
                command: format!("ping {target}"),
                stderr: detail,
            });
        }

        Ok(parse_rtt(&output.stdout_str()).unwrap_or_else(|| {
            log::debug!("ping {target} succeeded without an RTT line");
            Duration::ZERO
        }))
    }
}

/// Extract the round-trip time from `ping` output
pub fn parse_rtt(output: &str) -> Option<Duration> {
    let caps = RTT.captures(output)?;
    let millis: f64 = caps.get(1)?.as_str().parse().ok()?;
    Some(Duration::from_secs_f64(millis / 1000.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    #[test]
    fn test_parse_rtt() {
        let out = "PING 10.1.41.1 (10.1.41.1) 56(84) bytes of data.\n\
                   64 bytes from 10.1.41.1: icmp_seq=1 ttl=64 time=0.412 ms\n";
        assert_eq!(parse_rtt(out), Some(Duration::from_micros(412)));
        assert_eq!(parse_rtt("64 bytes from ::1: time<1 ms"), Some(Duration::from_millis(1)));
        assert_eq!(parse_rtt("1 packets transmitted, 0 received"), None);
    }

    #[test]
    fn test_probe_arguments_and_success() {
        let runner = ScriptedRunner::default();
        runner.respond("ping", "64 bytes from 10.1.41.1: icmp_seq=1 ttl=64 time=2 ms\n");
        let prober = PingProber::with_runner(&runner);
        let rtt = prober
            .probe_once("10.1.41.1".parse().unwrap(), Duration::from_millis(500))
            .unwrap();
        assert_eq!(rtt, Duration::from_millis(2));
        assert_eq!(runner.calls(), vec!["ping -n -c 1 -W 1 10.1.41.1"]);
    }

    #[test]
    fn test_probe_failure() {
        let runner = ScriptedRunner::default();
        runner.fail("ping", "");
        let prober = PingProber::with_runner(&runner);
        let err = prober
            .probe_once("10.1.41.1".parse().unwrap(), Duration::from_secs(2))
            .unwrap_err();
        assert!(err.to_string().contains("no reply"));
    }
}
