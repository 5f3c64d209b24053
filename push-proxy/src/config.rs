use std::{
    net::{IpAddr, Ipv4Addr, UdpSocket},
    time::Duration,
};

use clap::{ArgAction, Parser};
use indexmap::IndexMap;
use reqwest::Url;

use crate::{
    error::ConfigError,
    gateway::{NamespacePlacement, SeriesIdentity},
};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "push-proxy",
    version,
    about = "Forward the metrics of a local endpoint to a Pushgateway, and clean them up on shutdown"
)]
pub struct Cli {
    /// The address of the target to scrape metrics from
    #[arg(
        short,
        long,
        env = "TargetAddr",
        default_value = "http://localhost:9090/metrics"
    )]
    pub target_addr: String,

    /// The address of the Pushgateway to push metrics to
    #[arg(long, env = "PushgatewayAddr", default_value = "http://localhost:9091")]
    pub pushgateway_addr: String,

    /// The username for Pushgateway basic auth (if required)
    #[arg(long, env = "PushgatewayUser", default_value = "")]
    pub pushgateway_user: String,

    /// The password for Pushgateway basic auth (if required)
    #[arg(
        long,
        env = "PushgatewayPass",
        default_value = "",
        hide_default_value = true,
        hide_env_values = true
    )]
    pub pushgateway_pass: String,

    /// The job name to use when pushing metrics to the Pushgateway
    #[arg(
        short('j'),
        long,
        visible_alias = "job-name",
        env = "LabelJob",
        default_value = ""
    )]
    pub label_job: String,

    /// The instance label to use when pushing metrics to the Pushgateway
    ///
    /// Defaults to $POD_NAME, then $POD_IP, then the primary IP of the host
    #[arg(short('n'), long, env = "LabelInstance")]
    pub label_instance: Option<String>,

    /// The namespace label to use when pushing metrics to the Pushgateway
    #[arg(long, env = "LabelNamespace")]
    pub label_namespace: Option<String>,

    /// Position of the namespace label in the grouping key
    #[arg(
        long,
        value_enum,
        env = "NamespacePlacement",
        default_value_t = NamespacePlacement::Trailing
    )]
    pub namespace_placement: NamespacePlacement,

    /// Additional labels to add when pushing metrics to the Pushgateway, in key=value format
    #[arg(
        short,
        long,
        env = "Labels",
        value_delimiter = ',',
        value_parser = parse_label
    )]
    pub labels: Vec<(String, String)>,

    /// The interval at which to push metrics to the Pushgateway
    ///
    /// The first push happens right at startup, then once per interval
    #[arg(
        short,
        long,
        env = "Interval",
        default_value = "15s",
        value_parser = humantime::parse_duration
    )]
    pub interval: Duration,

    /// Deadline of a scrape and push cycle, capped by the interval
    #[arg(long, env = "Timeout", value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Deadline of the cleanup request sent on shutdown
    #[arg(
        long,
        env = "CleanupTimeout",
        default_value = "5s",
        value_parser = humantime::parse_duration
    )]
    pub cleanup_timeout: Duration,

    /// Automatically delete metrics from Pushgateway on shutdown
    #[arg(
        long,
        env = "AutoCleanup",
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = true,
        default_missing_value = "true"
    )]
    pub auto_cleanup: bool,
}

/// Parse a single `key=value` label
fn parse_label(s: &str) -> Result<(String, String), ConfigError> {
    match s.split_once('=') {
        Some((name, value)) => Ok((name.trim().to_owned(), value.to_owned())),
        None => Err(ConfigError::InvalidLabel(s.to_owned())),
    }
}

/// Basic auth credentials for the Pushgateway
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where to scrape from and where to push to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushTarget {
    pub target_addr: Url,
    pub pushgateway_addr: Url,
    pub credentials: Option<Credentials>,
}

/// Fully resolved configuration of the relay
///
/// Built once at startup and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub target: PushTarget,
    pub identity: SeriesIdentity,
    /// Grouping key URL, used for both pushes and cleanup
    pub push_url: Url,
    pub interval: Duration,
    pub cycle_timeout: Duration,
    pub cleanup_timeout: Duration,
    pub auto_cleanup: bool,
}

impl RelayConfig {
    /// Validate the command line and build the configuration
    ///
    /// `env` is used to look up the environment variables the instance label
    /// defaults to.
    pub fn resolve(cli: Cli, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if cli.label_job.is_empty() {
            return Err(ConfigError::MissingJob);
        }
        let instance = resolve_instance(cli.label_instance, env, primary_local_ip)
            .ok_or(ConfigError::MissingInstance)?;
        let namespace = cli.label_namespace.filter(|namespace| !namespace.is_empty());

        let mut labels = IndexMap::with_capacity(cli.labels.len());
        for (name, value) in cli.labels {
            if !is_valid_label_name(&name) {
                return Err(ConfigError::InvalidLabelName(name));
            }
            if name == "job" || name == "instance" || (name == "namespace" && namespace.is_some())
            {
                return Err(ConfigError::ReservedLabel(name));
            }
            // A repeated label keeps its first position and its last value
            labels.insert(name, value);
        }

        if cli.interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }

        let target_addr = parse_url("target", &cli.target_addr)?;
        let pushgateway_addr = parse_url("pushgateway", &cli.pushgateway_addr)?;

        let credentials = if !cli.pushgateway_user.is_empty() && !cli.pushgateway_pass.is_empty() {
            Some(Credentials {
                username: cli.pushgateway_user,
                password: cli.pushgateway_pass,
            })
        } else {
            if !cli.pushgateway_user.is_empty() || !cli.pushgateway_pass.is_empty() {
                log::warn!("Pushgateway basic auth needs both a user and a password, sending requests without it");
            }
            None
        };

        let identity = SeriesIdentity {
            job: cli.label_job,
            instance,
            namespace,
            labels,
            namespace_placement: cli.namespace_placement,
        };
        let push_url = identity.grouping_url(&pushgateway_addr)?;

        let cycle_timeout = cli
            .timeout
            .filter(|timeout| !timeout.is_zero())
            .map_or(cli.interval, |timeout| timeout.min(cli.interval));

        Ok(Self {
            target: PushTarget {
                target_addr,
                pushgateway_addr,
                credentials,
            },
            identity,
            push_url,
            interval: cli.interval,
            cycle_timeout,
            cleanup_timeout: cli.cleanup_timeout,
            auto_cleanup: cli.auto_cleanup,
        })
    }

    /// Log the effective configuration
    pub fn log_startup(&self) {
        log::info!(
            "Starting push-proxy with target={}, pushgateway={}, job={}, instance={}, interval={}",
            self.target.target_addr,
            self.target.pushgateway_addr,
            self.identity.job,
            self.identity.instance,
            humantime::format_duration(self.interval),
        );
        if let Some(namespace) = &self.identity.namespace {
            log::info!("Namespace label: {namespace}");
        }
        for (name, value) in &self.identity.labels {
            log::info!("Additional label: {name}={value}");
        }
        log::debug!(
            "Push URL: {}, cycle timeout: {}, auto cleanup: {}",
            self.push_url,
            humantime::format_duration(self.cycle_timeout),
            self.auto_cleanup,
        );
    }
}

/// Pick the instance label
///
/// In order: explicit value, `POD_NAME`, `POD_IP`, primary IP of the host.
/// Empty values are skipped.
pub fn resolve_instance(
    explicit: Option<String>,
    env: impl Fn(&str) -> Option<String>,
    local_ip: impl FnOnce() -> Option<IpAddr>,
) -> Option<String> {
    explicit
        .filter(|instance| !instance.is_empty())
        .or_else(|| env("POD_NAME").filter(|instance| !instance.is_empty()))
        .or_else(|| env("POD_IP").filter(|instance| !instance.is_empty()))
        .or_else(|| local_ip().map(|ip| ip.to_string()))
}

/// IP address of the interface used for outbound traffic
///
/// Connecting a UDP socket only selects a route, no packet is sent.
pub fn primary_local_ip() -> Option<IpAddr> {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
        Ok(socket.local_addr()?.ip())
    };

    match probe() {
        Ok(ip) if !ip.is_unspecified() => Some(ip),
        Ok(_) => None,
        Err(err) => {
            log::debug!("Could not find the primary IP address: {err}");
            None
        }
    }
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        field,
        value: value.to_owned(),
        reason,
    };

    let url = Url::parse(value).map_err(|err| invalid(err.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(invalid(format!("unsupported scheme {scheme:?}"))),
    }
}

/// Prometheus label names: `[a-zA-Z_][a-zA-Z0-9_]*`
fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("push-proxy").chain(args.iter().copied())).unwrap()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn command() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let cli = cli(&["-j", "batch", "-n", "pod-7"]);
        assert_eq!(cli.target_addr, "http://localhost:9090/metrics");
        assert_eq!(cli.pushgateway_addr, "http://localhost:9091");
        assert_eq!(cli.interval, Duration::from_secs(15));
        assert_eq!(cli.cleanup_timeout, Duration::from_secs(5));
        assert!(cli.auto_cleanup);
        assert!(cli.labels.is_empty());

        let config = RelayConfig::resolve(cli, no_env).unwrap();
        assert_eq!(
            config.push_url.as_str(),
            "http://localhost:9091/metrics/job/batch/instance/pod-7"
        );
        assert_eq!(config.cycle_timeout, Duration::from_secs(15));
        assert_eq!(config.target.credentials, None);
    }

    #[test]
    fn flags() {
        let cli = cli(&[
            "--job-name",
            "batch",
            "--label-instance",
            "pod-7",
            "--interval",
            "30s",
            "--timeout",
            "1m",
            "--auto-cleanup",
            "false",
            "--labels",
            "env=prod,zone=b",
            "-l",
            "app=relay",
        ]);
        assert_eq!(cli.label_job, "batch");
        assert_eq!(cli.interval, Duration::from_secs(30));
        assert!(!cli.auto_cleanup);

        let config = RelayConfig::resolve(cli, no_env).unwrap();
        // Timeout is capped by the interval
        assert_eq!(config.cycle_timeout, Duration::from_secs(30));
        assert_eq!(
            config.push_url.as_str(),
            "http://localhost:9091/metrics/job/batch/instance/pod-7/env/prod/zone/b/app/relay"
        );
    }

    #[test]
    fn interval_help_mentions_startup_push() {
        let command = Cli::command();
        let interval = command
            .get_arguments()
            .find(|arg| arg.get_id() == "interval")
            .unwrap();
        let help = interval.get_long_help().unwrap().to_string();
        assert!(help.contains("startup"), "{help}");
    }

    #[test]
    fn bare_auto_cleanup_flag() {
        assert!(cli(&["--auto-cleanup"]).auto_cleanup);
    }

    #[test]
    fn malformed_label_is_rejected() {
        assert!(Cli::try_parse_from(["push-proxy", "--labels", "env"]).is_err());
        assert!(Cli::try_parse_from(["push-proxy", "--interval", "soon"]).is_err());
    }

    #[test]
    fn repeated_label_keeps_first_position() {
        let config = RelayConfig::resolve(
            cli(&["-j", "j", "-n", "i", "-l", "a=1,b=2,a=3"]),
            no_env,
        )
        .unwrap();
        assert_eq!(
            config.push_url.path(),
            "/metrics/job/j/instance/i/a/3/b/2"
        );
    }

    #[test]
    fn missing_job() {
        let err = RelayConfig::resolve(cli(&["-n", "pod-7"]), no_env).unwrap_err();
        assert!(matches!(err, ConfigError::MissingJob));
        assert!(err.to_string().contains("--label-job"));
    }

    #[test]
    fn invalid_labels() {
        let resolve = |label: &str, extra: &[&str]| {
            let mut args = vec!["-j", "j", "-n", "i", "-l", label];
            args.extend_from_slice(extra);
            RelayConfig::resolve(cli(&args), no_env)
        };

        assert!(matches!(
            resolve("1abc=x", &[]),
            Err(ConfigError::InvalidLabelName(_))
        ));
        assert!(matches!(
            resolve("a-b=x", &[]),
            Err(ConfigError::InvalidLabelName(_))
        ));
        assert!(matches!(
            resolve("job=x", &[]),
            Err(ConfigError::ReservedLabel(_))
        ));
        assert!(matches!(
            resolve("instance=x", &[]),
            Err(ConfigError::ReservedLabel(_))
        ));
        assert!(resolve("namespace=x", &[]).is_ok());
        assert!(matches!(
            resolve("namespace=x", &["--label-namespace", "ns"]),
            Err(ConfigError::ReservedLabel(_))
        ));
    }

    #[test]
    fn invalid_addresses() {
        let err = RelayConfig::resolve(
            cli(&["-j", "j", "-n", "i", "--pushgateway-addr", "ftp://gw"]),
            no_env,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidUrl {
                field: "pushgateway",
                ..
            }
        ));

        let err = RelayConfig::resolve(
            cli(&["-j", "j", "-n", "i", "--target-addr", "not a url"]),
            no_env,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { field: "target", .. }));
    }

    #[test]
    fn zero_interval() {
        assert!(matches!(
            RelayConfig::resolve(cli(&["-j", "j", "-n", "i", "-i", "0s"]), no_env),
            Err(ConfigError::ZeroInterval)
        ));
    }

    #[test]
    fn credentials_need_user_and_password() {
        let config = RelayConfig::resolve(
            cli(&["-j", "j", "-n", "i", "--pushgateway-user", "user"]),
            no_env,
        )
        .unwrap();
        assert_eq!(config.target.credentials, None);

        let config = RelayConfig::resolve(
            cli(&[
                "-j",
                "j",
                "-n",
                "i",
                "--pushgateway-user",
                "user",
                "--pushgateway-pass",
                "secret",
            ]),
            no_env,
        )
        .unwrap();
        let credentials = config.target.credentials.unwrap();
        assert_eq!(credentials.username, "user");
        assert!(!format!("{credentials:?}").contains("secret"));
    }

    #[test]
    fn instance_from_pod_name() {
        let env = |name: &str| match name {
            "POD_NAME" => Some("pod-7".to_owned()),
            "POD_IP" => Some("10.0.0.7".to_owned()),
            _ => None,
        };
        let config = RelayConfig::resolve(cli(&["-j", "batch"]), env).unwrap();
        assert_eq!(config.identity.instance, "pod-7");
    }

    #[test]
    fn instance_precedence() {
        let ip = || Some(IpAddr::from([192, 168, 1, 10]));
        let env = |pod_name: Option<&str>, pod_ip: Option<&str>| {
            let pod_name = pod_name.map(str::to_owned);
            let pod_ip = pod_ip.map(str::to_owned);
            move |name: &str| match name {
                "POD_NAME" => pod_name.clone(),
                "POD_IP" => pod_ip.clone(),
                _ => None,
            }
        };

        assert_eq!(
            resolve_instance(Some("flag".to_owned()), env(Some("pod"), Some("1.2.3.4")), ip),
            Some("flag".to_owned())
        );
        assert_eq!(
            resolve_instance(Some(String::new()), env(Some("pod"), Some("1.2.3.4")), ip),
            Some("pod".to_owned())
        );
        assert_eq!(
            resolve_instance(None, env(Some(""), Some("1.2.3.4")), ip),
            Some("1.2.3.4".to_owned())
        );
        assert_eq!(
            resolve_instance(None, env(None, None), ip),
            Some("192.168.1.10".to_owned())
        );
        assert_eq!(resolve_instance(None, env(None, None), || None), None);
    }

    #[test]
    fn label_names() {
        assert!(is_valid_label_name("env"));
        assert!(is_valid_label_name("_private"));
        assert!(is_valid_label_name("zone_2"));
        assert!(!is_valid_label_name(""));
        assert!(!is_valid_label_name("2zone"));
        assert!(!is_valid_label_name("zone.name"));
    }
}
